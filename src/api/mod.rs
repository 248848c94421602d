use std::path::{Path, PathBuf};

use anyhow::anyhow;
use log::{debug, info};

use crate::{
    git::{MirrorCache, Worktree, WorktreeManager},
    model::{
        manifest::{Manifest, MANIFEST_FILE_NAME},
        project::ProjectIdentifier,
        revision::RevisionInfo,
    },
    provider::{
        build_provider, CredentialOverrides, ProviderDescriptor, ProviderError, ProviderRegistry,
        RemoteLocation, RepositoryProvider,
    },
    resolver::NameResolver,
    status,
};

mod builder;

pub use builder::AssetManagerBuilder;

pub const DOWNLOADED: &str = "downloaded from local mirror";
pub const ALREADY_AVAILABLE: &str = "already available";

/// Entry point for managing pipeline projects: resolves names, keeps mirrors and
/// worktrees in the cache and reports on their state.
pub struct AssetManager {
    cache: MirrorCache,
    registry: ProviderRegistry,
    hub: Option<String>,
    default_organization: String,
    overrides: CredentialOverrides,
}

/// What the execution engine needs to run a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunTarget {
    pub project: ProjectIdentifier,
    pub commit_id: String,
    pub worktree: PathBuf,
    pub main_script: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectInfo {
    pub project: String,
    pub provider: String,
    pub repository_url: String,
    /// Mirror location, when the project is cached.
    pub local_path: Option<PathBuf>,
    pub description: Option<String>,
    pub homepage: Option<String>,
    pub main_script: String,
    /// Revisions with a worktree, each with a notice when origin has moved on.
    pub revisions: Vec<(RevisionInfo, Option<String>)>,
}

impl AssetManager {
    pub fn builder() -> AssetManagerBuilder {
        AssetManagerBuilder::default()
    }

    pub(crate) fn new(
        cache: MirrorCache,
        registry: ProviderRegistry,
        hub: Option<String>,
        default_organization: String,
        overrides: CredentialOverrides,
    ) -> Self {
        AssetManager {
            cache,
            registry,
            hub,
            default_organization,
            overrides,
        }
    }

    pub fn cache(&self) -> &MirrorCache {
        &self.cache
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Resolves `name` to a project and binds it to the provider serving it.
    ///
    /// The provider is the one named by a URL, else the `hub` given at build time, else
    /// the one recorded by the project's mirror, else the configured default.
    pub fn resolve(
        &mut self,
        name: &str,
        revision: Option<&str>,
    ) -> anyhow::Result<Box<dyn RepositoryProvider>> {
        let (project, explicit) = self.resolve_name(name, revision)?;
        let local_hint = self.local_hint(&project)?;
        let descriptor = self.registry.select(
            explicit.as_deref(),
            self.hub.as_deref(),
            local_hint.as_deref(),
        )?;
        debug!("Using provider {} for {}", descriptor.name, project);
        Ok(build_provider(descriptor, project, &self.overrides)?)
    }

    fn resolve_name(
        &mut self,
        name: &str,
        revision: Option<&str>,
    ) -> anyhow::Result<(ProjectIdentifier, Option<String>)> {
        let mut resolver = NameResolver::new(
            &mut self.registry,
            &self.cache,
            self.default_organization.as_str(),
        );
        let project = resolver.resolve(name, revision)?;
        let explicit = resolver.selected_provider().map(str::to_owned);
        Ok((project, explicit))
    }

    /// Provider the project's mirror was created from, if it is cached.
    fn local_hint(&mut self, project: &ProjectIdentifier) -> anyhow::Result<Option<String>> {
        if let Some(recorded) = self.cache.recorded_provider(project)? {
            if self.registry.get(&recorded).is_none() {
                if let Some(root) = recorded.strip_prefix("file:") {
                    self.registry.append(ProviderDescriptor::local(Path::new(root)));
                }
            }
            return Ok(Some(recorded));
        }
        let hint = self
            .cache
            .origin_url(project)?
            .and_then(|url| RemoteLocation::parse(&url))
            .and_then(|location| self.registry.find_by_location(&location))
            .map(|(descriptor, _)| descriptor.name.clone());
        Ok(hint)
    }

    /// Main script to look for before creating a mirror: the one named in the project
    /// identifier, else the one declared by the remote manifest.
    fn main_script_hint(&self, provider: &dyn RepositoryProvider) -> anyhow::Result<String> {
        if let Some(script) = &provider.project().main_script {
            return Ok(script.clone());
        }
        if self.cache.contains(provider.project()) {
            return Ok(Manifest::default().main_script().to_owned());
        }
        Ok(remote_manifest(provider)?.main_script().to_owned())
    }

    fn materialize(
        &self,
        provider: &dyn RepositoryProvider,
    ) -> anyhow::Result<(String, Manifest, Worktree)> {
        let main_script = self.main_script_hint(provider)?;
        let mirror = self.cache.ensure(provider, &main_script)?;
        let commit_id = mirror.resolve_commit(provider.project().revision.as_deref())?;
        let manifest = mirror.read_manifest(&commit_id)?;
        let worktree =
            WorktreeManager::new(&self.cache).materialize(&mirror, &commit_id, &manifest)?;
        Ok((commit_id, manifest, worktree))
    }

    /// Names of all cached projects.
    pub fn list(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.cache.list_projects()?)
    }

    /// Cached revisions of one project, formatted `org/repo:revision`.
    pub fn list_revisions(&mut self, name: &str) -> anyhow::Result<Vec<String>> {
        let (project, _) = self.resolve_name(name, None)?;
        let mut result: Vec<String> = status::list_local_revisions(&self.cache, &project)?
            .iter()
            .map(|revision| format!("{}:{}", project, revision.label()))
            .collect();
        result.sort();
        Ok(result)
    }

    /// Makes sure a worktree of the requested revision exists.
    ///
    /// `depth` is accepted for compatibility; mirrors always hold the full history.
    pub fn download(
        &mut self,
        name: &str,
        revision: Option<&str>,
        depth: Option<u32>,
    ) -> anyhow::Result<&'static str> {
        if let Some(depth) = depth {
            debug!("Ignoring depth {} for cached download", depth);
        }
        let provider = self.resolve(name, revision)?;
        let (commit_id, _, worktree) = self.materialize(provider.as_ref())?;
        if worktree.created {
            info!("{} {} at {}", DOWNLOADED, provider.project(), commit_id);
            Ok(DOWNLOADED)
        } else {
            debug!("{} {} is {}", provider.project(), commit_id, ALREADY_AVAILABLE);
            Ok(ALREADY_AVAILABLE)
        }
    }

    /// Clones a project into `destination`, outside the cache.
    pub fn clone(
        &mut self,
        name: &str,
        destination: Option<&Path>,
        revision: Option<&str>,
        depth: Option<u32>,
    ) -> anyhow::Result<PathBuf> {
        let provider = self.resolve(name, revision)?;
        let destination = match destination {
            Some(destination) => destination.to_path_buf(),
            None => PathBuf::from(&provider.project().repository),
        };
        let manifest = remote_manifest(provider.as_ref())?;
        WorktreeManager::new(&self.cache).clone_into(
            provider.as_ref(),
            &destination,
            depth,
            &manifest,
        )?;
        Ok(destination)
    }

    /// Describes a project and the state of its cached revisions.
    pub fn info(&mut self, name: &str) -> anyhow::Result<ProjectInfo> {
        let provider = self.resolve(name, None)?;
        let project = provider.project();

        let (local_path, manifest) = match self.cache.open(provider.as_ref())? {
            Some(mirror) => {
                let commit_id = mirror.resolve_commit(None)?;
                (Some(mirror.path().to_path_buf()), mirror.read_manifest(&commit_id)?)
            }
            None => (None, remote_manifest(provider.as_ref()).unwrap_or_default()),
        };

        let revisions = status::list_local_revisions(&self.cache, project)?
            .into_iter()
            .map(|revision| {
                let notice = status::check_remote_status(provider.as_ref(), &revision);
                (revision, notice)
            })
            .collect();

        Ok(ProjectInfo {
            project: project.name(),
            provider: provider.name().to_owned(),
            repository_url: provider.repository_url(),
            local_path,
            main_script: manifest.main_script().to_owned(),
            description: manifest.description,
            homepage: manifest.homepage,
            revisions,
        })
    }

    /// Fetches the latest branches and tags into the project's mirror, creating it if
    /// needed. Returns the commit the default branch points to.
    pub fn update(&mut self, name: &str) -> anyhow::Result<String> {
        let provider = self.resolve(name, None)?;
        let mirror = match self.cache.open(provider.as_ref())? {
            Some(mirror) => {
                mirror.fetch()?;
                mirror
            }
            None => {
                let main_script = self.main_script_hint(provider.as_ref())?;
                self.cache.ensure(provider.as_ref(), &main_script)?
            }
        };
        Ok(mirror.resolve_commit(None)?)
    }

    /// Compares the mirror's branches and tags with origin, see
    /// [`status::RefStatus::render`] for `level`.
    pub fn diff(&mut self, name: &str, level: u8) -> anyhow::Result<Vec<String>> {
        let provider = self.resolve(name, None)?;
        let mirror = self
            .cache
            .open(provider.as_ref())?
            .ok_or_else(|| not_cached(provider.project()))?;
        Ok(status::diff_local_and_remote(&mirror, level)?)
    }

    /// Content of the project's main script, from the cached worktree when there is one
    /// and from the provider otherwise.
    pub fn view(&mut self, name: &str, revision: Option<&str>) -> anyhow::Result<String> {
        let provider = self.resolve(name, revision)?;
        let project = provider.project();

        if let Some(mirror) = self.cache.open(provider.as_ref())? {
            let commit_id = mirror.resolve_commit(project.revision.as_deref())?;
            let worktree = self.cache.worktree_path(project, &commit_id);
            if worktree.is_dir() {
                let script = match &project.main_script {
                    Some(script) => script.clone(),
                    None => Manifest::from_file(&worktree.join(MANIFEST_FILE_NAME))?
                        .main_script()
                        .to_owned(),
                };
                debug!("Reading {} from {}", script, worktree.display());
                return Ok(std::fs::read_to_string(worktree.join(script))?);
            }
        }

        let script = self.main_script_hint(provider.as_ref())?;
        match provider.read_text(&script)? {
            Some(content) => Ok(content),
            None => Err(ProviderError::MissingRemoteArtifact {
                repository: provider.repository_url(),
                path: script,
            }
            .into()),
        }
    }

    /// Resolves and materializes a project, returning the paths needed to run it.
    pub fn run_path(&mut self, name: &str, revision: Option<&str>) -> anyhow::Result<RunTarget> {
        let provider = self.resolve(name, revision)?;
        let (commit_id, manifest, worktree) = self.materialize(provider.as_ref())?;
        let project = provider.project().clone();

        let script = project
            .main_script
            .clone()
            .unwrap_or_else(|| manifest.main_script().to_owned());
        let main_script = worktree.path.join(&script);
        if !main_script.is_file() {
            return Err(ProviderError::MissingRemoteArtifact {
                repository: worktree.path.display().to_string(),
                path: script,
            }
            .into());
        }

        if let Ok(current) = status::current_revision_and_name(&worktree.path) {
            status::check_remote_status(provider.as_ref(), &current);
        }

        Ok(RunTarget {
            project,
            commit_id,
            worktree: worktree.path,
            main_script,
        })
    }
}

/// Manifest at the provider's default branch or requested revision; empty when absent.
fn remote_manifest(provider: &dyn RepositoryProvider) -> anyhow::Result<Manifest> {
    match provider.read_text(MANIFEST_FILE_NAME)? {
        Some(content) => Ok(Manifest::from_toml_str(&content)?),
        None => {
            debug!(
                "No {} in {}, using defaults",
                MANIFEST_FILE_NAME,
                provider.repository_url()
            );
            Ok(Manifest::default())
        }
    }
}

fn not_cached(project: &ProjectIdentifier) -> anyhow::Error {
    anyhow!("Project {} is not available locally, download it first", project)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        git::{cache::PROVIDER_CONFIG_KEY, CacheError},
        resolver::ResolveError,
        test_support::{commit_files, RemoteFixture},
    };

    use git2::Repository;
    use pretty_assertions::assert_eq;

    fn manager(fixture: &RemoteFixture) -> AssetManager {
        AssetManager::builder()
            .cache_directory(fixture.scratch("cache"))
            .providers_file(fixture.scratch("scm.toml"))
            .try_build()
            .unwrap()
    }

    fn fixture() -> RemoteFixture {
        let fixture = RemoteFixture::new("org", "repo");
        fixture.commit(&[("main.nf", "println 'v1'")], "first");
        fixture.tag("v1.0");
        fixture
    }

    #[test]
    fn download_twice() {
        let fixture = fixture();
        let mut manager = manager(&fixture);
        let url = fixture.url();

        assert_eq!(manager.download(&url, None, None).unwrap(), DOWNLOADED);
        assert_eq!(manager.download(&url, None, Some(1)).unwrap(), ALREADY_AVAILABLE);
        assert_eq!(manager.list().unwrap(), vec!["org/repo".to_owned()]);
    }

    #[test]
    fn download_bare_repository_url() {
        let fixture = fixture();
        let bare = fixture.root().join("org").join("pipe.git");
        git2::build::RepoBuilder::new()
            .bare(true)
            .clone(&fixture.url(), &bare)
            .unwrap();
        let mut manager = manager(&fixture);

        let url = format!("file://{}", bare.display());
        assert_eq!(manager.download(&url, None, None).unwrap(), DOWNLOADED);
        assert_eq!(
            manager.list().unwrap(),
            vec!["org/pipe".to_owned()]
        );
        assert_eq!(manager.view("org/pipe", None).unwrap(), "println 'v1'");
    }

    #[test]
    fn cached_project_by_name() {
        let fixture = fixture();
        let mut manager = manager(&fixture);
        manager.download(&fixture.url(), None, None).unwrap();

        // a fresh manager knows the local provider only from the mirror
        let mut manager = self::manager(&fixture);
        assert_eq!(manager.download("org/repo", None, None).unwrap(), ALREADY_AVAILABLE);
        assert_eq!(manager.download("repo", None, None).unwrap(), ALREADY_AVAILABLE);
    }

    #[test]
    fn run_path_points_into_worktree() {
        let fixture = fixture();
        let head = fixture.commit(&[("main.nf", "println 'v2'")], "second");
        let mut manager = manager(&fixture);

        let target = manager.run_path(&fixture.url(), None).unwrap();
        assert_eq!(target.commit_id, head);
        assert_eq!(
            target.worktree,
            manager.cache().worktree_path(&target.project, &head)
        );
        assert_eq!(
            std::fs::read_to_string(&target.main_script).unwrap(),
            "println 'v2'"
        );

        let tagged = manager.run_path(&fixture.url(), Some("v1.0")).unwrap();
        assert_ne!(tagged.worktree, target.worktree);
        assert_eq!(
            std::fs::read_to_string(&tagged.main_script).unwrap(),
            "println 'v1'"
        );
    }

    #[test]
    fn run_path_honors_manifest() {
        let fixture = RemoteFixture::new("org", "repo");
        fixture.commit(
            &[
                ("pipeline.toml", "[manifest]\nmain_script = \"run.nf\"\n"),
                ("run.nf", "println 'run'"),
            ],
            "first",
        );
        let mut manager = manager(&fixture);
        let target = manager.run_path(&fixture.url(), None).unwrap();
        assert!(target.main_script.ends_with("run.nf"));
    }

    #[test]
    fn missing_main_script() {
        let fixture = RemoteFixture::new("org", "repo");
        fixture.commit(&[("README.md", "nothing to run")], "first");
        let mut manager = manager(&fixture);
        let error = manager.download(&fixture.url(), None, None).unwrap_err();
        assert!(matches!(
            error.downcast_ref::<CacheError>(),
            Some(CacheError::Provider(ProviderError::MissingRemoteArtifact { .. }))
        ));
        assert!(manager.list().unwrap().is_empty());
    }

    #[test]
    fn list_revisions_of_one_project() {
        let fixture = fixture();
        let other = fixture.sibling("org", "other");
        commit_files(&other, &[("main.nf", "other")], "first");
        let other_url = format!(
            "file://{}",
            other.workdir().unwrap().display().to_string().trim_end_matches('/')
        );

        let mut manager = manager(&fixture);
        manager.download(&fixture.url(), Some("v1.0"), None).unwrap();
        manager.download(&other_url, None, None).unwrap();

        assert_eq!(
            manager.list_revisions("org/repo").unwrap(),
            vec!["org/repo:v1.0".to_owned()]
        );
        assert_eq!(
            manager.list().unwrap(),
            vec!["org/other".to_owned(), "org/repo".to_owned()]
        );
    }

    #[test]
    fn provider_mismatch_is_fatal() {
        let fixture = fixture();
        let mut manager = AssetManager::builder()
            .cache_directory(fixture.scratch("cache"))
            .providers_file(fixture.scratch("scm.toml"))
            .hub("github")
            .try_build()
            .unwrap();
        let project = ProjectIdentifier::new("org", "repo").unwrap();
        let repo = Repository::init_bare(manager.cache().mirror_path(&project)).unwrap();
        repo.config()
            .unwrap()
            .set_str(PROVIDER_CONFIG_KEY, "gitlab")
            .unwrap();

        let error = manager.download("org/repo", None, None).unwrap_err();
        assert!(matches!(
            error.downcast_ref::<CacheError>(),
            Some(CacheError::ProviderMismatch { .. })
        ));
    }

    #[test]
    fn ambiguous_short_name() {
        let fixture = fixture();
        let mut manager = manager(&fixture);
        for name in ["a/hello", "b/hello"] {
            Repository::init_bare(manager.cache().location().join(name)).unwrap();
        }
        let error = manager.download("hello", None, None).unwrap_err();
        match error.downcast_ref::<ResolveError>() {
            Some(ResolveError::AmbiguousProjectName { candidates, .. }) => assert_eq!(
                candidates,
                &vec!["a/hello".to_owned(), "b/hello".to_owned()]
            ),
            other => panic!("expected ambiguity, got {other:?}"),
        }
    }

    #[test]
    fn view_info_update_and_diff() {
        let fixture = fixture();
        let mut manager = manager(&fixture);
        let url = fixture.url();

        // remote read before anything is cached
        assert_eq!(manager.view(&url, None).unwrap(), "println 'v1'");
        assert!(manager.diff(&url, 0).is_err());

        manager.download(&url, None, None).unwrap();
        assert_eq!(manager.view(&url, None).unwrap(), "println 'v1'");

        let info = manager.info(&url).unwrap();
        assert_eq!(info.project, "org/repo");
        assert_eq!(info.main_script, "main.nf");
        assert!(info.local_path.is_some());
        assert_eq!(info.revisions.len(), 1);
        assert_eq!(info.revisions[0].1, None);

        let head = fixture.commit(&[("main.nf", "println 'v2'")], "second");
        assert_eq!(
            manager.diff(&url, 0).unwrap(),
            vec!["  v1.0".to_owned(), "* master".to_owned()]
        );
        assert_eq!(manager.update(&url).unwrap(), head);
        assert_eq!(
            manager.diff(&url, 0).unwrap(),
            vec!["  v1.0".to_owned(), "  master".to_owned()]
        );
    }

    #[test]
    fn clone_into_directory() {
        let fixture = fixture();
        fixture.branch("dev");
        let mut manager = manager(&fixture);
        let destination = fixture.scratch("clone");

        let path = manager
            .clone(&fixture.url(), Some(&destination), Some("dev"), None)
            .unwrap();
        assert_eq!(path, destination);
        let repo = Repository::open(&destination).unwrap();
        assert_eq!(repo.head().unwrap().shorthand(), Some("dev"));
        // clones do not populate the cache
        assert!(manager.list().unwrap().is_empty());
    }
}
