//! Turns user input (short names, `org/repo`, URLs) into project identifiers.

use log::{debug, trace};
use thiserror::Error;

use crate::{
    git::{CacheError, MirrorCache},
    model::{project::ProjectIdentifier, ParseError},
    provider::{ProviderDescriptor, ProviderRegistry, RemoteLocation},
};

pub const DEFAULT_ORGANIZATION: &str = "nextflow-io";
const SCRIPT_SUFFIX: &str = ".nf";

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("Project name `{name}` is ambiguous, it matches: {}", .candidates.join(", "))]
    AmbiguousProjectName {
        name: String,
        candidates: Vec<String>,
    },
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Resolves project names against the provider registry and the projects already cached.
///
/// Resolving a `file:` URL registers an ad-hoc local provider in the borrowed registry.
/// Resolving any URL selects the provider it points to, see [`NameResolver::selected_provider`].
pub struct NameResolver<'a> {
    registry: &'a mut ProviderRegistry,
    cache: &'a MirrorCache,
    default_organization: String,
    selected_provider: Option<String>,
}

impl<'a> NameResolver<'a> {
    pub fn new(
        registry: &'a mut ProviderRegistry,
        cache: &'a MirrorCache,
        default_organization: impl Into<String>,
    ) -> Self {
        NameResolver {
            registry,
            cache,
            default_organization: default_organization.into(),
            selected_provider: None,
        }
    }

    /// Provider named by the last resolved URL.
    pub fn selected_provider(&self) -> Option<&str> {
        self.selected_provider.as_deref()
    }

    pub fn resolve(
        &mut self,
        raw: &str,
        revision: Option<&str>,
    ) -> Result<ProjectIdentifier, ResolveError> {
        let raw = raw.trim();
        let revision = revision.filter(|r| !r.is_empty()).map(str::to_owned);

        if let Some(location) = RemoteLocation::parse(raw) {
            let project = self.resolve_location(raw, &location)?;
            return Ok(project.with_revision(revision));
        }

        if raw.starts_with("./") || raw.starts_with("../") || raw.starts_with('/') {
            return Err(ParseError::invalid_name(raw, "local paths are not project names").into());
        }

        let (name, revision) = match revision {
            Some(revision) => (raw, Some(revision)),
            None => match raw.rsplit_once(':') {
                Some((name, revision)) if !revision.is_empty() => {
                    (name, Some(revision.to_owned()))
                }
                _ => (raw, None),
            },
        };

        let mut segments: Vec<&str> = name.split('/').collect();
        let main_script = match segments.last() {
            Some(last) if segments.len() > 1 && last.ends_with(SCRIPT_SUFFIX) => {
                segments.pop().map(str::to_owned)
            }
            _ => None,
        };

        let project = match segments.as_slice() {
            [short] => self.resolve_short_name(short, revision.as_deref())?,
            [organization, repository] => ProjectIdentifier::new(*organization, *repository)?,
            _ => {
                return Err(ParseError::invalid_name(
                    raw,
                    "expected `organization/repository` or a short name",
                )
                .into())
            }
        };
        trace!("Resolved {} to {}", raw, project);
        Ok(project
            .with_revision(revision)
            .with_main_script(main_script))
    }

    fn resolve_location(
        &mut self,
        raw: &str,
        location: &RemoteLocation,
    ) -> Result<ProjectIdentifier, ResolveError> {
        if let RemoteLocation::File(path) = location {
            if let Some(root) = path.parent().and_then(|p| p.parent()) {
                let descriptor = ProviderDescriptor::local(root);
                self.selected_provider = Some(descriptor.name.clone());
                self.registry.append(descriptor);
            }
        }

        let path = match self.registry.find_by_location(location) {
            Some((descriptor, path)) => {
                debug!("{} belongs to provider {}", raw, descriptor.name);
                self.selected_provider = Some(descriptor.name.clone());
                path
            }
            None => {
                debug!("No provider matches {}, using its path as project name", raw);
                location.path()
            }
        };

        match path.split('/').collect::<Vec<_>>().as_slice() {
            [organization, repository] => Ok(ProjectIdentifier::new(*organization, *repository)?),
            _ => Err(ParseError::invalid_name(
                raw,
                format!("`{path}` is not an `organization/repository` path"),
            )
            .into()),
        }
    }

    fn resolve_short_name(
        &self,
        name: &str,
        revision: Option<&str>,
    ) -> Result<ProjectIdentifier, ResolveError> {
        let entries = self.cache.list_projects()?;
        let candidates = find_candidates(name, revision, &entries);
        match candidates.as_slice() {
            [] => Ok(ProjectIdentifier::new(
                self.default_organization.as_str(),
                name,
            )?),
            [single] => {
                let project = single.split(':').next().unwrap_or(single);
                match project.split_once('/') {
                    Some((organization, repository)) => {
                        Ok(ProjectIdentifier::new(organization, repository)?)
                    }
                    None => Err(ParseError::invalid_name(project, "not a qualified name").into()),
                }
            }
            _ => Err(ResolveError::AmbiguousProjectName {
                name: name.to_owned(),
                candidates,
            }),
        }
    }
}

/// Cached entries (`org/repo`, optionally `org/repo:revision`) whose repository matches
/// `name`. Exact matches win over prefix matches. Entries carrying a revision only
/// qualify when `revision` is absent or equal.
fn find_candidates(name: &str, revision: Option<&str>, entries: &[String]) -> Vec<String> {
    let mut exact = Vec::new();
    let mut prefixed = Vec::new();
    for entry in entries {
        let (project, entry_revision) = match entry.split_once(':') {
            Some((project, entry_revision)) => (project, Some(entry_revision)),
            None => (entry.as_str(), None),
        };
        if let (Some(entry_revision), Some(revision)) = (entry_revision, revision) {
            if entry_revision != revision {
                continue;
            }
        }
        let Some((_, repository)) = project.split_once('/') else {
            continue;
        };
        if repository == name {
            exact.push(entry.clone());
        } else if repository.starts_with(name) {
            prefixed.push(entry.clone());
        }
    }
    if exact.is_empty() {
        prefixed
    } else {
        exact
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{git::cache::PROVIDER_CONFIG_KEY, test_support::RemoteFixture};

    use git2::Repository;
    use pretty_assertions::assert_eq;

    fn cache_with(projects: &[&str]) -> (tempfile::TempDir, MirrorCache) {
        let dir = tempfile::tempdir().unwrap();
        let cache = MirrorCache::new(dir.path().join("cache"), None).unwrap();
        for project in projects {
            let repo = Repository::init_bare(cache.location().join(project)).unwrap();
            repo.config()
                .unwrap()
                .set_str(PROVIDER_CONFIG_KEY, "github")
                .unwrap();
        }
        (dir, cache)
    }

    fn project(organization: &str, repository: &str) -> ProjectIdentifier {
        ProjectIdentifier::new(organization, repository).unwrap()
    }

    #[test]
    fn qualified_name_is_idempotent() {
        let (_dir, cache) = cache_with(&["nextflow-io/hello"]);
        let mut registry = ProviderRegistry::default();
        let mut resolver = NameResolver::new(&mut registry, &cache, DEFAULT_ORGANIZATION);
        let first = resolver.resolve("nextflow-io/hello", None).unwrap();
        let second = resolver.resolve("nextflow-io/hello", None).unwrap();
        assert_eq!(first, project("nextflow-io", "hello"));
        assert_eq!(first, second);
        assert_eq!(resolver.selected_provider(), None);
    }

    #[test]
    fn revision_suffix() {
        let (_dir, cache) = cache_with(&[]);
        let mut registry = ProviderRegistry::default();
        let mut resolver = NameResolver::new(&mut registry, &cache, DEFAULT_ORGANIZATION);
        assert_eq!(
            resolver.resolve("nextflow-io/hello:dev", None).unwrap(),
            project("nextflow-io", "hello").with_revision(Some("dev".to_owned()))
        );
        // explicit revision wins, the suffix is not split
        assert!(resolver.resolve("nextflow-io/hello:dev", Some("v1")).is_err());
    }

    #[test]
    fn embedded_script() {
        let (_dir, cache) = cache_with(&[]);
        let mut registry = ProviderRegistry::default();
        let mut resolver = NameResolver::new(&mut registry, &cache, DEFAULT_ORGANIZATION);
        assert_eq!(
            resolver.resolve("foo/bar/main.nf", None).unwrap(),
            project("foo", "bar").with_main_script(Some("main.nf".to_owned()))
        );
    }

    #[test]
    fn github_url() {
        let (_dir, cache) = cache_with(&[]);
        let mut registry = ProviderRegistry::default();
        let mut resolver = NameResolver::new(&mut registry, &cache, DEFAULT_ORGANIZATION);
        assert_eq!(
            resolver.resolve("https://github.com/cbcrg/foo", None).unwrap(),
            project("cbcrg", "foo")
        );
        assert_eq!(resolver.selected_provider(), Some("github"));

        assert_eq!(
            resolver.resolve("git@gitlab.com:acme/pipe.git", None).unwrap(),
            project("acme", "pipe")
        );
        assert_eq!(resolver.selected_provider(), Some("gitlab"));
    }

    #[test]
    fn unknown_host_uses_path() {
        let (_dir, cache) = cache_with(&[]);
        let mut registry = ProviderRegistry::default();
        let mut resolver = NameResolver::new(&mut registry, &cache, DEFAULT_ORGANIZATION);
        assert_eq!(
            resolver.resolve("https://scm.example.com/org/repo.git", None).unwrap(),
            project("org", "repo")
        );
        assert_eq!(resolver.selected_provider(), None);
    }

    #[test]
    fn file_url_registers_local_provider() {
        let fixture = RemoteFixture::new("org", "repo");
        let (_dir, cache) = cache_with(&[]);
        let mut registry = ProviderRegistry::default();
        let mut resolver = NameResolver::new(&mut registry, &cache, DEFAULT_ORGANIZATION);
        assert_eq!(
            resolver.resolve(&fixture.url(), None).unwrap(),
            project("org", "repo")
        );
        let selected = resolver.selected_provider().unwrap().to_owned();
        assert!(selected.starts_with("file:"));
        assert!(registry.get(&selected).is_some());
    }

    #[test]
    fn rejects_paths() {
        let (_dir, cache) = cache_with(&[]);
        let mut registry = ProviderRegistry::default();
        let mut resolver = NameResolver::new(&mut registry, &cache, DEFAULT_ORGANIZATION);
        for name in ["./hello", "../hello", "/hello", "a/b/c"] {
            assert!(
                matches!(
                    resolver.resolve(name, None),
                    Err(ResolveError::Parse(ParseError::InvalidProjectName { .. }))
                ),
                "{name}"
            );
        }
    }

    #[test]
    fn short_names() {
        let (_dir, cache) = cache_with(&["acme/hello", "acme/rnaseq-nf", "other/hello"]);
        let mut registry = ProviderRegistry::default();
        let mut resolver = NameResolver::new(&mut registry, &cache, DEFAULT_ORGANIZATION);

        assert_eq!(
            resolver.resolve("rnaseq", None).unwrap(),
            project("acme", "rnaseq-nf")
        );
        assert_eq!(
            resolver.resolve("unknown", None).unwrap(),
            project(DEFAULT_ORGANIZATION, "unknown")
        );
        match resolver.resolve("hello", None) {
            Err(ResolveError::AmbiguousProjectName { candidates, .. }) => assert_eq!(
                candidates,
                vec!["acme/hello".to_owned(), "other/hello".to_owned()]
            ),
            other => panic!("expected ambiguity, got {other:?}"),
        }
    }

    #[test]
    fn candidates_prefer_exact_and_agreeing_revisions() {
        let entries: Vec<String> = ["a/hello", "b/hello-world", "c/hello:v1", "d/hello:v2"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            find_candidates("hello", Some("v1"), &entries),
            vec!["a/hello".to_owned(), "c/hello:v1".to_owned()]
        );
        assert_eq!(
            find_candidates("hello-w", None, &entries),
            vec!["b/hello-world".to_owned()]
        );
        assert!(find_candidates("nothing", None, &entries).is_empty());
    }
}
