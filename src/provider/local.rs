use std::path::{Path, PathBuf};

use git2::{BranchType, ErrorCode, ObjectType, Repository};
use log::trace;

use crate::model::revision::RemoteRef;

use super::{ProviderContext, ProviderError, RepositoryProvider};

/// Serves repositories stored under a directory of the local filesystem,
/// laid out as `<server>/<org>/<repo>` (bare or with a `.git` directory).
pub struct LocalProvider {
    context: ProviderContext,
}

impl LocalProvider {
    pub fn new(context: ProviderContext) -> Self {
        LocalProvider { context }
    }

    /// `<server>/<org>/<repo>`, or `<server>/<org>/<repo>.git` when only the latter exists.
    fn repository_path(&self) -> PathBuf {
        let path = Path::new(&self.context.descriptor.server).join(self.context.project.to_path());
        if path.exists() {
            return path;
        }
        let bare = path.with_file_name(format!("{}.git", self.context.project.repository));
        if bare.exists() {
            bare
        } else {
            path
        }
    }

    fn open(&self) -> Result<Repository, ProviderError> {
        let path = self.repository_path();
        trace!("Opening local repository {}", path.display());
        Repository::open(&path).map_err(|e| match e.code() {
            ErrorCode::NotFound => ProviderError::RepositoryNotFound(path.display().to_string()),
            _ => e.into(),
        })
    }
}

impl RepositoryProvider for LocalProvider {
    fn context(&self) -> &ProviderContext {
        &self.context
    }

    fn clone_url(&self) -> String {
        self.repository_path().to_string_lossy().to_string()
    }

    fn repository_url(&self) -> String {
        format!("file://{}", self.repository_path().display())
    }

    fn list_branches(&self) -> Result<Vec<RemoteRef>, ProviderError> {
        let repo = self.open()?;
        let mut result = Vec::new();
        for branch in repo.branches(Some(BranchType::Local))? {
            let (branch, _) = branch?;
            let name = branch.name()?.map(str::to_owned);
            let commit = branch.get().peel_to_commit()?;
            if let Some(name) = name {
                result.push(RemoteRef::new(name, commit.id().to_string()));
            }
        }
        Ok(result)
    }

    fn list_tags(&self) -> Result<Vec<RemoteRef>, ProviderError> {
        let repo = self.open()?;
        let mut result = Vec::new();
        for name in repo.tag_names(None)?.iter().flatten() {
            let commit = repo
                .revparse_single(&format!("refs/tags/{name}"))?
                .peel_to_commit()?;
            result.push(RemoteRef::new(name, commit.id().to_string()));
        }
        Ok(result)
    }

    fn read_bytes(&self, path: &str) -> Result<Option<Vec<u8>>, ProviderError> {
        let repo = self.open()?;
        let revision = self.context.project.revision.as_deref().unwrap_or("HEAD");
        let spec = format!("{}:{}", revision, path.trim_start_matches('/'));
        let result = match repo.revparse_single(&spec) {
            Ok(object) if object.kind() == Some(ObjectType::Blob) => {
                Ok(Some(object.peel_to_blob()?.content().to_vec()))
            }
            Ok(_) => Ok(None),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        };
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::project::ProjectIdentifier,
        provider::{build_provider, CredentialOverrides, ProviderDescriptor},
        test_support::RemoteFixture,
    };

    use pretty_assertions::assert_eq;

    fn provider(fixture: &RemoteFixture, revision: Option<&str>) -> Box<dyn RepositoryProvider> {
        let descriptor = ProviderDescriptor::local(&fixture.root());
        let project = ProjectIdentifier::new("org", "repo")
            .unwrap()
            .with_revision(revision.map(str::to_owned));
        build_provider(&descriptor, project, &CredentialOverrides::default()).unwrap()
    }

    #[test]
    fn read_files() {
        let fixture = RemoteFixture::new("org", "repo");
        fixture.commit(&[("main.nf", "println 'hello'")], "first");
        let provider = provider(&fixture, None);
        assert_eq!(
            provider.read_text("main.nf").unwrap().as_deref(),
            Some("println 'hello'")
        );
        assert_eq!(provider.read_text("missing.nf").unwrap(), None);
        provider.validate_exists("main.nf").unwrap();
        assert!(matches!(
            provider.validate_exists("missing.nf"),
            Err(ProviderError::MissingRemoteArtifact { .. })
        ));
    }

    #[test]
    fn read_files_at_revision() {
        let fixture = RemoteFixture::new("org", "repo");
        fixture.commit(&[("main.nf", "v1")], "first");
        fixture.tag("v1.0");
        fixture.commit(&[("main.nf", "v2")], "second");
        assert_eq!(
            provider(&fixture, Some("v1.0")).read_text("main.nf").unwrap().as_deref(),
            Some("v1")
        );
        assert_eq!(
            provider(&fixture, None).read_text("main.nf").unwrap().as_deref(),
            Some("v2")
        );
    }

    #[test]
    fn list_refs() {
        let fixture = RemoteFixture::new("org", "repo");
        let first = fixture.commit(&[("main.nf", "v1")], "first");
        fixture.tag("v1.0");
        fixture.branch("dev");
        let second = fixture.commit(&[("main.nf", "v2")], "second");

        let provider = provider(&fixture, None);
        let mut branches = provider.list_branches().unwrap();
        branches.sort();
        assert_eq!(
            branches,
            vec![
                RemoteRef::new("dev", first.clone()),
                RemoteRef::new("master", second),
            ]
        );
        assert_eq!(provider.list_tags().unwrap(), vec![RemoteRef::new("v1.0", first)]);
    }

    #[test]
    fn bare_repository_with_git_suffix() {
        let fixture = RemoteFixture::new("org", "repo");
        fixture.commit(&[("main.nf", "println 'bare'")], "first");
        let bare = fixture.root().join("org").join("pipe.git");
        git2::build::RepoBuilder::new()
            .bare(true)
            .clone(&fixture.url(), &bare)
            .unwrap();

        let descriptor = ProviderDescriptor::local(&fixture.root());
        let project = ProjectIdentifier::new("org", "pipe").unwrap();
        let provider =
            build_provider(&descriptor, project, &CredentialOverrides::default()).unwrap();
        assert_eq!(provider.clone_url(), bare.to_string_lossy());
        assert_eq!(
            provider.read_text("main.nf").unwrap().as_deref(),
            Some("println 'bare'")
        );
    }

    #[test]
    fn missing_repository() {
        let dir = tempfile::tempdir().unwrap();
        let descriptor = ProviderDescriptor::local(dir.path());
        let project = ProjectIdentifier::new("org", "nothing").unwrap();
        let provider =
            build_provider(&descriptor, project, &CredentialOverrides::default()).unwrap();
        assert!(matches!(
            provider.read_bytes("main.nf"),
            Err(ProviderError::RepositoryNotFound(_))
        ));
    }
}
