use std::path::{Path, PathBuf};

use git2::{
    build::{CheckoutBuilder, RepoBuilder},
    BranchType, ObjectType, Oid, Repository, SubmoduleUpdateOptions,
};
use log::{debug, info, trace};
use tempfile::TempDir;
use thiserror::Error;

use crate::{
    model::manifest::{Manifest, SubmodulePolicy},
    provider::RepositoryProvider,
};

use super::{cache::CacheError, mirror::Mirror, GitAuth, MirrorCache};

#[derive(Error, Debug)]
pub enum WorktreeError {
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),
    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("Destination {0} already exists and is not empty")]
    DestinationNotEmpty(String),
    #[error("Cannot find revision `{revision}` in {url}")]
    RevisionNotFound { revision: String, url: String },
}

/// A checked out copy of one commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Worktree {
    pub path: PathBuf,
    /// False when an existing worktree was reused.
    pub created: bool,
}

pub struct WorktreeManager<'a> {
    cache: &'a MirrorCache,
}

impl<'a> WorktreeManager<'a> {
    pub fn new(cache: &'a MirrorCache) -> Self {
        WorktreeManager { cache }
    }

    /// Returns the worktree of `commit_id`, checking it out from the mirror when missing.
    ///
    /// Worktrees are populated in a temporary sibling directory and renamed into place, so
    /// a directory named after a commit is always complete. When another process wins the
    /// race its worktree is reused.
    pub fn materialize(
        &self,
        mirror: &Mirror<'_>,
        commit_id: &str,
        manifest: &Manifest,
    ) -> Result<Worktree, WorktreeError> {
        let target = self.cache.worktree_path(mirror.project(), commit_id);
        if target.exists() {
            trace!("Reusing worktree {}", target.display());
            return Ok(Worktree {
                path: target,
                created: false,
            });
        }

        let commits = self.cache.commits_path(mirror.project());
        std::fs::create_dir_all(&commits)?;
        let staging = tempfile::Builder::new()
            .prefix(&format!(".{commit_id}-"))
            .tempdir_in(&commits)?;

        info!(
            "Checking out {} of {} into {}",
            commit_id,
            mirror.project(),
            target.display()
        );
        let repo = self.checkout_from_mirror(mirror, commit_id, staging.path())?;
        self.update_submodules(&repo, manifest, mirror.auth())?;
        drop(repo);

        place_worktree(staging, target)
    }

    fn checkout_from_mirror(
        &self,
        mirror: &Mirror<'_>,
        commit_id: &str,
        destination: &Path,
    ) -> Result<Repository, WorktreeError> {
        let source = mirror.path().to_string_lossy().to_string();
        let repo = RepoBuilder::new()
            .fetch_options(self.cache.fetch_options(None))
            .clone(&source, destination)?;
        {
            let commit = repo.find_commit(Oid::from_str(commit_id)?)?;
            repo.checkout_tree(commit.as_object(), Some(CheckoutBuilder::new().force()))?;
            repo.set_head_detached(commit.id())?;
        }
        Ok(repo)
    }

    /// Clones the provider's project into a user-chosen directory, outside the cache.
    ///
    /// `depth` limits the fetched history. The project revision, when set, is checked out
    /// as a tracking branch if it names a remote branch and detached otherwise.
    pub fn clone_into(
        &self,
        provider: &dyn RepositoryProvider,
        destination: &Path,
        depth: Option<u32>,
        manifest: &Manifest,
    ) -> Result<Repository, WorktreeError> {
        if destination.exists() && destination.read_dir()?.next().is_some() {
            return Err(WorktreeError::DestinationNotEmpty(
                destination.display().to_string(),
            ));
        }

        let url = provider.clone_url();
        info!("Cloning {} into {}", url, destination.display());
        let auth = GitAuth::from_provider(provider);
        let mut fetch_options = self.cache.fetch_options(auth.clone());
        if let Some(depth) = depth {
            fetch_options.depth(i32::try_from(depth).unwrap_or(i32::MAX));
        }
        let repo = RepoBuilder::new()
            .fetch_options(fetch_options)
            .clone(&url, destination)?;

        if let Some(revision) = &provider.project().revision {
            select_revision(&repo, revision).map_err(|error| match error {
                WorktreeError::Git(_) => WorktreeError::RevisionNotFound {
                    revision: revision.clone(),
                    url: url.clone(),
                },
                other => other,
            })?;
        }
        self.update_submodules(&repo, manifest, auth)?;
        Ok(repo)
    }

    /// Initializes and checks out the submodules selected by the manifest.
    pub fn update_submodules(
        &self,
        repo: &Repository,
        manifest: &Manifest,
        auth: Option<GitAuth>,
    ) -> Result<(), WorktreeError> {
        let Some(workdir) = repo.workdir() else {
            return Ok(());
        };
        if !workdir.join(".gitmodules").exists() {
            trace!("No submodules in {}", workdir.display());
            return Ok(());
        }
        if manifest.gitmodules == SubmodulePolicy::Disabled {
            debug!("Submodules disabled for {}", workdir.display());
            return Ok(());
        }
        self.update_selected(
            repo,
            &|path: &str| manifest.gitmodules.selects(path),
            manifest.recurse_submodules,
            &auth,
        )
    }

    fn update_selected(
        &self,
        repo: &Repository,
        selects: &dyn Fn(&str) -> bool,
        recursive: bool,
        auth: &Option<GitAuth>,
    ) -> Result<(), WorktreeError> {
        for mut submodule in repo.submodules()? {
            let path = submodule.path().to_string_lossy().to_string();
            if !selects(&path) {
                debug!("Skipping submodule {}", path);
                continue;
            }
            info!("Updating submodule {}", path);
            let mut options = SubmoduleUpdateOptions::new();
            options.fetch(self.cache.fetch_options(auth.clone()));
            submodule.update(true, Some(&mut options))?;

            if recursive {
                let nested = submodule.open()?;
                self.update_selected(&nested, &|_: &str| true, true, auth)?;
            }
        }
        Ok(())
    }
}

/// Moves a fully populated staging directory to `target`. Losing the race against another
/// process reuses its worktree; the staging directory is removed on drop either way.
fn place_worktree(staging: TempDir, target: PathBuf) -> Result<Worktree, WorktreeError> {
    match std::fs::rename(staging.path(), &target) {
        Ok(()) => Ok(Worktree {
            path: target,
            created: true,
        }),
        Err(_) if target.exists() => {
            debug!(
                "Worktree {} was created concurrently, discarding {}",
                target.display(),
                staging.path().display()
            );
            Ok(Worktree {
                path: target,
                created: false,
            })
        }
        Err(error) => Err(error.into()),
    }
}

fn select_revision(repo: &Repository, revision: &str) -> Result<(), WorktreeError> {
    let remote_name = format!("origin/{revision}");
    if let Ok(remote_branch) = repo.find_branch(&remote_name, BranchType::Remote) {
        let commit = remote_branch.get().peel_to_commit()?;
        let mut branch = match repo.find_branch(revision, BranchType::Local) {
            Ok(branch) => branch,
            Err(_) => repo.branch(revision, &commit, false)?,
        };
        branch.set_upstream(Some(&remote_name))?;
        repo.set_head(&format!("refs/heads/{revision}"))?;
        repo.checkout_head(Some(CheckoutBuilder::new().force()))?;
        return Ok(());
    }

    let object = repo.revparse_single(revision)?.peel(ObjectType::Commit)?;
    repo.checkout_tree(&object, Some(CheckoutBuilder::new().force()))?;
    repo.set_head_detached(object.id())?;
    Ok(())
}
