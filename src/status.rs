//! Revision reporting and drift detection against the remote.

use std::{collections::BTreeMap, path::Path};

use git2::Repository;
use log::{debug, info};
use thiserror::Error;

use crate::{
    git::{CacheError, Mirror, MirrorCache},
    model::{
        project::ProjectIdentifier,
        revision::{abbreviate, RevisionInfo, RevisionKind},
    },
    provider::RepositoryProvider,
};

#[derive(Error, Debug)]
pub enum StatusError {
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// The revision checked out in `worktree`: its branch, else a tag pointing at the
/// commit, else the bare commit.
pub fn current_revision_and_name(worktree: &Path) -> Result<RevisionInfo, StatusError> {
    let repo = Repository::open(worktree)?;
    let head = repo.head()?;
    let commit_id = head.peel_to_commit()?.id().to_string();
    if head.is_branch() {
        if let Some(name) = head.shorthand() {
            return Ok(RevisionInfo::branch(commit_id, name));
        }
    }
    if let Some(tag) = tag_at_commit(&repo, &commit_id)? {
        return Ok(RevisionInfo::tag(commit_id, tag));
    }
    Ok(RevisionInfo::commit(commit_id))
}

/// Label of the revision checked out in `worktree`.
pub fn current_revision(worktree: &Path) -> Result<String, StatusError> {
    Ok(current_revision_and_name(worktree)?.label().to_owned())
}

fn tag_at_commit(repo: &Repository, commit_id: &str) -> Result<Option<String>, git2::Error> {
    let mut names = Vec::new();
    for reference in repo.references_glob("refs/tags/*")? {
        let reference = reference?;
        let points_here = reference
            .peel_to_commit()
            .map(|commit| commit.id().to_string() == commit_id)
            .unwrap_or(false);
        if points_here {
            if let Some(name) = reference.shorthand() {
                names.push(name.to_owned());
            }
        }
    }
    names.sort();
    Ok(names.into_iter().next())
}

/// Revisions of `project` that have a worktree in the cache.
pub fn list_local_revisions(
    cache: &MirrorCache,
    project: &ProjectIdentifier,
) -> Result<Vec<RevisionInfo>, StatusError> {
    let mut result = Vec::new();
    for commit_id in cache.list_commits(project)? {
        let path = cache.worktree_path(project, &commit_id);
        let revision = match current_revision_and_name(&path) {
            Ok(revision) => revision,
            Err(error) => {
                debug!("Cannot read revision of {}: {}", path.display(), error);
                RevisionInfo::commit(commit_id)
            }
        };
        result.push(revision);
    }
    Ok(result)
}

/// Compares `current` with the remote ref of the same name.
///
/// Returns a notice when the remote has moved on. Never fails: remote errors are logged
/// and treated as "no notice".
pub fn check_remote_status(
    provider: &dyn RepositoryProvider,
    current: &RevisionInfo,
) -> Option<String> {
    match provider.find_remote_ref(current) {
        Ok(Some(remote)) if remote.commit_id != current.commit_id => {
            let notice = format!(
                "{} {} local version looks outdated; remote {} is at {}, local is at {}",
                provider.project(),
                current.kind,
                remote.name,
                abbreviate(&remote.commit_id),
                current.short_commit_id()
            );
            info!("{}", notice);
            Some(notice)
        }
        Ok(Some(_)) => {
            debug!("{} {} is up to date", provider.project(), current);
            None
        }
        Ok(None) => {
            debug!("No remote ref matches {} of {}", current, provider.project());
            None
        }
        Err(error) => {
            debug!(
                "Cannot check remote status of {}: {}",
                provider.project(),
                error
            );
            None
        }
    }
}

/// One branch or tag compared between the mirror and origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefStatus {
    pub kind: RevisionKind,
    pub name: String,
    pub local: String,
    /// `None` when origin no longer has the ref.
    pub remote: Option<String>,
}

impl RefStatus {
    pub fn is_outdated(&self) -> bool {
        self.remote.as_deref().is_some_and(|remote| remote != self.local)
    }

    /// Renders the entry: `level` 0 prints the name only, 1 adds abbreviated commit ids and
    /// 2 or more adds full commit ids. Outdated entries are marked with `*`.
    pub fn render(&self, level: u8) -> String {
        let marker = if self.is_outdated() { '*' } else { ' ' };
        let remote = self.remote.as_deref().unwrap_or("-");
        let (local, remote) = match level {
            0 => return format!("{} {}", marker, self.name),
            1 => abbreviate_pair(&self.local, remote),
            _ => (self.local.as_str(), remote),
        };
        format!("{} {} {} {}", marker, self.name, local, remote)
    }
}

/// Abbreviates both ids unless that would make two different ids look equal.
fn abbreviate_pair<'a>(local: &'a str, remote: &'a str) -> (&'a str, &'a str) {
    let (short_local, short_remote) = (abbreviate(local), abbreviate(remote));
    if short_local == short_remote && local != remote {
        (local, remote)
    } else {
        (short_local, short_remote)
    }
}

/// Pairs every local ref with the remote ref of the same kind and name.
pub fn compare_refs(local: &[RevisionInfo], remote: &[RevisionInfo]) -> Vec<RefStatus> {
    let remote: BTreeMap<(RevisionKind, &str), &str> = remote
        .iter()
        .filter_map(|r| Some(((r.kind, r.name.as_deref()?), r.commit_id.as_str())))
        .collect();
    local
        .iter()
        .filter_map(|r| {
            let name = r.name.as_deref()?;
            Some(RefStatus {
                kind: r.kind,
                name: name.to_owned(),
                local: r.commit_id.clone(),
                remote: remote.get(&(r.kind, name)).map(|id| (*id).to_owned()),
            })
        })
        .collect()
}

/// Rendered comparison of the mirror's refs against origin.
pub fn diff_local_and_remote(mirror: &Mirror<'_>, level: u8) -> Result<Vec<String>, StatusError> {
    let local = mirror.local_refs()?;
    let remote = mirror.remote_refs()?;
    Ok(compare_refs(&local, &remote)
        .iter()
        .map(|status| status.render(level))
        .collect())
}
