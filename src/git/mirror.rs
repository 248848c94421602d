use std::{
    cell::Cell,
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use git2::{Direction, ErrorCode, ObjectType, Oid, Remote, Repository};
use log::{debug, info, trace, warn};

use crate::model::{
    manifest::{Manifest, MANIFEST_FILE_NAME},
    project::ProjectIdentifier,
    revision::{RevisionInfo, RevisionKind},
};

use super::{
    cache::{recorded_provider, CacheError, MirrorCache},
    GitAuth,
};

/// An open bare mirror of one project.
pub struct Mirror<'a> {
    cache: &'a MirrorCache,
    project: ProjectIdentifier,
    path: PathBuf,
    repo: Repository,
    auth: Option<GitAuth>,
    fetches: Cell<usize>,
}

impl<'a> Mirror<'a> {
    pub(crate) fn new(
        cache: &'a MirrorCache,
        project: ProjectIdentifier,
        path: PathBuf,
        repo: Repository,
        auth: Option<GitAuth>,
    ) -> Self {
        Mirror {
            cache,
            project,
            path,
            repo,
            auth,
            fetches: Cell::new(0),
        }
    }

    pub fn project(&self) -> &ProjectIdentifier {
        &self.project
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn auth(&self) -> Option<GitAuth> {
        self.auth.clone()
    }

    /// Number of fetches performed through this handle.
    pub fn fetch_count(&self) -> usize {
        self.fetches.get()
    }

    pub fn recorded_provider(&self) -> Result<Option<String>, CacheError> {
        recorded_provider(&self.repo)
    }

    /// Fetches all branches and tags from origin and points `HEAD` at the remote default
    /// branch.
    pub fn fetch(&self) -> Result<(), CacheError> {
        let mut remote = self.repo.find_remote("origin")?;
        info!("Fetching {} from {}", self.project, remote.url().unwrap_or(""));
        let mut fetch_options = self.cache.fetch_options(self.auth.clone());
        let refspecs: Vec<String> = remote
            .fetch_refspecs()?
            .iter()
            .flatten()
            .map(str::to_owned)
            .collect();
        remote.fetch(&refspecs, Some(&mut fetch_options), None)?;
        self.fetches.set(self.fetches.get() + 1);
        self.update_head(&remote)?;
        Ok(())
    }

    fn update_head(&self, remote: &Remote) -> Result<(), CacheError> {
        let default_branch = match remote.default_branch() {
            Ok(name) => name.as_str().map(str::to_owned),
            Err(error) => {
                debug!("Remote default branch of {} unknown: {}", self.project, error);
                None
            }
        };
        let target = match default_branch {
            Some(name) if self.repo.find_reference(&name).is_ok() => Some(name),
            _ if self.repo.head().is_ok() => None,
            _ => self.fallback_branch()?,
        };
        if let Some(target) = target {
            trace!("Setting HEAD of {} to {}", self.project, target);
            self.repo.set_head(&target)?;
        }
        Ok(())
    }

    fn fallback_branch(&self) -> Result<Option<String>, CacheError> {
        for name in ["refs/heads/master", "refs/heads/main"] {
            if self.repo.find_reference(name).is_ok() {
                return Ok(Some(name.to_owned()));
            }
        }
        let mut names = Vec::new();
        for reference in self.repo.references_glob("refs/heads/*")? {
            if let Some(name) = reference?.name() {
                names.push(name.to_owned());
            }
        }
        names.sort();
        Ok(names.into_iter().next())
    }

    /// Resolves `revision` to a commit id. Without a revision, the `default_branch` of the
    /// manifest at `HEAD` is used, else `HEAD` itself.
    ///
    /// When the revision is unknown locally the mirror is fetched exactly once and the
    /// lookup retried; a second miss is [`CacheError::RevisionNotFound`].
    pub fn resolve_commit(&self, revision: Option<&str>) -> Result<String, CacheError> {
        let default_branch;
        let revision = match revision {
            Some(revision) => Some(revision),
            None => {
                default_branch = self.manifest_default_branch()?;
                default_branch.as_deref()
            }
        };
        match self.find_commit(revision) {
            Ok(oid) => return Ok(oid.to_string()),
            Err(error) => debug!(
                "Revision {} of {} not found locally ({}), fetching",
                revision.unwrap_or("HEAD"),
                self.project,
                error.message()
            ),
        }
        self.fetch()?;
        self.find_commit(revision)
            .map(|oid| oid.to_string())
            .map_err(|_| CacheError::RevisionNotFound {
                project: self.project.name(),
                revision: revision.unwrap_or("HEAD").to_owned(),
            })
    }

    fn manifest_default_branch(&self) -> Result<Option<String>, CacheError> {
        let Ok(head) = self.find_commit(None) else {
            return Ok(None);
        };
        let default_branch = self.read_manifest(&head.to_string())?.default_branch;
        if let Some(branch) = &default_branch {
            trace!("Default branch of {} is {}", self.project, branch);
        }
        Ok(default_branch)
    }

    fn find_commit(&self, revision: Option<&str>) -> Result<Oid, git2::Error> {
        let spec = revision.unwrap_or("HEAD");
        Ok(self.repo.revparse_single(spec)?.peel_to_commit()?.id())
    }

    /// Reads the project manifest at `commit_id`, defaulting when the file is absent.
    pub fn read_manifest(&self, commit_id: &str) -> Result<Manifest, CacheError> {
        let spec = format!("{commit_id}:{MANIFEST_FILE_NAME}");
        match self.repo.revparse_single(&spec) {
            Ok(object) => match object.kind() {
                Some(ObjectType::Blob) => {
                    let blob = object.peel_to_blob()?;
                    let content = std::str::from_utf8(blob.content())
                        .map_err(crate::model::ParseError::from)?;
                    Ok(Manifest::from_toml_str(content)?)
                }
                kind => {
                    warn!(
                        "{} at {} is a {:?}, not a file; using defaults",
                        MANIFEST_FILE_NAME, commit_id, kind
                    );
                    Ok(Manifest::default())
                }
            },
            Err(e) if e.code() == ErrorCode::NotFound => {
                debug!(
                    "Couldn't find {} in {} at {}, using defaults",
                    MANIFEST_FILE_NAME, self.project, commit_id
                );
                Ok(Manifest::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Branches and tags known to the mirror, sorted by kind and name.
    pub fn local_refs(&self) -> Result<Vec<RevisionInfo>, CacheError> {
        let mut result = Vec::new();
        for reference in self.repo.references()? {
            let reference = reference?;
            let Some(name) = reference.name() else {
                continue;
            };
            let info = if let Some(branch) = name.strip_prefix("refs/heads/") {
                RevisionInfo::branch(reference.peel_to_commit()?.id().to_string(), branch)
            } else if let Some(tag) = name.strip_prefix("refs/tags/") {
                RevisionInfo::tag(reference.peel_to_commit()?.id().to_string(), tag)
            } else {
                continue;
            };
            result.push(info);
        }
        result.sort_by(|a, b| (a.kind, &a.name).cmp(&(b.kind, &b.name)));
        Ok(result)
    }

    /// Branches and tags as currently advertised by origin, without fetching objects.
    ///
    /// Annotated tags are reported with the commit they point to.
    pub fn remote_refs(&self) -> Result<Vec<RevisionInfo>, CacheError> {
        let mut remote = self.repo.find_remote("origin")?;
        let callbacks = self.cache.remote_callbacks(self.auth.clone());
        let connection = remote.connect_auth(Direction::Fetch, Some(callbacks), None)?;

        let mut refs: BTreeMap<(RevisionKind, String), String> = BTreeMap::new();
        for head in connection.list()? {
            let name = head.name();
            let (kind, short, peeled) = if let Some(tag) = name.strip_prefix("refs/tags/") {
                match tag.strip_suffix("^{}") {
                    Some(tag) => (RevisionKind::Tag, tag, true),
                    None => (RevisionKind::Tag, tag, false),
                }
            } else if let Some(branch) = name.strip_prefix("refs/heads/") {
                (RevisionKind::Branch, branch, false)
            } else {
                continue;
            };
            let key = (kind, short.to_owned());
            if peeled || !refs.contains_key(&key) {
                refs.insert(key, head.oid().to_string());
            }
        }

        Ok(refs
            .into_iter()
            .map(|((kind, name), commit_id)| match kind {
                RevisionKind::Tag => RevisionInfo::tag(commit_id, name),
                _ => RevisionInfo::branch(commit_id, name),
            })
            .collect())
    }
}
