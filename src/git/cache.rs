use std::path::{Path, PathBuf};

use git2::{
    cert::Cert, AutotagOption, CertificateCheckStatus, Config, Cred, CredentialType,
    FetchOptions, RemoteCallbacks, Repository,
};
use log::{debug, info, trace};
use ssh_key::{known_hosts::HostPatterns, KnownHosts};
use thiserror::Error;

use crate::{
    flock::FileLock,
    model::{project::ProjectIdentifier, revision::is_commit_id, ParseError},
    provider::{ProviderError, RemoteLocation, RepositoryProvider},
};

use super::{mirror::Mirror, GitAuth};

/// Hidden directory inside each mirror holding the commit-keyed worktrees.
pub const CACHE_SUBDIR: &str = ".pipefetch";
const COMMITS_DIR: &str = "commits";
pub(crate) const PROVIDER_CONFIG_KEY: &str = "pipefetch.provider";
const HEADS_REFSPEC: &str = "+refs/heads/*:refs/heads/*";
const TAGS_REFSPEC: &str = "+refs/tags/*:refs/tags/*";
const GLOBAL_KNOWN_HOSTS: &str = "/etc/ssh/ssh_known_hosts";
const MAX_CREDENTIAL_ATTEMPTS: usize = 3;

/// The shared on-disk cache: one bare mirror per project at `<root>/<org>/<repo>`.
pub struct MirrorCache {
    location: PathBuf,
    git_config: Option<Config>,
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),
    #[error("Cache location {location} is not a directory")]
    BadLocation { location: String },
    #[error("Cache lock cannot be acquired: {0}")]
    Lock(#[from] crate::flock::Error),
    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("Error while parsing manifest: {0}")]
    Manifest(#[from] ParseError),
    #[error(
        "Project {project} was downloaded from provider `{recorded}` but provider `{selected}` \
         was requested; refusing to mix histories from different providers"
    )]
    ProviderMismatch {
        project: String,
        recorded: String,
        selected: String,
    },
    #[error("Cannot find revision `{revision}` in project {project}")]
    RevisionNotFound { project: String, revision: String },
}

impl MirrorCache {
    pub fn new(location: PathBuf, git_config: Option<Config>) -> Result<MirrorCache, CacheError> {
        if location.exists() {
            if !location.is_dir() {
                return Err(CacheError::BadLocation {
                    location: location.to_str().unwrap_or("").to_string(),
                });
            }
        } else {
            std::fs::create_dir_all(&location)?;
        }

        Ok(MirrorCache {
            location,
            git_config,
        })
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    pub fn mirror_path(&self, project: &ProjectIdentifier) -> PathBuf {
        self.location.join(project.to_path())
    }

    pub fn commits_path(&self, project: &ProjectIdentifier) -> PathBuf {
        self.mirror_path(project).join(CACHE_SUBDIR).join(COMMITS_DIR)
    }

    pub fn worktree_path(&self, project: &ProjectIdentifier, commit_id: &str) -> PathBuf {
        self.commits_path(project).join(commit_id)
    }

    pub fn contains(&self, project: &ProjectIdentifier) -> bool {
        is_mirror(&self.mirror_path(project))
    }

    /// Provider name stored in the mirror's git configuration when it was created.
    pub fn recorded_provider(
        &self,
        project: &ProjectIdentifier,
    ) -> Result<Option<String>, CacheError> {
        if !self.contains(project) {
            return Ok(None);
        }
        let repo = Repository::open_bare(self.mirror_path(project))?;
        recorded_provider(&repo)
    }

    pub fn origin_url(&self, project: &ProjectIdentifier) -> Result<Option<String>, CacheError> {
        if !self.contains(project) {
            return Ok(None);
        }
        let repo = Repository::open_bare(self.mirror_path(project))?;
        let url = match repo.find_remote("origin") {
            Ok(remote) => remote.url().map(str::to_owned),
            Err(_) => None,
        };
        Ok(url)
    }

    /// Opens the existing mirror of the provider's project, if there is one.
    ///
    /// Fails with [`CacheError::ProviderMismatch`] when the mirror was created from a
    /// different provider than the one given. A mirror without a recorded provider is
    /// matched by the host of its origin, and adopted by the provider when they agree.
    pub fn open(
        &self,
        provider: &dyn RepositoryProvider,
    ) -> Result<Option<Mirror<'_>>, CacheError> {
        let project = provider.project();
        let path = self.mirror_path(project);
        if !is_mirror(&path) {
            return Ok(None);
        }
        trace!("Opening existing mirror at {}", path.display());

        let repo = Repository::open_bare(&path)?;
        let url = provider.clone_url();

        match recorded_provider(&repo)? {
            Some(recorded) if recorded != provider.name() => {
                return Err(CacheError::ProviderMismatch {
                    project: project.name(),
                    recorded,
                    selected: provider.name().to_owned(),
                });
            }
            Some(_) => {}
            None => {
                let origin = match repo.find_remote("origin") {
                    Ok(remote) => remote.url().map(str::to_owned),
                    Err(_) => None,
                };
                if let Some(origin) = origin {
                    if origin_host(&origin) != origin_host(&url) {
                        return Err(CacheError::ProviderMismatch {
                            project: project.name(),
                            recorded: origin,
                            selected: provider.name().to_owned(),
                        });
                    }
                }
                debug!("Recording provider {} for {}", provider.name(), project);
                repo.config()?.set_str(PROVIDER_CONFIG_KEY, provider.name())?;
            }
        }

        {
            let remote = repo.find_remote("origin")?;
            if remote.url() != Some(url.as_str()) {
                trace!(
                    "Updating remote existing url {:?} to new url {}",
                    remote.url(),
                    url
                );
                repo.remote_set_url("origin", &url)?;
            }
        }

        Ok(Some(Mirror::new(
            self,
            project.clone(),
            path,
            repo,
            GitAuth::from_provider(provider),
        )))
    }

    /// Opens the project's mirror, creating it from the remote when absent.
    ///
    /// Before cloning, `main_script` must exist remotely. A mirror whose first fetch fails
    /// is removed again so that no half-initialized mirror is left behind.
    pub fn ensure(
        &self,
        provider: &dyn RepositoryProvider,
        main_script: &str,
    ) -> Result<Mirror<'_>, CacheError> {
        if let Some(mirror) = self.open(provider)? {
            return Ok(mirror);
        }

        let project = provider.project();
        let _lock = self.lock_project(project)?;
        // Another process may have created it while we were waiting for the lock
        if let Some(mirror) = self.open(provider)? {
            return Ok(mirror);
        }

        provider.validate_exists(main_script)?;

        let path = self.mirror_path(project);
        let url = provider.clone_url();
        info!("Creating mirror of {} from {} at {}", project, url, path.display());

        let repo = Repository::init_bare(&path)?;
        repo.remote_with_fetch("origin", &url, HEADS_REFSPEC)?;
        repo.remote_add_fetch("origin", TAGS_REFSPEC)?;
        repo.config()?.set_str(PROVIDER_CONFIG_KEY, provider.name())?;

        let mirror = Mirror::new(
            self,
            project.clone(),
            path.clone(),
            repo,
            GitAuth::from_provider(provider),
        );
        if let Err(error) = mirror.fetch() {
            drop(mirror);
            debug!("Removing incomplete mirror {}", path.display());
            std::fs::remove_dir_all(&path)?;
            return Err(error);
        }
        Ok(mirror)
    }

    /// Names (`org/repo`) of all projects with a local mirror.
    pub fn list_projects(&self) -> Result<Vec<String>, CacheError> {
        let mut result = Vec::new();
        for organization in visible_dirs(&self.location)? {
            for repository in visible_dirs(&organization)? {
                if is_mirror(&repository) {
                    result.push(format!(
                        "{}/{}",
                        file_name(&organization),
                        file_name(&repository)
                    ));
                }
            }
        }
        result.sort();
        Ok(result)
    }

    /// Commit ids that have a materialized worktree for `project`.
    pub fn list_commits(&self, project: &ProjectIdentifier) -> Result<Vec<String>, CacheError> {
        let commits_path = self.commits_path(project);
        if !commits_path.is_dir() {
            return Ok(Vec::new());
        }
        let mut result: Vec<String> = visible_dirs(&commits_path)?
            .iter()
            .map(|p| file_name(p))
            .filter(|name| is_commit_id(name))
            .collect();
        result.sort();
        Ok(result)
    }

    fn lock_project(&self, project: &ProjectIdentifier) -> Result<FileLock, CacheError> {
        let organization_path = self.location.join(&project.organization);
        std::fs::create_dir_all(&organization_path)?;
        let location = organization_path.join(format!(".{}.lock", project.repository));
        debug!("Acquiring a lock on {}", location.display());
        Ok(FileLock::acquire(&location)?)
    }

    pub(crate) fn remote_callbacks(&self, auth: Option<GitAuth>) -> RemoteCallbacks<'_> {
        let mut callbacks = RemoteCallbacks::new();
        let mut attempts = 0;
        callbacks.credentials(move |url, username, allowed_types| {
            trace!(
                "Requested credentials for {}, username {:?}, allowed types {:?}",
                url,
                username,
                allowed_types
            );
            attempts += 1;
            if attempts > MAX_CREDENTIAL_ATTEMPTS {
                return Err(git2::Error::from_str("authentication failed"));
            }
            // Asking for ssh username
            if allowed_types.contains(CredentialType::USERNAME) {
                return Cred::username(username.unwrap_or("git"));
            }
            // SSH auth
            if allowed_types.contains(CredentialType::SSH_KEY) {
                return Cred::ssh_key_from_agent(username.unwrap_or("git"));
            }
            // HTTP auth
            if allowed_types.contains(CredentialType::USER_PASS_PLAINTEXT) {
                if let Some(auth) = &auth {
                    return Cred::userpass_plaintext(&auth.user, &auth.password);
                }
                if let Some(config) = &self.git_config {
                    return Cred::credential_helper(config, url, username);
                }
            }
            Err(git2::Error::from_str("no valid authentication available"))
        });

        callbacks.certificate_check(|certificate, host| self.check_certificate(certificate, host));
        callbacks
    }

    pub(crate) fn fetch_options(&self, auth: Option<GitAuth>) -> FetchOptions<'_> {
        let mut fetch_options = FetchOptions::new();
        fetch_options
            .remote_callbacks(self.remote_callbacks(auth))
            .download_tags(AutotagOption::All);
        fetch_options
    }

    fn check_certificate(
        &self,
        certificate: &Cert<'_>,
        host: &str,
    ) -> Result<CertificateCheckStatus, git2::Error> {
        if let Some(hostkey) = certificate.as_hostkey().and_then(|h| h.hostkey()) {
            trace!("Loading {}", GLOBAL_KNOWN_HOSTS);
            match KnownHosts::read_file(GLOBAL_KNOWN_HOSTS) {
                Ok(entries) => {
                    let matched = entries.iter().any(|entry| {
                        host_matches_patterns(host, entry.host_patterns())
                            && entry.public_key().to_bytes().as_deref() == Ok(hostkey)
                    });
                    if matched {
                        trace!("Known host entry matches the host key of {}", host);
                        return Ok(CertificateCheckStatus::CertificateOk);
                    }
                    trace!("No known host entry matched the host key of {}", host);
                }
                Err(error) => trace!("Could not load {}: {}", GLOBAL_KNOWN_HOSTS, error),
            }
        }
        Ok(CertificateCheckStatus::CertificatePassthrough)
    }
}

pub(crate) fn recorded_provider(repo: &Repository) -> Result<Option<String>, CacheError> {
    match repo.config()?.get_string(PROVIDER_CONFIG_KEY) {
        Ok(name) => Ok(Some(name)),
        Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Host an origin URL points to, without port; `file` for local repositories.
fn origin_host(url: &str) -> Option<String> {
    match RemoteLocation::parse(url) {
        Some(RemoteLocation::Http { host, .. }) => {
            let host = host.split(':').next().unwrap_or(&host);
            Some(host.to_ascii_lowercase())
        }
        Some(RemoteLocation::File(_)) => Some("file".to_owned()),
        None if Path::new(url).is_absolute() => Some("file".to_owned()),
        None => None,
    }
}

fn is_mirror(path: &Path) -> bool {
    path.join("HEAD").is_file() && path.join("objects").is_dir()
}

fn visible_dirs(path: &Path) -> Result<Vec<PathBuf>, CacheError> {
    if !path.is_dir() {
        return Ok(Vec::new());
    }
    let mut result = Vec::new();
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() && !entry.file_name().to_string_lossy().starts_with('.') {
            result.push(entry.path());
        }
    }
    Ok(result)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn host_matches_patterns(host: &str, patterns: &HostPatterns) -> bool {
    match patterns {
        HostPatterns::Patterns(patterns) => {
            let mut match_found = false;
            for pattern in patterns {
                let pattern = pattern.to_lowercase();
                // * and ? wildcards are not yet supported
                if let Some(pattern) = pattern.strip_prefix('!') {
                    if pattern == host {
                        return false;
                    }
                } else {
                    match_found |= pattern == host;
                }
            }
            match_found
        }
        // Not yet supported
        HostPatterns::HashedName { .. } => false,
    }
}
