//! Hosting provider abstraction.
//!
//! Every hosting backend implements [`RepositoryProvider`]; callers never branch on the
//! platform. New backends are added by implementing the trait and extending
//! [`build_provider`].

pub mod bitbucket;
pub mod gitea;
pub mod github;
pub mod gitlab;
pub mod http;
pub mod local;
pub mod registry;

use std::fmt::Debug;

use thiserror::Error;

use crate::model::{
    project::ProjectIdentifier,
    revision::{RemoteRef, RevisionInfo, RevisionKind},
};

pub use registry::{
    CredentialOverrides, CredentialSource, Platform, ProviderDescriptor, ProviderRegistry,
    ProviderSettings, RemoteLocation,
};

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Unknown hosting provider `{name}`{}", did_you_mean(.suggestions))]
    UnknownProvider {
        name: String,
        suggestions: Vec<String>,
    },
    #[error("Unknown provider platform `{0}`")]
    UnknownPlatform(String),
    #[error("Provider `{0}` has no server configured")]
    MissingServer(String),
    #[error(
        "Provider `{name}` points to {server}; only Bitbucket Cloud is supported unless an \
         `endpoint` speaking its 2.0 API is configured"
    )]
    UnsupportedServer { name: String, server: String },
    #[error("Cannot find `{path}` in repository {repository}")]
    MissingRemoteArtifact { repository: String, path: String },
    #[error("Repository {0} does not exist")]
    RepositoryNotFound(String),
    #[error("Remote API request to {url} failed with status {status}")]
    Status { url: String, status: u16 },
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Error while decoding remote response: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),
    #[error("Error while decoding utf8 bytes: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

fn did_you_mean(suggestions: &[String]) -> String {
    if suggestions.is_empty() {
        String::new()
    } else {
        format!(" -- did you mean: {}?", suggestions.join(", "))
    }
}

/// Resolved credentials of a provider.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    UserPassword { user: String, password: String },
    Token(String),
}

impl Credentials {
    /// User name and password to present to git over HTTPS.
    pub fn git_user_password(&self, platform: Platform) -> (String, String) {
        match self {
            Credentials::UserPassword { user, password } => (user.clone(), password.clone()),
            Credentials::Token(token) => {
                let user = match platform {
                    Platform::Github => "x-access-token",
                    Platform::Gitlab => "oauth2",
                    Platform::Bitbucket => "x-token-auth",
                    Platform::Gitea | Platform::File => "token",
                };
                (user.to_owned(), token.clone())
            }
        }
    }
}

impl Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::UserPassword { user, .. } => f
                .debug_struct("UserPassword")
                .field("user", user)
                .field("password", &"***")
                .finish(),
            Credentials::Token(_) => f.debug_tuple("Token").field(&"***").finish(),
        }
    }
}

/// What every provider implementation knows about the project it serves.
#[derive(Debug, Clone)]
pub struct ProviderContext {
    pub descriptor: ProviderDescriptor,
    pub project: ProjectIdentifier,
    pub credentials: Option<Credentials>,
}

impl ProviderContext {
    fn server_url(&self) -> String {
        format!("{}/{}", self.descriptor.server, self.project.name())
    }
}

/// One hosting provider bound to one project.
///
/// Remote reads use the project's revision when it has one, the repository default
/// branch otherwise.
pub trait RepositoryProvider {
    fn context(&self) -> &ProviderContext;

    fn name(&self) -> &str {
        &self.context().descriptor.name
    }

    fn platform(&self) -> Platform {
        self.context().descriptor.platform
    }

    fn project(&self) -> &ProjectIdentifier {
        &self.context().project
    }

    /// URL git clones and fetches from.
    fn clone_url(&self) -> String {
        format!("{}.git", self.context().server_url())
    }

    /// Web URL of the repository.
    fn repository_url(&self) -> String {
        self.context().server_url()
    }

    fn credentials(&self) -> Option<&Credentials> {
        self.context().credentials.as_ref()
    }

    fn has_credentials(&self) -> bool {
        self.credentials().is_some()
    }

    fn list_branches(&self) -> Result<Vec<RemoteRef>, ProviderError>;

    fn list_tags(&self) -> Result<Vec<RemoteRef>, ProviderError>;

    /// Content of `path`, or `None` when the file does not exist remotely.
    fn read_bytes(&self, path: &str) -> Result<Option<Vec<u8>>, ProviderError>;

    fn read_text(&self, path: &str) -> Result<Option<String>, ProviderError> {
        self.read_bytes(path)?
            .map(String::from_utf8)
            .transpose()
            .map_err(Into::into)
    }

    /// Fails with [`ProviderError::MissingRemoteArtifact`] when `path` is absent remotely.
    fn validate_exists(&self, path: &str) -> Result<(), ProviderError> {
        match self.read_bytes(path)? {
            Some(_) => Ok(()),
            None => Err(ProviderError::MissingRemoteArtifact {
                repository: self.repository_url(),
                path: path.to_owned(),
            }),
        }
    }

    /// The remote ref with the same kind and name as `revision`, if any.
    fn find_remote_ref(&self, revision: &RevisionInfo) -> Result<Option<RemoteRef>, ProviderError> {
        let Some(name) = revision.name.as_deref() else {
            return Ok(None);
        };
        let refs = match revision.kind {
            RevisionKind::Tag => self.list_tags()?,
            RevisionKind::Branch => self.list_branches()?,
            RevisionKind::Commit => return Ok(None),
        };
        Ok(refs.into_iter().find(|r| r.name == name))
    }
}

/// Builds the provider implementation matching the descriptor's platform.
pub fn build_provider(
    descriptor: &ProviderDescriptor,
    project: ProjectIdentifier,
    overrides: &CredentialOverrides,
) -> Result<Box<dyn RepositoryProvider>, ProviderError> {
    let credentials = descriptor
        .credentials
        .resolve(overrides, |key| std::env::var(key).ok());
    let context = ProviderContext {
        descriptor: descriptor.clone(),
        project,
        credentials,
    };
    let provider: Box<dyn RepositoryProvider> = match descriptor.platform {
        Platform::Github => Box::new(github::GithubProvider::new(context)?),
        Platform::Gitlab => Box::new(gitlab::GitlabProvider::new(context)?),
        Platform::Bitbucket => Box::new(bitbucket::BitbucketProvider::new(context)?),
        Platform::Gitea => Box::new(gitea::GiteaProvider::new(context)?),
        Platform::File => Box::new(local::LocalProvider::new(context)),
    };
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn unknown_provider_message() {
        let error = ProviderError::UnknownProvider {
            name: "gitlub".to_owned(),
            suggestions: vec!["github".to_owned(), "gitlab".to_owned()],
        };
        assert_eq!(
            error.to_string(),
            "Unknown hosting provider `gitlub` -- did you mean: github, gitlab?"
        );
    }

    #[test]
    fn token_git_credentials() {
        let token = Credentials::Token("abc".to_owned());
        assert_eq!(
            token.git_user_password(Platform::Gitlab),
            ("oauth2".to_owned(), "abc".to_owned())
        );
        assert_eq!(format!("{token:?}"), "Token(\"***\")");
    }

    #[test]
    fn github_urls() {
        let descriptor = ProviderRegistry::default().get("github").unwrap().clone();
        let project = ProjectIdentifier::new("nextflow-io", "hello").unwrap();
        let provider =
            build_provider(&descriptor, project, &CredentialOverrides::default()).unwrap();
        assert_eq!(provider.name(), "github");
        assert_eq!(provider.clone_url(), "https://github.com/nextflow-io/hello.git");
        assert_eq!(provider.repository_url(), "https://github.com/nextflow-io/hello");
    }
}
