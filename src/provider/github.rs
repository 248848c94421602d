use serde::Deserialize;

use crate::model::revision::RemoteRef;

use super::{
    http::{encode, ApiAuth, ApiClient},
    Credentials, ProviderContext, ProviderError, RepositoryProvider,
};

const PAGE_SIZE: usize = 100;

pub struct GithubProvider {
    context: ProviderContext,
    client: ApiClient,
}

#[derive(Deserialize)]
struct GithubRef {
    name: String,
    commit: GithubCommit,
}

#[derive(Deserialize)]
struct GithubCommit {
    sha: String,
}

impl From<GithubRef> for RemoteRef {
    fn from(value: GithubRef) -> Self {
        RemoteRef::new(value.name, value.commit.sha)
    }
}

impl GithubProvider {
    pub fn new(context: ProviderContext) -> Result<Self, ProviderError> {
        let auth = match &context.credentials {
            Some(Credentials::Token(token)) => ApiAuth::Header {
                name: "Authorization",
                value: format!("token {token}"),
            },
            Some(Credentials::UserPassword { user, password }) => ApiAuth::Basic {
                user: user.clone(),
                password: password.clone(),
            },
            None => ApiAuth::None,
        };
        Ok(GithubProvider {
            client: ApiClient::new(auth)?,
            context,
        })
    }

    fn repo_api_url(&self) -> String {
        format!(
            "{}/repos/{}",
            self.context.descriptor.endpoint,
            self.context.project.name()
        )
    }

    fn content_url(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        match &self.context.project.revision {
            Some(revision) => format!(
                "{}/contents/{}?ref={}",
                self.repo_api_url(),
                path,
                encode(revision)
            ),
            None => format!("{}/contents/{}", self.repo_api_url(), path),
        }
    }

    fn list_refs(&self, kind: &str) -> Result<Vec<RemoteRef>, ProviderError> {
        let refs: Vec<GithubRef> = self.client.get_paged(PAGE_SIZE, |page| {
            format!(
                "{}/{}?per_page={}&page={}",
                self.repo_api_url(),
                kind,
                PAGE_SIZE,
                page
            )
        })?;
        Ok(refs.into_iter().map(Into::into).collect())
    }
}

impl RepositoryProvider for GithubProvider {
    fn context(&self) -> &ProviderContext {
        &self.context
    }

    fn list_branches(&self) -> Result<Vec<RemoteRef>, ProviderError> {
        self.list_refs("branches")
    }

    fn list_tags(&self) -> Result<Vec<RemoteRef>, ProviderError> {
        self.list_refs("tags")
    }

    fn read_bytes(&self, path: &str) -> Result<Option<Vec<u8>>, ProviderError> {
        self.client
            .get_bytes(&self.content_url(path), Some("application/vnd.github.raw"))
    }
}
