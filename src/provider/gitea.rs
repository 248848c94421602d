use serde::Deserialize;

use crate::model::revision::RemoteRef;

use super::{
    http::{encode, ApiAuth, ApiClient},
    Credentials, ProviderContext, ProviderError, RepositoryProvider,
};

const PAGE_SIZE: usize = 50;

pub struct GiteaProvider {
    context: ProviderContext,
    client: ApiClient,
}

#[derive(Deserialize)]
struct GiteaBranch {
    name: String,
    commit: GiteaBranchCommit,
}

#[derive(Deserialize)]
struct GiteaBranchCommit {
    id: String,
}

#[derive(Deserialize)]
struct GiteaTag {
    name: String,
    commit: GiteaTagCommit,
}

#[derive(Deserialize)]
struct GiteaTagCommit {
    sha: String,
}

impl GiteaProvider {
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
        Ok(GiteaProvider {
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

    fn raw_url(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        match &self.context.project.revision {
            Some(revision) => format!(
                "{}/raw/{}?ref={}",
                self.repo_api_url(),
                path,
                encode(revision)
            ),
            None => format!("{}/raw/{}", self.repo_api_url(), path),
        }
    }

    fn page_url(&self, kind: &str, page: usize) -> String {
        format!(
            "{}/{}?limit={}&page={}",
            self.repo_api_url(),
            kind,
            PAGE_SIZE,
            page
        )
    }
}

impl RepositoryProvider for GiteaProvider {
    fn context(&self) -> &ProviderContext {
        &self.context
    }

    fn list_branches(&self) -> Result<Vec<RemoteRef>, ProviderError> {
        let branches: Vec<GiteaBranch> = self
            .client
            .get_paged(PAGE_SIZE, |page| self.page_url("branches", page))?;
        Ok(branches
            .into_iter()
            .map(|b| RemoteRef::new(b.name, b.commit.id))
            .collect())
    }

    fn list_tags(&self) -> Result<Vec<RemoteRef>, ProviderError> {
        let tags: Vec<GiteaTag> = self
            .client
            .get_paged(PAGE_SIZE, |page| self.page_url("tags", page))?;
        Ok(tags
            .into_iter()
            .map(|t| RemoteRef::new(t.name, t.commit.sha))
            .collect())
    }

    fn read_bytes(&self, path: &str) -> Result<Option<Vec<u8>>, ProviderError> {
        self.client.get_bytes(&self.raw_url(path), None)
    }
}
