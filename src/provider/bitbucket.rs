use serde::Deserialize;

use crate::model::revision::RemoteRef;

use super::{
    http::{encode, ApiAuth, ApiClient},
    Credentials, ProviderContext, ProviderError, RepositoryProvider,
};

const PAGE_SIZE: usize = 100;

pub struct BitbucketProvider {
    context: ProviderContext,
    client: ApiClient,
}

/// Bitbucket paginates with an opaque `next` link instead of page numbers.
#[derive(Deserialize)]
struct Page<T> {
    values: Vec<T>,
    next: Option<String>,
}

#[derive(Deserialize)]
struct BitbucketRef {
    name: String,
    target: BitbucketTarget,
}

#[derive(Deserialize)]
struct BitbucketTarget {
    hash: String,
}

#[derive(Deserialize)]
struct BitbucketRepository {
    mainbranch: Option<BitbucketBranch>,
}

#[derive(Deserialize)]
struct BitbucketBranch {
    name: String,
}

impl From<BitbucketRef> for RemoteRef {
    fn from(value: BitbucketRef) -> Self {
        RemoteRef::new(value.name, value.target.hash)
    }
}

impl BitbucketProvider {
    pub fn new(context: ProviderContext) -> Result<Self, ProviderError> {
        let auth = match &context.credentials {
            Some(Credentials::Token(token)) => ApiAuth::Header {
                name: "Authorization",
                value: format!("Bearer {token}"),
            },
            Some(Credentials::UserPassword { user, password }) => ApiAuth::Basic {
                user: user.clone(),
                password: password.clone(),
            },
            None => ApiAuth::None,
        };
        Ok(BitbucketProvider {
            client: ApiClient::new(auth)?,
            context,
        })
    }

    fn repo_api_url(&self) -> String {
        format!(
            "{}/repositories/{}",
            self.context.descriptor.endpoint,
            self.context.project.name()
        )
    }

    fn source_url(&self, path: &str, reference: &str) -> String {
        format!(
            "{}/src/{}/{}",
            self.repo_api_url(),
            encode(reference),
            path.trim_start_matches('/')
        )
    }

    fn default_branch(&self) -> Result<Option<String>, ProviderError> {
        let repository: Option<BitbucketRepository> = self.client.get_json(&self.repo_api_url())?;
        Ok(repository.and_then(|r| r.mainbranch).map(|b| b.name))
    }

    fn list_refs(&self, kind: &str) -> Result<Vec<RemoteRef>, ProviderError> {
        let mut result = Vec::new();
        let mut next = Some(format!(
            "{}/refs/{}?pagelen={}",
            self.repo_api_url(),
            kind,
            PAGE_SIZE
        ));
        while let Some(url) = next {
            let page: Page<BitbucketRef> = self
                .client
                .get_json(&url)?
                .ok_or_else(|| ProviderError::RepositoryNotFound(self.repository_url()))?;
            result.extend(page.values.into_iter().map(RemoteRef::from));
            next = page.next;
        }
        Ok(result)
    }
}

impl RepositoryProvider for BitbucketProvider {
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
        let reference = match &self.context.project.revision {
            Some(revision) => revision.clone(),
            None => match self.default_branch()? {
                Some(branch) => branch,
                None => return Ok(None),
            },
        };
        self.client.get_bytes(&self.source_url(path, &reference), None)
    }
}
