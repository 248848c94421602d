use serde::Deserialize;

use crate::model::revision::RemoteRef;

use super::{
    http::{encode, ApiAuth, ApiClient},
    Credentials, ProviderContext, ProviderError, RepositoryProvider,
};

const PAGE_SIZE: usize = 100;

pub struct GitlabProvider {
    context: ProviderContext,
    client: ApiClient,
}

#[derive(Deserialize)]
struct GitlabRef {
    name: String,
    commit: GitlabCommit,
}

#[derive(Deserialize)]
struct GitlabCommit {
    id: String,
}

#[derive(Deserialize)]
struct GitlabProject {
    default_branch: Option<String>,
}

impl From<GitlabRef> for RemoteRef {
    fn from(value: GitlabRef) -> Self {
        RemoteRef::new(value.name, value.commit.id)
    }
}

impl GitlabProvider {
    pub fn new(context: ProviderContext) -> Result<Self, ProviderError> {
        // The API only accepts tokens; a configured password is used as a personal token.
        let auth = match &context.credentials {
            Some(Credentials::Token(token)) => ApiAuth::Header {
                name: "PRIVATE-TOKEN",
                value: token.clone(),
            },
            Some(Credentials::UserPassword { password, .. }) => ApiAuth::Header {
                name: "PRIVATE-TOKEN",
                value: password.clone(),
            },
            None => ApiAuth::None,
        };
        Ok(GitlabProvider {
            client: ApiClient::new(auth)?,
            context,
        })
    }

    fn project_api_url(&self) -> String {
        format!(
            "{}/projects/{}",
            self.context.descriptor.endpoint,
            encode(&self.context.project.name())
        )
    }

    fn file_url(&self, path: &str, reference: &str) -> String {
        format!(
            "{}/repository/files/{}/raw?ref={}",
            self.project_api_url(),
            encode(path.trim_start_matches('/')),
            encode(reference)
        )
    }

    fn default_branch(&self) -> Result<Option<String>, ProviderError> {
        let project: Option<GitlabProject> = self.client.get_json(&self.project_api_url())?;
        Ok(project.and_then(|p| p.default_branch))
    }

    fn list_refs(&self, kind: &str) -> Result<Vec<RemoteRef>, ProviderError> {
        let refs: Vec<GitlabRef> = self.client.get_paged(PAGE_SIZE, |page| {
            format!(
                "{}/repository/{}?per_page={}&page={}",
                self.project_api_url(),
                kind,
                PAGE_SIZE,
                page
            )
        })?;
        Ok(refs.into_iter().map(Into::into).collect())
    }
}

impl RepositoryProvider for GitlabProvider {
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
        self.client.get_bytes(&self.file_url(path, &reference), None)
    }
}
