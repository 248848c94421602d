use std::time::Duration;

use log::{debug, trace};
use reqwest::{
    blocking::{Client, RequestBuilder, Response},
    header::{ACCEPT, USER_AGENT},
    StatusCode,
};
use serde::de::DeserializeOwned;

use super::ProviderError;

/// How requests to a provider API authenticate.
#[derive(Clone)]
pub enum ApiAuth {
    None,
    Basic { user: String, password: String },
    Header { name: &'static str, value: String },
}

/// Blocking REST client shared by the hosting provider implementations.
///
/// Requests have no timeout; callers needing one wrap the whole operation.
pub struct ApiClient {
    client: Client,
    auth: ApiAuth,
}

impl ApiClient {
    pub fn new(auth: ApiAuth) -> Result<ApiClient, ProviderError> {
        let client = Client::builder().timeout(None::<Duration>).build()?;
        Ok(ApiClient { client, auth })
    }

    /// Raw body of `url`, `None` on 404.
    pub fn get_bytes(
        &self,
        url: &str,
        accept: Option<&str>,
    ) -> Result<Option<Vec<u8>>, ProviderError> {
        match self.send(url, accept)? {
            Some(response) => Ok(Some(response.bytes()?.to_vec())),
            None => Ok(None),
        }
    }

    /// JSON body of `url`, `None` on 404.
    pub fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<Option<T>, ProviderError> {
        match self.send(url, Some("application/json"))? {
            Some(response) => {
                let body = response.text()?;
                Ok(Some(serde_json::from_str(&body)?))
            }
            None => Ok(None),
        }
    }

    /// Follows numbered pages until one comes back shorter than `page_size`.
    pub fn get_paged<T, F>(&self, page_size: usize, page_url: F) -> Result<Vec<T>, ProviderError>
    where
        T: DeserializeOwned,
        F: Fn(usize) -> String,
    {
        let mut result = Vec::new();
        for page in 1.. {
            let url = page_url(page);
            let items: Vec<T> = self.get_json(&url)?.ok_or_else(|| ProviderError::Status {
                url: url.clone(),
                status: StatusCode::NOT_FOUND.as_u16(),
            })?;
            let len = items.len();
            result.extend(items);
            if len < page_size {
                break;
            }
        }
        Ok(result)
    }

    fn send(&self, url: &str, accept: Option<&str>) -> Result<Option<Response>, ProviderError> {
        debug!("Requesting {}", url);
        let mut request = self.authorize(
            self.client
                .get(url)
                .header(USER_AGENT, concat!("pipefetch/", env!("CARGO_PKG_VERSION"))),
        );
        if let Some(accept) = accept {
            request = request.header(ACCEPT, accept);
        }
        let response = request.send()?;
        trace!("{} responded with {}", url, response.status());
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response)),
            status => Err(ProviderError::Status {
                url: url.to_owned(),
                status: status.as_u16(),
            }),
        }
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            ApiAuth::None => request,
            ApiAuth::Basic { user, password } => request.basic_auth(user, Some(password)),
            ApiAuth::Header { name, value } => request.header(*name, value.as_str()),
        }
    }
}

/// Percent-encodes a single path component or query value.
pub fn encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}
