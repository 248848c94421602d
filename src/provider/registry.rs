use std::{
    collections::BTreeMap,
    fmt::Display,
    path::{Path, PathBuf},
    str::FromStr,
};

use log::debug;
use serde::Deserialize;
use url::Url;

use super::{Credentials, ProviderError};

pub const DEFAULT_PROVIDER: &str = "github";
const BITBUCKET_CLOUD: &str = "https://bitbucket.org";
const BITBUCKET_CLOUD_API: &str = "https://api.bitbucket.org/2.0";

/// The hosting software behind a provider, which decides the API dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Github,
    Gitlab,
    Bitbucket,
    Gitea,
    File,
}

impl FromStr for Platform {
    type Err = ProviderError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "github" => Ok(Platform::Github),
            "gitlab" => Ok(Platform::Gitlab),
            "bitbucket" => Ok(Platform::Bitbucket),
            "gitea" => Ok(Platform::Gitea),
            "file" => Ok(Platform::File),
            other => Err(ProviderError::UnknownPlatform(other.to_owned())),
        }
    }
}

impl Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Platform::Github => f.write_str("github"),
            Platform::Gitlab => f.write_str("gitlab"),
            Platform::Bitbucket => f.write_str("bitbucket"),
            Platform::Gitea => f.write_str("gitea"),
            Platform::File => f.write_str("file"),
        }
    }
}

/// Where the credentials of a provider come from. Literal values win over environment variables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CredentialSource {
    pub user: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,
    pub user_env: Option<String>,
    pub password_env: Option<String>,
    pub token_env: Option<String>,
}

/// Credentials given on the command line, overriding any configured ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialOverrides {
    pub user: Option<String>,
    pub password: Option<String>,
}

impl CredentialSource {
    pub fn resolve<F>(&self, overrides: &CredentialOverrides, env: F) -> Option<Credentials>
    where
        F: Fn(&str) -> Option<String>,
    {
        let from_env = |key: &Option<String>| key.as_deref().and_then(&env);
        let user = overrides
            .user
            .clone()
            .or_else(|| self.user.clone())
            .or_else(|| from_env(&self.user_env));
        let password = overrides
            .password
            .clone()
            .or_else(|| self.password.clone())
            .or_else(|| from_env(&self.password_env));
        match (user, password) {
            (Some(user), Some(password)) => Some(Credentials::UserPassword { user, password }),
            _ => self
                .token
                .clone()
                .or_else(|| from_env(&self.token_env))
                .filter(|token| !token.is_empty())
                .map(Credentials::Token),
        }
    }
}

/// Settings of one provider as found in the providers configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ProviderSettings {
    pub platform: Option<Platform>,
    pub server: Option<String>,
    pub endpoint: Option<String>,
    #[serde(flatten)]
    pub credentials: CredentialSource,
}

/// A configured hosting provider. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderDescriptor {
    pub name: String,
    pub platform: Platform,
    /// Base URL of the web server, or a filesystem path for the `file` platform.
    pub server: String,
    /// Base URL of the REST API.
    pub endpoint: String,
    pub credentials: CredentialSource,
}

impl ProviderDescriptor {
    pub fn new(name: impl Into<String>, platform: Platform, server: impl Into<String>) -> Self {
        let server = server.into().trim_end_matches('/').to_owned();
        let endpoint = default_endpoint(platform, &server);
        ProviderDescriptor {
            name: name.into(),
            platform,
            server,
            endpoint,
            credentials: CredentialSource::default(),
        }
    }

    /// An ad-hoc provider serving repositories found under `root` on the local filesystem.
    pub fn local(root: &Path) -> Self {
        let server = root.to_string_lossy().to_string();
        ProviderDescriptor::new(format!("file:{server}"), Platform::File, server)
    }

    fn from_settings(name: &str, settings: &ProviderSettings) -> Result<Self, ProviderError> {
        let platform = match settings.platform {
            Some(platform) => platform,
            None => Platform::from_str(name)?,
        };
        let server = match (&settings.server, default_server(platform)) {
            (Some(server), _) => server.clone(),
            (None, Some(server)) => server.to_owned(),
            (None, None) => return Err(ProviderError::MissingServer(name.to_owned())),
        };
        if platform == Platform::Bitbucket
            && settings.endpoint.is_none()
            && server.trim_end_matches('/') != BITBUCKET_CLOUD
        {
            return Err(ProviderError::UnsupportedServer {
                name: name.to_owned(),
                server,
            });
        }
        let mut descriptor = ProviderDescriptor::new(name, platform, server);
        if let Some(endpoint) = &settings.endpoint {
            descriptor.endpoint = endpoint.trim_end_matches('/').to_owned();
        }
        descriptor.credentials = settings.credentials.clone();
        if descriptor.credentials.token_env.is_none() {
            descriptor.credentials.token_env = default_token_env(platform).map(str::to_owned);
        }
        Ok(descriptor)
    }

    /// If `location` points into this provider, returns the repository path relative to it.
    pub fn project_path(&self, location: &RemoteLocation) -> Option<String> {
        let (host, path) = match location {
            RemoteLocation::Http { host, path } => (host.as_str(), path.as_str()),
            RemoteLocation::File(path) => {
                if self.platform != Platform::File {
                    return None;
                }
                let relative = path.strip_prefix(&self.server).ok()?;
                return Some(normalize_repository_path(&relative.to_string_lossy()));
            }
        };
        if self.platform == Platform::File {
            return None;
        }
        let (server_host, server_path) = split_server(&self.server)?;
        if !server_host.eq_ignore_ascii_case(host) {
            return None;
        }
        let path = path.trim_start_matches('/');
        let relative = if server_path.is_empty() {
            path
        } else {
            path.strip_prefix(server_path.as_str())?.strip_prefix('/')?
        };
        Some(normalize_repository_path(relative))
    }
}

fn default_server(platform: Platform) -> Option<&'static str> {
    match platform {
        Platform::Github => Some("https://github.com"),
        Platform::Gitlab => Some("https://gitlab.com"),
        Platform::Bitbucket => Some(BITBUCKET_CLOUD),
        Platform::Gitea => Some("https://gitea.com"),
        Platform::File => None,
    }
}

fn default_endpoint(platform: Platform, server: &str) -> String {
    match platform {
        Platform::Github if server == "https://github.com" => "https://api.github.com".to_owned(),
        Platform::Github => format!("{server}/api/v3"),
        Platform::Gitlab => format!("{server}/api/v4"),
        // only the Bitbucket Cloud 2.0 API is spoken
        Platform::Bitbucket => BITBUCKET_CLOUD_API.to_owned(),
        Platform::Gitea => format!("{server}/api/v1"),
        Platform::File => server.to_owned(),
    }
}

fn default_token_env(platform: Platform) -> Option<&'static str> {
    match platform {
        Platform::Github => Some("GITHUB_TOKEN"),
        Platform::Gitlab => Some("GITLAB_TOKEN"),
        Platform::Bitbucket => Some("BITBUCKET_TOKEN"),
        Platform::Gitea => Some("GITEA_TOKEN"),
        Platform::File => None,
    }
}

fn default_descriptors() -> Vec<ProviderDescriptor> {
    [
        ("github", Platform::Github),
        ("gitlab", Platform::Gitlab),
        ("bitbucket", Platform::Bitbucket),
        ("gitea", Platform::Gitea),
    ]
    .into_iter()
    .filter_map(|(name, platform)| {
        ProviderDescriptor::from_settings(
            name,
            &ProviderSettings {
                platform: Some(platform),
                ..Default::default()
            },
        )
        .ok()
    })
    .map(|mut descriptor| {
        if descriptor.platform == Platform::Bitbucket {
            descriptor.credentials.user_env = Some("BITBUCKET_USER".to_owned());
            descriptor.credentials.password_env = Some("BITBUCKET_APP_PASSWORD".to_owned());
        }
        descriptor
    })
    .collect()
}

/// Splits `https://host:port/base` into `("host:port", "base")`.
fn split_server(server: &str) -> Option<(String, String)> {
    let url = Url::parse(server).ok()?;
    let host = match url.port() {
        Some(port) => format!("{}:{}", url.host_str()?, port),
        None => url.host_str()?.to_owned(),
    };
    Some((host, url.path().trim_matches('/').to_owned()))
}

fn normalize_repository_path(path: &str) -> String {
    let path = path.trim_matches('/');
    path.strip_suffix(".git").unwrap_or(path).to_owned()
}

/// A repository location given as a URL rather than a project name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteLocation {
    /// `http`, `https`, `ssh` and scp-like `git@host:org/repo` locations.
    Http { host: String, path: String },
    File(PathBuf),
}

impl RemoteLocation {
    /// Returns `None` when `value` is not a URL this crate knows how to resolve.
    pub fn parse(value: &str) -> Option<RemoteLocation> {
        if let Some((user_host, path)) = scp_like(value) {
            let host = user_host.rsplit('@').next()?.to_owned();
            return Some(RemoteLocation::Http {
                host,
                path: path.to_owned(),
            });
        }
        let url = Url::parse(value).ok()?;
        match url.scheme() {
            "http" | "https" | "ssh" | "git" => {
                let host = match url.port() {
                    Some(port) => format!("{}:{}", url.host_str()?, port),
                    None => url.host_str()?.to_owned(),
                };
                Some(RemoteLocation::Http {
                    host,
                    path: url.path().trim_matches('/').to_owned(),
                })
            }
            "file" => url.to_file_path().ok().map(RemoteLocation::File),
            _ => None,
        }
    }

    pub fn path(&self) -> String {
        match self {
            RemoteLocation::Http { path, .. } => normalize_repository_path(path),
            RemoteLocation::File(path) => normalize_repository_path(&path.to_string_lossy()),
        }
    }
}

fn scp_like(value: &str) -> Option<(&str, &str)> {
    if value.contains("://") {
        return None;
    }
    let (user_host, path) = value.split_once(':')?;
    if user_host.contains('@') && !user_host.contains('/') && !path.is_empty() {
        Some((user_host, path))
    } else {
        None
    }
}

/// Known hosting providers, kept in insertion order.
///
/// The registry is owned by the caller and only grows when a URL names a provider that
/// is not configured, such as a `file:` location.
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    descriptors: Vec<ProviderDescriptor>,
    default_provider: String,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        ProviderRegistry {
            descriptors: default_descriptors(),
            default_provider: DEFAULT_PROVIDER.to_owned(),
        }
    }
}

impl ProviderRegistry {
    pub fn new(descriptors: Vec<ProviderDescriptor>, default_provider: impl Into<String>) -> Self {
        ProviderRegistry {
            descriptors,
            default_provider: default_provider.into(),
        }
    }

    /// Built-in providers, overridden or extended by configured ones.
    pub fn from_settings(
        settings: &BTreeMap<String, ProviderSettings>,
        default_provider: Option<&str>,
    ) -> Result<Self, ProviderError> {
        let mut registry = ProviderRegistry::default();
        for (name, settings) in settings {
            let mut descriptor = ProviderDescriptor::from_settings(name, settings)?;
            match registry.descriptors.iter_mut().find(|d| &d.name == name) {
                Some(existing) => {
                    if descriptor.credentials.user_env.is_none() {
                        descriptor.credentials.user_env = existing.credentials.user_env.clone();
                    }
                    if descriptor.credentials.password_env.is_none() {
                        descriptor.credentials.password_env =
                            existing.credentials.password_env.clone();
                    }
                    *existing = descriptor;
                }
                None => registry.descriptors.push(descriptor),
            }
        }
        if let Some(default_provider) = default_provider {
            registry.default_provider = default_provider.to_owned();
        }
        Ok(registry)
    }

    pub fn get(&self, name: &str) -> Option<&ProviderDescriptor> {
        self.descriptors.iter().find(|d| d.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.descriptors.iter().map(|d| d.name.as_str())
    }

    pub fn default_provider(&self) -> &str {
        &self.default_provider
    }

    /// Appends a descriptor unless one with the same name is already registered.
    pub fn append(&mut self, descriptor: ProviderDescriptor) {
        if self.get(&descriptor.name).is_none() {
            debug!(
                "Registering provider {} ({})",
                descriptor.name, descriptor.platform
            );
            self.descriptors.push(descriptor);
        }
    }

    /// First descriptor in insertion order that `location` points into, with the
    /// repository path relative to it.
    pub fn find_by_location(
        &self,
        location: &RemoteLocation,
    ) -> Option<(&ProviderDescriptor, String)> {
        self.descriptors
            .iter()
            .find_map(|d| d.project_path(location).map(|path| (d, path)))
    }

    /// Picks the provider to use: explicit request, then the command line hint, then the
    /// provider recorded by a local mirror, then the configured default.
    pub fn select(
        &self,
        explicit: Option<&str>,
        cli_hint: Option<&str>,
        local_hint: Option<&str>,
    ) -> Result<&ProviderDescriptor, ProviderError> {
        let name = explicit
            .or(cli_hint)
            .or(local_hint)
            .unwrap_or(&self.default_provider);
        self.get(name)
            .ok_or_else(|| ProviderError::UnknownProvider {
                name: name.to_owned(),
                suggestions: closest_names(name, self.names()),
            })
    }
}

/// Names at the minimum edit distance from `name`.
pub(crate) fn closest_names<'a>(
    name: &str,
    candidates: impl Iterator<Item = &'a str>,
) -> Vec<String> {
    let scored: Vec<(usize, &str)> = candidates
        .map(|candidate| (edit_distance(name, candidate), candidate))
        .collect();
    let Some(best) = scored.iter().map(|(distance, _)| *distance).min() else {
        return Vec::new();
    };
    scored
        .into_iter()
        .filter(|(distance, _)| *distance == best)
        .map(|(_, candidate)| candidate.to_owned())
        .collect()
}

fn edit_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut current = vec![i + 1; b.len() + 1];
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != *cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        previous = current;
    }
    previous[b.len()]
}
