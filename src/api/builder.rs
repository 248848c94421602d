use std::path::PathBuf;

use anyhow::anyhow;
use home::home_dir;
use log::debug;

use crate::{
    config::PipefetchConfig,
    git::MirrorCache,
    provider::{CredentialOverrides, ProviderRegistry},
    resolver::DEFAULT_ORGANIZATION,
    AssetManager,
};

/// Builds an [`AssetManager`]. Values set here win over the configuration file and
/// `PIPEFETCH_*` environment variables.
#[derive(Default)]
pub struct AssetManagerBuilder {
    cache_directory_path: Option<PathBuf>,
    providers_file: Option<PathBuf>,
    default_provider: Option<String>,
    default_organization: Option<String>,
    hub: Option<String>,
    user: Option<String>,
    password: Option<String>,
}

impl AssetManagerBuilder {
    /// Location of the asset cache.
    ///
    /// Defaults to `$HOME/.pipefetch/assets`.
    pub fn cache_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_directory_path = Some(path.into());
        self
    }

    /// TOML file declaring hosting providers.
    ///
    /// Defaults to `$HOME/.pipefetch/scm.toml`.
    pub fn providers_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.providers_file = Some(path.into());
        self
    }

    /// Provider used when nothing else selects one.
    ///
    /// Defaults to `github`.
    pub fn default_provider(mut self, name: impl Into<String>) -> Self {
        self.default_provider = Some(name.into());
        self
    }

    /// Organization given to short project names that match nothing in the cache.
    pub fn default_organization(mut self, name: impl Into<String>) -> Self {
        self.default_organization = Some(name.into());
        self
    }

    /// Provider to use for every project not given as a URL.
    pub fn hub(mut self, name: impl Into<String>) -> Self {
        self.hub = Some(name.into());
        self
    }

    /// Credentials overriding the ones configured for the selected provider.
    pub fn credentials(mut self, user: Option<String>, password: Option<String>) -> Self {
        self.user = user;
        self.password = password;
        self
    }

    pub fn try_build(self) -> anyhow::Result<AssetManager> {
        let Self {
            cache_directory_path,
            providers_file,
            default_provider,
            default_organization,
            hub,
            user,
            password,
        } = self;

        let config = PipefetchConfig::load(providers_file.as_deref())?;

        let cache_directory = match cache_directory_path.or(config.cache_dir) {
            Some(path) => path,
            None => default_cache_directory()?,
        };

        let git_config = match git2::Config::open_default() {
            Ok(config) => Some(config),
            Err(error) => {
                debug!("Git configuration unavailable: {}", error);
                None
            }
        };

        let cache = MirrorCache::new(cache_directory, git_config)?;

        let registry = ProviderRegistry::from_settings(
            &config.providers,
            default_provider.or(config.default_provider).as_deref(),
        )?;

        let default_organization = default_organization
            .or(config.default_organization)
            .unwrap_or_else(|| DEFAULT_ORGANIZATION.to_owned());

        Ok(AssetManager::new(
            cache,
            registry,
            hub,
            default_organization,
            CredentialOverrides { user, password },
        ))
    }
}

fn default_cache_directory() -> anyhow::Result<PathBuf> {
    let mut cache_directory = home_dir()
        .ok_or_else(|| anyhow!("Could not find home dir. Please define $HOME env variable."))?;
    cache_directory.push(".pipefetch/assets");
    Ok(cache_directory)
}
