use std::{
    collections::{BTreeMap, HashMap},
    path::{Path, PathBuf},
};

use config::{Config, ConfigError, Environment, File, FileFormat};
use home::home_dir;
use serde::Deserialize;

use crate::provider::ProviderSettings;

/// Settings gathered from the providers file and `PIPEFETCH_*` environment variables.
#[derive(Debug, Default)]
pub struct PipefetchConfig {
    pub cache_dir: Option<PathBuf>,
    pub default_provider: Option<String>,
    pub default_organization: Option<String>,
    pub providers: BTreeMap<String, ProviderSettings>,
}

impl PipefetchConfig {
    /// Loads `providers_file`, or `$HOME/.pipefetch/scm.toml` when not given. A missing
    /// file is not an error.
    pub fn load(providers_file: Option<&Path>) -> anyhow::Result<Self> {
        let providers_file = providers_file
            .map(Path::to_path_buf)
            .or_else(default_providers_file);
        let raw_config = RawConfig::load(providers_file.as_deref(), None)?;

        Ok(Self {
            cache_dir: raw_config.cache.dir,
            default_provider: raw_config.default.provider,
            default_organization: raw_config.default.organization,
            providers: raw_config.providers,
        })
    }
}

pub fn default_providers_file() -> Option<PathBuf> {
    home_dir().map(|home| home.join(".pipefetch").join("scm.toml"))
}

#[derive(Default, Debug, Deserialize, PartialEq, Eq)]
struct RawConfig {
    #[serde(default)]
    cache: CacheConfig,
    #[serde(default)]
    default: DefaultConfig,
    #[serde(default)]
    providers: BTreeMap<String, ProviderSettings>,
}

#[derive(Default, Debug, Deserialize, PartialEq, Eq)]
struct CacheConfig {
    dir: Option<PathBuf>,
}

#[derive(Default, Debug, Deserialize, PartialEq, Eq)]
struct DefaultConfig {
    provider: Option<String>,
    organization: Option<String>,
}

impl RawConfig {
    fn load(
        file: Option<&Path>,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(file) = file {
            builder = builder.add_source(File::from(file).format(FileFormat::Toml).required(false));
        }
        builder
            .add_source(
                Environment::with_prefix("PIPEFETCH")
                    .separator("_")
                    .source(env),
            )
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{CredentialSource, Platform};

    use pretty_assertions::assert_eq;

    #[test]
    fn load_empty() {
        let env = HashMap::from([]);
        let config = RawConfig::load(None, Some(env)).unwrap();
        assert_eq!(config, RawConfig::default())
    }

    #[test]
    fn load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config =
            RawConfig::load(Some(&dir.path().join("scm.toml")), Some(HashMap::new())).unwrap();
        assert_eq!(config, RawConfig::default())
    }

    #[test]
    fn load_environment() {
        let env = HashMap::from([
            ("PIPEFETCH_CACHE_DIR".to_owned(), "/cache".to_owned()),
            ("PIPEFETCH_DEFAULT_PROVIDER".to_owned(), "gitlab".to_owned()),
            (
                "PIPEFETCH_DEFAULT_ORGANIZATION".to_owned(),
                "acme".to_owned(),
            ),
        ]);
        let config = RawConfig::load(None, Some(env)).unwrap();
        assert_eq!(
            config,
            RawConfig {
                cache: CacheConfig {
                    dir: Some("/cache".into())
                },
                default: DefaultConfig {
                    provider: Some("gitlab".to_owned()),
                    organization: Some("acme".to_owned()),
                },
                providers: BTreeMap::new(),
            }
        )
    }

    #[test]
    fn load_providers_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("scm.toml");
        std::fs::write(
            &file,
            r#"
[default]
provider = "work"

[providers.work]
platform = "gitlab"
server = "https://gitlab.example.com"
token_env = "WORK_TOKEN"
"#,
        )
        .unwrap();
        let env = HashMap::from([("PIPEFETCH_CACHE_DIR".to_owned(), "/cache".to_owned())]);
        let config = RawConfig::load(Some(&file), Some(env)).unwrap();
        assert_eq!(config.cache.dir, Some(PathBuf::from("/cache")));
        assert_eq!(config.default.provider.as_deref(), Some("work"));
        assert_eq!(
            config.providers,
            BTreeMap::from([(
                "work".to_owned(),
                ProviderSettings {
                    platform: Some(Platform::Gitlab),
                    server: Some("https://gitlab.example.com".to_owned()),
                    endpoint: None,
                    credentials: CredentialSource {
                        token_env: Some("WORK_TOKEN".to_owned()),
                        ..Default::default()
                    },
                }
            )])
        );
    }
}
