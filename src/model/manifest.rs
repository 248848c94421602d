use std::path::Path;

use log::debug;
use serde::Deserialize;

use super::ParseError;

/// Well-known manifest file at the root of every pipeline project.
pub const MANIFEST_FILE_NAME: &str = "pipeline.toml";
pub const DEFAULT_MAIN_SCRIPT: &str = "main.nf";

/// Project metadata read from the `[manifest]` table of `pipeline.toml`.
///
/// Only the structural fields this crate needs are modelled; any other key is ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Manifest {
    pub main_script: Option<String>,
    pub default_branch: Option<String>,
    pub homepage: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub recurse_submodules: bool,
    #[serde(default)]
    pub gitmodules: SubmodulePolicy,
}

#[derive(Debug, Default, Deserialize)]
struct ManifestFile {
    #[serde(default)]
    manifest: Manifest,
}

impl Manifest {
    pub fn from_toml_str(data: &str) -> Result<Manifest, ParseError> {
        let file = toml::from_str::<ManifestFile>(data)?;
        Ok(file.manifest)
    }

    /// Reads a manifest from disk, falling back to an empty manifest when the file is absent.
    pub fn from_file(path: &Path) -> Result<Manifest, ParseError> {
        if !path.exists() {
            debug!(
                "No manifest found at {}, using defaults",
                path.to_string_lossy()
            );
            return Ok(Manifest::default());
        }
        Manifest::from_toml_str(&std::fs::read_to_string(path)?)
    }

    pub fn main_script(&self) -> &str {
        self.main_script.as_deref().unwrap_or(DEFAULT_MAIN_SCRIPT)
    }
}

/// Which submodules to initialize when materializing a project.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "RawSubmodulePolicy")]
pub enum SubmodulePolicy {
    /// No `gitmodules` entry or `gitmodules = true`.
    #[default]
    All,
    Disabled,
    Paths(Vec<String>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawSubmodulePolicy {
    Flag(bool),
    List(Vec<String>),
    Text(String),
}

impl From<RawSubmodulePolicy> for SubmodulePolicy {
    fn from(raw: RawSubmodulePolicy) -> Self {
        match raw {
            RawSubmodulePolicy::Flag(true) => SubmodulePolicy::All,
            RawSubmodulePolicy::Flag(false) => SubmodulePolicy::Disabled,
            RawSubmodulePolicy::List(paths) => SubmodulePolicy::paths(paths),
            RawSubmodulePolicy::Text(text) => SubmodulePolicy::paths(
                text.split(|c: char| c == ',' || c.is_whitespace())
                    .map(str::to_owned)
                    .collect(),
            ),
        }
    }
}

impl SubmodulePolicy {
    fn paths(paths: Vec<String>) -> Self {
        let paths: Vec<String> = paths
            .into_iter()
            .map(|p| p.trim().trim_matches('/').to_owned())
            .filter(|p| !p.is_empty())
            .collect();
        if paths.is_empty() {
            SubmodulePolicy::Disabled
        } else {
            SubmodulePolicy::Paths(paths)
        }
    }

    pub fn selects(&self, path: &str) -> bool {
        match self {
            SubmodulePolicy::All => true,
            SubmodulePolicy::Disabled => false,
            SubmodulePolicy::Paths(paths) => {
                let path = path.trim_matches('/');
                paths.iter().any(|p| p == path)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn load_full_manifest() {
        let str = r#"
            [manifest]
            main_script = "run.nf"
            default_branch = "dev"
            homepage = "https://example.com/org/repo"
            description = "an example"
            recurse_submodules = true
            gitmodules = ["modules/a", "modules/b"]
        "#;
        let expected = Manifest {
            main_script: Some("run.nf".to_owned()),
            default_branch: Some("dev".to_owned()),
            homepage: Some("https://example.com/org/repo".to_owned()),
            description: Some("an example".to_owned()),
            recurse_submodules: true,
            gitmodules: SubmodulePolicy::Paths(vec![
                "modules/a".to_owned(),
                "modules/b".to_owned(),
            ]),
        };
        assert_eq!(Manifest::from_toml_str(str).unwrap(), expected);
    }

    #[test]
    fn load_empty_manifest() {
        let manifest = Manifest::from_toml_str("").unwrap();
        assert_eq!(manifest, Manifest::default());
        assert_eq!(manifest.main_script(), "main.nf");
        assert_eq!(manifest.gitmodules, SubmodulePolicy::All);
    }

    #[test]
    fn ignore_unrelated_tables() {
        let str = r#"
            [params]
            reads = "*.fq"
            [manifest]
            main_script = "other.nf"
        "#;
        assert_eq!(Manifest::from_toml_str(str).unwrap().main_script(), "other.nf");
    }

    #[test]
    fn submodules_from_string() {
        let str = r#"
            [manifest]
            gitmodules = "modules/a, modules/b  modules/c"
        "#;
        let policy = Manifest::from_toml_str(str).unwrap().gitmodules;
        assert!(policy.selects("modules/a"));
        assert!(policy.selects("modules/c/"));
        assert!(!policy.selects("modules/d"));
    }

    #[test]
    fn submodules_disabled() {
        let str = r#"
            [manifest]
            gitmodules = false
        "#;
        let policy = Manifest::from_toml_str(str).unwrap().gitmodules;
        assert_eq!(policy, SubmodulePolicy::Disabled);
        assert!(!policy.selects("anything"));
    }

    #[test]
    fn missing_manifest_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = Manifest::from_file(&dir.path().join(MANIFEST_FILE_NAME)).unwrap();
        assert_eq!(manifest, Manifest::default());
    }

    #[test]
    fn invalid_manifest() {
        let str = r#"
            [manifest]
            recurse_submodules = "maybe"
        "#;
        assert!(Manifest::from_toml_str(str).is_err());
    }
}
