use std::{
    fmt::{Debug, Display},
    path::PathBuf,
    str::FromStr,
};

use super::ParseError;

/// A pipeline project hosted in a git repository, identified as `organization/repository`.
///
/// The optional `revision` and `main_script` travel with the identifier so that a single
/// user input such as `org/repo/main.nf` or `org/repo:dev` round-trips through resolution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct ProjectIdentifier {
    pub organization: String,
    pub repository: String,
    pub revision: Option<String>,
    pub main_script: Option<String>,
}

impl ProjectIdentifier {
    pub fn new(
        organization: impl Into<String>,
        repository: impl Into<String>,
    ) -> Result<ProjectIdentifier, ParseError> {
        let organization = organization.into();
        let repository = repository.into();
        let full = format!("{organization}/{repository}");
        validate_segment(&full, &organization)?;
        validate_segment(&full, &repository)?;
        Ok(ProjectIdentifier {
            organization,
            repository,
            revision: None,
            main_script: None,
        })
    }

    pub fn with_revision(mut self, revision: Option<String>) -> Self {
        self.revision = revision.filter(|r| !r.is_empty());
        self
    }

    pub fn with_main_script(mut self, main_script: Option<String>) -> Self {
        self.main_script = main_script;
        self
    }

    /// The canonical `org/repo` name, without revision.
    pub fn name(&self) -> String {
        format!("{}/{}", self.organization, self.repository)
    }

    pub fn to_path(&self) -> PathBuf {
        let mut result = PathBuf::new();

        result.push(&self.organization);
        result.push(&self.repository);

        result
    }
}

fn validate_segment(full: &str, segment: &str) -> Result<(), ParseError> {
    if segment.is_empty() {
        return Err(ParseError::invalid_name(full, "empty path segment"));
    }
    if segment.starts_with('.') {
        return Err(ParseError::invalid_name(
            full,
            "path segments cannot start with a dot",
        ));
    }
    if segment
        .chars()
        .any(|c| c == '/' || c == '\\' || c == ':' || c.is_whitespace())
    {
        return Err(ParseError::invalid_name(
            full,
            format!("invalid character in `{segment}`"),
        ));
    }
    Ok(())
}

/// Parses `org/repo` and `org/repo:revision`.
impl FromStr for ProjectIdentifier {
    type Err = ParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (name, revision) = match value.rsplit_once(':') {
            Some((name, revision)) => (name, Some(revision.to_owned())),
            None => (value, None),
        };
        match name.split('/').collect::<Vec<_>>().as_slice() {
            [organization, repository] => {
                Ok(ProjectIdentifier::new(*organization, *repository)?.with_revision(revision))
            }
            _ => Err(ParseError::invalid_name(
                value,
                "expected exactly two path segments (`organization/repository`)",
            )),
        }
    }
}

impl Display for ProjectIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}/{}", self.organization, self.repository)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn parse_qualified_name() {
        let project = ProjectIdentifier::from_str("nextflow-io/hello").unwrap();
        assert_eq!(project.organization, "nextflow-io");
        assert_eq!(project.repository, "hello");
        assert_eq!(project.revision, None);
        assert_eq!(project.to_string(), "nextflow-io/hello");
    }

    #[test]
    fn parse_qualified_name_with_revision() {
        let project = ProjectIdentifier::from_str("nextflow-io/hello:dev").unwrap();
        assert_eq!(project.name(), "nextflow-io/hello");
        assert_eq!(project.revision.as_deref(), Some("dev"));
    }

    #[test]
    fn reject_wrong_segment_count() {
        assert!(ProjectIdentifier::from_str("hello").is_err());
        assert!(ProjectIdentifier::from_str("a/b/c").is_err());
        assert!(ProjectIdentifier::from_str("a//b").is_err());
    }

    #[test]
    fn reject_hidden_segments() {
        assert!(ProjectIdentifier::new("org", ".pipefetch").is_err());
        assert!(ProjectIdentifier::new("..", "repo").is_err());
    }

    #[test]
    fn project_path() {
        let project = ProjectIdentifier::new("org", "repo").unwrap();
        assert_eq!(project.to_path(), PathBuf::from("org").join("repo"));
    }
}
