use std::fmt::Display;

use regex_lite::Regex;

/// Length of abbreviated commit ids shown to users.
pub const SHORT_HASH_LENGTH: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub enum RevisionKind {
    Tag,
    Branch,
    Commit,
}

impl Display for RevisionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            RevisionKind::Tag => f.write_str("tag"),
            RevisionKind::Branch => f.write_str("branch"),
            RevisionKind::Commit => f.write_str("commit"),
        }
    }
}

/// A resolved point in a project's history.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct RevisionInfo {
    pub commit_id: String,
    pub name: Option<String>,
    pub kind: RevisionKind,
}

impl RevisionInfo {
    pub fn branch(commit_id: impl Into<String>, name: impl Into<String>) -> Self {
        RevisionInfo {
            commit_id: commit_id.into(),
            name: Some(name.into()),
            kind: RevisionKind::Branch,
        }
    }

    pub fn tag(commit_id: impl Into<String>, name: impl Into<String>) -> Self {
        RevisionInfo {
            commit_id: commit_id.into(),
            name: Some(name.into()),
            kind: RevisionKind::Tag,
        }
    }

    pub fn commit(commit_id: impl Into<String>) -> Self {
        RevisionInfo {
            commit_id: commit_id.into(),
            name: None,
            kind: RevisionKind::Commit,
        }
    }

    pub fn short_commit_id(&self) -> &str {
        abbreviate(&self.commit_id)
    }

    /// The symbolic name when there is one, the full commit id otherwise.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.commit_id)
    }
}

impl Display for RevisionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} [{}]", name, self.short_commit_id()),
            None => f.write_str(self.short_commit_id()),
        }
    }
}

/// A branch or tag as listed by a remote.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct RemoteRef {
    pub name: String,
    pub commit_id: String,
}

impl RemoteRef {
    pub fn new(name: impl Into<String>, commit_id: impl Into<String>) -> Self {
        RemoteRef {
            name: name.into(),
            commit_id: commit_id.into(),
        }
    }
}

pub fn abbreviate(commit_id: &str) -> &str {
    commit_id.get(..SHORT_HASH_LENGTH).unwrap_or(commit_id)
}

/// True for a full 40 character hexadecimal commit id.
pub fn is_commit_id(value: &str) -> bool {
    let re = Regex::new(r"^[0-9a-fA-F]{40}$").unwrap();
    re.is_match(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn display_named_revision() {
        let revision = RevisionInfo::tag("0123456789abcdef0123456789abcdef01234567", "v1.0");
        assert_eq!(revision.to_string(), "v1.0 [0123456789]");
        assert_eq!(revision.label(), "v1.0");
    }

    #[test]
    fn display_commit() {
        let revision = RevisionInfo::commit("0123456789abcdef0123456789abcdef01234567");
        assert_eq!(revision.to_string(), "0123456789");
        assert_eq!(revision.label(), "0123456789abcdef0123456789abcdef01234567");
    }

    #[test]
    fn detect_commit_ids() {
        assert!(is_commit_id("0123456789abcdef0123456789abcdef01234567"));
        assert!(!is_commit_id("0123456789"));
        assert!(!is_commit_id("master"));
    }
}
