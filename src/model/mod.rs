use thiserror::Error;

pub mod manifest;
pub mod project;
pub mod revision;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("IO error reading manifest: {0}")]
    IO(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Error while decoding utf8 bytes: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("Invalid project name `{name}`: {reason}")]
    InvalidProjectName { name: String, reason: String },
}

impl ParseError {
    pub(crate) fn invalid_name(name: &str, reason: impl Into<String>) -> Self {
        ParseError::InvalidProjectName {
            name: name.to_owned(),
            reason: reason.into(),
        }
    }
}
