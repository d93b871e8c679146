use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum HarvestError {
    #[error("invalid user id: {0:?}")]
    InvalidUserId(String),

    #[error("invalid photo id: {0:?}")]
    InvalidPhotoId(String),

    #[error("invalid photo url: {0:?}")]
    InvalidPhotoUrl(String),

    #[error("unusable photo descriptor: {0}")]
    InvalidPhoto(String),

    #[error("unusable profile: {0}")]
    InvalidProfile(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid config value: {0}")]
    ConfigValue(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("malformed profile {path}: {message}")]
    ProfileParse { path: String, message: String },

    #[error("malformed encounters page: {0}")]
    EncounterParse(String),

    #[error("malformed profile stream at line {line}: {message}")]
    ImportParse { line: usize, message: String },

    #[error("command failed: {0}")]
    Command(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("HTTP request returned status {status}: {message}")]
    HttpStatus { status: u16, message: String },

    #[error("image processing failed: {0}")]
    Image(String),

    #[error("giving up after {0} consecutive failures")]
    #[diagnostic(help("the encounters or dislike command keeps failing; check it by hand"))]
    TooManyFailures(u32),

    #[error("failed to install Ctrl-C handler: {0}")]
    Signal(String),
}
