use std::result;

use thiserror::Error;

/// The crate-wide `Result` alias.
pub type Result<T> = result::Result<T, Error>;

/// Every failure the engine can surface to its caller.
///
/// Nothing in this crate retries on its own; the calling layer decides
/// whether a [`Error::Connection`] is worth another attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    #[error("cannot reach mail server: {0}")]
    Connection(String),
    #[error("unexpected response from mail server: {0}")]
    Protocol(String),
    #[error("folder {0} does not exist")]
    FolderNotFound(String),
    #[error("folder {folder} conflicts: {reason}")]
    FolderConflict { folder: String, reason: String },
    #[error("message {0} not found")]
    MessageNotFound(String),
    #[error("local store failure: {0}")]
    Persistence(String),
    #[error("cannot send message: {0}")]
    Send(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// HTTP-style status class the request layer maps errors onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    BadRequest,
    NotFound,
    Conflict,
    BadGateway,
    Internal,
}

impl StatusClass {
    pub fn code(self) -> u16 {
        match self {
            Self::BadRequest => 400,
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::BadGateway => 502,
            Self::Internal => 500,
        }
    }

    pub fn is_client_error(self) -> bool {
        (400..500).contains(&self.code())
    }
}

impl Error {
    pub fn folder_exists(folder: impl Into<String>) -> Self {
        Self::FolderConflict {
            folder: folder.into(),
            reason: "already exists".into(),
        }
    }

    pub fn folder_missing(folder: impl Into<String>) -> Self {
        Self::FolderConflict {
            folder: folder.into(),
            reason: "does not exist".into(),
        }
    }

    pub fn status_class(&self) -> StatusClass {
        match self {
            Self::FolderNotFound(_) | Self::MessageNotFound(_) => StatusClass::NotFound,
            Self::FolderConflict { .. } => StatusClass::Conflict,
            Self::Config(_) => StatusClass::BadRequest,
            Self::Connection(_) | Self::Protocol(_) | Self::Send(_) => StatusClass::BadGateway,
            Self::Persistence(_) => StatusClass::Internal,
        }
    }

    /// The folder this error is about, when there is one.
    pub fn folder(&self) -> Option<&str> {
        match self {
            Self::FolderNotFound(f) | Self::FolderConflict { folder: f, .. } => Some(f),
            _ => None,
        }
    }
}
