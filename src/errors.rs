use std::str::Utf8Error;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SafeThingError>;

/// Status codes crossing the C boundary. Zero is success, every failure
/// is negative.
#[repr(i32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ErrorCode {
    Success = 0,
    InvalidParameters = -1,
    InvalidHandle = -2,
    InvalidStatus = -3,
    NotFound = -4,
    Collision = -5,
    Storage = -6,
    Internal = -7,
}

#[derive(Error, Debug)]
pub enum SafeThingError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),
    #[error("Handle {0} is not alive")]
    InvalidHandle(u64),
    #[error("Invalid status: {0}")]
    InvalidStatus(String),
    #[error("Thing not found: {0}")]
    NotFound(String),
    #[error("There is some collision: {0}")]
    Collision(String),
    #[error("Parsing error")]
    Parse,
    #[error("Storage error: {0} {1}")]
    Storage(String, String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SafeThingError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidParameters(_) => ErrorCode::InvalidParameters,
            Self::InvalidHandle(_) => ErrorCode::InvalidHandle,
            Self::InvalidStatus(_) => ErrorCode::InvalidStatus,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::Collision(_) => ErrorCode::Collision,
            Self::Io(_) | Self::Parse | Self::Storage(..) => ErrorCode::Storage,
            Self::Other(_) => ErrorCode::Internal,
        }
    }
}

impl From<Utf8Error> for SafeThingError {
    fn from(e: Utf8Error) -> Self {
        Self::InvalidParameters(format!("string is not UTF-8: {}", e))
    }
}

impl From<serde_json::Error> for SafeThingError {
    fn from(_: serde_json::Error) -> Self {
        Self::Parse
    }
}

impl<T> From<std::sync::PoisonError<T>> for SafeThingError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Self::Other(anyhow::anyhow!("Could not lock: {}", e))
    }
}
