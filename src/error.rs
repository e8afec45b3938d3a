//! Error types for container and data file operations.

use std::io;
use std::path::PathBuf;

use asic_write_policy::WriteError;
use thiserror::Error;

use crate::config::ConfigError;
use crate::signing::SigningError;

/// Errors surfaced by storage, container and builder operations.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// A disk write was required but the write gate refused it.
    #[error("storage restricted: cannot write {path} ({policy} policy)")]
    StorageRestricted { path: PathBuf, policy: &'static str },

    /// Spilled content can no longer be read.
    #[error("content unavailable at {path}: {reason}")]
    ContentUnavailable { path: PathBuf, reason: String },

    #[error("data file {0:?} already exists in container")]
    DuplicateName(String),

    #[error("malformed archive: {0}")]
    MalformedArchive(String),

    #[error("invalid data file name {0:?}")]
    InvalidName(String),

    #[error("invalid mime type {0:?}")]
    InvalidMimeType(String),

    #[error("container is closed for data file changes")]
    ContainerClosed,

    #[error("data file {0:?} not found")]
    NotFound(String),

    #[error("signing error: {0}")]
    Signing(#[from] SigningError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<WriteError> for ContainerError {
    fn from(err: WriteError) -> Self {
        match err {
            WriteError::Denied { path, policy, .. } => {
                ContainerError::StorageRestricted { path, policy }
            }
            WriteError::Io(e) => ContainerError::Io(e),
        }
    }
}

impl ContainerError {
    /// Process exit code used by the CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            ContainerError::StorageRestricted { .. } => 10,
            ContainerError::ContentUnavailable { .. } => 11,
            ContainerError::DuplicateName(_) => 12,
            ContainerError::MalformedArchive(_) => 13,
            ContainerError::InvalidName(_) | ContainerError::InvalidMimeType(_) => 14,
            ContainerError::ContainerClosed | ContainerError::NotFound(_) => 15,
            ContainerError::Signing(_) => 16,
            ContainerError::Json(_) => 17,
            ContainerError::Config(_) => 2,
            ContainerError::Io(_) => 1,
        }
    }
}

/// Result type for container operations.
pub type Result<T> = std::result::Result<T, ContainerError>;
