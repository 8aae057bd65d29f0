//! Error Handling Module
//!
//! Typed errors for the plant_doctor library. Binaries wrap these in
//! `anyhow` at the top level.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for plant_doctor operations
#[derive(Error, Debug)]
pub enum PlantDoctorError {
    /// An image file on disk could not be opened or decoded
    #[error("Failed to load image at '{0}': {1}")]
    ImageLoad(PathBuf, String),

    /// Raw image bytes (e.g. an upload) could not be decoded
    #[error("Failed to decode image: {0}")]
    ImageDecode(String),

    /// Malformed dataset directory or out-of-range lookup
    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("Model error: {0}")]
    Model(String),

    /// Missing, unreadable or inconsistent checkpoint bundle
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("Inference error: {0}")]
    Inference(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Path not found
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),
}

impl From<serde_json::Error> for PlantDoctorError {
    fn from(err: serde_json::Error) -> Self {
        PlantDoctorError::Serialization(err.to_string())
    }
}

/// Convenience Result type for plant_doctor operations
pub type Result<T> = std::result::Result<T, PlantDoctorError>;

/// Extension trait for attaching a message to foreign errors.
///
/// The message becomes the prefix of a [`PlantDoctorError::Checkpoint`],
/// [`PlantDoctorError::Config`] etc. depending on the constructor passed in.
pub trait ResultExt<T> {
    /// Map the error into `kind`, prefixed with `msg`
    fn context_as(self, kind: fn(String) -> PlantDoctorError, msg: &str) -> Result<T>;

    /// Lazy variant of [`ResultExt::context_as`]
    fn with_context_as<F: FnOnce() -> String>(
        self,
        kind: fn(String) -> PlantDoctorError,
        f: F,
    ) -> Result<T>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for std::result::Result<T, E> {
    fn context_as(self, kind: fn(String) -> PlantDoctorError, msg: &str) -> Result<T> {
        self.map_err(|e| kind(format!("{}: {}", msg, e)))
    }

    fn with_context_as<F: FnOnce() -> String>(
        self,
        kind: fn(String) -> PlantDoctorError,
        f: F,
    ) -> Result<T> {
        self.map_err(|e| kind(format!("{}: {}", f(), e)))
    }
}

impl<T> ResultExt<T> for Option<T> {
    fn context_as(self, kind: fn(String) -> PlantDoctorError, msg: &str) -> Result<T> {
        self.ok_or_else(|| kind(msg.to_string()))
    }

    fn with_context_as<F: FnOnce() -> String>(
        self,
        kind: fn(String) -> PlantDoctorError,
        f: F,
    ) -> Result<T> {
        self.ok_or_else(|| kind(f()))
    }
}
