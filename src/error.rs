//! Custom error types for the application.
//!
//! This module defines the primary error type, `AoiError`, for the entire
//! server. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the failure classes that can occur during an
//! inspection, from configuration and I/O issues to per-ROI processing
//! problems.
//!
//! ## Error Hierarchy
//!
//! `AoiError` is an enum that consolidates the inspection failure taxonomy:
//!
//! - **`Config`**: Wraps errors from the `figment` crate, typically related to
//!   file parsing or malformed values in the configuration sources.
//! - **`Configuration`**: Semantic errors in the configuration, such as values
//!   that parse but are logically invalid (a relative root path, a zero-sized
//!   worker pool). These are caught during the validation step.
//! - **`SourceNotFound` / `SourceUnreadable` / `SourceMalformed` /
//!   `SourceMissing`**: the image-source resolver's failure classes. All four
//!   surface as client errors at the transport boundary.
//! - **`SessionUnknown`**: the orchestrator refuses to proceed for a session
//!   id that is not registered.
//! - **`ConfigInvalid`**: an ROI record failed normalization; carries a pointer
//!   to the offending record.
//! - **`RoiTaskFailed`**: an individual ROI task failed; the orchestrator
//!   converts this into a `passed=false` result rather than propagating.
//! - **`PromotionFailed`**: the golden matcher found a match but could not
//!   complete the rename sequence; the inspection verdict is unaffected.
//! - **`Timeout`**: a task or the whole inspection exceeded its deadline.
//!
//! By using `#[from]`, `AoiError` can be seamlessly created from underlying
//! error types, simplifying error handling throughout the server with the
//! `?` operator.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, AoiError>;

#[derive(Error, Debug)]
pub enum AoiError {
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Unknown session '{0}'")]
    SessionUnknown(uuid::Uuid),

    #[error("Image source not found: {0}")]
    SourceNotFound(String),

    #[error("Image source unreadable: {0}")]
    SourceUnreadable(String),

    #[error("Malformed image payload: {0}")]
    SourceMalformed(String),

    #[error("No image source supplied (expected image_path, image_filename or image)")]
    SourceMissing,

    #[error("Invalid ROI config at {context}: {reason}")]
    ConfigInvalid { context: String, reason: String },

    #[error("Unknown product '{0}'")]
    ProductUnknown(String),

    #[error("ROI task failed: {0}")]
    RoiTaskFailed(String),

    #[error("Golden promotion failed: {0}")]
    PromotionFailed(String),

    #[error("Golden store error: {0}")]
    GoldenStore(String),

    #[error("Golden sample not found: {0}")]
    GoldenNotFound(String),

    #[error("Inspection deadline exceeded")]
    Timeout,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AoiError {
    /// Builds a `ConfigInvalid` error pointing at a specific record.
    pub fn config_invalid(context: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            context: context.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error class is the caller's fault (4xx at the transport
    /// boundary) rather than a server-side fault.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::SourceNotFound(_)
                | Self::SourceUnreadable(_)
                | Self::SourceMalformed(_)
                | Self::SourceMissing
                | Self::ConfigInvalid { .. }
                | Self::ProductUnknown(_)
                | Self::GoldenNotFound(_)
                | Self::SessionUnknown(_)
        )
    }
}
