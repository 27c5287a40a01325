//! Error taxonomy for the feed engine.
//!
//! Validation errors are raised before any store access. Store failures
//! arrive from the collaborator traits as [`anyhow::Error`] and are wrapped
//! in [`FeedError::Store`].

use thiserror::Error;

/// Why a cursor token could not be decoded.
#[derive(Debug, Error)]
pub enum CursorError {
    #[error("cursor is not valid base64")]
    Encoding(#[from] base64::DecodeError),

    #[error("cursor payload is malformed: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("cursor does not match the {expected} sort keys of this feed")]
    ShapeMismatch { expected: &'static str },

    #[error("cursor id is not a valid identifier")]
    InvalidId(#[from] uuid::Error),
}

/// Errors returned by the feed engine and the engagement service.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("invalid cursor: {0}")]
    InvalidCursor(#[from] CursorError),

    #[error("limit must be between 1 and {max}, got {got}")]
    InvalidLimit { got: i64, max: i64 },

    #[error("unknown category '{0}'. Use trending, popular, or recent.")]
    InvalidCategory(String),

    #[error("unknown sort '{0}'. Use popular or recent.")]
    InvalidSort(String),

    #[error("invalid {field}: {message}")]
    InvalidParameter {
        field: &'static str,
        message: String,
    },

    #[error("authentication required")]
    Unauthenticated,

    #[error("{0} not found")]
    NotFound(String),

    #[error("store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl FeedError {
    /// Machine-readable error code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            FeedError::InvalidCursor(_) => "INVALID_CURSOR",
            FeedError::InvalidLimit { .. } => "INVALID_LIMIT",
            FeedError::InvalidCategory(_) => "INVALID_CATEGORY",
            FeedError::InvalidSort(_) => "INVALID_SORT",
            FeedError::InvalidParameter { .. } => "INVALID_PARAMETER",
            FeedError::Unauthenticated => "UNAUTHENTICATED",
            FeedError::NotFound(_) => "NOT_FOUND",
            FeedError::Store(_) => "INTERNAL",
        }
    }

    /// True for errors caused by the request itself rather than the store.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            FeedError::InvalidCursor(_)
                | FeedError::InvalidLimit { .. }
                | FeedError::InvalidCategory(_)
                | FeedError::InvalidSort(_)
                | FeedError::InvalidParameter { .. }
        )
    }
}
