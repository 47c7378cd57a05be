//! Error taxonomy for product requests.

use std::time::Duration;

use sea_orm::DbErr;
use thiserror::Error;

use crate::config::NotFoundPolicy;

/// Caller-safe description of any store-side failure.
pub const BACKEND_ERROR: &str = "backend error";

/// A failure reported by the record store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] DbErr),

    #[error("store call timed out after {0:?}")]
    Timeout(Duration),
}

/// Outcome of a failed `get` or `add`.
#[derive(Debug, Error)]
pub enum ProductError {
    /// Missing or malformed caller input, detected before any store access.
    #[error("bad request: {0}")]
    Validation(String),

    /// The store answered but nothing matched.
    #[error("no product with {field} `{value}`")]
    NotFound { field: &'static str, value: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ProductError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// HTTP status code for this error under `policy`.
    pub fn status(&self, policy: NotFoundPolicy) -> u16 {
        match (self, policy) {
            (Self::Validation(_), _) => 400,
            (Self::NotFound { .. }, NotFoundPolicy::NotFound) => 404,
            (Self::NotFound { .. }, NotFoundPolicy::BackendError) | (Self::Store(_), _) => 500,
        }
    }

    /// Message that may be shown to the caller.
    ///
    /// Validation messages describe the caller's own input and are passed
    /// through; everything else collapses to a generic description.
    pub fn client_message(&self, policy: NotFoundPolicy) -> String {
        match (self, policy) {
            (Self::Validation(_), _) => self.to_string(),
            (Self::NotFound { .. }, NotFoundPolicy::NotFound) => "not found".to_string(),
            _ => BACKEND_ERROR.to_string(),
        }
    }

    /// Full description for logs and the trace context.
    pub fn internal_message(&self) -> String {
        match self {
            Self::Validation(_) => self.to_string(),
            Self::NotFound { .. } => format!("unable to find product: {self}"),
            Self::Store(e) => format!("product store failure: {e}"),
        }
    }

    /// Short class name recorded with noticed errors.
    pub fn class(&self) -> &'static str {
        match self {
            Self::Validation(_) => "ValidationError",
            Self::NotFound { .. } => "NotFoundError",
            Self::Store(_) => "StoreError",
        }
    }
}
