//! # DomainError
//!
//! Centralized error handling for the forum core.
//! Adapters translate their native failures into these variants at the port
//! boundary so services never see `sqlx` or `io` errors directly.

use thiserror::Error;

/// The primary error type for all domain and service operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Resource absent or soft-deleted (e.g., Post, Comment, Conversation)
    #[error("{0} not found with ID {1}")]
    NotFound(String, String),

    /// Malformed input rejected before the store is touched
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Missing credentials, or the actor is neither owner nor admin
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Duplicate record or an inconsistent request (e.g., both vote targets)
    #[error("conflict: {0}")]
    Conflict(String),

    /// Fan-out failure. Always recovered locally by the caller.
    #[error("realtime transport error: {0}")]
    Realtime(String),

    /// Infrastructure failure (e.g., DB down, disk full)
    #[error("internal service error: {0}")]
    Internal(String),
}

impl DomainError {
    pub fn not_found(entity: &str, id: impl ToString) -> Self {
        Self::NotFound(entity.to_string(), id.to_string())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn internal(msg: impl ToString) -> Self {
        Self::Internal(msg.to_string())
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("serialization failed: {err}"))
    }
}

/// A specialized Result type for forum logic.
pub type Result<T> = std::result::Result<T, DomainError>;
