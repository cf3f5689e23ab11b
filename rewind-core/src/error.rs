/*!
Error types for the Rewind core engine.
*/

use crate::entity::Origin;
use thiserror::Error;

/// Result type used throughout the Rewind core.
pub type Result<T> = std::result::Result<T, SnapshotError>;

/// Errors that can occur while collecting, encoding or restoring snapshots.
#[derive(Error, Debug)]
pub enum SnapshotError {
    /// Collection or restoration touched an attribute the entity does not define
    #[error("Attribute '{attribute}' is not defined on entity type '{entity_type}'")]
    AttributeNotFound {
        entity_type: String,
        attribute: String,
    },

    /// The snapshot belongs to a different origin than the target entity
    #[error("Snapshot belongs to {actual}, cannot rewind {expected}")]
    InvalidSnapshot { expected: Origin, actual: Origin },

    /// Stored attribute blob could not be decoded
    #[error("Malformed snapshot storage: {0}")]
    MalformedStorage(String),

    /// No cast is registered under the given tag
    #[error("Unknown cast: {0}")]
    UnknownCast(String),

    /// A registered cast rejected the value it was given
    #[error("Cast '{cast}' failed: {message}")]
    Cast { cast: String, message: String },

    /// The origin entity of a snapshot could not be loaded
    #[error("Origin entity {0} not found")]
    OriginNotFound(Origin),

    /// Persistence collaborator errors
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Transaction boundary misuse
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Tracing or metrics setup errors
    #[error("Observability error: {0}")]
    Observability(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SnapshotError {
    /// Create a new attribute-not-found error
    pub fn attribute_not_found<S1: Into<String>, S2: Into<String>>(
        entity_type: S1,
        attribute: S2,
    ) -> Self {
        Self::AttributeNotFound {
            entity_type: entity_type.into(),
            attribute: attribute.into(),
        }
    }

    /// Create a new malformed storage error
    pub fn malformed<S: Into<String>>(msg: S) -> Self {
        Self::MalformedStorage(msg.into())
    }

    /// Create a new cast error
    pub fn cast<S1: Into<String>, S2: Into<String>>(cast: S1, message: S2) -> Self {
        Self::Cast {
            cast: cast.into(),
            message: message.into(),
        }
    }

    /// Create a new persistence error
    pub fn persistence<S: Into<String>>(msg: S) -> Self {
        Self::Persistence(msg.into())
    }

    /// Create a new transaction error
    pub fn transaction<S: Into<String>>(msg: S) -> Self {
        Self::Transaction(msg.into())
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a new observability error
    pub fn observability<S: Into<String>>(msg: S) -> Self {
        Self::Observability(msg.into())
    }
}
