//! Error types shared across Ember crates.

use thiserror::Error;

use crate::ids::EntityId;

/// Errors raised by common building blocks.
#[derive(Debug, Error)]
pub enum CommonError {
    /// An identity was assigned to an object that already has one
    #[error("identity already assigned: current {current}, attempted {attempted}")]
    IdentityAlreadyAssigned {
        /// Identity currently held
        current: EntityId,
        /// Identity the caller tried to assign
        attempted: EntityId,
    },

    /// The null identity cannot be assigned
    #[error("cannot assign the null entity id")]
    NullIdentity,

    /// Every buff id has been handed out
    #[error("buff id space exhausted")]
    IdSpaceExhausted,

    /// Configuration or catalogue data could not be parsed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for common operations.
pub type CommonResult<T> = Result<T, CommonError>;
