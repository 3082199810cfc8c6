//! # Ember Common
//!
//! Common types shared by the Ember combat engine and its collaborators.
//!
//! This crate provides:
//! - Identifier types (EntityId, BuffId, SkillId, MapId, ...)
//! - A shared, injectable id allocator
//! - World positions
//! - Common error types
//! - Prelude for convenient imports

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod coords;
pub mod error;
pub mod ids;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::coords::*;
    pub use crate::error::*;
    pub use crate::ids::*;
}

pub use prelude::*;
