//! # Ember Combat
//!
//! Combat state engine for killable world actors.
//!
//! This crate provides:
//! - Ability ledger (reversible stat deltas)
//! - Skill definitions and a RON-backed skill catalogue
//! - Buff stack with level-based stacking and per-category effects
//! - Scheduler service for expiry, periodic ticks, and regeneration
//! - Damage ledger for kill attribution
//! - Death resolution (loot routing, quest updates, rebirth)
//! - Killable entity composing all of the above
//! - Event bus for outbound notifications

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod ability;
pub mod buff;
pub mod collaborators;
pub mod config;
pub mod damage;
pub mod death;
mod effects;
pub mod entity;
pub mod error;
pub mod events;
pub mod health;
pub mod party;
pub mod scheduler;
pub mod services;
pub mod skill;

mod scenario_tests;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::ability::*;
    pub use crate::buff::*;
    pub use crate::collaborators::*;
    pub use crate::config::*;
    pub use crate::damage::*;
    pub use crate::death::*;
    pub use crate::entity::*;
    pub use crate::error::*;
    pub use crate::events::*;
    pub use crate::health::*;
    pub use crate::party::*;
    pub use crate::scheduler::*;
    pub use crate::services::*;
    pub use crate::skill::*;
}

pub use prelude::*;
