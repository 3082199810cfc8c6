//! Error types for the combat engine.

use ember_common::{CommonError, EntityId, SkillId};
use thiserror::Error;

/// Error types for combat state operations.
#[derive(Debug, Error)]
pub enum CombatError {
    /// The catalogue references an ability type this engine has no handling for
    #[error("unimplemented ability type {0}")]
    UnimplementedAbility(u16),

    /// The catalogue references a buff category this engine has no handling for
    #[error("unimplemented buff category {0}")]
    UnimplementedBuffCategory(u16),

    /// A skill definition carries more ability modifiers than allowed
    #[error("{skill} carries {count} ability modifiers, at most {max} allowed")]
    TooManyAbilities {
        /// Offending skill
        skill: SkillId,
        /// Number of modifiers found
        count: usize,
        /// Maximum supported
        max: usize,
    },

    /// A skill's custom periodic interval is not a usable duration
    #[error("{skill} has invalid repeat interval {secs} s")]
    InvalidRepeatInterval {
        /// Offending skill
        skill: SkillId,
        /// Interval found in the catalogue
        secs: f32,
    },

    /// No skill with this id/level exists in the catalogue
    #[error("skill not found: {id} level {level}")]
    SkillNotFound {
        /// Requested skill
        id: SkillId,
        /// Requested level
        level: u8,
    },

    /// The actor is already dead (or dying) and cannot take this action
    #[error("entity {0} is already dead")]
    AlreadyDead(EntityId),

    /// The actor is alive and cannot be reborn
    #[error("entity {0} is not dead")]
    NotDead(EntityId),

    /// The actor has been disposed
    #[error("entity {0} has been disposed")]
    Disposed(EntityId),

    /// Common errors (identity, serialization, io)
    #[error(transparent)]
    Common(#[from] CommonError),
}

impl CombatError {
    /// Whether this error signals a catalogue/configuration gap.
    ///
    /// Fatal errors must be fixed in data; callers abort the action and
    /// report them instead of retrying.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::UnimplementedAbility(_)
                | Self::UnimplementedBuffCategory(_)
                | Self::TooManyAbilities { .. }
                | Self::InvalidRepeatInterval { .. }
        )
    }
}

/// Result type for combat operations.
pub type CombatResult<T> = Result<T, CombatError>;
