//! Ability ledger: the additive, reversible stat-delta accumulator.
//!
//! Every buff that touches a stat goes through [`AbilityLedger::apply`] when
//! it takes effect and [`AbilityLedger::relieve`] with the same value when it
//! ends, so the net contribution of a buff returns to exactly zero.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{CombatError, CombatResult};

// ============================================================================
// Ability Types
// ============================================================================

/// A stat category a buff can modify.
///
/// Catalogue data refers to ability types by numeric code; codes this engine
/// has no handling for deserialize to [`AbilityType::Unknown`] and are
/// rejected when applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u16", into = "u16")]
pub enum AbilityType {
    /// Strength.
    Strength,
    /// Dexterity.
    Dexterity,
    /// Reaction.
    Reaction,
    /// Intelligence.
    Intelligence,
    /// Wisdom.
    Wisdom,
    /// Luck.
    Luck,
    /// Maximum HP.
    MaxHp,
    /// Maximum MP.
    MaxMp,
    /// Maximum SP.
    MaxSp,
    /// Physical defense.
    PhysicalDefense,
    /// Magic resistance.
    MagicResistance,
    /// Physical hitting chance.
    PhysicalHitChance,
    /// Physical evasion chance.
    PhysicalEvasion,
    /// Physical attack power.
    PhysicalAttackPower,
    /// Magic hitting chance.
    MagicHitChance,
    /// Magic evasion chance.
    MagicEvasion,
    /// Magic attack power.
    MagicAttackPower,
    /// Move speed level.
    MoveSpeed,
    /// Attack speed level.
    AttackSpeed,
    /// Critical hitting chance.
    CriticalChance,
    /// Flat damage absorption.
    Absorption,
    /// A code with no handling in this engine.
    Unknown(u16),
}

impl AbilityType {
    /// Catalogue code of this ability type.
    #[must_use]
    pub const fn code(self) -> u16 {
        match self {
            Self::Strength => 1,
            Self::Dexterity => 2,
            Self::Reaction => 3,
            Self::Intelligence => 4,
            Self::Wisdom => 5,
            Self::Luck => 6,
            Self::MaxHp => 7,
            Self::MaxMp => 8,
            Self::MaxSp => 9,
            Self::PhysicalDefense => 10,
            Self::MagicResistance => 11,
            Self::PhysicalHitChance => 12,
            Self::PhysicalEvasion => 13,
            Self::PhysicalAttackPower => 14,
            Self::MagicHitChance => 15,
            Self::MagicEvasion => 16,
            Self::MagicAttackPower => 17,
            Self::MoveSpeed => 18,
            Self::AttackSpeed => 19,
            Self::CriticalChance => 20,
            Self::Absorption => 21,
            Self::Unknown(code) => code,
        }
    }

    /// Notification owed to collaborators when this ability changes.
    ///
    /// Fails for ability types the engine has no handling for.
    pub fn notice(self) -> CombatResult<StatNotice> {
        match self {
            Self::Strength
            | Self::Dexterity
            | Self::Reaction
            | Self::Intelligence
            | Self::Wisdom
            | Self::Luck
            | Self::MaxHp
            | Self::MaxMp
            | Self::MaxSp
            | Self::PhysicalDefense
            | Self::MagicResistance
            | Self::CriticalChance
            | Self::Absorption => Ok(StatNotice::STATS),
            Self::MoveSpeed | Self::AttackSpeed => Ok(StatNotice::SPEED),
            // Consulted lazily by hit resolution.
            Self::PhysicalHitChance
            | Self::PhysicalEvasion
            | Self::PhysicalAttackPower
            | Self::MagicHitChance
            | Self::MagicEvasion
            | Self::MagicAttackPower => Ok(StatNotice::NONE),
            Self::Unknown(code) => Err(CombatError::UnimplementedAbility(code)),
        }
    }
}

impl From<u16> for AbilityType {
    fn from(code: u16) -> Self {
        match code {
            1 => Self::Strength,
            2 => Self::Dexterity,
            3 => Self::Reaction,
            4 => Self::Intelligence,
            5 => Self::Wisdom,
            6 => Self::Luck,
            7 => Self::MaxHp,
            8 => Self::MaxMp,
            9 => Self::MaxSp,
            10 => Self::PhysicalDefense,
            11 => Self::MagicResistance,
            12 => Self::PhysicalHitChance,
            13 => Self::PhysicalEvasion,
            14 => Self::PhysicalAttackPower,
            15 => Self::MagicHitChance,
            16 => Self::MagicEvasion,
            17 => Self::MagicAttackPower,
            18 => Self::MoveSpeed,
            19 => Self::AttackSpeed,
            20 => Self::CriticalChance,
            21 => Self::Absorption,
            other => Self::Unknown(other),
        }
    }
}

impl From<AbilityType> for u16 {
    fn from(ability: AbilityType) -> Self {
        ability.code()
    }
}

// ============================================================================
// Notices
// ============================================================================

/// Which outbound notifications a ledger change calls for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatNotice {
    /// Derived stat totals must be recomputed/broadcast.
    pub stats_changed: bool,
    /// Effective move/attack speed must be recomputed/broadcast.
    pub speed_changed: bool,
}

impl StatNotice {
    /// No notification.
    pub const NONE: Self = Self {
        stats_changed: false,
        speed_changed: false,
    };

    /// Stats changed.
    pub const STATS: Self = Self {
        stats_changed: true,
        speed_changed: false,
    };

    /// Speed changed.
    pub const SPEED: Self = Self {
        stats_changed: false,
        speed_changed: true,
    };

    /// Combines two notices.
    #[must_use]
    pub const fn merge(self, other: Self) -> Self {
        Self {
            stats_changed: self.stats_changed || other.stats_changed,
            speed_changed: self.speed_changed || other.speed_changed,
        }
    }

    /// Whether nothing needs to be sent.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        !self.stats_changed && !self.speed_changed
    }
}

// ============================================================================
// Ledger
// ============================================================================

/// Per-actor accumulator of signed ability deltas.
#[derive(Debug, Clone, Default)]
pub struct AbilityLedger {
    /// Net delta per ability type; zero entries are pruned.
    deltas: AHashMap<AbilityType, i64>,
}

impl AbilityLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `value` to the ability's net delta.
    ///
    /// Unknown ability types are rejected before anything changes.
    pub fn apply(&mut self, ability: AbilityType, value: i32) -> CombatResult<StatNotice> {
        let notice = ability.notice()?;
        self.adjust(ability, i64::from(value));
        Ok(notice)
    }

    /// Reverse an earlier [`apply`](Self::apply) with the same value.
    pub fn relieve(&mut self, ability: AbilityType, value: i32) -> CombatResult<StatNotice> {
        let notice = ability.notice()?;
        self.adjust(ability, -i64::from(value));
        Ok(notice)
    }

    fn adjust(&mut self, ability: AbilityType, delta: i64) {
        if delta == 0 {
            return;
        }
        let entry = self.deltas.entry(ability).or_insert(0);
        *entry += delta;
        if *entry == 0 {
            self.deltas.remove(&ability);
        }
    }

    /// Net delta currently applied to an ability type.
    #[must_use]
    pub fn net(&self, ability: AbilityType) -> i64 {
        self.deltas.get(&ability).copied().unwrap_or(0)
    }

    /// Whether every ability nets to zero.
    #[must_use]
    pub fn is_balanced(&self) -> bool {
        self.deltas.is_empty()
    }

    /// Drop every delta.
    pub fn clear(&mut self) {
        self.deltas.clear();
    }
}

// ============================================================================
// Tests
// ============================================================================
