//! Skill definitions and the read-only skill catalogue.
//!
//! Definitions are immutable once loaded and shared between every buff
//! created from them.

use ahash::AHashMap;
use ember_common::{CommonError, CommonResult, SkillId};
use ron::extensions::Extensions;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::ability::AbilityType;
use crate::error::{CombatError, CombatResult};

/// Maximum number of ability modifiers on one skill.
pub const MAX_ABILITIES: usize = 10;

/// How a buff created from a skill takes effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u16", into = "u16")]
pub enum EffectCategory {
    /// Adds the skill's ability values.
    StatBuff,
    /// Adds the skill's ability values (permanent defensive passives).
    PassiveDefence,
    /// Subtracts the skill's ability values.
    SubtractingDebuff,
    /// Restores pools on a fixed interval.
    PeriodicHeal,
    /// Drains pools on a fixed or skill-specific interval.
    PeriodicDebuff,
    /// Target cannot attack.
    PreventAttack,
    /// Target cannot move.
    Immobilize,
    /// Attack speed bonus while wielding specific weapons.
    WeaponMastery,
    /// Hidden from others; ends sprinting.
    Stealth,
    /// Sets the attack element.
    ElementalAttack,
    /// Sets the defence element.
    ElementalProtection,
    /// Cannot be hit.
    Untouchable,
    /// Strips the defence element.
    RemoveAttribute,
    /// A code with no handling in this engine.
    Unknown(u16),
}

impl EffectCategory {
    /// Catalogue code of this category.
    #[must_use]
    pub const fn code(self) -> u16 {
        match self {
            Self::StatBuff => 1,
            Self::PassiveDefence => 2,
            Self::SubtractingDebuff => 3,
            Self::PeriodicHeal => 4,
            Self::PeriodicDebuff => 5,
            Self::PreventAttack => 6,
            Self::Immobilize => 7,
            Self::WeaponMastery => 8,
            Self::Stealth => 9,
            Self::ElementalAttack => 10,
            Self::ElementalProtection => 11,
            Self::Untouchable => 12,
            Self::RemoveAttribute => 13,
            Self::Unknown(code) => code,
        }
    }

    /// Whether buffs of this category push deltas through the ability ledger.
    #[must_use]
    pub const fn is_additive(self) -> bool {
        matches!(
            self,
            Self::StatBuff | Self::PassiveDefence | Self::SubtractingDebuff
        )
    }
}

impl From<u16> for EffectCategory {
    fn from(code: u16) -> Self {
        match code {
            1 => Self::StatBuff,
            2 => Self::PassiveDefence,
            3 => Self::SubtractingDebuff,
            4 => Self::PeriodicHeal,
            5 => Self::PeriodicDebuff,
            6 => Self::PreventAttack,
            7 => Self::Immobilize,
            8 => Self::WeaponMastery,
            9 => Self::Stealth,
            10 => Self::ElementalAttack,
            11 => Self::ElementalProtection,
            12 => Self::Untouchable,
            13 => Self::RemoveAttribute,
            other => Self::Unknown(other),
        }
    }
}

impl From<EffectCategory> for u16 {
    fn from(category: EffectCategory) -> Self {
        category.code()
    }
}

/// Elemental affinity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Element {
    /// No element.
    #[default]
    None,
    /// Fire.
    Fire,
    /// Water.
    Water,
    /// Earth.
    Earth,
    /// Wind.
    Wind,
}

/// Weapon family identifier used by weapon mastery skills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WeaponType(pub u8);

/// One ability-type/value pair of a skill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbilityModifier {
    /// Stat being modified.
    pub ability: AbilityType,
    /// Signed amount.
    pub value: i32,
}

/// Per-tick amounts for each pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolAmounts {
    /// HP amount.
    pub hp: u32,
    /// MP amount.
    pub mp: u32,
    /// SP amount.
    pub sp: u32,
}

impl PoolAmounts {
    /// Create amounts.
    #[must_use]
    pub const fn new(hp: u32, mp: u32, sp: u32) -> Self {
        Self { hp, mp, sp }
    }
}

/// Immutable definition of a skill at one level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillDefinition {
    /// Skill identity.
    pub id: SkillId,
    /// Skill level; higher levels replace lower ones.
    pub level: u8,
    /// Effect category.
    pub category: EffectCategory,
    /// Ability modifiers (at most [`MAX_ABILITIES`]).
    #[serde(default)]
    pub abilities: Vec<AbilityModifier>,
    /// Duration in seconds (0 = permanent).
    #[serde(default)]
    pub duration_secs: u32,
    /// Goes to the passive partition.
    #[serde(default)]
    pub is_passive: bool,
    /// Removed when the owner dies.
    #[serde(default)]
    pub clear_on_death: bool,
    /// Restored per periodic heal tick.
    #[serde(default)]
    pub heal: PoolAmounts,
    /// Drained per periodic debuff tick.
    #[serde(default)]
    pub damage: PoolAmounts,
    /// Damage amounts are percentages of the current pool values.
    #[serde(default)]
    pub damage_is_percent: bool,
    /// Custom periodic interval in seconds.
    #[serde(default)]
    pub repeat_secs: Option<f32>,
    /// Element set by elemental skills.
    #[serde(default)]
    pub element: Element,
    /// Weapons affected by weapon mastery.
    #[serde(default)]
    pub weapons: Vec<WeaponType>,
    /// Attack speed modifier granted by weapon mastery.
    #[serde(default)]
    pub weapon_speed: i32,
}

impl SkillDefinition {
    /// Create a definition with no modifiers.
    #[must_use]
    pub fn new(id: SkillId, level: u8, category: EffectCategory) -> Self {
        Self {
            id,
            level,
            category,
            abilities: Vec::new(),
            duration_secs: 0,
            is_passive: false,
            clear_on_death: false,
            heal: PoolAmounts::default(),
            damage: PoolAmounts::default(),
            damage_is_percent: false,
            repeat_secs: None,
            element: Element::None,
            weapons: Vec::new(),
            weapon_speed: 0,
        }
    }

    /// Add an ability modifier.
    #[must_use]
    pub fn with_ability(mut self, ability: AbilityType, value: i32) -> Self {
        self.abilities.push(AbilityModifier { ability, value });
        self
    }

    /// Set duration in seconds.
    #[must_use]
    pub fn with_duration(mut self, secs: u32) -> Self {
        self.duration_secs = secs;
        self
    }

    /// Place in the passive partition.
    #[must_use]
    pub fn passive(mut self) -> Self {
        self.is_passive = true;
        self
    }

    /// Remove on death.
    #[must_use]
    pub fn cleared_on_death(mut self) -> Self {
        self.clear_on_death = true;
        self
    }

    /// Set periodic heal amounts.
    #[must_use]
    pub fn with_heal(mut self, heal: PoolAmounts) -> Self {
        self.heal = heal;
        self
    }

    /// Set periodic damage amounts.
    #[must_use]
    pub fn with_damage(mut self, damage: PoolAmounts) -> Self {
        self.damage = damage;
        self
    }

    /// Treat damage amounts as percentages of current pools.
    #[must_use]
    pub fn percent_damage(mut self) -> Self {
        self.damage_is_percent = true;
        self
    }

    /// Set a custom periodic interval.
    #[must_use]
    pub fn with_repeat(mut self, secs: f32) -> Self {
        self.repeat_secs = Some(secs);
        self
    }

    /// Set element.
    #[must_use]
    pub fn with_element(mut self, element: Element) -> Self {
        self.element = element;
        self
    }

    /// Set weapon mastery weapons and speed modifier.
    #[must_use]
    pub fn with_weapon_mastery(mut self, weapons: Vec<WeaponType>, speed: i32) -> Self {
        self.weapons = weapons;
        self.weapon_speed = speed;
        self
    }

    /// Whether the skill never expires on its own.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        self.duration_secs == 0
    }

    /// Skill duration.
    #[must_use]
    pub const fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs as u64)
    }

    /// Custom periodic interval, if any.
    #[must_use]
    pub fn repeat_interval(&self) -> Option<Duration> {
        self.repeat_secs
            .filter(|secs| *secs > 0.0)
            .and_then(|secs| Duration::try_from_secs_f32(secs).ok())
    }

    /// Check the definition can be applied by this engine.
    ///
    /// Failing here leaves the target untouched.
    pub fn validate(&self) -> CombatResult<()> {
        if let EffectCategory::Unknown(code) = self.category {
            return Err(CombatError::UnimplementedBuffCategory(code));
        }
        if let Some(secs) = self.repeat_secs {
            // Zero falls back to the configured tick.
            if !secs.is_finite() || Duration::try_from_secs_f32(secs).is_err() {
                return Err(CombatError::InvalidRepeatInterval {
                    skill: self.id,
                    secs,
                });
            }
        }
        if self.abilities.len() > MAX_ABILITIES {
            return Err(CombatError::TooManyAbilities {
                skill: self.id,
                count: self.abilities.len(),
                max: MAX_ABILITIES,
            });
        }
        if self.category.is_additive() {
            for modifier in &self.abilities {
                modifier.ability.notice()?;
            }
        }
        Ok(())
    }
}

// ============================================================================
// Catalogue
// ============================================================================

/// Read-only lookup of skill definitions.
pub trait SkillCatalogue: Send + Sync {
    /// Find the definition of a skill at a level.
    fn find(&self, id: SkillId, level: u8) -> Option<Arc<SkillDefinition>>;
}

/// In-memory catalogue, typically loaded from a RON file.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalogue {
    skills: AHashMap<(SkillId, u8), Arc<SkillDefinition>>,
}

impl StaticCatalogue {
    /// Create an empty catalogue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition, replacing any previous one with the same id/level.
    pub fn insert(&mut self, skill: SkillDefinition) -> Arc<SkillDefinition> {
        if let Err(e) = skill.validate() {
            warn!(skill = %skill.id, level = skill.level, "catalogue entry cannot be applied: {e}");
        }
        let skill = Arc::new(skill);
        self.skills
            .insert((skill.id, skill.level), Arc::clone(&skill));
        skill
    }

    /// Parse a RON list of definitions.
    pub fn from_ron_str(source: &str) -> CommonResult<Self> {
        // Id newtypes are written as bare numbers.
        let definitions: Vec<SkillDefinition> = ron::Options::default()
            .with_default_extension(Extensions::UNWRAP_NEWTYPES)
            .from_str(source)
            .map_err(|e| CommonError::Serialization(e.to_string()))?;
        let mut catalogue = Self::new();
        for definition in definitions {
            catalogue.insert(definition);
        }
        Ok(catalogue)
    }

    /// Load a RON catalogue file.
    pub fn load<P: AsRef<Path>>(path: P) -> CommonResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)?;
        let catalogue = Self::from_ron_str(&source)?;
        info!("Loaded {} skills from {}", catalogue.len(), path.display());
        Ok(catalogue)
    }

    /// Number of registered definitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.skills.len()
    }

    /// Whether the catalogue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }
}

impl SkillCatalogue for StaticCatalogue {
    fn find(&self, id: SkillId, level: u8) -> Option<Arc<SkillDefinition>> {
        self.skills.get(&(id, level)).cloned()
    }
}
