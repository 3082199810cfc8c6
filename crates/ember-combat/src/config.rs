//! Combat engine configuration.
//!
//! Tick intervals, synthetic durations, and scheduler sizing. Configuration
//! can be loaded from and saved to a TOML file.

use ember_common::SkillId;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Configuration file name.
pub const CONFIG_FILE: &str = "combat.toml";

/// Combat engine configuration parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CombatConfig {
    // === Periodic Effects ===
    /// Seconds between periodic heal ticks
    pub heal_tick_secs: f32,
    /// Seconds between periodic debuff ticks, unless the skill sets its own
    pub debuff_tick_secs: f32,
    /// Lifetime given to buffs whose skill has no duration (effectively permanent)
    pub permanent_buff_secs: u64,

    // === Skill Interactions ===
    /// Skill cancelled whenever a stealth buff is applied
    pub sprinter_skill_id: u16,

    // === Regeneration ===
    /// Seconds between ambient regeneration ticks (0 = disabled)
    pub regen_interval_secs: f32,
    /// HP restored per regeneration tick
    pub regen_hp: u32,
    /// MP restored per regeneration tick
    pub regen_mp: u32,
    /// SP restored per regeneration tick
    pub regen_sp: u32,

    // === Runtime ===
    /// Worker threads executing scheduled callbacks
    pub scheduler_workers: usize,
    /// Capacity of the outbound notification bus
    pub event_capacity: usize,
}

impl Default for CombatConfig {
    fn default() -> Self {
        Self {
            // Periodic effects
            heal_tick_secs: 3.0,
            debuff_tick_secs: 1.2,
            permanent_buff_secs: 60 * 60 * 24 * 365,

            // Skill interactions
            sprinter_skill_id: 654,

            // Regeneration
            regen_interval_secs: 10.0,
            regen_hp: 5,
            regen_mp: 5,
            regen_sp: 5,

            // Runtime
            scheduler_workers: 4,
            event_capacity: 4096,
        }
    }
}

impl CombatConfig {
    /// Load configuration from a specific path.
    /// Returns default config if file doesn't exist or is invalid.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();

        if !path.exists() {
            info!("Config file not found, using defaults");
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<Self>(&contents) {
                Ok(mut config) => {
                    config.validate();
                    info!("Loaded config from {}", path.display());
                    config
                },
                Err(e) => {
                    warn!("Failed to parse config file: {e}");
                    Self::default()
                },
            },
            Err(e) => {
                warn!("Failed to read config file: {e}");
                Self::default()
            },
        }
    }

    /// Save configuration to a specific path.
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let mut file = fs::File::create(path)?;
        file.write_all(contents.as_bytes())?;

        info!("Saved config to {}", path.display());
        Ok(())
    }

    /// Validate and clamp configuration values to sensible ranges.
    pub fn validate(&mut self) {
        let defaults = Self::default();
        self.heal_tick_secs =
            finite_or(self.heal_tick_secs, defaults.heal_tick_secs).clamp(0.1, 60.0);
        self.debuff_tick_secs =
            finite_or(self.debuff_tick_secs, defaults.debuff_tick_secs).clamp(0.1, 60.0);
        self.permanent_buff_secs = self.permanent_buff_secs.max(60 * 60);
        self.regen_interval_secs =
            finite_or(self.regen_interval_secs, defaults.regen_interval_secs).clamp(0.0, 600.0);
        self.scheduler_workers = self.scheduler_workers.clamp(1, 64);
        self.event_capacity = self.event_capacity.max(16);
    }

    /// Interval between periodic heal ticks.
    #[must_use]
    pub fn heal_tick(&self) -> Duration {
        positive_secs(self.heal_tick_secs).unwrap_or(DEFAULT_HEAL_TICK)
    }

    /// Default interval between periodic debuff ticks.
    #[must_use]
    pub fn debuff_tick(&self) -> Duration {
        positive_secs(self.debuff_tick_secs).unwrap_or(DEFAULT_DEBUFF_TICK)
    }

    /// Lifetime of buffs with no duration.
    #[must_use]
    pub const fn permanent_duration(&self) -> Duration {
        Duration::from_secs(self.permanent_buff_secs)
    }

    /// Interval between regeneration ticks, if enabled.
    #[must_use]
    pub fn regen_interval(&self) -> Option<Duration> {
        positive_secs(self.regen_interval_secs)
    }

    /// Skill id of the sprinter buff cancelled by stealth.
    #[must_use]
    pub const fn sprinter_skill(&self) -> SkillId {
        SkillId::new(self.sprinter_skill_id)
    }
}

const DEFAULT_HEAL_TICK: Duration = Duration::from_secs(3);
const DEFAULT_DEBUFF_TICK: Duration = Duration::from_millis(1200);

fn finite_or(value: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

/// Seconds as a duration, if positive and representable.
fn positive_secs(secs: f32) -> Option<Duration> {
    (secs > 0.0)
        .then(|| Duration::try_from_secs_f32(secs).ok())
        .flatten()
}
