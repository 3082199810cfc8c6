//! Contracts for the systems around the combat engine.
//!
//! Inventory, parties, quests, maps, and movement live outside this crate;
//! the engine reaches them only through these traits.

use ahash::AHashMap;
use ember_common::{EntityId, ItemTypeId, MapId, PartyId, Position};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::ability::AbilityType;
use crate::skill::WeaponType;

/// Kind of killable actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityClass {
    /// Player character.
    Player,
    /// Monster instance of a catalogue mob.
    Monster {
        /// Catalogue id of the mob, used by kill quests.
        mob_id: u16,
    },
}

impl EntityClass {
    /// Check if this is a player.
    #[must_use]
    pub const fn is_player(self) -> bool {
        matches!(self, Self::Player)
    }

    /// Catalogue mob id, for monsters.
    #[must_use]
    pub const fn mob_id(self) -> Option<u16> {
        match self {
            Self::Monster { mob_id } => Some(mob_id),
            Self::Player => None,
        }
    }
}

/// An item stack produced by a drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropItem {
    /// Item type.
    pub item_type: ItemTypeId,
    /// Stack size.
    pub count: u8,
}

impl DropItem {
    /// Create a drop.
    #[must_use]
    pub const fn new(item_type: ItemTypeId, count: u8) -> Self {
        Self { item_type, count }
    }
}

/// What the engine needs to know about an actor other than itself.
#[derive(Clone)]
pub struct Participant {
    /// Actor identity.
    pub id: EntityId,
    /// Actor class.
    pub class: EntityClass,
    /// Map the actor is on.
    pub map: MapId,
    /// Party the actor belongs to, if any.
    pub party: Option<Arc<dyn Party>>,
}

impl std::fmt::Debug for Participant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Participant")
            .field("id", &self.id)
            .field("class", &self.class)
            .field("map", &self.map)
            .field("party", &self.party.as_ref().map(|p| p.id()))
            .finish()
    }
}

/// A party member as seen by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartyMember {
    /// Member identity.
    pub id: EntityId,
    /// Map the member is on.
    pub map: MapId,
}

// ============================================================================
// Traits
// ============================================================================

/// Base (unbuffed) stats of an actor.
pub trait StatsProvider: Send + Sync {
    /// Base value of an ability type.
    fn base(&self, ability: AbilityType) -> i32;
}

/// Loot policy of an actor.
pub trait DropGenerator: Send + Sync {
    /// Items dropped when killed by `killer`.
    fn generate_drop(&self, killer: &Participant) -> Vec<DropItem>;
}

/// Base speeds of an actor.
pub trait SpeedSource: Send + Sync {
    /// Base attack speed level.
    fn base_attack_speed(&self) -> i32;

    /// Base move speed level.
    fn base_move_speed(&self) -> i32;

    /// Weapon currently wielded, if any.
    fn weapon(&self) -> Option<WeaponType> {
        None
    }
}

/// Group loot distribution policy.
pub trait Party: Send + Sync {
    /// Party identity.
    fn id(&self) -> PartyId;

    /// Current members.
    fn members(&self) -> Vec<PartyMember>;

    /// Hand items to members; returns what was not distributed.
    fn distribute_drop(&self, items: Vec<DropItem>, receiver: EntityId) -> Vec<DropItem>;
}

/// Kill-count quest progress.
pub trait QuestTracker: Send + Sync {
    /// A player killed a monster of `mob_id`.
    fn record_kill(&self, player: EntityId, mob_id: u16);
}

/// Places items on the ground.
pub trait LootSink: Send + Sync {
    /// Place `item` at `at`, pickable first by `owner`.
    fn place(&self, item: DropItem, at: Position, owner: EntityId);
}

/// Lookup of other actors.
pub trait ActorDirectory: Send + Sync {
    /// Resolve an actor by id.
    fn participant(&self, id: EntityId) -> Option<Participant>;
}

/// Moves actors between maps.
pub trait Teleporter: Send + Sync {
    /// Move `entity` to `to` on another map.
    fn teleport(&self, entity: EntityId, to: Position);
}

/// Accepts items handed out by a party.
pub trait ItemReceiver: Send + Sync {
    /// Try to take an item; returns it back if there is no room.
    fn try_receive(&self, item: DropItem) -> Result<(), DropItem>;
}

// ============================================================================
// Simple Implementations
// ============================================================================

/// Fixed base stats.
#[derive(Debug, Clone, Default)]
pub struct BaseStats {
    values: AHashMap<AbilityType, i32>,
}

impl BaseStats {
    /// All stats zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a base value.
    #[must_use]
    pub fn with(mut self, ability: AbilityType, value: i32) -> Self {
        self.values.insert(ability, value);
        self
    }
}

impl StatsProvider for BaseStats {
    fn base(&self, ability: AbilityType) -> i32 {
        self.values.get(&ability).copied().unwrap_or(0)
    }
}

/// Drops nothing (players, summoned monsters).
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDrops;

impl DropGenerator for NoDrops {
    fn generate_drop(&self, _killer: &Participant) -> Vec<DropItem> {
        Vec::new()
    }
}

/// Constant speeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticSpeed {
    /// Base attack speed level.
    pub attack: i32,
    /// Base move speed level.
    pub movement: i32,
    /// Wielded weapon.
    pub weapon: Option<WeaponType>,
}

impl Default for StaticSpeed {
    fn default() -> Self {
        Self {
            attack: 5,
            movement: 5,
            weapon: None,
        }
    }
}

impl SpeedSource for StaticSpeed {
    fn base_attack_speed(&self) -> i32 {
        self.attack
    }

    fn base_move_speed(&self) -> i32 {
        self.movement
    }

    fn weapon(&self) -> Option<WeaponType> {
        self.weapon
    }
}
