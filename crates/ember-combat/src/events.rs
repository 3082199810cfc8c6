//! Outbound notifications for network/persistence collaborators.
//!
//! State transitions collect events while holding the actor lock and publish
//! them after the lock is released.

use crossbeam_channel::{unbounded, Receiver, Sender};
use ember_common::{BuffId, EntityId, Position, SkillId};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::buff::BuffView;
use crate::entity::EffectiveSpeed;

/// Amounts applied by one periodic tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TickEffect {
    /// Pools restored by a periodic heal
    Heal {
        /// HP restored
        hp: u32,
        /// MP restored
        mp: u32,
        /// SP restored
        sp: u32,
    },
    /// Pools drained by a periodic debuff
    Damage {
        /// HP removed
        hp: u32,
        /// MP removed
        mp: u32,
        /// SP removed
        sp: u32,
    },
}

/// Event types produced by the combat engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CombatEvent {
    /// A buff was added to the active partition, or refreshed in place
    BuffAdded {
        /// Owning entity
        entity: EntityId,
        /// Snapshot of the buff after the change
        buff: BuffView,
        /// True when an existing buff had its expiry refreshed
        refreshed: bool,
    },
    /// A buff was removed from the active partition
    BuffRemoved {
        /// Owning entity
        entity: EntityId,
        /// Removed buff
        buff_id: BuffId,
        /// Skill the buff was created from
        skill: SkillId,
    },
    /// Derived stats changed and should be recomputed/broadcast
    StatsChanged {
        /// Entity affected
        entity: EntityId,
    },
    /// Effective move/attack speed changed
    SpeedChanged {
        /// Entity affected
        entity: EntityId,
        /// Speed after the change
        speed: EffectiveSpeed,
    },
    /// Entity took damage
    Damaged {
        /// Entity affected
        entity: EntityId,
        /// Source entity (if any)
        source: Option<EntityId>,
        /// Damage applied
        amount: u32,
        /// HP left after the hit
        remaining_hp: u32,
    },
    /// Entity died
    Died {
        /// Entity that died
        entity: EntityId,
        /// Top damage contributor, if any
        killer: Option<EntityId>,
    },
    /// Entity came back to life
    Rebirthed {
        /// Entity reborn
        entity: EntityId,
        /// Where it was reborn
        position: Position,
    },
    /// Entity pools were restored to maximum
    FullRecovered {
        /// Entity affected
        entity: EntityId,
    },
    /// A periodic buff ticked
    PeriodicTick {
        /// Entity affected
        entity: EntityId,
        /// Ticking buff
        buff_id: BuffId,
        /// Skill the buff was created from
        skill: SkillId,
        /// What the tick did
        effect: TickEffect,
    },
}

impl CombatEvent {
    /// Returns the entity this event concerns.
    #[must_use]
    pub const fn entity(&self) -> EntityId {
        match self {
            Self::BuffAdded { entity, .. }
            | Self::BuffRemoved { entity, .. }
            | Self::StatsChanged { entity }
            | Self::SpeedChanged { entity, .. }
            | Self::Damaged { entity, .. }
            | Self::Died { entity, .. }
            | Self::Rebirthed { entity, .. }
            | Self::FullRecovered { entity }
            | Self::PeriodicTick { entity, .. } => *entity,
        }
    }

    /// Whether this event marks a death or a rebirth.
    ///
    /// Lifecycle events are never dropped by a full bus.
    #[must_use]
    pub const fn is_lifecycle(&self) -> bool {
        matches!(self, Self::Died { .. } | Self::Rebirthed { .. })
    }
}

/// Event bus for broadcasting combat events to collaborators.
///
/// The capacity bounds ordinary events only; lifecycle events
/// ([`CombatEvent::is_lifecycle`]) are always queued.
#[derive(Debug, Clone)]
pub struct EventBus {
    /// Sender for broadcasting events
    sender: Sender<CombatEvent>,
    /// Receiver for collecting events
    receiver: Receiver<CombatEvent>,
    /// Soft limit on pending events (None = unbounded)
    capacity: Option<usize>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(4096)
    }
}

impl EventBus {
    /// Creates a new event bus with the given capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = unbounded();
        Self {
            sender,
            receiver,
            capacity: Some(capacity),
        }
    }

    /// Creates an event bus that never drops events.
    #[must_use]
    pub fn unbounded() -> Self {
        let (sender, receiver) = unbounded();
        Self {
            sender,
            receiver,
            capacity: None,
        }
    }

    /// Publishes an event to the bus.
    ///
    /// Never blocks. If the bus is full an ordinary event is dropped;
    /// a lifecycle event is queued past the limit.
    pub fn publish(&self, event: CombatEvent) {
        let full = self
            .capacity
            .is_some_and(|capacity| self.sender.len() >= capacity);
        if full && !event.is_lifecycle() {
            warn!(entity = %event.entity(), "event bus full, dropping {event:?}");
            return;
        }
        // The bus holds its own receiver, so the channel never disconnects.
        let _ = self.sender.send(event);
    }

    /// Publishes a batch of events in order.
    pub fn publish_all(&self, events: impl IntoIterator<Item = CombatEvent>) {
        for event in events {
            self.publish(event);
        }
    }

    /// Drains all pending events.
    pub fn drain(&self) -> Vec<CombatEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            events.push(event);
        }
        events
    }

    /// Returns the number of pending events.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.receiver.len()
    }

    /// Returns the channel capacity.
    #[must_use]
    pub const fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Returns a receiver handle for a consumer thread.
    #[must_use]
    pub fn receiver(&self) -> Receiver<CombatEvent> {
        self.receiver.clone()
    }
}
