//! Shared services injected into every killable entity.

use ember_common::{EntityId, IdAllocator, Position};
use std::sync::Arc;
use tracing::trace;

use crate::collaborators::{
    ActorDirectory, DropItem, LootSink, Participant, QuestTracker, Teleporter,
};
use crate::config::CombatConfig;
use crate::events::EventBus;
use crate::scheduler::Scheduler;
use crate::skill::{SkillCatalogue, StaticCatalogue};

/// Everything an entity reaches outside itself.
///
/// One instance is typically shared by all actors of a world.
#[derive(Clone)]
pub struct CombatServices {
    /// Engine configuration.
    pub config: CombatConfig,
    /// Timer service for expiry, periodic ticks, and regeneration.
    pub scheduler: Arc<dyn Scheduler>,
    /// Outbound notifications.
    pub events: EventBus,
    /// Buff id counter shared by every actor.
    pub buff_ids: IdAllocator,
    /// Skill definitions.
    pub catalogue: Arc<dyn SkillCatalogue>,
    /// Lookup of killers and party members.
    pub directory: Arc<dyn ActorDirectory>,
    /// Ground item placement.
    pub loot: Arc<dyn LootSink>,
    /// Kill quest progress.
    pub quests: Arc<dyn QuestTracker>,
    /// Cross-map movement.
    pub teleporter: Arc<dyn Teleporter>,
}

impl std::fmt::Debug for CombatServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CombatServices")
            .field("config", &self.config)
            .field("events", &self.events)
            .field("next_buff_id", &self.buff_ids.peek())
            .finish_non_exhaustive()
    }
}

impl CombatServices {
    /// Services with an empty catalogue and no outside world attached.
    #[must_use]
    pub fn new(config: CombatConfig, scheduler: Arc<dyn Scheduler>) -> Self {
        let detached = Arc::new(Detached);
        Self {
            events: EventBus::new(config.event_capacity),
            config,
            scheduler,
            buff_ids: IdAllocator::new(),
            catalogue: Arc::new(StaticCatalogue::new()),
            directory: detached.clone(),
            loot: detached.clone(),
            quests: detached.clone(),
            teleporter: detached,
        }
    }

    /// Use a specific event bus.
    #[must_use]
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    /// Share a buff id counter.
    #[must_use]
    pub fn with_buff_ids(mut self, buff_ids: IdAllocator) -> Self {
        self.buff_ids = buff_ids;
        self
    }

    /// Set the skill catalogue.
    #[must_use]
    pub fn with_catalogue(mut self, catalogue: Arc<dyn SkillCatalogue>) -> Self {
        self.catalogue = catalogue;
        self
    }

    /// Set the actor directory.
    #[must_use]
    pub fn with_directory(mut self, directory: Arc<dyn ActorDirectory>) -> Self {
        self.directory = directory;
        self
    }

    /// Set the loot sink.
    #[must_use]
    pub fn with_loot(mut self, loot: Arc<dyn LootSink>) -> Self {
        self.loot = loot;
        self
    }

    /// Set the quest tracker.
    #[must_use]
    pub fn with_quests(mut self, quests: Arc<dyn QuestTracker>) -> Self {
        self.quests = quests;
        self
    }

    /// Set the teleporter.
    #[must_use]
    pub fn with_teleporter(mut self, teleporter: Arc<dyn Teleporter>) -> Self {
        self.teleporter = teleporter;
        self
    }
}

/// Stand-in for an unattached world: knows no actors, discards loot.
#[derive(Debug, Clone, Copy, Default)]
pub struct Detached;

impl ActorDirectory for Detached {
    fn participant(&self, _id: EntityId) -> Option<Participant> {
        None
    }
}

impl LootSink for Detached {
    fn place(&self, item: DropItem, at: Position, owner: EntityId) {
        trace!(?item, ?at, %owner, "no loot sink attached, item discarded");
    }
}

impl QuestTracker for Detached {
    fn record_kill(&self, _player: EntityId, _mob_id: u16) {}
}

impl Teleporter for Detached {
    fn teleport(&self, entity: EntityId, to: Position) {
        trace!(%entity, ?to, "no teleporter attached");
    }
}
