//! Killable entities: players and monsters with health, buffs, and death.
//!
//! A [`KillableEntity`] owns its buff stack, ability ledger, and damage
//! ledger. Everything that changes buff state runs under one per-entity
//! lock; notifications collected under the lock are published after it is
//! released.

use ahash::AHashMap;
use ember_common::{BuffId, CommonError, EntityId, MapId, Position, SkillId};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use tracing::{debug, error, trace};

use crate::ability::{AbilityLedger, AbilityType};
use crate::buff::{Buff, BuffPartition, BuffStack, BuffView, StackDecision};
use crate::collaborators::{
    BaseStats, DropGenerator, EntityClass, NoDrops, SpeedSource, StaticSpeed, StatsProvider,
};
use crate::damage::DamageLedger;
use crate::death::{LifeCell, LifeState};
use crate::effects::Outcome;
use crate::error::{CombatError, CombatResult};
use crate::events::CombatEvent;
use crate::health::HealthProvider;
use crate::scheduler::TaskHandle;
use crate::services::CombatServices;
use crate::skill::{EffectCategory, Element, PoolAmounts, SkillDefinition, WeaponType};

// ============================================================================
// Derived State
// ============================================================================

/// Effective speed levels after buffs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectiveSpeed {
    /// Attack speed level (0 = cannot attack)
    pub attack: i32,
    /// Move speed level (0 = cannot move)
    pub movement: i32,
}

/// Flags set by non-additive effect categories.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct EffectFlags {
    pub attack_element: Element,
    pub defence_element: Element,
    pub untouchable: bool,
    pub remove_attribute: bool,
}

/// Everything guarded by the per-entity lock.
#[derive(Debug, Default)]
pub(crate) struct CombatState {
    pub stack: BuffStack,
    pub ledger: AbilityLedger,
    pub flags: EffectFlags,
    /// Attack speed modifier per weapon type, most recent mastery wins.
    pub weapon_speeds: AHashMap<WeaponType, i32>,
}

// ============================================================================
// Builder
// ============================================================================

/// Assembles a [`KillableEntity`].
pub struct EntityBuilder {
    class: EntityClass,
    position: Position,
    health: Arc<dyn HealthProvider>,
    stats: Arc<dyn StatsProvider>,
    drops: Arc<dyn DropGenerator>,
    speed: Arc<dyn SpeedSource>,
    id: Option<EntityId>,
}

impl EntityBuilder {
    /// Start building an actor of `class` at `position`.
    #[must_use]
    pub fn new(class: EntityClass, position: Position, health: Arc<dyn HealthProvider>) -> Self {
        Self {
            class,
            position,
            health,
            stats: Arc::new(BaseStats::new()),
            drops: Arc::new(NoDrops),
            speed: Arc::new(StaticSpeed::default()),
            id: None,
        }
    }

    /// Set base stats.
    #[must_use]
    pub fn with_stats(mut self, stats: Arc<dyn StatsProvider>) -> Self {
        self.stats = stats;
        self
    }

    /// Set the loot policy.
    #[must_use]
    pub fn with_drops(mut self, drops: Arc<dyn DropGenerator>) -> Self {
        self.drops = drops;
        self
    }

    /// Set base speeds.
    #[must_use]
    pub fn with_speed(mut self, speed: Arc<dyn SpeedSource>) -> Self {
        self.speed = speed;
        self
    }

    /// Assign the identity up front.
    #[must_use]
    pub fn with_id(mut self, id: EntityId) -> Self {
        self.id = Some(id);
        self
    }

    /// Spawn the entity.
    pub fn spawn(self, services: Arc<CombatServices>) -> Arc<KillableEntity> {
        let id = OnceLock::new();
        if let Some(assigned) = self.id.filter(|id| id.is_valid()) {
            let _ = id.set(assigned);
        }
        Arc::new_cyclic(|weak| KillableEntity {
            this: weak.clone(),
            id,
            class: self.class,
            position: RwLock::new(self.position),
            health: self.health,
            stats: self.stats,
            drops: self.drops,
            speed: self.speed,
            services,
            state: Mutex::new(CombatState::default()),
            damage: DamageLedger::new(),
            life: LifeCell::new(),
            disposed: AtomicBool::new(false),
            regen: Mutex::new(None),
        })
    }
}

// ============================================================================
// Killable Entity
// ============================================================================

/// A world actor with health, buffs, and death semantics.
pub struct KillableEntity {
    /// Handed to scheduled callbacks so they never keep the actor alive.
    pub(crate) this: Weak<KillableEntity>,
    id: OnceLock<EntityId>,
    class: EntityClass,
    position: RwLock<Position>,
    pub(crate) health: Arc<dyn HealthProvider>,
    stats: Arc<dyn StatsProvider>,
    pub(crate) drops: Arc<dyn DropGenerator>,
    speed: Arc<dyn SpeedSource>,
    pub(crate) services: Arc<CombatServices>,
    pub(crate) state: Mutex<CombatState>,
    pub(crate) damage: DamageLedger,
    pub(crate) life: LifeCell,
    disposed: AtomicBool,
    regen: Mutex<Option<TaskHandle>>,
}

impl std::fmt::Debug for KillableEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KillableEntity")
            .field("id", &self.id())
            .field("class", &self.class)
            .field("life", &self.life.load())
            .finish_non_exhaustive()
    }
}

impl KillableEntity {
    // === Identity ===

    /// Entity identity, or [`EntityId::NULL`] before one is assigned.
    #[must_use]
    pub fn id(&self) -> EntityId {
        self.id.get().copied().unwrap_or(EntityId::NULL)
    }

    /// Assign the identity. It can be set only once.
    pub fn assign_id(&self, id: EntityId) -> CombatResult<()> {
        if !id.is_valid() {
            return Err(CommonError::NullIdentity.into());
        }
        self.id.set(id).map_err(|attempted| {
            CombatError::from(CommonError::IdentityAlreadyAssigned {
                current: self.id(),
                attempted,
            })
        })
    }

    /// Player or monster.
    #[must_use]
    pub const fn class(&self) -> EntityClass {
        self.class
    }

    /// Current position.
    #[must_use]
    pub fn position(&self) -> Position {
        *self.position.read()
    }

    pub(crate) fn set_position(&self, position: Position) {
        *self.position.write() = position;
    }

    /// Health pools.
    #[must_use]
    pub fn health(&self) -> &Arc<dyn HealthProvider> {
        &self.health
    }

    /// Current point in the death state machine.
    #[must_use]
    pub fn life_state(&self) -> LifeState {
        self.life.load()
    }

    /// Whether the entity is alive.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.life.load() == LifeState::Alive
    }

    /// Whether [`dispose`](Self::dispose) has run.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub(crate) fn ensure_not_disposed(&self) -> CombatResult<()> {
        if self.is_disposed() {
            Err(CombatError::Disposed(self.id()))
        } else {
            Ok(())
        }
    }

    /// Damage ledger of the current life.
    #[must_use]
    pub fn damage_ledger(&self) -> &DamageLedger {
        &self.damage
    }

    // === Buff Operations ===

    /// Apply a skill's buff, stacking with any buff of the same skill.
    ///
    /// Returns the buff in effect afterwards. A definition the engine cannot
    /// apply fails before anything changes.
    pub fn add_buff(
        &self,
        skill: Arc<SkillDefinition>,
        creator: Option<EntityId>,
    ) -> CombatResult<BuffView> {
        if let Err(e) = skill.validate() {
            error!(entity = %self.id(), skill = %skill.id, "cannot apply buff: {e}");
            return Err(e);
        }
        self.ensure_not_disposed()?;

        let lifetime = if skill.is_permanent() {
            self.services.config.permanent_duration()
        } else {
            skill.duration()
        };
        let partition = BuffPartition::of(&skill);

        let mut outcome = Outcome::default();
        let view = {
            let mut state = self.state.lock();
            // Dispose may have begun while this call waited for the lock.
            self.ensure_not_disposed()?;
            let expires_at = self.services.scheduler.now() + lifetime;
            let existing = state.stack.position_of_skill(partition, skill.id);
            let existing_level = existing
                .and_then(|index| state.stack.partition(partition).get(index))
                .map(|buff| buff.skill().level);

            let view = match (StackDecision::decide(existing_level, skill.level), existing) {
                (StackDecision::Ignore, Some(index)) => {
                    trace!(entity = %self.id(), skill = %skill.id, "lower level ignored");
                    state.stack.partition(partition)[index].view()
                },
                (StackDecision::Refresh, Some(index)) => {
                    self.refresh_buff(&mut state, partition, index, expires_at, &mut outcome)
                },
                (StackDecision::Replace, Some(index)) => {
                    debug!(entity = %self.id(), skill = %skill.id, level = skill.level, "replacing lower level");
                    self.remove_at(&mut state, partition, index, &mut outcome)?;
                    self.insert_buff(&mut state, skill, creator, expires_at, &mut outcome)?
                },
                _ => self.insert_buff(&mut state, skill, creator, expires_at, &mut outcome)?,
            };
            self.settle(&state, &mut outcome);
            view
        };
        self.publish(outcome);
        Ok(view)
    }

    /// Look up a skill in the catalogue and apply it.
    pub fn add_buff_by_id(
        &self,
        id: SkillId,
        level: u8,
        creator: Option<EntityId>,
    ) -> CombatResult<BuffView> {
        let skill = self
            .services
            .catalogue
            .find(id, level)
            .ok_or(CombatError::SkillNotFound { id, level })?;
        self.add_buff(skill, creator)
    }

    /// Remove a buff by identity. Returns false if it is not in effect.
    pub fn cancel_buff(&self, id: BuffId) -> CombatResult<bool> {
        let mut outcome = Outcome::default();
        let removed = {
            let mut state = self.state.lock();
            self.ensure_not_disposed()?;
            let removed = match state.stack.locate(id) {
                Some((partition, index)) => {
                    self.remove_at(&mut state, partition, index, &mut outcome)?;
                    true
                },
                None => false,
            };
            self.settle(&state, &mut outcome);
            removed
        };
        self.publish(outcome);
        Ok(removed)
    }

    /// Remove the active buff of a skill. Returns false if none is in effect.
    pub fn cancel_skill(&self, skill: SkillId) -> CombatResult<bool> {
        self.cancel_in(BuffPartition::Active, skill)
    }

    /// Remove the passive buff of a skill. Returns false if none is in effect.
    pub fn cancel_passive_skill(&self, skill: SkillId) -> CombatResult<bool> {
        self.cancel_in(BuffPartition::Passive, skill)
    }

    fn cancel_in(&self, partition: BuffPartition, skill: SkillId) -> CombatResult<bool> {
        let mut outcome = Outcome::default();
        let removed = {
            let mut state = self.state.lock();
            self.ensure_not_disposed()?;
            let removed = match state.stack.position_of_skill(partition, skill) {
                Some(index) => {
                    self.remove_at(&mut state, partition, index, &mut outcome)?;
                    true
                },
                None => false,
            };
            self.settle(&state, &mut outcome);
            removed
        };
        self.publish(outcome);
        Ok(removed)
    }

    /// Snapshot of the active partition.
    #[must_use]
    pub fn active_buffs(&self) -> Vec<BuffView> {
        self.views(BuffPartition::Active)
    }

    /// Snapshot of the passive partition.
    #[must_use]
    pub fn passive_buffs(&self) -> Vec<BuffView> {
        self.views(BuffPartition::Passive)
    }

    fn views(&self, partition: BuffPartition) -> Vec<BuffView> {
        self.state
            .lock()
            .stack
            .partition(partition)
            .iter()
            .map(Buff::view)
            .collect()
    }

    /// Active buff of a skill, if any.
    #[must_use]
    pub fn find_active(&self, skill: SkillId) -> Option<BuffView> {
        self.state
            .lock()
            .stack
            .find_skill(BuffPartition::Active, skill)
            .map(Buff::view)
    }

    // === Derived Statistics ===

    /// Net buff delta on an ability type.
    #[must_use]
    pub fn ledger_net(&self, ability: AbilityType) -> i64 {
        self.state.lock().ledger.net(ability)
    }

    /// Base value plus buff delta.
    #[must_use]
    pub fn ability_total(&self, ability: AbilityType) -> i64 {
        i64::from(self.stats.base(ability)) + self.ledger_net(ability)
    }

    /// Whether every buff delta has been relieved.
    #[must_use]
    pub fn ledger_is_balanced(&self) -> bool {
        self.state.lock().ledger.is_balanced()
    }

    /// Effective attack and move speed.
    #[must_use]
    pub fn effective_speed(&self) -> EffectiveSpeed {
        self.speed_of(&self.state.lock())
    }

    pub(crate) fn speed_of(&self, state: &CombatState) -> EffectiveSpeed {
        let mastery = self
            .speed
            .weapon()
            .and_then(|weapon| state.weapon_speeds.get(&weapon).copied())
            .unwrap_or(0);
        let attack = if state.stack.any_of(EffectCategory::PreventAttack) {
            0
        } else {
            clamp_level(
                i64::from(self.speed.base_attack_speed())
                    + state.ledger.net(AbilityType::AttackSpeed)
                    + i64::from(mastery),
            )
        };
        let movement = if state.stack.any_of(EffectCategory::Immobilize) {
            0
        } else {
            clamp_level(
                i64::from(self.speed.base_move_speed()) + state.ledger.net(AbilityType::MoveSpeed),
            )
        };
        EffectiveSpeed { attack, movement }
    }

    /// Attack speed modifier recorded by weapon mastery for a weapon type.
    #[must_use]
    pub fn weapon_speed_modifier(&self, weapon: WeaponType) -> Option<i32> {
        self.state.lock().weapon_speeds.get(&weapon).copied()
    }

    /// Whether the entity cannot be hit.
    #[must_use]
    pub fn is_untouchable(&self) -> bool {
        self.state.lock().flags.untouchable
    }

    /// Whether a stealth buff is in effect.
    #[must_use]
    pub fn is_stealth(&self) -> bool {
        self.state.lock().stack.any_of(EffectCategory::Stealth)
    }

    /// Element of outgoing attacks.
    #[must_use]
    pub fn attack_element(&self) -> Element {
        self.state.lock().flags.attack_element
    }

    /// Element used when defending; stripped by remove-attribute effects.
    #[must_use]
    pub fn defence_element(&self) -> Element {
        let flags = self.state.lock().flags;
        if flags.remove_attribute {
            Element::None
        } else {
            flags.defence_element
        }
    }

    // === Health ===

    /// Restore every pool to maximum without touching the death flag.
    pub fn full_recover(&self) -> CombatResult<()> {
        self.ensure_not_disposed()?;
        self.health.full_recover();
        self.services.events.publish(CombatEvent::FullRecovered { entity: self.id() });
        Ok(())
    }

    /// Start the ambient regeneration callback.
    ///
    /// Returns false when regeneration is disabled or already running.
    pub fn start_regeneration(&self) -> bool {
        let Some(interval) = self.services.config.regen_interval() else {
            return false;
        };
        let mut regen = self.regen.lock();
        if regen.is_some() || self.is_disposed() {
            return false;
        }

        let config = &self.services.config;
        let amounts = PoolAmounts::new(config.regen_hp, config.regen_mp, config.regen_sp);
        let weak = self.this.clone();
        *regen = Some(self.services.scheduler.schedule_repeating(
            interval,
            Arc::new(move || {
                if let Some(entity) = weak.upgrade() {
                    entity.regenerate(amounts);
                }
            }),
        ));
        true
    }

    /// Stop the ambient regeneration callback.
    pub fn stop_regeneration(&self) {
        if let Some(handle) = self.regen.lock().take() {
            handle.cancel();
        }
    }

    fn regenerate(&self, amounts: PoolAmounts) {
        if self.is_disposed() || !self.is_alive() {
            return;
        }
        self.health.recover(amounts);
    }

    // === Lifecycle ===

    /// Detach the entity from the world.
    ///
    /// Cancels every scheduled callback; later operations fail with
    /// [`CombatError::Disposed`] and late callbacks become no-ops.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.stop_regeneration();
        let mut buffs = {
            let mut state = self.state.lock();
            let buffs = state.stack.drain();
            state.ledger.clear();
            state.weapon_speeds.clear();
            state.flags = EffectFlags::default();
            buffs
        };
        for buff in &mut buffs {
            buff.cancel_tasks();
        }
        self.damage.clear();
        debug!(entity = %self.id(), buffs = buffs.len(), "entity disposed");
    }

    pub(crate) fn publish(&self, outcome: Outcome) {
        self.services.events.publish_all(outcome.events);
    }

    /// Map of the entity, for party filters.
    #[must_use]
    pub fn map(&self) -> MapId {
        self.position.read().map
    }
}

fn clamp_level(level: i64) -> i32 {
    i32::try_from(level.max(0)).unwrap_or(i32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CombatConfig;
    use crate::health::HealthPool;
    use crate::scheduler::ManualScheduler;

    fn spawn() -> Arc<KillableEntity> {
        let services = Arc::new(CombatServices::new(
            CombatConfig::default(),
            Arc::new(ManualScheduler::new()),
        ));
        EntityBuilder::new(
            EntityClass::Player,
            Position::new(MapId::new(1), 0.0, 0.0, 0.0),
            Arc::new(HealthPool::new(100, 100, 100)),
        )
        .spawn(services)
    }

    #[test]
    fn test_identity_assigned_once() {
        let entity = spawn();
        assert_eq!(entity.id(), EntityId::NULL);

        entity.assign_id(EntityId::new(5)).expect("first assignment");
        let err = entity
            .assign_id(EntityId::new(6))
            .expect_err("second assignment must fail");
        assert!(matches!(
            err,
            CombatError::Common(CommonError::IdentityAlreadyAssigned { .. })
        ));
        assert_eq!(entity.id(), EntityId::new(5));
    }

    #[test]
    fn test_null_identity_rejected() {
        let entity = spawn();
        assert!(matches!(
            entity.assign_id(EntityId::NULL),
            Err(CombatError::Common(CommonError::NullIdentity))
        ));
    }

    #[test]
    fn test_clamp_level() {
        assert_eq!(clamp_level(-4), 0);
        assert_eq!(clamp_level(7), 7);
        assert_eq!(clamp_level(i64::MAX), i32::MAX);
    }

    #[test]
    fn test_dispose_while_waiting_for_state_rejects_buff() {
        let scheduler = Arc::new(ManualScheduler::new());
        let services = Arc::new(CombatServices::new(
            CombatConfig::default(),
            scheduler.clone(),
        ));
        let entity = EntityBuilder::new(
            EntityClass::Player,
            Position::new(MapId::new(1), 0.0, 0.0, 0.0),
            Arc::new(HealthPool::new(100, 100, 100)),
        )
        .spawn(services);
        let skill = Arc::new(
            SkillDefinition::new(SkillId::new(4), 1, EffectCategory::StatBuff)
                .with_ability(AbilityType::Strength, 5)
                .with_duration(30),
        );
        entity
            .add_buff(Arc::clone(&skill), None)
            .expect("buff before dispose");

        let held = entity.state.lock();
        let (added, cancelled) = std::thread::scope(|scope| {
            let adder = scope.spawn(|| entity.add_buff(Arc::clone(&skill), None));
            let canceller = scope.spawn(|| entity.cancel_skill(SkillId::new(4)));
            std::thread::sleep(std::time::Duration::from_millis(20));
            let disposer = scope.spawn(|| entity.dispose());
            while !entity.is_disposed() {
                std::thread::yield_now();
            }
            drop(held);
            disposer.join().expect("dispose thread");
            (
                adder.join().expect("add thread"),
                canceller.join().expect("cancel thread"),
            )
        });

        assert!(matches!(added, Err(CombatError::Disposed(_))));
        assert!(matches!(cancelled, Err(CombatError::Disposed(_))));
        assert!(entity.active_buffs().is_empty());
        assert!(entity.ledger_is_balanced());
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[test]
    fn test_disposed_entity_rejects_buffs() {
        let entity = spawn();
        entity.dispose();
        let skill = Arc::new(SkillDefinition::new(
            SkillId::new(1),
            1,
            EffectCategory::StatBuff,
        ));
        assert!(matches!(
            entity.add_buff(skill, None),
            Err(CombatError::Disposed(_))
        ));
        assert!(entity.is_disposed());
    }
}
