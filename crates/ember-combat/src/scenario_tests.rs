//! Cross-component scenarios for the combat engine.
//!
//! These tests drive whole entities through buff stacking, timed effects,
//! damage, and death, using a virtual clock so timing is deterministic.

#![cfg(test)]

use ember_common::{CommonError, EntityId, IdAllocator, ItemTypeId, MapId, PartyId, Position, SkillId};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use crate::prelude::*;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Harness
// ============================================================================

/// Records everything the engine hands to the outside world.
#[derive(Default)]
struct World {
    participants: Mutex<Vec<Participant>>,
    placed: Mutex<Vec<(DropItem, Position, EntityId)>>,
    kills: Mutex<Vec<(EntityId, u16)>>,
    teleports: Mutex<Vec<(EntityId, Position)>>,
}

impl World {
    fn register(&self, participant: Participant) {
        self.participants.lock().push(participant);
    }
}

impl ActorDirectory for World {
    fn participant(&self, id: EntityId) -> Option<Participant> {
        self.participants
            .lock()
            .iter()
            .find(|participant| participant.id == id)
            .cloned()
    }
}

impl LootSink for World {
    fn place(&self, item: DropItem, at: Position, owner: EntityId) {
        self.placed.lock().push((item, at, owner));
    }
}

impl QuestTracker for World {
    fn record_kill(&self, player: EntityId, mob_id: u16) {
        self.kills.lock().push((player, mob_id));
    }
}

impl Teleporter for World {
    fn teleport(&self, entity: EntityId, to: Position) {
        self.teleports.lock().push((entity, to));
    }
}

/// Fixed loot table.
struct Table(Vec<DropItem>);

impl DropGenerator for Table {
    fn generate_drop(&self, _killer: &Participant) -> Vec<DropItem> {
        self.0.clone()
    }
}

#[derive(Default)]
struct Bag {
    items: Mutex<Vec<DropItem>>,
}

impl ItemReceiver for Bag {
    fn try_receive(&self, item: DropItem) -> Result<(), DropItem> {
        self.items.lock().push(item);
        Ok(())
    }
}

struct Harness {
    scheduler: Arc<ManualScheduler>,
    services: Arc<CombatServices>,
    world: Arc<World>,
}

fn harness() -> Harness {
    harness_with(CombatConfig {
        regen_interval_secs: 0.0,
        ..CombatConfig::default()
    })
}

fn harness_with(config: CombatConfig) -> Harness {
    init_tracing();
    let scheduler = Arc::new(ManualScheduler::new());
    let world = Arc::new(World::default());
    let services = CombatServices::new(config, scheduler.clone())
        .with_events(EventBus::unbounded())
        .with_directory(world.clone())
        .with_loot(world.clone())
        .with_quests(world.clone())
        .with_teleporter(world.clone());
    Harness {
        scheduler,
        services: Arc::new(services),
        world,
    }
}

fn map(raw: u16) -> Position {
    Position::new(MapId::new(raw), 10.0, 0.0, 10.0)
}

impl Harness {
    fn spawn(&self, builder: EntityBuilder) -> Arc<KillableEntity> {
        builder.spawn(Arc::clone(&self.services))
    }

    fn player(&self, raw: u32, pool: Arc<HealthPool>) -> Arc<KillableEntity> {
        self.spawn(
            EntityBuilder::new(EntityClass::Player, map(1), pool).with_id(EntityId::new(raw)),
        )
    }

    fn monster(
        &self,
        raw: u32,
        mob_id: u16,
        max_hp: u32,
        drops: Vec<DropItem>,
    ) -> Arc<KillableEntity> {
        self.spawn(
            EntityBuilder::new(
                EntityClass::Monster { mob_id },
                map(1),
                Arc::new(HealthPool::new(max_hp, 0, 0)),
            )
            .with_id(EntityId::new(raw))
            .with_drops(Arc::new(Table(drops))),
        )
    }

    fn register_player(&self, raw: u32, map_raw: u16, party: Option<Arc<SharedParty>>) {
        self.world.register(Participant {
            id: EntityId::new(raw),
            class: EntityClass::Player,
            map: MapId::new(map_raw),
            party: party.map(|party| party as Arc<dyn Party>),
        });
    }

    fn events(&self) -> Vec<CombatEvent> {
        self.services.events.drain()
    }
}

fn pool(max_hp: u32) -> Arc<HealthPool> {
    Arc::new(HealthPool::new(max_hp, 100, 100))
}

fn strength(id: u16, level: u8, value: i32) -> Arc<SkillDefinition> {
    Arc::new(
        SkillDefinition::new(SkillId::new(id), level, EffectCategory::StatBuff)
            .with_ability(AbilityType::Strength, value)
            .with_duration(30),
    )
}

fn skill(id: u16, category: EffectCategory) -> SkillDefinition {
    SkillDefinition::new(SkillId::new(id), 1, category).with_duration(60)
}

fn item(raw: u32) -> DropItem {
    DropItem::new(ItemTypeId::new(raw), 1)
}

fn added(events: &[CombatEvent]) -> Vec<bool> {
    events
        .iter()
        .filter_map(|event| match event {
            CombatEvent::BuffAdded { refreshed, .. } => Some(*refreshed),
            _ => None,
        })
        .collect()
}

// ============================================================================
// Stacking
// ============================================================================

mod stacking_tests {
    use super::*;

    #[test]
    fn lower_level_leaves_higher_in_effect() {
        let h = harness();
        let entity = h.player(1, pool(100));

        let first = entity.add_buff(strength(5, 2, 20), None).expect("level 2");
        let kept = entity.add_buff(strength(5, 1, 10), None).expect("level 1");

        assert_eq!(kept, first);
        assert_eq!(entity.ledger_net(AbilityType::Strength), 20);
        assert_eq!(entity.active_buffs().len(), 1);
        assert_eq!(entity.active_buffs()[0].level, 2);
    }

    #[test]
    fn higher_level_replaces_lower() {
        let h = harness();
        let entity = h.player(1, pool(100));

        let old = entity.add_buff(strength(5, 1, 10), None).expect("level 1");
        let new = entity.add_buff(strength(5, 2, 25), None).expect("level 2");

        assert_ne!(old.id, new.id);
        assert_eq!(entity.ledger_net(AbilityType::Strength), 25);
        let active = entity.active_buffs();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].level, 2);

        let events = h.events();
        assert!(events.iter().any(|event| matches!(
            event,
            CombatEvent::BuffRemoved { buff_id, .. } if *buff_id == old.id
        )));
    }

    #[test]
    fn same_level_refreshes_expiry_without_summing() {
        let h = harness();
        let entity = h.player(1, pool(100));

        let first = entity.add_buff(strength(5, 1, 10), None).expect("first");
        assert_eq!(first.expires_at, Duration::from_secs(30));

        h.scheduler.advance(Duration::from_secs(10));
        let second = entity.add_buff(strength(5, 1, 10), None).expect("second");
        assert_eq!(second.id, first.id);
        assert_eq!(second.expires_at, Duration::from_secs(40));
        assert_eq!(entity.ledger_net(AbilityType::Strength), 10);
        assert_eq!(added(&h.events()), vec![false, true]);

        // The first expiry was cancelled by the refresh.
        h.scheduler.advance(Duration::from_secs(25));
        assert_eq!(entity.active_buffs().len(), 1);

        h.scheduler.advance(Duration::from_secs(10));
        assert!(entity.active_buffs().is_empty());
        assert!(entity.ledger_is_balanced());
        assert!(h
            .events()
            .iter()
            .any(|event| matches!(event, CombatEvent::BuffRemoved { .. })));
    }

    #[test]
    fn passive_buffs_never_notify() {
        let h = harness();
        let entity = h.player(1, pool(100));
        let racial = Arc::new(
            SkillDefinition::new(SkillId::new(90), 1, EffectCategory::PassiveDefence)
                .with_ability(AbilityType::PhysicalDefense, 12)
                .passive(),
        );

        entity.add_buff(Arc::clone(&racial), None).expect("passive");
        entity.add_buff(racial, None).expect("passive again");

        assert!(added(&h.events()).is_empty());
        assert_eq!(entity.passive_buffs().len(), 1);
        assert!(entity.active_buffs().is_empty());
        assert_eq!(entity.ledger_net(AbilityType::PhysicalDefense), 12);

        assert!(entity.cancel_passive_skill(SkillId::new(90)).expect("cancel"));
        assert!(entity.ledger_is_balanced());
        assert!(!h
            .events()
            .iter()
            .any(|event| matches!(event, CombatEvent::BuffRemoved { .. })));
    }

    #[test]
    fn permanent_buff_never_expires() {
        let h = harness();
        let entity = h.player(1, pool(100));
        let aura = Arc::new(
            SkillDefinition::new(SkillId::new(8), 1, EffectCategory::StatBuff)
                .with_ability(AbilityType::Luck, 3),
        );

        let view = entity.add_buff(aura, None).expect("permanent");
        assert_eq!(
            view.expires_at,
            h.services.config.permanent_duration()
        );
        h.scheduler.advance(Duration::from_secs(3600));
        assert_eq!(entity.active_buffs().len(), 1);
        assert_eq!(h.scheduler.pending_count(), 0);
    }

    #[test]
    fn subtracting_debuff_round_trips() {
        let h = harness();
        let entity = h.player(1, pool(100));
        let curse = Arc::new(
            skill(40, EffectCategory::SubtractingDebuff)
                .with_ability(AbilityType::Dexterity, 15)
                .with_ability(AbilityType::MoveSpeed, 2),
        );

        entity.add_buff(curse, None).expect("curse");
        assert_eq!(entity.ledger_net(AbilityType::Dexterity), -15);
        assert_eq!(entity.effective_speed().movement, 3);

        entity.cancel_skill(SkillId::new(40)).expect("cancel");
        assert!(entity.ledger_is_balanced());
        assert_eq!(entity.effective_speed().movement, 5);
    }

    #[test]
    fn stat_changes_emit_notifications() {
        let h = harness();
        let entity = h.player(1, pool(100));
        let haste = Arc::new(skill(41, EffectCategory::StatBuff).with_ability(AbilityType::MoveSpeed, 2));

        entity.add_buff(haste, None).expect("haste");
        let events = h.events();
        assert!(events.iter().any(|event| matches!(
            event,
            CombatEvent::SpeedChanged { speed, .. } if speed.movement == 7
        )));
        assert!(!events
            .iter()
            .any(|event| matches!(event, CombatEvent::StatsChanged { .. })));
    }
}

// ============================================================================
// Effect Categories
// ============================================================================

mod category_tests {
    use super::*;

    #[test]
    fn stealth_cancels_sprinter() {
        let h = harness();
        let entity = h.player(1, pool(100));
        let sprint_id = h.services.config.sprinter_skill();
        let sprint = Arc::new(
            SkillDefinition::new(sprint_id, 1, EffectCategory::StatBuff)
                .with_ability(AbilityType::MoveSpeed, 3)
                .with_duration(20),
        );

        entity.add_buff(sprint, None).expect("sprint");
        assert_eq!(entity.effective_speed().movement, 8);

        entity
            .add_buff(Arc::new(skill(77, EffectCategory::Stealth)), None)
            .expect("stealth");
        assert!(entity.is_stealth());
        assert!(entity.find_active(sprint_id).is_none());
        assert_eq!(entity.effective_speed().movement, 5);
    }

    #[test]
    fn elemental_attack_is_exclusive() {
        let h = harness();
        let entity = h.player(1, pool(100));
        let fire = Arc::new(skill(20, EffectCategory::ElementalAttack).with_element(Element::Fire));
        let water = Arc::new(skill(21, EffectCategory::ElementalAttack).with_element(Element::Water));

        entity.add_buff(fire, None).expect("fire");
        assert_eq!(entity.attack_element(), Element::Fire);

        entity.add_buff(water, None).expect("water");
        assert_eq!(entity.attack_element(), Element::Water);
        let active = entity.active_buffs();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].skill, SkillId::new(21));

        entity.cancel_skill(SkillId::new(21)).expect("cancel");
        assert_eq!(entity.attack_element(), Element::None);
    }

    #[test]
    fn remove_attribute_strips_defence_element() {
        let h = harness();
        let entity = h.player(1, pool(100));
        let shield =
            Arc::new(skill(30, EffectCategory::ElementalProtection).with_element(Element::Earth));

        entity.add_buff(shield, None).expect("shield");
        assert_eq!(entity.defence_element(), Element::Earth);

        entity
            .add_buff(Arc::new(skill(31, EffectCategory::RemoveAttribute)), None)
            .expect("strip");
        assert_eq!(entity.defence_element(), Element::None);

        entity.cancel_skill(SkillId::new(31)).expect("cancel");
        assert_eq!(entity.defence_element(), Element::Earth);
    }

    #[test]
    fn untouchable_recomputed_from_remaining_sources() {
        let h = harness();
        let entity = h.player(1, pool(100));
        entity
            .add_buff(Arc::new(skill(50, EffectCategory::Untouchable)), None)
            .expect("first");
        entity
            .add_buff(Arc::new(skill(51, EffectCategory::Untouchable)), None)
            .expect("second");

        entity.cancel_skill(SkillId::new(50)).expect("cancel first");
        assert!(entity.is_untouchable());

        entity.cancel_skill(SkillId::new(51)).expect("cancel second");
        assert!(!entity.is_untouchable());
    }

    #[test]
    fn weapon_mastery_most_recent_wins() {
        let h = harness();
        let sword = WeaponType(3);
        let entity = h.spawn(
            EntityBuilder::new(EntityClass::Player, map(1), pool(100))
                .with_id(EntityId::new(1))
                .with_speed(Arc::new(StaticSpeed {
                    weapon: Some(sword),
                    ..StaticSpeed::default()
                })),
        );

        let basic = Arc::new(skill(60, EffectCategory::WeaponMastery).with_weapon_mastery(vec![sword], 2));
        let expert = Arc::new(skill(61, EffectCategory::WeaponMastery).with_weapon_mastery(vec![sword], 5));
        entity.add_buff(basic, None).expect("basic");
        entity.add_buff(expert, None).expect("expert");

        assert_eq!(entity.weapon_speed_modifier(sword), Some(5));
        assert_eq!(entity.effective_speed().attack, 10);

        entity.cancel_skill(SkillId::new(61)).expect("cancel");
        assert_eq!(entity.weapon_speed_modifier(sword), None);
        assert_eq!(entity.effective_speed().attack, 5);
    }

    #[test]
    fn immobilize_and_prevent_attack_zero_speeds() {
        let h = harness();
        let entity = h.player(1, pool(100));

        entity
            .add_buff(Arc::new(skill(70, EffectCategory::Immobilize)), None)
            .expect("root");
        entity
            .add_buff(Arc::new(skill(71, EffectCategory::PreventAttack)), None)
            .expect("disarm");
        assert_eq!(entity.effective_speed(), EffectiveSpeed::default());
        assert!(h.events().iter().any(|event| matches!(
            event,
            CombatEvent::SpeedChanged { speed, .. } if speed.movement == 0
        )));

        entity.cancel_skill(SkillId::new(70)).expect("cancel");
        assert_eq!(entity.effective_speed().movement, 5);
        assert_eq!(entity.effective_speed().attack, 0);
    }

    #[test]
    fn unknown_category_leaves_no_trace() {
        let h = harness();
        let entity = h.player(1, pool(100));
        let broken = Arc::new(
            SkillDefinition::new(SkillId::new(99), 1, EffectCategory::from(250))
                .with_ability(AbilityType::Strength, 5),
        );

        let err = entity.add_buff(broken, None).expect_err("must fail");
        assert!(matches!(err, CombatError::UnimplementedBuffCategory(250)));
        assert!(err.is_fatal());
        assert!(entity.active_buffs().is_empty());
        assert!(entity.ledger_is_balanced());
        assert!(h.events().is_empty());
    }

    #[test]
    fn unknown_ability_leaves_no_partial_state() {
        let h = harness();
        let entity = h.player(1, pool(100));
        let broken = Arc::new(
            skill(98, EffectCategory::StatBuff)
                .with_ability(AbilityType::Strength, 5)
                .with_ability(AbilityType::from(900), 5),
        );

        assert!(matches!(
            entity.add_buff(broken, None),
            Err(CombatError::UnimplementedAbility(900))
        ));
        assert!(entity.ledger_is_balanced());
        assert!(h.events().is_empty());
    }

    #[test]
    fn add_by_id_uses_catalogue() {
        let scheduler = Arc::new(ManualScheduler::new());
        let mut catalogue = StaticCatalogue::new();
        catalogue.insert(
            SkillDefinition::new(SkillId::new(12), 3, EffectCategory::StatBuff)
                .with_ability(AbilityType::Wisdom, 4),
        );
        let services = Arc::new(
            CombatServices::new(CombatConfig::default(), scheduler)
                .with_catalogue(Arc::new(catalogue)),
        );
        let entity = EntityBuilder::new(EntityClass::Player, map(1), pool(100)).spawn(services);

        entity
            .add_buff_by_id(SkillId::new(12), 3, None)
            .expect("known skill");
        assert_eq!(entity.ledger_net(AbilityType::Wisdom), 4);
        assert!(matches!(
            entity.add_buff_by_id(SkillId::new(12), 4, None),
            Err(CombatError::SkillNotFound { level: 4, .. })
        ));
    }
}

// ============================================================================
// Periodic Effects
// ============================================================================

mod periodic_tests {
    use super::*;

    #[test]
    fn percent_debuff_uses_current_hp() {
        let h = harness();
        let health = pool(1000);
        let entity = h.player(1, Arc::clone(&health));
        let poison = Arc::new(
            skill(11, EffectCategory::PeriodicDebuff)
                .with_damage(PoolAmounts::new(10, 0, 0))
                .percent_damage()
                .with_repeat(1.0),
        );

        entity.add_buff(poison, Some(EntityId::new(2))).expect("poison");
        health.set_current(400, 100, 100);
        h.scheduler.advance(Duration::from_secs(1));

        assert_eq!(health.current_hp(), 360);
        assert!(h.events().iter().any(|event| matches!(
            event,
            CombatEvent::PeriodicTick {
                effect: TickEffect::Damage { hp: 40, .. },
                ..
            }
        )));
        assert_eq!(entity.damage_ledger().total_for(EntityId::new(2)), 40);
    }

    #[test]
    fn heal_ticks_every_three_seconds() {
        let h = harness();
        let health = pool(100);
        health.set_current(50, 100, 100);
        let entity = h.player(1, Arc::clone(&health));
        let regen = Arc::new(skill(12, EffectCategory::PeriodicHeal).with_heal(PoolAmounts::new(10, 0, 0)));

        entity.add_buff(regen, None).expect("heal over time");
        h.scheduler.advance(Duration::from_secs(2));
        assert_eq!(health.current_hp(), 50);
        h.scheduler.advance(Duration::from_secs(4));
        assert_eq!(health.current_hp(), 70);
    }

    #[test]
    fn debuff_default_interval() {
        let h = harness();
        let health = pool(100);
        let entity = h.player(1, Arc::clone(&health));
        let bleed = Arc::new(skill(13, EffectCategory::PeriodicDebuff).with_damage(PoolAmounts::new(5, 0, 0)));

        entity.add_buff(bleed, None).expect("bleed");
        h.scheduler.advance(Duration::from_secs(3));
        // Ticks at 1.2 s and 2.4 s.
        assert_eq!(health.current_hp(), 90);
    }

    #[test]
    fn unusable_interval_keeps_lower_level_ticking() {
        let h = harness();
        let health = pool(100);
        let entity = h.player(1, Arc::clone(&health));
        let bleed = Arc::new(skill(13, EffectCategory::PeriodicDebuff).with_damage(PoolAmounts::new(5, 0, 0)));
        let broken = Arc::new(
            SkillDefinition::new(SkillId::new(13), 2, EffectCategory::PeriodicDebuff)
                .with_damage(PoolAmounts::new(50, 0, 0))
                .with_duration(60)
                .with_repeat(f32::INFINITY),
        );

        let kept = entity.add_buff(bleed, None).expect("level 1");
        assert!(matches!(
            entity.add_buff(broken, None),
            Err(CombatError::InvalidRepeatInterval { .. })
        ));

        let active = entity.active_buffs();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, kept.id);
        assert_eq!(active[0].level, 1);
        h.scheduler.advance(Duration::from_secs(3));
        assert_eq!(health.current_hp(), 90);
    }

    #[test]
    fn removed_buff_stops_ticking() {
        let h = harness();
        let health = pool(100);
        let entity = h.player(1, Arc::clone(&health));
        let bleed = Arc::new(
            skill(13, EffectCategory::PeriodicDebuff)
                .with_damage(PoolAmounts::new(5, 0, 0))
                .with_repeat(1.0),
        );

        let view = entity.add_buff(bleed, None).expect("bleed");
        h.scheduler.advance(Duration::from_secs(2));
        assert!(entity.cancel_buff(view.id).expect("cancel"));
        assert!(!entity.cancel_buff(view.id).expect("second cancel is a no-op"));
        h.scheduler.advance(Duration::from_secs(5));

        assert_eq!(health.current_hp(), 90);
        assert_eq!(h.scheduler.pending_count(), 0);
    }

    #[test]
    fn periodic_damage_kill_credits_creator() {
        let h = harness();
        h.register_player(2, 1, None);
        let monster = h.monster(10, 7, 30, Vec::new());
        let burn = Arc::new(
            skill(14, EffectCategory::PeriodicDebuff)
                .with_damage(PoolAmounts::new(10, 0, 0))
                .with_repeat(1.0),
        );

        monster.add_buff(burn, Some(EntityId::new(2))).expect("burn");
        h.scheduler.advance(Duration::from_secs(5));

        assert_eq!(monster.life_state(), LifeState::Dead);
        let deaths: Vec<_> = h
            .events()
            .into_iter()
            .filter(|event| matches!(event, CombatEvent::Died { .. }))
            .collect();
        assert_eq!(
            deaths,
            vec![CombatEvent::Died {
                entity: EntityId::new(10),
                killer: Some(EntityId::new(2)),
            }]
        );
        assert_eq!(*h.world.kills.lock(), vec![(EntityId::new(2), 7)]);
    }

    #[test]
    fn regeneration_suspended_while_dead() {
        let h = harness_with(CombatConfig {
            regen_interval_secs: 10.0,
            regen_hp: 5,
            ..CombatConfig::default()
        });
        let health = pool(100);
        health.set_current(50, 100, 100);
        let entity = h.player(1, Arc::clone(&health));

        assert!(entity.start_regeneration());
        assert!(!entity.start_regeneration());
        h.scheduler.advance(Duration::from_secs(10));
        assert_eq!(health.current_hp(), 55);

        entity.resolve_death().expect("die");
        health.set_current(0, 0, 0);
        h.scheduler.advance(Duration::from_secs(30));
        assert_eq!(health.current_hp(), 0);
    }
}

// ============================================================================
// Death Resolution
// ============================================================================

mod death_tests {
    use super::*;

    #[test]
    fn top_contributor_gets_the_kill() {
        let h = harness();
        let monster = h.monster(10, 7, 130, Vec::new());
        let (a, b) = (EntityId::new(1), EntityId::new(2));

        monster.receive_damage(Some(a), 50).expect("hit a");
        let outcome = monster.receive_damage(Some(b), 80).expect("hit b");

        let report = outcome.death.expect("killing blow");
        assert_eq!(report.killer, Some(b));
        assert!(monster.health().is_dead());
        assert!(h.events().contains(&CombatEvent::Died {
            entity: EntityId::new(10),
            killer: Some(b),
        }));
    }

    #[test]
    fn zero_damage_source_gets_no_kill() {
        let h = harness();
        let entity = h.player(1, pool(100));

        let outcome = entity.receive_damage(Some(EntityId::new(7)), 0).expect("harmless hit");
        assert_eq!(outcome.dealt, 0);
        assert!(entity.damage_ledger().is_empty());

        let report = entity.resolve_death().expect("death");
        assert_eq!(report.killer, None);
        assert!(h.events().contains(&CombatEvent::Died {
            entity: EntityId::new(1),
            killer: None,
        }));
    }

    #[test]
    fn death_survives_a_full_event_bus() {
        init_tracing();
        let config = CombatConfig {
            event_capacity: 16,
            regen_interval_secs: 0.0,
            ..CombatConfig::default()
        };
        let services = Arc::new(CombatServices::new(config, Arc::new(ManualScheduler::new())));
        let monster = EntityBuilder::new(
            EntityClass::Monster { mob_id: 7 },
            map(1),
            Arc::new(HealthPool::new(100, 0, 0)),
        )
        .with_id(EntityId::new(10))
        .spawn(Arc::clone(&services));
        let attacker = EntityId::new(1);

        for _ in 0..20 {
            monster.receive_damage(Some(attacker), 1).expect("hit");
        }
        let outcome = monster.receive_damage(Some(attacker), 100).expect("killing blow");
        assert!(outcome.death.is_some());

        let events = services.events.drain();
        let damaged = events
            .iter()
            .filter(|event| matches!(event, CombatEvent::Damaged { .. }))
            .count();
        assert!(damaged <= 16);
        assert!(events.contains(&CombatEvent::Died {
            entity: EntityId::new(10),
            killer: Some(attacker),
        }));
    }

    #[test]
    fn death_clears_damage_for_next_life() {
        let h = harness();
        let health = pool(100);
        let entity = h.player(1, Arc::clone(&health));

        entity.receive_damage(Some(EntityId::new(5)), 100).expect("kill");
        assert!(entity.damage_ledger().is_empty());
        assert!(matches!(
            entity.receive_damage(Some(EntityId::new(5)), 1),
            Err(CombatError::AlreadyDead(_))
        ));
        assert!(matches!(
            entity.resolve_death(),
            Err(CombatError::AlreadyDead(_))
        ));

        entity.rebirth(MapId::new(1), 0.0, 0.0, 0.0).expect("rebirth");
        assert_eq!(health.current_hp(), 100);
        entity.receive_damage(Some(EntityId::new(6)), 10).expect("new life");
        assert_eq!(entity.damage_ledger().total_for(EntityId::new(5)), 0);
        assert_eq!(
            entity.damage_ledger().resolve_top_contributor(),
            Some(EntityId::new(6))
        );
    }

    #[test]
    fn party_drop_gives_each_member_one_item() {
        let h = harness();
        let party = Arc::new(SharedParty::new(PartyId::new(1)));
        let (bag_a, bag_b) = (Arc::new(Bag::default()), Arc::new(Bag::default()));
        party.join(EntityId::new(1), MapId::new(1), bag_a.clone());
        party.join(EntityId::new(2), MapId::new(1), bag_b.clone());
        h.register_player(1, 1, Some(Arc::clone(&party)));

        let monster = h.monster(10, 7, 50, vec![item(1), item(2), item(3)]);
        let report = monster
            .receive_damage(Some(EntityId::new(1)), 50)
            .expect("kill")
            .death
            .expect("died");

        assert_eq!(bag_a.items.lock().len(), 1);
        assert_eq!(bag_b.items.lock().len(), 1);
        assert_eq!(report.distributed, 2);
        assert_eq!(report.placed, vec![item(3)]);
        assert_eq!(
            *h.world.placed.lock(),
            vec![(item(3), monster.position(), EntityId::new(1))]
        );
    }

    #[test]
    fn solo_killer_gets_everything_on_the_ground() {
        let h = harness();
        h.register_player(1, 1, None);
        let monster = h.monster(10, 7, 50, vec![item(1), item(2)]);

        monster.receive_damage(Some(EntityId::new(1)), 60).expect("kill");

        let placed = h.world.placed.lock();
        assert_eq!(placed.len(), 2);
        assert!(placed.iter().all(|(_, _, owner)| *owner == EntityId::new(1)));
    }

    #[test]
    fn quest_updates_reach_party_members_on_same_map() {
        let h = harness();
        let party = Arc::new(SharedParty::new(PartyId::new(1)));
        for (raw, map_raw) in [(1, 1), (2, 1), (3, 2)] {
            party.join(EntityId::new(raw), MapId::new(map_raw), Arc::new(Bag::default()));
        }
        h.register_player(1, 1, Some(Arc::clone(&party)));

        let monster = h.monster(10, 42, 10, Vec::new());
        let report = monster
            .receive_damage(Some(EntityId::new(1)), 10)
            .expect("kill")
            .death
            .expect("died");

        assert_eq!(report.quest_updates, vec![EntityId::new(1), EntityId::new(2)]);
        assert_eq!(
            *h.world.kills.lock(),
            vec![(EntityId::new(1), 42), (EntityId::new(2), 42)]
        );
    }

    #[test]
    fn player_death_updates_no_quests() {
        let h = harness();
        h.world.register(Participant {
            id: EntityId::new(10),
            class: EntityClass::Monster { mob_id: 3 },
            map: MapId::new(1),
            party: None,
        });
        let player = h.player(1, pool(20));

        player.receive_damage(Some(EntityId::new(10)), 20).expect("kill");
        assert!(h.world.kills.lock().is_empty());
    }

    #[test]
    fn death_purges_clear_on_death_buffs() {
        let h = harness();
        let entity = h.player(1, pool(100));
        let fragile = Arc::new(
            skill(80, EffectCategory::StatBuff)
                .with_ability(AbilityType::Strength, 9)
                .cleared_on_death(),
        );
        entity.add_buff(fragile, None).expect("fragile");
        entity.add_buff(strength(81, 1, 4), None).expect("sturdy");

        let report = entity.resolve_death().expect("die");

        assert_eq!(report.purged.len(), 1);
        let remaining = entity.active_buffs();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].skill, SkillId::new(81));
        assert_eq!(entity.ledger_net(AbilityType::Strength), 4);
    }

    #[test]
    fn rebirth_on_other_map_teleports() {
        let h = harness();
        let entity = h.player(1, pool(100));

        assert!(matches!(
            entity.rebirth(MapId::new(1), 0.0, 0.0, 0.0),
            Err(CombatError::NotDead(_))
        ));

        entity.resolve_death().expect("die");
        entity.rebirth(MapId::new(1), 1.0, 0.0, 1.0).expect("same map");
        assert!(h.world.teleports.lock().is_empty());

        entity.resolve_death().expect("die again");
        entity.rebirth(MapId::new(9), 2.0, 0.0, 2.0).expect("other map");

        let teleports = h.world.teleports.lock();
        assert_eq!(teleports.len(), 1);
        assert_eq!(teleports[0].1.map, MapId::new(9));
        assert_eq!(entity.position().map, MapId::new(9));
        assert!(entity.is_alive());
        assert!(!entity.health().is_dead());
        assert!(h
            .events()
            .iter()
            .any(|event| matches!(event, CombatEvent::Rebirthed { .. })));
    }

    #[test]
    fn full_recover_keeps_death_flag() {
        let h = harness();
        let health = pool(100);
        let entity = h.player(1, Arc::clone(&health));

        entity.receive_damage(None, 100).expect("kill");
        entity.full_recover().expect("recover");

        assert_eq!(health.current_hp(), 100);
        assert!(health.is_dead());
        assert_eq!(entity.life_state(), LifeState::Dead);
        assert!(h.events().contains(&CombatEvent::FullRecovered {
            entity: EntityId::new(1),
        }));
    }
}

// ============================================================================
// Lifecycle & Concurrency
// ============================================================================

mod lifecycle_tests {
    use super::*;

    #[test]
    fn dispose_cancels_every_callback() {
        let h = harness_with(CombatConfig::default());
        let health = pool(100);
        health.set_current(50, 100, 100);
        let entity = h.player(1, Arc::clone(&health));
        entity
            .add_buff(
                Arc::new(skill(12, EffectCategory::PeriodicHeal).with_heal(PoolAmounts::new(10, 0, 0))),
                None,
            )
            .expect("heal");
        entity.start_regeneration();
        assert_eq!(h.scheduler.pending_count(), 3);

        entity.dispose();
        assert_eq!(h.scheduler.pending_count(), 0);
        h.scheduler.advance(Duration::from_secs(60));
        assert_eq!(health.current_hp(), 50);
        assert!(matches!(
            entity.receive_damage(None, 1),
            Err(CombatError::Disposed(_))
        ));
    }

    #[test]
    fn dropped_entity_callbacks_are_noops() {
        let h = harness();
        let entity = h.player(1, pool(100));
        entity.add_buff(strength(5, 1, 10), None).expect("buff");
        drop(entity);

        assert_eq!(h.scheduler.pending_count(), 0);
        h.scheduler.advance(Duration::from_secs(60));
    }

    #[test]
    fn buff_ids_are_unique_across_entities() {
        let h = harness();
        let a = h.player(1, pool(100));
        let b = h.player(2, pool(100));

        let first = a.add_buff(strength(5, 1, 1), None).expect("a");
        let second = b.add_buff(strength(5, 1, 1), None).expect("b");
        assert!(second.id > first.id);
    }

    #[test]
    fn exhausted_buff_ids_reject_new_buffs() {
        init_tracing();
        let scheduler = Arc::new(ManualScheduler::new());
        let services = Arc::new(
            CombatServices::new(CombatConfig::default(), scheduler.clone())
                .with_buff_ids(IdAllocator::starting_at(u32::MAX)),
        );
        let entity = EntityBuilder::new(EntityClass::Player, map(1), pool(100))
            .with_id(EntityId::new(1))
            .spawn(services);

        assert!(matches!(
            entity.add_buff(strength(5, 1, 10), None),
            Err(CombatError::Common(CommonError::IdSpaceExhausted))
        ));
        assert!(entity.active_buffs().is_empty());
        assert_eq!(entity.ledger_net(AbilityType::Strength), 0);
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[test]
    fn concurrent_add_and_cancel_keep_one_buff() {
        let h = harness();
        let entity = h.player(1, pool(100));
        let buff = strength(5, 1, 7);

        thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..250 {
                        entity.add_buff(Arc::clone(&buff), None).expect("add");
                    }
                });
                scope.spawn(|| {
                    for _ in 0..250 {
                        entity.cancel_skill(SkillId::new(5)).expect("cancel");
                    }
                });
            }
        });

        let active = entity.active_buffs();
        assert!(active.len() <= 1);
        let expected = if active.is_empty() { 0 } else { 7 };
        assert_eq!(entity.ledger_net(AbilityType::Strength), expected);
        assert!(h.scheduler.pending_count() <= 1);
    }

    #[test]
    fn concurrent_killing_blows_resolve_once() {
        let h = harness();
        let monster = h.monster(10, 7, 100, Vec::new());

        let deaths: usize = thread::scope(|scope| {
            let handles: Vec<_> = (1..=8)
                .map(|raw| {
                    let monster = &monster;
                    scope.spawn(move || {
                        let mut deaths = 0;
                        for _ in 0..10 {
                            if let Ok(outcome) = monster.receive_damage(Some(EntityId::new(raw)), 10) {
                                deaths += usize::from(outcome.death.is_some());
                            }
                        }
                        deaths
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().expect("attacker thread"))
                .sum()
        });

        assert_eq!(deaths, 1);
        let died = h
            .events()
            .into_iter()
            .filter(|event| matches!(event, CombatEvent::Died { .. }))
            .count();
        assert_eq!(died, 1);
    }

    #[test]
    fn thread_scheduler_expires_buffs() {
        init_tracing();
        let scheduler = Arc::new(ThreadScheduler::new(2).expect("start scheduler"));
        let services = Arc::new(
            CombatServices::new(CombatConfig::default(), scheduler)
                .with_events(EventBus::unbounded()),
        );
        let entity = EntityBuilder::new(EntityClass::Player, map(1), pool(100))
            .with_id(EntityId::new(1))
            .spawn(Arc::clone(&services));
        let short = Arc::new(
            SkillDefinition::new(SkillId::new(3), 1, EffectCategory::StatBuff)
                .with_ability(AbilityType::Luck, 2)
                .with_duration(1),
        );

        entity.add_buff(short, None).expect("add");
        let receiver = services.events.receiver();
        let removed = loop {
            match receiver.recv_timeout(Duration::from_secs(5)) {
                Ok(CombatEvent::BuffRemoved { skill, .. }) => break skill,
                Ok(_) => continue,
                Err(e) => panic!("buff did not expire: {e}"),
            }
        };

        assert_eq!(removed, SkillId::new(3));
        assert!(entity.ledger_is_balanced());
    }
}
