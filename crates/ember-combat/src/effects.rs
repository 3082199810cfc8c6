//! Applying and relieving buff effects, and the callbacks buffs own.
//!
//! Every function here runs with the owner's state lock held and pushes
//! notifications into an [`Outcome`] that is published after the lock is
//! released.

use ember_common::{BuffId, EntityId};
use std::mem;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, trace};

use crate::ability::StatNotice;
use crate::buff::{Buff, BuffPartition, BuffView};
use crate::entity::{CombatState, KillableEntity};
use crate::error::{CombatError, CombatResult};
use crate::events::{CombatEvent, TickEffect};
use crate::health::PoolSnapshot;
use crate::skill::{EffectCategory, Element, PoolAmounts, SkillDefinition};

/// Notifications produced while the state lock was held.
#[derive(Debug, Default)]
pub(crate) struct Outcome {
    pub events: Vec<CombatEvent>,
    pub notice: StatNotice,
}

impl Outcome {
    fn merge(&mut self, notice: StatNotice) {
        self.notice = self.notice.merge(notice);
    }
}

impl KillableEntity {
    // ========================================================================
    // Stack Mutations
    // ========================================================================

    /// Create a buff, apply its effect, arm its expiry, and insert it.
    pub(crate) fn insert_buff(
        &self,
        state: &mut CombatState,
        skill: Arc<SkillDefinition>,
        creator: Option<EntityId>,
        expires_at: Duration,
        outcome: &mut Outcome,
    ) -> CombatResult<BuffView> {
        let mut buff = Buff::new(self.services.buff_ids.next_buff_id()?, skill, creator, expires_at);
        let notice = self.apply_buff_skill(state, &mut buff, outcome)?;
        outcome.merge(notice);
        self.arm_expiry(&mut buff);

        let view = buff.view();
        if buff.partition() == BuffPartition::Active {
            outcome.events.push(CombatEvent::BuffAdded {
                entity: self.id(),
                buff: view,
                refreshed: false,
            });
        }
        debug!(entity = %self.id(), buff = %view.id, skill = %view.skill, level = view.level, "buff added");
        state.stack.insert(buff);
        Ok(view)
    }

    /// Move an existing buff's expiry and rearm its callback.
    pub(crate) fn refresh_buff(
        &self,
        state: &mut CombatState,
        partition: BuffPartition,
        index: usize,
        expires_at: Duration,
        outcome: &mut Outcome,
    ) -> BuffView {
        let buff = &mut state.stack.partition_mut(partition)[index];
        buff.expires_at = expires_at;
        self.arm_expiry(buff);

        let view = buff.view();
        if partition == BuffPartition::Active {
            outcome.events.push(CombatEvent::BuffAdded {
                entity: self.id(),
                buff: view,
                refreshed: true,
            });
        }
        trace!(entity = %self.id(), buff = %view.id, "buff refreshed");
        view
    }

    /// Detach a buff, stop its callbacks, and relieve its effect.
    pub(crate) fn remove_at(
        &self,
        state: &mut CombatState,
        partition: BuffPartition,
        index: usize,
        outcome: &mut Outcome,
    ) -> CombatResult<()> {
        let Some(mut buff) = state.stack.take(partition, index) else {
            return Ok(());
        };
        buff.cancel_tasks();
        let notice = self.relieve_buff_skill(state, &buff)?;
        outcome.merge(notice);

        if partition == BuffPartition::Active {
            outcome.events.push(CombatEvent::BuffRemoved {
                entity: self.id(),
                buff_id: buff.id(),
                skill: buff.skill().id,
            });
        }
        debug!(entity = %self.id(), buff = %buff.id(), skill = %buff.skill().id, "buff removed");
        Ok(())
    }

    fn cancel_category(
        &self,
        state: &mut CombatState,
        category: EffectCategory,
        outcome: &mut Outcome,
    ) -> CombatResult<()> {
        while let Some(index) = state
            .stack
            .partition(BuffPartition::Active)
            .iter()
            .position(|buff| buff.category() == category)
        {
            self.remove_at(state, BuffPartition::Active, index, outcome)?;
        }
        Ok(())
    }

    /// Turn accumulated notices into stats/speed events.
    pub(crate) fn settle(&self, state: &CombatState, outcome: &mut Outcome) {
        let notice = mem::take(&mut outcome.notice);
        if notice.stats_changed {
            outcome
                .events
                .push(CombatEvent::StatsChanged { entity: self.id() });
        }
        if notice.speed_changed {
            outcome.events.push(CombatEvent::SpeedChanged {
                entity: self.id(),
                speed: self.speed_of(state),
            });
        }
    }

    // ========================================================================
    // Category Dispatch
    // ========================================================================

    fn apply_buff_skill(
        &self,
        state: &mut CombatState,
        buff: &mut Buff,
        outcome: &mut Outcome,
    ) -> CombatResult<StatNotice> {
        let skill = Arc::clone(buff.skill());
        let config = &self.services.config;
        match skill.category {
            EffectCategory::StatBuff | EffectCategory::PassiveDefence => {
                let mut notice = StatNotice::NONE;
                for modifier in &skill.abilities {
                    notice = notice.merge(state.ledger.apply(modifier.ability, modifier.value)?);
                }
                Ok(notice)
            },
            EffectCategory::SubtractingDebuff => {
                let mut notice = StatNotice::NONE;
                for modifier in &skill.abilities {
                    notice = notice.merge(state.ledger.relieve(modifier.ability, modifier.value)?);
                }
                Ok(notice)
            },
            EffectCategory::PeriodicHeal => {
                buff.heal = skill.heal;
                self.arm_periodic(buff, config.heal_tick());
                Ok(StatNotice::NONE)
            },
            EffectCategory::PeriodicDebuff => {
                buff.damage = skill.damage;
                let interval = skill
                    .repeat_interval()
                    .unwrap_or_else(|| config.debuff_tick());
                self.arm_periodic(buff, interval);
                Ok(StatNotice::NONE)
            },
            EffectCategory::PreventAttack | EffectCategory::Immobilize => Ok(StatNotice::SPEED),
            EffectCategory::WeaponMastery => {
                for weapon in &skill.weapons {
                    state.weapon_speeds.insert(*weapon, skill.weapon_speed);
                }
                Ok(StatNotice::SPEED)
            },
            EffectCategory::Stealth => {
                let sprinter = config.sprinter_skill();
                if let Some(index) = state
                    .stack
                    .position_of_skill(BuffPartition::Active, sprinter)
                {
                    self.remove_at(state, BuffPartition::Active, index, outcome)?;
                }
                Ok(StatNotice::NONE)
            },
            EffectCategory::ElementalAttack => {
                self.cancel_category(state, skill.category, outcome)?;
                state.flags.attack_element = skill.element;
                Ok(StatNotice::STATS)
            },
            EffectCategory::ElementalProtection => {
                self.cancel_category(state, skill.category, outcome)?;
                state.flags.defence_element = skill.element;
                Ok(StatNotice::STATS)
            },
            EffectCategory::Untouchable => {
                state.flags.untouchable = true;
                Ok(StatNotice::NONE)
            },
            EffectCategory::RemoveAttribute => {
                state.flags.remove_attribute = true;
                Ok(StatNotice::STATS)
            },
            EffectCategory::Unknown(code) => Err(CombatError::UnimplementedBuffCategory(code)),
        }
    }

    fn relieve_buff_skill(&self, state: &mut CombatState, buff: &Buff) -> CombatResult<StatNotice> {
        let skill = buff.skill();
        match skill.category {
            EffectCategory::StatBuff | EffectCategory::PassiveDefence => {
                let mut notice = StatNotice::NONE;
                for modifier in &skill.abilities {
                    notice = notice.merge(state.ledger.relieve(modifier.ability, modifier.value)?);
                }
                Ok(notice)
            },
            EffectCategory::SubtractingDebuff => {
                let mut notice = StatNotice::NONE;
                for modifier in &skill.abilities {
                    notice = notice.merge(state.ledger.apply(modifier.ability, modifier.value)?);
                }
                Ok(notice)
            },
            // Callbacks were cancelled before relieving.
            EffectCategory::PeriodicHeal | EffectCategory::PeriodicDebuff => Ok(StatNotice::NONE),
            EffectCategory::PreventAttack | EffectCategory::Immobilize => Ok(StatNotice::SPEED),
            EffectCategory::WeaponMastery => {
                for weapon in &skill.weapons {
                    state.weapon_speeds.remove(weapon);
                }
                Ok(StatNotice::SPEED)
            },
            EffectCategory::Stealth => Ok(StatNotice::NONE),
            EffectCategory::ElementalAttack => {
                state.flags.attack_element = Element::None;
                Ok(StatNotice::STATS)
            },
            EffectCategory::ElementalProtection => {
                state.flags.defence_element = Element::None;
                Ok(StatNotice::STATS)
            },
            EffectCategory::Untouchable => {
                // Other untouchable sources may still be running.
                state.flags.untouchable = state
                    .stack
                    .partition(BuffPartition::Active)
                    .iter()
                    .any(|other| other.category() == EffectCategory::Untouchable);
                Ok(StatNotice::NONE)
            },
            EffectCategory::RemoveAttribute => {
                state.flags.remove_attribute = false;
                Ok(StatNotice::STATS)
            },
            EffectCategory::Unknown(code) => Err(CombatError::UnimplementedBuffCategory(code)),
        }
    }

    // ========================================================================
    // Callbacks
    // ========================================================================

    /// Schedule (or reschedule) the buff's expiry.
    ///
    /// Replacing the handle cancels the previous callback; bumping the
    /// generation makes an already-dequeued stale fire a no-op.
    fn arm_expiry(&self, buff: &mut Buff) {
        buff.generation += 1;
        if buff.skill().is_permanent() {
            buff.expiry = None;
            return;
        }

        let delay = buff.expires_at.saturating_sub(self.services.scheduler.now());
        let weak = self.this.clone();
        let id = buff.id();
        let generation = buff.generation;
        buff.expiry = Some(self.services.scheduler.schedule_once(
            delay,
            Arc::new(move || {
                if let Some(entity) = weak.upgrade() {
                    entity.expire_buff(id, generation);
                }
            }),
        ));
    }

    fn arm_periodic(&self, buff: &mut Buff, interval: Duration) {
        let weak = self.this.clone();
        let id = buff.id();
        buff.periodic = Some(self.services.scheduler.schedule_repeating(
            interval,
            Arc::new(move || {
                if let Some(entity) = weak.upgrade() {
                    entity.periodic_tick(id);
                }
            }),
        ));
    }

    fn expire_buff(&self, id: BuffId, generation: u64) {
        let mut outcome = Outcome::default();
        {
            let mut state = self.state.lock();
            let Some((partition, index)) = state.stack.locate(id) else {
                trace!(entity = %self.id(), buff = %id, "expiry after removal ignored");
                return;
            };
            if state.stack.partition(partition)[index].generation != generation {
                trace!(entity = %self.id(), buff = %id, "stale expiry ignored");
                return;
            }
            if let Err(e) = self.remove_at(&mut state, partition, index, &mut outcome) {
                error!(entity = %self.id(), buff = %id, "failed to expire buff: {e}");
            }
            self.settle(&state, &mut outcome);
        }
        self.publish(outcome);
    }

    fn periodic_tick(&self, id: BuffId) {
        if self.is_disposed() || !self.is_alive() {
            return;
        }

        // Pools change under the state lock so a concurrent removal either
        // happens first (and the tick sees no buff) or after the tick.
        let (skill, effect, source) = {
            let state = self.state.lock();
            let Some(buff) = state.stack.get(id) else {
                trace!(entity = %self.id(), buff = %id, "tick after removal ignored");
                return;
            };
            match buff.category() {
                EffectCategory::PeriodicHeal => {
                    self.health.recover(buff.heal);
                    let PoolAmounts { hp, mp, sp } = buff.heal;
                    (buff.skill().id, TickEffect::Heal { hp, mp, sp }, None)
                },
                EffectCategory::PeriodicDebuff => {
                    let amounts = if buff.skill().damage_is_percent {
                        percent_of(&self.health.snapshot(), buff.damage)
                    } else {
                        buff.damage
                    };
                    let PoolAmounts { hp, mp, sp } = self.health.decrease(amounts);
                    (
                        buff.skill().id,
                        TickEffect::Damage { hp, mp, sp },
                        buff.creator(),
                    )
                },
                _ => return,
            }
        };

        self.services.events.publish(CombatEvent::PeriodicTick {
            entity: self.id(),
            buff_id: id,
            skill,
            effect,
        });

        if let TickEffect::Damage { hp, .. } = effect {
            if let Some(source) = source {
                self.damage.record_damage(source, u64::from(hp));
            }
            if hp > 0 && self.health.current_hp() == 0 {
                self.try_resolve_death();
            }
        }
    }
}

/// Percent amounts taken from the pools' current values.
fn percent_of(pools: &PoolSnapshot, percent: PoolAmounts) -> PoolAmounts {
    let part = |current: u32, pct: u32| {
        u32::try_from(u64::from(current) * u64::from(pct) / 100).unwrap_or(u32::MAX)
    };
    PoolAmounts::new(
        part(pools.hp, percent.hp),
        part(pools.mp, percent.mp),
        part(pools.sp, percent.sp),
    )
}
