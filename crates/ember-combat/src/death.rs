//! Death resolution: damage intake, the once-per-death pipeline, and rebirth.
//!
//! ```text
//! Alive ──(hp reaches 0)──► Dying ──(pipeline done)──► Dead ──(rebirth)──► Alive
//! ```
//!
//! The `Alive → Dying` step is a compare-and-swap, so concurrent killing
//! blows resolve the death exactly once.

use ember_common::{BuffId, EntityId, MapId};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};
use tracing::{debug, info, warn};

use crate::buff::BuffPartition;
use crate::collaborators::{DropItem, Participant};
use crate::effects::Outcome;
use crate::entity::KillableEntity;
use crate::error::{CombatError, CombatResult};
use crate::events::CombatEvent;

/// Point in the death state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifeState {
    /// Can take damage and buffs.
    Alive,
    /// Death resolution in progress.
    Dying,
    /// Waiting for rebirth.
    Dead,
}

impl LifeState {
    const fn to_raw(self) -> u8 {
        match self {
            Self::Alive => 0,
            Self::Dying => 1,
            Self::Dead => 2,
        }
    }

    const fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::Alive,
            1 => Self::Dying,
            _ => Self::Dead,
        }
    }
}

/// Atomic [`LifeState`].
#[derive(Debug)]
pub(crate) struct LifeCell(AtomicU8);

impl LifeCell {
    pub(crate) const fn new() -> Self {
        Self(AtomicU8::new(0))
    }

    pub(crate) fn load(&self) -> LifeState {
        LifeState::from_raw(self.0.load(Ordering::Acquire))
    }

    /// Move `from → to`; false if the state was not `from`.
    pub(crate) fn transition(&self, from: LifeState, to: LifeState) -> bool {
        self.0
            .compare_exchange(
                from.to_raw(),
                to.to_raw(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

/// Result of one hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DamageOutcome {
    /// HP actually removed.
    pub dealt: u32,
    /// HP left after the hit.
    pub remaining_hp: u32,
    /// Death resolved by this hit, if it was the killing blow.
    pub death: Option<DeathReport>,
}

/// What one death resolution did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeathReport {
    /// Actor that died.
    pub entity: EntityId,
    /// Top damage contributor.
    pub killer: Option<EntityId>,
    /// Items placed on the ground.
    pub placed: Vec<DropItem>,
    /// Items handed out by the killer's party.
    pub distributed: usize,
    /// Players whose kill quests were updated.
    pub quest_updates: Vec<EntityId>,
    /// Buffs removed because they end on death.
    pub purged: Vec<BuffId>,
}

impl KillableEntity {
    /// Take a hit of `amount` from `source`.
    ///
    /// Records the damage for kill attribution and resolves death when HP
    /// reaches zero. Fails on an actor that is not alive.
    pub fn receive_damage(&self, source: Option<EntityId>, amount: u32) -> CombatResult<DamageOutcome> {
        self.ensure_not_disposed()?;
        if !self.is_alive() {
            return Err(CombatError::AlreadyDead(self.id()));
        }

        let dealt = self.health.decrease_hp(amount);
        if let Some(source) = source {
            self.damage.record_damage(source, u64::from(dealt));
        }
        let remaining_hp = self.health.current_hp();
        self.services.events.publish(CombatEvent::Damaged {
            entity: self.id(),
            source,
            amount: dealt,
            remaining_hp,
        });

        let death = if remaining_hp == 0 {
            self.try_resolve_death()
        } else {
            None
        };
        Ok(DamageOutcome {
            dealt,
            remaining_hp,
            death,
        })
    }

    /// Run the death pipeline now, regardless of remaining HP.
    ///
    /// Fails if the actor is already dying or dead.
    pub fn resolve_death(&self) -> CombatResult<DeathReport> {
        self.ensure_not_disposed()?;
        self.try_resolve_death()
            .ok_or_else(|| CombatError::AlreadyDead(self.id()))
    }

    /// Run the pipeline if this caller wins the `Alive → Dying` race.
    pub(crate) fn try_resolve_death(&self) -> Option<DeathReport> {
        if self.is_disposed() || !self.life.transition(LifeState::Alive, LifeState::Dying) {
            return None;
        }

        let entity = self.id();
        let killer = self.damage.resolve_and_clear().map(|(killer, _)| killer);
        self.health.set_dead(true);
        self.life.transition(LifeState::Dying, LifeState::Dead);
        info!(%entity, killer = ?killer, "entity died");
        self.services
            .events
            .publish(CombatEvent::Died { entity, killer });

        let mut report = DeathReport {
            entity,
            killer,
            placed: Vec::new(),
            distributed: 0,
            quest_updates: Vec::new(),
            purged: Vec::new(),
        };

        let participant = killer.and_then(|id| {
            let found = self.services.directory.participant(id);
            if found.is_none() {
                warn!(%entity, killer = %id, "killer not found, skipping loot and quests");
            }
            found
        });
        if let Some(killer) = &participant {
            self.route_loot(killer, &mut report);
            self.update_quests(killer, &mut report);
        }
        report.purged = self.purge_on_death();
        Some(report)
    }

    fn route_loot(&self, killer: &Participant, report: &mut DeathReport) {
        let items = self.drops.generate_drop(killer);
        if items.is_empty() {
            return;
        }
        let offered = items.len();
        let remainder = match &killer.party {
            Some(party) => party.distribute_drop(items, killer.id),
            None => items,
        };
        report.distributed = offered.saturating_sub(remainder.len());

        let at = self.position();
        for item in &remainder {
            self.services.loot.place(*item, at, killer.id);
        }
        debug!(
            entity = %report.entity,
            distributed = report.distributed,
            placed = remainder.len(),
            "loot routed"
        );
        report.placed = remainder;
    }

    fn update_quests(&self, killer: &Participant, report: &mut DeathReport) {
        let Some(mob_id) = self.class().mob_id() else {
            return;
        };
        if !killer.class.is_player() {
            return;
        }

        let mut players = vec![killer.id];
        if let Some(party) = &killer.party {
            players.extend(
                party
                    .members()
                    .into_iter()
                    .filter(|member| member.id != killer.id && member.map == killer.map)
                    .map(|member| member.id),
            );
        }
        for player in &players {
            self.services.quests.record_kill(*player, mob_id);
        }
        report.quest_updates = players;
    }

    fn purge_on_death(&self) -> Vec<BuffId> {
        let mut outcome = Outcome::default();
        let mut purged = Vec::new();
        {
            let mut state = self.state.lock();
            while let Some(index) = state
                .stack
                .partition(BuffPartition::Active)
                .iter()
                .position(|buff| buff.skill().clear_on_death)
            {
                let id = state.stack.partition(BuffPartition::Active)[index].id();
                if let Err(e) = self.remove_at(&mut state, BuffPartition::Active, index, &mut outcome) {
                    warn!(entity = %self.id(), buff = %id, "failed to purge buff: {e}");
                }
                purged.push(id);
            }
            self.settle(&state, &mut outcome);
        }
        self.publish(outcome);
        purged
    }

    /// Bring a dead actor back with full pools at a new location.
    ///
    /// Teleports when the map changes.
    pub fn rebirth(&self, map: MapId, x: f32, y: f32, z: f32) -> CombatResult<()> {
        self.ensure_not_disposed()?;
        if self.life_state() != LifeState::Dead {
            return Err(CombatError::NotDead(self.id()));
        }

        self.health.full_recover();
        self.health.set_dead(false);
        let previous = self.position();
        let position = previous.relocated(map, x, y, z);
        self.set_position(position);
        if !self.life.transition(LifeState::Dead, LifeState::Alive) {
            return Err(CombatError::NotDead(self.id()));
        }

        info!(entity = %self.id(), "entity reborn");
        self.services.events.publish(CombatEvent::Rebirthed {
            entity: self.id(),
            position,
        });
        if !previous.same_map(&position) {
            self.services.teleporter.teleport(self.id(), position);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_life_cell_transitions() {
        let cell = LifeCell::new();
        assert_eq!(cell.load(), LifeState::Alive);
        assert!(cell.transition(LifeState::Alive, LifeState::Dying));
        assert!(!cell.transition(LifeState::Alive, LifeState::Dying));
        assert!(cell.transition(LifeState::Dying, LifeState::Dead));
        assert_eq!(cell.load(), LifeState::Dead);
        assert!(cell.transition(LifeState::Dead, LifeState::Alive));
    }
}
