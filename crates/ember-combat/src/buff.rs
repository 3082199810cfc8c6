//! Buff instances and the per-actor buff stack.
//!
//! The stack only stores buffs and decides how a new application stacks
//! with an existing one; applying and relieving effects happens in
//! [`crate::effects`] while the owner's state lock is held.

use ember_common::{BuffId, EntityId, SkillId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::scheduler::TaskHandle;
use crate::skill::{EffectCategory, PoolAmounts, SkillDefinition};

// ============================================================================
// Partitions
// ============================================================================

/// Which list of the stack a buff lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BuffPartition {
    /// Player-visible, time-limited effects.
    Active,
    /// Permanent equipment/racial effects; never notified.
    Passive,
}

impl BuffPartition {
    /// Partition a skill's buffs go to.
    #[must_use]
    pub const fn of(skill: &SkillDefinition) -> Self {
        if skill.is_passive {
            Self::Passive
        } else {
            Self::Active
        }
    }
}

// ============================================================================
// Buff
// ============================================================================

/// A skill effect applied to one actor.
#[derive(Debug)]
pub struct Buff {
    id: BuffId,
    skill: Arc<SkillDefinition>,
    creator: Option<EntityId>,
    pub(crate) expires_at: Duration,
    /// Bumped on every rearm; an expiry fire carrying an older value is stale.
    pub(crate) generation: u64,
    pub(crate) expiry: Option<TaskHandle>,
    pub(crate) periodic: Option<TaskHandle>,
    pub(crate) heal: PoolAmounts,
    pub(crate) damage: PoolAmounts,
}

impl Buff {
    /// Create an unarmed buff.
    #[must_use]
    pub fn new(
        id: BuffId,
        skill: Arc<SkillDefinition>,
        creator: Option<EntityId>,
        expires_at: Duration,
    ) -> Self {
        Self {
            id,
            skill,
            creator,
            expires_at,
            generation: 0,
            expiry: None,
            periodic: None,
            heal: PoolAmounts::default(),
            damage: PoolAmounts::default(),
        }
    }

    /// Buff identity.
    #[must_use]
    pub const fn id(&self) -> BuffId {
        self.id
    }

    /// Skill this buff was created from.
    #[must_use]
    pub fn skill(&self) -> &Arc<SkillDefinition> {
        &self.skill
    }

    /// Actor that applied the buff, if any.
    #[must_use]
    pub const fn creator(&self) -> Option<EntityId> {
        self.creator
    }

    /// Scheduler time at which the buff expires.
    #[must_use]
    pub const fn expires_at(&self) -> Duration {
        self.expires_at
    }

    /// Effect category of the underlying skill.
    #[must_use]
    pub fn category(&self) -> EffectCategory {
        self.skill.category
    }

    /// Partition the buff belongs to.
    #[must_use]
    pub fn partition(&self) -> BuffPartition {
        BuffPartition::of(&self.skill)
    }

    /// Stop every callback owned by this buff.
    pub fn cancel_tasks(&mut self) {
        if let Some(expiry) = self.expiry.take() {
            expiry.cancel();
        }
        if let Some(periodic) = self.periodic.take() {
            periodic.cancel();
        }
    }

    /// Snapshot for collaborators.
    #[must_use]
    pub fn view(&self) -> BuffView {
        BuffView {
            id: self.id,
            skill: self.skill.id,
            level: self.skill.level,
            creator: self.creator,
            expires_at: self.expires_at,
            passive: self.skill.is_passive,
        }
    }
}

/// Owned snapshot of a buff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuffView {
    /// Buff identity
    pub id: BuffId,
    /// Skill identity
    pub skill: SkillId,
    /// Skill level
    pub level: u8,
    /// Creator, if any
    pub creator: Option<EntityId>,
    /// Scheduler time of expiry
    pub expires_at: Duration,
    /// Held in the passive partition
    pub passive: bool,
}

// ============================================================================
// Stacking
// ============================================================================

/// Outcome of applying a skill that may already be in effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackDecision {
    /// No buff of this skill yet; add one.
    Insert,
    /// A higher level is already in effect; keep it untouched.
    Ignore,
    /// Same level; refresh the existing buff's expiry.
    Refresh,
    /// Incoming level is higher; remove the existing buff and add a new one.
    Replace,
}

impl StackDecision {
    /// Decide how a skill at `incoming` level stacks with `existing`.
    #[must_use]
    pub fn decide(existing: Option<u8>, incoming: u8) -> Self {
        match existing {
            None => Self::Insert,
            Some(level) if incoming < level => Self::Ignore,
            Some(level) if incoming == level => Self::Refresh,
            Some(_) => Self::Replace,
        }
    }
}

/// Active and passive buffs of one actor.
///
/// At most one buff per skill identity lives in each partition.
#[derive(Debug, Default)]
pub struct BuffStack {
    active: Vec<Buff>,
    passive: Vec<Buff>,
}

impl BuffStack {
    /// Create an empty stack.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffs of one partition, in insertion order.
    #[must_use]
    pub fn partition(&self, partition: BuffPartition) -> &[Buff] {
        match partition {
            BuffPartition::Active => &self.active,
            BuffPartition::Passive => &self.passive,
        }
    }

    pub(crate) fn partition_mut(&mut self, partition: BuffPartition) -> &mut Vec<Buff> {
        match partition {
            BuffPartition::Active => &mut self.active,
            BuffPartition::Passive => &mut self.passive,
        }
    }

    /// Index of the buff of `skill` in a partition.
    #[must_use]
    pub fn position_of_skill(&self, partition: BuffPartition, skill: SkillId) -> Option<usize> {
        self.partition(partition)
            .iter()
            .position(|buff| buff.skill.id == skill)
    }

    /// Buff of `skill` in a partition.
    #[must_use]
    pub fn find_skill(&self, partition: BuffPartition, skill: SkillId) -> Option<&Buff> {
        self.partition(partition)
            .iter()
            .find(|buff| buff.skill.id == skill)
    }

    /// Locate a buff by identity.
    #[must_use]
    pub fn locate(&self, id: BuffId) -> Option<(BuffPartition, usize)> {
        [BuffPartition::Active, BuffPartition::Passive]
            .into_iter()
            .find_map(|partition| {
                self.partition(partition)
                    .iter()
                    .position(|buff| buff.id == id)
                    .map(|index| (partition, index))
            })
    }

    /// Buff by identity.
    #[must_use]
    pub fn get(&self, id: BuffId) -> Option<&Buff> {
        let (partition, index) = self.locate(id)?;
        self.partition(partition).get(index)
    }

    /// Append a buff to its partition.
    pub fn insert(&mut self, buff: Buff) {
        let partition = buff.partition();
        self.partition_mut(partition).push(buff);
    }

    /// Detach a buff, keeping the order of the rest.
    pub fn take(&mut self, partition: BuffPartition, index: usize) -> Option<Buff> {
        let buffs = self.partition_mut(partition);
        (index < buffs.len()).then(|| buffs.remove(index))
    }

    /// Whether any buff of `category` is in effect.
    #[must_use]
    pub fn any_of(&self, category: EffectCategory) -> bool {
        self.iter().any(|buff| buff.category() == category)
    }

    /// Every buff, active first.
    pub fn iter(&self) -> impl Iterator<Item = &Buff> + '_ {
        self.active.iter().chain(self.passive.iter())
    }

    /// Detach every buff.
    pub fn drain(&mut self) -> Vec<Buff> {
        let mut buffs = std::mem::take(&mut self.active);
        buffs.append(&mut self.passive);
        buffs
    }

    /// Total buffs held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.active.len() + self.passive.len()
    }

    /// Whether the stack is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.active.is_empty() && self.passive.is_empty()
    }
}
