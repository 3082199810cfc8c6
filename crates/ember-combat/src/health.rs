//! Health pools (HP/MP/SP) and the death flag.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::skill::PoolAmounts;

/// Current and maximum values of all three pools.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    /// Current HP.
    pub hp: u32,
    /// Maximum HP.
    pub max_hp: u32,
    /// Current MP.
    pub mp: u32,
    /// Maximum MP.
    pub max_mp: u32,
    /// Current SP.
    pub sp: u32,
    /// Maximum SP.
    pub max_sp: u32,
}

impl PoolSnapshot {
    /// Full pools with the given maximums.
    #[must_use]
    pub const fn full(max_hp: u32, max_mp: u32, max_sp: u32) -> Self {
        Self {
            hp: max_hp,
            max_hp,
            mp: max_mp,
            max_mp,
            sp: max_sp,
            max_sp,
        }
    }
}

/// Owner of an actor's pools and death flag.
pub trait HealthProvider: Send + Sync {
    /// Current pool values.
    fn snapshot(&self) -> PoolSnapshot;

    /// Current HP.
    fn current_hp(&self) -> u32 {
        self.snapshot().hp
    }

    /// Restore HP up to the maximum; returns the new HP.
    fn increase_hp(&self, amount: u32) -> u32;

    /// Remove HP down to zero; returns the amount actually removed.
    fn decrease_hp(&self, amount: u32) -> u32;

    /// Remove from every pool; returns the amounts actually removed.
    fn decrease(&self, amounts: PoolAmounts) -> PoolAmounts;

    /// Restore every pool up to its maximum.
    fn recover(&self, amounts: PoolAmounts);

    /// Restore every pool to its maximum.
    fn full_recover(&self);

    /// Death flag.
    fn is_dead(&self) -> bool;

    /// Set the death flag.
    fn set_dead(&self, dead: bool);
}

#[derive(Debug)]
struct PoolState {
    pools: PoolSnapshot,
    dead: bool,
}

/// In-memory health pools.
#[derive(Debug)]
pub struct HealthPool {
    state: Mutex<PoolState>,
}

impl HealthPool {
    /// Creates full pools.
    #[must_use]
    pub fn new(max_hp: u32, max_mp: u32, max_sp: u32) -> Self {
        Self::from_snapshot(PoolSnapshot::full(max_hp, max_mp, max_sp))
    }

    /// Creates pools from explicit values (clamped to their maximums).
    #[must_use]
    pub fn from_snapshot(mut pools: PoolSnapshot) -> Self {
        pools.hp = pools.hp.min(pools.max_hp);
        pools.mp = pools.mp.min(pools.max_mp);
        pools.sp = pools.sp.min(pools.max_sp);
        Self {
            state: Mutex::new(PoolState { pools, dead: false }),
        }
    }

    /// Overwrite current values (clamped to their maximums).
    pub fn set_current(&self, hp: u32, mp: u32, sp: u32) {
        let mut state = self.state.lock();
        state.pools.hp = hp.min(state.pools.max_hp);
        state.pools.mp = mp.min(state.pools.max_mp);
        state.pools.sp = sp.min(state.pools.max_sp);
    }
}

impl HealthProvider for HealthPool {
    fn snapshot(&self) -> PoolSnapshot {
        self.state.lock().pools
    }

    fn increase_hp(&self, amount: u32) -> u32 {
        let mut state = self.state.lock();
        state.pools.hp = state.pools.hp.saturating_add(amount).min(state.pools.max_hp);
        state.pools.hp
    }

    fn decrease_hp(&self, amount: u32) -> u32 {
        let mut state = self.state.lock();
        let actual = amount.min(state.pools.hp);
        state.pools.hp -= actual;
        actual
    }

    fn decrease(&self, amounts: PoolAmounts) -> PoolAmounts {
        let mut state = self.state.lock();
        let pools = &mut state.pools;
        let removed = PoolAmounts::new(
            amounts.hp.min(pools.hp),
            amounts.mp.min(pools.mp),
            amounts.sp.min(pools.sp),
        );
        pools.hp -= removed.hp;
        pools.mp -= removed.mp;
        pools.sp -= removed.sp;
        removed
    }

    fn recover(&self, amounts: PoolAmounts) {
        let mut state = self.state.lock();
        let pools = &mut state.pools;
        pools.hp = pools.hp.saturating_add(amounts.hp).min(pools.max_hp);
        pools.mp = pools.mp.saturating_add(amounts.mp).min(pools.max_mp);
        pools.sp = pools.sp.saturating_add(amounts.sp).min(pools.max_sp);
    }

    fn full_recover(&self) {
        let mut state = self.state.lock();
        let pools = &mut state.pools;
        pools.hp = pools.max_hp;
        pools.mp = pools.max_mp;
        pools.sp = pools.max_sp;
    }

    fn is_dead(&self) -> bool {
        self.state.lock().dead
    }

    fn set_dead(&self, dead: bool) {
        self.state.lock().dead = dead;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decrease_clamps_to_zero() {
        let pool = HealthPool::new(100, 50, 50);
        assert_eq!(pool.decrease_hp(30), 30);
        assert_eq!(pool.current_hp(), 70);
        assert_eq!(pool.decrease_hp(500), 70);
        assert_eq!(pool.current_hp(), 0);
    }

    #[test]
    fn test_recover_clamps_to_max() {
        let pool = HealthPool::new(100, 50, 50);
        pool.set_current(10, 10, 10);
        pool.recover(PoolAmounts::new(500, 5, 0));

        let pools = pool.snapshot();
        assert_eq!(pools.hp, 100);
        assert_eq!(pools.mp, 15);
        assert_eq!(pools.sp, 10);
    }

    #[test]
    fn test_decrease_all_pools() {
        let pool = HealthPool::new(100, 20, 20);
        let removed = pool.decrease(PoolAmounts::new(10, 30, 5));
        assert_eq!(removed, PoolAmounts::new(10, 20, 5));
        assert_eq!(pool.snapshot().mp, 0);
    }

    #[test]
    fn test_full_recover_keeps_death_flag() {
        let pool = HealthPool::new(100, 20, 20);
        pool.set_current(0, 0, 0);
        pool.set_dead(true);
        pool.full_recover();

        assert_eq!(pool.snapshot(), PoolSnapshot::full(100, 20, 20));
        assert!(pool.is_dead());
    }
}
