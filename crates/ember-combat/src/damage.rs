//! Damage ledger: who dealt how much damage to one actor during one life.

use dashmap::DashMap;
use ember_common::EntityId;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug)]
struct Contribution {
    /// Position of the source's first hit, for tie-breaks.
    order: u64,
    total: AtomicU64,
}

/// Concurrent map from damage source to cumulative damage.
///
/// Recording takes a shared phase guard; resolution takes it exclusively,
/// so no hit can land between picking the top contributor and clearing.
#[derive(Debug, Default)]
pub struct DamageLedger {
    entries: DashMap<EntityId, Contribution>,
    next_order: AtomicU64,
    phase: RwLock<()>,
}

impl DamageLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `amount` to the total dealt by `source`.
    ///
    /// Zero amounts are not recorded; a source must deal damage to be credited.
    pub fn record_damage(&self, source: EntityId, amount: u64) {
        if amount == 0 {
            return;
        }
        let _phase = self.phase.read();
        let entry = self.entries.entry(source).or_insert_with(|| Contribution {
            order: self.next_order.fetch_add(1, Ordering::Relaxed),
            total: AtomicU64::new(0),
        });
        entry.total.fetch_add(amount, Ordering::Relaxed);
    }

    /// Total recorded for a source.
    #[must_use]
    pub fn total_for(&self, source: EntityId) -> u64 {
        self.entries
            .get(&source)
            .map_or(0, |entry| entry.total.load(Ordering::Relaxed))
    }

    /// Source with the strictly greatest total; the first recorded source wins ties.
    #[must_use]
    pub fn resolve_top_contributor(&self) -> Option<EntityId> {
        self.top().map(|(source, _)| source)
    }

    /// Resolve the top contributor and clear the ledger as one step.
    ///
    /// Returns the winner and its total. Damage recorded afterwards starts a
    /// fresh accumulation.
    pub fn resolve_and_clear(&self) -> Option<(EntityId, u64)> {
        let _phase = self.phase.write();
        let top = self.top();
        self.entries.clear();
        top
    }

    /// Drop every entry.
    pub fn clear(&self) {
        let _phase = self.phase.write();
        self.entries.clear();
    }

    /// Number of distinct sources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn top(&self) -> Option<(EntityId, u64)> {
        let mut totals: Vec<(u64, EntityId, u64)> = self
            .entries
            .iter()
            .map(|entry| {
                (
                    entry.order,
                    *entry.key(),
                    entry.total.load(Ordering::Relaxed),
                )
            })
            .collect();
        totals.sort_unstable_by_key(|(order, _, _)| *order);

        let mut best: Option<(EntityId, u64)> = None;
        let mut best_total = 0;
        for (_, source, total) in totals {
            if total > best_total {
                best_total = total;
                best = Some((source, total));
            }
        }
        best
    }
}
