//! Default party loot policy.

use ember_common::{EntityId, MapId, PartyId};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::trace;

use crate::collaborators::{DropItem, ItemReceiver, Party, PartyMember};

struct Slot {
    id: EntityId,
    map: MapId,
    inbox: Arc<dyn ItemReceiver>,
}

/// Party handing out one item per member, in member order.
///
/// Items a member has no room for, and items beyond one per member, are
/// returned as the remainder.
pub struct SharedParty {
    id: PartyId,
    members: RwLock<Vec<Slot>>,
}

impl std::fmt::Debug for SharedParty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedParty")
            .field("id", &self.id)
            .field("members", &self.members())
            .finish()
    }
}

impl SharedParty {
    /// Create an empty party.
    #[must_use]
    pub fn new(id: PartyId) -> Self {
        Self {
            id,
            members: RwLock::new(Vec::new()),
        }
    }

    /// Add a member. Returns false if already a member.
    pub fn join(&self, id: EntityId, map: MapId, inbox: Arc<dyn ItemReceiver>) -> bool {
        let mut members = self.members.write();
        if members.iter().any(|slot| slot.id == id) {
            return false;
        }
        members.push(Slot { id, map, inbox });
        true
    }

    /// Remove a member. Returns false if not a member.
    pub fn leave(&self, id: EntityId) -> bool {
        let mut members = self.members.write();
        let before = members.len();
        members.retain(|slot| slot.id != id);
        members.len() != before
    }

    /// Record that a member changed maps.
    pub fn move_member(&self, id: EntityId, map: MapId) {
        if let Some(slot) = self.members.write().iter_mut().find(|slot| slot.id == id) {
            slot.map = map;
        }
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.read().len()
    }

    /// Whether the party has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.read().is_empty()
    }
}

impl Party for SharedParty {
    fn id(&self) -> PartyId {
        self.id
    }

    fn members(&self) -> Vec<PartyMember> {
        self.members
            .read()
            .iter()
            .map(|slot| PartyMember {
                id: slot.id,
                map: slot.map,
            })
            .collect()
    }

    fn distribute_drop(&self, items: Vec<DropItem>, receiver: EntityId) -> Vec<DropItem> {
        let members = self.members.read();
        let mut items = items.into_iter();
        let mut remainder = Vec::new();

        for slot in members.iter() {
            let Some(item) = items.next() else {
                break;
            };
            if let Err(item) = slot.inbox.try_receive(item) {
                trace!(member = %slot.id, "member inventory full");
                remainder.push(item);
            }
        }
        remainder.extend(items);
        trace!(party = ?self.id, %receiver, remaining = remainder.len(), "drop distributed");
        remainder
    }
}
