//! World positions for actors and dropped items.

use serde::{Deserialize, Serialize};

use crate::ids::MapId;

/// A position in the world: map plus 3D coordinates on that map.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Map the position belongs to
    pub map: MapId,
    /// X coordinate on the map
    pub x: f32,
    /// Y (height) coordinate on the map
    pub y: f32,
    /// Z coordinate on the map
    pub z: f32,
}

impl Position {
    /// Creates a new position.
    #[must_use]
    pub const fn new(map: MapId, x: f32, y: f32, z: f32) -> Self {
        Self { map, x, y, z }
    }

    /// Returns a copy of this position moved to another map/coordinate.
    #[must_use]
    pub const fn relocated(self, map: MapId, x: f32, y: f32, z: f32) -> Self {
        Self::new(map, x, y, z)
    }

    /// Checks whether both positions are on the same map.
    #[must_use]
    pub fn same_map(&self, other: &Self) -> bool {
        self.map == other.map
    }
}
