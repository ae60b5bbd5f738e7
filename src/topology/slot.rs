//! Arena slots for vertices, elements and facets.
//!
//! Entities are never erased while a refinement sweep runs: removal turns an
//! [`Slot::Active`] entry into [`Slot::Free`] so every other index stays valid.
//! Defragmentation later compacts the arena (see [`crate::algs::renumber`]).

use serde::{Deserialize, Serialize};

/// One arena entry: either a live entity or a free (logically deleted) slot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Slot<T> {
    /// Live entity data.
    Active(T),
    /// Logically deleted; the index may be reused or compacted away.
    Free,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Slot::Free
    }
}

impl<T> Slot<T> {
    /// Returns `true` for [`Slot::Active`].
    #[inline]
    pub fn is_active(&self) -> bool {
        matches!(self, Slot::Active(_))
    }

    /// Borrow the live payload, if any.
    #[inline]
    pub fn as_active(&self) -> Option<&T> {
        match self {
            Slot::Active(value) => Some(value),
            Slot::Free => None,
        }
    }

    /// Mutably borrow the live payload, if any.
    #[inline]
    pub fn as_active_mut(&mut self) -> Option<&mut T> {
        match self {
            Slot::Active(value) => Some(value),
            Slot::Free => None,
        }
    }

    /// Free the slot and hand back its payload.
    #[inline]
    pub fn release(&mut self) -> Option<T> {
        match std::mem::take(self) {
            Slot::Active(value) => Some(value),
            Slot::Free => None,
        }
    }
}

/// Iterate `(index, &payload)` over the active slots of an arena.
pub fn active_entries<T>(slots: &[Slot<T>]) -> impl Iterator<Item = (usize, &T)> + '_ {
    slots
        .iter()
        .enumerate()
        .filter_map(|(idx, slot)| slot.as_active().map(|value| (idx, value)))
}
