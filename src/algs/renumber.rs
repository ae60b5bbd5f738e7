//! Renumbering of arena slots, fields, and cross references.
//!
//! A [`SlotRenumbering`] is a bijection between the *active* slots of an arena
//! and the dense range `0..n`. Defragmentation builds one per arena with
//! [`SlotRenumbering::compact`] (order-preserving) and uses it to remap
//! connectivity, surface facets, and caller-held per-vertex fields.

use crate::mesh_error::MeshAdaptError;
use crate::topology::slot::Slot;

/// Old-slot ↔ new-slot mapping over the active entries of an arena.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SlotRenumbering {
    old_to_new: Vec<Option<usize>>,
    new_to_old: Vec<usize>,
}

/// Renumbering of both mesh arenas produced by defragmentation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MeshRenumbering {
    /// Vertex slot mapping.
    pub vertices: SlotRenumbering,
    /// Element slot mapping.
    pub elements: SlotRenumbering,
}

impl SlotRenumbering {
    /// Order-preserving compaction of the active slots.
    pub fn compact<T>(slots: &[Slot<T>]) -> Self {
        let mut old_to_new = vec![None; slots.len()];
        let mut new_to_old = Vec::with_capacity(slots.len());
        for (old, slot) in slots.iter().enumerate() {
            if slot.is_active() {
                old_to_new[old] = Some(new_to_old.len());
                new_to_old.push(old);
            }
        }
        Self {
            old_to_new,
            new_to_old,
        }
    }

    /// Build from an explicit new order of the active slots.
    ///
    /// `permutation[new] = old`; every active slot must appear exactly once and
    /// no free slot may appear.
    pub fn from_permutation<T>(
        slots: &[Slot<T>],
        permutation: &[usize],
    ) -> Result<Self, MeshAdaptError> {
        let total = slots.iter().filter(|s| s.is_active()).count();
        if permutation.len() != total {
            return Err(MeshAdaptError::InvalidPermutation(format!(
                "expected {total} entries, got {}",
                permutation.len()
            )));
        }
        let mut old_to_new = vec![None; slots.len()];
        for (new, &old) in permutation.iter().enumerate() {
            match slots.get(old) {
                Some(slot) if slot.is_active() => {}
                _ => {
                    return Err(MeshAdaptError::InvalidPermutation(format!(
                        "unknown or free slot {old}"
                    )));
                }
            }
            if old_to_new[old].replace(new).is_some() {
                return Err(MeshAdaptError::InvalidPermutation(format!(
                    "duplicate slot {old}"
                )));
            }
        }
        Ok(Self {
            old_to_new,
            new_to_old: permutation.to_vec(),
        })
    }

    /// Number of active entries (the dense length after remapping).
    #[inline]
    pub fn len(&self) -> usize {
        self.new_to_old.len()
    }

    /// `true` when there are no active entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.new_to_old.is_empty()
    }

    /// Slot count before remapping.
    #[inline]
    pub fn old_len(&self) -> usize {
        self.old_to_new.len()
    }

    /// `true` when the mapping changes nothing.
    pub fn is_identity(&self) -> bool {
        self.old_len() == self.len() && self.new_to_old.iter().enumerate().all(|(n, &o)| n == o)
    }

    /// New index of an old slot; `None` for free or unknown slots.
    #[inline]
    pub fn new_index(&self, old: usize) -> Option<usize> {
        self.old_to_new.get(old).copied().flatten()
    }

    /// Old slot of a new index.
    #[inline]
    pub fn old_index(&self, new: usize) -> Option<usize> {
        self.new_to_old.get(new).copied()
    }

    /// [`Self::new_index`] as a `Result`, for remapping references that must stay valid.
    pub fn remap_index(&self, old: usize) -> Result<usize, MeshAdaptError> {
        self.new_index(old).ok_or_else(|| {
            MeshAdaptError::InvalidPermutation(format!("missing destination for slot {old}"))
        })
    }

    /// Reorder an arena, dropping free slots.
    pub fn remap_slots<T>(&self, mut slots: Vec<Slot<T>>) -> Result<Vec<Slot<T>>, MeshAdaptError> {
        if slots.len() != self.old_len() {
            return Err(MeshAdaptError::FieldLengthMismatch {
                expected: self.old_len(),
                found: slots.len(),
            });
        }
        let mut out = Vec::with_capacity(self.len());
        for &old in &self.new_to_old {
            let value = slots[old].release().ok_or_else(|| {
                MeshAdaptError::InvalidPermutation(format!("slot {old} is not active"))
            })?;
            out.push(Slot::Active(value));
        }
        Ok(out)
    }

    /// Remap a per-slot field with `components` values per entry.
    pub fn remap_field<V: Clone>(
        &self,
        values: &[V],
        components: usize,
    ) -> Result<Vec<V>, MeshAdaptError> {
        let expected = self.old_len() * components;
        if values.len() != expected {
            return Err(MeshAdaptError::FieldLengthMismatch {
                expected,
                found: values.len(),
            });
        }
        let mut out = Vec::with_capacity(self.len() * components);
        for &old in &self.new_to_old {
            out.extend_from_slice(&values[old * components..(old + 1) * components]);
        }
        Ok(out)
    }
}
