// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fixed-capacity slot pool for sample nodes and instance records.
//!
//! All slots are allocated up front; the pool never grows. Handles carry a
//! generation so a handle that outlived its slot (late transport callback,
//! double notification) resolves to `None` instead of aliasing the slot's
//! next occupant.
//!
//! # Performance
//!
//! - allocate: O(1) (free-list pop)
//! - free: O(1) (free-list push)

use std::fmt;

/// Handle to an occupied slot
///
/// `index` addresses the slot, `generation` is bumped on every free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotHandle {
    index: u32,
    generation: u32,
}

impl SlotHandle {
    #[inline]
    pub fn index(self) -> u32 {
        self.index
    }

    #[inline]
    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for SlotHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
    next_free: Option<u32>,
}

/// Preallocated pool of `T` addressed by [`SlotHandle`].
pub struct SlotPool<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    len: usize,
}

impl<T> SlotPool<T> {
    /// Create a pool with `capacity` slots (clamped to `u32::MAX`).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.min(u32::MAX as usize);
        let mut slots = Vec::with_capacity(capacity);
        for index in 0..capacity {
            let next = index + 1;
            slots.push(Slot {
                generation: 0,
                value: None,
                next_free: if next < capacity {
                    u32::try_from(next).ok()
                } else {
                    None
                },
            });
        }
        Self {
            slots,
            free_head: if capacity > 0 { Some(0) } else { None },
            len: 0,
        }
    }

    /// Store `value` in a free slot.
    ///
    /// Returns the value back when the pool is exhausted.
    pub fn allocate(&mut self, value: T) -> Result<SlotHandle, T> {
        let Some(index) = self.free_head else {
            return Err(value);
        };
        let slot = &mut self.slots[index as usize];
        self.free_head = slot.next_free.take();
        slot.value = Some(value);
        self.len += 1;
        Ok(SlotHandle {
            index,
            generation: slot.generation,
        })
    }

    /// Release a slot and return its value.
    ///
    /// `None` for a stale or foreign handle; the pool is unchanged then.
    pub fn free(&mut self, handle: SlotHandle) -> Option<T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        slot.next_free = self.free_head;
        self.free_head = Some(handle.index);
        self.len -= 1;
        Some(value)
    }

    #[inline]
    pub fn get(&self, handle: SlotHandle) -> Option<&T> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.value.as_ref()
    }

    #[inline]
    pub fn get_mut(&mut self, handle: SlotHandle) -> Option<&mut T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.value.as_mut()
    }

    #[inline]
    pub fn contains(&self, handle: SlotHandle) -> bool {
        self.get(handle).is_some()
    }

    /// Occupied slots.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.free_head.is_none()
    }

    /// Handles of all occupied slots, in slot order.
    pub fn handles(&self) -> impl Iterator<Item = SlotHandle> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value.as_ref()?;
            Some(SlotHandle {
                index: u32::try_from(index).ok()?,
                generation: slot.generation,
            })
        })
    }
}

impl<T> fmt::Debug for SlotPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotPool")
            .field("len", &self.len)
            .field("capacity", &self.slots.len())
            .finish()
    }
}
