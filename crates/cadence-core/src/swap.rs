use std::ops::{Deref, DerefMut};

use parking_lot::{Mutex, MutexGuard};
use thiserror::Error;

const MAX_SLOTS: usize = 4;

/// Configuration for a [`SwapBufferGuard`].
#[derive(Debug, Clone, Copy)]
pub struct SwapBufferConfig {
    /// Number of slots, between 2 and 4. Three is the usual choice: one
    /// being written, one fully written, one being read.
    pub slots: usize,
    /// When set, a read that finds no new completed write re-acquires the
    /// previously read slot instead of failing, so a slow consumer keeps
    /// re-presenting the last valid snapshot.
    pub repeated_reads: bool,
    /// When set, a write that finds no free slot re-acquires the slot of the
    /// last completed write, overwriting it in place.
    pub repeated_writes: bool,
}

impl Default for SwapBufferConfig {
    fn default() -> Self {
        Self {
            slots: 3,
            repeated_reads: false,
            repeated_writes: false,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SwapBufferError {
    #[error("swap buffer requires between 2 and 4 slots, got {0}")]
    InvalidSlotCount(usize),
    #[error("{slots} slots are too few for the requested repeated read/write modes")]
    TooFewSlotsForModes { slots: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Nothing,
    Reading,
    Read,
    Writing,
    Wrote,
}

struct Rotation {
    states: [SlotState; MAX_SLOTS],
    read_index: usize,
    write_index: usize,
}

/// N-slot non-blocking hand-off primitive between one producer and one
/// consumer role.
///
/// `write()` and `read()` either return a scoped lock over a slot or `None`;
/// they never block and never allocate. A written slot becomes visible to the
/// reader only once the write lock has been dropped, so the consumer always
/// observes fully written, internally consistent snapshots. Callers treat a
/// failed acquisition as "skip this tick, try again next tick".
pub struct SwapBufferGuard<T> {
    rotation: Mutex<Rotation>,
    slots: Box<[Mutex<T>]>,
    slot_count: usize,
    repeated_reads: bool,
    repeated_writes: bool,
}

impl<T: Default> SwapBufferGuard<T> {
    /// Creates a guard with `config.slots` default-initialized payloads.
    pub fn new(config: SwapBufferConfig) -> Result<Self, SwapBufferError> {
        Self::with_slots(config, |_| T::default())
    }
}

impl<T> SwapBufferGuard<T> {
    /// Creates a guard, building each slot payload with `init`.
    pub fn with_slots(
        config: SwapBufferConfig,
        mut init: impl FnMut(usize) -> T,
    ) -> Result<Self, SwapBufferError> {
        if config.slots < 2 || config.slots > MAX_SLOTS {
            return Err(SwapBufferError::InvalidSlotCount(config.slots));
        }
        let reserved = 1 + usize::from(config.repeated_reads) + usize::from(config.repeated_writes);
        if config.slots <= reserved {
            return Err(SwapBufferError::TooFewSlotsForModes {
                slots: config.slots,
            });
        }
        let slots: Box<[Mutex<T>]> = (0..config.slots).map(|i| Mutex::new(init(i))).collect();
        Ok(Self {
            rotation: Mutex::new(Rotation {
                states: [SlotState::Nothing; MAX_SLOTS],
                read_index: 0,
                write_index: 0,
            }),
            slots,
            slot_count: config.slots,
            repeated_reads: config.repeated_reads,
            repeated_writes: config.repeated_writes,
        })
    }

    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    #[inline]
    fn next(&self, index: usize) -> usize {
        (index + 1) % self.slot_count
    }

    /// Acquires a slot for writing, or returns `None` when no slot is
    /// currently writable (or another write is still in progress).
    pub fn write(&self) -> Option<SwapWriteGuard<'_, T>> {
        let mut rotation = self.rotation.lock();
        if rotation.states[..self.slot_count]
            .iter()
            .any(|state| *state == SlotState::Writing)
        {
            return None;
        }
        let next = self.next(rotation.write_index);
        let index = if self.repeated_writes {
            if (next != rotation.read_index && rotation.states[next] == SlotState::Read)
                || rotation.states[next] == SlotState::Nothing
            {
                rotation.write_index = next;
                next
            } else if rotation.states[rotation.write_index] == SlotState::Wrote {
                rotation.write_index
            } else {
                return None;
            }
        } else {
            if rotation.states[next] == SlotState::Read
                || rotation.states[next] == SlotState::Nothing
            {
                rotation.write_index = next;
                next
            } else {
                return None;
            }
        };
        // The rotation states guarantee nobody holds this slot.
        let slot = self.slots[index].try_lock()?;
        rotation.states[index] = SlotState::Writing;
        Some(SwapWriteGuard {
            owner: self,
            slot: Some(slot),
            index,
        })
    }

    /// Acquires the most recently completed write for reading, or returns
    /// `None` when nothing (new) is available.
    pub fn read(&self) -> Option<SwapReadGuard<'_, T>> {
        let mut rotation = self.rotation.lock();
        if rotation.states[..self.slot_count]
            .iter()
            .any(|state| *state == SlotState::Reading)
        {
            return None;
        }
        let next = self.next(rotation.read_index);
        let index = if self.repeated_reads {
            if next != rotation.write_index && rotation.states[next] == SlotState::Wrote {
                rotation.read_index = next;
                next
            } else if rotation.states[rotation.read_index] == SlotState::Read {
                rotation.read_index
            } else {
                return None;
            }
        } else {
            if rotation.states[next] == SlotState::Wrote {
                rotation.read_index = next;
                next
            } else {
                return None;
            }
        };
        let slot = self.slots[index].try_lock()?;
        rotation.states[index] = SlotState::Reading;
        Some(SwapReadGuard {
            owner: self,
            slot: Some(slot),
            index,
        })
    }

    fn finish(&self, index: usize) {
        let mut rotation = self.rotation.lock();
        rotation.states[index] = match rotation.states[index] {
            SlotState::Reading => SlotState::Read,
            SlotState::Writing => SlotState::Wrote,
            other => {
                debug_assert!(false, "slot {index} finished in state {other:?}");
                other
            }
        };
    }
}

/// Scoped write acquisition; the slot becomes readable when this drops.
pub struct SwapWriteGuard<'a, T> {
    owner: &'a SwapBufferGuard<T>,
    slot: Option<MutexGuard<'a, T>>,
    index: usize,
}

impl<T> SwapWriteGuard<'_, T> {
    pub fn index(&self) -> usize {
        self.index
    }
}

impl<T> Deref for SwapWriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.slot.as_ref().expect("write slot released early")
    }
}

impl<T> DerefMut for SwapWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.slot.as_mut().expect("write slot released early")
    }
}

impl<T> Drop for SwapWriteGuard<'_, T> {
    fn drop(&mut self) {
        self.slot.take();
        self.owner.finish(self.index);
    }
}

/// Scoped read acquisition over the latest completed snapshot.
pub struct SwapReadGuard<'a, T> {
    owner: &'a SwapBufferGuard<T>,
    slot: Option<MutexGuard<'a, T>>,
    index: usize,
}

impl<T> SwapReadGuard<'_, T> {
    pub fn index(&self) -> usize {
        self.index
    }
}

impl<T> Deref for SwapReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.slot.as_ref().expect("read slot released early")
    }
}

impl<T> Drop for SwapReadGuard<'_, T> {
    fn drop(&mut self) {
        self.slot.take();
        self.owner.finish(self.index);
    }
}
