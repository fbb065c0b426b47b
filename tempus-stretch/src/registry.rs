//! Generation-counted handle table for hosts that address handles by id.
//!
//! Ids are plain `Copy` values (convertible to a `u64`), so they can cross a
//! language boundary. A disposed slot is reused with a bumped generation and
//! stale ids keep failing with [`StretchError::InvalidHandle`]. Raw id `0` is
//! never issued and can serve as a null handle.
//!
//! Each handle sits behind its own mutex: calls on one id are serialized,
//! calls on different ids run in parallel.

use crate::error::StretchError;
use crate::handle::StretchHandle;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tempus_engine::Preset;
use tracing::debug;

/// Identifier of a handle inside a [`HandleRegistry`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId {
    index: u32,
    generation: u32,
}

impl HandleId {
    /// Pack into a single integer (generation in the high half)
    pub fn to_raw(self) -> u64 {
        ((self.generation as u64) << 32) | self.index as u64
    }

    pub fn from_raw(raw: u64) -> Self {
        Self {
            index: raw as u32,
            generation: (raw >> 32) as u32,
        }
    }
}

type SharedHandle = Arc<Mutex<StretchHandle>>;

struct Slot {
    generation: u32,
    handle: Option<SharedHandle>,
}

#[derive(Default)]
struct Table {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

/// Thread-safe table of stretch handles
#[derive(Default)]
pub struct HandleRegistry {
    table: RwLock<Table>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a handle with the [`Preset::Cheaper`] preset and register it
    pub fn create(&self, channel_count: i32, sample_rate: f32) -> Result<HandleId, StretchError> {
        self.create_with_preset(channel_count, sample_rate, Preset::Cheaper)
    }

    pub fn create_with_preset(
        &self,
        channel_count: i32,
        sample_rate: f32,
        preset: Preset,
    ) -> Result<HandleId, StretchError> {
        let handle = StretchHandle::create_with_preset(channel_count, sample_rate, preset)?;
        let shared = Arc::new(Mutex::new(handle));

        let mut table = self.table.write();
        let id = match table.free.pop() {
            Some(index) => {
                let slot = &mut table.slots[index as usize];
                slot.handle = Some(shared);
                HandleId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = table.slots.len() as u32;
                table.slots.push(Slot {
                    generation: 1,
                    handle: Some(shared),
                });
                HandleId {
                    index,
                    generation: 1,
                }
            }
        };
        table.live += 1;

        debug!(raw = id.to_raw(), "Registered stretch handle");
        Ok(id)
    }

    fn lookup(&self, id: HandleId) -> Result<SharedHandle, StretchError> {
        let table = self.table.read();
        table
            .slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.handle.clone())
            .ok_or(StretchError::InvalidHandle)
    }

    /// Run `f` with exclusive access to the handle behind `id`
    pub fn with_handle<R>(
        &self,
        id: HandleId,
        f: impl FnOnce(&mut StretchHandle) -> R,
    ) -> Result<R, StretchError> {
        let shared = self.lookup(id)?;
        let mut handle = shared.lock();
        Ok(f(&mut handle))
    }

    /// See [`StretchHandle::process`]
    pub fn process(
        &self,
        id: HandleId,
        inputs: &[&[f32]],
        input_samples: usize,
        outputs: &mut [&mut [f32]],
        output_samples: usize,
    ) -> Result<(), StretchError> {
        self.with_handle(id, |handle| {
            handle.process(inputs, input_samples, outputs, output_samples)
        })?
    }

    pub fn reset(&self, id: HandleId) -> Result<(), StretchError> {
        self.with_handle(id, |handle| handle.reset())?
    }

    /// Dispose the handle and retire `id`. Disposing again fails with
    /// [`StretchError::InvalidHandle`].
    pub fn dispose(&self, id: HandleId) -> Result<(), StretchError> {
        let shared = {
            let mut table = self.table.write();
            let slot = table
                .slots
                .get_mut(id.index as usize)
                .filter(|slot| slot.generation == id.generation)
                .ok_or(StretchError::InvalidHandle)?;
            let shared = slot.handle.take().ok_or(StretchError::InvalidHandle)?;
            slot.generation = match slot.generation.wrapping_add(1) {
                0 => 1,
                next => next,
            };
            table.free.push(id.index);
            table.live -= 1;
            shared
        };

        // Waits for any in-flight call on this handle
        let result = shared.lock().dispose();
        debug!(raw = id.to_raw(), "Retired stretch handle");
        result
    }

    pub fn contains(&self, id: HandleId) -> bool {
        self.lookup(id).is_ok()
    }

    /// Number of live handles
    pub fn len(&self) -> usize {
        self.table.read().live
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
