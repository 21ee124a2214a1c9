//! Channel id allocation
//!
//! Every open connection holds one small integer channel id, unique for as
//! long as the connection is open. Ids follow a lowest-free policy: closing
//! a connection returns its id to the pool and the next construction takes
//! the smallest id available, not a fresh monotonic one.

use crate::constants::DEFAULT_CHANNEL_CAPACITY;
use crate::error::{LinkError, Result};
use parking_lot::Mutex;
use std::sync::OnceLock;

/// Identifier of one open connection
pub type ChannelId = usize;

/// Lowest-free-id allocator with a fixed capacity
pub struct ChannelRegistry {
    slots: Mutex<Vec<bool>>,
}

impl ChannelRegistry {
    /// Create a registry with the default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a registry with room for `capacity` simultaneous connections
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Mutex::new(vec![false; capacity]),
        }
    }

    /// Claim the smallest free id
    ///
    /// # Errors
    ///
    /// `ChannelsExhausted` when every slot is in use.
    pub fn allocate(&self) -> Result<ChannelId> {
        let mut slots = self.slots.lock();
        match slots.iter().position(|used| !used) {
            Some(id) => {
                slots[id] = true;
                Ok(id)
            }
            None => Err(LinkError::ChannelsExhausted {
                capacity: slots.len(),
            }),
        }
    }

    /// Return `id` to the pool
    ///
    /// Must be called exactly once per live allocation; out-of-range ids
    /// are ignored.
    pub fn release(&self, id: ChannelId) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get_mut(id) {
            debug_assert!(*slot, "releasing channel {} that is not allocated", id);
            *slot = false;
        }
    }

    /// Number of ids currently allocated
    pub fn in_use(&self) -> usize {
        self.slots.lock().iter().filter(|used| **used).count()
    }

    /// Total number of slots
    pub fn capacity(&self) -> usize {
        self.slots.lock().len()
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The process-wide registry used by `Connection`
pub(crate) fn global() -> &'static ChannelRegistry {
    static REGISTRY: OnceLock<ChannelRegistry> = OnceLock::new();
    REGISTRY.get_or_init(ChannelRegistry::new)
}
