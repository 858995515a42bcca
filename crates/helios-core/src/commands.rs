//! Pending command slots for the writable panel fields.
//!
//! The UI side calls [`CommandQueue::set`] at any time, from any task, even
//! before a session exists. The polling scheduler calls
//! [`CommandQueue::take_if_pending`] when a writable field reaches the head
//! of the rotation. Each field has one slot, exchanged atomically, so the
//! two sides never block each other and a burst of requests collapses into a
//! single write.

use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};

use tracing::debug;

use helios_types::{COMMAND_ACTIVATE, FieldTag};

use crate::error::{Error, Result};

/// Slot value meaning "nothing pending".
const EMPTY: u16 = 0;

/// Marker bit set on a slot that holds a value.
const PENDING: u16 = 0x100;

fn pack(value: u8) -> u16 {
    PENDING | u16::from(value)
}

fn unpack(slot: u16) -> Option<u8> {
    if slot & PENDING != 0 {
        Some((slot & 0xFF) as u8)
    } else {
        None
    }
}

/// Latest-wins command slots, one per writable field.
///
/// Cloning yields another handle to the same slots.
#[derive(Debug, Clone, Default)]
pub struct CommandQueue {
    slots: Arc<[AtomicU16; 2]>,
}

impl CommandQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, field: FieldTag) -> Option<&AtomicU16> {
        match field {
            FieldTag::PowerCommand => Some(&self.slots[0]),
            FieldTag::SearchCommand => Some(&self.slots[1]),
            _ => None,
        }
    }

    /// Set the pending value for a field, replacing any earlier one.
    ///
    /// Returns [`Error::NotWritable`] for fields that do not accept commands.
    pub fn set(&self, field: FieldTag, value: u8) -> Result<()> {
        let slot = self.slot(field).ok_or(Error::NotWritable(field))?;
        let previous = slot.swap(pack(value), Ordering::AcqRel);
        if unpack(previous).is_some() {
            debug!(%field, value, "Replaced pending command");
        } else {
            debug!(%field, value, "Queued command");
        }
        Ok(())
    }

    /// Queue the activate command for a field.
    pub fn request_command(&self, field: FieldTag) -> Result<()> {
        self.set(field, COMMAND_ACTIVATE)
    }

    /// Atomically take and clear the pending value for a field.
    pub fn take_if_pending(&self, field: FieldTag) -> Option<u8> {
        self.slot(field)
            .and_then(|slot| unpack(slot.swap(EMPTY, Ordering::AcqRel)))
    }

    /// Whether a value is pending for a field.
    pub fn is_pending(&self, field: FieldTag) -> bool {
        self.slot(field)
            .is_some_and(|slot| unpack(slot.load(Ordering::Acquire)).is_some())
    }

    /// Put a value back after a failed write.
    ///
    /// Only fills an empty slot: a command requested while the write was in
    /// flight wins over the one being restored. Returns whether the value was
    /// restored.
    pub fn restore(&self, field: FieldTag, value: u8) -> bool {
        self.slot(field).is_some_and(|slot| {
            slot.compare_exchange(EMPTY, pack(value), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        })
    }

    /// Drop every pending command.
    pub fn clear(&self) {
        for slot in self.slots.iter() {
            slot.store(EMPTY, Ordering::Release);
        }
    }
}
