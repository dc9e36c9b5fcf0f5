//! Collaborator interfaces to the host control framework.
//!
//! The bridge never talks to the control framework directly; it pushes
//! through these three seams, which the embedding process implements:
//!
//! - [`Notifier`] — change-notification push for attribute events
//! - [`PropertyStore`] — key/value persistence for memorized attributes
//! - [`StateSink`] — device state/status driven by the poll scheduler
//!
//! All three are object-safe so the device wiring can hold them as trait
//! objects behind `Arc`.

use std::time::SystemTime;

use crate::error::Result;
use crate::poll::DeviceState;
use crate::{Quality, Value};

/// Change-notification push into the control framework.
pub trait Notifier: Send + Sync {
    /// Emits one notification for a changed attribute.
    fn notify(&self, name: &str, value: &Value, timestamp: SystemTime, quality: Quality);
}

/// External key/value store for memorized attribute fields.
pub trait PropertyStore: Send + Sync {
    /// Persists one field of one attribute.
    fn store(&self, device: &str, attr: &str, field: &str, value: &str) -> Result<()>;

    /// Recovers a previously stored field, `None` when absent.
    fn recover(&self, device: &str, attr: &str, field: &str) -> Result<Option<String>>;
}

/// Device state/status sink driven by the poll scheduler's state machine.
pub trait StateSink: Send + Sync {
    /// Pushes a device state transition.
    fn set_state(&self, state: DeviceState);

    /// Pushes the last significant condition as status text.
    fn set_status(&self, status: &str);
}

/// No-op collaborators for embeddings that do not wire a given seam.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHooks;

impl Notifier for NullHooks {
    fn notify(&self, _name: &str, _value: &Value, _timestamp: SystemTime, _quality: Quality) {}
}

impl PropertyStore for NullHooks {
    fn store(&self, _device: &str, _attr: &str, _field: &str, _value: &str) -> Result<()> {
        Ok(())
    }

    fn recover(&self, _device: &str, _attr: &str, _field: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

impl StateSink for NullHooks {
    fn set_state(&self, _state: DeviceState) {}

    fn set_status(&self, _status: &str) {}
}
