//! Application registry and connection id mapping.
//!
//! Each registered application owns up to two callbacks: one receiving
//! discovery records as they are parsed, one receiving operation
//! completions, notifications, and indications. Both run synchronously on
//! the stack's execution context, so they must return promptly.

use super::types::{ClientOp, CompletionData, DiscoveryKind, DiscoveryResult, GattStatus};
use crate::att::constants::GATT_MAX_APPS;
use std::sync::{Arc, Mutex};

/// Callback receiving one discovery record.
pub type DiscoveryCallback =
    Arc<Mutex<dyn FnMut(u16, DiscoveryKind, &DiscoveryResult) + Send + 'static>>;

/// Callback receiving operation completions and server-initiated values.
pub type CompletionCallback =
    Arc<Mutex<dyn FnMut(u16, ClientOp, GattStatus, CompletionData<'_>) + Send + 'static>>;

/// Callback pair supplied at registration time.
#[derive(Default, Clone)]
pub struct AppCallbacks {
    pub discovery: Option<DiscoveryCallback>,
    pub completion: Option<CompletionCallback>,
}

struct Registration {
    callbacks: AppCallbacks,
}

/// Fixed-capacity table of registered applications.
pub(crate) struct Registry {
    apps: Vec<Option<Registration>>,
}

impl Registry {
    pub fn new() -> Self {
        let mut apps = Vec::with_capacity(GATT_MAX_APPS);
        apps.resize_with(GATT_MAX_APPS, || None);
        Registry { apps }
    }

    /// Register an application; the returned app id is non-zero.
    pub fn register(&mut self, callbacks: AppCallbacks) -> Option<u8> {
        let slot = self.apps.iter().position(|r| r.is_none())?;
        self.apps[slot] = Some(Registration { callbacks });
        Some(slot as u8 + 1)
    }

    pub fn deregister(&mut self, app_id: u8) -> bool {
        match self.slot(app_id) {
            Some(slot) if self.apps[slot].is_some() => {
                self.apps[slot] = None;
                true
            }
            _ => false,
        }
    }

    fn slot(&self, app_id: u8) -> Option<usize> {
        let slot = (app_id as usize).checked_sub(1)?;
        (slot < self.apps.len()).then(|| slot)
    }

    pub fn is_registered(&self, app_id: u8) -> bool {
        self.slot(app_id)
            .map_or(false, |slot| self.apps[slot].is_some())
    }

    pub fn discovery_cb(&self, app_id: u8) -> Option<DiscoveryCallback> {
        let slot = self.slot(app_id)?;
        self.apps[slot].as_ref()?.callbacks.discovery.clone()
    }

    pub fn completion_cb(&self, app_id: u8) -> Option<CompletionCallback> {
        let slot = self.slot(app_id)?;
        self.apps[slot].as_ref()?.callbacks.completion.clone()
    }

    /// All applications carrying a completion callback, in registration
    /// order. Used for notification and indication fan-out.
    pub fn completion_subscribers(&self) -> Vec<(u8, CompletionCallback)> {
        self.apps
            .iter()
            .enumerate()
            .filter_map(|(slot, reg)| {
                let cb = reg.as_ref()?.callbacks.completion.clone()?;
                Some((slot as u8 + 1, cb))
            })
            .collect()
    }
}

/// Connection id for an (application, bearer) pairing.
pub const fn connection_id(tcb_idx: u8, app_id: u8) -> u16 {
    ((tcb_idx as u16) << 8) | app_id as u16
}

/// Inverse of [`connection_id`]: `(tcb_idx, app_id)`.
pub const fn split_connection_id(conn_id: u16) -> (u8, u8) {
    ((conn_id >> 8) as u8, conn_id as u8)
}
