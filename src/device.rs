//! Device & provisioning registry (C3).
//!
//! One record per `(user_id, device_id)`, enforcing the two-phase
//! provisioning handshake of `spec.md` §4.3. `PolicyKey` allocation is
//! a single process-wide monotonic counter; `0` is reserved for
//! "unset".

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

/// A device's place in the provisioning handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionState {
    Unprovisioned,
    Temporary(u32),
    Provisioned(u32),
}

impl ProvisionState {
    /// The `PolicyKey` a device in this state currently holds, if any.
    #[must_use]
    pub const fn policy_key(self) -> Option<u32> {
        match self {
            Self::Unprovisioned => None,
            Self::Temporary(k) | Self::Provisioned(k) => Some(k),
        }
    }
}

/// One registered device.
#[derive(Debug, Clone)]
pub struct Device {
    pub device_id: String,
    pub device_type: String,
    pub user_id: u64,
    pub state: ProvisionState,
    pub protocol_version: String,
    pub first_seen: u64,
    pub last_seen: u64,
}

impl Device {
    fn new(user_id: u64, device_id: &str, device_type: &str, now: u64) -> Self {
        Self {
            device_id: device_id.to_string(),
            device_type: device_type.to_string(),
            user_id,
            state: ProvisionState::Unprovisioned,
            protocol_version: "14.1".to_string(),
            first_seen: now,
            last_seen: now,
        }
    }

    #[must_use]
    pub const fn is_provisioned(&self) -> bool {
        matches!(self.state, ProvisionState::Provisioned(_))
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

/// Allocates `PolicyKey` values. Shared across all devices in a
/// registry; `0` is never returned.
#[derive(Debug, Default)]
struct PolicyKeyAllocator(AtomicU32);

impl PolicyKeyAllocator {
    fn next(&self) -> u32 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Tracks every device this server has seen, keyed by `(user_id, device_id)`.
///
/// Fine-grained locking: the outer map lock only guards membership,
/// each device is individually lockable.
#[derive(Default)]
pub struct DeviceRegistry {
    devices: Mutex<HashMap<(u64, String), Arc<Mutex<Device>>>>,
    policy_keys: PolicyKeyAllocator,
}

/// Outcome of a `Provision` request against the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// First handshake: a fresh temporary `PolicyKey` was issued.
    IssuedTemporary(u32),
    /// Second handshake: the temporary key was echoed back correctly,
    /// a final key was issued.
    IssuedFinal(u32),
    /// The echoed key did not match the device's current key.
    Mismatch,
}

impl DeviceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a device, creating it in `Unprovisioned` state on first contact.
    pub fn get_or_create(&self, user_id: u64, device_id: &str, device_type: &str) -> Arc<Mutex<Device>> {
        let key = (user_id, device_id.to_string());
        let mut devices = self.devices.lock().unwrap();
        devices
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(Device::new(user_id, device_id, device_type, now_unix()))))
            .clone()
    }

    /// Touch `last_seen` for a device. Called on every authenticated request.
    pub fn touch(&self, device: &Arc<Mutex<Device>>) {
        device.lock().unwrap().last_seen = now_unix();
    }

    /// Drive one step of the provisioning state machine for `device`.
    ///
    /// `echoed_key` is the `PolicyKey` the client sent along with the
    /// `Provision` command (`0` on the first request).
    pub fn provision(&self, device: &Arc<Mutex<Device>>, echoed_key: u32) -> ProvisionOutcome {
        let mut dev = device.lock().unwrap();
        match dev.state {
            ProvisionState::Unprovisioned if echoed_key == 0 => {
                let p1 = self.policy_keys.next();
                dev.state = ProvisionState::Temporary(p1);
                ProvisionOutcome::IssuedTemporary(p1)
            }
            ProvisionState::Temporary(p1) if echoed_key == p1 => {
                let p2 = self.policy_keys.next();
                dev.state = ProvisionState::Provisioned(p2);
                ProvisionOutcome::IssuedFinal(p2)
            }
            _ => {
                dev.state = ProvisionState::Unprovisioned;
                ProvisionOutcome::Mismatch
            }
        }
    }

    /// Validate the `X-MS-PolicyKey` header on a non-Provision request.
    ///
    /// On mismatch, per `spec.md` §4.3, the device is demoted back to
    /// `Unprovisioned` so the client is forced to re-provision.
    pub fn check_policy_key(&self, device: &Arc<Mutex<Device>>, presented: u32) -> bool {
        let mut dev = device.lock().unwrap();
        match dev.state {
            ProvisionState::Provisioned(p) if p == presented => true,
            _ => {
                dev.state = ProvisionState::Unprovisioned;
                false
            }
        }
    }
}
