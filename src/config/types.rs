use std::time::Duration;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::device::address::DeviceAddress;
use crate::device::constants::{BOND_NONE, CONNECT_TIMEOUT, DISCONNECT_TIMEOUT, PRIORITY_UNDEFINED};
use crate::profile::policy::MemoryPolicy;

/// A device the policy table should know about at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfig {
    pub address: DeviceAddress,
    #[serde(default = "default_bond_state")]
    pub bond_state: i32,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default)]
    pub uuids: Vec<Uuid>,
}

fn default_bond_state() -> i32 {
    BOND_NONE
}

fn default_priority() -> i32 {
    PRIORITY_UNDEFINED
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub connect_timeout_ms: u64,
    pub disconnect_timeout_ms: u64,
    pub max_connected_devices: Option<usize>,
    pub connect_group_members: bool,
    pub required_profile_uuid: Option<Uuid>,
    pub devices: Vec<DeviceConfig>,
}

impl Config {
    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            disconnect_timeout: Duration::from_millis(self.disconnect_timeout_ms),
            max_connected_devices: self.max_connected_devices,
            connect_group_members: self.connect_group_members,
            required_profile_uuid: self.required_profile_uuid,
        }
    }

    /// A policy table seeded with the configured devices.
    pub fn policy(&self) -> MemoryPolicy {
        let policy = MemoryPolicy::new();

        for device in &self.devices {
            policy.set_bond_state(device.address, device.bond_state);
            policy.set_priority(device.address, device.priority);
            policy.set_uuids(device.address, device.uuids.clone());
        }

        policy
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            connect_timeout_ms: CONNECT_TIMEOUT,
            disconnect_timeout_ms: DISCONNECT_TIMEOUT,
            max_connected_devices: None,
            connect_group_members: false,
            required_profile_uuid: None,
            devices: Vec::new(),
        }
    }
}

/// Runtime settings of the profile service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceConfig {
    /// How long a device may stay Connecting
    pub connect_timeout: Duration,
    /// How long a device may stay Disconnecting
    pub disconnect_timeout: Duration,
    /// Upper bound on devices that are Connecting or Connected at the same time
    pub max_connected_devices: Option<usize>,
    /// Connecting one member of a group also connects the others
    pub connect_group_members: bool,
    /// When set, only devices advertising this service may be connected
    pub required_profile_uuid: Option<Uuid>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Config::default().service_config()
    }
}
