use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

use crate::device::address::DeviceAddress;
use crate::device::constants::{BOND_NONE, PRIORITY_UNDEFINED};
use crate::device::types::{BondState, Priority};

/// Per-device facts owned by the rest of the system. Values are raw so that whatever the
/// platform reports reaches the admission check unfiltered.
pub trait DevicePolicy: Send + Sync {
    fn bond_state(&self, device: &DeviceAddress) -> i32;
    fn priority(&self, device: &DeviceAddress) -> i32;
    fn remote_uuids(&self, device: &DeviceAddress) -> Vec<Uuid>;
}

/// Admission check: the device must be bonded (or bonding) and its priority must not be Off.
/// Unknown bond or priority values are rejected.
pub fn ok_to_connect(bond_state: i32, priority: i32) -> bool {
    let bonded = matches!(BondState::from_raw(bond_state), Some(BondState::Bonding | BondState::Bonded));

    match Priority::from_raw(priority) {
        None | Some(Priority::Off) => false,
        Some(Priority::Undefined | Priority::On | Priority::AutoConnect) => bonded,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PolicyRecord {
    bond_state: i32,
    priority: i32,
    uuids: Vec<Uuid>,
}

impl Default for PolicyRecord {
    fn default() -> Self {
        PolicyRecord {
            bond_state: BOND_NONE,
            priority: PRIORITY_UNDEFINED,
            uuids: Vec::new(),
        }
    }
}

/// In-process policy table. Devices it has never heard of are unbonded with an undefined
/// priority and no services.
#[derive(Debug, Default)]
pub struct MemoryPolicy {
    devices: RwLock<HashMap<DeviceAddress, PolicyRecord>>,
}

impl MemoryPolicy {
    pub fn new() -> Self {
        MemoryPolicy::default()
    }

    fn update<F: FnOnce(&mut PolicyRecord)>(&self, device: DeviceAddress, f: F) {
        let mut devices = self.devices.write().expect("Failed to lock MemoryPolicy");
        f(devices.entry(device).or_default());
    }

    fn read<T, F: FnOnce(&PolicyRecord) -> T>(&self, device: &DeviceAddress, f: F) -> T {
        let devices = self.devices.read().expect("Failed to lock MemoryPolicy");
        match devices.get(device) {
            Some(record) => f(record),
            None => f(&PolicyRecord::default()),
        }
    }

    pub fn set_bond_state(&self, device: DeviceAddress, bond_state: i32) {
        self.update(device, |record| record.bond_state = bond_state);
    }

    pub fn set_priority(&self, device: DeviceAddress, priority: i32) {
        self.update(device, |record| record.priority = priority);
    }

    pub fn set_uuids(&self, device: DeviceAddress, uuids: Vec<Uuid>) {
        self.update(device, |record| record.uuids = uuids);
    }
}

impl DevicePolicy for MemoryPolicy {
    fn bond_state(&self, device: &DeviceAddress) -> i32 {
        self.read(device, |record| record.bond_state)
    }

    fn priority(&self, device: &DeviceAddress) -> i32 {
        self.read(device, |record| record.priority)
    }

    fn remote_uuids(&self, device: &DeviceAddress) -> Vec<Uuid> {
        self.read(device, |record| record.uuids.clone())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::device::constants::{BOND_BONDED, BOND_BONDING, PRIORITY_AUTO_CONNECT, PRIORITY_OFF, PRIORITY_ON};

    const BAD_BOND_STATE: i32 = 42;
    const BAD_PRIORITY: i32 = 1024;

    #[test]
    fn test_ok_to_connect_table() {
        let cases = [
            (BOND_NONE, PRIORITY_UNDEFINED, false),
            (BOND_NONE, PRIORITY_OFF, false),
            (BOND_NONE, PRIORITY_ON, false),
            (BOND_NONE, PRIORITY_AUTO_CONNECT, false),
            (BOND_NONE, BAD_PRIORITY, false),
            (BOND_BONDING, PRIORITY_UNDEFINED, true),
            (BOND_BONDING, PRIORITY_OFF, false),
            (BOND_BONDING, PRIORITY_ON, true),
            (BOND_BONDING, PRIORITY_AUTO_CONNECT, true),
            (BOND_BONDING, BAD_PRIORITY, false),
            (BOND_BONDED, PRIORITY_UNDEFINED, true),
            (BOND_BONDED, PRIORITY_OFF, false),
            (BOND_BONDED, PRIORITY_ON, true),
            (BOND_BONDED, PRIORITY_AUTO_CONNECT, true),
            (BOND_BONDED, BAD_PRIORITY, false),
            (BAD_BOND_STATE, PRIORITY_UNDEFINED, false),
            (BAD_BOND_STATE, PRIORITY_OFF, false),
            (BAD_BOND_STATE, PRIORITY_ON, false),
            (BAD_BOND_STATE, PRIORITY_AUTO_CONNECT, false),
            (BAD_BOND_STATE, BAD_PRIORITY, false),
        ];

        for (bond_state, priority, expected) in cases {
            assert_eq!(
                ok_to_connect(bond_state, priority),
                expected,
                "bond state {} priority {}",
                bond_state,
                priority
            );
        }
    }

    #[test]
    fn test_memory_policy_defaults_for_unknown_devices() {
        let policy = MemoryPolicy::new();
        let device = DeviceAddress([1, 1, 1, 1, 1, 1]);

        assert_eq!(policy.bond_state(&device), BOND_NONE);
        assert_eq!(policy.priority(&device), PRIORITY_UNDEFINED);
        assert!(policy.remote_uuids(&device).is_empty());
    }

    #[test]
    fn test_memory_policy_setters_are_independent() {
        let policy = MemoryPolicy::new();
        let device = DeviceAddress([1, 1, 1, 1, 1, 1]);

        policy.set_bond_state(device, BOND_BONDED);
        policy.set_priority(device, PRIORITY_ON);

        assert_eq!(policy.bond_state(&device), BOND_BONDED);
        assert_eq!(policy.priority(&device), PRIORITY_ON);
        assert!(policy.remote_uuids(&device).is_empty());
    }
}
