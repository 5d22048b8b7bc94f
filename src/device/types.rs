use std::fmt;
use serde::{Deserialize, Serialize};

use crate::device::address::DeviceAddress;
use crate::device::constants::{
    BOND_BONDED, BOND_BONDING, BOND_NONE, CONNECTION_STATE_CONNECTED, CONNECTION_STATE_CONNECTING,
    CONNECTION_STATE_DISCONNECTED, CONNECTION_STATE_DISCONNECTING, PRIORITY_AUTO_CONNECT, PRIORITY_OFF,
    PRIORITY_ON, PRIORITY_UNDEFINED,
};

/// The profile connection state of one remote device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl ConnectionState {
    /// Maps a raw stack value; `None` for anything the stack should never report.
    pub fn from_raw(value: i32) -> Option<Self> {
        match value {
            CONNECTION_STATE_DISCONNECTED => Some(ConnectionState::Disconnected),
            CONNECTION_STATE_CONNECTING => Some(ConnectionState::Connecting),
            CONNECTION_STATE_CONNECTED => Some(ConnectionState::Connected),
            CONNECTION_STATE_DISCONNECTING => Some(ConnectionState::Disconnecting),
            _ => None,
        }
    }

    pub fn to_raw(self) -> i32 {
        match self {
            ConnectionState::Disconnected => CONNECTION_STATE_DISCONNECTED,
            ConnectionState::Connecting => CONNECTION_STATE_CONNECTING,
            ConnectionState::Connected => CONNECTION_STATE_CONNECTED,
            ConnectionState::Disconnecting => CONNECTION_STATE_DISCONNECTING,
        }
    }

    /// Connecting or Connected: the device holds (or is about to hold) a connection slot.
    pub fn is_active(self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Disconnecting => "Disconnecting",
        };

        write!(f, "{}", result)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BondState {
    None,
    Bonding,
    Bonded,
}

impl BondState {
    pub fn from_raw(value: i32) -> Option<Self> {
        match value {
            BOND_NONE => Some(BondState::None),
            BOND_BONDING => Some(BondState::Bonding),
            BOND_BONDED => Some(BondState::Bonded),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Undefined,
    Off,
    On,
    AutoConnect,
}

impl Priority {
    pub fn from_raw(value: i32) -> Option<Self> {
        match value {
            PRIORITY_UNDEFINED => Some(Priority::Undefined),
            PRIORITY_OFF => Some(Priority::Off),
            PRIORITY_ON => Some(Priority::On),
            PRIORITY_AUTO_CONNECT => Some(Priority::AutoConnect),
            _ => None,
        }
    }
}

/// Identifies a set of devices that are used together, e.g. the two sides of a binaural pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupId(pub u64);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackEventKind {
    /// The stack reports a new connection state. The raw value is validated by the receiver.
    ConnectionStateChanged { state: i32 },
    /// The stack discovered the device's capabilities and the group it belongs to.
    DeviceAvailable { capabilities: u8, group_id: u64 },
}

/// An asynchronous notification from the backend about one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackEvent {
    pub device: DeviceAddress,
    pub kind: StackEventKind,
}

impl StackEvent {
    pub fn connection_state(device: DeviceAddress, state: i32) -> Self {
        StackEvent { device, kind: StackEventKind::ConnectionStateChanged { state } }
    }

    pub fn device_available(device: DeviceAddress, capabilities: u8, group_id: u64) -> Self {
        StackEvent { device, kind: StackEventKind::DeviceAvailable { capabilities, group_id } }
    }
}

/// Emitted once for every accepted transition, old and new state verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStateChanged {
    pub device: DeviceAddress,
    pub previous: ConnectionState,
    pub new: ConnectionState,
}

impl fmt::Display for ConnectionStateChanged {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} -> {}", self.device, self.previous, self.new)
    }
}
