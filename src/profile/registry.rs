//! Owns every device state machine and decides which devices may hold a connection.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use indexmap::IndexMap;
use log::{debug, info, warn};

use crate::backend::ProfileBackend;
use crate::config::types::ServiceConfig;
use crate::device::address::DeviceAddress;
use crate::device::constants::{BOND_NONE, CAPABILITY_BINAURAL, CAPABILITY_SIDE_RIGHT};
use crate::device::state_machine::{DeviceStateMachine, MachineContext, MachineInput};
use crate::device::timer::{TimerExpired, TimerSource};
use crate::device::types::{ConnectionState, ConnectionStateChanged, GroupId, StackEvent, StackEventKind};
use crate::profile::policy::{self, DevicePolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActiveKey {
    Group(GroupId),
    Device(DeviceAddress),
}

pub struct DeviceRegistry {
    config: ServiceConfig,
    backend: Box<dyn ProfileBackend>,
    policy: Arc<dyn DevicePolicy>,
    timers: TimerSource,
    machines: IndexMap<DeviceAddress, DeviceStateMachine>,
    groups: HashMap<DeviceAddress, GroupId>,
    capabilities: HashMap<DeviceAddress, u8>,
    // devices holding a connection slot, earliest admission first
    admitted: VecDeque<DeviceAddress>,
    active: Option<ActiveKey>,
    subscribers: Vec<UnboundedSender<ConnectionStateChanged>>,
}

impl DeviceRegistry {
    pub fn new(
        config: ServiceConfig,
        backend: Box<dyn ProfileBackend>,
        policy: Arc<dyn DevicePolicy>,
        timers: TimerSource,
    ) -> Self {
        DeviceRegistry {
            config,
            backend,
            policy,
            timers,
            machines: IndexMap::new(),
            groups: HashMap::new(),
            capabilities: HashMap::new(),
            admitted: VecDeque::new(),
            active: None,
            subscribers: Vec::new(),
        }
    }

    pub fn subscribe(&mut self) -> UnboundedReceiver<ConnectionStateChanged> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    pub fn ok_to_connect(&self, device: &DeviceAddress) -> bool {
        policy::ok_to_connect(self.policy.bond_state(device), self.policy.priority(device))
    }

    /// Returns true when the device ended up Connecting.
    pub fn connect(&mut self, device: DeviceAddress) -> bool {
        if !self.connect_one(device) {
            return false;
        }

        if self.config.connect_group_members {
            self.connect_group_members(device);
        }

        true
    }

    fn connect_one(&mut self, device: DeviceAddress) -> bool {
        if !self.ok_to_connect(&device) {
            info!("{}: connect rejected, bond state {} priority {}",
                device, self.policy.bond_state(&device), self.policy.priority(&device));
            return false;
        }

        if let Some(uuid) = self.config.required_profile_uuid {
            if !self.policy.remote_uuids(&device).contains(&uuid) {
                info!("{}: connect rejected, service {} not advertised", device, uuid);
                return false;
            }
        }

        let state = self.get_connection_state(&device);
        if state != ConnectionState::Disconnected {
            info!("{}: connect rejected, already {}", device, state);
            return false;
        }

        self.machines.entry(device).or_insert_with(|| DeviceStateMachine::new(device));
        self.dispatch(device, MachineInput::Connect);

        self.get_connection_state(&device) == ConnectionState::Connecting
    }

    fn connect_group_members(&mut self, device: DeviceAddress) {
        let Some(group) = self.groups.get(&device).copied() else {
            return;
        };

        let mut members: Vec<DeviceAddress> = self.groups.iter()
            .filter(|(member, member_group)| **member != device && **member_group == group)
            .map(|(member, _)| *member)
            .collect();
        members.sort();

        for member in members {
            if self.get_connection_state(&member) == ConnectionState::Disconnected && self.ok_to_connect(&member) {
                info!("{}: connecting group {} member {}", device, group, member);
                self.connect_one(member);
            }
        }
    }

    /// Returns false unless the device is Connecting or Connected.
    pub fn disconnect(&mut self, device: DeviceAddress) -> bool {
        match self.machines.get(&device).map(|machine| machine.connection_state()) {
            Some(ConnectionState::Connecting | ConnectionState::Connected) => {
                self.dispatch(device, MachineInput::Disconnect);
                true
            },
            state => {
                debug!("{}: nothing to disconnect, {}", device, state.unwrap_or(ConnectionState::Disconnected));
                false
            },
        }
    }

    pub fn handle_stack_event(&mut self, event: StackEvent) {
        let device = event.device;

        match event.kind {
            StackEventKind::DeviceAvailable { capabilities, group_id } => {
                let group = GroupId(group_id);
                info!(
                    "{}: available, group {} {} {}",
                    device,
                    group,
                    if capabilities & CAPABILITY_SIDE_RIGHT != 0 { "right" } else { "left" },
                    if capabilities & CAPABILITY_BINAURAL != 0 { "binaural" } else { "monaural" },
                );
                self.capabilities.insert(device, capabilities);
                self.groups.insert(device, group);
            },
            StackEventKind::ConnectionStateChanged { state: raw } => {
                let Some(state) = ConnectionState::from_raw(raw) else {
                    warn!("{}: dropping invalid connection state {}", device, raw);
                    return;
                };

                if !self.machines.contains_key(&device) {
                    if !state.is_active() {
                        debug!("{}: dropping {} for an untracked device", device, state);
                        return;
                    }
                    if !self.ok_to_connect(&device) {
                        warn!("{}: dropping incoming {}, not allowed to connect", device, state);
                        return;
                    }
                    self.machines.insert(device, DeviceStateMachine::new(device));
                }

                self.dispatch(device, MachineInput::StackState(state));
            },
        }
    }

    pub fn handle_timeout(&mut self, expired: TimerExpired) {
        if self.machines.contains_key(&expired.device) {
            self.dispatch(expired.device, MachineInput::Timeout(expired.generation));
        } else {
            debug!("{}: timer {} expired for an untracked device", expired.device, expired.generation);
        }
    }

    /// Removal is deferred until the device is Disconnected.
    pub fn bond_state_changed(&mut self, device: DeviceAddress, bond_state: i32) {
        if bond_state != BOND_NONE {
            return;
        }

        match self.machines.get(&device).map(|machine| machine.connection_state()) {
            None | Some(ConnectionState::Disconnected) => {
                if self.forget(&device) {
                    info!("{}: unbonded, removed", device);
                }
            },
            Some(state) => {
                debug!("{}: unbonded while {}, removal deferred", device, state);
            },
        }
    }

    /// Drops every Disconnected machine whose device is no longer bonded.
    pub fn remove_idle_unbonded(&mut self) -> usize {
        let idle: Vec<DeviceAddress> = self.machines.iter()
            .filter(|(device, machine)| {
                machine.connection_state() == ConnectionState::Disconnected
                    && self.policy.bond_state(device) == BOND_NONE
            })
            .map(|(device, _)| *device)
            .collect();

        for device in &idle {
            self.forget(device);
        }

        if !idle.is_empty() {
            info!("Removed {} idle unbonded device(s)", idle.len());
        }
        idle.len()
    }

    pub fn get_connection_state(&self, device: &DeviceAddress) -> ConnectionState {
        self.machines.get(device)
            .map(|machine| machine.connection_state())
            .unwrap_or(ConnectionState::Disconnected)
    }

    pub fn get_connected_devices(&self) -> Vec<DeviceAddress> {
        self.get_devices_matching_states(&[ConnectionState::Connected])
    }

    pub fn get_devices(&self) -> Vec<DeviceAddress> {
        self.machines.keys().copied().collect()
    }

    pub fn get_devices_matching_states(&self, states: &[ConnectionState]) -> Vec<DeviceAddress> {
        self.machines.iter()
            .filter(|(_, machine)| states.contains(&machine.connection_state()))
            .map(|(device, _)| *device)
            .collect()
    }

    /// The Connected members of the most recently connected group.
    pub fn get_active_devices(&self) -> Vec<DeviceAddress> {
        match self.active {
            None => Vec::new(),
            Some(key) => self.machines.iter()
                .filter(|(device, machine)| {
                    machine.connection_state() == ConnectionState::Connected && self.active_key(device) == key
                })
                .map(|(device, _)| *device)
                .collect(),
        }
    }

    pub fn get_group(&self, device: &DeviceAddress) -> Option<GroupId> {
        self.groups.get(device).copied()
    }

    pub fn get_capabilities(&self, device: &DeviceAddress) -> Option<u8> {
        self.capabilities.get(device).copied()
    }

    fn active_key(&self, device: &DeviceAddress) -> ActiveKey {
        match self.groups.get(device) {
            Some(group) => ActiveKey::Group(*group),
            None => ActiveKey::Device(*device),
        }
    }

    fn dispatch(&mut self, device: DeviceAddress, input: MachineInput) {
        let incoming_allowed = self.ok_to_connect(&device);

        let changes = {
            let Some(machine) = self.machines.get_mut(&device) else {
                return;
            };
            let ctx = MachineContext {
                backend: self.backend.as_ref(),
                timers: &self.timers,
                connect_timeout: self.config.connect_timeout,
                disconnect_timeout: self.config.disconnect_timeout,
                incoming_allowed,
            };
            machine.process(input, &ctx)
        };

        for change in &changes {
            self.emit(*change);
        }

        // the intermediate steps of a single input never hold a slot on their own
        if let (Some(first), Some(last)) = (changes.first(), changes.last()) {
            self.after_transition(device, first.previous, last.new);
        }
    }

    fn emit(&mut self, change: ConnectionStateChanged) {
        info!("{}", change);
        self.subscribers.retain(|subscriber| subscriber.unbounded_send(change).is_ok());
    }

    fn after_transition(&mut self, device: DeviceAddress, previous: ConnectionState, new: ConnectionState) {
        match new {
            ConnectionState::Connecting | ConnectionState::Connected => {
                let admitted = !previous.is_active();
                if admitted && !self.admitted.contains(&device) {
                    self.admitted.push_back(device);
                }

                if new == ConnectionState::Connected {
                    self.active = Some(self.active_key(&device));
                }

                if admitted || new == ConnectionState::Connected {
                    self.evict_other_groups(device);
                }

                if admitted {
                    self.enforce_slot_budget(device);
                }
            },
            ConnectionState::Disconnecting => {
                self.release(device);
            },
            ConnectionState::Disconnected => {
                self.release(device);

                if self.policy.bond_state(&device) == BOND_NONE {
                    info!("{}: disconnected and unbonded, removed", device);
                    self.forget(&device);
                }
            },
        }
    }

    // Drops the machine along with what DeviceAvailable reported. Returns true when a machine existed.
    fn forget(&mut self, device: &DeviceAddress) -> bool {
        self.groups.remove(device);
        self.capabilities.remove(device);
        self.machines.shift_remove(device).is_some()
    }

    fn release(&mut self, device: DeviceAddress) {
        self.admitted.retain(|admitted| *admitted != device);

        if let Some(key) = self.active {
            let still_connected = self.machines.iter().any(|(device, machine)| {
                machine.connection_state() == ConnectionState::Connected && self.active_key(device) == key
            });
            if !still_connected {
                debug!("No active devices left");
                self.active = None;
            }
        }
    }

    fn evict_other_groups(&mut self, device: DeviceAddress) {
        let Some(group) = self.groups.get(&device).copied() else {
            return;
        };

        let victims: Vec<DeviceAddress> = self.machines.iter()
            .filter(|(other, machine)| {
                **other != device
                    && machine.connection_state().is_active()
                    && self.groups.get(*other) != Some(&group)
            })
            .map(|(other, _)| *other)
            .collect();

        for victim in victims {
            info!("{}: disconnecting, group {} takes over", victim, group);
            self.dispatch(victim, MachineInput::Disconnect);
        }
    }

    fn enforce_slot_budget(&mut self, device: DeviceAddress) {
        let Some(max) = self.config.max_connected_devices else {
            return;
        };

        loop {
            let in_use = self.machines.values()
                .filter(|machine| machine.connection_state().is_active())
                .count();
            if in_use <= max {
                return;
            }

            let Some(victim) = self.admitted.iter().copied().find(|admitted| *admitted != device) else {
                return;
            };
            self.admitted.retain(|admitted| *admitted != victim);

            info!("{}: disconnecting, {} of {} slots in use", victim, in_use, max);
            self.dispatch(victim, MachineInput::Disconnect);
        }
    }
}
