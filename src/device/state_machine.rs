//! The connection lifecycle of a single remote device.
//!
//! The machine never talks to anything but the backend handed to it in the
//! [`MachineContext`]; every transition it accepts is returned to the caller as a
//! [`ConnectionStateChanged`] record, in the order the transitions happened.

use std::time::Duration;
use log::{debug, info, warn};

use crate::backend::ProfileBackend;
use crate::device::address::DeviceAddress;
use crate::device::timer::{ConnectTimer, TimerSource};
use crate::device::types::{ConnectionState, ConnectionStateChanged};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineInput {
    /// Local request for an outgoing connection
    Connect,
    /// Local request to tear down an active or pending connection
    Disconnect,
    /// The backend reported this state for the device
    StackState(ConnectionState),
    /// An armed timer with the given generation ran out
    Timeout(u64),
}

/// Everything a machine may use while processing one input.
pub struct MachineContext<'a> {
    pub backend: &'a dyn ProfileBackend,
    pub timers: &'a TimerSource,
    pub connect_timeout: Duration,
    pub disconnect_timeout: Duration,
    /// Whether policy lets the remote side bring up a connection that we did not ask for.
    pub incoming_allowed: bool,
}

#[derive(Debug)]
enum MachineState {
    Disconnected,
    Connecting {
        timer: ConnectTimer,
        // a local disconnect the backend refused while the connect was outstanding
        disconnect_queued: bool,
    },
    Connected,
    Disconnecting {
        timer: ConnectTimer,
    },
}

impl MachineState {
    fn connection_state(&self) -> ConnectionState {
        match self {
            MachineState::Disconnected => ConnectionState::Disconnected,
            MachineState::Connecting { .. } => ConnectionState::Connecting,
            MachineState::Connected => ConnectionState::Connected,
            MachineState::Disconnecting { .. } => ConnectionState::Disconnecting,
        }
    }

    fn timer_generation(&self) -> Option<u64> {
        match self {
            MachineState::Connecting { timer, .. } | MachineState::Disconnecting { timer } => Some(timer.generation()),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct DeviceStateMachine {
    device: DeviceAddress,
    state: MachineState,
}

impl DeviceStateMachine {
    pub fn new(device: DeviceAddress) -> Self {
        DeviceStateMachine {
            device,
            state: MachineState::Disconnected,
        }
    }

    pub fn device(&self) -> DeviceAddress {
        self.device
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state.connection_state()
    }

    /// True while a refused disconnect waits for the outstanding connect to resolve.
    pub fn has_queued_disconnect(&self) -> bool {
        matches!(self.state, MachineState::Connecting { disconnect_queued: true, .. })
    }

    /// Runs one input through the transition table and returns the resulting notifications.
    pub fn process(&mut self, input: MachineInput, ctx: &MachineContext) -> Vec<ConnectionStateChanged> {
        use ConnectionState::*;

        let mut changes = Vec::new();
        let current = self.connection_state();

        match (current, input) {
            (_, MachineInput::Timeout(generation)) => self.on_timeout(generation, ctx, &mut changes),

            (Disconnected, MachineInput::Connect) => self.connect(ctx, &mut changes),
            (_, MachineInput::Connect) => {
                debug!("{}: ignoring connect request while {}", self.device, current);
            },

            (Disconnected, MachineInput::Disconnect) => {
                debug!("{}: ignoring disconnect request, not connected", self.device);
            },
            (Connecting, MachineInput::Disconnect) => self.cancel_connect(ctx, &mut changes),
            (Connected, MachineInput::Disconnect) => self.disconnect(ctx, &mut changes),
            (Disconnecting, MachineInput::Disconnect) => {
                debug!("{}: already disconnecting", self.device);
            },

            (_, MachineInput::StackState(new)) if new == current => {
                debug!("{}: duplicate {} from stack", self.device, new);
            },
            (Disconnected, MachineInput::StackState(new)) => self.incoming(new, ctx, &mut changes),
            (_, MachineInput::StackState(Disconnected)) => {
                self.move_to(MachineState::Disconnected, &mut changes);
            },
            (Connecting, MachineInput::StackState(Connected)) => {
                let queued = self.has_queued_disconnect();
                self.move_to(MachineState::Connected, &mut changes);

                if queued {
                    info!("{}: connected, issuing queued disconnect", self.device);
                    self.disconnect(ctx, &mut changes);
                }
            },
            (Connecting | Connected, MachineInput::StackState(Disconnecting)) => {
                self.enter_disconnecting(ctx, &mut changes);
            },
            (Disconnecting, MachineInput::StackState(Connected)) => {
                info!("{}: disconnect interrupted, device is connected", self.device);
                self.move_to(MachineState::Connected, &mut changes);
            },
            (Disconnecting, MachineInput::StackState(Connecting)) => {
                info!("{}: disconnect interrupted, device is connecting", self.device);
                self.enter_connecting(ctx, &mut changes);
            },
            (_, MachineInput::StackState(new)) => {
                warn!("{}: unexpected {} from stack while {}", self.device, new, current);
            },
        }

        changes
    }

    fn connect(&mut self, ctx: &MachineContext, changes: &mut Vec<ConnectionStateChanged>) {
        if !ctx.backend.connect(&self.device) {
            warn!("{}: backend refused to connect", self.device);
            self.fail_through(ConnectionState::Connecting, changes);
            return;
        }

        info!("{}: connecting", self.device);
        self.enter_connecting(ctx, changes);
    }

    fn cancel_connect(&mut self, ctx: &MachineContext, changes: &mut Vec<ConnectionStateChanged>) {
        if ctx.backend.disconnect(&self.device) {
            info!("{}: connection attempt cancelled", self.device);
            self.enter_disconnecting(ctx, changes);
            return;
        }

        // keep the connect timer running; the disconnect is retried once the attempt resolves
        warn!("{}: backend refused to cancel the connection attempt, queueing disconnect", self.device);
        if let MachineState::Connecting { disconnect_queued, .. } = &mut self.state {
            *disconnect_queued = true;
        }
    }

    fn disconnect(&mut self, ctx: &MachineContext, changes: &mut Vec<ConnectionStateChanged>) {
        if !ctx.backend.disconnect(&self.device) {
            warn!("{}: backend refused to disconnect", self.device);
            self.fail_through(ConnectionState::Disconnecting, changes);
            return;
        }

        info!("{}: disconnecting", self.device);
        self.enter_disconnecting(ctx, changes);
    }

    fn incoming(&mut self, new: ConnectionState, ctx: &MachineContext, changes: &mut Vec<ConnectionStateChanged>) {
        match new {
            ConnectionState::Connecting | ConnectionState::Connected if !ctx.incoming_allowed => {
                warn!("{}: incoming {} rejected by policy", self.device, new);
            },
            ConnectionState::Connecting => {
                info!("{}: incoming connection", self.device);
                self.enter_connecting(ctx, changes);
            },
            ConnectionState::Connected => {
                info!("{}: connected by remote", self.device);
                self.move_to(MachineState::Connected, changes);
            },
            _ => {
                warn!("{}: ignoring {} while disconnected", self.device, new);
            },
        }
    }

    fn on_timeout(&mut self, generation: u64, ctx: &MachineContext, changes: &mut Vec<ConnectionStateChanged>) {
        if self.state.timer_generation() != Some(generation) {
            debug!("{}: ignoring stale timer {}", self.device, generation);
            return;
        }

        match self.connection_state() {
            ConnectionState::Connecting => {
                warn!("{}: connection timed out", self.device);
                // abort whatever the backend is still doing, the result does not matter any more
                ctx.backend.disconnect(&self.device);
            },
            state => {
                warn!("{}: timed out while {}", self.device, state);
            },
        }

        self.move_to(MachineState::Disconnected, changes);
    }

    fn enter_connecting(&mut self, ctx: &MachineContext, changes: &mut Vec<ConnectionStateChanged>) {
        let timer = ctx.timers.arm(self.device, ctx.connect_timeout);
        self.move_to(MachineState::Connecting { timer, disconnect_queued: false }, changes);
    }

    fn enter_disconnecting(&mut self, ctx: &MachineContext, changes: &mut Vec<ConnectionStateChanged>) {
        let timer = ctx.timers.arm(self.device, ctx.disconnect_timeout);
        self.move_to(MachineState::Disconnecting { timer }, changes);
    }

    fn move_to(&mut self, next: MachineState, changes: &mut Vec<ConnectionStateChanged>) {
        let previous = self.connection_state();
        let new = next.connection_state();
        // dropping the old state disarms its timer
        self.state = next;

        if previous != new {
            debug!("{}: {} -> {}", self.device, previous, new);
            changes.push(ConnectionStateChanged { device: self.device, previous, new });
        }
    }

    // Reports an attempt through `transient` that failed on the spot and ends in Disconnected.
    fn fail_through(&mut self, transient: ConnectionState, changes: &mut Vec<ConnectionStateChanged>) {
        let previous = self.connection_state();
        self.state = MachineState::Disconnected;

        changes.push(ConnectionStateChanged { device: self.device, previous, new: transient });
        changes.push(ConnectionStateChanged {
            device: self.device,
            previous: transient,
            new: ConnectionState::Disconnected,
        });
    }
}
