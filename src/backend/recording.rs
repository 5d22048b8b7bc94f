use std::sync::{Arc, Mutex};
use log::{debug, warn};

use crate::backend::{InactiveProfileBackend, ProfileBackend};
use crate::device::address::DeviceAddress;
use crate::device::constants::{CONNECTION_STATE_CONNECTED, CONNECTION_STATE_DISCONNECTED};
use crate::profile::service::StackEventSender;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendCommand {
    Connect(DeviceAddress),
    Disconnect(DeviceAddress),
}

struct RecordingState {
    commands: Vec<BackendCommand>,
    accept_connect: bool,
    accept_disconnect: bool,
    echo: bool,
    events: Option<StackEventSender>,
}

/// An in-process backend that records every command it receives.
///
/// With echo enabled, each accepted command is answered with the stack event a real radio would
/// eventually send (Connected for a connect, Disconnected for a disconnect).
pub struct RecordingBackend {
    state: Mutex<RecordingState>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        RecordingBackend {
            state: Mutex::new(RecordingState {
                commands: Vec::new(),
                accept_connect: true,
                accept_disconnect: true,
                echo: false,
                events: None,
            }),
        }
    }

    pub fn with_echo() -> Self {
        let backend = RecordingBackend::new();
        backend.set_echo(true);
        backend
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RecordingState> {
        self.state.lock().expect("Failed to lock RecordingBackend state")
    }

    pub fn set_accept_connect(&self, accept: bool) {
        self.lock().accept_connect = accept;
    }

    pub fn set_accept_disconnect(&self, accept: bool) {
        self.lock().accept_disconnect = accept;
    }

    pub fn set_echo(&self, echo: bool) {
        self.lock().echo = echo;
    }

    pub fn commands(&self) -> Vec<BackendCommand> {
        self.lock().commands.clone()
    }

    pub fn clear_commands(&self) {
        self.lock().commands.clear();
    }

    fn issue(&self, command: BackendCommand) -> bool {
        let mut state = self.lock();
        state.commands.push(command);

        let (accepted, device, echoed_state) = match command {
            BackendCommand::Connect(device) => (state.accept_connect, device, CONNECTION_STATE_CONNECTED),
            BackendCommand::Disconnect(device) => (state.accept_disconnect, device, CONNECTION_STATE_DISCONNECTED),
        };
        debug!("{:?} accepted: {}", command, accepted);

        if accepted && state.echo {
            match &state.events {
                Some(events) => {
                    if events.connection_state(device, echoed_state).is_err() {
                        warn!("{}: can not echo {:?}, service stopped", device, command);
                    }
                },
                None => warn!("{}: can not echo {:?}, no callbacks registered", device, command),
            }
        }

        accepted
    }
}

impl Default for RecordingBackend {
    fn default() -> Self {
        RecordingBackend::new()
    }
}

impl ProfileBackend for RecordingBackend {
    fn connect(&self, device: &DeviceAddress) -> bool {
        self.issue(BackendCommand::Connect(*device))
    }

    fn disconnect(&self, device: &DeviceAddress) -> bool {
        self.issue(BackendCommand::Disconnect(*device))
    }
}

impl InactiveProfileBackend for Arc<RecordingBackend> {
    type ActiveBackend = Arc<RecordingBackend>;

    fn register_callbacks(self, events: StackEventSender) -> Self::ActiveBackend {
        self.lock().events = Some(events);
        self
    }
}
