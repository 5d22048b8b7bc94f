//! The profile service task and the handles used to reach it.
//!
//! Every input (caller requests, stack events, bond changes and timer expiries) is handled by
//! one task, one at a time, in the order it was delivered. The registry it drives therefore
//! needs no locking, and the events of a single device are always processed in order.

use std::sync::Arc;
use futures::channel::mpsc::UnboundedReceiver as NotificationReceiver;
use log::{debug, info};
use tokio::spawn;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backend::InactiveProfileBackend;
use crate::config::types::ServiceConfig;
use crate::device::address::DeviceAddress;
use crate::device::timer::{TimerExpired, TimerSource};
use crate::device::types::{ConnectionState, ConnectionStateChanged, GroupId, StackEvent};
use crate::error::ServiceError;
use crate::profile::policy::DevicePolicy;
use crate::profile::registry::DeviceRegistry;

enum ServiceMessage {
    Connect { device: DeviceAddress, reply: oneshot::Sender<bool> },
    Disconnect { device: DeviceAddress, reply: oneshot::Sender<bool> },
    GetConnectionState { device: DeviceAddress, reply: oneshot::Sender<ConnectionState> },
    GetConnectedDevices { reply: oneshot::Sender<Vec<DeviceAddress>> },
    GetDevices { reply: oneshot::Sender<Vec<DeviceAddress>> },
    GetDevicesMatchingStates { states: Vec<ConnectionState>, reply: oneshot::Sender<Vec<DeviceAddress>> },
    GetActiveDevices { reply: oneshot::Sender<Vec<DeviceAddress>> },
    GetDeviceInfo { device: DeviceAddress, reply: oneshot::Sender<DeviceInfo> },
    OkToConnect { device: DeviceAddress, reply: oneshot::Sender<bool> },
    RemoveIdleUnbonded { reply: oneshot::Sender<usize> },
    Subscribe { reply: oneshot::Sender<NotificationReceiver<ConnectionStateChanged>> },
    StackEvent(StackEvent),
    BondStateChanged { device: DeviceAddress, bond_state: i32 },
}

/// What the service knows about one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    pub state: ConnectionState,
    pub group: Option<GroupId>,
    pub capabilities: Option<u8>,
}

/// Delivers stack events to the profile service. Cheap to clone, usable from any thread.
#[derive(Clone)]
pub struct StackEventSender {
    message_tx: UnboundedSender<ServiceMessage>,
}

impl StackEventSender {
    pub fn send(&self, event: StackEvent) -> Result<(), ServiceError> {
        self.message_tx.send(ServiceMessage::StackEvent(event)).map_err(|_| ServiceError::Shutdown)
    }

    pub fn connection_state(&self, device: DeviceAddress, state: i32) -> Result<(), ServiceError> {
        self.send(StackEvent::connection_state(device, state))
    }

    pub fn device_available(&self, device: DeviceAddress, capabilities: u8, group_id: u64) -> Result<(), ServiceError> {
        self.send(StackEvent::device_available(device, capabilities, group_id))
    }

    pub fn bond_state_changed(&self, device: DeviceAddress, bond_state: i32) -> Result<(), ServiceError> {
        self.message_tx
            .send(ServiceMessage::BondStateChanged { device, bond_state })
            .map_err(|_| ServiceError::Shutdown)
    }
}

#[derive(Clone)]
pub struct ProfileServiceHandle {
    message_tx: UnboundedSender<ServiceMessage>,
    cancel: CancellationToken,
}

impl ProfileServiceHandle {
    async fn request<T>(&self, message: impl FnOnce(oneshot::Sender<T>) -> ServiceMessage) -> Result<T, ServiceError> {
        let (reply, reply_rx) = oneshot::channel();
        self.message_tx.send(message(reply)).map_err(|_| ServiceError::Shutdown)?;
        reply_rx.await.map_err(|_| ServiceError::Shutdown)
    }

    /// Returns true when the device is now Connecting.
    pub async fn connect(&self, device: DeviceAddress) -> Result<bool, ServiceError> {
        self.request(|reply| ServiceMessage::Connect { device, reply }).await
    }

    pub async fn disconnect(&self, device: DeviceAddress) -> Result<bool, ServiceError> {
        self.request(|reply| ServiceMessage::Disconnect { device, reply }).await
    }

    pub async fn get_connection_state(&self, device: DeviceAddress) -> Result<ConnectionState, ServiceError> {
        self.request(|reply| ServiceMessage::GetConnectionState { device, reply }).await
    }

    pub async fn get_connected_devices(&self) -> Result<Vec<DeviceAddress>, ServiceError> {
        self.request(|reply| ServiceMessage::GetConnectedDevices { reply }).await
    }

    pub async fn get_devices(&self) -> Result<Vec<DeviceAddress>, ServiceError> {
        self.request(|reply| ServiceMessage::GetDevices { reply }).await
    }

    pub async fn get_devices_matching_states(&self, states: &[ConnectionState]) -> Result<Vec<DeviceAddress>, ServiceError> {
        let states = states.to_vec();
        self.request(|reply| ServiceMessage::GetDevicesMatchingStates { states, reply }).await
    }

    pub async fn get_active_devices(&self) -> Result<Vec<DeviceAddress>, ServiceError> {
        self.request(|reply| ServiceMessage::GetActiveDevices { reply }).await
    }

    pub async fn get_device_info(&self, device: DeviceAddress) -> Result<DeviceInfo, ServiceError> {
        self.request(|reply| ServiceMessage::GetDeviceInfo { device, reply }).await
    }

    pub async fn ok_to_connect(&self, device: DeviceAddress) -> Result<bool, ServiceError> {
        self.request(|reply| ServiceMessage::OkToConnect { device, reply }).await
    }

    pub async fn remove_idle_unbonded(&self) -> Result<usize, ServiceError> {
        self.request(|reply| ServiceMessage::RemoveIdleUnbonded { reply }).await
    }

    /// Every transition from now on, in the order it happened.
    pub async fn subscribe(&self) -> Result<NotificationReceiver<ConnectionStateChanged>, ServiceError> {
        self.request(|reply| ServiceMessage::Subscribe { reply }).await
    }

    pub fn bond_state_changed(&self, device: DeviceAddress, bond_state: i32) -> Result<(), ServiceError> {
        self.stack_events().bond_state_changed(device, bond_state)
    }

    /// A sender for injecting stack events, the same kind the backend was given.
    pub fn stack_events(&self) -> StackEventSender {
        StackEventSender { message_tx: self.message_tx.clone() }
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

pub struct ProfileService {
    registry: DeviceRegistry,
    message_rx: UnboundedReceiver<ServiceMessage>,
    expired_rx: UnboundedReceiver<TimerExpired>,
    cancel: CancellationToken,
}

impl ProfileService {
    /// Registers with the backend and spawns the service task on the current runtime.
    pub fn start<B: InactiveProfileBackend>(
        config: ServiceConfig,
        backend: B,
        policy: Arc<dyn DevicePolicy>,
    ) -> (ProfileServiceHandle, JoinHandle<()>) {
        let (message_tx, message_rx) = unbounded_channel();
        let (expired_tx, expired_rx) = unbounded_channel();
        let cancel = CancellationToken::new();

        let backend = backend.register_callbacks(StackEventSender { message_tx: message_tx.clone() });
        let registry = DeviceRegistry::new(config, Box::new(backend), policy, TimerSource::new(expired_tx));

        let service = ProfileService {
            registry,
            message_rx,
            expired_rx,
            cancel: cancel.clone(),
        };
        let join_handle = spawn(service.run());

        (ProfileServiceHandle { message_tx, cancel }, join_handle)
    }

    async fn run(mut self) {
        info!("Profile service started");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                Some(message) = self.message_rx.recv() => self.handle_message(message),
                Some(expired) = self.expired_rx.recv() => self.registry.handle_timeout(expired),
            }
        }

        info!("Profile service stopped");
    }

    // a closed reply channel means the caller lost interest, which is not an error
    fn handle_message(&mut self, message: ServiceMessage) {
        let registry = &mut self.registry;

        match message {
            ServiceMessage::Connect { device, reply } => {
                let _ = reply.send(registry.connect(device));
            },
            ServiceMessage::Disconnect { device, reply } => {
                let _ = reply.send(registry.disconnect(device));
            },
            ServiceMessage::GetConnectionState { device, reply } => {
                let _ = reply.send(registry.get_connection_state(&device));
            },
            ServiceMessage::GetConnectedDevices { reply } => {
                let _ = reply.send(registry.get_connected_devices());
            },
            ServiceMessage::GetDevices { reply } => {
                let _ = reply.send(registry.get_devices());
            },
            ServiceMessage::GetDevicesMatchingStates { states, reply } => {
                let _ = reply.send(registry.get_devices_matching_states(&states));
            },
            ServiceMessage::GetActiveDevices { reply } => {
                let _ = reply.send(registry.get_active_devices());
            },
            ServiceMessage::GetDeviceInfo { device, reply } => {
                let _ = reply.send(DeviceInfo {
                    state: registry.get_connection_state(&device),
                    group: registry.get_group(&device),
                    capabilities: registry.get_capabilities(&device),
                });
            },
            ServiceMessage::OkToConnect { device, reply } => {
                let _ = reply.send(registry.ok_to_connect(&device));
            },
            ServiceMessage::RemoveIdleUnbonded { reply } => {
                let _ = reply.send(registry.remove_idle_unbonded());
            },
            ServiceMessage::Subscribe { reply } => {
                let _ = reply.send(registry.subscribe());
            },
            ServiceMessage::StackEvent(event) => {
                debug!("Stack event {:?}", event);
                registry.handle_stack_event(event);
            },
            ServiceMessage::BondStateChanged { device, bond_state } => {
                debug!("{}: bond state changed to {}", device, bond_state);
                registry.bond_state_changed(device, bond_state);
            },
        }
    }
}
