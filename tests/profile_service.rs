use std::sync::Arc;
use std::time::Duration;
use futures::channel::mpsc::UnboundedReceiver;
use futures::{FutureExt, StreamExt};
use bt_profile_manager::backend::recording::{BackendCommand, RecordingBackend};
use bt_profile_manager::config::types::ServiceConfig;
use bt_profile_manager::device::address::DeviceAddress;
use bt_profile_manager::device::constants::{
    BOND_BONDED, BOND_NONE, CONNECTION_STATE_CONNECTED, CONNECTION_STATE_DISCONNECTED, CONNECT_TIMEOUT, PRIORITY_ON,
};
use bt_profile_manager::device::types::ConnectionState::{self, *};
use bt_profile_manager::device::types::ConnectionStateChanged;
use bt_profile_manager::profile::policy::MemoryPolicy;
use bt_profile_manager::profile::service::{ProfileService, ProfileServiceHandle};

const A: DeviceAddress = DeviceAddress([0x10, 0, 0, 0, 0, 0x0a]);
const B: DeviceAddress = DeviceAddress([0x10, 0, 0, 0, 0, 0x0b]);
const C: DeviceAddress = DeviceAddress([0x10, 0, 0, 0, 0, 0x0c]);
const D: DeviceAddress = DeviceAddress([0x10, 0, 0, 0, 0, 0x0d]);

struct Fixture {
    handle: ProfileServiceHandle,
    backend: Arc<RecordingBackend>,
    policy: Arc<MemoryPolicy>,
    notifications: UnboundedReceiver<ConnectionStateChanged>,
}

impl Fixture {
    async fn start(backend: RecordingBackend, bonded: &[DeviceAddress]) -> Self {
        let backend = Arc::new(backend);
        let policy = Arc::new(MemoryPolicy::new());
        for device in bonded {
            policy.set_bond_state(*device, BOND_BONDED);
            policy.set_priority(*device, PRIORITY_ON);
        }

        let (handle, _join_handle) = ProfileService::start(ServiceConfig::default(), backend.clone(), policy.clone());
        let notifications = handle.subscribe().await.unwrap();

        Fixture { handle, backend, policy, notifications }
    }

    fn stack(&self, device: DeviceAddress, state: i32) {
        self.handle.stack_events().connection_state(device, state).unwrap();
    }

    async fn next(&mut self) -> (DeviceAddress, ConnectionState, ConnectionState) {
        let change = self.notifications.next().await.unwrap();
        (change.device, change.previous, change.new)
    }

    async fn take(&mut self, count: usize) -> Vec<(DeviceAddress, ConnectionState, ConnectionState)> {
        let mut changes = Vec::new();
        for _ in 0..count {
            changes.push(self.next().await);
        }
        changes
    }

    // round trip through the service so everything sent before has been handled
    async fn assert_quiet(&mut self) {
        self.handle.get_devices().await.unwrap();
        assert!(self.notifications.next().now_or_never().is_none());
    }
}

#[tokio::test(start_paused = true)]
async fn test_connect_and_disconnect_lifecycle() {
    // arrange
    let mut fixture = Fixture::start(RecordingBackend::new(), &[D]).await;

    // act / assert
    assert!(fixture.handle.connect(D).await.unwrap());
    assert_eq!(fixture.next().await, (D, Disconnected, Connecting));
    assert_eq!(fixture.handle.get_connection_state(D).await.unwrap(), Connecting);

    fixture.stack(D, CONNECTION_STATE_CONNECTED);
    assert_eq!(fixture.next().await, (D, Connecting, Connected));
    assert_eq!(fixture.handle.get_connected_devices().await.unwrap(), vec![D]);

    assert!(fixture.handle.disconnect(D).await.unwrap());
    assert_eq!(fixture.next().await, (D, Connected, Disconnecting));

    fixture.stack(D, CONNECTION_STATE_DISCONNECTED);
    assert_eq!(fixture.next().await, (D, Disconnecting, Disconnected));

    fixture.assert_quiet().await;
    assert_eq!(fixture.backend.commands(), vec![BackendCommand::Connect(D), BackendCommand::Disconnect(D)]);
}

#[tokio::test(start_paused = true)]
async fn test_echoing_backend_completes_on_its_own() {
    // arrange
    let mut fixture = Fixture::start(RecordingBackend::with_echo(), &[D]).await;

    // act
    fixture.handle.connect(D).await.unwrap();
    let connected = fixture.take(2).await;
    fixture.handle.disconnect(D).await.unwrap();
    let disconnected = fixture.take(2).await;

    // assert
    assert_eq!(connected, vec![(D, Disconnected, Connecting), (D, Connecting, Connected)]);
    assert_eq!(disconnected, vec![(D, Connected, Disconnecting), (D, Disconnecting, Disconnected)]);
    fixture.assert_quiet().await;
}

#[tokio::test(start_paused = true)]
async fn test_rejected_connect_is_silent() {
    // arrange: D is not bonded
    let mut fixture = Fixture::start(RecordingBackend::new(), &[]).await;

    // act
    let result = fixture.handle.connect(D).await.unwrap();

    // assert
    assert!(!result);
    assert!(!fixture.handle.ok_to_connect(D).await.unwrap());
    assert!(fixture.handle.get_devices().await.unwrap().is_empty());
    assert!(fixture.backend.commands().is_empty());
    fixture.assert_quiet().await;
}

#[tokio::test(start_paused = true)]
async fn test_connect_timeout_yields_single_notification() {
    // arrange
    let mut fixture = Fixture::start(RecordingBackend::new(), &[D]).await;
    fixture.handle.connect(D).await.unwrap();
    assert_eq!(fixture.next().await, (D, Disconnected, Connecting));

    // act: the backend never reports back
    tokio::time::sleep(Duration::from_millis(CONNECT_TIMEOUT + 1)).await;

    // assert
    assert_eq!(fixture.next().await, (D, Connecting, Disconnected));
    assert_eq!(fixture.handle.get_connection_state(D).await.unwrap(), Disconnected);
    fixture.assert_quiet().await;
}

#[tokio::test(start_paused = true)]
async fn test_no_timeout_once_connected() {
    // arrange
    let mut fixture = Fixture::start(RecordingBackend::new(), &[D]).await;
    fixture.handle.connect(D).await.unwrap();
    fixture.stack(D, CONNECTION_STATE_CONNECTED);
    fixture.take(2).await;

    // act
    tokio::time::sleep(Duration::from_millis(CONNECT_TIMEOUT * 2)).await;

    // assert
    assert_eq!(fixture.handle.get_connection_state(D).await.unwrap(), Connected);
    fixture.assert_quiet().await;
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_events_are_suppressed() {
    // arrange
    let mut fixture = Fixture::start(RecordingBackend::new(), &[D]).await;
    fixture.handle.connect(D).await.unwrap();

    // act
    fixture.stack(D, CONNECTION_STATE_CONNECTED);
    fixture.stack(D, CONNECTION_STATE_CONNECTED);

    // assert
    assert_eq!(fixture.take(2).await, vec![(D, Disconnected, Connecting), (D, Connecting, Connected)]);
    fixture.assert_quiet().await;
}

#[tokio::test(start_paused = true)]
async fn test_other_group_takes_over() {
    // arrange: A and B are one pair, C belongs to another
    let mut fixture = Fixture::start(RecordingBackend::with_echo(), &[A, B, C]).await;
    let events = fixture.handle.stack_events();
    events.device_available(A, 0x02, 0x0100).unwrap();
    events.device_available(B, 0x03, 0x0100).unwrap();
    events.device_available(C, 0x00, 0x0200).unwrap();

    fixture.handle.connect(A).await.unwrap();
    fixture.handle.connect(B).await.unwrap();
    assert_eq!(
        fixture.take(4).await,
        vec![
            (A, Disconnected, Connecting),
            (A, Connecting, Connected),
            (B, Disconnected, Connecting),
            (B, Connecting, Connected),
        ]
    );
    assert_eq!(fixture.handle.get_active_devices().await.unwrap(), vec![A, B]);

    // act
    assert!(fixture.handle.connect(C).await.unwrap());

    // assert
    assert_eq!(
        fixture.take(6).await,
        vec![
            (C, Disconnected, Connecting),
            (A, Connected, Disconnecting),
            (B, Connected, Disconnecting),
            (C, Connecting, Connected),
            (A, Disconnecting, Disconnected),
            (B, Disconnecting, Disconnected),
        ]
    );
    assert_eq!(fixture.handle.get_connected_devices().await.unwrap(), vec![C]);
    assert_eq!(fixture.handle.get_active_devices().await.unwrap(), vec![C]);
    assert_eq!(fixture.handle.get_devices_matching_states(&[Disconnected]).await.unwrap(), vec![A, B]);
    fixture.assert_quiet().await;
}

#[tokio::test(start_paused = true)]
async fn test_unbond_while_connecting_defers_removal() {
    // arrange
    let mut fixture = Fixture::start(RecordingBackend::new(), &[D]).await;
    fixture.handle.connect(D).await.unwrap();

    // act
    fixture.policy.set_bond_state(D, BOND_NONE);
    fixture.handle.bond_state_changed(D, BOND_NONE).unwrap();

    // assert
    assert_eq!(fixture.handle.get_devices().await.unwrap(), vec![D]);

    // act: the attempt resolves
    fixture.stack(D, CONNECTION_STATE_DISCONNECTED);

    // assert
    assert_eq!(fixture.take(2).await, vec![(D, Disconnected, Connecting), (D, Connecting, Disconnected)]);
    assert!(fixture.handle.get_devices().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_incoming_connection_from_bonded_device() {
    // arrange
    let mut fixture = Fixture::start(RecordingBackend::new(), &[D]).await;

    // act: remote side connects, and an unbonded device tries the same
    fixture.stack(D, CONNECTION_STATE_CONNECTED);
    fixture.stack(A, CONNECTION_STATE_CONNECTED);

    // assert
    assert_eq!(fixture.next().await, (D, Disconnected, Connected));
    assert_eq!(fixture.handle.get_devices().await.unwrap(), vec![D]);
    assert!(fixture.backend.commands().is_empty());
    fixture.assert_quiet().await;
}
