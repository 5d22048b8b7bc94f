use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::spawn;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::backend::{InactiveProfileBackend, ProfileBackend};
use crate::device::address::DeviceAddress;
use crate::device::constants::{CONNECTION_STATE_CONNECTED, CONNECTION_STATE_DISCONNECTED};
use crate::error::BackendError;
use crate::profile::service::StackEventSender;

type PeripheralCache = Arc<Mutex<HashMap<DeviceAddress, Peripheral>>>;

/// A scanning btleplug adapter that has not been handed to the profile service yet.
pub struct InactiveBtleBackend {
    adapter: Adapter,
}

impl InactiveBtleBackend {
    /// Uses the first adapter the platform reports and starts scanning on it.
    pub async fn new() -> Result<Self, BackendError> {
        let manager = Manager::new().await?;
        let adapter = manager.adapters().await?
            .into_iter()
            .next()
            .ok_or(BackendError::NoAdapter)?;

        info!("Scanning using adapter {}...", adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string()));
        adapter.start_scan(ScanFilter::default()).await?;

        Ok(InactiveBtleBackend { adapter })
    }
}

impl InactiveProfileBackend for InactiveBtleBackend {
    type ActiveBackend = BtleBackend;

    fn register_callbacks(self, events: StackEventSender) -> Self::ActiveBackend {
        let peripherals: PeripheralCache = Arc::new(Mutex::new(HashMap::new()));
        let cancel = CancellationToken::new();

        spawn(watch_central(self.adapter, peripherals.clone(), events.clone(), cancel.clone()));

        BtleBackend {
            peripherals,
            events,
            _watcher: cancel.drop_guard(),
        }
    }
}

/// Issues connect/disconnect through btleplug and turns central events into stack events.
///
/// Only peripherals seen by the scan can be connected.
pub struct BtleBackend {
    peripherals: PeripheralCache,
    events: StackEventSender,
    _watcher: DropGuard,
}

impl BtleBackend {
    fn peripheral(&self, device: &DeviceAddress) -> Option<Peripheral> {
        let peripherals = self.peripherals.lock().expect("Failed to lock peripheral cache");
        peripherals.get(device).cloned()
    }
}

impl ProfileBackend for BtleBackend {
    fn connect(&self, device: &DeviceAddress) -> bool {
        let Some(peripheral) = self.peripheral(device) else {
            warn!("{}: not discovered by the scan, can not connect", device);
            return false;
        };
        let events = self.events.clone();
        let device = *device;

        spawn(async move {
            info!("{}: connecting to peripheral...", device);
            let state = match peripheral.connect().await {
                Ok(_) => CONNECTION_STATE_CONNECTED,
                Err(err) => {
                    warn!("{}: connecting to peripheral failed: {:?}", device, err);
                    CONNECTION_STATE_DISCONNECTED
                },
            };
            let _ = events.connection_state(device, state);
        });

        true
    }

    fn disconnect(&self, device: &DeviceAddress) -> bool {
        let Some(peripheral) = self.peripheral(device) else {
            warn!("{}: not discovered by the scan, can not disconnect", device);
            return false;
        };
        let events = self.events.clone();
        let device = *device;

        spawn(async move {
            match peripheral.disconnect().await {
                Ok(_) => {
                    let _ = events.connection_state(device, CONNECTION_STATE_DISCONNECTED);
                },
                // the disconnect timer resolves this
                Err(err) => warn!("{}: disconnecting from peripheral failed: {:?}", device, err),
            }
        });

        true
    }
}

async fn peripheral_address(adapter: &Adapter, id: &PeripheralId) -> Option<(DeviceAddress, Peripheral)> {
    match adapter.peripheral(id).await {
        Ok(peripheral) => Some((DeviceAddress::from(peripheral.address().into_inner()), peripheral)),
        Err(err) => {
            warn!("Failed to look up peripheral {:?}: {}", id, err);
            None
        },
    }
}

async fn handle_central_event(adapter: &Adapter, peripherals: &PeripheralCache, events: &StackEventSender, event: CentralEvent) {
    match event {
        CentralEvent::DeviceDiscovered(id) => {
            if let Some((device, peripheral)) = peripheral_address(adapter, &id).await {
                debug!("{}: discovered", device);
                peripherals.lock().expect("Failed to lock peripheral cache").insert(device, peripheral);
            }
        },
        CentralEvent::DeviceConnected(id) => {
            if let Some((device, _)) = peripheral_address(adapter, &id).await {
                let _ = events.connection_state(device, CONNECTION_STATE_CONNECTED);
            }
        },
        CentralEvent::DeviceDisconnected(id) => {
            if let Some((device, _)) = peripheral_address(adapter, &id).await {
                let _ = events.connection_state(device, CONNECTION_STATE_DISCONNECTED);
            }
        },
        _ => {},
    }
}

async fn watch_central(adapter: Adapter, peripherals: PeripheralCache, events: StackEventSender, cancel: CancellationToken) {
    let mut stream = match adapter.events().await {
        Ok(stream) => stream,
        Err(err) => {
            warn!("Failed to subscribe to adapter events: {}", err);
            return;
        },
    };

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = stream.next() => match event {
                Some(event) => handle_central_event(&adapter, &peripherals, &events, event).await,
                None => {
                    warn!("Adapter event stream ended");
                    break;
                },
            },
        }
    }
}
