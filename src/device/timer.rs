use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use log::debug;
use tokio::spawn;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::sleep;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::device::address::DeviceAddress;

/// Posted back to the owner of the state machines when an armed timer runs out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerExpired {
    pub device: DeviceAddress,
    pub generation: u64,
}

/// A pending timeout. Dropping it cancels the timer task, so a machine that replaces its state
/// never keeps an older timer alive.
#[derive(Debug)]
pub struct ConnectTimer {
    generation: u64,
    _guard: DropGuard,
}

impl ConnectTimer {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Arms timers for every device. Generations come from one counter shared by all clones, so an
/// expiry that is still queued can never match a timer armed later, even for a recreated machine.
#[derive(Debug, Clone)]
pub struct TimerSource {
    expired_tx: UnboundedSender<TimerExpired>,
    last_generation: Arc<AtomicU64>,
}

impl TimerSource {
    pub fn new(expired_tx: UnboundedSender<TimerExpired>) -> Self {
        TimerSource { expired_tx, last_generation: Arc::new(AtomicU64::new(0)) }
    }

    /// Must be called from within a tokio runtime.
    pub fn arm(&self, device: DeviceAddress, duration: Duration) -> ConnectTimer {
        let generation = self.last_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let cancel = CancellationToken::new();
        let cancelled = cancel.clone();
        let expired_tx = self.expired_tx.clone();

        spawn(async move {
            tokio::select! {
                _ = cancelled.cancelled() => {},
                _ = sleep(duration) => {
                    debug!("{}: timer {} expired after {:?}", device, generation, duration);
                    // the receiver is gone when the service is shutting down
                    let _ = expired_tx.send(TimerExpired { device, generation });
                },
            }
        });

        ConnectTimer { generation, _guard: cancel.drop_guard() }
    }
}
