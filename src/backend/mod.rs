//! The radio side of the profile: something that accepts connect and disconnect commands right
//! away and reports the outcome later as stack events.

use std::sync::Arc;

use crate::device::address::DeviceAddress;
use crate::profile::service::StackEventSender;

pub mod recording;
#[cfg(feature = "btle")]
pub mod btle;

/// The commands the profile service issues to the stack.
///
/// A `true` return only means the command was issued. The outcome arrives later as a
/// connection state event through the [`StackEventSender`] given at registration.
pub trait ProfileBackend: Send + Sync {
    fn connect(&self, device: &DeviceAddress) -> bool;
    fn disconnect(&self, device: &DeviceAddress) -> bool;
}

impl<T: ProfileBackend + ?Sized> ProfileBackend for Arc<T> {
    fn connect(&self, device: &DeviceAddress) -> bool {
        (**self).connect(device)
    }

    fn disconnect(&self, device: &DeviceAddress) -> bool {
        (**self).disconnect(device)
    }
}

/// A backend before it knows where to deliver its events
pub trait InactiveProfileBackend {
    /// The type implementing ProfileBackend once events can be delivered
    type ActiveBackend: ProfileBackend + 'static;

    fn register_callbacks(self, events: StackEventSender) -> Self::ActiveBackend;
}
