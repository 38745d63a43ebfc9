//! Endpoint Notifier - Library
//!
//! Reports audio endpoint state changes from Windows Core Audio to a single
//! application callback.
//!
//! ## Features
//!
//! - `IMMNotificationClient` implementation with COM reference counting
//! - Forwards every endpoint state change as `(device_id, new_state)`
//! - Listener panics are contained and never unwind into the audio subsystem
//! - Scoped registration that always unregisters

pub mod audio;

pub use audio::{
    ClientRef, DeviceState, DeviceStateListener, EndpointNotifications, HResult, InterfaceId,
    NotificationClient, NotificationHost, NotifierError, Registration,
};
#[cfg(windows)]
pub use audio::{EndpointHost, EndpointNotificationClient, EndpointRegistration};
