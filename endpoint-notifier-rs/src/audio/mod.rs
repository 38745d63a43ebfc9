//! Audio module for Windows Core Audio endpoint notifications.
//!
//! The notification client, capability ids and registration guard are
//! portable; the COM binding to `IMMDeviceEnumerator` is Windows-only.

pub mod com;
pub mod device;
#[cfg(windows)]
pub mod endpoint;
pub mod notifications;
pub mod registration;

pub use com::{HResult, InterfaceId, IID_IMM_NOTIFICATION_CLIENT, IID_IUNKNOWN};
pub use device::{DataFlow, DeviceRole, DeviceState, NotifierError, PropertyKey};
#[cfg(windows)]
pub use endpoint::{EndpointHost, EndpointNotificationClient, EndpointRegistration};
pub use notifications::{ClientRef, DeviceStateListener, EndpointNotifications, NotificationClient};
pub use registration::{NotificationHost, Registration};
