//! Device change notifications.
//!
//! [`NotificationClient`] is the reference-counted object the audio subsystem
//! calls back into. It forwards endpoint state changes to a single
//! [`DeviceStateListener`] and treats every other event as informational.

use super::com::{HResult, InterfaceId, IID_IMM_NOTIFICATION_CLIENT, IID_IUNKNOWN};
use super::device::{DataFlow, DeviceRole, DeviceState, PropertyKey};
use std::ops::Deref;
use std::panic::{self, AssertUnwindSafe};
use std::ptr::NonNull;
use std::sync::atomic::{fence, AtomicU32, Ordering};
use tracing::{debug, error, trace, warn};

/// Receives `(device_id, new_state)` for every endpoint state change.
///
/// Called synchronously on the audio subsystem's own threads, possibly from
/// several threads at once. Implementations must return promptly and defer
/// any long-running work.
pub trait DeviceStateListener: Send + Sync {
    fn on_device_state_changed(&self, device_id: &str, new_state: u32);
}

impl<F> DeviceStateListener for F
where
    F: Fn(&str, u32) + Send + Sync,
{
    fn on_device_state_changed(&self, device_id: &str, new_state: u32) {
        self(device_id, new_state)
    }
}

/// The event half of the `IMMNotificationClient` contract.
pub trait EndpointNotifications {
    fn on_device_added(&self, device_id: &str) -> HResult;

    fn on_device_removed(&self, device_id: &str) -> HResult;

    fn on_device_state_changed(&self, device_id: &str, new_state: u32) -> HResult;

    fn on_default_device_changed(
        &self,
        flow: i32,
        role: i32,
        default_device_id: Option<&str>,
    ) -> HResult;

    fn on_property_value_changed(&self, device_id: &str, key: &PropertyKey) -> HResult;
}

/// Notification client with a manually managed reference count.
///
/// Always heap allocated; obtain one with [`NotificationClient::create`].
/// Storage is freed by the [`release`](Self::release) call that takes the
/// count from 1 to 0.
pub struct NotificationClient {
    ref_count: AtomicU32,
    listener: Box<dyn DeviceStateListener>,
}

impl NotificationClient {
    /// Create a client with a reference count of 1, owned by the returned handle.
    pub fn create<L>(listener: L) -> ClientRef
    where
        L: DeviceStateListener + 'static,
    {
        let client = Box::new(Self {
            ref_count: AtomicU32::new(1),
            listener: Box::new(listener),
        });

        ClientRef {
            ptr: NonNull::from(Box::leak(client)),
        }
    }

    /// Increment the reference count. Returns the new count.
    pub fn add_ref(&self) -> u32 {
        self.ref_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Decrement the reference count, freeing the client when it reaches zero.
    /// Returns the new count.
    ///
    /// # Safety
    /// `this` must point to a live client created by [`NotificationClient::create`]
    /// and the caller must own one of its references. When this returns 0 the
    /// pointer is dangling.
    pub unsafe fn release(this: NonNull<Self>) -> u32 {
        let previous = this.as_ref().ref_count.fetch_sub(1, Ordering::Release);
        debug_assert!(previous > 0, "release on a destroyed notification client");

        if previous == 1 {
            fence(Ordering::Acquire);
            drop(Box::from_raw(this.as_ptr()));
        }
        previous - 1
    }

    /// Current reference count.
    pub fn ref_count(&self) -> u32 {
        self.ref_count.load(Ordering::Acquire)
    }

    /// Look up a capability on this client.
    ///
    /// On success the count is incremented and the returned handle owns the
    /// new reference. Unknown ids fail with `E_NOINTERFACE` and leave the
    /// count untouched.
    pub fn query_interface(&self, iid: &InterfaceId) -> Result<ClientRef, HResult> {
        if *iid == IID_IMM_NOTIFICATION_CLIENT || *iid == IID_IUNKNOWN {
            self.add_ref();
            Ok(ClientRef {
                ptr: NonNull::from(self),
            })
        } else {
            trace!(iid = %iid, "interface not supported");
            Err(HResult::E_NOINTERFACE)
        }
    }
}

impl EndpointNotifications for NotificationClient {
    fn on_device_added(&self, device_id: &str) -> HResult {
        trace!(device_id, "endpoint added");
        HResult::S_OK
    }

    fn on_device_removed(&self, device_id: &str) -> HResult {
        trace!(device_id, "endpoint removed");
        HResult::S_OK
    }

    fn on_device_state_changed(&self, device_id: &str, new_state: u32) -> HResult {
        if device_id.is_empty() {
            warn!(new_state, "dropping state change without a device id");
            return HResult::S_OK;
        }

        debug!(
            device_id,
            state = DeviceState::describe(new_state),
            code = new_state,
            "endpoint state changed"
        );

        let delivered = panic::catch_unwind(AssertUnwindSafe(|| {
            self.listener.on_device_state_changed(device_id, new_state)
        }));
        if delivered.is_err() {
            error!(device_id, "state listener panicked, notification dropped");
        }

        HResult::S_OK
    }

    fn on_default_device_changed(
        &self,
        flow: i32,
        role: i32,
        default_device_id: Option<&str>,
    ) -> HResult {
        trace!(
            flow = ?DataFlow::from_raw(flow),
            role = ?DeviceRole::from_raw(role),
            device_id = default_device_id,
            "default endpoint changed"
        );
        HResult::S_OK
    }

    fn on_property_value_changed(&self, device_id: &str, key: &PropertyKey) -> HResult {
        trace!(device_id, key = %key, "endpoint property changed");
        HResult::S_OK
    }
}

/// Counted reference to a [`NotificationClient`].
///
/// Cloning adds a reference, dropping releases one.
pub struct ClientRef {
    ptr: NonNull<NotificationClient>,
}

// The count is atomic and the listener is Send + Sync.
unsafe impl Send for ClientRef {}
unsafe impl Sync for ClientRef {}

impl ClientRef {
    /// Give up this handle without releasing its reference.
    pub fn into_raw(this: Self) -> NonNull<NotificationClient> {
        let ptr = this.ptr;
        std::mem::forget(this);
        ptr
    }

    /// Take ownership of one reference previously leaked by [`ClientRef::into_raw`]
    /// or counted by [`NotificationClient::add_ref`].
    ///
    /// # Safety
    /// `ptr` must point to a live client and the caller must own the reference
    /// being transferred.
    pub unsafe fn from_raw(ptr: NonNull<NotificationClient>) -> Self {
        Self { ptr }
    }

    pub fn as_ptr(this: &Self) -> NonNull<NotificationClient> {
        this.ptr
    }
}

impl Deref for ClientRef {
    type Target = NotificationClient;

    fn deref(&self) -> &NotificationClient {
        // SAFETY: this handle owns a reference, so the client is live.
        unsafe { self.ptr.as_ref() }
    }
}

impl Clone for ClientRef {
    fn clone(&self) -> Self {
        self.add_ref();
        Self { ptr: self.ptr }
    }
}

impl Drop for ClientRef {
    fn drop(&mut self) {
        // SAFETY: this handle owns exactly one reference.
        unsafe {
            NotificationClient::release(self.ptr);
        }
    }
}

impl std::fmt::Debug for ClientRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRef")
            .field("ptr", &self.ptr)
            .field("ref_count", &self.ref_count())
            .finish()
    }
}
