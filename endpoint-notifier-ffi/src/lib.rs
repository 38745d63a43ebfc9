//! FFI bindings for the audio endpoint notifier.
//!
//! This crate provides C ABI functions for use from C# via P/Invoke.
//! All functions use panic::catch_unwind to prevent Rust panics from
//! unwinding across the FFI boundary.

use endpoint_notifier_rs::{
    ClientRef, DeviceStateListener, EndpointNotifications, NotificationClient, NotifierError,
};
use serde::Deserialize;
use std::cell::RefCell;
use std::ffi::{c_char, c_void, CStr, CString};
use std::panic;
use std::ptr;
use std::sync::Once;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

// ============================================================================
// Error Handling
// ============================================================================

/// Error codes returned by FFI functions.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Success = 0,
    InvalidHandle = -1,
    InvalidArgument = -2,
    ComError = -4,
    JsonError = -5,
    AlreadyRegistered = -7,
    Unsupported = -8,
    Panic = -99,
}

impl From<&NotifierError> for ErrorCode {
    fn from(err: &NotifierError) -> Self {
        match err {
            NotifierError::NullCallback => ErrorCode::InvalidArgument,
            NotifierError::AlreadyRegistered => ErrorCode::AlreadyRegistered,
            NotifierError::Unsupported => ErrorCode::Unsupported,
            NotifierError::EnumeratorUnavailable(_)
            | NotifierError::RegistrationFailed(_)
            | NotifierError::UnregistrationFailed(_) => ErrorCode::ComError,
        }
    }
}

/// Thread-local storage for the last error.
thread_local! {
    static LAST_ERROR: RefCell<Option<(ErrorCode, String)>> = const { RefCell::new(None) };
}

fn set_last_error(code: ErrorCode, message: impl Into<String>) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = Some((code, message.into()));
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Record `err` as the last error and return its code.
fn fail(err: &NotifierError) -> i32 {
    let code = ErrorCode::from(err);
    set_last_error(code, err.to_string());
    code as i32
}

// ============================================================================
// Configuration and Logging
// ============================================================================

/// Configuration for notifier creation.
#[derive(Debug, Default, Deserialize)]
pub struct NotifierConfig {
    /// `tracing` filter directive, e.g. `"debug"` or `"endpoint_notifier_rs=trace"`
    #[serde(default)]
    pub log_level: Option<String>,
}

const DEFAULT_LOG_FILTER: &str = "endpoint_notifier_rs=info,endpoint_notifier_ffi=info";

static LOGGING: Once = Once::new();

/// Install the global subscriber once per process. A subscriber installed by
/// the host process takes precedence. Later configs cannot change the filter.
fn init_logging(config: &NotifierConfig) {
    if LOGGING.is_completed() {
        if let Some(level) = config.log_level.as_deref() {
            debug!(log_level = level, "logging already initialized, log_level ignored");
        }
        return;
    }

    LOGGING.call_once(|| {
        let filter = config
            .log_level
            .as_deref()
            .and_then(|level| EnvFilter::try_new(level).ok())
            .or_else(|| EnvFilter::try_from_default_env().ok())
            .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER));

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    });
}

/// Parse the optional JSON configuration. Null means defaults.
unsafe fn parse_config(config_json: *const c_char) -> Result<NotifierConfig, String> {
    if config_json.is_null() {
        return Ok(NotifierConfig::default());
    }
    let json_str = parse_c_str(config_json).ok_or("Config is not valid UTF-8")?;
    serde_json::from_str(json_str).map_err(|e| format!("Invalid config: {e}"))
}

// ============================================================================
// Callback Adapter
// ============================================================================

/// Owner callback. `device_id` is a NUL-terminated UTF-16 string valid only
/// for the duration of the call.
pub type DeviceStateChangedCallback =
    unsafe extern "system" fn(device_id: *const u16, new_state: i32);

/// Forwards state changes to a raw C callback.
struct CallbackListener {
    callback: DeviceStateChangedCallback,
}

impl CallbackListener {
    fn new(callback: Option<DeviceStateChangedCallback>) -> Result<Self, NotifierError> {
        callback
            .map(|callback| Self { callback })
            .ok_or(NotifierError::NullCallback)
    }
}

impl DeviceStateListener for CallbackListener {
    fn on_device_state_changed(&self, device_id: &str, new_state: u32) {
        let device_id_wide: Vec<u16> =
            device_id.encode_utf16().chain(std::iter::once(0)).collect();
        unsafe {
            (self.callback)(device_id_wide.as_ptr(), new_state as i32);
        }
    }
}

// ============================================================================
// Notifier Handle Type
// ============================================================================

/// Opaque handle to a notifier. Actually points to a Notifier struct.
pub type NotifierHandle = *mut c_void;

/// Internal notifier state.
struct Notifier {
    client: ClientRef,
    #[cfg(windows)]
    registration: Option<endpoint_notifier_rs::EndpointRegistration>,
}

impl Notifier {
    fn new(client: ClientRef) -> Self {
        Self {
            client,
            #[cfg(windows)]
            registration: None,
        }
    }

    #[cfg(windows)]
    fn register(&mut self) -> Result<(), NotifierError> {
        if self.registration.is_some() {
            return Err(NotifierError::AlreadyRegistered);
        }
        let registration = endpoint_notifier_rs::audio::endpoint::register_client(&self.client)?;
        self.registration = Some(registration);
        Ok(())
    }

    #[cfg(not(windows))]
    fn register(&mut self) -> Result<(), NotifierError> {
        Err(NotifierError::Unsupported)
    }

    #[cfg(windows)]
    fn unregister(&mut self) -> Result<(), NotifierError> {
        match self.registration.take() {
            Some(registration) => registration.unregister(),
            None => Ok(()),
        }
    }

    #[cfg(not(windows))]
    fn unregister(&mut self) -> Result<(), NotifierError> {
        Ok(())
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Allocate a C string from a Rust string. Caller must free with endpoint_notifier_free_string.
fn alloc_c_string(s: &str) -> *mut c_char {
    // Interior NULs cannot be represented; strip them
    CString::new(s)
        .unwrap_or_else(|_| CString::new(s.replace('\0', "")).unwrap_or_default())
        .into_raw()
}

/// Parse a C string to a Rust string slice.
unsafe fn parse_c_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok()
}

/// Parse a NUL-terminated UTF-16 string.
unsafe fn parse_wide_str(ptr: *const u16) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    let mut len = 0;
    while *ptr.add(len) != 0 {
        len += 1;
    }
    String::from_utf16(std::slice::from_raw_parts(ptr, len)).ok()
}

/// Shared borrow of the notifier behind a handle. Safe to hold on several
/// threads at once.
unsafe fn notifier_ref<'a>(handle: NotifierHandle) -> Option<&'a Notifier> {
    (handle as *const Notifier).as_ref()
}

/// Exclusive borrow of the notifier behind a handle. Callers must not race
/// any other call on the same handle.
unsafe fn notifier_mut<'a>(handle: NotifierHandle) -> Option<&'a mut Notifier> {
    (handle as *mut Notifier).as_mut()
}

// ============================================================================
// FFI Functions - Lifecycle
// ============================================================================

/// Create a new notifier.
///
/// # Arguments
/// * `callback` - Called for every endpoint state change (must not be null)
/// * `config_json` - JSON configuration string (can be null for defaults).
///   `log_level` only takes effect on the first create in the process.
///
/// # Returns
/// Handle to the notifier, or null on failure. Check
/// endpoint_notifier_last_error_code() on failure.
///
/// # Safety
/// The returned handle must be freed with endpoint_notifier_destroy().
#[no_mangle]
pub extern "C" fn endpoint_notifier_create(
    callback: Option<DeviceStateChangedCallback>,
    config_json: *const c_char,
) -> NotifierHandle {
    clear_last_error();

    let result = panic::catch_unwind(|| {
        let config = match unsafe { parse_config(config_json) } {
            Ok(config) => config,
            Err(message) => {
                set_last_error(ErrorCode::JsonError, message);
                return ptr::null_mut();
            }
        };
        init_logging(&config);

        let listener = match CallbackListener::new(callback) {
            Ok(listener) => listener,
            Err(e) => {
                fail(&e);
                return ptr::null_mut();
            }
        };

        let notifier = Box::new(Notifier::new(NotificationClient::create(listener)));
        info!("Endpoint notifier v{} created", env!("CARGO_PKG_VERSION"));
        Box::into_raw(notifier) as NotifierHandle
    });

    match result {
        Ok(handle) => handle,
        Err(_) => {
            set_last_error(ErrorCode::Panic, "Panic during notifier creation");
            ptr::null_mut()
        }
    }
}

/// Destroy a notifier, unregistering it first if needed.
///
/// # Safety
/// The handle must have been created by endpoint_notifier_create() and must
/// not be used after this call. Must not race any other call on the same handle.
#[no_mangle]
pub extern "C" fn endpoint_notifier_destroy(handle: NotifierHandle) {
    if handle.is_null() {
        return;
    }

    let _ = panic::catch_unwind(|| {
        let mut notifier = unsafe { Box::from_raw(handle as *mut Notifier) };
        if let Err(e) = notifier.unregister() {
            warn!(error = %e, "unregister during destroy failed");
        }
        debug!(ref_count = notifier.client.ref_count(), "releasing notifier");
    });
}

// ============================================================================
// FFI Functions - Registration
// ============================================================================

/// Register the notifier with the system audio device enumerator.
///
/// COM must already be initialized on the calling thread. Must not race any
/// other call on the same handle.
///
/// # Returns
/// 0 on success, negative error code on failure.
#[no_mangle]
pub extern "C" fn endpoint_notifier_register(handle: NotifierHandle) -> i32 {
    clear_last_error();

    let result = panic::catch_unwind(|| {
        let Some(notifier) = (unsafe { notifier_mut(handle) }) else {
            set_last_error(ErrorCode::InvalidHandle, "Invalid notifier handle");
            return ErrorCode::InvalidHandle as i32;
        };

        match notifier.register() {
            Ok(()) => ErrorCode::Success as i32,
            Err(e) => fail(&e),
        }
    });

    match result {
        Ok(code) => code,
        Err(_) => {
            set_last_error(ErrorCode::Panic, "Panic during register");
            ErrorCode::Panic as i32
        }
    }
}

/// Unregister the notifier. Succeeds if it is not registered.
///
/// Must not race any other call on the same handle.
///
/// # Returns
/// 0 on success, negative error code on failure.
#[no_mangle]
pub extern "C" fn endpoint_notifier_unregister(handle: NotifierHandle) -> i32 {
    clear_last_error();

    let result = panic::catch_unwind(|| {
        let Some(notifier) = (unsafe { notifier_mut(handle) }) else {
            set_last_error(ErrorCode::InvalidHandle, "Invalid notifier handle");
            return ErrorCode::InvalidHandle as i32;
        };

        match notifier.unregister() {
            Ok(()) => ErrorCode::Success as i32,
            Err(e) => fail(&e),
        }
    });

    match result {
        Ok(code) => code,
        Err(_) => {
            set_last_error(ErrorCode::Panic, "Panic during unregister");
            ErrorCode::Panic as i32
        }
    }
}

// ============================================================================
// FFI Functions - Diagnostics
// ============================================================================

/// Deliver a state change through the notifier as if the audio subsystem had
/// reported it. May be called from several threads at once.
///
/// # Arguments
/// * `handle` - Notifier handle
/// * `device_id` - The device ID (NUL-terminated UTF-16 string)
/// * `new_state` - Raw device state code
///
/// # Returns
/// 0 on success, negative error code on failure.
#[no_mangle]
pub extern "C" fn endpoint_notifier_notify_state(
    handle: NotifierHandle,
    device_id: *const u16,
    new_state: i32,
) -> i32 {
    clear_last_error();

    let result = panic::catch_unwind(|| {
        let Some(notifier) = (unsafe { notifier_ref(handle) }) else {
            set_last_error(ErrorCode::InvalidHandle, "Invalid notifier handle");
            return ErrorCode::InvalidHandle as i32;
        };

        let device_id = match unsafe { parse_wide_str(device_id) } {
            Some(id) if !id.is_empty() => id,
            _ => {
                set_last_error(ErrorCode::InvalidArgument, "Invalid device ID");
                return ErrorCode::InvalidArgument as i32;
            }
        };

        notifier
            .client
            .on_device_state_changed(&device_id, new_state as u32);
        ErrorCode::Success as i32
    });

    match result {
        Ok(code) => code,
        Err(_) => {
            set_last_error(ErrorCode::Panic, "Panic during notify state");
            ErrorCode::Panic as i32
        }
    }
}

/// Get the notifier's current reference count.
///
/// # Returns
/// The count, or 0 for a null handle.
#[no_mangle]
pub extern "C" fn endpoint_notifier_ref_count(handle: NotifierHandle) -> u32 {
    unsafe { notifier_ref(handle) }
        .map(|notifier| notifier.client.ref_count())
        .unwrap_or(0)
}

// ============================================================================
// FFI Functions - Memory Management
// ============================================================================

/// Free a string allocated by this library.
///
/// # Safety
/// The pointer must have been returned by one of the endpoint_notifier_* functions.
/// Do not call this on strings from other sources.
#[no_mangle]
pub extern "C" fn endpoint_notifier_free_string(ptr: *mut c_char) {
    if ptr.is_null() {
        return;
    }

    let _ = panic::catch_unwind(|| {
        unsafe {
            let _ = CString::from_raw(ptr);
        }
    });
}

// ============================================================================
// FFI Functions - Error Handling
// ============================================================================

/// Get the last error code.
///
/// # Returns
/// The error code from the last failed operation, or 0 if no error.
#[no_mangle]
pub extern "C" fn endpoint_notifier_last_error_code() -> i32 {
    LAST_ERROR.with(|e| {
        e.borrow()
            .as_ref()
            .map(|(code, _)| *code as i32)
            .unwrap_or(0)
    })
}

/// Get the last error message.
///
/// # Returns
/// Error message string. Caller must free with endpoint_notifier_free_string().
/// Returns null if no error.
#[no_mangle]
pub extern "C" fn endpoint_notifier_last_error_message() -> *mut c_char {
    LAST_ERROR.with(|e| {
        e.borrow()
            .as_ref()
            .map(|(_, msg)| alloc_c_string(msg))
            .unwrap_or(ptr::null_mut())
    })
}

// ============================================================================
// FFI Functions - Utility
// ============================================================================

/// Get the library version.
///
/// # Returns
/// Version string. Caller must free with endpoint_notifier_free_string().
#[no_mangle]
pub extern "C" fn endpoint_notifier_version() -> *mut c_char {
    alloc_c_string(env!("CARGO_PKG_VERSION"))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use endpoint_notifier_rs::HResult;
    use std::sync::Mutex;

    static CALLS: Mutex<Vec<(String, i32)>> = Mutex::new(Vec::new());

    unsafe extern "system" fn record_call(device_id: *const u16, new_state: i32) {
        let id = parse_wide_str(device_id).unwrap();
        CALLS.lock().unwrap().push((id, new_state));
    }

    fn calls_for(device_id: &str) -> Vec<i32> {
        CALLS
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == device_id)
            .map(|(_, state)| *state)
            .collect()
    }

    fn wide(s: &str) -> Vec<u16> {
        s.encode_utf16().chain(std::iter::once(0)).collect()
    }

    #[test]
    fn test_error_code_conversion() {
        assert_eq!(
            ErrorCode::from(&NotifierError::NullCallback),
            ErrorCode::InvalidArgument
        );
        assert_eq!(
            ErrorCode::from(&NotifierError::RegistrationFailed(HResult(-1))),
            ErrorCode::ComError
        );
    }

    #[test]
    fn test_null_callback_rejected() {
        let handle = endpoint_notifier_create(None, ptr::null());
        assert!(handle.is_null());
        assert_eq!(
            endpoint_notifier_last_error_code(),
            ErrorCode::InvalidArgument as i32
        );

        let message = endpoint_notifier_last_error_message();
        assert!(!message.is_null());
        endpoint_notifier_free_string(message);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = CString::new("{ not json").unwrap();
        let handle = endpoint_notifier_create(Some(record_call), config.as_ptr());
        assert!(handle.is_null());
        assert_eq!(endpoint_notifier_last_error_code(), ErrorCode::JsonError as i32);
    }

    #[test]
    fn test_notifier_lifecycle() {
        let config = CString::new(r#"{"log_level":"debug"}"#).unwrap();
        let handle = endpoint_notifier_create(Some(record_call), config.as_ptr());
        assert!(!handle.is_null());
        assert_eq!(endpoint_notifier_last_error_code(), 0);
        assert_eq!(endpoint_notifier_ref_count(handle), 1);

        assert_eq!(endpoint_notifier_unregister(handle), 0);
        endpoint_notifier_destroy(handle);
    }

    #[test]
    fn test_later_log_level_does_not_fail_create() {
        let first = CString::new(r#"{"log_level":"info"}"#).unwrap();
        let second = CString::new(r#"{"log_level":"trace"}"#).unwrap();

        let a = endpoint_notifier_create(Some(record_call), first.as_ptr());
        let b = endpoint_notifier_create(Some(record_call), second.as_ptr());
        assert!(!a.is_null());
        assert!(!b.is_null());
        assert_eq!(endpoint_notifier_last_error_code(), 0);

        endpoint_notifier_destroy(a);
        endpoint_notifier_destroy(b);
    }

    #[test]
    fn test_concurrent_notify_state_delivers_each_event_once() {
        const THREADS: usize = 6;
        const EVENTS: usize = 50;

        let handle = endpoint_notifier_create(Some(record_call), ptr::null());
        assert!(!handle.is_null());
        // Raw pointers are not Send; the handle crosses threads as an address
        let address = handle as usize;

        let workers: Vec<_> = (0..THREADS)
            .map(|t| {
                std::thread::spawn(move || {
                    for e in 0..EVENTS {
                        let id = wide(&format!("concurrent-{t}-{e}"));
                        let code = endpoint_notifier_notify_state(
                            address as NotifierHandle,
                            id.as_ptr(),
                            1,
                        );
                        assert_eq!(code, 0);
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }

        for t in 0..THREADS {
            for e in 0..EVENTS {
                assert_eq!(calls_for(&format!("concurrent-{t}-{e}")), vec![1]);
            }
        }
        assert_eq!(endpoint_notifier_ref_count(handle), 1);

        endpoint_notifier_destroy(handle);
    }

    #[test]
    fn test_state_change_reaches_callback() {
        let handle = endpoint_notifier_create(Some(record_call), ptr::null());
        let id = wide("Speakers\\Wave\\00000001");

        assert_eq!(endpoint_notifier_notify_state(handle, id.as_ptr(), 1), 0);
        assert_eq!(calls_for("Speakers\\Wave\\00000001"), vec![1]);

        endpoint_notifier_destroy(handle);
    }

    #[test]
    fn test_notify_rejects_bad_arguments() {
        let handle = endpoint_notifier_create(Some(record_call), ptr::null());
        let empty = wide("");

        assert_eq!(
            endpoint_notifier_notify_state(handle, ptr::null(), 1),
            ErrorCode::InvalidArgument as i32
        );
        assert_eq!(
            endpoint_notifier_notify_state(handle, empty.as_ptr(), 1),
            ErrorCode::InvalidArgument as i32
        );
        assert_eq!(
            endpoint_notifier_notify_state(ptr::null_mut(), wide("mic").as_ptr(), 1),
            ErrorCode::InvalidHandle as i32
        );

        endpoint_notifier_destroy(handle);
    }

    #[test]
    fn test_null_handle_is_harmless() {
        assert_eq!(endpoint_notifier_ref_count(ptr::null_mut()), 0);
        assert_eq!(
            endpoint_notifier_register(ptr::null_mut()),
            ErrorCode::InvalidHandle as i32
        );
        endpoint_notifier_destroy(ptr::null_mut());
    }

    #[cfg(not(windows))]
    #[test]
    fn test_register_unsupported_off_windows() {
        let handle = endpoint_notifier_create(Some(record_call), ptr::null());
        assert_eq!(
            endpoint_notifier_register(handle),
            ErrorCode::Unsupported as i32
        );
        endpoint_notifier_destroy(handle);
    }

    #[test]
    fn test_version() {
        let version = endpoint_notifier_version();
        assert!(!version.is_null());
        unsafe {
            let s = CStr::from_ptr(version).to_str().unwrap();
            assert!(!s.is_empty());
        }
        endpoint_notifier_free_string(version);
    }
}
