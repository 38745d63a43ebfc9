//! Audio endpoint data models.
//!
//! Defines the integer codes the audio subsystem reports for endpoint state,
//! data flow and role, and the notifier error type.

use super::com::{HResult, InterfaceId};
use thiserror::Error;

/// Raw `DEVICE_STATE_ACTIVE` code.
pub const DEVICE_STATE_ACTIVE: u32 = 0x1;
/// Raw `DEVICE_STATE_DISABLED` code.
pub const DEVICE_STATE_DISABLED: u32 = 0x2;
/// Raw `DEVICE_STATE_NOTPRESENT` code.
pub const DEVICE_STATE_NOTPRESENT: u32 = 0x4;
/// Raw `DEVICE_STATE_UNPLUGGED` code.
pub const DEVICE_STATE_UNPLUGGED: u32 = 0x8;

/// Windows device state flags.
///
/// Only used to describe a state code; notifications always carry the raw
/// code so that values unknown to this crate still reach the owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DeviceState {
    /// Device is active and available for use
    Active = DEVICE_STATE_ACTIVE,

    /// Device is disabled in Windows Sound settings
    Disabled = DEVICE_STATE_DISABLED,

    /// Device is not present (driver removed or never installed)
    NotPresent = DEVICE_STATE_NOTPRESENT,

    /// Device is unplugged (for pluggable devices)
    Unplugged = DEVICE_STATE_UNPLUGGED,
}

impl DeviceState {
    /// Decode a raw state code. Returns `None` for codes outside the known set.
    pub fn from_raw(code: u32) -> Option<Self> {
        match code {
            DEVICE_STATE_ACTIVE => Some(DeviceState::Active),
            DEVICE_STATE_DISABLED => Some(DeviceState::Disabled),
            DEVICE_STATE_NOTPRESENT => Some(DeviceState::NotPresent),
            DEVICE_STATE_UNPLUGGED => Some(DeviceState::Unplugged),
            _ => None,
        }
    }

    /// The raw code for this state.
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Human-readable label for a raw code, used in log fields.
    pub fn describe(code: u32) -> &'static str {
        match Self::from_raw(code) {
            Some(DeviceState::Active) => "active",
            Some(DeviceState::Disabled) => "disabled",
            Some(DeviceState::NotPresent) => "not-present",
            Some(DeviceState::Unplugged) => "unplugged",
            None => "unknown",
        }
    }
}

impl std::fmt::Display for DeviceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(Self::describe(self.code()))
    }
}

/// Audio data flow direction (maps to Windows EDataFlow enum).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum DataFlow {
    /// Playback endpoints (speakers, headphones)
    Render = 0,

    /// Recording endpoints (microphones, line-in)
    Capture = 1,

    /// Both directions
    All = 2,
}

impl DataFlow {
    pub fn from_raw(code: i32) -> Option<Self> {
        match code {
            0 => Some(DataFlow::Render),
            1 => Some(DataFlow::Capture),
            2 => Some(DataFlow::All),
            _ => None,
        }
    }
}

/// Audio device role (maps to Windows ERole enum).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum DeviceRole {
    /// Used by games, system sounds, most general applications
    Console = 0,

    /// Used by music players, video players
    Multimedia = 1,

    /// Used by Teams, Zoom, Discord, and other VoIP applications
    Communications = 2,
}

impl DeviceRole {
    pub fn from_raw(code: i32) -> Option<Self> {
        match code {
            0 => Some(DeviceRole::Console),
            1 => Some(DeviceRole::Multimedia),
            2 => Some(DeviceRole::Communications),
            _ => None,
        }
    }
}

/// Identifies a device property whose value changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PropertyKey {
    /// Format id of the property set
    pub fmtid: InterfaceId,

    /// Property id within the set
    pub pid: u32,
}

impl std::fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.fmtid, self.pid)
    }
}

/// Notifier error types.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NotifierError {
    #[error("State-changed callback must not be null")]
    NullCallback,

    #[error("Device enumerator unavailable: {0}")]
    EnumeratorUnavailable(HResult),

    #[error("Failed to register endpoint notifications: {0}")]
    RegistrationFailed(HResult),

    #[error("Failed to unregister endpoint notifications: {0}")]
    UnregistrationFailed(HResult),

    #[error("Notification client is already registered")]
    AlreadyRegistered,

    #[error("Endpoint notifications are not supported on this platform")]
    Unsupported,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_codes_decode() {
        assert_eq!(DeviceState::from_raw(1), Some(DeviceState::Active));
        assert_eq!(DeviceState::from_raw(8), Some(DeviceState::Unplugged));
        assert_eq!(DeviceState::from_raw(0x10), None);
        assert_eq!(DeviceState::NotPresent.code(), 4);
    }

    #[test]
    fn test_state_describe() {
        assert_eq!(DeviceState::describe(2), "disabled");
        assert_eq!(DeviceState::describe(3), "unknown");
        assert_eq!(DeviceState::Unplugged.to_string(), "unplugged");
    }

    #[test]
    fn test_flow_and_role_decode() {
        assert_eq!(DataFlow::from_raw(1), Some(DataFlow::Capture));
        assert_eq!(DataFlow::from_raw(3), None);
        assert_eq!(DeviceRole::from_raw(2), Some(DeviceRole::Communications));
        assert_eq!(DeviceRole::from_raw(-1), None);
    }

    #[test]
    fn test_error_messages() {
        let err = NotifierError::RegistrationFailed(HResult(0x8889_0008_u32 as i32));
        assert_eq!(
            err.to_string(),
            "Failed to register endpoint notifications: 0x88890008"
        );
    }
}
