//! Capability identifiers and status codes used at the COM boundary.
//!
//! These mirror the `GUID` and `HRESULT` shapes of the Windows API so the
//! notification client can be exercised on any platform.

/// A 128-bit interface identifier (GUID).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterfaceId(u128);

impl InterfaceId {
    pub const fn from_u128(value: u128) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for InterfaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let v = self.0;
        write!(
            f,
            "{{{:08X}-{:04X}-{:04X}-{:04X}-{:012X}}}",
            (v >> 96) as u32,
            (v >> 80) as u16,
            (v >> 64) as u16,
            (v >> 48) as u16,
            v & 0xFFFF_FFFF_FFFF
        )
    }
}

impl std::fmt::Debug for InterfaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "InterfaceId({})", self)
    }
}

/// IUnknown, answered by every COM object.
pub const IID_IUNKNOWN: InterfaceId =
    InterfaceId::from_u128(0x00000000_0000_0000_c000_000000000046);

/// IMMNotificationClient
pub const IID_IMM_NOTIFICATION_CLIENT: InterfaceId =
    InterfaceId::from_u128(0x7991eec9_7e89_4d85_8390_6c703cec60c0);

/// A COM status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct HResult(pub i32);

impl HResult {
    pub const S_OK: HResult = HResult(0);
    pub const E_NOINTERFACE: HResult = HResult(0x8000_4002_u32 as i32);

    /// Success codes have the severity bit clear.
    pub const fn is_ok(self) -> bool {
        self.0 >= 0
    }
}

impl std::fmt::Display for HResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:08X}", self.0 as u32)
    }
}

#[cfg(windows)]
impl From<windows::core::GUID> for InterfaceId {
    fn from(guid: windows::core::GUID) -> Self {
        Self(guid.to_u128())
    }
}

#[cfg(windows)]
impl From<&windows::core::Error> for HResult {
    fn from(err: &windows::core::Error) -> Self {
        Self(err.code().0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interface_id_display() {
        assert_eq!(
            IID_IMM_NOTIFICATION_CLIENT.to_string(),
            "{7991EEC9-7E89-4D85-8390-6C703CEC60C0}"
        );
        assert_eq!(
            IID_IUNKNOWN.to_string(),
            "{00000000-0000-0000-C000-000000000046}"
        );
    }

    #[test]
    fn test_hresult_severity() {
        assert!(HResult::S_OK.is_ok());
        assert!(HResult(1).is_ok());
        assert!(!HResult::E_NOINTERFACE.is_ok());
        assert_eq!(HResult::E_NOINTERFACE.to_string(), "0x80004002");
    }

    #[cfg(windows)]
    #[test]
    fn test_ids_match_windows_bindings() {
        use windows::core::{Interface, IUnknown};
        use windows::Win32::Media::Audio::IMMNotificationClient;

        assert_eq!(InterfaceId::from(IUnknown::IID), IID_IUNKNOWN);
        assert_eq!(
            InterfaceId::from(IMMNotificationClient::IID),
            IID_IMM_NOTIFICATION_CLIENT
        );
    }
}
