//! Windows Core Audio binding for the notification client.
//!
//! Exposes a `NotificationClient` as a real `IMMNotificationClient` COM
//! object and registers it with an `IMMDeviceEnumerator`.

use super::com::HResult;
use super::device::{NotifierError, PropertyKey};
use super::notifications::{ClientRef, EndpointNotifications};
use super::registration::{NotificationHost, Registration};
use windows::core::{implement, HRESULT, PCWSTR};
use windows::Win32::Media::Audio::{
    EDataFlow, ERole, IMMDeviceEnumerator, IMMNotificationClient, IMMNotificationClient_Impl,
    MMDeviceEnumerator, DEVICE_STATE,
};
use windows::Win32::System::Com::{CoCreateInstance, CLSCTX_ALL};
use windows::Win32::UI::Shell::PropertiesSystem::PROPERTYKEY;
// Re-export windows_core so the implement macro can find it
#[allow(unused_imports)]
use windows_core;

/// COM object that forwards `IMMNotificationClient` callbacks to a
/// `NotificationClient`. Holds one reference on it for as long as the COM
/// object lives.
#[implement(IMMNotificationClient)]
pub struct EndpointNotificationClient {
    client: ClientRef,
}

impl EndpointNotificationClient {
    pub fn new(client: ClientRef) -> Self {
        Self { client }
    }

    /// Convert into the COM interface handed to the enumerator.
    pub fn into_interface(self) -> IMMNotificationClient {
        self.into()
    }

    fn device_id(pwstrdeviceid: &PCWSTR) -> Option<String> {
        if pwstrdeviceid.is_null() {
            return None;
        }
        unsafe { pwstrdeviceid.to_string().ok() }
    }

    fn to_result(hr: HResult) -> windows::core::Result<()> {
        HRESULT(hr.0).ok()
    }
}

impl IMMNotificationClient_Impl for EndpointNotificationClient_Impl {
    fn OnDeviceStateChanged(
        &self,
        pwstrdeviceid: &PCWSTR,
        dwnewstate: DEVICE_STATE,
    ) -> windows::core::Result<()> {
        match EndpointNotificationClient::device_id(pwstrdeviceid) {
            Some(id) => EndpointNotificationClient::to_result(
                self.client.on_device_state_changed(&id, dwnewstate.0),
            ),
            None => Ok(()),
        }
    }

    fn OnDeviceAdded(&self, pwstrdeviceid: &PCWSTR) -> windows::core::Result<()> {
        match EndpointNotificationClient::device_id(pwstrdeviceid) {
            Some(id) => EndpointNotificationClient::to_result(self.client.on_device_added(&id)),
            None => Ok(()),
        }
    }

    fn OnDeviceRemoved(&self, pwstrdeviceid: &PCWSTR) -> windows::core::Result<()> {
        match EndpointNotificationClient::device_id(pwstrdeviceid) {
            Some(id) => EndpointNotificationClient::to_result(self.client.on_device_removed(&id)),
            None => Ok(()),
        }
    }

    fn OnDefaultDeviceChanged(
        &self,
        flow: EDataFlow,
        role: ERole,
        pwstrdefaultdeviceid: &PCWSTR,
    ) -> windows::core::Result<()> {
        // A null id means no default endpoint remains for this flow and role
        let device_id = EndpointNotificationClient::device_id(pwstrdefaultdeviceid);
        EndpointNotificationClient::to_result(self.client.on_default_device_changed(
            flow.0,
            role.0,
            device_id.as_deref(),
        ))
    }

    fn OnPropertyValueChanged(
        &self,
        pwstrdeviceid: &PCWSTR,
        key: &PROPERTYKEY,
    ) -> windows::core::Result<()> {
        let Some(id) = EndpointNotificationClient::device_id(pwstrdeviceid) else {
            return Ok(());
        };
        let key = PropertyKey {
            fmtid: key.fmtid.into(),
            pid: key.pid,
        };
        EndpointNotificationClient::to_result(self.client.on_property_value_changed(&id, &key))
    }
}

/// `IMMDeviceEnumerator` as a [`NotificationHost`].
#[derive(Clone)]
pub struct EndpointHost {
    enumerator: IMMDeviceEnumerator,
}

impl EndpointHost {
    pub fn new(enumerator: IMMDeviceEnumerator) -> Self {
        Self { enumerator }
    }

    /// Create the system MMDevice enumerator.
    ///
    /// Note: COM must be initialized on the calling thread.
    pub fn from_default_enumerator() -> Result<Self, NotifierError> {
        unsafe {
            let enumerator: IMMDeviceEnumerator =
                CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)
                    .map_err(|e| NotifierError::EnumeratorUnavailable(HResult::from(&e)))?;

            Ok(Self { enumerator })
        }
    }
}

impl NotificationHost for EndpointHost {
    type Client = IMMNotificationClient;

    fn register(&self, client: &IMMNotificationClient) -> Result<(), NotifierError> {
        unsafe {
            self.enumerator
                .RegisterEndpointNotificationCallback(client)
                .map_err(|e| NotifierError::RegistrationFailed(HResult::from(&e)))
        }
    }

    fn unregister(&self, client: &IMMNotificationClient) -> Result<(), NotifierError> {
        unsafe {
            self.enumerator
                .UnregisterEndpointNotificationCallback(client)
                .map_err(|e| NotifierError::UnregistrationFailed(HResult::from(&e)))
        }
    }
}

/// A registration with the system enumerator.
pub type EndpointRegistration = Registration<EndpointHost>;

/// Register `client` with the system enumerator until the returned guard is
/// dropped.
///
/// Note: COM must be initialized on the calling thread.
pub fn register_client(client: &ClientRef) -> Result<EndpointRegistration, NotifierError> {
    let host = EndpointHost::from_default_enumerator()?;
    let com_client = EndpointNotificationClient::new(client.clone()).into_interface();
    Registration::new(host, com_client)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::notifications::NotificationClient;
    use std::sync::{Arc, Mutex};
    use windows::core::{w, Interface, IUnknown};
    use windows::Win32::Media::Audio::{eCapture, eConsole};

    fn recording_client() -> (ClientRef, Arc<Mutex<Vec<(String, u32)>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&calls);
        let client = NotificationClient::create(move |id: &str, state: u32| {
            sink.lock().unwrap().push((id.to_string(), state));
        });
        (client, calls)
    }

    #[test]
    fn test_com_object_holds_one_reference() {
        let (client, _) = recording_client();
        let com = EndpointNotificationClient::new(client.clone()).into_interface();
        assert_eq!(client.ref_count(), 2);

        let unknown: IUnknown = com.cast().unwrap();
        drop(com);
        assert_eq!(client.ref_count(), 2);

        drop(unknown);
        assert_eq!(client.ref_count(), 1);
    }

    #[test]
    fn test_state_change_through_vtable() {
        let (client, calls) = recording_client();
        let com = EndpointNotificationClient::new(client.clone()).into_interface();

        unsafe {
            let hr = com.OnDeviceStateChanged(w!("Speakers\\Wave\\00000001"), DEVICE_STATE(1));
            hr.unwrap();
            com.OnDeviceAdded(w!("Speakers\\Wave\\00000002")).unwrap();
            com.OnDefaultDeviceChanged(eCapture, eConsole, PCWSTR::null()).unwrap();
        }

        assert_eq!(
            *calls.lock().unwrap(),
            vec![("Speakers\\Wave\\00000001".to_string(), 1)]
        );
    }

    #[test]
    fn test_null_device_id_dropped() {
        let (client, calls) = recording_client();
        let com = EndpointNotificationClient::new(client.clone()).into_interface();

        unsafe {
            com.OnDeviceStateChanged(PCWSTR::null(), DEVICE_STATE(1)).unwrap();
        }

        assert!(calls.lock().unwrap().is_empty());
    }
}
