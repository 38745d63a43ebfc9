//! Scoped registration of a notification client with the audio subsystem.

use super::device::NotifierError;
use tracing::{debug, warn};

/// The subsystem that accepts notification clients.
#[cfg_attr(test, mockall::automock(type Client = u32;))]
pub trait NotificationHost {
    /// Handle type the host hands callbacks to.
    type Client;

    fn register(&self, client: &Self::Client) -> Result<(), NotifierError>;

    fn unregister(&self, client: &Self::Client) -> Result<(), NotifierError>;
}

/// A live registration. Unregisters exactly once, either through
/// [`Registration::unregister`] or on drop.
pub struct Registration<H: NotificationHost> {
    host: H,
    client: H::Client,
    active: bool,
}

impl<H: NotificationHost> Registration<H> {
    /// Register `client` with `host`.
    pub fn new(host: H, client: H::Client) -> Result<Self, NotifierError> {
        host.register(&client)?;
        debug!("endpoint notifications registered");

        Ok(Self {
            host,
            client,
            active: true,
        })
    }

    /// The registered client.
    pub fn client(&self) -> &H::Client {
        &self.client
    }

    /// Unregister now and report the outcome.
    pub fn unregister(mut self) -> Result<(), NotifierError> {
        self.active = false;
        self.host.unregister(&self.client)?;
        debug!("endpoint notifications unregistered");
        Ok(())
    }
}

impl<H: NotificationHost> Drop for Registration<H> {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;

        match self.host.unregister(&self.client) {
            Ok(()) => debug!("endpoint notifications unregistered on drop"),
            Err(e) => warn!(error = %e, "failed to unregister endpoint notifications"),
        }
    }
}
