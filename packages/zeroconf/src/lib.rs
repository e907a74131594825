#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Zeroconf service discovery for `DeskLink`.
//!
//! Advertises this host's role (server or client) on the local network over
//! mDNS and browses for peers advertising the complementary role. Discovered
//! peers and transport failures are delivered to the host as
//! [`DiscoveryEvent`]s over a channel. Nothing here blocks or retries;
//! discovery is an optional layer and no failure in this crate is fatal to
//! the host.

use std::sync::Once;

use service::MdnsServiceDaemon;

pub mod address;
pub mod browser;
pub mod coordinator;
pub mod register;
pub mod service;

pub use browser::{BrowseError, BrowseEvent, ServiceBrowser, ServiceRecord};
pub use coordinator::{CoordinatorError, DiscoveryCoordinator};
pub use register::{RegisterServiceError, ServiceRegistrar};

pub const SERVER_SERVICE_TYPE: &str = "_desklinkserver._tcp.local.";
pub const CLIENT_SERVICE_TYPE: &str = "_desklinkclient._tcp.local.";

/// Which side of a `DeskLink` session this host is. Fixed for the lifetime
/// of a [`DiscoveryCoordinator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

impl Role {
    /// The service type this role advertises.
    #[must_use]
    pub const fn service_type(self) -> &'static str {
        match self {
            Self::Server => SERVER_SERVICE_TYPE,
            Self::Client => CLIENT_SERVICE_TYPE,
        }
    }

    /// The complementary role this role browses for.
    #[must_use]
    pub const fn peer(self) -> Self {
        match self {
            Self::Server => Self::Client,
            Self::Client => Self::Server,
        }
    }
}

/// Host-facing discovery notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// A peer advertising the complementary role was seen in a snapshot.
    /// `role` is the peer's role. Repeated snapshots repeat this event; the
    /// host deduplicates by name if it needs to.
    PeerDetected { role: Role, name: String },
    /// A registration or browse transport failure, passed through verbatim.
    TransportError { code: String },
    /// The server role had no usable local address to advertise. The server
    /// keeps running, just undiscoverable over zeroconf.
    RegistrationWarning { reason: String },
}

/// Capabilities the host application provides to the discovery subsystem.
pub trait DiscoveryConfig: Send + Sync {
    fn role(&self) -> Role;

    /// The user-assigned screen name advertised by client-role hosts.
    fn screen_name(&self) -> String;

    /// The port of the already-bound peer-to-peer listener. The listener
    /// itself is owned by the host; this crate only advertises the port.
    ///
    /// # Errors
    ///
    /// * If the host failed to bind its listener
    fn listen_port(&self) -> std::io::Result<u16>;
}

static AVAHI_NOWARN: Once = Once::new();

/// Sets `AVAHI_COMPAT_NOWARN=1` once per process. The avahi bonjour compat
/// shim prints a warning unless this is set before the mdns daemon first
/// runs, so call this from the host's startup sequence ahead of
/// [`DiscoveryCoordinator::start`]. Has no effect on discovery semantics.
pub fn silence_avahi_warning() {
    AVAHI_NOWARN.call_once(|| {
        // SAFETY: guarded by `Once` and intended to run during single-threaded
        // startup, before anything reads the environment.
        unsafe {
            std::env::set_var("AVAHI_COMPAT_NOWARN", "1");
        }
    });
}

#[allow(clippy::unnecessary_wraps)]
pub(crate) fn get_service_daemon() -> Result<Box<dyn MdnsServiceDaemon>, mdns_sd::Error> {
    #[cfg(feature = "simulator")]
    {
        Ok(Box::new(service::simulator::SimulatorServiceDaemon))
    }

    #[cfg(not(feature = "simulator"))]
    {
        Ok(Box::new(service::MdnsSdServiceDaemon::new(
            mdns_sd::ServiceDaemon::new()?,
        )))
    }
}
