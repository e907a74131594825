//! At-most-once registration of this host's own advertisement.

use std::net::IpAddr;

use mdns_sd::ServiceInfo;
use thiserror::Error;

use crate::{Role, address, service::MdnsServiceDaemon};

#[derive(Debug, Error)]
pub enum RegisterServiceError {
    #[error(transparent)]
    MdnsSd(#[from] mdns_sd::Error),
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error(transparent)]
    Interfaces(#[from] local_ip_address::Error),
    #[error("No usable local address to advertise")]
    AddressUnavailable,
}

/// Live advertisement resource. At most one exists per registrar; released
/// unconditionally when the registrar is dropped.
#[derive(Debug)]
struct RegistrationHandle {
    fullname: String,
}

pub struct ServiceRegistrar {
    daemon: Box<dyn MdnsServiceDaemon>,
    registration: Option<RegistrationHandle>,
}

impl ServiceRegistrar {
    #[must_use]
    pub fn new(daemon: Box<dyn MdnsServiceDaemon>) -> Self {
        Self {
            daemon,
            registration: None,
        }
    }

    #[must_use]
    pub const fn registered(&self) -> bool {
        self.registration.is_some()
    }

    /// Advertised instance name for a role: servers advertise their preferred
    /// local address, clients their user-assigned screen name verbatim.
    ///
    /// # Errors
    ///
    /// * If the server role has no usable local address among `candidates`
    pub fn advertised_name(
        role: Role,
        screen_name: &str,
        candidates: &[IpAddr],
    ) -> Result<String, RegisterServiceError> {
        match role {
            Role::Server => address::select_address(candidates)
                .map(|x| x.to_string())
                .ok_or(RegisterServiceError::AddressUnavailable),
            Role::Client => Ok(screen_name.to_string()),
        }
    }

    /// Registers this host's advertisement for `role` on the already-bound
    /// listener port.
    ///
    /// # Errors
    ///
    /// * If the local network interfaces cannot be enumerated
    /// * If the server role has no usable local address
    /// * If `mdns_sd` has an error registering the service
    /// * If there is an IO error
    pub async fn register_role(
        &mut self,
        role: Role,
        screen_name: &str,
        port: u16,
    ) -> Result<(), RegisterServiceError> {
        let candidates = address::local_candidates()?;
        let instance_name = Self::advertised_name(role, screen_name, &candidates)?;

        // Clients advertise a screen name, so their record still needs some
        // reachable address even when no preferred one exists.
        let ip = address::select_address(&candidates).map_or_else(
            || {
                local_ip_address::local_ip().map_or_else(
                    |e| {
                        log::warn!("register_role: Failed to get local ip address: {e:?}");
                        "127.0.0.1".to_string()
                    },
                    |x| x.to_string(),
                )
            },
            |x| x.to_string(),
        );

        self.register(&instance_name, role.service_type(), &ip, port)
            .await
    }

    /// Registers a single `(instance_name, service_type, port)` advertisement.
    /// Idempotent: while a registration is live this reports success without
    /// touching the daemon again.
    ///
    /// # Errors
    ///
    /// * If `mdns_sd` has an error registering the service
    /// * If there is an IO error
    pub async fn register(
        &mut self,
        instance_name: &str,
        service_type: &str,
        ip: &str,
        port: u16,
    ) -> Result<(), RegisterServiceError> {
        if let Some(registration) = &self.registration {
            log::debug!(
                "register: Already registered fullname={}",
                registration.fullname
            );
            return Ok(());
        }

        let host_name = format!(
            "{}.local.",
            hostname::get()?
                .into_string()
                .unwrap_or_else(|_| "unknown".to_string())
        );

        log::debug!(
            "register: Registering mdns service service_type={service_type} instance_name={instance_name} host_name={host_name} ip={ip} port={port}"
        );

        let service_info = ServiceInfo::new(service_type, instance_name, &host_name, ip, port, None)?;
        let fullname = service_info.get_fullname().to_string();

        self.daemon.register(service_info).await?;

        log::debug!("register: Registered mdns service fullname={fullname}");

        self.registration = Some(RegistrationHandle { fullname });

        Ok(())
    }
}

impl Drop for ServiceRegistrar {
    fn drop(&mut self) {
        if let Some(registration) = self.registration.take() {
            if let Err(e) = self.daemon.unregister(&registration.fullname) {
                log::warn!(
                    "drop: Failed to unregister mdns service fullname={}: {e:?}",
                    registration.fullname
                );
            }
        }
    }
}
