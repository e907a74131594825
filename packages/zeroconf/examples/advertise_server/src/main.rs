#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use std::sync::Arc;

use desklink_zeroconf::{DiscoveryConfig, DiscoveryCoordinator, DiscoveryEvent, Role};
use tokio::net::TcpListener;

struct ServerConfig {
    port: u16,
}

impl DiscoveryConfig for ServerConfig {
    fn role(&self) -> Role {
        Role::Server
    }

    fn screen_name(&self) -> String {
        "server".to_string()
    }

    fn listen_port(&self) -> std::io::Result<u16> {
        Ok(self.port)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();

    desklink_zeroconf::silence_avahi_warning();

    // Stands in for the real peer-to-peer listener whose port gets advertised.
    let listener = TcpListener::bind("0.0.0.0:0").await?;
    let port = listener.local_addr()?.port();
    log::info!("Listening on port {port}");

    let (tx, rx) = kanal::unbounded_async();
    let coordinator = DiscoveryCoordinator::start(Arc::new(ServerConfig { port }), tx).await?;

    tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            match event {
                DiscoveryEvent::PeerDetected { role, name } => {
                    log::info!("Detected {role:?} peer: {name}");
                }
                DiscoveryEvent::TransportError { code } => {
                    log::error!("Discovery transport error: {code}");
                }
                DiscoveryEvent::RegistrationWarning { reason } => {
                    log::warn!("{reason}; clients will need the address typed in manually");
                }
            }
        }
    });

    tokio::signal::ctrl_c().await?;

    coordinator.shutdown().await?;

    Ok(())
}
