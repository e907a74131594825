#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use std::sync::Arc;

use desklink_zeroconf::{DiscoveryConfig, DiscoveryCoordinator, DiscoveryEvent, Role};
use tokio::net::TcpListener;

struct ClientConfig {
    screen_name: String,
    port: u16,
}

impl DiscoveryConfig for ClientConfig {
    fn role(&self) -> Role {
        Role::Client
    }

    fn screen_name(&self) -> String {
        self.screen_name.clone()
    }

    fn listen_port(&self) -> std::io::Result<u16> {
        Ok(self.port)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();

    desklink_zeroconf::silence_avahi_warning();

    let screen_name = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "desklink-client".to_string());

    let listener = TcpListener::bind("0.0.0.0:0").await?;
    let port = listener.local_addr()?.port();

    let (tx, rx) = kanal::unbounded_async();
    let coordinator =
        DiscoveryCoordinator::start(Arc::new(ClientConfig { screen_name, port }), tx).await?;

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
                    log::warn!("{reason}");
                }
            }
        }
    });

    tokio::signal::ctrl_c().await?;

    coordinator.shutdown().await?;

    Ok(())
}
