//! Role-based orchestration of registration and browsing.
//!
//! A server registers its own advertisement first and only browses for
//! clients once that succeeds; an unreachable server gains nothing from
//! discovering clients. A client browses for servers unconditionally and
//! never registers anything.

use std::sync::Arc;

use thiserror::Error;
use tokio::{
    sync::RwLock,
    task::{JoinError, JoinHandle},
};
use tokio_util::sync::CancellationToken;

use crate::{
    DiscoveryConfig, DiscoveryEvent, Role,
    browser::{BrowseError, BrowseEvent, ServiceBrowser},
    get_service_daemon,
    register::{RegisterServiceError, ServiceRegistrar},
};

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Send(#[from] kanal::SendError),
    #[error(transparent)]
    Join(#[from] JoinError),
    #[error(transparent)]
    Browse(#[from] BrowseError),
}

pub struct DiscoveryCoordinator {
    token: CancellationToken,
    browser: Option<ServiceBrowser>,
    handler: Option<JoinHandle<Result<(), CoordinatorError>>>,
    registrar: Option<Arc<RwLock<ServiceRegistrar>>>,
}

impl DiscoveryCoordinator {
    /// Starts discovery for the host's role. Registration failures on the
    /// server role are reported over `sender` and leave the coordinator
    /// inert rather than failing the host.
    ///
    /// # Errors
    ///
    /// * If an event cannot be delivered to the host
    pub async fn start(
        config: Arc<dyn DiscoveryConfig>,
        sender: kanal::AsyncSender<DiscoveryEvent>,
    ) -> Result<Self, CoordinatorError> {
        match config.role() {
            Role::Server => {
                let daemon = match get_service_daemon() {
                    Ok(daemon) => daemon,
                    Err(e) => {
                        log::warn!("discovery: Failed to create mdns daemon: {e:?}");
                        sender
                            .send(DiscoveryEvent::TransportError {
                                code: e.to_string(),
                            })
                            .await?;
                        return Ok(Self::inert());
                    }
                };

                Self::start_server(config, sender, ServiceRegistrar::new(daemon)).await
            }
            Role::Client => Ok(Self::start_client(sender)),
        }
    }

    async fn start_server(
        config: Arc<dyn DiscoveryConfig>,
        sender: kanal::AsyncSender<DiscoveryEvent>,
        mut registrar: ServiceRegistrar,
    ) -> Result<Self, CoordinatorError> {
        if let Err(e) = register_own_service(&mut registrar, &*config).await {
            log::warn!("discovery: Failed to register server advertisement: {e:?}");
            sender.send(registration_failure(&e)).await?;
            return Ok(Self::inert());
        }

        let token = CancellationToken::new();
        let (browse_tx, browse_rx) = kanal::unbounded_async();

        let mut browser = ServiceBrowser::new(browse_tx);
        browser.browse(Role::Client.service_type());

        let registrar = Arc::new(RwLock::new(registrar));
        let handler = tokio::spawn(server_peer_loop(
            config,
            registrar.clone(),
            browse_rx,
            sender,
            token.clone(),
        ));

        Ok(Self {
            token,
            browser: Some(browser),
            handler: Some(handler),
            registrar: Some(registrar),
        })
    }

    fn start_client(sender: kanal::AsyncSender<DiscoveryEvent>) -> Self {
        let token = CancellationToken::new();
        let (browse_tx, browse_rx) = kanal::unbounded_async();

        let mut browser = ServiceBrowser::new(browse_tx);
        browser.browse(Role::Server.service_type());

        let handler = tokio::spawn(client_peer_loop(browse_rx, sender, token.clone()));

        Self {
            token,
            browser: Some(browser),
            handler: Some(handler),
            registrar: None,
        }
    }

    fn inert() -> Self {
        Self {
            token: CancellationToken::new(),
            browser: None,
            handler: None,
            registrar: None,
        }
    }

    /// Whether this coordinator is actively browsing for peers.
    #[must_use]
    pub const fn browsing(&self) -> bool {
        self.browser.is_some()
    }

    /// Tears discovery down: host events stop immediately, then the browse
    /// subscription is released, then the registration handle. Both are gone
    /// by the time this returns.
    ///
    /// # Errors
    ///
    /// * If the browse or handler task failed to join
    pub async fn shutdown(mut self) -> Result<(), CoordinatorError> {
        log::debug!("discovery: Shutting down");
        self.token.cancel();

        if let Some(browser) = self.browser.take() {
            browser.shutdown().await?;
        }
        if let Some(handler) = self.handler.take() {
            handler.await??;
        }
        drop(self.registrar.take());

        Ok(())
    }
}

impl Drop for DiscoveryCoordinator {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn register_own_service(
    registrar: &mut ServiceRegistrar,
    config: &dyn DiscoveryConfig,
) -> Result<(), RegisterServiceError> {
    let port = config.listen_port()?;
    registrar
        .register_role(Role::Server, &config.screen_name(), port)
        .await
}

fn registration_failure(e: &RegisterServiceError) -> DiscoveryEvent {
    match e {
        RegisterServiceError::AddressUnavailable => DiscoveryEvent::RegistrationWarning {
            reason: e.to_string(),
        },
        e => DiscoveryEvent::TransportError {
            code: e.to_string(),
        },
    }
}

async fn server_peer_loop(
    config: Arc<dyn DiscoveryConfig>,
    registrar: Arc<RwLock<ServiceRegistrar>>,
    receiver: kanal::AsyncReceiver<BrowseEvent>,
    sender: kanal::AsyncSender<DiscoveryEvent>,
    token: CancellationToken,
) -> Result<(), CoordinatorError> {
    while let Ok(Some(event)) = {
        tokio::select! {
            biased;
            () = token.cancelled() => Ok(None),
            event = receiver.recv() => event.map(Some),
        }
    } {
        match event {
            BrowseEvent::Snapshot(records) => {
                for record in records {
                    let mut registrar = registrar.write().await;
                    if !registrar.registered() {
                        if let Err(e) = register_own_service(&mut registrar, &*config).await {
                            log::warn!("discovery: Deferred registration failed: {e:?}");
                            sender.send(registration_failure(&e)).await?;
                        }
                    }
                    drop(registrar);

                    log::info!("discovery: Client detected: {}", record.service_name);
                    sender
                        .send(DiscoveryEvent::PeerDetected {
                            role: Role::Client,
                            name: record.service_name,
                        })
                        .await?;
                }
            }
            BrowseEvent::Error(code) => {
                sender.send(DiscoveryEvent::TransportError { code }).await?;
            }
        }
    }

    Ok(())
}

async fn client_peer_loop(
    receiver: kanal::AsyncReceiver<BrowseEvent>,
    sender: kanal::AsyncSender<DiscoveryEvent>,
    token: CancellationToken,
) -> Result<(), CoordinatorError> {
    while let Ok(Some(event)) = {
        tokio::select! {
            biased;
            () = token.cancelled() => Ok(None),
            event = receiver.recv() => event.map(Some),
        }
    } {
        match event {
            BrowseEvent::Snapshot(records) => {
                for record in records {
                    log::info!("discovery: Server detected: {}", record.service_name);
                    sender
                        .send(DiscoveryEvent::PeerDetected {
                            role: Role::Server,
                            name: record.service_name,
                        })
                        .await?;
                }
            }
            BrowseEvent::Error(code) => {
                sender.send(DiscoveryEvent::TransportError { code }).await?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, Mutex},
        time::Duration,
    };

    use async_trait::async_trait;
    use mdns_sd::ServiceInfo;
    use pretty_assertions::assert_eq;
    use tokio::time::timeout;
    use tokio_util::sync::CancellationToken;

    use super::{
        DiscoveryCoordinator, client_peer_loop, registration_failure, server_peer_loop,
    };
    use crate::{
        DiscoveryConfig, DiscoveryEvent, RegisterServiceError, Role, SERVER_SERVICE_TYPE,
        browser::{BrowseEvent, ServiceRecord},
        register::ServiceRegistrar,
        service::MdnsServiceDaemon,
    };

    #[derive(Default, Clone)]
    struct RecordingDaemon {
        registered: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl MdnsServiceDaemon for RecordingDaemon {
        async fn register(&self, service_info: ServiceInfo) -> Result<(), mdns_sd::Error> {
            self.registered
                .lock()
                .unwrap()
                .push(service_info.get_fullname().to_string());
            Ok(())
        }

        fn unregister(&self, _fullname: &str) -> Result<(), mdns_sd::Error> {
            Ok(())
        }
    }

    struct TestConfig {
        role: Role,
        port: Option<u16>,
    }

    impl DiscoveryConfig for TestConfig {
        fn role(&self) -> Role {
            self.role
        }

        fn screen_name(&self) -> String {
            "alice".to_string()
        }

        fn listen_port(&self) -> std::io::Result<u16> {
            self.port.ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::AddrNotAvailable, "listener not bound")
            })
        }
    }

    fn peer_record(name: &str) -> ServiceRecord {
        ServiceRecord {
            service_name: name.to_string(),
            service_type: SERVER_SERVICE_TYPE.to_string(),
            host_target: format!("{name}.local."),
        }
    }

    async fn recv(
        receiver: &kanal::AsyncReceiver<DiscoveryEvent>,
    ) -> DiscoveryEvent {
        timeout(Duration::from_secs(5), receiver.recv())
            .await
            .expect("timed out waiting for a discovery event")
            .expect("event channel closed")
    }

    #[test]
    fn only_a_missing_address_is_a_warning() {
        assert!(matches!(
            registration_failure(&RegisterServiceError::AddressUnavailable),
            DiscoveryEvent::RegistrationWarning { .. }
        ));
        assert!(matches!(
            registration_failure(&RegisterServiceError::MdnsSd(mdns_sd::Error::Msg(
                "daemon unavailable".to_string()
            ))),
            DiscoveryEvent::TransportError { .. }
        ));
    }

    #[test_log::test(tokio::test)]
    async fn failed_registration_gates_all_browsing() {
        let config = Arc::new(TestConfig {
            role: Role::Server,
            port: None,
        });
        let daemon = RecordingDaemon::default();
        let registered = daemon.registered.clone();
        let (tx, rx) = kanal::unbounded_async();

        let coordinator = DiscoveryCoordinator::start_server(
            config,
            tx,
            ServiceRegistrar::new(Box::new(daemon)),
        )
        .await
        .unwrap();

        assert!(matches!(
            recv(&rx).await,
            DiscoveryEvent::TransportError { .. }
        ));
        assert!(!coordinator.browsing());
        assert!(registered.lock().unwrap().is_empty());

        coordinator.shutdown().await.unwrap();

        assert!(rx.is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn repeated_snapshots_repeat_peer_events() {
        let (browse_tx, browse_rx) = kanal::unbounded_async();
        let (tx, rx) = kanal::unbounded_async();
        let token = CancellationToken::new();

        let handler = tokio::spawn(client_peer_loop(browse_rx, tx, token.clone()));

        let snapshot = vec![peer_record("10.0.0.7")];
        browse_tx
            .send(BrowseEvent::Snapshot(snapshot.clone()))
            .await
            .unwrap();
        browse_tx
            .send(BrowseEvent::Snapshot(snapshot))
            .await
            .unwrap();

        for _ in 0..2 {
            assert_eq!(
                recv(&rx).await,
                DiscoveryEvent::PeerDetected {
                    role: Role::Server,
                    name: "10.0.0.7".to_string(),
                }
            );
        }

        token.cancel();
        handler.await.unwrap().unwrap();
    }

    #[test_log::test(tokio::test)]
    async fn browse_errors_forward_to_the_host_once() {
        let (browse_tx, browse_rx) = kanal::unbounded_async();
        let (tx, rx) = kanal::unbounded_async();
        let token = CancellationToken::new();

        let handler = tokio::spawn(client_peer_loop(browse_rx, tx, token.clone()));

        browse_tx
            .send(BrowseEvent::Error("kDNSServiceErr_Unknown".to_string()))
            .await
            .unwrap();

        assert_eq!(
            recv(&rx).await,
            DiscoveryEvent::TransportError {
                code: "kDNSServiceErr_Unknown".to_string(),
            }
        );

        token.cancel();
        handler.await.unwrap().unwrap();
        assert!(rx.is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn detected_clients_do_not_re_register_a_registered_server() {
        let daemon = RecordingDaemon::default();
        let registered = daemon.registered.clone();
        let mut registrar = ServiceRegistrar::new(Box::new(daemon));
        registrar
            .register("10.0.0.7", SERVER_SERVICE_TYPE, "10.0.0.7", 24800)
            .await
            .unwrap();

        let (browse_tx, browse_rx) = kanal::unbounded_async();
        let (tx, rx) = kanal::unbounded_async();
        let token = CancellationToken::new();

        let handler = tokio::spawn(server_peer_loop(
            Arc::new(TestConfig {
                role: Role::Server,
                port: Some(24800),
            }),
            Arc::new(tokio::sync::RwLock::new(registrar)),
            browse_rx,
            tx,
            token.clone(),
        ));

        browse_tx
            .send(BrowseEvent::Snapshot(vec![
                peer_record("alice"),
                peer_record("bob"),
            ]))
            .await
            .unwrap();

        assert_eq!(
            recv(&rx).await,
            DiscoveryEvent::PeerDetected {
                role: Role::Client,
                name: "alice".to_string(),
            }
        );
        assert_eq!(
            recv(&rx).await,
            DiscoveryEvent::PeerDetected {
                role: Role::Client,
                name: "bob".to_string(),
            }
        );
        assert_eq!(registered.lock().unwrap().len(), 1);

        token.cancel();
        handler.await.unwrap().unwrap();
    }

    #[test_log::test(tokio::test)]
    async fn deferred_registration_failure_reports_and_keeps_notifying() {
        let registrar = ServiceRegistrar::new(Box::new(RecordingDaemon::default()));

        let (browse_tx, browse_rx) = kanal::unbounded_async();
        let (tx, rx) = kanal::unbounded_async();
        let token = CancellationToken::new();

        let handler = tokio::spawn(server_peer_loop(
            Arc::new(TestConfig {
                role: Role::Server,
                port: None,
            }),
            Arc::new(tokio::sync::RwLock::new(registrar)),
            browse_rx,
            tx,
            token.clone(),
        ));

        browse_tx
            .send(BrowseEvent::Snapshot(vec![peer_record("alice")]))
            .await
            .unwrap();

        assert!(matches!(
            recv(&rx).await,
            DiscoveryEvent::TransportError { .. }
        ));
        assert_eq!(
            recv(&rx).await,
            DiscoveryEvent::PeerDetected {
                role: Role::Client,
                name: "alice".to_string(),
            }
        );

        token.cancel();
        handler.await.unwrap().unwrap();
    }

    #[test_log::test(tokio::test)]
    async fn no_events_fire_after_shutdown_begins() {
        let (browse_tx, browse_rx) = kanal::unbounded_async();
        let (tx, rx) = kanal::unbounded_async();
        let token = CancellationToken::new();

        let handler = tokio::spawn(client_peer_loop(browse_rx, tx, token.clone()));

        browse_tx
            .send(BrowseEvent::Snapshot(vec![peer_record("10.0.0.7")]))
            .await
            .unwrap();
        recv(&rx).await;

        token.cancel();
        browse_tx
            .send(BrowseEvent::Snapshot(vec![peer_record("10.0.0.8")]))
            .await
            .unwrap();

        handler.await.unwrap().unwrap();
        assert!(rx.is_empty());
    }
}
