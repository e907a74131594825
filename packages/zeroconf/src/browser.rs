//! mDNS browsing for peer advertisements of a single service type.
//!
//! The browser tracks the complete set of currently known records for the
//! subscribed type and emits the whole set on every change. Consumers treat
//! each emission as authoritative; no deltas are produced here.

use mdns_sd::{ServiceDaemon, ServiceEvent};
use thiserror::Error;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

/// A peer advertisement currently visible on the network. Identity is the
/// `(service_name, service_type)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    pub service_name: String,
    pub service_type: String,
    /// Resolved mDNS host target; empty until the record resolves.
    pub host_target: String,
}

#[derive(Debug, Clone)]
pub enum BrowseEvent {
    /// The complete current set of records for the browsed type.
    Snapshot(Vec<ServiceRecord>),
    /// Transport-level browse failure, passed through verbatim. Emitted at
    /// most once; the subscription is dead afterwards.
    Error(String),
}

#[derive(Debug, Error)]
pub enum BrowseError {
    #[error(transparent)]
    Send(#[from] kanal::SendError),
    #[error(transparent)]
    Join(#[from] JoinError),
}

/// Strips the service type (and separating dot) from an mDNS fullname.
/// Instance names can themselves contain dots (servers advertise IP
/// addresses), so the type is matched as a suffix, never split on.
fn instance_name<'a>(fullname: &'a str, service_type: &str) -> &'a str {
    fullname
        .strip_suffix(service_type)
        .map_or(fullname, |x| x.strip_suffix('.').unwrap_or(x))
}

#[derive(Debug, Default)]
pub(crate) struct RecordSet {
    records: Vec<ServiceRecord>,
}

impl RecordSet {
    /// Inserts an unresolved record. Returns whether the set changed.
    pub fn found(&mut self, service_name: &str, service_type: &str) -> bool {
        if self.position(service_name, service_type).is_some() {
            return false;
        }
        self.records.push(ServiceRecord {
            service_name: service_name.to_string(),
            service_type: service_type.to_string(),
            host_target: String::new(),
        });
        true
    }

    /// Inserts or fills in a resolved record. Returns whether the set changed.
    pub fn resolved(&mut self, record: ServiceRecord) -> bool {
        if let Some(i) = self.position(&record.service_name, &record.service_type) {
            if self.records[i] == record {
                false
            } else {
                self.records[i] = record;
                true
            }
        } else {
            self.records.push(record);
            true
        }
    }

    /// Removes a record by identity. Returns whether the set changed.
    pub fn removed(&mut self, service_name: &str, service_type: &str) -> bool {
        self.position(service_name, service_type)
            .map(|i| self.records.remove(i))
            .is_some()
    }

    /// The complete current set, in insertion order.
    pub fn snapshot(&self) -> Vec<ServiceRecord> {
        self.records.clone()
    }

    fn position(&self, service_name: &str, service_type: &str) -> Option<usize> {
        self.records
            .iter()
            .position(|x| x.service_name == service_name && x.service_type == service_type)
    }
}

pub struct ServiceBrowser {
    token: CancellationToken,
    handle: Option<JoinHandle<Result<(), BrowseError>>>,
    sender: kanal::AsyncSender<BrowseEvent>,
}

impl ServiceBrowser {
    #[must_use]
    pub fn new(sender: kanal::AsyncSender<BrowseEvent>) -> Self {
        Self {
            token: CancellationToken::new(),
            handle: None,
            sender,
        }
    }

    /// Starts browsing for `service_type`. Exactly one browse per instance
    /// lifetime; transport failures surface as a [`BrowseEvent::Error`] on
    /// the channel, not as a return value.
    pub fn browse(&mut self, service_type: &str) {
        let sender = self.sender.clone();
        let token = self.token.clone();
        let service_type = service_type.to_string();

        self.handle.replace(tokio::spawn(async move {
            let mdns = match ServiceDaemon::new() {
                Ok(mdns) => mdns,
                Err(e) => {
                    log::warn!("browse: Failed to create mdns daemon: {e:?}");
                    sender.send(BrowseEvent::Error(e.to_string())).await?;
                    return Ok(());
                }
            };

            let receiver = match mdns.browse(&service_type) {
                Ok(receiver) => receiver,
                Err(e) => {
                    log::warn!("browse: Failed to browse for {service_type}: {e:?}");
                    sender.send(BrowseEvent::Error(e.to_string())).await?;
                    return Ok(());
                }
            };

            log::debug!("browse: Browsing for {service_type} services...");

            let mut records = RecordSet::default();

            while let Ok(Some(event)) = {
                tokio::select! {
                    biased;
                    () = token.cancelled() => Ok(None),
                    event = receiver.recv_async() => event.map(Some),
                }
            } {
                let changed = match event {
                    ServiceEvent::ServiceFound(ty, fullname) => {
                        log::debug!("browse: Found service instance: {fullname}");
                        records.found(instance_name(&fullname, &ty), &ty)
                    }
                    ServiceEvent::ServiceResolved(info) => {
                        log::debug!("browse: Resolved service instance: {}", info.get_fullname());
                        records.resolved(ServiceRecord {
                            service_name: instance_name(info.get_fullname(), &service_type)
                                .to_string(),
                            service_type: service_type.clone(),
                            host_target: info.get_hostname().to_string(),
                        })
                    }
                    ServiceEvent::ServiceRemoved(ty, fullname) => {
                        log::debug!("browse: Removed service instance: {fullname}");
                        records.removed(instance_name(&fullname, &ty), &ty)
                    }
                    event => {
                        log::trace!("browse: Ignoring event: {event:?}");
                        false
                    }
                };

                if changed {
                    sender.send(BrowseEvent::Snapshot(records.snapshot())).await?;
                }
            }

            Ok(())
        }));
    }

    /// Cancels the browse subscription and waits for it to wind down. No
    /// emission happens after this returns.
    ///
    /// # Errors
    ///
    /// * If the browse task failed to join
    /// * If the browse task failed to send an event
    pub async fn shutdown(mut self) -> Result<(), BrowseError> {
        log::debug!("browse: Shutting down browser");
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            handle.await??;
        }
        Ok(())
    }
}

impl Drop for ServiceBrowser {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
