//! Reference handlers for the four standard request kinds.
//!
//! Every handler records the request origin (when present) in the target
//! node's routing table. A full bucket is maintained the Kademlia way: the
//! least-recently-seen contact is probed and only evicted if it does not
//! answer.

use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;

use crate::core::handler::RequestHandler;
use crate::core::protocol::{Request, RequestBody, RequestKind, Response};
use crate::network::client::Client;
use crate::utils::HandlerError;

use super::bucket::{InsertOutcome, K};
use super::contact::Contact;
use super::node::Node;

/// Decides whether a contact is still reachable.
pub trait LivenessProbe: Send + Sync {
    fn is_alive(&self, contact: &Contact) -> bool;
}

/// Probes by sending a ping over the network.
pub struct TcpProbe {
    client: Client,
}

impl TcpProbe {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: Client::new(timeout),
        }
    }
}

impl Default for TcpProbe {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

impl LivenessProbe for TcpProbe {
    fn is_alive(&self, contact: &Contact) -> bool {
        let ping = self.client.ping(contact);

        // Handlers run on the server's blocking pool, where the runtime
        // handle is available; outside of it a throwaway runtime is used.
        let result = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle.block_on(ping),
            Err(_) => match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime.block_on(ping),
                Err(e) => {
                    warn!("Could not build runtime to probe {}: {}", contact, e);
                    return false;
                }
            },
        };

        match result {
            Ok(id) => id == contact.id,
            Err(e) => {
                debug!("Probe of {} failed: {}", contact, e);
                false
            }
        }
    }
}

/// Feeds request origins into routing tables.
#[derive(Clone)]
pub struct ContactObserver {
    probe: Arc<dyn LivenessProbe>,
}

impl ContactObserver {
    pub fn new(probe: Arc<dyn LivenessProbe>) -> Self {
        Self { probe }
    }

    pub fn observe(&self, node: &Node, contact: &Contact) {
        if &contact.id == node.id() {
            return;
        }

        let bucket = node.bucket_for(&contact.id);
        match bucket.insert(contact.clone()) {
            InsertOutcome::Inserted => {
                debug!("Node {} learned {} (bucket {})", node.id(), contact, bucket.index());
            }
            InsertOutcome::Refreshed => {}
            InsertOutcome::Full {
                least_recently_seen,
            } => {
                if self.probe.is_alive(&least_recently_seen) {
                    bucket.insert(least_recently_seen);
                    debug!("Bucket {} full, keeping live contacts over {}", bucket.index(), contact);
                } else if bucket.replace_least_recently_seen(&least_recently_seen, contact.clone())
                {
                    debug!(
                        "Evicted unresponsive {} from bucket {} in favour of {}",
                        least_recently_seen,
                        bucket.index(),
                        contact
                    );
                }
            }
        }
    }

    fn observe_origin(&self, node: &Node, request: &Request) {
        if let Some(origin) = &request.origin {
            self.observe(node, origin);
        }
    }
}

fn unexpected(kind: RequestKind, request: &Request) -> HandlerError {
    HandlerError::new(format!(
        "{} handler cannot serve {} requests",
        kind,
        request.kind()
    ))
}

pub struct PingHandler {
    observer: ContactObserver,
}

impl RequestHandler for PingHandler {
    fn handle(&self, node: &Node, request: &Request) -> Result<Response, HandlerError> {
        if request.kind() != RequestKind::Ping {
            return Err(unexpected(RequestKind::Ping, request));
        }
        self.observer.observe_origin(node, request);
        Ok(Response::Pong { id: *node.id() })
    }
}

pub struct StoreHandler {
    observer: ContactObserver,
}

impl RequestHandler for StoreHandler {
    fn handle(&self, node: &Node, request: &Request) -> Result<Response, HandlerError> {
        let RequestBody::Store { key, value } = &request.body else {
            return Err(unexpected(RequestKind::Store, request));
        };
        self.observer.observe_origin(node, request);

        node.store_value(*key, value.clone());
        debug!("Node {} stored {} bytes under {}", node.id(), value.len(), key);
        Ok(Response::Stored { key: *key })
    }
}

pub struct FindNodeHandler {
    observer: ContactObserver,
}

impl RequestHandler for FindNodeHandler {
    fn handle(&self, node: &Node, request: &Request) -> Result<Response, HandlerError> {
        let RequestBody::FindNode { target } = &request.body else {
            return Err(unexpected(RequestKind::FindNode, request));
        };
        self.observer.observe_origin(node, request);

        Ok(Response::Nodes {
            contacts: node.closest_contacts(target, K),
        })
    }
}

pub struct FindValueHandler {
    observer: ContactObserver,
}

impl RequestHandler for FindValueHandler {
    fn handle(&self, node: &Node, request: &Request) -> Result<Response, HandlerError> {
        let RequestBody::FindValue { key } = &request.body else {
            return Err(unexpected(RequestKind::FindValue, request));
        };
        self.observer.observe_origin(node, request);

        match node.value(key) {
            Some(value) => Ok(Response::Value { key: *key, value }),
            None => Ok(Response::Nodes {
                contacts: node.closest_contacts(key, K),
            }),
        }
    }
}

/// One handler per request kind, all sharing `probe`.
pub fn default_handlers(
    probe: Arc<dyn LivenessProbe>,
) -> Vec<(RequestKind, Arc<dyn RequestHandler>)> {
    let observer = ContactObserver::new(probe);
    vec![
        (
            RequestKind::Ping,
            Arc::new(PingHandler {
                observer: observer.clone(),
            }) as Arc<dyn RequestHandler>,
        ),
        (
            RequestKind::Store,
            Arc::new(StoreHandler {
                observer: observer.clone(),
            }),
        ),
        (
            RequestKind::FindNode,
            Arc::new(FindNodeHandler {
                observer: observer.clone(),
            }),
        ),
        (RequestKind::FindValue, Arc::new(FindValueHandler { observer })),
    ]
}
