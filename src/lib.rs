//! Mini DHT Node Server
//!
//! Hosts any number of Kademlia nodes behind one TCP endpoint. Each inbound
//! connection carries a single request addressed to a hosted node; the server
//! routes it to the handler registered for its kind and writes back one
//! response or error envelope.

pub mod core;
pub mod network;
pub mod utils;

// Re-export main types
pub use core::{
    ErrorEnvelope, OverloadPolicy, Request, RequestHandler, RequestKind, Response, Server,
    ServerConfig, ServerState,
};
pub use network::dht::{Contact, Identifier, Node};
pub use network::Client;
pub use utils::{
    error::{DhtError, HandlerError, Result},
    setup_logging,
};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
