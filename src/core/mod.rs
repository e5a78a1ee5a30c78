pub mod config;
pub mod handler;
pub mod pool;
pub mod protocol;
pub mod registry;
pub mod server;
mod worker;

pub use config::{OverloadPolicy, ServerConfig};
pub use handler::RequestHandler;
pub use protocol::{
    ErrorEnvelope, Request, RequestBody, RequestKind, Response, WireMessage, PROTOCOL_VERSION,
};
pub use registry::{HandlerRegistry, NodeRegistry};
pub use server::{Server, ServerState};
