//! Kademlia building blocks
//!
//! 160-bit identifiers under the XOR metric, contacts, k-buckets and the
//! per-node routing state, plus the reference request handlers.

pub mod bucket;
pub mod contact;
pub mod handlers;
pub mod identifier;
pub mod node;

pub use bucket::{Bucket, InsertOutcome, K};
pub use contact::Contact;
pub use handlers::{default_handlers, ContactObserver, LivenessProbe, TcpProbe};
pub use identifier::{Identifier, LENGTH};
pub use node::Node;
