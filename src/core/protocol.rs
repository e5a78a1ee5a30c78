use serde::{Deserialize, Serialize};
use std::fmt;

use crate::network::dht::{Contact, Identifier};
use crate::utils::HandlerError;

/// Version written into every frame; frames carrying another version are
/// refused before their body is decoded.
pub const PROTOCOL_VERSION: u16 = 1;

/// Dispatch key: one variant per request type a handler can be registered for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Ping,
    Store,
    FindNode,
    FindValue,
}

impl RequestKind {
    pub const ALL: [RequestKind; 4] = [
        RequestKind::Ping,
        RequestKind::Store,
        RequestKind::FindNode,
        RequestKind::FindValue,
    ];
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestKind::Ping => "ping",
            RequestKind::Store => "store",
            RequestKind::FindNode => "find_node",
            RequestKind::FindValue => "find_value",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RequestBody {
    /// Check if a node is alive
    Ping,

    /// Ask the node to keep a value under `key`
    Store { key: Identifier, value: Vec<u8> },

    /// Find the closest contacts to a target ID
    FindNode { target: Identifier },

    /// Find a value, or the closest contacts when it is not held
    FindValue { key: Identifier },
}

/// One request, addressed to a node hosted by the receiving server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Request {
    /// The hosted node this request is for
    pub destination: Contact,
    /// The requesting peer, when it takes part in the DHT itself
    #[serde(default)]
    pub origin: Option<Contact>,
    pub body: RequestBody,
}

impl Request {
    pub fn new(destination: Contact, body: RequestBody) -> Self {
        Self {
            destination,
            origin: None,
            body,
        }
    }

    pub fn ping(destination: Contact) -> Self {
        Self::new(destination, RequestBody::Ping)
    }

    pub fn store(destination: Contact, key: Identifier, value: Vec<u8>) -> Self {
        Self::new(destination, RequestBody::Store { key, value })
    }

    pub fn find_node(destination: Contact, target: Identifier) -> Self {
        Self::new(destination, RequestBody::FindNode { target })
    }

    pub fn find_value(destination: Contact, key: Identifier) -> Self {
        Self::new(destination, RequestBody::FindValue { key })
    }

    pub fn with_origin(mut self, origin: Contact) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn kind(&self) -> RequestKind {
        match self.body {
            RequestBody::Ping => RequestKind::Ping,
            RequestBody::Store { .. } => RequestKind::Store,
            RequestBody::FindNode { .. } => RequestKind::FindNode,
            RequestBody::FindValue { .. } => RequestKind::FindValue,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Response {
    /// Ping acknowledgement from the addressed node
    Pong { id: Identifier },

    Stored { key: Identifier },

    /// Closest known contacts
    Nodes { contacts: Vec<Contact> },

    Value { key: Identifier, value: Vec<u8> },
}

/// Error reply. Carries a human-readable message and nothing else.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorEnvelope {
    pub message: String,
}

impl ErrorEnvelope {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<&HandlerError> for ErrorEnvelope {
    fn from(err: &HandlerError) -> Self {
        Self::new(err.message())
    }
}

/// Everything that can travel inside a frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WireMessage {
    Request(Request),
    Response(Response),
    Error(ErrorEnvelope),
}

impl WireMessage {
    pub fn describe(&self) -> &'static str {
        match self {
            WireMessage::Request(_) => "request",
            WireMessage::Response(_) => "response",
            WireMessage::Error(_) => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn destination() -> Contact {
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        Contact::from_socket_addr(Identifier::from(7u64), addr)
    }

    #[test]
    fn test_request_kind() {
        let dest = destination();
        assert_eq!(Request::ping(dest.clone()).kind(), RequestKind::Ping);
        assert_eq!(
            Request::store(dest.clone(), Identifier::zero(), vec![1]).kind(),
            RequestKind::Store
        );
        assert_eq!(
            Request::find_node(dest.clone(), Identifier::zero()).kind(),
            RequestKind::FindNode
        );
        assert_eq!(
            Request::find_value(dest, Identifier::zero()).kind(),
            RequestKind::FindValue
        );
    }

    #[test]
    fn test_message_serialization() {
        let request = Request::store(destination(), Identifier::from_key("k"), b"v".to_vec())
            .with_origin(destination());
        let message = WireMessage::Request(request.clone());

        let serialized = serde_json::to_vec(&message).unwrap();
        let deserialized: WireMessage = serde_json::from_slice(&serialized).unwrap();

        assert_eq!(deserialized, WireMessage::Request(request));
    }

    #[test]
    fn test_origin_is_optional_on_the_wire() {
        let json = format!(
            r#"{{"request":{{"destination":{},"body":{{"kind":"ping"}}}}}}"#,
            serde_json::to_string(&destination()).unwrap()
        );
        let message: WireMessage = serde_json::from_str(&json).unwrap();
        match message {
            WireMessage::Request(request) => {
                assert!(request.origin.is_none());
                assert_eq!(request.kind(), RequestKind::Ping);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let json = format!(
            r#"{{"request":{{"destination":{},"body":{{"kind":"teleport"}}}}}}"#,
            serde_json::to_string(&destination()).unwrap()
        );
        assert!(serde_json::from_str::<WireMessage>(&json).is_err());
    }

    #[test]
    fn test_error_envelope_from_handler_error() {
        let err = HandlerError::with_source(
            "value not found",
            std::io::Error::new(std::io::ErrorKind::NotFound, "internal detail"),
        );
        let envelope = ErrorEnvelope::from(&err);
        assert_eq!(envelope.message, "value not found");

        let json = serde_json::to_string(&WireMessage::Error(envelope)).unwrap();
        assert!(!json.contains("internal detail"));
    }
}
