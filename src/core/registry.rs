use log::debug;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::core::handler::RequestHandler;
use crate::core::protocol::RequestKind;
use crate::network::dht::{Identifier, Node};

/// Request kind → handler map shared between the server and its workers.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Arc<RwLock<HashMap<RequestKind, Arc<dyn RequestHandler>>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `kind`, returning the handler it replaced.
    pub fn insert(
        &self,
        kind: RequestKind,
        handler: Arc<dyn RequestHandler>,
    ) -> Option<Arc<dyn RequestHandler>> {
        debug!("Registering handler for {} requests", kind);
        self.handlers.write().insert(kind, handler)
    }

    pub fn remove(&self, kind: RequestKind) -> Option<Arc<dyn RequestHandler>> {
        debug!("Removing handler for {} requests", kind);
        self.handlers.write().remove(&kind)
    }

    pub fn get(&self, kind: RequestKind) -> Option<Arc<dyn RequestHandler>> {
        self.handlers.read().get(&kind).cloned()
    }

    pub fn kinds(&self) -> Vec<RequestKind> {
        self.handlers.read().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }
}

/// Identifier → hosted node map shared between the server and its workers.
#[derive(Clone, Default)]
pub struct NodeRegistry {
    nodes: Arc<RwLock<HashMap<Identifier, Arc<Node>>>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Host `node` under its own identifier, returning the node it replaced.
    pub fn insert(&self, node: Arc<Node>) -> Option<Arc<Node>> {
        debug!("Hosting node {}", node.id());
        self.nodes.write().insert(*node.id(), node)
    }

    pub fn remove(&self, id: &Identifier) -> Option<Arc<Node>> {
        debug!("Removing hosted node {}", id);
        self.nodes.write().remove(id)
    }

    pub fn get(&self, id: &Identifier) -> Option<Arc<Node>> {
        self.nodes.read().get(id).cloned()
    }

    pub fn nodes(&self) -> Vec<Arc<Node>> {
        self.nodes.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::{Request, Response};
    use crate::utils::HandlerError;

    fn pong(node: &Node, _request: &Request) -> Result<Response, HandlerError> {
        Ok(Response::Pong { id: *node.id() })
    }

    fn fail(_node: &Node, _request: &Request) -> Result<Response, HandlerError> {
        Err(HandlerError::new("nope"))
    }

    #[test]
    fn test_handler_overwrite_keeps_single_kind() {
        let registry = HandlerRegistry::new();
        assert!(registry.insert(RequestKind::Ping, Arc::new(pong)).is_none());
        assert!(registry.insert(RequestKind::Ping, Arc::new(fail)).is_some());

        assert_eq!(registry.kinds(), vec![RequestKind::Ping]);
        assert_eq!(registry.len(), 1);

        // The second registration won
        let node = Node::random();
        let destination = crate::network::dht::Contact::new(
            *node.id(),
            "127.0.0.1".parse().unwrap(),
            1,
        );
        let handler = registry.get(RequestKind::Ping).unwrap();
        assert!(handler.handle(&node, &Request::ping(destination)).is_err());
    }

    #[test]
    fn test_handler_remove() {
        let registry = HandlerRegistry::new();
        registry.insert(RequestKind::Store, Arc::new(pong));

        assert!(registry.remove(RequestKind::Store).is_some());
        assert!(registry.remove(RequestKind::Store).is_none());
        assert!(registry.get(RequestKind::Store).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_node_round_trip() {
        let registry = NodeRegistry::new();
        let node = Arc::new(Node::random());
        let id = *node.id();

        registry.insert(node.clone());
        let found = registry.get(&id).unwrap();
        assert!(Arc::ptr_eq(&found, &node));

        registry.remove(&id);
        assert!(registry.get(&id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_node_overwrite() {
        let registry = NodeRegistry::new();
        let id = Identifier::from(42u64);
        let first = Arc::new(Node::new(id));
        let second = Arc::new(Node::new(id));

        registry.insert(first.clone());
        let replaced = registry.insert(second.clone()).unwrap();

        assert!(Arc::ptr_eq(&replaced, &first));
        assert_eq!(registry.len(), 1);
        assert!(Arc::ptr_eq(&registry.nodes()[0], &second));
    }
}
