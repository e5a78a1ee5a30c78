use crate::core::protocol::{Request, Response};
use crate::network::dht::Node;
use crate::utils::HandlerError;

/// Behaviour for one request kind.
///
/// Handlers are called from the server's blocking pool and may block, for
/// example on further network calls.
pub trait RequestHandler: Send + Sync {
    fn handle(&self, node: &Node, request: &Request) -> Result<Response, HandlerError>;
}

impl<F> RequestHandler for F
where
    F: Fn(&Node, &Request) -> Result<Response, HandlerError> + Send + Sync,
{
    fn handle(&self, node: &Node, request: &Request) -> Result<Response, HandlerError> {
        self(node, request)
    }
}
