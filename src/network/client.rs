use log::debug;
use std::net::SocketAddr;
use tokio::io::AsyncWriteExt;
use tokio::time::{timeout, Duration};

use crate::core::protocol::{Request, Response, WireMessage};
use crate::network::dht::{Contact, Identifier};
use crate::network::transport::{Transport, DEFAULT_MAX_FRAME_SIZE};
use crate::utils::{DhtError, Result};

const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Sends one request per connection, mirroring what the server expects.
#[derive(Debug, Clone)]
pub struct Client {
    timeout: Duration,
}

impl Default for Client {
    fn default() -> Self {
        Self::new(DEFAULT_CLIENT_TIMEOUT)
    }
}

impl Client {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Send `request` to `addr` and wait for the reply.
    ///
    /// An error envelope from the server becomes [`DhtError::Remote`].
    pub async fn send(&self, addr: SocketAddr, request: Request) -> Result<Response> {
        timeout(self.timeout, self.exchange(addr, request)).await?
    }

    /// Send `request` to the address of its destination contact.
    pub async fn send_to_destination(&self, request: Request) -> Result<Response> {
        let addr = request.destination.socket_addr();
        self.send(addr, request).await
    }

    /// Ping `contact` and return the identifier that answered.
    pub async fn ping(&self, contact: &Contact) -> Result<Identifier> {
        match self.send_to_destination(Request::ping(contact.clone())).await? {
            Response::Pong { id } => Ok(id),
            other => Err(DhtError::InvalidResponse(format!(
                "expected pong, got {:?}",
                other
            ))),
        }
    }

    async fn exchange(&self, addr: SocketAddr, request: Request) -> Result<Response> {
        let mut stream = Transport::connect(addr).await?;
        debug!("Sending {} request to {}", request.kind(), addr);

        Transport::write_message(&mut stream, &WireMessage::Request(request)).await?;
        let reply = Transport::read_message(&mut stream, DEFAULT_MAX_FRAME_SIZE).await;
        let _ = stream.shutdown().await;

        match reply? {
            WireMessage::Response(response) => Ok(response),
            WireMessage::Error(envelope) => Err(DhtError::Remote(envelope.message)),
            WireMessage::Request(_) => Err(DhtError::InvalidResponse(
                "server answered with a request".to_string(),
            )),
        }
    }
}
