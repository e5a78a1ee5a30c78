use log::{debug, error, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::core::protocol::{ErrorEnvelope, Request, Response, WireMessage};
use crate::core::registry::{HandlerRegistry, NodeRegistry};
use crate::network::transport::Transport;
use crate::utils::{DhtError, MetricsCollector, Result};

/// Everything a worker needs, shared by all of them.
pub struct WorkerContext {
    pub handlers: HandlerRegistry,
    pub nodes: NodeRegistry,
    pub metrics: MetricsCollector,
    pub max_frame_size: usize,
    pub read_timeout: Option<Duration>,
}

/// One connection, one request, one reply.
pub async fn serve(stream: TcpStream, peer: SocketAddr, ctx: Arc<WorkerContext>) {
    let mut exchange = match Exchange::open(stream, peer) {
        Ok(exchange) => exchange,
        Err(e) => {
            error!("Failed to open channels for {}: {}", peer, e);
            ctx.metrics.record_transport_error();
            return;
        }
    };

    if let Err(e) = exchange.run(&ctx).await {
        match e {
            DhtError::SerializationError(_)
            | DhtError::UnsupportedVersion(_)
            | DhtError::MessageTooLarge(_) => {
                warn!("Dropping connection from {}: {}", peer, e);
                ctx.metrics.record_protocol_error();
            }
            _ => {
                error!("Exchange with {} failed: {}", peer, e);
                ctx.metrics.record_transport_error();
            }
        }
    }

    exchange.close().await;
}

struct Exchange {
    peer: SocketAddr,
    input: BufReader<OwnedReadHalf>,
    output: BufWriter<OwnedWriteHalf>,
}

impl Exchange {
    fn open(stream: TcpStream, peer: SocketAddr) -> Result<Self> {
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            peer,
            input: BufReader::new(read_half),
            output: BufWriter::new(write_half),
        })
    }

    async fn run(&mut self, ctx: &WorkerContext) -> Result<()> {
        let read = Transport::read_message(&mut self.input, ctx.max_frame_size);
        let message = match ctx.read_timeout {
            Some(limit) => timeout(limit, read).await??,
            None => read.await?,
        };

        let request = match message {
            WireMessage::Request(request) => request,
            other => {
                warn!(
                    "Ignoring {} message from {}: only requests are served",
                    other.describe(),
                    self.peer
                );
                return Ok(());
            }
        };

        debug!(
            "Received {} request from {} for {}",
            request.kind(),
            self.peer,
            request.destination
        );

        let reply = match dispatch(ctx, request).await {
            Ok(response) => {
                ctx.metrics.record_request_handled();
                debug!("Writing response back to {}: {:?}", self.peer, response);
                WireMessage::Response(response)
            }
            Err(e) => WireMessage::Error(self.report(ctx, e)),
        };

        Transport::write_message(&mut self.output, &reply).await
    }

    /// Log a failed dispatch and build the envelope the peer gets to see.
    fn report(&self, ctx: &WorkerContext, err: DhtError) -> ErrorEnvelope {
        match err {
            DhtError::Handler(e) => {
                warn!(
                    "Handler failed for {}, replying with its message only: {:?}",
                    self.peer, e
                );
                ctx.metrics.record_application_error();
                ErrorEnvelope::from(&e)
            }
            e @ DhtError::NodeNotFound(_) => {
                warn!("Misrouted request from {}: {}", self.peer, e);
                ctx.metrics.record_addressing_error();
                ErrorEnvelope::new(e.to_string())
            }
            e @ DhtError::NoHandler(_) => {
                warn!("Unhandled request from {}: {}", self.peer, e);
                ctx.metrics.record_dispatch_error();
                ErrorEnvelope::new(e.to_string())
            }
            e => {
                error!("Internal failure serving {}: {}", self.peer, e);
                ctx.metrics.record_internal_error();
                ErrorEnvelope::new("internal server error")
            }
        }
    }

    /// Release output channel, input channel and socket. Each step runs
    /// regardless of how the previous one went.
    async fn close(self) {
        let Exchange {
            peer,
            input,
            mut output,
        } = self;

        if let Err(e) = output.shutdown().await {
            debug!("Error while closing the output channel to {}: {}", peer, e);
        }

        match input.into_inner().reunite(output.into_inner()) {
            Ok(stream) => drop(stream),
            Err(e) => error!("Could not reassemble socket for {}: {}", peer, e),
        }

        debug!("Connection with {} closed", peer);
    }
}

async fn dispatch(ctx: &WorkerContext, request: Request) -> Result<Response> {
    let node = ctx
        .nodes
        .get(&request.destination.id)
        .ok_or(DhtError::NodeNotFound(request.destination.id))?;

    let kind = request.kind();
    let handler = ctx.handlers.get(kind).ok_or(DhtError::NoHandler(kind))?;

    let outcome = tokio::task::spawn_blocking(move || handler.handle(&node, &request)).await;

    match outcome {
        Ok(result) => result.map_err(DhtError::from),
        Err(e) => {
            error!("Handler for {} requests did not complete: {}", kind, e);
            Err(DhtError::HandlerAborted(kind))
        }
    }
}
