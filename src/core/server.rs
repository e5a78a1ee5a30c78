use log::{debug, error, info, warn};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::runtime::Handle;
use tokio::sync::{oneshot, watch};
use tokio::time::sleep;

use crate::core::config::{OverloadPolicy, ServerConfig};
use crate::core::handler::RequestHandler;
use crate::core::pool::{PoolHandle, WorkerPool};
use crate::core::protocol::RequestKind;
use crate::core::registry::{HandlerRegistry, NodeRegistry};
use crate::core::worker::{self, WorkerContext};
use crate::network::dht::handlers::{default_handlers, LivenessProbe, TcpProbe};
use crate::network::dht::{Identifier, Node};
use crate::network::transport::Transport;
use crate::utils::{DhtError, MetricsCollector, Result, ServerMetrics};

static SERVER_COUNTER: AtomicUsize = AtomicUsize::new(0);

const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Created,
    Starting,
    Running,
    ShuttingDown,
    Stopped,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServerState::Created => "created",
            ServerState::Starting => "starting",
            ServerState::Running => "running",
            ServerState::ShuttingDown => "shutting down",
            ServerState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Hosts DHT nodes and serves one request per inbound connection.
///
/// Configure, register nodes and handlers, then [`start`](Server::start).
/// Registries can be changed at any time; configuration only while the
/// server is still in [`ServerState::Created`].
///
/// `start`, `shutdown` and dropping a running server block the calling
/// thread and must not be used from inside an async runtime.
///
/// ```no_run
/// use mini_dht::{Node, Server, ServerConfig};
/// use std::sync::Arc;
///
/// # fn example() -> mini_dht::Result<()> {
/// let mut server = Server::new(ServerConfig::default());
/// server.add_node(Arc::new(Node::random()));
/// server.add_default_handlers();
/// server.start()?;
/// // ...
/// server.shutdown();
/// # Ok(())
/// # }
/// ```
pub struct Server {
    name: String,
    config: ServerConfig,
    state: ServerState,
    handlers: HandlerRegistry,
    nodes: NodeRegistry,
    metrics: MetricsCollector,
    local_addr: Option<SocketAddr>,
    pool: Option<WorkerPool>,
    accept_thread: Option<JoinHandle<()>>,
    shutdown_tx: Option<watch::Sender<bool>>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        let name = format!("dht-server-{}", SERVER_COUNTER.fetch_add(1, Ordering::SeqCst));

        Self {
            name,
            config,
            state: ServerState::Created,
            handlers: HandlerRegistry::new(),
            nodes: NodeRegistry::new(),
            metrics: MetricsCollector::new(),
            local_addr: None,
            pool: None,
            accept_thread: None,
            shutdown_tx: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == ServerState::Running
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Address actually bound, once running (useful with port 0).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn metrics(&self) -> ServerMetrics {
        self.metrics.get_metrics()
    }

    /// Exchanges currently being served.
    pub fn active_workers(&self) -> usize {
        self.pool.as_ref().map_or(0, |pool| pool.handle().active())
    }

    /// Bind the listener and start accepting.
    ///
    /// Returns once the accept loop is live, or with the bind error, in which
    /// case the server ends up stopped.
    pub fn start(&mut self) -> Result<()> {
        if self.state != ServerState::Created {
            return Err(DhtError::InvalidState(format!(
                "Cannot start server {}: it is {}",
                self.name, self.state
            )));
        }
        self.config.validate()?;

        self.state = ServerState::Starting;
        info!(
            "Starting server {} on address {}",
            self.name,
            self.config.socket_addr()
        );

        match self.launch() {
            Ok(local_addr) => {
                self.local_addr = Some(local_addr);
                self.state = ServerState::Running;
                info!("Server {} started on {}, waiting for connections", self.name, local_addr);
                Ok(())
            }
            Err(e) => {
                error!("Could not start server {}: {}", self.name, e);
                self.stop_background();
                self.state = ServerState::Stopped;
                Err(e)
            }
        }
    }

    fn launch(&mut self) -> Result<SocketAddr> {
        let pool = WorkerPool::new(&self.config, &self.name)?;
        let runtime = pool.runtime_handle().clone();
        let pool_handle = pool.handle();
        self.pool = Some(pool);

        let (ready_tx, ready_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.shutdown_tx = Some(shutdown_tx);

        let ctx = Arc::new(WorkerContext {
            handlers: self.handlers.clone(),
            nodes: self.nodes.clone(),
            metrics: self.metrics.clone(),
            max_frame_size: self.config.max_frame_size,
            read_timeout: self.config.read_timeout(),
        });
        let addr = self.config.socket_addr();
        let backlog = self.config.backlog;
        let name = self.name.clone();

        let accept_thread = thread::Builder::new()
            .name(format!("{}-accept", self.name))
            .spawn(move || {
                runtime.block_on(async move {
                    let listener = match Transport::listen(addr, backlog) {
                        Ok(listener) => listener,
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };
                    let local_addr = listener.local_addr().map_err(DhtError::from);
                    let bound = local_addr.is_ok();
                    let _ = ready_tx.send(local_addr);

                    if bound {
                        accept_loop(name, listener, pool_handle, ctx, shutdown_rx).await;
                    }
                })
            })
            .map_err(|e| DhtError::IoError(format!("Failed to spawn accept thread: {}", e)))?;
        self.accept_thread = Some(accept_thread);

        ready_rx.blocking_recv().map_err(|_| {
            DhtError::InvalidState("Accept thread exited before binding".to_string())
        })?
    }

    /// Stop accepting and let in-flight exchanges finish.
    ///
    /// Blocks for at most the drain timeout. Exchanges still running after
    /// that are not cancelled; they complete in the background and the pool
    /// is released after the last one. Does nothing unless the server is
    /// running, so calling it twice is safe.
    pub fn shutdown(&mut self) {
        if self.state != ServerState::Running {
            debug!("Shutdown of server {} ignored: it is {}", self.name, self.state);
            return;
        }

        info!("Shutting down server {}", self.name);
        self.state = ServerState::ShuttingDown;
        self.stop_background();
        self.state = ServerState::Stopped;

        self.metrics.log_stats();
        info!("Server {} successfully shut down", self.name);
    }

    fn stop_background(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }

        if let Some(handle) = self.accept_thread.take() {
            if handle.join().is_err() {
                error!("Accept thread of server {} panicked", self.name);
            }
        }

        if let Some(pool) = self.pool.take() {
            pool.shutdown(self.config.drain_timeout());
        }
    }

    fn ensure_configurable(&self, field: &str) -> Result<()> {
        if self.state != ServerState::Created {
            return Err(DhtError::InvalidState(format!(
                "Cannot change the server {} as the server is {}",
                field, self.state
            )));
        }
        Ok(())
    }

    pub fn set_bind_addr(&mut self, bind_addr: IpAddr) -> Result<()> {
        self.ensure_configurable("bind address")?;
        self.config.bind_addr = bind_addr;
        Ok(())
    }

    pub fn set_port(&mut self, port: u16) -> Result<()> {
        self.ensure_configurable("port")?;
        self.config.port = port;
        Ok(())
    }

    pub fn set_backlog(&mut self, backlog: u32) -> Result<()> {
        self.ensure_configurable("backlog")?;
        self.config.backlog = backlog;
        Ok(())
    }

    pub fn set_min_pool_size(&mut self, min_pool_size: usize) -> Result<()> {
        self.ensure_configurable("minimum pool size")?;
        self.config.min_pool_size = min_pool_size;
        Ok(())
    }

    pub fn set_max_pool_size(&mut self, max_pool_size: usize) -> Result<()> {
        self.ensure_configurable("maximum pool size")?;
        self.config.max_pool_size = max_pool_size;
        Ok(())
    }

    pub fn set_idle_timeout(&mut self, idle_timeout: Duration) -> Result<()> {
        self.ensure_configurable("idle timeout")?;
        self.config.idle_timeout_ms = idle_timeout.as_millis() as u64;
        Ok(())
    }

    pub fn set_overload_policy(&mut self, policy: OverloadPolicy) -> Result<()> {
        self.ensure_configurable("overload policy")?;
        self.config.overload_policy = policy;
        Ok(())
    }

    pub fn set_read_timeout(&mut self, read_timeout: Option<Duration>) -> Result<()> {
        self.ensure_configurable("read timeout")?;
        self.config.read_timeout_ms = read_timeout.map(|t| t.as_millis() as u64);
        Ok(())
    }

    pub fn set_drain_timeout(&mut self, drain_timeout: Duration) -> Result<()> {
        self.ensure_configurable("drain timeout")?;
        self.config.drain_timeout_ms = drain_timeout.as_millis() as u64;
        Ok(())
    }

    pub fn set_max_frame_size(&mut self, max_frame_size: usize) -> Result<()> {
        self.ensure_configurable("maximum frame size")?;
        self.config.max_frame_size = max_frame_size;
        Ok(())
    }

    /// Register `handler` for `kind`, replacing any previous one.
    pub fn add_handler<H>(&self, kind: RequestKind, handler: H) -> Option<Arc<dyn RequestHandler>>
    where
        H: RequestHandler + 'static,
    {
        self.handlers.insert(kind, Arc::new(handler))
    }

    pub fn remove_handler(&self, kind: RequestKind) -> Option<Arc<dyn RequestHandler>> {
        self.handlers.remove(kind)
    }

    pub fn handled_kinds(&self) -> Vec<RequestKind> {
        self.handlers.kinds()
    }

    /// Register the reference ping/store/find-node/find-value handlers,
    /// probing full buckets over TCP.
    pub fn add_default_handlers(&self) {
        self.add_default_handlers_with_probe(Arc::new(TcpProbe::default()));
    }

    pub fn add_default_handlers_with_probe(&self, probe: Arc<dyn LivenessProbe>) {
        for (kind, handler) in default_handlers(probe) {
            self.handlers.insert(kind, handler);
        }
    }

    /// Host `node` under its identifier, returning the node it replaced.
    pub fn add_node(&self, node: Arc<Node>) -> Option<Arc<Node>> {
        self.nodes.insert(node)
    }

    pub fn remove_node(&self, node: &Node) -> Option<Arc<Node>> {
        self.nodes.remove(node.id())
    }

    pub fn node(&self, id: &Identifier) -> Option<Arc<Node>> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> Vec<Arc<Node>> {
        self.nodes.nodes()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if self.state != ServerState::Running {
            return;
        }
        if Handle::try_current().is_err() {
            self.shutdown();
            return;
        }

        // Joining threads or blocking on the pool would panic inside a runtime
        warn!(
            "Server {} dropped inside an async context, shutting down in the background",
            self.name
        );
        self.state = ServerState::ShuttingDown;
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        // The accept loop exits on the signal; its thread is left detached
        drop(self.accept_thread.take());
        if let Some(pool) = self.pool.take() {
            pool.shutdown_in_background(self.config.drain_timeout());
        }
        self.state = ServerState::Stopped;
    }
}

async fn accept_loop(
    name: String,
    listener: TcpListener,
    pool: PoolHandle,
    ctx: Arc<WorkerContext>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown_rx.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    error!("Error while trying to accept new connections on {}: {}", name, e);
                    sleep(ACCEPT_ERROR_BACKOFF).await;
                    continue;
                }
            },
        };

        info!("Incoming connection from {}", peer);
        ctx.metrics.record_connection_accepted();

        let permit = match (pool.try_admit(), pool.policy()) {
            (Some(permit), _) => Some(permit),
            (None, OverloadPolicy::Reject) => None,
            (None, OverloadPolicy::Block) => {
                warn!(
                    "All {} workers busy, connection from {} waits for a free slot",
                    pool.capacity(),
                    peer
                );
                ctx.metrics.record_connection_delayed();
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    permit = pool.wait_for_slot() => permit,
                }
            }
        };

        match permit {
            Some(permit) => {
                debug!(
                    "Submitting connection from {} to the pool (active/capacity: {}/{})",
                    peer,
                    pool.active() + 1,
                    pool.capacity()
                );
                pool.submit(permit, worker::serve(stream, peer, ctx.clone()));
            }
            None => {
                warn!(
                    "Rejecting connection from {}: all {} workers busy ({:?} policy)",
                    peer,
                    pool.capacity(),
                    pool.policy()
                );
                ctx.metrics.record_connection_rejected();
            }
        }
    }

    drop(listener);
    info!("Server {} stopped accepting connections", name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn loopback_config() -> ServerConfig {
        ServerConfig {
            bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            drain_timeout_ms: 1_000,
            ..ServerConfig::default()
        }
    }

    #[test]
    fn test_lifecycle_states() {
        let mut server = Server::new(loopback_config());
        assert_eq!(server.state(), ServerState::Created);
        assert!(!server.is_running());

        server.start().unwrap();
        assert_eq!(server.state(), ServerState::Running);
        assert!(server.is_running());
        assert!(server.local_addr().unwrap().port() > 0);

        server.shutdown();
        assert_eq!(server.state(), ServerState::Stopped);
        assert!(!server.is_running());
    }

    #[test]
    fn test_shutdown_twice_is_safe() {
        let mut server = Server::new(loopback_config());
        server.start().unwrap();

        server.shutdown();
        server.shutdown();
        assert_eq!(server.state(), ServerState::Stopped);
    }

    #[test]
    fn test_shutdown_before_start_is_noop() {
        let mut server = Server::new(loopback_config());
        server.shutdown();
        assert_eq!(server.state(), ServerState::Created);
        assert!(server.set_port(1234).is_ok());
    }

    #[test]
    fn test_config_frozen_after_start() {
        let mut server = Server::new(loopback_config());
        server.start().unwrap();
        let port = server.config().port;

        assert!(matches!(server.set_port(4242), Err(DhtError::InvalidState(_))));
        assert!(matches!(server.set_backlog(1), Err(DhtError::InvalidState(_))));
        assert!(matches!(
            server.set_max_pool_size(2),
            Err(DhtError::InvalidState(_))
        ));
        assert!(matches!(
            server.set_idle_timeout(Duration::from_secs(1)),
            Err(DhtError::InvalidState(_))
        ));
        assert_eq!(server.config().port, port);

        server.shutdown();
        assert!(matches!(server.set_port(4242), Err(DhtError::InvalidState(_))));
    }

    #[test]
    fn test_start_twice_fails() {
        let mut server = Server::new(loopback_config());
        server.start().unwrap();
        assert!(matches!(server.start(), Err(DhtError::InvalidState(_))));
        assert!(server.is_running());
    }

    #[test]
    fn test_bind_failure_is_surfaced() {
        let mut first = Server::new(loopback_config());
        first.start().unwrap();
        let taken = first.local_addr().unwrap();

        // Same address without SO_REUSEPORT: must fail to bind
        let mut second = Server::new(ServerConfig {
            port: taken.port(),
            ..loopback_config()
        });
        let result = second.start();

        assert!(matches!(result, Err(DhtError::NetworkError(_))));
        assert_eq!(second.state(), ServerState::Stopped);
        assert!(second.local_addr().is_none());
    }

    #[test]
    fn test_invalid_config_rejected_at_start() {
        let mut server = Server::new(ServerConfig {
            min_pool_size: 0,
            ..loopback_config()
        });
        assert!(matches!(server.start(), Err(DhtError::ConfigError(_))));
        assert_eq!(server.state(), ServerState::Created);
    }

    #[test]
    fn test_registries_through_server() {
        let server = Server::new(loopback_config());
        let node = Arc::new(Node::random());

        server.add_node(node.clone());
        assert!(server.node(node.id()).is_some());
        assert_eq!(server.nodes().len(), 1);

        server.add_default_handlers();
        server.add_default_handlers();
        assert_eq!(server.handled_kinds().len(), RequestKind::ALL.len());

        assert!(server.remove_node(&node).is_some());
        assert!(server.node(node.id()).is_none());
        assert!(server.remove_handler(RequestKind::Ping).is_some());
        assert_eq!(server.handled_kinds().len(), RequestKind::ALL.len() - 1);
    }

    #[test]
    fn test_drop_inside_runtime_stops_listening() {
        let mut server = Server::new(loopback_config());
        server.start().unwrap();
        let addr = server.local_addr().unwrap();

        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async move {
            drop(server);
        });

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while std::net::TcpStream::connect(addr).is_ok() {
            assert!(std::time::Instant::now() < deadline, "listener still open");
            thread::sleep(Duration::from_millis(20));
        }
    }

    #[test]
    fn test_server_names_are_unique() {
        let a = Server::new(loopback_config());
        let b = Server::new(loopback_config());
        assert_ne!(a.name(), b.name());
        assert!(a.name().starts_with("dht-server-"));
    }
}
