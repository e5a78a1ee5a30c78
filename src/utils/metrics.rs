use log::info;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct ServerMetrics {
    pub connections_accepted: u64,
    pub connections_rejected: u64,
    /// Connections that had to wait for a worker slot.
    pub connections_delayed: u64,
    pub requests_handled: u64,
    pub application_errors: u64,
    pub addressing_errors: u64,
    pub dispatch_errors: u64,
    pub protocol_errors: u64,
    pub transport_errors: u64,
    /// Handlers that panicked or otherwise never returned.
    pub internal_errors: u64,
    pub uptime: Duration,
    pub start_time: Instant,
}

impl Default for ServerMetrics {
    fn default() -> Self {
        Self {
            connections_accepted: 0,
            connections_rejected: 0,
            connections_delayed: 0,
            requests_handled: 0,
            application_errors: 0,
            addressing_errors: 0,
            dispatch_errors: 0,
            protocol_errors: 0,
            transport_errors: 0,
            internal_errors: 0,
            uptime: Duration::new(0, 0),
            start_time: Instant::now(),
        }
    }
}

/// Shared counters updated by the accept loop and workers.
#[derive(Clone, Default)]
pub struct MetricsCollector {
    metrics: Arc<RwLock<ServerMetrics>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_connection_accepted(&self) {
        self.metrics.write().connections_accepted += 1;
    }

    pub fn record_connection_rejected(&self) {
        self.metrics.write().connections_rejected += 1;
    }

    pub fn record_connection_delayed(&self) {
        self.metrics.write().connections_delayed += 1;
    }

    pub fn record_request_handled(&self) {
        self.metrics.write().requests_handled += 1;
    }

    pub fn record_application_error(&self) {
        self.metrics.write().application_errors += 1;
    }

    pub fn record_addressing_error(&self) {
        self.metrics.write().addressing_errors += 1;
    }

    pub fn record_dispatch_error(&self) {
        self.metrics.write().dispatch_errors += 1;
    }

    pub fn record_protocol_error(&self) {
        self.metrics.write().protocol_errors += 1;
    }

    pub fn record_transport_error(&self) {
        self.metrics.write().transport_errors += 1;
    }

    pub fn record_internal_error(&self) {
        self.metrics.write().internal_errors += 1;
    }

    pub fn get_metrics(&self) -> ServerMetrics {
        let mut metrics = self.metrics.read().clone();
        metrics.uptime = metrics.start_time.elapsed();
        metrics
    }

    pub fn log_stats(&self) {
        let metrics = self.get_metrics();

        info!(
            "Server stats after {:.2?}: {} accepted, {} delayed, {} rejected, {} handled",
            metrics.uptime,
            metrics.connections_accepted,
            metrics.connections_delayed,
            metrics.connections_rejected,
            metrics.requests_handled
        );
        info!(
            "Failures: {} application, {} internal, {} addressing, {} dispatch, {} protocol, {} transport",
            metrics.application_errors,
            metrics.internal_errors,
            metrics.addressing_errors,
            metrics.dispatch_errors,
            metrics.protocol_errors,
            metrics.transport_errors
        );
    }
}
