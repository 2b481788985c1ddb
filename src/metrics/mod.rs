// Private module declaration
mod server;

use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry};

// Re-export for public API
pub use server::start_metrics_server;

// ============================================================================
// Metrics Module - Prometheus metrics for the order core
// ============================================================================
//
// - commands handled, by command and outcome
// - command failures, by command and error kind
// - command latency
// - orders placed per entry point, units reserved by those orders
// - status transitions, by target status
//
// All metrics are registered with one registry and scraped via /metrics
// ============================================================================

pub struct Metrics {
    registry: Registry,

    // Command Metrics
    pub commands_total: IntCounterVec,
    pub command_failures: IntCounterVec,
    pub command_duration: HistogramVec,

    // Order Metrics
    pub orders_placed: IntCounterVec,
    pub units_reserved: IntCounter,
    pub status_transitions: IntCounterVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        // Command Metrics
        let commands_total = IntCounterVec::new(
            Opts::new("order_commands_total", "Total order commands handled"),
            &["command", "outcome"],
        )?;
        registry.register(Box::new(commands_total.clone()))?;

        let command_failures = IntCounterVec::new(
            Opts::new("order_command_failures_total", "Order commands rejected or failed"),
            &["command", "reason"],
        )?;
        registry.register(Box::new(command_failures.clone()))?;

        let command_duration = HistogramVec::new(
            HistogramOpts::new("order_command_duration_seconds", "Order command duration")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["command"],
        )?;
        registry.register(Box::new(command_duration.clone()))?;

        // Order Metrics
        let orders_placed = IntCounterVec::new(
            Opts::new("orders_placed_total", "Orders created by checkout"),
            &["entry_point"],
        )?;
        registry.register(Box::new(orders_placed.clone()))?;

        let units_reserved = IntCounter::new(
            "order_units_reserved_total",
            "Stock units reserved by placed orders",
        )?;
        registry.register(Box::new(units_reserved.clone()))?;

        let status_transitions = IntCounterVec::new(
            Opts::new("order_status_transitions_total", "Order status changes"),
            &["status"],
        )?;
        registry.register(Box::new(status_transitions.clone()))?;

        Ok(Self {
            registry,
            commands_total,
            command_failures,
            command_duration,
            orders_placed,
            units_reserved,
            status_transitions,
        })
    }

    /// Get the Prometheus registry for exposing metrics via HTTP
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Helper to record a handled command
    pub fn record_command(&self, command: &str, duration_secs: f64, failure: Option<&str>) {
        match failure {
            None => {
                self.commands_total.with_label_values(&[command, "ok"]).inc();
            }
            Some(reason) => {
                self.commands_total.with_label_values(&[command, "error"]).inc();
                self.command_failures.with_label_values(&[command, reason]).inc();
            }
        }
        self.command_duration.with_label_values(&[command]).observe(duration_secs);
    }

    /// Helper to record a newly placed order
    pub fn record_order_placed(&self, entry_point: &str, units: u64) {
        self.orders_placed.with_label_values(&[entry_point]).inc();
        self.units_reserved.inc_by(units);
    }

    pub fn record_status_transition(&self, status: &str) {
        self.status_transitions.with_label_values(&[status]).inc();
    }
}
