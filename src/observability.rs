// Observability Infrastructure - structured logging and lightweight
// metrics. Everything writes to stderr: stdout belongs to the JSON-RPC
// transport and the core must never print to it.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

// Global atomic counters. Release-on-store is all the ordering these need.
static QUERY_COUNTER: AtomicU64 = AtomicU64::new(0);
static EVALUATION_COUNTER: AtomicU64 = AtomicU64::new(0);
static ERROR_COUNTER: AtomicU64 = AtomicU64::new(0);
static OVERLOAD_COUNTER: AtomicU64 = AtomicU64::new(0);
static DEADLINE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Initialize logging to stderr. Call once at startup; re-initialisation
/// (tests spin up many contexts) is tolerated.
pub fn init_logging(default_level: &str) -> Result<()> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
    } else {
        EnvFilter::new(format!("govdb={default_level},warn"))
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    match tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
    {
        Ok(()) => {
            info!("govdb observability initialized");
            Ok(())
        }
        // Already initialized, fine in test environments.
        Err(_) => Ok(()),
    }
}

/// Operations recorded against the counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Operation {
    Retrieval {
        result_count: usize,
        elapsed_ms: u64,
    },
    Evaluation {
        assessment: String,
        elapsed_ms: u64,
    },
    IndexBuild {
        item_count: usize,
    },
    IndexLoad {
        item_count: usize,
    },
    AuditAppend {
        audit_id: String,
    },
}

/// Record an operation outcome against the global counters.
pub fn record_operation(op: &Operation, outcome: &Result<(), String>) {
    match op {
        Operation::Retrieval { .. } => QUERY_COUNTER.fetch_add(1, Ordering::Release),
        Operation::Evaluation { .. } => EVALUATION_COUNTER.fetch_add(1, Ordering::Release),
        _ => 0,
    };
    if let Err(reason) = outcome {
        ERROR_COUNTER.fetch_add(1, Ordering::Release);
        if reason.contains("overloaded") {
            OVERLOAD_COUNTER.fetch_add(1, Ordering::Release);
        }
        if reason.contains("deadline") {
            DEADLINE_COUNTER.fetch_add(1, Ordering::Release);
        }
        warn!(?op, reason, "operation failed");
    }
}

/// Point-in-time counter snapshot for `stats` and `ping`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub queries: u64,
    pub evaluations: u64,
    pub errors: u64,
    pub overloads: u64,
    pub deadline_expiries: u64,
}

pub fn metrics_snapshot() -> MetricsSnapshot {
    MetricsSnapshot {
        queries: QUERY_COUNTER.load(Ordering::Acquire),
        evaluations: EVALUATION_COUNTER.load(Ordering::Acquire),
        errors: ERROR_COUNTER.load(Ordering::Acquire),
        overloads: OVERLOAD_COUNTER.load(Ordering::Acquire),
        deadline_expiries: DEADLINE_COUNTER.load(Ordering::Acquire),
    }
}

/// Per-request tracing context.
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub trace_id: Uuid,
    pub operation: &'static str,
    started: Instant,
}

impl OperationContext {
    pub fn new(operation: &'static str) -> Self {
        Self {
            trace_id: Uuid::new_v4(),
            operation,
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed().as_millis() as u64
    }
}
