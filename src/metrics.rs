//! Fire-and-forget extraction metrics.
//!
//! Every processed document is reported to an external observability
//! collaborator. Reporting happens over an unbounded channel to a collector
//! task so the request path never awaits delivery; failures to deliver are
//! logged and never retried.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::provider::ProviderId;

/// One extraction outcome, successful or not.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionMetric {
    pub document_id: String,
    /// Execution method ("cascade", "race", "race-fallback").
    pub method: String,
    /// Provider that produced the final text, if any succeeded.
    pub provider: Option<ProviderId>,
    pub confidence: f32,
    pub processing_time_ms: u64,
    /// One entry per failed attempt, annotated with the provider.
    pub errors: Vec<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Destination for metrics records.
pub trait MetricsSink: Send + Sync {
    fn deliver(&self, metric: &ExtractionMetric) -> anyhow::Result<()>;
}

/// Default sink: structured log lines.
pub struct LogSink;

impl MetricsSink for LogSink {
    fn deliver(&self, metric: &ExtractionMetric) -> anyhow::Result<()> {
        info!(
            document_id = %metric.document_id,
            method = %metric.method,
            provider = ?metric.provider,
            confidence = metric.confidence,
            processing_time_ms = metric.processing_time_ms,
            errors = metric.errors.len(),
            "extraction metric"
        );
        Ok(())
    }
}

/// Clonable handle used by the execution engine to report metrics.
#[derive(Clone)]
pub struct MetricsHandle {
    tx: mpsc::UnboundedSender<ExtractionMetric>,
}

impl MetricsHandle {
    /// Report a metric. Never blocks and never fails the caller; a closed
    /// collector is logged at debug level and the record is dropped.
    pub fn record(&self, metric: ExtractionMetric) {
        if self.tx.send(metric).is_err() {
            debug!("Metrics collector gone, dropping record");
        }
    }

    /// A handle whose records go nowhere; for tests and one-shot tools.
    pub fn disconnected() -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self { tx }
    }
}

/// Spawn the collector task draining records into the sink.
pub fn spawn_collector(sink: Arc<dyn MetricsSink>) -> (MetricsHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<ExtractionMetric>();

    let handle = tokio::spawn(async move {
        while let Some(metric) = rx.recv().await {
            if let Err(e) = sink.deliver(&metric) {
                warn!("Failed to deliver metric for {}: {}", metric.document_id, e);
            }
        }
    });

    (MetricsHandle { tx }, handle)
}
