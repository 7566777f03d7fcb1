//! Render-level timing metrics.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use render_core::{EventKind, FragmentId, FragmentOutcome, RenderEvent, RenderId};
use render_executor::RenderContext;
use serde::{Deserialize, Serialize};

/// Metrics for a single render.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RenderMetrics {
    /// Render ID for correlation.
    pub render_id: String,
    /// Fragments declared anywhere in the tree.
    pub fragments_declared: usize,
    /// Fragments that resolved.
    pub fragments_resolved: usize,
    /// Fragments that failed, raised or were abandoned.
    pub fragments_failed: usize,
    /// Fragments whose deadline elapsed.
    pub fragments_timed_out: usize,
    /// Errors reported, sink errors included.
    pub errors: usize,
    /// Bytes handed to the sink.
    pub bytes_flushed: usize,
    /// Number of flushes that moved bytes.
    pub flushes: usize,
    /// Time to first flushed byte (microseconds).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_to_first_flush_us: Option<u64>,
    /// Time to `end` (microseconds).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_duration_us: Option<u64>,
    /// Per-fragment timings, in settle order.
    pub fragments: Vec<FragmentMetrics>,
}

impl RenderMetrics {
    /// Format as JSON string.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Fragments declared but not settled.
    ///
    /// Settles of fragments declared before the collector attached are not
    /// matched by a declaration, so the count saturates at zero.
    pub fn fragments_pending(&self) -> usize {
        let settled = self.fragments_resolved + self.fragments_failed + self.fragments_timed_out;
        self.fragments_declared.saturating_sub(settled)
    }
}

/// Metrics for one async fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FragmentMetrics {
    /// Fragment ID within the render.
    pub fragment: u64,
    /// Time from declaration to settling (microseconds).
    pub duration_us: u64,
    /// `resolved`, `failed` or `timed_out`.
    pub outcome: String,
}

fn outcome_label(outcome: FragmentOutcome) -> &'static str {
    match outcome {
        FragmentOutcome::Resolved => "resolved",
        FragmentOutcome::Failed => "failed",
        FragmentOutcome::TimedOut => "timed_out",
    }
}

/// Collector for render metrics.
#[derive(Debug)]
pub struct MetricsCollector {
    render_id: RenderId,
    start: Instant,
    first_flush: Option<Instant>,
    end: Option<Instant>,
    declared: HashMap<FragmentId, Instant>,
    metrics: RenderMetrics,
}

impl MetricsCollector {
    /// Create a new metrics collector.
    pub fn new(render_id: RenderId) -> Self {
        Self {
            render_id,
            start: Instant::now(),
            first_flush: None,
            end: None,
            declared: HashMap::new(),
            metrics: RenderMetrics {
                render_id: render_id.to_string(),
                ..Default::default()
            },
        }
    }

    /// Fold one render event into the metrics.
    pub fn record(&mut self, event: &RenderEvent) {
        let now = Instant::now();
        match event {
            RenderEvent::Declared { fragment } => {
                self.metrics.fragments_declared += 1;
                self.declared.insert(*fragment, now);
            }
            RenderEvent::Settled { fragment, outcome } => {
                match outcome {
                    FragmentOutcome::Resolved => self.metrics.fragments_resolved += 1,
                    FragmentOutcome::Failed => self.metrics.fragments_failed += 1,
                    FragmentOutcome::TimedOut => self.metrics.fragments_timed_out += 1,
                }
                let started = self.declared.remove(fragment).unwrap_or(self.start);
                self.metrics.fragments.push(FragmentMetrics {
                    fragment: fragment.0,
                    duration_us: now.duration_since(started).as_micros() as u64,
                    outcome: outcome_label(*outcome).to_string(),
                });
            }
            RenderEvent::Flush { bytes } => {
                self.metrics.bytes_flushed += bytes;
                self.metrics.flushes += 1;
                self.first_flush.get_or_insert(now);
            }
            RenderEvent::Error(_) => self.metrics.errors += 1,
            RenderEvent::End => self.end = Some(now),
        }
    }

    /// Current metrics.
    pub fn snapshot(&self) -> RenderMetrics {
        let since_start = |t: Option<Instant>| t.map(|t| t.duration_since(self.start).as_micros() as u64);
        RenderMetrics {
            time_to_first_flush_us: since_start(self.first_flush),
            total_duration_us: since_start(self.end),
            ..self.metrics.clone()
        }
    }

    /// Whether `end` has been recorded.
    pub fn is_complete(&self) -> bool {
        self.end.is_some()
    }

    /// Render being measured.
    pub fn render_id(&self) -> RenderId {
        self.render_id
    }
}

/// Collector subscribed to a live render.
#[derive(Debug, Clone)]
pub struct MetricsHandle {
    inner: Arc<Mutex<MetricsCollector>>,
}

impl MetricsHandle {
    /// Subscribe a new collector to every event channel of `ctx`.
    ///
    /// Events emitted before attaching are not counted.
    pub fn attach(ctx: &RenderContext) -> Self {
        let inner = Arc::new(Mutex::new(MetricsCollector::new(ctx.id())));
        let kinds = [
            EventKind::Declared,
            EventKind::Settled,
            EventKind::Flush,
            EventKind::Error,
            EventKind::End,
        ];
        for kind in kinds {
            let collector = Arc::clone(&inner);
            ctx.on(kind, move |event| {
                collector
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .record(event);
            });
        }
        Self { inner }
    }

    /// Current metrics.
    pub fn snapshot(&self) -> RenderMetrics {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot()
    }

    /// Log a summary of the current metrics.
    pub fn report(&self) {
        let m = self.snapshot();
        tracing::info!(
            render = %m.render_id,
            declared = m.fragments_declared,
            resolved = m.fragments_resolved,
            failed = m.fragments_failed,
            timed_out = m.fragments_timed_out,
            bytes = m.bytes_flushed,
            total_us = ?m.total_duration_us,
            "render metrics"
        );
    }
}
