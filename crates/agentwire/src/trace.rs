use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::{Sleeper, TokioSleeper};
use crate::errors::ClientError;

/// Attribute holding the workflow run id on indexed spans.
pub const RUN_ID_ATTRIBUTE: &str = "metadata.runId";
/// Attribute holding the span kind on indexed spans.
pub const SPAN_TYPE_ATTRIBUTE: &str = "mastra.span.type";
const WORKFLOW_RUN_SPAN_TYPE: &str = "workflow_run";
const SAMPLE_RUN_IDS: usize = 5;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanContext {
    pub trace_id: String,
    pub span_id: String,
}

/// One entry of the span index.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpanRecord {
    pub context: SpanContext,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl SpanRecord {
    fn attribute_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(|v| v.as_str())
    }

    pub fn run_id(&self) -> Option<&str> {
        self.attribute_str(RUN_ID_ATTRIBUTE)
    }

    pub fn is_workflow_run(&self) -> bool {
        self.attribute_str(SPAN_TYPE_ATTRIBUTE) == Some(WORKFLOW_RUN_SPAN_TYPE)
    }
}

/// Eventually consistent index of spans.
#[async_trait::async_trait]
pub trait SpanIndex: Send + Sync {
    /// Fetches the current index in full.
    async fn fetch_spans(&self) -> Result<Vec<SpanRecord>, ClientError>;
}

/// Fixed-delay retry bound for trace lookups.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceRetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for TraceRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(1_000),
        }
    }
}

/// Context reported when no span matched.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TraceDiagnostics {
    pub attempts: u32,
    /// Spans inspected on the last attempt.
    pub spans_inspected: usize,
    pub workflow_run_spans: usize,
    /// Up to five run ids seen on workflow-run spans.
    pub sample_run_ids: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TraceResolution {
    Resolved {
        trace_id: String,
        span_id: String,
        attempts: u32,
    },
    /// No match yet. Callers treat the trace id as optional.
    Unresolved(TraceDiagnostics),
}

impl TraceResolution {
    pub fn trace_id(&self) -> Option<&str> {
        match self {
            Self::Resolved { trace_id, .. } => Some(trace_id),
            Self::Unresolved(_) => None,
        }
    }
}

/// Resolves a workflow run id to the trace id assigned by the tracing backend.
#[derive(Clone)]
pub struct TraceCorrelator {
    index: Arc<dyn SpanIndex>,
    sleeper: Arc<dyn Sleeper>,
    policy: TraceRetryPolicy,
}

impl TraceCorrelator {
    pub fn new(index: Arc<dyn SpanIndex>) -> Self {
        Self {
            index,
            sleeper: Arc::new(TokioSleeper),
            policy: TraceRetryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: TraceRetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Looks the run up, retrying with a fixed delay while the index catches up.
    ///
    /// Exhausting the attempts is `Unresolved`, not an error. An index fetch
    /// failure is returned as-is.
    pub async fn resolve(&self, run_id: &str) -> Result<TraceResolution, ClientError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_spans = Vec::new();
        for attempt in 1..=max_attempts {
            if attempt > 1 {
                self.sleeper.sleep(self.policy.delay).await;
            }
            let spans = self.index.fetch_spans().await?;
            if let Some(span) = spans.iter().find(|s| s.run_id() == Some(run_id)) {
                debug!(event = "trace.resolved", domain = "trace", run_id = %run_id, trace_id = %span.context.trace_id, attempt);
                return Ok(TraceResolution::Resolved {
                    trace_id: span.context.trace_id.clone(),
                    span_id: span.context.span_id.clone(),
                    attempts: attempt,
                });
            }
            debug!(event = "trace.not_indexed", domain = "trace", run_id = %run_id, attempt, spans = spans.len() as u64);
            last_spans = spans;
        }

        let diagnostics = diagnostics(&last_spans, max_attempts);
        warn!(
            event = "trace.unresolved",
            domain = "trace",
            run_id = %run_id,
            attempts = diagnostics.attempts,
            spans_inspected = diagnostics.spans_inspected as u64,
            workflow_run_spans = diagnostics.workflow_run_spans as u64,
            sample_run_ids = ?diagnostics.sample_run_ids
        );
        Ok(TraceResolution::Unresolved(diagnostics))
    }
}

fn diagnostics(spans: &[SpanRecord], attempts: u32) -> TraceDiagnostics {
    let workflow_runs: Vec<&SpanRecord> = spans.iter().filter(|s| s.is_workflow_run()).collect();
    TraceDiagnostics {
        attempts,
        spans_inspected: spans.len(),
        workflow_run_spans: workflow_runs.len(),
        sample_run_ids: workflow_runs
            .iter()
            .filter_map(|s| s.run_id())
            .take(SAMPLE_RUN_IDS)
            .map(ToOwned::to_owned)
            .collect(),
    }
}
