use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::ClientError;
use crate::trace::{SpanContext, TraceCorrelator, TraceResolution};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackLabel {
    ThumbsUp,
    ThumbsDown,
}

impl FeedbackLabel {
    pub fn default_score(self) -> f64 {
        match self {
            Self::ThumbsUp => 1.0,
            Self::ThumbsDown => 0.0,
        }
    }
}

/// What the annotation is attached to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedbackTarget {
    #[serde(rename = "traceId")]
    Trace(String),
    #[serde(rename = "spanId")]
    Span(String),
}

/// Body of `POST /feedback`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    #[serde(flatten)]
    pub target: FeedbackTarget,
    pub label: FeedbackLabel,
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

impl Feedback {
    pub fn new(target: FeedbackTarget, label: FeedbackLabel) -> Self {
        Self {
            target,
            label,
            score: label.default_score(),
            explanation: None,
        }
    }

    pub fn thumbs_up(target: FeedbackTarget) -> Self {
        Self::new(target, FeedbackLabel::ThumbsUp)
    }

    pub fn thumbs_down(target: FeedbackTarget) -> Self {
        Self::new(target, FeedbackLabel::ThumbsDown)
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = score;
        self
    }

    /// Attaches a free-text comment; blank comments are dropped.
    pub fn with_explanation(mut self, explanation: impl Into<String>) -> Self {
        let explanation = explanation.into();
        self.explanation = Some(explanation).filter(|e| !e.trim().is_empty());
        self
    }
}

/// Receives user feedback annotations.
#[async_trait::async_trait]
pub trait FeedbackSink: Send + Sync {
    async fn submit(&self, feedback: &Feedback) -> Result<(), ClientError>;
}

/// Resolves the run's span and annotates it.
///
/// The feedback route only accepts span annotations, so the target is the
/// span that carries the run id. Returns that span's context. An unresolved
/// trace is a `Validation` error since there is nothing to annotate.
pub async fn submit_run_feedback(
    correlator: &TraceCorrelator,
    sink: &dyn FeedbackSink,
    run_id: &str,
    label: FeedbackLabel,
    explanation: Option<String>,
) -> Result<SpanContext, ClientError> {
    let context = match correlator.resolve(run_id).await? {
        TraceResolution::Resolved {
            trace_id, span_id, ..
        } => SpanContext { trace_id, span_id },
        TraceResolution::Unresolved(diagnostics) => {
            return Err(ClientError::Validation(format!(
                "no trace found for run {run_id} after {} attempts ({} spans inspected)",
                diagnostics.attempts, diagnostics.spans_inspected
            )));
        }
    };

    let mut feedback = Feedback::new(FeedbackTarget::Span(context.span_id.clone()), label);
    if let Some(explanation) = explanation {
        feedback = feedback.with_explanation(explanation);
    }
    sink.submit(&feedback).await?;
    info!(event = "feedback.submitted", domain = "feedback", run_id = %run_id, trace_id = %context.trace_id, span_id = %context.span_id, label = ?label);
    Ok(context)
}
