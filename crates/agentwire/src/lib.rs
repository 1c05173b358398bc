//! Async client for a remote agent server: streamed chat replies, workflow
//! runs polled to completion, and trace lookup for both.
//!
//! Network access sits behind small traits (`ChatTransport`, `WorkflowApi`,
//! `SpanIndex`, `FeedbackSink`, `PromptSource`); `http::*` implements them
//! over `reqwest`.
//!
//! # Streaming a reply
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use agentwire::http::HttpChatTransport;
//! use agentwire::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), ClientError> {
//! let config = ClientConfig::from_env()?;
//! let session = ChatSession::new(Arc::new(HttpChatTransport::new(config)?), "weather-agent");
//!
//! let mut stream = session
//!     .start_stream(&[ChatMessage::user("Weather in Oslo?")])
//!     .await?;
//! while let Some(event) = stream.next_event().await {
//!     if let ChatEvent::Snapshot { message, .. } = event {
//!         println!("{}", message.text());
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Running a workflow
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use agentwire::http::{HttpWorkflowApi, PhoenixSpanIndex};
//! use agentwire::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), ClientError> {
//! let config = ClientConfig::from_env()?;
//! let index = PhoenixSpanIndex::new(config.phoenix.clone(), config.request_timeout)?;
//! let client = WorkflowClient::new(Arc::new(HttpWorkflowApi::new(config.clone())?))
//!     .with_poll_policy(PollPolicy::long())
//!     .with_correlator(TraceCorrelator::new(Arc::new(index)));
//!
//! let outcome = client
//!     .run("report-workflow", serde_json::json!({ "city": "Oslo" }))
//!     .await?;
//! let (result, trace_id) = outcome.into_result()?;
//! println!("{result} (trace {trace_id:?})");
//! # Ok(())
//! # }
//! ```

/// Incremental assembly of one assistant reply.
pub mod builder;
/// Expiring concurrent cache.
pub mod cache;
/// Sleep abstraction used by polling loops.
pub mod clock;
/// Client and tracing-backend configuration.
pub mod config;
/// Chat message and content part types.
pub mod content;
/// Public error type.
pub mod errors;
/// User feedback annotations.
pub mod feedback;
/// `reqwest` implementations of the network traits.
pub mod http;
/// Process-wide log subscriber setup.
pub mod observability;
/// Common imports for typical usage.
pub mod prelude;
/// Prompt template lookup.
pub mod prompt;
/// Line-oriented stream decoder.
pub mod protocol;
/// Streaming chat session and its handle.
pub mod session;
/// Run id to trace id correlation.
pub mod trace;
/// Workflow run client.
pub mod workflow;

pub use builder::ResponseBuilder;
pub use cache::TtlCache;
pub use clock::{Sleeper, TokioSleeper};
pub use config::{ClientConfig, PhoenixConfig};
pub use content::{ChatMessage, ContentPart, Role, ToolInvocation, WireMessage};
pub use errors::ClientError;
pub use feedback::{Feedback, FeedbackLabel, FeedbackSink, FeedbackTarget, submit_run_feedback};
pub use observability::{LogOutput, LogSettings, init_observability};
pub use prompt::{PromptOrigin, PromptResolver, PromptSource, ResolvedPrompt};
pub use protocol::{LineDecoder, WireEvent};
pub use session::{
    AbortHandle, ByteStream, ChatEvent, ChatRequest, ChatSession, ChatStream, ChatTransport,
    SessionState,
};
pub use trace::{
    SpanContext, SpanIndex, SpanRecord, TraceCorrelator, TraceDiagnostics, TraceResolution,
    TraceRetryPolicy,
};
pub use workflow::{
    PollPolicy, RunOutcome, RunStatus, WorkflowApi, WorkflowClient, WorkflowRun,
};
