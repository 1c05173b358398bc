//! Common imports for typical client usage.
pub use crate::{
    AbortHandle, ChatEvent, ChatMessage, ChatSession, ChatStream, ClientConfig, ClientError,
    ContentPart, Feedback, FeedbackLabel, PollPolicy, Role, RunOutcome, SessionState,
    ToolInvocation, TraceCorrelator, TraceResolution, WorkflowClient,
};
