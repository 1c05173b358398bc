//! `reqwest` implementations of the network seams.

mod chat;
mod feedback;
mod phoenix;
mod workflow;

pub use chat::HttpChatTransport;
pub use feedback::HttpFeedbackSink;
pub use phoenix::{PhoenixPromptSource, PhoenixSpanIndex};
pub use workflow::HttpWorkflowApi;

use std::time::Duration;

use crate::errors::ClientError;

pub(crate) fn build_client(timeout: Option<Duration>) -> Result<reqwest::Client, ClientError> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder
        .build()
        .map_err(|e| ClientError::Config(format!("failed to build HTTP client: {e}")))
}

/// Turns a non-2xx response into a transport error carrying status and body.
pub(crate) async fn check_status(
    response: reqwest::Response,
    what: &str,
) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<unreadable body>".to_string());
    Err(ClientError::http_status(
        status.as_u16(),
        format!("{what} failed with status {status}: {body}"),
    ))
}

pub(crate) async fn read_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    what: &str,
) -> Result<T, ClientError> {
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes)
        .map_err(|e| ClientError::protocol(format!("invalid {what} response: {e}")))
}
