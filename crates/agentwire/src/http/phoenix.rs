use serde::Deserialize;
use tracing::debug;

use crate::config::PhoenixConfig;
use crate::errors::ClientError;
use crate::prompt::{PromptOrigin, PromptSource, ResolvedPrompt, extract_template};
use crate::trace::{SpanIndex, SpanRecord};

use super::{build_client, check_status, read_json};

const SPAN_PAGE_LIMIT: u32 = 500;

#[derive(Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

fn authorized(builder: reqwest::RequestBuilder, config: &PhoenixConfig) -> reqwest::RequestBuilder {
    match &config.api_key {
        Some(key) => builder.header("api_key", key),
        None => builder,
    }
}

/// Span index backed by `GET {phoenix}/v1/projects/{project}/spans`.
pub struct PhoenixSpanIndex {
    client: reqwest::Client,
    config: PhoenixConfig,
}

impl PhoenixSpanIndex {
    pub fn new(config: PhoenixConfig, timeout: std::time::Duration) -> Result<Self, ClientError> {
        Ok(Self {
            client: build_client(Some(timeout))?,
            config,
        })
    }
}

#[async_trait::async_trait]
impl SpanIndex for PhoenixSpanIndex {
    async fn fetch_spans(&self) -> Result<Vec<SpanRecord>, ClientError> {
        let request = self
            .client
            .get(self.config.spans_url()?)
            .query(&[("limit", SPAN_PAGE_LIMIT)]);
        let response = authorized(request, &self.config).send().await?;
        let response = check_status(response, "span index").await?;
        let envelope: DataEnvelope<Vec<SpanRecord>> = read_json(response, "span index").await?;
        debug!(event = "trace.fetched", domain = "trace", project = %self.config.project, spans = envelope.data.len());
        Ok(envelope.data)
    }
}

/// Prompt registry backed by `GET {phoenix}/v1/prompts/{name}/tags/{tag}`.
pub struct PhoenixPromptSource {
    client: reqwest::Client,
    config: PhoenixConfig,
}

impl PhoenixPromptSource {
    pub fn new(config: PhoenixConfig, timeout: std::time::Duration) -> Result<Self, ClientError> {
        Ok(Self {
            client: build_client(Some(timeout))?,
            config,
        })
    }
}

#[async_trait::async_trait]
impl PromptSource for PhoenixPromptSource {
    async fn fetch_prompt(
        &self,
        name: &str,
        tag: &str,
    ) -> Result<Option<ResolvedPrompt>, ClientError> {
        let request = self.client.get(self.config.prompt_url(name, tag)?);
        let response = authorized(request, &self.config).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check_status(response, "prompt lookup").await?;
        let envelope: DataEnvelope<serde_json::Value> = read_json(response, "prompt").await?;
        let Some(template) = extract_template(&envelope.data) else {
            return Ok(None);
        };
        let version = envelope
            .data
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        Ok(Some(ResolvedPrompt {
            template,
            version,
            origin: PromptOrigin::Remote,
        }))
    }
}
