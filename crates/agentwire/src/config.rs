use std::time::Duration;

use crate::errors::ClientError;
use crate::trace::TraceRetryPolicy;
use crate::workflow::PollPolicy;

const DEFAULT_SERVER_URL: &str = "http://localhost:4111";
const DEFAULT_PHOENIX_ENDPOINT: &str = "http://localhost:6006";

/// Connection settings for the agent server.
#[derive(Clone, Debug, PartialEq)]
pub struct ClientConfig {
    /// Base URL of the agent server, without a trailing slash.
    pub server_url: String,
    /// Path prefix for workflow routes.
    pub api_prefix: String,
    /// Timeout for non-streaming requests. Chat streams are not bounded by it.
    pub request_timeout: Duration,
    pub poll: PollPolicy,
    pub trace_retry: TraceRetryPolicy,
    pub phoenix: PhoenixConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            api_prefix: "/api".to_string(),
            request_timeout: Duration::from_secs(120),
            poll: PollPolicy::short(),
            trace_retry: TraceRetryPolicy::default(),
            phoenix: PhoenixConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self::default().server_url(server_url)
    }

    /// Builds a config from `AGENTWIRE_*` and `PHOENIX_*` variables.
    ///
    /// Unset variables keep their defaults; unparsable numbers are a
    /// `Config` error.
    pub fn from_env() -> Result<Self, ClientError> {
        let mut config = Self::default();
        if let Some(url) = env_non_empty("AGENTWIRE_API_URL") {
            config = config.server_url(url);
        }
        if let Some(interval) = env_parse::<u64>("AGENTWIRE_POLL_INTERVAL_MS")? {
            config.poll = config.poll.with_interval(Duration::from_millis(interval));
        }
        if let Some(attempts) = env_parse::<u32>("AGENTWIRE_POLL_MAX_ATTEMPTS")? {
            config.poll = config.poll.with_max_attempts(attempts);
        }
        config.poll.validate()?;
        config.phoenix = PhoenixConfig::from_env();
        Ok(config)
    }

    /// Overrides the server URL; trailing slashes are trimmed.
    pub fn server_url(mut self, server_url: impl Into<String>) -> Self {
        self.server_url = server_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn api_prefix(mut self, api_prefix: impl Into<String>) -> Self {
        self.api_prefix = api_prefix.into();
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn poll(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    pub fn trace_retry(mut self, policy: TraceRetryPolicy) -> Self {
        self.trace_retry = policy;
        self
    }

    pub fn phoenix(mut self, phoenix: PhoenixConfig) -> Self {
        self.phoenix = phoenix;
        self
    }

    pub(crate) fn chat_stream_url(&self, agent_id: &str) -> Result<reqwest::Url, ClientError> {
        endpoint_url(&self.server_url, &["agents", agent_id, "stream-with-trace"])
    }

    /// `{server}{api_prefix}/workflows/{workflow}/{tail...}`
    pub(crate) fn workflow_url(
        &self,
        workflow: &str,
        tail: &[&str],
    ) -> Result<reqwest::Url, ClientError> {
        let mut segments: Vec<&str> = self
            .api_prefix
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();
        segments.extend(["workflows", workflow]);
        segments.extend_from_slice(tail);
        endpoint_url(&self.server_url, &segments)
    }

    pub(crate) fn feedback_url(&self) -> Result<reqwest::Url, ClientError> {
        endpoint_url(&self.server_url, &["feedback"])
    }
}

/// Settings for the tracing backend that stores spans and prompts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PhoenixConfig {
    /// Base URL, without the `/v1/traces` collector suffix.
    pub endpoint: String,
    /// Sent as the `api_key` header when present.
    pub api_key: Option<String>,
    pub project: String,
    pub prompts_tag: String,
    /// Whether prompts are looked up remotely before the embedded copies.
    pub prompts_enabled: bool,
}

impl Default for PhoenixConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_PHOENIX_ENDPOINT.to_string(),
            api_key: None,
            project: "default".to_string(),
            prompts_tag: "production".to_string(),
            prompts_enabled: false,
        }
    }
}

impl PhoenixConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(endpoint) = env_non_empty("PHOENIX_ENDPOINT") {
            config = config.endpoint(endpoint);
        }
        config.api_key = env_non_empty("PHOENIX_API_KEY");
        if let Some(project) = env_non_empty("PHOENIX_PROJECT_NAME") {
            config.project = project;
        }
        if let Some(tag) = env_non_empty("PHOENIX_PROMPTS_TAG") {
            config.prompts_tag = tag;
        }
        config.prompts_enabled = env_non_empty("PHOENIX_PROMPTS_ENABLED")
            .is_some_and(|v| v.eq_ignore_ascii_case("true"));
        config
    }

    /// Sets the base URL. A collector URL ending in `/v1/traces` is accepted.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = normalize_endpoint(&endpoint.into());
        self
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn project(mut self, project: impl Into<String>) -> Self {
        self.project = project.into();
        self
    }

    pub fn prompts(mut self, enabled: bool, tag: impl Into<String>) -> Self {
        self.prompts_enabled = enabled;
        self.prompts_tag = tag.into();
        self
    }

    pub(crate) fn spans_url(&self) -> Result<reqwest::Url, ClientError> {
        endpoint_url(&self.endpoint, &["v1", "projects", self.project.as_str(), "spans"])
    }

    pub(crate) fn prompt_url(&self, name: &str, tag: &str) -> Result<reqwest::Url, ClientError> {
        endpoint_url(&self.endpoint, &["v1", "prompts", name, "tags", tag])
    }
}

/// Appends percent-encoded path segments to `base`.
fn endpoint_url(base: &str, segments: &[&str]) -> Result<reqwest::Url, ClientError> {
    let mut url = reqwest::Url::parse(base)
        .map_err(|e| ClientError::Config(format!("invalid base URL {base}: {e}")))?;
    url.path_segments_mut()
        .map_err(|_| ClientError::Config(format!("base URL cannot carry a path: {base}")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn normalize_endpoint(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    trimmed
        .strip_suffix("/v1/traces")
        .unwrap_or(trimmed)
        .to_string()
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ClientError> {
    env_non_empty(key)
        .map(|raw| {
            raw.parse()
                .map_err(|_| ClientError::Config(format!("{key} is not a valid number: {raw}")))
        })
        .transpose()
}
