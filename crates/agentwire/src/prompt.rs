use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::cache::TtlCache;
use crate::errors::ClientError;

const PROMPT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);
const EMBEDDED_VERSION: &str = "local";

/// Where a resolved prompt came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PromptOrigin {
    Cache,
    Remote,
    Embedded,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedPrompt {
    pub template: String,
    pub version: String,
    pub origin: PromptOrigin,
}

/// Remote prompt registry.
#[async_trait::async_trait]
pub trait PromptSource: Send + Sync {
    /// Returns `None` when the registry has no prompt under `name`/`tag`.
    async fn fetch_prompt(&self, name: &str, tag: &str)
    -> Result<Option<ResolvedPrompt>, ClientError>;
}

/// Resolves prompt templates: cache, then remote registry, then embedded copy.
pub struct PromptResolver {
    embedded: HashMap<String, String>,
    remote: Option<Arc<dyn PromptSource>>,
    tag: String,
    cache: TtlCache<String, ResolvedPrompt>,
}

impl PromptResolver {
    pub fn new(embedded: HashMap<String, String>) -> Self {
        Self {
            embedded,
            remote: None,
            tag: "production".to_string(),
            cache: TtlCache::new(PROMPT_CACHE_TTL),
        }
    }

    pub fn with_remote(mut self, remote: Arc<dyn PromptSource>, tag: impl Into<String>) -> Self {
        self.remote = Some(remote);
        self.tag = tag.into();
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache = TtlCache::new(ttl);
        self
    }

    /// Returns the template for `name`.
    ///
    /// Remote failures fall back to the embedded template. Only a name that
    /// is neither remote nor embedded is an error.
    pub async fn resolve(&self, name: &str) -> Result<ResolvedPrompt, ClientError> {
        if let Some(cached) = self.cache.get(&name.to_string()) {
            return Ok(ResolvedPrompt {
                origin: PromptOrigin::Cache,
                ..cached
            });
        }

        if let Some(remote) = &self.remote {
            match remote.fetch_prompt(name, &self.tag).await {
                Ok(Some(prompt)) => {
                    debug!(event = "prompt.remote_hit", domain = "prompt", name = %name, version = %prompt.version);
                    self.cache.insert(name.to_string(), prompt.clone());
                    return Ok(prompt);
                }
                Ok(None) => {
                    debug!(event = "prompt.remote_miss", domain = "prompt", name = %name, tag = %self.tag);
                }
                Err(err) => {
                    warn!(event = "prompt.remote_failed", domain = "prompt", name = %name, error = %err);
                }
            }
        }

        let template = self
            .embedded
            .get(name)
            .ok_or_else(|| ClientError::Config(format!("unknown prompt: {name}")))?;
        let prompt = ResolvedPrompt {
            template: template.clone(),
            version: EMBEDDED_VERSION.to_string(),
            origin: PromptOrigin::Embedded,
        };
        self.cache.insert(name.to_string(), prompt.clone());
        Ok(prompt)
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}

/// Extracts template text from a prompt-version document.
///
/// `string` templates return their text. `chat` templates return the system
/// message (text blocks joined by `\n`), else the first message.
pub fn extract_template(version: &serde_json::Value) -> Option<String> {
    let template = version.get("template")?;
    match template.get("type").and_then(|v| v.as_str())? {
        "string" => template
            .get("template")
            .and_then(|v| v.as_str())
            .map(ToOwned::to_owned),
        "chat" => {
            let messages = template.get("messages")?.as_array()?;
            if let Some(system) = messages
                .iter()
                .find(|m| m.get("role").and_then(|v| v.as_str()) == Some("system"))
                && let Some(text) = system.get("content").and_then(content_text)
            {
                return Some(text);
            }
            let first = messages.first()?.get("content")?;
            match first {
                serde_json::Value::String(text) => Some(text.clone()),
                serde_json::Value::Null => None,
                other => Some(other.to_string()),
            }
        }
        _ => None,
    }
}

fn content_text(content: &serde_json::Value) -> Option<String> {
    match content {
        serde_json::Value::String(text) if !text.is_empty() => Some(text.clone()),
        serde_json::Value::Array(blocks) => {
            let texts: Vec<&str> = blocks
                .iter()
                .filter(|b| b.get("type").and_then(|v| v.as_str()) == Some("text"))
                .filter_map(|b| b.get("text").and_then(|v| v.as_str()))
                .filter(|t| !t.is_empty())
                .collect();
            Some(texts.join("\n"))
        }
        _ => None,
    }
}
