use futures::StreamExt as _;
use tracing::debug;

use crate::config::ClientConfig;
use crate::errors::ClientError;
use crate::session::{ByteStream, ChatRequest, ChatTransport};

use super::{build_client, check_status};

/// Streams agent replies from `POST {server}/agents/{agent}/stream-with-trace`.
pub struct HttpChatTransport {
    client: reqwest::Client,
    config: ClientConfig,
}

impl HttpChatTransport {
    /// The client has no overall timeout; streams end on `[DONE]` or abort.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        Ok(Self {
            client: build_client(None)?,
            config,
        })
    }
}

#[async_trait::async_trait]
impl ChatTransport for HttpChatTransport {
    async fn open_stream(&self, request: ChatRequest) -> Result<ByteStream, ClientError> {
        let url = self.config.chat_stream_url(&request.agent_id)?;
        debug!(event = "chat.open", domain = "chat", agent_id = %request.agent_id, messages = request.messages.len());
        let response = self.client.post(url).json(&request).send().await?;
        let response = check_status(response, "chat stream request").await?;
        Ok(Box::pin(
            response.bytes_stream().map(|chunk| chunk.map_err(ClientError::from)),
        ))
    }
}
