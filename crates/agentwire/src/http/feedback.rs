use crate::config::ClientConfig;
use crate::errors::ClientError;
use crate::feedback::{Feedback, FeedbackSink};

use super::{build_client, check_status};

/// Posts annotations to `{server}/feedback`.
pub struct HttpFeedbackSink {
    client: reqwest::Client,
    url: reqwest::Url,
}

impl HttpFeedbackSink {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        Ok(Self {
            client: build_client(Some(config.request_timeout))?,
            url: config.feedback_url()?,
        })
    }
}

#[async_trait::async_trait]
impl FeedbackSink for HttpFeedbackSink {
    async fn submit(&self, feedback: &Feedback) -> Result<(), ClientError> {
        let response = self.client.post(self.url.clone()).json(feedback).send().await?;
        check_status(response, "feedback").await?;
        Ok(())
    }
}
