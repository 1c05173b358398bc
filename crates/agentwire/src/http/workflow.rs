use serde::Deserialize;

use crate::config::ClientConfig;
use crate::errors::ClientError;
use crate::workflow::{WorkflowApi, WorkflowRun};

use super::{build_client, check_status, read_json};

/// Workflow REST routes under `{server}{api_prefix}/workflows/`.
pub struct HttpWorkflowApi {
    client: reqwest::Client,
    config: ClientConfig,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateRunResponse {
    run_id: String,
}

impl HttpWorkflowApi {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        Ok(Self {
            client: build_client(Some(config.request_timeout))?,
            config,
        })
    }
}

#[async_trait::async_trait]
impl WorkflowApi for HttpWorkflowApi {
    async fn create_run(&self, workflow: &str) -> Result<String, ClientError> {
        let response = self
            .client
            .post(self.config.workflow_url(workflow, &["create-run"])?)
            .send()
            .await?;
        let response = check_status(response, "create-run").await?;
        let created: CreateRunResponse = read_json(response, "create-run").await?;
        if created.run_id.is_empty() {
            return Err(ClientError::protocol("create-run returned an empty runId"));
        }
        Ok(created.run_id)
    }

    async fn start_run(
        &self,
        workflow: &str,
        run_id: &str,
        input: &serde_json::Value,
    ) -> Result<(), ClientError> {
        let response = self
            .client
            .post(self.config.workflow_url(workflow, &["start"])?)
            .query(&[("runId", run_id)])
            .json(&serde_json::json!({ "inputData": input }))
            .send()
            .await?;
        check_status(response, "start").await?;
        Ok(())
    }

    async fn get_run(&self, workflow: &str, run_id: &str) -> Result<WorkflowRun, ClientError> {
        let response = self
            .client
            .get(self.config.workflow_url(workflow, &["runs", run_id])?)
            .send()
            .await?;
        let response = check_status(response, "run status").await?;
        read_json(response, "run status").await
    }
}
