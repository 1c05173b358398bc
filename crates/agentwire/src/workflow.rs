use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::{Sleeper, TokioSleeper};
use crate::errors::ClientError;
use crate::trace::{TraceCorrelator, TraceResolution};

const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;
const SHORT_MAX_ATTEMPTS: u32 = 60;
const LONG_MAX_ATTEMPTS: u32 = 120;

/// Remote status of a workflow run.
///
/// Only `success` and `failed` are terminal. Any other status string the
/// server reports (`pending`, `waiting`, `suspended`, ...) is kept verbatim
/// in `Pending` and polled like `running`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RunStatus {
    Running,
    Success,
    Failed,
    Pending(String),
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Pending(status) => status,
        }
    }
}

impl From<String> for RunStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "running" => Self::Running,
            "success" => Self::Success,
            "failed" => Self::Failed,
            _ => Self::Pending(value),
        }
    }
}

impl From<RunStatus> for String {
    fn from(value: RunStatus) -> Self {
        match value {
            RunStatus::Pending(status) => status,
            other => other.as_str().to_string(),
        }
    }
}

/// A workflow run as reported by `GET /workflows/{name}/runs/{id}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRun {
    pub run_id: String,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<serde_json::Value>,
}

impl WorkflowRun {
    fn failure_reason(&self) -> String {
        match &self.error {
            Some(serde_json::Value::String(message)) => message.clone(),
            Some(serde_json::Value::Object(map)) => map
                .get("message")
                .and_then(|v| v.as_str())
                .map(ToOwned::to_owned)
                .unwrap_or_else(|| serde_json::Value::Object(map.clone()).to_string()),
            Some(serde_json::Value::Null) | None => "workflow execution failed".to_string(),
            Some(other) => other.to_string(),
        }
    }
}

/// Remote workflow REST surface.
#[async_trait::async_trait]
pub trait WorkflowApi: Send + Sync {
    /// `POST /workflows/{workflow}/create-run`, returning the new run id.
    async fn create_run(&self, workflow: &str) -> Result<String, ClientError>;

    /// `POST /workflows/{workflow}/start?runId={run_id}` with `{inputData}`.
    async fn start_run(
        &self,
        workflow: &str,
        run_id: &str,
        input: &serde_json::Value,
    ) -> Result<(), ClientError>;

    /// `GET /workflows/{workflow}/runs/{run_id}`.
    async fn get_run(&self, workflow: &str, run_id: &str) -> Result<WorkflowRun, ClientError>;
}

/// Fixed-interval polling bound.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollPolicy {
    /// Delay between consecutive status requests.
    pub interval: Duration,
    /// Status requests allowed before giving up with `TimedOut`.
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::short()
    }
}

impl PollPolicy {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    /// 2 s × 60 attempts.
    pub fn short() -> Self {
        Self::new(
            Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            SHORT_MAX_ATTEMPTS,
        )
    }

    /// 2 s × 120 attempts, for multi-agent pipelines.
    pub fn long() -> Self {
        Self::new(
            Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            LONG_MAX_ATTEMPTS,
        )
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), ClientError> {
        if self.max_attempts == 0 {
            return Err(ClientError::Validation(
                "poll max_attempts must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// Result of driving one run to a terminal state.
#[derive(Clone, Debug, PartialEq)]
pub enum RunOutcome {
    Success {
        run_id: String,
        result: serde_json::Value,
        trace_id: Option<String>,
    },
    Failed {
        run_id: String,
        reason: String,
    },
    TimedOut {
        run_id: String,
        attempts: u32,
    },
}

impl RunOutcome {
    pub fn run_id(&self) -> &str {
        match self {
            Self::Success { run_id, .. }
            | Self::Failed { run_id, .. }
            | Self::TimedOut { run_id, .. } => run_id,
        }
    }

    /// Converts non-success outcomes into errors for callers that want `?`.
    pub fn into_result(self) -> Result<(serde_json::Value, Option<String>), ClientError> {
        match self {
            Self::Success {
                result, trace_id, ..
            } => Ok((result, trace_id)),
            Self::Failed { run_id, reason } => Err(ClientError::RunFailed { run_id, reason }),
            Self::TimedOut { run_id, attempts } => Err(ClientError::Timeout { run_id, attempts }),
        }
    }
}

/// Drives create-run → start → poll for a named workflow.
#[derive(Clone)]
pub struct WorkflowClient {
    api: Arc<dyn WorkflowApi>,
    sleeper: Arc<dyn Sleeper>,
    correlator: Option<TraceCorrelator>,
    poll: PollPolicy,
}

impl WorkflowClient {
    pub fn new(api: Arc<dyn WorkflowApi>) -> Self {
        Self {
            api,
            sleeper: Arc::new(TokioSleeper),
            correlator: None,
            poll: PollPolicy::default(),
        }
    }

    /// Overrides the default poll policy used by [`WorkflowClient::run`].
    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Resolves trace ids for successful runs.
    pub fn with_correlator(mut self, correlator: TraceCorrelator) -> Self {
        self.correlator = Some(correlator);
        self
    }

    pub fn poll_policy(&self) -> &PollPolicy {
        &self.poll
    }

    /// Runs `workflow` with the client's poll policy.
    pub async fn run(
        &self,
        workflow: &str,
        input: serde_json::Value,
    ) -> Result<RunOutcome, ClientError> {
        self.run_with_policy(workflow, input, &self.poll).await
    }

    /// Runs `workflow` with an explicit poll policy.
    ///
    /// Create and start failures, poll request failures and a success status
    /// without a result are errors. `Failed` and `TimedOut` are outcomes.
    pub async fn run_with_policy(
        &self,
        workflow: &str,
        input: serde_json::Value,
        poll: &PollPolicy,
    ) -> Result<RunOutcome, ClientError> {
        if workflow.trim().is_empty() {
            return Err(ClientError::Validation(
                "workflow name must not be empty".into(),
            ));
        }
        poll.validate()?;

        let run_id = self.api.create_run(workflow).await?;
        info!(event = "workflow.run_created", domain = "workflow", workflow = %workflow, run_id = %run_id);

        self.api.start_run(workflow, &run_id, &input).await?;
        info!(event = "workflow.run_started", domain = "workflow", workflow = %workflow, run_id = %run_id);

        let outcome = self.poll_until_terminal(workflow, &run_id, poll).await?;
        match outcome {
            RunOutcome::Success {
                run_id,
                result,
                trace_id: None,
            } => {
                let trace_id = self.resolve_trace_id(&run_id).await;
                Ok(RunOutcome::Success {
                    run_id,
                    result,
                    trace_id,
                })
            }
            other => Ok(other),
        }
    }

    async fn poll_until_terminal(
        &self,
        workflow: &str,
        run_id: &str,
        poll: &PollPolicy,
    ) -> Result<RunOutcome, ClientError> {
        for attempt in 1..=poll.max_attempts {
            let run = self.api.get_run(workflow, run_id).await?;
            debug!(event = "workflow.poll", domain = "workflow", run_id = %run_id, attempt, status = %run.status.as_str());
            match run.status {
                RunStatus::Success => {
                    let result = run.result.ok_or_else(|| {
                        ClientError::protocol(format!(
                            "workflow run {run_id} reported success without a result"
                        ))
                    })?;
                    info!(event = "workflow.run_succeeded", domain = "workflow", run_id = %run_id, attempts = attempt);
                    return Ok(RunOutcome::Success {
                        run_id: run_id.to_string(),
                        result,
                        trace_id: None,
                    });
                }
                RunStatus::Failed => {
                    let reason = run.failure_reason();
                    warn!(event = "workflow.run_failed", domain = "workflow", run_id = %run_id, attempts = attempt, reason = %reason);
                    return Ok(RunOutcome::Failed {
                        run_id: run_id.to_string(),
                        reason,
                    });
                }
                RunStatus::Running | RunStatus::Pending(_) => {
                    if attempt < poll.max_attempts {
                        self.sleeper.sleep(poll.interval).await;
                    }
                }
            }
        }
        warn!(event = "workflow.run_timed_out", domain = "workflow", run_id = %run_id, attempts = poll.max_attempts);
        Ok(RunOutcome::TimedOut {
            run_id: run_id.to_string(),
            attempts: poll.max_attempts,
        })
    }

    async fn resolve_trace_id(&self, run_id: &str) -> Option<String> {
        let correlator = self.correlator.as_ref()?;
        match correlator.resolve(run_id).await {
            Ok(TraceResolution::Resolved { trace_id, .. }) => Some(trace_id),
            Ok(TraceResolution::Unresolved(_)) => None,
            Err(err) => {
                warn!(event = "trace.lookup_failed", domain = "trace", run_id = %run_id, error = %err);
                None
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    /// Scripted workflow API that records every call.
    #[derive(Default)]
    pub(crate) struct ScriptedApi {
        pub(crate) create: Mutex<Option<Result<String, ClientError>>>,
        pub(crate) start_error: Mutex<Option<ClientError>>,
        pub(crate) polls: Mutex<VecDeque<Result<WorkflowRun, ClientError>>>,
        pub(crate) calls: Mutex<Vec<String>>,
        pub(crate) inputs: Mutex<Vec<serde_json::Value>>,
    }

    impl ScriptedApi {
        pub(crate) fn with_polls(run_id: &str, polls: Vec<Result<WorkflowRun, ClientError>>) -> Self {
            Self {
                create: Mutex::new(Some(Ok(run_id.to_string()))),
                polls: Mutex::new(polls.into()),
                ..Self::default()
            }
        }

        pub(crate) fn calls(&self) -> Vec<String> {
            self.calls.lock().expect("calls lock").clone()
        }

        pub(crate) fn poll_count(&self) -> usize {
            self.calls().iter().filter(|c| c.starts_with("get ")).count()
        }
    }

    pub(crate) fn run(run_id: &str, status: RunStatus, result: Option<serde_json::Value>) -> WorkflowRun {
        WorkflowRun {
            run_id: run_id.to_string(),
            status,
            result,
            error: None,
        }
    }

    #[async_trait::async_trait]
    impl WorkflowApi for ScriptedApi {
        async fn create_run(&self, workflow: &str) -> Result<String, ClientError> {
            self.calls.lock().expect("calls lock").push(format!("create {workflow}"));
            self.create
                .lock()
                .expect("create lock")
                .take()
                .unwrap_or_else(|| Err(ClientError::protocol("create_run called twice")))
        }

        async fn start_run(
            &self,
            workflow: &str,
            run_id: &str,
            input: &serde_json::Value,
        ) -> Result<(), ClientError> {
            self.calls
                .lock()
                .expect("calls lock")
                .push(format!("start {workflow} {run_id}"));
            self.inputs.lock().expect("inputs lock").push(input.clone());
            match self.start_error.lock().expect("start lock").take() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }

        async fn get_run(&self, workflow: &str, run_id: &str) -> Result<WorkflowRun, ClientError> {
            self.calls
                .lock()
                .expect("calls lock")
                .push(format!("get {workflow} {run_id}"));
            self.polls
                .lock()
                .expect("polls lock")
                .pop_front()
                .unwrap_or_else(|| Err(ClientError::protocol("polled after script ended")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{ScriptedApi, run};
    use super::*;
    use crate::clock::testing::RecordingSleeper;
    use serde_json::json;

    fn client(api: Arc<ScriptedApi>, sleeper: Arc<RecordingSleeper>) -> WorkflowClient {
        WorkflowClient::new(api)
            .with_sleeper(sleeper)
            .with_poll_policy(PollPolicy::short())
    }

    #[tokio::test]
    async fn succeeds_after_three_polls_and_stops() {
        let api = Arc::new(ScriptedApi::with_polls(
            "run-1",
            vec![
                Ok(run("run-1", RunStatus::Running, None)),
                Ok(run("run-1", RunStatus::Running, None)),
                Ok(run("run-1", RunStatus::Success, Some(json!({"x":1})))),
                Ok(run("run-1", RunStatus::Running, None)),
            ],
        ));
        let sleeper = Arc::new(RecordingSleeper::default());
        let outcome = client(api.clone(), sleeper.clone())
            .run("weatherWorkflow", json!({"city":"Oslo"}))
            .await
            .expect("run");

        assert_eq!(
            outcome,
            RunOutcome::Success {
                run_id: "run-1".into(),
                result: json!({"x":1}),
                trace_id: None,
            }
        );
        assert_eq!(api.poll_count(), 3);
        assert_eq!(
            &api.calls()[..2],
            &[
                "create weatherWorkflow".to_string(),
                "start weatherWorkflow run-1".to_string()
            ]
        );
        assert_eq!(api.inputs.lock().expect("inputs")[0], json!({"city":"Oslo"}));
        assert_eq!(sleeper.recorded(), vec![Duration::from_millis(2_000); 2]);
    }

    #[tokio::test]
    async fn exhausting_attempts_times_out_not_fails() {
        let polls = (0..5)
            .map(|_| Ok(run("run-2", RunStatus::Running, None)))
            .collect();
        let api = Arc::new(ScriptedApi::with_polls("run-2", polls));
        let sleeper = Arc::new(RecordingSleeper::default());
        let outcome = client(api.clone(), sleeper.clone())
            .with_poll_policy(PollPolicy::short().with_max_attempts(5))
            .run("contentWorkflow", json!({}))
            .await
            .expect("run");

        assert_eq!(
            outcome,
            RunOutcome::TimedOut {
                run_id: "run-2".into(),
                attempts: 5
            }
        );
        assert_eq!(api.poll_count(), 5);
        assert_eq!(sleeper.recorded().len(), 4);
        assert!(matches!(
            outcome.into_result(),
            Err(ClientError::Timeout { attempts: 5, .. })
        ));
    }

    #[tokio::test]
    async fn success_without_result_is_protocol_error() {
        let api = Arc::new(ScriptedApi::with_polls(
            "run-3",
            vec![Ok(run("run-3", RunStatus::Success, None))],
        ));
        let err = client(api, Arc::new(RecordingSleeper::default()))
            .run("weatherWorkflow", json!({}))
            .await
            .expect_err("protocol error");
        assert!(matches!(err, ClientError::Protocol(msg) if msg.contains("without a result")));
    }

    #[tokio::test]
    async fn failed_status_stops_polling_immediately() {
        let mut failed = run("run-4", RunStatus::Failed, None);
        failed.error = Some(json!({"message":"step exploded"}));
        let api = Arc::new(ScriptedApi::with_polls(
            "run-4",
            vec![
                Ok(run("run-4", RunStatus::Running, None)),
                Ok(failed),
                Ok(run("run-4", RunStatus::Success, Some(json!(1)))),
            ],
        ));
        let outcome = client(api.clone(), Arc::new(RecordingSleeper::default()))
            .run("weatherWorkflow", json!({}))
            .await
            .expect("run");
        assert_eq!(
            outcome,
            RunOutcome::Failed {
                run_id: "run-4".into(),
                reason: "step exploded".into()
            }
        );
        assert_eq!(api.poll_count(), 2);
    }

    #[tokio::test]
    async fn poll_transport_error_is_fatal_without_retry() {
        let api = Arc::new(ScriptedApi::with_polls(
            "run-5",
            vec![
                Ok(run("run-5", RunStatus::Running, None)),
                Err(ClientError::http_status(500, "boom")),
                Ok(run("run-5", RunStatus::Success, Some(json!(1)))),
            ],
        ));
        let err = client(api.clone(), Arc::new(RecordingSleeper::default()))
            .run("weatherWorkflow", json!({}))
            .await
            .expect_err("fatal");
        assert_eq!(err.status_code(), Some(500));
        assert_eq!(api.poll_count(), 2);
    }

    #[tokio::test]
    async fn create_failure_skips_start_and_polling() {
        let api = Arc::new(ScriptedApi {
            create: std::sync::Mutex::new(Some(Err(ClientError::http_status(503, "down")))),
            ..ScriptedApi::default()
        });
        let err = client(api.clone(), Arc::new(RecordingSleeper::default()))
            .run("weatherWorkflow", json!({}))
            .await
            .expect_err("fatal");
        assert_eq!(err.status_code(), Some(503));
        assert_eq!(api.calls(), vec!["create weatherWorkflow".to_string()]);
    }

    #[tokio::test]
    async fn start_failure_skips_polling() {
        let api = Arc::new(ScriptedApi::with_polls("run-6", vec![]));
        *api.start_error.lock().expect("start lock") = Some(ClientError::transport("refused"));
        let err = client(api.clone(), Arc::new(RecordingSleeper::default()))
            .run("weatherWorkflow", json!({}))
            .await
            .expect_err("fatal");
        assert!(err.is_transport());
        assert_eq!(api.poll_count(), 0);
    }

    #[tokio::test]
    async fn zero_attempts_is_rejected_before_any_request() {
        let api = Arc::new(ScriptedApi::with_polls("run-7", vec![]));
        let err = client(api.clone(), Arc::new(RecordingSleeper::default()))
            .run_with_policy("weatherWorkflow", json!({}), &PollPolicy::long().with_max_attempts(0))
            .await
            .expect_err("invalid");
        assert!(matches!(err, ClientError::Validation(_)));
        assert!(api.calls().is_empty());
    }

    #[test]
    fn run_status_parses_wire_shape() {
        let parsed: WorkflowRun = serde_json::from_value(json!({
            "runId": "r",
            "status": "success",
            "result": {"finalCopy": "done"}
        }))
        .expect("parse");
        assert_eq!(parsed.status, RunStatus::Success);
        assert!(parsed.status.is_terminal());
        let waiting: WorkflowRun =
            serde_json::from_value(json!({"runId":"r","status":"suspended"})).expect("parse");
        assert_eq!(waiting.status, RunStatus::Pending("suspended".into()));
        assert!(!waiting.status.is_terminal());
        assert_eq!(
            serde_json::to_value(&waiting).expect("json")["status"],
            json!("suspended")
        );
    }

    #[tokio::test]
    async fn non_terminal_statuses_keep_polling() {
        let api = Arc::new(ScriptedApi::with_polls(
            "run-6",
            vec![
                Ok(run("run-6", RunStatus::Pending("pending".into()), None)),
                Ok(run("run-6", RunStatus::Pending("waiting".into()), None)),
                Ok(run("run-6", RunStatus::Success, Some(json!({"ok": true})))),
            ],
        ));
        let sleeper = Arc::new(RecordingSleeper::default());
        let outcome = client(api.clone(), sleeper.clone())
            .run("report", json!({}))
            .await
            .expect("run");
        assert_eq!(
            outcome,
            RunOutcome::Success {
                run_id: "run-6".into(),
                result: json!({"ok": true}),
                trace_id: None,
            }
        );
        assert_eq!(api.poll_count(), 3);
        assert_eq!(sleeper.recorded().len(), 2);
    }

    #[test]
    fn failure_reason_defaults_when_error_missing() {
        assert_eq!(
            run("r", RunStatus::Failed, None).failure_reason(),
            "workflow execution failed"
        );
    }

    #[test]
    fn default_policies_match_short_and_long_pipelines() {
        assert_eq!(PollPolicy::default().max_attempts, 60);
        assert_eq!(PollPolicy::long().max_attempts, 120);
        assert_eq!(PollPolicy::long().interval, Duration::from_secs(2));
    }
}
