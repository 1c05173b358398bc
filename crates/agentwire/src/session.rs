use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt as _;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info};

use crate::builder::ResponseBuilder;
use crate::content::{ChatMessage, WireMessage};
use crate::errors::ClientError;
use crate::protocol::{LineDecoder, WireEvent};

/// Raw response body as a stream of byte chunks.
pub type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, ClientError>> + Send + 'static>>;

/// Request body for the agent stream endpoint.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct ChatRequest {
    #[serde(skip)]
    pub agent_id: String,
    pub messages: Vec<WireMessage>,
}

/// Opens the HTTP stream for one chat turn.
///
/// Implementations return `ClientError::Transport` with a status code when the
/// server answers with a non-success status. Dropping the returned stream must
/// abort the underlying request.
#[async_trait::async_trait]
pub trait ChatTransport: Send + Sync {
    async fn open_stream(&self, request: ChatRequest) -> Result<ByteStream, ClientError>;
}

/// Lifecycle of one chat turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Streaming,
    Complete,
    Cancelled,
    Errored,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Cancelled | Self::Errored)
    }
}

/// Events yielded by [`ChatStream::next_event`].
#[derive(Clone, Debug, PartialEq)]
pub enum ChatEvent {
    /// Full in-progress message after a chunk was folded in.
    Snapshot { seq: u64, message: ChatMessage },
    /// Terminal success; `message` equals the last snapshot.
    Completed { message: ChatMessage },
    /// Terminal failure or cancellation. Earlier snapshots stay valid.
    Error { error: ClientError },
}

/// Handle used to cancel an in-flight chat stream.
#[derive(Clone)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl AbortHandle {
    /// Requests cancellation. The HTTP request is dropped and no further
    /// snapshots are emitted.
    pub fn abort(&self) {
        let _ = self.tx.send(true);
    }
}

/// Chat session bound to one agent.
#[derive(Clone)]
pub struct ChatSession {
    transport: Arc<dyn ChatTransport>,
    agent_id: String,
    stream_buffer_capacity: usize,
}

impl ChatSession {
    pub fn new(transport: Arc<dyn ChatTransport>, agent_id: impl Into<String>) -> Self {
        Self {
            transport,
            agent_id: agent_id.into(),
            stream_buffer_capacity: 128,
        }
    }

    /// Sets the bounded buffer between the stream task and the consumer.
    pub fn stream_buffer_capacity(mut self, capacity: usize) -> Self {
        self.stream_buffer_capacity = capacity;
        self
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Sends the full history and starts streaming the assistant reply.
    pub async fn start_stream(&self, history: &[ChatMessage]) -> Result<ChatStream, ClientError> {
        if self.agent_id.trim().is_empty() {
            return Err(ClientError::Validation("agent id must not be empty".into()));
        }
        if history.is_empty() {
            return Err(ClientError::Validation(
                "at least one message is required".into(),
            ));
        }
        if self.stream_buffer_capacity == 0 {
            return Err(ClientError::Validation(
                "stream_buffer_capacity must be greater than 0".into(),
            ));
        }

        let request = ChatRequest {
            agent_id: self.agent_id.clone(),
            messages: history.iter().map(ChatMessage::to_wire).collect(),
        };

        let (tx, rx) = mpsc::channel(self.stream_buffer_capacity);
        let (final_tx, final_rx) = oneshot::channel();
        let (abort_tx, abort_rx) = watch::channel(false);
        let aborted = abort_rx.clone();
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        let (trace_tx, trace_rx) = oneshot::channel();

        tokio::spawn(stream_task(
            self.transport.clone(),
            request,
            TaskChannels {
                events: tx,
                final_tx: Some(final_tx),
                state: state_tx,
                trace: Some(trace_tx),
            },
            abort_rx,
        ));

        Ok(ChatStream {
            rx,
            final_rx,
            abort_handle: AbortHandle { tx: abort_tx },
            aborted,
            state_rx,
            trace_rx: Some(trace_rx),
            saw_terminal: false,
        })
    }

    /// Streams to completion and returns the final message.
    pub async fn collect(&self, history: &[ChatMessage]) -> Result<ChatMessage, ClientError> {
        self.start_stream(history).await?.finish().await
    }
}

/// Streaming handle returned by [`ChatSession::start_stream`].
pub struct ChatStream {
    rx: mpsc::Receiver<ChatEvent>,
    final_rx: oneshot::Receiver<Result<ChatMessage, ClientError>>,
    abort_handle: AbortHandle,
    aborted: watch::Receiver<bool>,
    state_rx: watch::Receiver<SessionState>,
    trace_rx: Option<oneshot::Receiver<String>>,
    saw_terminal: bool,
}

impl ChatStream {
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort_handle.clone()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    /// Takes the receiver for the trace id announced by the server.
    ///
    /// Resolves at most once per stream; errors if the stream ends without one.
    pub fn take_trace_id(&mut self) -> Option<oneshot::Receiver<String>> {
        self.trace_rx.take()
    }

    /// Waits for the next event. Returns `None` once the stream task is done.
    ///
    /// After [`AbortHandle::abort`], snapshots still queued are discarded and
    /// only the terminal event is returned.
    pub async fn next_event(&mut self) -> Option<ChatEvent> {
        loop {
            let event = self.rx.recv().await;
            match &event {
                Some(ChatEvent::Snapshot { .. }) if *self.aborted.borrow() => continue,
                Some(ChatEvent::Completed { .. } | ChatEvent::Error { .. }) => {
                    self.saw_terminal = true;
                }
                _ => {}
            }
            return event;
        }
    }

    /// Drains remaining events and returns the terminal result.
    pub async fn finish(mut self) -> Result<ChatMessage, ClientError> {
        while !self.saw_terminal {
            match self.rx.recv().await {
                Some(ChatEvent::Completed { .. } | ChatEvent::Error { .. }) => {
                    self.saw_terminal = true;
                }
                Some(_) => {}
                None => break,
            }
        }

        match self.final_rx.await {
            Ok(result) => result,
            Err(_) => Err(ClientError::protocol(
                "chat stream task ended without final result",
            )),
        }
    }
}

struct TaskChannels {
    events: mpsc::Sender<ChatEvent>,
    final_tx: Option<oneshot::Sender<Result<ChatMessage, ClientError>>>,
    state: watch::Sender<SessionState>,
    trace: Option<oneshot::Sender<String>>,
}

impl TaskChannels {
    async fn emit(&self, event: ChatEvent) -> bool {
        self.events.send(event).await.is_ok()
    }

    fn report_trace_id(&mut self, trace_id: &str) {
        if let Some(tx) = self.trace.take() {
            debug!(event = "chat.trace_id", domain = "chat", trace_id = %trace_id);
            let _ = tx.send(trace_id.to_string());
        }
    }

    async fn complete(mut self, message: ChatMessage) {
        self.state.send_replace(SessionState::Complete);
        let sent = self
            .emit(ChatEvent::Completed {
                message: message.clone(),
            })
            .await;
        if let Some(final_tx) = self.final_tx.take() {
            let _ = final_tx.send(if sent {
                Ok(message)
            } else {
                Err(ClientError::protocol(
                    "chat stream receiver dropped before completion",
                ))
            });
        }
    }

    async fn fail(mut self, error: ClientError) {
        let state = if error == ClientError::Cancelled {
            SessionState::Cancelled
        } else {
            SessionState::Errored
        };
        self.state.send_replace(state);
        let _ = self
            .emit(ChatEvent::Error {
                error: error.clone(),
            })
            .await;
        if let Some(final_tx) = self.final_tx.take() {
            let _ = final_tx.send(Err(error));
        }
    }
}

async fn wait_for_abort(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            // Every abort handle is gone; cancellation can no longer happen.
            std::future::pending::<()>().await;
        }
    }
}

async fn stream_task(
    transport: Arc<dyn ChatTransport>,
    request: ChatRequest,
    mut channels: TaskChannels,
    mut abort_rx: watch::Receiver<bool>,
) {
    let agent_id = request.agent_id.clone();
    channels.state.send_replace(SessionState::Streaming);
    debug!(event = "chat.stream_opening", domain = "chat", agent_id = %agent_id, messages = request.messages.len() as u64);

    let opened = tokio::select! {
        biased;
        _ = wait_for_abort(&mut abort_rx) => {
            info!(event = "chat.cancelled", domain = "chat", agent_id = %agent_id, stage = "open");
            channels.fail(ClientError::Cancelled).await;
            return;
        }
        opened = transport.open_stream(request) => opened,
        _ = channels.events.closed() => {
            debug!(event = "chat.receiver_dropped", domain = "chat", agent_id = %agent_id, stage = "open");
            return;
        }
    };
    let mut body = match opened {
        Ok(body) => body,
        Err(err) => {
            info!(event = "chat.stream_failed", domain = "chat", agent_id = %agent_id, status = ?err.status_code(), error = %err);
            channels.fail(err).await;
            return;
        }
    };

    let mut decoder = LineDecoder::default();
    let mut builder = ResponseBuilder::new();
    let mut seq = 0_u64;
    loop {
        tokio::select! {
            biased;
            _ = wait_for_abort(&mut abort_rx) => {
                drop(body);
                info!(event = "chat.cancelled", domain = "chat", agent_id = %agent_id, stage = "streaming", snapshots = seq);
                channels.fail(ClientError::Cancelled).await;
                return;
            }
            _ = channels.events.closed() => {
                drop(body);
                debug!(event = "chat.receiver_dropped", domain = "chat", agent_id = %agent_id, stage = "streaming", snapshots = seq);
                return;
            }
            next = body.next() => {
                match next {
                    Some(Ok(chunk)) => {
                        let events = decoder.push_chunk(&chunk);
                        let done = fold_events(&mut builder, &mut channels, &events);
                        if !channels.emit(ChatEvent::Snapshot { seq, message: builder.snapshot() }).await {
                            debug!(event = "chat.receiver_dropped", domain = "chat", agent_id = %agent_id);
                            return;
                        }
                        seq = seq.saturating_add(1);
                        if done {
                            debug!(event = "chat.done_marker", domain = "chat", agent_id = %agent_id, snapshots = seq);
                            drop(body);
                            channels.complete(builder.snapshot()).await;
                            return;
                        }
                    }
                    Some(Err(err)) => {
                        info!(event = "chat.stream_failed", domain = "chat", agent_id = %agent_id, snapshots = seq, error = %err);
                        channels.fail(err).await;
                        return;
                    }
                    None => {
                        let rest = decoder.finish();
                        if !rest.is_empty() {
                            fold_events(&mut builder, &mut channels, &rest);
                            if !channels.emit(ChatEvent::Snapshot { seq, message: builder.snapshot() }).await {
                                return;
                            }
                            seq = seq.saturating_add(1);
                        }
                        debug!(event = "chat.stream_closed", domain = "chat", agent_id = %agent_id, snapshots = seq);
                        channels.complete(builder.snapshot()).await;
                        return;
                    }
                }
            }
        }
    }
}

/// Folds events up to the first `Done`. Returns true when `Done` was seen.
fn fold_events(
    builder: &mut ResponseBuilder,
    channels: &mut TaskChannels,
    events: &[WireEvent],
) -> bool {
    for event in events {
        match event {
            WireEvent::Done => return true,
            WireEvent::TraceId(trace_id) => channels.report_trace_id(trace_id),
            other => {
                builder.apply(other);
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{ContentPart, Role};
    use futures::stream;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    enum FakeBehavior {
        Chunks(Vec<Result<&'static [u8], ClientError>>),
        ChunksThenPending(Vec<&'static str>),
        /// Pending body that raises the flag when it is dropped.
        GuardedPending(Arc<AtomicBool>),
        Status(u16),
    }

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    struct FakeTransport {
        behavior: FakeBehavior,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl FakeTransport {
        fn new(behavior: FakeBehavior) -> Arc<Self> {
            Arc::new(Self {
                behavior,
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait::async_trait]
    impl ChatTransport for FakeTransport {
        async fn open_stream(&self, request: ChatRequest) -> Result<ByteStream, ClientError> {
            self.requests.lock().expect("lock").push(request);
            match &self.behavior {
                FakeBehavior::Chunks(chunks) => {
                    let items: Vec<_> = chunks
                        .iter()
                        .map(|c| c.clone().map(bytes::Bytes::from_static))
                        .collect();
                    Ok(Box::pin(stream::iter(items)))
                }
                FakeBehavior::ChunksThenPending(chunks) => {
                    let items: Vec<Result<bytes::Bytes, ClientError>> = chunks
                        .iter()
                        .map(|c| Ok(bytes::Bytes::from_static(c.as_bytes())))
                        .collect();
                    Ok(Box::pin(stream::iter(items).chain(stream::pending())))
                }
                FakeBehavior::GuardedPending(flag) => {
                    let guard = DropFlag(flag.clone());
                    let first: Result<bytes::Bytes, ClientError> = Ok(bytes::Bytes::from_static(
                        b"{\"type\":\"text-delta\",\"payload\":{\"text\":\"hi\"}}\n",
                    ));
                    Ok(Box::pin(stream::iter(vec![first]).chain(
                        stream::pending().map(move |chunk| {
                            let _held = &guard;
                            chunk
                        }),
                    )))
                }
                FakeBehavior::Status(status) => Err(ClientError::http_status(
                    *status,
                    format!("agent stream failed with status {status}"),
                )),
            }
        }
    }

    fn session(transport: Arc<FakeTransport>) -> ChatSession {
        ChatSession::new(transport, "weatherAgent")
    }

    fn bytes_of(chunk: &'static str) -> Result<&'static [u8], ClientError> {
        Ok(chunk.as_bytes())
    }

    async fn drain(stream: &mut ChatStream) -> Vec<ChatEvent> {
        let mut events = Vec::new();
        while let Some(event) = stream.next_event().await {
            let terminal = matches!(event, ChatEvent::Completed { .. } | ChatEvent::Error { .. });
            events.push(event);
            if terminal {
                break;
            }
        }
        events
    }

    #[tokio::test]
    async fn emits_snapshot_per_chunk_and_completes_on_done() {
        let transport = FakeTransport::new(FakeBehavior::Chunks(vec![
            bytes_of("data: {\"type\":\"text-delta\",\"payload\":{\"text\":\"Hi\"}}\n\n"),
            bytes_of("data: {\"type\":\"text-delta\",\"payload\":{\"text\":\" there\"}}\n\n"),
            bytes_of("data: [DONE]\n\n"),
            bytes_of("data: {\"type\":\"text-delta\",\"payload\":{\"text\":\"ignored\"}}\n\n"),
        ]));
        let mut stream = session(transport)
            .start_stream(&[ChatMessage::user("weather?")])
            .await
            .expect("start");

        let events = drain(&mut stream).await;
        let seqs: Vec<u64> = events
            .iter()
            .filter_map(|e| match e {
                ChatEvent::Snapshot { seq, .. } => Some(*seq),
                _ => None,
            })
            .collect();
        assert_eq!(seqs, vec![0, 1, 2]);
        match &events[1] {
            ChatEvent::Snapshot { message, .. } => assert_eq!(message.text(), "Hi there"),
            other => panic!("expected snapshot, got {other:?}"),
        }
        assert!(matches!(events.last(), Some(ChatEvent::Completed { .. })));
        assert_eq!(stream.state(), SessionState::Complete);
        let message = stream.finish().await.expect("finish");
        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.content, vec![ContentPart::text("Hi there")]);
    }

    #[tokio::test]
    async fn request_carries_flattened_history() {
        let transport = FakeTransport::new(FakeBehavior::Chunks(vec![bytes_of("data: [DONE]\n")]));
        let history = vec![
            ChatMessage::user("hello"),
            ChatMessage::new(
                Role::Assistant,
                vec![
                    ContentPart::text("a"),
                    ContentPart::ToolInvocation(crate::ToolInvocation::new(
                        "c1",
                        "weather",
                        serde_json::json!({}),
                    )),
                    ContentPart::text("b"),
                ],
            ),
        ];
        let message = session(transport.clone())
            .collect(&history)
            .await
            .expect("collect");
        assert_eq!(message.content, vec![ContentPart::text("")]);

        let requests = transport.requests.lock().expect("lock");
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].agent_id, "weatherAgent");
        assert_eq!(requests[0].messages[1].content, "a\nb");
        assert_eq!(
            serde_json::to_value(&requests[0]).expect("json"),
            serde_json::json!({"messages":[
                {"role":"user","content":"hello"},
                {"role":"assistant","content":"a\nb"}
            ]})
        );
    }

    #[tokio::test]
    async fn trace_id_is_reported_once() {
        let transport = FakeTransport::new(FakeBehavior::Chunks(vec![
            bytes_of("data: {\"type\":\"trace-id\",\"traceId\":\"first\"}\n"),
            bytes_of("data: {\"type\":\"trace-id\",\"traceId\":\"second\"}\n"),
        ]));
        let mut stream = session(transport)
            .start_stream(&[ChatMessage::user("hi")])
            .await
            .expect("start");
        let trace_rx = stream.take_trace_id().expect("receiver");
        assert!(stream.take_trace_id().is_none());
        stream.finish().await.expect("finish");
        assert_eq!(trace_rx.await.expect("trace id"), "first");
    }

    #[tokio::test]
    async fn non_success_status_is_hard_failure_without_snapshots() {
        let transport = FakeTransport::new(FakeBehavior::Status(502));
        let mut stream = session(transport)
            .start_stream(&[ChatMessage::user("hi")])
            .await
            .expect("start");
        let events = drain(&mut stream).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            ChatEvent::Error { error } if error.status_code() == Some(502)
        ));
        assert_eq!(stream.state(), SessionState::Errored);
        let err = stream.finish().await.expect_err("should fail");
        assert_eq!(err.status_code(), Some(502));
    }

    #[tokio::test]
    async fn mid_stream_drop_keeps_emitted_snapshots() {
        let transport = FakeTransport::new(FakeBehavior::Chunks(vec![
            bytes_of("{\"type\":\"text-delta\",\"payload\":{\"text\":\"partial\"}}\n"),
            Err(ClientError::transport("connection reset")),
        ]));
        let mut stream = session(transport)
            .start_stream(&[ChatMessage::user("hi")])
            .await
            .expect("start");
        let events = drain(&mut stream).await;
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[0],
            ChatEvent::Snapshot { message, .. } if message.text() == "partial"
        ));
        assert!(matches!(
            &events[1],
            ChatEvent::Error { error } if error.is_transport()
        ));
        assert!(stream.finish().await.is_err());
    }

    #[tokio::test]
    async fn cancellation_stops_snapshots() {
        let transport = FakeTransport::new(FakeBehavior::ChunksThenPending(vec![
            "{\"type\":\"text-delta\",\"payload\":{\"text\":\"one\"}}\n",
        ]));
        let mut stream = session(transport)
            .start_stream(&[ChatMessage::user("hi")])
            .await
            .expect("start");
        let abort = stream.abort_handle();
        let first = stream.next_event().await.expect("first snapshot");
        assert!(matches!(first, ChatEvent::Snapshot { seq: 0, .. }));
        abort.abort();

        let rest = drain(&mut stream).await;
        assert_eq!(
            rest,
            vec![ChatEvent::Error {
                error: ClientError::Cancelled
            }]
        );
        assert_eq!(stream.state(), SessionState::Cancelled);
        assert_eq!(stream.finish().await, Err(ClientError::Cancelled));
    }

    #[tokio::test]
    async fn abort_discards_snapshots_already_queued() {
        let transport = FakeTransport::new(FakeBehavior::ChunksThenPending(vec![
            "{\"type\":\"text-delta\",\"payload\":{\"text\":\"a\"}}\n",
            "{\"type\":\"text-delta\",\"payload\":{\"text\":\"b\"}}\n",
            "{\"type\":\"text-delta\",\"payload\":{\"text\":\"c\"}}\n",
        ]));
        let mut stream = session(transport)
            .start_stream(&[ChatMessage::user("hi")])
            .await
            .expect("start");
        // let the task queue its snapshots before cancelling
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        stream.abort_handle().abort();

        let events = drain(&mut stream).await;
        assert_eq!(
            events,
            vec![ChatEvent::Error {
                error: ClientError::Cancelled
            }]
        );
        assert_eq!(stream.state(), SessionState::Cancelled);
    }

    #[tokio::test]
    async fn dropping_the_stream_releases_the_response_body() {
        let dropped = Arc::new(AtomicBool::new(false));
        let transport = FakeTransport::new(FakeBehavior::GuardedPending(dropped.clone()));
        let mut stream = session(transport)
            .start_stream(&[ChatMessage::user("hi")])
            .await
            .expect("start");
        assert!(matches!(
            stream.next_event().await,
            Some(ChatEvent::Snapshot { .. })
        ));
        assert!(!dropped.load(Ordering::SeqCst));

        drop(stream);
        tokio::time::timeout(std::time::Duration::from_secs(1), async {
            while !dropped.load(Ordering::SeqCst) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("body should be dropped once the stream handle is gone");
    }

    #[tokio::test]
    async fn close_without_done_flushes_trailing_line() {
        let transport = FakeTransport::new(FakeBehavior::Chunks(vec![
            bytes_of("{\"type\":\"text-delta\",\"payload\":{\"text\":\"a\"}}\n{\"type\":\"text-"),
            bytes_of("delta\",\"payload\":{\"text\":\"b\"}}"),
        ]));
        let message = session(transport)
            .collect(&[ChatMessage::user("hi")])
            .await
            .expect("collect");
        assert_eq!(message.text(), "ab");
    }

    #[tokio::test]
    async fn rejects_empty_history() {
        let transport = FakeTransport::new(FakeBehavior::Chunks(vec![]));
        let err = session(transport).start_stream(&[]).await;
        assert!(matches!(err, Err(ClientError::Validation(msg)) if msg.contains("at least one")));
    }
}
