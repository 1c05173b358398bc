//! Line decoder for the agent stream wire protocol.
//!
//! One event per line, optionally prefixed with `data:`:
//!
//! ```text
//! data: {"type":"trace-id","traceId":"abc"}
//! data: {"type":"text-delta","payload":{"text":"Hi"}}
//! data: {"type":"tool-call","payload":{"toolCallId":"c1","toolName":"weather","args":{}}}
//! data: {"type":"tool-result","payload":{"toolCallId":"c1","result":{"temp":3}}}
//! data: [DONE]
//! ```
use serde::Deserialize;
use tracing::trace;

const DATA_PREFIX: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";

/// One decoded unit of the stream.
#[derive(Clone, Debug, PartialEq)]
pub enum WireEvent {
    TextDelta(String),
    ToolCall {
        id: String,
        name: String,
        args: serde_json::Value,
    },
    ToolResult {
        id: String,
        result: serde_json::Value,
    },
    TraceId(String),
    Done,
    /// Unknown `type`, or a line that is not the expected JSON shape.
    Unrecognized(String),
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum WireRecord {
    TraceId {
        #[serde(rename = "traceId")]
        trace_id: String,
    },
    TextDelta {
        payload: TextDeltaPayload,
    },
    ToolCall {
        payload: ToolCallPayload,
    },
    ToolResult {
        payload: ToolResultPayload,
    },
}

#[derive(Deserialize)]
struct TextDeltaPayload {
    text: String,
}

/// Both spellings of each field may appear together; the first non-empty
/// one wins. `null` counts as absent.
#[derive(Deserialize)]
struct ToolCallPayload {
    #[serde(default, rename = "toolCallId")]
    tool_call_id: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default, rename = "toolName")]
    tool_name: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    args: Option<serde_json::Value>,
    #[serde(default)]
    input: Option<serde_json::Value>,
}

impl ToolCallPayload {
    fn call_id(&mut self) -> Option<String> {
        first_non_empty(self.tool_call_id.take(), self.id.take())
    }

    fn tool_name(&mut self) -> Option<String> {
        first_non_empty(self.tool_name.take(), self.name.take())
    }

    fn args(&mut self) -> serde_json::Value {
        self.args
            .take()
            .or_else(|| self.input.take())
            .unwrap_or_else(empty_args)
    }
}

fn first_non_empty(primary: Option<String>, fallback: Option<String>) -> Option<String> {
    primary
        .filter(|v| !v.is_empty())
        .or_else(|| fallback.filter(|v| !v.is_empty()))
}

#[derive(Deserialize)]
struct ToolResultPayload {
    #[serde(rename = "toolCallId")]
    tool_call_id: String,
    #[serde(default)]
    result: serde_json::Value,
}

fn empty_args() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// Splits raw chunks into lines and classifies each line as a [`WireEvent`].
///
/// Incomplete trailing input is buffered until the next chunk. The only other
/// state is the counter used to synthesize ids for tool calls that arrive
/// without one.
pub struct LineDecoder {
    buf: Vec<u8>,
    id_prefix: String,
    synthesized: u64,
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::with_id_prefix(format!("call-{}", uuid::Uuid::new_v4().simple()))
    }
}

impl LineDecoder {
    /// Creates a decoder whose synthesized tool-call ids are `<prefix>-<n>`.
    pub fn with_id_prefix(prefix: impl Into<String>) -> Self {
        Self {
            buf: Vec::new(),
            id_prefix: prefix.into(),
            synthesized: 0,
        }
    }

    /// Appends a chunk and returns events for every line it completes.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<WireEvent> {
        self.buf.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(idx) = self.buf.iter().position(|b| *b == b'\n') {
            let line = self.buf[..idx].to_vec();
            self.buf.drain(..=idx);
            if let Some(event) = self.decode_bytes(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Decodes whatever is left in the buffer as a final line.
    ///
    /// Used when the transport closes without a trailing newline.
    pub fn finish(&mut self) -> Vec<WireEvent> {
        let rest = std::mem::take(&mut self.buf);
        self.decode_bytes(&rest).into_iter().collect()
    }

    /// Returns true when a partial line is waiting for more input.
    pub fn has_pending(&self) -> bool {
        !self.buf.is_empty()
    }

    fn decode_bytes(&mut self, bytes: &[u8]) -> Option<WireEvent> {
        let text = String::from_utf8_lossy(bytes);
        self.decode_line(text.trim_end_matches('\r'))
    }

    /// Classifies one complete line. Blank lines yield `None`.
    pub fn decode_line(&mut self, line: &str) -> Option<WireEvent> {
        let payload = strip_transport_prefix(line);
        if payload.trim().is_empty() {
            return None;
        }
        if payload.trim() == DONE_SENTINEL {
            return Some(WireEvent::Done);
        }
        let record = match serde_json::from_str::<WireRecord>(payload) {
            Ok(record) => record,
            Err(err) => {
                trace!(event = "wire.unrecognized", domain = "protocol", error = %err, line_len = line.len() as u64);
                return Some(WireEvent::Unrecognized(line.to_string()));
            }
        };
        Some(match record {
            WireRecord::TraceId { trace_id } => WireEvent::TraceId(trace_id),
            WireRecord::TextDelta { payload } => WireEvent::TextDelta(payload.text),
            WireRecord::ToolCall { mut payload } => {
                let Some(name) = payload.tool_name() else {
                    trace!(event = "wire.unrecognized", domain = "protocol", reason = "tool call without name");
                    return Some(WireEvent::Unrecognized(line.to_string()));
                };
                WireEvent::ToolCall {
                    id: payload
                        .call_id()
                        .unwrap_or_else(|| self.next_synthetic_id()),
                    name,
                    args: payload.args(),
                }
            }
            WireRecord::ToolResult { payload } => WireEvent::ToolResult {
                id: payload.tool_call_id,
                result: payload.result,
            },
        })
    }

    fn next_synthetic_id(&mut self) -> String {
        self.synthesized += 1;
        format!("{}-{}", self.id_prefix, self.synthesized)
    }
}

fn strip_transport_prefix(line: &str) -> &str {
    match line.strip_prefix(DATA_PREFIX) {
        Some(rest) => rest.strip_prefix(' ').unwrap_or(rest),
        None => line,
    }
}
