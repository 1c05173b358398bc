use std::collections::HashMap;

use crate::content::{ChatMessage, ContentPart, Role, ToolInvocation};
use crate::protocol::WireEvent;

/// Folds wire events into one growing assistant message.
///
/// Text deltas are appended; tool calls are merged by id in first-seen order;
/// tool results attach to an existing call (last write wins) and are dropped
/// when the id is unknown. The final snapshot depends only on the event
/// sequence, never on how it was split into chunks.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResponseBuilder {
    text: String,
    invocations: Vec<ToolInvocation>,
    index: HashMap<String, usize>,
}

impl ResponseBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pure form of [`ResponseBuilder::apply`].
    pub fn fold(mut self, event: &WireEvent) -> Self {
        self.apply(event);
        self
    }

    /// Applies one event. Returns true when the visible content changed.
    pub fn apply(&mut self, event: &WireEvent) -> bool {
        match event {
            WireEvent::TextDelta(delta) => {
                self.text.push_str(delta);
                !delta.is_empty()
            }
            WireEvent::ToolCall { id, name, args } => {
                if self.index.contains_key(id) {
                    return false;
                }
                self.index.insert(id.clone(), self.invocations.len());
                self.invocations
                    .push(ToolInvocation::new(id.clone(), name.clone(), args.clone()));
                true
            }
            WireEvent::ToolResult { id, result } => match self.index.get(id) {
                Some(&pos) => {
                    self.invocations[pos].result = Some(result.clone());
                    true
                }
                None => false,
            },
            WireEvent::TraceId(_) | WireEvent::Done | WireEvent::Unrecognized(_) => false,
        }
    }

    /// Applies a batch of events in order.
    pub fn apply_all<'a>(&mut self, events: impl IntoIterator<Item = &'a WireEvent>) -> bool {
        let mut changed = false;
        for event in events {
            changed |= self.apply(event);
        }
        changed
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn invocations(&self) -> &[ToolInvocation] {
        &self.invocations
    }

    /// Immutable view of the current message.
    ///
    /// Text first (when non-empty), then one part per tool invocation. An
    /// empty builder yields a single empty text part.
    pub fn snapshot(&self) -> ChatMessage {
        let mut content = Vec::with_capacity(self.invocations.len() + 1);
        if !self.text.is_empty() {
            content.push(ContentPart::text(self.text.clone()));
        }
        content.extend(
            self.invocations
                .iter()
                .cloned()
                .map(ContentPart::ToolInvocation),
        );
        if content.is_empty() {
            content.push(ContentPart::text(""));
        }
        ChatMessage::new(Role::Assistant, content)
    }
}
