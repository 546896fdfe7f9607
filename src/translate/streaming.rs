//! State machines for translating streaming events in both directions.
//!
//! [`MessagesDecoder`] consumes named Anthropic SSE events and emits
//! canonical chat chunks; the Claude adapter drives it from the upstream
//! byte stream. [`MessagesEncoder`] goes the other way, re-encoding
//! canonical chunks as Anthropic stream events for the compatible endpoint.
//! Both guarantee proper termination even when their input ends abruptly.

use super::anthropic_types::{
    AnthropicUsage, ContentBlock, ContentBlockDeltaEvent, Delta, DeltaUsage, MessageDeltaBody,
    MessageDeltaEvent, MessageStartEvent, MessagesResponse, StreamEvent,
};
use super::response::stop_reason_to_finish;
use crate::types::{ChatStreamChunk, Usage};

/// Translates named Anthropic stream events into canonical chat chunks.
///
/// The upstream protocol never emits a role-bearing event first, so the
/// decoder synthesizes an initial `delta.role = "assistant"` chunk before any
/// content. Unrecognized event types are skipped without aborting the
/// stream, and [`MessagesDecoder::finish`] closes the stream with a
/// synthetic stop chunk if the upstream ended without one.
#[derive(Debug)]
pub struct MessagesDecoder {
    id: String,
    created: i64,
    model: String,
    role_sent: bool,
    finished: bool,
    input_tokens: u64,
    output_tokens: u64,
}

impl MessagesDecoder {
    #[must_use]
    pub fn new(model: &str) -> Self {
        Self {
            id: format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
            created: chrono::Utc::now().timestamp(),
            model: model.to_string(),
            role_sent: false,
            finished: false,
            input_tokens: 0,
            output_tokens: 0,
        }
    }

    /// Process one named upstream SSE event, returning zero or more chunks.
    pub fn handle_event(&mut self, event: &str, data: &str) -> Vec<ChatStreamChunk> {
        if self.finished {
            return Vec::new();
        }

        let mut chunks = Vec::new();

        if !self.role_sent {
            chunks.push(ChatStreamChunk::role(&self.id, self.created, &self.model));
            self.role_sent = true;
        }

        match event {
            "message_start" => {
                if let Ok(start) = serde_json::from_str::<MessageStartEvent>(data) {
                    self.input_tokens = start.message.usage.input_tokens;
                }
            }
            "content_block_delta" => {
                if let Ok(delta) = serde_json::from_str::<ContentBlockDeltaEvent>(data) {
                    if delta.delta.delta_type == "text_delta" {
                        if let Some(text) = delta.delta.text.filter(|t| !t.is_empty()) {
                            chunks.push(ChatStreamChunk::content(
                                &self.id,
                                self.created,
                                &self.model,
                                text,
                            ));
                        }
                    }
                }
            }
            "message_delta" => {
                if let Ok(ev) = serde_json::from_str::<MessageDeltaEvent>(data) {
                    if let Some(ref usage) = ev.usage {
                        self.output_tokens = usage.output_tokens;
                    }
                    if let Some(ref reason) = ev.delta.stop_reason {
                        chunks.push(self.terminal_chunk(stop_reason_to_finish(reason)));
                    }
                }
            }
            "message_stop" => {
                chunks.push(self.terminal_chunk("stop"));
            }
            // ping, content_block_start/stop, and anything unknown
            _ => {}
        }

        chunks
    }

    /// Call when the upstream stream ends. Returns a synthetic stop chunk if
    /// no terminal chunk was emitted, so consumers never hang waiting for
    /// completion.
    pub fn finish(&mut self) -> Option<ChatStreamChunk> {
        if self.finished {
            return None;
        }
        Some(self.terminal_chunk("stop"))
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn terminal_chunk(&mut self, reason: &str) -> ChatStreamChunk {
        self.finished = true;
        let mut chunk = ChatStreamChunk::finish(&self.id, self.created, &self.model, reason);
        if self.input_tokens > 0 || self.output_tokens > 0 {
            chunk.usage = Some(Usage::new(self.input_tokens, self.output_tokens));
        }
        chunk
    }
}

/// Re-encodes canonical chat chunks as Anthropic stream events.
///
/// Emits `message_start` on the first chunk, opens a single text content
/// block on the first content delta, and closes the stream with
/// `message_delta` + `message_stop` on the terminal chunk. `finish` flushes
/// the closing events if the input ended without a terminal chunk.
#[derive(Debug)]
pub struct MessagesEncoder {
    model: String,
    msg_id: String,
    started: bool,
    finished: bool,
    in_text_block: bool,
    input_tokens: u64,
    output_tokens: u64,
}

impl MessagesEncoder {
    #[must_use]
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            msg_id: format!("msg_{}", uuid::Uuid::new_v4().simple()),
            started: false,
            finished: false,
            in_text_block: false,
            input_tokens: 0,
            output_tokens: 0,
        }
    }

    /// Process a single canonical chunk, returning zero or more stream events.
    pub fn process_chunk(&mut self, chunk: &ChatStreamChunk) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }

        let mut events = Vec::new();

        if let Some(ref usage) = chunk.usage {
            self.input_tokens = usage.prompt_tokens;
            self.output_tokens = usage.completion_tokens;
        }

        if !self.started {
            events.push(self.message_start());
            events.push(StreamEvent::Ping);
            self.started = true;
        }

        let choice = match chunk.choices.first() {
            Some(c) => c,
            None => return events,
        };

        if let Some(text) = choice.delta.content.as_deref().filter(|t| !t.is_empty()) {
            if !self.in_text_block {
                events.push(StreamEvent::ContentBlockStart {
                    index: 0,
                    content_block: ContentBlock::Text {
                        text: String::new(),
                    },
                });
                self.in_text_block = true;
            }

            events.push(StreamEvent::ContentBlockDelta {
                index: 0,
                delta: Delta::TextDelta {
                    text: text.to_string(),
                },
            });
        }

        if let Some(ref reason) = choice.finish_reason {
            events.append(&mut self.closing_events(reason));
        }

        events
    }

    /// Flush closing events when the chunk stream ends without a terminal
    /// chunk.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }

        if !self.started {
            let mut events = vec![self.message_start()];
            events.append(&mut self.closing_events("stop"));
            return events;
        }

        self.closing_events("stop")
    }

    fn message_start(&self) -> StreamEvent {
        StreamEvent::MessageStart {
            message: MessagesResponse {
                id: self.msg_id.clone(),
                response_type: "message".to_string(),
                role: "assistant".to_string(),
                content: Vec::new(),
                model: self.model.clone(),
                stop_reason: None,
                stop_sequence: None,
                usage: AnthropicUsage {
                    input_tokens: self.input_tokens,
                    output_tokens: 0,
                },
            },
        }
    }

    fn closing_events(&mut self, finish_reason: &str) -> Vec<StreamEvent> {
        self.finished = true;

        let mut events = Vec::new();

        if self.in_text_block {
            events.push(StreamEvent::ContentBlockStop { index: 0 });
            self.in_text_block = false;
        }

        events.push(StreamEvent::MessageDelta {
            delta: MessageDeltaBody {
                stop_reason: Some(
                    super::response::finish_to_stop_reason(finish_reason).to_string(),
                ),
                stop_sequence: None,
            },
            usage: DeltaUsage {
                output_tokens: self.output_tokens,
            },
        });

        events.push(StreamEvent::MessageStop);

        events
    }
}
