//! Translate canonical chat requests into Anthropic Messages requests.
//!
//! The canonical message list is split into an optional leading `system`
//! string plus the non-system conversation, because the upstream schema
//! models system instructions as a top-level field rather than a message
//! role.

use super::anthropic_types::{MessagesRequest, WireMessage};
use crate::types::{ChatRequest, Role};

/// Upstream requires a positive `max_tokens` and has no implicit default.
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Pure function: canonical request in, Anthropic wire request out.
/// Sampling parameters are clamped to their valid ranges.
#[must_use]
pub fn chat_to_messages(req: &ChatRequest) -> MessagesRequest {
    let mut system_parts: Vec<&str> = Vec::new();
    let mut messages = Vec::new();

    for msg in &req.messages {
        match msg.role {
            Role::System => system_parts.push(&msg.content),
            Role::User => messages.push(WireMessage {
                role: "user".to_string(),
                content: msg.content.clone(),
            }),
            Role::Assistant => messages.push(WireMessage {
                role: "assistant".to_string(),
                content: msg.content.clone(),
            }),
        }
    }

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n"))
    };

    let params = req.sampling();

    MessagesRequest {
        model: req.model.clone(),
        max_tokens: req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        messages,
        system,
        stream: req.stream.then_some(true),
        temperature: params.temperature,
        top_p: params.top_p,
    }
}
