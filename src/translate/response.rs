//! Translate Anthropic Messages responses into the canonical format, and
//! canonical responses back into the Anthropic shape for the compatible
//! endpoint.

use super::anthropic_types::{AnthropicUsage, ContentBlock, MessagesResponse};
use crate::types::{AssistantMessage, ChatChoice, ChatResponse, Usage};

/// Translate an Anthropic Messages response into a canonical chat response.
/// Pure function; `request_model` is what the caller originally asked for.
#[must_use]
pub fn messages_to_chat(resp: &MessagesResponse, request_model: &str) -> ChatResponse {
    let finish_reason = resp
        .stop_reason
        .as_deref()
        .map(stop_reason_to_finish)
        .unwrap_or("stop");

    ChatResponse {
        id: format!("chatcmpl-{}", resp.id.trim_start_matches("msg_")),
        object: "chat.completion".to_string(),
        created: chrono::Utc::now().timestamp(),
        model: request_model.to_string(),
        choices: vec![ChatChoice {
            index: 0,
            message: AssistantMessage {
                role: "assistant".to_string(),
                content: Some(resp.text()),
            },
            finish_reason: Some(finish_reason.to_string()),
        }],
        usage: Usage::new(resp.usage.input_tokens, resp.usage.output_tokens),
    }
}

/// Re-encode a canonical chat response into the Anthropic Messages shape.
/// Used by the Anthropic-compatible endpoint, which reuses the same adapter
/// but emits the native response format.
#[must_use]
pub fn chat_to_messages_response(resp: &ChatResponse) -> MessagesResponse {
    let choice = resp.choices.first();

    let text = choice
        .and_then(|c| c.message.content.clone())
        .unwrap_or_default();

    let stop_reason = choice
        .and_then(|c| c.finish_reason.as_deref())
        .map(finish_to_stop_reason)
        .unwrap_or("end_turn");

    MessagesResponse {
        id: format!("msg_{}", resp.id.trim_start_matches("chatcmpl-")),
        response_type: "message".to_string(),
        role: "assistant".to_string(),
        content: vec![ContentBlock::Text { text }],
        model: resp.model.clone(),
        stop_reason: Some(stop_reason.to_string()),
        stop_sequence: None,
        usage: AnthropicUsage {
            input_tokens: resp.usage.prompt_tokens,
            output_tokens: resp.usage.completion_tokens,
        },
    }
}

/// Map an Anthropic stop_reason to a canonical finish_reason.
#[must_use]
pub fn stop_reason_to_finish(reason: &str) -> &'static str {
    match reason {
        "max_tokens" => "length",
        "refusal" => "content_filter",
        _ => "stop",
    }
}

/// Map a canonical finish_reason to an Anthropic stop_reason.
#[must_use]
pub fn finish_to_stop_reason(reason: &str) -> &'static str {
    match reason {
        "length" => "max_tokens",
        _ => "end_turn",
    }
}
