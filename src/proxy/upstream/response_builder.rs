// Parsed upstream content → Anthropic message / pseudo-stream events
//
// Upstream never streams to us, so the "stream" is synthesized after the
// full response is parsed: a fixed event sequence indistinguishable to
// stream consumers.

use serde_json::{json, Value};

use super::parsers::{ParsedResponse, ToolCall};

/// One server-sent event of the pseudo-stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEvent {
    pub event: &'static str,
    pub data: Value,
}

impl StreamEvent {
    fn new(event: &'static str, data: Value) -> Self {
        Self { event, data }
    }

    /// SSE wire form.
    pub fn to_sse(&self) -> String {
        format!(
            "event: {}\ndata: {}\n\n",
            self.event,
            serde_json::to_string(&self.data).unwrap_or_default()
        )
    }
}

fn new_message_id() -> String {
    format!(
        "msg_{}",
        &uuid::Uuid::new_v4().simple().to_string()[..24]
    )
}

/// `ceil(total chars / 4)` over everything the model produced.
fn estimate_output_tokens(parsed: &ParsedResponse) -> u64 {
    let total: usize = parsed.response_text.len()
        + parsed
            .tool_calls
            .iter()
            .map(|c| c.arguments.len())
            .sum::<usize>();
    (total as u64).div_ceil(4)
}

fn stop_reason(parsed: &ParsedResponse) -> &'static str {
    if parsed.tool_calls.is_empty() {
        "end_turn"
    } else {
        "tool_use"
    }
}

/// Non-streaming Anthropic message object.
pub fn build_message(parsed: &ParsedResponse, model: &str) -> Value {
    let mut content: Vec<Value> = Vec::new();

    if parsed.tool_calls.is_empty() {
        content.push(json!({
            "type": "text",
            "text": parsed.response_text,
        }));
    } else {
        for call in &parsed.tool_calls {
            // input is the arguments string fed through as-is, parseable
            // or not; stream consumers see the same string as partial_json.
            content.push(json!({
                "type": "tool_use",
                "id": call.id,
                "name": call.name,
                "input": call.arguments.clone(),
            }));
        }
    }

    json!({
        "id": new_message_id(),
        "type": "message",
        "role": "assistant",
        "model": model,
        "content": content,
        "stop_reason": stop_reason(parsed),
        "stop_sequence": null,
        "usage": {
            "input_tokens": 0,
            "output_tokens": estimate_output_tokens(parsed),
        },
    })
}

/// The full pseudo-stream, in its fixed order: message_start, one block
/// per tool call, one text block when text exists, message_delta,
/// message_stop.
pub fn build_stream_events(parsed: &ParsedResponse, model: &str) -> Vec<StreamEvent> {
    let mut events = Vec::new();

    events.push(StreamEvent::new(
        "message_start",
        json!({
            "type": "message_start",
            "message": {
                "id": new_message_id(),
                "type": "message",
                "role": "assistant",
                "content": [],
                "model": model,
                "stop_reason": null,
                "stop_sequence": null,
                "usage": { "input_tokens": 0, "output_tokens": 0 },
            },
        }),
    ));

    let mut index = 0usize;

    for call in &parsed.tool_calls {
        events.push(StreamEvent::new(
            "content_block_start",
            json!({
                "type": "content_block_start",
                "index": index,
                "content_block": {
                    "type": "tool_use",
                    "id": call.id,
                    "name": call.name,
                    "input": {},
                },
            }),
        ));
        events.push(StreamEvent::new(
            "content_block_delta",
            json!({
                "type": "content_block_delta",
                "index": index,
                "delta": {
                    "type": "input_json_delta",
                    "partial_json": call.arguments,
                },
            }),
        ));
        events.push(StreamEvent::new(
            "content_block_stop",
            json!({ "type": "content_block_stop", "index": index }),
        ));
        index += 1;
    }

    if !parsed.response_text.is_empty() {
        events.push(StreamEvent::new(
            "content_block_start",
            json!({
                "type": "content_block_start",
                "index": index,
                "content_block": { "type": "text", "text": "" },
            }),
        ));
        events.push(StreamEvent::new(
            "content_block_delta",
            json!({
                "type": "content_block_delta",
                "index": index,
                "delta": { "type": "text_delta", "text": parsed.response_text },
            }),
        ));
        events.push(StreamEvent::new(
            "content_block_stop",
            json!({ "type": "content_block_stop", "index": index }),
        ));
    }

    events.push(StreamEvent::new(
        "message_delta",
        json!({
            "type": "message_delta",
            "delta": {
                "stop_reason": stop_reason(parsed),
                "stop_sequence": null,
            },
            "usage": { "output_tokens": estimate_output_tokens(parsed) },
        }),
    ));
    events.push(StreamEvent::new(
        "message_stop",
        json!({ "type": "message_stop" }),
    ));

    events
}
