// Anthropic 请求转换为 CodeWhisperer conversationState
//
// Shaping pipeline: sanitize → history cap → per-message cap → tool
// filtering → system placement → history assembly → current message →
// size enforcement.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::auth::AuthMethod;
use crate::proxy::config::KiroConfig;
use crate::proxy::mappers::claude::models::{
    ClaudeRequest, ContentBlock, Message, MessageContent, SystemPrompt, Tool,
};
use crate::proxy::upstream::model_mapping::ModelInfo;

/// Tools that survive filtering no matter what.
pub const CORE_TOOLS: &[&str] = &[
    "Read",
    "Write",
    "Edit",
    "Glob",
    "Grep",
    "Bash",
    "WebFetch",
    "WebSearch",
    "AskUserQuestion",
];

/// Non-core tools with descriptions longer than this are dropped outright.
const NON_CORE_DESC_DROP_LEN: usize = 1000;
/// Descriptions of surviving tools are clipped to this length.
const TOOL_DESC_MAX_LEN: usize = 300;

const TRUNCATION_MARKER: &str = "\n...[内容已截断]";
const REMEDIATION_MARKER: &str = "\n...[已截断]";
const REMEDIATION_TRUNC_LEN: usize = 2000;
const REMEDIATION_MIN_HISTORY: usize = 5;
const EMERGENCY_KEEP_HISTORY: usize = 3;

static SYSTEM_REMINDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<system-reminder>.*?</system-reminder>").unwrap());

const INTERRUPT_MARKER: &str = "[Request interrupted by user]";

/// Strip system-reminder blocks and interruption markers, then trim.
pub fn sanitize_text(text: &str) -> String {
    let stripped = SYSTEM_REMINDER_RE.replace_all(text, "");
    stripped.replace(INTERRUPT_MARKER, "").trim().to_string()
}

/// Character-safe truncation with a marker appended when clipping happened.
fn truncate_chars(text: &str, max_chars: usize, marker: &str) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut clipped: String = text.chars().take(max_chars).collect();
    clipped.push_str(marker);
    clipped
}

/// One inbound message reduced to the fields the upstream payload needs.
#[derive(Debug, Clone, Default)]
struct ShapedMessage {
    role: String,
    text: String,
    tool_uses: Vec<Value>,
    tool_results: Vec<Value>,
    images: Vec<Value>,
}

impl ShapedMessage {
    fn user(text: &str) -> Self {
        Self {
            role: "user".to_string(),
            text: text.to_string(),
            ..Default::default()
        }
    }
}

fn tool_result_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| item.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Kiro image format: `{"format": "png", "source": {"bytes": "<base64>"}}`.
fn image_to_kiro(source_media_type: &str, data: &str) -> Value {
    let mut media_type = source_media_type.to_string();
    let mut bytes = data.to_string();

    // Tolerate data URLs smuggled into the base64 field.
    if bytes.starts_with("data:") {
        if let Some(comma) = bytes.find(',') {
            let header = &bytes[..comma];
            let media = header
                .split(';')
                .next()
                .and_then(|m| m.strip_prefix("data:"))
                .unwrap_or("");
            if !media.is_empty() {
                media_type = media.to_string();
            }
            bytes = bytes[comma + 1..].to_string();
        }
    }

    let format = media_type.split('/').next_back().unwrap_or(&media_type);
    json!({ "format": format, "source": { "bytes": bytes } })
}

fn shape_message(msg: &Message, cfg: &KiroConfig) -> ShapedMessage {
    let mut shaped = ShapedMessage {
        role: msg.role.clone(),
        ..Default::default()
    };

    match &msg.content {
        MessageContent::String(s) => {
            shaped.text = sanitize_text(s);
        }
        MessageContent::Array(blocks) => {
            let mut parts = Vec::new();
            for block in blocks {
                match block {
                    ContentBlock::Text { text } => {
                        let clean = sanitize_text(text);
                        if !clean.is_empty() {
                            parts.push(clean);
                        }
                    }
                    ContentBlock::ToolResult {
                        tool_use_id,
                        content,
                        ..
                    } => {
                        let text = truncate_chars(
                            &sanitize_text(&tool_result_text(content)),
                            cfg.max_message_length,
                            TRUNCATION_MARKER,
                        );
                        shaped.tool_results.push(json!({
                            "content": [{ "text": text }],
                            "status": "success",
                            "toolUseId": tool_use_id,
                        }));
                    }
                    ContentBlock::ToolUse {
                        id, name, input, ..
                    } => {
                        shaped.tool_uses.push(json!({
                            "toolUseId": id,
                            "name": name,
                            "input": input,
                        }));
                    }
                    ContentBlock::Image { source, .. } => {
                        shaped
                            .images
                            .push(image_to_kiro(&source.media_type, &source.data));
                    }
                }
            }
            shaped.text = parts.join("\n");
        }
    }

    shaped
}

fn system_text(system: &Option<SystemPrompt>) -> String {
    let raw = match system {
        Some(SystemPrompt::String(s)) => s.clone(),
        Some(SystemPrompt::Array(blocks)) => blocks
            .iter()
            .map(|b| b.text.as_str())
            .collect::<Vec<_>>()
            .join("\n"),
        None => String::new(),
    };
    sanitize_text(&raw)
}

/// Filter and clip tool definitions: the core whitelist always survives,
/// over-documented non-core tools are dropped, and the result is capped.
fn build_tool_specifications(tools: &[Tool], cfg: &KiroConfig) -> Vec<Value> {
    if cfg.disable_tools {
        if !tools.is_empty() {
            info!("Tools disabled by configuration, dropping {} definition(s)", tools.len());
        }
        return Vec::new();
    }

    let (core, non_core): (Vec<&Tool>, Vec<&Tool>) = tools
        .iter()
        .partition(|t| CORE_TOOLS.contains(&t.name.as_str()));

    let mut kept: Vec<&Tool> = core;
    for tool in non_core {
        let desc_len = tool.description.as_deref().unwrap_or("").len();
        if desc_len > NON_CORE_DESC_DROP_LEN {
            debug!(
                "Dropping tool {:?}: description {} chars exceeds {}",
                tool.name, desc_len, NON_CORE_DESC_DROP_LEN
            );
            continue;
        }
        kept.push(tool);
    }

    if kept.len() > cfg.max_tools {
        info!("Capping tool definitions from {} to {}", kept.len(), cfg.max_tools);
        kept.truncate(cfg.max_tools);
    }

    kept.iter()
        .map(|tool| {
            let description = truncate_chars(
                tool.description.as_deref().unwrap_or(""),
                TOOL_DESC_MAX_LEN,
                "",
            );
            let schema = tool.input_schema.clone().unwrap_or_else(|| json!({}));
            json!({
                "toolSpecification": {
                    "name": tool.name,
                    "description": description,
                    "inputSchema": { "json": schema },
                }
            })
        })
        .collect()
}

fn history_entry(msg: &ShapedMessage, model_id: &str) -> Value {
    if msg.role == "assistant" {
        let content = if msg.text.is_empty() { "(empty)" } else { msg.text.as_str() };
        let mut assistant = json!({ "content": content });
        if !msg.tool_uses.is_empty() {
            assistant["toolUses"] = json!(msg.tool_uses);
        }
        json!({ "assistantResponseMessage": assistant })
    } else {
        let content = if msg.text.is_empty() { "(empty)" } else { msg.text.as_str() };
        let mut user_input = json!({
            "content": content,
            "modelId": model_id,
            "origin": "AI_EDITOR",
        });
        if !msg.images.is_empty() {
            user_input["images"] = json!(msg.images);
        }
        if !msg.tool_results.is_empty() {
            user_input["userInputMessageContext"] = json!({ "toolResults": msg.tool_results });
        }
        json!({ "userInputMessage": user_input })
    }
}

/// Translate a C-style chat request into the upstream payload
/// (`{"conversationState": …, "profileArn"?: …}`), then enforce the size
/// budget.
pub fn build_codewhisperer_payload(
    request: &ClaudeRequest,
    cfg: &KiroConfig,
    model: &ModelInfo,
    profile_arn: Option<&str>,
    auth_method: AuthMethod,
) -> Value {
    let mut shaped: Vec<ShapedMessage> = request
        .messages
        .iter()
        .map(|m| shape_message(m, cfg))
        .collect();

    // History cap
    if shaped.len() > cfg.max_history {
        let dropped = shaped.len() - cfg.max_history;
        shaped.drain(..dropped);
        info!("History capped: dropped {} oldest message(s)", dropped);
    }

    // Per-message cap
    for msg in &mut shaped {
        if msg.text.chars().count() > cfg.max_message_length {
            msg.text = truncate_chars(&msg.text, cfg.max_message_length, TRUNCATION_MARKER);
            debug!("Truncated {} message to {} chars", msg.role, cfg.max_message_length);
        }
    }

    let tools = match &request.tools {
        Some(tools) => build_tool_specifications(tools, cfg),
        None => Vec::new(),
    };

    // System prompt placement: prepend to the first user message, or
    // synthesize one when there is none.
    let system = system_text(&request.system);
    if !system.is_empty() {
        match shaped.iter_mut().find(|m| m.role == "user") {
            Some(first_user) => {
                first_user.text = if first_user.text.is_empty() {
                    system
                } else {
                    format!("{}\n\n{}", system, first_user.text)
                };
            }
            None => shaped.insert(0, ShapedMessage::user(&system)),
        }
    }

    // The current message must wrap a userInputMessage. An assistant-role
    // tail is pushed into history and replaced with a synthetic "Continue".
    let assistant_last = shaped.last().map(|m| m.role == "assistant").unwrap_or(false);
    let current = if shaped.is_empty() || assistant_last {
        ShapedMessage::user("Continue")
    } else {
        shaped.pop().unwrap()
    };

    let history: Vec<Value> = shaped
        .iter()
        .map(|m| history_entry(m, &model.upstream_id))
        .collect();

    let mut content = current.text;
    // "Continue" is substituted only when nothing remains at all: no text,
    // no tool results, no tool uses. userInputMessage has no toolUses slot,
    // so tool_use blocks on a trailing user message cannot be represented
    // upstream; they still count as remaining content here and are then
    // dropped.
    if content.is_empty() && current.tool_results.is_empty() && current.tool_uses.is_empty() {
        content = "Continue".to_string();
    }
    if !current.tool_uses.is_empty() {
        debug!(
            "Dropping {} unrepresentable tool_use block(s) from the current user message",
            current.tool_uses.len()
        );
    }

    let mut user_input = json!({
        "content": content,
        "modelId": model.upstream_id,
        "origin": "AI_EDITOR",
    });
    if !current.images.is_empty() {
        user_input["images"] = json!(current.images);
    }

    let mut context = Map::new();
    if !tools.is_empty() {
        context.insert("tools".to_string(), json!(tools));
    }
    if !current.tool_results.is_empty() {
        context.insert("toolResults".to_string(), json!(current.tool_results));
    }
    if !context.is_empty() {
        user_input["userInputMessageContext"] = Value::Object(context);
    }

    let mut conversation_state = json!({
        "chatTriggerType": "MANUAL",
        "conversationId": uuid::Uuid::new_v4().to_string(),
        "currentMessage": { "userInputMessage": user_input },
    });
    if !history.is_empty() {
        conversation_state["history"] = json!(history);
    }

    let mut payload = json!({ "conversationState": conversation_state });
    if auth_method == AuthMethod::Social {
        if let Some(arn) = profile_arn {
            payload["profileArn"] = json!(arn);
        }
    }

    enforce_size_budget(&mut payload, cfg);
    payload
}

fn serialized_len(payload: &Value) -> usize {
    serde_json::to_string(payload).map(|s| s.len()).unwrap_or(0)
}

fn history_mut(payload: &mut Value) -> Option<&mut Vec<Value>> {
    payload["conversationState"]
        .get_mut("history")
        .and_then(|h| h.as_array_mut())
}

/// Staged best-effort remediation when the serialized payload exceeds the
/// byte budget. Stops at the first stage that brings it under; if nothing
/// helps, the oversized payload is sent anyway and upstream may reject it.
pub fn enforce_size_budget(payload: &mut Value, cfg: &KiroConfig) {
    let budget = cfg.max_request_size;
    let mut size = serialized_len(payload);
    if size <= budget {
        return;
    }
    info!("Payload {} bytes over budget {}, remediating", size, budget);

    // Stage a: shift oldest history entries while more than the floor remain.
    loop {
        let Some(history) = history_mut(payload) else { break };
        if history.len() <= REMEDIATION_MIN_HISTORY || size <= budget {
            break;
        }
        history.remove(0);
        size = serialized_len(payload);
    }
    if size <= budget {
        debug!("Remediation: history shift got payload to {} bytes", size);
        return;
    }

    // Stage b: re-truncate history text content much harder.
    if let Some(history) = history_mut(payload) {
        for entry in history.iter_mut() {
            for key in ["userInputMessage", "assistantResponseMessage"] {
                if let Some(content) = entry.get_mut(key).and_then(|m| m.get_mut("content")) {
                    if let Some(text) = content.as_str() {
                        if text.chars().count() > REMEDIATION_TRUNC_LEN {
                            *content = json!(truncate_chars(
                                text,
                                REMEDIATION_TRUNC_LEN,
                                REMEDIATION_MARKER
                            ));
                        }
                    }
                }
            }
        }
    }
    size = serialized_len(payload);
    if size <= budget {
        debug!("Remediation: inner truncation got payload to {} bytes", size);
        return;
    }

    // Stage c: drop tool definitions from the current message.
    if let Some(context) = payload["conversationState"]["currentMessage"]["userInputMessage"]
        .get_mut("userInputMessageContext")
    {
        if context.get("tools").is_some() {
            context["tools"] = Value::Null;
        }
    }
    size = serialized_len(payload);
    if size <= budget {
        debug!("Remediation: tool removal got payload to {} bytes", size);
        return;
    }

    // Stage d: emergency — keep only the most recent history entries.
    if let Some(history) = history_mut(payload) {
        if history.len() > EMERGENCY_KEEP_HISTORY {
            let keep = history.split_off(history.len() - EMERGENCY_KEEP_HISTORY);
            *history = keep;
        }
    }
    size = serialized_len(payload);
    if size > budget {
        warn!(
            "Payload still {} bytes after all remediation (budget {}), sending anyway",
            size, budget
        );
    }
}
