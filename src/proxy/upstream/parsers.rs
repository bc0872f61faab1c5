// CodeWhisperer 事件流解析
//
// The upstream returns a concatenated binary/SSE hybrid buffer. Event
// JSON is recovered with two grammars (frame-marker first, bare `event{`
// as fallback), then tool calls are collected from structured events and
// from the bracket syntax some deployments emit inline.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, warn};

/// A tool invocation extracted from the response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// JSON-encoded argument object; kept raw when upstream sent
    /// unparseable input.
    pub arguments: String,
}

/// Final parse result handed to the response builder.
#[derive(Debug, Clone, Default)]
pub struct ParsedResponse {
    pub response_text: String,
    pub tool_calls: Vec<ToolCall>,
}

static PRIMARY_MARKER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s):message-type.{0,4}?event").unwrap());

static BRACKET_CALL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\[Called\s+(\w+)\s+with\s+args:\s*").unwrap());

static TRAILING_COMMA_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r",\s*([}\]])").unwrap());

static BARE_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([{,]\s*)([A-Za-z_][A-Za-z0-9_]*)\s*:").unwrap());

static BARE_VALUE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r":\s*([A-Za-z_][A-Za-z0-9_]*)\s*([,}\]])").unwrap());

static WS_RUN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

const NEXT_FRAME_MARKER: &str = ":event-type";

/// Shortest prefix of `slice` that starts at its first `{` and parses as a
/// JSON object. Candidates may carry trailing frame garbage, so scanning
/// stops at the first closing brace that yields valid JSON.
fn shortest_json_object(slice: &str) -> Option<Value> {
    let start = slice.find('{')?;
    let bytes = slice.as_bytes();
    for i in start..bytes.len() {
        if bytes[i] == b'}' {
            if let Ok(val) = serde_json::from_str::<Value>(&slice[start..=i]) {
                return Some(val);
            }
        }
    }
    None
}

/// Extract JSON event objects. Returns (events, primary_hits, fallback_hits).
fn extract_event_objects(text: &str) -> (Vec<Value>, usize, usize) {
    let mut events = Vec::new();
    let mut primary = 0usize;

    for m in PRIMARY_MARKER_RE.find_iter(text) {
        let start = m.end();
        let end = text[start..]
            .find(NEXT_FRAME_MARKER)
            .map(|p| start + p)
            .unwrap_or(text.len());
        if let Some(val) = shortest_json_object(&text[start..end]) {
            events.push(val);
            primary += 1;
        }
    }

    let mut fallback = 0usize;
    if events.is_empty() {
        let mut search = 0;
        while let Some(pos) = text[search..].find("event{") {
            let brace = search + pos + "event".len();
            let end = text[brace + 1..]
                .find("event{")
                .map(|p| brace + 1 + p)
                .unwrap_or(text.len());
            if let Some(val) = shortest_json_object(&text[brace..end]) {
                events.push(val);
                fallback += 1;
            }
            search = brace;
        }
    }

    (events, primary, fallback)
}

/// Replace the two-character sequence `\n` with a real newline unless the
/// backslash is itself escaped.
fn unescape_literal_newlines(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\'
            && i + 1 < bytes.len()
            && bytes[i + 1] == b'n'
            && (i == 0 || bytes[i - 1] != b'\\')
        {
            out.push(b'\n');
            i += 2;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    // Only ASCII pairs were replaced, so the bytes are still valid UTF-8.
    String::from_utf8(out).unwrap_or_else(|_| text.to_string())
}

/// Find the closing `}` for the `{` at `start`, respecting strings and
/// backslash escapes.
fn find_matching_brace(text: &str, start: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    if start >= bytes.len() || bytes[start] != b'{' {
        return None;
    }

    let mut depth: i32 = 0;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, &ch) in bytes.iter().enumerate().skip(start) {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            b'\\' if in_string => escape_next = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Conservative repair of the malformed JSON some models emit in bracket
/// calls: trailing commas, bare keys, bare identifier values.
fn repair_json_arguments(raw: &str) -> Option<Value> {
    if let Ok(val) = serde_json::from_str::<Value>(raw) {
        return Some(val);
    }

    let repaired = TRAILING_COMMA_RE.replace_all(raw, "$1");
    let repaired = BARE_KEY_RE.replace_all(&repaired, "$1\"$2\":");
    let repaired = BARE_VALUE_RE.replace_all(&repaired, |caps: &regex::Captures| {
        let ident = &caps[1];
        if matches!(ident, "true" | "false" | "null") {
            caps[0].to_string()
        } else {
            format!(": \"{}\"{}", ident, &caps[2])
        }
    });

    serde_json::from_str(&repaired).ok()
}

fn new_bracket_call_id() -> String {
    format!("call_{}", &uuid::Uuid::new_v4().simple().to_string()[..8])
}

/// Scan for `[Called <name> with args: {…}]`, returning the calls and the
/// byte span of each matched bracket expression.
fn parse_bracket_tool_calls(text: &str) -> Vec<(ToolCall, std::ops::Range<usize>)> {
    if !text.contains("[Called") && !text.contains("[called") {
        return Vec::new();
    }

    let mut results = Vec::new();
    for caps in BRACKET_CALL_RE.captures_iter(text) {
        let whole = caps.get(0).unwrap();
        let name = caps.get(1).unwrap().as_str().to_string();

        let Some(rel) = text[whole.end()..].find('{') else { continue };
        let json_start = whole.end() + rel;
        let Some(json_end) = find_matching_brace(text, json_start) else { continue };

        let raw_args = &text[json_start..=json_end];
        let Some(args) = repair_json_arguments(raw_args) else {
            warn!("Unrepairable bracket tool call for {:?}, leaving in place", name);
            continue;
        };

        // Span runs through the closing `]` when present.
        let mut span_end = json_end + 1;
        let tail = &text[span_end..];
        let skipped = tail.len() - tail.trim_start().len();
        if tail.trim_start().starts_with(']') {
            span_end += skipped + 1;
        }

        results.push((
            ToolCall {
                id: new_bracket_call_id(),
                name,
                arguments: serde_json::to_string(&args).unwrap_or_else(|_| "{}".to_string()),
            },
            whole.start()..span_end,
        ));
    }
    results
}

/// Keep the first occurrence of each `(name, arguments)` pair.
fn deduplicate_tool_calls(calls: Vec<ToolCall>) -> Vec<ToolCall> {
    let mut seen = HashSet::new();
    calls
        .into_iter()
        .filter(|c| seen.insert((c.name.clone(), c.arguments.clone())))
        .collect()
}

fn strip_spans(text: &str, spans: &[std::ops::Range<usize>]) -> String {
    let mut out = text.to_string();
    let mut sorted: Vec<_> = spans.to_vec();
    sorted.sort_by_key(|r| r.start);
    for span in sorted.into_iter().rev() {
        out.replace_range(span, "");
    }
    out
}

struct ToolUseBuilder {
    name: String,
    arguments: String,
}

/// Parse the full upstream response buffer into text plus tool calls.
pub fn parse_response_buffer(buf: &[u8]) -> ParsedResponse {
    let text = String::from_utf8_lossy(buf);
    let (events, primary, fallback) = extract_event_objects(&text);
    debug!(
        "Event extraction: {} event(s), {} via primary grammar, {} via fallback",
        events.len(),
        primary,
        fallback
    );

    let mut builders: Vec<(String, ToolUseBuilder)> = Vec::new();
    let mut text_acc = String::new();

    for event in events {
        if let Some(tool_use_id) = event.get("toolUseId").and_then(|v| v.as_str()) {
            let idx = match builders.iter().position(|(id, _)| id == tool_use_id) {
                Some(i) => i,
                None => {
                    let name = event
                        .get("name")
                        .and_then(|v| v.as_str())
                        .unwrap_or("")
                        .to_string();
                    builders.push((
                        tool_use_id.to_string(),
                        ToolUseBuilder {
                            name,
                            arguments: String::new(),
                        },
                    ));
                    builders.len() - 1
                }
            };

            match event.get("input") {
                Some(Value::String(chunk)) => builders[idx].1.arguments.push_str(chunk),
                Some(other) if !other.is_null() => {
                    // Some deployments send the input pre-parsed.
                    builders[idx]
                        .1
                        .arguments
                        .push_str(&serde_json::to_string(other).unwrap_or_default());
                }
                _ => {}
            }

            if event.get("stop").and_then(|v| v.as_bool()).unwrap_or(false)
                && serde_json::from_str::<Value>(&builders[idx].1.arguments).is_err()
            {
                warn!(
                    "Tool use {} finished with unparseable arguments, keeping raw string",
                    tool_use_id
                );
            }
            continue;
        }

        if let Some(content) = event.get("content").and_then(|v| v.as_str()) {
            // followupPrompt events echo suggestions, not assistant output
            if event.get("followupPrompt").is_some() {
                continue;
            }
            text_acc.push_str(&unescape_literal_newlines(content));
        }
    }

    let mut calls: Vec<ToolCall> = builders
        .into_iter()
        .map(|(id, b)| ToolCall {
            id,
            name: b.name,
            arguments: if b.arguments.is_empty() {
                "{}".to_string()
            } else {
                b.arguments
            },
        })
        .collect();

    // Bracket calls are scanned in the event text and again in the raw
    // buffer: some deployments emit them outside any event frame.
    let text_brackets = parse_bracket_tool_calls(&text_acc);
    let spans: Vec<_> = text_brackets.iter().map(|(_, span)| span.clone()).collect();
    calls.extend(text_brackets.into_iter().map(|(call, _)| call));
    calls.extend(
        parse_bracket_tool_calls(&text)
            .into_iter()
            .map(|(call, _)| call),
    );

    let tool_calls = deduplicate_tool_calls(calls);

    let mut response_text = strip_spans(&text_acc, &spans);
    if !spans.is_empty() {
        response_text = WS_RUN_RE.replace_all(&response_text, " ").to_string();
    }
    response_text = response_text.trim().to_string();

    ParsedResponse {
        response_text,
        tool_calls,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(buf: &str) -> ParsedResponse {
        parse_response_buffer(buf.as_bytes())
    }

    // --- event grammars ---

    #[test]
    fn test_primary_grammar_single_content_event() {
        let parsed = parse(r#"garbage:message-typeevent{"content":"hello"}trailing"#);
        assert_eq!(parsed.response_text, "hello");
        assert!(parsed.tool_calls.is_empty());
    }

    #[test]
    fn test_primary_grammar_multiple_frames() {
        let buf = concat!(
            r#":message-typeevent{"content":"one "}"#,
            r#":event-type:message-typeevent{"content":"two"}"#,
        );
        let parsed = parse(buf);
        assert_eq!(parsed.response_text, "one two");
    }

    #[test]
    fn test_primary_grammar_with_binary_padding() {
        // Real frames carry header-value bytes between the marker and "event"
        let buf = ":message-type\u{7}\u{0}\u{5}event{\"content\":\"padded\"}";
        let parsed = parse(buf);
        assert_eq!(parsed.response_text, "padded");
    }

    #[test]
    fn test_fallback_grammar_used_when_primary_absent() {
        let parsed = parse(r#"noise event{"content":"via fallback"} more noise"#);
        assert_eq!(parsed.response_text, "via fallback");
    }

    #[test]
    fn test_fallback_not_used_when_primary_matched() {
        // The bare `event{` inside the content string must not double-count.
        let parsed = parse(r#":message-typeevent{"content":"x"} event{"content":"y"}"#);
        // Primary grammar found one event; fallback therefore never ran.
        assert_eq!(parsed.response_text, "x");
    }

    #[test]
    fn test_shortest_valid_prefix_survives_trailing_garbage() {
        // Candidate extends past the event into frame trailer bytes.
        let parsed = parse(r#":message-typeevent{"content":"clean"}\x00\x01{{{"#);
        assert_eq!(parsed.response_text, "clean");
    }

    #[test]
    fn test_marker_inside_string_is_tolerated() {
        // A literal ":event-type" inside the content cuts the candidate
        // short; the event is skipped without a panic and later frames
        // still parse.
        let buf = concat!(
            r#":message-typeevent{"content":"mentions :event-type inline"}"#,
            r#":message-typeevent{"content":"still here"}"#,
        );
        let parsed = parse(buf);
        assert!(parsed.response_text.contains("still here"));
    }

    #[test]
    fn test_followup_prompt_events_are_ignored() {
        let buf = concat!(
            r#":message-typeevent{"content":"real"}"#,
            r#":event-type:message-typeevent{"content":"suggested","followupPrompt":"next?"}"#,
        );
        let parsed = parse(buf);
        assert_eq!(parsed.response_text, "real");
    }

    #[test]
    fn test_unknown_event_shapes_are_ignored() {
        let buf = r#":message-typeevent{"usage":{"inputTokens":5}}:event-type:message-typeevent{"content":"ok"}"#;
        let parsed = parse(buf);
        assert_eq!(parsed.response_text, "ok");
    }

    // --- literal \n handling ---

    #[test]
    fn test_literal_newline_unescaped() {
        let parsed = parse(r#":message-typeevent{"content":"line1\\nline2"}"#);
        // The JSON string contained backslash-n, which becomes a newline.
        assert_eq!(parsed.response_text, "line1\nline2");
    }

    #[test]
    fn test_escaped_backslash_n_is_preserved() {
        assert_eq!(unescape_literal_newlines(r"a\\nb"), r"a\\nb");
        assert_eq!(unescape_literal_newlines(r"a\nb"), "a\nb");
        assert_eq!(unescape_literal_newlines("no escapes"), "no escapes");
    }

    // --- structured tool use ---

    #[test]
    fn test_tool_use_split_across_chunks() {
        let buf = concat!(
            r#":message-typeevent{"name":"Read","toolUseId":"t1","input":"{\"path\":"}"#,
            r#":event-type:message-typeevent{"toolUseId":"t1","input":"\"/tmp\"}"}"#,
            r#":event-type:message-typeevent{"toolUseId":"t1","stop":true}"#,
        );
        let parsed = parse(buf);
        assert_eq!(parsed.tool_calls.len(), 1);
        let call = &parsed.tool_calls[0];
        assert_eq!(call.id, "t1");
        assert_eq!(call.name, "Read");
        assert_eq!(call.arguments, r#"{"path":"/tmp"}"#);
    }

    #[test]
    fn test_tool_use_with_invalid_json_keeps_raw() {
        let buf = concat!(
            r#":message-typeevent{"name":"Edit","toolUseId":"t2","input":"{broken"}"#,
            r#":event-type:message-typeevent{"toolUseId":"t2","stop":true}"#,
        );
        let parsed = parse(buf);
        assert_eq!(parsed.tool_calls[0].arguments, "{broken");
    }

    #[test]
    fn test_two_interleaved_tool_uses() {
        let buf = concat!(
            r#":message-typeevent{"name":"Read","toolUseId":"a","input":"{}"}"#,
            r#":event-type:message-typeevent{"name":"Grep","toolUseId":"b","input":"{\"q\":\"x\"}"}"#,
            r#":event-type:message-typeevent{"toolUseId":"a","stop":true}"#,
            r#":event-type:message-typeevent{"toolUseId":"b","stop":true}"#,
        );
        let parsed = parse(buf);
        assert_eq!(parsed.tool_calls.len(), 2);
        assert_eq!(parsed.tool_calls[0].name, "Read");
        assert_eq!(parsed.tool_calls[1].name, "Grep");
    }

    // --- bracket tool calls ---

    #[test]
    fn test_bracket_call_with_bare_key_repair() {
        let buf = r#":message-typeevent{"content":"I'll run "}[Called Bash with args: {command: "ls"}]"#;
        let parsed = parse(buf);
        assert_eq!(parsed.tool_calls.len(), 1);
        let call = &parsed.tool_calls[0];
        assert_eq!(call.name, "Bash");
        assert_eq!(call.arguments, r#"{"command":"ls"}"#);
        assert!(call.id.starts_with("call_"));
        assert_eq!(call.id.len(), "call_".len() + 8);
        assert_eq!(parsed.response_text, "I'll run");
    }

    #[test]
    fn test_bracket_call_inside_event_text_is_stripped() {
        let buf = r#":message-typeevent{"content":"before [Called Glob with args: {\"pattern\": \"*.rs\"}] after"}"#;
        let parsed = parse(buf);
        assert_eq!(parsed.tool_calls.len(), 1);
        assert_eq!(parsed.tool_calls[0].name, "Glob");
        assert_eq!(parsed.response_text, "before after");
        assert!(!parsed.response_text.contains("[Called"));
    }

    #[test]
    fn test_bracket_repair_trailing_comma_and_bare_value() {
        let cases = [
            (r#"{"a": 1,}"#, json!({"a": 1})),
            (r#"{key: value}"#, json!({"key": "value"})),
            (r#"{"flag": true,}"#, json!({"flag": true})),
        ];
        for (raw, expected) in cases {
            assert_eq!(repair_json_arguments(raw), Some(expected), "raw: {}", raw);
        }
    }

    #[test]
    fn test_unrepairable_bracket_call_is_skipped() {
        let buf = r#":message-typeevent{"content":"x [Called Bad with args: {:::}] y"}"#;
        let parsed = parse(buf);
        assert!(parsed.tool_calls.is_empty());
        // The broken expression stays in the text.
        assert!(parsed.response_text.contains("[Called"));
    }

    #[test]
    fn test_dedup_across_event_and_raw_sources() {
        // The same bracket call reachable from both the event text and the
        // raw buffer must appear once.
        let buf = r#":message-typeevent{"content":"go [Called Bash with args: {\"command\": \"ls\"}]"}"#;
        let parsed = parse(buf);
        assert_eq!(parsed.tool_calls.len(), 1);
    }

    #[test]
    fn test_dedup_keeps_distinct_arguments() {
        let buf = concat!(
            r#":message-typeevent{"content":"[Called Bash with args: {\"command\": \"ls\"}] "#,
            r#"[Called Bash with args: {\"command\": \"pwd\"}]"}"#,
        );
        let parsed = parse(buf);
        assert_eq!(parsed.tool_calls.len(), 2);
    }

    #[test]
    fn test_structured_call_wins_dedup_over_bracket_duplicate() {
        let buf = concat!(
            r#":message-typeevent{"name":"Bash","toolUseId":"s1","input":"{\"command\":\"ls\"}"}"#,
            r#":event-type:message-typeevent{"toolUseId":"s1","stop":true}"#,
            r#":event-type:message-typeevent{"content":"[Called Bash with args: {\"command\":\"ls\"}]"}"#,
        );
        let parsed = parse(buf);
        assert_eq!(parsed.tool_calls.len(), 1);
        // First occurrence wins: the structured id survives.
        assert_eq!(parsed.tool_calls[0].id, "s1");
    }

    // --- brace matching ---

    #[test]
    fn test_find_matching_brace_cases() {
        assert_eq!(find_matching_brace(r#"{"a": 1}"#, 0), Some(7));
        assert_eq!(find_matching_brace(r#"{"a": {"b": 1}}"#, 0), Some(14));
        assert_eq!(find_matching_brace(r#"{"a": "}"}"#, 0), Some(9));
        assert_eq!(find_matching_brace(r#"{"a": "\"}"}"#, 0), Some(11));
        assert_eq!(find_matching_brace(r#"{"a": 1"#, 0), None);
        assert_eq!(find_matching_brace("no brace", 0), None);
    }

    #[test]
    fn test_empty_buffer() {
        let parsed = parse_response_buffer(b"");
        assert!(parsed.response_text.is_empty());
        assert!(parsed.tool_calls.is_empty());
    }

    use proptest::prelude::*;

    proptest! {
        /// Invariant: no bracket-call pattern survives in response_text
        /// for well-formed inputs.
        #[test]
        fn prop_bracket_spans_always_stripped(
            name in "[A-Za-z][A-Za-z0-9_]{0,12}",
            key in "[a-z]{1,8}",
            val in "[a-z0-9 ]{0,20}",
            prefix in "[a-z ]{0,20}",
        ) {
            let content = format!(
                "{}[Called {} with args: {{\"{}\": \"{}\"}}]",
                prefix, name, key, val
            );
            let event = serde_json::json!({ "content": content });
            let buf = format!(":message-typeevent{}", event);
            let parsed = parse_response_buffer(buf.as_bytes());
            prop_assert!(!parsed.response_text.contains("[Called"));
            prop_assert_eq!(parsed.tool_calls.len(), 1);
            prop_assert_eq!(&parsed.tool_calls[0].name, &name);
        }

        /// Invariant: tool calls are unique by (name, arguments).
        #[test]
        fn prop_tool_calls_unique(n in 1usize..6) {
            let mut buf = String::new();
            for _ in 0..n {
                buf.push_str(r#":message-typeevent{"content":"[Called Read with args: {\"path\": \"/a\"}]"}"#);
                buf.push_str(":event-type");
            }
            let parsed = parse_response_buffer(buf.as_bytes());
            let mut seen = std::collections::HashSet::new();
            for call in &parsed.tool_calls {
                prop_assert!(seen.insert((call.name.clone(), call.arguments.clone())));
            }
            prop_assert_eq!(parsed.tool_calls.len(), 1);
        }
    }
}
