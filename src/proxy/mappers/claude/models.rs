// Anthropic 协议数据模型 (the C-style surface this gateway accepts)

use serde::{Deserialize, Serialize};

/// Inbound chat request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaudeRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemPrompt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
    #[serde(default)]
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SystemPrompt {
    String(String),
    Array(Vec<SystemBlock>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: MessageContent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    String(String),
    Array(Vec<ContentBlock>),
}

/// Multi-part message content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "image")]
    Image {
        source: ImageSource,
        #[serde(skip_serializing_if = "Option::is_none")]
        cache_control: Option<serde_json::Value>,
    },

    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        cache_control: Option<serde_json::Value>,
    },

    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        // String or array of blocks, depending on the client
        content: serde_json::Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageSource {
    #[serde(rename = "type")]
    pub source_type: String,
    pub media_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_with_string_content() {
        let json = r#"{"model":"claude-sonnet-4-5","messages":[{"role":"user","content":"hi"}]}"#;
        let req: ClaudeRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.model, "claude-sonnet-4-5");
        assert!(!req.stream);
        match &req.messages[0].content {
            MessageContent::String(s) => assert_eq!(s, "hi"),
            _ => panic!("expected string content"),
        }
    }

    #[test]
    fn test_request_with_block_content() {
        let json = r#"{
            "model": "claude-sonnet-4-5",
            "stream": true,
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": "look at this"},
                    {"type": "image", "source": {"type": "base64", "media_type": "image/png", "data": "aGk="}},
                    {"type": "tool_result", "tool_use_id": "t1", "content": "42"}
                ]
            }]
        }"#;
        let req: ClaudeRequest = serde_json::from_str(json).unwrap();
        assert!(req.stream);
        let MessageContent::Array(blocks) = &req.messages[0].content else {
            panic!("expected block content");
        };
        assert_eq!(blocks.len(), 3);
        assert!(matches!(blocks[0], ContentBlock::Text { .. }));
        assert!(matches!(blocks[1], ContentBlock::Image { .. }));
        assert!(matches!(blocks[2], ContentBlock::ToolResult { .. }));
    }

    #[test]
    fn test_system_prompt_both_shapes() {
        let s: SystemPrompt = serde_json::from_str(r#""be brief""#).unwrap();
        assert!(matches!(s, SystemPrompt::String(_)));

        let s: SystemPrompt =
            serde_json::from_str(r#"[{"type":"text","text":"be brief"}]"#).unwrap();
        match s {
            SystemPrompt::Array(blocks) => assert_eq!(blocks[0].text, "be brief"),
            _ => panic!("expected array"),
        }
    }

    #[test]
    fn test_tool_deserialize() {
        let json = r#"{"name":"Bash","description":"run a command","input_schema":{"type":"object"}}"#;
        let tool: Tool = serde_json::from_str(json).unwrap();
        assert_eq!(tool.name, "Bash");
        assert!(tool.input_schema.is_some());
    }
}
