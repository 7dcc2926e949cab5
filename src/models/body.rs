use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Outbound request body for the responses endpoint. Only the fields the
/// rewrite pipeline touches are typed; everything else rides along in
/// `extra` and re-serializes untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Vec<InputItem>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include: Option<Vec<Value>>,
    #[serde(
        default,
        rename = "providerOptions",
        skip_serializing_if = "Option::is_none"
    )]
    pub provider_options: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_cache_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_completion_tokens: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One entry of `input`. The `type` discriminator decides which of the other
/// fields are meaningful; unrecognized item shapes pass through via `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputItem {
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub item_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl InputItem {
    pub fn type_is(&self, ty: &str) -> bool {
        self.item_type.as_deref() == Some(ty)
    }

    /// Flattened text of `content`, whether it is a plain string or an array
    /// of text parts.
    pub fn content_text(&self) -> Option<String> {
        match &self.content {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Array(parts)) => {
                let mut text = String::new();
                for part in parts {
                    if let Some(t) = part.get("text").and_then(Value::as_str) {
                        text.push_str(t);
                    }
                }
                Some(text)
            }
            _ => None,
        }
    }

    /// Replaces `content` with `text`, keeping the original shape: a string
    /// stays a string, a parts array becomes a single text part.
    pub fn set_content_text(&mut self, text: String) {
        match &self.content {
            Some(Value::Array(parts)) => {
                let part_type = parts
                    .iter()
                    .find_map(|p| p.get("type").and_then(Value::as_str))
                    .unwrap_or("input_text")
                    .to_string();
                self.content = Some(serde_json::json!([{ "type": part_type, "text": text }]));
            }
            _ => self.content = Some(Value::String(text)),
        }
    }
}
