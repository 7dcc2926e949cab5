//! Outbound request rewriting: model canonicalization, instruction
//! injection, host-prompt stripping, orphaned-tool-output repair, and
//! reasoning/verbosity/include resolution. Produces a new body; the host's
//! original is never mutated.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::instructions::{
    InstructionsCatalog, CODEX_BRIDGE_MESSAGE, HOST_PROMPT_SIGNATURES, TOOL_REMAP_NOTICE,
};
use super::model_map::{
    family_tag, normalize_model, reasoning_profile, ReasoningEffort,
};
use crate::config::PluginConfig;
use crate::models::{InputItem, RequestBody};

/// Tool outputs longer than this are truncated when folded into a repair
/// message.
const ORPHAN_OUTPUT_LIMIT: usize = 16_000;
const TRUNCATION_SUFFIX: &str = "\n...[truncated]";

/// Markers that begin the environmental tail of a host system prompt. When a
/// host prompt is stripped, everything from the earliest marker onward is
/// kept.
static ENV_MARKERS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)<env>|<instructions>|here is some useful information about the environment|instructions from:",
    )
    .expect("env marker regex")
});

/// Everything the rewrite needs to know about one request, computed once per
/// request and reused across retries.
#[derive(Debug, Clone)]
pub struct TransformOutcome {
    /// Serialized rewritten body, or the original text verbatim when it did
    /// not parse as a JSON object.
    pub body: String,
    /// Whether the host asked for a streaming response.
    pub is_stream: bool,
    pub prompt_cache_key: Option<String>,
}

pub struct Transformer {
    codex_mode: bool,
    reasoning_effort: Option<String>,
    verbosity: Option<String>,
    include: Vec<String>,
    model_overrides: std::collections::HashMap<String, crate::config::ModelOverride>,
    instructions: InstructionsCatalog,
    known_host_prompt: Option<String>,
}

impl Transformer {
    pub fn new(config: &PluginConfig, instructions: InstructionsCatalog) -> Self {
        Self {
            codex_mode: config.codex_mode,
            reasoning_effort: config.reasoning_effort.clone(),
            verbosity: config.verbosity.clone(),
            include: config.include.clone(),
            model_overrides: config.models.clone(),
            instructions,
            known_host_prompt: None,
        }
    }

    /// Caches the host agent's current system prompt so stripping can match
    /// it exactly instead of relying on signature heuristics alone.
    pub fn set_known_host_prompt(&mut self, prompt: Option<String>) {
        self.known_host_prompt = prompt;
    }

    pub fn transform(&self, raw_body: &str) -> TransformOutcome {
        let mut body: RequestBody = match serde_json::from_str(raw_body) {
            Ok(body) => body,
            Err(e) => {
                // Unparseable bodies go out untouched; failing the request
                // over our own rewrite would be worse than skipping it.
                warn!("request body did not parse, skipping rewrite: {}", e);
                return TransformOutcome {
                    body: raw_body.to_string(),
                    is_stream: true,
                    prompt_cache_key: None,
                };
            }
        };

        let is_stream = body.stream == Some(true);
        let canonical = normalize_model(body.model.as_deref().unwrap_or(""));
        let family = family_tag(canonical);
        body.model = Some(canonical.to_string());

        body.store = Some(false);
        body.stream = Some(true);
        body.instructions = Some(self.instructions.text_for(family).to_string());

        let has_tools = matches!(&body.tools, Some(tools) if !tools.is_null());
        if let Some(items) = body.input.as_mut() {
            items.retain(|item| !item.type_is("item_reference"));
            for item in items.iter_mut() {
                item.id = None;
            }

            if self.codex_mode {
                self.strip_host_prompts(items);
            }

            if has_tools {
                let bridge = if self.codex_mode {
                    CODEX_BRIDGE_MESSAGE
                } else {
                    TOOL_REMAP_NOTICE
                };
                items.insert(
                    0,
                    InputItem {
                        item_type: Some("message".to_string()),
                        role: Some("developer".to_string()),
                        content: Some(json!([{ "type": "input_text", "text": bridge }])),
                        ..Default::default()
                    },
                );
            }

            normalize_orphaned_tool_outputs(items);
        }

        self.resolve_reasoning(&mut body, canonical);
        self.resolve_verbosity(&mut body, canonical);
        self.resolve_include(&mut body);

        body.max_output_tokens = None;
        body.max_completion_tokens = None;

        let prompt_cache_key = body.prompt_cache_key.clone();
        let serialized = serde_json::to_string(&body)
            .unwrap_or_else(|_| raw_body.to_string());
        TransformOutcome {
            body: serialized,
            is_stream,
            prompt_cache_key,
        }
    }

    /// Removes host-agent system/developer prompts, preserving any
    /// environmental tail (`<env>`, instruction blocks) they carry.
    fn strip_host_prompts(&self, items: &mut Vec<InputItem>) {
        items.retain_mut(|item| {
            if !item.type_is("message") && item.item_type.is_some() {
                return true;
            }
            let role = item.role.as_deref().unwrap_or("");
            if role != "system" && role != "developer" {
                return true;
            }
            let Some(text) = item.content_text() else {
                return true;
            };
            if !self.is_host_prompt(&text) {
                return true;
            }
            match ENV_MARKERS.find(&text) {
                Some(found) => {
                    debug!("trimming host prompt down to its environment block");
                    item.set_content_text(text[found.start()..].to_string());
                    true
                }
                None => {
                    debug!("dropping host prompt from input");
                    false
                }
            }
        });
    }

    fn is_host_prompt(&self, text: &str) -> bool {
        if let Some(known) = self.known_host_prompt.as_deref() {
            if text == known || text.starts_with(known) {
                return true;
            }
            let head: String = text.chars().take(200).collect();
            let known_head: String = known.chars().take(200).collect();
            if !head.is_empty() && head == known_head {
                return true;
            }
        }
        let opening = text.trim_start().to_ascii_lowercase();
        HOST_PROMPT_SIGNATURES
            .iter()
            .any(|signature| opening.starts_with(signature))
    }

    /// Effort precedence: body override, provider options, model config,
    /// global config, family default; then the family coercion rules.
    fn resolve_reasoning(&self, body: &mut RequestBody, canonical: &str) {
        let profile = reasoning_profile(canonical);
        let requested = body
            .reasoning
            .as_ref()
            .and_then(|r| r.get("effort"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| self.provider_option(body, "reasoningEffort"))
            .or_else(|| {
                self.model_overrides
                    .get(canonical)
                    .and_then(|o| o.reasoning_effort.clone())
            })
            .or_else(|| self.reasoning_effort.clone());

        let effort = requested
            .as_deref()
            .and_then(ReasoningEffort::parse)
            .unwrap_or(profile.default_effort);
        let coerced = profile.coerce(effort);

        let mut reasoning = match body.reasoning.take() {
            Some(Value::Object(map)) => Value::Object(map),
            _ => json!({}),
        };
        reasoning["effort"] = Value::String(coerced.as_str().to_string());
        if reasoning.get("summary").is_none() {
            reasoning["summary"] = Value::String("auto".to_string());
        }
        body.reasoning = Some(reasoning);
    }

    fn resolve_verbosity(&self, body: &mut RequestBody, canonical: &str) {
        let verbosity = body
            .text
            .as_ref()
            .and_then(|t| t.get("verbosity"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| self.provider_option(body, "textVerbosity"))
            .or_else(|| {
                self.model_overrides
                    .get(canonical)
                    .and_then(|o| o.verbosity.clone())
            })
            .or_else(|| self.verbosity.clone())
            .unwrap_or_else(|| "medium".to_string());

        let mut text = match body.text.take() {
            Some(Value::Object(map)) => Value::Object(map),
            _ => json!({}),
        };
        text["verbosity"] = Value::String(verbosity);
        body.text = Some(text);
    }

    /// `reasoning.encrypted_content` is always requested; configured extras
    /// are unioned in, deduplicated, with falsy entries dropped.
    fn resolve_include(&self, body: &mut RequestBody) {
        let mut include: Vec<Value> = Vec::new();
        let mut push_unique = |value: &str, include: &mut Vec<Value>| {
            if !value.is_empty() && !include.iter().any(|v| v.as_str() == Some(value)) {
                include.push(Value::String(value.to_string()));
            }
        };
        for entry in &self.include {
            push_unique(entry, &mut include);
        }
        push_unique("reasoning.encrypted_content", &mut include);
        body.include = Some(include);
    }

    fn provider_option(&self, body: &RequestBody, key: &str) -> Option<String> {
        body.provider_options
            .as_ref()
            .and_then(|options| options.get("openai"))
            .and_then(|openai| openai.get(key))
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

/// Rewrites tool outputs whose originating call is no longer present in the
/// input as plain assistant messages, so the upstream never sees an output
/// without its call. Running this twice is a no-op the second time.
pub fn normalize_orphaned_tool_outputs(items: &mut [InputItem]) {
    let collect_ids = |items: &[InputItem], ty: &str| -> std::collections::HashSet<String> {
        items
            .iter()
            .filter(|item| item.type_is(ty))
            .filter_map(|item| item.call_id.clone())
            .collect()
    };
    let function_ids = collect_ids(items, "function_call");
    let shell_ids = collect_ids(items, "local_shell_call");
    let custom_ids = collect_ids(items, "custom_tool_call");

    for item in items.iter_mut() {
        let (ids, tool_name) = match item.item_type.as_deref() {
            Some("function_call_output") => (&function_ids, "tool"),
            Some("local_shell_call_output") => (&shell_ids, "local shell"),
            Some("custom_tool_call_output") => (&custom_ids, "custom tool"),
            _ => continue,
        };
        let orphaned = match &item.call_id {
            Some(call_id) => !ids.contains(call_id),
            None => true,
        };
        if !orphaned {
            continue;
        }

        let call_id = item.call_id.as_deref().unwrap_or("unknown").to_string();
        let output = match item.output.take() {
            Some(Value::String(s)) => s,
            Some(other) => other.to_string(),
            None => String::new(),
        };
        let text = if output.chars().count() > ORPHAN_OUTPUT_LIMIT {
            let truncated: String = output.chars().take(ORPHAN_OUTPUT_LIMIT).collect();
            format!("{}{}", truncated, TRUNCATION_SUFFIX)
        } else {
            output
        };

        debug!("repairing orphaned {} output (call_id={})", tool_name, call_id);
        *item = InputItem {
            item_type: Some("message".to_string()),
            role: Some("assistant".to_string()),
            content: Some(json!([{
                "type": "output_text",
                "text": format!("[Previous {} result; call_id={}]: {}", tool_name, call_id, text),
            }])),
            ..Default::default()
        };
    }
}
