//! System-instruction texts and the bridge prompts injected ahead of tool
//! conversations. Fetching the real upstream prompt text is the host's job;
//! these built-ins are compact stand-ins the host can replace wholesale.

use std::collections::HashMap;

use super::model_map::ModelFamilyTag;

const CODEX_INSTRUCTIONS: &str = "You are Codex, based on GPT-5. You are running as a coding \
agent in the Codex CLI on a user's computer. Communicate concisely, prefer making the change \
over describing it, and use the provided tools to read, edit, and test code. Never invent file \
contents; inspect them first.";

const CODEX_MAX_INSTRUCTIONS: &str = "You are Codex, based on GPT-5. You are running as a \
coding agent in the Codex CLI on a user's computer, tuned for long-horizon engineering tasks. \
Plan before editing, keep working until the task is done, and verify changes with the provided \
tools before reporting back.";

const GPT_52_CODEX_INSTRUCTIONS: &str = "You are Codex, based on GPT-5.2. You are running as a \
coding agent in the Codex CLI on a user's computer. Keep answers terse, ground every claim in \
files you have read, and use the provided tools for all filesystem and shell interaction.";

const GENERAL_INSTRUCTIONS: &str = "You are a coding assistant answering through the Codex \
backend. Be direct and accurate, and when tools are available use them rather than guessing \
about the user's environment.";

/// Developer message prepended when the host supplies tools in Codex mode.
/// Codex's own shell/apply_patch conventions do not exist here, so the model
/// is pointed at the host's tool set instead.
pub const CODEX_BRIDGE_MESSAGE: &str = "You are running inside the opencode agent rather than \
the Codex CLI. The Codex built-in tools (shell, apply_patch, update_plan) are not available; \
use only the function tools declared in this request. Map habits accordingly: run commands \
through the host's bash tool, edit files with the host's edit/write tools, and report progress \
in plain text instead of plan updates. Tool outputs may arrive as assistant messages prefixed \
with \"[Previous tool result]\"; treat them as authoritative results of your earlier calls.";

/// Shorter notice for non-Codex mode: only the tool remapping matters.
pub const TOOL_REMAP_NOTICE: &str = "Use only the function tools declared in this request. \
Built-in Codex tools such as shell and apply_patch are unavailable in this environment.";

/// Content openers that identify a host-agent system prompt even when the
/// cached prompt text is unavailable.
pub const HOST_PROMPT_SIGNATURES: &[&str] = &[
    "you are a coding agent running in the",
    "you are opencode, an agent",
    "you are opencode, an autonomous",
    "you are an agent for opencode",
];

/// Per-family instruction texts, replaceable by the host at construction.
#[derive(Debug, Clone)]
pub struct InstructionsCatalog {
    by_family: HashMap<ModelFamilyTag, String>,
}

impl InstructionsCatalog {
    pub fn text_for(&self, family: ModelFamilyTag) -> &str {
        self.by_family
            .get(&family)
            .map(String::as_str)
            .unwrap_or(GENERAL_INSTRUCTIONS)
    }

    pub fn set(&mut self, family: ModelFamilyTag, text: String) {
        self.by_family.insert(family, text);
    }
}

impl Default for InstructionsCatalog {
    fn default() -> Self {
        let by_family = HashMap::from([
            (ModelFamilyTag::Gpt52Codex, GPT_52_CODEX_INSTRUCTIONS.to_string()),
            (ModelFamilyTag::CodexMax, CODEX_MAX_INSTRUCTIONS.to_string()),
            (ModelFamilyTag::Codex, CODEX_INSTRUCTIONS.to_string()),
            (ModelFamilyTag::Gpt52, GENERAL_INSTRUCTIONS.to_string()),
            (ModelFamilyTag::Gpt51, GENERAL_INSTRUCTIONS.to_string()),
        ]);
        Self { by_family }
    }
}
