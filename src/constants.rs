//! Fixed endpoints, header names, and OAuth parameters for the ChatGPT
//! Codex backend. Extracted from the Codex CLI's simplified login flow.

/// OAuth 2.0 client ID registered for the Codex CLI.
pub const OAUTH_CLIENT_ID: &str = "app_EMoamEEZ73f0CkXaXp7hrann";

/// OpenAI OAuth authorization endpoint.
pub const OAUTH_AUTHORIZE_URL: &str = "https://auth.openai.com/oauth/authorize";

/// OpenAI OAuth token endpoint.
pub const OAUTH_TOKEN_URL: &str = "https://auth.openai.com/oauth/token";

/// Scopes requested during authorization.
pub const OAUTH_SCOPES: &str = "openid email profile offline_access";

/// Nested JWT claim namespace carrying the ChatGPT account id.
pub const AUTH_CLAIM_NAMESPACE: &str = "https://api.openai.com/auth";

/// JWT claim namespace carrying profile fields (email).
pub const PROFILE_CLAIM_NAMESPACE: &str = "https://api.openai.com/profile";

/// Trailing path segment of the host's responses endpoint.
pub const RESPONSES_PATH_SEGMENT: &str = "/responses";

/// Replacement path segment routing through the ChatGPT Codex backend.
pub const CODEX_RESPONSES_PATH_SEGMENT: &str = "/codex/responses";

pub const HEADER_ACCOUNT_ID: &str = "chatgpt-account-id";
pub const HEADER_OPENAI_BETA: &str = "openai-beta";
pub const HEADER_ORIGINATOR: &str = "originator";
pub const HEADER_SESSION_ID: &str = "session_id";
pub const HEADER_CONVERSATION_ID: &str = "conversation_id";

pub const OPENAI_BETA_VALUE: &str = "responses=experimental";
pub const ORIGINATOR_VALUE: &str = "codex_cli_rs";

/// Provider id used when pushing refreshed credentials back to the host's
/// auth store.
pub const AUTH_PROVIDER_ID: &str = "openai";

/// Access tokens within this window of expiry are refreshed eagerly.
pub const TOKEN_EXPIRY_MARGIN_MS: i64 = 60_000;

/// Account selection retry cap per request.
pub const MAX_RETRIES: u32 = 3;

/// Consecutive refresh/auth failures before an account is disabled.
pub const DISABLE_FAILURE_THRESHOLD: u32 = 5;

/// Debounce window for coalescing storage writes.
pub const SAVE_DEBOUNCE_MS: u64 = 1_000;

/// Durable account storage filename under the opencode config dir.
pub const STORAGE_FILENAME: &str = "codex-switch-accounts.json";

/// Plugin configuration filename under `~/.opencode`.
pub const CONFIG_FILENAME: &str = "codex-switch-config.json";

/// Directory for per-request JSON dumps, relative to `~/.opencode`.
pub const REQUEST_LOG_DIR: &str = "logs/codex-auto-switch";
