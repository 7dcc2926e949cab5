use serde::{Deserialize, Serialize};

pub const STORAGE_VERSION: u32 = 1;

/// Why an account was put on cooldown. Drives the backoff table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RateLimitReason {
    RateLimitExceeded,
    UsageLimitReached,
    ServerError,
    Unknown,
}

impl RateLimitReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RateLimitReason::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            RateLimitReason::UsageLimitReached => "USAGE_LIMIT_REACHED",
            RateLimitReason::ServerError => "SERVER_ERROR",
            RateLimitReason::Unknown => "UNKNOWN",
        }
    }
}

/// One OAuth-linked ChatGPT identity with credentials and runtime penalty
/// state. The in-memory position in the account list is the account's index;
/// it is never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub refresh_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    /// Absolute expiry of `access_token`, milliseconds since epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token_expiry: Option<i64>,
    pub added_at: i64,
    pub last_used: i64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_reset_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_reason: Option<RateLimitReason>,
    #[serde(default)]
    pub consecutive_failures: u32,
}

fn default_enabled() -> bool {
    true
}

impl Account {
    pub fn new(refresh_token: String) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            account_id: None,
            email: None,
            refresh_token,
            access_token: None,
            access_token_expiry: None,
            added_at: now,
            last_used: now,
            enabled: true,
            rate_limit_reset_time: None,
            rate_limit_reason: None,
            consecutive_failures: 0,
        }
    }

    /// Duplicate rule: same refresh token, or both account ids present and
    /// equal.
    pub fn is_same_identity(&self, other: &Account) -> bool {
        if self.refresh_token == other.refresh_token {
            return true;
        }
        match (&self.account_id, &other.account_id) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    pub fn clear_penalty(&mut self) {
        self.rate_limit_reset_time = None;
        self.rate_limit_reason = None;
        self.consecutive_failures = 0;
    }

    pub fn display_label(&self) -> String {
        self.email
            .clone()
            .or_else(|| self.account_id.clone())
            .unwrap_or_else(|| "<unknown>".to_string())
    }
}

/// On-disk shape of the account set. `active_index` is clamped on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredAccounts {
    pub version: u32,
    pub accounts: Vec<Account>,
    #[serde(default)]
    pub active_index: usize,
}

impl StoredAccounts {
    pub fn empty() -> Self {
        Self {
            version: STORAGE_VERSION,
            accounts: Vec::new(),
            active_index: 0,
        }
    }

    pub fn clamp_active_index(&mut self) {
        if self.accounts.is_empty() {
            self.active_index = 0;
        } else if self.active_index >= self.accounts.len() {
            self.active_index = 0;
        }
    }
}

impl Default for StoredAccounts {
    fn default() -> Self {
        Self::empty()
    }
}

/// Redacted view handed to the host for display. Never carries tokens.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSummary {
    pub index: usize,
    pub email: Option<String>,
    pub enabled: bool,
    pub active: bool,
    pub health_score: f64,
    pub rate_limited_until: Option<i64>,
    pub consecutive_failures: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_accounts_round_trips_camel_case() {
        let mut stored = StoredAccounts::empty();
        let mut account = Account::new("rt-1".to_string());
        account.account_id = Some("acct_123".to_string());
        account.rate_limit_reason = Some(RateLimitReason::UsageLimitReached);
        stored.accounts.push(account);
        stored.active_index = 0;

        let json = serde_json::to_string(&stored).unwrap();
        assert!(json.contains("\"activeIndex\":0"));
        assert!(json.contains("\"refreshToken\":\"rt-1\""));
        assert!(json.contains("\"USAGE_LIMIT_REACHED\""));

        let parsed: StoredAccounts = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.accounts.len(), 1);
        assert_eq!(parsed.accounts[0].refresh_token, "rt-1");
        assert_eq!(
            parsed.accounts[0].rate_limit_reason,
            Some(RateLimitReason::UsageLimitReached)
        );
    }

    #[test]
    fn missing_optional_fields_default() {
        let json = r#"{
            "version": 1,
            "accounts": [
                { "refreshToken": "rt-2", "addedAt": 1, "lastUsed": 2 }
            ]
        }"#;
        let parsed: StoredAccounts = serde_json::from_str(json).unwrap();
        let account = &parsed.accounts[0];
        assert!(account.enabled);
        assert_eq!(account.consecutive_failures, 0);
        assert!(account.access_token.is_none());
        assert_eq!(parsed.active_index, 0);
    }

    #[test]
    fn identity_match_on_refresh_token_or_account_id() {
        let a = Account::new("rt-a".to_string());
        let mut b = Account::new("rt-b".to_string());
        assert!(!a.is_same_identity(&b));

        let mut a2 = a.clone();
        a2.account_id = Some("acct_1".to_string());
        b.account_id = Some("acct_1".to_string());
        assert!(a2.is_same_identity(&b));

        let same_rt = Account::new("rt-a".to_string());
        assert!(a.is_same_identity(&same_rt));
    }

    #[test]
    fn clamp_active_index_handles_empty_and_overflow() {
        let mut stored = StoredAccounts::empty();
        stored.active_index = 7;
        stored.clamp_active_index();
        assert_eq!(stored.active_index, 0);

        stored.accounts.push(Account::new("rt".to_string()));
        stored.active_index = 3;
        stored.clamp_active_index();
        assert_eq!(stored.active_index, 0);
    }
}
