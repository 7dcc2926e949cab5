use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OnceCell, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{select, store, AccountMetrics, HealthTracker, SelectionStrategy, TokenBucketTracker};
use crate::auth::{decode_identity_claims, TokenBundle, TokenService};
use crate::constants::{
    AUTH_PROVIDER_ID, DISABLE_FAILURE_THRESHOLD, SAVE_DEBOUNCE_MS, TOKEN_EXPIRY_MARGIN_MS,
};
use crate::error::GatewayResult;
use crate::models::{Account, AccountSummary, RateLimitReason, StoredAccounts};
use crate::sinks::{AuthUpdate, HostSinks, LogLevel, ToastVariant};

const SERVICE: &str = "codex-switch";

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Cooldown for a penalized account. Quota exhaustion escalates with
/// consecutive failures; everything else is a flat, short backoff.
fn backoff_ms(reason: RateLimitReason, consecutive_failures: u32) -> i64 {
    const USAGE_STEPS_MS: [i64; 3] = [60_000, 300_000, 1_800_000];
    let ms = match reason {
        RateLimitReason::UsageLimitReached => {
            USAGE_STEPS_MS[consecutive_failures.min(2) as usize]
        }
        RateLimitReason::RateLimitExceeded => 30_000,
        RateLimitReason::ServerError => 20_000,
        RateLimitReason::Unknown => 60_000,
    };
    ms.max(2_000)
}

/// If the cooldown has lapsed, clears the penalty fields in place. Returns
/// whether the account is still rate limited.
fn check_rate_limited(account: &mut Account, now: i64, cleared: &mut bool) -> bool {
    match account.rate_limit_reset_time {
        None => false,
        Some(reset) if now >= reset => {
            account.rate_limit_reset_time = None;
            account.rate_limit_reason = None;
            *cleared = true;
            false
        }
        Some(_) => true,
    }
}

/// Owns the account set, the health and bucket trackers, and the storage
/// cursor. Every mutation path schedules a debounced save; only the
/// OAuth-linked `add_account` writes synchronously, because the process may
/// exit right after the flow completes.
pub struct AccountManager {
    store_path: PathBuf,
    strategy: SelectionStrategy,
    token_service: TokenService,
    state: Arc<RwLock<StoredAccounts>>,
    loaded: OnceCell<()>,
    health: HealthTracker,
    bucket: TokenBucketTracker,
    sinks: HostSinks,
    pending_save: Arc<Mutex<Option<JoinHandle<()>>>>,
    cancel: CancellationToken,
}

impl AccountManager {
    pub fn new(
        store_path: PathBuf,
        strategy: SelectionStrategy,
        token_service: TokenService,
        sinks: HostSinks,
    ) -> Self {
        Self {
            store_path,
            strategy,
            token_service,
            state: Arc::new(RwLock::new(StoredAccounts::empty())),
            loaded: OnceCell::new(),
            health: HealthTracker::default(),
            bucket: TokenBucketTracker::default(),
            sinks,
            pending_save: Arc::new(Mutex::new(None)),
            cancel: CancellationToken::new(),
        }
    }

    /// Lazy, idempotent initial load.
    async fn ensure_loaded(&self) {
        self.loaded
            .get_or_init(|| async {
                let disk = store::load(&self.store_path).await;
                info!(
                    "loaded {} account(s) from {:?}",
                    disk.accounts.len(),
                    self.store_path
                );
                *self.state.write().await = disk;
            })
            .await;
    }

    /// Registers freshly minted OAuth credentials, coalescing with any
    /// existing account that shares a refresh token or account id.
    pub async fn add_account(&self, tokens: TokenBundle) -> GatewayResult<usize> {
        // The OAuth flow may finish before the first request triggers the
        // lazy load; pick up whatever another process already persisted.
        let disk = store::load(&self.store_path).await;
        let _ = self.loaded.set(());

        let claims = decode_identity_claims(&tokens.access_token).unwrap_or_default();
        let now = now_ms();

        let mut state = self.state.write().await;
        *state = disk;

        let existing = state.accounts.iter().position(|account| {
            account.refresh_token == tokens.refresh_token
                || matches!(
                    (&account.account_id, &claims.account_id),
                    (Some(a), Some(b)) if a == b
                )
        });

        let index = match existing {
            Some(index) => {
                let account = &mut state.accounts[index];
                account.refresh_token = tokens.refresh_token.clone();
                account.access_token = Some(tokens.access_token.clone());
                account.access_token_expiry = Some(tokens.expires_at);
                if claims.account_id.is_some() {
                    account.account_id = claims.account_id.clone();
                }
                if claims.email.is_some() {
                    account.email = claims.email.clone();
                }
                account.enabled = true;
                account.clear_penalty();
                account.last_used = now;
                self.health.reset(index);
                info!("relinked existing account {}", account.display_label());
                index
            }
            None => {
                let mut account = Account::new(tokens.refresh_token.clone());
                account.access_token = Some(tokens.access_token.clone());
                account.access_token_expiry = Some(tokens.expires_at);
                account.account_id = claims.account_id.clone();
                account.email = claims.email.clone();
                state.accounts.push(account);
                let index = state.accounts.len() - 1;
                if state.accounts.len() == 1 {
                    state.active_index = 0;
                }
                info!(
                    "added account {} at index {}",
                    state.accounts[index].display_label(),
                    index
                );
                index
            }
        };

        let snapshot = state.clone();
        drop(state);
        store::save_sync(&self.store_path, &snapshot)?;
        self.sinks.toast(
            &format!(
                "Linked ChatGPT account {}",
                snapshot.accounts[index].display_label()
            ),
            ToastVariant::Success,
            4_000,
        );
        Ok(index)
    }

    /// Picks the account for the next attempt and moves the cursor. Returns
    /// `None` only when the pool has no enabled account at all.
    pub async fn select_account(&self) -> Option<(usize, Account)> {
        self.ensure_loaded().await;
        let now = now_ms();
        let mut cleared = false;

        let mut state = self.state.write().await;
        if state.accounts.is_empty() {
            return None;
        }

        let active = state.active_index;
        let metrics: Vec<AccountMetrics> = state
            .accounts
            .iter_mut()
            .enumerate()
            .map(|(index, account)| AccountMetrics {
                index,
                last_used: account.last_used,
                health_score: self.health.get_score(index),
                is_rate_limited: check_rate_limited(account, now, &mut cleared),
                enabled: account.enabled,
            })
            .collect();

        // A single-account pool has nothing to rotate over.
        let strategy = if state.accounts.len() == 1 {
            SelectionStrategy::Sticky
        } else {
            self.strategy
        };

        let selected = select(strategy, &metrics, &self.bucket, Some(active), now).or_else(|| {
            // Everyone filtered out: wait on whichever enabled account frees
            // up first, even if it is still cooling down.
            state
                .accounts
                .iter()
                .enumerate()
                .filter(|(_, account)| account.enabled)
                .min_by_key(|(index, account)| (account.rate_limit_reset_time.unwrap_or(0), *index))
                .map(|(index, _)| index)
        })?;

        if selected != active {
            let label = state.accounts[selected].display_label();
            info!("switching active account {} -> {} ({})", active, selected, label);
            self.sinks.log(
                SERVICE,
                LogLevel::Info,
                &format!("switched to account {}", label),
            );
            self.sinks.toast(
                &format!("Codex: switched to {}", label),
                ToastVariant::Info,
                3_000,
            );
            state.active_index = selected;
        }
        let account = state.accounts[selected].clone();
        drop(state);

        if cleared {
            self.schedule_save().await;
        }
        Some((selected, account))
    }

    /// Guarantees a usable access token for the account at `index`,
    /// refreshing through the token endpoint when it is missing or within
    /// the expiry margin. `None` means the refresh failed and the failure
    /// has been recorded.
    pub async fn ensure_access_token(&self, index: usize) -> Option<Account> {
        self.ensure_loaded().await;
        let (refresh_token, current) = {
            let state = self.state.read().await;
            let account = state.accounts.get(index)?;
            (account.refresh_token.clone(), account.clone())
        };

        let now = now_ms();
        if current.access_token.is_some()
            && current.access_token_expiry.unwrap_or(0) > now + TOKEN_EXPIRY_MARGIN_MS
        {
            return Some(current);
        }

        debug!("refreshing access token for account #{}", index);
        let bundle = match self.token_service.refresh_access_token(&refresh_token).await {
            Ok(bundle) => bundle,
            Err(e) => {
                warn!("token refresh failed for account #{}: {}", index, e);
                self.record_failure(index).await;
                return None;
            }
        };

        let mut state = self.state.write().await;
        let is_active = state.active_index == index;
        let account = state.accounts.get_mut(index)?;
        account.access_token = Some(bundle.access_token.clone());
        account.access_token_expiry = Some(bundle.expires_at);
        account.refresh_token = bundle.refresh_token.clone();
        if account.account_id.is_none() {
            if let Some(claims) = decode_identity_claims(&bundle.access_token) {
                account.account_id = claims.account_id;
                if account.email.is_none() {
                    account.email = claims.email;
                }
            }
        }
        let refreshed = account.clone();
        drop(state);

        self.schedule_save().await;
        if is_active {
            self.sinks.auth_writeback(
                AUTH_PROVIDER_ID,
                AuthUpdate {
                    access: bundle.access_token,
                    refresh: bundle.refresh_token,
                    expires: bundle.expires_at,
                    account_id: refreshed.account_id.clone(),
                },
            );
        }
        Some(refreshed)
    }

    pub async fn record_success(&self, index: usize) {
        let mut state = self.state.write().await;
        if let Some(account) = state.accounts.get_mut(index) {
            account.last_used = now_ms();
            account.consecutive_failures = 0;
        }
        drop(state);
        self.health.record_success(index);
        self.bucket.consume(index, 1.0);
        self.schedule_save().await;
    }

    pub async fn mark_rate_limited(&self, index: usize, reason: RateLimitReason) {
        let now = now_ms();
        let mut state = self.state.write().await;
        let Some(account) = state.accounts.get_mut(index) else {
            return;
        };
        let cooldown = backoff_ms(reason, account.consecutive_failures);
        account.rate_limit_reset_time = Some(now + cooldown);
        account.rate_limit_reason = Some(reason);
        account.consecutive_failures += 1;
        let label = account.display_label();
        drop(state);

        self.health.record_rate_limit(index);
        warn!(
            "account #{} ({}) rate limited: {} (cooldown {}s)",
            index,
            label,
            reason.as_str(),
            cooldown / 1000
        );
        self.sinks.log(
            SERVICE,
            LogLevel::Warn,
            &format!("{} rate limited ({})", label, reason.as_str()),
        );
        self.schedule_save().await;
    }

    pub async fn record_failure(&self, index: usize) {
        let mut state = self.state.write().await;
        let Some(account) = state.accounts.get_mut(index) else {
            return;
        };
        account.consecutive_failures += 1;
        let failures = account.consecutive_failures;
        let disabled = if failures >= DISABLE_FAILURE_THRESHOLD && account.enabled {
            account.enabled = false;
            true
        } else {
            false
        };
        let label = account.display_label();
        drop(state);

        self.health.record_failure(index);
        if disabled {
            warn!(
                "account #{} ({}) disabled after {} consecutive failures",
                index, label, failures
            );
            self.sinks.toast(
                &format!("Codex: account {} disabled after repeated failures", label),
                ToastVariant::Error,
                6_000,
            );
        }
        self.schedule_save().await;
    }

    /// Rate-limit check with lazy expiry: a lapsed cooldown is cleared on
    /// read.
    pub async fn is_rate_limited(&self, index: usize) -> bool {
        let now = now_ms();
        let mut cleared = false;
        let mut state = self.state.write().await;
        let Some(account) = state.accounts.get_mut(index) else {
            return false;
        };
        let limited = check_rate_limited(account, now, &mut cleared);
        drop(state);
        if cleared {
            self.schedule_save().await;
        }
        limited
    }

    pub async fn list_accounts(&self) -> Vec<AccountSummary> {
        self.ensure_loaded().await;
        let state = self.state.read().await;
        state
            .accounts
            .iter()
            .enumerate()
            .map(|(index, account)| AccountSummary {
                index,
                email: account.email.clone(),
                enabled: account.enabled,
                active: index == state.active_index,
                health_score: self.health.get_score(index),
                rate_limited_until: account.rate_limit_reset_time,
                consecutive_failures: account.consecutive_failures,
            })
            .collect()
    }

    pub async fn account_count(&self) -> usize {
        self.ensure_loaded().await;
        self.state.read().await.accounts.len()
    }

    pub async fn active_index(&self) -> usize {
        self.state.read().await.active_index
    }

    #[cfg(test)]
    pub(crate) async fn account(&self, index: usize) -> Option<Account> {
        self.state.read().await.accounts.get(index).cloned()
    }

    #[cfg(test)]
    pub(crate) fn bucket_for_test(&self) -> &TokenBucketTracker {
        &self.bucket
    }

    #[cfg(test)]
    pub(crate) fn health_for_test(&self) -> &HealthTracker {
        &self.health
    }

    /// Arms a single-slot save timer; a newer schedule cancels the pending
    /// one so bursts of record calls coalesce into one write of the latest
    /// state.
    async fn schedule_save(&self) {
        let mut pending = self.pending_save.lock().await;
        if let Some(handle) = pending.take() {
            handle.abort();
        }
        let state = self.state.clone();
        let path = self.store_path.clone();
        let cancel = self.cancel.clone();
        *pending = Some(tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(Duration::from_millis(SAVE_DEBOUNCE_MS)) => {
                    let snapshot = state.read().await.clone();
                    if let Err(e) = store::save(&path, &snapshot).await {
                        warn!("debounced account save failed: {}", e);
                    }
                }
            }
        }));
    }

    /// Cancels any pending debounced save and flushes synchronously.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let mut pending = self.pending_save.lock().await;
        if let Some(handle) = pending.take() {
            handle.abort();
        }
        drop(pending);
        if self.loaded.get().is_some() {
            let snapshot = self.state.read().await.clone();
            if let Err(e) = store::save_sync(&self.store_path, &snapshot) {
                warn!("shutdown flush failed: {}", e);
            }
        }
    }
}
