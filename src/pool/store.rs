//! Durable account storage. Pure value-in/value-out: the manager holds the
//! path and decides when to write; this module only knows how.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rand::Rng;
use serde_json::Value;
use tracing::{debug, warn};

use crate::constants::STORAGE_FILENAME;
use crate::error::GatewayResult;
use crate::models::{Account, StoredAccounts, STORAGE_VERSION};

/// Resolves the storage file path: `$OPENCODE_CONFIG_DIR` wins, then
/// `$XDG_CONFIG_HOME/opencode`, then `~/.config/opencode`.
pub fn storage_path() -> PathBuf {
    let config_dir = std::env::var("OPENCODE_CONFIG_DIR")
        .ok()
        .filter(|dir| !dir.trim().is_empty())
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var("XDG_CONFIG_HOME")
                .ok()
                .filter(|dir| !dir.trim().is_empty())
                .map(|dir| PathBuf::from(dir).join("opencode"))
        })
        .or_else(|| dirs::home_dir().map(|home| home.join(".config").join("opencode")))
        .unwrap_or_else(|| PathBuf::from(".opencode"));
    config_dir.join(STORAGE_FILENAME)
}

/// Drops entries without a refresh token, coalesces duplicates (newest
/// `last_used` wins, first position kept), and clamps the cursor.
fn sanitize(mut accounts: Vec<Account>, active_index: usize) -> StoredAccounts {
    accounts.retain(|account| !account.refresh_token.trim().is_empty());

    let mut by_token: HashMap<String, usize> = HashMap::new();
    let mut deduped: Vec<Account> = Vec::with_capacity(accounts.len());
    for account in accounts {
        match by_token.get(&account.refresh_token) {
            Some(&pos) => {
                if account.last_used > deduped[pos].last_used {
                    deduped[pos] = account;
                }
            }
            None => {
                by_token.insert(account.refresh_token.clone(), deduped.len());
                deduped.push(account);
            }
        }
    }

    let mut stored = StoredAccounts {
        version: STORAGE_VERSION,
        accounts: deduped,
        active_index,
    };
    stored.clamp_active_index();
    stored
}

fn parse_storage(content: &str, path: &Path) -> StoredAccounts {
    let value: Value = match serde_json::from_str(content) {
        Ok(value) => value,
        Err(e) => {
            warn!("account storage {:?} is not valid JSON, starting empty: {}", path, e);
            return StoredAccounts::empty();
        }
    };

    let Some(raw_accounts) = value.get("accounts").and_then(Value::as_array) else {
        warn!(
            "account storage {:?} parses but has no accounts array, starting empty",
            path
        );
        return StoredAccounts::empty();
    };

    let accounts: Vec<Account> = raw_accounts
        .iter()
        .filter_map(|raw| match serde_json::from_value(raw.clone()) {
            Ok(account) => Some(account),
            Err(e) => {
                warn!("skipping unreadable stored account: {}", e);
                None
            }
        })
        .collect();

    let active_index = value
        .get("activeIndex")
        .and_then(Value::as_u64)
        .unwrap_or(0) as usize;

    sanitize(accounts, active_index)
}

pub fn load_sync(path: &Path) -> StoredAccounts {
    match std::fs::read_to_string(path) {
        Ok(content) => parse_storage(&content, path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoredAccounts::empty(),
        Err(e) => {
            warn!("failed to read account storage {:?}: {}", path, e);
            StoredAccounts::empty()
        }
    }
}

pub async fn load(path: &Path) -> StoredAccounts {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => parse_storage(&content, path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoredAccounts::empty(),
        Err(e) => {
            warn!("failed to read account storage {:?}: {}", path, e);
            StoredAccounts::empty()
        }
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let suffix: String = rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| STORAGE_FILENAME.to_string());
    path.with_file_name(format!("{}.{}.tmp", filename, suffix))
}

/// Best-effort: make sure the config dir's `.gitignore` hides the storage
/// file and its temp siblings. Never fails the save.
fn ensure_gitignore(dir: &Path) {
    let gitignore = dir.join(".gitignore");
    let wanted = [
        STORAGE_FILENAME.to_string(),
        format!("{}.*.tmp", STORAGE_FILENAME),
    ];
    let existing = std::fs::read_to_string(&gitignore).unwrap_or_default();
    let missing: Vec<&str> = wanted
        .iter()
        .map(String::as_str)
        .filter(|entry| !existing.lines().any(|line| line.trim() == *entry))
        .collect();
    if missing.is_empty() {
        return;
    }
    let mut updated = existing;
    if !updated.is_empty() && !updated.ends_with('\n') {
        updated.push('\n');
    }
    for entry in missing {
        updated.push_str(entry);
        updated.push('\n');
    }
    if let Err(e) = std::fs::write(&gitignore, updated) {
        debug!("could not update {:?}: {}", gitignore, e);
    }
}

pub fn save_sync(path: &Path, stored: &StoredAccounts) -> GatewayResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
        ensure_gitignore(parent);
    }
    let json = serde_json::to_string_pretty(stored)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    let temp = temp_path_for(path);
    if let Err(e) = std::fs::write(&temp, &json) {
        let _ = std::fs::remove_file(&temp);
        return Err(e.into());
    }
    if let Err(e) = std::fs::rename(&temp, path) {
        let _ = std::fs::remove_file(&temp);
        return Err(e.into());
    }
    Ok(())
}

pub async fn save(path: &Path, stored: &StoredAccounts) -> GatewayResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
        ensure_gitignore(parent);
    }
    let json = serde_json::to_string_pretty(stored)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    let temp = temp_path_for(path);
    if let Err(e) = tokio::fs::write(&temp, &json).await {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(e.into());
    }
    if let Err(e) = tokio::fs::rename(&temp, path).await {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(e.into());
    }
    Ok(())
}
