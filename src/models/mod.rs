mod account;
mod body;

pub use account::{Account, AccountSummary, RateLimitReason, StoredAccounts, STORAGE_VERSION};
pub use body::{InputItem, RequestBody};
