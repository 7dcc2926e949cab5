use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("no usable accounts: {0}")]
    NoAccounts(String),

    #[error("token refresh failed: {0}")]
    TokenRefreshFailed(String),

    #[error("account storage is corrupt: {0}")]
    StorageCorrupt(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("request cancelled by host")]
    Cancelled,
}

pub type GatewayResult<T> = Result<T, GatewayError>;
