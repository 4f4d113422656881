use async_trait::async_trait;

pub mod portal;

pub use portal::PortalSource;

#[derive(Debug, thiserror::Error)]
pub enum AcquireError {
    #[error("portal request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("no balance found in portal response (body starts {snippet:?})")]
    Unmatched { snippet: String },
    #[error("matched balance {text:?} is not a number")]
    Malformed { text: String },
}

/// An upstream that reports the account's remaining credit.
///
/// The scheduler and the manual-refresh endpoint share one implementation;
/// tests substitute stubs.
#[async_trait]
pub trait BalanceSource: Send + Sync {
    async fn fetch_kwh(&self) -> Result<f64, AcquireError>;
}
