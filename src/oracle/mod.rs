//! Spot price providers

pub mod pacifica;

pub use crate::models::PriceTick;
pub use pacifica::PacificaOracle;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OracleError {
    #[error("Asset not supported: {0}")]
    AssetNotSupported(String),

    #[error("Price provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Price provider rate limited")]
    RateLimited,

    #[error("Invalid price response: {0}")]
    InvalidResponse(String),

    #[error("Price request timed out")]
    Timeout,
}

impl OracleError {
    pub fn code(&self) -> &'static str {
        match self {
            OracleError::AssetNotSupported(_) => "ASSET_NOT_SUPPORTED",
            OracleError::ProviderUnavailable(_) => "PROVIDER_UNAVAILABLE",
            OracleError::RateLimited => "RATE_LIMITED",
            OracleError::InvalidResponse(_) => "INVALID_RESPONSE",
            OracleError::Timeout => "TIMEOUT",
        }
    }
}

#[async_trait]
pub trait PriceOracle: Send + Sync {
    /// Current spot price for `asset`, fixed point with 6 decimals
    async fn get_spot_price(&self, asset: &str) -> Result<PriceTick, OracleError>;

    async fn is_healthy(&self) -> bool;

    fn name(&self) -> &str;
}
