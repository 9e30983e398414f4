//! Pacifica REST price provider
//!
//! Uses the `oracle` field of `GET /api/v1/info/prices`, which is the price the
//! pools settle against.

use super::{OracleError, PriceOracle, PriceTick};
use crate::config::OracleConfig;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::str::FromStr;
use tracing::{debug, warn};

const SOURCE: &str = "pacifica";
const PRICE_SCALE: u64 = 1_000_000;

#[derive(Debug, Deserialize)]
struct PricesResponse {
    success: bool,
    #[serde(default)]
    data: Option<Vec<Value>>,
    #[serde(default)]
    error: Option<String>,
}

pub struct PacificaOracle {
    client: reqwest::Client,
    base_url: String,
}

impl PacificaOracle {
    pub fn new(config: &OracleConfig) -> Result<Self, OracleError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| OracleError::ProviderUnavailable(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn prices_url(&self) -> String {
        format!("{}/api/v1/info/prices", self.base_url)
    }

    async fn fetch_prices(&self) -> Result<Vec<Value>, OracleError> {
        let response = self
            .client
            .get(self.prices_url())
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(OracleError::RateLimited);
        }
        if !status.is_success() {
            return Err(OracleError::ProviderUnavailable(format!("HTTP {}", status)));
        }

        let body: PricesResponse = response
            .json()
            .await
            .map_err(|e| OracleError::InvalidResponse(e.to_string()))?;

        if !body.success {
            return Err(OracleError::ProviderUnavailable(
                body.error.unwrap_or_else(|| "Unknown error".to_string()),
            ));
        }

        body.data
            .ok_or_else(|| OracleError::InvalidResponse("missing data".to_string()))
    }
}

fn map_transport_error(err: reqwest::Error) -> OracleError {
    if err.is_timeout() {
        OracleError::Timeout
    } else {
        OracleError::ProviderUnavailable(err.to_string())
    }
}

/// Decimal price string to 6-decimal fixed point, rounding half away from zero
pub fn to_fixed_point(raw: &str) -> Result<u64, OracleError> {
    let price = Decimal::from_str(raw.trim())
        .or_else(|_| Decimal::from_scientific(raw.trim()))
        .map_err(|e| OracleError::InvalidResponse(format!("bad price {:?}: {}", raw, e)))?;

    if price.is_sign_negative() || price.is_zero() {
        return Err(OracleError::InvalidResponse(format!("non-positive price {}", raw)));
    }

    price
        .checked_mul(Decimal::from(PRICE_SCALE))
        .ok_or_else(|| OracleError::InvalidResponse(format!("price out of range {}", raw)))?
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_u64()
        .ok_or_else(|| OracleError::InvalidResponse(format!("price out of range {}", raw)))
}

/// Provider timestamp in milliseconds, if present
fn entry_timestamp(entry: &Value) -> Option<DateTime<Utc>> {
    entry
        .get("timestamp")
        .and_then(Value::as_i64)
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
}

/// Turn one provider entry into a tick; the content hash covers the raw entry
pub fn parse_price_entry(entry: &Value) -> Result<PriceTick, OracleError> {
    let oracle = entry
        .get("oracle")
        .and_then(Value::as_str)
        .ok_or_else(|| OracleError::InvalidResponse("missing oracle price".to_string()))?;

    let timestamp = entry_timestamp(entry).unwrap_or_else(Utc::now);

    let raw = serde_json::to_vec(entry).map_err(|e| OracleError::InvalidResponse(e.to_string()))?;

    Ok(PriceTick {
        price: to_fixed_point(oracle)?,
        timestamp,
        source: SOURCE.to_string(),
        content_hash: hex::encode(Sha256::digest(&raw)),
    })
}

fn find_symbol<'a>(entries: &'a [Value], asset: &str) -> Option<&'a Value> {
    entries
        .iter()
        .find(|e| e.get("symbol").and_then(Value::as_str) == Some(asset))
}

#[async_trait]
impl PriceOracle for PacificaOracle {
    async fn get_spot_price(&self, asset: &str) -> Result<PriceTick, OracleError> {
        let entries = self.fetch_prices().await?;
        let entry = find_symbol(&entries, asset)
            .ok_or_else(|| OracleError::AssetNotSupported(asset.to_string()))?;

        let tick = parse_price_entry(entry)?;
        debug!(asset = %asset, price = tick.price, "Fetched spot price");
        Ok(tick)
    }

    async fn is_healthy(&self) -> bool {
        match self.client.get(self.prices_url()).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                warn!("Price provider health check failed: {}", e);
                false
            }
        }
    }

    fn name(&self) -> &str {
        SOURCE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fixed_point_conversion() {
        assert_eq!(to_fixed_point("97000.5").unwrap(), 97_000_500_000);
        assert_eq!(to_fixed_point("0.0000005").unwrap(), 1);
        assert_eq!(to_fixed_point("0.0000004").unwrap(), 0);
        assert_eq!(to_fixed_point("3412.123456789").unwrap(), 3_412_123_457);
        assert!(to_fixed_point("-1").is_err());
        assert!(to_fixed_point("abc").is_err());
    }

    #[test]
    fn test_parse_price_entry() {
        let entry = json!({
            "symbol": "BTC",
            "oracle": "64123.25",
            "mark": "64130.00",
            "timestamp": 1_717_000_000_000i64
        });

        let tick = parse_price_entry(&entry).unwrap();
        assert_eq!(tick.price, 64_123_250_000);
        assert_eq!(tick.source, "pacifica");
        assert_eq!(tick.content_hash.len(), 64);
        assert_eq!(tick.timestamp.timestamp_millis(), 1_717_000_000_000);
        assert_eq!(entry_timestamp(&entry), Some(tick.timestamp));

        // Same payload hashes the same
        assert_eq!(parse_price_entry(&entry).unwrap().content_hash, tick.content_hash);
    }

    #[test]
    fn test_missing_symbol() {
        let entries = vec![json!({"symbol": "ETH", "oracle": "3000"})];
        assert!(find_symbol(&entries, "BTC").is_none());
        assert!(find_symbol(&entries, "ETH").is_some());
    }

    #[test]
    fn test_missing_oracle_field() {
        let entry = json!({"symbol": "BTC"});
        assert!(matches!(
            parse_price_entry(&entry),
            Err(OracleError::InvalidResponse(_))
        ));
    }
}
