//! Record shapes handed over by data sources, and the collaborator traits the
//! analyzer fetches them through.

use crate::error::{AddressError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lowercased `0x`-prefixed 20-byte hex address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        let hex = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .ok_or_else(|| AddressError(s.to_string()))?;
        if hex.len() != 40 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AddressError(s.to_string()));
        }
        Ok(Address(format!("0x{}", hex.to_ascii_lowercase())))
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        value.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One transfer or native-currency movement exactly as a source reported it.
///
/// Field names follow the block-explorer export; RPC-shaped records are
/// accepted through the aliases. Numeric fields may be decimal or `0x` hex.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    #[serde(default, alias = "transactionHash", alias = "tx_hash")]
    pub hash: Option<String>,
    #[serde(default, rename = "blockNumber", alias = "block_number")]
    pub block_number: Option<String>,
    #[serde(default, rename = "logIndex", alias = "log_index")]
    pub log_index: Option<String>,
    #[serde(default, rename = "timeStamp", alias = "timestamp")]
    pub time_stamp: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default, rename = "contractAddress", alias = "address")]
    pub contract_address: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default, rename = "tokenDecimal", alias = "decimals")]
    pub token_decimal: Option<String>,
    #[serde(default, rename = "gasUsed", alias = "gas_used")]
    pub gas_used: Option<String>,
    #[serde(default, rename = "gasPrice", alias = "effectiveGasPrice")]
    pub gas_price: Option<String>,
    #[serde(default, rename = "isError")]
    pub is_error: Option<String>,
}

impl RawEvent {
    /// Short identifier for diagnostics.
    pub fn id(&self) -> String {
        format!(
            "{}:{}",
            self.hash.as_deref().unwrap_or("?"),
            self.log_index.as_deref().unwrap_or("-")
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub name: String,
    pub symbol: String,
    #[serde(default)]
    pub decimals: Option<u32>,
}

/// Chain-facing collaborator: explorer or RPC client.
///
/// Implementations return `PnlError::DataUnavailable` when a fetch fails
/// outright; the analyzer treats that as fatal.
pub trait ChainData {
    fn fetch_transfers(&self, token: &Address, wallet: &Address) -> Result<Vec<RawEvent>>;

    fn fetch_native_transactions(&self, wallet: &Address) -> Result<Vec<RawEvent>>;

    /// Authoritative on-chain balance. `None` when the query is unsupported.
    fn current_balance(&self, token: &Address, wallet: &Address) -> Result<Option<Decimal>>;

    fn token_info(&self, token: &Address) -> Result<TokenInfo>;
}

/// Price collaborator. Missing rates are not errors.
pub trait PriceOracle {
    /// Native currency per token.
    fn current_price(&self, token: &Address) -> Option<Decimal>;

    fn native_fiat_rate(&self) -> Option<Decimal>;

    fn historical_native_fiat_rate(&self, block_number: u64) -> Option<Decimal>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_is_lowercased() {
        let a: Address = "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48".parse().unwrap();
        assert_eq!(a.as_str(), "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48");
    }

    #[test]
    fn address_rejects_bad_length() {
        assert!("0x1234".parse::<Address>().is_err());
        assert!("a0b86991c6218b36c1d19d4a2e9eb0ce3606eb48".parse::<Address>().is_err());
    }

    #[test]
    fn raw_event_accepts_rpc_aliases() {
        let json = r#"{
            "transactionHash": "0xabc",
            "block_number": "0x10",
            "logIndex": "0x2",
            "address": "0x514910771af9ca656af840dff83e8264ecf986ca",
            "from": "0x1",
            "to": "0x2",
            "value": "0x0de0b6b3a7640000",
            "decimals": "18",
            "effectiveGasPrice": "0x3b9aca00"
        }"#;
        let ev: RawEvent = serde_json::from_str(json).unwrap();
        assert_eq!(ev.hash.as_deref(), Some("0xabc"));
        assert_eq!(ev.block_number.as_deref(), Some("0x10"));
        assert_eq!(ev.gas_price.as_deref(), Some("0x3b9aca00"));
        assert_eq!(ev.gas_used, None);
        assert_eq!(ev.id(), "0xabc:0x2");
    }
}
