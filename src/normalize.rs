//! Raw records to a deduplicated, totally ordered event list.

use crate::error::RecordError;
use crate::source::{Address, RawEvent};
use crate::stablecoins::StablecoinRegistry;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

const NATIVE_DECIMALS: u32 = 18;
const MAX_DIGITS: usize = 28;

/// Log index given to native movements, which have none. Sorts them after
/// every log of their block.
pub const NATIVE_LOG_INDEX: u64 = u64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OrderingKey {
    pub block_number: u64,
    pub log_index: u64,
}

impl fmt::Display for OrderingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.log_index == NATIVE_LOG_INDEX {
            write!(f, "{}:native", self.block_number)
        } else {
            write!(f, "{}:{}", self.block_number, self.log_index)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Direction {
    In,
    Out,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Asset {
    Native,
    Stablecoin(Address),
    Token,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedEvent {
    pub key: OrderingKey,
    pub tx_hash: String,
    pub direction: Direction,
    pub asset: Asset,
    pub amount: Decimal,
    pub gas_cost_native: Decimal,
    pub time: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct Normalized {
    pub events: Vec<NormalizedEvent>,
    pub malformed: Vec<RecordError>,
    pub duplicates: usize,
    /// Records that are valid but irrelevant: other tokens, other wallets,
    /// self-transfers, zero-value token transfers.
    pub ignored: usize,
}

pub struct Normalizer<'a> {
    wallet: &'a Address,
    token: &'a Address,
    token_decimals: Option<u32>,
    registry: &'a StablecoinRegistry,
}

impl<'a> Normalizer<'a> {
    pub fn new(
        wallet: &'a Address,
        token: &'a Address,
        token_decimals: Option<u32>,
        registry: &'a StablecoinRegistry,
    ) -> Self {
        Normalizer {
            wallet,
            token,
            token_decimals,
            registry,
        }
    }

    pub fn normalize(&self, transfers: &[RawEvent], native: &[RawEvent]) -> Normalized {
        let mut out = Normalized::default();
        let mut seen_logs: HashSet<(String, u64)> = HashSet::new();
        let mut seen_native: HashSet<(String, Address, Address, BigUint)> = HashSet::new();

        for raw in transfers {
            match self.transfer(raw) {
                Ok(Some(ev)) => {
                    if seen_logs.insert((ev.tx_hash.clone(), ev.key.log_index)) {
                        out.events.push(ev);
                    } else {
                        out.duplicates += 1;
                    }
                }
                Ok(None) => out.ignored += 1,
                Err(e) => {
                    warn!("Dropping transfer record: {}", e);
                    out.malformed.push(e);
                }
            }
        }

        for raw in native {
            match self.native(raw) {
                Ok(Some((ev, from, to, value))) => {
                    if seen_native.insert((ev.tx_hash.clone(), from, to, value)) {
                        out.events.push(ev);
                    } else {
                        out.duplicates += 1;
                    }
                }
                Ok(None) => out.ignored += 1,
                Err(e) => {
                    warn!("Dropping native record: {}", e);
                    out.malformed.push(e);
                }
            }
        }

        out.events.sort_by(|a, b| {
            a.key
                .cmp(&b.key)
                .then_with(|| a.tx_hash.cmp(&b.tx_hash))
                .then_with(|| a.asset.cmp(&b.asset))
                .then_with(|| a.direction.cmp(&b.direction))
                .then_with(|| a.amount.cmp(&b.amount))
        });

        debug!(
            "Normalized {} events ({} malformed, {} duplicates, {} ignored)",
            out.events.len(),
            out.malformed.len(),
            out.duplicates,
            out.ignored
        );
        out
    }

    fn transfer(&self, raw: &RawEvent) -> Result<Option<NormalizedEvent>, RecordError> {
        let id = raw.id();
        let contract = required(&id, "contractAddress", &raw.contract_address)?;
        let contract = parse_address(&id, "contractAddress", contract)?;

        let (asset, decimals_fallback) = if &contract == self.token {
            (Asset::Token, self.token_decimals)
        } else if let Some(coin) = self.registry.get(&contract) {
            (Asset::Stablecoin(contract.clone()), Some(coin.decimals))
        } else {
            return Ok(None);
        };

        let tx_hash = required(&id, "hash", &raw.hash)?.to_ascii_lowercase();
        let block_number = required(&id, "blockNumber", &raw.block_number)?;
        let block_number = parse_u64(&id, "blockNumber", block_number)?;
        let log_index = required(&id, "logIndex", &raw.log_index)?;
        let log_index = parse_u64(&id, "logIndex", log_index)?;
        let decimals = match present(&raw.token_decimal) {
            Some(d) => parse_decimals(&id, d)?,
            None => decimals_fallback.ok_or(RecordError::MissingField {
                id: id.clone(),
                field: "tokenDecimal",
            })?,
        };
        let value = parse_uint(&id, "value", required(&id, "value", &raw.value)?)?;
        let Some(direction) = self.direction(&id, raw)? else {
            return Ok(None);
        };
        if value.is_zero() && asset == Asset::Token {
            return Ok(None);
        }
        let amount = if is_error(raw) {
            Decimal::ZERO
        } else {
            scale_amount(&value, decimals).ok_or_else(|| RecordError::InvalidNumber {
                id: id.clone(),
                field: "value",
                value: value.to_string(),
            })?
        };

        Ok(Some(NormalizedEvent {
            key: OrderingKey {
                block_number,
                log_index,
            },
            tx_hash,
            direction,
            asset,
            amount,
            gas_cost_native: gas_cost(&id, raw)?,
            time: parse_time(&id, raw)?,
        }))
    }

    /// Native movement plus its dedup identity: sender, recipient and the
    /// parsed value, so decimal and hex copies of one record collide.
    fn native(
        &self,
        raw: &RawEvent,
    ) -> Result<Option<(NormalizedEvent, Address, Address, BigUint)>, RecordError> {
        let id = raw.id();
        let tx_hash = required(&id, "hash", &raw.hash)?.to_ascii_lowercase();
        let block_number = required(&id, "blockNumber", &raw.block_number)?;
        let block_number = parse_u64(&id, "blockNumber", block_number)?;
        let value = parse_uint(&id, "value", required(&id, "value", &raw.value)?)?;
        let from = parse_address(&id, "from", required(&id, "from", &raw.from)?)?;
        let to = parse_address(&id, "to", required(&id, "to", &raw.to)?)?;
        let Some(direction) = self.direction(&id, raw)? else {
            return Ok(None);
        };
        let amount = if is_error(raw) {
            Decimal::ZERO
        } else {
            scale_amount(&value, NATIVE_DECIMALS).ok_or_else(|| RecordError::InvalidNumber {
                id: id.clone(),
                field: "value",
                value: value.to_string(),
            })?
        };

        let ev = NormalizedEvent {
            key: OrderingKey {
                block_number,
                log_index: NATIVE_LOG_INDEX,
            },
            tx_hash,
            direction,
            asset: Asset::Native,
            amount,
            gas_cost_native: gas_cost(&id, raw)?,
            time: parse_time(&id, raw)?,
        };
        Ok(Some((ev, from, to, value)))
    }

    /// Direction relative to the wallet; `None` when the wallet is on neither
    /// side or on both.
    fn direction(&self, id: &str, raw: &RawEvent) -> Result<Option<Direction>, RecordError> {
        let from = parse_address(id, "from", required(id, "from", &raw.from)?)?;
        let to = parse_address(id, "to", required(id, "to", &raw.to)?)?;
        Ok(match (&from == self.wallet, &to == self.wallet) {
            (true, false) => Some(Direction::Out),
            (false, true) => Some(Direction::In),
            _ => None,
        })
    }
}

fn present(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn required<'r>(
    id: &str,
    name: &'static str,
    field: &'r Option<String>,
) -> Result<&'r str, RecordError> {
    present(field).ok_or_else(|| RecordError::MissingField {
        id: id.to_string(),
        field: name,
    })
}

fn is_error(raw: &RawEvent) -> bool {
    matches!(present(&raw.is_error), Some("1"))
}

fn parse_address(id: &str, field: &'static str, s: &str) -> Result<Address, RecordError> {
    s.parse().map_err(|_| RecordError::InvalidAddress {
        id: id.to_string(),
        field,
        value: s.to_string(),
    })
}

/// Decimal or `0x` hex unsigned integer of arbitrary width.
pub fn parse_uint(id: &str, field: &'static str, s: &str) -> Result<BigUint, RecordError> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some("") => Some(BigUint::zero()),
        Some(hex) => BigUint::parse_bytes(hex.as_bytes(), 16),
        None => BigUint::parse_bytes(s.as_bytes(), 10),
    };
    parsed.ok_or_else(|| RecordError::InvalidNumber {
        id: id.to_string(),
        field,
        value: s.to_string(),
    })
}

fn parse_u64(id: &str, field: &'static str, s: &str) -> Result<u64, RecordError> {
    let n = parse_uint(id, field, s)?;
    n.to_u64().ok_or_else(|| RecordError::InvalidNumber {
        id: id.to_string(),
        field,
        value: s.to_string(),
    })
}

fn parse_decimals(id: &str, s: &str) -> Result<u32, RecordError> {
    let invalid = || RecordError::InvalidDecimals {
        id: id.to_string(),
        value: s.to_string(),
    };
    let n = parse_u64(id, "tokenDecimal", s).map_err(|_| invalid())?;
    if n > MAX_DIGITS as u64 {
        return Err(invalid());
    }
    Ok(n as u32)
}

fn gas_cost(id: &str, raw: &RawEvent) -> Result<Decimal, RecordError> {
    let (Some(used), Some(price)) = (present(&raw.gas_used), present(&raw.gas_price)) else {
        return Ok(Decimal::ZERO);
    };
    let wei = parse_uint(id, "gasUsed", used)? * parse_uint(id, "gasPrice", price)?;
    scale_amount(&wei, NATIVE_DECIMALS).ok_or_else(|| RecordError::InvalidNumber {
        id: id.to_string(),
        field: "gasPrice",
        value: price.to_string(),
    })
}

fn parse_time(id: &str, raw: &RawEvent) -> Result<Option<DateTime<Utc>>, RecordError> {
    let Some(ts) = present(&raw.time_stamp) else {
        return Ok(None);
    };
    let secs = parse_u64(id, "timeStamp", ts)?;
    Ok(i64::try_from(secs)
        .ok()
        .and_then(|s| DateTime::from_timestamp(s, 0)))
}

/// Converts an integer amount in smallest units to a `Decimal`.
///
/// Fractional digits beyond 28 significant digits are truncated. Returns
/// `None` when the integer part alone does not fit.
pub fn scale_amount(raw: &BigUint, decimals: u32) -> Option<Decimal> {
    let decimals = decimals as usize;
    if decimals > MAX_DIGITS {
        return None;
    }
    let digits = raw.to_str_radix(10);
    let padded = format!("{:0>width$}", digits, width = decimals + 1);
    let (int_part, frac_part) = padded.split_at(padded.len() - decimals);
    let int_part = match int_part.trim_start_matches('0') {
        "" => "0",
        trimmed => trimmed,
    };
    let int_digits = if int_part == "0" { 0 } else { int_part.len() };
    if int_digits > MAX_DIGITS {
        return None;
    }
    let keep = frac_part.len().min(MAX_DIGITS - int_digits);
    let frac_part = &frac_part[..keep];
    let text = if frac_part.is_empty() {
        int_part.to_string()
    } else {
        format!("{}.{}", int_part, frac_part)
    };
    Decimal::from_str(&text).ok().map(|d| d.normalize())
}
