//! `ChainData` and `PriceOracle` backed by local explorer exports.

use crate::error::{PnlError, Result};
use crate::source::{Address, ChainData, PriceOracle, RawEvent, TokenInfo};
use csv::ReaderBuilder;
use log::{debug, info};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Market snapshot file contents.
#[derive(Debug, Clone, Deserialize)]
pub struct MarketFile {
    pub token: TokenInfo,
    #[serde(default)]
    pub balance: Option<Decimal>,
    #[serde(default)]
    pub price_eth: Option<Decimal>,
    #[serde(default)]
    pub eth_usd: Option<Decimal>,
    #[serde(default)]
    pub historical_eth_usd: BTreeMap<u64, Decimal>,
}

#[derive(Debug, Clone)]
pub struct FileSource {
    transfers: Vec<RawEvent>,
    native: Vec<RawEvent>,
    market: MarketFile,
}

impl FileSource {
    pub fn new(transfers: Vec<RawEvent>, native: Vec<RawEvent>, market: MarketFile) -> Self {
        FileSource {
            transfers,
            native,
            market,
        }
    }

    pub fn load<P: AsRef<Path>>(transfers: &[P], native: &[P], market: &Path) -> Result<Self> {
        let mut t = Vec::new();
        for path in transfers {
            t.extend(load_records(path.as_ref())?);
        }
        let mut n = Vec::new();
        for path in native {
            n.extend(load_records(path.as_ref())?);
        }
        let market: MarketFile = serde_json::from_reader(open(market)?)?;
        info!(
            "Loaded {} transfer records and {} native records",
            t.len(),
            n.len()
        );
        Ok(FileSource::new(t, n, market))
    }
}

fn open(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| {
        PnlError::DataUnavailable(format!("cannot open {}: {}", path.display(), e))
    })
}

/// Reads a JSON array or a CSV export, chosen by extension.
pub fn load_records(path: &Path) -> Result<Vec<RawEvent>> {
    let f = open(path)?;
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));
    let records = if is_json {
        serde_json::from_reader(f)?
    } else {
        read_csv(f)?
    };
    debug!("{}: {} records", path.display(), records.len());
    Ok(records)
}

pub fn read_csv<R: Read>(reader: R) -> Result<Vec<RawEvent>> {
    let mut rdr = ReaderBuilder::new().flexible(true).from_reader(reader);
    let mut out = Vec::new();
    for row in rdr.deserialize::<RawEvent>() {
        out.push(row?);
    }
    Ok(out)
}

fn same_address(field: &Option<String>, address: &Address) -> bool {
    field
        .as_deref()
        .and_then(|s| s.parse::<Address>().ok())
        .is_some_and(|a| &a == address)
}

impl ChainData for FileSource {
    fn fetch_transfers(&self, token: &Address, wallet: &Address) -> Result<Vec<RawEvent>> {
        Ok(self
            .transfers
            .iter()
            .filter(|r| same_address(&r.contract_address, token))
            .filter(|r| same_address(&r.from, wallet) || same_address(&r.to, wallet))
            .cloned()
            .collect())
    }

    fn fetch_native_transactions(&self, _wallet: &Address) -> Result<Vec<RawEvent>> {
        Ok(self.native.clone())
    }

    fn current_balance(&self, _token: &Address, _wallet: &Address) -> Result<Option<Decimal>> {
        Ok(self.market.balance)
    }

    fn token_info(&self, _token: &Address) -> Result<TokenInfo> {
        Ok(self.market.token.clone())
    }
}

impl PriceOracle for FileSource {
    fn current_price(&self, _token: &Address) -> Option<Decimal> {
        self.market.price_eth
    }

    fn native_fiat_rate(&self) -> Option<Decimal> {
        self.market.eth_usd
    }

    fn historical_native_fiat_rate(&self, block_number: u64) -> Option<Decimal> {
        self.market.historical_eth_usd.get(&block_number).copied()
    }
}
