//! Fetches everything a run needs from the collaborators, then hands it to
//! the engine.

use crate::classify::HistoricalRates;
use crate::engine::{Analysis, AnalysisInput, Engine, EngineConfig};
use crate::error::{PnlError, Result};
use crate::normalize::parse_uint;
use crate::report::MarketSnapshot;
use crate::source::{Address, ChainData, PriceOracle, RawEvent};
use log::{info, warn};
use num_traits::ToPrimitive;
use std::collections::{BTreeSet, HashSet};

pub struct Analyzer<C, P> {
    chain: C,
    oracle: P,
    engine: Engine,
}

impl<C: ChainData, P: PriceOracle> Analyzer<C, P> {
    pub fn new(chain: C, oracle: P, config: EngineConfig) -> Self {
        Analyzer {
            chain,
            oracle,
            engine: Engine::new(config),
        }
    }

    pub fn analyze(&self, wallet: &Address, token: &Address) -> Result<Analysis> {
        info!("Fetching transfers of {} for {}", token, wallet);
        let transfers = self.chain.fetch_transfers(token, wallet)?;
        if transfers.is_empty() {
            return Err(PnlError::NoTransfers {
                token: token.to_string(),
                wallet: wallet.to_string(),
            });
        }

        let token_txs: HashSet<String> = transfers
            .iter()
            .filter_map(|r| r.hash.as_deref())
            .map(|h| h.trim().to_ascii_lowercase())
            .collect();

        let mut counter_records = Vec::new();
        for coin in self.engine.config().registry.addresses() {
            if coin == token {
                continue;
            }
            let records = self.chain.fetch_transfers(coin, wallet)?;
            counter_records.extend(records.into_iter().filter(|r| {
                r.hash
                    .as_deref()
                    .is_some_and(|h| token_txs.contains(&h.trim().to_ascii_lowercase()))
            }));
        }
        info!(
            "{} token records, {} stablecoin records in the same transactions",
            transfers.len(),
            counter_records.len()
        );

        let native = self.chain.fetch_native_transactions(wallet)?;
        let token_info = self.chain.token_info(token)?;
        let authoritative_balance = self.chain.current_balance(token, wallet)?;

        let market = MarketSnapshot {
            current_price_native: self.oracle.current_price(token),
            native_fiat_rate: self.oracle.native_fiat_rate(),
            authoritative_balance,
        };
        if market.current_price_native.is_none() {
            warn!("No current price for {}; holdings left unattributed", token);
        }
        if market.native_fiat_rate.is_none() {
            warn!("No native/fiat rate; fiat figures left unattributed");
        }

        let mut historical_rates = HistoricalRates::new();
        for block in rate_blocks(&counter_records) {
            match self.oracle.historical_native_fiat_rate(block) {
                Some(rate) => {
                    historical_rates.insert(block, rate);
                }
                None => warn!("No historical native/fiat rate at block {}", block),
            }
        }

        let mut all_transfers = transfers;
        all_transfers.extend(counter_records);

        self.engine.run(&AnalysisInput {
            wallet: wallet.clone(),
            token_address: token.clone(),
            token: token_info,
            transfers: all_transfers,
            native,
            market,
            historical_rates,
        })
    }
}

/// Blocks of stablecoin records whose trade value needs a historical rate.
/// Unparseable block numbers are left for the normalizer to report.
fn rate_blocks(records: &[RawEvent]) -> BTreeSet<u64> {
    records
        .iter()
        .filter_map(|r| r.block_number.as_deref())
        .filter_map(|b| parse_uint("", "blockNumber", b.trim()).ok())
        .filter_map(|b| b.to_u64())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_blocks_parse_both_encodings_and_skip_garbage() {
        let rec = |b: &str| RawEvent {
            block_number: Some(b.to_string()),
            ..RawEvent::default()
        };
        let blocks = rate_blocks(&[rec("16"), rec("0x10"), rec("0x11"), rec("soon")]);
        assert_eq!(blocks.into_iter().collect::<Vec<_>>(), vec![16, 17]);
    }
}
