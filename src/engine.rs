//! The pure computation: raw records in, report out. No I/O.

use crate::classify::{Classifier, HistoricalRates};
use crate::error::{PnlError, Result};
use crate::ledger::LedgerState;
use crate::normalize::{Asset, Normalizer};
use crate::reconcile::reconcile;
use crate::report::{MarketSnapshot, RecordCounts, Report, ReportInput, build_report};
use crate::source::{Address, RawEvent, TokenInfo};
use crate::stablecoins::StablecoinRegistry;
use log::info;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

pub const DEFAULT_TOLERANCE: Decimal = dec!(0.000001);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub registry: StablecoinRegistry,
    /// Relative tolerance for balance reconciliation.
    pub tolerance: Decimal,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            registry: StablecoinRegistry::default(),
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

/// Everything one run needs, already fetched.
#[derive(Debug, Clone)]
pub struct AnalysisInput {
    pub wallet: Address,
    pub token_address: Address,
    pub token: TokenInfo,
    /// Token and stablecoin transfer records, possibly overlapping.
    pub transfers: Vec<RawEvent>,
    pub native: Vec<RawEvent>,
    pub market: MarketSnapshot,
    pub historical_rates: HistoricalRates,
}

#[derive(Debug, Clone)]
pub struct Analysis {
    pub report: Report,
    pub ledger: LedgerState,
}

pub struct Engine {
    config: EngineConfig,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Engine { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn run(&self, input: &AnalysisInput) -> Result<Analysis> {
        let normalized = Normalizer::new(
            &input.wallet,
            &input.token_address,
            input.token.decimals,
            &self.config.registry,
        )
        .normalize(&input.transfers, &input.native);

        if !normalized.events.iter().any(|e| e.asset == Asset::Token) {
            return Err(PnlError::NoTransfers {
                token: input.token_address.to_string(),
                wallet: input.wallet.to_string(),
            });
        }

        let classified = Classifier::new(&self.config.registry, &input.historical_rates)
            .classify(&normalized.events);
        info!("Classified {} token events", classified.len());

        let ledger = LedgerState::replay(&classified);
        let reconciliation = reconcile(
            ledger.current_balance(),
            input.market.authoritative_balance,
            self.config.tolerance,
        );

        let report = build_report(ReportInput {
            token_address: &input.token_address,
            wallet_address: &input.wallet,
            token: &input.token,
            ledger: &ledger,
            market: &input.market,
            records: RecordCounts {
                malformed: normalized.malformed.len(),
                duplicates: normalized.duplicates,
                ignored: normalized.ignored,
            },
            reconciliation,
        });
        info!(
            "{} ({}): {} buys, {} sells, realized {} ETH",
            report.token_name,
            report.token_symbol,
            report.buy_count,
            report.sell_count,
            report.realized_pnl_eth
        );

        Ok(Analysis { report, ledger })
    }
}
