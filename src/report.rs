//! Aggregation of the final ledger state into the published report.

use crate::error::PnlError;
use crate::ledger::LedgerState;
use crate::reconcile::Reconciliation;
use crate::source::{Address, TokenInfo};
use rust_decimal::prelude::*;
use serde::Serialize;

pub fn q2(x: Decimal) -> Decimal {
    x.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

pub fn q4(x: Decimal) -> Decimal {
    x.round_dp_with_strategy(4, RoundingStrategy::MidpointAwayFromZero)
}

pub fn q8(x: Decimal) -> Decimal {
    x.round_dp_with_strategy(8, RoundingStrategy::MidpointAwayFromZero)
}

pub fn q18(x: Decimal) -> Decimal {
    x.round_dp_with_strategy(18, RoundingStrategy::MidpointAwayFromZero)
        .normalize()
}

/// Values supplied by the price oracle and the chain at report time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarketSnapshot {
    pub current_price_native: Option<Decimal>,
    pub native_fiat_rate: Option<Decimal>,
    pub authoritative_balance: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostics {
    pub malformed_records: usize,
    pub duplicate_records: usize,
    pub ignored_records: usize,
    pub unknown_count: usize,
    pub unpriced_count: usize,
    pub basis_gap: bool,
    pub basis_gap_quantity: Decimal,
    pub reconciliation: Reconciliation,
}

/// Fields that depend on a rate that was unavailable are `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    pub token_address: Address,
    pub wallet_address: Address,
    pub token_name: String,
    pub token_symbol: String,
    pub buy_count: usize,
    pub sell_count: usize,
    pub total_tokens_bought: Decimal,
    pub total_tokens_sold: Decimal,
    pub current_balance: Decimal,
    pub total_in_eth: Decimal,
    pub total_out_eth: Decimal,
    pub total_gas_eth: Decimal,
    pub avg_buy_price_eth: Option<Decimal>,
    pub avg_sell_price_eth: Option<Decimal>,
    pub remaining_cost_eth: Decimal,
    pub current_price_eth: Option<Decimal>,
    pub current_holdings_eth: Option<Decimal>,
    pub current_holdings_usd: Option<Decimal>,
    pub realized_pnl_eth: Decimal,
    pub realized_pnl_usd: Option<Decimal>,
    pub unrealized_pnl_eth: Option<Decimal>,
    pub unrealized_pnl_usd: Option<Decimal>,
    pub total_pnl_eth: Option<Decimal>,
    pub total_pnl_usd: Option<Decimal>,
    pub eth_price_usd: Option<Decimal>,
    pub diagnostics: Diagnostics,
}

/// Record-level counts gathered before the ledger ran.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordCounts {
    pub malformed: usize,
    pub duplicates: usize,
    pub ignored: usize,
}

pub struct ReportInput<'a> {
    pub token_address: &'a Address,
    pub wallet_address: &'a Address,
    pub token: &'a TokenInfo,
    pub ledger: &'a LedgerState,
    pub market: &'a MarketSnapshot,
    pub records: RecordCounts,
    pub reconciliation: Reconciliation,
}

pub fn build_report(input: ReportInput<'_>) -> Report {
    let ledger = input.ledger;
    let market = input.market;
    let current_balance = ledger.current_balance();
    let remaining_cost = ledger.remaining_cost_native();
    let fiat = |native: Option<Decimal>| {
        native
            .zip(market.native_fiat_rate)
            .and_then(|(v, r)| v.checked_mul(r))
    };

    let current_holdings_eth = market
        .current_price_native
        .and_then(|p| current_balance.checked_mul(p));
    let unrealized_pnl_eth = current_holdings_eth.map(|h| h - remaining_cost);
    let realized_pnl_eth = ledger.realized_pnl_native;
    let total_pnl_eth = unrealized_pnl_eth.map(|u| realized_pnl_eth + u);

    Report {
        token_address: input.token_address.clone(),
        wallet_address: input.wallet_address.clone(),
        token_name: input.token.name.clone(),
        token_symbol: input.token.symbol.clone(),
        buy_count: ledger.buy_count,
        sell_count: ledger.sell_count,
        total_tokens_bought: ledger.total_tokens_bought,
        total_tokens_sold: ledger.total_tokens_sold,
        current_balance,
        total_in_eth: ledger.total_in_native,
        total_out_eth: ledger.total_out_native,
        total_gas_eth: ledger.total_gas_native,
        avg_buy_price_eth: ratio(ledger.total_in_native, ledger.priced_tokens_bought),
        avg_sell_price_eth: ratio(ledger.total_out_native, ledger.priced_tokens_sold),
        remaining_cost_eth: remaining_cost,
        current_price_eth: market.current_price_native,
        current_holdings_eth,
        current_holdings_usd: fiat(current_holdings_eth),
        realized_pnl_eth,
        realized_pnl_usd: fiat(Some(realized_pnl_eth)),
        unrealized_pnl_eth,
        unrealized_pnl_usd: fiat(unrealized_pnl_eth),
        total_pnl_eth,
        total_pnl_usd: fiat(total_pnl_eth),
        eth_price_usd: market.native_fiat_rate,
        diagnostics: Diagnostics {
            malformed_records: input.records.malformed,
            duplicate_records: input.records.duplicates,
            ignored_records: input.records.ignored,
            unknown_count: ledger.unknown_count,
            unpriced_count: ledger.unpriced_count,
            basis_gap: ledger.basis_gap(),
            basis_gap_quantity: ledger.basis_gap_quantity,
            reconciliation: input.reconciliation,
        },
    }
}

fn ratio(value: Decimal, quantity: Decimal) -> Option<Decimal> {
    if quantity.is_zero() {
        None
    } else {
        Some(value / quantity)
    }
}

/// Tagged success/failure result for a presentation layer.
#[derive(Debug, Serialize)]
pub struct Envelope {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Report>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
}

impl From<Result<Report, PnlError>> for Envelope {
    fn from(result: Result<Report, PnlError>) -> Self {
        match result {
            Ok(report) => Envelope {
                success: true,
                data: Some(report),
                error: None,
                error_kind: None,
            },
            Err(e) => Envelope {
                success: false,
                data: None,
                error: Some(e.to_string()),
                error_kind: Some(e.kind()),
            },
        }
    }
}
