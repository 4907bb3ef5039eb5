//! FIFO cost-basis ledger.

use crate::classify::{ClassifiedEvent, TradeKind};
use crate::normalize::{Direction, OrderingKey};
use crate::report::{q8, q18};
use log::{debug, warn};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::VecDeque;

/// An acquired quantity with its own cost basis.
///
/// The total cost is kept rather than the unit cost so that consuming a
/// whole lot releases its cost exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lot {
    pub quantity: Decimal,
    pub cost_native: Decimal,
    pub acquired_at: OrderingKey,
}

impl Lot {
    pub fn unit_cost_native(&self) -> Decimal {
        if self.quantity.is_zero() {
            Decimal::ZERO
        } else {
            self.cost_native / self.quantity
        }
    }
}

/// One audit line per processed event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerRow {
    pub time: String,
    pub tx_hash: String,
    pub block_number: u64,
    pub log_index: String,
    pub event_type: String,
    pub units_in: String,
    pub units_out: String,
    pub counter_value_eth: String,
    pub cost_basis_eth: String,
    pub realized_pnl_eth: String,
    pub gas_eth: String,
    pub lot_units_after: String,
    pub lot_cost_eth_after: String,
    pub notes: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerState {
    pub open_lots: VecDeque<Lot>,
    pub buy_count: usize,
    pub sell_count: usize,
    pub unknown_count: usize,
    pub unpriced_count: usize,
    pub total_tokens_bought: Decimal,
    pub total_tokens_sold: Decimal,
    /// Quantities whose counter value was attributed.
    pub priced_tokens_bought: Decimal,
    pub priced_tokens_sold: Decimal,
    pub total_in_native: Decimal,
    pub total_out_native: Decimal,
    pub total_gas_native: Decimal,
    pub realized_pnl_native: Decimal,
    pub basis_gap_quantity: Decimal,
    pub rows: Vec<LedgerRow>,
    last_key: Option<OrderingKey>,
}

impl LedgerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replays a classified stream in order.
    pub fn replay(events: &[ClassifiedEvent]) -> Self {
        let mut state = LedgerState::new();
        for ev in events {
            state.apply(ev);
        }
        state
    }

    pub fn current_balance(&self) -> Decimal {
        self.open_lots.iter().map(|l| l.quantity).sum()
    }

    pub fn remaining_cost_native(&self) -> Decimal {
        self.open_lots.iter().map(|l| l.cost_native).sum()
    }

    pub fn basis_gap(&self) -> bool {
        self.basis_gap_quantity > Decimal::ZERO
    }

    pub fn apply(&mut self, ev: &ClassifiedEvent) {
        let key = ev.event.key;
        if let Some(last) = self.last_key
            && key < last
        {
            warn!(
                "Event {} in {} applied after {}; cost basis depends on order",
                key, ev.event.tx_hash, last
            );
        }
        self.last_key = Some(key);
        self.total_gas_native += ev.gas_native;

        let quantity = ev.event.amount;
        let mut row = make_row(ev);
        row.gas_eth = q18(ev.gas_native).to_string();

        match (ev.kind, ev.event.direction) {
            (TradeKind::Buy, _) | (TradeKind::Unknown, Direction::In) => {
                let priced = ev.kind == TradeKind::Buy;
                let cost = if priced { ev.counter_value_native } else { None };
                if priced {
                    self.buy_count += 1;
                } else {
                    self.unknown_count += 1;
                }
                if priced && cost.is_none() {
                    self.unpriced_count += 1;
                    row.notes = "Counter value unattributed; lot opened at zero cost".to_string();
                } else if !priced {
                    row.notes =
                        "Transfer in without counter value; lot opened at zero cost".to_string();
                }
                self.total_tokens_bought += quantity;
                if let Some(cost) = cost {
                    self.priced_tokens_bought += quantity;
                    self.total_in_native += cost;
                    row.counter_value_eth = q18(cost).to_string();
                }
                self.open_lots.push_back(Lot {
                    quantity,
                    cost_native: cost.unwrap_or(Decimal::ZERO),
                    acquired_at: key,
                });
                row.units_in = q18(quantity).to_string();
            }
            (TradeKind::Sell, _) | (TradeKind::Unknown, Direction::Out) => {
                let priced = ev.kind == TradeKind::Sell;
                let proceeds = if priced { ev.counter_value_native } else { None };
                if priced {
                    self.sell_count += 1;
                } else {
                    self.unknown_count += 1;
                    row.notes = "Transfer out without counter value; no PnL realized".to_string();
                }
                if priced && proceeds.is_none() {
                    self.unpriced_count += 1;
                    row.notes = "Counter value unattributed; no PnL realized".to_string();
                }

                let (cost, gap) = self.consume(quantity);
                self.total_tokens_sold += quantity;
                if gap > Decimal::ZERO {
                    warn!(
                        "Oversold {} tokens in {}: remainder assumed zero cost basis",
                        gap, ev.event.tx_hash
                    );
                    self.basis_gap_quantity += gap;
                    row.notes = format!("Basis gap of {}; remainder at zero cost", q8(gap));
                }
                if let Some(proceeds) = proceeds {
                    let pnl = proceeds - cost;
                    self.priced_tokens_sold += quantity;
                    self.total_out_native += proceeds;
                    self.realized_pnl_native += pnl;
                    row.counter_value_eth = q18(proceeds).to_string();
                    row.realized_pnl_eth = q18(pnl).to_string();
                }
                row.units_out = q18(quantity).to_string();
                row.cost_basis_eth = q18(cost).to_string();
            }
        }

        row.lot_units_after = q18(self.current_balance()).to_string();
        row.lot_cost_eth_after = q18(self.remaining_cost_native()).to_string();
        debug!(
            "{} {}: balance {} cost {} realized {}",
            row.event_type,
            key,
            row.lot_units_after,
            row.lot_cost_eth_after,
            self.realized_pnl_native
        );
        self.rows.push(row);
    }

    /// Removes `quantity` from the front lots. Returns the cost released and
    /// the quantity that no lot covered.
    fn consume(&mut self, quantity: Decimal) -> (Decimal, Decimal) {
        let mut remaining = quantity;
        let mut cost = Decimal::ZERO;
        while remaining > Decimal::ZERO {
            let Some(lot) = self.open_lots.front_mut() else {
                break;
            };
            if lot.quantity <= remaining {
                remaining -= lot.quantity;
                cost += lot.cost_native;
                self.open_lots.pop_front();
            } else {
                let portion_cost = remaining / lot.quantity * lot.cost_native;
                lot.quantity -= remaining;
                lot.cost_native -= portion_cost;
                cost += portion_cost;
                remaining = Decimal::ZERO;
            }
        }
        (cost, remaining)
    }
}

fn make_row(ev: &ClassifiedEvent) -> LedgerRow {
    let event_type = match (ev.kind, ev.event.direction) {
        (TradeKind::Buy, _) => "buy",
        (TradeKind::Sell, _) => "sell",
        (TradeKind::Unknown, Direction::In) => "unknown_in",
        (TradeKind::Unknown, Direction::Out) => "unknown_out",
    };
    LedgerRow {
        time: ev
            .event
            .time
            .map(|t| format!("{}+00:00", t.format("%Y-%m-%dT%H:%M:%S")))
            .unwrap_or_default(),
        tx_hash: ev.event.tx_hash.clone(),
        block_number: ev.event.key.block_number,
        log_index: ev.event.key.log_index.to_string(),
        event_type: event_type.to_string(),
        units_in: String::new(),
        units_out: String::new(),
        counter_value_eth: String::new(),
        cost_basis_eth: String::new(),
        realized_pnl_eth: String::new(),
        gas_eth: String::new(),
        lot_units_after: String::new(),
        lot_cost_eth_after: String::new(),
        notes: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::CounterAsset;
    use crate::normalize::{Asset, NormalizedEvent};
    use rust_decimal_macros::dec;

    fn event(
        block: u64,
        kind: TradeKind,
        direction: Direction,
        amount: Decimal,
        value: Option<Decimal>,
    ) -> ClassifiedEvent {
        ClassifiedEvent {
            event: NormalizedEvent {
                key: OrderingKey {
                    block_number: block,
                    log_index: 0,
                },
                tx_hash: format!("0x{:x}", block),
                direction,
                asset: Asset::Token,
                amount,
                gas_cost_native: Decimal::ZERO,
                time: None,
            },
            kind,
            counter_asset: if value.is_some() {
                CounterAsset::Native
            } else {
                CounterAsset::None
            },
            counter_value_native: value,
            gas_native: Decimal::ZERO,
        }
    }

    fn buy(block: u64, amount: Decimal, cost: Decimal) -> ClassifiedEvent {
        event(block, TradeKind::Buy, Direction::In, amount, Some(cost))
    }

    fn sell(block: u64, amount: Decimal, proceeds: Decimal) -> ClassifiedEvent {
        event(block, TradeKind::Sell, Direction::Out, amount, Some(proceeds))
    }

    #[test]
    fn buys_only_realize_nothing() {
        let s = LedgerState::replay(&[
            buy(1, dec!(10), dec!(0.1)),
            buy(2, dec!(25.5), dec!(0.3)),
            buy(3, dec!(4.5), dec!(0.01)),
        ]);
        assert_eq!(s.realized_pnl_native, Decimal::ZERO);
        assert_eq!(s.current_balance(), s.total_tokens_bought);
        assert_eq!(s.current_balance(), dec!(40));
        assert_eq!(s.total_in_native, dec!(0.41));
        assert_eq!(s.buy_count, 3);
    }

    #[test]
    fn sells_consume_lots_first_in_first_out() {
        let s = LedgerState::replay(&[
            buy(1, dec!(10), dec!(10)),
            buy(2, dec!(10), dec!(20)),
            sell(3, dec!(15), dec!(45)),
        ]);
        assert_eq!(s.realized_pnl_native, dec!(25));
        assert_eq!(s.open_lots.len(), 1);
        let lot = &s.open_lots[0];
        assert_eq!(lot.quantity, dec!(5));
        assert_eq!(lot.unit_cost_native(), dec!(2));
        assert_eq!(lot.acquired_at.block_number, 2);
        assert!(!s.basis_gap());
    }

    #[test]
    fn partial_sell_of_huge_lot_does_not_overflow() {
        let s = LedgerState::replay(&[
            buy(1, dec!(1000000000000000000000000000), dec!(1000)),
            sell(2, dec!(500000000000000000000000000), dec!(600)),
        ]);
        assert_eq!(s.realized_pnl_native, dec!(100));
        assert_eq!(s.current_balance(), dec!(500000000000000000000000000));
        assert_eq!(s.remaining_cost_native(), dec!(500));
    }

    #[test]
    fn oversell_records_basis_gap_at_zero_cost() {
        let s = LedgerState::replay(&[buy(1, dec!(10), dec!(1)), sell(2, dec!(15), dec!(3))]);
        assert!(s.basis_gap());
        assert_eq!(s.basis_gap_quantity, dec!(5));
        assert_eq!(s.realized_pnl_native, dec!(2));
        assert!(s.open_lots.is_empty());
        assert!(s.rows[1].notes.contains("Basis gap"));
    }

    #[test]
    fn unknown_events_move_quantities_not_native_totals() {
        let mut gas_in = event(1, TradeKind::Unknown, Direction::In, dec!(100), None);
        gas_in.gas_native = dec!(0.004);
        let s = LedgerState::replay(&[
            gas_in,
            sell(2, dec!(40), dec!(0.2)),
            event(3, TradeKind::Unknown, Direction::Out, dec!(10), None),
        ]);
        assert_eq!(s.total_tokens_bought, dec!(100));
        assert_eq!(s.total_tokens_sold, dec!(50));
        assert_eq!(s.total_in_native, Decimal::ZERO);
        assert_eq!(s.total_out_native, dec!(0.2));
        assert_eq!(s.total_gas_native, dec!(0.004));
        // The zero-cost lot gives the sell full proceeds as profit.
        assert_eq!(s.realized_pnl_native, dec!(0.2));
        assert_eq!(s.unknown_count, 2);
        assert_eq!(s.current_balance(), dec!(50));
        assert_eq!(s.rows[0].event_type, "unknown_in");
        assert_eq!(s.rows[2].event_type, "unknown_out");
    }

    #[test]
    fn unpriced_buy_counts_quantity_but_not_value() {
        let s = LedgerState::replay(&[event(1, TradeKind::Buy, Direction::In, dec!(5), None)]);
        assert_eq!(s.buy_count, 1);
        assert_eq!(s.unpriced_count, 1);
        assert_eq!(s.total_tokens_bought, dec!(5));
        assert_eq!(s.total_in_native, Decimal::ZERO);
        assert_eq!(s.remaining_cost_native(), Decimal::ZERO);
    }

    #[test]
    fn rows_track_running_lot_state() {
        let s = LedgerState::replay(&[buy(1, dec!(50), dec!(0.15)), sell(2, dec!(20), dec!(0.1))]);
        assert_eq!(s.rows.len(), 2);
        assert_eq!(s.rows[0].units_in, "50");
        assert_eq!(s.rows[1].units_out, "20");
        assert_eq!(s.rows[1].cost_basis_eth, "0.06");
        assert_eq!(s.rows[1].realized_pnl_eth, "0.04");
        assert_eq!(s.rows[1].lot_units_after, "30");
        assert_eq!(s.rows[1].lot_cost_eth_after, "0.09");
    }
}
