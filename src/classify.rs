//! Buy / sell / unknown classification by correlating each token movement
//! with the wallet's other movements in the same transaction.

use crate::normalize::{Asset, Direction, NormalizedEvent};
use crate::stablecoins::{Peg, StablecoinRegistry};
use log::{debug, warn};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};

/// Native/fiat rate per block number, prefetched by the caller.
pub type HistoricalRates = BTreeMap<u64, Decimal>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeKind {
    Buy,
    Sell,
    Unknown,
}

/// Which counter-asset priced the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterAsset {
    Native,
    Stablecoin,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedEvent {
    pub event: NormalizedEvent,
    pub kind: TradeKind,
    pub counter_asset: CounterAsset,
    /// Native value paid or received. `None` when the event is unknown or
    /// its stablecoin leg could not be converted.
    pub counter_value_native: Option<Decimal>,
    /// Transaction gas, carried by the first token event of the transaction.
    pub gas_native: Decimal,
}

#[derive(Debug, Default)]
struct TxGroup {
    token: Vec<usize>,
    native_in: Decimal,
    native_out: Decimal,
    fiat_in: Decimal,
    fiat_out: Decimal,
    /// Gas on records the wallet sent. Incoming records carry the
    /// sender's gas and are not counted.
    gas: Decimal,
}

enum Counter {
    Native(Decimal),
    Stablecoin(Option<Decimal>),
    None,
}

pub struct Classifier<'a> {
    registry: &'a StablecoinRegistry,
    rates: &'a HistoricalRates,
}

impl<'a> Classifier<'a> {
    pub fn new(registry: &'a StablecoinRegistry, rates: &'a HistoricalRates) -> Self {
        Classifier { registry, rates }
    }

    /// `events` must already be in ordering-key order; the output keeps it.
    pub fn classify(&self, events: &[NormalizedEvent]) -> Vec<ClassifiedEvent> {
        let groups = self.group(events);

        let mut out: Vec<Option<ClassifiedEvent>> = vec![None; events.len()];
        for (tx_hash, g) in &groups {
            if g.token.is_empty() {
                continue;
            }
            let block = events[g.token[0]].key.block_number;

            for direction in [Direction::In, Direction::Out] {
                let legs: Vec<usize> = g
                    .token
                    .iter()
                    .copied()
                    .filter(|&i| events[i].direction == direction)
                    .collect();
                if legs.is_empty() {
                    continue;
                }
                let counter = self.counter(g, direction, block);
                let (kind, counter_asset, total) = match counter {
                    Counter::Native(v) => (trade_kind(direction), CounterAsset::Native, Some(v)),
                    Counter::Stablecoin(v) => (trade_kind(direction), CounterAsset::Stablecoin, v),
                    Counter::None => (TradeKind::Unknown, CounterAsset::None, None),
                };
                if counter_asset == CounterAsset::Stablecoin && total.is_none() {
                    warn!(
                        "No historical rate at block {} for stablecoin leg of {}",
                        block, tx_hash
                    );
                }

                let quantities: Vec<Decimal> = legs.iter().map(|&i| events[i].amount).collect();
                let shares = split_pro_rata(total, &quantities);
                for (&i, share) in legs.iter().zip(shares) {
                    debug!(
                        "{} {} {:?} {} -> {:?} ({:?})",
                        tx_hash, events[i].key, direction, events[i].amount, kind, share
                    );
                    out[i] = Some(ClassifiedEvent {
                        event: events[i].clone(),
                        kind,
                        counter_asset,
                        counter_value_native: share,
                        gas_native: Decimal::ZERO,
                    });
                }
            }

            if let Some(first) = out[g.token[0]].as_mut() {
                first.gas_native = g.gas;
            }
        }

        out.into_iter().flatten().collect()
    }

    fn group<'e>(&self, events: &'e [NormalizedEvent]) -> HashMap<&'e str, TxGroup> {
        let mut groups: HashMap<&'e str, TxGroup> = HashMap::new();
        for (i, ev) in events.iter().enumerate() {
            let g = groups.entry(ev.tx_hash.as_str()).or_default();
            if ev.direction == Direction::Out {
                g.gas = g.gas.max(ev.gas_cost_native);
            }
            match (&ev.asset, ev.direction) {
                (Asset::Token, _) => g.token.push(i),
                (Asset::Native, Direction::In) => g.native_in += ev.amount,
                (Asset::Native, Direction::Out) => g.native_out += ev.amount,
                (Asset::Stablecoin(address), direction) => {
                    let Some(coin) = self.registry.get(address) else {
                        continue;
                    };
                    let slot = match (coin.peg, direction) {
                        (Peg::Native, Direction::In) => &mut g.native_in,
                        (Peg::Native, Direction::Out) => &mut g.native_out,
                        (Peg::Fiat, Direction::In) => &mut g.fiat_in,
                        (Peg::Fiat, Direction::Out) => &mut g.fiat_out,
                    };
                    *slot += ev.amount;
                }
            }
        }
        groups
    }

    /// Net value that moved against a token leg in `direction`: payment less
    /// any refund for a buy, receipt less any payment for a sell. Native
    /// movement wins over stablecoins; stablecoin legs are summed and
    /// converted.
    fn counter(&self, g: &TxGroup, direction: Direction, block: u64) -> Counter {
        let (native, fiat) = match direction {
            Direction::In => (g.native_out - g.native_in, g.fiat_out - g.fiat_in),
            Direction::Out => (g.native_in - g.native_out, g.fiat_in - g.fiat_out),
        };
        if native > Decimal::ZERO {
            Counter::Native(native)
        } else if fiat > Decimal::ZERO {
            let rate = self
                .rates
                .get(&block)
                .copied()
                .filter(|r| *r > Decimal::ZERO);
            Counter::Stablecoin(rate.and_then(|r| fiat.checked_div(r)))
        } else {
            Counter::None
        }
    }
}

fn trade_kind(direction: Direction) -> TradeKind {
    match direction {
        Direction::In => TradeKind::Buy,
        Direction::Out => TradeKind::Sell,
    }
}

/// Splits `total` across legs by quantity; the last leg takes the remainder
/// so the shares sum to `total` exactly.
fn split_pro_rata(total: Option<Decimal>, quantities: &[Decimal]) -> Vec<Option<Decimal>> {
    let Some(total) = total else {
        return vec![None; quantities.len()];
    };
    let sum: Decimal = quantities.iter().copied().sum();
    let mut remaining = total;
    let mut shares = Vec::with_capacity(quantities.len());
    for (i, q) in quantities.iter().enumerate() {
        let share = if i + 1 == quantities.len() || sum.is_zero() {
            remaining
        } else {
            *q / sum * total
        };
        remaining -= share;
        shares.push(Some(share));
    }
    shares
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::{NATIVE_LOG_INDEX, OrderingKey};
    use crate::source::Address;
    use rust_decimal_macros::dec;

    const USDC: &str = "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48";
    const USDT: &str = "0xdac17f958d2ee523a2206206994597c13d831ec7";
    const WETH: &str = "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2";

    fn ev(
        tx: &str,
        block: u64,
        log: u64,
        asset: Asset,
        dir: Direction,
        amount: Decimal,
    ) -> NormalizedEvent {
        NormalizedEvent {
            key: OrderingKey {
                block_number: block,
                log_index: log,
            },
            tx_hash: tx.to_string(),
            direction: dir,
            asset,
            amount,
            gas_cost_native: Decimal::ZERO,
            time: None,
        }
    }

    fn token(tx: &str, block: u64, log: u64, dir: Direction, amount: Decimal) -> NormalizedEvent {
        ev(tx, block, log, Asset::Token, dir, amount)
    }

    fn native(
        tx: &str,
        block: u64,
        dir: Direction,
        amount: Decimal,
        gas: Decimal,
    ) -> NormalizedEvent {
        let mut e = ev(tx, block, NATIVE_LOG_INDEX, Asset::Native, dir, amount);
        e.gas_cost_native = gas;
        e
    }

    fn stable(
        tx: &str,
        block: u64,
        log: u64,
        coin: &str,
        dir: Direction,
        amount: Decimal,
    ) -> NormalizedEvent {
        let coin: Address = coin.parse().unwrap();
        ev(tx, block, log, Asset::Stablecoin(coin), dir, amount)
    }

    fn classify(events: Vec<NormalizedEvent>, rates: &HistoricalRates) -> Vec<ClassifiedEvent> {
        let registry = StablecoinRegistry::default();
        Classifier::new(&registry, rates).classify(&events)
    }

    #[test]
    fn token_in_against_native_out_is_buy() {
        let out = classify(
            vec![
                token("0x1", 10, 1, Direction::In, dec!(100)),
                native("0x1", 10, Direction::Out, dec!(0.5), dec!(0.01)),
            ],
            &HistoricalRates::new(),
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind, TradeKind::Buy);
        assert_eq!(out[0].counter_asset, CounterAsset::Native);
        assert_eq!(out[0].counter_value_native, Some(dec!(0.5)));
        assert_eq!(out[0].gas_native, dec!(0.01));
    }

    #[test]
    fn token_out_against_native_in_is_sell() {
        let out = classify(
            vec![
                token("0x1", 10, 1, Direction::Out, dec!(40)),
                native("0x1", 10, Direction::In, dec!(0.3), dec!(0)),
            ],
            &HistoricalRates::new(),
        );
        assert_eq!(out[0].kind, TradeKind::Sell);
        assert_eq!(out[0].counter_value_native, Some(dec!(0.3)));
    }

    #[test]
    fn gas_only_native_out_does_not_make_a_buy() {
        let out = classify(
            vec![
                token("0x1", 10, 1, Direction::In, dec!(100)),
                native("0x1", 10, Direction::Out, dec!(0), dec!(0.002)),
            ],
            &HistoricalRates::new(),
        );
        assert_eq!(out[0].kind, TradeKind::Unknown);
        assert_eq!(out[0].counter_value_native, None);
        assert_eq!(out[0].gas_native, dec!(0.002));
    }

    #[test]
    fn uncorrelated_transfers_are_unknown() {
        let out = classify(
            vec![
                token("0x1", 10, 1, Direction::In, dec!(5)),
                token("0x2", 11, 1, Direction::Out, dec!(2)),
            ],
            &HistoricalRates::new(),
        );
        assert!(out.iter().all(|c| c.kind == TradeKind::Unknown));
        assert_eq!(out[0].event.direction, Direction::In);
        assert_eq!(out[1].event.direction, Direction::Out);
    }

    #[test]
    fn stablecoin_buy_uses_historical_rate_and_sums_legs() {
        let mut rates = HistoricalRates::new();
        rates.insert(10, dec!(2000));
        let out = classify(
            vec![
                stable("0x1", 10, 1, USDC, Direction::Out, dec!(600)),
                stable("0x1", 10, 2, USDT, Direction::Out, dec!(400)),
                token("0x1", 10, 3, Direction::In, dec!(50)),
            ],
            &rates,
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind, TradeKind::Buy);
        assert_eq!(out[0].counter_asset, CounterAsset::Stablecoin);
        assert_eq!(out[0].counter_value_native, Some(dec!(0.5)));
    }

    #[test]
    fn stablecoin_without_rate_stays_buy_but_unattributed() {
        let out = classify(
            vec![
                stable("0x1", 10, 1, USDC, Direction::Out, dec!(600)),
                token("0x1", 10, 2, Direction::In, dec!(50)),
            ],
            &HistoricalRates::new(),
        );
        assert_eq!(out[0].kind, TradeKind::Buy);
        assert_eq!(out[0].counter_asset, CounterAsset::Stablecoin);
        assert_eq!(out[0].counter_value_native, None);
    }

    #[test]
    fn native_is_preferred_over_stablecoin() {
        let mut rates = HistoricalRates::new();
        rates.insert(10, dec!(2000));
        let out = classify(
            vec![
                stable("0x1", 10, 1, USDC, Direction::Out, dec!(600)),
                token("0x1", 10, 2, Direction::In, dec!(50)),
                native("0x1", 10, Direction::Out, dec!(0.2), dec!(0)),
            ],
            &rates,
        );
        assert_eq!(out[0].counter_asset, CounterAsset::Native);
        assert_eq!(out[0].counter_value_native, Some(dec!(0.2)));
    }

    #[test]
    fn wrapped_native_counts_as_native() {
        let out = classify(
            vec![
                stable("0x1", 10, 1, WETH, Direction::In, dec!(0.75)),
                token("0x1", 10, 2, Direction::Out, dec!(30)),
            ],
            &HistoricalRates::new(),
        );
        assert_eq!(out[0].kind, TradeKind::Sell);
        assert_eq!(out[0].counter_asset, CounterAsset::Native);
        assert_eq!(out[0].counter_value_native, Some(dec!(0.75)));
    }

    #[test]
    fn splits_counter_value_across_legs_and_charges_gas_once() {
        let n = native("0x1", 10, Direction::Out, dec!(1), dec!(0.01));
        let out = classify(
            vec![
                token("0x1", 10, 1, Direction::In, dec!(10)),
                token("0x1", 10, 2, Direction::In, dec!(20)),
                n,
            ],
            &HistoricalRates::new(),
        );
        assert_eq!(out.len(), 2);
        let total: Decimal = out.iter().filter_map(|c| c.counter_value_native).sum();
        assert_eq!(total, dec!(1));
        assert_eq!(
            out[1].counter_value_native,
            Some(dec!(1) - out[0].counter_value_native.unwrap())
        );
        assert_eq!(out[0].gas_native, dec!(0.01));
        assert_eq!(out[1].gas_native, dec!(0));
    }

    #[test]
    fn charges_gas_reported_on_transfers_the_wallet_sent() {
        let mut t = token("0x1", 10, 1, Direction::Out, dec!(10));
        t.gas_cost_native = dec!(0.003);
        let out = classify(vec![t], &HistoricalRates::new());
        assert_eq!(out[0].gas_native, dec!(0.003));
    }

    #[test]
    fn incoming_transfer_does_not_charge_senders_gas() {
        let mut airdrop = token("0x1", 10, 1, Direction::In, dec!(10));
        airdrop.gas_cost_native = dec!(0.01);
        let out = classify(vec![airdrop], &HistoricalRates::new());
        assert_eq!(out[0].kind, TradeKind::Unknown);
        assert_eq!(out[0].gas_native, Decimal::ZERO);
    }

    #[test]
    fn refund_is_netted_against_payment() {
        let out = classify(
            vec![
                token("0x1", 10, 1, Direction::In, dec!(100)),
                native("0x1", 10, Direction::Out, dec!(1), dec!(0.01)),
                native("0x1", 10, Direction::In, dec!(0.2), dec!(0)),
            ],
            &HistoricalRates::new(),
        );
        assert_eq!(out[0].kind, TradeKind::Buy);
        assert_eq!(out[0].counter_value_native, Some(dec!(0.8)));
        assert_eq!(out[0].gas_native, dec!(0.01));
    }

    #[test]
    fn splits_huge_quantities_without_overflow() {
        let q = dec!(700000000000000000000000000);
        let out = classify(
            vec![
                token("0x1", 10, 1, Direction::In, q),
                token("0x1", 10, 2, Direction::In, q),
                native("0x1", 10, Direction::Out, dec!(1000), dec!(0)),
            ],
            &HistoricalRates::new(),
        );
        assert_eq!(out[0].counter_value_native, Some(dec!(500)));
        assert_eq!(out[1].counter_value_native, Some(dec!(500)));
    }

    #[test]
    fn preserves_event_order() {
        let out = classify(
            vec![
                token("0xb", 10, 1, Direction::In, dec!(1)),
                token("0xa", 11, 1, Direction::In, dec!(2)),
                token("0xb", 12, 1, Direction::Out, dec!(3)),
            ],
            &HistoricalRates::new(),
        );
        let amounts: Vec<_> = out.iter().map(|c| c.event.amount).collect();
        assert_eq!(amounts, vec![dec!(1), dec!(2), dec!(3)]);
    }
}
