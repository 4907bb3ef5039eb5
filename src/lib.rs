//! Realized and unrealized PnL for one wallet's trading in one token,
//! computed from transfer logs and native-currency transactions.
//!
//! Data flows one way: raw records are normalized into an ordered event
//! list, grouped by transaction and classified as buys, sells or unknown
//! transfers, replayed through a FIFO cost-basis ledger, and aggregated into
//! a [`report::Report`].

pub mod analyzer;
pub mod classify;
pub mod config;
pub mod engine;
pub mod error;
pub mod files;
pub mod ledger;
pub mod normalize;
pub mod reconcile;
pub mod report;
pub mod source;
pub mod stablecoins;

pub use analyzer::Analyzer;
pub use engine::{Analysis, AnalysisInput, Engine, EngineConfig};
pub use error::{PnlError, Result};
pub use report::{Envelope, Report};
pub use source::{Address, ChainData, PriceOracle, RawEvent, TokenInfo};
