use crate::engine::{DEFAULT_TOLERANCE, EngineConfig};
use crate::error::{PnlError, Result};
use crate::source::Address;
use crate::stablecoins::StablecoinRegistry;
use clap::Parser;
use log::{debug, info};
use rust_decimal::Decimal;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "token-pnl",
    version,
    about = "Realized and unrealized PnL of a wallet's trades in one ERC-20 token"
)]
pub struct Args {
    /// Trader wallet address
    #[arg(long, env = "PNL_WALLET")]
    pub wallet: Address,

    /// Token contract address
    #[arg(long, env = "PNL_TOKEN")]
    pub token: Address,

    /// Token transfer exports (CSV or JSON); may overlap
    #[arg(long, required = true, num_args = 1..)]
    pub transfers: Vec<PathBuf>,

    /// Native-currency transaction exports, normal and internal
    #[arg(long, num_args = 1..)]
    pub native: Vec<PathBuf>,

    /// Market snapshot JSON: token metadata, balance, prices, rates
    #[arg(long, env = "PNL_MARKET")]
    pub market: PathBuf,

    /// Relative tolerance when reconciling against the on-chain balance
    #[arg(long, env = "PNL_TOLERANCE", default_value_t = DEFAULT_TOLERANCE)]
    pub tolerance: Decimal,

    /// Extra stablecoin registry entries (JSON array)
    #[arg(long)]
    pub stablecoins: Option<PathBuf>,

    /// Write the per-event ledger audit trail to this CSV file
    #[arg(long)]
    pub ledger_out: Option<PathBuf>,

    /// Print the result envelope as JSON instead of the summary
    #[arg(long)]
    pub json: bool,
}

impl Args {
    pub fn engine_config(&self) -> Result<EngineConfig> {
        if self.tolerance < Decimal::ZERO {
            return Err(PnlError::Config(format!(
                "tolerance must not be negative, got {}",
                self.tolerance
            )));
        }
        let mut registry = StablecoinRegistry::default();
        if let Some(path) = &self.stablecoins {
            registry = registry.extend_from_file(path)?;
            info!("Loaded stablecoin registry extension from {}", path.display());
        }
        debug!("Stablecoin registry has {} entries", registry.len());
        Ok(EngineConfig {
            registry,
            tolerance: self.tolerance,
        })
    }
}
