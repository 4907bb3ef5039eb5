use crate::error::{PnlError, Result};
use crate::source::Address;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;

/// What a registered coin is pegged to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Peg {
    /// One unit is worth one unit of the fiat the native rate is quoted in.
    Fiat,
    /// Wrapped native currency; one unit is worth one native unit.
    Native,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stablecoin {
    pub address: Address,
    pub symbol: String,
    pub decimals: u32,
    pub peg: Peg,
}

const MAINNET: &[(&str, &str, u32, Peg)] = &[
    ("0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48", "USDC", 6, Peg::Fiat),
    ("0xdac17f958d2ee523a2206206994597c13d831ec7", "USDT", 6, Peg::Fiat),
    ("0x6b175474e89094c44da98b954eedeac495271d0f", "DAI", 18, Peg::Fiat),
    ("0x853d955acef822db058eb8505911ed77f175b99e", "FRAX", 18, Peg::Fiat),
    ("0x4fabb145d64652a948d72533023f6e7a623c7c53", "BUSD", 18, Peg::Fiat),
    ("0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2", "WETH", 18, Peg::Native),
];

/// Immutable lookup of counter-assets that can value a trade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StablecoinRegistry {
    coins: BTreeMap<Address, Stablecoin>,
}

impl StablecoinRegistry {
    pub fn empty() -> Self {
        StablecoinRegistry {
            coins: BTreeMap::new(),
        }
    }

    pub fn with(mut self, coin: Stablecoin) -> Self {
        self.coins.insert(coin.address.clone(), coin);
        self
    }

    /// Adds the entries of a JSON array file on top of this registry.
    pub fn extend_from_file(mut self, path: &Path) -> Result<Self> {
        let f = File::open(path)?;
        let extra: Vec<Stablecoin> = serde_json::from_reader(f)?;
        for coin in extra {
            if coin.decimals > 28 {
                return Err(PnlError::Config(format!(
                    "stablecoin {} has unsupported decimals {}",
                    coin.symbol, coin.decimals
                )));
            }
            self.coins.insert(coin.address.clone(), coin);
        }
        Ok(self)
    }

    pub fn get(&self, address: &Address) -> Option<&Stablecoin> {
        self.coins.get(address)
    }

    pub fn addresses(&self) -> impl Iterator<Item = &Address> {
        self.coins.keys()
    }

    pub fn len(&self) -> usize {
        self.coins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coins.is_empty()
    }
}

impl Default for StablecoinRegistry {
    fn default() -> Self {
        let mut registry = StablecoinRegistry::empty();
        for (address, symbol, decimals, peg) in MAINNET {
            if let Ok(address) = address.parse::<Address>() {
                registry = registry.with(Stablecoin {
                    address,
                    symbol: symbol.to_string(),
                    decimals: *decimals,
                    peg: *peg,
                });
            }
        }
        registry
    }
}
