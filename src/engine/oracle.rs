use std::sync::RwLock;

use rust_decimal::Decimal;
use rustc_hash::FxHashMap;

use super::error::EngineError;

/// Price source boundary. Synchronous; a failing oracle must surface
/// `OracleUnavailable` so callers refuse health-factor-dependent operations
/// instead of substituting a stale price.
pub trait PriceOracle: Send + Sync {
    fn price(&self, asset: &str) -> Result<Decimal, EngineError>;
}

/// In-memory price table for tests and demo deployments. Prices can be
/// updated behind a shared handle.
pub struct StaticOracle {
    prices: RwLock<FxHashMap<String, Decimal>>,
}

impl StaticOracle {
    pub fn new() -> Self {
        Self { prices: RwLock::new(FxHashMap::default()) }
    }

    pub fn with_price(self, asset: &str, price: Decimal) -> Self {
        self.set_price(asset, price);
        self
    }

    pub fn set_price(&self, asset: &str, price: Decimal) {
        self.prices.write().unwrap().insert(asset.to_string(), price);
    }

    pub fn remove_price(&self, asset: &str) {
        self.prices.write().unwrap().remove(asset);
    }
}

impl Default for StaticOracle {
    fn default() -> Self {
        Self::new()
    }
}

impl PriceOracle for StaticOracle {
    fn price(&self, asset: &str) -> Result<Decimal, EngineError> {
        self.prices
            .read()
            .unwrap()
            .get(asset)
            .copied()
            .ok_or_else(|| EngineError::OracleUnavailable(asset.to_string()))
    }
}
