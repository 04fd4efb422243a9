use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rustc_hash::FxHashMap;

/// APR values are carried internally as basis points: 100% == 10_000 bps.
pub const MAX_APR_BPS: u32 = 10_000;
pub const BPS_PER_PERCENT: u32 = 100;

#[derive(Debug, Clone)]
pub struct AssetInfo {
    pub symbol: String,
    /// Internal storage scale (e.g. 6 for USDC: 1 USDC == 1_000_000 raw units)
    pub decimals: u32,
    /// Max allowed decimal places for client input
    pub display_decimals: u32,
}

/// Registry of assets the engine is willing to ledger.
///
/// Also owns the Decimal <-> raw-u64 conversion for amounts and the
/// percent <-> basis-point conversion for APRs, so precision rules live in
/// exactly one place.
pub struct AssetRegistry {
    assets: FxHashMap<String, AssetInfo>,
}

impl Default for AssetRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AssetRegistry {
    pub fn new() -> Self {
        AssetRegistry { assets: FxHashMap::default() }
    }

    pub fn add_asset(&mut self, symbol: &str, decimals: u32, display_decimals: u32) {
        self.assets.insert(
            symbol.to_string(),
            AssetInfo { symbol: symbol.to_string(), decimals, display_decimals },
        );
    }

    pub fn is_supported(&self, symbol: &str) -> bool {
        self.assets.contains_key(symbol)
    }

    pub fn get(&self, symbol: &str) -> Option<&AssetInfo> {
        self.assets.get(symbol)
    }

    pub fn symbols(&self) -> Vec<String> {
        let mut out: Vec<String> = self.assets.keys().cloned().collect();
        out.sort();
        out
    }

    /// Convert a client Decimal amount to internal raw units.
    ///
    /// Rejects unknown assets, inputs finer than the asset's display
    /// precision, negative amounts, and anything that overflows u64.
    pub fn to_raw_amount(&self, symbol: &str, amount: Decimal) -> Result<u64, String> {
        let info = self
            .assets
            .get(symbol)
            .ok_or_else(|| format!("Unknown asset: {}", symbol))?;

        if amount.is_sign_negative() {
            return Err(format!("Negative amount: {}", amount));
        }

        // Example: if display_decimals is 2, input 1.23 is valid, 1.234 is invalid.
        if amount.normalize().scale() > info.display_decimals {
            return Err(format!(
                "Amount {} exceeds max precision {}",
                amount, info.display_decimals
            ));
        }

        let multiplier = Decimal::from(
            10_u64.checked_pow(info.decimals).ok_or("Decimals too large, overflow")?,
        );

        (amount * multiplier)
            .round()
            .to_u64()
            .ok_or_else(|| "Amount overflow".to_string())
    }

    /// Convert internal raw units back to a client Decimal.
    pub fn to_client_amount(&self, symbol: &str, raw: u64) -> Option<Decimal> {
        let info = self.assets.get(symbol)?;
        let divisor = Decimal::from(10_u64.checked_pow(info.decimals)?);
        Some(
            (Decimal::from(raw) / divisor)
                .round_dp_with_strategy(info.decimals, rust_decimal::RoundingStrategy::ToZero),
        )
    }

    /// Seed the default asset set of the deployment.
    pub fn load_defaults() -> Self {
        let mut registry = AssetRegistry::new();
        registry.add_asset("USDC", 6, 2);
        registry.add_asset("USDT", 6, 2);
        registry.add_asset("DAI", 6, 2);
        registry.add_asset("ETH", 9, 6);
        registry
    }
}

/// Convert a client percent APR (e.g. 5.25) to basis points (525).
///
/// Valid range is [0, 100] percent with at most 2 decimal places.
pub fn apr_to_bps(percent: Decimal) -> Result<u32, String> {
    if percent.is_sign_negative() {
        return Err(format!("APR must not be negative: {}", percent));
    }
    if percent.normalize().scale() > 2 {
        return Err(format!("APR {} exceeds max precision 2", percent));
    }
    let bps = (percent * Decimal::from(BPS_PER_PERCENT))
        .round()
        .to_u32()
        .ok_or_else(|| format!("APR out of range: {}", percent))?;
    if bps > MAX_APR_BPS {
        return Err(format!("APR {} exceeds 100%", percent));
    }
    Ok(bps)
}

pub fn bps_to_apr(bps: u32) -> Decimal {
    Decimal::from(bps) / Decimal::from(BPS_PER_PERCENT)
}
