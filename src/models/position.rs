use serde::{Deserialize, Serialize};

pub type PositionId = u64;

/// A lender's deposit against an APR acceptance window.
///
/// `amount` is the principal, `available_amount` the portion not currently
/// lent out. Both are internal raw units. APRs are basis points.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidityPosition {
    pub id: PositionId,
    pub owner: String,
    pub asset: String,
    pub amount: u64,
    pub min_apr_bps: u32,
    pub max_apr_bps: u32,
    pub available_amount: u64,
    /// Last rate at which any portion was matched. Meaningful only while
    /// utilization > 0, where it must lie inside the acceptance window.
    pub current_apr_bps: u32,
    /// Cumulative interest credited by repayments, raw units.
    pub earnings: u64,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl LiquidityPosition {
    pub fn new(
        id: PositionId,
        owner: &str,
        asset: &str,
        amount: u64,
        min_apr_bps: u32,
        max_apr_bps: u32,
        now_ms: i64,
    ) -> Self {
        LiquidityPosition {
            id,
            owner: owner.to_string(),
            asset: asset.to_string(),
            amount,
            min_apr_bps,
            max_apr_bps,
            available_amount: amount,
            // Window midpoint until the first match overwrites it
            current_apr_bps: (min_apr_bps + max_apr_bps) / 2,
            earnings: 0,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
        }
    }

    pub fn borrowed_amount(&self) -> u64 {
        self.amount - self.available_amount
    }

    /// Fraction of the principal currently lent out, percent.
    pub fn utilization_pct(&self) -> f64 {
        if self.amount == 0 {
            return 0.0;
        }
        (self.borrowed_amount() as f64 / self.amount as f64) * 100.0
    }

    pub fn accepts_apr(&self, apr_bps: u32) -> bool {
        self.min_apr_bps <= apr_bps && apr_bps <= self.max_apr_bps
    }

    /// Consume capacity for a match. `apr_bps` becomes the position's
    /// current rate (last-writer-wins; the matcher fills sequentially).
    pub fn reserve(&mut self, amount: u64, apr_bps: u32, now_ms: i64) -> Result<(), &'static str> {
        if amount > self.available_amount {
            return Err("Insufficient available amount");
        }
        self.available_amount -= amount;
        self.current_apr_bps = apr_bps;
        self.updated_at_ms = now_ms;
        Ok(())
    }

    /// Give capacity back on repayment or rollback, clamped to the principal.
    pub fn release(&mut self, amount: u64, now_ms: i64) {
        self.available_amount = (self.available_amount + amount).min(self.amount);
        self.updated_at_ms = now_ms;
    }

    pub fn credit_earnings(&mut self, amount: u64, now_ms: i64) {
        self.earnings += amount;
        self.updated_at_ms = now_ms;
    }

    /// Move the acceptance window. The caller must re-contribute the full
    /// amount to the new market bucket and remove it from the old one as a
    /// single logical operation. While utilized, the current rate is clamped
    /// into the new window so it never sits outside the acceptance range.
    pub fn update_range(
        &mut self,
        min_apr_bps: u32,
        max_apr_bps: u32,
        now_ms: i64,
    ) -> Result<(), &'static str> {
        if min_apr_bps > max_apr_bps {
            return Err("minApr must not exceed maxApr");
        }
        self.min_apr_bps = min_apr_bps;
        self.max_apr_bps = max_apr_bps;
        if self.borrowed_amount() > 0 {
            self.current_apr_bps = self.current_apr_bps.clamp(min_apr_bps, max_apr_bps);
        }
        self.updated_at_ms = now_ms;
        Ok(())
    }

    pub fn update_current_apr(&mut self, apr_bps: u32) -> bool {
        if self.accepts_apr(apr_bps) {
            self.current_apr_bps = apr_bps;
            return true;
        }
        false
    }

    /// Simple-interest earnings projection over `days` at the current rate
    /// and utilization, raw units.
    pub fn projected_earnings(&self, days: u64) -> u64 {
        let borrowed = self.borrowed_amount() as u128;
        let numerator = borrowed * self.current_apr_bps as u128 * days as u128;
        (numerator / (10_000u128 * 365)) as u64
    }
}
