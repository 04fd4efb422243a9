use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Exact acceptance window, basis points. Bucket identity is the exact
/// (min, max) pair; numerically overlapping windows stay distinct buckets.
pub type WindowKey = (u32, u32);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AprBucket {
    pub min_bps: u32,
    pub max_bps: u32,
    /// Sum of position principal declaring this exact window.
    pub liquidity: u64,
    /// Amount currently matched out of this bucket.
    pub borrowed: u64,
}

impl AprBucket {
    pub fn available(&self) -> u64 {
        self.liquidity.saturating_sub(self.borrowed)
    }

    pub fn contains(&self, apr_bps: u32) -> bool {
        self.min_bps <= apr_bps && apr_bps <= self.max_bps
    }

    pub fn overlaps(&self, min_bps: u32, max_bps: u32) -> bool {
        !(self.max_bps < min_bps || self.min_bps > max_bps)
    }
}

/// Per-asset aggregate ledger. Never independently authored: every field is
/// recomputed from bucket deltas inside the same atomic scope as the
/// position mutation that produced them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub asset: String,
    pub total_liquidity: u64,
    pub total_borrowed: u64,
    /// totalBorrowed / totalLiquidity, percent.
    pub utilization_rate: f64,
    /// Borrow-weighted window midpoint, basis points.
    pub average_apr_bps: f64,
    pub buckets: BTreeMap<WindowKey, AprBucket>,
    pub last_updated_ms: i64,
}

impl Market {
    pub fn new(asset: &str) -> Self {
        Market {
            asset: asset.to_string(),
            total_liquidity: 0,
            total_borrowed: 0,
            utilization_rate: 0.0,
            average_apr_bps: 0.0,
            buckets: BTreeMap::new(),
            last_updated_ms: 0,
        }
    }

    /// Find or create the bucket for the exact window and apply both signed
    /// deltas, clamping bucket fields to >= 0 and mirroring the deltas into
    /// the totals. Stats are recomputed before returning.
    pub fn upsert_bucket(
        &mut self,
        min_bps: u32,
        max_bps: u32,
        liquidity_delta: i64,
        borrowed_delta: i64,
        now_ms: i64,
    ) {
        let bucket = self
            .buckets
            .entry((min_bps, max_bps))
            .or_insert(AprBucket { min_bps, max_bps, liquidity: 0, borrowed: 0 });

        bucket.liquidity = apply_delta(bucket.liquidity, liquidity_delta);
        bucket.borrowed = apply_delta(bucket.borrowed, borrowed_delta);

        if bucket.liquidity == 0 && bucket.borrowed == 0 {
            self.buckets.remove(&(min_bps, max_bps));
        }

        self.total_liquidity = apply_delta(self.total_liquidity, liquidity_delta);
        self.total_borrowed = apply_delta(self.total_borrowed, borrowed_delta);

        self.recompute_stats();
        self.last_updated_ms = now_ms;
    }

    fn recompute_stats(&mut self) {
        self.utilization_rate = if self.total_liquidity == 0 {
            0.0
        } else {
            (self.total_borrowed as f64 / self.total_liquidity as f64) * 100.0
        };

        self.average_apr_bps = if self.total_borrowed == 0 {
            0.0
        } else {
            let mut weighted = 0.0;
            for bucket in self.buckets.values() {
                if bucket.borrowed > 0 {
                    let midpoint = (bucket.min_bps + bucket.max_bps) as f64 / 2.0;
                    weighted += midpoint * (bucket.borrowed as f64 / self.total_borrowed as f64);
                }
            }
            weighted
        };
    }

    /// Liquidity lendable at the target rate: max(0, liquidity - borrowed)
    /// summed over EVERY bucket whose window contains the rate. This is the
    /// feasibility check the matcher must pass before allocating; a
    /// single-bucket lookup would undercount overlapping windows.
    pub fn available_liquidity_for_apr(&self, target_bps: u32) -> u64 {
        self.buckets
            .values()
            .filter(|b| b.contains(target_bps))
            .map(|b| b.available())
            .sum()
    }

    /// Total and available liquidity across buckets overlapping [min, max].
    pub fn liquidity_in_range(&self, min_bps: u32, max_bps: u32) -> (u64, u64, Vec<AprBucket>) {
        let mut total = 0u64;
        let mut available = 0u64;
        let mut overlapping = Vec::new();
        for bucket in self.buckets.values() {
            if bucket.overlaps(min_bps, max_bps) {
                total += bucket.liquidity;
                available += bucket.available();
                overlapping.push(bucket.clone());
            }
        }
        (total, available, overlapping)
    }

    /// Greedy lowest-window-first coverage plan for a requested amount; the
    /// read-only twin of the matcher's fill order. Returns per-bucket
    /// recommendations and the uncovered remainder.
    pub fn best_borrow_rates(&self, amount: u64) -> (Vec<RateRecommendation>, u64) {
        let mut remaining = amount;
        let mut recommendations = Vec::new();

        // BTreeMap iteration is already (min, max) ascending
        for bucket in self.buckets.values() {
            if remaining == 0 {
                break;
            }
            let available = bucket.available();
            if available == 0 {
                continue;
            }
            let take = available.min(remaining);
            recommendations.push(RateRecommendation {
                min_bps: bucket.min_bps,
                max_bps: bucket.max_bps,
                available,
                recommended_amount: take,
                suggested_apr_bps: bucket.min_bps,
            });
            remaining -= take;
        }

        (recommendations, remaining)
    }

    /// Ledger invariant: no bucket borrowed beyond its liquidity, totals
    /// equal the bucket sums.
    pub fn check_invariants(&self) -> Result<(), String> {
        let mut liquidity = 0u64;
        let mut borrowed = 0u64;
        for (key, bucket) in &self.buckets {
            if bucket.borrowed > bucket.liquidity {
                return Err(format!(
                    "Bucket {:?}: borrowed {} exceeds liquidity {}",
                    key, bucket.borrowed, bucket.liquidity
                ));
            }
            liquidity += bucket.liquidity;
            borrowed += bucket.borrowed;
        }
        if liquidity != self.total_liquidity || borrowed != self.total_borrowed {
            return Err(format!(
                "Totals drifted: buckets ({}, {}) vs market ({}, {})",
                liquidity, borrowed, self.total_liquidity, self.total_borrowed
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateRecommendation {
    pub min_bps: u32,
    pub max_bps: u32,
    pub available: u64,
    pub recommended_amount: u64,
    pub suggested_apr_bps: u32,
}

fn apply_delta(value: u64, delta: i64) -> u64 {
    if delta >= 0 {
        value.saturating_add(delta as u64)
    } else {
        value.saturating_sub(delta.unsigned_abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_creates_and_accumulates() {
        let mut m = Market::new("USDC");
        m.upsert_bucket(500, 700, 10_000, 0, 1);
        m.upsert_bucket(500, 700, 5_000, 0, 2);

        let bucket = &m.buckets[&(500, 700)];
        assert_eq!(bucket.liquidity, 15_000);
        assert_eq!(m.total_liquidity, 15_000);
        assert_eq!(m.utilization_rate, 0.0);
        m.check_invariants().unwrap();
    }

    #[test]
    fn test_overlapping_windows_stay_distinct() {
        let mut m = Market::new("USDC");
        m.upsert_bucket(500, 700, 10_000, 0, 1);
        m.upsert_bucket(400, 800, 5_000, 0, 1);
        assert_eq!(m.buckets.len(), 2);

        // Rate 6% is inside both windows: feasibility must sum across both
        assert_eq!(m.available_liquidity_for_apr(600), 15_000);
        // Rate 4.5% is only inside [4, 8]
        assert_eq!(m.available_liquidity_for_apr(450), 5_000);
        // Rate 9% is inside neither
        assert_eq!(m.available_liquidity_for_apr(900), 0);
    }

    #[test]
    fn test_borrow_reduces_available() {
        let mut m = Market::new("USDC");
        m.upsert_bucket(500, 700, 10_000, 0, 1);
        m.upsert_bucket(500, 700, 0, 4_000, 2);

        assert_eq!(m.available_liquidity_for_apr(600), 6_000);
        assert_eq!(m.total_borrowed, 4_000);
        assert!((m.utilization_rate - 40.0).abs() < 1e-9);
        // Single bucket: average APR is its midpoint
        assert!((m.average_apr_bps - 600.0).abs() < 1e-9);
        m.check_invariants().unwrap();
    }

    #[test]
    fn test_clamping_to_zero() {
        let mut m = Market::new("USDC");
        m.upsert_bucket(500, 700, 1_000, 0, 1);
        // Remove more than present: clamps, bucket drops out
        m.upsert_bucket(500, 700, -5_000, 0, 2);
        assert!(m.buckets.get(&(500, 700)).is_none());
        assert_eq!(m.total_liquidity, 0);
    }

    #[test]
    fn test_average_apr_weighted_by_borrowed() {
        let mut m = Market::new("USDC");
        m.upsert_bucket(400, 600, 10_000, 3_000, 1); // midpoint 500
        m.upsert_bucket(800, 1_000, 10_000, 1_000, 1); // midpoint 900
        // (500*3000 + 900*1000) / 4000 = 600
        assert!((m.average_apr_bps - 600.0).abs() < 1e-9);
    }

    #[test]
    fn test_liquidity_in_range_overlap_query() {
        let mut m = Market::new("USDC");
        m.upsert_bucket(500, 700, 10_000, 2_000, 1);
        m.upsert_bucket(900, 1_000, 5_000, 0, 1);

        let (total, available, overlapping) = m.liquidity_in_range(600, 950);
        assert_eq!(total, 15_000);
        assert_eq!(available, 13_000);
        assert_eq!(overlapping.len(), 2);

        let (total, _, overlapping) = m.liquidity_in_range(0, 100);
        assert_eq!(total, 0);
        assert!(overlapping.is_empty());
    }

    #[test]
    fn test_best_borrow_rates_greedy() {
        let mut m = Market::new("USDC");
        m.upsert_bucket(800, 900, 10_000, 0, 1);
        m.upsert_bucket(500, 700, 3_000, 1_000, 1);

        let (recs, shortfall) = m.best_borrow_rates(6_000);
        assert_eq!(shortfall, 0);
        assert_eq!(recs.len(), 2);
        // Cheapest window first
        assert_eq!(recs[0].min_bps, 500);
        assert_eq!(recs[0].recommended_amount, 2_000);
        assert_eq!(recs[1].min_bps, 800);
        assert_eq!(recs[1].recommended_amount, 4_000);

        let (_, shortfall) = m.best_borrow_rates(50_000);
        assert_eq!(shortfall, 50_000 - 12_000);
    }
}
