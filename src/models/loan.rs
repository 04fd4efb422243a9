use serde::{Deserialize, Serialize};

use crate::models::position::PositionId;

pub type LoanId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoanStatus {
    Active,
    Repaid,
    Liquidated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collateral {
    pub asset: String,
    pub amount: u64,
}

/// One allocation of loan principal to a lender position.
///
/// Holds the position's id only; the position itself lives in the asset book
/// and mutates independently after the match is recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRecord {
    pub position_id: PositionId,
    pub allocated_amount: u64,
    pub apr_bps: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Loan {
    pub id: LoanId,
    pub borrower: String,
    pub asset: String,
    /// Outstanding principal, raw units. Always equals the sum of
    /// `matches[..].allocated_amount`.
    pub amount: u64,
    pub apr_bps: u32,
    pub collateral: Collateral,
    pub health_factor: f64,
    pub status: LoanStatus,
    pub interest_accrued: u64,
    pub matches: Vec<MatchRecord>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl Loan {
    pub fn new(
        id: LoanId,
        borrower: &str,
        asset: &str,
        amount: u64,
        apr_bps: u32,
        collateral: Collateral,
        matches: Vec<MatchRecord>,
        now_ms: i64,
    ) -> Self {
        Loan {
            id,
            borrower: borrower.to_string(),
            asset: asset.to_string(),
            amount,
            apr_bps,
            collateral,
            health_factor: 0.0,
            status: LoanStatus::Active,
            interest_accrued: 0,
            matches,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
        }
    }

    /// Collateral value over loan value. Prices are per raw unit of the
    /// respective asset. Pure computation, result written back on the loan.
    pub fn calculate_health_factor(&mut self, collateral_price: f64, asset_price: f64) -> f64 {
        let collateral_value = self.collateral.amount as f64 * collateral_price;
        let loan_value = self.amount as f64 * asset_price;
        self.health_factor = if loan_value == 0.0 { f64::INFINITY } else { collateral_value / loan_value };
        self.health_factor
    }

    pub fn needs_liquidation(&self) -> bool {
        self.health_factor < 1.0
    }

    /// Interest projection over `days` at the locked rate, raw units.
    pub fn projected_interest(&self, days: u64) -> u64 {
        let numerator = self.amount as u128 * self.apr_bps as u128 * days as u128;
        (numerator / (10_000u128 * 365)) as u64
    }

    /// Reduce the outstanding amount, clamping to what is actually owed.
    /// Returns the amount that was applied. Flips to `Repaid` at zero.
    pub fn apply_repayment(&mut self, amount: u64, now_ms: i64) -> u64 {
        let applied = amount.min(self.amount);
        self.amount -= applied;
        if self.amount == 0 {
            self.status = LoanStatus::Repaid;
        }
        self.updated_at_ms = now_ms;
        applied
    }

    pub fn matched_total(&self) -> u64 {
        self.matches.iter().map(|m| m.allocated_amount).sum()
    }
}
