use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::error::EngineError;
use crate::models::{LiquidityPosition, Loan, LoanId, Market, PositionId};

/// All mutable state of one asset: its market ledger, lender positions and
/// loans. A book is only ever touched under the engine's per-asset lock, so
/// every method can assume exclusive access.
///
/// Positions are keyed by monotonically assigned ids; BTreeMap iteration is
/// therefore insertion order, which the matcher relies on for its stable
/// tie-break.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetBook {
    pub asset: String,
    pub market: Market,
    pub positions: BTreeMap<PositionId, LiquidityPosition>,
    pub loans: BTreeMap<LoanId, Loan>,
}

impl AssetBook {
    pub fn new(asset: &str) -> Self {
        AssetBook {
            asset: asset.to_string(),
            market: Market::new(asset),
            positions: BTreeMap::new(),
            loans: BTreeMap::new(),
        }
    }

    /// Insert a freshly validated position and contribute its principal to
    /// the market bucket for its exact window.
    pub fn add_position(&mut self, position: LiquidityPosition, now_ms: i64) {
        self.market.upsert_bucket(
            position.min_apr_bps,
            position.max_apr_bps,
            position.amount as i64,
            0,
            now_ms,
        );
        self.positions.insert(position.id, position);
    }

    pub fn position(&self, id: PositionId) -> Result<&LiquidityPosition, EngineError> {
        self.positions.get(&id).ok_or(EngineError::PositionNotFound(id))
    }

    pub fn position_mut(&mut self, id: PositionId) -> Result<&mut LiquidityPosition, EngineError> {
        self.positions.get_mut(&id).ok_or(EngineError::PositionNotFound(id))
    }

    pub fn loan(&self, id: LoanId) -> Result<&Loan, EngineError> {
        self.loans.get(&id).ok_or(EngineError::LoanNotFound(id))
    }

    pub fn loan_mut(&mut self, id: LoanId) -> Result<&mut Loan, EngineError> {
        self.loans.get_mut(&id).ok_or(EngineError::LoanNotFound(id))
    }

    /// Withdraw unused capacity. Only the unborrowed portion may leave; a
    /// position drained to zero principal is removed entirely. Returns the
    /// position if it survived the withdrawal.
    pub fn withdraw(
        &mut self,
        id: PositionId,
        amount: u64,
        now_ms: i64,
    ) -> Result<Option<LiquidityPosition>, EngineError> {
        let position = self.position(id)?;
        if amount > position.available_amount {
            return Err(EngineError::InsufficientCapacity {
                position_id: id,
                available: position.available_amount,
                requested: amount,
            });
        }

        let (min, max) = (position.min_apr_bps, position.max_apr_bps);
        let position = self.positions.get_mut(&id).unwrap();
        position.amount -= amount;
        position.available_amount -= amount;
        position.updated_at_ms = now_ms;

        self.market.upsert_bucket(min, max, -(amount as i64), 0, now_ms);

        if self.positions[&id].amount == 0 {
            self.positions.remove(&id);
            return Ok(None);
        }
        Ok(Some(self.positions[&id].clone()))
    }

    /// Move a position's acceptance window. The ledger must never reflect
    /// only one side, so the old bucket loses the full principal (and the
    /// borrowed share riding on it) in the same call that credits the new
    /// bucket.
    pub fn update_range(
        &mut self,
        id: PositionId,
        min_apr_bps: u32,
        max_apr_bps: u32,
        now_ms: i64,
    ) -> Result<LiquidityPosition, EngineError> {
        if min_apr_bps > max_apr_bps {
            return Err(EngineError::InvalidAprWindow { min_bps: min_apr_bps, max_bps: max_apr_bps });
        }
        let position = self.position(id)?;
        let (old_min, old_max) = (position.min_apr_bps, position.max_apr_bps);
        let principal = position.amount;
        let borrowed = position.borrowed_amount();

        self.market.upsert_bucket(old_min, old_max, -(principal as i64), -(borrowed as i64), now_ms);
        self.market.upsert_bucket(min_apr_bps, max_apr_bps, principal as i64, borrowed as i64, now_ms);

        let position = self.positions.get_mut(&id).unwrap();
        position
            .update_range(min_apr_bps, max_apr_bps, now_ms)
            .map_err(|e| EngineError::Validation(e.to_string()))?;
        Ok(position.clone())
    }

    pub fn positions_by_owner(&self, owner: &str) -> Vec<LiquidityPosition> {
        self.positions.values().filter(|p| p.owner == owner).cloned().collect()
    }

    pub fn loans_by_borrower(&self, borrower: &str) -> Vec<Loan> {
        self.loans.values().filter(|l| l.borrower == borrower).cloned().collect()
    }

    /// Book-wide invariants: every committed operation must leave these
    /// intact (spot-checked in tests, cheap enough to assert in debug runs).
    pub fn check_invariants(&self) -> Result<(), String> {
        self.market.check_invariants()?;
        for position in self.positions.values() {
            if position.available_amount > position.amount {
                return Err(format!(
                    "Position {}: available {} exceeds principal {}",
                    position.id, position.available_amount, position.amount
                ));
            }
        }
        for loan in self.loans.values() {
            if loan.matched_total() != loan.amount {
                return Err(format!(
                    "Loan {}: match records sum {} != outstanding {}",
                    loan.id,
                    loan.matched_total(),
                    loan.amount
                ));
            }
        }
        Ok(())
    }
}
