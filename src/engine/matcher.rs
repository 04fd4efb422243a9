use tracing::debug;

use super::book::AssetBook;
use super::error::EngineError;
use crate::models::{MatchRecord, PositionId};

/// The allocation a borrow request would reserve, computed without touching
/// the book. Commit separately so a failed plan leaves no trace.
#[derive(Debug, Clone)]
pub struct MatchPlan {
    pub target_apr_bps: u32,
    pub requested: u64,
    pub records: Vec<MatchRecord>,
}

impl MatchPlan {
    pub fn total_allocated(&self) -> u64 {
        self.records.iter().map(|r| r.allocated_amount).sum()
    }
}

/// Plan the greedy fill for a borrow request.
///
/// Step 1 is the aggregate feasibility check across every qualifying bucket;
/// step 2 enumerates eligible positions ascending by `min_apr_bps` with the
/// insertion order of the book as the stable tie-break; step 3 reserves
/// greedily. Positions that would contribute zero are omitted. If the
/// eligible list cannot cover the request even though the aggregate check
/// passed, the plan is rejected as a whole — no partial loans exist.
pub fn plan_match(
    book: &AssetBook,
    target_apr_bps: u32,
    requested: u64,
) -> Result<MatchPlan, EngineError> {
    let available = book.market.available_liquidity_for_apr(target_apr_bps);
    if available < requested {
        return Err(EngineError::InsufficientLiquidity { available, requested });
    }

    // BTreeMap iteration is insertion order (monotonic ids); the stable sort
    // keeps that order among equal min_apr positions.
    let mut eligible: Vec<&crate::models::LiquidityPosition> = book
        .positions
        .values()
        .filter(|p| p.accepts_apr(target_apr_bps) && p.available_amount > 0)
        .collect();
    eligible.sort_by_key(|p| p.min_apr_bps);

    let mut remaining = requested;
    let mut records = Vec::new();
    for position in eligible {
        if remaining == 0 {
            break;
        }
        let take = position.available_amount.min(remaining);
        records.push(MatchRecord {
            position_id: position.id,
            allocated_amount: take,
            apr_bps: target_apr_bps,
        });
        remaining -= take;
    }

    if remaining > 0 {
        // Aggregate said yes but the position walk came up short (ledger
        // drift would be the only way here). Reject, nothing was mutated.
        debug!(target_apr_bps, requested, shortfall = remaining, "match plan short");
        return Err(EngineError::InsufficientLiquidity {
            available: requested - remaining,
            requested,
        });
    }

    Ok(MatchPlan { target_apr_bps, requested, records })
}

/// Apply a plan to the book: reserve from each position and mirror the
/// borrowed amount into that position's bucket. If any reservation fails
/// (stale plan), every reservation already applied is unwound before the
/// error surfaces — the book never holds a half-committed match.
pub fn commit_match(
    book: &mut AssetBook,
    plan: &MatchPlan,
    now_ms: i64,
) -> Result<(), EngineError> {
    let mut applied: Vec<(PositionId, u64, u32, u32)> = Vec::with_capacity(plan.records.len());

    for record in &plan.records {
        let position = match book.positions.get_mut(&record.position_id) {
            Some(p) => p,
            None => {
                rollback(book, &applied, now_ms);
                return Err(EngineError::PositionNotFound(record.position_id));
            }
        };
        let (min, max) = (position.min_apr_bps, position.max_apr_bps);
        if position.reserve(record.allocated_amount, plan.target_apr_bps, now_ms).is_err() {
            let available = position.available_amount;
            rollback(book, &applied, now_ms);
            return Err(EngineError::InsufficientCapacity {
                position_id: record.position_id,
                available,
                requested: record.allocated_amount,
            });
        }
        book.market.upsert_bucket(min, max, 0, record.allocated_amount as i64, now_ms);
        applied.push((record.position_id, record.allocated_amount, min, max));
    }

    Ok(())
}

fn rollback(book: &mut AssetBook, applied: &[(PositionId, u64, u32, u32)], now_ms: i64) {
    for (position_id, amount, min, max) in applied {
        if let Some(position) = book.positions.get_mut(position_id) {
            position.release(*amount, now_ms);
        }
        book.market.upsert_bucket(*min, *max, 0, -(*amount as i64), now_ms);
    }
}
