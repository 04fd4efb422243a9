use super::book::AssetBook;
use super::error::EngineError;
use crate::models::{LoanId, LoanStatus};

/// How much of each repayment portion counts as interest (credited to the
/// lender's earnings and the loan's accrued total). The principal/interest
/// split is deployment policy, not engine logic.
pub trait InterestPolicy: Send + Sync {
    fn interest_component(&self, portion: u64, apr_bps: u32) -> u64;
}

/// Every repaid unit is principal; earnings stay untouched.
pub struct PrincipalOnly;

impl InterestPolicy for PrincipalOnly {
    fn interest_component(&self, _portion: u64, _apr_bps: u32) -> u64 {
        0
    }
}

/// A fixed basis-point share of each portion is booked as interest.
pub struct FlatInterestPolicy {
    pub interest_bps: u32,
}

impl InterestPolicy for FlatInterestPolicy {
    fn interest_component(&self, portion: u64, _apr_bps: u32) -> u64 {
        ((portion as u128 * self.interest_bps as u128) / 10_000) as u64
    }
}

/// Outcome of one distribution pass.
#[derive(Debug, Clone)]
pub struct Distribution {
    /// (position_id, portion, interest) per match record actually touched.
    pub portions: Vec<(u64, u64, u64)>,
    /// Amount applied against the loan (the request clamped to outstanding).
    pub repaid: u64,
    /// Loan status after the distribution.
    pub status: LoanStatus,
}

/// Unwind a repayment across a loan's match records pro-rata.
///
/// Shares are taken against the loan amount BEFORE mutation; portions are
/// integer floor division with the residue handed to the last records that
/// still have allocation, so the portions sum to the repaid amount exactly.
/// Each portion releases position capacity, credits the policy's interest
/// component to the position's earnings, shrinks the match record, and
/// reverses the borrowed side of the position's bucket.
pub fn distribute_repayment(
    book: &mut AssetBook,
    loan_id: LoanId,
    amount: u64,
    policy: &dyn InterestPolicy,
    now_ms: i64,
) -> Result<Distribution, EngineError> {
    let loan = book.loan(loan_id)?;
    if loan.status != LoanStatus::Active {
        return Err(EngineError::LoanNotActive {
            loan_id,
            status: format!("{:?}", loan.status),
        });
    }

    let outstanding = loan.amount;
    let repaid = amount.min(outstanding);
    if repaid == 0 {
        return Err(EngineError::Validation("Repayment amount must be positive".to_string()));
    }

    // Resolve every record's position up front so a dangling reference
    // fails the whole operation before any state moves.
    let records: Vec<(u64, u64, u32)> = loan
        .matches
        .iter()
        .map(|m| (m.position_id, m.allocated_amount, m.apr_bps))
        .collect();
    for (position_id, _, _) in &records {
        if !book.positions.contains_key(position_id) {
            return Err(EngineError::PositionNotFound(*position_id));
        }
    }

    // Floor-divided portions; the tail records absorb the residue so the
    // sum is exact. Allocation is the per-record ceiling.
    let mut portions: Vec<u64> = records
        .iter()
        .map(|(_, allocated, _)| ((repaid as u128 * *allocated as u128) / outstanding as u128) as u64)
        .collect();
    let mut residue = repaid - portions.iter().sum::<u64>();
    for i in (0..portions.len()).rev() {
        if residue == 0 {
            break;
        }
        let spare = records[i].1 - portions[i];
        let take = spare.min(residue);
        portions[i] += take;
        residue -= take;
    }

    let mut result = Vec::new();
    let mut interest_total = 0u64;
    for (i, (position_id, _, apr_bps)) in records.iter().enumerate() {
        let portion = portions[i];
        if portion == 0 {
            continue;
        }
        let interest = policy.interest_component(portion, *apr_bps);

        let position = book.positions.get_mut(position_id).unwrap();
        let (min, max) = (position.min_apr_bps, position.max_apr_bps);
        position.release(portion, now_ms);
        if interest > 0 {
            position.credit_earnings(interest, now_ms);
        }
        book.market.upsert_bucket(min, max, 0, -(portion as i64), now_ms);

        interest_total += interest;
        result.push((*position_id, portion, interest));
    }

    let loan = book.loans.get_mut(&loan_id).unwrap();
    for (i, record) in loan.matches.iter_mut().enumerate() {
        record.allocated_amount -= portions[i];
    }
    loan.interest_accrued += interest_total;
    loan.apply_repayment(repaid, now_ms);
    let status = loan.status;

    Ok(Distribution { portions: result, repaid, status })
}
