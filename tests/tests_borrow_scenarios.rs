use std::sync::Arc;

use rust_decimal::Decimal;

use lendpool::asset_registry::AssetRegistry;
use lendpool::engine::{EngineError, LendingEngine, MemStore, StaticOracle};
use lendpool::models::{
    BorrowRequest, CollateralSpec, LendRequest, LoanStatus, RepayRequest, WithdrawRequest,
};

const USDC_UNIT: u64 = 1_000_000; // decimals 6

fn engine() -> LendingEngine {
    let oracle = StaticOracle::new()
        .with_price("USDC", Decimal::ONE)
        .with_price("ETH", Decimal::from(3_000));
    LendingEngine::new(AssetRegistry::load_defaults(), Arc::new(MemStore::new()), Arc::new(oracle))
}

fn lend(engine: &LendingEngine, amount: u64, min_apr: u64, max_apr: u64) -> u64 {
    engine
        .add_liquidity(&LendRequest {
            owner: "alice".to_string(),
            asset: "USDC".to_string(),
            amount: Decimal::from(amount),
            min_apr: Decimal::from(min_apr),
            max_apr: Decimal::from(max_apr),
        })
        .unwrap()
        .id
}

fn borrow(engine: &LendingEngine, amount: u64, target_apr: u64) -> Result<lendpool::models::Loan, EngineError> {
    engine.borrow(&BorrowRequest {
        borrower: "bob".to_string(),
        asset: "USDC".to_string(),
        amount: Decimal::from(amount),
        target_apr: Decimal::from(target_apr),
        collateral: CollateralSpec { asset: "ETH".to_string(), amount: Decimal::from(2) },
    })
}

#[test]
fn test_borrow_scenario_single_position() {
    // Empty USDC market. Lend 10,000 at [5, 7].
    let engine = engine();
    let position_id = lend(&engine, 10_000, 5, 7);

    // Borrow 4,000 at 6%: fully matched against the single position.
    let loan = borrow(&engine, 4_000, 6).unwrap();
    assert_eq!(loan.status, LoanStatus::Active);
    assert_eq!(loan.amount, 4_000 * USDC_UNIT);
    assert_eq!(loan.matches.len(), 1);
    assert_eq!(loan.matches[0].position_id, position_id);

    let position = engine.position(position_id).unwrap();
    assert_eq!(position.available_amount, 6_000 * USDC_UNIT);
    assert_eq!(position.current_apr_bps, 600);

    let market = engine.market("USDC").unwrap();
    assert_eq!(market.buckets[&(500, 700)].borrowed, 4_000 * USDC_UNIT);

    // A second borrow for 7,000 at 6% fails with shortfall 1,000 and leaves
    // everything unchanged.
    let err = borrow(&engine, 7_000, 6).unwrap_err();
    match err {
        EngineError::InsufficientLiquidity { available, requested } => {
            assert_eq!(available, 6_000 * USDC_UNIT);
            assert_eq!(requested, 7_000 * USDC_UNIT);
        }
        other => panic!("Expected InsufficientLiquidity, got {:?}", other),
    }
}

#[test]
fn test_failed_borrow_leaves_state_unchanged() {
    let engine = engine();
    let position_id = lend(&engine, 10_000, 5, 7);
    borrow(&engine, 4_000, 6).unwrap();

    let market_before = engine.market("USDC").unwrap();
    let position_before = engine.position(position_id).unwrap();

    assert!(borrow(&engine, 7_000, 6).is_err());

    let market_after = engine.market("USDC").unwrap();
    let position_after = engine.position(position_id).unwrap();
    assert_eq!(market_after.total_borrowed, market_before.total_borrowed);
    assert_eq!(market_after.buckets[&(500, 700)].borrowed, market_before.buckets[&(500, 700)].borrowed);
    assert_eq!(position_after.available_amount, position_before.available_amount);
}

#[test]
fn test_borrow_outside_every_window_fails() {
    let engine = engine();
    lend(&engine, 10_000, 5, 7);

    let err = borrow(&engine, 1_000, 9).unwrap_err();
    assert!(matches!(err, EngineError::InsufficientLiquidity { available: 0, .. }));
}

#[test]
fn test_repayment_scenario_two_steps() {
    let engine = engine();
    let position_id = lend(&engine, 10_000, 5, 7);
    let loan = borrow(&engine, 4_000, 6).unwrap();

    // Repay 2,000: position recovers to 8,000 available, loan stays active.
    let (loan_after, dist) = engine
        .repay(&RepayRequest { loan_id: loan.id, amount: Decimal::from(2_000) })
        .unwrap();
    assert_eq!(dist.repaid, 2_000 * USDC_UNIT);
    assert_eq!(loan_after.amount, 2_000 * USDC_UNIT);
    assert_eq!(loan_after.status, LoanStatus::Active);
    assert_eq!(engine.position(position_id).unwrap().available_amount, 8_000 * USDC_UNIT);

    // Repay the remaining 2,000: loan closes, position fully available.
    let (loan_after, dist) = engine
        .repay(&RepayRequest { loan_id: loan.id, amount: Decimal::from(2_000) })
        .unwrap();
    assert_eq!(dist.repaid, 2_000 * USDC_UNIT);
    assert_eq!(loan_after.amount, 0);
    assert_eq!(loan_after.status, LoanStatus::Repaid);
    assert_eq!(engine.position(position_id).unwrap().available_amount, 10_000 * USDC_UNIT);
    assert_eq!(engine.market("USDC").unwrap().total_borrowed, 0);
}

#[test]
fn test_repayment_conservation_across_positions() {
    let engine = engine();
    // Three lenders with uneven amounts; all windows cover 6%
    lend(&engine, 1_000, 5, 7);
    lend(&engine, 3_000, 5, 7);
    lend(&engine, 3_000, 6, 8);

    let loan = borrow(&engine, 7_000, 6).unwrap();
    assert_eq!(loan.matches.len(), 3);

    // 1,000.01 does not divide evenly across 1000/3000/3000 allocations
    let (_, dist) = engine
        .repay(&RepayRequest {
            loan_id: loan.id,
            amount: Decimal::new(100_001, 2), // 1000.01
        })
        .unwrap();
    let total: u64 = dist.portions.iter().map(|(_, p, _)| p).sum();
    assert_eq!(total, dist.repaid);
    assert_eq!(dist.repaid, 1_000_010_000);
}

#[test]
fn test_lend_withdraw_round_trip() {
    let engine = engine();
    let position_id = lend(&engine, 10_000, 5, 7);

    // Full immediate withdrawal with zero utilization returns everything
    // and removes the position.
    let survived = engine
        .withdraw_liquidity(&WithdrawRequest {
            position_id,
            amount: Decimal::from(10_000),
        })
        .unwrap();
    assert!(survived.is_none());
    assert!(matches!(engine.position(position_id), Err(EngineError::PositionNotFound(_))));

    // The bucket carries no liquidity once its only position is gone
    let market = engine.market("USDC").unwrap();
    assert!(market.buckets.get(&(500, 700)).is_none());
    assert_eq!(market.total_liquidity, 0);
}

#[test]
fn test_withdraw_blocked_by_utilization() {
    let engine = engine();
    let position_id = lend(&engine, 10_000, 5, 7);
    borrow(&engine, 4_000, 6).unwrap();

    let err = engine
        .withdraw_liquidity(&WithdrawRequest {
            position_id,
            amount: Decimal::from(7_000),
        })
        .unwrap_err();
    match err {
        EngineError::InsufficientCapacity { available, requested, .. } => {
            assert_eq!(available, 6_000 * USDC_UNIT);
            assert_eq!(requested, 7_000 * USDC_UNIT);
        }
        other => panic!("Expected InsufficientCapacity, got {:?}", other),
    }
}

#[test]
fn test_matching_is_deterministic() {
    let build = || {
        let engine = engine();
        lend(&engine, 2_000, 5, 7);
        lend(&engine, 2_000, 4, 7);
        lend(&engine, 2_000, 5, 9);
        let loan = borrow(&engine, 5_000, 6).unwrap();
        loan.matches
            .iter()
            .map(|m| (m.position_id, m.allocated_amount))
            .collect::<Vec<_>>()
    };
    let first = build();
    let second = build();
    assert_eq!(first, second);
    // Cheapest window first, then insertion order for the 5% tie
    assert_eq!(first[0].0, 2);
    assert_eq!(first[1].0, 1);
    assert_eq!(first[2].0, 3);
}

#[test]
fn test_validation_rejected_before_mutation() {
    let engine = engine();

    // Inverted window
    let err = engine
        .add_liquidity(&LendRequest {
            owner: "alice".to_string(),
            asset: "USDC".to_string(),
            amount: Decimal::from(100),
            min_apr: Decimal::from(8),
            max_apr: Decimal::from(5),
        })
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidAprWindow { .. }));

    // Unsupported asset
    let err = engine
        .add_liquidity(&LendRequest {
            owner: "alice".to_string(),
            asset: "DOGE".to_string(),
            amount: Decimal::from(100),
            min_apr: Decimal::from(5),
            max_apr: Decimal::from(7),
        })
        .unwrap_err();
    assert!(matches!(err, EngineError::UnsupportedAsset(_)));

    // Negative amount
    let err = engine
        .add_liquidity(&LendRequest {
            owner: "alice".to_string(),
            asset: "USDC".to_string(),
            amount: Decimal::from(-100),
            min_apr: Decimal::from(5),
            max_apr: Decimal::from(7),
        })
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    // Nothing reached the market
    assert!(engine.market("USDC").is_err());
}

#[test]
fn test_update_range_rebuckets_ledger() {
    let engine = engine();
    let position_id = lend(&engine, 10_000, 5, 7);
    borrow(&engine, 4_000, 6).unwrap();

    engine
        .update_apr_range(&lendpool::models::UpdateRangeRequest {
            position_id,
            min_apr: Decimal::from(4),
            max_apr: Decimal::from(8),
        })
        .unwrap();

    let market = engine.market("USDC").unwrap();
    assert!(market.buckets.get(&(500, 700)).is_none());
    let bucket = &market.buckets[&(400, 800)];
    assert_eq!(bucket.liquidity, 10_000 * USDC_UNIT);
    assert_eq!(bucket.borrowed, 4_000 * USDC_UNIT);
    // Totals unchanged by the move
    assert_eq!(market.total_liquidity, 10_000 * USDC_UNIT);
    assert_eq!(market.total_borrowed, 4_000 * USDC_UNIT);
}
