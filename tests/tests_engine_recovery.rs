use std::sync::Arc;

use rust_decimal::Decimal;

use lendpool::asset_registry::AssetRegistry;
use lendpool::engine::{LendingEngine, SledStore, StaticOracle};
use lendpool::models::{BorrowRequest, CollateralSpec, LendRequest, LoanStatus, RepayRequest};

fn oracle() -> Arc<StaticOracle> {
    Arc::new(
        StaticOracle::new()
            .with_price("USDC", Decimal::ONE)
            .with_price("ETH", Decimal::from(3_000)),
    )
}

fn engine_at(path: &std::path::Path) -> LendingEngine {
    let store = SledStore::open(path).unwrap();
    LendingEngine::new(AssetRegistry::load_defaults(), Arc::new(store), oracle())
}

#[test]
fn test_books_survive_restart() {
    let dir = tempfile::tempdir().unwrap();

    let (position_id, loan_id) = {
        let engine = engine_at(dir.path());
        let position = engine
            .add_liquidity(&LendRequest {
                owner: "alice".to_string(),
                asset: "USDC".to_string(),
                amount: Decimal::from(10_000),
                min_apr: Decimal::from(5),
                max_apr: Decimal::from(7),
            })
            .unwrap();
        let loan = engine
            .borrow(&BorrowRequest {
                borrower: "bob".to_string(),
                asset: "USDC".to_string(),
                amount: Decimal::from(4_000),
                target_apr: Decimal::from(6),
                collateral: CollateralSpec { asset: "ETH".to_string(), amount: Decimal::from(2) },
            })
            .unwrap();
        (position.id, loan.id)
    };

    let engine = engine_at(dir.path());
    let recovered = engine.recover().unwrap();
    assert_eq!(recovered, 1);

    let position = engine.position(position_id).unwrap();
    assert_eq!(position.available_amount, 6_000_000_000);
    let loan = engine.loan(loan_id).unwrap();
    assert_eq!(loan.amount, 4_000_000_000);
    assert_eq!(loan.status, LoanStatus::Active);

    let market = engine.market("USDC").unwrap();
    assert_eq!(market.total_liquidity, 10_000_000_000);
    assert_eq!(market.total_borrowed, 4_000_000_000);
}

#[test]
fn test_id_counters_resume_past_recovered_ids() {
    let dir = tempfile::tempdir().unwrap();

    {
        let engine = engine_at(dir.path());
        for _ in 0..3 {
            engine
                .add_liquidity(&LendRequest {
                    owner: "alice".to_string(),
                    asset: "USDC".to_string(),
                    amount: Decimal::from(1_000),
                    min_apr: Decimal::from(5),
                    max_apr: Decimal::from(7),
                })
                .unwrap();
        }
    }

    let engine = engine_at(dir.path());
    engine.recover().unwrap();
    let position = engine
        .add_liquidity(&LendRequest {
            owner: "carol".to_string(),
            asset: "USDC".to_string(),
            amount: Decimal::from(1_000),
            min_apr: Decimal::from(5),
            max_apr: Decimal::from(7),
        })
        .unwrap();
    assert_eq!(position.id, 4);
}

#[test]
fn test_repayment_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();

    let loan_id = {
        let engine = engine_at(dir.path());
        engine
            .add_liquidity(&LendRequest {
                owner: "alice".to_string(),
                asset: "USDC".to_string(),
                amount: Decimal::from(10_000),
                min_apr: Decimal::from(5),
                max_apr: Decimal::from(7),
            })
            .unwrap();
        let loan = engine
            .borrow(&BorrowRequest {
                borrower: "bob".to_string(),
                asset: "USDC".to_string(),
                amount: Decimal::from(4_000),
                target_apr: Decimal::from(6),
                collateral: CollateralSpec { asset: "ETH".to_string(), amount: Decimal::from(2) },
            })
            .unwrap();
        engine
            .repay(&RepayRequest { loan_id: loan.id, amount: Decimal::from(4_000) })
            .unwrap();
        loan.id
    };

    let engine = engine_at(dir.path());
    engine.recover().unwrap();
    let loan = engine.loan(loan_id).unwrap();
    assert_eq!(loan.status, LoanStatus::Repaid);
    assert_eq!(engine.market("USDC").unwrap().total_borrowed, 0);

    // A repaid loan stays queryable but refuses further repayment
    let err = engine
        .repay(&RepayRequest { loan_id, amount: Decimal::from(1) })
        .unwrap_err();
    assert!(matches!(err, lendpool::engine::EngineError::LoanNotActive { .. }));
}
