//! The range-bucketed lending engine: per-asset books of lender positions
//! and loans, a greedy cheapest-window matcher, and the pro-rata repayment
//! distributor, all serialized per asset.

pub mod book;
pub mod core;
pub mod distributor;
pub mod error;
pub mod matcher;
pub mod oracle;
pub mod settlement;
pub mod store;

// Re-exports
pub use book::AssetBook;
pub use self::core::LendingEngine;
pub use distributor::{Distribution, FlatInterestPolicy, InterestPolicy, PrincipalOnly};
pub use error::EngineError;
pub use matcher::{plan_match, MatchPlan};
pub use oracle::{PriceOracle, StaticOracle};
pub use settlement::{NullSettlement, SettlementListener};
pub use store::{DocumentStore, MemStore, SledStore};
