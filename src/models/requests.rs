use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub status: i32,
    pub msg: String,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self { status: 0, msg: "ok".to_string(), data }
    }

    pub fn error(status: i32, msg: String, data: T) -> Self {
        Self { status, msg, data }
    }
}

/// Client boundary: amounts are Decimal in display units, APRs are Decimal
/// percent. The engine converts both through the asset registry before any
/// state is touched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LendRequest {
    pub owner: String,
    pub asset: String,
    pub amount: Decimal,
    pub min_apr: Decimal,
    pub max_apr: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawRequest {
    pub position_id: u64,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateRangeRequest {
    pub position_id: u64,
    pub min_apr: Decimal,
    pub max_apr: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollateralSpec {
    pub asset: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BorrowRequest {
    pub borrower: String,
    pub asset: String,
    pub amount: Decimal,
    pub target_apr: Decimal,
    pub collateral: CollateralSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepayRequest {
    pub loan_id: u64,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddCollateralRequest {
    pub loan_id: u64,
    pub asset: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BestRatesQuery {
    pub asset: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RangeQuery {
    pub asset: String,
    pub min_apr: Decimal,
    pub max_apr: Decimal,
}

/// Cross-asset aggregate returned by the stats query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketStats {
    pub total_liquidity: u64,
    pub total_borrowed: u64,
    pub average_apr_bps: f64,
    pub utilization_rate: f64,
    pub asset_count: usize,
}
