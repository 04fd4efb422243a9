// Error taxonomy for the lending engine
use std::fmt;

#[derive(Debug, Clone)]
pub enum EngineError {
    // Validation errors: rejected before any mutation
    Validation(String),
    UnsupportedAsset(String),
    InvalidAprWindow { min_bps: u32, max_bps: u32 },

    // Capacity errors: surfaced with the shortfall, no partial state persists
    InsufficientLiquidity { available: u64, requested: u64 },
    InsufficientCapacity { position_id: u64, available: u64, requested: u64 },

    // Lookup errors
    PositionNotFound(u64),
    LoanNotFound(u64),
    MarketNotFound(String),

    // Lifecycle errors
    LoanNotActive { loan_id: u64, status: String },
    CollateralAssetMismatch { expected: String, actual: String },

    // Boundary errors
    OracleUnavailable(String),
    Store(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation(msg) => write!(f, "Validation failed: {}", msg),
            Self::UnsupportedAsset(asset) => write!(f, "Unsupported asset: {}", asset),
            Self::InvalidAprWindow { min_bps, max_bps } => {
                write!(f, "Invalid APR window: min {} bps exceeds max {} bps", min_bps, max_bps)
            }
            Self::InsufficientLiquidity { available, requested } => write!(
                f,
                "Insufficient liquidity: available {}, requested {}, shortfall {}",
                available,
                requested,
                requested.saturating_sub(*available)
            ),
            Self::InsufficientCapacity { position_id, available, requested } => write!(
                f,
                "Insufficient capacity on position {}: available {}, requested {}",
                position_id, available, requested
            ),
            Self::PositionNotFound(id) => write!(f, "Position {} not found", id),
            Self::LoanNotFound(id) => write!(f, "Loan {} not found", id),
            Self::MarketNotFound(asset) => write!(f, "No market for asset {}", asset),
            Self::LoanNotActive { loan_id, status } => {
                write!(f, "Loan {} is not active (status {})", loan_id, status)
            }
            Self::CollateralAssetMismatch { expected, actual } => {
                write!(f, "Collateral asset mismatch: expected {}, got {}", expected, actual)
            }
            Self::OracleUnavailable(asset) => {
                write!(f, "Price oracle unavailable for asset {}", asset)
            }
            Self::Store(msg) => write!(f, "Store error: {}", msg),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<String> for EngineError {
    fn from(msg: String) -> Self {
        EngineError::Validation(msg)
    }
}

// Error code mapping for API responses
impl EngineError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::UnsupportedAsset(_) => "UNSUPPORTED_ASSET",
            Self::InvalidAprWindow { .. } => "INVALID_APR_WINDOW",
            Self::InsufficientLiquidity { .. } => "INSUFFICIENT_LIQUIDITY",
            Self::InsufficientCapacity { .. } => "INSUFFICIENT_CAPACITY",
            Self::PositionNotFound(_) => "POSITION_NOT_FOUND",
            Self::LoanNotFound(_) => "LOAN_NOT_FOUND",
            Self::MarketNotFound(_) => "MARKET_NOT_FOUND",
            Self::LoanNotActive { .. } => "LOAN_NOT_ACTIVE",
            Self::CollateralAssetMismatch { .. } => "COLLATERAL_MISMATCH",
            Self::OracleUnavailable(_) => "ORACLE_UNAVAILABLE",
            Self::Store(_) => "STORE_ERROR",
        }
    }

    pub fn is_user_error(&self) -> bool {
        !matches!(self, Self::OracleUnavailable(_) | Self::Store(_))
    }

    /// Shortfall carried by capacity errors, for API payloads.
    pub fn shortfall(&self) -> Option<u64> {
        match self {
            Self::InsufficientLiquidity { available, requested }
            | Self::InsufficientCapacity { available, requested, .. } => {
                Some(requested.saturating_sub(*available))
            }
            _ => None,
        }
    }
}
