use axum::{
    extract::{Extension, Json, Path, Query},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use clap::Parser;
use std::sync::Arc;

use lendpool::asset_registry::{bps_to_apr, AssetRegistry};
use lendpool::engine::{EngineError, LendingEngine, SledStore, StaticOracle};
use lendpool::models::{
    AddCollateralRequest, BestRatesQuery, BorrowRequest, LendRequest, RangeQuery, RepayRequest,
    UpdateRangeRequest, WithdrawRequest,
};

#[derive(Parser, Debug)]
#[command(name = "lending_service", about = "APR-range lending pool API")]
struct Args {
    /// Override the configured listen address
    #[arg(long)]
    listen: Option<String>,

    /// Override the configured sled store path
    #[arg(long)]
    store: Option<String>,
}

struct AppState {
    engine: LendingEngine,
}

fn engine_error_response(err: EngineError) -> (StatusCode, String) {
    let status = match &err {
        EngineError::PositionNotFound(_)
        | EngineError::LoanNotFound(_)
        | EngineError::MarketNotFound(_) => StatusCode::NOT_FOUND,
        EngineError::OracleUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        EngineError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    };
    let body = serde_json::json!({
        "code": err.error_code(),
        "message": err.to_string(),
        "shortfall": err.shortfall(),
    });
    (status, body.to_string())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let config = lendpool::configure::load_config().expect("Failed to load config");
    let _guard = lendpool::logging::setup_async_file_logging("lending_service", &config.log_dir);

    let store_path = args.store.unwrap_or(config.store_path);
    let store = Arc::new(SledStore::open(&store_path).expect("Failed to open store"));

    // Demo oracle: flat stable prices. A deployment wires a real feed here.
    let oracle = Arc::new(
        StaticOracle::new()
            .with_price("USDC", 1.into())
            .with_price("USDT", 1.into())
            .with_price("DAI", 1.into())
            .with_price("ETH", 3000.into()),
    );

    let engine = LendingEngine::new(AssetRegistry::load_defaults(), store, oracle);
    let recovered = engine.recover().expect("Failed to recover books");
    tracing::info!(books = recovered, "engine recovered");

    let state = Arc::new(AppState { engine });
    let app = create_app(state);

    let listen_addr = args.listen.unwrap_or(config.listen_addr);
    println!("Lending service running on http://{}", listen_addr);
    let listener = tokio::net::TcpListener::bind(&listen_addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}

fn create_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/liquidity", post(add_liquidity))
        .route("/api/liquidity/withdraw", post(withdraw_liquidity))
        .route("/api/liquidity/range", post(update_apr_range))
        .route("/api/liquidity/user/:owner", get(positions_by_owner))
        .route("/api/liquidity/:id", get(position_by_id))
        .route("/api/loans", post(create_loan))
        .route("/api/loans/repay", post(repay_loan))
        .route("/api/loans/collateral", post(add_collateral))
        .route("/api/loans/user/:borrower", get(loans_by_borrower))
        .route("/api/loans/:id", get(loan_by_id))
        .route("/api/markets", get(markets))
        .route("/api/markets/:asset", get(market))
        .route("/api/markets/stats", get(market_stats))
        .route("/api/markets/best-rates", get(best_rates))
        .route("/api/markets/range", get(liquidity_in_range))
        .layer(Extension(state))
}

async fn add_liquidity(
    Extension(state): Extension<Arc<AppState>>,
    Json(request): Json<LendRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let position = state.engine.add_liquidity(&request).map_err(engine_error_response)?;
    Ok(Json(serde_json::json!({ "position": position })))
}

async fn withdraw_liquidity(
    Extension(state): Extension<Arc<AppState>>,
    Json(request): Json<WithdrawRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let survived = state.engine.withdraw_liquidity(&request).map_err(engine_error_response)?;
    let removed = survived.is_none();
    Ok(Json(serde_json::json!({
        "position": survived,
        "removed": removed,
    })))
}

async fn update_apr_range(
    Extension(state): Extension<Arc<AppState>>,
    Json(request): Json<UpdateRangeRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let position = state.engine.update_apr_range(&request).map_err(engine_error_response)?;
    Ok(Json(serde_json::json!({ "position": position })))
}

async fn position_by_id(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let position = state.engine.position(id).map_err(engine_error_response)?;
    Ok(Json(serde_json::json!({ "position": position })))
}

async fn positions_by_owner(
    Extension(state): Extension<Arc<AppState>>,
    Path(owner): Path<String>,
) -> Json<serde_json::Value> {
    let positions = state.engine.positions_by_owner(&owner);
    Json(serde_json::json!({ "count": positions.len(), "positions": positions }))
}

async fn create_loan(
    Extension(state): Extension<Arc<AppState>>,
    Json(request): Json<BorrowRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let loan = state.engine.borrow(&request).map_err(engine_error_response)?;
    Ok(Json(serde_json::json!({ "loan": loan })))
}

async fn repay_loan(
    Extension(state): Extension<Arc<AppState>>,
    Json(request): Json<RepayRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let (loan, distribution) = state.engine.repay(&request).map_err(engine_error_response)?;
    Ok(Json(serde_json::json!({
        "loan": loan,
        "repaid": distribution.repaid,
        "status": format!("{:?}", distribution.status),
    })))
}

async fn add_collateral(
    Extension(state): Extension<Arc<AppState>>,
    Json(request): Json<AddCollateralRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let loan = state.engine.add_collateral(&request).map_err(engine_error_response)?;
    Ok(Json(serde_json::json!({
        "collateral": loan.collateral,
        "health_factor": loan.health_factor,
    })))
}

async fn loan_by_id(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let loan = state.engine.loan(id).map_err(engine_error_response)?;
    Ok(Json(serde_json::json!({ "loan": loan })))
}

async fn loans_by_borrower(
    Extension(state): Extension<Arc<AppState>>,
    Path(borrower): Path<String>,
) -> Json<serde_json::Value> {
    let loans = state.engine.loans_by_borrower(&borrower);
    Json(serde_json::json!({ "count": loans.len(), "loans": loans }))
}

async fn market(
    Extension(state): Extension<Arc<AppState>>,
    Path(asset): Path<String>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let market = state.engine.market(&asset).map_err(engine_error_response)?;
    Ok(Json(serde_json::json!({ "market": market })))
}

async fn markets(Extension(state): Extension<Arc<AppState>>) -> Json<serde_json::Value> {
    let markets = state.engine.markets();
    Json(serde_json::json!({ "count": markets.len(), "markets": markets }))
}

async fn market_stats(Extension(state): Extension<Arc<AppState>>) -> Json<serde_json::Value> {
    let stats = state.engine.market_stats();
    Json(serde_json::json!(stats))
}

async fn best_rates(
    Extension(state): Extension<Arc<AppState>>,
    Query(query): Query<BestRatesQuery>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let (recommendations, shortfall) = state
        .engine
        .best_borrow_rates(&query.asset, query.amount)
        .map_err(engine_error_response)?;

    let recommendations: Vec<serde_json::Value> = recommendations
        .iter()
        .map(|r| {
            serde_json::json!({
                "range": { "min": bps_to_apr(r.min_bps), "max": bps_to_apr(r.max_bps) },
                "available": r.available,
                "recommended_amount": r.recommended_amount,
                "suggested_apr": bps_to_apr(r.suggested_apr_bps),
            })
        })
        .collect();

    Ok(Json(serde_json::json!({
        "asset": query.asset,
        "recommendations": recommendations,
        "shortfall": shortfall,
    })))
}

async fn liquidity_in_range(
    Extension(state): Extension<Arc<AppState>>,
    Query(query): Query<RangeQuery>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let (total, available) = state
        .engine
        .liquidity_in_range(&query.asset, query.min_apr, query.max_apr)
        .map_err(engine_error_response)?;
    Ok(Json(serde_json::json!({
        "asset": query.asset,
        "total_liquidity": total,
        "available_liquidity": available,
    })))
}
