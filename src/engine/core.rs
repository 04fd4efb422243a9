use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use anyhow::Result;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rustc_hash::FxHashMap;
use tracing::{error, info, warn};

use super::book::AssetBook;
use super::distributor::{distribute_repayment, Distribution, InterestPolicy, PrincipalOnly};
use super::error::EngineError;
use super::matcher::{commit_match, plan_match};
use super::oracle::PriceOracle;
use super::settlement::{NullSettlement, SettlementListener};
use super::store::DocumentStore;
use crate::asset_registry::{apr_to_bps, AssetRegistry};
use crate::models::{
    AddCollateralRequest, BorrowRequest, Collateral, LendRequest, LiquidityPosition, Loan, LoanId,
    Market, MarketStats, PositionId, RateRecommendation, RepayRequest, UpdateRangeRequest,
    WithdrawRequest,
};

const BOOK_KEY_PREFIX: &str = "book/";

/// The lending engine: one book per asset behind its own mutex, so the
/// check-enumerate-reserve sequence of a borrow is a single atomic unit per
/// asset while different assets proceed in parallel.
pub struct LendingEngine {
    registry: AssetRegistry,
    books: RwLock<FxHashMap<String, Arc<Mutex<AssetBook>>>>,
    /// Which asset's book owns a given position/loan id.
    position_index: Mutex<FxHashMap<PositionId, String>>,
    loan_index: Mutex<FxHashMap<LoanId, String>>,
    next_position_id: AtomicU64,
    next_loan_id: AtomicU64,
    store: Arc<dyn DocumentStore>,
    oracle: Arc<dyn PriceOracle>,
    settlement: Arc<dyn SettlementListener>,
    interest_policy: Box<dyn InterestPolicy>,
}

impl LendingEngine {
    pub fn new(
        registry: AssetRegistry,
        store: Arc<dyn DocumentStore>,
        oracle: Arc<dyn PriceOracle>,
    ) -> Self {
        LendingEngine {
            registry,
            books: RwLock::new(FxHashMap::default()),
            position_index: Mutex::new(FxHashMap::default()),
            loan_index: Mutex::new(FxHashMap::default()),
            next_position_id: AtomicU64::new(1),
            next_loan_id: AtomicU64::new(1),
            store,
            oracle,
            settlement: Arc::new(NullSettlement),
            interest_policy: Box::new(PrincipalOnly),
        }
    }

    pub fn with_settlement(mut self, settlement: Arc<dyn SettlementListener>) -> Self {
        self.settlement = settlement;
        self
    }

    pub fn with_interest_policy(mut self, policy: Box<dyn InterestPolicy>) -> Self {
        self.interest_policy = policy;
        self
    }

    /// Rebuild books and id counters from the document store.
    pub fn recover(&self) -> Result<usize> {
        let docs = self.store.scan_prefix(BOOK_KEY_PREFIX)?;
        let mut count = 0;
        let mut max_position_id = 0;
        let mut max_loan_id = 0;

        let mut books = self.books.write().unwrap();
        let mut position_index = self.position_index.lock().unwrap();
        let mut loan_index = self.loan_index.lock().unwrap();

        for (_key, bytes) in docs {
            let book: AssetBook = bincode::deserialize(&bytes)?;
            info!(asset = %book.asset, positions = book.positions.len(), loans = book.loans.len(), "recovered book");
            for id in book.positions.keys() {
                position_index.insert(*id, book.asset.clone());
                max_position_id = max_position_id.max(*id);
            }
            for id in book.loans.keys() {
                loan_index.insert(*id, book.asset.clone());
                max_loan_id = max_loan_id.max(*id);
            }
            books.insert(book.asset.clone(), Arc::new(Mutex::new(book)));
            count += 1;
        }

        self.next_position_id.store(max_position_id + 1, Ordering::SeqCst);
        self.next_loan_id.store(max_loan_id + 1, Ordering::SeqCst);
        Ok(count)
    }

    fn book(&self, asset: &str) -> Arc<Mutex<AssetBook>> {
        if let Some(book) = self.books.read().unwrap().get(asset) {
            return Arc::clone(book);
        }
        let mut books = self.books.write().unwrap();
        Arc::clone(
            books
                .entry(asset.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(AssetBook::new(asset)))),
        )
    }

    fn existing_book(&self, asset: &str) -> Result<Arc<Mutex<AssetBook>>, EngineError> {
        self.books
            .read()
            .unwrap()
            .get(asset)
            .map(Arc::clone)
            .ok_or_else(|| EngineError::MarketNotFound(asset.to_string()))
    }

    /// Persist a book while its lock is held, so the stored document always
    /// reflects a committed state.
    fn persist_book(&self, book: &AssetBook) -> Result<(), EngineError> {
        let bytes = bincode::serialize(book).map_err(|e| EngineError::Store(e.to_string()))?;
        self.store
            .put(&format!("{}{}", BOOK_KEY_PREFIX, book.asset), &bytes)
            .map_err(|e| EngineError::Store(e.to_string()))
    }

    /// Persist the book, or put the pre-mutation checkpoint back. The
    /// in-memory ledger must never run ahead of the stored one: a failing
    /// store surfaces the error with the whole operation undone.
    fn persist_or_restore(
        &self,
        book: &mut AssetBook,
        checkpoint: AssetBook,
    ) -> Result<(), EngineError> {
        if let Err(e) = self.persist_book(book) {
            *book = checkpoint;
            return Err(e);
        }
        Ok(())
    }

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// Price per raw unit of the asset as f64, for health-factor math.
    fn raw_unit_price(&self, asset: &str) -> Result<f64, EngineError> {
        let price = self.oracle.price(asset)?;
        let info = self
            .registry
            .get(asset)
            .ok_or_else(|| EngineError::UnsupportedAsset(asset.to_string()))?;
        let scale = 10f64.powi(info.decimals as i32);
        let price = price.to_f64().ok_or_else(|| {
            EngineError::Validation(format!("Unrepresentable price for {}", asset))
        })?;
        Ok(price / scale)
    }

    // ------------------------------------------------------------------
    // Liquidity operations
    // ------------------------------------------------------------------

    pub fn add_liquidity(&self, request: &LendRequest) -> Result<LiquidityPosition, EngineError> {
        if !self.registry.is_supported(&request.asset) {
            return Err(EngineError::UnsupportedAsset(request.asset.clone()));
        }
        let amount = self
            .registry
            .to_raw_amount(&request.asset, request.amount)
            .map_err(EngineError::Validation)?;
        if amount == 0 {
            return Err(EngineError::Validation("Lend amount must be positive".to_string()));
        }
        let min_bps = apr_to_bps(request.min_apr).map_err(EngineError::Validation)?;
        let max_bps = apr_to_bps(request.max_apr).map_err(EngineError::Validation)?;
        if min_bps > max_bps {
            return Err(EngineError::InvalidAprWindow { min_bps, max_bps });
        }

        let id = self.next_position_id.fetch_add(1, Ordering::SeqCst);
        let now = Self::now_ms();
        let position =
            LiquidityPosition::new(id, &request.owner, &request.asset, amount, min_bps, max_bps, now);

        let book = self.book(&request.asset);
        let mut book = book.lock().unwrap();
        let checkpoint = book.clone();
        book.add_position(position.clone(), now);
        self.persist_or_restore(&mut book, checkpoint)?;
        drop(book);

        self.position_index.lock().unwrap().insert(id, request.asset.clone());
        info!(position_id = id, asset = %request.asset, amount, min_bps, max_bps, "liquidity added");
        Ok(position)
    }

    /// Withdraw unused capacity; returns the surviving position, or None if
    /// the principal reached zero and the position was removed.
    pub fn withdraw_liquidity(
        &self,
        request: &WithdrawRequest,
    ) -> Result<Option<LiquidityPosition>, EngineError> {
        let asset = self.asset_of_position(request.position_id)?;
        let amount = self
            .registry
            .to_raw_amount(&asset, request.amount)
            .map_err(EngineError::Validation)?;

        let book = self.existing_book(&asset)?;
        let mut book = book.lock().unwrap();
        let checkpoint = book.clone();
        let survived = book.withdraw(request.position_id, amount, Self::now_ms())?;
        self.persist_or_restore(&mut book, checkpoint)?;
        drop(book);

        if survived.is_none() {
            self.position_index.lock().unwrap().remove(&request.position_id);
        }
        info!(position_id = request.position_id, asset = %asset, amount, "liquidity withdrawn");
        Ok(survived)
    }

    pub fn update_apr_range(
        &self,
        request: &UpdateRangeRequest,
    ) -> Result<LiquidityPosition, EngineError> {
        let min_bps = apr_to_bps(request.min_apr).map_err(EngineError::Validation)?;
        let max_bps = apr_to_bps(request.max_apr).map_err(EngineError::Validation)?;
        let asset = self.asset_of_position(request.position_id)?;

        let book = self.existing_book(&asset)?;
        let mut book = book.lock().unwrap();
        let checkpoint = book.clone();
        let position = book.update_range(request.position_id, min_bps, max_bps, Self::now_ms())?;
        self.persist_or_restore(&mut book, checkpoint)?;
        Ok(position)
    }

    // ------------------------------------------------------------------
    // Borrow / repay
    // ------------------------------------------------------------------

    pub fn borrow(&self, request: &BorrowRequest) -> Result<Loan, EngineError> {
        if !self.registry.is_supported(&request.asset) {
            return Err(EngineError::UnsupportedAsset(request.asset.clone()));
        }
        if !self.registry.is_supported(&request.collateral.asset) {
            return Err(EngineError::UnsupportedAsset(request.collateral.asset.clone()));
        }
        let amount = self
            .registry
            .to_raw_amount(&request.asset, request.amount)
            .map_err(EngineError::Validation)?;
        if amount == 0 {
            return Err(EngineError::Validation("Borrow amount must be positive".to_string()));
        }
        let target_bps = apr_to_bps(request.target_apr).map_err(EngineError::Validation)?;
        let collateral_amount = self
            .registry
            .to_raw_amount(&request.collateral.asset, request.collateral.amount)
            .map_err(EngineError::Validation)?;

        // Prices first: an unavailable oracle must abort before any
        // reservation, never after.
        let collateral_price = self.raw_unit_price(&request.collateral.asset)?;
        let asset_price = self.raw_unit_price(&request.asset)?;

        let book = self.existing_book(&request.asset).map_err(|_| {
            // No book yet means no liquidity at all for the asset
            EngineError::InsufficientLiquidity { available: 0, requested: amount }
        })?;
        let mut book = book.lock().unwrap();

        let now = Self::now_ms();
        let checkpoint = book.clone();
        let plan = plan_match(&book, target_bps, amount)?;
        commit_match(&mut book, &plan, now)?;

        let id = self.next_loan_id.fetch_add(1, Ordering::SeqCst);
        let mut loan = Loan::new(
            id,
            &request.borrower,
            &request.asset,
            amount,
            target_bps,
            Collateral { asset: request.collateral.asset.clone(), amount: collateral_amount },
            plan.records,
            now,
        );
        loan.calculate_health_factor(collateral_price, asset_price);
        book.loans.insert(id, loan.clone());
        self.persist_or_restore(&mut book, checkpoint)?;
        drop(book);

        self.loan_index.lock().unwrap().insert(id, request.asset.clone());
        if let Err(e) = self.settlement.on_loan_created(&loan) {
            error!(loan_id = id, "settlement notification failed: {:#}", e);
        }
        info!(loan_id = id, asset = %request.asset, amount, target_bps, matches = loan.matches.len(), "loan created");
        Ok(loan)
    }

    pub fn repay(&self, request: &RepayRequest) -> Result<(Loan, Distribution), EngineError> {
        let asset = self.asset_of_loan(request.loan_id)?;
        let amount = self
            .registry
            .to_raw_amount(&asset, request.amount)
            .map_err(EngineError::Validation)?;

        let book = self.existing_book(&asset)?;
        let mut book = book.lock().unwrap();
        let checkpoint = book.clone();
        let distribution = distribute_repayment(
            &mut book,
            request.loan_id,
            amount,
            self.interest_policy.as_ref(),
            Self::now_ms(),
        )?;
        let loan = book.loan(request.loan_id)?.clone();
        self.persist_or_restore(&mut book, checkpoint)?;
        drop(book);

        if loan.status == crate::models::LoanStatus::Repaid {
            if let Err(e) = self.settlement.on_collateral_released(loan.id, &loan.collateral) {
                error!(loan_id = loan.id, "settlement notification failed: {:#}", e);
            }
            info!(loan_id = loan.id, "loan fully repaid, collateral released");
        }
        Ok((loan, distribution))
    }

    pub fn add_collateral(&self, request: &AddCollateralRequest) -> Result<Loan, EngineError> {
        let asset = self.asset_of_loan(request.loan_id)?;
        let book = self.existing_book(&asset)?;

        // Validate and price before mutating; a down oracle leaves both the
        // collateral and the stored health factor untouched.
        let (collateral_asset, loan_asset) = {
            let book = book.lock().unwrap();
            let loan = book.loan(request.loan_id)?;
            (loan.collateral.asset.clone(), loan.asset.clone())
        };
        if collateral_asset != request.asset {
            return Err(EngineError::CollateralAssetMismatch {
                expected: collateral_asset,
                actual: request.asset.clone(),
            });
        }
        let amount = self
            .registry
            .to_raw_amount(&request.asset, request.amount)
            .map_err(EngineError::Validation)?;
        let collateral_price = self.raw_unit_price(&collateral_asset)?;
        let asset_price = self.raw_unit_price(&loan_asset)?;

        let mut book = book.lock().unwrap();
        let now = Self::now_ms();
        let checkpoint = book.clone();
        let loan = book.loan_mut(request.loan_id)?;
        loan.collateral.amount += amount;
        loan.calculate_health_factor(collateral_price, asset_price);
        loan.updated_at_ms = now;
        let loan = loan.clone();
        self.persist_or_restore(&mut book, checkpoint)?;
        Ok(loan)
    }

    /// Recompute a loan's health factor from live prices and raise the
    /// liquidation signal when it falls below 1.0. With the oracle down the
    /// stored health factor is left as-is and the error surfaces instead.
    pub fn evaluate_health(&self, loan_id: LoanId) -> Result<(f64, bool), EngineError> {
        let asset = self.asset_of_loan(loan_id)?;
        let book = self.existing_book(&asset)?;

        let (collateral_asset, loan_asset) = {
            let book = book.lock().unwrap();
            let loan = book.loan(loan_id)?;
            (loan.collateral.asset.clone(), loan.asset.clone())
        };
        let collateral_price = self.raw_unit_price(&collateral_asset)?;
        let asset_price = self.raw_unit_price(&loan_asset)?;

        let mut book = book.lock().unwrap();
        let checkpoint = book.clone();
        let loan = book.loan_mut(loan_id)?;
        let health = loan.calculate_health_factor(collateral_price, asset_price);
        let needs_liquidation = loan.needs_liquidation();
        self.persist_or_restore(&mut book, checkpoint)?;
        drop(book);

        if needs_liquidation {
            warn!(loan_id, health, "loan under-collateralized");
            if let Err(e) = self.settlement.on_liquidation_signal(loan_id, health) {
                error!(loan_id, "settlement notification failed: {:#}", e);
            }
        }
        Ok((health, needs_liquidation))
    }

    // ------------------------------------------------------------------
    // Queries (lock-per-book snapshots, eventually consistent across assets)
    // ------------------------------------------------------------------

    pub fn position(&self, id: PositionId) -> Result<LiquidityPosition, EngineError> {
        let asset = self.asset_of_position(id)?;
        let book = self.existing_book(&asset)?;
        let book = book.lock().unwrap();
        Ok(book.position(id)?.clone())
    }

    pub fn loan(&self, id: LoanId) -> Result<Loan, EngineError> {
        let asset = self.asset_of_loan(id)?;
        let book = self.existing_book(&asset)?;
        let book = book.lock().unwrap();
        Ok(book.loan(id)?.clone())
    }

    pub fn positions_by_owner(&self, owner: &str) -> Vec<LiquidityPosition> {
        let books: Vec<Arc<Mutex<AssetBook>>> =
            self.books.read().unwrap().values().map(Arc::clone).collect();
        let mut out = Vec::new();
        for book in books {
            out.extend(book.lock().unwrap().positions_by_owner(owner));
        }
        out.sort_by_key(|p| p.id);
        out
    }

    pub fn loans_by_borrower(&self, borrower: &str) -> Vec<Loan> {
        let books: Vec<Arc<Mutex<AssetBook>>> =
            self.books.read().unwrap().values().map(Arc::clone).collect();
        let mut out = Vec::new();
        for book in books {
            out.extend(book.lock().unwrap().loans_by_borrower(borrower));
        }
        out.sort_by_key(|l| l.id);
        out
    }

    pub fn market(&self, asset: &str) -> Result<Market, EngineError> {
        let book = self.existing_book(asset)?;
        let book = book.lock().unwrap();
        Ok(book.market.clone())
    }

    /// Snapshot of every asset's market ledger, asset-ordered.
    pub fn markets(&self) -> Vec<Market> {
        let books: Vec<Arc<Mutex<AssetBook>>> =
            self.books.read().unwrap().values().map(Arc::clone).collect();
        let mut out: Vec<Market> = books.iter().map(|b| b.lock().unwrap().market.clone()).collect();
        out.sort_by(|a, b| a.asset.cmp(&b.asset));
        out
    }

    pub fn market_stats(&self) -> MarketStats {
        let books: Vec<Arc<Mutex<AssetBook>>> =
            self.books.read().unwrap().values().map(Arc::clone).collect();

        let mut total_liquidity = 0u64;
        let mut total_borrowed = 0u64;
        let mut weighted_apr = 0.0;
        let mut asset_count = 0usize;

        for book in &books {
            let book = book.lock().unwrap();
            total_liquidity += book.market.total_liquidity;
            total_borrowed += book.market.total_borrowed;
            weighted_apr += book.market.average_apr_bps * book.market.total_borrowed as f64;
            asset_count += 1;
        }

        MarketStats {
            total_liquidity,
            total_borrowed,
            average_apr_bps: if total_borrowed > 0 {
                weighted_apr / total_borrowed as f64
            } else {
                0.0
            },
            utilization_rate: if total_liquidity > 0 {
                (total_borrowed as f64 / total_liquidity as f64) * 100.0
            } else {
                0.0
            },
            asset_count,
        }
    }

    /// Greedy lowest-window-first recommendation: the matcher's scan without
    /// the mutation. Returns per-bucket suggestions and the uncovered rest.
    pub fn best_borrow_rates(
        &self,
        asset: &str,
        amount: Decimal,
    ) -> Result<(Vec<RateRecommendation>, u64), EngineError> {
        let raw = self.registry.to_raw_amount(asset, amount).map_err(EngineError::Validation)?;
        let book = self.existing_book(asset)?;
        let book = book.lock().unwrap();
        Ok(book.market.best_borrow_rates(raw))
    }

    pub fn liquidity_in_range(
        &self,
        asset: &str,
        min_apr: Decimal,
        max_apr: Decimal,
    ) -> Result<(u64, u64), EngineError> {
        let min_bps = apr_to_bps(min_apr).map_err(EngineError::Validation)?;
        let max_bps = apr_to_bps(max_apr).map_err(EngineError::Validation)?;
        let book = self.existing_book(asset)?;
        let book = book.lock().unwrap();
        let (total, available, _) = book.market.liquidity_in_range(min_bps, max_bps);
        Ok((total, available))
    }

    pub fn registry(&self) -> &AssetRegistry {
        &self.registry
    }

    fn asset_of_position(&self, id: PositionId) -> Result<String, EngineError> {
        self.position_index
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(EngineError::PositionNotFound(id))
    }

    fn asset_of_loan(&self, id: LoanId) -> Result<String, EngineError> {
        self.loan_index.lock().unwrap().get(&id).cloned().ok_or(EngineError::LoanNotFound(id))
    }
}
