use anyhow::Result;

use crate::models::{Collateral, Loan};

/// Settlement layer boundary. The engine decides amounts and parties; the
/// listener (on-chain contract, custody ledger) moves funds. Notifications
/// fire after the engine has committed the corresponding state.
pub trait SettlementListener: Send + Sync {
    /// Loan created: escrow the collateral.
    fn on_loan_created(&self, loan: &Loan) -> Result<()>;

    /// Loan fully repaid: release the collateral back to the borrower.
    fn on_collateral_released(&self, loan_id: u64, collateral: &Collateral) -> Result<()>;

    /// Health factor dropped below 1.0. Liquidation timing and collateral
    /// disposal are the risk engine's call, not ours.
    fn on_liquidation_signal(&self, loan_id: u64, health_factor: f64) -> Result<()>;
}

/// No-op settlement for tests and standalone runs.
pub struct NullSettlement;

impl SettlementListener for NullSettlement {
    fn on_loan_created(&self, _loan: &Loan) -> Result<()> {
        Ok(())
    }

    fn on_collateral_released(&self, _loan_id: u64, _collateral: &Collateral) -> Result<()> {
        Ok(())
    }

    fn on_liquidation_signal(&self, _loan_id: u64, _health_factor: f64) -> Result<()> {
        Ok(())
    }
}

pub mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Records every notification for assertions.
    #[derive(Default)]
    pub struct RecordingSettlement {
        pub events: Mutex<Vec<String>>,
    }

    impl SettlementListener for RecordingSettlement {
        fn on_loan_created(&self, loan: &Loan) -> Result<()> {
            self.events.lock().unwrap().push(format!("created:{}", loan.id));
            Ok(())
        }

        fn on_collateral_released(&self, loan_id: u64, _collateral: &Collateral) -> Result<()> {
            self.events.lock().unwrap().push(format!("released:{}", loan_id));
            Ok(())
        }

        fn on_liquidation_signal(&self, loan_id: u64, _health_factor: f64) -> Result<()> {
            self.events.lock().unwrap().push(format!("liquidation:{}", loan_id));
            Ok(())
        }
    }
}
