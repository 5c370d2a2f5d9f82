//! Ledger services.
//!
//! Each service owns one piece of the metering and billing pipeline and
//! talks to storage only through the repository traits in [`crate::db`].

pub mod auto_top_up;
pub mod billing;
pub mod limits;
pub mod realtime;
pub mod reconciliation;
pub mod rollups;
pub mod wallet;

use std::{fmt, sync::Arc};

pub use auto_top_up::{AutoTopUpService, TopUpOutcome, TopUpRunResult};
pub use billing::{BillingError, BillingRunResult, BillingService, OrgBillingOutcome};
pub use limits::{LimitDecision, LimitKind, LimitsGuard};
pub use realtime::RealtimeCounters;
pub use reconciliation::{ReconcileError, ReconcileOutcome, ReconciliationService};
pub use rollups::{RollupRunResult, RollupService};
pub use wallet::{CreditSource, WalletCredit, WalletError, WalletService};

use crate::{
    cache::Cache, clock::Clock, config::LedgerConfig, db::DbPool, notifications::Notifier,
    payments::PaymentGateway, pricing::PricingTable,
};

/// Result of a best-effort effect performed next to a core operation.
///
/// Counter updates and notifications never fail the operation they belong
/// to; their outcome is reported with this type instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideEffect {
    Applied,
    Skipped,
    Failed(String),
}

impl SideEffect {
    pub fn from_result<E: fmt::Display>(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => SideEffect::Applied,
            Err(e) => SideEffect::Failed(e.to_string()),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, SideEffect::Failed(_))
    }
}

/// Container for all ledger services.
#[derive(Clone)]
pub struct Services {
    pub realtime: Arc<RealtimeCounters>,
    pub reconciliation: Arc<ReconciliationService>,
    pub wallet: Arc<WalletService>,
    pub billing: Arc<BillingService>,
    pub rollups: Arc<RollupService>,
    pub auto_top_up: Arc<AutoTopUpService>,
    pub limits: Arc<LimitsGuard>,
}

impl Services {
    pub fn new(
        config: &LedgerConfig,
        db: Arc<DbPool>,
        cache: Arc<dyn Cache>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
        payments: Option<Arc<dyn PaymentGateway>>,
    ) -> Self {
        let realtime = Arc::new(RealtimeCounters::new(cache, clock.clone()));
        let pricing = Arc::new(PricingTable::from_config(&config.pricing));
        let reconciliation = Arc::new(ReconciliationService::new(
            db.clone(),
            pricing,
            realtime.clone(),
            clock.clone(),
        ));
        let wallet = Arc::new(WalletService::new(
            db.clone(),
            clock.clone(),
            config.billing.max_wallet_retries,
        ));
        let billing = Arc::new(BillingService::new(
            db.clone(),
            notifier.clone(),
            clock.clone(),
            &config.billing,
        ));
        let rollups = Arc::new(RollupService::new(db.clone(), clock.clone()));
        let auto_top_up = Arc::new(AutoTopUpService::new(
            db.clone(),
            wallet.clone(),
            payments,
            notifier.clone(),
            clock,
            &config.auto_top_up,
        ));
        let limits = Arc::new(LimitsGuard::new(db, notifier, &config.limits));

        Self {
            realtime,
            reconciliation,
            wallet,
            billing,
            rollups,
            auto_top_up,
            limits,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_effect_from_result() {
        assert_eq!(SideEffect::from_result::<String>(Ok(())), SideEffect::Applied);
        let failed = SideEffect::from_result(Err("smtp down"));
        assert_eq!(failed, SideEffect::Failed("smtp down".into()));
        assert!(failed.is_failed());
    }
}
