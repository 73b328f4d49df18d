// Reconciliation batch - one pass over every qualified wallet
//
// 1. List qualified wallets
// 2. Load their category settings once into a shared index
// 3. Reconcile wallets concurrently; a failing wallet never stops the batch
// 4. Summarize decisions for the run log

use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::error::AppResult;
use crate::ledger::models::CategorySettingIndex;
use crate::reconciler::{ReconcileOutcome, WalletDecision, WalletEligibilityReconciler};
use crate::wallet::models::WalletId;
use crate::wallet::repository::ReimbursementStore;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub processed: usize,
    pub runouts: usize,
    pub ros_changes: usize,
    pub escalations: usize,
    pub no_ops: usize,
    pub failures: usize,
    pub dependents_revoked: usize,
    /// Wallets whose decision landed but whose dependent check failed
    pub dependent_failures: usize,
}

impl BatchSummary {
    fn record(&mut self, outcome: Option<ReconcileOutcome>) {
        self.processed += 1;
        let Some(outcome) = outcome else {
            self.failures += 1;
            return;
        };
        match outcome.decision {
            WalletDecision::NoOp => self.no_ops += 1,
            WalletDecision::Escalated(_) => self.escalations += 1,
            WalletDecision::Runout(_) => self.runouts += 1,
            WalletDecision::RosChange(_) => self.ros_changes += 1,
        }
        self.dependents_revoked += outcome.dependent_effects.len();
        if outcome.dependent_error.is_some() {
            self.dependent_failures += 1;
        }
    }
}

pub struct ReconciliationRun {
    reconciler: Arc<WalletEligibilityReconciler>,
    max_concurrency: usize,
}

impl ReconciliationRun {
    pub fn new(reconciler: Arc<WalletEligibilityReconciler>, max_concurrency: usize) -> Self {
        Self {
            reconciler,
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub async fn run_once(&self) -> AppResult<BatchSummary> {
        self.reconciler.refresh_catalog();
        let store = self.reconciler.store();
        let wallet_ids = store.list_qualified_wallet_ids().await?;

        if wallet_ids.is_empty() {
            info!("✓ No qualified wallets to reconcile");
            return Ok(BatchSummary::default());
        }
        info!("📊 Found {} qualified wallets", wallet_ids.len());

        let index = store.load_category_setting_index(&wallet_ids).await?;
        info!("📒 Loaded {} category settings", index.len());

        let outcomes: Vec<Option<ReconcileOutcome>> = stream::iter(wallet_ids)
            .map(|wallet_id| self.reconcile_one(wallet_id, &index))
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        let mut summary = BatchSummary::default();
        for outcome in outcomes {
            summary.record(outcome);
        }

        info!(
            processed = summary.processed,
            runouts = summary.runouts,
            ros_changes = summary.ros_changes,
            escalations = summary.escalations,
            failures = summary.failures,
            dependent_failures = summary.dependent_failures,
            "✓ Reconciliation batch completed"
        );
        Ok(summary)
    }

    async fn reconcile_one(
        &self,
        wallet_id: WalletId,
        index: &CategorySettingIndex,
    ) -> Option<ReconcileOutcome> {
        let wallet = match self.reconciler.store().get_wallet(wallet_id).await {
            Ok(Some(wallet)) => wallet,
            Ok(None) => {
                warn!(wallet_id, "Wallet disappeared before it could be reconciled");
                return None;
            }
            Err(e) => {
                error!(wallet_id, error_kind = "persistence", "❌ Failed to load wallet: {}", e);
                return None;
            }
        };

        self.reconciler
            .process_wallet_guarded(&wallet, Some(index))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use crate::wallet::models::{
        ReimbursementWallet, WalletState, WalletUser, WalletUserStatus, WalletUserType,
    };
    use chrono::{Duration, Utc};

    async fn add_wallet(fx: &Fixture, wallet_id: i64, ros_id: i64, user_id: i64) {
        fx.store
            .insert_wallet(ReimbursementWallet::new(wallet_id, ORG_ID, ros_id))
            .await;
        fx.store
            .insert_wallet_user(WalletUser {
                id: wallet_id * 100,
                wallet_id,
                user_id,
                user_type: WalletUserType::Employee,
                status: WalletUserStatus::Active,
            })
            .await;
    }

    #[tokio::test]
    async fn test_batch_summarizes_and_survives_failures() {
        let fx = Fixture::new(1).await;
        let yesterday = Utc::now().date_naive() - Duration::days(1);

        // wallet 1: employee expired, dependent has no record
        fx.oracle
            .set_verification(EMPLOYEE_USER_ID, Some(yesterday), Some(10));

        // wallet 2: employee has no eligibility record at all
        add_wallet(&fx, 2, 1, 600).await;

        // wallet 3: points at a ROS that no longer exists
        add_wallet(&fx, 3, 99, 700).await;
        fx.oracle.set_verification(700, None, Some(20));
        fx.oracle.set_ros_ids(20, vec![2]);

        let run = ReconciliationRun::new(fx.reconciler.clone(), 2);
        let summary = run.run_once().await.unwrap();

        assert_eq!(
            summary,
            BatchSummary {
                processed: 3,
                runouts: 1,
                ros_changes: 0,
                escalations: 1,
                no_ops: 0,
                failures: 1,
                dependents_revoked: 1,
                dependent_failures: 0,
            }
        );
        assert_eq!(fx.wallet().await.state, WalletState::Runout);
    }

    #[tokio::test]
    async fn test_dependent_failure_keeps_runout_in_summary() {
        let fx = Fixture::new(1).await;
        let yesterday = Utc::now().date_naive() - Duration::days(1);
        fx.oracle
            .set_verification(EMPLOYEE_USER_ID, Some(yesterday), Some(10));
        fx.oracle.fail_for(DEPENDENT_USER_ID, 503);

        let run = ReconciliationRun::new(fx.reconciler.clone(), 1);
        let summary = run.run_once().await.unwrap();

        assert_eq!(summary.runouts, 1);
        assert_eq!(summary.failures, 0);
        assert_eq!(summary.dependent_failures, 1);
        assert_eq!(summary.dependents_revoked, 0);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let fx = Fixture::new(1).await;
        let mut changes = crate::wallet::repository::WalletChangeSet::default();
        changes.set_state(WALLET_ID, WalletState::Expired);
        fx.store.commit(changes).await.unwrap();

        let run = ReconciliationRun::new(fx.reconciler.clone(), 4);
        assert_eq!(run.run_once().await.unwrap(), BatchSummary::default());
    }
}
