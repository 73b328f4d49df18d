// Wallet eligibility reconciliation
//
// One pass per wallet:
// - Employee eligibility expired  -> RUNOUT (termination date pushed to the TPA)
// - Eligible under a different ROS -> ROS change (category settings and spend migrated)
// - Anything else                  -> no-op
// Dependents are then checked on their own eligibility.
//
// Every decision runs in a fresh WalletSession. Failures surface as typed
// ReconcileErrors internally and are collapsed to None/false at the public boundary.

pub mod dependents;
pub mod migrator;
pub mod runout;
pub mod session;

use chrono::{NaiveDate, Utc};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::adapters::{BenefitsAdminGateway, EscalationSink, GatewayResponse, PaymentOpsNotifier};
use crate::config::Config;
use crate::eligibility::{EligibilityOracle, EligibilityVerification, FeatureType};
use crate::error::{EligibilityError, GatewayError, ReconcileError, ReconcileResult};
use crate::ledger::models::{CategorySettingIndex, ChangeType, SyncMeta};
use crate::ros::CategoryCatalog;
use crate::wallet::models::{MemberAddress, ReimbursementWallet, RosId, UserId, WalletId};
use crate::wallet::repository::ReimbursementStore;

pub use dependents::{DependentAccessManager, DependentAction, DependentEffect};
pub use migrator::{CategorySettingsMigrator, MigrationOutcome, MigrationPolicy, MigrationReport};
pub use session::WalletSession;

pub const NO_ELIGIBILITY_RECORD_MESSAGE: &str = "no eligibility record found";

#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    pub external_call_timeout: Duration,
    /// Sent to the TPA when the member has no domestic address on file
    pub fallback_address: MemberAddress,
    pub migration_policy: MigrationPolicy,
}

impl ReconcilerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            external_call_timeout: config.external_call_timeout(),
            fallback_address: config.fallback_address(),
            migration_policy: MigrationPolicy {
                allow_cycle_currency_conversion: config.allow_cycle_currency_conversion,
                cycle_credit_value: config.cycle_credit_value_cents,
            },
        }
    }
}

/// Decision taken for the employee holder of a wallet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletDecision {
    NoOp,
    Escalated(String),
    Runout(SyncMeta),
    RosChange(SyncMeta),
}

impl WalletDecision {
    pub fn sync_meta(&self) -> Option<&SyncMeta> {
        match self {
            WalletDecision::Runout(meta) | WalletDecision::RosChange(meta) => Some(meta),
            WalletDecision::NoOp | WalletDecision::Escalated(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub decision: WalletDecision,
    pub dependent_effects: Vec<DependentEffect>,
    /// Set when the dependent pass failed after the employee decision was persisted
    pub dependent_error: Option<String>,
}

impl ReconcileOutcome {
    fn new(decision: WalletDecision) -> Self {
        Self {
            decision,
            dependent_effects: Vec::new(),
            dependent_error: None,
        }
    }

    pub fn sync_meta(&self) -> Option<&SyncMeta> {
        self.decision.sync_meta()
    }
}

/// Issue a gateway call bounded by `timeout`; a non-2xx response is a failure
pub(crate) async fn call_gateway<F>(
    operation: &'static str,
    timeout: Duration,
    call: F,
) -> ReconcileResult<GatewayResponse>
where
    F: Future<Output = Result<GatewayResponse, GatewayError>>,
{
    let response = tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| GatewayError::Timeout { operation })??;

    if !response.ok() {
        return Err(GatewayError::Rejected {
            operation,
            status: response.status_code,
        }
        .into());
    }
    Ok(response)
}

pub(crate) async fn call_oracle<T, F>(timeout: Duration, call: F) -> Result<T, EligibilityError>
where
    F: Future<Output = Result<T, EligibilityError>>,
{
    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| EligibilityError::Timeout)?
}

pub(crate) fn today() -> NaiveDate {
    Utc::now().date_naive()
}

fn log_migration_report(wallet_id: WalletId, report: &MigrationReport) {
    info!(
        wallet_id,
        settings_created = report.settings_created,
        settings_updated = report.settings_updated,
        settings_skipped = report.settings_skipped,
        ledger_entries = report.ledger_entries,
        adjusted_amount = report.adjusted_amount,
        converted_plans = report.converted_plans,
        unmatched_categories = ?report.unmatched_categories,
        "📦 Category settings migrated"
    );
}

pub struct WalletEligibilityReconciler {
    store: Arc<dyn ReimbursementStore>,
    oracle: Arc<dyn EligibilityOracle>,
    gateway: Arc<dyn BenefitsAdminGateway>,
    escalations: Arc<dyn EscalationSink>,
    payment_ops: Arc<dyn PaymentOpsNotifier>,
    catalog: Arc<CategoryCatalog>,
    migrator: CategorySettingsMigrator,
    dependents: DependentAccessManager,
    settings: ReconcilerSettings,
}

impl WalletEligibilityReconciler {
    pub fn new(
        store: Arc<dyn ReimbursementStore>,
        oracle: Arc<dyn EligibilityOracle>,
        gateway: Arc<dyn BenefitsAdminGateway>,
        escalations: Arc<dyn EscalationSink>,
        payment_ops: Arc<dyn PaymentOpsNotifier>,
        settings: ReconcilerSettings,
    ) -> Self {
        let catalog = Arc::new(CategoryCatalog::new(store.clone()));
        let migrator = CategorySettingsMigrator::new(
            catalog.clone(),
            gateway.clone(),
            escalations.clone(),
            settings.migration_policy,
            settings.external_call_timeout,
        );
        let dependents = DependentAccessManager::new(oracle.clone(), settings.external_call_timeout);

        Self {
            store,
            oracle,
            gateway,
            escalations,
            payment_ops,
            catalog,
            migrator,
            dependents,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn ReimbursementStore> {
        &self.store
    }

    /// Forget cached ROS categories so the next pass sees current organization settings
    pub fn refresh_catalog(&self) {
        self.catalog.clear();
    }

    // ========== PUBLIC BOUNDARY ==========

    /// Reconcile one wallet. Returns the SyncMeta of a runout or ROS change, `None` for a
    /// no-op or any failure. Never panics and never propagates an error.
    pub async fn process_wallet(&self, wallet: &ReimbursementWallet) -> Option<SyncMeta> {
        self.process_wallet_guarded(wallet, None)
            .await
            .and_then(|outcome| outcome.sync_meta().cloned())
    }

    /// Batch entry point: like `process_wallet` but reads category settings from a shared index
    pub async fn process_wallet_guarded(
        &self,
        wallet: &ReimbursementWallet,
        index: Option<&CategorySettingIndex>,
    ) -> Option<ReconcileOutcome> {
        let result = AssertUnwindSafe(self.try_process_wallet(wallet, index))
            .catch_unwind()
            .await;

        match result {
            Ok(Ok(outcome)) => Some(outcome),
            Ok(Err(e)) => {
                error!(
                    wallet_id = wallet.id,
                    error_kind = e.kind(),
                    transient = e.is_transient(),
                    "❌ Wallet reconciliation failed: {}",
                    e
                );
                None
            }
            Err(_) => {
                error!(
                    wallet_id = wallet.id,
                    error_kind = "panic",
                    "❌ Unexpected panic while reconciling wallet"
                );
                None
            }
        }
    }

    pub async fn try_process_wallet(
        &self,
        wallet: &ReimbursementWallet,
        index: Option<&CategorySettingIndex>,
    ) -> ReconcileResult<ReconcileOutcome> {
        let mut session = WalletSession::open(self.store.clone(), wallet, index).await?;

        let Some(employee) = session.employee().cloned() else {
            warn!(wallet_id = wallet.id, "Wallet has no employee holder, nothing to reconcile");
            return Ok(ReconcileOutcome::new(WalletDecision::NoOp));
        };

        let decision = if session.wallet().is_qualified() {
            let verification = call_oracle(
                self.settings.external_call_timeout,
                self.oracle
                    .get_verification(employee.user_id, session.wallet().organization_id),
            )
            .await?;

            match verification {
                None => {
                    warn!(
                        wallet_id = wallet.id,
                        user_id = employee.user_id,
                        "⚠️ No eligibility record for employee"
                    );
                    self.escalations
                        .raise(session.wallet(), NO_ELIGIBILITY_RECORD_MESSAGE)
                        .await;
                    return Ok(ReconcileOutcome::new(WalletDecision::Escalated(
                        NO_ELIGIBILITY_RECORD_MESSAGE.to_string(),
                    )));
                }
                Some(verification) => {
                    self.decide_for_employee(&mut session, employee.user_id, &verification)
                        .await?
                }
            }
        } else {
            debug!(
                wallet_id = wallet.id,
                state = %session.wallet().state,
                "Wallet not qualified, leaving employee side alone"
            );
            WalletDecision::NoOp
        };

        // The employee decision is already committed; a dependent failure must not hide it
        let mut outcome = ReconcileOutcome::new(decision);
        match self.dependents.process_dependent_users(&mut session).await {
            Ok(effects) => outcome.dependent_effects = effects,
            Err(e) => {
                error!(
                    wallet_id = wallet.id,
                    error_kind = e.kind(),
                    transient = e.is_transient(),
                    "❌ Dependent access check failed: {}",
                    e
                );
                outcome.dependent_error = Some(e.to_string());
            }
        }
        Ok(outcome)
    }

    /// Resolve the ROS the member is eligible for within the wallet's organization.
    /// `None` when there is no candidate or the choice is ambiguous.
    pub async fn get_ros_for_user(
        &self,
        wallet: &ReimbursementWallet,
        user_id: UserId,
        verification: &EligibilityVerification,
    ) -> ReconcileResult<Option<RosId>> {
        let timeout = self.settings.external_call_timeout;

        let sub_population_id = match verification.sub_population_id {
            Some(id) => Some(id),
            None => {
                call_oracle(
                    timeout,
                    self.oracle.get_sub_population(user_id, wallet.organization_id),
                )
                .await?
            }
        };
        let Some(sub_population_id) = sub_population_id else {
            debug!(wallet_id = wallet.id, user_id, "No sub-population for member");
            return Ok(None);
        };

        let ros_ids = call_oracle(
            timeout,
            self.oracle
                .get_ros_ids_for_sub_population(sub_population_id, FeatureType::Wallet),
        )
        .await?;

        let mut candidates = Vec::new();
        for ros_id in ros_ids {
            match self.store.get_ros(ros_id).await? {
                Some(ros) if ros.organization_id == wallet.organization_id => {
                    candidates.push(ros_id)
                }
                Some(_) => debug!(ros_id, "ROS belongs to another organization, ignoring"),
                None => warn!(ros_id, "Eligibility service returned unknown ROS"),
            }
        }
        candidates.sort_unstable();
        candidates.dedup();

        if candidates.contains(&wallet.ros_id()) {
            return Ok(Some(wallet.ros_id()));
        }
        match candidates.as_slice() {
            [] => Ok(None),
            [single] => Ok(Some(*single)),
            many => {
                warn!(
                    wallet_id = wallet.id,
                    candidates = ?many,
                    "⚠️ Member is eligible for several ROS, not choosing"
                );
                Ok(None)
            }
        }
    }

    /// Move a wallet to `new_ros_id`, migrating category settings first
    pub async fn change_wallet_ros(
        &self,
        wallet: &ReimbursementWallet,
        verification: &EligibilityVerification,
        new_ros_id: RosId,
    ) -> ReconcileResult<WalletDecision> {
        let mut session = WalletSession::open(self.store.clone(), wallet, None).await?;
        let user_id = session
            .employee()
            .map(|e| e.user_id)
            .ok_or_else(|| ReconcileError::Precondition("wallet has no employee".to_string()))?;
        self.change_ros_in_session(&mut session, user_id, verification, new_ros_id)
            .await
    }

    /// Migrate a wallet's category settings between two ROS. `false` on failure or escalation.
    pub async fn update_category_settings(
        &self,
        wallet: &ReimbursementWallet,
        old_ros_id: RosId,
        new_ros_id: RosId,
    ) -> bool {
        match self
            .try_update_category_settings(wallet, old_ros_id, new_ros_id)
            .await
        {
            Ok(MigrationOutcome::Migrated(report)) => {
                log_migration_report(wallet.id, &report);
                true
            }
            Ok(MigrationOutcome::Escalated(_)) => false,
            Err(e) => {
                error!(
                    wallet_id = wallet.id,
                    error_kind = e.kind(),
                    "❌ Category settings migration failed: {}",
                    e
                );
                false
            }
        }
    }

    pub async fn try_update_category_settings(
        &self,
        wallet: &ReimbursementWallet,
        old_ros_id: RosId,
        new_ros_id: RosId,
    ) -> ReconcileResult<MigrationOutcome> {
        let mut session = WalletSession::open(self.store.clone(), wallet, None).await?;
        let outcome = self.migrator.migrate(&mut session, old_ros_id, new_ros_id).await?;
        session.commit().await?;
        Ok(outcome)
    }

    pub async fn process_dependent_users(
        &self,
        wallet: &ReimbursementWallet,
    ) -> ReconcileResult<Vec<DependentEffect>> {
        let mut session = WalletSession::open(self.store.clone(), wallet, None).await?;
        self.dependents.process_dependent_users(&mut session).await
    }

    // ========== DECISIONS ==========

    async fn decide_for_employee(
        &self,
        session: &mut WalletSession,
        user_id: UserId,
        verification: &EligibilityVerification,
    ) -> ReconcileResult<WalletDecision> {
        if verification.is_expired(today()) {
            let meta = self.runout_in_session(session, user_id, verification).await?;
            return Ok(WalletDecision::Runout(meta));
        }

        let wallet = session.wallet().clone();
        match self.get_ros_for_user(&wallet, user_id, verification).await? {
            Some(ros_id) if ros_id != wallet.ros_id() => {
                self.change_ros_in_session(session, user_id, verification, ros_id)
                    .await
            }
            Some(_) => Ok(WalletDecision::NoOp),
            None => {
                debug!(wallet_id = wallet.id, "No ROS resolved, leaving wallet as is");
                Ok(WalletDecision::NoOp)
            }
        }
    }

    async fn change_ros_in_session(
        &self,
        session: &mut WalletSession,
        user_id: UserId,
        verification: &EligibilityVerification,
        new_ros_id: RosId,
    ) -> ReconcileResult<WalletDecision> {
        let wallet = session.wallet().clone();
        let old_ros_id = wallet.ros_id();
        if old_ros_id == new_ros_id {
            return Ok(WalletDecision::NoOp);
        }

        // captured before the migration mutates anything
        let dependents_ids = session.active_dependent_ids();
        let previous_end_date = self.previous_end_date(wallet.id).await?;

        info!(
            wallet_id = wallet.id,
            "🔄 Changing ROS {} -> {}", old_ros_id, new_ros_id
        );

        let report = match self.migrator.migrate(session, old_ros_id, new_ros_id).await? {
            MigrationOutcome::Escalated(reason) => return Ok(WalletDecision::Escalated(reason)),
            MigrationOutcome::Migrated(report) => report,
        };

        let meta = SyncMeta {
            id: Uuid::new_v4(),
            wallet_id: wallet.id,
            sync_time: Utc::now(),
            change_type: ChangeType::RosChange,
            previous_ros_id: Some(old_ros_id),
            latest_ros_id: Some(new_ros_id),
            previous_end_date,
            latest_end_date: verification.effective_range.upper,
            dependents_ids,
            user_id,
        };
        session.stage().set_ros(wallet.id, new_ros_id);
        session.stage().sync_metas.push(meta.clone());
        session.commit().await?;

        self.payment_ops
            .notify_ros_change(&wallet, old_ros_id, new_ros_id)
            .await;

        log_migration_report(wallet.id, &report);
        info!(wallet_id = wallet.id, "✅ ROS change complete");
        Ok(WalletDecision::RosChange(meta))
    }

    // ========== HELPERS ==========

    /// End date recorded by the most recent decision of either kind
    async fn previous_end_date(&self, wallet_id: WalletId) -> ReconcileResult<Option<NaiveDate>> {
        let runout = self
            .store
            .latest_sync_meta(wallet_id, ChangeType::Runout)
            .await?;
        let ros_change = self
            .store
            .latest_sync_meta(wallet_id, ChangeType::RosChange)
            .await?;

        Ok([runout, ros_change]
            .into_iter()
            .flatten()
            .max_by_key(|m| m.sync_time)
            .and_then(|m| m.latest_end_date))
    }

    async fn resolve_address(&self, user_id: UserId) -> ReconcileResult<MemberAddress> {
        match self.store.get_member_address(user_id).await? {
            Some(address) if address.is_domestic() => Ok(address),
            Some(_) => {
                info!(user_id, "Member address is not domestic, using fallback address");
                Ok(self.settings.fallback_address.clone())
            }
            None => {
                info!(user_id, "Member has no address on file, using fallback address");
                Ok(self.settings.fallback_address.clone())
            }
        }
    }

    fn call_timeout(&self) -> Duration {
        self.settings.external_call_timeout
    }
}
