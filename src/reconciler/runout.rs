use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::session::WalletSession;
use super::{call_gateway, call_oracle, today, WalletEligibilityReconciler};
use crate::eligibility::EligibilityVerification;
use crate::error::{ReconcileError, ReconcileResult};
use crate::ledger::models::{ChangeType, SyncMeta};
use crate::wallet::models::{ReimbursementWallet, UserId, WalletState, WalletUserStatus};

impl WalletEligibilityReconciler {
    /// Put a wallet into RUNOUT: the member keeps submitting claims for past expenses but the
    /// TPA account is scheduled to terminate today.
    pub async fn set_wallet_to_runout(
        &self,
        wallet: &ReimbursementWallet,
        verification: &EligibilityVerification,
    ) -> ReconcileResult<SyncMeta> {
        let mut session = WalletSession::open(self.store.clone(), wallet, None).await?;
        let user_id = session
            .employee()
            .map(|e| e.user_id)
            .ok_or_else(|| ReconcileError::Precondition("wallet has no employee".to_string()))?;
        self.runout_in_session(&mut session, user_id, verification)
            .await
    }

    pub(super) async fn runout_in_session(
        &self,
        session: &mut WalletSession,
        user_id: UserId,
        verification: &EligibilityVerification,
    ) -> ReconcileResult<SyncMeta> {
        let wallet = session.wallet().clone();
        info!(
            wallet_id = wallet.id,
            user_id,
            end_date = ?verification.effective_range.upper,
            "⏳ Eligibility ended, moving wallet to RUNOUT"
        );

        let meta = SyncMeta {
            id: Uuid::new_v4(),
            wallet_id: wallet.id,
            sync_time: Utc::now(),
            change_type: ChangeType::Runout,
            previous_ros_id: Some(wallet.ros_id()),
            latest_ros_id: None,
            previous_end_date: self.previous_end_date(wallet.id).await?,
            latest_end_date: verification.effective_range.upper,
            dependents_ids: session.active_dependent_ids(),
            user_id,
        };
        session.stage().set_state(wallet.id, WalletState::Runout);

        let address = self.resolve_address(user_id).await?;
        call_gateway(
            "update_employee_termination_date",
            self.call_timeout(),
            self.gateway
                .update_employee_termination_date(&wallet, Some(today()), &address),
        )
        .await?;

        session.stage().sync_metas.push(meta.clone());
        session.commit().await?;

        info!(wallet_id = wallet.id, "✅ Wallet moved to RUNOUT");
        Ok(meta)
    }

    /// Reverse a runout once eligibility is back under the same ROS. `false` on any failure.
    pub async fn undo_set_wallet_to_runout(&self, wallet: &ReimbursementWallet) -> bool {
        match self.try_undo_set_wallet_to_runout(wallet).await {
            Ok(()) => true,
            Err(e) => {
                error!(
                    wallet_id = wallet.id,
                    error_kind = e.kind(),
                    "❌ Could not undo runout: {}",
                    e
                );
                false
            }
        }
    }

    pub async fn try_undo_set_wallet_to_runout(
        &self,
        wallet: &ReimbursementWallet,
    ) -> ReconcileResult<()> {
        let mut session = WalletSession::open(self.store.clone(), wallet, None).await?;
        let wallet = session.wallet().clone();

        if wallet.state != WalletState::Runout {
            return Err(ReconcileError::Precondition(format!(
                "wallet {} is {}, not RUNOUT",
                wallet.id, wallet.state
            )));
        }
        let employee = session
            .employee()
            .cloned()
            .ok_or_else(|| ReconcileError::Precondition("wallet has no employee".to_string()))?;

        let verification = call_oracle(
            self.call_timeout(),
            self.oracle
                .get_verification(employee.user_id, wallet.organization_id),
        )
        .await?
        .filter(|v| !v.is_expired(today()))
        .ok_or_else(|| {
            ReconcileError::Precondition("employee has no current eligibility".to_string())
        })?;

        let pre_runout_ros = self
            .store
            .latest_sync_meta(wallet.id, ChangeType::Runout)
            .await?
            .and_then(|m| m.previous_ros_id)
            .unwrap_or_else(|| wallet.ros_id());

        let resolved = self
            .get_ros_for_user(&wallet, employee.user_id, &verification)
            .await?;
        if resolved != Some(pre_runout_ros) {
            warn!(
                wallet_id = wallet.id,
                pre_runout_ros,
                resolved = ?resolved,
                "Eligibility restored under a different ROS, runout cannot simply be undone"
            );
            return Err(ReconcileError::Precondition(format!(
                "eligible ROS {:?} differs from pre-runout ROS {}",
                resolved, pre_runout_ros
            )));
        }

        let address = self.resolve_address(employee.user_id).await?;
        call_gateway(
            "update_employee_termination_date",
            self.call_timeout(),
            self.gateway
                .update_employee_termination_date(&wallet, None, &address),
        )
        .await?;

        session.stage().set_state(wallet.id, WalletState::Qualified);
        if wallet.ros_id() != pre_runout_ros {
            session.stage().set_ros(wallet.id, pre_runout_ros);
        }
        if employee.status != WalletUserStatus::Active {
            session
                .stage()
                .user_statuses
                .push((employee.id, WalletUserStatus::Active));
        }
        session.commit().await?;

        info!(wallet_id = wallet.id, "↩️ Runout undone, wallet QUALIFIED again");
        Ok(())
    }
}
