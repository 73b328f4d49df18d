use std::sync::Arc;
use tracing::debug;

use crate::error::{ReconcileError, ReconcileResult};
use crate::ledger::models::CategorySettingIndex;
use crate::wallet::models::{ReimbursementWallet, UserId, WalletUser};
use crate::wallet::repository::{ReimbursementStore, WalletChangeSet};

/// Unit of work opened fresh for one wallet.
///
/// Writes are staged and only reach the store on `commit`. Dropping a session with staged
/// writes discards them, which is how a failed step rolls back.
pub struct WalletSession {
    store: Arc<dyn ReimbursementStore>,
    wallet: ReimbursementWallet,
    users: Vec<WalletUser>,
    settings: CategorySettingIndex,
    pending: WalletChangeSet,
}

impl WalletSession {
    /// Re-reads the wallet so decisions never run on a stale copy. Category settings come
    /// from the batch index when one is supplied.
    pub async fn open(
        store: Arc<dyn ReimbursementStore>,
        wallet: &ReimbursementWallet,
        batch_index: Option<&CategorySettingIndex>,
    ) -> ReconcileResult<Self> {
        let fresh = store
            .get_wallet(wallet.id)
            .await?
            .ok_or_else(|| ReconcileError::Data(format!("wallet {} no longer exists", wallet.id)))?;
        let users = store.get_wallet_users(wallet.id).await?;

        let settings = match batch_index {
            Some(index) => index.for_wallet(wallet.id).into_iter().cloned().collect(),
            None => store.load_category_setting_index(&[wallet.id]).await?,
        };

        Ok(Self {
            store,
            wallet: fresh,
            users,
            settings,
            pending: WalletChangeSet::default(),
        })
    }

    pub fn wallet(&self) -> &ReimbursementWallet {
        &self.wallet
    }

    pub fn settings(&self) -> &CategorySettingIndex {
        &self.settings
    }

    pub fn employee(&self) -> Option<&WalletUser> {
        self.users.iter().find(|u| u.is_employee())
    }

    /// Every wallet user other than the employee holder
    pub fn dependents(&self) -> impl Iterator<Item = &WalletUser> {
        self.users.iter().filter(|u| !u.is_employee())
    }

    pub fn active_dependent_ids(&self) -> Vec<UserId> {
        self.dependents()
            .filter(|u| u.is_active())
            .map(|u| u.user_id)
            .collect()
    }

    pub fn stage(&mut self) -> &mut WalletChangeSet {
        &mut self.pending
    }

    /// Atomically persist everything staged so far, then mirror it into the session view
    pub async fn commit(&mut self) -> ReconcileResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let changes = std::mem::take(&mut self.pending);
        self.store.commit(changes.clone()).await?;
        debug!(
            wallet_id = self.wallet.id,
            settings = changes.category_settings.len(),
            ledger_entries = changes.ledger_entries.len(),
            sync_metas = changes.sync_metas.len(),
            "Committed wallet change set"
        );
        self.apply(changes);
        Ok(())
    }

    fn apply(&mut self, changes: WalletChangeSet) {
        for update in changes.wallet_updates {
            if update.wallet_id != self.wallet.id {
                continue;
            }
            if let Some(state) = update.state {
                self.wallet.state = state;
            }
            if let Some(ros_id) = update.ros_id {
                self.wallet.reimbursement_organization_settings_id = ros_id;
            }
        }
        for (wallet_user_id, status) in changes.user_statuses {
            if let Some(user) = self.users.iter_mut().find(|u| u.id == wallet_user_id) {
                user.status = status;
            }
        }
        for setting in changes.category_settings {
            self.settings.insert(setting);
        }
        for update in changes.spend_updates {
            self.settings
                .set_spent_amount(update.category_id, update.wallet_id, update.spent_amount);
        }
    }
}
