use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{AppError, AppResult};
use crate::ledger::models::{
    Amount, CategorySetting, CategorySettingIndex, ChangeType, LedgerEntry, SyncMeta,
};
use crate::ros::models::{
    CategoryAssociation, CategoryId, ExpenseType, ExpenseTypeSet, ReimbursementOrganizationSettings,
};
use crate::wallet::models::{
    MemberAddress, ReimbursementWallet, RosId, UserId, WalletId, WalletState, WalletUser,
    WalletUserStatus,
};

/// Pending change to a wallet row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletUpdate {
    pub wallet_id: WalletId,
    pub state: Option<WalletState>,
    pub ros_id: Option<RosId>,
}

/// New spend total for a category setting that already exists
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategorySpendUpdate {
    pub wallet_id: WalletId,
    pub category_id: CategoryId,
    pub spent_amount: Amount,
}

/// Writes that must land together or not at all
#[derive(Debug, Clone, Default)]
pub struct WalletChangeSet {
    pub wallet_updates: Vec<WalletUpdate>,
    /// (wallet_user id, new status)
    pub user_statuses: Vec<(i64, WalletUserStatus)>,
    pub category_settings: Vec<CategorySetting>,
    pub spend_updates: Vec<CategorySpendUpdate>,
    pub ledger_entries: Vec<LedgerEntry>,
    pub sync_metas: Vec<SyncMeta>,
}

impl WalletChangeSet {
    pub fn is_empty(&self) -> bool {
        self.wallet_updates.is_empty()
            && self.user_statuses.is_empty()
            && self.category_settings.is_empty()
            && self.spend_updates.is_empty()
            && self.ledger_entries.is_empty()
            && self.sync_metas.is_empty()
    }

    pub fn set_state(&mut self, wallet_id: WalletId, state: WalletState) {
        self.wallet_update(wallet_id).state = Some(state);
    }

    pub fn set_ros(&mut self, wallet_id: WalletId, ros_id: RosId) {
        self.wallet_update(wallet_id).ros_id = Some(ros_id);
    }

    fn wallet_update(&mut self, wallet_id: WalletId) -> &mut WalletUpdate {
        if let Some(idx) = self
            .wallet_updates
            .iter()
            .position(|u| u.wallet_id == wallet_id)
        {
            return &mut self.wallet_updates[idx];
        }
        self.wallet_updates.push(WalletUpdate {
            wallet_id,
            state: None,
            ros_id: None,
        });
        let last = self.wallet_updates.len() - 1;
        &mut self.wallet_updates[last]
    }
}

/// Persistence boundary of the reconciler.
///
/// INVARIANT: `commit` applies a change set atomically.
#[async_trait]
pub trait ReimbursementStore: Send + Sync {
    async fn get_wallet(&self, wallet_id: WalletId) -> AppResult<Option<ReimbursementWallet>>;

    /// Wallets the batch driver should reconcile
    async fn list_qualified_wallet_ids(&self) -> AppResult<Vec<WalletId>>;

    async fn get_wallet_users(&self, wallet_id: WalletId) -> AppResult<Vec<WalletUser>>;

    async fn get_member_address(&self, user_id: UserId) -> AppResult<Option<MemberAddress>>;

    async fn get_ros(&self, ros_id: RosId) -> AppResult<Option<ReimbursementOrganizationSettings>>;

    async fn get_category_associations(&self, ros_id: RosId) -> AppResult<Vec<CategoryAssociation>>;

    async fn get_expense_types(
        &self,
        category_ids: &[CategoryId],
    ) -> AppResult<HashMap<CategoryId, ExpenseTypeSet>>;

    async fn load_category_setting_index(
        &self,
        wallet_ids: &[WalletId],
    ) -> AppResult<CategorySettingIndex>;

    async fn latest_sync_meta(
        &self,
        wallet_id: WalletId,
        change_type: ChangeType,
    ) -> AppResult<Option<SyncMeta>>;

    async fn commit(&self, changes: WalletChangeSet) -> AppResult<()>;
}

#[derive(Default)]
struct Tables {
    wallets: HashMap<WalletId, ReimbursementWallet>,
    wallet_users: HashMap<i64, WalletUser>,
    addresses: HashMap<UserId, MemberAddress>,
    ros: HashMap<RosId, ReimbursementOrganizationSettings>,
    categories: HashMap<CategoryId, CategoryAssociation>,
    expense_types: HashMap<CategoryId, ExpenseTypeSet>,
    category_settings: CategorySettingIndex,
    ledger_entries: Vec<LedgerEntry>,
    sync_metas: Vec<SyncMeta>,
}

/// In-memory store used by tests and dry runs
pub struct InMemoryReimbursementStore {
    tables: tokio::sync::RwLock<Tables>,
    fail_commits: AtomicBool,
}

impl InMemoryReimbursementStore {
    pub fn new() -> Self {
        Self {
            tables: tokio::sync::RwLock::new(Tables::default()),
            fail_commits: AtomicBool::new(false),
        }
    }

    /// Make every subsequent `commit` fail, as a lost database connection would
    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    pub async fn insert_wallet(&self, wallet: ReimbursementWallet) {
        self.tables.write().await.wallets.insert(wallet.id, wallet);
    }

    pub async fn insert_wallet_user(&self, user: WalletUser) {
        self.tables.write().await.wallet_users.insert(user.id, user);
    }

    pub async fn insert_address(&self, user_id: UserId, address: MemberAddress) {
        self.tables.write().await.addresses.insert(user_id, address);
    }

    pub async fn insert_ros(&self, ros: ReimbursementOrganizationSettings) {
        self.tables.write().await.ros.insert(ros.id, ros);
    }

    pub async fn insert_category(
        &self,
        association: CategoryAssociation,
        expense_types: Vec<ExpenseType>,
    ) {
        let mut tables = self.tables.write().await;
        tables
            .expense_types
            .insert(association.id, expense_types.into_iter().collect());
        tables.categories.insert(association.id, association);
    }

    pub async fn insert_category_setting(&self, setting: CategorySetting) {
        self.tables.write().await.category_settings.insert(setting);
    }

    pub async fn insert_sync_meta(&self, meta: SyncMeta) {
        self.tables.write().await.sync_metas.push(meta);
    }

    pub async fn ledger_entries(&self) -> Vec<LedgerEntry> {
        self.tables.read().await.ledger_entries.clone()
    }

    pub async fn sync_metas(&self) -> Vec<SyncMeta> {
        self.tables.read().await.sync_metas.clone()
    }

    pub async fn category_settings(&self, wallet_id: WalletId) -> Vec<CategorySetting> {
        self.tables
            .read()
            .await
            .category_settings
            .for_wallet(wallet_id)
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn wallet_user(&self, wallet_user_id: i64) -> Option<WalletUser> {
        self.tables.read().await.wallet_users.get(&wallet_user_id).cloned()
    }
}

impl Default for InMemoryReimbursementStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReimbursementStore for InMemoryReimbursementStore {
    async fn get_wallet(&self, wallet_id: WalletId) -> AppResult<Option<ReimbursementWallet>> {
        Ok(self.tables.read().await.wallets.get(&wallet_id).cloned())
    }

    async fn list_qualified_wallet_ids(&self) -> AppResult<Vec<WalletId>> {
        let tables = self.tables.read().await;
        let mut ids: Vec<_> = tables
            .wallets
            .values()
            .filter(|w| w.is_qualified())
            .map(|w| w.id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn get_wallet_users(&self, wallet_id: WalletId) -> AppResult<Vec<WalletUser>> {
        let tables = self.tables.read().await;
        let mut users: Vec<_> = tables
            .wallet_users
            .values()
            .filter(|u| u.wallet_id == wallet_id)
            .cloned()
            .collect();
        users.sort_by_key(|u| u.id);
        Ok(users)
    }

    async fn get_member_address(&self, user_id: UserId) -> AppResult<Option<MemberAddress>> {
        Ok(self.tables.read().await.addresses.get(&user_id).cloned())
    }

    async fn get_ros(&self, ros_id: RosId) -> AppResult<Option<ReimbursementOrganizationSettings>> {
        Ok(self.tables.read().await.ros.get(&ros_id).cloned())
    }

    async fn get_category_associations(&self, ros_id: RosId) -> AppResult<Vec<CategoryAssociation>> {
        let tables = self.tables.read().await;
        let mut categories: Vec<_> = tables
            .categories
            .values()
            .filter(|c| c.reimbursement_organization_settings_id == ros_id)
            .cloned()
            .collect();
        categories.sort_by_key(|c| c.id);
        Ok(categories)
    }

    async fn get_expense_types(
        &self,
        category_ids: &[CategoryId],
    ) -> AppResult<HashMap<CategoryId, ExpenseTypeSet>> {
        let tables = self.tables.read().await;
        Ok(category_ids
            .iter()
            .filter_map(|id| tables.expense_types.get(id).map(|set| (*id, set.clone())))
            .collect())
    }

    async fn load_category_setting_index(
        &self,
        wallet_ids: &[WalletId],
    ) -> AppResult<CategorySettingIndex> {
        let tables = self.tables.read().await;
        Ok(wallet_ids
            .iter()
            .flat_map(|wallet_id| tables.category_settings.for_wallet(*wallet_id))
            .cloned()
            .collect())
    }

    async fn latest_sync_meta(
        &self,
        wallet_id: WalletId,
        change_type: ChangeType,
    ) -> AppResult<Option<SyncMeta>> {
        let tables = self.tables.read().await;
        Ok(tables
            .sync_metas
            .iter()
            .filter(|m| m.wallet_id == wallet_id && m.change_type == change_type)
            .max_by_key(|m| m.sync_time)
            .cloned())
    }

    async fn commit(&self, changes: WalletChangeSet) -> AppResult<()> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(AppError::Internal("commit failed: store unavailable".to_string()));
        }

        let mut tables = self.tables.write().await;

        // Validate everything before touching any table so a bad change set leaves no trace
        for update in &changes.wallet_updates {
            if !tables.wallets.contains_key(&update.wallet_id) {
                return Err(AppError::NotFound(format!("Wallet {} not found", update.wallet_id)));
            }
        }
        for (wallet_user_id, _) in &changes.user_statuses {
            if !tables.wallet_users.contains_key(wallet_user_id) {
                return Err(AppError::NotFound(format!(
                    "Wallet user {} not found",
                    wallet_user_id
                )));
            }
        }
        for setting in &changes.category_settings {
            if tables
                .category_settings
                .contains(setting.category_id, setting.wallet_id)
            {
                return Err(AppError::InvalidInput(format!(
                    "Category setting already exists for wallet {} category {}",
                    setting.wallet_id, setting.category_id
                )));
            }
        }
        for update in &changes.spend_updates {
            if !tables
                .category_settings
                .contains(update.category_id, update.wallet_id)
            {
                return Err(AppError::NotFound(format!(
                    "No category setting for wallet {} category {}",
                    update.wallet_id, update.category_id
                )));
            }
        }

        let now = Utc::now();
        for update in changes.wallet_updates {
            if let Some(wallet) = tables.wallets.get_mut(&update.wallet_id) {
                if let Some(state) = update.state {
                    wallet.state = state;
                }
                if let Some(ros_id) = update.ros_id {
                    wallet.reimbursement_organization_settings_id = ros_id;
                }
                wallet.updated_at = now;
            }
        }
        for (wallet_user_id, status) in changes.user_statuses {
            if let Some(user) = tables.wallet_users.get_mut(&wallet_user_id) {
                user.status = status;
            }
        }
        for setting in changes.category_settings {
            tables.category_settings.insert(setting);
        }
        for update in changes.spend_updates {
            tables.category_settings.set_spent_amount(
                update.category_id,
                update.wallet_id,
                update.spent_amount,
            );
        }
        tables.ledger_entries.extend(changes.ledger_entries);
        tables.sync_metas.extend(changes.sync_metas);

        Ok(())
    }
}
