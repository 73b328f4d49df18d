use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, Type};
use std::collections::HashMap;
use uuid::Uuid;

use crate::ros::models::CategoryId;
use crate::wallet::models::{RosId, UserId, WalletId};

/// Spend is tracked in the smallest unit of the category (cents or credits)
pub type Amount = i64;

pub const DEFAULT_CURRENCY_CODE: &str = "USD";

pub const HISTORICAL_SPEND_ADJUSTMENT_LABEL: &str = "historical spend adjustment";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "category_access_level", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CategoryAccessLevel {
    FullAccess,
    NoAccess,
}

impl Default for CategoryAccessLevel {
    fn default() -> Self {
        CategoryAccessLevel::FullAccess
    }
}

/// Per-(wallet, category) account state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct CategorySetting {
    pub wallet_id: WalletId,
    pub category_id: CategoryId,
    pub access_level: CategoryAccessLevel,
    pub spent_amount: Amount,
    pub alegeus_plan_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CategorySetting {
    pub fn new(
        wallet_id: WalletId,
        category_id: CategoryId,
        spent_amount: Amount,
        alegeus_plan_id: Option<String>,
    ) -> Self {
        Self {
            wallet_id,
            category_id,
            access_level: CategoryAccessLevel::default(),
            spent_amount,
            alegeus_plan_id,
            created_at: Utc::now(),
        }
    }
}

/// Settings looked up per category, then per wallet within that category
#[derive(Debug, Clone, Default)]
pub struct CategorySettingIndex {
    settings: HashMap<CategoryId, HashMap<WalletId, CategorySetting>>,
}

impl CategorySettingIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, setting: CategorySetting) {
        self.settings
            .entry(setting.category_id)
            .or_default()
            .insert(setting.wallet_id, setting);
    }

    pub fn get(&self, category_id: CategoryId, wallet_id: WalletId) -> Option<&CategorySetting> {
        self.settings
            .get(&category_id)
            .and_then(|by_wallet| by_wallet.get(&wallet_id))
    }

    pub fn contains(&self, category_id: CategoryId, wallet_id: WalletId) -> bool {
        self.get(category_id, wallet_id).is_some()
    }

    /// `false` when the wallet has no setting for the category
    pub fn set_spent_amount(
        &mut self,
        category_id: CategoryId,
        wallet_id: WalletId,
        spent_amount: Amount,
    ) -> bool {
        match self
            .settings
            .get_mut(&category_id)
            .and_then(|by_wallet| by_wallet.get_mut(&wallet_id))
        {
            Some(setting) => {
                setting.spent_amount = spent_amount;
                true
            }
            None => false,
        }
    }

    /// Spend recorded for the wallet in the category; zero when there is no setting
    pub fn spent_amount(&self, category_id: CategoryId, wallet_id: WalletId) -> Amount {
        self.get(category_id, wallet_id)
            .map(|s| s.spent_amount)
            .unwrap_or(0)
    }

    pub fn for_wallet(&self, wallet_id: WalletId) -> Vec<&CategorySetting> {
        let mut settings: Vec<_> = self
            .settings
            .values()
            .filter_map(|by_wallet| by_wallet.get(&wallet_id))
            .collect();
        settings.sort_by_key(|s| s.category_id);
        settings
    }

    pub fn len(&self) -> usize {
        self.settings.values().map(|by_wallet| by_wallet.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FromIterator<CategorySetting> for CategorySettingIndex {
    fn from_iter<I: IntoIterator<Item = CategorySetting>>(iter: I) -> Self {
        let mut index = CategorySettingIndex::new();
        for setting in iter {
            index.insert(setting);
        }
        index
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "reimbursement_request_state", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReimbursementRequestState {
    New,
    Pending,
    Approved,
    Reimbursed,
    Denied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "reimbursement_request_type", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReimbursementRequestType {
    Manual,
    DirectBilling,
    Debit,
}

/// Internal reimbursement record written only to rebalance ledgers after a plan change.
///
/// INVARIANT: state is always `Reimbursed` and type always `Manual`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub wallet_id: WalletId,
    pub category_id: CategoryId,
    pub reimbursement_request_category_id: i64,
    pub label: String,
    pub amount: Amount,
    pub state: ReimbursementRequestState,
    pub request_type: ReimbursementRequestType,
    pub currency_code: String,
    pub service_start_date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Claim identifier presented to the TPA for this entry
    pub fn claim_id(&self) -> String {
        let simple = self.id.simple().to_string();
        format!("HSA{}", &simple[..12].to_ascii_uppercase())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "sync_change_type", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    Runout,
    RosChange,
}

/// Append-only audit record of one reconciliation decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct SyncMeta {
    pub id: Uuid,
    pub wallet_id: WalletId,
    pub sync_time: DateTime<Utc>,
    pub change_type: ChangeType,
    pub previous_ros_id: Option<RosId>,
    pub latest_ros_id: Option<RosId>,
    pub previous_end_date: Option<NaiveDate>,
    pub latest_end_date: Option<NaiveDate>,
    pub dependents_ids: Vec<UserId>,
    pub user_id: UserId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_two_level_lookup() {
        let index: CategorySettingIndex = vec![
            CategorySetting::new(1, 10, 500, Some("A".into())),
            CategorySetting::new(2, 10, 700, Some("A".into())),
            CategorySetting::new(1, 11, 0, None),
        ]
        .into_iter()
        .collect();

        assert_eq!(index.len(), 3);
        assert_eq!(index.spent_amount(10, 1), 500);
        assert_eq!(index.spent_amount(10, 2), 700);
        assert_eq!(index.spent_amount(12, 1), 0);
        assert_eq!(
            index.for_wallet(1).iter().map(|s| s.category_id).collect::<Vec<_>>(),
            vec![10, 11]
        );
    }

    #[test]
    fn test_set_spent_amount_only_touches_existing_settings() {
        let mut index: CategorySettingIndex =
            vec![CategorySetting::new(1, 10, 300, Some("A".into()))]
                .into_iter()
                .collect();

        assert!(index.set_spent_amount(10, 1, 500));
        assert_eq!(index.spent_amount(10, 1), 500);
        assert!(!index.set_spent_amount(10, 2, 500));
        assert!(!index.contains(10, 2));
    }

    #[test]
    fn test_claim_id_is_stable_for_entry() {
        let entry = LedgerEntry {
            id: Uuid::new_v4(),
            wallet_id: 1,
            category_id: 2,
            reimbursement_request_category_id: 3,
            label: HISTORICAL_SPEND_ADJUSTMENT_LABEL.to_string(),
            amount: 1000,
            state: ReimbursementRequestState::Reimbursed,
            request_type: ReimbursementRequestType::Manual,
            currency_code: DEFAULT_CURRENCY_CODE.to_string(),
            service_start_date: Utc::now().date_naive(),
            created_at: Utc::now(),
        };
        assert_eq!(entry.claim_id(), entry.claim_id());
        assert_eq!(entry.claim_id().len(), 15);
    }
}
