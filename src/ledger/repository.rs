use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::HashMap;
use tracing::{debug, warn};

use super::models::*;
use crate::error::{AppError, AppResult};
use crate::ros::models::{
    CategoryAssociation, CategoryId, ExpenseType, ExpenseTypeSet, ReimbursementOrganizationSettings,
};
use crate::wallet::models::{
    MemberAddress, ReimbursementWallet, RosId, UserId, WalletId, WalletState, WalletUser,
};
use crate::wallet::repository::{ReimbursementStore, WalletChangeSet};

/// PostgreSQL-backed store. Each `commit` is one database transaction.
pub struct LedgerRepository {
    pub pool: PgPool,
}

impl LedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn begin_tx(&self) -> AppResult<Transaction<'_, Postgres>> {
        let tx = self.pool.begin().await?;
        Ok(tx)
    }

    async fn insert_category_setting(
        tx: &mut Transaction<'_, Postgres>,
        setting: &CategorySetting,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO wallet_category_settings
                (wallet_id, category_id, access_level, spent_amount, alegeus_plan_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(setting.wallet_id)
        .bind(setting.category_id)
        .bind(setting.access_level)
        .bind(setting.spent_amount)
        .bind(&setting.alegeus_plan_id)
        .bind(setting.created_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn insert_ledger_entry(
        tx: &mut Transaction<'_, Postgres>,
        entry: &LedgerEntry,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO reimbursement_requests (
                id, wallet_id, category_id, reimbursement_request_category_id, label,
                amount, state, request_type, currency_code, service_start_date, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(entry.id)
        .bind(entry.wallet_id)
        .bind(entry.category_id)
        .bind(entry.reimbursement_request_category_id)
        .bind(&entry.label)
        .bind(entry.amount)
        .bind(entry.state)
        .bind(entry.request_type)
        .bind(&entry.currency_code)
        .bind(entry.service_start_date)
        .bind(entry.created_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn insert_sync_meta(tx: &mut Transaction<'_, Postgres>, meta: &SyncMeta) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO wallet_sync_meta (
                id, wallet_id, sync_time, change_type, previous_ros_id, latest_ros_id,
                previous_end_date, latest_end_date, dependents_ids, user_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(meta.id)
        .bind(meta.wallet_id)
        .bind(meta.sync_time)
        .bind(meta.change_type)
        .bind(meta.previous_ros_id)
        .bind(meta.latest_ros_id)
        .bind(meta.previous_end_date)
        .bind(meta.latest_end_date)
        .bind(&meta.dependents_ids)
        .bind(meta.user_id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ReimbursementStore for LedgerRepository {
    async fn get_wallet(&self, wallet_id: WalletId) -> AppResult<Option<ReimbursementWallet>> {
        let wallet = sqlx::query_as::<_, ReimbursementWallet>(
            r#"
            SELECT id, organization_id, reimbursement_organization_settings_id, state,
                   alegeus_id, created_at, updated_at
            FROM reimbursement_wallets
            WHERE id = $1
            "#,
        )
        .bind(wallet_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(wallet)
    }

    async fn list_qualified_wallet_ids(&self) -> AppResult<Vec<WalletId>> {
        let ids = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT w.id
            FROM reimbursement_wallets w
            WHERE w.state = $1
              AND EXISTS (
                  SELECT 1 FROM reimbursement_wallet_users u
                  WHERE u.wallet_id = w.id AND u.user_type = 'EMPLOYEE'
              )
            ORDER BY w.id
            "#,
        )
        .bind(WalletState::Qualified)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    async fn get_wallet_users(&self, wallet_id: WalletId) -> AppResult<Vec<WalletUser>> {
        let users = sqlx::query_as::<_, WalletUser>(
            r#"
            SELECT id, wallet_id, user_id, user_type, status
            FROM reimbursement_wallet_users
            WHERE wallet_id = $1
            ORDER BY id
            "#,
        )
        .bind(wallet_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(users)
    }

    async fn get_member_address(&self, user_id: UserId) -> AppResult<Option<MemberAddress>> {
        let address = sqlx::query_as::<_, MemberAddress>(
            r#"
            SELECT line1, line2, city, state, zip_code, country
            FROM member_addresses
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(address)
    }

    async fn get_ros(&self, ros_id: RosId) -> AppResult<Option<ReimbursementOrganizationSettings>> {
        let ros = sqlx::query_as::<_, ReimbursementOrganizationSettings>(
            r#"
            SELECT id, organization_id, name, direct_payment_enabled
            FROM reimbursement_organization_settings
            WHERE id = $1
            "#,
        )
        .bind(ros_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(ros)
    }

    async fn get_category_associations(&self, ros_id: RosId) -> AppResult<Vec<CategoryAssociation>> {
        let categories = sqlx::query_as::<_, CategoryAssociation>(
            r#"
            SELECT a.id, a.reimbursement_organization_settings_id,
                   a.reimbursement_request_category_id, c.label, a.benefit_type,
                   p.alegeus_plan_id
            FROM ros_category_associations a
            JOIN reimbursement_request_categories c
              ON c.id = a.reimbursement_request_category_id
            LEFT JOIN reimbursement_plans p
              ON p.id = c.reimbursement_plan_id
            WHERE a.reimbursement_organization_settings_id = $1
            ORDER BY a.id
            "#,
        )
        .bind(ros_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(categories)
    }

    async fn get_expense_types(
        &self,
        category_ids: &[CategoryId],
    ) -> AppResult<HashMap<CategoryId, ExpenseTypeSet>> {
        let rows = sqlx::query_as::<_, (i64, String)>(
            r#"
            SELECT a.id, e.expense_type
            FROM ros_category_associations a
            JOIN reimbursement_request_category_expense_types e
              ON e.reimbursement_request_category_id = a.reimbursement_request_category_id
            WHERE a.id = ANY($1)
            "#,
        )
        .bind(category_ids.to_vec())
        .fetch_all(&self.pool)
        .await?;

        let mut expense_types: HashMap<CategoryId, ExpenseTypeSet> = HashMap::new();
        for (category_id, raw) in rows {
            match raw.parse::<ExpenseType>() {
                Ok(expense_type) => expense_types.entry(category_id).or_default().insert(expense_type),
                Err(e) => warn!(category_id, "Ignoring expense type row: {}", e),
            }
        }
        Ok(expense_types)
    }

    async fn load_category_setting_index(
        &self,
        wallet_ids: &[WalletId],
    ) -> AppResult<CategorySettingIndex> {
        let settings = sqlx::query_as::<_, CategorySetting>(
            r#"
            SELECT wallet_id, category_id, access_level, spent_amount, alegeus_plan_id, created_at
            FROM wallet_category_settings
            WHERE wallet_id = ANY($1)
            "#,
        )
        .bind(wallet_ids.to_vec())
        .fetch_all(&self.pool)
        .await?;

        debug!(
            "Loaded {} category settings for {} wallets",
            settings.len(),
            wallet_ids.len()
        );
        Ok(settings.into_iter().collect())
    }

    async fn latest_sync_meta(
        &self,
        wallet_id: WalletId,
        change_type: ChangeType,
    ) -> AppResult<Option<SyncMeta>> {
        let meta = sqlx::query_as::<_, SyncMeta>(
            r#"
            SELECT id, wallet_id, sync_time, change_type, previous_ros_id, latest_ros_id,
                   previous_end_date, latest_end_date, dependents_ids, user_id
            FROM wallet_sync_meta
            WHERE wallet_id = $1 AND change_type = $2
            ORDER BY sync_time DESC
            LIMIT 1
            "#,
        )
        .bind(wallet_id)
        .bind(change_type)
        .fetch_optional(&self.pool)
        .await?;

        Ok(meta)
    }

    async fn commit(&self, changes: WalletChangeSet) -> AppResult<()> {
        if changes.is_empty() {
            return Ok(());
        }

        // Dropping the transaction on any `?` below rolls it back
        let mut tx = self.begin_tx().await?;

        for update in &changes.wallet_updates {
            sqlx::query(
                r#"
                UPDATE reimbursement_wallets
                SET state = COALESCE($2, state),
                    reimbursement_organization_settings_id =
                        COALESCE($3, reimbursement_organization_settings_id),
                    updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(update.wallet_id)
            .bind(update.state)
            .bind(update.ros_id)
            .execute(&mut *tx)
            .await?;
        }

        for (wallet_user_id, status) in &changes.user_statuses {
            sqlx::query(
                r#"
                UPDATE reimbursement_wallet_users
                SET status = $2
                WHERE id = $1
                "#,
            )
            .bind(*wallet_user_id)
            .bind(*status)
            .execute(&mut *tx)
            .await?;
        }

        for setting in &changes.category_settings {
            Self::insert_category_setting(&mut tx, setting).await?;
        }

        for update in &changes.spend_updates {
            let result = sqlx::query(
                r#"
                UPDATE wallet_category_settings
                SET spent_amount = $3
                WHERE wallet_id = $1 AND category_id = $2
                "#,
            )
            .bind(update.wallet_id)
            .bind(update.category_id)
            .bind(update.spent_amount)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                return Err(AppError::NotFound(format!(
                    "No category setting for wallet {} category {}",
                    update.wallet_id, update.category_id
                )));
            }
        }

        for entry in &changes.ledger_entries {
            Self::insert_ledger_entry(&mut tx, entry).await?;
        }

        for meta in &changes.sync_metas {
            Self::insert_sync_meta(&mut tx, meta).await?;
        }

        tx.commit().await?;
        Ok(())
    }
}
