use chrono::{NaiveDate, Utc};
use uuid::Uuid;

use super::models::{
    Amount, LedgerEntry, ReimbursementRequestState, ReimbursementRequestType,
    DEFAULT_CURRENCY_CODE, HISTORICAL_SPEND_ADJUSTMENT_LABEL,
};
use crate::error::{ReconcileError, ReconcileResult};
use crate::ros::models::WalletCategory;
use crate::wallet::models::WalletId;

/// Builds the compensating entries that keep internal spend equal to the spend the TPA
/// recognizes after a plan change.
pub struct LedgerWriter {
    currency_code: String,
}

impl LedgerWriter {
    pub fn new() -> Self {
        Self {
            currency_code: DEFAULT_CURRENCY_CODE.to_string(),
        }
    }

    pub fn historical_spend_adjustment(
        &self,
        wallet_id: WalletId,
        category: &WalletCategory,
        amount: Amount,
        service_start_date: NaiveDate,
    ) -> ReconcileResult<LedgerEntry> {
        if amount <= 0 {
            return Err(ReconcileError::Data(format!(
                "historical spend adjustment for wallet {} category {} must be positive, got {}",
                wallet_id,
                category.id(),
                amount
            )));
        }

        Ok(LedgerEntry {
            id: Uuid::new_v4(),
            wallet_id,
            category_id: category.id(),
            reimbursement_request_category_id: category.reimbursement_request_category_id(),
            label: HISTORICAL_SPEND_ADJUSTMENT_LABEL.to_string(),
            amount,
            state: ReimbursementRequestState::Reimbursed,
            request_type: ReimbursementRequestType::Manual,
            currency_code: self.currency_code.clone(),
            service_start_date,
            created_at: Utc::now(),
        })
    }
}

impl Default for LedgerWriter {
    fn default() -> Self {
        Self::new()
    }
}
