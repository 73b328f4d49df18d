use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::call_oracle;
use super::session::WalletSession;
use crate::eligibility::EligibilityOracle;
use crate::error::ReconcileResult;
use crate::wallet::models::{UserId, WalletUserStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DependentAction {
    AccessRemoved,
}

impl DependentAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            DependentAction::AccessRemoved => "access_removed",
        }
    }
}

/// Change applied to one dependent during a reconciliation pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependentEffect {
    pub wallet_user_id: i64,
    pub user_id: UserId,
    pub action: DependentAction,
}

/// Revokes wallet access for dependents whose own eligibility is gone.
/// Never touches the employee holder or the wallet itself.
pub struct DependentAccessManager {
    oracle: Arc<dyn EligibilityOracle>,
    call_timeout: Duration,
}

impl DependentAccessManager {
    pub fn new(oracle: Arc<dyn EligibilityOracle>, call_timeout: Duration) -> Self {
        Self {
            oracle,
            call_timeout,
        }
    }

    pub async fn process_dependent_users(
        &self,
        session: &mut WalletSession,
    ) -> ReconcileResult<Vec<DependentEffect>> {
        let today = Utc::now().date_naive();
        let organization_id = session.wallet().organization_id;
        let wallet_id = session.wallet().id;

        let candidates: Vec<_> = session
            .dependents()
            .filter(|u| u.status != WalletUserStatus::Revoked)
            .map(|u| (u.id, u.user_id))
            .collect();

        let mut effects = Vec::new();
        for (wallet_user_id, user_id) in candidates {
            let verification = call_oracle(
                self.call_timeout,
                self.oracle.get_verification(user_id, organization_id),
            )
            .await?;

            let eligible = verification.map_or(false, |v| !v.is_expired(today));
            if eligible {
                continue;
            }

            info!(wallet_id, user_id, "🚫 Dependent no longer eligible, revoking wallet access");
            session
                .stage()
                .user_statuses
                .push((wallet_user_id, WalletUserStatus::Revoked));
            effects.push(DependentEffect {
                wallet_user_id,
                user_id,
                action: DependentAction::AccessRemoved,
            });
        }

        session.commit().await?;
        Ok(effects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_label() {
        assert_eq!(DependentAction::AccessRemoved.as_str(), "access_removed");
        let effect = DependentEffect {
            wallet_user_id: 2,
            user_id: 501,
            action: DependentAction::AccessRemoved,
        };
        let json = serde_json::to_value(&effect).unwrap();
        assert_eq!(json["action"], "access_removed");
    }
}
