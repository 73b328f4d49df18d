use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::ledger::models::Amount;
use crate::wallet::models::{MemberAddress, ReimbursementWallet, RosId};

/// Minimal view of an HTTP response from the benefits-administration platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayResponse {
    pub status_code: u16,
}

impl GatewayResponse {
    pub fn new(status_code: u16) -> Self {
        Self { status_code }
    }

    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// Third-party platform mirroring one financial account per member per plan
#[async_trait]
pub trait BenefitsAdminGateway: Send + Sync {
    /// `None` clears a pending termination
    async fn update_employee_termination_date(
        &self,
        wallet: &ReimbursementWallet,
        termination_date: Option<NaiveDate>,
        address: &MemberAddress,
    ) -> Result<GatewayResponse, GatewayError>;

    async fn terminate_employee_account(
        &self,
        wallet: &ReimbursementWallet,
        plan_id: &str,
    ) -> Result<GatewayResponse, GatewayError>;

    async fn post_add_employee_account(
        &self,
        wallet: &ReimbursementWallet,
        plan_id: &str,
    ) -> Result<GatewayResponse, GatewayError>;

    /// Post a manual claim so the plan recognizes `amount` of historical spend
    async fn adjust_plan_amount(
        &self,
        wallet: &ReimbursementWallet,
        claim_id: &str,
        amount: Amount,
        plan_id: &str,
        service_start_date: NaiveDate,
    ) -> Result<GatewayResponse, GatewayError>;
}

/// Raises a human-handled ticket. Fire-and-forget: implementations swallow their own failures.
#[async_trait]
pub trait EscalationSink: Send + Sync {
    async fn raise(&self, wallet: &ReimbursementWallet, message: &str);
}

/// Payment operations team is told about every ROS change
#[async_trait]
pub trait PaymentOpsNotifier: Send + Sync {
    async fn notify_ros_change(
        &self,
        wallet: &ReimbursementWallet,
        previous_ros_id: RosId,
        latest_ros_id: RosId,
    );
}
