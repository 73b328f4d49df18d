use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, Type};
use std::fmt;

pub type WalletId = i64;
pub type UserId = i64;
pub type OrganizationId = i64;
pub type RosId = i64;

/// Lifecycle state of a reimbursement wallet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "wallet_state", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WalletState {
    Pending,
    Qualified,
    Disqualified,
    Expired,
    Runout,
}

impl fmt::Display for WalletState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            WalletState::Pending => "PENDING",
            WalletState::Qualified => "QUALIFIED",
            WalletState::Disqualified => "DISQUALIFIED",
            WalletState::Expired => "EXPIRED",
            WalletState::Runout => "RUNOUT",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "wallet_user_type", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WalletUserType {
    Employee,
    Dependent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "wallet_user_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WalletUserStatus {
    Pending,
    Active,
    Denied,
    Revoked,
}

/// A member's benefit wallet. Soft-stated: rows are never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ReimbursementWallet {
    pub id: WalletId,
    pub organization_id: OrganizationId,
    pub reimbursement_organization_settings_id: RosId,
    pub state: WalletState,
    /// Employee identifier at the benefits-administration platform
    pub alegeus_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReimbursementWallet {
    pub fn new(id: WalletId, organization_id: OrganizationId, ros_id: RosId) -> Self {
        let now = Utc::now();
        Self {
            id,
            organization_id,
            reimbursement_organization_settings_id: ros_id,
            state: WalletState::Qualified,
            alegeus_id: Some(format!("EMP{:010}", id)),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn ros_id(&self) -> RosId {
        self.reimbursement_organization_settings_id
    }

    pub fn is_qualified(&self) -> bool {
        self.state == WalletState::Qualified
    }
}

/// Membership of a user in a wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct WalletUser {
    pub id: i64,
    pub wallet_id: WalletId,
    pub user_id: UserId,
    pub user_type: WalletUserType,
    pub status: WalletUserStatus,
}

impl WalletUser {
    pub fn is_employee(&self) -> bool {
        self.user_type == WalletUserType::Employee
    }

    pub fn is_active(&self) -> bool {
        self.status == WalletUserStatus::Active
    }
}

/// Mailing address on file for a member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct MemberAddress {
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    pub country: String,
}

impl MemberAddress {
    pub fn is_domestic(&self) -> bool {
        matches!(
            self.country.trim().to_ascii_uppercase().as_str(),
            "US" | "USA" | "UNITED STATES"
        )
    }
}
