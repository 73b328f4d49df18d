// Eligibility verdicts consumed by the reconciler.
// How a member is matched to an organization lives elsewhere; this module only
// describes what the reconciler is handed back.

pub mod client;

pub use client::EligibilityServiceClient;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::EligibilityError;
use crate::wallet::models::{OrganizationId, RosId, UserId};

pub type SubPopulationId = i64;

/// Half-open validity window `[lower, upper)`. A missing bound is unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub lower: Option<NaiveDate>,
    pub upper: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(lower: Option<NaiveDate>, upper: Option<NaiveDate>) -> Self {
        Self { lower, upper }
    }

    /// Expired once the exclusive upper bound is on or before `today`
    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.upper.map_or(false, |upper| upper <= today)
    }
}

/// Result of one eligibility query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibilityVerification {
    pub user_id: UserId,
    pub organization_id: OrganizationId,
    pub effective_range: DateRange,
    pub sub_population_id: Option<SubPopulationId>,
}

impl EligibilityVerification {
    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.effective_range.is_expired(today)
    }
}

/// Feature bundle kinds attached to a sub-population
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeatureType {
    Wallet,
}

impl FeatureType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureType::Wallet => "WALLET",
        }
    }
}

#[async_trait]
pub trait EligibilityOracle: Send + Sync {
    async fn get_verification(
        &self,
        user_id: UserId,
        organization_id: OrganizationId,
    ) -> Result<Option<EligibilityVerification>, EligibilityError>;

    async fn get_sub_population(
        &self,
        user_id: UserId,
        organization_id: OrganizationId,
    ) -> Result<Option<SubPopulationId>, EligibilityError>;

    /// ROS ids enabled for the sub-population under the given feature type
    async fn get_ros_ids_for_sub_population(
        &self,
        sub_population_id: SubPopulationId,
        feature_type: FeatureType,
    ) -> Result<Vec<RosId>, EligibilityError>;
}
