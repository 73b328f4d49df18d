use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{EligibilityOracle, EligibilityVerification, FeatureType, SubPopulationId};
use crate::error::EligibilityError;
use crate::wallet::models::{OrganizationId, RosId, UserId};

/// HTTP client for the eligibility service
pub struct EligibilityServiceClient {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct SubPopulationResponse {
    sub_population_id: Option<SubPopulationId>,
}

#[derive(Debug, Deserialize)]
struct FeatureListResponse {
    feature_ids: Vec<RosId>,
}

impl EligibilityServiceClient {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self, EligibilityError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// GET returning `None` on 404
    async fn get_optional<T: for<'de> Deserialize<'de>>(
        &self,
        url: String,
        query: &[(&str, String)],
    ) -> Result<Option<T>, EligibilityError> {
        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EligibilityError::Timeout
                } else {
                    EligibilityError::from(e)
                }
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                debug!("Eligibility service has no record at {}", url);
                Ok(None)
            }
            status if status.is_success() => Ok(Some(response.json::<T>().await?)),
            status => Err(EligibilityError::Unavailable(status.as_u16())),
        }
    }
}

#[async_trait]
impl EligibilityOracle for EligibilityServiceClient {
    async fn get_verification(
        &self,
        user_id: UserId,
        organization_id: OrganizationId,
    ) -> Result<Option<EligibilityVerification>, EligibilityError> {
        self.get_optional(
            self.url("/verifications"),
            &[
                ("user_id", user_id.to_string()),
                ("organization_id", organization_id.to_string()),
            ],
        )
        .await
    }

    async fn get_sub_population(
        &self,
        user_id: UserId,
        organization_id: OrganizationId,
    ) -> Result<Option<SubPopulationId>, EligibilityError> {
        let response: Option<SubPopulationResponse> = self
            .get_optional(
                self.url("/sub-populations/lookup"),
                &[
                    ("user_id", user_id.to_string()),
                    ("organization_id", organization_id.to_string()),
                ],
            )
            .await?;
        Ok(response.and_then(|r| r.sub_population_id))
    }

    async fn get_ros_ids_for_sub_population(
        &self,
        sub_population_id: SubPopulationId,
        feature_type: FeatureType,
    ) -> Result<Vec<RosId>, EligibilityError> {
        let response: Option<FeatureListResponse> = self
            .get_optional(
                self.url(&format!("/sub-populations/{}/features", sub_population_id)),
                &[("feature_type", feature_type.as_str().to_string())],
            )
            .await?;
        Ok(response.map(|r| r.feature_ids).unwrap_or_default())
    }
}
