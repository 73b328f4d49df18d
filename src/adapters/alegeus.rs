// Alegeus (benefits-administration TPA) REST client
//
// Every call returns the raw status so the reconciler decides what a failure means.
// Amounts are posted in dollars; the ledger keeps cents.

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};

use super::traits::{BenefitsAdminGateway, GatewayResponse};
use crate::error::GatewayError;
use crate::ledger::models::Amount;
use crate::wallet::models::{MemberAddress, ReimbursementWallet};

const DATE_FORMAT: &str = "%Y%m%d";
const ACCOUNT_STATUS_TERMINATED: u8 = 5;

pub struct AlegeusClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct EmployeeDemographicsRequest {
    employee_id: String,
    /// Empty string cancels a pending termination
    termination_date: String,
    address1: String,
    address2: String,
    city: String,
    state: String,
    zip: String,
    country: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct AccountStatusRequest {
    employee_id: String,
    plan_id: String,
    account_status_code: u8,
    termination_date: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct AddAccountRequest {
    employee_id: String,
    plan_id: String,
    effective_date: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ManualClaimRequest {
    employee_id: String,
    claim_id: String,
    plan_id: String,
    #[serde(with = "rust_decimal::serde::float")]
    amount: Decimal,
    service_start_date: String,
    service_end_date: String,
}

impl AlegeusClient {
    pub fn new(base_url: String, api_key: String, timeout: Duration) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }

    fn employee_id(wallet: &ReimbursementWallet) -> Result<String, GatewayError> {
        wallet
            .alegeus_id
            .clone()
            .ok_or(GatewayError::MissingEmployeeId(wallet.id))
    }

    /// Cents to dollars
    fn to_dollars(amount: Amount) -> Decimal {
        Decimal::new(amount, 2)
    }

    fn format_date(date: Option<NaiveDate>) -> String {
        date.map(|d| d.format(DATE_FORMAT).to_string())
            .unwrap_or_default()
    }

    async fn send<T: Serialize>(
        &self,
        operation: &'static str,
        method: reqwest::Method,
        path: String,
        body: &T,
    ) -> Result<GatewayResponse, GatewayError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("{} {} ({})", method, url, operation);

        let response = self
            .client
            .request(method, &url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Timeout { operation }
                } else {
                    GatewayError::from(e)
                }
            })?;

        let status = response.status().as_u16();
        info!("📨 Alegeus {} responded {}", operation, status);
        Ok(GatewayResponse::new(status))
    }
}

#[async_trait]
impl BenefitsAdminGateway for AlegeusClient {
    async fn update_employee_termination_date(
        &self,
        wallet: &ReimbursementWallet,
        termination_date: Option<NaiveDate>,
        address: &MemberAddress,
    ) -> Result<GatewayResponse, GatewayError> {
        let employee_id = Self::employee_id(wallet)?;
        let request = EmployeeDemographicsRequest {
            employee_id: employee_id.clone(),
            termination_date: Self::format_date(termination_date),
            address1: address.line1.clone(),
            address2: address.line2.clone().unwrap_or_default(),
            city: address.city.clone(),
            state: address.state.clone(),
            zip: address.zip_code.clone(),
            country: address.country.clone(),
        };
        self.send(
            "update_employee_termination_date",
            reqwest::Method::PUT,
            format!("/participant/employee/{}", employee_id),
            &request,
        )
        .await
    }

    async fn terminate_employee_account(
        &self,
        wallet: &ReimbursementWallet,
        plan_id: &str,
    ) -> Result<GatewayResponse, GatewayError> {
        let employee_id = Self::employee_id(wallet)?;
        let request = AccountStatusRequest {
            employee_id: employee_id.clone(),
            plan_id: plan_id.to_string(),
            account_status_code: ACCOUNT_STATUS_TERMINATED,
            termination_date: Self::format_date(Some(chrono::Utc::now().date_naive())),
        };
        self.send(
            "terminate_employee_account",
            reqwest::Method::PUT,
            format!("/participant/enrollment/{}/{}", employee_id, plan_id),
            &request,
        )
        .await
    }

    async fn post_add_employee_account(
        &self,
        wallet: &ReimbursementWallet,
        plan_id: &str,
    ) -> Result<GatewayResponse, GatewayError> {
        let employee_id = Self::employee_id(wallet)?;
        let request = AddAccountRequest {
            employee_id: employee_id.clone(),
            plan_id: plan_id.to_string(),
            effective_date: Self::format_date(Some(chrono::Utc::now().date_naive())),
        };
        self.send(
            "post_add_employee_account",
            reqwest::Method::POST,
            format!("/participant/enrollment/{}", employee_id),
            &request,
        )
        .await
    }

    async fn adjust_plan_amount(
        &self,
        wallet: &ReimbursementWallet,
        claim_id: &str,
        amount: Amount,
        plan_id: &str,
        service_start_date: NaiveDate,
    ) -> Result<GatewayResponse, GatewayError> {
        let employee_id = Self::employee_id(wallet)?;
        let request = ManualClaimRequest {
            employee_id,
            claim_id: claim_id.to_string(),
            plan_id: plan_id.to_string(),
            amount: Self::to_dollars(amount),
            service_start_date: Self::format_date(Some(service_start_date)),
            service_end_date: Self::format_date(Some(service_start_date)),
        };
        self.send(
            "adjust_plan_amount",
            reqwest::Method::POST,
            "/services/claims/manual".to_string(),
            &request,
        )
        .await
    }
}
