use serde::Deserialize;
use std::time::Duration;

use crate::error::AppResult;
use crate::scheduler::ScheduleFrequency;
use crate::wallet::models::MemberAddress;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub alegeus_base_url: String,
    pub alegeus_api_key: String,
    pub eligibility_base_url: String,
    pub escalation_webhook_url: Option<String>,
    pub payment_ops_webhook_url: Option<String>,
    pub external_call_timeout_secs: u64,
    /// Authorizes GOLD cycle-based wallets to be converted to currency-based ones
    pub allow_cycle_currency_conversion: bool,
    /// Cents one cycle credit is worth; without it spend never crosses cycle and currency
    pub cycle_credit_value_cents: Option<i64>,
    pub fallback_address_line1: String,
    pub fallback_address_city: String,
    pub fallback_address_state: String,
    pub fallback_address_zip: String,
    pub fallback_address_country: String,
    pub schedule_frequency: ScheduleFrequency,
    pub schedule_execution_hour: u32,
    pub batch_max_concurrency: usize,
}

impl Config {
    /// Defaults overlaid with `RECONCILER_*` environment variables.
    /// `DATABASE_URL` is honoured when `RECONCILER_DATABASE_URL` is absent.
    pub fn from_env() -> AppResult<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgresql://localhost/wallet_reconciler".to_string());

        let settings = config::Config::builder()
            .set_default("database_url", database_url)?
            .set_default("database_max_connections", 20_i64)?
            .set_default("alegeus_base_url", "https://wca.alegeus.com/api")?
            .set_default("alegeus_api_key", "")?
            .set_default("eligibility_base_url", "http://localhost:8081")?
            .set_default("external_call_timeout_secs", 30_i64)?
            .set_default("allow_cycle_currency_conversion", false)?
            .set_default("fallback_address_line1", "160 Varick St")?
            .set_default("fallback_address_city", "New York")?
            .set_default("fallback_address_state", "NY")?
            .set_default("fallback_address_zip", "10013")?
            .set_default("fallback_address_country", "US")?
            .set_default("schedule_frequency", "daily")?
            .set_default("schedule_execution_hour", 2_i64)?
            .set_default("batch_max_concurrency", 8_i64)?
            .add_source(config::Environment::with_prefix("RECONCILER").try_parsing(true))
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> AppResult<()> {
        if self.schedule_execution_hour > 23 {
            return Err(crate::error::AppError::Config(format!(
                "schedule_execution_hour must be 0-23, got {}",
                self.schedule_execution_hour
            )));
        }
        if matches!(self.cycle_credit_value_cents, Some(value) if value <= 0) {
            return Err(crate::error::AppError::Config(
                "cycle_credit_value_cents must be positive".to_string(),
            ));
        }
        if self.batch_max_concurrency == 0 {
            return Err(crate::error::AppError::Config(
                "batch_max_concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn external_call_timeout(&self) -> Duration {
        Duration::from_secs(self.external_call_timeout_secs)
    }

    /// Company-owned address sent to the TPA in place of non-domestic member addresses
    pub fn fallback_address(&self) -> MemberAddress {
        MemberAddress {
            line1: self.fallback_address_line1.clone(),
            line2: None,
            city: self.fallback_address_city.clone(),
            state: self.fallback_address_state.clone(),
            zip_code: self.fallback_address_zip.clone(),
            country: self.fallback_address_country.clone(),
        }
    }
}
