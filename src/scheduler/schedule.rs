// Reconciliation Scheduler - runs the batch on a fixed cadence
//
// Daily (default): once per day at the configured UTC hour, off-peak for the TPA
// Hourly: every hour, for catching up after an outage

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tracing::{error, info};

use super::batch::ReconciliationRun;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleFrequency {
    Daily,
    Hourly,
}

#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    pub frequency: ScheduleFrequency,
    /// UTC hour to execute the daily run (0-23)
    pub execution_hour: u32,
}

pub struct ReconciliationScheduler {
    config: ScheduleConfig,
    run: Arc<ReconciliationRun>,
}

impl ReconciliationScheduler {
    pub fn new(config: ScheduleConfig, run: Arc<ReconciliationRun>) -> Self {
        Self { config, run }
    }

    /// Start the scheduler (runs in background)
    pub fn start(&self) -> JoinHandle<()> {
        let config = self.config.clone();
        let run = self.run.clone();

        tokio::spawn(async move {
            match config.frequency {
                ScheduleFrequency::Daily => Self::run_daily_scheduler(&config, &run).await,
                ScheduleFrequency::Hourly => Self::run_hourly_scheduler(&run).await,
            }
        })
    }

    async fn run_daily_scheduler(config: &ScheduleConfig, run: &Arc<ReconciliationRun>) {
        loop {
            let now = Utc::now();
            let next_execution = Self::calculate_next_daily_execution(now, config.execution_hour);
            let duration_until_execution = next_execution.signed_duration_since(now);

            if duration_until_execution.num_seconds() > 0 {
                info!(
                    "⏰ Next reconciliation scheduled for: {} UTC",
                    next_execution.format("%Y-%m-%d %H:%M:%S")
                );
                tokio::time::sleep(Duration::from_secs(
                    duration_until_execution.num_seconds() as u64,
                ))
                .await;
            }

            info!("🔄 Starting daily reconciliation cycle");
            Self::execute(run).await;
        }
    }

    async fn run_hourly_scheduler(run: &Arc<ReconciliationRun>) {
        let mut interval = interval(Duration::from_secs(3600));

        loop {
            interval.tick().await;
            info!("🔄 Starting hourly reconciliation cycle");
            Self::execute(run).await;
        }
    }

    async fn execute(run: &Arc<ReconciliationRun>) {
        if let Err(e) = run.run_once().await {
            error!("❌ Reconciliation batch failed: {:?}", e);
        }
    }

    /// Next occurrence of `execution_hour:00` UTC strictly after `now`
    pub fn calculate_next_daily_execution(now: DateTime<Utc>, execution_hour: u32) -> DateTime<Utc> {
        let hour = execution_hour.min(23);
        let today = now.date_naive();
        let at_hour = |date: chrono::NaiveDate| {
            date.and_hms_opt(hour, 0, 0)
                .map(|naive| Utc.from_utc_datetime(&naive))
        };

        match at_hour(today) {
            Some(next) if next > now => next,
            _ => at_hour(today + chrono::Duration::days(1))
                .unwrap_or_else(|| now + chrono::Duration::days(1)),
        }
    }
}
