use sqlx::{postgres::PgPoolOptions, PgPool};
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};

use crate::adapters::{
    AlegeusClient, EscalationSink, LogEscalationSink, TicketEscalationSink,
    WebhookPaymentOpsNotifier,
};
use crate::config::Config;
use crate::eligibility::EligibilityServiceClient;
use crate::error::{AppError, AppResult};
use crate::ledger::LedgerRepository;
use crate::reconciler::{ReconcilerSettings, WalletEligibilityReconciler};
use crate::scheduler::{ReconciliationRun, ReconciliationScheduler, ScheduleConfig};

/// Everything the binary needs, wired once at startup
pub struct AppState {
    pub pool: PgPool,
    pub reconciler: Arc<WalletEligibilityReconciler>,
    pub run: Arc<ReconciliationRun>,
    pub scheduler: ReconciliationScheduler,
}

pub async fn initialize_app_state(config: &Config) -> AppResult<AppState> {
    info!("Initializing application components ...");

    let pool = initialize_database(config).await?;
    let store = Arc::new(LedgerRepository::new(pool.clone()));

    let timeout = config.external_call_timeout();

    let gateway = Arc::new(
        AlegeusClient::new(
            config.alegeus_base_url.clone(),
            config.alegeus_api_key.clone(),
            timeout,
        )
        .map_err(|e| AppError::Config(format!("benefits gateway client: {}", e)))?,
    );
    info!("✅ Benefits gateway client initialized: {}", config.alegeus_base_url);

    let oracle = Arc::new(
        EligibilityServiceClient::new(config.eligibility_base_url.clone(), timeout)
            .map_err(|e| AppError::Config(format!("eligibility client: {}", e)))?,
    );
    info!("✅ Eligibility client initialized: {}", config.eligibility_base_url);

    let escalations: Arc<dyn EscalationSink> = match &config.escalation_webhook_url {
        Some(url) => {
            let sink = TicketEscalationSink::new(url.clone(), timeout)
                .map_err(|e| AppError::Config(format!("escalation sink: {}", e)))?;
            info!("✅ Escalations routed to ticket webhook");
            Arc::new(sink)
        }
        None => {
            warn!("⚠️  No escalation webhook configured - escalations will only be logged");
            Arc::new(LogEscalationSink)
        }
    };

    let payment_ops = Arc::new(
        WebhookPaymentOpsNotifier::new(config.payment_ops_webhook_url.clone(), timeout)
            .map_err(|e| AppError::Config(format!("payment ops notifier: {}", e)))?,
    );
    if config.payment_ops_webhook_url.is_none() {
        warn!("⚠️  No payment ops webhook configured - ROS changes will only be logged");
    }

    let reconciler = Arc::new(WalletEligibilityReconciler::new(
        store,
        oracle,
        gateway,
        escalations,
        payment_ops,
        ReconcilerSettings::from_config(config),
    ));
    if config.allow_cycle_currency_conversion {
        info!("🔁 Cycle to currency conversion is enabled");
    }

    let run = Arc::new(ReconciliationRun::new(
        reconciler.clone(),
        config.batch_max_concurrency,
    ));
    let scheduler = ReconciliationScheduler::new(
        ScheduleConfig {
            frequency: config.schedule_frequency,
            execution_hour: config.schedule_execution_hour,
        },
        run.clone(),
    );

    Ok(AppState {
        pool,
        reconciler,
        run,
        scheduler,
    })
}

async fn initialize_database(config: &Config) -> AppResult<PgPool> {
    info!("📊 Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&config.database_url)
        .await?;

    info!(
        "✓ Database pool configured: {} max connections",
        config.database_max_connections
    );

    info!("🔄 Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("✓ Database initialized");
    Ok(pool)
}
