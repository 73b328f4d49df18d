use anyhow::{bail, Context};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wallet_reconciler::bootstrap;
use wallet_reconciler::config::Config;
use wallet_reconciler::wallet::ReimbursementStore;

const USAGE: &str = "usage: wallet-reconciler [run-once | schedule | undo-runout <wallet_id>]";

// Initialize logging and tracing
fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,wallet_reconciler=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    info!("🚀 Starting Wallet Eligibility Reconciler");

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = args.first().map(String::as_str).unwrap_or("run-once");

    let config = Config::from_env().context("loading configuration")?;
    let state = bootstrap::initialize_app_state(&config)
        .await
        .context("initializing application state")?;

    match command {
        "run-once" => {
            let summary = state.run.run_once().await?;
            info!("📋 Batch summary: {}", serde_json::to_string(&summary)?);
        }
        "schedule" => {
            info!("⏰ Scheduler started ({:?})", config.schedule_frequency);
            state.scheduler.start().await?;
        }
        "undo-runout" => {
            let wallet_id: i64 = args
                .get(1)
                .context(USAGE)?
                .parse()
                .context("wallet_id must be an integer")?;
            let wallet = state
                .reconciler
                .store()
                .get_wallet(wallet_id)
                .await?
                .with_context(|| format!("wallet {} not found", wallet_id))?;

            state
                .reconciler
                .try_undo_set_wallet_to_runout(&wallet)
                .await
                .with_context(|| format!("undoing runout for wallet {}", wallet_id))?;
            info!("✅ Runout undone for wallet {}", wallet_id);
        }
        other => bail!("unknown command '{}'\n{}", other, USAGE),
    }

    state.pool.close().await;
    Ok(())
}
