//! Administrative CLI for operations the HTTP front end deliberately doesn't
//! expose (§6.2): resetting per-user CPU quotas on a cron-driven schedule.

use clap::{Parser, Subcommand};
use faas_engine::store::{PgQuotaStore, QuotaStore};
use faas_engine::EngineConfig;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "quota-admin", about = "Administer per-user FaaS quotas")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Zero `cpu_time_used_ms` for every user whose quota row was last reset
    /// more than `older_than_hours` ago.
    ResetCpu {
        #[arg(long, default_value_t = 24)]
        older_than_hours: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("faas_engine=info")
        .init();
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = EngineConfig::default();

    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&config.database_url)
        .await?;
    let quota_store = PgQuotaStore::new(pool);

    match cli.command {
        Command::ResetCpu { older_than_hours } => {
            let reset = quota_store
                .reset_cpu_if_older_than(Duration::from_secs(older_than_hours * 3600))
                .await?;
            info!(reset_count = reset, "reset cpu quotas");
            println!("reset {reset} user quota rows");
        }
    }

    Ok(())
}
