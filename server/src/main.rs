use anyhow::Result;
use clap::Parser;
use sitepress::{
    api, db,
    config::{Cli, Command, Config},
    housekeeping,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = Config::load(&cli)?;
    let level = if cfg.logging_enabled { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .init();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => api::run_http_server(cfg).await,
        Command::Sweep => {
            std::fs::create_dir_all(&cfg.data_dir)?;
            let pool = db::open_pool(
                cfg.db_path(),
                std::time::Duration::from_secs(cfg.db_timeout_secs),
            )?;
            let report =
                housekeeping::sweep(&pool, time::OffsetDateTime::now_utc(), cfg.grace_period())
                    .await?;
            if report.errors > 0 {
                anyhow::bail!("{} image(s) could not be removed", report.errors);
            }
            Ok(())
        }
    }
}
