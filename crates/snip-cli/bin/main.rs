use anyhow::Context;
use clap::Parser;
use snip_cli::{logging, AppConfig, Cli, Session};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_format)?;

    let config = AppConfig::from_cli(&cli)?;
    info!(
        backend = config.store.backend.name(),
        op_timeout = ?config.store.op_timeout,
        delete_workers = config.deleter.workers,
        "starting snip"
    );

    let store = snip_storage::open(&config.store)
        .await
        .context("failed to open store")?;
    let session = Session::start(store, &config);

    let mut stdout = std::io::stdout();
    let outcome = tokio::select! {
        result = session.execute(&cli.command, &mut stdout) => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted, draining pending deletions");
            Ok(())
        }
    };

    let stats = session.finish(config.drain_timeout).await?;
    info!(
        submitted = stats.submitted,
        applied_ids = stats.applied_ids,
        failed_ids = stats.failed_ids,
        "snip finished"
    );

    outcome
}
