use anyhow::Result;
use clap::Parser;

use ratewarden_core::config::RatewardenConfig;
use ratewarden_daemon::cli::DaemonCli;
use ratewarden_daemon::logging;
use ratewarden_daemon::orchestrator::{self, Orchestrator};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DaemonCli::parse();

    let path = RatewardenConfig::discover(cli.config.as_deref())
        .map_err(|e| anyhow::anyhow!("no configuration: {e}"))?;
    let mut config = RatewardenConfig::load(&path)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load {}: {e}", path.display()))?;
    cli.apply_overrides(&mut config);
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid command-line override: {e}"))?;

    if cli.validate {
        let (sources, sinks) = orchestrator::validate_pipeline(&config)?;
        println!(
            "{}: configuration OK ({sources} source(s), {sinks} sink(s))",
            path.display()
        );
        return Ok(());
    }

    logging::init_tracing(&config.general)?;
    tracing::info!(
        config = %path.display(),
        version = env!("CARGO_PKG_VERSION"),
        "ratewarden-daemon starting"
    );

    let mut orchestrator = Orchestrator::build_from_config(config)?;
    if let Err(e) = orchestrator.run().await {
        tracing::error!(error = %e, "ratewarden-daemon exiting with failure");
        return Err(e);
    }
    Ok(())
}
