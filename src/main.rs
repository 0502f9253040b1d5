use std::{path::PathBuf, process::ExitCode, sync::Arc};

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use fleetguard::{
    catalog::HttpCatalog,
    config::DaemonConfig,
    daemon::Daemon,
    error::DaemonError,
    logging::init_logging,
};

/// Supervises the Minecraft server instances on this host and serves
/// operators over WebSocket.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// JSON config file. Defaults apply to everything it leaves out
    #[clap(short, long)]
    config: Option<PathBuf>,
    /// Address to accept operator connections on
    #[clap(short, long)]
    listen: Option<String>,
    /// Directory holding one subdirectory per instance
    #[clap(long)]
    instances_dir: Option<PathBuf>,
    /// Directory for the daemon log file
    #[clap(long)]
    log_dir: Option<PathBuf>,
}

impl Args {
    async fn into_config(self) -> Result<DaemonConfig, DaemonError> {
        let mut config = match &self.config {
            Some(path) => DaemonConfig::load(path).await?,
            None => DaemonConfig::default(),
        };
        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if let Some(dir) = self.instances_dir {
            config.instances_dir = dir;
        }
        if let Some(dir) = self.log_dir {
            config.log_dir = dir;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match run(Args::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // Logging may not be up yet.
            eprintln!("fleetguard: {e}");
            error!(error = %e, "fatal");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), DaemonError> {
    let config = args.into_config().await?;
    let _guard = init_logging(&config.log_dir)?;
    info!(listen = %config.listen, instances = %config.instances_dir.display(), "starting fleetguard");

    let daemon = Daemon::build(config, Arc::new(HttpCatalog::default())).await?;

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received");
                trigger.cancel();
            }
            Err(e) => error!(error = %e, "cannot listen for interrupt"),
        }
    });

    daemon.run(shutdown).await
}
