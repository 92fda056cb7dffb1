use anyhow::Result;
use clap::Parser;
use error_stack::Report;
use feature_discovery::app::CliLoader;
use feature_discovery::config::Cli;
use feature_discovery::config::Config;
use feature_discovery::daemon::supervise;
use feature_discovery::daemon::DaemonError;
use feature_discovery::daemon::OsSignals;
use utils::logging;
use utils::version;

#[tokio::main]
async fn main() -> Result<()> {
    logging::install_panic_hook();
    logging::init();

    let cli = Cli::parse();

    tracing::info!("Starting ix-feature-discovery {}", &**version::VERSION);

    if let Err(report) = run(Config::from(cli)).await {
        tracing::error!("{report:?}");
        return Err(anyhow::anyhow!("{report:?}"));
    }

    tracing::info!("Exiting");
    Ok(())
}

async fn run(config: Config) -> Result<(), Report<DaemonError>> {
    tracing::info!("Starting OS watcher.");
    let mut signals = OsSignals::register()?;
    let mut loader = CliLoader::new(config);

    supervise(&mut loader, &mut signals).await
}
