//! Wiring of configuration, device access and output into a [`Daemon`].

use async_trait::async_trait;
use error_stack::Report;
use error_stack::ResultExt;
use tracing::info;

use crate::config::Config;
use crate::daemon::Daemon;
use crate::daemon::DaemonError;
use crate::daemon::EpochLoader;
use crate::output::new_outputer;
use crate::resource::nvml::NvmlManager;

/// Loads configuration from the command line and environment for every epoch.
///
/// The configuration parsed at startup is used for the first epoch. Later
/// epochs re-read it so a reload picks up changed environment values.
pub struct CliLoader {
    initial: Option<Config>,
}

impl CliLoader {
    pub fn new(initial: Config) -> Self {
        Self {
            initial: Some(initial),
        }
    }

    fn next_config(&mut self) -> Result<Config, Report<DaemonError>> {
        match self.initial.take() {
            Some(config) => Ok(config),
            None => Config::load().change_context(DaemonError::Config),
        }
    }
}

#[async_trait]
impl EpochLoader for CliLoader {
    async fn load(&mut self) -> Result<Daemon, Report<DaemonError>> {
        let config = self.next_config()?;
        build_daemon(config).await
    }
}

/// Builds the daemon for one epoch from a loaded configuration.
pub async fn build_daemon(config: Config) -> Result<Daemon, Report<DaemonError>> {
    let rendered = config.to_pretty_json().change_context(DaemonError::Config)?;
    info!("Running with config:\n{rendered}");

    let manager = NvmlManager::new(config.flags.ixml_lib_path.clone());
    let outputer = new_outputer(&config)
        .await
        .change_context(DaemonError::Initialization)?;

    Ok(Daemon::new(config, Box::new(manager), outputer))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use test_log::test;

    use super::*;
    use crate::config::Flags;
    use crate::config::KubeClientConfig;
    use crate::config::NodeConfig;

    fn config(output_file: &str) -> Config {
        Config {
            flags: Flags {
                no_timestamp: false,
                sleep_interval: Duration::from_secs(60),
                output_file: output_file.to_string(),
                machine_type_file: String::new(),
                ixml_lib_path: "libixml.so".to_string(),
            },
            kube: KubeClientConfig::default(),
            node: NodeConfig::default(),
        }
    }

    #[test(tokio::test)]
    async fn first_epoch_uses_startup_config() {
        let mut loader = CliLoader::new(config("/tmp/ix-features"));

        let daemon = loader.load().await.unwrap();

        assert_eq!(daemon.config().flags.output_file, "/tmp/ix-features");
        assert!(loader.initial.is_none());
    }

    #[test(tokio::test)]
    async fn cluster_output_without_node_identity_fails() {
        let err = match build_daemon(config("")).await {
            Ok(_) => panic!("expected missing node identity to fail"),
            Err(err) => err,
        };

        assert!(matches!(err.current_context(), DaemonError::Initialization));
    }
}
