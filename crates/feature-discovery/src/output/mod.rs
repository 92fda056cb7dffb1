//! Publication of generated labels.
//!
//! Labels are either written to a local features file picked up by the
//! node-feature-discovery worker, or published as a `NodeFeature` object
//! when no output file is configured.

pub mod file;
pub mod node_feature;

use core::error::Error;
use std::path::PathBuf;

use async_trait::async_trait;
use error_stack::Report;
use tracing::info;

use crate::config::Config;
use crate::config::NodeConfig;
use crate::label::Labels;

pub use file::FileOutputer;
pub use node_feature::KubeNodeFeatureStore;
pub use node_feature::NodeFeature;
pub use node_feature::NodeFeatureOutputer;
pub use node_feature::NodeFeatureStore;

/// Errors that can occur while publishing labels.
#[derive(Debug, derive_more::Display)]
pub enum OutputError {
    #[display("Required flag {flag} not set")]
    MissingNodeConfig { flag: &'static str },
    #[display("Failed to connect to Kubernetes API (kubeconfig: {kubeconfig:?})")]
    ConnectionFailed { kubeconfig: Option<PathBuf> },
    #[display("Failed to get NodeFeature object {name}")]
    GetFailed { name: String },
    #[display("Failed to create NodeFeature object {name}")]
    CreateFailed { name: String },
    #[display("Failed to update NodeFeature object {name}")]
    UpdateFailed { name: String },
    #[display("Failed to write output file {path}")]
    WriteFailed { path: String },
    #[display("Failed to remove output file {path}")]
    RemoveFailed { path: String },
}

impl Error for OutputError {}

/// A mechanism to output labels.
#[async_trait]
pub trait Outputer: Send + Sync {
    /// Durably records `labels`, replacing whatever was published before.
    async fn output(&self, labels: &Labels) -> Result<(), Report<OutputError>>;

    /// Removes any transient artifact written by [`Outputer::output`].
    async fn cleanup(&self) -> Result<(), Report<OutputError>> {
        Ok(())
    }
}

/// Checks that the node identity needed for NodeFeature output is present.
pub fn require_node_identity(node: &NodeConfig) -> Result<(), Report<OutputError>> {
    if node.name.is_empty() {
        return Err(Report::new(OutputError::MissingNodeConfig { flag: "node-name" }));
    }
    if node.namespace.is_empty() {
        return Err(Report::new(OutputError::MissingNodeConfig { flag: "namespace" }));
    }
    Ok(())
}

/// Builds the outputer selected by `config`.
pub async fn new_outputer(config: &Config) -> Result<Box<dyn Outputer>, Report<OutputError>> {
    if config.writes_to_file() {
        info!("Writing labels to {}", config.flags.output_file);
        return Ok(Box::new(FileOutputer::new(&config.flags.output_file)));
    }

    require_node_identity(&config.node)?;
    let store =
        KubeNodeFeatureStore::connect(config.kube.kubeconfig.as_deref(), &config.node.namespace)
            .await?;
    info!(
        "Publishing labels as NodeFeature in namespace {}",
        config.node.namespace
    );
    Ok(Box::new(NodeFeatureOutputer::new(config.node.clone(), store)?))
}
