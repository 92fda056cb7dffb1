use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use error_stack::Report;
use error_stack::ResultExt;
use kube::api::PostParams;
use kube::config::KubeConfigOptions;
use kube::config::Kubeconfig;
use kube::Api;
use kube::Client;
use kube::Config;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use tracing::info;

use super::require_node_identity;
use super::OutputError;
use super::Outputer;
use crate::config::NodeConfig;
use crate::label::Labels;

/// Prefix of the per-node NodeFeature object name.
pub const NODE_FEATURE_PREFIX: &str = "ix-features-for";

/// Label binding a NodeFeature object to its node.
pub const NODE_NAME_LABEL: &str = "nfd.node.kubernetes.io/node-name";

/// Spec of the node-feature-discovery `NodeFeature` custom resource.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "nfd.k8s-sigs.io",
    version = "v1alpha1",
    kind = "NodeFeature",
    plural = "nodefeatures",
    namespaced,
    derive = "PartialEq"
)]
pub struct NodeFeatureSpec {
    #[serde(default)]
    pub features: Features,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// Raw features of a node. This daemon only publishes labels, so every set is empty.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct Features {
    #[serde(default)]
    pub flags: BTreeMap<String, FlagFeatureSet>,
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeFeatureSet>,
    #[serde(default)]
    pub instances: BTreeMap<String, InstanceFeatureSet>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct FlagFeatureSet {
    #[serde(default)]
    pub elements: BTreeMap<String, Nil>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct AttributeFeatureSet {
    #[serde(default)]
    pub elements: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct InstanceFeatureSet {
    #[serde(default)]
    pub elements: Vec<InstanceFeature>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct InstanceFeature {
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct Nil {}

/// Storage for NodeFeature objects in one namespace.
#[async_trait]
pub trait NodeFeatureStore: Send + Sync {
    /// Returns `None` when the object does not exist.
    async fn get(&self, name: &str) -> Result<Option<NodeFeature>, Report<OutputError>>;

    async fn create(&self, node_feature: &NodeFeature) -> Result<NodeFeature, Report<OutputError>>;

    async fn update(&self, node_feature: &NodeFeature) -> Result<NodeFeature, Report<OutputError>>;
}

/// [`NodeFeatureStore`] backed by the Kubernetes API server.
pub struct KubeNodeFeatureStore {
    api: Api<NodeFeature>,
}

impl KubeNodeFeatureStore {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
        }
    }

    /// Connects with the given kubeconfig file, or with the in-cluster
    /// environment and `~/.kube/config` when none is given.
    pub async fn connect(
        kubeconfig: Option<&Path>,
        namespace: &str,
    ) -> Result<Self, Report<OutputError>> {
        let connection_failed = || OutputError::ConnectionFailed {
            kubeconfig: kubeconfig.map(Path::to_path_buf),
        };

        let config = match kubeconfig {
            Some(path) => {
                let file = Kubeconfig::read_from(path).change_context_lazy(connection_failed)?;
                Config::from_custom_kubeconfig(file, &KubeConfigOptions::default())
                    .await
                    .change_context_lazy(connection_failed)?
            }
            None => Config::infer().await.change_context_lazy(connection_failed)?,
        };
        info!("Connecting to Kubernetes API at {}", config.cluster_url);

        let client = Client::try_from(config).change_context_lazy(connection_failed)?;
        Ok(Self::new(client, namespace))
    }
}

fn object_name(node_feature: &NodeFeature) -> String {
    node_feature.metadata.name.clone().unwrap_or_default()
}

#[async_trait]
impl NodeFeatureStore for KubeNodeFeatureStore {
    async fn get(&self, name: &str) -> Result<Option<NodeFeature>, Report<OutputError>> {
        self.api
            .get_opt(name)
            .await
            .change_context_lazy(|| OutputError::GetFailed {
                name: name.to_string(),
            })
    }

    async fn create(&self, node_feature: &NodeFeature) -> Result<NodeFeature, Report<OutputError>> {
        self.api
            .create(&PostParams::default(), node_feature)
            .await
            .change_context_lazy(|| OutputError::CreateFailed {
                name: object_name(node_feature),
            })
    }

    async fn update(&self, node_feature: &NodeFeature) -> Result<NodeFeature, Report<OutputError>> {
        let name = object_name(node_feature);
        self.api
            .replace(&name, &PostParams::default(), node_feature)
            .await
            .change_context_lazy(|| OutputError::UpdateFailed { name: name.clone() })
    }
}

/// Publishes labels through the node-specific NodeFeature object.
pub struct NodeFeatureOutputer<S> {
    node: NodeConfig,
    store: S,
}

impl<S: NodeFeatureStore> NodeFeatureOutputer<S> {
    pub fn new(node: NodeConfig, store: S) -> Result<Self, Report<OutputError>> {
        require_node_identity(&node)?;
        Ok(Self { node, store })
    }

    /// Name of the NodeFeature object owned by this node.
    pub fn object_name(&self) -> String {
        format!("{NODE_FEATURE_PREFIX}-{}", self.node.name)
    }

    fn object_labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([(NODE_NAME_LABEL.to_string(), self.node.name.clone())])
    }

    fn spec(labels: &Labels) -> NodeFeatureSpec {
        NodeFeatureSpec {
            features: Features::default(),
            labels: labels.clone(),
        }
    }
}

#[async_trait]
impl<S: NodeFeatureStore> Outputer for NodeFeatureOutputer<S> {
    async fn output(&self, labels: &Labels) -> Result<(), Report<OutputError>> {
        let name = self.object_name();
        let namespace = &self.node.namespace;

        match self.store.get(&name).await? {
            None => {
                info!("Creating NodeFeature object {name} in namespace {namespace}");
                let mut node_feature = NodeFeature::new(&name, Self::spec(labels));
                node_feature.metadata.namespace = Some(namespace.clone());
                node_feature.metadata.labels = Some(self.object_labels());

                let created = self.store.create(&node_feature).await?;
                info!(
                    "NodeFeature object {} created successfully",
                    object_name(&created)
                );
            }
            Some(current) => {
                let mut updated = current.clone();
                updated.metadata.labels = Some(self.object_labels());
                updated.spec = Self::spec(labels);

                if updated == current {
                    info!("No changes detected in NodeFeature object {name}, skipping update");
                    return Ok(());
                }

                info!("Updating NodeFeature object {name} in namespace {namespace}");
                let updated = self.store.update(&updated).await?;
                info!(
                    "NodeFeature object {} updated successfully",
                    object_name(&updated)
                );
            }
        }
        Ok(())
    }
}
