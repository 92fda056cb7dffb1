use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use utils::version;

use crate::config::parse_duration;

pub const DEFAULT_OUTPUT_FILE: &str =
    "/etc/kubernetes/node-feature-discovery/features.d/ix-features";
pub const DEFAULT_MACHINE_TYPE_FILE: &str = "/sys/class/dmi/id/product_name";

/// Generate node labels for Iluvatar CoreX GPU devices.
#[derive(Parser, Debug, Clone)]
#[command(name = "ix-feature-discovery", about, long_about, version = &**version::VERSION)]
pub struct Cli {
    #[arg(
        long,
        env = "NO_TIMESTAMP",
        help = "Do not add the timestamp to the labels"
    )]
    pub no_timestamp: bool,

    #[arg(
        long,
        env = "SLEEP_INTERVAL",
        default_value = "60s",
        value_parser = parse_duration,
        help = "Time to sleep between labeling, e.g. 60s, 5m or 1m30s"
    )]
    pub sleep_interval: Duration,

    #[arg(
        long,
        short = 'o',
        visible_alias = "output",
        env = "OUTPUT_FILE",
        value_hint = clap::ValueHint::FilePath,
        default_value = DEFAULT_OUTPUT_FILE,
        help = "Path to the output file; pass an empty value to publish a NodeFeature object instead"
    )]
    pub output_file: String,

    #[arg(
        long,
        env = "MACHINE_TYPE_FILE",
        value_hint = clap::ValueHint::FilePath,
        default_value = DEFAULT_MACHINE_TYPE_FILE,
        help = "A path to a file that contains the DMI (SMBIOS) information for the node"
    )]
    pub machine_type_file: String,

    #[arg(
        long,
        env = "IXML_LIB_PATH",
        default_value = "libixml.so",
        help = "Management library loaded to query devices"
    )]
    pub ixml_lib_path: String,

    #[arg(
        long,
        env = "KUBECONFIG",
        value_hint = clap::ValueHint::FilePath,
        help = "Path to kubeconfig file (defaults to cluster config or ~/.kube/config)"
    )]
    pub kubeconfig: Option<PathBuf>,

    #[arg(
        long,
        env = "NODE_NAME",
        help = "The name of the node running this instance, required for NodeFeature output"
    )]
    pub node_name: Option<String>,

    #[arg(
        long,
        env = "KUBERNETES_NAMESPACE",
        help = "The namespace NodeFeature objects are written to"
    )]
    pub namespace: Option<String>,
}
