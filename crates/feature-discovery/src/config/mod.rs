//! Configuration for the feature discovery daemon.
//!
//! The command line (and its environment bindings) is the only source of
//! configuration. It is re-read at the start of every configuration epoch,
//! which is how a `SIGHUP` picks up new values without a process restart.

pub mod cli;

use core::error::Error;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use error_stack::Report;
use error_stack::ResultExt;
use serde::Serialize;
use serde::Serializer;

pub use cli::Cli;

/// Errors raised while loading configuration.
#[derive(Debug, derive_more::Display)]
pub enum ConfigError {
    #[display("Invalid duration {value:?}: {reason}")]
    InvalidDuration { value: String, reason: String },
    #[display("Failed to parse command line")]
    ParseFailed,
    #[display("Failed to render configuration")]
    RenderFailed,
}

impl Error for ConfigError {}

/// Snapshot of the daemon configuration for one epoch.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub flags: Flags,
    #[serde(skip)]
    pub kube: KubeClientConfig,
    pub node: NodeConfig,
}

/// Flags controlling label generation and output.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Flags {
    pub no_timestamp: bool,
    #[serde(serialize_with = "serialize_duration")]
    pub sleep_interval: Duration,
    pub output_file: String,
    pub machine_type_file: String,
    pub ixml_lib_path: String,
}

/// Identity of the node labels are published for.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeConfig {
    pub name: String,
    pub namespace: String,
}

#[derive(Debug, Clone, Default)]
pub struct KubeClientConfig {
    pub kubeconfig: Option<PathBuf>,
}

impl Config {
    /// Loads configuration from the process arguments and environment.
    pub fn load() -> Result<Self, Report<ConfigError>> {
        let cli = Cli::try_parse().change_context(ConfigError::ParseFailed)?;
        Ok(Self::from(cli))
    }

    /// Whether labels are written to a local file rather than a NodeFeature object.
    pub fn writes_to_file(&self) -> bool {
        !self.flags.output_file.is_empty()
    }

    /// Renders the configuration as indented JSON for logging.
    pub fn to_pretty_json(&self) -> Result<String, Report<ConfigError>> {
        serde_json::to_string_pretty(self).change_context(ConfigError::RenderFailed)
    }
}

impl From<Cli> for Config {
    fn from(cli: Cli) -> Self {
        Self {
            flags: Flags {
                no_timestamp: cli.no_timestamp,
                sleep_interval: cli.sleep_interval,
                output_file: cli.output_file,
                machine_type_file: cli.machine_type_file,
                ixml_lib_path: cli.ixml_lib_path,
            },
            kube: KubeClientConfig {
                kubeconfig: cli.kubeconfig,
            },
            node: NodeConfig {
                name: cli.node_name.unwrap_or_default(),
                namespace: cli.namespace.unwrap_or_default(),
            },
        }
    }
}

/// Parses a duration such as `90`, `500ms`, `60s`, `5m`, `1h` or `1m30s`.
///
/// A bare number is interpreted as seconds. Zero is rejected.
pub fn parse_duration(value: &str) -> Result<Duration, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidDuration {
        value: value.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(invalid("empty value"));
    }
    if let Ok(secs) = trimmed.parse::<u64>() {
        return match secs {
            0 => Err(invalid("must be greater than zero")),
            secs => Ok(Duration::from_secs(secs)),
        };
    }

    let mut total = Duration::ZERO;
    let mut rest = trimmed;
    while !rest.is_empty() {
        let digits = rest.chars().take_while(char::is_ascii_digit).count();
        if digits == 0 {
            return Err(invalid("expected a number"));
        }
        let amount: u64 = rest[..digits]
            .parse()
            .map_err(|_| invalid("number out of range"))?;
        rest = &rest[digits..];

        let unit_len = rest
            .chars()
            .take_while(|c| c.is_ascii_alphabetic())
            .count();
        let component = match &rest[..unit_len] {
            "ms" => Duration::from_millis(amount),
            "s" => Duration::from_secs(amount),
            "m" => Duration::from_secs(amount.saturating_mul(60)),
            "h" => Duration::from_secs(amount.saturating_mul(3600)),
            "" => return Err(invalid("missing unit")),
            _ => return Err(invalid("unknown unit")),
        };
        rest = &rest[unit_len..];
        total = total
            .checked_add(component)
            .ok_or_else(|| invalid("duration out of range"))?;
    }

    if total.is_zero() {
        return Err(invalid("must be greater than zero"));
    }
    Ok(total)
}

fn serialize_duration<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format!("{duration:?}"))
}
