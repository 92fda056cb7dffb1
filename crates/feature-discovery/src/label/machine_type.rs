use std::fs;
use std::path::PathBuf;

use error_stack::Report;
use error_stack::ResultExt;
use tracing::info;
use tracing::warn;

use super::label_key;
use super::LabelError;
use super::LabelSource;
use super::Labels;

/// Value used when the machine type cannot be determined.
pub const MACHINE_TYPE_UNKNOWN: &str = "unknown";

#[derive(Debug, derive_more::Display)]
#[display("Could not read machine type file {path:?}")]
struct MachineTypeReadError {
    path: PathBuf,
}

impl core::error::Error for MachineTypeReadError {}

/// Labels the node with its sanitised DMI product name.
///
/// A missing or unreadable file never fails labeling; the machine type is
/// reported as [`MACHINE_TYPE_UNKNOWN`] instead.
#[derive(Debug, Clone)]
pub struct MachineTypeSource {
    path: PathBuf,
}

impl MachineTypeSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn machine_type(&self) -> Result<String, Report<MachineTypeReadError>> {
        if self.path.as_os_str().is_empty() {
            return Ok(MACHINE_TYPE_UNKNOWN.to_string());
        }
        let data = fs::read_to_string(&self.path).change_context_lazy(|| MachineTypeReadError {
            path: self.path.clone(),
        })?;
        Ok(data.trim().to_string())
    }
}

impl LabelSource for MachineTypeSource {
    fn labels(&self) -> Result<Labels, Report<LabelError>> {
        let machine_type = self.machine_type().unwrap_or_else(|e| {
            warn!("Error getting machine type: {e:?}");
            MACHINE_TYPE_UNKNOWN.to_string()
        });

        let machine_type = sanitise(&machine_type);
        info!("Got machine type: {machine_type}");

        Ok(Labels::from([(label_key("gpu.machine"), machine_type)]))
    }
}

/// Strips characters outside `[A-Za-z0-9-_. ]` and replaces each run of
/// blanks with a single `-`.
pub fn sanitise(input: &str) -> String {
    let kept: String = input
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ' '))
        .collect();
    kept.split_whitespace().collect::<Vec<_>>().join("-")
}
