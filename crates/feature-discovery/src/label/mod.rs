//! Label generation.
//!
//! Every source of labels implements [`LabelSource`]. Sources are composed
//! with [`merge`], where later sources override earlier ones on key
//! collision, so callers control precedence purely by ordering.

mod machine_type;
mod resource;
mod timestamp;
mod version;

use core::error::Error;
use std::collections::BTreeMap;

use error_stack::Report;
use error_stack::ResultExt;
use tracing::info;
use tracing::warn;

use crate::config::Flags;
use crate::resource::DeviceManager;

pub use machine_type::sanitise;
pub use machine_type::MachineTypeSource;
pub use machine_type::MACHINE_TYPE_UNKNOWN;
pub use resource::aggregate;
pub use resource::ProductGroup;
pub use resource::ResourceSource;
pub use timestamp::TimestampSource;
pub use version::DriverVersion;
pub use version::VersionSource;

/// Prefix of every label key produced by this crate.
pub const NODE_LABEL_PREFIX: &str = "iluvatar.com";

/// Label keys mapped to their values.
pub type Labels = BTreeMap<String, String>;

/// Errors raised while generating labels.
#[derive(Debug, derive_more::Display)]
pub enum LabelError {
    #[display("Failed to initialize device library")]
    DeviceLibrary,
    #[display("Failed to query {what}")]
    DeviceQuery { what: String },
    #[display("Version {version:?} does not match format \"X.Y[.Z]\"")]
    MalformedDriverVersion { version: String },
}

impl Error for LabelError {}

/// Produces a set of labels, or fails.
pub trait LabelSource {
    fn labels(&self) -> Result<Labels, Report<LabelError>>;
}

impl LabelSource for Labels {
    fn labels(&self) -> Result<Labels, Report<LabelError>> {
        Ok(self.clone())
    }
}

/// A source that contributes nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct Empty;

impl LabelSource for Empty {
    fn labels(&self) -> Result<Labels, Report<LabelError>> {
        Ok(Labels::new())
    }
}

/// Evaluates `sources` in order and merges their labels.
///
/// Labels later in the list overwrite earlier labels. The first failing
/// source aborts the merge and no partial result is returned.
pub fn merge(sources: &[&dyn LabelSource]) -> Result<Labels, Report<LabelError>> {
    let mut all_labels = Labels::new();
    for (index, source) in sources.iter().enumerate() {
        let labels = source
            .labels()
            .attach_printable_lazy(|| format!("label source #{index} failed"))?;
        all_labels.extend(labels);
    }
    Ok(all_labels)
}

/// Builds a fully qualified label key.
pub(crate) fn label_key(name: &str) -> String {
    format!("{NODE_LABEL_PREFIX}/{name}")
}

/// Generates the labels derived from the devices present on the node.
///
/// The device library is initialized for the duration of the call and shut
/// down before returning, whatever the outcome. A node without devices
/// yields no labels at all.
pub fn device_labels(
    manager: &mut dyn DeviceManager,
    flags: &Flags,
) -> Result<Labels, Report<LabelError>> {
    manager.init().change_context(LabelError::DeviceLibrary)?;

    let result = labels_from_devices(&*manager, flags);

    if let Err(e) = manager.shutdown() {
        warn!("Failed to shutdown device library: {e:?}");
    }
    result
}

fn labels_from_devices(
    manager: &dyn DeviceManager,
    flags: &Flags,
) -> Result<Labels, Report<LabelError>> {
    let count = manager
        .device_count()
        .change_context(LabelError::DeviceQuery {
            what: "device count".to_string(),
        })?;
    if count == 0 {
        info!("No devices found on this node");
        return Empty.labels();
    }

    let machine_type = MachineTypeSource::new(&flags.machine_type_file);
    let version = VersionSource::new(manager);
    let resource = ResourceSource::new(manager);

    merge(&[&machine_type, &version, &resource])
}
