use std::collections::BTreeMap;

use error_stack::Report;
use error_stack::ResultExt;
use tracing::info;
use tracing::warn;

use super::label_key;
use super::merge;
use super::LabelError;
use super::LabelSource;
use super::Labels;
use crate::resource::DeviceManager;

/// Devices sharing one product name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProductGroup {
    pub count: usize,
    /// Memory in MiB of the last device seen with this name.
    pub memory_mb: u64,
}

/// Groups per-device `(name, memory)` readings by product name.
///
/// Devices of one product are assumed to be identical, so the memory of the
/// last device read wins without cross-checking the others.
pub fn aggregate<I>(devices: I) -> BTreeMap<String, ProductGroup>
where
    I: IntoIterator<Item = (String, u64)>,
{
    let mut groups: BTreeMap<String, ProductGroup> = BTreeMap::new();
    for (name, memory_mb) in devices {
        let group = groups.entry(name).or_insert(ProductGroup {
            count: 0,
            memory_mb,
        });
        group.count += 1;
        group.memory_mb = memory_mb;
    }
    groups
}

/// Labels the node with the product, count and memory of its devices.
pub struct ResourceSource<'a> {
    manager: &'a dyn DeviceManager,
}

impl<'a> ResourceSource<'a> {
    pub fn new(manager: &'a dyn DeviceManager) -> Self {
        Self { manager }
    }

    fn read_devices(&self) -> Result<Vec<(String, u64)>, Report<LabelError>> {
        let count = self
            .manager
            .device_count()
            .change_context(LabelError::DeviceQuery {
                what: "device count".to_string(),
            })?;

        (0..count)
            .map(|index| -> Result<(String, u64), Report<LabelError>> {
                let name = self.manager.device_name(index).change_context_lazy(|| {
                    LabelError::DeviceQuery {
                        what: format!("name of device {index}"),
                    }
                })?;
                let memory_mb = self.manager.device_memory_mb(index).change_context_lazy(|| {
                    LabelError::DeviceQuery {
                        what: format!("memory of device {index}"),
                    }
                })?;
                info!("Got memory of device {name}: {memory_mb} (MB)");
                Ok((name, memory_mb))
            })
            .collect()
    }
}

impl LabelSource for ResourceSource<'_> {
    fn labels(&self) -> Result<Labels, Report<LabelError>> {
        let devices = self.read_devices()?;
        if devices.is_empty() {
            return Ok(Labels::new());
        }

        let groups = aggregate(devices);
        if groups.len() > 1 {
            let names: Vec<&str> = groups.keys().map(String::as_str).collect();
            warn!("Multiple device types detected: {names:?}");
        }

        let group_labels: Vec<Labels> = groups
            .iter()
            .map(|(name, group)| {
                Labels::from([
                    (label_key("gpu.product"), name.clone()),
                    (label_key("gpu.count"), group.count.to_string()),
                    (label_key("gpu.memory"), group.memory_mb.to_string()),
                ])
            })
            .collect();
        let sources: Vec<&dyn LabelSource> = group_labels
            .iter()
            .map(|labels| labels as &dyn LabelSource)
            .collect();

        merge(&sources)
    }
}
