use std::ffi::OsStr;

use error_stack::Report;
use error_stack::ResultExt;
use nvml_wrapper::Nvml;
use tracing::info;
use tracing::warn;

use super::product_name;
use super::CudaVersion;
use super::DeviceManager;
use super::ResourceError;

const MIB: u64 = 1024 * 1024;

/// [`DeviceManager`] backed by an NVML-compatible management library.
pub struct NvmlManager {
    lib_path: String,
    nvml: Option<Nvml>,
}

impl NvmlManager {
    /// Creates a manager that loads the library from `lib_path` on `init`.
    pub fn new(lib_path: impl Into<String>) -> Self {
        Self {
            lib_path: lib_path.into(),
            nvml: None,
        }
    }

    fn nvml(&self) -> Result<&Nvml, Report<ResourceError>> {
        self.nvml
            .as_ref()
            .ok_or_else(|| Report::new(ResourceError::NotInitialized))
    }
}

impl DeviceManager for NvmlManager {
    fn init(&mut self) -> Result<(), Report<ResourceError>> {
        if self.nvml.is_some() {
            return Ok(());
        }

        let nvml = match Nvml::builder().lib_path(OsStr::new(&self.lib_path)).init() {
            Ok(nvml) => {
                info!("Management library {} initialized", self.lib_path);
                nvml
            }
            Err(e) => {
                warn!(
                    "Failed to load {}: {e}, trying the default library",
                    self.lib_path
                );
                Nvml::init().change_context(ResourceError::InitFailed {
                    message: format!("neither {} nor the default library could be loaded", self.lib_path),
                })?
            }
        };

        self.nvml = Some(nvml);
        Ok(())
    }

    fn shutdown(&mut self) -> Result<(), Report<ResourceError>> {
        match self.nvml.take() {
            Some(nvml) => nvml.shutdown().change_context(ResourceError::ShutdownFailed),
            None => Ok(()),
        }
    }

    fn device_count(&self) -> Result<u32, Report<ResourceError>> {
        self.nvml()?
            .device_count()
            .change_context(ResourceError::QueryFailed {
                what: "device count".to_string(),
            })
    }

    fn device_name(&self, index: u32) -> Result<String, Report<ResourceError>> {
        let query_failed = || ResourceError::QueryFailed {
            what: format!("name of device {index}"),
        };
        let raw = self
            .nvml()?
            .device_by_index(index)
            .change_context_lazy(query_failed)?
            .name()
            .change_context_lazy(query_failed)?;
        info!("Got name of device {index}: {raw}");

        Ok(product_name(&raw))
    }

    fn device_memory_mb(&self, index: u32) -> Result<u64, Report<ResourceError>> {
        let query_failed = || ResourceError::QueryFailed {
            what: format!("memory of device {index}"),
        };
        let memory = self
            .nvml()?
            .device_by_index(index)
            .change_context_lazy(query_failed)?
            .memory_info()
            .change_context_lazy(query_failed)?;

        Ok(memory.total / MIB)
    }

    fn driver_version(&self) -> Result<String, Report<ResourceError>> {
        let version = self
            .nvml()?
            .sys_driver_version()
            .change_context(ResourceError::QueryFailed {
                what: "driver version".to_string(),
            })?;
        info!("Got driver version: {version}");
        Ok(version)
    }

    fn cuda_runtime_version(&self) -> Result<CudaVersion, Report<ResourceError>> {
        let query_failed = || ResourceError::QueryFailed {
            what: "cuda runtime version".to_string(),
        };
        let encoded = self
            .nvml()?
            .sys_cuda_driver_version()
            .change_context_lazy(query_failed)?;
        let encoded = u32::try_from(encoded).change_context_lazy(query_failed)?;

        let version = CudaVersion::from_encoded(encoded);
        info!("Got cuda runtime version: {version}");
        Ok(version)
    }
}

impl Drop for NvmlManager {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("Failed to shutdown management library: {e:?}");
        }
    }
}
