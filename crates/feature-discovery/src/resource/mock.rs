//! In-memory [`DeviceManager`] for tests.

use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use error_stack::Report;

use super::CudaVersion;
use super::DeviceManager;
use super::ResourceError;

/// Which query the mock should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOn {
    Init,
    DeviceCount,
    DeviceName,
    DeviceMemory,
    DriverVersion,
    CudaVersion,
}

#[derive(Debug, Clone)]
pub struct MockDeviceManager {
    pub devices: Vec<(String, u64)>,
    pub driver_version: String,
    pub cuda_version: CudaVersion,
    pub fail_on: Option<FailOn>,
    pub init_calls: Arc<AtomicUsize>,
    pub shutdown_calls: Arc<AtomicUsize>,
    initialized: bool,
}

impl MockDeviceManager {
    pub fn new(devices: &[(&str, u64)]) -> Self {
        Self {
            devices: devices
                .iter()
                .map(|(name, memory)| (name.to_string(), *memory))
                .collect(),
            driver_version: "4.1.0".to_string(),
            cuda_version: CudaVersion {
                major: 10,
                minor: 2,
            },
            fail_on: None,
            init_calls: Arc::new(AtomicUsize::new(0)),
            shutdown_calls: Arc::new(AtomicUsize::new(0)),
            initialized: false,
        }
    }

    pub fn with_driver_version(mut self, version: &str) -> Self {
        self.driver_version = version.to_string();
        self
    }

    pub fn failing_on(mut self, fail_on: FailOn) -> Self {
        self.fail_on = Some(fail_on);
        self
    }

    pub fn init_count(&self) -> usize {
        self.init_calls.load(Ordering::SeqCst)
    }

    pub fn shutdown_count(&self) -> usize {
        self.shutdown_calls.load(Ordering::SeqCst)
    }

    fn check(&self, query: FailOn) -> Result<(), Report<ResourceError>> {
        if !self.initialized {
            return Err(Report::new(ResourceError::NotInitialized));
        }
        if self.fail_on == Some(query) {
            return Err(Report::new(ResourceError::QueryFailed {
                what: format!("{query:?}"),
            }));
        }
        Ok(())
    }

    fn device(&self, index: u32) -> Result<&(String, u64), Report<ResourceError>> {
        self.devices
            .get(index as usize)
            .ok_or_else(|| {
                Report::new(ResourceError::QueryFailed {
                    what: format!("device {index}"),
                })
            })
    }
}

impl DeviceManager for MockDeviceManager {
    fn init(&mut self) -> Result<(), Report<ResourceError>> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_on == Some(FailOn::Init) {
            return Err(Report::new(ResourceError::InitFailed {
                message: "mock init failure".to_string(),
            }));
        }
        self.initialized = true;
        Ok(())
    }

    fn shutdown(&mut self) -> Result<(), Report<ResourceError>> {
        self.shutdown_calls.fetch_add(1, Ordering::SeqCst);
        self.initialized = false;
        Ok(())
    }

    fn device_count(&self) -> Result<u32, Report<ResourceError>> {
        self.check(FailOn::DeviceCount)?;
        Ok(self.devices.len() as u32)
    }

    fn device_name(&self, index: u32) -> Result<String, Report<ResourceError>> {
        self.check(FailOn::DeviceName)?;
        Ok(self.device(index)?.0.clone())
    }

    fn device_memory_mb(&self, index: u32) -> Result<u64, Report<ResourceError>> {
        self.check(FailOn::DeviceMemory)?;
        Ok(self.device(index)?.1)
    }

    fn driver_version(&self) -> Result<String, Report<ResourceError>> {
        self.check(FailOn::DriverVersion)?;
        Ok(self.driver_version.clone())
    }

    fn cuda_runtime_version(&self) -> Result<CudaVersion, Report<ResourceError>> {
        self.check(FailOn::CudaVersion)?;
        Ok(self.cuda_version)
    }
}
