//! Device query adapter.
//!
//! The labelers only see devices through [`DeviceManager`], so the hardware
//! library can be swapped for [`mock::MockDeviceManager`] in tests.

#[cfg(test)]
pub(crate) mod mock;
pub mod nvml;

use core::error::Error;

use error_stack::Report;

pub use nvml::NvmlManager;

/// Errors reported by the device query library.
#[derive(Debug, derive_more::Display)]
pub enum ResourceError {
    #[display("Failed to initialize device library: {message}")]
    InitFailed { message: String },
    #[display("Failed to shutdown device library")]
    ShutdownFailed,
    #[display("Device library is not initialized")]
    NotInitialized,
    #[display("Failed to query {what}")]
    QueryFailed { what: String },
}

impl Error for ResourceError {}

/// Runtime version reported by the device library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CudaVersion {
    pub major: u32,
    pub minor: u32,
}

impl CudaVersion {
    /// Decodes a version encoded as `major * 1000 + minor * 10`.
    pub fn from_encoded(version: u32) -> Self {
        Self {
            major: version / 1000,
            minor: version % 1000 / 10,
        }
    }
}

impl std::fmt::Display for CudaVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Capability set the labelers need from the device library.
///
/// Devices are addressed by index. Every query other than `init` requires a
/// prior successful `init`, and `shutdown` releases the library until the
/// next `init`.
pub trait DeviceManager: Send {
    fn init(&mut self) -> Result<(), Report<ResourceError>>;

    fn shutdown(&mut self) -> Result<(), Report<ResourceError>>;

    fn device_count(&self) -> Result<u32, Report<ResourceError>>;

    /// Product name with the vendor prefix removed.
    fn device_name(&self, index: u32) -> Result<String, Report<ResourceError>>;

    /// Total device memory in MiB.
    fn device_memory_mb(&self, index: u32) -> Result<u64, Report<ResourceError>>;

    /// Driver version in `X.Y[.Z]` form.
    fn driver_version(&self) -> Result<String, Report<ResourceError>>;

    fn cuda_runtime_version(&self) -> Result<CudaVersion, Report<ResourceError>>;
}

/// Strips the leading vendor token from a raw device name.
///
/// `"Iluvatar BI-V150S"` becomes `"BI-V150S"`. Any further tokens are joined
/// with `-` so the result is usable as a label value.
pub fn product_name(raw: &str) -> String {
    let tokens: Vec<&str> = raw.split_whitespace().collect();
    match tokens.as_slice() {
        [] => String::new(),
        [only] => (*only).to_string(),
        [_vendor, rest @ ..] => rest.join("-"),
    }
}
