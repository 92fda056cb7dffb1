use error_stack::Report;
use error_stack::ResultExt;

use super::label_key;
use super::LabelError;
use super::LabelSource;
use super::Labels;
use crate::resource::DeviceManager;

/// Labels the node with the driver and runtime versions.
pub struct VersionSource<'a> {
    manager: &'a dyn DeviceManager,
}

/// Components of a driver version string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverVersion {
    pub major: String,
    pub minor: String,
    /// Empty when the version has only two components.
    pub revision: String,
}

impl DriverVersion {
    /// Splits `X.Y[.Z]` into its components.
    pub fn parse(version: &str) -> Result<Self, Report<LabelError>> {
        let malformed = || {
            Report::new(LabelError::MalformedDriverVersion {
                version: version.to_string(),
            })
        };

        let parts: Vec<&str> = version.split('.').collect();
        match parts.as_slice() {
            [major, minor] => Ok(Self {
                major: major.to_string(),
                minor: minor.to_string(),
                revision: String::new(),
            }),
            [major, minor, revision] => Ok(Self {
                major: major.to_string(),
                minor: minor.to_string(),
                revision: revision.to_string(),
            }),
            _ => Err(malformed()),
        }
    }
}

impl<'a> VersionSource<'a> {
    pub fn new(manager: &'a dyn DeviceManager) -> Self {
        Self { manager }
    }
}

impl LabelSource for VersionSource<'_> {
    fn labels(&self) -> Result<Labels, Report<LabelError>> {
        let driver_version =
            self.manager
                .driver_version()
                .change_context(LabelError::DeviceQuery {
                    what: "driver version".to_string(),
                })?;
        let driver = DriverVersion::parse(&driver_version)?;

        let cuda = self
            .manager
            .cuda_runtime_version()
            .change_context(LabelError::DeviceQuery {
                what: "cuda runtime version".to_string(),
            })?;

        Ok(Labels::from([
            (label_key("ix.driver-version.full"), driver_version),
            (label_key("ix.driver-version.major"), driver.major),
            (label_key("ix.driver-version.minor"), driver.minor),
            (label_key("ix.driver-version.revision"), driver.revision),
            (label_key("cuda.runtime-version.full"), cuda.to_string()),
            (label_key("cuda.runtime-version.major"), cuda.major.to_string()),
            (label_key("cuda.runtime-version.minor"), cuda.minor.to_string()),
        ]))
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;
    use crate::resource::mock::FailOn;
    use crate::resource::mock::MockDeviceManager;

    #[test]
    fn parse_two_component_version() {
        let version = DriverVersion::parse("3.5").unwrap();
        assert_eq!(version.major, "3");
        assert_eq!(version.minor, "5");
        assert_eq!(version.revision, "");
    }

    #[test]
    fn parse_three_component_version() {
        let version = DriverVersion::parse("3.5.2").unwrap();
        assert_eq!(
            version,
            DriverVersion {
                major: "3".to_string(),
                minor: "5".to_string(),
                revision: "2".to_string(),
            }
        );
    }

    #[test]
    fn reject_malformed_versions() {
        for version in ["3", "1.2.3.4", ""] {
            let err = DriverVersion::parse(version).unwrap_err();
            assert!(matches!(
                err.current_context(),
                LabelError::MalformedDriverVersion { .. }
            ));
        }
    }

    #[test]
    fn version_labels() {
        let mut manager = MockDeviceManager::new(&[("BI-V150S", 32768)]).with_driver_version("3.5");
        manager.init().unwrap();

        let labels = VersionSource::new(&manager).labels().unwrap();

        assert_eq!(labels.len(), 7);
        assert_eq!(labels["iluvatar.com/ix.driver-version.full"], "3.5");
        assert_eq!(labels["iluvatar.com/ix.driver-version.revision"], "");
        assert_eq!(labels["iluvatar.com/cuda.runtime-version.full"], "10.2");
        assert_eq!(labels["iluvatar.com/cuda.runtime-version.major"], "10");
        assert_eq!(labels["iluvatar.com/cuda.runtime-version.minor"], "2");
    }

    #[test]
    fn driver_version_query_failure() {
        let mut manager =
            MockDeviceManager::new(&[("BI-V150S", 32768)]).failing_on(FailOn::DriverVersion);
        manager.init().unwrap();

        let err = VersionSource::new(&manager).labels().unwrap_err();
        assert!(matches!(
            err.current_context(),
            LabelError::DeviceQuery { .. }
        ));
    }
}
