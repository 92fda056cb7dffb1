//! Helpers shared by the feature discovery binaries.

pub mod logging;
pub mod version;
