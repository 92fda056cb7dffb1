use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use error_stack::Report;

use super::label_key;
use super::LabelError;
use super::LabelSource;
use super::Labels;

/// Labels the node with the time the current configuration took effect.
///
/// The time is captured when the source is built, once per configuration
/// epoch, so re-polling devices does not change it.
#[derive(Debug, Clone)]
pub struct TimestampSource {
    labels: Labels,
}

impl TimestampSource {
    pub fn new(disabled: bool, at: SystemTime) -> Self {
        let mut labels = Labels::new();
        if !disabled {
            let secs = at
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default();
            labels.insert(label_key("ix.timestamp"), secs.to_string());
        }
        Self { labels }
    }

    pub fn now(disabled: bool) -> Self {
        Self::new(disabled, SystemTime::now())
    }
}

impl LabelSource for TimestampSource {
    fn labels(&self) -> Result<Labels, Report<LabelError>> {
        Ok(self.labels.clone())
    }
}
