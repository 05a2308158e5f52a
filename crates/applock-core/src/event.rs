use serde::{Deserialize, Serialize};

/// A normalized foreground change produced by the active detector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForegroundEvent {
    pub package_name: String,
    pub activity_class_name: String,
    pub timestamp_millis: i64,
}

impl ForegroundEvent {
    pub fn new(
        package_name: impl Into<String>,
        activity_class_name: impl Into<String>,
        timestamp_millis: i64,
    ) -> Self {
        Self {
            package_name: package_name.into(),
            activity_class_name: activity_class_name.into(),
            timestamp_millis,
        }
    }
}
