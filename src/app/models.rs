use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceSummary {
    pub serial: String,
    pub state: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FrameNotification {
    pub line: String,
    pub observed_at: DateTime<Utc>,
}

impl FrameNotification {
    pub fn new(line: impl Into<String>) -> Self {
        Self {
            line: line.into(),
            observed_at: Utc::now(),
        }
    }
}

/// Value of the `policy_control` global setting before the driver touched it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyControl {
    Unset,
    Value(String),
}
