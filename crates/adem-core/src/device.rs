//! Device documents. Devices are created on first observation (an ingest
//! request or an explicit registration) and tracked by `last_seen`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_DEVICE_TYPE: &str = "polar_h10";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub device_id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub device_type: String,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl Device {
    pub fn new(device_id: impl Into<String>, name: Option<String>, device_type: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            device_id: device_id.into(),
            name,
            device_type: device_type.unwrap_or_else(|| DEFAULT_DEVICE_TYPE.to_owned()),
            created_at: now,
            last_seen: now,
        }
    }
}
