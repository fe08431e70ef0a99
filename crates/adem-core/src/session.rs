//! Session and device documents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::params::DEFAULT_PARAM_VERSION;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Completed,
    Cancelled,
}

impl SessionStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One guided-breathing session. At most one session per device is
/// `active`; `ended_at` is set exactly when the status leaves `active`.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub session_id: Uuid,
    pub device_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub technique_name: Option<String>,
    pub param_version: String,
    pub target_rr: Option<f64>,
    pub status: SessionStatus,
    /// Monotonic watermark over derived-record timestamps (epoch ms);
    /// −1 until the first derived record is emitted.
    pub last_emitted_ts: i64,
}

impl Session {
    pub fn new(
        device_id: impl Into<String>,
        technique_name: Option<String>,
        target_rr: Option<f64>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            device_id: device_id.into(),
            started_at,
            ended_at: None,
            technique_name,
            param_version: DEFAULT_PARAM_VERSION.to_owned(),
            target_rr,
            status: SessionStatus::Active,
            last_emitted_ts: -1,
        }
    }

    pub fn duration_seconds(&self) -> Option<f64> {
        let ended = self.ended_at?;
        Some((ended - self.started_at).num_milliseconds() as f64 / 1000.0)
    }
}
