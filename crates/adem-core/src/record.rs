//! Canonical signal records and the inbound record builder.
//!
//! Records arrive in a loose shape ([`RecordIngest`]: everything optional
//! except `signal`) and are normalized into the canonical [`SignalRecord`]
//! with an epoch-ms timestamp, a local `dt` string and a typed payload.
//! Wire field spellings are frozen (`estRR`, `TargetRR`, `in`) — they are
//! what the chest-strap clients and the dashboard already speak.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

use crate::time::{format_dt_local, normalize_epoch_ms};

/// The closed set of signal types the pipeline understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalKind {
    #[serde(rename = "ecg")]
    Ecg,
    #[serde(rename = "hr_derived")]
    HrDerived,
    #[serde(rename = "resp_rr")]
    RespRr,
    #[serde(rename = "guidance")]
    Guidance,
    #[serde(rename = "BreathTarget")]
    BreathTarget,
    #[serde(rename = "resp")]
    Resp,
    #[serde(rename = "marker")]
    Marker,
}

impl SignalKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ecg" => Some(Self::Ecg),
            "hr_derived" => Some(Self::HrDerived),
            "resp_rr" => Some(Self::RespRr),
            "guidance" => Some(Self::Guidance),
            "BreathTarget" => Some(Self::BreathTarget),
            "resp" => Some(Self::Resp),
            "marker" => Some(Self::Marker),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ecg => "ecg",
            Self::HrDerived => "hr_derived",
            Self::RespRr => "resp_rr",
            Self::Guidance => "guidance",
            Self::BreathTarget => "BreathTarget",
            Self::Resp => "resp",
            Self::Marker => "marker",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One breathing-protocol phase set, in seconds. The wire names `in` and
/// `out` are reserved words in several client languages but not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreathCycle {
    #[serde(rename = "in", default)]
    pub in_secs: u32,
    #[serde(default)]
    pub hold1: u32,
    #[serde(rename = "out", default)]
    pub out_secs: u32,
    #[serde(default)]
    pub hold2: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EcgPayload {
    pub samples: Vec<i16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HrDerivedPayload {
    pub bpm: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RespRrPayload {
    #[serde(rename = "estRR")]
    pub est_rr: f64,
    #[serde(default)]
    pub tijd: String,
    /// `""` or `"I"` — marks a detected inhale onset at this beat.
    #[serde(default)]
    pub inhale: String,
    /// `""` or `"E"` — marks a detected exhale onset at this beat.
    #[serde(default)]
    pub exhale: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuidancePayload {
    pub text: String,
    #[serde(default)]
    pub audio_text: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub target: f64,
    #[serde(default)]
    pub actual: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreathTargetPayload {
    #[serde(rename = "TargetRR")]
    pub target_rr: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breath_cycle: Option<BreathCycle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub technique: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_param_version: Option<String>,
}

/// Signal-specific payload. Serializes flat (the variant's fields end up at
/// the record's top level); deserialization always goes through
/// [`SignalPayload::from_json`] so the kind is never guessed from shape.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum SignalPayload {
    Ecg(EcgPayload),
    HrDerived(HrDerivedPayload),
    RespRr(RespRrPayload),
    Guidance(GuidancePayload),
    BreathTarget(BreathTargetPayload),
    /// `resp` and `marker` records: free-form fields, carried verbatim.
    Open(Map<String, Value>),
}

impl SignalPayload {
    /// Rebuild a typed payload from a JSON document of a known kind
    /// (storage read-back, or the normalized fields of an inbound record).
    pub fn from_json(kind: SignalKind, value: Value) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            SignalKind::Ecg => Self::Ecg(serde_json::from_value(value)?),
            SignalKind::HrDerived => Self::HrDerived(serde_json::from_value(value)?),
            SignalKind::RespRr => Self::RespRr(serde_json::from_value(value)?),
            SignalKind::Guidance => Self::Guidance(serde_json::from_value(value)?),
            SignalKind::BreathTarget => Self::BreathTarget(serde_json::from_value(value)?),
            SignalKind::Resp | SignalKind::Marker => Self::Open(match value {
                Value::Object(map) => map,
                _ => Map::new(),
            }),
        })
    }

    /// The payload as a standalone JSON document (what lands in storage).
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Map::new()))
    }
}

/// Canonical record flowing through persistence and fan-out.
#[derive(Debug, Clone, Serialize)]
pub struct SignalRecord {
    pub device_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    pub signal: SignalKind,
    /// Epoch milliseconds.
    pub ts: i64,
    /// `DD-MM-YYYY HH:MM:SS:mmm`, server local time.
    pub dt: String,
    #[serde(flatten)]
    pub payload: SignalPayload,
}

impl SignalRecord {
    pub fn kind(&self) -> SignalKind {
        self.signal
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("unknown signal kind `{0}`")]
    UnknownSignal(String),
    #[error("ecg record carries no samples")]
    EmptySamples,
    #[error("invalid {kind} payload: {source}")]
    Payload {
        kind: SignalKind,
        #[source]
        source: serde_json::Error,
    },
}

/// Inbound record as the clients send it: only `signal` is required, every
/// other field is optional and unrecognized extras are kept for the open
/// payload kinds.
#[derive(Debug, Clone, Deserialize)]
pub struct RecordIngest {
    pub signal: String,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub ts: Option<serde_json::Number>,
    #[serde(default)]
    pub session_id: Option<Uuid>,
    #[serde(default)]
    pub samples: Option<Vec<i16>>,
    #[serde(default)]
    pub bpm: Option<f64>,
    #[serde(default, rename = "estRR")]
    pub est_rr: Option<f64>,
    #[serde(default)]
    pub tijd: Option<String>,
    #[serde(default)]
    pub inhale: Option<String>,
    #[serde(default)]
    pub exhale: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub audio_text: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub target: Option<f64>,
    #[serde(default)]
    pub actual: Option<f64>,
    #[serde(default, rename = "TargetRR")]
    pub target_rr: Option<f64>,
    #[serde(default)]
    pub breath_cycle: Option<BreathCycle>,
    #[serde(default)]
    pub technique: Option<String>,
    #[serde(default)]
    pub active_param_version: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RecordIngest {
    /// Raw timestamp as an integer, tolerating both integer and float JSON
    /// numbers (floats are truncated, matching what the clients intend).
    fn raw_ts(&self) -> Option<i64> {
        let n = self.ts.as_ref()?;
        if let Some(i) = n.as_i64() {
            return Some(i);
        }
        let f = n.as_f64()?;
        f.is_finite().then_some(f.trunc() as i64)
    }

    /// The record's timestamp normalized to epoch-ms (falls back to the
    /// supplied wall clock). The same value `into_record` will stamp.
    pub fn normalized_ts(&self, now_ms: i64) -> i64 {
        normalize_epoch_ms(self.raw_ts(), now_ms)
    }

    /// Normalize into the canonical record. `session_id` is the device's
    /// active session (the record's own id, when present, wins).
    pub fn into_record(
        self,
        now_ms: i64,
        session_id: Option<Uuid>,
    ) -> Result<SignalRecord, RecordError> {
        let kind = SignalKind::parse(&self.signal)
            .ok_or_else(|| RecordError::UnknownSignal(self.signal.clone()))?;
        let ts = normalize_epoch_ms(self.raw_ts(), now_ms);
        let dt = format_dt_local(ts);
        let device_id = self
            .device_id
            .clone()
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| "UNKNOWN".to_owned());
        let session_id = self.session_id.or(session_id);

        if kind == SignalKind::Ecg && self.samples.as_ref().map_or(true, |s| s.is_empty()) {
            return Err(RecordError::EmptySamples);
        }

        let payload = SignalPayload::from_json(kind, Value::Object(self.payload_fields()))
            .map_err(|source| RecordError::Payload { kind, source })?;

        Ok(SignalRecord {
            device_id,
            session_id,
            signal: kind,
            ts,
            dt,
            payload,
        })
    }

    /// Collect the signal-specific fields that were actually present.
    fn payload_fields(self) -> Map<String, Value> {
        fn put<T: Serialize>(map: &mut Map<String, Value>, key: &str, v: Option<T>) {
            if let Some(v) = v {
                if let Ok(json) = serde_json::to_value(v) {
                    map.insert(key.to_owned(), json);
                }
            }
        }

        let mut map = self.extra;
        put(&mut map, "samples", self.samples);
        put(&mut map, "bpm", self.bpm);
        put(&mut map, "estRR", self.est_rr);
        put(&mut map, "tijd", self.tijd);
        put(&mut map, "inhale", self.inhale);
        put(&mut map, "exhale", self.exhale);
        put(&mut map, "text", self.text);
        put(&mut map, "audio_text", self.audio_text);
        put(&mut map, "color", self.color);
        put(&mut map, "target", self.target);
        put(&mut map, "actual", self.actual);
        put(&mut map, "TargetRR", self.target_rr);
        put(&mut map, "breath_cycle", self.breath_cycle);
        put(&mut map, "technique", self.technique);
        put(&mut map, "active_param_version", self.active_param_version);
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000_000;

    fn ingest(json: &str) -> RecordIngest {
        serde_json::from_str(json).expect("valid ingest json")
    }

    #[test]
    fn ecg_record_builds_with_typed_samples() {
        let rec = ingest(r#"{"signal":"ecg","device_id":"H10A","ts":1700000000,"samples":[1,-2,3]}"#);
        let record = rec.into_record(NOW, None).unwrap();
        assert_eq!(record.device_id, "H10A");
        assert_eq!(record.signal, SignalKind::Ecg);
        assert_eq!(record.ts, 1_700_000_000_000);
        match &record.payload {
            SignalPayload::Ecg(p) => assert_eq!(p.samples, vec![1, -2, 3]),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn ecg_without_samples_is_rejected() {
        let rec = ingest(r#"{"signal":"ecg","device_id":"H10A"}"#);
        assert!(matches!(
            rec.into_record(NOW, None),
            Err(RecordError::EmptySamples)
        ));
        let rec = ingest(r#"{"signal":"ecg","device_id":"H10A","samples":[]}"#);
        assert!(matches!(
            rec.into_record(NOW, None),
            Err(RecordError::EmptySamples)
        ));
    }

    #[test]
    fn unknown_signal_is_rejected() {
        let rec = ingest(r#"{"signal":"telemetry"}"#);
        assert!(matches!(
            rec.into_record(NOW, None),
            Err(RecordError::UnknownSignal(s)) if s == "telemetry"
        ));
    }

    #[test]
    fn breath_target_parses_phase_fields() {
        let rec = ingest(
            r#"{"signal":"BreathTarget","device_id":"H10A","TargetRR":6.0,
                "technique":"Box6","breath_cycle":{"in":4,"hold1":4,"out":4,"hold2":4}}"#,
        );
        let record = rec.into_record(NOW, None).unwrap();
        match &record.payload {
            SignalPayload::BreathTarget(p) => {
                assert_eq!(p.target_rr, 6.0);
                assert_eq!(p.technique.as_deref(), Some("Box6"));
                let cycle = p.breath_cycle.unwrap();
                assert_eq!((cycle.in_secs, cycle.hold1, cycle.out_secs, cycle.hold2), (4, 4, 4, 4));
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn missing_device_id_defaults_to_unknown() {
        let rec = ingest(r#"{"signal":"marker","label":"start"}"#);
        let record = rec.into_record(NOW, None).unwrap();
        assert_eq!(record.device_id, "UNKNOWN");
        match &record.payload {
            SignalPayload::Open(map) => assert_eq!(map["label"], "start"),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn serialization_is_flat_with_wire_names() {
        let record = SignalRecord {
            device_id: "H10A".to_owned(),
            session_id: None,
            signal: SignalKind::RespRr,
            ts: 1_700_000_000_000,
            dt: "14-11-2023 23:13:20:000".to_owned(),
            payload: SignalPayload::RespRr(RespRrPayload {
                est_rr: 6.2,
                tijd: "00:00:01.000 UTC".to_owned(),
                inhale: String::new(),
                exhale: "E".to_owned(),
            }),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["signal"], "resp_rr");
        assert_eq!(json["estRR"], 6.2);
        assert_eq!(json["exhale"], "E");
        assert!(json.get("session_id").is_none());
        assert!(json.get("payload").is_none(), "payload must flatten");
    }

    #[test]
    fn float_timestamps_are_truncated_then_normalized() {
        let rec = ingest(r#"{"signal":"marker","ts":1700000000.75}"#);
        let record = rec.into_record(NOW, None).unwrap();
        assert_eq!(record.ts, 1_700_000_000_000);
    }

    #[test]
    fn payload_roundtrips_through_storage_json() {
        let payload = SignalPayload::Guidance(GuidancePayload {
            text: "Perfect ritme!".to_owned(),
            audio_text: "Perfect ritme".to_owned(),
            color: "ok".to_owned(),
            target: 6.0,
            actual: 6.1,
        });
        let json = payload.to_json();
        let back = SignalPayload::from_json(SignalKind::Guidance, json).unwrap();
        match back {
            SignalPayload::Guidance(p) => {
                assert_eq!(p.text, "Perfect ritme!");
                assert_eq!(p.actual, 6.1);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }
}
