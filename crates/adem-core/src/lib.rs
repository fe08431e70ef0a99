//! Shared domain model for the adem breathing-biofeedback backend:
//! canonical signal records, session/device/technique documents, estimator
//! parameter sets, feedback rules and timestamp normalization.

pub mod device;
pub mod feedback_rules;
pub mod params;
pub mod record;
pub mod session;
pub mod technique;
pub mod time;

pub use device::{Device, DEFAULT_DEVICE_TYPE};
pub use feedback_rules::{Category, FeedbackCategory, FeedbackMessage, FeedbackRules, FeedbackSettings};
pub use params::{ParameterSet, DEFAULT_PARAM_VERSION};
pub use record::{
    BreathCycle, BreathTargetPayload, EcgPayload, GuidancePayload, HrDerivedPayload, RecordError,
    RecordIngest, RespRrPayload, SignalKind, SignalPayload, SignalRecord,
};
pub use session::{Session, SessionStatus};
pub use technique::{ProtocolRow, Technique};
pub use time::{format_dt_local, normalize_epoch_ms, now_epoch_ms};
