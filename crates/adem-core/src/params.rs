//! Estimator parameter sets.
//!
//! A parameter set is an immutable, versioned snapshot of every tunable the
//! RR/HR estimator consumes, plus the per-session ECG buffer length. Field
//! spellings match the stored documents and the tuning dashboard.

use serde::{Deserialize, Serialize};

/// Version used when a session does not name one.
pub const DEFAULT_PARAM_VERSION: &str = "v1_default";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    pub version: String,
    /// QRS band-pass corners (Hz).
    #[serde(rename = "BP_LOW_HZ")]
    pub bp_low_hz: f64,
    #[serde(rename = "BP_HIGH_HZ")]
    pub bp_high_hz: f64,
    /// Short (QRS-scale) moving-average window (seconds).
    #[serde(rename = "MWA_QRS_SEC")]
    pub mwa_qrs_sec: f64,
    /// Long (beat-scale) moving-average window (seconds).
    #[serde(rename = "MWA_BEAT_SEC")]
    pub mwa_beat_sec: f64,
    /// Minimum above-threshold segment duration (seconds).
    #[serde(rename = "MIN_SEG_SEC")]
    pub min_seg_sec: f64,
    /// Refractory period between accepted R-peaks (seconds).
    #[serde(rename = "MIN_RR_SEC")]
    pub min_rr_sec: f64,
    /// Half-width of the per-beat QRS stack (seconds).
    #[serde(rename = "QRS_HALF_SEC")]
    pub qrs_half_sec: f64,
    /// Spectral estimation window (beats).
    #[serde(rename = "HEARTBEAT_WINDOW")]
    pub heartbeat_window: usize,
    /// FFT size; rounded up to a power of two when the window is longer.
    #[serde(rename = "FFT_LENGTH")]
    pub fft_length: usize,
    /// Allowed respiratory band (cycles/beat).
    #[serde(rename = "FREQ_RANGE_CB")]
    pub freq_range_cb: [f64; 2],
    /// Median-smoothing window over per-beat BPM (beats).
    #[serde(rename = "SMOOTH_WIN")]
    pub smooth_win: usize,
    /// Respiratory clamp (breaths/minute).
    #[serde(rename = "BPM_MIN")]
    pub bpm_min: f64,
    #[serde(rename = "BPM_MAX")]
    pub bpm_max: f64,
    /// Harmonic-preference threshold.
    #[serde(rename = "HARMONIC_RATIO")]
    pub harmonic_ratio: f64,
    /// Sliding ECG buffer length per session (records, not samples).
    #[serde(rename = "BUFFER_SIZE")]
    pub buffer_size: usize,
    #[serde(default)]
    pub is_default: bool,
}

impl Default for ParameterSet {
    fn default() -> Self {
        Self {
            version: DEFAULT_PARAM_VERSION.to_owned(),
            bp_low_hz: 4.0,
            bp_high_hz: 20.0,
            mwa_qrs_sec: 0.12,
            mwa_beat_sec: 0.6,
            min_seg_sec: 0.08,
            min_rr_sec: 0.3,
            qrs_half_sec: 0.04,
            heartbeat_window: 32,
            fft_length: 512,
            freq_range_cb: [0.03, 0.5],
            smooth_win: 32,
            bpm_min: 4.0,
            bpm_max: 40.0,
            harmonic_ratio: 1.4,
            buffer_size: 200,
            is_default: true,
        }
    }
}
