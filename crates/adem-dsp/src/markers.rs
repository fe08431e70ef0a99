//! Inhale/exhale phase markers on the EDR trace.
//!
//! The per-beat EDR amplitude rises and falls with the breathing cycle, so
//! its smoothed, detrended extrema mark the phase turns: maxima → exhale
//! (`"E"`), minima → inhale (`"I"`). Smoothing and spacing adapt to the
//! currently estimated respiratory period so slow protocols are not
//! over-segmented and fast ones are not smeared flat.

use crate::detect::moving_abs_mean;
use crate::peaks::find_peaks;
use crate::spectral::hann;
use crate::stats::{nanmedian, percentile};

pub struct BreathMarkers {
    /// `""` or `"I"` per beat.
    pub inhale: Vec<String>,
    /// `""` or `"E"` per beat.
    pub exhale: Vec<String>,
}

impl BreathMarkers {
    fn empty(n: usize) -> Self {
        Self {
            inhale: vec![String::new(); n],
            exhale: vec![String::new(); n],
        }
    }
}

/// Mark breath phases given the EDR series, the smoothed per-beat BPM
/// estimate `sm` and the RR intervals. Fewer than 10 EDR samples carry too
/// little of a cycle to segment; everything stays unmarked.
pub fn mark_breath_phases(rms: &[f64], sm: &[f64], rr_ms: &[f64]) -> BreathMarkers {
    let mut markers = BreathMarkers::empty(sm.len());
    if rms.len() < 10 {
        return markers;
    }

    // Respiratory period from the tail of the smoothed estimate; fall back
    // to 10 breaths/min when the estimate is missing or degenerate.
    let tail = if sm.len() >= 20 {
        &sm[sm.len() - 20..]
    } else {
        sm
    };
    let mut est_resp_bpm = nanmedian(tail);
    if est_resp_bpm.is_nan() || est_resp_bpm <= 3.0 {
        est_resp_bpm = 10.0;
    }

    let mut avg_rr_sec = if rr_ms.is_empty() {
        0.8
    } else {
        nanmedian(rr_ms) / 1000.0
    };
    if avg_rr_sec <= 0.3 {
        avg_rr_sec = 0.8;
    }

    let cycle_sec = 60.0 / est_resp_bpm;
    let target_smooth_sec = (cycle_sec * 0.25).clamp(0.6, 2.0);
    let mut smooth_beats = ((target_smooth_sec / avg_rr_sec) as usize).max(3);
    if smooth_beats % 2 == 0 {
        smooth_beats += 1;
    }

    let mut window = hann(smooth_beats);
    let sum: f64 = window.iter().sum();
    for w in &mut window {
        *w /= sum;
    }
    let rms_smooth = convolve_same(rms, &window);

    let trend_win = ((cycle_sec * 2.0 / avg_rr_sec) as usize).max(30);
    let trend = moving_abs_mean(&rms_smooth, trend_win);
    let detrended: Vec<f64> = rms_smooth.iter().zip(&trend).map(|(s, t)| s - t).collect();

    let min_dist = ((cycle_sec * 0.4 / avg_rr_sec) as usize).max(1);
    let spread = percentile(&detrended, 95.0) - percentile(&detrended, 5.0);
    let min_prom = (spread * 0.15).max(0.001);

    for p in find_peaks(&detrended, min_dist, min_prom) {
        if p < markers.exhale.len() {
            markers.exhale[p] = "E".to_owned();
        }
    }
    let negated: Vec<f64> = detrended.iter().map(|v| -v).collect();
    for p in find_peaks(&negated, min_dist, min_prom) {
        if p < markers.inhale.len() {
            markers.inhale[p] = "I".to_owned();
        }
    }
    markers
}

/// `convolve(x, kernel)` trimmed to `x`'s length, centered (odd kernels).
fn convolve_same(x: &[f64], kernel: &[f64]) -> Vec<f64> {
    let n = x.len();
    let m = kernel.len();
    let offset = (m - 1) / 2;
    let mut out = vec![0.0; n];
    for (i, slot) in out.iter_mut().enumerate() {
        let full_idx = i + offset;
        let mut acc = 0.0;
        for (j, &w) in kernel.iter().enumerate() {
            if let Some(xi) = full_idx.checked_sub(j) {
                if xi < n {
                    acc += x[xi] * w;
                }
            }
        }
        *slot = acc;
    }
    out
}
