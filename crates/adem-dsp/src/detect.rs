//! R-peak detection on the band-passed ECG.
//!
//! Gating follows the two-scale envelope scheme: a short rectified moving
//! average (QRS-width) crossing above a long one (beat-width) marks
//! candidate QRS segments; the band-passed maximum inside each long-enough
//! segment is the provisional R-peak, subject to a refractory period.
//! Peaks are then hill-climbed on the raw signal so they sit on the true
//! sample apex rather than a filter artifact.

use crate::EstimatorConfig;

/// Rectified moving average with a growing prefix: before the window fills,
/// the divisor is the number of samples seen (`i + 1`), not the window.
pub fn moving_abs_mean(x: &[f64], win: usize) -> Vec<f64> {
    let win = win.max(1);
    let mut y = vec![0.0; x.len()];
    let mut acc = 0.0;
    for (i, v) in x.iter().enumerate() {
        acc += v.abs();
        if i >= win {
            acc -= x[i - win].abs();
            y[i] = acc / win as f64;
        } else {
            y[i] = acc / (i + 1) as f64;
        }
    }
    y
}

/// Detect R-peak indices in the band-passed signal `filtered`.
pub fn detect_r_peaks(filtered: &[f64], fs: f64, cfg: &EstimatorConfig) -> Vec<usize> {
    let w_qrs = ((cfg.mwa_qrs_sec * fs).round() as usize).max(1);
    let w_beat = ((cfg.mwa_beat_sec * fs).round() as usize).max(1);
    let mwa_qrs = moving_abs_mean(filtered, w_qrs);
    let mwa_beat = moving_abs_mean(filtered, w_beat);

    let min_seg = (cfg.min_seg_sec * fs).round() as usize;
    let refractory = (cfg.min_rr_sec * fs).round() as usize;

    let in_qrs: Vec<bool> = mwa_qrs
        .iter()
        .zip(&mwa_beat)
        .map(|(q, b)| q > b)
        .collect();

    let mut peaks: Vec<usize> = Vec::new();
    let mut onset: Option<usize> = None;
    for i in 1..in_qrs.len() {
        if onset.is_none() && !in_qrs[i - 1] && in_qrs[i] {
            onset = Some(i);
        } else if let Some(on) = onset {
            if in_qrs[i - 1] && !in_qrs[i] {
                let off = i - 1;
                if off - on > min_seg {
                    let apex = on + argmax(&filtered[on..=off]);
                    if peaks.last().map_or(true, |&last| apex - last > refractory) {
                        peaks.push(apex);
                    }
                }
                onset = None;
            }
        }
    }
    peaks
}

/// Walk each peak uphill on the raw (median-subtracted) signal: left while
/// the left neighbor is higher, then right while the right neighbor is.
pub fn refine_r_peaks(raw: &[f64], peaks: &[usize]) -> Vec<usize> {
    peaks
        .iter()
        .map(|&p| {
            let mut i = p;
            if i == 0 || i >= raw.len() - 1 {
                return i;
            }
            while i > 0 && raw[i] < raw[i - 1] {
                i -= 1;
            }
            while i < raw.len() - 1 && raw[i] < raw[i + 1] {
                i += 1;
            }
            i
        })
        .collect()
}

/// Per-beat RMS of the band-passed QRS stack: the ECG-derived respiration
/// (EDR) series. Stack windows are clamped at the signal boundaries.
pub fn qrs_stack_rms(filtered: &[f64], peaks: &[usize], fs: f64, cfg: &EstimatorConfig) -> Vec<f64> {
    let half = (cfg.qrs_half_sec * fs).round() as isize;
    let n = filtered.len() as isize;
    peaks
        .iter()
        .map(|&rp| {
            let rp = rp as isize;
            let mut sum_sq = 0.0;
            let len = 2 * half + 1;
            for off in -half..=half {
                let idx = (rp + off).clamp(0, n - 1);
                let v = filtered[idx as usize];
                sum_sq += v * v;
            }
            (sum_sq / len as f64).sqrt()
        })
        .collect()
}

/// Successive R-peak spacings in milliseconds.
pub fn rr_intervals_ms(peaks: &[usize], fs: f64) -> Vec<f64> {
    peaks
        .windows(2)
        .map(|w| 1000.0 * (w[1] - w[0]) as f64 / fs)
        .collect()
}

fn argmax(x: &[f64]) -> usize {
    let mut best = 0;
    for (i, v) in x.iter().enumerate() {
        if *v > x[best] {
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{butter_bandpass, filtfilt};

    #[test]
    fn moving_abs_mean_divides_prefix_by_count() {
        let y = moving_abs_mean(&[1.0, 2.0, 3.0, 4.0, 5.0], 2);
        assert_eq!(y, vec![1.0, 1.5, 2.5, 3.5, 4.5]);
    }

    #[test]
    fn moving_abs_mean_rectifies() {
        let y = moving_abs_mean(&[-3.0, 3.0, -3.0], 3);
        assert_eq!(y, vec![3.0, 3.0, 3.0]);
    }

    /// A 1 Hz train of narrow pulses at 130 Hz sampling: one peak per
    /// second, spaced 130 samples apart.
    fn pulse_train(seconds: usize, fs: usize) -> Vec<f64> {
        let n = seconds * fs;
        let mut x = vec![0.0; n];
        for beat in 0..seconds {
            let center = beat * fs + fs / 2;
            for k in 0..9 {
                let idx = center + k - 4;
                if idx < n {
                    // Narrow triangular pulse, QRS-like width (~60 ms).
                    let w = 1.0 - (k as f64 - 4.0).abs() / 5.0;
                    x[idx] = 800.0 * w;
                }
            }
        }
        x
    }

    #[test]
    fn detects_one_peak_per_pulse() {
        let fs = 130.0;
        let cfg = EstimatorConfig::default();
        let raw = pulse_train(10, 130);
        let coeffs = butter_bandpass(cfg.bp_low_hz, cfg.bp_high_hz, fs);
        let filtered = filtfilt(&coeffs, &raw);

        let peaks = detect_r_peaks(&filtered, fs, &cfg);
        assert!(
            (9..=10).contains(&peaks.len()),
            "expected ~10 peaks, got {}",
            peaks.len()
        );
        for pair in peaks.windows(2) {
            let spacing = pair[1] - pair[0];
            assert!(
                (125..=135).contains(&spacing),
                "irregular spacing {spacing}"
            );
        }
    }

    #[test]
    fn refinement_climbs_to_the_raw_apex() {
        let fs = 130.0;
        let cfg = EstimatorConfig::default();
        let raw = pulse_train(10, 130);
        let coeffs = butter_bandpass(cfg.bp_low_hz, cfg.bp_high_hz, fs);
        let filtered = filtfilt(&coeffs, &raw);

        let peaks = refine_r_peaks(&raw, &detect_r_peaks(&filtered, fs, &cfg));
        for p in peaks {
            // Apexes sit at beat*130 + 65 by construction.
            assert_eq!((p as i64 - 65).rem_euclid(130), 0, "apex off at {p}");
        }
    }

    #[test]
    fn refractory_suppresses_close_pairs() {
        let fs = 130.0;
        let cfg = EstimatorConfig::default();
        let mut raw = pulse_train(10, 130);
        // Add an echo pulse 20 samples (~150 ms) after each beat — inside
        // the 300 ms refractory window.
        let echo: Vec<usize> = (0..10).map(|b| b * 130 + 85).collect();
        for center in echo {
            for k in 0..9 {
                let idx = center + k - 4;
                if idx < raw.len() {
                    let w = 1.0 - (k as f64 - 4.0).abs() / 5.0;
                    raw[idx] += 700.0 * w;
                }
            }
        }
        let coeffs = butter_bandpass(cfg.bp_low_hz, cfg.bp_high_hz, fs);
        let filtered = filtfilt(&coeffs, &raw);
        let peaks = detect_r_peaks(&filtered, fs, &cfg);
        for pair in peaks.windows(2) {
            assert!(pair[1] - pair[0] > 39, "refractory violated: {pair:?}");
        }
    }

    #[test]
    fn rr_intervals_convert_to_ms() {
        let rr = rr_intervals_ms(&[0, 130, 260, 455], 130.0);
        assert_eq!(rr, vec![1000.0, 1000.0, 1500.0]);
    }

    #[test]
    fn stack_rms_tracks_beat_amplitude() {
        let fs = 130.0;
        let cfg = EstimatorConfig::default();
        let mut raw = pulse_train(10, 130);
        // Scale alternate beats down; their stack RMS must come out lower.
        for beat in (0..10).step_by(2) {
            for idx in beat * 130..(beat + 1) * 130 {
                raw[idx] *= 0.5;
            }
        }
        let coeffs = butter_bandpass(cfg.bp_low_hz, cfg.bp_high_hz, fs);
        let filtered = filtfilt(&coeffs, &raw);
        let peaks = refine_r_peaks(&raw, &detect_r_peaks(&filtered, fs, &cfg));
        let rms = qrs_stack_rms(&filtered, &peaks, fs, &cfg);
        assert!(rms.len() >= 8);
        for pair in rms.windows(2) {
            let ratio = pair[0].max(pair[1]) / pair[0].min(pair[1]);
            assert!(ratio > 1.3, "alternating amplitude not visible: {pair:?}");
        }
    }
}
