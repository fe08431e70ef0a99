//! Per-beat spectral respiratory-rate estimation.
//!
//! The EDR series is sampled once per heartbeat, so its natural frequency
//! unit is cycles/beat. A windowed power spectrum of the trailing EDR
//! section is searched inside the physiologic band (translated from
//! breaths/minute through the median RR interval), the winning bin is
//! refined by parabolic interpolation, and obvious harmonic confusions are
//! corrected by comparing spectral mass at half and double the winner.

use rustfft::{num_complex::Complex64, FftPlanner};

use crate::stats::median;
use crate::EstimatorConfig;

/// Symmetric Hann window of length `n`.
pub fn hann(n: usize) -> Vec<f64> {
    if n == 1 {
        return vec![1.0];
    }
    let denom = (n - 1) as f64;
    (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * std::f64::consts::PI * i as f64 / denom).cos())
        .collect()
}

/// Refine a spectral peak at bin `i` with a three-point parabola. Returns
/// the interpolated bin position; border bins return unchanged.
pub fn parabolic_interp(y: &[f64], i: usize) -> f64 {
    if i == 0 || i + 1 >= y.len() {
        return i as f64;
    }
    let (y0, y1, y2) = (y[i - 1], y[i], y[i + 1]);
    let denom = 2.0 * (2.0 * y1 - y0 - y2);
    if denom == 0.0 {
        return i as f64;
    }
    i as f64 + (y0 - y2) / denom
}

/// One-sided power spectrum of `x` zero-padded to `nfft`; bin `k` sits at
/// `k / nfft` cycles per sample.
fn power_spectrum(x: &[f64], nfft: usize) -> Vec<f64> {
    let mut buf: Vec<Complex64> = x.iter().map(|&v| Complex64::new(v, 0.0)).collect();
    buf.resize(nfft, Complex64::new(0.0, 0.0));

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(nfft);
    fft.process(&mut buf);

    buf[..=nfft / 2].iter().map(Complex64::norm_sqr).collect()
}

/// Estimate breaths/minute from one trailing EDR `section` and the median
/// RR interval of the matching beats. NaN when the section is too short,
/// the RR median is not finite, or the allowed band is empty.
pub fn estimate_bpm_from_section(section: &[f64], rr_med_ms: f64, cfg: &EstimatorConfig) -> f64 {
    if !rr_med_ms.is_finite() || section.len() < 4 {
        return f64::NAN;
    }

    let mean = section.iter().sum::<f64>() / section.len() as f64;
    let window = hann(section.len());
    let detrended: Vec<f64> = section
        .iter()
        .zip(&window)
        .map(|(v, w)| (v - mean) * w)
        .collect();

    let mut nfft = cfg.fft_length;
    if nfft < detrended.len() {
        nfft = detrended.len().next_power_of_two();
    }
    let ps = power_spectrum(&detrended, nfft);
    let bin_hz = 1.0 / nfft as f64; // cycles/beat per bin

    let beats_per_min = 60_000.0 / rr_med_ms;
    let fmin = cfg.freq_range_cb[0].max(cfg.bpm_min / beats_per_min);
    let fmax = cfg.freq_range_cb[1].min(cfg.bpm_max / beats_per_min);
    if fmin >= fmax {
        return f64::NAN;
    }

    let lo = (fmin / bin_hz).ceil() as usize;
    let hi = ((fmax / bin_hz).floor() as usize).min(ps.len() - 1);
    if lo > hi {
        return f64::NAN;
    }

    let k0 = (lo..=hi)
        .max_by(|&a, &b| ps[a].total_cmp(&ps[b]))
        .unwrap_or(lo);
    let refined = parabolic_interp(&ps, k0).clamp(lo as f64, hi as f64);
    let f0_cb = refined * bin_hz;
    let mut bpm = f0_cb * beats_per_min;

    // Harmonic correction: strong mass at 2·f0 means we locked onto the
    // sub-harmonic; strong mass at f0/2 means we locked onto a harmonic.
    let ps_at = |freq_cb: f64| -> f64 {
        if freq_cb <= 0.0 || freq_cb >= 0.5 {
            return 0.0;
        }
        let k = ((freq_cb / bin_hz).round() as usize).min(ps.len() - 1);
        ps[k]
    };
    let ps_f = ps_at(f0_cb).max(1e-12);
    let ps_double = ps_at((2.0 * f0_cb).min(0.5));
    let ps_half = ps_at((0.5 * f0_cb).max(cfg.freq_range_cb[0]));

    if ps_double > cfg.harmonic_ratio * ps_f {
        let doubled = 2.0 * bpm;
        if (cfg.bpm_min..=cfg.bpm_max).contains(&doubled) {
            bpm = doubled;
        }
    } else if ps_half > cfg.harmonic_ratio * ps_f {
        let halved = 0.5 * bpm;
        if (cfg.bpm_min..=cfg.bpm_max).contains(&halved) {
            bpm = halved;
        }
    }
    bpm
}

/// The per-beat BPM series over the whole EDR trace: each beat looks back
/// over at most `heartbeat_window` EDR samples and the matching RR medians.
pub fn per_beat_bpm(rms: &[f64], rr_ms: &[f64], cfg: &EstimatorConfig) -> Vec<f64> {
    let h = cfg.heartbeat_window;
    (0..rms.len())
        .map(|i| {
            let (section, rr_med) = if i < h {
                let rr_med = if i > 0 && !rr_ms.is_empty() {
                    median(&rr_ms[..i.min(rr_ms.len())])
                } else {
                    f64::NAN
                };
                (&rms[..i], rr_med)
            } else {
                let start = i.saturating_sub(h + 1);
                let stop = i - 1;
                let slice = if stop > start {
                    &rr_ms[start.min(rr_ms.len())..stop.min(rr_ms.len())]
                } else {
                    &rr_ms[..i.min(rr_ms.len())]
                };
                let rr_med = if slice.is_empty() {
                    f64::NAN
                } else {
                    median(slice)
                };
                (&rms[i - h..i], rr_med)
            };
            estimate_bpm_from_section(section, rr_med, cfg)
        })
        .collect()
}
