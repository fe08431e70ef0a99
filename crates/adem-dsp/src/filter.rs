//! Butterworth band-pass design and zero-phase filtering.
//!
//! The QRS isolation step needs a 2nd-order Butterworth band-pass applied
//! forward and backward so the R-peak positions stay put (no group delay).
//! Design goes the classic route: analog low-pass prototype → low-pass to
//! band-pass transform → bilinear transform → transfer-function
//! coefficients. The forward-backward pass uses odd-signal edge extension
//! and steady-state initial conditions, so edge transients do not leak into
//! the window.

use rustfft::num_complex::Complex64;
use std::f64::consts::PI;

/// Transfer-function coefficients of the 2nd-order band-pass (4th-order
/// IIR after the band transform). `a[0]` is normalized to 1.
#[derive(Debug, Clone, Copy)]
pub struct BandpassCoeffs {
    pub b: [f64; 5],
    pub a: [f64; 5],
}

/// Design a digital 2nd-order Butterworth band-pass with corners
/// `low_hz`..`high_hz` at sampling rate `fs`.
pub fn butter_bandpass(low_hz: f64, high_hz: f64, fs: f64) -> BandpassCoeffs {
    let nyq = fs / 2.0;
    // Pre-warp the normalized corner frequencies for the bilinear transform
    // (internal sampling rate 2.0, so warped = 4·tan(π·wn/2)).
    let w1 = 4.0 * (PI * (low_hz / nyq) / 2.0).tan();
    let w2 = 4.0 * (PI * (high_hz / nyq) / 2.0).tan();
    let bw = w2 - w1;
    let wo = (w1 * w2).sqrt();

    // Analog low-pass prototype, order 2: poles on the unit circle at
    // 135° and 225°, no zeros, unit gain.
    let proto = [
        Complex64::from_polar(1.0, 3.0 * PI / 4.0),
        Complex64::from_polar(1.0, 5.0 * PI / 4.0),
    ];

    // Low-pass → band-pass: each prototype pole splits in two; the two
    // prototype zeros land at s = 0; gain picks up bw^degree.
    let mut poles = Vec::with_capacity(4);
    for p in proto {
        let p_scaled = p * (bw / 2.0);
        let shift = (p_scaled * p_scaled - Complex64::new(wo * wo, 0.0)).sqrt();
        poles.push(p_scaled + shift);
        poles.push(p_scaled - shift);
    }
    let zeros = vec![Complex64::new(0.0, 0.0); 2];
    let gain = bw * bw;

    // Bilinear transform at fs = 2 (matching the pre-warp above).
    let fs2 = 4.0;
    let z_zeros: Vec<Complex64> = zeros
        .iter()
        .map(|&z| (Complex64::new(fs2, 0.0) + z) / (Complex64::new(fs2, 0.0) - z))
        .collect();
    let z_poles: Vec<Complex64> = poles
        .iter()
        .map(|&p| (Complex64::new(fs2, 0.0) + p) / (Complex64::new(fs2, 0.0) - p))
        .collect();
    let num: Complex64 = zeros
        .iter()
        .map(|&z| Complex64::new(fs2, 0.0) - z)
        .product();
    let den: Complex64 = poles
        .iter()
        .map(|&p| Complex64::new(fs2, 0.0) - p)
        .product();
    let k = gain * (num / den).re;

    // Degree-2 deficit: the transform maps the missing analog zeros at
    // infinity to z = −1.
    let mut z_zeros = z_zeros;
    z_zeros.push(Complex64::new(-1.0, 0.0));
    z_zeros.push(Complex64::new(-1.0, 0.0));

    let mut b = poly(&z_zeros);
    for coeff in &mut b {
        *coeff *= k;
    }
    let a = poly(&z_poles);

    BandpassCoeffs {
        b: [b[0], b[1], b[2], b[3], b[4]],
        a: [a[0], a[1], a[2], a[3], a[4]],
    }
}

/// Expand a monic polynomial from its roots; imaginary parts cancel for
/// conjugate-paired roots, so only the real parts are returned.
fn poly(roots: &[Complex64]) -> Vec<f64> {
    let mut coeffs = vec![Complex64::new(1.0, 0.0)];
    for &r in roots {
        let mut next = vec![Complex64::new(0.0, 0.0); coeffs.len() + 1];
        for (i, &c) in coeffs.iter().enumerate() {
            next[i] += c;
            next[i + 1] -= c * r;
        }
        coeffs = next;
    }
    coeffs.iter().map(|c| c.re).collect()
}

/// Steady-state initial filter state for a step input of height 1
/// (direct form II transposed).
fn lfilter_zi(c: &BandpassCoeffs) -> [f64; 4] {
    // Solve (I − companionᵀ(a))·zi = b[1:] − a[1:]·b[0].
    let n = 4;
    let mut m = [[0.0f64; 4]; 4];
    for (i, row) in m.iter_mut().enumerate() {
        for (j, cell) in row.iter_mut().enumerate() {
            let companion_t = if j == 0 {
                -c.a[i + 1]
            } else if j == i + 1 {
                1.0
            } else {
                0.0
            };
            *cell = if i == j { 1.0 } else { 0.0 } - companion_t;
        }
    }
    let mut rhs = [0.0f64; 4];
    for i in 0..n {
        rhs[i] = c.b[i + 1] - c.a[i + 1] * c.b[0];
    }
    solve4(&mut m, &mut rhs);
    rhs
}

/// In-place Gaussian elimination with partial pivoting for the 4×4 system.
fn solve4(m: &mut [[f64; 4]; 4], rhs: &mut [f64; 4]) {
    let n = 4;
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| m[i][col].abs().total_cmp(&m[j][col].abs()))
            .unwrap_or(col);
        if pivot != col {
            m.swap(col, pivot);
            rhs.swap(col, pivot);
        }
        let diag = m[col][col];
        if diag.abs() < f64::EPSILON {
            continue;
        }
        for row in (col + 1)..n {
            let factor = m[row][col] / diag;
            for k in col..n {
                m[row][k] -= factor * m[col][k];
            }
            rhs[row] -= factor * rhs[col];
        }
    }
    for col in (0..n).rev() {
        let diag = m[col][col];
        if diag.abs() < f64::EPSILON {
            rhs[col] = 0.0;
            continue;
        }
        rhs[col] /= diag;
        for row in 0..col {
            rhs[row] -= m[row][col] * rhs[col];
        }
    }
}

/// Single-pass IIR filter, direct form II transposed, with initial state.
fn lfilter(c: &BandpassCoeffs, x: &[f64], zi: &[f64; 4]) -> Vec<f64> {
    let mut z = *zi;
    let mut y = Vec::with_capacity(x.len());
    for &xi in x {
        let yi = c.b[0] * xi + z[0];
        z[0] = c.b[1] * xi + z[1] - c.a[1] * yi;
        z[1] = c.b[2] * xi + z[2] - c.a[2] * yi;
        z[2] = c.b[3] * xi + z[3] - c.a[3] * yi;
        z[3] = c.b[4] * xi - c.a[4] * yi;
        y.push(yi);
    }
    y
}

/// Edge padding length for [`filtfilt`]: three times the filter order's
/// coefficient count.
pub const PAD_LEN: usize = 15;

/// Zero-phase forward-backward filtering with odd-signal edge extension.
///
/// Requires `x.len() > PAD_LEN`; shorter windows cannot be padded and the
/// caller treats them as not-enough-signal.
pub fn filtfilt(c: &BandpassCoeffs, x: &[f64]) -> Vec<f64> {
    debug_assert!(x.len() > PAD_LEN);
    let n = x.len();
    let first = x[0];
    let last = x[n - 1];

    let mut ext = Vec::with_capacity(n + 2 * PAD_LEN);
    for j in (1..=PAD_LEN).rev() {
        ext.push(2.0 * first - x[j]);
    }
    ext.extend_from_slice(x);
    for j in 1..=PAD_LEN {
        ext.push(2.0 * last - x[n - 1 - j]);
    }

    let zi = lfilter_zi(c);
    let scale = |zi: &[f64; 4], v: f64| [zi[0] * v, zi[1] * v, zi[2] * v, zi[3] * v];

    let mut y = lfilter(c, &ext, &scale(&zi, ext[0]));
    y.reverse();
    let mut y = lfilter(c, &y, &scale(&zi, y[0]));
    y.reverse();

    y[PAD_LEN..PAD_LEN + n].to_vec()
}
