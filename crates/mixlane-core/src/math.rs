use std::f64::consts::LN_2;

use tracing::error;

/// Display floor used instead of `-inf` for silent amplitudes.
pub const DBFS_FLOOR: f32 = -100.0;

/// Amplitudes at or below this are treated as silence.
pub const MIN_AUDIBLE_AMP: f32 = 0.000_01;

const FADER_COEFFICIENT1: f64 = 192.0 * LN_2;
const FADER_SLOPE: f64 = 198.0 * LN_2;

#[must_use]
pub fn floats_equal_epsilon(a: f32, b: f32, epsilon: f32) -> bool {
    (a - b).abs() < epsilon
}

#[must_use]
pub fn floats_equal(a: f32, b: f32) -> bool {
    floats_equal_epsilon(a, b, f32::EPSILON)
}

#[must_use]
pub fn amp_to_dbfs(amp: f32) -> f32 {
    if amp <= 0.0 || !amp.is_finite() {
        return DBFS_FLOOR;
    }

    (20.0 * amp.log10()).max(DBFS_FLOOR)
}

#[must_use]
pub fn dbfs_to_amp(dbfs: f32) -> f32 {
    if dbfs <= DBFS_FLOOR {
        return 0.0;
    }

    10_f32.powf(dbfs / 20.0)
}

/// Maps an amplitude (0.0 to 2.0) onto the normalized fader travel (0.0 to 1.0).
///
/// The curve puts unity gain at roughly 78% of the travel and +6 dB at the top.
/// [`amp_from_fader_val`] is its exact inverse.
#[must_use]
pub fn fader_val_from_amp(amp: f32) -> f32 {
    if amp <= MIN_AUDIBLE_AMP {
        return 0.0;
    }

    let base = (6.0 * f64::from(amp).ln() + FADER_COEFFICIENT1) / FADER_SLOPE;
    base.max(0.0).powi(8) as f32
}

#[must_use]
pub fn amp_from_fader_val(fader_val: f32) -> f32 {
    let fader_val = f64::from(fader_val.max(0.0));
    let exponent = (-192.0 + 198.0 * fader_val.powf(0.125)) / 6.0;
    2_f64.powf(exponent) as f32
}

/// Root mean square of the buffer, as amplitude.
#[must_use]
pub fn calculate_rms_amp(buf: &[f32]) -> f32 {
    if buf.is_empty() {
        return 0.0;
    }

    let sum: f32 = buf.iter().map(|sample| sample * sample).sum();
    (sum / buf.len() as f32).sqrt()
}

#[must_use]
pub fn calculate_rms_db(buf: &[f32]) -> f32 {
    amp_to_dbfs(calculate_rms_amp(buf))
}

/// Reports a non-finite value at critical level. Not real-time safe.
///
/// Returns whether the value is finite.
pub fn assert_finite(value: f32, what: &str) -> bool {
    if value.is_nan() {
        error!(what, "nan detected");
        return false;
    }
    if !value.is_finite() {
        error!(what, value, "inf detected");
        return false;
    }
    true
}
