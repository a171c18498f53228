//! Block-level buffer math used by the mix stages.
//!
//! Every operation works on caller-owned slices and never allocates. When two
//! slices are involved, the shorter length wins. [`ScalarDsp`] is the reference
//! behaviour; [`VectorDsp`] produces the same results (up to rounding) in
//! wider chunks and is only handed out after CPU capability detection.

use std::{fmt, sync::OnceLock};

use serde::{Deserialize, Serialize};

use crate::math::floats_equal;

const LANES: usize = 8;
const EQUAL_POWER_MONO_COEF: f32 = 0.7079;
const EQUAL_AMPLITUDE_MONO_COEF: f32 = 0.5;

pub trait DspBackend: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn fill(&self, buf: &mut [f32], value: f32) {
        buf.fill(value);
    }

    fn copy(&self, dest: &mut [f32], src: &[f32]) {
        for (out, sample) in dest.iter_mut().zip(src) {
            *out = *sample;
        }
    }

    fn scale(&self, dest: &mut [f32], k: f32) {
        for sample in dest {
            *sample *= k;
        }
    }

    fn clamp_in_place(&self, buf: &mut [f32], min: f32, max: f32) {
        for sample in buf {
            *sample = sample.clamp(min, max);
        }
    }

    /// Returns the larger of `current_peak` and the buffer's absolute maximum,
    /// plus whether that differs from `current_peak` beyond epsilon.
    fn abs_max(&self, buf: &[f32], current_peak: f32) -> (f32, bool) {
        let new_peak = buf
            .iter()
            .map(|sample| sample.abs())
            .fold(current_peak, f32::max);
        (new_peak, !floats_equal(new_peak, current_peak))
    }

    fn min(&self, buf: &[f32]) -> f32 {
        buf.iter().copied().fold(f32::INFINITY, f32::min)
    }

    fn max(&self, buf: &[f32]) -> f32 {
        buf.iter().copied().fold(f32::NEG_INFINITY, f32::max)
    }

    fn add_in_place(&self, dest: &mut [f32], src: &[f32]) {
        for (out, sample) in dest.iter_mut().zip(src) {
            *out += *sample;
        }
    }

    /// `dest[i] = dest[i] * k1 + src[i] * k2`
    fn mix_scaled(&self, dest: &mut [f32], src: &[f32], k1: f32, k2: f32) {
        for (out, sample) in dest.iter_mut().zip(src) {
            *out = *out * k1 + *sample * k2;
        }
    }

    /// `dest[i] += src1[i] * k1 + src2[i] * k2`
    fn mix_add_scaled(&self, dest: &mut [f32], src1: &[f32], src2: &[f32], k1: f32, k2: f32) {
        for ((out, a), b) in dest.iter_mut().zip(src1).zip(src2) {
            *out += *a * k1 + *b * k2;
        }
    }

    /// Ramps from exactly 0 on the first sample to exactly 1 on the last.
    fn linear_fade_in(&self, dest: &mut [f32]) {
        let last = fade_span(dest.len());
        for (index, sample) in dest.iter_mut().enumerate() {
            *sample *= (index as f32 / last).min(1.0);
        }
    }

    /// Ramps from exactly 1 on the first sample to exactly 0 on the last.
    fn linear_fade_out(&self, dest: &mut [f32]) {
        let last = fade_span(dest.len());
        for (index, sample) in dest.iter_mut().enumerate() {
            *sample *= ((last - index as f32) / last).max(0.0);
        }
    }

    /// Collapses stereo into identical content on both channels.
    ///
    /// Equal amplitude (-6 dB sum) suits mono compatibility checks; equal power
    /// sums at roughly -3 dB.
    fn make_mono(&self, l: &mut [f32], r: &mut [f32], equal_power: bool) {
        let coef = mono_coefficient(equal_power);
        for (left, right) in l.iter_mut().zip(r.iter_mut()) {
            let mono = coef * (*left + *right);
            *left = mono;
            *right = mono;
        }
    }
}

#[must_use]
pub fn mono_coefficient(equal_power: bool) -> f32 {
    if equal_power {
        EQUAL_POWER_MONO_COEF
    } else {
        EQUAL_AMPLITUDE_MONO_COEF
    }
}

/// Index of the last sample of a closed ramp. A single sample sits on the far end.
fn fade_span(len: usize) -> f32 {
    len.saturating_sub(1).max(1) as f32
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ScalarDsp;

impl DspBackend for ScalarDsp {
    fn name(&self) -> &'static str {
        "scalar"
    }
}

/// Chunked backend. Only obtainable through [`VectorDsp::detect`], which is
/// what makes the feature-gated kernels sound to call.
#[derive(Debug, Clone, Copy)]
pub struct VectorDsp {
    _detected: (),
}

impl VectorDsp {
    #[must_use]
    pub fn detect() -> Option<Self> {
        match simd_level() {
            SimdLevel::Scalar => None,
            SimdLevel::Avx | SimdLevel::Neon => Some(Self { _detected: () }),
        }
    }
}

impl DspBackend for VectorDsp {
    fn name(&self) -> &'static str {
        simd_level().name()
    }

    fn scale(&self, dest: &mut [f32], k: f32) {
        #[cfg(target_arch = "x86_64")]
        // SAFETY: a VectorDsp only exists after AVX was detected.
        unsafe {
            kernels::avx::scale(dest, k);
        }
        #[cfg(not(target_arch = "x86_64"))]
        kernels::scale(dest, k);
    }

    fn clamp_in_place(&self, buf: &mut [f32], min: f32, max: f32) {
        #[cfg(target_arch = "x86_64")]
        // SAFETY: see `scale`.
        unsafe {
            kernels::avx::clamp(buf, min, max);
        }
        #[cfg(not(target_arch = "x86_64"))]
        kernels::clamp(buf, min, max);
    }

    fn abs_max(&self, buf: &[f32], current_peak: f32) -> (f32, bool) {
        #[cfg(target_arch = "x86_64")]
        // SAFETY: see `scale`.
        let new_peak = unsafe { kernels::avx::abs_max(buf, current_peak) };
        #[cfg(not(target_arch = "x86_64"))]
        let new_peak = kernels::abs_max(buf, current_peak);
        (new_peak, !floats_equal(new_peak, current_peak))
    }

    fn add_in_place(&self, dest: &mut [f32], src: &[f32]) {
        self.mix_scaled(dest, src, 1.0, 1.0);
    }

    fn mix_scaled(&self, dest: &mut [f32], src: &[f32], k1: f32, k2: f32) {
        #[cfg(target_arch = "x86_64")]
        // SAFETY: see `scale`.
        unsafe {
            kernels::avx::mix_scaled(dest, src, k1, k2);
        }
        #[cfg(not(target_arch = "x86_64"))]
        kernels::mix_scaled(dest, src, k1, k2);
    }
}

mod kernels {
    use super::LANES;

    #[inline(always)]
    pub fn scale(dest: &mut [f32], k: f32) {
        let mut chunks = dest.chunks_exact_mut(LANES);
        for chunk in &mut chunks {
            for sample in chunk {
                *sample *= k;
            }
        }
        for sample in chunks.into_remainder() {
            *sample *= k;
        }
    }

    #[inline(always)]
    pub fn clamp(buf: &mut [f32], min: f32, max: f32) {
        let mut chunks = buf.chunks_exact_mut(LANES);
        for chunk in &mut chunks {
            for sample in chunk {
                *sample = sample.clamp(min, max);
            }
        }
        for sample in chunks.into_remainder() {
            *sample = sample.clamp(min, max);
        }
    }

    #[inline(always)]
    pub fn abs_max(buf: &[f32], current_peak: f32) -> f32 {
        let mut lanes = [current_peak; LANES];
        let chunks = buf.chunks_exact(LANES);
        let remainder = chunks.remainder();
        for chunk in chunks {
            for (lane, sample) in lanes.iter_mut().zip(chunk) {
                *lane = lane.max(sample.abs());
            }
        }
        let peak = lanes.iter().copied().fold(current_peak, f32::max);
        remainder
            .iter()
            .map(|sample| sample.abs())
            .fold(peak, f32::max)
    }

    #[inline(always)]
    pub fn mix_scaled(dest: &mut [f32], src: &[f32], k1: f32, k2: f32) {
        let len = dest.len().min(src.len());
        let (dest, src) = (&mut dest[..len], &src[..len]);
        let mut dest_chunks = dest.chunks_exact_mut(LANES);
        let mut src_chunks = src.chunks_exact(LANES);
        for (out, input) in (&mut dest_chunks).zip(&mut src_chunks) {
            for (sample, source) in out.iter_mut().zip(input) {
                *sample = *sample * k1 + *source * k2;
            }
        }
        for (sample, source) in dest_chunks
            .into_remainder()
            .iter_mut()
            .zip(src_chunks.remainder())
        {
            *sample = *sample * k1 + *source * k2;
        }
    }

    #[cfg(target_arch = "x86_64")]
    pub mod avx {
        #[target_feature(enable = "avx")]
        pub unsafe fn scale(dest: &mut [f32], k: f32) {
            super::scale(dest, k);
        }

        #[target_feature(enable = "avx")]
        pub unsafe fn clamp(buf: &mut [f32], min: f32, max: f32) {
            super::clamp(buf, min, max);
        }

        #[target_feature(enable = "avx")]
        pub unsafe fn abs_max(buf: &[f32], current_peak: f32) -> f32 {
            super::abs_max(buf, current_peak)
        }

        #[target_feature(enable = "avx")]
        pub unsafe fn mix_scaled(dest: &mut [f32], src: &[f32], k1: f32, k2: f32) {
            super::mix_scaled(dest, src, k1, k2);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimdLevel {
    Scalar,
    Avx,
    Neon,
}

impl SimdLevel {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Scalar => "scalar",
            Self::Avx => "avx",
            Self::Neon => "neon",
        }
    }
}

static DETECTED_SIMD_LEVEL: OnceLock<SimdLevel> = OnceLock::new();

#[must_use]
pub fn simd_level() -> SimdLevel {
    *DETECTED_SIMD_LEVEL.get_or_init(|| {
        #[cfg(target_arch = "x86_64")]
        {
            if is_x86_feature_detected!("avx") {
                return SimdLevel::Avx;
            }
            SimdLevel::Scalar
        }

        #[cfg(target_arch = "aarch64")]
        {
            SimdLevel::Neon
        }

        #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
        {
            SimdLevel::Scalar
        }
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DspPreference {
    #[default]
    Auto,
    Scalar,
    Vector,
}

static SCALAR: ScalarDsp = ScalarDsp;
static VECTOR: OnceLock<Option<VectorDsp>> = OnceLock::new();

/// Picks the backend once per engine start. `Vector` silently falls back to
/// scalar when the CPU lacks support.
#[must_use]
pub fn select_backend(preference: DspPreference) -> &'static dyn DspBackend {
    let vector = VECTOR.get_or_init(VectorDsp::detect).as_ref();
    match (preference, vector) {
        (DspPreference::Scalar, _) | (_, None) => &SCALAR,
        (DspPreference::Auto | DspPreference::Vector, Some(vector)) => vector,
    }
}

#[must_use]
pub fn scalar() -> &'static dyn DspBackend {
    &SCALAR
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fades_cross_to_unity() {
        let dsp = ScalarDsp;
        let mut fade_in = [1.0_f32; 16];
        let mut fade_out = [1.0_f32; 16];
        dsp.linear_fade_in(&mut fade_in);
        dsp.linear_fade_out(&mut fade_out);

        assert_eq!(fade_in[0], 0.0);
        assert_eq!(fade_in[15], 1.0);
        assert_eq!(fade_out[0], 1.0);
        assert_eq!(fade_out[15], 0.0);
        for (a, b) in fade_in.iter().zip(&fade_out) {
            assert!((a + b - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn min_max_of_buffer() {
        let dsp = ScalarDsp;
        let buf = [0.25, -0.75, 0.5];
        assert_eq!(dsp.min(&buf), -0.75);
        assert_eq!(dsp.max(&buf), 0.5);
    }

    #[test]
    fn scalar_preference_is_honoured() {
        assert_eq!(select_backend(DspPreference::Scalar).name(), "scalar");
    }
}
