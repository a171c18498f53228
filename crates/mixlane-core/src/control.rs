use std::sync::atomic::Ordering;

use atomic_float::AtomicF32;
use serde::{Deserialize, Serialize};

use crate::math::{amp_from_fader_val, fader_val_from_amp};

const TOGGLE_THRESHOLD: f32 = 0.001;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlKind {
    /// Linear gain; normalized through the perceptual fader curve.
    Amplitude,
    /// Stereo balance, 0.5 is center.
    Balance,
    Toggle,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControlRange {
    pub min: f32,
    pub max: f32,
    pub default: f32,
}

impl ControlRange {
    #[must_use]
    pub fn clamp(&self, value: f32) -> f32 {
        value.clamp(self.min, self.max)
    }
}

/// A bounded scalar written by the control thread and read by the audio thread.
///
/// The stored value is always inside the range; non-finite writes are dropped.
#[derive(Debug)]
pub struct ControlValue {
    kind: ControlKind,
    range: ControlRange,
    value: AtomicF32,
}

impl ControlValue {
    #[must_use]
    pub fn new(kind: ControlKind, range: ControlRange) -> Self {
        Self {
            kind,
            range,
            value: AtomicF32::new(range.clamp(range.default)),
        }
    }

    #[must_use]
    pub fn amplitude(default: f32) -> Self {
        Self::new(
            ControlKind::Amplitude,
            ControlRange {
                min: 0.0,
                max: 2.0,
                default,
            },
        )
    }

    #[must_use]
    pub fn balance() -> Self {
        Self::new(
            ControlKind::Balance,
            ControlRange {
                min: 0.0,
                max: 1.0,
                default: 0.5,
            },
        )
    }

    #[must_use]
    pub fn toggle() -> Self {
        Self::new(
            ControlKind::Toggle,
            ControlRange {
                min: 0.0,
                max: 1.0,
                default: 0.0,
            },
        )
    }

    #[must_use]
    pub fn kind(&self) -> ControlKind {
        self.kind
    }

    #[must_use]
    pub fn range(&self) -> ControlRange {
        self.range
    }

    #[inline]
    #[must_use]
    pub fn get(&self) -> f32 {
        self.value.load(Ordering::Acquire)
    }

    /// Stores `value` clamped to the range and returns what was stored.
    pub fn set(&self, value: f32) -> f32 {
        if !value.is_finite() {
            return self.get();
        }
        let clamped = self.range.clamp(value);
        self.value.store(clamped, Ordering::Release);
        clamped
    }

    pub fn reset(&self) {
        self.value.store(self.range.default, Ordering::Release);
    }

    #[must_use]
    pub fn is_toggled(&self) -> bool {
        self.get() > TOGGLE_THRESHOLD
    }

    pub fn set_toggled(&self, toggled: bool) {
        self.set(if toggled { self.range.max } else { self.range.min });
    }

    #[must_use]
    pub fn normalized(&self) -> f32 {
        self.normalize(self.get())
    }

    pub fn set_normalized(&self, normalized: f32) -> f32 {
        self.set(self.denormalize(normalized))
    }

    #[must_use]
    pub fn normalize(&self, real: f32) -> f32 {
        let real = self.range.clamp(real);
        match self.kind {
            ControlKind::Amplitude => fader_val_from_amp(real),
            ControlKind::Toggle => {
                if real > TOGGLE_THRESHOLD {
                    1.0
                } else {
                    0.0
                }
            }
            ControlKind::Balance | ControlKind::Linear => {
                let span = self.range.max - self.range.min;
                if span <= 0.0 {
                    0.0
                } else {
                    (real - self.range.min) / span
                }
            }
        }
    }

    #[must_use]
    pub fn denormalize(&self, normalized: f32) -> f32 {
        let normalized = normalized.clamp(0.0, 1.0);
        let real = match self.kind {
            ControlKind::Amplitude => amp_from_fader_val(normalized),
            ControlKind::Toggle => {
                if normalized >= 0.5 {
                    self.range.max
                } else {
                    self.range.min
                }
            }
            ControlKind::Balance | ControlKind::Linear => {
                self.range.min + normalized * (self.range.max - self.range.min)
            }
        };
        self.range.clamp(real)
    }
}

impl Clone for ControlValue {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            range: self.range,
            value: AtomicF32::new(self.get()),
        }
    }
}
