use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info};

use crate::{
    fader::{Fader, FaderRole},
    settings::{SettingsKey, SharedSettings},
};

/// Gain sources for the monitor section: the level applied to muted channels,
/// the level listened channels are mixed in at, and the dim level.
#[derive(Debug)]
pub struct ControlRoom {
    mute_fader: Fader,
    listen_fader: Fader,
    dim_fader: Fader,
    dim_output: AtomicBool,
}

impl Default for ControlRoom {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ControlRoom {
    /// Gains start from `settings` (or the stock defaults) and are written back
    /// whenever a fader moves through `set_fader_val`.
    #[must_use]
    pub fn new(settings: Option<&SharedSettings>) -> Self {
        let room = Self {
            mute_fader: gain_fader(settings, SettingsKey::MuteVol),
            listen_fader: gain_fader(settings, SettingsKey::ListenVol),
            dim_fader: gain_fader(settings, SettingsKey::DimVol),
            dim_output: AtomicBool::new(false),
        };
        info!(
            mute = room.mute_gain(),
            listen = room.listen_gain(),
            dim = room.dim_gain(),
            "control room ready"
        );
        room
    }

    #[must_use]
    pub fn mute_fader(&self) -> &Fader {
        &self.mute_fader
    }

    #[must_use]
    pub fn listen_fader(&self) -> &Fader {
        &self.listen_fader
    }

    #[must_use]
    pub fn dim_fader(&self) -> &Fader {
        &self.dim_fader
    }

    #[inline]
    #[must_use]
    pub fn mute_gain(&self) -> f32 {
        self.mute_fader.controls().amp()
    }

    #[inline]
    #[must_use]
    pub fn listen_gain(&self) -> f32 {
        self.listen_fader.controls().amp()
    }

    #[inline]
    #[must_use]
    pub fn dim_gain(&self) -> f32 {
        self.dim_fader.controls().amp()
    }

    #[must_use]
    pub fn dim_output(&self) -> bool {
        self.dim_output.load(Ordering::Acquire)
    }

    pub fn set_dim_output(&self, dim: bool) {
        self.dim_output.store(dim, Ordering::Release);
        debug!(dim, "dim output toggled");
    }
}

fn gain_fader(settings: Option<&SharedSettings>, key: SettingsKey) -> Fader {
    let fader = Fader::new(FaderRole::Generic, None, false, 0);
    let controls = fader.controls();
    match settings {
        Some(settings) => {
            controls.set_amp(settings.lock().get(key));
            controls.bind_setting(settings.clone(), key);
        }
        None => {
            controls.set_amp(key.default_value());
        }
    }
    fader
}
