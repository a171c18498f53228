use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayState {
    Rolling,
    Paused,
    #[default]
    Stopped,
}

/// Timing values supplied by the transport each cycle. The mix core only reads
/// these; it never drives the transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportState {
    pub play_state: PlayState,
    pub playhead_frame: i64,
    /// Set while exporting stems; channels excluded from the bounce are muted.
    pub bounce_mode: bool,
}

impl TransportState {
    #[must_use]
    pub fn is_rolling(&self) -> bool {
        self.play_state == PlayState::Rolling
    }

    #[must_use]
    pub fn rolling_at(frame: i64) -> Self {
        Self {
            play_state: PlayState::Rolling,
            playhead_frame: frame,
            bounce_mode: false,
        }
    }

    /// Advances the playhead after a cycle when rolling.
    pub fn advance(&mut self, nframes: u32) {
        if self.is_rolling() {
            self.playhead_frame += i64::from(nframes);
        }
    }
}

/// Frame window of one processing call.
///
/// `g_start_frame` is the timeline position of the first processed sample;
/// `local_offset` is where that sample sits inside the port buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessTime {
    pub g_start_frame: i64,
    pub local_offset: u32,
    pub nframes: u32,
}

impl ProcessTime {
    #[must_use]
    pub const fn new(g_start_frame: i64, local_offset: u32, nframes: u32) -> Self {
        Self {
            g_start_frame,
            local_offset,
            nframes,
        }
    }

    #[must_use]
    pub const fn whole_cycle(g_start_frame: i64, nframes: u32) -> Self {
        Self::new(g_start_frame, 0, nframes)
    }
}
