pub mod actions;
pub mod audio_pool;
pub mod config;
pub mod control;
pub mod control_room;
pub mod diagnostics;
pub mod dsp;
pub mod fader;
pub mod fingerprint;
pub mod fixtures;
pub mod math;
pub mod midi;
pub mod mixer;
pub mod port;
pub mod render;
pub mod settings;
pub mod solo;
pub mod track;
pub mod transport;

pub use actions::{
    ActionError, ActionSystem, Actions, EditTrackActionKind, EditValue, TrackEdit, UndoHistory,
};
pub use audio_pool::{AudioClip, AudioPool, PoolClipId};
pub use config::EngineConfig;
pub use control::{ControlKind, ControlRange, ControlValue};
pub use control_room::ControlRoom;
pub use diagnostics::{TelemetryGuard, audit_fader, init_tracing, init_tracing_with_options};
pub use dsp::{DspBackend, DspPreference, ScalarDsp, VectorDsp, select_backend};
pub use fader::{
    EventLog, Fader, FaderControls, FaderError, FaderEvent, FaderObserver, FaderPorts, FaderRole,
    ListenSource, MidiFaderMode, ProcessContext,
};
pub use fingerprint::{MixFingerprint, generate_fingerprint};
pub use midi::{MidiEvent, MidiEvents};
pub use mixer::{AddTrackRequest, ChannelStrip, Mixer, MixerError};
pub use render::{RenderedAudio, ToneSource, freeze_track, render_offline, write_wav};
pub use settings::{SettingsKey, SettingsStore, SharedSettings};
pub use solo::{SoloState, fader_implied_soloed, solo_map, track_implied_soloed};
pub use track::{TrackGraph, TrackGraphError, TrackHandle, TrackKind, TrackNode, TrackRegistry};
pub use transport::{PlayState, ProcessTime, TransportState};
