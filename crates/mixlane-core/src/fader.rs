use std::{
    collections::VecDeque,
    fmt,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicU8, AtomicUsize, Ordering},
    },
};

use atomic_float::AtomicF32;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::{
    actions::{ActionError, ActionSystem, EditTrackActionKind},
    audio_pool::AudioPool,
    control::ControlValue,
    control_room::ControlRoom,
    dsp::DspBackend,
    math::{
        MIN_AUDIBLE_AMP, amp_from_fader_val, amp_to_dbfs, fader_val_from_amp,
        floats_equal, floats_equal_epsilon,
    },
    port::{ControlPort, EventPort, PortFlags, PortFlow, PortOwner, StereoPorts, frame_range},
    settings::{SettingsKey, SharedSettings},
    solo,
    track::{SignalKind, TrackGraph, TrackHandle},
    transport::{ProcessTime, TransportState},
};

pub const DEFAULT_DENORMAL_PREVENTION_VAL: f32 = 1e-12;
const HARD_LIMIT: f32 = 2.0;
const AMP_EDIT_EPSILON: f32 = 0.0001;
const NO_TRACK: usize = usize::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaderRole {
    AudioChannel,
    MidiChannel,
    Monitor,
    SampleProcessor,
    /// Gain source only; carries controls but no signal ports.
    Generic,
}

impl FaderRole {
    #[must_use]
    pub const fn is_channel(self) -> bool {
        matches!(self, Self::AudioChannel | Self::MidiChannel)
    }

    #[must_use]
    pub const fn carries_audio(self) -> bool {
        matches!(
            self,
            Self::AudioChannel | Self::Monitor | Self::SampleProcessor
        )
    }

    #[must_use]
    pub const fn for_signal(signal: SignalKind) -> Self {
        match signal {
            SignalKind::Audio => Self::AudioChannel,
            SignalKind::Midi => Self::MidiChannel,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MidiFaderMode {
    /// Note-on velocities are multiplied by the fader amplitude.
    #[default]
    VelocityMultiplier,
    /// Volume as channel CC 7. Tracked but not emitted yet.
    CcVolume,
}

impl MidiFaderMode {
    #[must_use]
    pub const fn as_index(self) -> i32 {
        match self {
            Self::VelocityMultiplier => 0,
            Self::CcVolume => 1,
        }
    }

    #[must_use]
    pub const fn from_index(index: i32) -> Option<Self> {
        match index {
            0 => Some(Self::VelocityMultiplier),
            1 => Some(Self::CcVolume),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum FaderError {
    #[error("fader has no associated track")]
    NoTrack,
    #[error("{message}: {source}")]
    Action {
        message: &'static str,
        #[source]
        source: ActionError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum FaderEvent {
    MuteChanged { track: TrackHandle, muted: bool },
    SoloChanged { track: TrackHandle, soloed: bool },
    ListenChanged { track: TrackHandle, listened: bool },
    MonoCompatChanged { track: TrackHandle, enabled: bool },
    MidiModeChanged {
        track: Option<TrackHandle>,
        mode: MidiFaderMode,
    },
}

/// Receives state-change notifications from fader setters on the control thread.
pub trait FaderObserver: Send + Sync + fmt::Debug {
    fn on_fader_event(&self, event: FaderEvent);
}

const DEFAULT_EVENT_LOG_CAPACITY: usize = 1024;

/// Observer that keeps the most recent events until drained. Once full, the
/// oldest event is dropped for each new one.
#[derive(Debug)]
pub struct EventLog {
    events: Mutex<VecDeque<FaderEvent>>,
    capacity: usize,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_EVENT_LOG_CAPACITY)
    }
}

impl EventLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn drain(&self) -> Vec<FaderEvent> {
        self.events.lock().drain(..).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl FaderObserver for EventLog {
    fn on_fader_event(&self, event: FaderEvent) {
        let mut events = self.events.lock();
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }
}

/// Linear balance law: 0.5 leaves both sides at unity, the far ends silence
/// the opposite side.
#[must_use]
pub fn balance_gains(balance: f32) -> (f32, f32) {
    let calc_l = if balance > 0.5 { (1.0 - balance) * 2.0 } else { 1.0 };
    let calc_r = if balance < 0.5 { balance * 2.0 } else { 1.0 };
    (calc_l, calc_r)
}

/// Every value a fader exposes, shared between the audio-side [`Fader`] and
/// whatever edits it on the control thread.
#[derive(Debug)]
pub struct FaderControls {
    role: FaderRole,
    passthrough: bool,
    track: AtomicUsize,
    amp: ControlPort,
    balance: ControlPort,
    mute: ControlPort,
    solo: ControlPort,
    listen: ControlPort,
    mono_compat: ControlPort,
    volume_db: AtomicF32,
    fader_val: AtomicF32,
    midi_mode: AtomicU8,
    observer: OnceLock<Arc<dyn FaderObserver>>,
    setting: OnceLock<(SharedSettings, SettingsKey)>,
}

impl FaderControls {
    #[must_use]
    pub fn new(role: FaderRole, passthrough: bool, track: Option<TrackHandle>) -> Self {
        let owner = PortOwner::Fader { role, passthrough };
        let automatable = role.is_channel() && !passthrough;
        let label = |name: &str| {
            if passthrough {
                format!("Prefader {name}")
            } else {
                format!("Fader {name}")
            }
        };
        let toggle_flags = PortFlags {
            toggle: true,
            ..PortFlags::default()
        };

        let amp = ControlValue::amplitude(1.0);
        let fader_val = fader_val_from_amp(amp.get());
        Self {
            role,
            passthrough,
            track: AtomicUsize::new(track.map_or(NO_TRACK, TrackHandle::index)),
            amp: ControlPort::new(
                label("Volume"),
                owner,
                amp,
                PortFlags {
                    amplitude: true,
                    automatable,
                    channel_fader: automatable,
                    ..PortFlags::default()
                },
            ),
            balance: ControlPort::new(
                label("Balance"),
                owner,
                ControlValue::balance(),
                PortFlags {
                    stereo_balance: true,
                    automatable,
                    ..PortFlags::default()
                },
            ),
            mute: ControlPort::new(
                label("Mute"),
                owner,
                ControlValue::toggle(),
                PortFlags {
                    automatable,
                    ..toggle_flags
                },
            ),
            solo: ControlPort::new(label("Solo"), owner, ControlValue::toggle(), toggle_flags),
            listen: ControlPort::new(label("Listen"), owner, ControlValue::toggle(), toggle_flags),
            mono_compat: ControlPort::new(
                label("Mono Compat"),
                owner,
                ControlValue::toggle(),
                toggle_flags,
            ),
            volume_db: AtomicF32::new(0.0),
            fader_val: AtomicF32::new(fader_val),
            midi_mode: AtomicU8::new(0),
            observer: OnceLock::new(),
            setting: OnceLock::new(),
        }
    }

    #[must_use]
    pub fn role(&self) -> FaderRole {
        self.role
    }

    #[must_use]
    pub fn passthrough(&self) -> bool {
        self.passthrough
    }

    #[must_use]
    pub fn track(&self) -> Option<TrackHandle> {
        match self.track.load(Ordering::Acquire) {
            NO_TRACK => None,
            index => Some(TrackHandle::new(index)),
        }
    }

    pub fn set_track(&self, track: Option<TrackHandle>) {
        self.track
            .store(track.map_or(NO_TRACK, TrackHandle::index), Ordering::Release);
    }

    fn require_track(&self) -> Result<TrackHandle, FaderError> {
        self.track().ok_or(FaderError::NoTrack)
    }

    /// Installs the observer notified by setters. Only the first call wins.
    pub fn set_observer(&self, observer: Arc<dyn FaderObserver>) -> bool {
        self.observer.set(observer).is_ok()
    }

    /// Ties this fader's gain to a persisted setting, written on `set_fader_val`.
    pub fn bind_setting(&self, settings: SharedSettings, key: SettingsKey) -> bool {
        self.setting.set((settings, key)).is_ok()
    }

    #[must_use]
    pub fn bound_setting(&self) -> Option<SettingsKey> {
        self.setting.get().map(|(_, key)| *key)
    }

    fn fire(&self, event: FaderEvent) {
        if let Some(observer) = self.observer.get() {
            observer.on_fader_event(event);
        }
    }

    #[must_use]
    pub fn amp_port(&self) -> &ControlPort {
        &self.amp
    }

    #[must_use]
    pub fn balance_port(&self) -> &ControlPort {
        &self.balance
    }

    #[must_use]
    pub fn mute_port(&self) -> &ControlPort {
        &self.mute
    }

    #[must_use]
    pub fn solo_port(&self) -> &ControlPort {
        &self.solo
    }

    #[must_use]
    pub fn listen_port(&self) -> &ControlPort {
        &self.listen
    }

    #[must_use]
    pub fn mono_compat_port(&self) -> &ControlPort {
        &self.mono_compat
    }

    #[must_use]
    pub fn control_ports(&self) -> [&ControlPort; 6] {
        [
            &self.amp,
            &self.balance,
            &self.mute,
            &self.solo,
            &self.listen,
            &self.mono_compat,
        ]
    }

    #[inline]
    #[must_use]
    pub fn amp(&self) -> f32 {
        self.amp.value().get()
    }

    /// Stores `amp` clamped to the amplitude range and refreshes the cached
    /// dB and fader position. Returns the stored value.
    pub fn set_amp(&self, amp: f32) -> f32 {
        let stored = self.amp.value().set(amp);
        self.volume_db.store(amp_to_dbfs(stored), Ordering::Release);
        self.fader_val
            .store(fader_val_from_amp(stored), Ordering::Release);
        stored
    }

    pub fn add_amp(&self, delta: f32) -> f32 {
        self.set_amp(self.amp() + delta)
    }

    #[must_use]
    pub fn volume_db(&self) -> f32 {
        self.volume_db.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn fader_val(&self) -> f32 {
        self.fader_val.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn default_fader_val(&self) -> f32 {
        fader_val_from_amp(self.amp.value().range().default)
    }

    /// Moves the fader to a normalized position and persists the resulting
    /// gain when the fader is bound to a setting.
    #[instrument(skip(self), fields(role = ?self.role))]
    pub fn set_fader_val(&self, fader_val: f32) {
        if !fader_val.is_finite() {
            warn!(fader_val, "ignoring non-finite fader position");
            return;
        }
        let fader_val = fader_val.clamp(0.0, 1.0);
        let stored = self.amp.value().set(amp_from_fader_val(fader_val));
        self.fader_val.store(fader_val, Ordering::Release);
        self.volume_db.store(amp_to_dbfs(stored), Ordering::Release);

        if let Some((settings, key)) = self.setting.get() {
            settings.lock().set(*key, stored);
            debug!(setting = key.name(), amp = stored, "fader gain stored in settings");
        }
    }

    #[must_use]
    pub fn db_string(&self) -> String {
        // Adding zero turns a rounded -0.0 into 0.0.
        let db = (amp_to_dbfs(self.amp()) * 10.0).round() / 10.0 + 0.0;
        format!("{db:.1}")
    }

    #[inline]
    #[must_use]
    pub fn balance(&self) -> f32 {
        self.balance.value().get()
    }

    pub fn set_balance(&self, balance: f32) -> f32 {
        self.balance.value().set(balance)
    }

    #[must_use]
    pub fn muted(&self) -> bool {
        self.mute.value().is_toggled()
    }

    pub fn set_muted(&self, muted: bool, fire_events: bool) -> Result<(), FaderError> {
        let track = self.require_track()?;
        self.mute.value().set_toggled(muted);
        debug!(%track, muted, "mute changed");
        if fire_events {
            self.fire(FaderEvent::MuteChanged { track, muted });
        }
        Ok(())
    }

    #[must_use]
    pub fn soloed(&self) -> bool {
        self.solo.value().is_toggled()
    }

    pub fn set_soloed(&self, soloed: bool, fire_events: bool) -> Result<(), FaderError> {
        let track = self.require_track()?;
        self.solo.value().set_toggled(soloed);
        debug!(%track, soloed, "solo changed");
        if fire_events {
            self.fire(FaderEvent::SoloChanged { track, soloed });
        }
        Ok(())
    }

    #[must_use]
    pub fn listened(&self) -> bool {
        self.listen.value().is_toggled()
    }

    pub fn set_listened(&self, listened: bool, fire_events: bool) -> Result<(), FaderError> {
        let track = self.require_track()?;
        self.listen.value().set_toggled(listened);
        debug!(%track, listened, "listen changed");
        if fire_events {
            self.fire(FaderEvent::ListenChanged { track, listened });
        }
        Ok(())
    }

    #[must_use]
    pub fn mono_compat_enabled(&self) -> bool {
        self.mono_compat.value().is_toggled()
    }

    /// Only channel faders need (and notify) a track.
    pub fn set_mono_compat_enabled(
        &self,
        enabled: bool,
        fire_events: bool,
    ) -> Result<(), FaderError> {
        let track = if self.role.is_channel() {
            Some(self.require_track()?)
        } else {
            None
        };
        self.mono_compat.value().set_toggled(enabled);
        if let Some(track) = track.filter(|_| fire_events) {
            self.fire(FaderEvent::MonoCompatChanged { track, enabled });
        }
        Ok(())
    }

    #[must_use]
    pub fn midi_mode(&self) -> MidiFaderMode {
        match self.midi_mode.load(Ordering::Acquire) {
            1 => MidiFaderMode::CcVolume,
            _ => MidiFaderMode::VelocityMultiplier,
        }
    }

    /// Sets the mode directly, or records it through `actions`, which then
    /// applies it.
    #[instrument(skip(self, actions), fields(role = ?self.role, with_action = actions.is_some()))]
    pub fn set_midi_mode(
        &self,
        mode: MidiFaderMode,
        actions: Option<&mut dyn ActionSystem>,
        fire_events: bool,
    ) -> Result<(), FaderError> {
        if let Some(actions) = actions {
            let track = self.require_track()?;
            return actions
                .perform_edit_single_int(
                    EditTrackActionKind::MidiFaderMode,
                    track,
                    mode.as_index(),
                    false,
                )
                .map_err(|source| {
                    warn!(error = %source, "midi mode action failed");
                    FaderError::Action {
                        message: "Failed to set MIDI mode",
                        source,
                    }
                });
        }

        let stored = u8::try_from(mode.as_index()).unwrap_or_default();
        self.midi_mode.store(stored, Ordering::Release);
        if mode == MidiFaderMode::CcVolume {
            debug!("cc volume mode tracks the fader but emits no events yet");
        }
        if fire_events {
            self.fire(FaderEvent::MidiModeChanged {
                track: self.track(),
                mode,
            });
        }
        Ok(())
    }

    /// Records an amplitude change the caller already applied. Nearly equal
    /// values are skipped when `skip_if_equal` is set.
    #[instrument(skip(self, actions), fields(role = ?self.role))]
    pub fn set_amp_with_action(
        &self,
        actions: &mut dyn ActionSystem,
        amp_from: f32,
        amp_to: f32,
        skip_if_equal: bool,
    ) -> Result<(), FaderError> {
        if skip_if_equal && floats_equal_epsilon(amp_from, amp_to, AMP_EDIT_EPSILON) {
            return Ok(());
        }
        let track = self.require_track()?;
        actions
            .perform_edit_single_float(EditTrackActionKind::Volume, track, amp_from, amp_to, true)
            .map_err(|source| {
                warn!(error = %source, %track, "volume action failed");
                FaderError::Action {
                    message: "Failed to change volume",
                    source,
                }
            })
    }

    #[must_use]
    pub fn implied_soloed(&self, graph: &dyn TrackGraph) -> bool {
        solo::fader_implied_soloed(self, graph)
    }

    /// Own mute, silenced by someone else's solo, or left out of a bounce.
    /// Master and passthrough faders are never muted by solo or bounce.
    #[must_use]
    pub fn effectively_muted(&self, graph: &dyn TrackGraph, transport: &TransportState) -> bool {
        if self.passthrough {
            return false;
        }
        let channel = self.role.is_channel();
        let track = self.track();
        let is_master = track.is_some_and(|track| graph.is_master(track));

        self.muted()
            || (channel
                && graph.has_soloed()
                && !self.soloed()
                && !self.implied_soloed(graph)
                && !is_master)
            || (transport.bounce_mode
                && channel
                && track.is_some_and(|track| !is_master && !graph.bounce_enabled(track)))
    }

    /// Copies values only; wiring and role stay as they are.
    pub fn copy_values_from(&self, other: &Self) {
        self.amp.value().set(other.amp());
        self.balance.value().set(other.balance());
        self.mute.value().set(other.mute.value().get());
        self.solo.value().set(other.solo.value().get());
        self.listen.value().set(other.listen.value().get());
        self.mono_compat.value().set(other.mono_compat.value().get());
        self.volume_db.store(other.volume_db(), Ordering::Release);
        self.fader_val.store(other.fader_val(), Ordering::Release);
    }

    #[must_use]
    pub fn automation_parameter_ids(&self) -> Vec<Uuid> {
        self.control_ports()
            .into_iter()
            .filter(|port| port.id.flags.automatable)
            .map(|port| port.id.id)
            .collect()
    }

    pub fn disconnect_all(&self) -> usize {
        self.control_ports()
            .into_iter()
            .map(ControlPort::disconnect_all)
            .sum()
    }
}

/// Post-fader outputs of listened tracks, supplied to the monitor fader.
pub trait ListenSource {
    fn for_each_listened(&self, f: &mut dyn FnMut(&[f32], &[f32]));
}

/// Everything `process` needs besides the fader itself.
pub struct ProcessContext<'a> {
    pub tracks: &'a dyn TrackGraph,
    pub control_room: &'a ControlRoom,
    pub transport: &'a TransportState,
    pub pool: &'a AudioPool,
    pub dsp: &'a dyn DspBackend,
    pub denormal_prevention_val: f32,
    pub listen: Option<&'a dyn ListenSource>,
}

#[derive(Debug)]
pub enum FaderPorts {
    Stereo {
        input: StereoPorts,
        output: StereoPorts,
    },
    Midi {
        input: EventPort,
        output: EventPort,
    },
    None,
}

#[derive(Debug)]
pub struct Fader {
    controls: Arc<FaderControls>,
    ports: FaderPorts,
    last_cc_volume: f32,
}

impl Fader {
    #[must_use]
    pub fn new(
        role: FaderRole,
        track: Option<TrackHandle>,
        passthrough: bool,
        max_block_size: usize,
    ) -> Self {
        Self::with_controls(
            Arc::new(FaderControls::new(role, passthrough, track)),
            max_block_size,
        )
    }

    #[must_use]
    pub fn with_controls(controls: Arc<FaderControls>, max_block_size: usize) -> Self {
        let role = controls.role();
        let passthrough = controls.passthrough();
        let owner = PortOwner::Fader { role, passthrough };
        let ports = match role {
            FaderRole::AudioChannel | FaderRole::SampleProcessor | FaderRole::Monitor => {
                let name = match (role, passthrough) {
                    (FaderRole::AudioChannel, true) => "Ch Pre-Fader",
                    (FaderRole::AudioChannel, false) => "Ch Fader",
                    (FaderRole::SampleProcessor, _) => "Sample Processor Fader",
                    _ => "Monitor Fader",
                };
                FaderPorts::Stereo {
                    input: StereoPorts::new(
                        &format!("{name} in"),
                        PortFlow::Input,
                        owner,
                        max_block_size,
                    ),
                    output: StereoPorts::new(
                        &format!("{name} out"),
                        PortFlow::Output,
                        owner,
                        max_block_size,
                    ),
                }
            }
            FaderRole::MidiChannel => {
                let name = if passthrough {
                    "Ch MIDI Pre-Fader"
                } else {
                    "Ch MIDI Fader"
                };
                let capacity = crate::midi::DEFAULT_MIDI_EVENT_CAPACITY;
                FaderPorts::Midi {
                    input: EventPort::new(format!("{name} in"), PortFlow::Input, owner, capacity),
                    output: EventPort::new(
                        format!("{name} out"),
                        PortFlow::Output,
                        owner,
                        capacity,
                    ),
                }
            }
            FaderRole::Generic => FaderPorts::None,
        };

        let last_cc_volume = controls.amp();
        Self {
            controls,
            ports,
            last_cc_volume,
        }
    }

    #[must_use]
    pub fn controls(&self) -> &Arc<FaderControls> {
        &self.controls
    }

    #[must_use]
    pub fn role(&self) -> FaderRole {
        self.controls.role()
    }

    #[must_use]
    pub fn ports(&self) -> &FaderPorts {
        &self.ports
    }

    #[must_use]
    pub fn stereo_in(&self) -> Option<&StereoPorts> {
        match &self.ports {
            FaderPorts::Stereo { input, .. } => Some(input),
            _ => None,
        }
    }

    pub fn stereo_in_mut(&mut self) -> Option<&mut StereoPorts> {
        match &mut self.ports {
            FaderPorts::Stereo { input, .. } => Some(input),
            _ => None,
        }
    }

    #[must_use]
    pub fn stereo_out(&self) -> Option<&StereoPorts> {
        match &self.ports {
            FaderPorts::Stereo { output, .. } => Some(output),
            _ => None,
        }
    }

    pub fn stereo_out_mut(&mut self) -> Option<&mut StereoPorts> {
        match &mut self.ports {
            FaderPorts::Stereo { output, .. } => Some(output),
            _ => None,
        }
    }

    #[must_use]
    pub fn midi_in(&self) -> Option<&EventPort> {
        match &self.ports {
            FaderPorts::Midi { input, .. } => Some(input),
            _ => None,
        }
    }

    pub fn midi_in_mut(&mut self) -> Option<&mut EventPort> {
        match &mut self.ports {
            FaderPorts::Midi { input, .. } => Some(input),
            _ => None,
        }
    }

    #[must_use]
    pub fn midi_out(&self) -> Option<&EventPort> {
        match &self.ports {
            FaderPorts::Midi { output, .. } => Some(output),
            _ => None,
        }
    }

    pub fn midi_out_mut(&mut self) -> Option<&mut EventPort> {
        match &mut self.ports {
            FaderPorts::Midi { output, .. } => Some(output),
            _ => None,
        }
    }

    #[must_use]
    pub fn last_cc_volume(&self) -> f32 {
        self.last_cc_volume
    }

    pub fn update_track_pos(&self, track: TrackHandle) {
        self.controls.set_track(Some(track));
    }

    pub fn copy_values_from(&self, other: &Self) {
        self.controls.copy_values_from(&other.controls);
    }

    #[must_use]
    pub fn automation_parameter_ids(&self) -> Vec<Uuid> {
        self.controls.automation_parameter_ids()
    }

    pub fn clear_buffers(&mut self) {
        match &mut self.ports {
            FaderPorts::Stereo { input, output } => {
                input.clear_buffers();
                output.clear_buffers();
            }
            FaderPorts::Midi { input, output } => {
                input.clear_buffer();
                output.clear_buffer();
            }
            FaderPorts::None => {}
        }
    }

    pub fn disconnect_all(&mut self) -> usize {
        let signal = match &mut self.ports {
            FaderPorts::Stereo { input, output } => {
                input.disconnect_all() + output.disconnect_all()
            }
            FaderPorts::Midi { input, output } => {
                input.connections.disconnect_all() + output.connections.disconnect_all()
            }
            FaderPorts::None => 0,
        };
        signal + self.controls.disconnect_all()
    }

    /// Runs one cycle over `time`. Never allocates, locks or logs.
    pub fn process(&mut self, ctx: &ProcessContext<'_>, time: ProcessTime) {
        let Self {
            controls,
            ports,
            last_cc_volume,
        } = self;
        let controls: &FaderControls = controls;
        let amp = controls.amp();
        let balance = controls.balance();
        let effectively_muted = controls.effectively_muted(ctx.tracks, ctx.transport);

        match ports {
            FaderPorts::Stereo { input, output } => process_audio(
                controls,
                input,
                output,
                ctx,
                time,
                MixGains {
                    amp,
                    balance,
                    effectively_muted,
                },
            ),
            FaderPorts::Midi { input, output } => {
                if effectively_muted {
                    return;
                }
                let first_new = output.events().len();
                input
                    .events()
                    .append_window(output.events_mut(), time.local_offset, time.nframes);
                if controls.passthrough() {
                    return;
                }
                match controls.midi_mode() {
                    MidiFaderMode::VelocityMultiplier => {
                        for event in &mut output.events_mut().as_mut_slice()[first_new..] {
                            if !event.is_note_on() {
                                continue;
                            }
                            if let Some(velocity) = event.velocity() {
                                let scaled = (f32::from(velocity) * amp).clamp(0.0, 127.0);
                                event.set_velocity(scaled as u8);
                            }
                        }
                    }
                    MidiFaderMode::CcVolume => {
                        if !floats_equal(*last_cc_volume, amp) {
                            *last_cc_volume = amp;
                        }
                    }
                }
            }
            FaderPorts::None => {}
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct MixGains {
    amp: f32,
    balance: f32,
    effectively_muted: bool,
}

fn process_audio(
    controls: &FaderControls,
    input: &StereoPorts,
    output: &mut StereoPorts,
    ctx: &ProcessContext<'_>,
    time: ProcessTime,
    gains: MixGains,
) {
    let dsp = ctx.dsp;
    let range = frame_range(
        time.local_offset,
        time.nframes,
        input.capacity().min(output.capacity()),
    );
    let track = controls.track();

    let (in_l, in_r) = input.split(range.clone());
    let (out_l, out_r) = output.split_mut(range.clone());
    dsp.copy(out_l, in_l);
    dsp.copy(out_r, in_r);

    if controls.passthrough() {
        let frozen_clip = track
            .filter(|track| ctx.tracks.is_frozen(*track) && ctx.transport.is_rolling())
            .and_then(|track| ctx.tracks.pool_clip(track))
            .and_then(|id| ctx.pool.clip(id));
        if let Some(clip) = frozen_clip {
            clip.fill_stereo(time.g_start_frame, out_l, out_r);
        }
        return;
    }

    let role = controls.role();
    if role == FaderRole::Monitor {
        let dim = ctx.control_room.dim_gain();
        if ctx.tracks.has_listened() {
            dsp.scale(out_l, dim);
            dsp.scale(out_r, dim);

            let listen = ctx.control_room.listen_gain();
            if let Some(source) = ctx.listen {
                source.for_each_listened(&mut |src_l, src_r| {
                    let len = src_l.len().min(src_r.len());
                    let window = frame_range(time.local_offset, time.nframes, len);
                    dsp.mix_scaled(out_l, &src_l[window.clone()], 1.0, listen);
                    dsp.mix_scaled(out_r, &src_r[window], 1.0, listen);
                });
            }
        }
        if ctx.control_room.dim_output() {
            dsp.scale(out_l, dim);
            dsp.scale(out_r, dim);
        }
    }

    let (calc_l, calc_r) = balance_gains(gains.balance);
    dsp.scale(out_l, gains.amp * calc_l);
    dsp.scale(out_r, gains.amp * calc_r);

    if controls.mono_compat_enabled() {
        dsp.make_mono(out_l, out_r, false);
    }

    if gains.effectively_muted {
        let mute_amp = ctx.control_room.mute_gain();
        if mute_amp < MIN_AUDIBLE_AMP {
            dsp.fill(out_l, ctx.denormal_prevention_val);
            dsp.fill(out_r, ctx.denormal_prevention_val);
        } else {
            dsp.scale(out_l, mute_amp);
            dsp.scale(out_r, mute_amp);
        }
    }

    let is_master = role == FaderRole::AudioChannel
        && track.is_some_and(|track| ctx.tracks.is_master(track));
    if is_master || matches!(role, FaderRole::Monitor | FaderRole::SampleProcessor) {
        dsp.clamp_in_place(out_l, -HARD_LIMIT, HARD_LIMIT);
        dsp.clamp_in_place(out_r, -HARD_LIMIT, HARD_LIMIT);
    }
}
