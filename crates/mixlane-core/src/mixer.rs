use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::{
    actions::{ActionError, Actions, TrackEdit, UndoHistory},
    audio_pool::{AudioPool, PoolClipId},
    config::{AudioConfig, EngineConfig},
    control_room::ControlRoom,
    diagnostics::audit_fader,
    dsp::{self, DspBackend},
    fader::{
        EventLog, Fader, FaderControls, FaderError, FaderEvent, FaderRole, ListenSource,
        MidiFaderMode, ProcessContext,
    },
    port::{EventPort, StereoPorts, frame_range},
    settings::{SettingsKey, SettingsStore, SharedSettings},
    track::{
        SignalKind, TrackGraph, TrackGraphError, TrackHandle, TrackKind, TrackNode, TrackRegistry,
        move_remap, removal_remap,
    },
    transport::{ProcessTime, TransportState},
};

#[derive(Debug, Error)]
pub enum MixerError {
    #[error(transparent)]
    Track(#[from] TrackGraphError),
    #[error(transparent)]
    Fader(#[from] FaderError),
    #[error(transparent)]
    Action(#[from] ActionError),
    #[error("track {0} has no channel")]
    NoChannel(TrackHandle),
    #[error("cannot route {from} into {to}: signal kinds differ")]
    SignalMismatch { from: TrackHandle, to: TrackHandle },
    #[error("block of {requested} frames exceeds max block size {max}")]
    BlockTooLarge { requested: u32, max: usize },
    #[error("io error: {0}")]
    Io(String),
}

impl From<anyhow::Error> for MixerError {
    fn from(value: anyhow::Error) -> Self {
        Self::Io(format!("{value:#}"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddTrackRequest {
    pub name: String,
    pub kind: TrackKind,
    /// Defaults to master for audio tracks.
    pub output: Option<TrackHandle>,
}

impl Default for AddTrackRequest {
    fn default() -> Self {
        Self {
            name: "Track".to_string(),
            kind: TrackKind::Audio,
            output: None,
        }
    }
}

impl AddTrackRequest {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            name: name.into(),
            kind,
            output: None,
        }
    }

    #[must_use]
    pub fn routed_to(mut self, output: TrackHandle) -> Self {
        self.output = Some(output);
        self
    }
}

/// Pre-fader (passthrough) stage followed by the post-fader stage.
#[derive(Debug)]
pub struct ChannelStrip {
    prefader: Fader,
    fader: Fader,
}

impl ChannelStrip {
    fn new(kind: TrackKind, track: TrackHandle, max_block_size: usize) -> Self {
        let role = FaderRole::for_signal(kind.out_signal());
        Self {
            prefader: Fader::new(role, Some(track), true, max_block_size),
            fader: Fader::new(role, Some(track), false, max_block_size),
        }
    }

    #[must_use]
    pub fn prefader(&self) -> &Fader {
        &self.prefader
    }

    #[must_use]
    pub fn fader(&self) -> &Fader {
        &self.fader
    }

    fn update_track_pos(&self, track: TrackHandle) {
        self.prefader.update_track_pos(track);
        self.fader.update_track_pos(track);
    }

    fn clear_buffers(&mut self) {
        self.prefader.clear_buffers();
        self.fader.clear_buffers();
    }

    fn process(&mut self, ctx: &ProcessContext<'_>, time: ProcessTime) {
        self.prefader.process(ctx, time);
        if let (Some(pre_out), Some(fader_in)) =
            (self.prefader.stereo_out(), self.fader.stereo_in_mut())
        {
            let range = frame_range(time.local_offset, time.nframes, fader_in.capacity());
            let (src_l, src_r) = pre_out.split(range.clone());
            let (dst_l, dst_r) = fader_in.split_mut(range);
            ctx.dsp.copy(dst_l, src_l);
            ctx.dsp.copy(dst_r, src_r);
        } else if let (Some(pre_out), Some(fader_in)) =
            (self.prefader.midi_out(), self.fader.midi_in_mut())
        {
            pre_out
                .events()
                .append_window(fader_in.events_mut(), time.local_offset, time.nframes);
        }
        self.fader.process(ctx, time);
    }
}

struct ListenedStrips<'a> {
    strips: &'a [Option<ChannelStrip>],
    tracks: &'a TrackRegistry,
}

impl ListenSource for ListenedStrips<'_> {
    fn for_each_listened(&self, f: &mut dyn FnMut(&[f32], &[f32])) {
        for (index, strip) in self.strips.iter().enumerate() {
            let track = TrackHandle::new(index);
            let audible = self.tracks.has_channel(track)
                && self
                    .tracks
                    .kind(track)
                    .is_some_and(|kind| kind.out_signal() == SignalKind::Audio)
                && self.tracks.is_listened(track);
            if !audible {
                continue;
            }
            if let Some(out) = strip.as_ref().and_then(|strip| strip.fader.stereo_out()) {
                f(out.l.buffer(), out.r.buffer());
            }
        }
    }
}

/// Owns every fader of a session and runs them in routing order.
#[derive(Debug)]
pub struct Mixer {
    audio: AudioConfig,
    tracks: TrackRegistry,
    strips: Vec<Option<ChannelStrip>>,
    order: Vec<TrackHandle>,
    monitor: Fader,
    sample_processor: Fader,
    control_room: ControlRoom,
    transport: TransportState,
    pool: AudioPool,
    dsp: &'static dyn DspBackend,
    settings: SharedSettings,
    history: UndoHistory,
    events: Arc<EventLog>,
}

impl Mixer {
    /// Builds an engine with a master track and the monitor section.
    #[instrument(skip(audio, settings), fields(max_block_size = audio.max_block_size))]
    pub fn new(audio: &AudioConfig, settings: SharedSettings) -> Self {
        let block = audio.max_block_size;
        let monitor = Fader::new(FaderRole::Monitor, None, false, block);
        monitor
            .controls()
            .set_amp(settings.lock().get(SettingsKey::MonitorVol));
        monitor
            .controls()
            .bind_setting(settings.clone(), SettingsKey::MonitorVol);

        let dsp = dsp::select_backend(audio.dsp_backend);
        let mut mixer = Self {
            audio: audio.clone(),
            tracks: TrackRegistry::new(),
            strips: Vec::new(),
            order: Vec::new(),
            monitor,
            sample_processor: Fader::new(FaderRole::SampleProcessor, None, false, block),
            control_room: ControlRoom::new(Some(&settings)),
            transport: TransportState::default(),
            pool: AudioPool::new(),
            dsp,
            settings,
            history: UndoHistory::default(),
            events: Arc::new(EventLog::new()),
        };
        let master = mixer.insert_track(AddTrackRequest::new("Master", TrackKind::Master));
        mixer.refresh_order();
        debug!(%master, backend = dsp.name(), "mixer ready");
        mixer
    }

    #[must_use]
    pub fn in_memory(audio: &AudioConfig) -> Self {
        Self::new(audio, SettingsStore::in_memory().into_shared())
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self, MixerError> {
        let settings = SettingsStore::open(&config.monitor.settings_path)?.into_shared();
        Ok(Self::new(&config.audio, settings))
    }

    #[must_use]
    pub fn audio_config(&self) -> &AudioConfig {
        &self.audio
    }

    #[must_use]
    pub fn max_block_size(&self) -> usize {
        self.audio.max_block_size
    }

    #[must_use]
    pub fn dsp(&self) -> &'static dyn DspBackend {
        self.dsp
    }

    #[must_use]
    pub fn tracks(&self) -> &TrackRegistry {
        &self.tracks
    }

    #[must_use]
    pub fn master(&self) -> Option<TrackHandle> {
        self.tracks.master()
    }

    #[must_use]
    pub fn control_room(&self) -> &ControlRoom {
        &self.control_room
    }

    #[must_use]
    pub fn monitor(&self) -> &Fader {
        &self.monitor
    }

    #[must_use]
    pub fn monitor_output(&self) -> Option<&StereoPorts> {
        self.monitor.stereo_out()
    }

    #[must_use]
    pub fn sample_processor(&self) -> &Fader {
        &self.sample_processor
    }

    pub fn sample_processor_input_mut(&mut self) -> Option<&mut StereoPorts> {
        self.sample_processor.stereo_in_mut()
    }

    #[must_use]
    pub fn transport(&self) -> &TransportState {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut TransportState {
        &mut self.transport
    }

    #[must_use]
    pub fn pool(&self) -> &AudioPool {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut AudioPool {
        &mut self.pool
    }

    #[must_use]
    pub fn settings(&self) -> &SharedSettings {
        &self.settings
    }

    #[must_use]
    pub fn history(&self) -> &UndoHistory {
        &self.history
    }

    pub fn drain_events(&self) -> Vec<FaderEvent> {
        self.events.drain()
    }

    #[must_use]
    pub fn strip(&self, track: TrackHandle) -> Option<&ChannelStrip> {
        self.strips.get(track.index()).and_then(Option::as_ref)
    }

    #[must_use]
    pub fn fader(&self, track: TrackHandle) -> Option<&Fader> {
        self.strip(track).map(ChannelStrip::fader)
    }

    pub fn controls(&self, track: TrackHandle) -> Result<Arc<FaderControls>, MixerError> {
        self.fader(track)
            .map(|fader| Arc::clone(fader.controls()))
            .ok_or(MixerError::NoChannel(track))
    }

    /// Pre-fader input of a track, where its source signal is written each cycle.
    pub fn track_input_mut(&mut self, track: TrackHandle) -> Option<&mut StereoPorts> {
        self.strips
            .get_mut(track.index())
            .and_then(Option::as_mut)
            .and_then(|strip| strip.prefader.stereo_in_mut())
    }

    pub fn track_midi_input_mut(&mut self, track: TrackHandle) -> Option<&mut EventPort> {
        self.strips
            .get_mut(track.index())
            .and_then(Option::as_mut)
            .and_then(|strip| strip.prefader.midi_in_mut())
    }

    fn insert_track(&mut self, request: AddTrackRequest) -> TrackHandle {
        let handle = TrackHandle::new(self.tracks.len());
        let strip = request
            .kind
            .has_channel()
            .then(|| ChannelStrip::new(request.kind, handle, self.audio.max_block_size));
        let controls = strip.as_ref().map(|strip| {
            let controls = Arc::clone(strip.fader.controls());
            controls.set_observer(self.events.clone());
            controls
        });
        let added = self
            .tracks
            .add(TrackNode::new(request.name, request.kind, controls));
        self.strips.push(strip);
        added
    }

    #[instrument(skip(self, request), fields(name = %request.name, kind = ?request.kind))]
    pub fn add_track(&mut self, request: AddTrackRequest) -> Result<TrackHandle, MixerError> {
        let kind = request.kind;
        let output = request.output.or_else(|| {
            (kind.has_channel()
                && kind != TrackKind::Master
                && kind.out_signal() == SignalKind::Audio)
                .then(|| self.master())
                .flatten()
        });
        let handle = self.insert_track(request);
        if let Some(output) = output {
            if let Err(error) = self.route(handle, Some(output)) {
                self.remove_track(handle)?;
                return Err(error);
            }
        }
        self.refresh_order();
        info!(track = %handle, "track added");
        Ok(handle)
    }

    #[instrument(skip(self))]
    pub fn remove_track(&mut self, track: TrackHandle) -> Result<(), MixerError> {
        if let Some(strip) = self.strips.get_mut(track.index()).and_then(Option::as_mut) {
            strip.prefader.disconnect_all();
            strip.fader.disconnect_all();
        }
        let routed_in: Vec<TrackHandle> = self
            .tracks
            .handles()
            .filter(|handle| self.tracks.output_track(*handle) == Some(track))
            .collect();
        for source in routed_in {
            self.disconnect_ports(source, track);
        }

        self.tracks.remove(track)?;
        self.strips.remove(track.index());
        self.history.remap_tracks(removal_remap(track));
        self.sync_track_positions();
        self.refresh_order();
        info!("track removed");
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn move_track(&mut self, from: usize, to: usize) -> Result<(), MixerError> {
        self.tracks.move_track(from, to)?;
        let strip = self.strips.remove(from);
        self.strips.insert(to, strip);
        self.history.remap_tracks(move_remap(from, to));
        self.sync_track_positions();
        self.refresh_order();
        Ok(())
    }

    fn sync_track_positions(&self) {
        for (index, strip) in self.strips.iter().enumerate() {
            if let Some(strip) = strip {
                strip.update_track_pos(TrackHandle::new(index));
            }
        }
    }

    fn refresh_order(&mut self) {
        self.order = self.tracks.processing_order();
    }

    /// Routes `track`'s post-fader output into `output`'s pre-fader input.
    #[instrument(skip(self))]
    pub fn route(
        &mut self,
        track: TrackHandle,
        output: Option<TrackHandle>,
    ) -> Result<(), MixerError> {
        let kind = self
            .tracks
            .kind(track)
            .ok_or(TrackGraphError::TrackNotFound(track))?;
        if !kind.has_channel() {
            return Err(MixerError::NoChannel(track));
        }
        if let Some(dest) = output {
            let dest_kind = self
                .tracks
                .kind(dest)
                .ok_or(TrackGraphError::TrackNotFound(dest))?;
            if !dest_kind.has_channel() {
                return Err(MixerError::NoChannel(dest));
            }
            if kind.out_signal() != dest_kind.in_signal()
                || dest_kind.in_signal() != dest_kind.out_signal()
            {
                return Err(MixerError::SignalMismatch {
                    from: track,
                    to: dest,
                });
            }
        }

        let previous = self.tracks.output_track(track);
        self.tracks.set_output(track, output)?;
        if let Some(previous) = previous {
            self.disconnect_ports(track, previous);
        }
        if let Some(dest) = output {
            self.connect_ports(track, dest);
        }
        self.refresh_order();
        debug!("routing updated");
        Ok(())
    }

    fn connect_ports(&mut self, source: TrackHandle, dest: TrackHandle) {
        if let Some((src, dst)) = split_pair(&mut self.strips, source.index(), dest.index()) {
            let dst_in = dst.prefader.stereo_in().map(|ports| (ports.l.id.id, ports.r.id.id));
            if let (Some(out), Some((l, r))) = (src.fader.stereo_out_mut(), dst_in) {
                out.l.connections.connect(l);
                out.r.connections.connect(r);
            }
            let dst_midi = dst.prefader.midi_in().map(|port| port.id.id);
            if let (Some(out), Some(id)) = (src.fader.midi_out_mut(), dst_midi) {
                out.connections.connect(id);
            }
        }
    }

    fn disconnect_ports(&mut self, source: TrackHandle, dest: TrackHandle) {
        if let Some((src, dst)) = split_pair(&mut self.strips, source.index(), dest.index()) {
            if let (Some(out), Some(dst_in)) =
                (src.fader.stereo_out_mut(), dst.prefader.stereo_in())
            {
                out.disconnect_from(dst_in);
            }
            let dst_midi = dst.prefader.midi_in().map(|port| port.id.id);
            if let (Some(out), Some(id)) = (src.fader.midi_out_mut(), dst_midi) {
                out.connections.disconnect(id);
            }
        }
    }

    pub fn add_to_group(
        &mut self,
        parent: TrackHandle,
        child: TrackHandle,
    ) -> Result<(), MixerError> {
        self.tracks.add_child(parent, child)?;
        Ok(())
    }

    /// Freezes the track onto `clip`, or unfreezes it with `None`.
    #[instrument(skip(self))]
    pub fn set_frozen(
        &mut self,
        track: TrackHandle,
        clip: Option<PoolClipId>,
    ) -> Result<(), MixerError> {
        if let Some(id) = clip {
            if self.pool.clip(id).is_none() {
                warn!(%id, "freezing onto a clip missing from the pool");
            }
        }
        let node = self.tracks.get_mut(track)?;
        node.frozen = clip.is_some();
        node.pool_clip = clip;
        Ok(())
    }

    pub fn set_bounce(&mut self, track: TrackHandle, bounce: bool) -> Result<(), MixerError> {
        self.tracks.get_mut(track)?.bounce = bounce;
        Ok(())
    }

    pub fn set_muted(&self, track: TrackHandle, muted: bool) -> Result<(), MixerError> {
        self.controls(track)?.set_muted(muted, true)?;
        Ok(())
    }

    pub fn set_soloed(&self, track: TrackHandle, soloed: bool) -> Result<(), MixerError> {
        self.controls(track)?.set_soloed(soloed, true)?;
        Ok(())
    }

    pub fn set_listened(&self, track: TrackHandle, listened: bool) -> Result<(), MixerError> {
        self.controls(track)?.set_listened(listened, true)?;
        Ok(())
    }

    /// Applies `amp_to` and records the change for undo.
    pub fn change_volume(&mut self, track: TrackHandle, amp_to: f32) -> Result<(), MixerError> {
        let controls = self.controls(track)?;
        let amp_from = controls.amp();
        let stored = controls.set_amp(amp_to);
        let mut actions = Actions::new(&mut self.history, &self.tracks);
        if let Err(error) = controls.set_amp_with_action(&mut actions, amp_from, stored, true) {
            controls.set_amp(amp_from);
            return Err(error.into());
        }
        Ok(())
    }

    pub fn set_midi_mode(
        &mut self,
        track: TrackHandle,
        mode: MidiFaderMode,
    ) -> Result<(), MixerError> {
        let controls = self.controls(track)?;
        let mut actions = Actions::new(&mut self.history, &self.tracks);
        controls.set_midi_mode(mode, Some(&mut actions), true)?;
        Ok(())
    }

    pub fn undo(&mut self) -> Result<Option<TrackEdit>, MixerError> {
        Ok(self.history.undo(&self.tracks)?)
    }

    pub fn redo(&mut self) -> Result<Option<TrackEdit>, MixerError> {
        Ok(self.history.redo(&self.tracks)?)
    }

    /// Persists monitor-section gains if any changed.
    pub fn flush_settings(&self) -> Result<(), MixerError> {
        let mut settings = self.settings.lock();
        if settings.is_dirty() {
            settings.save()?;
        }
        Ok(())
    }

    /// Runs the numeric audit over every fader. Returns how many failed.
    pub fn audit(&self) -> usize {
        let strips = self
            .strips
            .iter()
            .flatten()
            .flat_map(|strip| [strip.prefader.controls(), strip.fader.controls()]);
        let room = [
            self.control_room.mute_fader().controls(),
            self.control_room.listen_fader().controls(),
            self.control_room.dim_fader().controls(),
            self.monitor.controls(),
            self.sample_processor.controls(),
        ];
        strips
            .chain(room)
            .filter(|controls| !audit_fader(controls))
            .count()
    }

    /// Zeroes every port buffer. Call before writing a cycle's inputs.
    pub fn clear_buffers(&mut self) {
        for strip in self.strips.iter_mut().flatten() {
            strip.clear_buffers();
        }
        self.monitor.clear_buffers();
        self.sample_processor.clear_buffers();
    }

    /// Processes one cycle of `nframes` starting at the transport's playhead,
    /// leaving the result in the monitor output.
    pub fn process_cycle(&mut self, nframes: u32) -> Result<(), MixerError> {
        if nframes as usize > self.audio.max_block_size {
            return Err(MixerError::BlockTooLarge {
                requested: nframes,
                max: self.audio.max_block_size,
            });
        }
        let time = ProcessTime::whole_cycle(self.transport.playhead_frame, nframes);

        let Self {
            audio,
            tracks,
            strips,
            order,
            monitor,
            sample_processor,
            control_room,
            transport,
            pool,
            dsp,
            ..
        } = self;
        let dsp: &dyn DspBackend = *dsp;
        let ctx = ProcessContext {
            tracks: &*tracks,
            control_room: &*control_room,
            transport: &*transport,
            pool: &*pool,
            dsp,
            denormal_prevention_val: audio.denormal_prevention_val,
            listen: None,
        };
        let range = frame_range(time.local_offset, time.nframes, audio.max_block_size);

        for track in order.iter().copied() {
            let Some(strip) = strips.get_mut(track.index()).and_then(Option::as_mut) else {
                continue;
            };
            strip.process(&ctx, time);

            if tracks.is_master(track) {
                if let (Some(out), Some(monitor_in)) =
                    (strip.fader.stereo_out(), monitor.stereo_in_mut())
                {
                    let (src_l, src_r) = out.split(range.clone());
                    let (dst_l, dst_r) = monitor_in.split_mut(range.clone());
                    dsp.add_in_place(dst_l, src_l);
                    dsp.add_in_place(dst_r, src_r);
                }
                continue;
            }

            let Some(dest) = tracks.output_track(track) else {
                continue;
            };
            let Some((src, dst)) = split_pair(strips, track.index(), dest.index()) else {
                continue;
            };
            if let (Some(out), Some(dst_in)) =
                (src.fader.stereo_out(), dst.prefader.stereo_in_mut())
            {
                let (src_l, src_r) = out.split(range.clone());
                let (dst_l, dst_r) = dst_in.split_mut(range.clone());
                dsp.add_in_place(dst_l, src_l);
                dsp.add_in_place(dst_r, src_r);
            } else if let (Some(out), Some(dst_in)) =
                (src.fader.midi_out(), dst.prefader.midi_in_mut())
            {
                out.events()
                    .append_window(dst_in.events_mut(), time.local_offset, time.nframes);
            }
        }

        sample_processor.process(&ctx, time);
        if let (Some(out), Some(monitor_in)) =
            (sample_processor.stereo_out(), monitor.stereo_in_mut())
        {
            let (src_l, src_r) = out.split(range.clone());
            let (dst_l, dst_r) = monitor_in.split_mut(range);
            dsp.add_in_place(dst_l, src_l);
            dsp.add_in_place(dst_r, src_r);
        }

        let listened = ListenedStrips {
            strips: strips.as_slice(),
            tracks: &*tracks,
        };
        let monitor_ctx = ProcessContext {
            listen: Some(&listened),
            ..ctx
        };
        monitor.process(&monitor_ctx, time);

        transport.advance(nframes);
        Ok(())
    }
}

/// Two distinct strips at once.
fn split_pair(
    items: &mut [Option<ChannelStrip>],
    src: usize,
    dest: usize,
) -> Option<(&mut ChannelStrip, &mut ChannelStrip)> {
    if src == dest || src >= items.len() || dest >= items.len() {
        return None;
    }
    if src < dest {
        let (low, high) = items.split_at_mut(dest);
        Some((low[src].as_mut()?, high[0].as_mut()?))
    } else {
        let (low, high) = items.split_at_mut(src);
        Some((high[0].as_mut()?, low[dest].as_mut()?))
    }
}
