use std::sync::Arc;

use mixlane_core::{
    audio_pool::AudioPool,
    control_room::ControlRoom,
    dsp,
    fader::{DEFAULT_DENORMAL_PREVENTION_VAL, Fader, FaderRole, MidiFaderMode, ProcessContext},
    midi::MidiEvent,
    track::{TrackKind, TrackNode, TrackRegistry},
    transport::{ProcessTime, TransportState},
};

struct Rig {
    tracks: TrackRegistry,
    room: ControlRoom,
    transport: TransportState,
    pool: AudioPool,
}

impl Rig {
    fn with_fader(fader: &Fader) -> Self {
        let mut tracks = TrackRegistry::new();
        tracks.add(TrackNode::new(
            "Lead",
            TrackKind::Midi,
            Some(Arc::clone(fader.controls())),
        ));
        Self {
            tracks,
            room: ControlRoom::default(),
            transport: TransportState::default(),
            pool: AudioPool::new(),
        }
    }

    fn ctx(&self) -> ProcessContext<'_> {
        ProcessContext {
            tracks: &self.tracks,
            control_room: &self.room,
            transport: &self.transport,
            pool: &self.pool,
            dsp: dsp::scalar(),
            denormal_prevention_val: DEFAULT_DENORMAL_PREVENTION_VAL,
            listen: None,
        }
    }
}

fn feed_notes(fader: &mut Fader) {
    let input = fader.midi_in_mut().expect("midi fader should have an event input");
    for time in [0, 4, 9] {
        input.events_mut().push(MidiEvent::note_on(time, 0, 60, 100));
    }
    input.events_mut().push(MidiEvent::note_off(5, 0, 60));
}

fn velocities(fader: &Fader) -> Vec<Option<u8>> {
    fader
        .midi_out()
        .expect("midi fader should have an event output")
        .events()
        .iter()
        .map(MidiEvent::velocity)
        .collect()
}

#[test]
fn note_on_velocity_follows_fader_amp() {
    let mut fader = Fader::new(FaderRole::MidiChannel, None, false, 64);
    let rig = Rig::with_fader(&fader);
    fader.controls().set_amp(0.5);
    feed_notes(&mut fader);

    fader.process(&rig.ctx(), ProcessTime::whole_cycle(0, 8));

    // The note at frame 9 falls outside the window.
    assert_eq!(velocities(&fader), vec![Some(50), Some(50), Some(0)]);
}

#[test]
fn boosted_velocity_clamps_to_midi_range() {
    let mut fader = Fader::new(FaderRole::MidiChannel, None, false, 64);
    let rig = Rig::with_fader(&fader);
    fader.controls().set_amp(2.0);
    feed_notes(&mut fader);

    fader.process(&rig.ctx(), ProcessTime::whole_cycle(0, 16));

    assert_eq!(
        velocities(&fader),
        vec![Some(127), Some(127), Some(127), Some(0)]
    );
}

#[test]
fn events_already_in_the_output_keep_their_velocity() {
    let mut fader = Fader::new(FaderRole::MidiChannel, None, false, 64);
    let rig = Rig::with_fader(&fader);
    fader.controls().set_amp(0.5);
    fader
        .midi_out_mut()
        .expect("midi fader should have an event output")
        .events_mut()
        .push(MidiEvent::note_on(0, 1, 48, 100));
    fader
        .midi_in_mut()
        .expect("midi fader should have an event input")
        .events_mut()
        .push(MidiEvent::note_on(1, 0, 60, 100));

    fader.process(&rig.ctx(), ProcessTime::whole_cycle(0, 8));

    assert_eq!(velocities(&fader), vec![Some(100), Some(50)]);
}

#[test]
fn prefader_passes_events_through_unchanged() {
    let mut prefader = Fader::new(FaderRole::MidiChannel, None, true, 64);
    let rig = Rig::with_fader(&prefader);
    prefader.controls().set_amp(0.5);
    feed_notes(&mut prefader);

    prefader.process(&rig.ctx(), ProcessTime::whole_cycle(0, 16));

    assert_eq!(
        velocities(&prefader),
        vec![Some(100), Some(100), Some(100), Some(0)]
    );
}

#[test]
fn muted_midi_channel_emits_nothing() {
    let mut fader = Fader::new(FaderRole::MidiChannel, None, false, 64);
    let rig = Rig::with_fader(&fader);
    fader
        .controls()
        .set_muted(true, false)
        .expect("attached fader should accept mute");
    feed_notes(&mut fader);

    fader.process(&rig.ctx(), ProcessTime::whole_cycle(0, 16));

    assert!(velocities(&fader).is_empty());
}

#[test]
fn cc_volume_mode_tracks_amp_without_touching_notes() {
    let mut fader = Fader::new(FaderRole::MidiChannel, None, false, 64);
    let rig = Rig::with_fader(&fader);
    fader
        .controls()
        .set_midi_mode(MidiFaderMode::CcVolume, None, false)
        .expect("direct mode change should succeed");
    fader.controls().set_amp(0.5);
    feed_notes(&mut fader);

    fader.process(&rig.ctx(), ProcessTime::whole_cycle(0, 16));

    assert_eq!(
        velocities(&fader),
        vec![Some(100), Some(100), Some(100), Some(0)]
    );
    assert_eq!(fader.last_cc_volume(), 0.5);
}
