use approx::assert_abs_diff_eq;
use mixlane_core::{
    audio_pool::AudioClip,
    config::AudioConfig,
    dsp::DspPreference,
    fader::DEFAULT_DENORMAL_PREVENTION_VAL,
    midi::MidiEvent,
    mixer::{AddTrackRequest, Mixer, MixerError},
    render::render_offline,
    track::{TrackGraph, TrackGraphError, TrackHandle, TrackKind},
};

const BLOCK: usize = 64;
const FRAMES: u32 = 16;

fn test_mixer() -> Mixer {
    Mixer::in_memory(&AudioConfig {
        max_block_size: BLOCK,
        dsp_backend: DspPreference::Scalar,
        ..AudioConfig::default()
    })
}

fn add(mixer: &mut Mixer, name: &str, kind: TrackKind) -> TrackHandle {
    mixer
        .add_track(AddTrackRequest::new(name, kind))
        .expect("track should be added")
}

/// Runs one cycle with a constant signal on each listed track.
fn run_cycle(mixer: &mut Mixer, inputs: &[(TrackHandle, f32)]) -> (f32, f32) {
    mixer.clear_buffers();
    for (track, level) in inputs {
        let input = mixer
            .track_input_mut(*track)
            .expect("audio track should have an input");
        input.l.buffer_mut()[..FRAMES as usize].fill(*level);
        input.r.buffer_mut()[..FRAMES as usize].fill(*level);
    }
    mixer.process_cycle(FRAMES).expect("cycle should process");
    let out = mixer.monitor_output().expect("monitor should have an output");
    (out.l.buffer()[0], out.r.buffer()[FRAMES as usize - 1])
}

#[test]
fn audio_tracks_default_to_master_and_sum_into_the_monitor() {
    let mut mixer = test_mixer();
    let master = mixer.master().expect("mixer should have a master");
    let guitar = add(&mut mixer, "Guitar", TrackKind::Audio);
    let piano = add(&mut mixer, "Piano", TrackKind::Audio);
    assert_eq!(mixer.tracks().output_track(guitar), Some(master));
    assert_eq!(mixer.tracks().output_track(piano), Some(master));

    let (l, r) = run_cycle(&mut mixer, &[(guitar, 0.25), (piano, 0.5)]);
    assert_abs_diff_eq!(l, 0.75, epsilon = 1e-6);
    assert_abs_diff_eq!(r, 0.75, epsilon = 1e-6);
}

#[test]
fn bus_gain_applies_to_everything_routed_through_it() {
    let mut mixer = test_mixer();
    let bus = add(&mut mixer, "Bus", TrackKind::AudioBus);
    let guitar = mixer
        .add_track(AddTrackRequest::new("Guitar", TrackKind::Audio).routed_to(bus))
        .expect("guitar should route to the bus");
    mixer
        .controls(bus)
        .expect("bus should have a fader")
        .set_amp(0.5);

    let order = mixer.tracks().processing_order();
    let position = |track: TrackHandle| order.iter().position(|handle| *handle == track);
    assert!(position(guitar) < position(bus));

    let (l, _) = run_cycle(&mut mixer, &[(guitar, 0.25)]);
    assert_abs_diff_eq!(l, 0.125, epsilon = 1e-6);
}

#[test]
fn routing_cycles_and_self_routes_are_rejected() {
    let mut mixer = test_mixer();
    let bus_a = add(&mut mixer, "Bus A", TrackKind::AudioBus);
    let bus_b = mixer
        .add_track(AddTrackRequest::new("Bus B", TrackKind::AudioBus).routed_to(bus_a))
        .expect("bus b should route to bus a");

    assert!(matches!(
        mixer.route(bus_a, Some(bus_b)),
        Err(MixerError::Track(TrackGraphError::RoutingCycle { .. }))
    ));
    assert!(matches!(
        mixer.route(bus_a, Some(bus_a)),
        Err(MixerError::Track(TrackGraphError::SelfReference(_)))
    ));
    assert_eq!(mixer.tracks().output_track(bus_a), mixer.master());
}

#[test]
fn signal_kinds_must_match_across_a_route() {
    let mut mixer = test_mixer();
    let master = mixer.master().expect("mixer should have a master");
    let lead = add(&mut mixer, "Lead", TrackKind::Midi);
    let synth = add(&mut mixer, "Synth", TrackKind::Instrument);
    let midi_bus = add(&mut mixer, "Midi Bus", TrackKind::MidiBus);

    assert_eq!(mixer.tracks().output_track(lead), None);
    assert!(matches!(
        mixer.route(lead, Some(master)),
        Err(MixerError::SignalMismatch { .. })
    ));
    // Instruments take MIDI in but only emit audio, so nothing routes into them.
    assert!(matches!(
        mixer.route(lead, Some(synth)),
        Err(MixerError::SignalMismatch { .. })
    ));
    mixer
        .route(lead, Some(midi_bus))
        .expect("midi should route into a midi bus");
    assert!(matches!(
        mixer.add_track(AddTrackRequest::new("Bad", TrackKind::Audio).routed_to(midi_bus)),
        Err(MixerError::SignalMismatch { .. })
    ));
    assert_eq!(mixer.tracks().len(), 4);
}

#[test]
fn midi_follows_its_route_into_a_midi_bus() {
    let mut mixer = test_mixer();
    let midi_bus = add(&mut mixer, "Midi Bus", TrackKind::MidiBus);
    let lead = mixer
        .add_track(AddTrackRequest::new("Lead", TrackKind::Midi).routed_to(midi_bus))
        .expect("lead should route to the midi bus");
    mixer
        .controls(lead)
        .expect("lead should have a fader")
        .set_amp(0.5);

    mixer.clear_buffers();
    mixer
        .track_midi_input_mut(lead)
        .expect("midi track should have an event input")
        .events_mut()
        .push(MidiEvent::note_on(3, 0, 64, 120));
    mixer.process_cycle(FRAMES).expect("cycle should process");

    let bus_out = mixer
        .fader(midi_bus)
        .and_then(|fader| fader.midi_out())
        .expect("midi bus should have an event output");
    let velocities: Vec<_> = bus_out.events().iter().map(MidiEvent::velocity).collect();
    assert_eq!(velocities, vec![Some(60)]);
}

#[test]
fn solo_silences_everything_else_on_the_way_to_master() {
    let mut mixer = test_mixer();
    let guitar = add(&mut mixer, "Guitar", TrackKind::Audio);
    let piano = add(&mut mixer, "Piano", TrackKind::Audio);
    mixer.set_soloed(guitar, true).expect("solo should apply");

    let (l, _) = run_cycle(&mut mixer, &[(guitar, 0.25), (piano, 0.5)]);
    assert_abs_diff_eq!(l, 0.25 + DEFAULT_DENORMAL_PREVENTION_VAL, epsilon = 1e-9);
}

#[test]
fn soloed_group_child_keeps_its_group_audible() {
    let mut mixer = test_mixer();
    let group = add(&mut mixer, "Drums", TrackKind::AudioGroup);
    let kick = mixer
        .add_track(AddTrackRequest::new("Kick", TrackKind::Audio).routed_to(group))
        .expect("kick should route to the group");
    let keys = add(&mut mixer, "Keys", TrackKind::Audio);
    mixer.add_to_group(group, kick).expect("kick should join the group");
    mixer.set_soloed(kick, true).expect("solo should apply");

    let (l, _) = run_cycle(&mut mixer, &[(kick, 0.25), (keys, 0.5)]);
    assert_abs_diff_eq!(l, 0.25 + DEFAULT_DENORMAL_PREVENTION_VAL, epsilon = 1e-9);
}

#[test]
fn listened_track_is_added_over_the_dimmed_mix() {
    let mut mixer = test_mixer();
    let guitar = add(&mut mixer, "Guitar", TrackKind::Audio);
    let piano = add(&mut mixer, "Piano", TrackKind::Audio);
    mixer.set_listened(guitar, true).expect("listen should apply");

    let (l, _) = run_cycle(&mut mixer, &[(guitar, 0.25), (piano, 0.5)]);
    assert_abs_diff_eq!(l, 0.75 * 0.1 + 0.25, epsilon = 1e-6);

    mixer.control_room().set_dim_output(true);
    let (l, _) = run_cycle(&mut mixer, &[(guitar, 0.25), (piano, 0.5)]);
    assert_abs_diff_eq!(l, (0.75 * 0.1 + 0.25) * 0.1, epsilon = 1e-6);
}

#[test]
fn oversized_blocks_are_refused() {
    let mut mixer = test_mixer();
    assert!(matches!(
        mixer.process_cycle(BLOCK as u32 + 1),
        Err(MixerError::BlockTooLarge { requested, max }) if requested == 65 && max == BLOCK
    ));
}

#[test]
fn removing_a_track_renumbers_the_rest() {
    let mut mixer = test_mixer();
    let bus = add(&mut mixer, "Bus", TrackKind::AudioBus);
    let guitar = add(&mut mixer, "Guitar", TrackKind::Audio);
    let piano = mixer
        .add_track(AddTrackRequest::new("Piano", TrackKind::Audio).routed_to(bus))
        .expect("piano should route to the bus");
    let piano_controls = mixer.controls(piano).expect("piano should have a fader");

    mixer.remove_track(guitar).expect("guitar should be removed");

    let piano = TrackHandle::new(2);
    assert_eq!(mixer.tracks().len(), 3);
    assert_eq!(piano_controls.track(), Some(piano));
    assert_eq!(mixer.tracks().find_by_name("Piano"), Some(piano));
    assert_eq!(mixer.tracks().output_track(piano), Some(bus));
    let strip = mixer.strip(piano).expect("piano strip should follow its track");
    assert_eq!(strip.prefader().controls().track(), Some(piano));

    let (l, _) = run_cycle(&mut mixer, &[(piano, 0.5)]);
    assert_abs_diff_eq!(l, 0.5, epsilon = 1e-6);
}

#[test]
fn removing_a_bus_drops_routes_into_it() {
    let mut mixer = test_mixer();
    let bus = add(&mut mixer, "Bus", TrackKind::AudioBus);
    let guitar = mixer
        .add_track(AddTrackRequest::new("Guitar", TrackKind::Audio).routed_to(bus))
        .expect("guitar should route to the bus");

    mixer.remove_track(bus).expect("bus should be removed");

    let guitar = TrackHandle::new(guitar.index() - 1);
    assert_eq!(mixer.tracks().output_track(guitar), None);
    let (l, _) = run_cycle(&mut mixer, &[(guitar, 0.5)]);
    assert_eq!(l, 0.0);
}

#[test]
fn moving_a_track_keeps_strips_and_controls_aligned() {
    let mut mixer = test_mixer();
    let guitar = add(&mut mixer, "Guitar", TrackKind::Audio);
    let piano = add(&mut mixer, "Piano", TrackKind::Audio);
    let guitar_controls = mixer.controls(guitar).expect("guitar should have a fader");
    let piano_controls = mixer.controls(piano).expect("piano should have a fader");

    mixer
        .move_track(piano.index(), 0)
        .expect("move should succeed");

    assert_eq!(mixer.tracks().find_by_name("Piano"), Some(TrackHandle::new(0)));
    assert_eq!(piano_controls.track(), Some(TrackHandle::new(0)));
    assert_eq!(guitar_controls.track(), Some(TrackHandle::new(2)));
    let master = mixer.master().expect("master should still exist");
    assert_eq!(master, TrackHandle::new(1));
    assert_eq!(mixer.tracks().output_track(TrackHandle::new(0)), Some(master));

    assert!(matches!(
        mixer.move_track(0, 9),
        Err(MixerError::Track(TrackGraphError::InvalidMove { from: 0, to: 9 }))
    ));
}

#[test]
fn frozen_track_renders_its_pool_clip() {
    let mut mixer = test_mixer();
    let guitar = add(&mut mixer, "Guitar", TrackKind::Audio);
    let clip = mixer
        .pool_mut()
        .add(AudioClip::from_mono("guitar-freeze", 48_000, vec![0.5; 100]));
    mixer
        .set_frozen(guitar, Some(clip))
        .expect("freeze should apply");

    let rendered = render_offline(&mut mixer, &[], 128).expect("render should succeed");
    assert_eq!(rendered.frames(), 128);
    assert_abs_diff_eq!(rendered.l[0], 0.5, epsilon = 1e-6);
    assert_abs_diff_eq!(rendered.r[99], 0.5, epsilon = 1e-6);
    assert_eq!(rendered.l[100], 0.0);

    mixer.set_frozen(guitar, None).expect("unfreeze should apply");
    let rendered = render_offline(&mut mixer, &[], 16).expect("render should succeed");
    assert_eq!(rendered.peak(), 0.0);
}

#[test]
fn sample_processor_feeds_the_monitor_directly() {
    let mut mixer = test_mixer();
    mixer.clear_buffers();
    let input = mixer
        .sample_processor_input_mut()
        .expect("sample processor should have an input");
    input.l.buffer_mut()[..FRAMES as usize].fill(0.3);
    input.r.buffer_mut()[..FRAMES as usize].fill(0.3);
    mixer.process_cycle(FRAMES).expect("cycle should process");

    let out = mixer.monitor_output().expect("monitor should have an output");
    assert_abs_diff_eq!(out.l.buffer()[0], 0.3, epsilon = 1e-6);
}
