use crate::{
    config::{AudioConfig, EngineConfig},
    mixer::{AddTrackRequest, Mixer, MixerError},
    render::ToneSource,
    track::{TrackHandle, TrackKind},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DemoTracks {
    pub master: TrackHandle,
    pub band: TrackHandle,
    pub drums: TrackHandle,
    pub bass: TrackHandle,
    pub keys: TrackHandle,
    pub lead: TrackHandle,
}

#[derive(Debug)]
pub struct DemoSession {
    pub mixer: Mixer,
    pub tracks: DemoTracks,
    pub sources: Vec<ToneSource>,
}

/// Small fixed session: drums and bass grouped on a bus, keys straight to
/// master, and a MIDI lead with no audio path.
#[must_use]
pub fn demo_session(audio: &AudioConfig) -> DemoSession {
    populate(Mixer::in_memory(audio))
}

/// The demo session on a mixer whose monitor gains come from
/// `config.monitor.settings_path`.
pub fn demo_session_from_config(config: &EngineConfig) -> Result<DemoSession, MixerError> {
    Ok(populate(Mixer::from_config(config)?))
}

fn populate(mut mixer: Mixer) -> DemoSession {
    let master = mixer.master().expect("fixture mixer should have a master track");

    let band = mixer
        .add_track(AddTrackRequest::new("Band", TrackKind::AudioBus))
        .expect("fixture band bus should be valid");
    let drums = mixer
        .add_track(AddTrackRequest::new("Drums", TrackKind::Audio).routed_to(band))
        .expect("fixture drums track should be valid");
    let bass = mixer
        .add_track(AddTrackRequest::new("Bass", TrackKind::Audio).routed_to(band))
        .expect("fixture bass track should be valid");
    let keys = mixer
        .add_track(AddTrackRequest::new("Keys", TrackKind::Audio))
        .expect("fixture keys track should be valid");
    let lead = mixer
        .add_track(AddTrackRequest::new("Lead", TrackKind::Midi))
        .expect("fixture lead track should be valid");

    mixer
        .add_to_group(band, drums)
        .expect("fixture drums should join the band group");
    mixer
        .add_to_group(band, bass)
        .expect("fixture bass should join the band group");

    let sources = vec![
        ToneSource::new(drums, 110.0, 0.3),
        ToneSource::new(bass, 55.0, 0.4),
        ToneSource::new(keys, 440.0, 0.2),
    ];

    DemoSession {
        mixer,
        tracks: DemoTracks {
            master,
            band,
            drums,
            bass,
            keys,
            lead,
        },
        sources,
    }
}
