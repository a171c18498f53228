use std::path::Path;

use approx::assert_abs_diff_eq;
use mixlane_core::{
    audio_pool::{AudioPool, PoolClipId, decode_stereo_clip},
    config::AudioConfig,
    dsp::DspPreference,
    fixtures::demo_session,
    mixer::{AddTrackRequest, Mixer},
    render::{freeze_track, render_offline},
    track::{TrackGraph, TrackKind},
};
use tempfile::tempdir;

fn write_test_wav(path: &Path, channels: u16, frames: usize, l: i16, r: i16) {
    let spec = hound::WavSpec {
        channels,
        sample_rate: 44_100,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec).expect("test wav should be creatable");
    for _ in 0..frames {
        writer
            .write_sample(l)
            .expect("test wav sample write should succeed");
        if channels > 1 {
            writer
                .write_sample(r)
                .expect("test wav sample write should succeed");
        }
    }
    writer.finalize().expect("test wav finalize should succeed");
}

#[test]
fn stereo_wav_decodes_into_both_channels() {
    let temp = tempdir().expect("tempdir should be creatable");
    let path = temp.path().join("stereo.wav");
    write_test_wav(&path, 2, 300, 16_384, -16_384);

    let clip = decode_stereo_clip(&path).expect("stereo wav should decode");
    assert_eq!(clip.sample_rate, 44_100);
    assert_eq!(clip.frames(), 300);
    let (l, r) = clip.channels();
    assert_abs_diff_eq!(l[0], 0.5, epsilon = 1e-3);
    assert_abs_diff_eq!(r[299], -0.5, epsilon = 1e-3);
}

#[test]
fn mono_wav_is_duplicated_to_stereo() {
    let temp = tempdir().expect("tempdir should be creatable");
    let path = temp.path().join("mono.wav");
    write_test_wav(&path, 1, 120, 8_192, 0);

    let mut pool = AudioPool::new();
    let id = pool.load_file(&path).expect("mono wav should load into the pool");
    let clip = pool.clip(id).expect("loaded clip should be in the pool");
    let (l, r) = clip.channels();
    assert_eq!(l, r);
    assert_abs_diff_eq!(l[10], 0.25, epsilon = 1e-3);
}

#[test]
fn unreadable_files_are_reported() {
    let temp = tempdir().expect("tempdir should be creatable");
    let missing = temp.path().join("missing.wav");
    assert!(decode_stereo_clip(&missing).is_err());

    let garbage = temp.path().join("garbage.wav");
    std::fs::write(&garbage, b"definitely not riff").expect("writing garbage should work");
    let mut pool = AudioPool::new();
    assert!(pool.load_file(&garbage).is_err());
    assert!(pool.is_empty());
}

#[test]
fn pool_ids_are_not_reused_after_removal() {
    let temp = tempdir().expect("tempdir should be creatable");
    let path = temp.path().join("short.wav");
    write_test_wav(&path, 2, 10, 100, 100);

    let mut pool = AudioPool::new();
    let first = pool.load_file(&path).expect("wav should load");
    assert!(pool.remove(first).is_some());
    let second = pool.load_file(&path).expect("wav should load");
    assert_ne!(first, second);
    assert_eq!(second, PoolClipId(1));
    assert!(pool.clip(first).is_none());
}

#[test]
fn decoded_freeze_clip_replaces_live_input() {
    let temp = tempdir().expect("tempdir should be creatable");
    let path = temp.path().join("freeze.wav");
    write_test_wav(&path, 2, 256, 16_384, 8_192);

    let mut mixer = Mixer::in_memory(&AudioConfig {
        max_block_size: 128,
        dsp_backend: DspPreference::Scalar,
        ..AudioConfig::default()
    });
    let track = mixer
        .add_track(AddTrackRequest::new("Frozen", TrackKind::Audio))
        .expect("track should be added");
    let clip = mixer
        .pool_mut()
        .load_file(&path)
        .expect("freeze clip should load");
    mixer.set_frozen(track, Some(clip)).expect("freeze should apply");

    let rendered = render_offline(&mut mixer, &[], 256).expect("render should succeed");
    assert_abs_diff_eq!(rendered.l[200], 0.5, epsilon = 1e-3);
    assert_abs_diff_eq!(rendered.r[200], 0.25, epsilon = 1e-3);
}

#[test]
fn freezing_a_track_keeps_the_mix_intact() {
    let temp = tempdir().expect("tempdir should be creatable");
    let audio = AudioConfig {
        max_block_size: 256,
        dsp_backend: DspPreference::Scalar,
        ..AudioConfig::default()
    };
    let mut live = demo_session(&audio);
    let mut frozen = demo_session(&audio);

    let clip = freeze_track(
        &mut frozen.mixer,
        &frozen.sources,
        frozen.tracks.bass,
        2_048,
        temp.path(),
    )
    .expect("bass should freeze");
    assert!(temp.path().join("bass.wav").is_file());
    assert_eq!(
        frozen.mixer.tracks().pool_clip(frozen.tracks.bass),
        Some(clip)
    );

    let expected = render_offline(&mut live.mixer, &live.sources, 2_048)
        .expect("live render should succeed");
    let actual =
        render_offline(&mut frozen.mixer, &frozen.sources, 2_048)
            .expect("frozen render should succeed");
    for (left, right) in expected.l.iter().zip(&actual.l) {
        assert_abs_diff_eq!(left, right, epsilon = 1e-3);
    }
}
