use std::{f32::consts::TAU, fs, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::{
    audio_pool::PoolClipId,
    math::calculate_rms_db,
    mixer::{Mixer, MixerError},
    track::{TrackGraphError, TrackHandle},
    transport::{PlayState, TransportState},
};

/// Deterministic sine fed into a track's pre-fader input. Phase is derived
/// from the absolute frame so blocks can be rendered in any size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ToneSource {
    pub track: TrackHandle,
    pub frequency_hz: f32,
    pub level: f32,
}

impl ToneSource {
    #[must_use]
    pub fn new(track: TrackHandle, frequency_hz: f32, level: f32) -> Self {
        Self {
            track,
            frequency_hz,
            level,
        }
    }

    /// Adds the tone for frames `start_frame..` onto both channels.
    pub fn add_to(&self, start_frame: i64, sample_rate: u32, l: &mut [f32], r: &mut [f32]) {
        let rate = f64::from(sample_rate.max(1));
        let cycles_per_frame = f64::from(self.frequency_hz) / rate;
        for (offset, (left, right)) in l.iter_mut().zip(r.iter_mut()).enumerate() {
            let frame = start_frame + offset as i64;
            let phase = (frame as f64 * cycles_per_frame).fract() as f32;
            let sample = (phase * TAU).sin() * self.level;
            *left += sample;
            *right += sample;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RenderedAudio {
    pub sample_rate: u32,
    pub l: Vec<f32>,
    pub r: Vec<f32>,
}

impl RenderedAudio {
    #[must_use]
    pub fn frames(&self) -> usize {
        self.l.len().min(self.r.len())
    }

    #[must_use]
    pub fn peak(&self) -> f32 {
        self.l
            .iter()
            .chain(&self.r)
            .map(|sample| sample.abs())
            .fold(0.0, f32::max)
    }

    #[must_use]
    pub fn rms_db(&self) -> (f32, f32) {
        (calculate_rms_db(&self.l), calculate_rms_db(&self.r))
    }

    /// Samples quantized to 16-bit, interleaved L/R.
    #[must_use]
    pub fn interleaved_i16(&self) -> Vec<i16> {
        self.l
            .iter()
            .zip(&self.r)
            .flat_map(|(left, right)| [quantize(*left), quantize(*right)])
            .collect()
    }
}

fn quantize(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)).round() as i16
}

/// Renders `total_frames` of the monitor output from the start of the
/// timeline, feeding `sources` into their tracks block by block.
#[instrument(skip(mixer, sources), fields(sources = sources.len(), total_frames))]
pub fn render_offline(
    mixer: &mut Mixer,
    sources: &[ToneSource],
    total_frames: usize,
) -> Result<RenderedAudio, MixerError> {
    let block = mixer.max_block_size().max(1);
    let sample_rate = mixer.audio_config().sample_rate;
    let bounce_mode = mixer.transport().bounce_mode;
    *mixer.transport_mut() = TransportState {
        play_state: PlayState::Rolling,
        playhead_frame: 0,
        bounce_mode,
    };

    let mut rendered = RenderedAudio {
        sample_rate,
        l: Vec::with_capacity(total_frames),
        r: Vec::with_capacity(total_frames),
    };
    let mut remaining = total_frames;
    while remaining > 0 {
        let nframes = remaining.min(block);
        let start_frame = mixer.transport().playhead_frame;
        mixer.clear_buffers();
        for source in sources {
            if let Some(input) = mixer.track_input_mut(source.track) {
                let (l, r) = input.split_mut(0..nframes);
                source.add_to(start_frame, sample_rate, l, r);
            }
        }

        let frames = u32::try_from(nframes).map_err(|_| MixerError::BlockTooLarge {
            requested: u32::MAX,
            max: block,
        })?;
        mixer.process_cycle(frames)?;
        if let Some(output) = mixer.monitor_output() {
            let (l, r) = output.split(0..nframes);
            rendered.l.extend_from_slice(l);
            rendered.r.extend_from_slice(r);
        }
        remaining -= nframes;
    }

    debug!(frames = rendered.frames(), peak = rendered.peak(), "offline render complete");
    Ok(rendered)
}

#[instrument(skip(audio), fields(path = %path.display(), frames = audio.frames()))]
pub fn write_wav(path: &Path, audio: &RenderedAudio) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| {
            format!(
                "failed to create wav output directory: {}",
                parent.display()
            )
        })?;
    }

    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: audio.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .with_context(|| format!("failed to create wav file: {}", path.display()))?;

    for sample in audio.interleaved_i16() {
        writer
            .write_sample(sample)
            .context("failed to write wav sample")?;
    }

    writer.finalize().context("failed to finalize wav file")?;
    info!("wav export completed");
    Ok(())
}

/// Bounces the raw input of `track` to `<clip_dir>/<name>.wav`, decodes it
/// into the pool and freezes the track onto the result.
#[instrument(skip(mixer, sources, clip_dir), fields(%track, frames))]
pub fn freeze_track(
    mixer: &mut Mixer,
    sources: &[ToneSource],
    track: TrackHandle,
    frames: usize,
    clip_dir: &Path,
) -> Result<PoolClipId, MixerError> {
    let name = mixer
        .tracks()
        .get(track)
        .map(|node| node.name.to_lowercase().replace(' ', "-"))
        .ok_or(TrackGraphError::TrackNotFound(track))?;
    let sample_rate = mixer.audio_config().sample_rate;
    let mut audio = RenderedAudio {
        sample_rate,
        l: vec![0.0; frames],
        r: vec![0.0; frames],
    };
    for source in sources.iter().filter(|source| source.track == track) {
        source.add_to(0, sample_rate, &mut audio.l, &mut audio.r);
    }

    let path = clip_dir.join(format!("{name}.wav"));
    write_wav(&path, &audio)?;
    let clip = mixer.pool_mut().load_file(&path)?;
    mixer.set_frozen(track, Some(clip))?;
    info!(%clip, path = %path.display(), "track frozen");
    Ok(clip)
}
