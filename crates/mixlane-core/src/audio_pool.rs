use std::{fmt, fs::File, io::ErrorKind, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use symphonia::core::{
    audio::{AudioBufferRef, SampleBuffer},
    codecs::DecoderOptions,
    errors::Error as SymphoniaError,
    formats::FormatOptions,
    io::MediaSourceStream,
    meta::MetadataOptions,
    probe::Hint,
};
use tracing::{debug, info, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PoolClipId(pub u32);

impl fmt::Display for PoolClipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "clip-{}", self.0)
    }
}

/// Pre-rendered stereo audio, e.g. the bounce of a frozen track.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub name: String,
    pub sample_rate: u32,
    l: Vec<f32>,
    r: Vec<f32>,
}

impl AudioClip {
    /// Frames beyond the shorter channel are dropped.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        sample_rate: u32,
        mut l: Vec<f32>,
        mut r: Vec<f32>,
    ) -> Self {
        let frames = l.len().min(r.len());
        l.truncate(frames);
        r.truncate(frames);
        Self {
            name: name.into(),
            sample_rate,
            l,
            r,
        }
    }

    #[must_use]
    pub fn from_mono(name: impl Into<String>, sample_rate: u32, samples: Vec<f32>) -> Self {
        let r = samples.clone();
        Self::new(name, sample_rate, samples, r)
    }

    #[must_use]
    pub fn frames(&self) -> usize {
        self.l.len()
    }

    #[must_use]
    pub fn channels(&self) -> (&[f32], &[f32]) {
        (&self.l, &self.r)
    }

    /// Writes the clip's frames starting at `start_frame` into `l`/`r`.
    /// Positions before the start or past the end of the clip become silence.
    pub fn fill_stereo(&self, start_frame: i64, l: &mut [f32], r: &mut [f32]) {
        for (offset, (out_l, out_r)) in l.iter_mut().zip(r.iter_mut()).enumerate() {
            let position = start_frame + offset as i64;
            let source = usize::try_from(position)
                .ok()
                .filter(|index| *index < self.l.len());
            match source {
                Some(index) => {
                    *out_l = self.l[index];
                    *out_r = self.r[index];
                }
                None => {
                    *out_l = 0.0;
                    *out_r = 0.0;
                }
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AudioPool {
    clips: Vec<(PoolClipId, AudioClip)>,
    next_id: u32,
}

impl AudioPool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, clip: AudioClip) -> PoolClipId {
        let id = PoolClipId(self.next_id);
        self.next_id += 1;
        debug!(%id, name = %clip.name, frames = clip.frames(), "clip added to pool");
        self.clips.push((id, clip));
        id
    }

    #[must_use]
    pub fn clip(&self, id: PoolClipId) -> Option<&AudioClip> {
        self.clips
            .iter()
            .find(|(clip_id, _)| *clip_id == id)
            .map(|(_, clip)| clip)
    }

    pub fn remove(&mut self, id: PoolClipId) -> Option<AudioClip> {
        let index = self.clips.iter().position(|(clip_id, _)| *clip_id == id)?;
        Some(self.clips.remove(index).1)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.clips.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    pub fn load_file(&mut self, path: &Path) -> Result<PoolClipId> {
        let clip = decode_stereo_clip(path)?;
        let id = self.add(clip);
        info!(%id, "clip decoded into pool");
        Ok(id)
    }
}

/// Decodes any format symphonia can probe into a stereo clip. Mono sources are
/// duplicated; channels beyond the second are ignored.
pub fn decode_stereo_clip(path: &Path) -> Result<AudioClip> {
    let file = File::open(path)
        .with_context(|| format!("failed to open audio file: {}", path.display()))?;
    let source = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|value| value.to_str()) {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            source,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .with_context(|| format!("unsupported audio file: {}", path.display()))?;
    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| anyhow::anyhow!("no default audio track found in {}", path.display()))?;
    let mut decoder =
        symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(48_000);
    let mut l = Vec::new();
    let mut r = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(error)) if error.kind() == ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => {
                return Err(anyhow::anyhow!(
                    "audio stream reset required for {}",
                    path.display()
                ));
            }
            Err(error) => return Err(error.into()),
        };

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(error) => return Err(error.into()),
        };

        sample_rate = decoded.spec().rate;
        push_stereo_frames(decoded, &mut l, &mut r);
    }

    if l.is_empty() {
        return Err(anyhow::anyhow!(
            "decoded zero samples from {}",
            path.display()
        ));
    }

    let name = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("clip")
        .to_string();
    debug!(sample_rate, frames = l.len(), "clip decode complete");
    Ok(AudioClip::new(name, sample_rate, l, r))
}

fn push_stereo_frames(decoded: AudioBufferRef<'_>, l: &mut Vec<f32>, r: &mut Vec<f32>) {
    let spec = *decoded.spec();
    let channel_count = spec.channels.count().max(1);
    let mut sample_buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
    sample_buffer.copy_interleaved_ref(decoded);

    for frame in sample_buffer.samples().chunks(channel_count) {
        let left = frame[0];
        let right = frame.get(1).copied().unwrap_or(left);
        l.push(left);
        r.push(right);
    }
}
