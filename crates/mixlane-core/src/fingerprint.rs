use std::{fs, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::instrument;

use crate::{
    mixer::{Mixer, MixerError},
    render::{ToneSource, render_offline},
    solo::solo_map,
};

const FINGERPRINT_SCHEMA_VERSION: u32 = 1;

/// Hashes of a rendered mix, for comparing engine behaviour across changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MixFingerprint {
    pub schema_version: u32,
    pub sample_rate: u32,
    pub frames: usize,
    pub track_count: usize,
    pub dsp_backend: String,
    pub peak: f32,
    pub solo_hash: String,
    pub audio_hash: String,
}

impl MixFingerprint {
    /// Equality of everything except the backend name.
    #[must_use]
    pub fn same_mix(&self, other: &Self) -> bool {
        self.audio_hash == other.audio_hash
            && self.solo_hash == other.solo_hash
            && self.frames == other.frames
    }
}

#[instrument(skip(mixer, sources), fields(frames))]
pub fn generate_fingerprint(
    mixer: &mut Mixer,
    sources: &[ToneSource],
    frames: usize,
) -> Result<MixFingerprint, MixerError> {
    let solo_bytes = serde_json::to_vec(&solo_map(mixer.tracks()))
        .context("failed to serialize solo map")?;
    let rendered = render_offline(mixer, sources, frames)?;

    let mut audio_bytes = Vec::with_capacity(rendered.frames() * 4);
    for sample in rendered.interleaved_i16() {
        audio_bytes.extend_from_slice(&sample.to_le_bytes());
    }

    Ok(MixFingerprint {
        schema_version: FINGERPRINT_SCHEMA_VERSION,
        sample_rate: rendered.sample_rate,
        frames: rendered.frames(),
        track_count: mixer.tracks().len(),
        dsp_backend: mixer.dsp().name().to_string(),
        peak: rendered.peak(),
        solo_hash: hash_hex(&solo_bytes),
        audio_hash: hash_hex(&audio_bytes),
    })
}

pub fn read_fingerprint(path: &Path) -> Result<MixFingerprint> {
    let bytes = fs::read(path)
        .with_context(|| format!("failed to read fingerprint: {}", path.display()))?;
    let report: MixFingerprint =
        serde_json::from_slice(&bytes).context("failed to parse fingerprint json")?;
    Ok(report)
}

pub fn write_fingerprint(path: &Path, report: &MixFingerprint) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| {
            format!("failed to create fingerprint directory: {}", parent.display())
        })?;
    }

    let json = serde_json::to_vec_pretty(report).context("failed to encode fingerprint json")?;
    fs::write(path, json)
        .with_context(|| format!("failed to write fingerprint: {}", path.display()))?;
    Ok(())
}

fn hash_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    format!("{digest:x}")
}
