use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use mixlane_core::{
    DspPreference, EngineConfig, TrackHandle,
    diagnostics::init_tracing_with_options,
    fingerprint::{generate_fingerprint, write_fingerprint},
    fixtures::{DemoSession, demo_session_from_config},
    render::{freeze_track, render_offline, write_wav},
    solo::solo_map,
};

#[derive(Debug, Parser)]
#[command(name = "mixlane-cli")]
#[command(about = "Headless tools for rendering and inspecting Mixlane mixes")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Overrides the configured log directory.
    #[arg(long)]
    log_dir: Option<PathBuf>,

    #[arg(long, value_enum)]
    backend: Option<BackendArg>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Render {
        #[arg(long, default_value = "data/exports/demo-mix.wav")]
        output: PathBuf,

        #[command(flatten)]
        mix: MixArgs,
    },
    Fingerprint {
        #[arg(long, default_value = "data/fingerprints/demo-mix.json")]
        output: PathBuf,

        #[command(flatten)]
        mix: MixArgs,
    },
    SoloMap {
        #[arg(long = "solo")]
        solo: Vec<String>,
    },
}

#[derive(Debug, Args)]
struct MixArgs {
    #[arg(long, default_value_t = 96_000)]
    frames: usize,

    #[arg(long = "solo")]
    solo: Vec<String>,

    #[arg(long = "mute")]
    mute: Vec<String>,

    #[arg(long = "listen")]
    listen: Vec<String>,

    #[arg(long = "mono")]
    mono: Vec<String>,

    /// Tracks to bounce into the freeze directory and play back from there.
    #[arg(long = "freeze")]
    freeze: Vec<String>,

    #[arg(long)]
    dim: bool,
}

#[derive(Debug, Clone, ValueEnum)]
enum BackendArg {
    Auto,
    Scalar,
    Vector,
}

impl From<BackendArg> for DspPreference {
    fn from(value: BackendArg) -> Self {
        match value {
            BackendArg::Auto => Self::Auto,
            BackendArg::Scalar => Self::Scalar,
            BackendArg::Vector => Self::Vector,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = EngineConfig::load_or_default()?;
    if let Some(backend) = cli.backend {
        config.audio.dsp_backend = backend.into();
    }
    let log_dir = cli
        .log_dir
        .unwrap_or_else(|| config.diagnostics.log_dir.clone());
    let _telemetry = init_tracing_with_options(
        &log_dir,
        &config.diagnostics.trace_file_prefix,
        &config.diagnostics.rust_log_filter,
    )?;

    match cli.command {
        Commands::Render { output, mix } => {
            let mut session = demo_session_from_config(&config)?;
            apply_mix_args(&session, &mix)?;
            freeze_tracks(&mut session, &mix, &config.freeze.clip_dir)?;
            let rendered = render_offline(&mut session.mixer, &session.sources, mix.frames)?;
            write_wav(&output, &rendered)?;
            let (rms_l, rms_r) = rendered.rms_db();
            tracing::info!(
                path = %output.display(),
                peak = rendered.peak(),
                rms_l,
                rms_r,
                "demo mix rendered"
            );
        }
        Commands::Fingerprint { output, mix } => {
            let mut session = demo_session_from_config(&config)?;
            apply_mix_args(&session, &mix)?;
            freeze_tracks(&mut session, &mix, &config.freeze.clip_dir)?;
            let report = generate_fingerprint(&mut session.mixer, &session.sources, mix.frames)?;
            write_fingerprint(&output, &report)?;
            tracing::info!(
                path = %output.display(),
                hash = %report.audio_hash,
                "fingerprint generated"
            );
        }
        Commands::SoloMap { solo } => {
            let session = demo_session_from_config(&config)?;
            for name in &solo {
                session.mixer.set_soloed(find_track(&session, name)?, true)?;
            }
            for state in solo_map(session.mixer.tracks()) {
                let name = session
                    .mixer
                    .tracks()
                    .get(state.track)
                    .map_or("?", |node| node.name.as_str());
                println!(
                    "{:<8} soloed={:<5} implied={:<5} listened={}",
                    name, state.soloed, state.implied_soloed, state.listened
                );
            }
        }
    }

    Ok(())
}

fn find_track(session: &DemoSession, name: &str) -> anyhow::Result<TrackHandle> {
    session
        .mixer
        .tracks()
        .find_by_name(name)
        .with_context(|| format!("no track named {name}"))
}

fn apply_mix_args(session: &DemoSession, mix: &MixArgs) -> anyhow::Result<()> {
    let mixer = &session.mixer;
    for name in &mix.solo {
        mixer.set_soloed(find_track(session, name)?, true)?;
    }
    for name in &mix.mute {
        mixer.set_muted(find_track(session, name)?, true)?;
    }
    for name in &mix.listen {
        mixer.set_listened(find_track(session, name)?, true)?;
    }
    for name in &mix.mono {
        mixer
            .controls(find_track(session, name)?)?
            .set_mono_compat_enabled(true, true)?;
    }
    mixer.control_room().set_dim_output(mix.dim);
    Ok(())
}

fn freeze_tracks(session: &mut DemoSession, mix: &MixArgs, clip_dir: &Path) -> anyhow::Result<()> {
    for name in &mix.freeze {
        let track = find_track(session, name)?;
        freeze_track(
            &mut session.mixer,
            &session.sources,
            track,
            mix.frames,
            clip_dir,
        )?;
    }
    Ok(())
}
