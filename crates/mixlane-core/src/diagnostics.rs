use std::{fs, path::Path};

use anyhow::Context;
use chrono::Utc;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use crate::{fader::FaderControls, math::assert_finite};

const DEFAULT_FILTER: &str = "info,mixlane_core=debug";

pub struct TelemetryGuard {
    pub session_id: Uuid,
    _file_guard: WorkerGuard,
}

pub fn init_tracing(log_dir: impl AsRef<Path>) -> anyhow::Result<TelemetryGuard> {
    init_tracing_with_options(log_dir, "mixlane", DEFAULT_FILTER)
}

pub fn init_tracing_with_options(
    log_dir: impl AsRef<Path>,
    file_prefix: &str,
    default_filter: &str,
) -> anyhow::Result<TelemetryGuard> {
    let log_dir = log_dir.as_ref();
    fs::create_dir_all(log_dir)
        .with_context(|| format!("failed to create log directory: {}", log_dir.display()))?;

    let session_id = Uuid::new_v4();
    let timestamp = Utc::now().format("%Y%m%d-%H%M%S");
    let file_name = format!("{file_prefix}-{timestamp}.log");
    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let stdout_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_thread_ids(true)
        .with_target(true);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(file_writer);

    if let Err(error) = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
    {
        warn!(?error, "global tracing subscriber already initialized");
    } else {
        info!(%session_id, "tracing initialized");
    }

    Ok(TelemetryGuard {
        session_id,
        _file_guard: file_guard,
    })
}

/// Checks a fader's cached and control values for NaN/inf and logs what it
/// finds. Returns whether everything was finite. Control thread only.
pub fn audit_fader(controls: &FaderControls) -> bool {
    let values = [
        (controls.amp(), "amp"),
        (controls.balance(), "balance"),
        (controls.fader_val(), "fader_val"),
        (controls.volume_db(), "volume_db"),
    ];
    let mut healthy = true;
    for (value, what) in values {
        healthy &= assert_finite(value, what);
    }

    let amp_range = controls.amp_port().value().range();
    if !(amp_range.min..=amp_range.max).contains(&controls.amp()) {
        error!(amp = controls.amp(), "amp outside its range");
        healthy = false;
    }
    if !healthy {
        error!(role = ?controls.role(), track = ?controls.track(), "fader audit failed");
    }
    healthy
}
