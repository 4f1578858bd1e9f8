// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Posture Stream Tool

Logs in (when no credentials are stored), opens a realtime analysis session,
optionally calibrates, streams frames for a fixed duration and prints the
session summary.

Usage:
  cargo run --bin posture-stream -- --frames ./captures --duration-secs 30

Without `--frames` a synthetic gray frame is streamed, which is enough to
exercise the connection but will not produce landmarks.
*/

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, FromArgMatches, Parser};
use posture::agent::{
    DirectoryFrameSource, EncodedFrame, FrameSource, PostureClient, SessionConnection,
    SessionPhase, SessionSnapshot,
};
use posture::config::{load_config_or_default, LogFormat as ConfigLogFormat, PostureConfig};
use posture::observability::{
    debug_flags_help, init_logging, parse_debug_flags, LogFormat, LoggingSettings,
};
use tokio::time::{self, Instant};
use tracing::{info, warn};

const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);
const CALIBRATION_TIMEOUT: Duration = Duration::from_secs(60);
const SYNTHETIC_WIDTH: u32 = 320;
const SYNTHETIC_HEIGHT: u32 = 240;

#[derive(Parser, Debug)]
#[command(name = "posture-stream", version, about = "Stream camera frames to the posture analysis service")]
struct Args {
    /// Configuration file (default: discovered posture_configuration.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, env = "POSTURE_USERNAME")]
    username: Option<String>,

    #[arg(long, env = "POSTURE_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Directory of .jpg/.jpeg frames, streamed in name order and looped
    #[arg(long)]
    frames: Option<PathBuf>,

    /// Capture rate override
    #[arg(long)]
    fps: Option<f64>,

    #[arg(long, default_value_t = 30)]
    duration_secs: u64,

    #[arg(long)]
    skip_calibration: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let debug_flags = parse_debug_flags();
    let matches = Args::command()
        .after_help(debug_flags_help())
        .get_matches_from(std::env::args().filter(|arg| !arg.starts_with("--debug-")));
    let args = Args::from_arg_matches(&matches)?;

    let mut overrides = HashMap::new();
    if let Some(fps) = args.fps {
        overrides.insert("capture_fps".to_string(), fps.to_string());
    }
    let config = load_config_or_default(args.config.as_deref(), Some(&overrides))
        .context("Failed to load configuration")?;

    let _log_guard = init_logging(&debug_flags, &logging_settings(&config))?;

    let client = PostureClient::from_config(&config).context("Failed to build client")?;
    if !client.auth().is_authenticated() {
        let username = args
            .username
            .as_deref()
            .context("No stored credentials; pass --username and --password")?;
        let password = args
            .password
            .as_deref()
            .context("--password is required to log in")?;
        client
            .auth()
            .login(username, password)
            .await
            .context("Login failed")?;
    }
    match client.auth().fetch_profile().await {
        Some(profile) => println!(
            "Signed in as {} ({} tier, {} sessions used today)",
            profile.username, profile.tier, profile.daily_sessions_used
        ),
        None => warn!("Profile unavailable; continuing"),
    }

    let source = frame_source(args.frames.as_ref(), &config)?;
    let session = client.session();
    let outcome = stream(&session, source, &config, &args).await;
    session.disconnect();
    outcome
}

fn logging_settings(config: &PostureConfig) -> LoggingSettings {
    LoggingSettings {
        level: config.logging.level.clone(),
        format: match config.logging.format {
            ConfigLogFormat::Text => LogFormat::Text,
            ConfigLogFormat::Json => LogFormat::Json,
        },
        log_dir: config.logging.log_dir.clone(),
        ..LoggingSettings::default()
    }
}

fn frame_source(frames: Option<&PathBuf>, config: &PostureConfig) -> Result<Arc<dyn FrameSource>> {
    match frames {
        Some(dir) => {
            let source = DirectoryFrameSource::open(dir)?;
            if source.is_empty() {
                bail!("No .jpg/.jpeg frames in {}", dir.display());
            }
            info!("Streaming {} frames from {}", source.len(), dir.display());
            Ok(Arc::new(source))
        }
        None => {
            let pixels = vec![128u8; (SYNTHETIC_WIDTH * SYNTHETIC_HEIGHT * 3) as usize];
            let frame = EncodedFrame::from_rgb(
                SYNTHETIC_WIDTH,
                SYNTHETIC_HEIGHT,
                &pixels,
                config.capture.jpeg_quality,
            )?;
            info!("Streaming a synthetic {} byte frame", frame.len());
            Ok(Arc::new(move || Some(frame.clone())))
        }
    }
}

async fn stream(
    session: &SessionConnection,
    source: Arc<dyn FrameSource>,
    config: &PostureConfig,
    args: &Args,
) -> Result<()> {
    session.connect()?;
    let opened = time::timeout(SETTLE_TIMEOUT, session.wait_until_settled())
        .await
        .context("Timed out opening the session channel")?;
    if !opened.is_open() {
        bail!("Session channel closed: {}", describe_close(&opened));
    }

    session.start_session();
    let started = wait_for(session, SETTLE_TIMEOUT, |s| s.session_id.is_some() || !s.is_open())
        .await
        .context("Server never confirmed the session")?;
    if !started.is_open() {
        bail!("Session rejected: {}", describe_close(&started));
    }
    println!("Session {} started", started.session_id.unwrap_or_default());

    session.start_frame_loop(source, config.capture.frames_per_second)?;

    if !args.skip_calibration {
        session.start_calibration();
        let calibrated = wait_for(session, CALIBRATION_TIMEOUT, |s| {
            (s.phase == SessionPhase::Active && s.calibration_progress >= 1.0) || !s.is_open()
        })
        .await
        .context("Calibration did not complete")?;
        if !calibrated.is_open() {
            bail!("Session closed during calibration: {}", describe_close(&calibrated));
        }
        println!("Calibration complete");
    }

    let deadline = Instant::now() + Duration::from_secs(args.duration_secs);
    let mut report = time::interval(Duration::from_secs(1));
    while Instant::now() < deadline {
        report.tick().await;
        let snapshot = session.snapshot();
        if !snapshot.is_open() {
            bail!("Session closed while streaming: {}", describe_close(&snapshot));
        }
        if let Some(result) = &snapshot.latest_result {
            match (result.score, &result.label) {
                (Some(score), Some(label)) => println!("score {:5.1}  {}", score, label),
                _ => println!("{}", result.message.as_deref().unwrap_or("no pose detected")),
            }
        }
    }

    session.stop_frame_loop();
    session.end_session();
    let ended = wait_for(session, SETTLE_TIMEOUT, |s| s.summary.is_some() || !s.is_open())
        .await
        .context("Server never sent a session summary")?;

    match ended.summary {
        Some(summary) => {
            println!("Session {} summary", summary.session_id);
            println!("  duration:        {:.1}s", summary.duration_seconds);
            match summary.average_score {
                Some(score) => println!("  average score:   {:.1}", score),
                None => println!("  average score:   n/a"),
            }
            println!("  frames analyzed: {}", summary.total_frames_analyzed);
            println!("  scores recorded: {}", summary.scores_recorded);
            Ok(())
        }
        None => bail!("Session closed before a summary: {}", describe_close(&ended)),
    }
}

async fn wait_for<P>(
    session: &SessionConnection,
    limit: Duration,
    predicate: P,
) -> Result<SessionSnapshot>
where
    P: Fn(&SessionSnapshot) -> bool,
{
    let mut updates = session.subscribe();
    let waited = time::timeout(limit, async {
        loop {
            {
                let current = updates.borrow_and_update();
                if predicate(&current) {
                    return Ok(current.clone());
                }
            }
            if updates.changed().await.is_err() {
                bail!("session dropped");
            }
        }
    })
    .await;
    waited.context("timed out")?
}

fn describe_close(snapshot: &SessionSnapshot) -> String {
    match (&snapshot.close_reason, &snapshot.last_error) {
        (_, Some(error)) => error.user_message(),
        (Some(reason), None) => format!("{:?}", reason),
        (None, None) => "unknown".to_string(),
    }
}
