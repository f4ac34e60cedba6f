//! duet-agent: one process of a synchronized two-agent gameplay-recording
//! session. Wires `duet-core`'s episode engine to a logging-only world
//! handle and a small illustrative episode catalogue; a production
//! deployment swaps [`world::LoggingWorldHandle`] and [`capture`]'s types
//! for real world-server and video-pipeline clients.

mod capture;
mod episodes;
mod world;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use duet_core::{
    AgentRng, Catalogue, EpisodeRecord, PeerCoordinator, PhaseEngine, RecordingController,
    Selector, SessionConfig, Timeouts,
};

use capture::NullFrameCapture;
use world::LoggingWorldHandle;

#[derive(Parser, Debug)]
#[command(name = "duet-agent", about = "One peer of a synchronized two-agent gameplay recording session")]
struct Args {
    /// This agent's name (used for the primary/secondary tie-break, §3).
    #[arg(long, env = "DUET_OWN_NAME")]
    own_name: String,

    /// The peer agent's name.
    #[arg(long, env = "DUET_PEER_NAME")]
    peer_name: String,

    /// Port this agent listens on for the peer coordinator channel.
    #[arg(long, env = "DUET_OWN_PORT")]
    own_port: u16,

    /// host:port of the peer's listener.
    #[arg(long, env = "DUET_PEER_ADDR")]
    peer_addr: SocketAddr,

    /// Session seed shared out-of-band with the peer (I1).
    #[arg(long, env = "DUET_SEED")]
    seed: String,

    /// Number of episodes to run this session.
    #[arg(long, env = "DUET_EPISODE_COUNT", default_value_t = 10)]
    episode_count: u64,

    /// Episode index to start counting from (for resumed sessions).
    #[arg(long, env = "DUET_START_INDEX", default_value_t = 0)]
    start_index: u64,

    /// "flat" or "normal".
    #[arg(long, env = "DUET_WORLD_TYPE", default_value = "flat")]
    world_type: String,

    /// "all" or a comma-separated list of episode type names.
    #[arg(long, env = "DUET_EPISODE_FILTER", default_value = "all")]
    episode_filter: String,

    /// Smoke-test mode: walk the catalogue alphabetically, clamping N.
    #[arg(long, env = "DUET_SMOKE_TEST")]
    smoke_test: bool,

    /// Distinguishes concurrent instances writing to the same output
    /// directory; defaults to this process's PID.
    #[arg(long, env = "DUET_INSTANCE_ID")]
    instance_id: Option<String>,

    /// Directory episode records are written to.
    #[arg(long, env = "DUET_OUTPUT_DIR", default_value = ".")]
    output_dir: PathBuf,

    #[arg(long, env = "DUET_PHASE_TIMEOUT_SECS", default_value_t = 15)]
    phase_timeout_secs: u64,

    #[arg(long, env = "DUET_EPISODE_TIMEOUT_SECS", default_value_t = 300)]
    episode_timeout_secs: u64,

    #[arg(long, env = "DUET_RECORDING_STOP_TIMEOUT_SECS", default_value_t = 10)]
    recording_stop_timeout_secs: u64,

    #[arg(long, env = "DUET_CONNECT_RETRY_MS", default_value_t = 500)]
    connect_retry_ms: u64,

    /// Wall-clock bound on a single connect attempt (startup or reconnect).
    #[arg(long, env = "DUET_CONNECT_TIMEOUT_SECS", default_value_t = 30)]
    connect_timeout_secs: u64,

    /// How many reconnect attempts the coordinator makes after a mid-session
    /// link drop before the session is reported unrecoverable (§6 exit code 2).
    #[arg(long, env = "DUET_MAX_RECONNECT_ATTEMPTS", default_value_t = 10)]
    max_reconnect_attempts: u32,
}

fn init_tracing() -> Result<()> {
    let json_logs = std::env::var("DUET_LOG_JSON").unwrap_or_default() == "1";
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("duet_agent=info,duet_core=info"))
        .context("building log filter")?;
    if json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = init_tracing() {
        eprintln!("failed to initialize logging: {e:#}");
        return ExitCode::from(1);
    }

    match run().await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "fatal error, exiting");
            ExitCode::from(1)
        }
    }
}

async fn run() -> Result<ExitCode> {
    let args = Args::parse();
    let instance_id = args
        .instance_id
        .clone()
        .unwrap_or_else(|| std::process::id().to_string());

    let catalogue: Catalogue = episodes::default_catalogue();
    if let Some(bad_name) = unknown_filter_name(&args.episode_filter, &catalogue) {
        let err = duet_core::ConfigError::UnknownEpisodeType(bad_name);
        tracing::error!(error = %err, "invalid --episode-filter");
        return Ok(ExitCode::from(1));
    }

    let timeouts = Timeouts {
        phase_rendezvous: Duration::from_secs(args.phase_timeout_secs),
        episode_total: Duration::from_secs(args.episode_timeout_secs),
        recording_stop: Duration::from_secs(args.recording_stop_timeout_secs),
        connect_retry_interval: Duration::from_millis(args.connect_retry_ms),
        connect_timeout: Duration::from_secs(args.connect_timeout_secs),
        max_reconnect_attempts: args.max_reconnect_attempts,
    };

    let config = match SessionConfig::build(
        args.own_name.clone(),
        args.peer_name.clone(),
        args.own_port,
        args.peer_addr,
        args.seed.clone(),
        args.episode_count,
        args.start_index,
        &args.world_type,
        &args.episode_filter,
        args.smoke_test,
        timeouts,
    ) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            return Ok(ExitCode::from(1));
        }
    };

    tokio::fs::create_dir_all(&args.output_dir)
        .await
        .with_context(|| format!("creating output directory {}", args.output_dir.display()))?;

    let filtered = catalogue.filtered(config.world_type, &config.filter);
    if filtered.is_empty() {
        tracing::warn!("no episode types eligible for this world type and filter; nothing to run");
        return Ok(ExitCode::SUCCESS);
    }
    let selector = Selector::new(filtered, config.smoke_test);
    let episode_count = selector.clamp_episode_count(config.episode_count);
    if episode_count < config.episode_count {
        tracing::info!(
            requested = config.episode_count,
            clamped_to = episode_count,
            "smoke-test mode clamped episode count to the number of eligible types"
        );
    }

    tracing::info!(
        own_name = %config.own_name,
        peer_name = %config.peer_name,
        is_primary = config.is_primary(),
        episode_count,
        "starting session"
    );

    let coordinator = match PeerCoordinator::setup_connections(
        config.own_listen_port,
        config.peer_addr,
        config.timeouts.connect_retry_interval,
        config.timeouts.connect_timeout,
        config.timeouts.max_reconnect_attempts,
    )
    .await
    {
        Ok(c) => Arc::new(c),
        Err(e) => {
            tracing::error!(error = %e, "failed to establish peer coordinator channel");
            return Ok(ExitCode::from(1));
        }
    };

    let world = Arc::new(LoggingWorldHandle::new(Duration::from_millis(20)));
    let recording = RecordingController::new(NullFrameCapture, config.timeouts.recording_stop);
    let mut engine = PhaseEngine::new(
        Arc::clone(&coordinator),
        recording,
        world,
        config.own_name.clone(),
        config.peer_name.clone(),
        config.is_primary(),
        config.timeouts.phase_rendezvous,
    );

    let mut rng = AgentRng::new(config.seed.clone());
    let exit_code = ExitCode::SUCCESS;

    for offset in 0..episode_count {
        let episode_index = config.start_index + offset;

        // Give a dropped link the rest of its reconnect budget to recover
        // before starting the next episode (§8 scenario 4: "process attempts
        // to re-establish before the next episode"). If it never recovers,
        // the session is unrecoverable (§6 exit code 2).
        if let Err(e) = coordinator.await_connected().await {
            tracing::error!(error = %e, episode_index, "peer link did not recover; ending session");
            return Ok(ExitCode::from(2));
        }

        let episode_type = selector.select(episode_index, rng.selection_stream());
        let episode_name = episode_type.name();
        tracing::info!(episode_index, episode_type = episode_name, "selected episode");

        let episode_rng = rng.reseed_episode(episode_index);
        let record = match tokio::time::timeout(
            config.timeouts.episode_total,
            engine.run_episode(episode_index, episode_type, episode_rng),
        )
        .await
        {
            Ok(record) => record,
            Err(_) => {
                tracing::error!(episode_index, "episode exceeded its total time budget");
                timed_out_record(episode_index, &config.own_name, episode_name)
            }
        };

        if record.encountered_error {
            tracing::warn!(episode_index, "episode completed with an error flag set");
        }

        if let Err(e) = write_record(&args.output_dir, &config.own_name, &instance_id, &record).await {
            tracing::error!(error = %e, episode_index, "failed to write episode record");
        }
    }

    tracing::info!("session complete");
    Ok(exit_code)
}

/// The first name in a `Named` filter that the catalogue doesn't recognize,
/// if any — checked against the full registry, not the world-filtered
/// subset, so a typo is caught regardless of `--world-type` (§8 scenario 6).
fn unknown_filter_name(raw: &str, catalogue: &Catalogue) -> Option<String> {
    if raw.trim().eq_ignore_ascii_case("all") {
        return None;
    }
    let known: std::collections::HashSet<&str> = catalogue.names().collect();
    raw.split(',')
        .map(|s| s.trim())
        .find(|name| !name.is_empty() && !known.contains(name))
        .map(|s| s.to_string())
}

fn timed_out_record(episode_index: u64, agent_name: &str, episode_type: &str) -> EpisodeRecord {
    EpisodeRecord {
        timestamp: chrono::Utc::now(),
        episode_index,
        agent_name: agent_name.to_string(),
        episode_type: episode_type.to_string(),
        encountered_error: true,
        peer_error: false,
        agent_died: false,
        recording_started: true,
        eval_metadata: None,
    }
}

/// `YYYYMMDD_HHMMSS_{episode_index}_{agent_name}_instance_{instance_id}_episode_info.json` (§6).
async fn write_record(
    output_dir: &std::path::Path,
    agent_name: &str,
    instance_id: &str,
    record: &EpisodeRecord,
) -> Result<()> {
    let ts = record.timestamp.format("%Y%m%d_%H%M%S");
    let filename = format!(
        "{ts}_{}_{}_instance_{}_episode_info.json",
        record.episode_index, agent_name, instance_id
    );
    let path = output_dir.join(filename);
    let body = serde_json::to_vec_pretty(record).context("serializing episode record")?;
    tokio::fs::write(&path, body)
        .await
        .with_context(|| format!("writing {}", path.display()))
}
