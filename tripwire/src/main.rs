// tripwire/src/main.rs
//
// Tripwire — sliding-window antinuke and automod engine
//
// Two operational modes:
//   tail    — follow a JSONL platform event feed (production)
//   replay  — replay a captured feed at scaled speed (testing/research)
//
// Requested bans, timeouts and notices are appended as JSONL under --output
// for the platform client to carry out.
//
// Usage:
//   tripwire --mode tail --path /var/run/guild_events.jsonl --config config.json
//   tripwire --mode replay --path captured.jsonl --speed 10.0

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, ValueEnum};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tripwire::events::PlatformEvent;
use tripwire::feed::FeedTail;
use tripwire::{Engine, GuardConfig, JsonlExecutor};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name    = "tripwire",
    about   = "Sliding-window antinuke and automod engine",
    version = env!("CARGO_PKG_VERSION"),
)]
struct Cli {
    #[arg(long, value_enum, default_value = "tail")]
    mode: Mode,

    #[arg(long, default_value = "/tmp/tripwire_feed.jsonl",
          help = "JSONL platform event feed")]
    path: PathBuf,

    #[arg(long, default_value = "1.0", help = "Replay speed multiplier")]
    speed: f64,

    #[arg(long, default_value = "/tmp/tripwire_output",
          help = "Directory for requested actions")]
    output: PathBuf,

    #[arg(long, default_value = "config.json", help = "Guard configuration (JSON)")]
    config: PathBuf,

    #[arg(long, help = "Override sweep_interval from the config (seconds)")]
    sweep_interval: Option<u64>,
}

#[derive(Clone, ValueEnum)]
enum Mode {
    Tail,    // follow a live JSONL feed
    Replay,  // replay a static JSONL file at scaled speed
}

// ── Stats ─────────────────────────────────────────────────────────────────────

async fn stats_loop(engine: Arc<Engine>, start: Instant) {
    loop {
        tokio::time::sleep(Duration::from_secs(30)).await;
        let s = engine.stats();
        info!(
            uptime_secs  = start.elapsed().as_secs(),
            events       = s.events_observed,
            filtered     = s.messages_filtered,
            mitigations  = s.mitigations_dispatched,
            failures     = s.dispatch_failures,
            sweeps       = s.sweeps_completed,
            rejected     = s.feed_rejected,
            actors       = s.action_entries,
            authors      = s.message_entries,
            "stats"
        );
    }
}

// ── Event sources ─────────────────────────────────────────────────────────────

const FEED_POLL: Duration = Duration::from_millis(50);

async fn tail_jsonl(
    path:     PathBuf,
    tx:       mpsc::Sender<PlatformEvent>,
    engine:   Arc<Engine>,
    seek_end: bool,
) -> Result<()> {
    let mut feed = FeedTail::open(&path, seek_end).await
        .with_context(|| format!("opening feed {}", path.display()))?;
    info!(offset = feed.offset(), "Tailing {}", path.display());

    loop {
        let Some(line) = feed.poll_line().await
            .with_context(|| format!("reading feed {}", path.display()))?
        else {
            tokio::time::sleep(FEED_POLL).await;
            continue;
        };
        match PlatformEvent::from_feed_line(&line) {
            Ok(Some(event)) => {
                if tx.send(event).await.is_err() { break; }
            }
            Ok(None) => {}
            Err(e) => {
                engine.note_rejected_line();
                warn!(line = feed.line_number(), "Rejected feed line: {}", e);
            }
        }
    }
    Ok(())
}

async fn replay_jsonl(
    path:   PathBuf,
    tx:     mpsc::Sender<PlatformEvent>,
    engine: Arc<Engine>,
    speed:  f64,
) -> Result<()> {
    let content = tokio::fs::read_to_string(&path).await
        .with_context(|| format!("reading feed {}", path.display()))?;

    let mut events: Vec<PlatformEvent> = Vec::new();
    for (n, line) in content.lines().enumerate() {
        match PlatformEvent::from_feed_line(line) {
            Ok(Some(event)) => events.push(event),
            Ok(None) => {}
            Err(e) => {
                engine.note_rejected_line();
                warn!(line = n + 1, "Rejected feed line: {}", e);
            }
        }
    }
    if events.is_empty() { return Ok(()); }
    // Stable: events sharing a timestamp keep their file order.
    events.sort_by_key(|ev| ev.timestamp());

    let speed     = if speed > 0.0 { speed } else { 1.0 };
    let base_ts   = events[0].timestamp();
    let base_wall = Instant::now();
    info!(events = events.len(), speed, "Replaying {}", path.display());

    for mut event in events {
        let offset_ms = (event.timestamp() - base_ts).num_milliseconds().max(0) as f64;
        let target    = base_wall + Duration::from_secs_f64(offset_ms / speed / 1000.0);
        let now       = Instant::now();
        if target > now {
            tokio::time::sleep(target - now).await;
        }
        event.set_timestamp(Utc::now());
        if tx.send(event).await.is_err() { break; }
    }
    Ok(())
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env()
            .add_directive("tripwire=info".parse()?))
        .compact().init();

    let cli = Cli::parse();

    let mut config = GuardConfig::load(&cli.config)?;
    if let Some(secs) = cli.sweep_interval {
        config.sweep_interval = secs;
        config.validate().context("--sweep-interval")?;
    }

    let executor = Arc::new(JsonlExecutor::new(&cli.output)
        .with_context(|| format!("preparing output dir {}", cli.output.display()))?);
    let engine = Arc::new(Engine::new(config, executor).context("building engine")?);
    let start  = Instant::now();
    let (tx, mut rx) = mpsc::channel::<PlatformEvent>(16384);

    info!(
        automod    = engine.config().automod.enabled,
        antinuke   = engine.config().antinuke.enabled,
        sweep_secs = engine.config().sweep_interval().as_secs(),
        output     = %cli.output.display(),
        "Tripwire starting"
    );

    engine.start();
    tokio::spawn(stats_loop(Arc::clone(&engine), start));

    let path = cli.path.clone();
    match cli.mode {
        Mode::Tail => {
            info!("Mode: TAIL  |  {}", path.display());
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                if let Err(e) = tail_jsonl(path, tx, engine, true).await {
                    warn!("Feed ended: {:#}", e);
                }
            });
        }
        Mode::Replay => {
            info!("Mode: REPLAY  |  {}  speed={:.1}x", path.display(), cli.speed);
            let speed  = cli.speed;
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                if let Err(e) = replay_jsonl(path, tx, engine, speed).await {
                    warn!("Replay ended: {:#}", e);
                }
            });
        }
    }

    // Main consumer: ledger updates run here in arrival order; only executor
    // follow-ups are spawned. Ctrl-C ends the run.
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(event) => {
                    if let Some(work) = engine.ingest(event) {
                        let engine = Arc::clone(&engine);
                        tokio::spawn(async move { engine.follow_up(work).await; });
                    }
                }
                None => {
                    let report = engine.sweep_now(Utc::now()).await;
                    info!(fired = report.fired, "Feed closed; final sweep done");
                    break;
                }
            },
            _ = &mut ctrl_c => {
                info!("Interrupt received");
                break;
            }
        }
    }

    engine.stop().await;
    let s = engine.stats();
    info!(
        events = s.events_observed, mitigations = s.mitigations_dispatched,
        failures = s.dispatch_failures, rejected = s.feed_rejected,
        "Tripwire stopped"
    );
    Ok(())
}
