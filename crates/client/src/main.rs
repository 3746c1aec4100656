mod input;

use std::fs::File;
use std::io::BufWriter;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::TryRecvError;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::Parser;

use orbital::{PeerConfig, PeerRole, PeerStatus, SchedulerState, TickScheduler};

use input::Input;

const STATUS_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "orbital-client")]
#[command(about = "Headless Orbital peer")]
struct Args {
    #[arg(
        short,
        long,
        default_value = "127.0.0.1:1024",
        help = "Host address to connect to"
    )]
    server: String,

    #[arg(short, long)]
    name: Option<String>,

    #[arg(short, long, help = "JSON config file")]
    config: Option<PathBuf>,

    #[arg(long, help = "Rewrite this file with a JSON entity snapshot every second")]
    snapshot_json: Option<PathBuf>,

    #[arg(long, help = "Stop after this many seconds")]
    duration: Option<u64>,
}

fn load_config(path: Option<&Path>) -> Result<PeerConfig> {
    let Some(path) = path else {
        return Ok(PeerConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = load_config(args.config.as_deref())?;
    if let Some(name) = args.name {
        config.name = name;
    }
    let server: SocketAddr = args
        .server
        .parse()
        .with_context(|| format!("invalid server address {}", args.server))?;

    let tick_period = config.tick_period();
    let peer = PeerRole::connect(config, server)?;
    let mut scheduler = TickScheduler::new(tick_period);
    scheduler.start(Arc::clone(&peer));

    let result = run(
        &peer,
        &scheduler,
        args.snapshot_json.as_deref(),
        args.duration.map(Duration::from_secs),
    );

    scheduler.stop();
    peer.quit();
    result
}

fn run(
    peer: &PeerRole,
    scheduler: &TickScheduler,
    snapshot_path: Option<&Path>,
    duration: Option<Duration>,
) -> Result<()> {
    let started = Instant::now();
    let inputs = input::spawn();
    let mut input_open = true;
    let mut last_snapshot = Instant::now();
    let mut last_status = Instant::now();

    loop {
        match peer.status() {
            PeerStatus::Rejected { required_version } => {
                bail!("host requires protocol version {}, please upgrade", required_version)
            }
            PeerStatus::HostQuit => {
                log::info!("Host ended the game");
                return Ok(());
            }
            PeerStatus::Connecting | PeerStatus::InGame => {}
        }

        if duration.is_some_and(|limit| started.elapsed() >= limit) {
            return Ok(());
        }

        while input_open {
            match inputs.try_recv() {
                Ok(Input::Quit) => return Ok(()),
                Ok(Input::Key(code)) => {
                    if !peer.key_event(code) {
                        log::warn!("Not in a game yet, {} ignored", code.name());
                    }
                }
                Ok(Input::Save(path)) => {
                    if let Err(e) = peer.save(&path) {
                        log::error!("Failed to save {}: {}", path.display(), e);
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => input_open = false,
            }
        }

        if let Some(path) = snapshot_path {
            if last_snapshot.elapsed() >= Duration::from_secs(1) {
                last_snapshot = Instant::now();
                if let Err(e) = write_snapshot(peer, path) {
                    log::warn!("Failed to write snapshot: {:#}", e);
                }
            }
        }

        if last_status.elapsed() >= STATUS_INTERVAL {
            last_status = Instant::now();
            match scheduler.state() {
                SchedulerState::WaitingOnPeer => log::warn!("Waiting for host..."),
                _ => {
                    if let Some(tick) = peer.current_tick() {
                        log::info!("Tick {}", tick);
                    }
                }
            }
        }

        thread::sleep(Duration::from_millis(20));
    }
}

fn write_snapshot(peer: &PeerRole, path: &Path) -> Result<()> {
    let Some(views) = peer.snapshot() else {
        return Ok(());
    };
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), &views)?;
    Ok(())
}
