mod config;
mod console;
mod events;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc::TryRecvError;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};

use orbital::{HostRole, LevelChoice, TickScheduler};

use console::Command;

#[derive(Clone, Copy, ValueEnum)]
enum LevelArg {
    Skirmish,
    Waves,
}

impl From<LevelArg> for LevelChoice {
    fn from(level: LevelArg) -> Self {
        match level {
            LevelArg::Skirmish => LevelChoice::Skirmish,
            LevelArg::Waves => LevelChoice::Waves,
        }
    }
}

#[derive(Parser)]
#[command(name = "orbital-server")]
#[command(about = "Orbital game host")]
struct Args {
    #[arg(short, long, help = "JSON config file")]
    config: Option<PathBuf>,

    #[arg(short, long)]
    bind: Option<String>,

    #[arg(short, long)]
    port: Option<u16>,

    #[arg(short, long, help = "Name of the host's own ship")]
    name: Option<String>,

    #[arg(short, long)]
    max_peers: Option<usize>,

    #[arg(long, value_enum)]
    level: Option<LevelArg>,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long, help = "Resume from a save file")]
    load: Option<PathBuf>,

    #[arg(long, help = "Write a save file on shutdown")]
    save: Option<PathBuf>,

    #[arg(long, help = "Stop after this many seconds")]
    duration: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = config::load(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(name) = args.name {
        config.name = name;
    }
    if let Some(max_peers) = args.max_peers {
        config.max_peers = max_peers;
    }
    if let Some(level) = args.level {
        config.level = level.into();
    }
    if args.seed.is_some() {
        config.seed = args.seed;
    }

    let tick_period = config.tick_period();
    let bind_addr = config.bind_addr();
    let host = match &args.load {
        Some(path) => HostRole::host_saved(config, path)
            .with_context(|| format!("resuming {} on {}", path.display(), bind_addr))?,
        None => HostRole::host(config).with_context(|| format!("binding {}", bind_addr))?,
    };
    log::info!("Server started on {}", host.local_addr());

    let mut scheduler = TickScheduler::new(tick_period);
    scheduler.start(Arc::clone(&host));

    run(&host, args.duration.map(Duration::from_secs));

    scheduler.stop();
    if let Some(path) = &args.save {
        if let Err(e) = host.save(path) {
            log::error!("Failed to save {}: {}", path.display(), e);
        }
    }
    host.shutdown();
    let stats = host.stats();
    log::info!(
        "Server shutting down at tick {}: {} packets out, {} in, {} malformed",
        host.current_tick(),
        stats.packets_sent,
        stats.packets_received,
        stats.malformed_packets
    );
    Ok(())
}

fn run(host: &HostRole, duration: Option<Duration>) {
    let started = Instant::now();
    let commands = console::spawn();
    let mut console_open = true;

    loop {
        for event in host.drain_events() {
            events::log_event(&event);
        }

        if duration.is_some_and(|limit| started.elapsed() >= limit) {
            log::info!("Run time elapsed");
            return;
        }

        while console_open {
            match commands.try_recv() {
                Ok(Command::Quit) => return,
                Ok(command) => execute(host, command),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => console_open = false,
            }
        }

        thread::sleep(Duration::from_millis(50));
    }
}

fn execute(host: &HostRole, command: Command) {
    match command {
        Command::Key(code) => host.key_event(code),
        Command::Pause => host.set_paused(true),
        Command::Resume => host.set_paused(false),
        Command::Save(path) => {
            if let Err(e) = host.save(&path) {
                log::error!("Failed to save {}: {}", path.display(), e);
            }
        }
        Command::Status => {
            let stats = host.stats();
            log::info!(
                "Tick {}, {} peer(s), {} entities, {}/{} packets out/in",
                host.current_tick(),
                host.peer_count(),
                host.with_state(|s| s.registry().len()),
                stats.packets_sent,
                stats.packets_received
            );
        }
        Command::Quit => {}
    }
}
