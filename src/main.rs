use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use roomblock::config::Config;
use roomblock::engine::Engine;
use roomblock::model::{AllocationSummary, Mode, UnitId};
use roomblock::store::Ledger;
use roomblock::tasks;

#[derive(Parser)]
#[command(name = "roomblock", about = "Room block allocator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List every room, top floor first.
    Rooms,
    /// Count rooms by status.
    Stats,
    /// Book a block of rooms.
    Book {
        count: usize,
        /// Pick rooms at random instead of minimizing travel.
        #[arg(long)]
        random: bool,
    },
    /// Book exactly these rooms.
    BookRooms {
        #[arg(required = true)]
        ids: Vec<UnitId>,
    },
    /// Reshuffle which rooms are occupied.
    Occupy,
    /// Free every room and cancel every booking.
    Reset,
    /// List active bookings, newest first.
    Bookings {
        #[arg(long, default_value = "10")]
        limit: usize,
    },
    /// Rewrite the log down to current state.
    Compact,
    /// Keep reshuffling occupancy until interrupted.
    Simulate {
        #[arg(long, default_value = "30")]
        every_secs: u64,
    },
}

fn print_json(value: &impl Serialize) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    roomblock::observability::init_tracing();
    let cli = Cli::parse();
    let config = Config::from_env();

    std::fs::create_dir_all(&config.data_dir)?;
    let ledger = Ledger::open(config.wal_path())?;
    ledger.seed(&config.layout).await?;
    let engine = Arc::new(Engine::new(ledger));

    match cli.command {
        Command::Rooms => print_json(&engine.list_units().await?)?,
        Command::Stats => print_json(&engine.stats().await?)?,
        Command::Book { count, random } => {
            let mode = if random { Mode::Random } else { Mode::Optimal };
            let allocation = engine.allocate(count, mode).await?;
            print_json(&AllocationSummary::from(&allocation))?
        }
        Command::BookRooms { ids } => {
            let allocation = engine.allocate_explicit(&ids).await?;
            print_json(&AllocationSummary::from(&allocation))?
        }
        Command::Occupy => print_json(&engine.apply_occupancy().await?)?,
        Command::Reset => {
            engine.reset_all().await?;
            print_json(&engine.stats().await?)?
        }
        Command::Bookings { limit } => {
            let allocations = engine.list_allocations(limit).await?;
            let summaries: Vec<AllocationSummary> = allocations.iter().map(Into::into).collect();
            print_json(&summaries)?
        }
        Command::Compact => {
            engine.store().compact().await?;
            info!("compaction done");
        }
        Command::Simulate { every_secs } => simulate(engine, &config, every_secs).await?,
    }
    Ok(())
}

async fn simulate(
    engine: Arc<Engine<Ledger>>,
    config: &Config,
    every_secs: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    roomblock::observability::init(config.metrics_port)?;
    info!("roomblock simulator running");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  period: {every_secs}s");
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let simulator = tokio::spawn(tasks::run_occupancy_simulator(
        engine.clone(),
        Duration::from_secs(every_secs.max(1)),
    ));
    let compactor = tokio::spawn(tasks::run_compactor(engine.clone(), config.compact_threshold));

    // Graceful shutdown on SIGTERM/ctrl-c: stop the background tasks, then
    // compact if the log is due.
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }

    info!("shutdown signal received, stopping background tasks");
    simulator.abort();
    compactor.abort();
    if engine.store().appends_since_compact().await >= config.compact_threshold {
        engine.store().compact().await?;
    }
    info!("roomblock stopped");
    Ok(())
}
