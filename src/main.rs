//! combatd - arena daemon
//!
//! Populates one room with aggressive mobs and lets the AI dispatcher and
//! the combat manager fight it out.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use combatd::{Arena, Config};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Round-based combat arena
#[derive(Parser, Debug)]
#[command(name = "combatd", version, about = "Run an arena of AI-driven combatants")]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of mobs to spawn
    #[arg(long, default_value_t = 4)]
    mobs: usize,

    /// Seed for reproducible fights (overrides combat.rng_seed)
    #[arg(long)]
    seed: Option<u64>,

    /// Emit logs as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "combatd=info".into());
    if args.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let mut config = Config::load(args.config.as_deref())?;
    if args.seed.is_some() {
        config.combat.rng_seed = args.seed;
    }

    let arena = Arc::new(Arena::new(config, args.mobs));

    let watcher = {
        let arena = arena.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                arena.shutdown();
            }
        })
    };

    let report = arena.run().await;
    watcher.abort();

    info!(
        "{} rounds, {} defeated, {} force-ended",
        report.rounds, report.defeated, report.force_ended
    );
    match report.survivors.as_slice() {
        [] => info!("No one is left standing"),
        [winner] => info!("{} is the last one standing", winner),
        many => info!("Still standing: {}", many.join(", ")),
    }
    if args.json {
        println!("{}", serde_json::to_string(&report)?);
    }

    Ok(())
}
