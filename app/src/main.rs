mod browser;
mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use controller::MemoryDomain;
use frames::{FrameEvictionManager, SharedHandleCounter};
use log::info;
use memory::{DefaultMemoryPressureSource, MemoryPressureMonitor, MemoryPressureSource};
use pressure::PressureLevelSource;
use serde_json::json;

use crate::browser::{populate_frames, Browser, Observation};
use crate::config::AppConfig;

#[derive(Debug, Parser)]
#[command(name = "ebb")]
#[command(about = "Memory pressure coordination across browser processes")]
#[command(version)]
struct Cli {
    /// TOML file with optional [thresholds], [monitor] and [frames] sections
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (repeatable)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print one reading of the system memory pressure
    Sample,

    /// Simulate a pressure level in the browser and its children
    ///
    /// Examples:
    ///   ebb simulate critical --children 3
    ///   ebb simulate moderate --suppress
    Simulate {
        /// Level to simulate: moderate or critical
        level: String,

        /// Number of child processes to attach
        #[arg(long, default_value_t = 2)]
        children: usize,

        /// Suppress real notifications in every process first
        #[arg(long)]
        suppress: bool,
    },

    /// Watch system memory and fan pressure out to every process
    Monitor {
        /// Number of child processes to attach
        #[arg(long, default_value_t = 2)]
        children: usize,

        /// Stop after this many seconds instead of running until killed
        #[arg(long)]
        duration_secs: Option<u64>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    stderrlog::new()
        .verbosity(usize::from(cli.verbose) + 1)
        .init()
        .context("failed to initialize logging")?;

    let config = AppConfig::load(cli.config.as_deref())?;
    match cli.command {
        Command::Sample => sample(&config),
        Command::Simulate {
            level,
            children,
            suppress,
        } => simulate(&level, children, suppress),
        Command::Monitor {
            children,
            duration_secs,
        } => monitor(&config, children, duration_secs.map(Duration::from_secs)),
    }
}

fn sample(config: &AppConfig) -> Result<()> {
    let mut source = DefaultMemoryPressureSource::new();
    match source.sample(&config.thresholds) {
        Some(reading) => println!(
            "{} pressure, {}.{}% headroom ({:?})",
            reading.level,
            reading.headroom_per_mille / 10,
            reading.headroom_per_mille % 10,
            reading.source
        ),
        None => println!("no memory pressure source is available"),
    }
    Ok(())
}

fn simulate(level: &str, children: usize, suppress: bool) -> Result<()> {
    let mut browser = Browser::start()?;
    browser.spawn_children(children)?;
    let domain = MemoryDomain::new(Arc::clone(browser.controller()));

    if suppress {
        domain.handle(
            "Memory.setPressureNotificationsSuppressed",
            json!({ "suppressed": true }),
        )?;
    }
    let result = domain
        .handle(
            "Memory.simulatePressureNotification",
            json!({ "level": level }),
        )
        .context("simulation rejected");

    let report = browser.shutdown()?;
    result?;
    print_report(&report);
    Ok(())
}

fn monitor(config: &AppConfig, children: usize, duration: Option<Duration>) -> Result<()> {
    let mut browser = Browser::start()?;
    browser.spawn_children(children)?;

    let monitor = MemoryPressureMonitor::start(
        DefaultMemoryPressureSource::new(),
        config.thresholds,
        config.monitor,
        browser.dispatcher(),
    )
    .context("failed to start the memory pressure monitor")?;

    let handles = Arc::new(SharedHandleCounter::new());
    let level: Arc<dyn PressureLevelSource> = monitor.level_handle();
    let budget = config.frame_budget();
    let manager = FrameEvictionManager::new(budget, level, Arc::clone(&handles));
    let listener = manager.listen(browser.registry());
    let frames = populate_frames(&manager, &handles, budget.max_saved_frames);
    info!(
        "monitoring with {} children, {} of {} saved frames resident",
        children,
        manager.unlocked_count(),
        frames.len()
    );

    match duration {
        Some(duration) => thread::sleep(duration),
        None => loop {
            thread::park();
        },
    }

    monitor.shutdown();
    drop(listener);
    println!(
        "{} of {} saved frames still resident",
        manager.unlocked_count() + manager.locked_count(),
        frames.len()
    );
    print_report(&browser.shutdown()?);
    Ok(())
}

fn print_report(report: &[Observation]) {
    for observation in report {
        println!("{observation}");
    }
}
