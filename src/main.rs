//! Command line control for Beurer daylight lamps

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use log::{info, warn};

use beurer_lamp::config::{CONFIG_FILE_NAME, LampConfig};
use beurer_lamp::core::bluetooth::BluestTransport;
use beurer_lamp::core::{Lamp, SunriseProfile};
use beurer_lamp::logging::{LampLogger, level_for_verbosity};

#[derive(Parser)]
#[command(name = "beurer-lamp")]
#[command(about = "Control a Beurer daylight lamp over Bluetooth LE")]
struct Cli {
    /// Lamp MAC address (or platform device id)
    #[arg(short, long)]
    address: String,
    /// JSON config file
    #[arg(short, long, default_value = CONFIG_FILE_NAME)]
    config: PathBuf,
    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Only log warnings and errors
    #[arg(short, long)]
    quiet: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the lamp state
    Status,
    /// Turn the lamp on in its last mode
    On,
    /// Turn both panels off
    Off,
    /// Set an RGB colour
    Color { r: u8, g: u8, b: u8 },
    /// Set white panel intensity (0-255)
    White { value: u8 },
    /// Set colour brightness (0-255)
    Brightness { value: u8 },
    /// Select a colour effect by name
    Effect { name: String },
    /// Start the sleep timer (experimental, colour mode only)
    Timer { minutes: u8 },
    /// Send a raw command, opcode first, e.g. "3E 1E"
    Raw { hex: String },
    /// Run a sunrise simulation
    Sunrise {
        minutes: u32,
        #[arg(default_value_t = SunriseProfile::Natural)]
        profile: SunriseProfile,
    },
    /// Run a sunset simulation down to a final brightness percent
    Sunset {
        minutes: u32,
        #[arg(default_value_t = 0)]
        end_pct: u8,
    },
    /// List known effect names
    Effects,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Err(e) = LampLogger::init(level_for_verbosity(cli.quiet, cli.verbose)) {
        eprintln!("Failed to initialize logger: {}", e);
    }

    if let Commands::Effects = cli.command {
        for name in beurer_lamp::Effect::names() {
            println!("{}", name);
        }
        return Ok(());
    }

    let config = LampConfig::load(&cli.config).await?;
    let transport = BluestTransport::with_default_adapter(
        &cli.address,
        config.connection.device_lookup_timeout(),
    )
    .await
    .context("opening Bluetooth adapter")?;
    let lamp = Lamp::new(&cli.address, Arc::new(transport), &config);

    lamp.connect()
        .await
        .with_context(|| format!("connecting to {}", lamp.address()))?;

    let result = run(&lamp, cli.command).await;
    if let Err(e) = &result {
        warn!("Command failed: {:#}", e);
    }

    print_state(&lamp)?;
    lamp.shutdown().await;
    info!("Done");
    result
}

async fn run(lamp: &Lamp<BluestTransport>, command: Commands) -> Result<()> {
    match command {
        Commands::Status => lamp.update().await?,
        Commands::On => lamp.turn_on().await?,
        Commands::Off => lamp.turn_off().await?,
        Commands::Color { r, g, b } => lamp.set_color((r, g, b)).await?,
        Commands::White { value } => lamp.set_white(value).await?,
        Commands::Brightness { value } => lamp.set_color_brightness(value).await?,
        Commands::Effect { name } => lamp.set_effect(&name).await?,
        Commands::Timer { minutes } => lamp.set_timer(minutes).await?,
        Commands::Raw { hex } => lamp.send_raw(&hex).await?,
        Commands::Sunrise { minutes, profile } => {
            lamp.start_sunrise(minutes, profile).await;
            report_outcome(lamp).await?;
        }
        Commands::Sunset { minutes, end_pct } => {
            lamp.start_sunset(minutes, end_pct).await;
            report_outcome(lamp).await?;
        }
        Commands::Effects => {}
    }
    Ok(())
}

async fn report_outcome(lamp: &Lamp<BluestTransport>) -> Result<()> {
    let outcome = tokio::select! {
        outcome = lamp.join_simulation() => outcome,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, stopping simulation");
            lamp.stop_simulation().await;
            lamp.scheduler().last_outcome()
        }
    };

    let outcome = outcome.ok_or_else(|| anyhow!("simulation did not report an outcome"))?;
    println!("{}", serde_json::to_string(&outcome)?);
    Ok(())
}

fn print_state(lamp: &Lamp<BluestTransport>) -> Result<()> {
    let state = lamp.state();
    let therapy = lamp.therapy();
    let report = serde_json::json!({
        "address": lamp.address(),
        "connection": lamp.connection_state(),
        "power": state.power(),
        "brightness": state.brightness(),
        "timer_minutes": state.timer_minutes(),
        "state": state,
        "last_raw_notification": lamp.last_raw_notification(),
        "therapy": {
            "today_minutes": therapy.today_minutes(),
            "week_minutes": therapy.week_minutes(),
            "goal_progress_pct": therapy.goal_progress_pct(),
            "goal_reached": therapy.goal_reached(),
        },
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
