use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info};

use catlocator::broker::Broker;
use catlocator::config::{Settings, load_config_from};
use catlocator::ingest::IngestionRouter;
use catlocator::locate::{LocationEstimator, LocationPublisher, PathLossModel, locate};
use catlocator::model::{Location, RoomDefinition};
use catlocator::persistence::{SledStore, Store};
use catlocator::simulator::{BeaconSimulator, House, SimulatorConfig, feet_to_meters, load_layout};
use catlocator::utils::logging;

type AppResult = Result<(), Box<dyn Error>>;

#[derive(Debug, Parser)]
#[command(name = "catlocator", version, about = "Locate a BLE tag from beacon RSSI over a built-in MQTT broker")]
struct Cli {
    /// Configuration file; defaults to config/default.* when present
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the broker, ingestion and location publisher (default)
    Serve,
    /// Print one location estimate as JSON
    ///
    /// Reads the store directly, which `serve` holds locked while it runs.
    /// Against a live server, subscribe to the location topic instead.
    Locate {
        #[arg(long)]
        tag: Option<String>,
    },
    /// Replace the room definitions with a JSON array of {name, center, radius}
    ///
    /// Needs exclusive access to the store; stop `serve` first.
    Rooms { file: PathBuf },
    /// Publish simulated beacon readings to a running broker
    Simulate(SimulateArgs),
}

#[derive(Debug, Args)]
struct SimulateArgs {
    #[arg(long, default_value = "127.0.0.1:1883")]
    broker: String,
    /// JSON array of {id, x, y, z}; a 12-beacon layout is generated when omitted
    #[arg(long)]
    beacons: Option<PathBuf>,
    #[arg(long, default_value = "cat-collar-1")]
    tag_id: String,
    #[arg(long, requires_all = ["tag_y", "tag_z"])]
    tag_x: Option<f64>,
    #[arg(long)]
    tag_y: Option<f64>,
    #[arg(long)]
    tag_z: Option<f64>,
    #[arg(long, default_value_t = feet_to_meters(40.0))]
    house_width: f64,
    #[arg(long, default_value_t = feet_to_meters(25.0))]
    house_depth: f64,
    #[arg(long, default_value_t = feet_to_meters(30.0))]
    house_height: f64,
    /// Per-axis step standard deviation, in meters
    #[arg(long, default_value_t = 0.6)]
    tag_step: f64,
    #[arg(long)]
    stationary: bool,
    #[arg(long, default_value_t = 2000)]
    interval_ms: u64,
    /// RSSI noise standard deviation, in dB
    #[arg(long, default_value_t = 2.0)]
    noise_std: f64,
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let settings = match load_config_from(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    logging::init(&settings.log.level);

    let result = match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(settings).await,
        Command::Locate { tag } => locate_once(&settings, tag),
        Command::Rooms { file } => load_rooms(&settings, &file),
        Command::Simulate(args) => simulate(&settings, args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "catlocator failed");
            ExitCode::FAILURE
        }
    }
}

fn open_store(settings: &Settings) -> Result<SledStore, Box<dyn Error>> {
    SledStore::open(&settings.store.path, settings.store.max_readings).map_err(|e| {
        format!(
            "open store {}: {e} (a running `catlocator serve` holds it locked)",
            settings.store.path
        )
        .into()
    })
}

async fn serve(settings: Settings) -> AppResult {
    let store = Arc::new(open_store(&settings)?);
    info!(path = %settings.store.path, "store opened");

    let broker = Arc::new(Broker::new(&settings.mqtt));
    broker.set_publish_handler(Arc::new(IngestionRouter::new(store.clone(), &settings.ingest)));
    let (addr, fatal) = broker.start(&settings.mqtt.bind_address).await?;
    info!(addr = %addr, "catlocator serving");

    let (stop_tx, stop_rx) = watch::channel(false);
    let publisher = tokio::spawn(
        LocationPublisher::new(broker.clone(), store.clone(), &settings.estimator).run(stop_rx),
    );

    let outcome: AppResult = tokio::select! {
        signal = tokio::signal::ctrl_c() => match signal {
            Ok(()) => {
                info!("shutdown signal received");
                Ok(())
            }
            Err(e) => Err(e.into()),
        },
        fatal = fatal => match fatal {
            Ok(e) => Err(e.into()),
            Err(_) => Ok(()),
        },
    };

    let _ = stop_tx.send(true);
    if let Err(e) = publisher.await {
        error!(error = %e, "location publisher task failed");
    }
    broker.shutdown().await?;
    store.flush()?;
    outcome
}

fn locate_once(settings: &Settings, tag: Option<String>) -> AppResult {
    let store = open_store(settings)?;
    let estimator = LocationEstimator::from_settings(&settings.estimator);
    let tag = tag.or_else(|| settings.estimator.tag_id.clone());

    let report = locate(&store, &estimator, tag.as_deref())?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn load_rooms(settings: &Settings, file: &Path) -> AppResult {
    let raw = std::fs::read(file)?;
    let rooms: Vec<RoomDefinition> = serde_json::from_slice(&raw)?;
    if let Some(room) = rooms.iter().find(|r| r.name.trim().is_empty() || r.radius < 0.0) {
        return Err(format!("invalid room definition: {room:?}").into());
    }

    let store = open_store(settings)?;
    store.save_room_definitions(&rooms)?;
    store.flush()?;
    info!(rooms = rooms.len(), "room definitions saved");
    Ok(())
}

async fn simulate(settings: &Settings, args: SimulateArgs) -> AppResult {
    let beacons = match &args.beacons {
        Some(path) => load_layout(path)?,
        None => Vec::new(),
    };
    let start = match (args.tag_x, args.tag_y, args.tag_z) {
        (Some(x), Some(y), Some(z)) => Some(Location::new(x, y, z)),
        _ => None,
    };

    let simulator = BeaconSimulator::new(SimulatorConfig {
        broker: args.broker,
        tag_id: args.tag_id,
        house: House {
            width: args.house_width,
            depth: args.house_depth,
            height: args.house_height,
        },
        beacons,
        start,
        stationary: args.stationary,
        tag_step: args.tag_step,
        interval: Duration::from_millis(args.interval_ms.max(1)),
        model: PathLossModel::new(settings.estimator.tx_power, settings.estimator.path_loss_exponent),
        noise_std: args.noise_std,
        seed: args.seed,
    })?;

    let (stop_tx, stop_rx) = watch::channel(false);
    let mut run = tokio::spawn(simulator.run(stop_rx));
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
            let _ = stop_tx.send(true);
            run.await??;
        }
        finished = &mut run => finished??,
    }
    Ok(())
}
