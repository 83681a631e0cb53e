use chrono::Utc;
use clap::{Parser, Subcommand};
use std::process::ExitCode;
use std::sync::Arc;

use sky_monitor::fetch::{AircraftFetcher, TleFetcher};
use sky_monitor::horizon::{download_profile, HorizonProfile};
use sky_monitor::scheduler::Coordinator;
use sky_monitor::snapshot::SnapshotStore;
use sky_monitor::web::{run_server, Config};

#[derive(Parser)]
#[command(name = "sky-monitor")]
#[command(about = "Satellites and aircraft above the observatory horizon")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler and the web server
    Serve {
        #[arg(short, long, default_value = "config.yaml")]
        config: String,
    },
    /// Validate the config file and the horizon table
    Check {
        #[arg(short, long, default_value = "config.yaml")]
        config: String,
    },
    /// Download the horizon table for the configured panorama
    FetchHorizon {
        #[arg(short, long, default_value = "config.yaml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config } => serve(&config).await,
        Commands::Check { config } => check(&config),
        Commands::FetchHorizon { config } => fetch_horizon(&config).await,
    }
}

fn load_config(path: &str) -> Option<Config> {
    match Config::from_file(path) {
        Ok(config) => Some(config),
        Err(e) => {
            eprintln!("Error loading config {}: {}", path, e);
            None
        }
    }
}

async fn serve(path: &str) -> ExitCode {
    let Some(config) = load_config(path) else {
        return ExitCode::FAILURE;
    };
    let config = Arc::new(config);
    let observer = config.observer();
    let horizon = Arc::new(HorizonProfile::load_or_obstructed(&config.horizon.file));

    let store = match SnapshotStore::open(&config.database.path).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            log::error!("Failed to open snapshot database: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let tle = match TleFetcher::new(
        config.tle.urls.clone(),
        config.tle.cache_file.clone(),
        config.tle.timeout,
    ) {
        Ok(tle) => tle,
        Err(e) => {
            log::error!("Failed to set up TLE fetcher: {}", e);
            return ExitCode::FAILURE;
        }
    };
    match tle.load_cache().await {
        Ok(Some(modified)) => log::info!(
            "Loaded TLE cache {} from {}",
            tle.cache_file().display(),
            modified
        ),
        Ok(None) => log::info!("No TLE cache at {}", tle.cache_file().display()),
        Err(e) => log::warn!("Ignoring TLE cache: {}", e),
    }

    let aircraft = match AircraftFetcher::new(
        config.aircraft.api,
        config.aircraft.endpoint(),
        observer,
        config.aircraft.search_box_deg,
        config.aircraft.credentials(),
        config.aircraft.timeout,
    ) {
        Ok(aircraft) => aircraft,
        Err(e) => {
            log::error!("Failed to set up aircraft fetcher: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let (coordinator, handle) = Coordinator::new(
        config.scheduler_config(),
        observer,
        horizon,
        Arc::new(tle),
        Arc::new(aircraft),
        store,
        Utc::now(),
    );
    let task = coordinator.spawn();

    let result = run_server(config, handle, shutdown_signal()).await;
    task.stop().await;

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("Server error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    log::info!("Shutdown signal received");
}

fn check(path: &str) -> ExitCode {
    let Some(config) = load_config(path) else {
        return ExitCode::FAILURE;
    };

    let obs = &config.observatory;
    println!(
        "Observatory {}: {:.4}, {:.4}, {:.0} m",
        obs.name.as_deref().unwrap_or("(unnamed)"),
        obs.latitude_deg,
        obs.longitude_deg,
        obs.altitude_m
    );
    println!(
        "TLE sources: {} (every {})",
        config.tle.urls.len(),
        humantime::format_duration(config.timing.tle_fetch_interval)
    );
    println!(
        "Aircraft: {:?} at {} (every {})",
        config.aircraft.api,
        config.aircraft.endpoint(),
        humantime::format_duration(config.timing.plane_fetch_interval)
    );
    println!(
        "Snapshots: {} every {}, kept {} days",
        config.database.path,
        humantime::format_duration(config.timing.db_snapshot_interval),
        config.database.retention_days
    );
    println!("API keys: {}", config.api_keys.len());

    match HorizonProfile::from_csv_path(&config.horizon.file) {
        Ok(profile) => {
            let samples = profile.samples();
            let lowest = samples
                .iter()
                .map(|s| s.min_altitude_deg)
                .fold(f64::INFINITY, f64::min);
            let highest = samples
                .iter()
                .map(|s| s.min_altitude_deg)
                .fold(f64::NEG_INFINITY, f64::max);
            println!(
                "Horizon: {} points, altitude {:.1} to {:.1} deg",
                samples.len(),
                lowest,
                highest
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!(
                "Horizon file {} is not usable: {}",
                config.horizon.file.display(),
                e
            );
            ExitCode::FAILURE
        }
    }
}

async fn fetch_horizon(path: &str) -> ExitCode {
    let Some(config) = load_config(path) else {
        return ExitCode::FAILURE;
    };
    let Some(panorama_id) = config.horizon.panorama_id.as_deref() else {
        eprintln!("horizon.panorama_id is not set");
        return ExitCode::FAILURE;
    };

    match download_profile(
        &config.horizon.url,
        panorama_id,
        &config.horizon.resolution.to_string(),
        &config.horizon.file,
    )
    .await
    {
        Ok(profile) => {
            println!(
                "Saved {} horizon points to {}",
                profile.samples().len(),
                config.horizon.file.display()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Horizon download failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
