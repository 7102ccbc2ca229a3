use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use hassmic::config::{
    AppConfig, ConfigFlow, EntryData, EntryRegistry, FlowResult, ZeroconfServiceInfo, DEFAULT_PORT,
};
use hassmic::integration::Bridge;
use hassmic::satellite::SatelliteEvent;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "hassmic", version, about = "Bridge hassmic satellites to a Home Assistant assist pipeline")]
struct Cli {
    /// Config file (defaults to <config dir>/hassmic/config.toml)
    #[arg(short, long, global = true, env = "HASSMIC_CONFIG")]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the bridge for every configured satellite
    Run,
    /// Add a satellite by address
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        host: String,
        #[arg(long, default_value_t = DEFAULT_PORT)]
        port: u16,
    },
    /// Add or update a satellite from a resolved zeroconf record
    Discovered {
        /// Service instance name, `<uuid>._hassmic._tcp.local.`
        #[arg(long)]
        service: String,
        #[arg(long)]
        ip: IpAddr,
        #[arg(long, default_value_t = DEFAULT_PORT)]
        port: u16,
        /// Name for a new entry; defaults to the suggested one
        #[arg(long)]
        name: Option<String>,
    },
    /// List configured satellites
    List,
    /// Remove a satellite
    Remove { entry_id: Uuid },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "hassmic=debug,info" } else { "hassmic=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let path = match cli.config {
        Some(path) => path,
        None => AppConfig::default_path().context("No config directory on this system")?,
    };
    let mut config = AppConfig::load_or_default(&path)?;

    match cli.command {
        Command::Run => run(config).await,
        Command::Add { name, host, port } => {
            let registry = EntryRegistry::from_entries(config.entries.clone());
            let mut flow = ConfigFlow::new(registry.clone());
            let result = flow.step_user(Some(EntryData::new(name, host, port))).await;
            finish_flow(result, &registry, &mut config, &path)
        }
        Command::Discovered {
            service,
            ip,
            port,
            name,
        } => {
            let registry = EntryRegistry::from_entries(config.entries.clone());
            let mut flow = ConfigFlow::new(registry.clone());
            let mut result = flow.step_zeroconf(ZeroconfServiceInfo::new(service, ip, port));
            if let FlowResult::Form {
                suggested: Some(suggested),
                ..
            } = &result
            {
                let mut input = suggested.clone();
                if let Some(name) = name {
                    input.name = name;
                }
                result = flow.step_discovery_confirm(Some(input));
            }
            finish_flow(result, &registry, &mut config, &path)
        }
        Command::List => {
            if config.entries.is_empty() {
                println!("No satellites configured");
            }
            for entry in &config.entries {
                println!("{}  {:<20} {}  (device {})", entry.entry_id, entry.title, entry.addr(), entry.unique_id);
            }
            Ok(())
        }
        Command::Remove { entry_id } => {
            let before = config.entries.len();
            config.entries.retain(|e| e.entry_id != entry_id);
            if config.entries.len() == before {
                bail!("No entry {}", entry_id);
            }
            config.save(&path)?;
            println!("Removed {}", entry_id);
            Ok(())
        }
    }
}

async fn run(config: AppConfig) -> Result<()> {
    info!("Starting hassmic bridge");
    let bridge = Bridge::from_config(config)?;
    if bridge.url_base().is_none() {
        warn!("Neither internal_url nor external_url is set; relative TTS URLs can't be played");
    }

    if bridge.start_all() == 0 {
        warn!("No satellites configured; add one with `hassmic add`");
    }

    for entry_id in bridge.running_entries() {
        if let Some(events) = bridge.satellite_events(&entry_id) {
            std::thread::spawn(move || {
                for event in events {
                    log_event(&event);
                }
            });
        }
    }

    tokio::signal::ctrl_c().await?;
    info!("Interrupted, shutting down");
    bridge.shutdown().await;
    Ok(())
}

fn log_event(event: &SatelliteEvent) {
    match event {
        SatelliteEvent::ConnectionChanged { entry_id, connected } => {
            info!("{}: {}", entry_id, if *connected { "connected" } else { "disconnected" })
        }
        SatelliteEvent::SensorUpdated { sensor, .. } => {
            info!("{} = {}", sensor.name, sensor.state.as_deref().unwrap_or("-"))
        }
        SatelliteEvent::PlaybackRequested { entry_id, url } => info!("{}: playing {}", entry_id, url),
        SatelliteEvent::Pipeline { .. } => {}
    }
}

fn finish_flow(
    result: FlowResult,
    registry: &EntryRegistry,
    config: &mut AppConfig,
    path: &Path,
) -> Result<()> {
    match result {
        FlowResult::CreateEntry(entry) => {
            config.entries = registry.entries();
            config.save(path)?;
            println!("Added {} ({}) at {}", entry.title, entry.entry_id, entry.addr());
            Ok(())
        }
        FlowResult::Abort { reason, entry, reload } => {
            if reload {
                config.entries = registry.entries();
                config.save(path)?;
            }
            match entry {
                Some(entry) if reload => println!("Updated {} to {}", entry.title, entry.addr()),
                Some(entry) => println!("{} is already configured as {}", entry.unique_id, entry.title),
                None => println!("Aborted: {}", reason),
            }
            Ok(())
        }
        FlowResult::Form { errors, .. } => bail!("Could not add satellite: {}", errors.join("; ")),
    }
}
