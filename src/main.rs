use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use selfmon_bridge::config::BridgeConfig;
use selfmon_bridge::entity::SensorHandle;
use selfmon_bridge::flow::{ConfigFlow, DefaultsResponder, EntryData, FlowDriver, FlowOutcome};
use selfmon_bridge::mqtt::{LocalChannel, MqttChannel, PubSubChannel};
use selfmon_bridge::registry::ModuleRegistry;
use selfmon_bridge::store::EntryStore;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "selfmon-bridge", version, about)]
struct Cli {
    /// Config file (default: ~/.config/selfmon/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run sensor discovery again for stored entries, keeping user choices
    #[arg(long)]
    rediscover: bool,

    /// Replay a captured broker snapshot instead of connecting; nothing is stored
    #[arg(long, value_name = "FILE")]
    replay: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup()?;

    let config_path = cli.config.clone().unwrap_or_else(BridgeConfig::default_path);
    let config = BridgeConfig::load(&config_path)
        .await
        .map_err(|e| eyre!("Failed to load config: {}", e))?
        .with_env_overrides();
    config.module.identity()?;

    match &cli.replay {
        Some(path) => {
            let snapshot = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| eyre!("Failed to read snapshot {}: {}", path.display(), e))?;
            let channel = LocalChannel::new();
            let seeded = channel.seed_from_snapshot(&snapshot);
            info!("Replaying {} messages from {}", seeded, path.display());
            run_bridge(&channel, &config, None, cli.rediscover).await
        }
        None => {
            let channel = MqttChannel::connect(&config.broker)
                .map_err(|e| eyre!("Failed to set up MQTT client: {}", e))?;
            if let Err(e) = channel.wait_connected(CONNECT_TIMEOUT).await {
                // subscriptions are restored once the broker comes back
                warn!("{}", e);
            }
            let store = EntryStore::default_location();
            let result = run_bridge(&channel, &config, Some(&store), cli.rediscover).await;
            channel.shutdown().await;
            result
        }
    }
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    let level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|l| l.parse::<Level>().ok())
        .unwrap_or(Level::INFO);
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}

fn responder(config: &BridgeConfig) -> DefaultsResponder {
    let responder = DefaultsResponder::new().with_outputs(config.module.enable_outputs);
    match &config.module.path {
        Some(path) => responder.with_module_path(path.clone()),
        None => responder,
    }
}

fn entry_id(data: &EntryData) -> String {
    data.module_path.device_identifier()
}

/// Entries to run: stored ones (optionally rediscovered) or a fresh setup
async fn prepare_entries<C>(
    channel: &C,
    config: &BridgeConfig,
    store: Option<&EntryStore>,
    rediscover: bool,
) -> Result<Vec<(String, EntryData)>>
where
    C: PubSubChannel + ?Sized,
{
    let driver = FlowDriver::new(channel, config.discovery.timeouts());
    let stored = match store {
        Some(store) => store.load_all().await?,
        None => Vec::new(),
    };

    if stored.is_empty() {
        let mut flow = ConfigFlow::new(BTreeSet::new());
        let data = match driver.run(&mut flow, &mut responder(config)).await? {
            FlowOutcome::Created { title, data } => {
                info!("Setup complete: {} ({})", title, data.module_path);
                data
            }
            other => {
                warn!("Setup did not complete: {:?}", other);
                return Ok(Vec::new());
            }
        };
        let id = entry_id(&data);
        if let Some(store) = store {
            store.save(&id, &data).await?;
        }
        return Ok(vec![(id, data)]);
    }

    let mut entries = Vec::new();
    for (id, data) in stored {
        if !rediscover {
            entries.push((id, data));
            continue;
        }
        let mut flow = ConfigFlow::rediscover(data.clone());
        match driver.run(&mut flow, &mut responder(config)).await? {
            FlowOutcome::Updated(updated) => {
                if let Some(store) = store {
                    store.save(&id, &updated).await?;
                }
                entries.push((id, updated));
            }
            other => {
                warn!("Rediscovery of {} did not complete ({:?}), keeping stored entry", id, other);
                entries.push((id, data));
            }
        }
    }
    Ok(entries)
}

fn spawn_state_logger(handle: &SensorHandle) -> JoinHandle<()> {
    let mut state_rx = handle.watch_state();
    let name = handle.info.name.clone();
    tokio::spawn(async move {
        while state_rx.changed().await.is_ok() {
            let state = state_rx.borrow_and_update().clone();
            if let Some(state) = state {
                info!("{}: {}", name, state);
            }
        }
        debug!("State logger for {} stopped", name);
    })
}

async fn run_bridge<C>(
    channel: &C,
    config: &BridgeConfig,
    store: Option<&EntryStore>,
    rediscover: bool,
) -> Result<()>
where
    C: PubSubChannel + ?Sized,
{
    let entries = prepare_entries(channel, config, store, rediscover).await?;
    if entries.is_empty() {
        return Err(eyre!("No entry configured"));
    }

    let mut registry = ModuleRegistry::new();
    let mut loggers = Vec::new();
    for (id, data) in entries {
        registry.setup_entry(&id, data, channel)?;
        loggers.extend(registry.handles(&id).iter().map(spawn_state_logger));
    }

    info!("Bridge running, press Ctrl-C to stop");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
    }

    info!("Shutting down");
    registry.unload_all(channel).await;
    for logger in loggers {
        logger.abort();
    }
    debug!("{} subscriptions left", channel.active_subscriptions());
    Ok(())
}
