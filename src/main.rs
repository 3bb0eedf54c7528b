use clap::Parser;
use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::signal;
use zigbee_matter_bridge::bridge::Bridge;
use zigbee_matter_bridge::config::Config;
use zigbee_matter_bridge::instance_lock::{InstanceLock, InstanceLockError};
use zigbee_matter_bridge::matter::InMemoryRegistry;
use zigbee_matter_bridge::zigbee::IeeeAddr;
use zigbee_matter_bridge::zigbee::simulator::{SimulatedNetwork, SimulatedNode};

#[derive(Parser)]
#[command(name = "zigbee-matter-bridge")]
#[command(about = "Bridge Zigbee devices onto a Matter fabric")]
struct Cli {
    /// JSON configuration file; BRIDGE_* variables override it
    #[arg(long, env = "BRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Simulated devices to join at startup
    #[arg(long, default_value_t = 3)]
    nodes: u16,

    /// Seed for shuffled response delivery; in order when absent
    #[arg(long)]
    shuffle_seed: Option<u64>,
}

fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

fn simulated_node(n: u16) -> SimulatedNode {
    let short_addr = 0x1000 + n;
    let ieee_addr = IeeeAddr::from_u64(0x00124b00_0000_0000 | n as u64);
    match n % 3 {
        0 => SimulatedNode::on_off_light(short_addr, ieee_addr, false),
        1 => SimulatedNode::dimmable_light(short_addr, ieee_addr, 128),
        _ => SimulatedNode::temperature_sensor(short_addr, ieee_addr, 2150),
    }
}

#[tokio::main]
async fn main() {
    init_logger();
    let cli = Cli::parse();
    info!("Starting Zigbee-Matter bridge");

    let _lock = match InstanceLock::acquire() {
        Ok(lock) => lock,
        Err(InstanceLockError::AlreadyRunning) => {
            error!("Another bridge instance is already running");
            std::process::exit(1);
        }
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let config = match &cli.config {
        Some(path) => match Config::load(path) {
            Ok(config) => config.with_env(),
            Err(e) => {
                error!("Failed to load {}: {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => Config::from_env(),
    };
    info!("Configuration loaded:");
    info!("  Max devices: {}", config.bridge.max_devices);
    info!(
        "  Dynamic endpoints: {} from id {}",
        config.endpoints.dynamic_endpoint_count, config.endpoints.first_dynamic_endpoint_id
    );
    info!("  Discovery retries: {}", config.discovery.max_retries);

    let network = Arc::new(match cli.shuffle_seed {
        Some(seed) => SimulatedNetwork::shuffled(seed),
        None => SimulatedNetwork::new(),
    });
    let registry = Arc::new(InMemoryRegistry::new(
        config.endpoints.dynamic_endpoint_count,
        &[0, config.endpoints.parent_endpoint_id],
    ));
    let bridge = match Bridge::new(config, network.clone(), registry.clone()) {
        Ok(bridge) => Arc::new(bridge),
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    bridge.register_reachability_change_callback(Box::new(|device, reachable| {
        info!("[Bridge] {} is now {}", device, if reachable { "reachable" } else { "unreachable" });
    }));

    let stop = Arc::new(AtomicBool::new(false));

    let zigbee_handle = {
        let (bridge, network, stop) = (bridge.clone(), network.clone(), stop.clone());
        std::thread::Builder::new()
            .name("zigbee-stack".into())
            .spawn(move || network.run(&bridge, &stop, Duration::from_millis(50)))
            .expect("Failed to spawn Zigbee thread")
    };
    let matter_handle = {
        let (bridge, stop) = (bridge.clone(), stop.clone());
        std::thread::Builder::new()
            .name("matter-stack".into())
            .spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    bridge.serve_local_once(Duration::from_millis(100));
                }
            })
            .expect("Failed to spawn Matter thread")
    };

    for n in 0..cli.nodes {
        network.join(simulated_node(n));
    }

    info!("Bridge is running");
    info!("  - {} simulated devices joining", cli.nodes);
    info!("  - Press Ctrl+C to exit");

    let status_task = {
        let (bridge, registry) = (bridge.clone(), registry.clone());
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(30));
            loop {
                interval.tick().await;
                for id in bridge.devices() {
                    if let Ok(state) = bridge.device_state(id) {
                        info!(
                            "[Bridge] {}: {} endpoint {:?}",
                            id,
                            state,
                            bridge.endpoint_for_device(id)
                        );
                    }
                }
                info!(
                    "[Matter] {} endpoints registered, {} attribute changes since last status",
                    registry.registered().len(),
                    registry.take_changes().len()
                );
            }
        })
    };

    match signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal"),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }

    status_task.abort();
    stop.store(true, Ordering::Relaxed);
    for handle in [zigbee_handle, matter_handle] {
        if handle.join().is_err() {
            error!("Stack thread panicked");
        }
    }
    info!("Bridge stopped");
}
