//! A bridge wired to a simulated network and an in-memory endpoint table,
//! with both stack threads running.

use crate::bridge::{Bridge, DeviceId, DeviceRecord, DeviceState};
use crate::config::Config;
use crate::matter::InMemoryRegistry;
use crate::zigbee::ShortAddr;
use crate::zigbee::simulator::SimulatedNetwork;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const WAIT_LIMIT: Duration = Duration::from_secs(10);

pub(crate) struct Harness {
    pub bridge: Arc<Bridge>,
    pub network: Arc<SimulatedNetwork>,
    pub registry: Arc<InMemoryRegistry>,
    stop: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl Harness {
    /// Short timeouts so failure paths finish quickly.
    pub fn fast_config() -> Config {
        let mut config = Config::default();
        config.bridge.write_timeout_ms = 300;
        config.bridge.command_timeout_ms = 300;
        config.bridge.read_timeout_ms = 300;
        config.bridge.settle_ms = 5;
        config.bridge.handoff_timeout_ms = 2000;
        config.discovery.request_timeout_ms = 50;
        config.discovery.max_retries = 2;
        config.endpoints.dynamic_endpoint_count = 4;
        config
    }

    pub fn start(config: Config) -> Self {
        Self::with_network(config, SimulatedNetwork::new())
    }

    pub fn with_network(config: Config, network: SimulatedNetwork) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let network = Arc::new(network);
        let registry = Arc::new(InMemoryRegistry::new(
            config.endpoints.dynamic_endpoint_count,
            &[0, config.endpoints.parent_endpoint_id],
        ));
        let bridge = Arc::new(
            Bridge::new(config, network.clone(), registry.clone()).expect("valid test config"),
        );
        let stop = Arc::new(AtomicBool::new(false));

        let zigbee = {
            let (bridge, network, stop) = (bridge.clone(), network.clone(), stop.clone());
            thread::Builder::new()
                .name("zigbee-stack".into())
                .spawn(move || network.run(&bridge, &stop, Duration::from_millis(2)))
                .expect("spawn zigbee thread")
        };
        let matter = {
            let (bridge, stop) = (bridge.clone(), stop.clone());
            thread::Builder::new()
                .name("matter-stack".into())
                .spawn(move || {
                    while !stop.load(Ordering::Relaxed) {
                        bridge.serve_local_once(Duration::from_millis(10));
                    }
                })
                .expect("spawn matter thread")
        };

        Self {
            bridge,
            network,
            registry,
            stop,
            threads: vec![zigbee, matter],
        }
    }

    /// Poll `done` until it holds or the wait limit passes.
    pub fn wait_until(&self, mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + WAIT_LIMIT;
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        done()
    }

    /// Wait for the device at `short_addr` to satisfy `pred`.
    pub fn wait_for(&self, short_addr: ShortAddr, pred: impl Fn(&DeviceRecord) -> bool) -> Option<DeviceId> {
        let mut found = None;
        self.wait_until(|| {
            let Some(id) = self.bridge.device_by_short(short_addr) else {
                return false;
            };
            let ok = self.bridge.device_record(id).is_ok_and(|r| pred(&r));
            if ok {
                found = Some(id);
            }
            ok
        });
        found
    }

    pub fn wait_for_state(&self, short_addr: ShortAddr, pred: impl Fn(DeviceState) -> bool) -> Option<DeviceId> {
        self.wait_for(short_addr, |r| pred(r.state))
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}
