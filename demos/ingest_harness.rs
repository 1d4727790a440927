//! Thin example binary showing how a host process wires EAL args, installs a `ctrlc`
//! handler and drives the four lifecycle edges. Not built by default (see
//! `Cargo.toml`'s `required-features`); this is a demonstration, not this crate's
//! deliverable — the library is driven by an external module-lifecycle framework per
//! spec §1.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use daq_nic_ingest::config::EngineConfig;
use daq_nic_ingest::dispatch::{Consumer, ConsumerSink};
use daq_nic_ingest::dpdk::rpkt_backend::DpdkPort;
use daq_nic_ingest::dpdk::NicPort;
use daq_nic_ingest::error::{EngineError, PortId};
use daq_nic_ingest::root::{consumer_table_from, EngineRoot, PortFactory};
use daq_nic_ingest::telemetry::JsonInfoCollector;

struct DpdkPortFactory;

impl PortFactory for DpdkPortFactory {
	fn create(&mut self, iface_id: PortId, _pci_addr: &str) -> Result<Arc<Mutex<dyn NicPort>>, EngineError> {
		Ok(Arc::new(Mutex::new(DpdkPort::new(iface_id))))
	}
}

fn read_config() -> Result<EngineConfig, EngineError> {
	let path = std::env::args().nth(1).expect("usage: ingest_harness <config.json>");
	let text = std::fs::read_to_string(&path)
		.map_err(|e| EngineError::ConfigurationError(format!("cannot read {path}: {e}")))?;
	EngineConfig::from_json(&text)
}

fn main() {
	env_logger::init();

	let cfg = read_config().expect("failed to load configuration");

	rpkt_dpdk::DpdkOption::new()
		.init()
		.expect("EAL initialization failed");

	// A trivial sink-per-stream consumer table: every source_id referenced by the
	// configuration gets a bounded channel whose receiver just counts frames. A real
	// deployment wires these into whatever downstream readout buffers it has.
	let source_ids: std::collections::BTreeSet<u32> = cfg
		.interfaces
		.iter()
		.flat_map(|iface| iface.expected_sources.iter())
		.flat_map(|source| source.src_streams_mapping.iter())
		.map(|mapping| mapping.source_id)
		.collect();

	let mut entries: Vec<(u32, Arc<dyn Consumer>)> = Vec::new();
	for source_id in source_ids {
		let (tx, rx) = std::sync::mpsc::sync_channel(1024);
		std::thread::spawn(move || {
			let mut count = 0u64;
			while let Ok(_frame) = rx.recv() {
				count += 1;
				if count % 100_000 == 0 {
					log::info!("source {source_id}: {count} frames received");
				}
			}
		});
		entries.push((source_id, Arc::new(ConsumerSink::WibEth(tx))));
	}
	let consumers = consumer_table_from(entries);

	let mut root = EngineRoot::new(Box::new(DpdkPortFactory), consumers);
	root.conf(cfg).expect("conf failed");
	root.start();

	let quit = Arc::new(AtomicBool::new(false));
	{
		let quit = quit.clone();
		ctrlc::set_handler(move || quit.store(true, Ordering::Release)).expect("failed to install Ctrl-C handler");
	}

	while !quit.load(Ordering::Acquire) {
		std::thread::sleep(Duration::from_secs(1));
		let telemetry = root.telemetry();
		let mut collector = JsonInfoCollector::new();
		telemetry.publish(&mut collector);
		log::debug!("telemetry: {}", collector.into_json());
	}

	root.stop_trigger_sources();
	root.scrap().expect("scrap failed");
}
