//! Composes bootstrap, flow steering, xstats and the receive engine into the lifecycle
//! of one interface. Grounded on `IfaceWrapper.cpp`/`IfaceWrapper.hxx`: `init`,
//! `configure`, `start`, `stop`, `scrap` map directly onto the methods below.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::arp::ArpResponder;
use crate::bootstrap::{BootstrapArgs, InterfaceBootstrap};
use crate::config::IfaceConfig;
use crate::counters::{PerQueueCounters, PerQueueSnapshot, StreamCounters};
use crate::dispatch::{ConsumerTable, StreamDispatch};
use crate::dpdk::{NicPort, TxFrame};
use crate::engine::{ReceiveEngine, RxCoreMap};
use crate::error::{EngineError, PortId, QueueId};
use crate::flow::{FlowRuleEngine, SteerTarget};
use crate::header::parse_ipv4;
use crate::xstats::{XstatsProbe, XstatsSnapshot};

/// Everything the running `scrap`/`stop`/telemetry edges need to reach into one
/// interface: its hardware port, flow table, xstats probe, per-queue counters, lcore
/// worker/GARP thread handles and the shared quit/flow-gate atomics.
pub struct IfaceWrapper {
	iface_id: PortId,
	port: Arc<Mutex<dyn NicPort>>,
	cfg: IfaceConfig,
	flow: FlowRuleEngine,
	xstats: XstatsProbe,
	rx_core_map: RxCoreMap,
	dispatch: Arc<StreamDispatch>,
	queue_counters: Arc<BTreeMap<QueueId, Arc<PerQueueCounters>>>,
	quit: Arc<AtomicBool>,
	flow_enabled: Arc<AtomicBool>,
	arp: Arc<ArpResponder>,
	worker_handles: Vec<JoinHandle<()>>,
	garp_handle: Option<JoinHandle<()>>,
	garp_quit: Arc<AtomicBool>,
}

impl IfaceWrapper {
	/// Builds the per-interface state. `consumers` is the process-wide
	/// [`ConsumerTable`] owned by [`crate::root::EngineRoot`] and shared read-only by
	/// every interface, per spec §3.
	pub fn new(
		iface_id: PortId,
		port: Arc<Mutex<dyn NicPort>>,
		cfg: IfaceConfig,
		consumers: Arc<ConsumerTable>,
	) -> Result<Self, EngineError> {
		let mut rx_core_map = RxCoreMap::new();
		let mut stream_to_source = std::collections::HashMap::new();
		let mut queue_counters = BTreeMap::new();

		for source in &cfg.expected_sources {
			rx_core_map.assign(source.lcore, source.rx_q);
			queue_counters
				.entry(source.rx_q)
				.or_insert_with(|| Arc::new(PerQueueCounters::default()));
			for mapping in &source.src_streams_mapping {
				stream_to_source.insert((source.rx_q, mapping.stream_id), mapping.source_id);
			}
		}

		let stream_counters = Arc::new(StreamCounters::new());
		let dispatch = Arc::new(StreamDispatch::new(stream_to_source, consumers, stream_counters));

		let mac = crate::header::parse_mac(&cfg.mac_addr)?;
		let ip = cfg.ip_addr_binary()?;
		let arp = Arc::new(ArpResponder::new(mac, ip));

		Ok(IfaceWrapper {
			iface_id,
			port,
			cfg,
			flow: FlowRuleEngine::new(),
			xstats: XstatsProbe::new(),
			rx_core_map,
			dispatch,
			queue_counters: Arc::new(queue_counters),
			quit: Arc::new(AtomicBool::new(false)),
			flow_enabled: Arc::new(AtomicBool::new(false)),
			arp,
			worker_handles: Vec::new(),
			garp_handle: None,
			garp_quit: Arc::new(AtomicBool::new(false)),
		})
	}

	/// `setup_interface`: delegates to [`InterfaceBootstrap`]. Enough rx queues to
	/// cover every configured `rx_q`, one tx queue reserved for ARP as resolved in
	/// `DESIGN.md`'s Open Question #2.
	pub fn setup_interface(&mut self) -> Result<(), EngineError> {
		let n_rx = self
			.rx_core_map
			.lcores()
			.flat_map(|(_, queues)| queues.iter())
			.max()
			.map(|q| q + 1)
			.unwrap_or(1);

		let mut port = self.port.lock().unwrap();
		InterfaceBootstrap::init(
			&mut *port,
			&BootstrapArgs {
				n_rx,
				n_tx: 1,
				rx_ring_size: self.cfg.rx_ring_size,
				tx_ring_size: self.cfg.tx_ring_size,
				mtu: self.cfg.mtu,
				num_mbufs: self.cfg.num_mbufs,
				mbuf_cache_size: self.cfg.mbuf_cache_size,
				reset_device: true,
				enable_rss: n_rx > 1,
			},
		)?;
		InterfaceBootstrap::set_promiscuous(&mut *port, self.cfg.promiscuous)?;
		Ok(())
	}

	/// `setup_flow_steering`: flush then install one rule per expected source, plus the
	/// catch-all drop rule when `with_flow_control` is set.
	pub fn setup_flow_steering(&mut self) -> Result<(), EngineError> {
		let mut port = self.port.lock().unwrap();
		self.flow.flush(&mut *port)?;
		for source in &self.cfg.expected_sources {
			let src_ip = parse_ipv4(&source.ip_addr)?;
			self.flow
				.steer_src_ip(&mut *port, SteerTarget { rx_q: source.rx_q, src_ip })?;
		}
		if self.cfg.with_flow_control {
			self.flow.drop_remainder(&mut *port)?;
		}
		Ok(())
	}

	pub fn setup_xstats(&mut self) -> Result<(), EngineError> {
		let mut port = self.port.lock().unwrap();
		self.xstats.setup(&mut *port)
	}

	/// Launches one lcore worker per entry in `rx_core_map`. Called on the `conf` edge
	/// per spec §3 ("Lcore workers: launched on `conf` if not already"); the workers
	/// poll their queues immediately but dispatch nothing until [`Self::start`] flips
	/// the flow gate, since spec §4.8 item 6 reserves that toggle for `start`/
	/// `stop_trigger_sources`.
	pub fn launch_workers(&mut self) {
		if !self.worker_handles.is_empty() {
			return;
		}
		self.quit.store(false, Ordering::Release);
		self.worker_handles = self.spawn_workers();
		log::info!(
			"interface {} lcore workers launched: {}",
			self.iface_id,
			self.worker_handles.len()
		);
	}

	/// `start`: resets per-queue counters, opens the flow gate so dispatch begins, and
	/// launches the GARP thread.
	pub fn start(&mut self) {
		for counters in self.queue_counters.values() {
			counters.reset();
		}
		self.garp_quit.store(false, Ordering::Release);
		self.enable_flow();
		self.garp_handle = Some(self.spawn_garp_thread());
		log::info!("interface {} started", self.iface_id);
	}

	fn spawn_workers(&self) -> Vec<JoinHandle<()>> {
		let engine = self.build_engine();
		self.rx_core_map
			.lcores()
			.map(|(&lcore_id, queues)| engine.clone().spawn_worker(lcore_id, queues.clone(), self.queue_counters.clone()))
			.collect()
	}

	fn build_engine(&self) -> Arc<ReceiveEngine> {
		Arc::new(ReceiveEngine::new(
			self.port.clone(),
			self.dispatch.clone(),
			self.arp.clone(),
			0,
			self.cfg.burst_size as usize,
			Duration::from_micros(self.cfg.lcore_sleep_us),
			self.quit.clone(),
			self.flow_enabled.clone(),
		))
	}

	fn spawn_garp_thread(&self) -> JoinHandle<()> {
		let port = self.port.clone();
		let arp = self.arp.clone();
		let quit = self.garp_quit.clone();
		let iface_id = self.iface_id;
		std::thread::Builder::new()
			.name(format!("garp-{iface_id}"))
			.spawn(move || {
				while !quit.load(Ordering::Acquire) {
					let frame: TxFrame = arp.emit_garp();
					let mut frames = vec![frame];
					let sent = {
						let mut p = port.lock().unwrap();
						p.tx_burst(0, &mut frames)
					};
					if sent == 0 {
						log::warn!("GARP transmit on interface {iface_id} returned zero");
					}
					std::thread::sleep(Duration::from_secs(1));
				}
			})
			.expect("failed to spawn GARP thread")
	}

	/// `enable_flow` / `disable_flow`: toggles the atomic the worker consults to gate
	/// dispatch, letting `conf` pre-start the workers before traffic should flow and
	/// letting `stop_trigger_sources` quiesce them without tearing them down.
	pub fn enable_flow(&self) {
		self.flow_enabled.store(true, Ordering::Release);
	}
	pub fn disable_flow(&self) {
		self.flow_enabled.store(false, Ordering::Release);
	}

	/// `stop`: sets the quit atomic, joins the GARP thread, and waits for every lcore
	/// worker to drain and exit on its own. Resolves Open Question #1: the GARP
	/// thread's in-flight `emit_garp` is allowed to complete rather than interrupted.
	pub fn stop(&mut self) {
		self.garp_quit.store(true, Ordering::Release);
		if let Some(handle) = self.garp_handle.take() {
			let _ = handle.join();
		}
		self.quit.store(true, Ordering::Release);
		for handle in self.worker_handles.drain(..) {
			let _ = handle.join();
		}
	}

	/// `scrap`: flushes flow rules. Idempotent — safe to call even if
	/// `setup_flow_steering` never ran.
	pub fn scrap(&mut self) -> Result<(), EngineError> {
		let mut port = self.port.lock().unwrap();
		self.flow.flush(&mut *port)
	}

	pub fn iface_id(&self) -> PortId {
		self.iface_id
	}

	/// One telemetry record for this interface: compact + extended xstats, plus every
	/// rx-queue's counters, matching spec §6's "Telemetry output" shape.
	pub fn telemetry(&mut self) -> IfaceTelemetry {
		let xstats = {
			let mut port = self.port.lock().unwrap();
			self.xstats.poll(&mut *port).clone()
		};
		let per_queue = self
			.queue_counters
			.iter()
			.map(|(&q, c)| (q, c.snapshot()))
			.collect();
		IfaceTelemetry {
			iface_id: self.iface_id,
			xstats,
			per_queue,
		}
	}
}

/// One interface's snapshot for the outer telemetry aggregation sink (spec §1's
/// `InfoCollector` abstraction).
#[derive(Debug, Clone, serde::Serialize)]
pub struct IfaceTelemetry {
	pub iface_id: PortId,
	pub xstats: XstatsSnapshot,
	pub per_queue: BTreeMap<QueueId, PerQueueSnapshot>,
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::{ExpectedSource, IfaceConfig, StreamMapping};
	use crate::dispatch::ConsumerSink;
	use crate::dpdk::fake::FakePort;
	use std::sync::mpsc::sync_channel;
	use std::time::Duration as StdDuration;

	fn sample_cfg() -> IfaceConfig {
		IfaceConfig {
			pci_addr: "0000:ca:00.0".to_string(),
			mac_addr: "6c:fe:54:47:98:20".to_string(),
			ip_addr: "10.73.139.26".to_string(),
			mtu: 9000,
			rx_ring_size: 1024,
			tx_ring_size: 1024,
			num_mbufs: 8191,
			mbuf_cache_size: 250,
			burst_size: 256,
			lcore_sleep_us: 200,
			promiscuous: false,
			with_flow_control: true,
			expected_sources: vec![ExpectedSource {
				ip_addr: "10.73.139.27".to_string(),
				rx_q: 0,
				lcore: 2,
				src_streams_mapping: vec![StreamMapping { stream_id: 1, source_id: 100 }],
			}],
		}
	}

	#[test]
	fn full_lifecycle_delivers_a_burst_end_to_end() {
		let port: Arc<Mutex<dyn NicPort>> = Arc::new(Mutex::new(FakePort::new(0, [0x6c, 0xfe, 0x54, 0x47, 0x98, 0x20])));
		let (tx, rx) = sync_channel(64);
		let mut table = ConsumerTable::new();
		table.insert(100, Arc::new(ConsumerSink::WibEth(tx)));

		let mut iface = IfaceWrapper::new(0, port.clone(), sample_cfg(), Arc::new(table)).unwrap();
		iface.setup_interface().unwrap();
		iface.setup_flow_steering().unwrap();
		iface.setup_xstats().unwrap();
		iface.launch_workers();
		iface.start();

		// Inject a burst directly through the fake backend while the worker is polling.
		{
			use crate::codec::{build_headers, FrameAddressing};
			use crate::dpdk::{PacketType, RxFrame};
			use crate::header::{DaqEthHeader, Suid};

			let mut fake = port.lock().unwrap();
			for seq in 0..16u16 {
				let header = DaqEthHeader {
					suid: Suid { det_id: 2, crate_id: 1, slot_id: 0, stream_id: 1 },
					seq_id: seq,
					timestamp: seq as u64 * 2048,
				};
				let addressing = FrameAddressing {
					src_mac: [1, 2, 3, 4, 5, 6],
					dst_mac: [0x6c, 0xfe, 0x54, 0x47, 0x98, 0x20],
					src_ip: crate::header::parse_ipv4("10.73.139.27").unwrap(),
					dst_ip: crate::header::parse_ipv4("10.73.139.26").unwrap(),
					src_port: 60000,
					dst_port: 60001,
				};
				let frame = build_headers(&addressing, &header, &[0u8; 32]);
				fake.inject_rx(0, RxFrame { data: frame, nb_segs: 1, packet_type: PacketType::Ipv4 });
			}
		}

		std::thread::sleep(StdDuration::from_millis(50));
		iface.stop();
		iface.scrap().unwrap();

		assert_eq!(rx.try_iter().count(), 16);
	}
}
