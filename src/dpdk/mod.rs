//! Hardware access layer.
//!
//! [`NicPort`] is the seam between the poll-loop/flow-control logic in the rest of the
//! crate and an actual NIC driver, mirroring the way the teacher kernel's
//! `NetworkInterface` trait (`drivers::net::NetworkInterface`) decouples its receive
//! path from the concrete `rtl8139`/`virtio_net` drivers behind it. [`fake::FakePort`]
//! is the in-memory stand-in used by every test in this crate, the same role
//! `LoopbackDriver` plays for the teacher. [`rpkt_backend::DpdkPort`] is the real
//! `rpkt-dpdk`-backed implementation and only compiles with the `dpdk-backend`
//! feature, since it requires a hugepage-backed EAL at runtime.

pub mod fake;
#[cfg(feature = "dpdk-backend")]
pub mod rpkt_backend;

use crate::error::{EngineError, PortId, QueueId};

/// Classification DPDK itself performs on a received packet (`rte_mbuf::packet_type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
	Ipv4,
	Arp,
	Lldp,
	Other,
}

/// One received frame, already linearized into an owned buffer.
///
/// Real hardware hands back scattered, pool-owned mbufs; [`NicPort::rx_burst`]
/// implementations are responsible for flattening multi-segment packets (or rejecting
/// them, see [`RxFrame::nb_segs`]) before handing a frame up to [`crate::engine`].
#[derive(Debug, Clone)]
pub struct RxFrame {
	pub data: Vec<u8>,
	pub nb_segs: u32,
	pub packet_type: PacketType,
}

/// A frame ready to hand to [`NicPort::tx_burst`].
#[derive(Debug, Clone)]
pub struct TxFrame {
	pub data: Vec<u8>,
}

impl TxFrame {
	pub fn new(data: Vec<u8>) -> Self {
		TxFrame { data }
	}
}

/// Opaque handle to an installed hardware flow rule, returned so it can later be
/// targeted by a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowRuleId(pub u32);

/// A snapshot of a port's extended NIC statistics, already flattened into a JSON-ready
/// name/value map by the backend (field names vary by NIC driver).
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct XstatsSnapshot {
	pub values: std::collections::BTreeMap<String, u64>,
}

/// Arguments used to bring a port up: RX/TX queue counts, descriptor ring sizes, MTU
/// and mempool sizing. Grounded on `EALSetup.hpp`'s `port_init`/`port_conf_default`.
#[derive(Debug, Clone)]
pub struct PortInitArgs {
	pub rx_queues: u16,
	pub tx_queues: u16,
	pub rx_ring_size: u16,
	pub tx_ring_size: u16,
	pub mtu: u16,
	pub mempool_size: u32,
	pub mempool_cache_size: u32,
}

impl Default for PortInitArgs {
	fn default() -> Self {
		PortInitArgs {
			rx_queues: 1,
			tx_queues: 1,
			rx_ring_size: 1024,
			tx_ring_size: 1024,
			mtu: 9000,
			mempool_size: 8192,
			mempool_cache_size: 256,
		}
	}
}

/// Trait for accessing a single NIC port: bring-up, RX/TX bursts, flow steering rules
/// and extended statistics. Implemented by [`fake::FakePort`] for tests and by
/// [`rpkt_backend::DpdkPort`] (feature `dpdk-backend`) against real hardware.
pub trait NicPort: Send {
	fn port_id(&self) -> PortId;
	fn mac_address(&self) -> [u8; 6];
	fn socket_id(&self) -> i32;
	fn mtu(&self) -> u16;

	/// Brings the port up with the given queue/ring/mempool configuration.
	fn init(&mut self, args: &PortInitArgs) -> Result<(), EngineError>;
	fn set_promiscuous(&mut self, on: bool) -> Result<(), EngineError>;
	/// Idempotent teardown; safe to call on a port that was never started.
	fn stop(&mut self);

	/// Polls up to `max` packets off `q`. Never blocks. Returns an empty vec when
	/// nothing is pending.
	fn rx_burst(&mut self, q: QueueId, max: usize) -> Vec<RxFrame>;
	/// Transmits as many of `frames` as the device will accept right now, in order,
	/// and returns how many were sent (the caller owns whatever remains).
	fn tx_burst(&mut self, q: QueueId, frames: &mut Vec<TxFrame>) -> usize;

	/// Installs a steering rule that sends IPv4 traffic from `src_ip`/`src_mask` to
	/// `rx_q`. Grounded on `FlowControl.cpp::generate_ipv4_flow`.
	fn flow_create_ipv4_steer(
		&mut self,
		rx_q: QueueId,
		src_ip: u32,
		src_mask: u32,
	) -> Result<FlowRuleId, EngineError>;
	/// Installs a catch-all drop rule, used to discard traffic from unexpected
	/// sources. Grounded on `FlowControl.cpp::generate_drop_flow`.
	fn flow_create_drop_all(&mut self) -> Result<FlowRuleId, EngineError>;
	/// Removes every flow rule installed on this port.
	fn flow_flush(&mut self) -> Result<(), EngineError>;

	fn xstats_setup(&mut self) -> Result<(), EngineError>;
	fn xstats_reset(&mut self);
	fn xstats_poll(&mut self) -> XstatsSnapshot;
}
