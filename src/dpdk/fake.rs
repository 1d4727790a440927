//! In-memory [`NicPort`] used by every test in this crate, playing the same role the
//! teacher kernel's `LoopbackDriver` plays for `NetworkInterface`: same trait, a
//! software-only backend so the rest of the crate never needs a real EAL to be
//! exercised.

use std::collections::{BTreeMap, VecDeque};

use super::{EngineError, FlowRuleId, NicPort, PacketType, PortId, PortInitArgs, QueueId, RxFrame, TxFrame, XstatsSnapshot};

/// A single installed flow rule, recorded for assertions in tests.
#[derive(Debug, Clone)]
pub enum FakeFlowRule {
	Ipv4Steer { rx_q: QueueId, src_ip: u32, src_mask: u32 },
	DropAll,
}

/// A fully software NIC port: tests push [`RxFrame`]s into `rx_queues` before polling,
/// and read back whatever [`NicPort::tx_burst`] accepted from `tx_log`.
pub struct FakePort {
	port_id: PortId,
	mac: [u8; 6],
	socket_id: i32,
	mtu: u16,
	started: bool,
	promiscuous: bool,
	rx_queues: BTreeMap<QueueId, VecDeque<RxFrame>>,
	tx_log: BTreeMap<QueueId, Vec<TxFrame>>,
	flow_rules: BTreeMap<FlowRuleId, FakeFlowRule>,
	next_rule_id: u32,
	xstats: XstatsSnapshot,
}

impl FakePort {
	pub fn new(port_id: PortId, mac: [u8; 6]) -> Self {
		FakePort {
			port_id,
			mac,
			socket_id: 0,
			mtu: 9000,
			started: false,
			promiscuous: false,
			rx_queues: BTreeMap::new(),
			tx_log: BTreeMap::new(),
			flow_rules: BTreeMap::new(),
			next_rule_id: 0,
			xstats: XstatsSnapshot::default(),
		}
	}

	/// Queues a frame to be returned by the next [`NicPort::rx_burst`] on `q`.
	pub fn inject_rx(&mut self, q: QueueId, frame: RxFrame) {
		self.rx_queues.entry(q).or_default().push_back(frame);
	}

	/// Frames accepted by [`NicPort::tx_burst`] on `q`, in send order.
	pub fn sent_on(&self, q: QueueId) -> &[TxFrame] {
		self.tx_log.get(&q).map(|v| v.as_slice()).unwrap_or(&[])
	}

	pub fn installed_flow_rules(&self) -> impl Iterator<Item = &FakeFlowRule> {
		self.flow_rules.values()
	}

	pub fn is_promiscuous(&self) -> bool {
		self.promiscuous
	}

	/// Lets a test pre-load a counter value for the next [`NicPort::xstats_poll`].
	pub fn set_xstat(&mut self, name: &str, value: u64) {
		self.xstats.values.insert(name.to_string(), value);
	}
}

impl NicPort for FakePort {
	fn port_id(&self) -> PortId {
		self.port_id
	}

	fn mac_address(&self) -> [u8; 6] {
		self.mac
	}

	fn socket_id(&self) -> i32 {
		self.socket_id
	}

	fn mtu(&self) -> u16 {
		self.mtu
	}

	fn init(&mut self, args: &PortInitArgs) -> Result<(), EngineError> {
		self.mtu = args.mtu;
		self.started = true;
		Ok(())
	}

	fn set_promiscuous(&mut self, on: bool) -> Result<(), EngineError> {
		self.promiscuous = on;
		Ok(())
	}

	fn stop(&mut self) {
		self.started = false;
	}

	fn rx_burst(&mut self, q: QueueId, max: usize) -> Vec<RxFrame> {
		let Some(queue) = self.rx_queues.get_mut(&q) else {
			return Vec::new();
		};
		let n = queue.len().min(max);
		queue.drain(..n).collect()
	}

	fn tx_burst(&mut self, q: QueueId, frames: &mut Vec<TxFrame>) -> usize {
		let sent = frames.len();
		self.tx_log.entry(q).or_default().extend(frames.drain(..));
		sent
	}

	fn flow_create_ipv4_steer(
		&mut self,
		rx_q: QueueId,
		src_ip: u32,
		src_mask: u32,
	) -> Result<FlowRuleId, EngineError> {
		let id = FlowRuleId(self.next_rule_id);
		self.next_rule_id += 1;
		self.flow_rules
			.insert(id, FakeFlowRule::Ipv4Steer { rx_q, src_ip, src_mask });
		Ok(id)
	}

	fn flow_create_drop_all(&mut self) -> Result<FlowRuleId, EngineError> {
		let id = FlowRuleId(self.next_rule_id);
		self.next_rule_id += 1;
		self.flow_rules.insert(id, FakeFlowRule::DropAll);
		Ok(id)
	}

	fn flow_flush(&mut self) -> Result<(), EngineError> {
		self.flow_rules.clear();
		Ok(())
	}

	fn xstats_setup(&mut self) -> Result<(), EngineError> {
		Ok(())
	}

	fn xstats_reset(&mut self) {
		self.xstats.values.clear();
	}

	fn xstats_poll(&mut self) -> XstatsSnapshot {
		self.xstats.clone()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rx_burst_drains_injected_frames_in_order() {
		let mut port = FakePort::new(0, [0; 6]);
		port.inject_rx(0, RxFrame { data: vec![1], nb_segs: 1, packet_type: PacketType::Ipv4 });
		port.inject_rx(0, RxFrame { data: vec![2], nb_segs: 1, packet_type: PacketType::Ipv4 });
		let burst = port.rx_burst(0, 10);
		assert_eq!(burst.len(), 2);
		assert_eq!(burst[0].data, vec![1]);
		assert_eq!(burst[1].data, vec![2]);
		assert!(port.rx_burst(0, 10).is_empty());
	}

	#[test]
	fn rx_burst_respects_max() {
		let mut port = FakePort::new(0, [0; 6]);
		for i in 0..5u8 {
			port.inject_rx(0, RxFrame { data: vec![i], nb_segs: 1, packet_type: PacketType::Ipv4 });
		}
		let burst = port.rx_burst(0, 2);
		assert_eq!(burst.len(), 2);
		assert_eq!(port.rx_burst(0, 10).len(), 3);
	}

	#[test]
	fn tx_burst_logs_every_frame_and_drains_input() {
		let mut port = FakePort::new(0, [0; 6]);
		let mut frames = vec![TxFrame::new(vec![9, 9]), TxFrame::new(vec![8])];
		let sent = port.tx_burst(0, &mut frames);
		assert_eq!(sent, 2);
		assert!(frames.is_empty());
		assert_eq!(port.sent_on(0).len(), 2);
	}

	#[test]
	fn flow_flush_clears_installed_rules() {
		let mut port = FakePort::new(0, [0; 6]);
		port.flow_create_drop_all().unwrap();
		port.flow_create_ipv4_steer(1, 0, 0).unwrap();
		assert_eq!(port.installed_flow_rules().count(), 2);
		port.flow_flush().unwrap();
		assert_eq!(port.installed_flow_rules().count(), 0);
	}
}
