//! Extended NIC statistics, plus the compact `rte_eth_stats` counters every port
//! carries regardless of driver. Grounded on `XstatsHelper.hpp::IfaceXstats`: its
//! `setup`/`reset_counters`/`poll` triple maps directly onto [`XstatsProbe`]'s methods,
//! with the malloc'd names/ids/values arrays replaced by the
//! [`crate::dpdk::XstatsSnapshot`] map the [`crate::dpdk::NicPort`] backend already
//! hands back.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::dpdk::NicPort;
use crate::error::EngineError;

/// The handful of counters every NIC driver exposes through `rte_eth_stats_get`,
/// independent of vendor-specific extended statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CompactEthStats {
	pub ipackets: u64,
	pub opackets: u64,
	pub ibytes: u64,
	pub obytes: u64,
	pub imissed: u64,
	pub ierrors: u64,
	pub oerrors: u64,
	pub rx_nombuf: u64,
}

impl CompactEthStats {
	/// Derives the compact view from the extended-stats name/value map, since the fake
	/// backend (unlike `rte_eth_stats_get`) only exposes one counter surface. Names not
	/// present default to zero, matching a freshly reset port.
	fn from_xstats(values: &BTreeMap<String, u64>) -> Self {
		let get = |name: &str| values.get(name).copied().unwrap_or(0);
		CompactEthStats {
			ipackets: get("ipackets"),
			opackets: get("opackets"),
			ibytes: get("ibytes"),
			obytes: get("obytes"),
			imissed: get("imissed"),
			ierrors: get("ierrors"),
			oerrors: get("oerrors"),
			rx_nombuf: get("rx_nombuf"),
		}
	}
}

/// A read-only view over the most recent [`XstatsProbe::poll`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct XstatsSnapshot {
	pub compact: CompactEthStats,
	pub extended: BTreeMap<String, u64>,
}

/// Owns the extended-statistics handle for one port: queries the name/id set once at
/// `setup`, then re-polls values by id on every [`Self::poll`].
#[derive(Default)]
pub struct XstatsProbe {
	last: XstatsSnapshot,
}

impl XstatsProbe {
	pub fn new() -> Self {
		XstatsProbe::default()
	}

	/// Queries the count and names of extended statistics once. Mirrors
	/// `IfaceXstats::setup`'s `rte_eth_xstats_get_names_by_id` call, minus the manual
	/// buffer sizing the C++ side needs for its malloc'd arrays.
	pub fn setup(&mut self, port: &mut dyn NicPort) -> Result<(), EngineError> {
		port.xstats_setup()
	}

	/// Resets both the compact and extended counters, mirroring
	/// `IfaceXstats::reset_counters` (`rte_eth_stats_reset` + `rte_eth_xstats_reset`).
	pub fn reset_counters(&mut self, port: &mut dyn NicPort) {
		port.xstats_reset();
		self.last = XstatsSnapshot::default();
	}

	/// Re-reads every extended counter by id and the compact `rte_eth_stats` struct.
	pub fn poll(&mut self, port: &mut dyn NicPort) -> &XstatsSnapshot {
		let snap = port.xstats_poll();
		self.last = XstatsSnapshot {
			compact: CompactEthStats::from_xstats(&snap.values),
			extended: snap.values,
		};
		&self.last
	}

	/// The last value returned by [`Self::poll`]; empty/default before the first poll.
	pub fn last(&self) -> &XstatsSnapshot {
		&self.last
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::dpdk::fake::FakePort;

	#[test]
	fn poll_surfaces_values_preloaded_on_the_fake_port() {
		let mut port = FakePort::new(0, [0; 6]);
		port.set_xstat("ipackets", 42);
		port.set_xstat("rx_out_of_buffer", 3);

		let mut probe = XstatsProbe::new();
		probe.setup(&mut port).unwrap();
		let snap = probe.poll(&mut port);
		assert_eq!(snap.compact.ipackets, 42);
		assert_eq!(snap.extended.get("rx_out_of_buffer"), Some(&3));
	}

	#[test]
	fn reset_counters_clears_the_last_snapshot() {
		let mut port = FakePort::new(0, [0; 6]);
		port.set_xstat("ipackets", 10);
		let mut probe = XstatsProbe::new();
		probe.setup(&mut port).unwrap();
		probe.poll(&mut port);
		probe.reset_counters(&mut port);
		assert_eq!(probe.last().compact.ipackets, 0);
		assert!(probe.last().extended.is_empty());
	}

	#[test]
	fn polling_is_monotonic_until_the_next_reset() {
		let mut port = FakePort::new(0, [0; 6]);
		let mut probe = XstatsProbe::new();
		probe.setup(&mut port).unwrap();
		port.set_xstat("ipackets", 5);
		probe.poll(&mut port);
		port.set_xstat("ipackets", 9);
		let snap = probe.poll(&mut port);
		assert!(snap.compact.ipackets >= 5);
	}
}
