//! Projects interface telemetry into the `InfoCollector` sink abstraction spec §1
//! names ("Telemetry aggregation backend: abstracted as an `InfoCollector` sink
//! accepting named scalar metrics") and into the JSON shape spec §6 describes. Grounded
//! on `NICReceiver::get_info`/`opmonlib::InfoCollector` usage throughout
//! `plugins/NICReader.cpp` — every named counter there becomes one `InfoCollector::put`
//! call here.

use serde::Serialize;

use crate::iface::IfaceTelemetry;

/// A sink that accepts named scalar metrics, standing in for
/// `opmonlib::InfoCollector` per spec §1. The engine never depends on how metrics are
/// aggregated or exported past this trait.
pub trait InfoCollector {
	fn put(&mut self, name: &str, value: u64);
}

/// An [`InfoCollector`] that just accumulates everything into a flat JSON object,
/// useful for tests and for the demo binary's console output.
#[derive(Debug, Default)]
pub struct JsonInfoCollector {
	values: serde_json::Map<String, serde_json::Value>,
}

impl JsonInfoCollector {
	pub fn new() -> Self {
		JsonInfoCollector::default()
	}

	pub fn into_json(self) -> serde_json::Value {
		serde_json::Value::Object(self.values)
	}
}

impl InfoCollector for JsonInfoCollector {
	fn put(&mut self, name: &str, value: u64) {
		self.values.insert(name.to_string(), serde_json::Value::from(value));
	}
}

/// One telemetry poll across every managed interface, produced by
/// [`crate::root::EngineRoot::telemetry`].
#[derive(Debug, Clone, Serialize)]
pub struct EngineTelemetry {
	pub interfaces: Vec<IfaceTelemetry>,
}

impl EngineTelemetry {
	/// Flattens every named scalar into `collector`, with keys of the shape
	/// `iface<id>.rxq<q>.<counter>` for per-queue fields and
	/// `iface<id>.xstats.<name>` for hardware extended counters — the same dotted
	/// naming `opmonlib`'s JSON-backed info structs produce.
	pub fn publish(&self, collector: &mut dyn InfoCollector) {
		for iface in &self.interfaces {
			let prefix = format!("iface{}", iface.iface_id);
			collector.put(&format!("{prefix}.xstats.ipackets"), iface.xstats.compact.ipackets);
			collector.put(&format!("{prefix}.xstats.opackets"), iface.xstats.compact.opackets);
			collector.put(&format!("{prefix}.xstats.ibytes"), iface.xstats.compact.ibytes);
			collector.put(&format!("{prefix}.xstats.obytes"), iface.xstats.compact.obytes);
			collector.put(&format!("{prefix}.xstats.imissed"), iface.xstats.compact.imissed);
			collector.put(&format!("{prefix}.xstats.ierrors"), iface.xstats.compact.ierrors);
			collector.put(&format!("{prefix}.xstats.oerrors"), iface.xstats.compact.oerrors);
			collector.put(&format!("{prefix}.xstats.rx_nombuf"), iface.xstats.compact.rx_nombuf);
			for (name, value) in &iface.xstats.extended {
				collector.put(&format!("{prefix}.xstats.{name}"), *value);
			}
			for (q, counters) in &iface.per_queue {
				let qprefix = format!("{prefix}.rxq{q}");
				collector.put(&format!("{qprefix}.packets_received"), counters.packets_received);
				collector.put(&format!("{qprefix}.bytes_received"), counters.bytes_received);
				collector.put(&format!("{qprefix}.packets_dropped_spsc_full"), counters.packets_dropped_spsc_full);
				collector.put(&format!("{qprefix}.spsc_queue_occupancy"), counters.spsc_queue_occupancy);
				collector.put(&format!("{qprefix}.full_rx_burst"), counters.full_rx_burst);
				collector.put(&format!("{qprefix}.max_burst_size"), counters.max_burst_size);
				collector.put(&format!("{qprefix}.packets_copied"), counters.packets_copied);
				collector.put(&format!("{qprefix}.bytes_copied"), counters.bytes_copied);
				collector.put(&format!("{qprefix}.scatter_dropped"), counters.scatter_dropped);
				collector.put(&format!("{qprefix}.non_ipv4_dropped"), counters.non_ipv4_dropped);
				collector.put(&format!("{qprefix}.malformed_dropped"), counters.malformed_dropped);
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::counters::PerQueueSnapshot;
	use crate::xstats::XstatsSnapshot;
	use std::collections::BTreeMap;

	#[test]
	fn publish_flattens_every_counter_with_a_dotted_name() {
		let mut per_queue = BTreeMap::new();
		per_queue.insert(
			0u16,
			PerQueueSnapshot {
				packets_received: 256,
				bytes_received: 1_000,
				..Default::default()
			},
		);
		let telemetry = EngineTelemetry {
			interfaces: vec![IfaceTelemetry {
				iface_id: 0,
				xstats: XstatsSnapshot::default(),
				per_queue,
			}],
		};
		let mut collector = JsonInfoCollector::new();
		telemetry.publish(&mut collector);
		let json = collector.into_json();
		assert_eq!(json["iface0.rxq0.packets_received"], 256);
		assert_eq!(json["iface0.rxq0.bytes_received"], 1000);
	}
}
