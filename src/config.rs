//! Configuration schema accepted by [`crate::root::EngineRoot::conf`].
//!
//! Deserialized with `serde`/`serde_json`, following the teacher's own convention of
//! plain derive-based config structs (see e.g. `virtio-spec`'s feature negotiation
//! structs) rather than a bespoke parser.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, QueueId};
use crate::header::parse_ipv4;

fn default_mtu() -> u16 {
	9000
}
fn default_ring_size() -> u16 {
	1024
}
fn default_num_mbufs() -> u32 {
	8191
}
fn default_mbuf_cache_size() -> u32 {
	250
}
fn default_burst_size() -> u16 {
	256
}
fn default_lcore_sleep_us() -> u64 {
	1000
}
fn default_true() -> bool {
	true
}

/// One entry of an interface's `src_streams_mapping`: which source a given stream id
/// belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamMapping {
	pub stream_id: u8,
	pub source_id: u32,
}

/// A single transmitter this interface is allowed to receive from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpectedSource {
	pub ip_addr: String,
	pub rx_q: QueueId,
	pub lcore: u32,
	pub src_streams_mapping: Vec<StreamMapping>,
}

impl ExpectedSource {
	pub fn ip_addr_binary(&self) -> Result<u32, EngineError> {
		parse_ipv4(&self.ip_addr)
	}
}

/// Configuration for a single NIC port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IfaceConfig {
	pub pci_addr: String,
	pub mac_addr: String,
	pub ip_addr: String,

	#[serde(default = "default_mtu")]
	pub mtu: u16,
	#[serde(default = "default_ring_size")]
	pub rx_ring_size: u16,
	#[serde(default = "default_ring_size")]
	pub tx_ring_size: u16,
	#[serde(default = "default_num_mbufs")]
	pub num_mbufs: u32,
	#[serde(default = "default_mbuf_cache_size")]
	pub mbuf_cache_size: u32,
	#[serde(default = "default_burst_size")]
	pub burst_size: u16,
	#[serde(default = "default_lcore_sleep_us")]
	pub lcore_sleep_us: u64,
	#[serde(default)]
	pub promiscuous: bool,
	#[serde(default = "default_true")]
	pub with_flow_control: bool,
	#[serde(default)]
	pub expected_sources: Vec<ExpectedSource>,
}

impl IfaceConfig {
	pub fn ip_addr_binary(&self) -> Result<u32, EngineError> {
		parse_ipv4(&self.ip_addr)
	}

	/// Builds the `source_id -> stream_id` lookup this interface's [`crate::dispatch`]
	/// will need, flattening every expected source's mapping into one table and
	/// rejecting a stream id claimed twice.
	pub fn stream_to_source_map(&self) -> Result<HashMap<u8, u32>, EngineError> {
		let mut map = HashMap::new();
		for source in &self.expected_sources {
			for mapping in &source.src_streams_mapping {
				if map.insert(mapping.stream_id, mapping.source_id).is_some() {
					return Err(EngineError::ConfigurationError(format!(
						"stream_id {} is claimed by more than one expected source",
						mapping.stream_id
					)));
				}
			}
		}
		Ok(map)
	}
}

/// Top-level configuration accepted by `conf`: free-form EAL arguments plus one
/// [`IfaceConfig`] per managed port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
	#[serde(default)]
	pub eal_args: Vec<String>,
	pub interfaces: Vec<IfaceConfig>,
}

impl EngineConfig {
	/// Parses a JSON configuration document.
	pub fn from_json(text: &str) -> Result<Self, EngineError> {
		serde_json::from_str(text).map_err(|e| EngineError::ConfigurationError(e.to_string()))
	}

	/// Validates cross-interface invariants: no two interfaces claim the same IP
	/// address, and every expected source maps at least one stream to a consumer.
	pub fn validate(&self) -> Result<(), EngineError> {
		let mut seen_ips = std::collections::HashSet::new();
		for iface in &self.interfaces {
			if !seen_ips.insert(iface.ip_addr.clone()) {
				return Err(EngineError::ConfigurationError(format!(
					"duplicate ip_addr {} across interfaces",
					iface.ip_addr
				)));
			}
			if iface.expected_sources.is_empty() {
				return Err(EngineError::ConfigurationError(format!(
					"interface {} has no expected_sources",
					iface.pci_addr
				)));
			}
			// also validates there are no duplicate stream_id claims on this interface
			iface.stream_to_source_map()?;
		}
		Ok(())
	}

	/// Assembles the ordered EAL argument vector: a primary-process flag, one `-a
	/// <pci>` per NIC, and a file-prefix derived from the first NIC's PCI address, per
	/// `EALSetup.hpp`.
	pub fn eal_argv(&self) -> Vec<String> {
		let mut argv = vec!["daq-nic-ingest".to_string(), "--proc-type=primary".to_string()];
		argv.extend(self.eal_args.iter().cloned());
		for iface in &self.interfaces {
			argv.push("-a".to_string());
			argv.push(iface.pci_addr.clone());
		}
		if let Some(first) = self.interfaces.first() {
			argv.push(format!(
				"--file-prefix={}",
				first.pci_addr.replace([':', '.'], "_")
			));
		}
		argv
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sample_iface() -> IfaceConfig {
		IfaceConfig {
			pci_addr: "0000:ca:00.0".to_string(),
			mac_addr: "6c:fe:54:47:98:20".to_string(),
			ip_addr: "10.73.139.26".to_string(),
			mtu: default_mtu(),
			rx_ring_size: default_ring_size(),
			tx_ring_size: default_ring_size(),
			num_mbufs: default_num_mbufs(),
			mbuf_cache_size: default_mbuf_cache_size(),
			burst_size: default_burst_size(),
			lcore_sleep_us: default_lcore_sleep_us(),
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
	fn defaults_match_original_tool_defaults() {
		let json = r#"{"pci_addr":"0000:ca:00.0","mac_addr":"6c:fe:54:47:98:20","ip_addr":"10.73.139.26","expected_sources":[]}"#;
		let iface: IfaceConfig = serde_json::from_str(json).unwrap();
		assert_eq!(iface.mtu, 9000);
		assert_eq!(iface.rx_ring_size, 1024);
		assert_eq!(iface.num_mbufs, 8191);
		assert_eq!(iface.mbuf_cache_size, 250);
		assert_eq!(iface.burst_size, 256);
		assert_eq!(iface.lcore_sleep_us, 1000);
		assert!(iface.with_flow_control);
		assert!(!iface.promiscuous);
	}

	#[test]
	fn rejects_duplicate_stream_id_within_an_interface() {
		let mut iface = sample_iface();
		iface.expected_sources.push(ExpectedSource {
			ip_addr: "10.73.139.28".to_string(),
			rx_q: 1,
			lcore: 3,
			src_streams_mapping: vec![StreamMapping { stream_id: 1, source_id: 101 }],
		});
		assert!(iface.stream_to_source_map().is_err());
	}

	#[test]
	fn validate_rejects_duplicate_interface_ip() {
		let cfg = EngineConfig {
			eal_args: vec![],
			interfaces: vec![sample_iface(), sample_iface()],
		};
		assert!(cfg.validate().is_err());
	}

	#[test]
	fn eal_argv_derives_file_prefix_from_first_nic() {
		let cfg = EngineConfig {
			eal_args: vec!["-l".to_string(), "0-1".to_string()],
			interfaces: vec![sample_iface()],
		};
		let argv = cfg.eal_argv();
		assert!(argv.contains(&"-a".to_string()));
		assert!(argv.iter().any(|a| a == "0000:ca:00.0"));
		assert!(argv.iter().any(|a| a.starts_with("--file-prefix=0000_ca_00_0")));
	}
}
