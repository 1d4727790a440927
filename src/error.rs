//! Error types shared by every module in this crate.

use thiserror::Error;

/// A port identifier as reported by the hardware abstraction layer.
pub type PortId = u16;
/// A receive or transmit queue index within a port.
pub type QueueId = u16;

/// Everything that can go wrong while bringing up or running an ingest engine.
#[derive(Debug, Error)]
pub enum EngineError {
	#[error("EAL initialization failed: {reason}")]
	EalInitFailed { reason: String },

	#[error("interface {iface} is not a valid port on this EAL instance")]
	InterfaceInvalid { iface: PortId },

	#[error("setup of interface {iface} failed with driver code {code}")]
	InterfaceSetupFailed { iface: PortId, code: i32 },

	#[error("flow rule on iface {iface} rxq {rxq} was rejected: {reason}")]
	FlowRuleRejected {
		iface: PortId,
		rxq: QueueId,
		reason: String,
	},

	#[error("configuration error: {0}")]
	ConfigurationError(String),

	#[error("malformed frame on iface {iface} rxq {rxq}: {reason}")]
	MalformedFrame {
		iface: PortId,
		rxq: QueueId,
		reason: String,
	},

	#[error("consumer for source {source_id} is full, frame dropped")]
	ConsumerFull { source_id: u32 },

	#[error("frame carries stream id {stream_id} with no registered consumer")]
	UnexpectedStreamId { stream_id: u8 },
}

/// Convenience alias used throughout the crate.
pub type EngineResult<T> = Result<T, EngineError>;
