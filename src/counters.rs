//! Per-rx-queue and per-stream atomic counters, shared read-many/write-one between the
//! owning lcore (the only writer) and the telemetry thread (the only outside reader).
//! Grounded on the counter set `NICReceiver::get_info` projects into
//! `nicreaderinfo::Info` (`packets_received`, `packets_dropped_spsc_full`,
//! `spsc_queue_occupancy`, `full_rx_burst`, `max_burst_size`, ...) and on
//! `NICReceiver::rx_runner`'s `bad_seq_id`/`bad_timestamp`/`max_seq_id_skip` bookkeeping.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::Serialize;

use crate::header::Suid;

/// One rx-queue's worth of counters. All fields are written only by the lcore that owns
/// the queue; reads (telemetry) never block a writer because every field is a plain
/// atomic.
#[derive(Default)]
pub struct PerQueueCounters {
	pub packets_rx: AtomicU64,
	pub bytes_rx: AtomicU64,
	pub frames_dropped_on_full: AtomicU64,
	pub full_bursts: AtomicU64,
	pub total_bursts: AtomicU64,
	pub max_burst: AtomicU64,
	pub packets_copied: AtomicU64,
	pub bytes_copied: AtomicU64,
	pub scatter_dropped: AtomicU64,
	pub non_ipv4_dropped: AtomicU64,
	pub malformed_dropped: AtomicU64,
}

/// JSON-shaped snapshot of one [`PerQueueCounters`], matching the per-queue telemetry
/// record shape described in spec §6.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PerQueueSnapshot {
	pub packets_received: u64,
	pub bytes_received: u64,
	pub packets_dropped_spsc_full: u64,
	pub spsc_queue_occupancy: u64,
	pub full_rx_burst: u64,
	pub max_burst_size: u64,
	pub packets_copied: u64,
	pub bytes_copied: u64,
	pub scatter_dropped: u64,
	pub non_ipv4_dropped: u64,
	pub malformed_dropped: u64,
}

impl PerQueueCounters {
	pub fn record_burst(&self, nb_rx: usize, burst_size: usize) {
		self.total_bursts.fetch_add(1, Ordering::Relaxed);
		if nb_rx == burst_size {
			self.full_bursts.fetch_add(1, Ordering::Relaxed);
		}
		self.max_burst.fetch_max(nb_rx as u64, Ordering::Relaxed);
	}

	pub fn record_data_frame(&self, bytes: usize) {
		self.packets_rx.fetch_add(1, Ordering::Relaxed);
		self.bytes_rx.fetch_add(bytes as u64, Ordering::Relaxed);
	}

	pub fn record_copied(&self, bytes: usize) {
		self.packets_copied.fetch_add(1, Ordering::Relaxed);
		self.bytes_copied.fetch_add(bytes as u64, Ordering::Relaxed);
	}

	/// Snapshot for telemetry. `spsc_queue_occupancy` has no software-visible
	/// equivalent at this layer (the consumer owns its own queue); it is reported as
	/// the running count of frames successfully copied in, which is the closest
	/// observable proxy this module has for how much of the consumer's buffer this
	/// queue has pushed through.
	pub fn snapshot(&self) -> PerQueueSnapshot {
		PerQueueSnapshot {
			packets_received: self.packets_rx.load(Ordering::Relaxed),
			bytes_received: self.bytes_rx.load(Ordering::Relaxed),
			packets_dropped_spsc_full: self.frames_dropped_on_full.load(Ordering::Relaxed),
			spsc_queue_occupancy: self.packets_copied.load(Ordering::Relaxed),
			full_rx_burst: self.full_bursts.load(Ordering::Relaxed),
			max_burst_size: self.max_burst.load(Ordering::Relaxed),
			packets_copied: self.packets_copied.load(Ordering::Relaxed),
			bytes_copied: self.bytes_copied.load(Ordering::Relaxed),
			scatter_dropped: self.scatter_dropped.load(Ordering::Relaxed),
			non_ipv4_dropped: self.non_ipv4_dropped.load(Ordering::Relaxed),
			malformed_dropped: self.malformed_dropped.load(Ordering::Relaxed),
		}
	}

	pub fn reset(&self) {
		self.packets_rx.store(0, Ordering::Relaxed);
		self.bytes_rx.store(0, Ordering::Relaxed);
		self.frames_dropped_on_full.store(0, Ordering::Relaxed);
		self.full_bursts.store(0, Ordering::Relaxed);
		self.total_bursts.store(0, Ordering::Relaxed);
		self.max_burst.store(0, Ordering::Relaxed);
		self.packets_copied.store(0, Ordering::Relaxed);
		self.bytes_copied.store(0, Ordering::Relaxed);
		self.scatter_dropped.store(0, Ordering::Relaxed);
		self.non_ipv4_dropped.store(0, Ordering::Relaxed);
		self.malformed_dropped.store(0, Ordering::Relaxed);
	}
}

/// Sequence/timestamp/size continuity bookkeeping for one stream, keyed by [`Suid`].
/// Grounded on `NICReceiver::rx_runner`'s per-link `m_seq_id[cid]`/`m_last_sequence_skip`
/// tracking.
#[derive(Default)]
pub struct StreamContinuity {
	pub bad_seq_id: AtomicU64,
	pub max_seq_id_skip: AtomicU64,
	pub bad_timestamp: AtomicU64,
	pub bad_payload_size: AtomicU64,
}

/// Per-stream continuity state plus the unexpected-stream-id counters, shared by
/// [`crate::dispatch::StreamDispatch`] (which only ever reads the SUID key set) and the
/// owning lcore (the only writer).
#[derive(Default)]
pub struct StreamCounters {
	continuity: Mutex<HashMap<Suid, StreamState>>,
	unexpected_stream_id: Mutex<HashMap<Suid, u64>>,
}

struct StreamState {
	prev_seq_id: Option<u16>,
	prev_timestamp: Option<u64>,
	expected_payload_size: Option<usize>,
	counters: StreamContinuity,
}

impl StreamCounters {
	pub fn new() -> Self {
		StreamCounters::default()
	}

	/// Registers the expected payload size for a stream ahead of time, so the
	/// first-frame size check in [`Self::observe`] has something to compare against.
	pub fn configure_expected_payload_size(&self, suid: Suid, size: usize) {
		let mut map = self.continuity.lock().unwrap();
		map.entry(suid).or_insert_with(|| StreamState {
			prev_seq_id: None,
			prev_timestamp: None,
			expected_payload_size: None,
			counters: StreamContinuity::default(),
		}).expected_payload_size = Some(size);
	}

	/// Updates sequence/timestamp/size continuity state for a newly dispatched frame.
	/// Never fatal: every deviation increments a counter and the frame is still
	/// dispatched, per spec §4.6.
	pub fn observe(
		&self,
		suid: Suid,
		seq_id: u16,
		timestamp: u64,
		expected_timestamp_step: Option<u64>,
		payload_len: usize,
	) {
		let mut map = self.continuity.lock().unwrap();
		let state = map.entry(suid).or_insert_with(|| StreamState {
			prev_seq_id: None,
			prev_timestamp: None,
			expected_payload_size: None,
			counters: StreamContinuity::default(),
		});

		if let Some(prev) = state.prev_seq_id {
			let expected = (prev + 1) % 4096;
			if seq_id != expected {
				state.counters.bad_seq_id.fetch_add(1, Ordering::Relaxed);
				let skip = ((seq_id as i32 - expected as i32).rem_euclid(4096)) as u64;
				state
					.counters
					.max_seq_id_skip
					.fetch_max(skip, Ordering::Relaxed);
			}
		}
		state.prev_seq_id = Some(seq_id);

		if let (Some(step), Some(prev_ts)) = (expected_timestamp_step, state.prev_timestamp) {
			if timestamp != prev_ts.wrapping_add(step) {
				state.counters.bad_timestamp.fetch_add(1, Ordering::Relaxed);
			}
		}
		state.prev_timestamp = Some(timestamp);

		if let Some(expected_size) = state.expected_payload_size {
			if payload_len != expected_size {
				state.counters.bad_payload_size.fetch_add(1, Ordering::Relaxed);
			}
		}
	}

	/// Increments the per-SUID counter of frames whose stream id carried no registered
	/// consumer. Never allocates a new consumer slot — this is purely a counter, the
	/// anti-runaway guard spec §4.5 describes.
	pub fn record_unexpected_stream_id(&self, suid: Suid) {
		let mut map = self.unexpected_stream_id.lock().unwrap();
        *map.entry(suid).or_insert(0) += 1;
	}

	pub fn bad_seq_id(&self, suid: Suid) -> u64 {
		self.with_state(suid, |s| s.counters.bad_seq_id.load(Ordering::Relaxed))
	}

	pub fn max_seq_id_skip(&self, suid: Suid) -> u64 {
		self.with_state(suid, |s| s.counters.max_seq_id_skip.load(Ordering::Relaxed))
	}

	pub fn bad_timestamp(&self, suid: Suid) -> u64 {
		self.with_state(suid, |s| s.counters.bad_timestamp.load(Ordering::Relaxed))
	}

	pub fn bad_payload_size(&self, suid: Suid) -> u64 {
		self.with_state(suid, |s| s.counters.bad_payload_size.load(Ordering::Relaxed))
	}

	pub fn unexpected_stream_id(&self, suid: Suid) -> u64 {
		self.unexpected_stream_id.lock().unwrap().get(&suid).copied().unwrap_or(0)
	}

	fn with_state<T>(&self, suid: Suid, f: impl FnOnce(&StreamState) -> T) -> T
	where
		T: Default,
	{
		self.continuity
			.lock()
			.unwrap()
			.get(&suid)
			.map(f)
			.unwrap_or_default()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn suid() -> Suid {
		Suid { det_id: 2, crate_id: 1, slot_id: 0, stream_id: 1 }
	}

	#[test]
	fn sequence_gap_is_counted_with_correct_skip() {
		let counters = StreamCounters::new();
		counters.observe(suid(), 499, 0, None, 10);
		counters.observe(suid(), 501, 0, None, 10); // skipped 500
		assert_eq!(counters.bad_seq_id(suid()), 1);
		assert_eq!(counters.max_seq_id_skip(suid()), 1);
	}

	#[test]
	fn sequence_wraparound_is_not_a_gap() {
		let counters = StreamCounters::new();
		counters.observe(suid(), 4095, 0, None, 10);
		counters.observe(suid(), 0, 0, None, 10);
		assert_eq!(counters.bad_seq_id(suid()), 0);
	}

	#[test]
	fn timestamp_deviation_is_counted_when_step_configured() {
		let counters = StreamCounters::new();
		counters.observe(suid(), 0, 0, Some(2048), 10);
		counters.observe(suid(), 1, 5000, Some(2048), 10);
		assert_eq!(counters.bad_timestamp(suid()), 1);
	}

	#[test]
	fn unexpected_stream_id_counter_accumulates_per_suid() {
		let counters = StreamCounters::new();
		for _ in 0..256 {
			counters.record_unexpected_stream_id(suid());
		}
		assert_eq!(counters.unexpected_stream_id(suid()), 256);
	}

	#[test]
	fn per_queue_counters_track_burst_saturation() {
		let counters = PerQueueCounters::default();
		counters.record_burst(256, 256);
		counters.record_burst(3, 256);
		let snap = counters.snapshot();
		assert_eq!(snap.full_rx_burst, 1);
		assert_eq!(snap.max_burst_size, 256);
	}
}
