//! Builds and parses the Ethernet/IPv4/UDP header chain around a [`DaqEthHeader`] +
//! payload, using `rpkt`'s header cursor types the way
//! `examples/other_examples/*rpkt-dpdk-examples-loopback_tx.rs*` does. Grounded on
//! `udp/PacketCtor.cpp` (header construction) and `udp/Utils.cpp` (payload extraction,
//! ipv4 address conversion).

use rpkt::ether::{EtherAddr, EtherFrame, EtherType, ETHER_FRAME_HEADER_LEN};
use rpkt::ipv4::{IpProtocol, Ipv4, Ipv4Addr, IPV4_HEADER_LEN};
use rpkt::udp::{Udp, UDP_HEADER_LEN};
use rpkt::{Cursor, CursorMut};

use crate::error::EngineError;
use crate::header::{DaqEthHeader, DAQ_ETH_HEADER_LEN};

const DEFAULT_TTL: u8 = 8;
const DEFAULT_TOS: u8 = 0;

/// Source/destination addressing needed to build the header chain for one frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameAddressing {
	pub src_mac: [u8; 6],
	pub dst_mac: [u8; 6],
	pub src_ip: u32,
	pub dst_ip: u32,
	pub src_port: u16,
	pub dst_port: u16,
}

/// Builds Ethernet + IPv4 + UDP + [`DaqEthHeader`] + `payload` into one contiguous
/// buffer, mirroring `pktgen_ether_hdr_ctor`/`pktgen_ipv4_ctor`/`pktgen_udp_hdr_ctor`.
pub fn build_headers(addressing: &FrameAddressing, header: &DaqEthHeader, payload: &[u8]) -> Vec<u8> {
	let total_len = ETHER_FRAME_HEADER_LEN
		+ IPV4_HEADER_LEN
		+ UDP_HEADER_LEN
		+ DAQ_ETH_HEADER_LEN
		+ payload.len();
	let mut buf = vec![0u8; total_len];

	let udp_datagram_len = UDP_HEADER_LEN + DAQ_ETH_HEADER_LEN + payload.len();
	let ipv4_packet_len = IPV4_HEADER_LEN + udp_datagram_len;

	let mut cursor = CursorMut::new(&mut buf[..]);
	cursor.advance(ETHER_FRAME_HEADER_LEN + IPV4_HEADER_LEN + UDP_HEADER_LEN);
	cursor.chunk_mut()[..DAQ_ETH_HEADER_LEN].copy_from_slice(&[0u8; DAQ_ETH_HEADER_LEN]);
	header.write_into(&mut cursor.chunk_mut()[..DAQ_ETH_HEADER_LEN]);
	cursor.chunk_mut()[DAQ_ETH_HEADER_LEN..DAQ_ETH_HEADER_LEN + payload.len()].copy_from_slice(payload);

	let mut udp_pkt = Udp::prepend_header(cursor, &Default::default());
	udp_pkt.set_src_port(addressing.src_port);
	udp_pkt.set_dst_port(addressing.dst_port);
	udp_pkt.set_checksum(0);
	udp_pkt.set_packet_len(udp_datagram_len as u16);

	let mut ipv4_pkt = Ipv4::prepend_header(udp_pkt.release(), &Default::default());
	let [a, b, c, d] = addressing.src_ip.to_be_bytes();
	ipv4_pkt.set_src_addr(Ipv4Addr::new(a, b, c, d));
	let [a, b, c, d] = addressing.dst_ip.to_be_bytes();
	ipv4_pkt.set_dst_addr(Ipv4Addr::new(a, b, c, d));
	ipv4_pkt.set_protocol(IpProtocol::UDP);
	ipv4_pkt.set_ttl(DEFAULT_TTL);
	ipv4_pkt.set_dscp(DEFAULT_TOS);
	ipv4_pkt.set_ident(0);
	ipv4_pkt.set_checksum(0);
	ipv4_pkt.set_packet_len(ipv4_packet_len as u16);

	let mut eth_pkt = EtherFrame::prepend_header(ipv4_pkt.release(), &Default::default());
	eth_pkt.set_src_addr(EtherAddr(addressing.src_mac));
	eth_pkt.set_dst_addr(EtherAddr(addressing.dst_mac));
	eth_pkt.set_ethertype(EtherType::IPV4);

	buf
}

/// Extracts the UDP payload (everything past the UDP header, i.e. the DAQEthHeader
/// plus detector payload) out of a full Ethernet frame, mirroring
/// `udp::get_udp_payload`/`get_payload_size`.
pub fn extract_udp_payload(frame: &[u8]) -> Result<&[u8], EngineError> {
	let cursor = Cursor::new(frame);
	if cursor.remaining() < ETHER_FRAME_HEADER_LEN + IPV4_HEADER_LEN + UDP_HEADER_LEN {
		return Err(EngineError::MalformedFrame {
			iface: 0,
			rxq: 0,
			reason: "frame shorter than eth+ipv4+udp header chain".to_string(),
		});
	}
	let eth_pkt = EtherFrame::parse_unchecked(cursor);
	if eth_pkt.ethertype() != EtherType::IPV4 {
		return Err(EngineError::MalformedFrame {
			iface: 0,
			rxq: 0,
			reason: "not an IPv4 frame".to_string(),
		});
	}
	let ipv4_pkt = Ipv4::parse_unchecked(eth_pkt.payload());
	if ipv4_pkt.protocol() != IpProtocol::UDP {
		return Err(EngineError::MalformedFrame {
			iface: 0,
			rxq: 0,
			reason: "not a UDP datagram".to_string(),
		});
	}
	let ipv4_total_len = ipv4_pkt.packet_len() as usize;
	let udp_pkt = Udp::parse_unchecked(ipv4_pkt.payload());
	let udp_dgram_len = udp_pkt.packet_len() as usize;

	if ipv4_total_len < IPV4_HEADER_LEN || udp_dgram_len < UDP_HEADER_LEN {
		return Err(EngineError::MalformedFrame {
			iface: 0,
			rxq: 0,
			reason: "udp length field shorter than the udp header itself".to_string(),
		});
	}
	if ipv4_total_len - IPV4_HEADER_LEN != udp_dgram_len {
		return Err(EngineError::MalformedFrame {
			iface: 0,
			rxq: 0,
			reason: "udp length field inconsistent with ipv4 total_length".to_string(),
		});
	}

	let payload_len = udp_dgram_len - UDP_HEADER_LEN;
	let chunk = udp_pkt.payload().chunk();
	if chunk.len() < payload_len {
		return Err(EngineError::MalformedFrame {
			iface: 0,
			rxq: 0,
			reason: "frame shorter than its declared udp length".to_string(),
		});
	}
	Ok(&chunk[..payload_len])
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::header::Suid;

	fn sample_header() -> DaqEthHeader {
		DaqEthHeader {
			suid: Suid { det_id: 2, crate_id: 1, slot_id: 0, stream_id: 1 },
			seq_id: 7,
			timestamp: 7 * 2048,
		}
	}

	fn sample_addressing() -> FrameAddressing {
		FrameAddressing {
			src_mac: [0x6c, 0xfe, 0x54, 0x47, 0x98, 0x21],
			dst_mac: [0x6c, 0xfe, 0x54, 0x47, 0x98, 0x20],
			src_ip: crate::header::parse_ipv4("10.73.139.27").unwrap(),
			dst_ip: crate::header::parse_ipv4("10.73.139.26").unwrap(),
			src_port: 60000,
			dst_port: 60001,
		}
	}

	#[test]
	fn build_then_extract_recovers_daq_header_and_payload() {
		let payload = vec![0xEEu8; 7180];
		let frame = build_headers(&sample_addressing(), &sample_header(), &payload);
		let udp_payload = extract_udp_payload(&frame).unwrap();
		let parsed = DaqEthHeader::parse(udp_payload).unwrap();
		assert_eq!(parsed, sample_header());
		assert_eq!(&udp_payload[DAQ_ETH_HEADER_LEN..], &payload[..]);
	}

	#[test]
	fn extract_rejects_udp_length_inconsistent_with_ipv4_total_length() {
		let payload = vec![0xEEu8; 64];
		let mut frame = build_headers(&sample_addressing(), &sample_header(), &payload);
		let udp_len_offset = ETHER_FRAME_HEADER_LEN + IPV4_HEADER_LEN + 4;
		let claimed = u16::from_be_bytes([frame[udp_len_offset], frame[udp_len_offset + 1]]) + 4;
		frame[udp_len_offset..udp_len_offset + 2].copy_from_slice(&claimed.to_be_bytes());
		assert!(extract_udp_payload(&frame).is_err());
	}

	#[test]
	fn extract_rejects_truncated_frame() {
		let frame = vec![0u8; 10];
		assert!(extract_udp_payload(&frame).is_err());
	}
}
