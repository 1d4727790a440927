//! Minimal ARP support: gratuitous ARP announcement on interface bring-up, and
//! replying to incoming ARP requests addressed to us. Grounded on
//! `arp/ARP.cpp::pktgen_send_garp`/`pktgen_process_arp`. `rpkt` has no ARP packet
//! type, so the 28-byte ARP payload is built/parsed by hand, the same way the
//! original builds `rte_arp_hdr` directly on top of the raw mbuf.

use rpkt::ether::{EtherAddr, EtherFrame, EtherType, ETHER_FRAME_HEADER_LEN};
use rpkt::{Cursor, CursorMut};

use crate::dpdk::TxFrame;

const ARP_PAYLOAD_LEN: usize = 28;
/// `rte_arp_hdr` pads the frame out to the Ethernet minimum.
const ARP_FRAME_LEN: usize = 60;

const ARP_HTYPE_ETHER: u16 = 1;
const ARP_PTYPE_IPV4: u16 = 0x0800;
const ARP_OP_REQUEST: u16 = 1;
const ARP_OP_REPLY: u16 = 2;

const BROADCAST_MAC: [u8; 6] = [0xff; 6];

fn write_arp_payload(
	buf: &mut [u8],
	opcode: u16,
	sender_mac: [u8; 6],
	sender_ip: u32,
	target_mac: [u8; 6],
	target_ip: u32,
) {
	buf[0..2].copy_from_slice(&ARP_HTYPE_ETHER.to_be_bytes());
	buf[2..4].copy_from_slice(&ARP_PTYPE_IPV4.to_be_bytes());
	buf[4] = 6;
	buf[5] = 4;
	buf[6..8].copy_from_slice(&opcode.to_be_bytes());
	buf[8..14].copy_from_slice(&sender_mac);
	buf[14..18].copy_from_slice(&sender_ip.to_be_bytes());
	buf[18..24].copy_from_slice(&target_mac);
	buf[24..28].copy_from_slice(&target_ip.to_be_bytes());
}

struct ParsedArp {
	opcode: u16,
	sender_mac: [u8; 6],
	sender_ip: u32,
	target_ip: u32,
}

fn parse_arp_payload(buf: &[u8]) -> Option<ParsedArp> {
	if buf.len() < ARP_PAYLOAD_LEN {
		return None;
	}
	Some(ParsedArp {
		opcode: u16::from_be_bytes([buf[6], buf[7]]),
		sender_mac: buf[8..14].try_into().unwrap(),
		sender_ip: u32::from_be_bytes(buf[14..18].try_into().unwrap()),
		target_ip: u32::from_be_bytes(buf[24..28].try_into().unwrap()),
	})
}

/// Responds to ARP traffic on behalf of one interface's IP/MAC pair.
pub struct ArpResponder {
	mac: [u8; 6],
	ip: u32,
}

impl ArpResponder {
	pub fn new(mac: [u8; 6], ip: u32) -> Self {
		ArpResponder { mac, ip }
	}

	/// Builds a gratuitous ARP request announcing `(mac, ip)` to the broadcast
	/// domain, sent once on interface start.
	pub fn emit_garp(&self) -> TxFrame {
		let mut buf = vec![0u8; ARP_FRAME_LEN];
		write_arp_payload(
			&mut buf[ETHER_FRAME_HEADER_LEN..],
			ARP_OP_REQUEST,
			self.mac,
			self.ip,
			self.mac,
			self.ip,
		);

		let cursor = CursorMut::new(&mut buf[..]);
		let mut eth_pkt = EtherFrame::prepend_header(
			{
				let mut c = cursor;
				c.advance(ARP_PAYLOAD_LEN);
				c
			},
			&Default::default(),
		);
		eth_pkt.set_src_addr(EtherAddr(self.mac));
		eth_pkt.set_dst_addr(EtherAddr(BROADCAST_MAC));
		eth_pkt.set_ethertype(EtherType::ARP);

		TxFrame::new(buf)
	}

	/// If `frame` is an ARP request targeting our IP, builds the reply frame.
	/// Returns `None` for anything else (replies, requests for other hosts, non-ARP
	/// traffic), mirroring `pktgen_process_arp`'s early-return behavior.
	pub fn reply_to_arp(&self, frame: &[u8]) -> Option<TxFrame> {
		if frame.len() < ETHER_FRAME_HEADER_LEN + ARP_PAYLOAD_LEN {
			return None;
		}
		let cursor = Cursor::new(frame);
		let eth_pkt = EtherFrame::parse_unchecked(cursor);
		if eth_pkt.ethertype() != EtherType::ARP {
			return None;
		}
		let parsed = parse_arp_payload(eth_pkt.payload().chunk())?;
		if parsed.opcode != ARP_OP_REQUEST || parsed.target_ip != self.ip {
			return None;
		}

		let mut buf = vec![0u8; ARP_FRAME_LEN];
		write_arp_payload(
			&mut buf[ETHER_FRAME_HEADER_LEN..],
			ARP_OP_REPLY,
			self.mac,
			self.ip,
			parsed.sender_mac,
			parsed.sender_ip,
		);
		let mut cursor = CursorMut::new(&mut buf[..]);
		cursor.advance(ARP_PAYLOAD_LEN);
		let mut eth_pkt = EtherFrame::prepend_header(cursor, &Default::default());
		eth_pkt.set_src_addr(EtherAddr(self.mac));
		eth_pkt.set_dst_addr(EtherAddr(parsed.sender_mac));
		eth_pkt.set_ethertype(EtherType::ARP);

		Some(TxFrame::new(buf))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn garp_announces_our_own_address_as_both_sender_and_target() {
		let responder = ArpResponder::new([1, 2, 3, 4, 5, 6], 0x0a49_8b1a);
		let frame = responder.emit_garp();
		let payload = &frame.data[ETHER_FRAME_HEADER_LEN..];
		let parsed = parse_arp_payload(payload).unwrap();
		assert_eq!(parsed.opcode, ARP_OP_REQUEST);
		assert_eq!(parsed.sender_mac, [1, 2, 3, 4, 5, 6]);
		assert_eq!(parsed.sender_ip, 0x0a49_8b1a);
		assert_eq!(parsed.target_ip, 0x0a49_8b1a);
	}

	#[test]
	fn replies_to_a_request_for_our_ip() {
		let responder = ArpResponder::new([1, 2, 3, 4, 5, 6], 0x0a49_8b1a);
		let mut request = vec![0u8; ARP_FRAME_LEN];
		write_arp_payload(
			&mut request[ETHER_FRAME_HEADER_LEN..],
			ARP_OP_REQUEST,
			[9, 9, 9, 9, 9, 9],
			0x0a49_8b1b,
			[0; 6],
			0x0a49_8b1a,
		);
		let mut cursor = CursorMut::new(&mut request[..]);
		cursor.advance(ARP_PAYLOAD_LEN);
		let mut eth_pkt = EtherFrame::prepend_header(cursor, &Default::default());
		eth_pkt.set_src_addr(EtherAddr([9, 9, 9, 9, 9, 9]));
		eth_pkt.set_dst_addr(EtherAddr(BROADCAST_MAC));
		eth_pkt.set_ethertype(EtherType::ARP);

		let reply = responder.reply_to_arp(&request).expect("should reply");
		let parsed = parse_arp_payload(&reply.data[ETHER_FRAME_HEADER_LEN..]).unwrap();
		assert_eq!(parsed.opcode, ARP_OP_REPLY);
		assert_eq!(parsed.sender_mac, [1, 2, 3, 4, 5, 6]);
		assert_eq!(parsed.sender_ip, 0x0a49_8b1a);
	}

	#[test]
	fn ignores_request_for_a_different_target() {
		let responder = ArpResponder::new([1, 2, 3, 4, 5, 6], 0x0a49_8b1a);
		let mut request = vec![0u8; ARP_FRAME_LEN];
		write_arp_payload(&mut request[ETHER_FRAME_HEADER_LEN..], ARP_OP_REQUEST, [9; 6], 1, [0; 6], 0xffff_ffff);
		let mut cursor = CursorMut::new(&mut request[..]);
		cursor.advance(ARP_PAYLOAD_LEN);
		let mut eth_pkt = EtherFrame::prepend_header(cursor, &Default::default());
		eth_pkt.set_ethertype(EtherType::ARP);
		assert!(responder.reply_to_arp(&request).is_none());
	}
}
