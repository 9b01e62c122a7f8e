//! IPv4 input glue: header validation and delivery into the TCP input path.
//!
//! Hand-rolled against the raw bytes rather than routed through `etherparse`'s own parser —
//! the header-length formula, the directed-broadcast comparison, and the fragment-bit test each
//! have a documented source ambiguity (see crate docs) that this module pins down explicitly
//! rather than inheriting whatever `etherparse` happens to do internally.

use std::io::{Read, Write};
use std::net::Ipv4Addr;

use log::debug;

use crate::error::{Error, IpError};
use crate::iface::Iface;
use crate::tcp::pcb::PcbTable;
use crate::tcp::{codec, fsm, Endpoint};

pub const MIN_HEADER_LEN: usize = 20;
const VERSION_4: u8 = 4;
const MORE_FRAGMENTS_BIT: u16 = 0x2000;
const FRAGMENT_OFFSET_MASK: u16 = 0x1fff;

struct Addressing {
    src: Ipv4Addr,
    dst: Ipv4Addr,
}

/// Validates `datagram` as an IPv4 packet addressed to this interface, then hands a TCP segment
/// off to the FSM. Validation failures are logged and dropped, never propagated — a live network
/// interface sees malformed and unacceptable traffic as routine background noise.
pub fn input<D: Read + Write>(
    table: &mut PcbTable,
    iface: &mut Iface<D>,
    datagram: &[u8],
) -> Result<(), Error> {
    let (addressing, payload) = match validate(datagram, iface) {
        Ok(ok) => ok,
        Err(err) => {
            debug!("dropping inbound ip datagram: {err}");
            return Ok(());
        }
    };

    if payload.len() < codec::HEADER_LEN {
        debug!("dropping inbound datagram: tcp segment too short");
        return Ok(());
    }

    let (info, tcp_payload) = match codec::validate(payload, addressing.src, addressing.dst) {
        Ok(ok) => ok,
        Err(err) => {
            debug!("dropping inbound tcp segment: {err}");
            return Ok(());
        }
    };

    let foreign_port = u16::from_be_bytes([payload[0], payload[1]]);
    let local_port = u16::from_be_bytes([payload[2], payload[3]]);
    let local = Endpoint::new(addressing.dst, local_port);
    let foreign = Endpoint::new(addressing.src, foreign_port);

    fsm::on_segment(table, iface, local, foreign, info, tcp_payload)
}

fn validate<'a, D>(datagram: &'a [u8], iface: &Iface<D>) -> Result<(Addressing, &'a [u8]), IpError> {
    if datagram.len() < MIN_HEADER_LEN {
        return Err(IpError::TooShort);
    }

    let version = datagram[0] >> 4;
    if version != VERSION_4 {
        return Err(IpError::NotIpv4);
    }

    // `(vhl & 0x0f) * 4`, not the raw byte value — the low nibble is a word count, not a byte
    // count.
    let ihl = ((datagram[0] & 0x0f) as usize) * 4;
    let total_len = u16::from_be_bytes([datagram[2], datagram[3]]) as usize;
    if ihl < MIN_HEADER_LEN || datagram.len() < ihl || datagram.len() < total_len || total_len < ihl {
        return Err(IpError::LengthMismatch);
    }

    if codec::cksum16(&datagram[..ihl], 0) != 0 {
        return Err(IpError::BadChecksum);
    }

    let flags_and_offset = u16::from_be_bytes([datagram[6], datagram[7]]);
    let more_fragments = flags_and_offset & MORE_FRAGMENTS_BIT != 0;
    let fragment_offset = flags_and_offset & FRAGMENT_OFFSET_MASK;
    if more_fragments || fragment_offset != 0 {
        return Err(IpError::Fragmented);
    }

    let src = Ipv4Addr::new(datagram[12], datagram[13], datagram[14], datagram[15]);
    let dst = Ipv4Addr::new(datagram[16], datagram[17], datagram[18], datagram[19]);

    if !iface.accepts(dst) {
        return Err(IpError::NotDeliverable);
    }

    Ok((Addressing { src, dst }, &datagram[ihl..total_len]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn iface() -> Iface<Cursor<Vec<u8>>> {
        Iface::new(
            Cursor::new(Vec::new()),
            Ipv4Addr::new(10, 0, 0, 2),
            Ipv4Addr::new(255, 255, 255, 0),
            1500,
        )
    }

    fn ipv4_header(total_len: u16, flags_and_offset: u16, src: [u8; 4], dst: [u8; 4]) -> Vec<u8> {
        let mut hdr = vec![0u8; 20];
        hdr[0] = 0x45;
        hdr[2..4].copy_from_slice(&total_len.to_be_bytes());
        hdr[6..8].copy_from_slice(&flags_and_offset.to_be_bytes());
        hdr[8] = 64;
        hdr[9] = crate::iface::tcp_protocol_number();
        hdr[12..16].copy_from_slice(&src);
        hdr[16..20].copy_from_slice(&dst);
        let checksum = codec::cksum16(&hdr, 0);
        hdr[10..12].copy_from_slice(&checksum.to_be_bytes());
        hdr
    }

    #[test]
    fn rejects_short_datagrams() {
        let iface = iface();
        assert_eq!(validate(&[0u8; 10], &iface).unwrap_err(), IpError::TooShort);
    }

    #[test]
    fn rejects_fragments() {
        let iface = iface();
        let hdr = ipv4_header(20, MORE_FRAGMENTS_BIT, [10, 0, 0, 1], [10, 0, 0, 2]);
        assert_eq!(validate(&hdr, &iface).unwrap_err(), IpError::Fragmented);
    }

    #[test]
    fn rejects_non_deliverable_destination() {
        let iface = iface();
        let hdr = ipv4_header(20, 0, [10, 0, 0, 1], [10, 0, 0, 9]);
        assert_eq!(validate(&hdr, &iface).unwrap_err(), IpError::NotDeliverable);
    }

    #[test]
    fn accepts_a_well_formed_unicast_datagram() {
        let iface = iface();
        let hdr = ipv4_header(20, 0, [10, 0, 0, 1], [10, 0, 0, 2]);
        let (addressing, payload) = validate(&hdr, &iface).unwrap();
        assert_eq!(addressing.dst, Ipv4Addr::new(10, 0, 0, 2));
        assert!(payload.is_empty());
    }
}
