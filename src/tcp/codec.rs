//! TCP wire codec: header encode/validate and the pseudo-header checksum.
//!
//! This is deliberately hand-rolled rather than delegated to `etherparse`'s own checksum helpers:
//! the spec's error taxonomy (`TooShort` vs `BadChecksum`) and the exact sequence-space
//! accounting for SYN/FIN (RFC 793 §3.3) need to live under this crate's control. `etherparse` is
//! still used for the IPv4 side, one layer up, in `crate::ip`.

use std::net::Ipv4Addr;

use crate::error::CodecError;
use crate::tcp::Endpoint;

pub const HEADER_LEN: usize = 20;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Flags: u8 {
        const FIN = 0b0000_0001;
        const SYN = 0b0000_0010;
        const RST = 0b0000_0100;
        const PSH = 0b0000_1000;
        const ACK = 0b0001_0000;
        const URG = 0b0010_0000;
    }
}

/// A validated inbound segment: header fields plus the derived `SEG.LEN` sequence-space length.
#[derive(Debug, Clone, Copy)]
pub struct SegmentInfo {
    pub seq: u32,
    pub ack: u32,
    pub flags: Flags,
    pub window: u16,
    pub len: u32,
}

/// Serializes a TCP segment with its pseudo-header checksum filled in.
pub fn encode(
    seq: u32,
    ack: u32,
    flags: Flags,
    window: u16,
    payload: &[u8],
    local: Endpoint,
    foreign: Endpoint,
) -> Vec<u8> {
    let mut bytes = vec![0u8; HEADER_LEN + payload.len()];

    bytes[0..2].copy_from_slice(&local.port.to_be_bytes());
    bytes[2..4].copy_from_slice(&foreign.port.to_be_bytes());
    bytes[4..8].copy_from_slice(&seq.to_be_bytes());
    bytes[8..12].copy_from_slice(&ack.to_be_bytes());
    bytes[12] = ((HEADER_LEN / 4) as u8) << 4;
    bytes[13] = flags.bits();
    bytes[14..16].copy_from_slice(&window.to_be_bytes());
    bytes[16..18].copy_from_slice(&0u16.to_be_bytes()); // checksum, filled below
    bytes[18..20].copy_from_slice(&0u16.to_be_bytes()); // urgent pointer, unused

    bytes[HEADER_LEN..].copy_from_slice(payload);

    let pseudo = pseudo_header_sum(local.addr, foreign.addr, bytes.len() as u16);
    let checksum = cksum16(&bytes, pseudo);
    bytes[16..18].copy_from_slice(&checksum.to_be_bytes());

    bytes
}

/// Parses and validates an inbound TCP segment addressed `src -> dst`.
pub fn validate(
    bytes: &[u8],
    src: Ipv4Addr,
    dst: Ipv4Addr,
) -> Result<(SegmentInfo, &[u8]), CodecError> {
    if bytes.len() < HEADER_LEN {
        return Err(CodecError::TooShort);
    }

    let pseudo = pseudo_header_sum(src, dst, bytes.len() as u16);
    if cksum16(bytes, pseudo) != 0 {
        return Err(CodecError::BadChecksum);
    }

    let data_offset = ((bytes[12] >> 4) as usize) * 4;
    if data_offset < HEADER_LEN || bytes.len() < data_offset {
        return Err(CodecError::TooShort);
    }

    let flags = Flags::from_bits_truncate(bytes[13]);
    let payload = &bytes[data_offset..];

    let mut len = payload.len() as u32;
    if flags.contains(Flags::SYN) {
        len += 1;
    }
    if flags.contains(Flags::FIN) {
        len += 1;
    }

    let info = SegmentInfo {
        seq: u32::from_be_bytes(bytes[4..8].try_into().unwrap()),
        ack: u32::from_be_bytes(bytes[8..12].try_into().unwrap()),
        flags,
        window: u16::from_be_bytes(bytes[14..16].try_into().unwrap()),
        len,
    };

    Ok((info, payload))
}

/// `pseudo_sum = !cksum16(pseudo_header)`, folded directly into the running sum rather than
/// computed as a standalone complement-of-complement, since that's all `cksum16` ever does with
/// it.
fn pseudo_header_sum(src: Ipv4Addr, dst: Ipv4Addr, length: u16) -> u32 {
    let mut sum = 0u32;
    for chunk in src.octets().chunks(2) {
        sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
    }
    for chunk in dst.octets().chunks(2) {
        sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
    }
    sum += crate::iface::tcp_protocol_number() as u32;
    sum += length as u32;
    sum
}

/// The standard Internet 16-bit one's-complement checksum (RFC 1071), seeded with `initial`.
pub fn cksum16(data: &[u8], initial: u32) -> u16 {
    let mut sum = initial;

    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
    }
    if let [last] = chunks.remainder() {
        sum += (*last as u32) << 8;
    }

    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }

    !(sum as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(addr: [u8; 4], port: u16) -> Endpoint {
        Endpoint {
            addr: Ipv4Addr::from(addr),
            port,
        }
    }

    #[test]
    fn round_trip_preserves_fields() {
        let local = ep([10, 0, 0, 2], 80);
        let foreign = ep([10, 0, 0, 1], 4000);
        let payload = b"hello";

        let bytes = encode(1000, 2000, Flags::ACK | Flags::PSH, 65535, payload, local, foreign);

        let (info, decoded_payload) = validate(&bytes, foreign.addr, local.addr).unwrap();

        assert_eq!(info.seq, 1000);
        assert_eq!(info.ack, 2000);
        assert_eq!(info.flags, Flags::ACK | Flags::PSH);
        assert_eq!(info.window, 65535);
        assert_eq!(decoded_payload, payload);
        assert_eq!(info.len, payload.len() as u32);
    }

    #[test]
    fn syn_and_fin_count_toward_seg_len() {
        let local = ep([10, 0, 0, 2], 80);
        let foreign = ep([10, 0, 0, 1], 4000);

        let bytes = encode(0, 0, Flags::SYN, 65535, &[], local, foreign);
        let (info, _) = validate(&bytes, foreign.addr, local.addr).unwrap();
        assert_eq!(info.len, 1);
    }

    #[test]
    fn too_short_is_rejected() {
        let err = validate(&[0u8; 10], Ipv4Addr::UNSPECIFIED, Ipv4Addr::UNSPECIFIED).unwrap_err();
        assert_eq!(err, CodecError::TooShort);
    }

    #[test]
    fn corrupted_checksum_is_rejected() {
        let local = ep([10, 0, 0, 2], 80);
        let foreign = ep([10, 0, 0, 1], 4000);
        let mut bytes = encode(1, 1, Flags::ACK, 100, &[], local, foreign);
        bytes[0] ^= 0xff;

        let err = validate(&bytes, foreign.addr, local.addr).unwrap_err();
        assert_eq!(err, CodecError::BadChecksum);
    }

    #[test]
    fn data_offset_below_header_len_is_rejected() {
        let local = ep([10, 0, 0, 2], 80);
        let foreign = ep([10, 0, 0, 1], 4000);
        let mut bytes = encode(1, 1, Flags::ACK, 100, b"hello", local, foreign);
        // Forge a data offset of 2 words (8 bytes), short of the 20-byte fixed header, and
        // recompute the checksum so it still verifies over the full (now misparsed) buffer.
        bytes[12] = 2 << 4;
        bytes[16..18].copy_from_slice(&0u16.to_be_bytes());
        let pseudo = pseudo_header_sum(local.addr, foreign.addr, bytes.len() as u16);
        let checksum = cksum16(&bytes, pseudo);
        bytes[16..18].copy_from_slice(&checksum.to_be_bytes());

        let err = validate(&bytes, foreign.addr, local.addr).unwrap_err();
        assert_eq!(err, CodecError::TooShort);
    }
}
