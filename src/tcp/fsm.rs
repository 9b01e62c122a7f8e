//! Segment-arrival FSM: RFC 793 §3.9 SEGMENT ARRIVES, one call per inbound segment.
//!
//! Of the eight ordered checks in the RFC, this core implements sequence acceptability (1), the
//! ACK check (5), and text delivery (7). The RST check (2), security/precedence (3),
//! SYN-in-window (4), URG (6), and FIN (8) are deferred non-goals — see the module-level design
//! notes. Everything here runs under the caller's stack mutex.

use std::io::{Read, Write};

use log::{debug, trace, warn};
use rand::Rng;

use crate::error::Error;
use crate::iface::Iface;
use crate::tcp::codec::{Flags, SegmentInfo};
use crate::tcp::output;
use crate::tcp::pcb::{PcbTable, State, RECV_BUF_CAPACITY};
use crate::tcp::{is_between_wrapped, wrapping_lt, Endpoint};

pub fn on_segment<D: Read + Write>(
    table: &mut PcbTable,
    iface: &mut Iface<D>,
    local: Endpoint,
    foreign: Endpoint,
    info: SegmentInfo,
    payload: &[u8],
) -> Result<(), Error> {
    let id = table
        .select(local, foreign)
        .filter(|&id| table.get(id).unwrap().state != State::Closed);

    let id = match id {
        Some(id) => id,
        None => return no_matching_pcb(iface, local, foreign, info),
    };

    match table.get(id).unwrap().state {
        State::Listen => on_listen(table, iface, id, local, foreign, info),
        State::SynSent => {
            trace!("dropping segment on synsent pcb {id}: active opens are not implemented");
            Ok(())
        }
        State::Free | State::Closed => unreachable!("filtered out above"),
        _ => on_synchronized(table, iface, id, info, payload),
    }
}

/// No PCB matched this 4-tuple, or the one that did is `Closed`.
fn no_matching_pcb<D: Read + Write>(
    iface: &mut Iface<D>,
    local: Endpoint,
    foreign: Endpoint,
    info: SegmentInfo,
) -> Result<(), Error> {
    if info.flags.contains(Flags::RST) {
        debug!("dropping RST addressed to {}:{} with no matching pcb", local.addr, local.port);
        return Ok(());
    }

    if info.flags.contains(Flags::ACK) {
        output::emit_raw(iface, local, foreign, info.ack, 0, Flags::RST)
    } else {
        output::emit_raw(
            iface,
            local,
            foreign,
            0,
            info.seq.wrapping_add(info.len),
            Flags::RST | Flags::ACK,
        )
    }
}

fn on_listen<D: Read + Write>(
    table: &mut PcbTable,
    iface: &mut Iface<D>,
    id: usize,
    local: Endpoint,
    foreign: Endpoint,
    info: SegmentInfo,
) -> Result<(), Error> {
    if info.flags.contains(Flags::RST) {
        return Ok(());
    }

    if info.flags.contains(Flags::ACK) {
        return output::emit_raw(iface, local, foreign, info.ack, 0, Flags::RST);
    }

    if !info.flags.contains(Flags::SYN) {
        return Ok(());
    }

    {
        let pcb = table.get_mut(id).unwrap();
        pcb.foreign = foreign;
        pcb.local = local;
        pcb.rcv.nxt = info.seq.wrapping_add(1);
        pcb.irs = info.seq;
        pcb.rcv.wnd = RECV_BUF_CAPACITY as u16;
        pcb.iss = rand::thread_rng().gen();
        pcb.snd.nxt = pcb.iss.wrapping_add(1);
        pcb.snd.una = pcb.iss;
        pcb.state = State::SynReceived;
    }

    let pcb = table.get(id).unwrap();
    output::emit(iface, pcb, Flags::SYN | Flags::ACK, &[])
}

fn on_synchronized<D: Read + Write>(
    table: &mut PcbTable,
    iface: &mut Iface<D>,
    id: usize,
    info: SegmentInfo,
    payload: &[u8],
) -> Result<(), Error> {
    // Step 1: sequence acceptability. Must not alter state if it fails.
    {
        let pcb = table.get(id).unwrap();
        if !is_segment_acceptable(pcb.rcv.nxt, pcb.rcv.wnd, info.seq, info.len) {
            if info.flags.contains(Flags::RST) {
                return Ok(());
            }
            warn!("dropping unacceptable segment on pcb {id}: seg.seq={}", info.seq);
            return output::emit(iface, pcb, Flags::ACK, &[]);
        }
    }

    // Step 5: ACK check. Steps 2-4 (RST, security, SYN-in-window) are deferred non-goals.
    if !info.flags.contains(Flags::ACK) {
        return Ok(());
    }

    if table.get(id).unwrap().state == State::SynReceived {
        let pcb = table.get(id).unwrap();
        let acceptable =
            is_between_wrapped(pcb.snd.una.wrapping_sub(1), info.ack, pcb.snd.nxt.wrapping_add(1));

        if !acceptable {
            let pcb = table.get(id).unwrap();
            return output::emit_raw(iface, pcb.local, pcb.foreign, info.ack, 0, Flags::RST);
        }

        let pcb = table.get_mut(id).unwrap();
        pcb.state = State::Established;
        pcb.snd.wnd = info.window;
        pcb.snd.wl1 = info.seq;
        pcb.snd.wl2 = info.ack;
        pcb.ctx.wake();
    } else if table.get(id).unwrap().state == State::Established {
        let pcb = table.get_mut(id).unwrap();

        if is_between_wrapped(pcb.snd.una.wrapping_sub(1), info.ack, pcb.snd.nxt.wrapping_add(1)) {
            pcb.snd.una = info.ack;

            if wrapping_lt(pcb.snd.wl1, info.seq)
                || (pcb.snd.wl1 == info.seq && !wrapping_lt(info.ack, pcb.snd.wl2))
            {
                pcb.snd.wnd = info.window;
                pcb.snd.wl1 = info.seq;
                pcb.snd.wl2 = info.ack;
            }
        } else if wrapping_lt(pcb.snd.nxt, info.ack) {
            let pcb = table.get(id).unwrap();
            return output::emit(iface, pcb, Flags::ACK, &[]);
        }
        // SEG.ACK <= SND.UNA (duplicate ack): ignored, fall through to text delivery.
    }

    // Step 7: text delivery. The other synchronized states this core can reach (none beyond
    // `Established` and the `SynReceived` handshake above) never carry data here.
    if table.get(id).unwrap().state != State::Established || payload.is_empty() {
        return Ok(());
    }

    {
        let pcb = table.get_mut(id).unwrap();
        let room = pcb.recv_capacity() - pcb.buffered();
        let take = payload.len().min(room);
        pcb.buf.extend(payload[..take].iter().copied());
        pcb.rcv.nxt = pcb.rcv.nxt.wrapping_add(take as u32);
        pcb.rcv.wnd = pcb.rcv.wnd.saturating_sub(take as u16);
        pcb.ctx.wake();
    }

    let pcb = table.get(id).unwrap();
    output::emit(iface, pcb, Flags::ACK, &[])
}

/// The four-case acceptability test from RFC 793 §3.3.
fn is_segment_acceptable(rcv_nxt: u32, rcv_wnd: u16, seg_seq: u32, seg_len: u32) -> bool {
    let rcv_wnd = rcv_wnd as u32;

    if seg_len == 0 && rcv_wnd == 0 {
        seg_seq == rcv_nxt
    } else if seg_len == 0 {
        is_in_window(rcv_nxt, seg_seq, rcv_wnd)
    } else if rcv_wnd == 0 {
        false
    } else {
        is_in_window(rcv_nxt, seg_seq, rcv_wnd)
            || is_in_window(rcv_nxt, seg_seq.wrapping_add(seg_len).wrapping_sub(1), rcv_wnd)
    }
}

fn is_in_window(rcv_nxt: u32, seq: u32, wnd: u32) -> bool {
    is_between_wrapped(rcv_nxt.wrapping_sub(1), seq, rcv_nxt.wrapping_add(wnd))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::net::Ipv4Addr;

    fn iface() -> Iface<Cursor<Vec<u8>>> {
        Iface::new(
            Cursor::new(Vec::new()),
            Ipv4Addr::new(10, 0, 0, 2),
            Ipv4Addr::new(255, 255, 255, 0),
            1500,
        )
    }

    fn segment(seq: u32, ack: u32, flags: Flags, window: u16, len: u32) -> SegmentInfo {
        SegmentInfo { seq, ack, flags, window, len }
    }

    #[test]
    fn bogus_ack_to_no_listener_gets_reset() {
        let mut table = PcbTable::new();
        let mut iface = iface();
        let local = Endpoint::new(Ipv4Addr::new(10, 0, 0, 2), 80);
        let foreign = Endpoint::new(Ipv4Addr::new(10, 0, 0, 1), 4000);

        on_segment(&mut table, &mut iface, local, foreign, segment(5, 7, Flags::ACK, 0, 0), &[]).unwrap();

        let written = iface_bytes(&iface);
        let (info, _) = crate::tcp::codec::validate(&written, foreign.addr, local.addr).unwrap();
        assert_eq!(info.seq, 7);
        assert_eq!(info.ack, 0);
        assert_eq!(info.flags, Flags::RST);
    }

    #[test]
    fn listen_syn_transitions_to_syn_received_and_replies_synack() {
        let mut table = PcbTable::new();
        let mut iface = iface();
        let local = Endpoint::new(Ipv4Addr::new(10, 0, 0, 2), 80);
        let id = table.alloc(local, 1500, iface.mss()).unwrap();
        table.get_mut(id).unwrap().state = State::Listen;

        let foreign = Endpoint::new(Ipv4Addr::new(10, 0, 0, 1), 4000);
        on_segment(&mut table, &mut iface, local, foreign, segment(1000, 0, Flags::SYN, 65535, 1), &[]).unwrap();

        let pcb = table.get(id).unwrap();
        assert_eq!(pcb.state, State::SynReceived);
        assert_eq!(pcb.rcv.nxt, 1001);
        assert_eq!(pcb.irs, 1000);

        let written = iface_bytes(&iface);
        let (info, _) = crate::tcp::codec::validate(&written, foreign.addr, local.addr).unwrap();
        assert_eq!(info.flags, Flags::SYN | Flags::ACK);
        assert_eq!(info.ack, 1001);
        assert_eq!(info.seq, pcb.iss);
    }

    #[test]
    fn acceptable_ack_completes_the_handshake() {
        let mut table = PcbTable::new();
        let mut iface = iface();
        let local = Endpoint::new(Ipv4Addr::new(10, 0, 0, 2), 80);
        let foreign = Endpoint::new(Ipv4Addr::new(10, 0, 0, 1), 4000);
        let id = table.alloc(local, 1500, iface.mss()).unwrap();
        table.get_mut(id).unwrap().state = State::Listen;
        on_segment(&mut table, &mut iface, local, foreign, segment(1000, 0, Flags::SYN, 65535, 1), &[]).unwrap();

        let iss = table.get(id).unwrap().iss;
        on_segment(
            &mut table,
            &mut iface,
            local,
            foreign,
            segment(1001, iss.wrapping_add(1), Flags::ACK, 65535, 0),
            &[],
        )
        .unwrap();

        let pcb = table.get(id).unwrap();
        assert_eq!(pcb.state, State::Established);
        assert_eq!(pcb.snd.una, iss.wrapping_add(1));
    }

    #[test]
    fn data_segment_is_buffered_and_acked() {
        let mut table = PcbTable::new();
        let mut iface = iface();
        let local = Endpoint::new(Ipv4Addr::new(10, 0, 0, 2), 80);
        let foreign = Endpoint::new(Ipv4Addr::new(10, 0, 0, 1), 4000);
        let id = table.alloc(local, 1500, iface.mss()).unwrap();
        {
            let pcb = table.get_mut(id).unwrap();
            pcb.state = State::Established;
            pcb.foreign = foreign;
            pcb.rcv.nxt = 1001;
            pcb.rcv.wnd = 65535;
            pcb.snd.una = 500;
            pcb.snd.nxt = 500;
        }

        on_segment(
            &mut table,
            &mut iface,
            local,
            foreign,
            segment(1001, 500, Flags::ACK | Flags::PSH, 65535, 2),
            b"hi",
        )
        .unwrap();

        let pcb = table.get(id).unwrap();
        assert_eq!(pcb.buf.iter().copied().collect::<Vec<_>>(), b"hi");
        assert_eq!(pcb.rcv.nxt, 1003);
        assert_eq!(pcb.rcv.wnd, 65533);
    }

    #[test]
    fn unacceptable_sequence_does_not_change_state() {
        let mut table = PcbTable::new();
        let mut iface = iface();
        let local = Endpoint::new(Ipv4Addr::new(10, 0, 0, 2), 80);
        let foreign = Endpoint::new(Ipv4Addr::new(10, 0, 0, 1), 4000);
        let id = table.alloc(local, 1500, iface.mss()).unwrap();
        {
            let pcb = table.get_mut(id).unwrap();
            pcb.state = State::Established;
            pcb.foreign = foreign;
            pcb.rcv.nxt = 5000;
            pcb.rcv.wnd = 100;
        }

        on_segment(&mut table, &mut iface, local, foreign, segment(6000, 0, Flags::ACK, 100, 0), &[]).unwrap();

        let pcb = table.get(id).unwrap();
        assert_eq!(pcb.state, State::Established);
        assert_eq!(pcb.rcv.nxt, 5000);

        let written = iface_bytes(&iface);
        let (info, _) = crate::tcp::codec::validate(&written, foreign.addr, local.addr).unwrap();
        assert_eq!(info.ack, 5000);
    }

    fn iface_bytes(iface: &Iface<Cursor<Vec<u8>>>) -> Vec<u8> {
        iface.device.get_ref()[crate::iface::IP_HDR_LEN..].to_vec()
    }
}
