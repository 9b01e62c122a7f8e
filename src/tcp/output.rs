//! Output engine: turn a PCB's current send state plus a set of flags into a wire segment and
//! hand it to the IP layer.

use std::io::{Read, Write};

use crate::error::Error;
use crate::iface::{ip_output, ip_route_get_iface, Iface};
use crate::tcp::codec::{self, Flags};
use crate::tcp::pcb::Pcb;

/// Builds and emits one segment for `pcb`. `seq` is `ISS` when `flags` carries `SYN` (the very
/// first segment of a connection), `SND.NXT` otherwise; `ack`/`window` always reflect the PCB's
/// current receive state.
pub fn emit<D: Read + Write>(
    iface: &mut Iface<D>,
    pcb: &Pcb,
    flags: Flags,
    data: &[u8],
) -> Result<(), Error> {
    let seq = if flags.contains(Flags::SYN) {
        pcb.iss
    } else {
        pcb.snd.nxt
    };

    let bytes = codec::encode(seq, pcb.rcv.nxt, flags, pcb.rcv.wnd, data, pcb.local, pcb.foreign);

    // Routed through the named seam rather than the device directly — a multi-interface stack
    // would look up the outbound interface for `pcb.foreign.addr` here instead of always getting
    // the one interface back.
    if ip_route_get_iface(iface, pcb.foreign.addr).is_none() {
        return Err(Error::NoRoute(pcb.foreign.addr));
    }

    ip_output(
        iface,
        crate::iface::tcp_protocol_number(),
        &bytes,
        pcb.local.addr,
        pcb.foreign.addr,
    )
}

/// Emits a segment addressed by raw values rather than a live PCB — used for the no-matching-PCB
/// reset/challenge replies, which by definition have no PCB to read state from.
pub fn emit_raw<D: Read + Write>(
    iface: &mut Iface<D>,
    local: crate::tcp::Endpoint,
    foreign: crate::tcp::Endpoint,
    seq: u32,
    ack: u32,
    flags: Flags,
) -> Result<(), Error> {
    let bytes = codec::encode(seq, ack, flags, 0, &[], local, foreign);
    ip_output(
        iface,
        crate::iface::tcp_protocol_number(),
        &bytes,
        local.addr,
        foreign.addr,
    )
}
