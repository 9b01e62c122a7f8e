//! The PCB table: fixed-size storage for TCP Protocol Control Blocks, with allocation,
//! release, and 4-tuple lookup.

use std::collections::VecDeque;

use crate::tcp::sched::WaitCtx;
use crate::tcp::Endpoint;

pub const PCB_TABLE_SIZE: usize = 16;
pub const RECV_BUF_CAPACITY: usize = 65535;

/*
                RFC 9293 - S3.3.2 - Fig 5, generalized with the four extra synchronized
                states this PCB type carries even though no transition in this stack
                reaches them yet (see module docs on `Pcb`).
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Free,
    Closed,
    Listen,
    SynSent,
    SynReceived,
    Established,
    FinWait1,
    FinWait2,
    Closing,
    TimeWait,
    CloseWait,
    LastAck,
}

/*
                RFC 9293 - S3.3.1 - Fig 3

           1         2          3          4
      ----------|----------|----------|----------
             SND.UNA    SND.NXT    SND.UNA
                                  +SND.WND
*/
#[derive(Debug, Clone, Copy, Default)]
pub struct SendSpace {
    pub una: u32,
    pub nxt: u32,
    pub wnd: u16,
    pub up: u16,
    pub wl1: u32,
    pub wl2: u32,
}

/*
                RFC 9293 - S3.3.1 - Fig 4

                       1          2          3
                   ----------|----------|----------
                          RCV.NXT    RCV.NXT
                                    +RCV.WND
*/
#[derive(Debug, Clone, Copy, Default)]
pub struct RecvSpace {
    pub nxt: u32,
    pub wnd: u16,
    pub up: u16,
}

/// A single Protocol Control Block.
///
/// `state` carries the full RFC 793 vocabulary (`FinWait1`, `FinWait2`, `Closing`, `TimeWait`,
/// `CloseWait`, `LastAck`, `SynSent`) even though `close()` here is the abrupt-RST path and active
/// opens are rejected before a PCB ever leaves `Closed` for `SynSent` — the type should not lie
/// about what a TCP connection's state diagram looks like just because this build only drives
/// part of it.
pub struct Pcb {
    pub state: State,
    pub local: Endpoint,
    pub foreign: Endpoint,
    pub snd: SendSpace,
    pub rcv: RecvSpace,
    pub iss: u32,
    pub irs: u32,
    pub mtu: u16,
    pub mss: u16,
    pub buf: VecDeque<u8>,
    pub ctx: WaitCtx,
}

impl Pcb {
    fn free() -> Self {
        Pcb {
            state: State::Free,
            local: Endpoint::ANY,
            foreign: Endpoint::ANY,
            snd: SendSpace::default(),
            rcv: RecvSpace::default(),
            iss: 0,
            irs: 0,
            mtu: 0,
            mss: 0,
            buf: VecDeque::new(),
            ctx: WaitCtx::new(),
        }
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn recv_capacity(&self) -> usize {
        RECV_BUF_CAPACITY
    }
}

/// Fixed-size table of PCBs. IDs are slot indices; callers are expected to hold the stack-wide
/// mutex this table lives behind before calling any method here.
pub struct PcbTable {
    slots: Vec<Pcb>,
}

impl PcbTable {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(PCB_TABLE_SIZE);
        for _ in 0..PCB_TABLE_SIZE {
            slots.push(Pcb::free());
        }
        PcbTable { slots }
    }

    /// Finds the first `Free` slot, marks it `Closed`, and returns its id. `None` if the table
    /// is full.
    pub fn alloc(&mut self, local: Endpoint, mtu: u16, mss: u16) -> Option<usize> {
        let id = self.slots.iter().position(|pcb| pcb.state == State::Free)?;

        let pcb = &mut self.slots[id];
        pcb.state = State::Closed;
        pcb.local = local;
        pcb.foreign = Endpoint::ANY;
        pcb.mtu = mtu;
        pcb.mss = mss;
        pcb.buf = VecDeque::with_capacity(RECV_BUF_CAPACITY);
        pcb.rcv.wnd = RECV_BUF_CAPACITY as u16;
        // A fresh wait context: a `Free` slot can have been reached by a stale `interrupt_all`
        // broadcast from a previous occupant, and `WaitCtx::interrupt` is sticky.
        pcb.ctx = WaitCtx::new();

        Some(id)
    }

    /// Releases the PCB at `id`. If a waiter is still parked on its wait context, the PCB is
    /// woken instead of zeroed — the waiter completes the teardown on its own exit path, since
    /// nothing here reference-counts waiters.
    pub fn release(&mut self, id: usize) {
        let pcb = &mut self.slots[id];
        if pcb.state == State::Free {
            return;
        }

        if pcb.ctx.has_waiters() {
            pcb.ctx.wake();
            return;
        }

        self.slots[id] = Pcb::free();
    }

    pub fn get(&self, id: usize) -> Option<&Pcb> {
        self.slots.get(id).filter(|pcb| pcb.state != State::Free)
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut Pcb> {
        self.slots
            .get_mut(id)
            .filter(|pcb| pcb.state != State::Free)
    }

    pub fn id_of(&self, pcb: &Pcb) -> Option<usize> {
        self.slots
            .iter()
            .position(|candidate| std::ptr::eq(candidate, pcb))
    }

    /// Best match for `(local, foreign)`: an exact 4-tuple match first, then a `Listen` PCB
    /// with a wildcard foreign side and a matching local port/address.
    pub fn select(&self, local: Endpoint, foreign: Endpoint) -> Option<usize> {
        if let Some(id) = self.slots.iter().position(|pcb| {
            pcb.state != State::Free && pcb.local == local && pcb.foreign == foreign
        }) {
            return Some(id);
        }

        self.slots.iter().position(|pcb| {
            pcb.state == State::Listen
                && pcb.local.port == local.port
                && (pcb.local.addr.is_unspecified() || pcb.local.addr == local.addr)
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Pcb> {
        self.slots.iter_mut()
    }
}

impl Default for PcbTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ep(port: u16) -> Endpoint {
        Endpoint::new(Ipv4Addr::new(10, 0, 0, 2), port)
    }

    #[test]
    fn alloc_then_release_frees_the_slot() {
        let mut table = PcbTable::new();
        let id = table.alloc(ep(80), 1500, 1460).unwrap();
        assert_eq!(table.get(id).unwrap().state, State::Closed);

        table.release(id);
        assert!(table.get(id).is_none());
    }

    #[test]
    fn alloc_exhausts_after_table_size_attempts() {
        let mut table = PcbTable::new();
        for _ in 0..PCB_TABLE_SIZE {
            assert!(table.alloc(ep(80), 1500, 1460).is_some());
        }
        assert!(table.alloc(ep(80), 1500, 1460).is_none());
    }

    #[test]
    fn select_prefers_exact_match_over_listen_wildcard() {
        let mut table = PcbTable::new();
        let listen_id = table.alloc(ep(80), 1500, 1460).unwrap();
        table.get_mut(listen_id).unwrap().state = State::Listen;

        let estab_id = table.alloc(ep(80), 1500, 1460).unwrap();
        let foreign = Endpoint::new(Ipv4Addr::new(10, 0, 0, 1), 4000);
        {
            let pcb = table.get_mut(estab_id).unwrap();
            pcb.foreign = foreign;
            pcb.state = State::Established;
        }

        let found = table.select(ep(80), foreign).unwrap();
        assert_eq!(found, estab_id);

        let found_wildcard = table.select(ep(80), Endpoint::new(Ipv4Addr::new(10, 0, 0, 9), 1)).unwrap();
        assert_eq!(found_wildcard, listen_id);
    }

    #[test]
    fn release_with_a_waiter_defers_zeroing() {
        let mut table = PcbTable::new();
        let id = table.alloc(ep(80), 1500, 1460).unwrap();
        table.get_mut(id).unwrap().ctx.enter();

        table.release(id);
        assert_eq!(table.get(id).unwrap().state, State::Closed);
    }
}
