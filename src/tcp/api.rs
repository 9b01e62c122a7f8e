//! The blocking user-command API: `open`, `close`, `send`, `receive`. Everything here drives
//! the FSM/PCB table through application-initiated actions rather than inbound segments; segment
//! arrival itself lives in [`crate::tcp::fsm`].

use std::io::{Read, Write};

use log::warn;

use crate::error::Error;
use crate::tcp::codec::Flags;
use crate::tcp::output;
use crate::tcp::pcb::State;
use crate::tcp::sched;
use crate::tcp::Endpoint;
use crate::Stack;

impl<D: Read + Write + Send + 'static> Stack<D> {
    /// Opens a connection on `local`. Only passive (server) opens are supported; `active` exists
    /// in the signature to document the rejection rather than to silently ignore the request.
    pub fn open(&self, local: Endpoint, active: bool) -> Result<usize, Error> {
        if active {
            return Err(Error::ActiveOpenUnsupported);
        }

        let id = {
            let mut inner = self.inner.lock().unwrap();
            let mtu = inner.iface.mtu;
            let mss = inner.iface.mss();
            let id = inner.table.alloc(local, mtu, mss).ok_or(Error::NoFreePcb)?;
            inner.table.get_mut(id).unwrap().state = State::Listen;
            id
        };

        // Two suspension points: wait for a SYN to land (leaving `Listen`), then for the final
        // ACK to land (leaving `SynReceived`).
        self.wait_for_state_change(id, State::Listen)?;
        self.wait_for_state_change(id, State::SynReceived)?;

        let mut inner = self.inner.lock().unwrap();
        let established = inner
            .table
            .get(id)
            .map(|pcb| pcb.state == State::Established)
            .unwrap_or(false);

        if established {
            Ok(id)
        } else {
            inner.table.release(id);
            Err(Error::NotEstablished)
        }
    }

    /// Abrupt close: sends RST and releases the PCB immediately. There is no graceful half-close
    /// path in this build (FIN handling is a non-goal).
    pub fn close(&self, id: usize) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        let pcb = inner.table.get_mut(id).ok_or(Error::UnknownHandle(id))?;
        pcb.state = State::Closed;
        let (local, foreign, seq) = (pcb.local, pcb.foreign, pcb.snd.nxt);

        let _ = output::emit_raw(&mut inner.iface, local, foreign, seq, 0, Flags::RST);
        inner.table.release(id);
        Ok(())
    }

    /// Sends `data`, fragmenting into at most `mss`-sized segments further capped by the peer's
    /// current advertised window. Blocks when the window is full; returns early with whatever
    /// was sent if interrupted or if IP output fails partway through.
    pub fn send(&self, id: usize, data: &[u8]) -> Result<usize, Error> {
        let mut sent = 0;
        let mut inner = self.inner.lock().unwrap();

        while sent < data.len() {
            let pcb = inner.table.get(id).ok_or(Error::UnknownHandle(id))?;
            if pcb.state != State::Established {
                inner.table.release(id);
                return Err(Error::InvalidState);
            }

            let in_flight = pcb.snd.nxt.wrapping_sub(pcb.snd.una);
            let capacity = (pcb.snd.wnd as u32).saturating_sub(in_flight);

            if capacity == 0 {
                let already_interrupted = inner.table.get(id).unwrap().ctx.interrupted();
                inner.table.get_mut(id).unwrap().ctx.enter();
                if !already_interrupted {
                    let cond = inner.table.get(id).unwrap().ctx.condvar();
                    inner = sched::sleep(cond, inner);
                }

                let woke = inner.table.get_mut(id).ok_or(Error::UnknownHandle(id))?.ctx.exit();
                if let Err(err) = woke {
                    return if sent == 0 { Err(err) } else { Ok(sent) };
                }
                continue;
            }

            let mss = inner.table.get(id).unwrap().mss.max(1) as u32;
            let chunk_len = (data.len() - sent).min(capacity as usize).min(mss as usize);
            let chunk = &data[sent..sent + chunk_len];

            let new_nxt = inner.table.get(id).unwrap().snd.nxt.wrapping_add(chunk_len as u32);
            inner.table.get_mut(id).unwrap().snd.nxt = new_nxt;

            let pcb = inner.table.get(id).unwrap();
            if let Err(err) = output::emit(&mut inner.iface, pcb, Flags::ACK | Flags::PSH, chunk) {
                warn!("ip output failed during send on pcb {id}: {err}");
                inner.table.get_mut(id).unwrap().state = State::Closed;
                inner.table.release(id);
                return if sent == 0 { Err(err) } else { Ok(sent) };
            }

            sent += chunk_len;
        }

        Ok(sent)
    }

    /// Copies at most `buf.len()` bytes out of the PCB's receive buffer, blocking if it is
    /// currently empty.
    pub fn receive(&self, id: usize, buf: &mut [u8]) -> Result<usize, Error> {
        let mut inner = self.inner.lock().unwrap();

        loop {
            let pcb = inner.table.get(id).ok_or(Error::UnknownHandle(id))?;
            if pcb.state != State::Established {
                inner.table.release(id);
                return Err(Error::InvalidState);
            }

            if !pcb.buf.is_empty() {
                let pcb = inner.table.get_mut(id).unwrap();
                let take = buf.len().min(pcb.buf.len());
                for slot in buf.iter_mut().take(take) {
                    *slot = pcb.buf.pop_front().unwrap();
                }
                let capacity = pcb.recv_capacity() as u16;
                pcb.rcv.wnd = pcb.rcv.wnd.saturating_add(take as u16).min(capacity);
                return Ok(take);
            }

            let already_interrupted = inner.table.get(id).unwrap().ctx.interrupted();
            inner.table.get_mut(id).unwrap().ctx.enter();
            if !already_interrupted {
                let cond = inner.table.get(id).unwrap().ctx.condvar();
                inner = sched::sleep(cond, inner);
            }
            inner.table.get_mut(id).ok_or(Error::UnknownHandle(id))?.ctx.exit()?;
            // Loop back around: a wake can also mean the PCB was reset out from under us, so
            // re-check state rather than assuming data is what woke us.
        }
    }

    fn wait_for_state_change(&self, id: usize, from: State) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();

        loop {
            let pcb = inner.table.get(id).ok_or(Error::UnknownHandle(id))?;
            if pcb.state != from {
                return Ok(());
            }

            let already_interrupted = inner.table.get(id).unwrap().ctx.interrupted();
            inner.table.get_mut(id).unwrap().ctx.enter();
            if !already_interrupted {
                let cond = inner.table.get(id).unwrap().ctx.condvar();
                inner = sched::sleep(cond, inner);
            }

            if let Err(err) = inner.table.get_mut(id).ok_or(Error::UnknownHandle(id))?.ctx.exit() {
                inner.table.release(id);
                return Err(err);
            }
        }
    }
}
