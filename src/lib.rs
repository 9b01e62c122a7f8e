//! A user-space TCP/IP stack running over a TUN device: IPv4 input/output, a fixed-size TCP
//! PCB table, and the RFC 793 segment-arrival state machine behind a blocking
//! `open`/`close`/`send`/`receive` API.

pub mod error;
pub mod iface;
pub mod ip;
pub mod tcp;

use std::io::{Read, Write};
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::thread;

use log::{error, trace};
use tidy_tuntap::Tun;

pub use error::Error;
pub use tcp::{Endpoint, TcpListener, TcpStream};

use crate::iface::Iface;
use crate::tcp::pcb::PcbTable;

const DEFAULT_MTU: u16 = 1500;

pub(crate) struct Inner<D: Read + Write> {
    pub(crate) table: PcbTable,
    pub(crate) iface: Iface<D>,
}

/// The whole running stack: the PCB table and the one configured interface behind a single
/// mutex, plus the background thread draining the device. Coarse-grained locking is deliberate
/// (see crate docs) — the PCB table is small and segment processing is short, so a single mutex
/// keeps the FSM trivially consistent with the user-command API without finer-grained
/// bookkeeping.
pub struct Stack<D: Read + Write + Send + 'static = Tun> {
    pub(crate) inner: Mutex<Inner<D>>,
}

impl Stack<Tun> {
    /// Brings up `device_name` as a TUN interface at `addr`/`netmask` and starts the background
    /// read loop on its own thread.
    pub fn new(
        device_name: &str,
        addr: Ipv4Addr,
        netmask: Ipv4Addr,
        mtu: Option<u16>,
    ) -> Result<Arc<Self>, Error> {
        let tun = Tun::new(device_name, false)?;
        tun.set_addr(addr)?;
        tun.set_netmask(netmask)?;
        tun.bring_up()?;

        let iface = Iface::new(tun, addr, netmask, mtu.unwrap_or(DEFAULT_MTU));
        Ok(Self::from_iface(iface))
    }
}

impl<D: Read + Write + Send + 'static> Stack<D> {
    /// Wraps an already-configured [`Iface`] and starts its read loop. Exposed separately from
    /// [`Stack::new`] so tests (and any caller with an in-memory device) can drive a stack
    /// without a real TUN device.
    pub fn from_iface(iface: Iface<D>) -> Arc<Self> {
        let stack = Arc::new(Stack {
            inner: Mutex::new(Inner { table: PcbTable::new(), iface }),
        });

        let reader = Arc::clone(&stack);
        thread::spawn(move || reader.run());

        stack
    }

    pub fn listen(self: &Arc<Self>, local: Endpoint) -> TcpListener<D> {
        TcpListener::bind(Arc::clone(self), local)
    }

    /// The process-wide cancellation broadcast: interrupts every live PCB's wait context. Each
    /// waiter observes this as `Err(Error::Interrupted)` on its next wake.
    pub fn interrupt_all(&self) {
        let mut inner = self.inner.lock().unwrap();
        for pcb in inner.table.iter_mut() {
            pcb.ctx.interrupt();
        }
    }

    fn run(self: Arc<Self>) {
        let mut buf = [0u8; 65536];
        loop {
            let mut inner = self.inner.lock().unwrap();

            let n = match inner.iface.read(&mut buf) {
                Ok(n) => n,
                Err(err) => {
                    error!("tun read failed, stopping read loop: {err}");
                    return;
                }
            };
            trace!("read {n} bytes from interface");

            if let Err(err) = ip::input(&mut inner.table, &mut inner.iface, &buf[..n]) {
                error!("ip input failed: {err}");
            }
        }
    }
}
