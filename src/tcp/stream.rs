//! `TcpListener`/`TcpStream`: a thin `std::io::{Read, Write}` wrapper over the handle-based
//! `open`/`close`/`send`/`receive` API. These add no protocol behavior of their own — every
//! method here is a direct, mechanical translation to a `Stack` call.

use std::io::{self, Read, Write};
use std::sync::Arc;

use tidy_tuntap::Tun;

use crate::tcp::Endpoint;
use crate::Stack;

fn to_io_error(err: crate::Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, err)
}

/// A bound, listening port. `accept` is `open` with `active = false` — since a PCB has no
/// accept queue, each call allocates a fresh `Listen` PCB and blocks until a connection lands
/// on it; concurrent acceptors come from calling `accept` from more than one thread.
pub struct TcpListener<D: Read + Write + Send + 'static = Tun> {
    stack: Arc<Stack<D>>,
    local: Endpoint,
}

impl<D: Read + Write + Send + 'static> TcpListener<D> {
    pub fn bind(stack: Arc<Stack<D>>, local: Endpoint) -> Self {
        TcpListener { stack, local }
    }

    pub fn accept(&self) -> io::Result<TcpStream<D>> {
        let id = self.stack.open(self.local, false).map_err(to_io_error)?;
        Ok(TcpStream { stack: Arc::clone(&self.stack), id })
    }
}

/// A connected stream. `read` is `receive`, `write` is `send`, and dropping the stream sends an
/// RST and releases the underlying PCB.
pub struct TcpStream<D: Read + Write + Send + 'static = Tun> {
    stack: Arc<Stack<D>>,
    id: usize,
}

impl<D: Read + Write + Send + 'static> Read for TcpStream<D> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stack.receive(self.id, buf).map_err(to_io_error)
    }
}

impl<D: Read + Write + Send + 'static> Write for TcpStream<D> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stack.send(self.id, buf).map_err(to_io_error)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<D: Read + Write + Send + 'static> Drop for TcpStream<D> {
    fn drop(&mut self) {
        let _ = self.stack.close(self.id);
    }
}
