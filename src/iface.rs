//! The single network interface this stack drives, and the IPv4 output path.
//!
//! A complete stack would carry an interface registry and a routing table; this one runs a
//! single TUN device, so `ip_route_get_iface` degenerates to "return the interface if it's up".
//! The function is kept distinct from direct field access anyway — it is the seam a real routing
//! table would replace.
//!
//! `Iface` is generic over its device so tests can swap the TUN handle for an in-memory sink
//! (anything implementing `Read + Write`) instead of opening a real device.

use std::io::{Read, Write};
use std::net::Ipv4Addr;

use etherparse::{IpNumber, Ipv4Header};
use tidy_tuntap::Tun;

const TCP_PROTOCOL: u8 = IpNumber::Tcp as u8;

use crate::error::{Error, IpError};

pub const IP_HDR_LEN: usize = 20;
pub const TCP_HDR_LEN: usize = 20;

/// The stack's one configured interface.
pub struct Iface<D = Tun> {
    pub unicast: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub broadcast: Ipv4Addr,
    pub mtu: u16,
    pub(crate) device: D,
}

impl<D: Read + Write> Iface<D> {
    pub fn new(device: D, unicast: Ipv4Addr, netmask: Ipv4Addr, mtu: u16) -> Self {
        let broadcast = Ipv4Addr::from(u32::from(unicast) | !u32::from(netmask));

        Iface {
            unicast,
            netmask,
            broadcast,
            mtu,
            device,
        }
    }

    pub fn mss(&self) -> u16 {
        self.mtu
            .saturating_sub(IP_HDR_LEN as u16)
            .saturating_sub(TCP_HDR_LEN as u16)
    }

    /// `dst` is deliverable to this interface: our own address, limited broadcast, or this
    /// interface's directed broadcast.
    pub fn accepts(&self, dst: Ipv4Addr) -> bool {
        dst == self.unicast || dst == Ipv4Addr::BROADCAST || dst == self.broadcast
    }

    pub fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.device.read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.device.write(buf)
    }
}

/// `ip_route_get_iface(dst)`. With one interface, routing is trivial, but callers must still
/// go through this function rather than reaching into `Iface` fields, since it is the one place
/// a multi-interface routing table would be plugged in.
pub fn ip_route_get_iface<D>(iface: &Iface<D>, _dst: Ipv4Addr) -> Option<&Iface<D>> {
    Some(iface)
}

/// `ip_output(protocol, payload, src, dst)`. Wraps `payload` in an IPv4 header and writes the
/// resulting datagram to the interface's device. This stack only ever speaks TCP, but the
/// protocol number is still threaded through explicitly rather than hardcoded at the write site.
pub fn ip_output<D: Read + Write>(
    iface: &mut Iface<D>,
    protocol: u8,
    payload: &[u8],
    src: Ipv4Addr,
    dst: Ipv4Addr,
) -> Result<(), Error> {
    let mut header =
        Ipv4Header::new(payload.len() as u16, 64, protocol, src.octets(), dst.octets());
    header.header_checksum = header
        .calc_header_checksum()
        .map_err(|_| Error::Ip(IpError::LengthMismatch))?;

    let mut datagram = Vec::with_capacity(header.header_len() + payload.len());
    header
        .write(&mut datagram)
        .map_err(|_| Error::Ip(IpError::LengthMismatch))?;
    datagram.extend_from_slice(payload);

    iface.write(&datagram)?;
    Ok(())
}

pub fn tcp_protocol_number() -> u8 {
    TCP_PROTOCOL
}
