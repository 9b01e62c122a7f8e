use std::net::Ipv4Addr;

/// Errors surfaced across the codec, IP input, and user-command layers.
///
/// Packet-level validation failures (the `Codec`/`Ip` variants) are never handed back to an
/// application synchronously; the caller of those layers logs and drops. Only the user-command
/// API (`open`/`close`/`send`/`receive`) returns an `Error` to a caller.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("tun device error: {0}")]
    Device(#[from] tidy_tuntap::error::Error),

    #[error("tun device I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Ip(#[from] IpError),

    #[error("no free PCB slot")]
    NoFreePcb,

    #[error("unknown connection handle {0}")]
    UnknownHandle(usize),

    #[error("active open is not supported")]
    ActiveOpenUnsupported,

    #[error("connection did not reach ESTABLISHED")]
    NotEstablished,

    #[error("operation is not valid while the connection is not ESTABLISHED")]
    InvalidState,

    #[error("wait was interrupted")]
    Interrupted,

    #[error("no route to {0}")]
    NoRoute(Ipv4Addr),
}

/// Failures from [`crate::tcp::codec`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("segment shorter than a TCP header")]
    TooShort,
    #[error("pseudo-header checksum does not verify")]
    BadChecksum,
}

/// Failures from the IPv4 input/output glue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum IpError {
    #[error("datagram shorter than an IPv4 header")]
    TooShort,
    #[error("unsupported IP version")]
    NotIpv4,
    #[error("IHL/total length fields are inconsistent")]
    LengthMismatch,
    #[error("header checksum does not verify")]
    BadChecksum,
    #[error("fragmented datagrams are not supported")]
    Fragmented,
    #[error("destination address is not deliverable to this interface")]
    NotDeliverable,
}
