//! Raw IPv4/IPv6 sockets driven by readiness events.
//!
//! Callers build packets themselves and receive them verbatim, IP header
//! included. The socket owns its lifecycle, the outbound queue and flow
//! control; see [`RawSocket`].

pub mod checksum;
pub mod config;
pub mod error;
pub mod events;
pub mod options;
pub mod order;
pub mod platform;
pub mod socket;

pub use crate::checksum::{compute as create_checksum, write as write_checksum, Checksum, Region};
pub use crate::config::SocketConfig;
pub use crate::error::{Error, Result};
pub use crate::options::{AddressFamily, OptionValue, Protocol, SockOpt, SocketLevel,
                         SocketOption};
pub use crate::order::{htonl, htons, ntohl, ntohs};
pub use crate::platform::{Event, Native, SysSocket};
pub use crate::socket::{RawSocket, State};

/// Opens an OS raw socket with `config`.
pub fn create_socket(config: SocketConfig) -> Result<RawSocket> {
    RawSocket::create(config)
}
