use crate::options::{AddressFamily, Protocol};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// Parameters fixed at socket creation.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SocketConfig {
    pub address_family: AddressFamily,
    pub protocol: Protocol,
    /// Size of the receive buffer; longer datagrams are truncated by the OS.
    pub buffer_size: usize,
    /// Fill in the Internet checksum of each outbound packet before sending.
    pub generate_checksums: bool,
    /// Position of the checksum field, relative to the start of the packet.
    pub checksum_offset: usize,
}

impl Default for SocketConfig {
    fn default() -> Self {
        SocketConfig {
            address_family: AddressFamily::default(),
            protocol: Protocol::default(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            generate_checksums: false,
            checksum_offset: 0,
        }
    }
}

impl SocketConfig {
    pub fn new(protocol: Protocol) -> Self {
        SocketConfig { protocol: protocol, ..SocketConfig::default() }
    }

    pub fn address_family(mut self, family: AddressFamily) -> Self {
        self.address_family = family;
        self
    }

    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Enables checksum generation with the field at `offset`.
    pub fn generate_checksums(mut self, offset: usize) -> Self {
        self.generate_checksums = true;
        self.checksum_offset = offset;
        self
    }
}
