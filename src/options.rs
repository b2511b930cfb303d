//! Address families, protocol numbers and socket option identifiers.
//!
//! Levels and options are named portably and mapped onto the host's own
//! identifiers when they reach the native socket.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum AddressFamily {
    Ipv4 = 1,
    Ipv6 = 2,
}

impl AddressFamily {
    pub fn from_number(number: u8) -> Option<Self> {
        match number {
            1 => Some(AddressFamily::Ipv4),
            2 => Some(AddressFamily::Ipv6),
            _ => None,
        }
    }

    pub fn number(self) -> u8 {
        self as u8
    }

    pub fn as_raw(self) -> libc::c_int {
        match self {
            AddressFamily::Ipv4 => libc::AF_INET,
            AddressFamily::Ipv6 => libc::AF_INET6,
        }
    }
}

impl Default for AddressFamily {
    fn default() -> Self {
        AddressFamily::Ipv4
    }
}

/// IP protocol number carried in the socket's protocol field.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Protocol(u8);

impl Protocol {
    pub const NONE: Protocol = Protocol(0);
    pub const ICMP: Protocol = Protocol(1);
    pub const TCP: Protocol = Protocol(6);
    pub const UDP: Protocol = Protocol(17);
    pub const ICMPV6: Protocol = Protocol(58);

    pub const fn new(number: u8) -> Self {
        Protocol(number)
    }

    pub fn number(self) -> u8 {
        self.0
    }

    pub fn as_raw(self) -> libc::c_int {
        self.0 as libc::c_int
    }

    pub fn is_icmp(self) -> bool {
        self == Protocol::ICMP || self == Protocol::ICMPV6
    }
}

impl From<u8> for Protocol {
    fn from(number: u8) -> Self {
        Protocol(number)
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SocketLevel {
    Socket,
    Ip,
    Ipv6,
}

impl SocketLevel {
    pub fn as_raw(self) -> libc::c_int {
        match self {
            SocketLevel::Socket => libc::SOL_SOCKET,
            SocketLevel::Ip => libc::IPPROTO_IP,
            SocketLevel::Ipv6 => libc::IPPROTO_IPV6,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SocketOption {
    Broadcast,
    RcvBuf,
    RcvTimeo,
    SndBuf,
    SndTimeo,
    IpHdrIncl,
    IpOptions,
    IpTos,
    IpTtl,
    /// Alias of `Ipv6UnicastHops`.
    Ipv6Ttl,
    Ipv6UnicastHops,
    Ipv6V6Only,
}

impl SocketOption {
    /// The level this option is normally set at.
    pub fn level(self) -> SocketLevel {
        match self {
            SocketOption::Broadcast |
            SocketOption::RcvBuf |
            SocketOption::RcvTimeo |
            SocketOption::SndBuf |
            SocketOption::SndTimeo => SocketLevel::Socket,
            SocketOption::IpHdrIncl |
            SocketOption::IpOptions |
            SocketOption::IpTos |
            SocketOption::IpTtl => SocketLevel::Ip,
            SocketOption::Ipv6Ttl |
            SocketOption::Ipv6UnicastHops |
            SocketOption::Ipv6V6Only => SocketLevel::Ipv6,
        }
    }

    pub fn as_raw(self) -> libc::c_int {
        match self {
            SocketOption::Broadcast => libc::SO_BROADCAST,
            SocketOption::RcvBuf => libc::SO_RCVBUF,
            SocketOption::RcvTimeo => libc::SO_RCVTIMEO,
            SocketOption::SndBuf => libc::SO_SNDBUF,
            SocketOption::SndTimeo => libc::SO_SNDTIMEO,
            SocketOption::IpHdrIncl => libc::IP_HDRINCL,
            SocketOption::IpOptions => libc::IP_OPTIONS,
            SocketOption::IpTos => libc::IP_TOS,
            SocketOption::IpTtl => libc::IP_TTL,
            SocketOption::Ipv6Ttl |
            SocketOption::Ipv6UnicastHops => libc::IPV6_UNICAST_HOPS,
            SocketOption::Ipv6V6Only => libc::IPV6_V6ONLY,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum OptionValue {
    Int(i32),
    Bytes(Vec<u8>),
}

impl OptionValue {
    /// Encodes the value the way `setsockopt` expects it in memory.
    pub fn encode(&self) -> Vec<u8> {
        match *self {
            OptionValue::Int(value) => value.to_ne_bytes().to_vec(),
            OptionValue::Bytes(ref bytes) => bytes.clone(),
        }
    }
}

impl From<i32> for OptionValue {
    fn from(value: i32) -> Self {
        OptionValue::Int(value)
    }
}

impl From<bool> for OptionValue {
    fn from(value: bool) -> Self {
        OptionValue::Int(if value { 1 } else { 0 })
    }
}

impl From<Vec<u8>> for OptionValue {
    fn from(value: Vec<u8>) -> Self {
        OptionValue::Bytes(value)
    }
}

impl<'a> From<&'a [u8]> for OptionValue {
    fn from(value: &'a [u8]) -> Self {
        OptionValue::Bytes(value.to_vec())
    }
}

/// A fully specified `setsockopt` request.
///
/// Without an explicit `length` the whole encoded value is passed; with one,
/// only its first `length` bytes are.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SockOpt {
    pub level: SocketLevel,
    pub option: SocketOption,
    pub value: OptionValue,
    pub length: Option<usize>,
}

impl SockOpt {
    pub fn new<V: Into<OptionValue>>(level: SocketLevel, option: SocketOption, value: V) -> Self {
        SockOpt {
            level: level,
            option: option,
            value: value.into(),
            length: None,
        }
    }

    /// Uses the option's usual level.
    pub fn of<V: Into<OptionValue>>(option: SocketOption, value: V) -> Self {
        SockOpt::new(option.level(), option, value)
    }

    pub fn with_length(mut self, length: usize) -> Self {
        self.length = Some(length);
        self
    }
}
