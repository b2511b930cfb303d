//! Internet checksum (RFC 1071) helpers used to build raw protocol headers.
//!
//! The sum is accumulated in network byte order across any number of buffer
//! regions, so a pseudo-header and a payload can be checksummed without first
//! copying them into one buffer.

use std::net::{Ipv4Addr, Ipv6Addr};

use byteorder::{ByteOrder, NetworkEndian};

use crate::error::{Error, Result};
use crate::options::Protocol;

/// A borrowed `[offset, offset + length)` window of a buffer.
#[derive(Clone, Copy, Debug)]
pub struct Region<'a> {
    data: &'a [u8],
}

impl<'a> Region<'a> {
    pub fn new(buffer: &'a [u8], offset: usize, length: usize) -> Result<Self> {
        match offset.checked_add(length) {
            Some(end) if end <= buffer.len() => Ok(Region { data: &buffer[offset..end] }),
            _ => Err(Error::Bounds {
                len: buffer.len(),
                offset: offset,
                length: length,
            }),
        }
    }

    pub fn as_slice(&self) -> &'a [u8] {
        self.data
    }
}

impl<'a> From<&'a [u8]> for Region<'a> {
    fn from(buffer: &'a [u8]) -> Self {
        Region { data: buffer }
    }
}

impl<'a> From<&'a Vec<u8>> for Region<'a> {
    fn from(buffer: &'a Vec<u8>) -> Self {
        Region { data: buffer.as_slice() }
    }
}

/// Streaming one's-complement accumulator.
///
/// A trailing odd byte is held back until the next region supplies its low
/// half, so splitting the input at any point never changes the result.
#[derive(Clone, Copy, Debug, Default)]
pub struct Checksum {
    sum: u32,
    odd: Option<u8>,
}

impl Checksum {
    pub fn new() -> Self {
        Checksum::default()
    }

    #[inline]
    fn add_word(&mut self, word: u16) {
        self.sum += word as u32;
        if self.sum > 0xFFFF {
            self.sum -= 0xFFFF;
        }
    }

    pub fn add(&mut self, data: &[u8]) -> &mut Self {
        let mut data = data;
        if let Some(high) = self.odd.take() {
            match data.split_first() {
                Some((&low, rest)) => {
                    self.add_word(NetworkEndian::read_u16(&[high, low]));
                    data = rest;
                }
                None => {
                    self.odd = Some(high);
                    return self;
                }
            }
        }

        let mut words = data.chunks_exact(2);
        for word in &mut words {
            self.add_word(NetworkEndian::read_u16(word));
        }
        self.odd = words.remainder().first().cloned();
        self
    }

    pub fn add_region(&mut self, region: Region) -> &mut Self {
        self.add(region.as_slice())
    }

    /// Pads a pending odd byte with zero and returns the complemented sum,
    /// ready to be stored in a header.
    pub fn finish(&self) -> u16 {
        let mut total = *self;
        if let Some(high) = total.odd.take() {
            total.add_word((high as u16) << 8);
        }
        !(total.sum as u16)
    }
}

/// Checksums `regions` in order as if they were one contiguous buffer.
pub fn compute<'a, I>(regions: I) -> u16
    where I: IntoIterator<Item = Region<'a>>
{
    let mut sum = Checksum::new();
    for region in regions {
        sum.add_region(region);
    }
    sum.finish()
}

pub fn compute_one(data: &[u8]) -> u16 {
    Checksum::new().add(data).finish()
}

/// Stores `checksum` big-endian at `buffer[offset..offset + 2]`.
pub fn write(buffer: &mut [u8], offset: usize, checksum: u16) -> Result<&mut [u8]> {
    match offset.checked_add(2) {
        Some(end) if end <= buffer.len() => {
            NetworkEndian::write_u16(&mut buffer[offset..end], checksum);
            Ok(buffer)
        }
        _ => Err(Error::Bounds {
            len: buffer.len(),
            offset: offset,
            length: 2,
        }),
    }
}

pub fn pseudo_header_v4(src_addr: Ipv4Addr,
                        dst_addr: Ipv4Addr,
                        protocol: Protocol,
                        length: u16)
                        -> [u8; 12] {
    let mut header = [0; 12];
    header[0..4].copy_from_slice(&src_addr.octets());
    header[4..8].copy_from_slice(&dst_addr.octets());
    header[9] = protocol.number();
    NetworkEndian::write_u16(&mut header[10..12], length);
    header
}

pub fn pseudo_header_v6(src_addr: Ipv6Addr,
                        dst_addr: Ipv6Addr,
                        protocol: Protocol,
                        length: u32)
                        -> [u8; 40] {
    let mut header = [0; 40];
    header[0..16].copy_from_slice(&src_addr.octets());
    header[16..32].copy_from_slice(&dst_addr.octets());
    NetworkEndian::write_u32(&mut header[32..36], length);
    header[39] = protocol.number();
    header
}
