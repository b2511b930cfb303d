//! Host/network byte order conversions for header fields.

use byteorder::{ByteOrder, NativeEndian, NetworkEndian};

pub fn htons(value: u16) -> u16 {
    let mut buf = [0; 2];
    NetworkEndian::write_u16(&mut buf, value);
    NativeEndian::read_u16(&buf)
}

pub fn ntohs(value: u16) -> u16 {
    let mut buf = [0; 2];
    NativeEndian::write_u16(&mut buf, value);
    NetworkEndian::read_u16(&buf)
}

pub fn htonl(value: u32) -> u32 {
    let mut buf = [0; 4];
    NetworkEndian::write_u32(&mut buf, value);
    NativeEndian::read_u32(&buf)
}

pub fn ntohl(value: u32) -> u32 {
    let mut buf = [0; 4];
    NativeEndian::write_u32(&mut buf, value);
    NetworkEndian::read_u32(&buf)
}
