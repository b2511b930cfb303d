use std::io;
use std::result;

use thiserror::Error;

pub type Result<T> = result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("buffer length '{len}' is not large enough for the specified offset '{offset}' plus length '{length}'")]
    Bounds {
        len: usize,
        offset: usize,
        length: usize,
    },

    #[error("invalid IP address '{0}'")]
    InvalidAddress(String),

    #[error("checksum offset '{offset}' does not fit in a packet of length '{length}'")]
    ChecksumOffset { offset: usize, length: usize },

    #[error("socket is closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    pub fn is_closed(&self) -> bool {
        match *self {
            Error::Closed => true,
            _ => false,
        }
    }
}
