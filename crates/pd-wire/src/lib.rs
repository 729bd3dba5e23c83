//! Component F: the 40-byte PD telegram header.
//!
//! Lays out, parses and CRC-checks the header described in the wire format.
//! All multi-byte fields are big-endian on the wire except `frameCheckSum`,
//! which is little-endian — do not "fix" this, peers depend on it.

mod header;
mod msg_type;

pub use header::{Header, HEADER_SIZE, MAX_DATAGRAM_SIZE, MAX_DATASET_LEN};
pub use msg_type::MsgType;
use thiserror::Error;

/// Errors raised by [`Header::check`]. Maps 1:1 onto the `WireErr`/`CrcErr`
/// variants surfaced to the application.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    #[error("wire format violation")]
    Wire,
    #[error("frame check sum mismatch")]
    Crc,
}
