//! Wire format for the image loader protocol.
//!
//! All multi-byte fields are 16-bit little-endian. A session starts with a
//! single opcode byte selecting the sub-protocol the device should run.

/// Flow control flag sent by the device before each WRITE packet
pub const FLAG_READY: u8 = 0xFF;

/// Transfer outcome reported on success
pub const OUTCOME_SUCCESS: u8 = 0x00;

#[derive(Copy, Clone, Debug, PartialEq)]
#[repr(u8)]
pub enum Opcode {
    /// Upload an image in length-prefixed packets, gated by per-packet flags
    Write = 0x00,

    /// Read back a caller-specified number of bytes
    Read = 0x01,

    /// Write a single byte at an address
    WriteByte = 0x02,

    /// Read a single byte from an address
    ReadByte = 0x03,
}

impl Opcode {
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Terminal status byte ending a device exchange
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Outcome {
    Success,
    Failure(u8),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        *self == Outcome::Success
    }

    pub fn code(&self) -> u8 {
        match self {
            Outcome::Success => OUTCOME_SUCCESS,
            Outcome::Failure(c) => *c,
        }
    }
}

impl From<u8> for Outcome {
    fn from(v: u8) -> Self {
        match v {
            OUTCOME_SUCCESS => Outcome::Success,
            c => Outcome::Failure(c),
        }
    }
}

impl core::fmt::Display for Outcome {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Outcome::Success => write!(f, "success"),
            Outcome::Failure(c) => write!(f, "failure (0x{:02x})", c),
        }
    }
}

/// Encode a 16-bit field, least significant byte first
pub fn encode_u16(v: u16) -> [u8; 2] {
    v.to_le_bytes()
}

/// Decode a 16-bit field, least significant byte first
pub fn decode_u16(b: [u8; 2]) -> u16 {
    u16::from_le_bytes(b)
}

/// Number of packets needed to send `len` bytes through a device buffer of `buffer_size`.
///
/// A zero buffer size cannot carry any packet and yields zero.
pub fn packet_count(len: usize, buffer_size: usize) -> usize {
    if buffer_size == 0 {
        return 0;
    }
    len / buffer_size + if len % buffer_size == 0 { 0 } else { 1 }
}
