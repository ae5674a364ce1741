//! APDU command definitions
//!
//! This module provides the immutable [`Command`] type according to
//! ISO/IEC 7816-4. Wire encoding lives in [`crate::processor::format`]
//! because the same command may be framed differently depending on the
//! negotiated [`ApduFormat`](crate::processor::ApduFormat).

use std::fmt;

use bytes::Bytes;

use crate::{Error, Result};

/// Expected length type for APDU commands
///
/// Wide enough for the extended-length maximum of 65536.
pub type ExpectedLength = u32;

/// Class byte bit signalling that more command frames follow
pub const CLA_CHAINING: u8 = 0x10;

/// Class byte bit signalling secure messaging
pub const CLA_SECURE_MESSAGING: u8 = 0x04;

/// Generic APDU command structure
///
/// A command is immutable once built: the `with_*` methods consume the
/// command and return a new value.
#[derive(Clone, PartialEq, Eq)]
pub struct Command {
    cla: u8,
    ins: u8,
    p1: u8,
    p2: u8,
    data: Bytes,
    le: Option<ExpectedLength>,
}

impl Command {
    /// Create a new command with just the header bytes
    pub const fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: Bytes::new(),
            le: None,
        }
    }

    /// Create a new command with expected response length (Le)
    pub const fn new_with_le(cla: u8, ins: u8, p1: u8, p2: u8, le: ExpectedLength) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: Bytes::new(),
            le: Some(le),
        }
    }

    /// Create a new command with data payload
    pub fn new_with_data<T: Into<Bytes>>(cla: u8, ins: u8, p1: u8, p2: u8, data: T) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: data.into(),
            le: None,
        }
    }

    /// Replace the data field
    pub fn with_data<T: Into<Bytes>>(mut self, data: T) -> Self {
        self.data = data.into();
        self
    }

    /// Replace the expected length field
    pub const fn with_le(mut self, le: ExpectedLength) -> Self {
        self.le = Some(le);
        self
    }

    /// Replace the class byte
    pub const fn with_class(mut self, cla: u8) -> Self {
        self.cla = cla;
        self
    }

    /// Command class (CLA)
    pub const fn class(&self) -> u8 {
        self.cla
    }

    /// Instruction code (INS)
    pub const fn instruction(&self) -> u8 {
        self.ins
    }

    /// First parameter (P1)
    pub const fn p1(&self) -> u8 {
        self.p1
    }

    /// Second parameter (P2)
    pub const fn p2(&self) -> u8 {
        self.p2
    }

    /// Command payload data, possibly empty
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Command payload as shared bytes
    pub const fn data_bytes(&self) -> &Bytes {
        &self.data
    }

    /// Expected response length (optional)
    pub const fn expected_length(&self) -> Option<ExpectedLength> {
        self.le
    }

    /// Parse a short-form command from raw bytes
    ///
    /// Le of `0x00` decodes to 256.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::InvalidCommandLength(data.len()));
        }

        let mut command = Self::new(data[0], data[1], data[2], data[3]);
        let body = &data[4..];
        let decode_le = |b: u8| if b == 0 { 256 } else { b as ExpectedLength };

        match body.len() {
            0 => {}
            1 => command.le = Some(decode_le(body[0])),
            _ => {
                let lc = body[0] as usize;
                if lc == 0 || body.len() < 1 + lc || body.len() > 2 + lc {
                    return Err(Error::InvalidCommandLength(data.len()));
                }
                command.data = Bytes::copy_from_slice(&body[1..1 + lc]);
                if body.len() == 2 + lc {
                    command.le = Some(decode_le(body[1 + lc]));
                }
            }
        }

        Ok(command)
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("cla", &format_args!("{:#04x}", self.cla))
            .field("ins", &format_args!("{:#04x}", self.ins))
            .field("p1", &format_args!("{:#04x}", self.p1))
            .field("p2", &format_args!("{:#04x}", self.p2))
            .field("data_len", &self.data.len())
            .field("le", &self.le)
            .finish()
    }
}
