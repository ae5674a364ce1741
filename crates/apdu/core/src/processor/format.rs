//! Wire encoding of APDU commands
//!
//! Short form carries up to 255 data bytes and an Le of up to 256; extended
//! form carries up to 65535 data bytes and an Le of up to 65536. The largest
//! Le of each form is encoded as all-zero bytes (`00` and `00 00`).

use bytes::{BufMut, BytesMut};
use derive_more::Display;

use crate::command::{Command, ExpectedLength};
use crate::{Error, Result};

/// Maximum data length of a short APDU
pub const SHORT_MAX_DATA: usize = 255;
/// Maximum Le of a short APDU
pub const SHORT_MAX_LE: ExpectedLength = 256;
/// Maximum data length of an extended APDU
pub const EXTENDED_MAX_DATA: usize = 65535;
/// Maximum Le of an extended APDU
pub const EXTENDED_MAX_LE: ExpectedLength = 65536;

/// APDU length encoding negotiated for a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
pub enum ApduFormat {
    /// One-byte Lc/Le, long commands are chained
    #[default]
    #[display("short")]
    Short,
    /// Three-byte Lc, two- or three-byte Le
    #[display("extended")]
    Extended,
}

impl ApduFormat {
    /// Maximum data length a single frame of this format can carry
    pub const fn max_data(self) -> usize {
        match self {
            Self::Short => SHORT_MAX_DATA,
            Self::Extended => EXTENDED_MAX_DATA,
        }
    }

    /// Maximum Le this format can express
    pub const fn max_le(self) -> ExpectedLength {
        match self {
            Self::Short => SHORT_MAX_LE,
            Self::Extended => EXTENDED_MAX_LE,
        }
    }
}

/// Encode a single APDU frame in the given format
///
/// # Errors
/// Returns [`Error::InvalidCommandLength`] when the data or Le does not fit
/// the format, or when Le is zero.
pub fn format_apdu(
    cla: u8,
    ins: u8,
    p1: u8,
    p2: u8,
    data: &[u8],
    le: Option<ExpectedLength>,
    format: ApduFormat,
) -> Result<BytesMut> {
    if data.len() > format.max_data() {
        return Err(Error::InvalidCommandLength(data.len()));
    }
    if let Some(le) = le {
        if le == 0 || le > format.max_le() {
            return Err(Error::InvalidCommandLength(le as usize));
        }
    }

    let mut buffer = BytesMut::with_capacity(4 + 3 + data.len() + 3);
    buffer.put_slice(&[cla, ins, p1, p2]);

    match format {
        ApduFormat::Short => {
            if !data.is_empty() {
                buffer.put_u8(data.len() as u8);
                buffer.put_slice(data);
            }
            if let Some(le) = le {
                // 256 wraps to 0x00
                buffer.put_u8(le as u8);
            }
        }
        ApduFormat::Extended => {
            if !data.is_empty() {
                buffer.put_u8(0x00);
                buffer.put_u16(data.len() as u16);
                buffer.put_slice(data);
            }
            if let Some(le) = le {
                if data.is_empty() {
                    buffer.put_u8(0x00);
                }
                // 65536 wraps to 0x0000
                buffer.put_u16(le as u16);
            }
        }
    }

    Ok(buffer)
}

/// Encode a whole command as one frame in the given format
pub fn encode(command: &Command, format: ApduFormat) -> Result<BytesMut> {
    format_apdu(
        command.class(),
        command.instruction(),
        command.p1(),
        command.p2(),
        command.data(),
        command.expected_length(),
        format,
    )
}
