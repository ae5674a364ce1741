//! Firmware version of a connected application

use derive_more::Display;

use crate::{Error, Result};

/// Firmware version as reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Display)]
#[display("{major}.{minor}.{patch}")]
pub struct Version {
    /// Major version
    pub major: u8,
    /// Minor version
    pub minor: u8,
    /// Patch version
    pub patch: u8,
}

impl Version {
    /// Create a new version
    pub const fn new(major: u8, minor: u8, patch: u8) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse a version from its first three bytes
    ///
    /// # Errors
    /// [`Error::Protocol`] when fewer than three bytes are given.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        match data {
            [major, minor, patch, ..] => Ok(Self::new(*major, *minor, *patch)),
            _ => Err(Error::protocol(format!(
                "Version requires 3 bytes, got {}",
                data.len()
            ))),
        }
    }

    /// Parse a version whose three bytes are binary coded decimal
    pub fn from_bcd(data: &[u8]) -> Result<Self> {
        let raw = Self::from_bytes(data)?;
        Ok(Self::new(
            decode_bcd(raw.major),
            decode_bcd(raw.minor),
            decode_bcd(raw.patch),
        ))
    }

    /// Whether this version is at or above `major.minor.patch`
    pub const fn is_at_least(&self, major: u8, minor: u8, patch: u8) -> bool {
        !self.is_less_than(major, minor, patch)
    }

    /// Whether this version is strictly below `major.minor.patch`
    pub const fn is_less_than(&self, major: u8, minor: u8, patch: u8) -> bool {
        if self.major != major {
            return self.major < major;
        }
        if self.minor != minor {
            return self.minor < minor;
        }
        self.patch < patch
    }
}

/// Decode one byte of binary coded decimal
pub const fn decode_bcd(value: u8) -> u8 {
    (value >> 4) * 10 + (value & 0x0F)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare() {
        let version = Version::new(4, 3, 1);
        assert!(version.is_at_least(4, 3, 1));
        assert!(version.is_at_least(4, 3, 0));
        assert!(version.is_at_least(3, 9, 9));
        assert!(!version.is_at_least(4, 3, 2));
        assert!(version.is_less_than(4, 4, 0));
        assert!(!version.is_less_than(4, 3, 1));
        assert!(Version::new(5, 0, 0) > version);
    }

    #[test]
    fn test_parse() {
        assert_eq!(Version::from_bytes(&[5, 4, 3]).unwrap(), Version::new(5, 4, 3));
        assert_eq!(Version::from_bytes(&[5, 7, 1, 0xFF]).unwrap(), Version::new(5, 7, 1));
        assert!(matches!(Version::from_bytes(&[5, 4]), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_bcd() {
        assert_eq!(decode_bcd(0x12), 12);
        assert_eq!(Version::from_bcd(&[0x05, 0x12, 0x03]).unwrap(), Version::new(5, 12, 3));
    }

    #[test]
    fn test_display() {
        assert_eq!(Version::new(5, 2, 7).to_string(), "5.2.7");
    }
}
