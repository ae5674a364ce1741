//! Version-gated features

use std::fmt;

use super::Version;

/// Version predicate deciding whether a feature is available
#[derive(Debug, Clone, Copy)]
pub enum Requirement {
    /// Available from the given version onwards
    AtLeast(Version),
    /// `floor` applies when the major version equals `major`, `otherwise` for
    /// every other major version
    ByMajor {
        /// Major version with its own threshold
        major: u8,
        /// Threshold for that major version
        floor: Version,
        /// Threshold for all other major versions
        otherwise: Version,
    },
    /// Arbitrary pure predicate over the version
    Predicate(fn(Version) -> bool),
}

impl Requirement {
    /// Evaluate the requirement against a version
    pub fn is_satisfied_by(&self, version: Version) -> bool {
        match *self {
            Self::AtLeast(min) => version >= min,
            Self::ByMajor {
                major,
                floor,
                otherwise,
            } => {
                if version.major == major {
                    version >= floor
                } else {
                    version >= otherwise
                }
            }
            Self::Predicate(predicate) => predicate(version),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AtLeast(min) => write!(f, "version {min} or later"),
            Self::ByMajor {
                major,
                floor,
                otherwise,
            } => write!(
                f,
                "version {floor} or later on {major}.x, {otherwise} or later otherwise"
            ),
            Self::Predicate(_) => f.write_str("a compatible version"),
        }
    }
}

/// Named capability of an application, gated on firmware version
#[derive(Debug, Clone, Copy)]
pub struct Feature {
    /// Human readable name used in errors
    pub name: &'static str,
    /// Version predicate
    pub requirement: Requirement,
}

impl Feature {
    /// Feature available from `major.minor.patch` onwards
    pub const fn new(name: &'static str, major: u8, minor: u8, patch: u8) -> Self {
        Self {
            name,
            requirement: Requirement::AtLeast(Version::new(major, minor, patch)),
        }
    }

    /// Feature with an arbitrary requirement
    pub const fn with_requirement(name: &'static str, requirement: Requirement) -> Self {
        Self { name, requirement }
    }

    /// Whether the feature is available on a device running `version`
    pub fn is_supported_by(&self, version: Version) -> bool {
        self.requirement.is_satisfied_by(version)
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}
