//! OpenPGP card application over APDU executors
//!
//! - [`OpenPgpSession`] selects (and if needed activates) the OpenPGP
//!   applet, gates operations on the firmware version and drives PIN
//!   verification, reset, UIF, key generation, key import and the private
//!   key operations
//! - [`ApplicationRelatedData`] and friends decode the card's data objects
//! - [`AlgorithmAttributes`] describes key slot algorithms, including the
//!   fixed lists and Curve25519 corrections older firmware needs
//! - [`PrivateKeyTemplate`] builds the extended header list used for
//!   private key import
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

pub mod algorithm;
pub mod app_data;
pub mod curve;
pub mod error;
pub mod key_ref;
pub mod keys;
pub mod session;
#[cfg(test)]
mod simulator;
mod tlv;

pub use algorithm::{
    AlgorithmAttributes, AlgorithmInformation, EcImportFormat, RsaImportFormat,
};
pub use app_data::{
    ApplicationRelatedData, ExtendedCapabilities, ExtendedCapabilityFlags, PinPolicy, PwStatus,
    Uif,
};
pub use curve::OpenPgpCurve;
pub use error::{Error, Result};
pub use key_ref::KeyRef;
pub use keys::{EcPrivateKey, PrivateKeyTemplate, PrivateKeyValues, PublicKeyValues, RsaPrivateKey};
pub use session::{OPENPGP_AID, OpenPgpSession};
