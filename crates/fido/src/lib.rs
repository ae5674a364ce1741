//! CTAP2 client PIN support over APDU executors
//!
//! - [`PinUvAuthProtocol`] implements PIN/UV auth protocols one and two:
//!   P-256 key agreement, key derivation, encryption and `pinUvAuthParam`
//!   computation
//! - [`ClientPin`] runs authenticatorClientPIN (retries, key agreement, PIN
//!   tokens with permissions, set and change PIN) over any [`Ctap2Client`]
//! - [`Ctap2Session`] is a [`Ctap2Client`] speaking CTAP2 to the FIDO applet
//!   through an [`Executor`](keyport_apdu_core::Executor)
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

#[cfg(test)]
mod authenticator;
pub mod cbor;
pub mod client_pin;
pub mod cose;
pub mod ctap;
pub mod error;
pub mod permissions;
pub mod pin;
pub mod pin_protocol;

pub use client_pin::{ClientPin, ClientPinRequest, ClientPinResponse, Ctap2Client, PinToken};
pub use cose::CoseKey;
pub use ctap::{Ctap2Session, FidoVersion, Info};
pub use error::{CtapStatus, Error, Result};
pub use permissions::Permissions;
pub use pin::{MAX_PIN_LEN, MIN_PIN_LEN, PIN_BUFFER_LEN, PIN_HASH_LEN, pin_hash, prepare_pin};
pub use pin_protocol::{PinUvAuthProtocol, SharedSecret};
