//! GlobalPlatform SCP03 secure channel
//!
//! This crate layers SCP03 secure messaging over any
//! [`Executor`](keyport_apdu_core::Executor):
//!
//! - [`Scp03::open`] runs INITIALIZE UPDATE / EXTERNAL AUTHENTICATE with a
//!   set of [`StaticKeys`] and derives the [`SessionKeys`]
//! - [`ScpProcessor`] then encrypts and MACs every command and verifies and
//!   decrypts every response, keeping the [`ChannelState`] in lockstep with
//!   the card
//!
//! A response that fails verification leaves the channel desynchronized;
//! every later command fails with a security error until a new channel is
//! opened.
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

pub mod crypto;
pub mod handshake;
pub mod keys;
pub mod processor;
#[cfg(test)]
mod simulator;
pub mod state;

pub use handshake::{InitializeUpdateResponse, Scp03};
pub use keys::{KeyRef, SessionKeys, StaticKeys};
pub use processor::ScpProcessor;
pub use state::{ChannelState, ScpState};
