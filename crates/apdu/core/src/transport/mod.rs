//! Transport traits for APDU communication with cards
//!
//! A transport is the opaque byte pipe below the protocol stack. Opening the
//! physical link (USB, NFC, PC/SC reader) happens outside this crate; an
//! implementation only has to move frames and report its capabilities.

pub mod error;
#[cfg(any(test, feature = "mock"))]
pub mod mock;

use std::fmt;

use bytes::Bytes;
pub use error::TransportError;
use tracing::{debug, trace};

/// Trait for basic card transports
///
/// A transport is responsible for sending and receiving raw APDU bytes.
/// It has no knowledge of command structure, secure channels, or protocol details.
pub trait CardTransport: Send + fmt::Debug {
    /// Send raw APDU bytes to card and return response bytes
    ///
    /// This method should handle the low-level communication with the card
    /// but should not interpret the contents or handle protocol-specific
    /// operations like GET RESPONSE.
    fn transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, TransportError> {
        trace!(command = ?hex::encode(command), "Transmitting raw command");
        let result = self.do_transmit_raw(command);
        match &result {
            Ok(response) => {
                trace!(response = ?hex::encode(response), "Received raw response");
            }
            Err(e) => {
                debug!(error = ?e, "Transport error during transmission");
            }
        }
        result
    }

    /// Internal implementation of transmit_raw
    /// This is the method that concrete implementations should override
    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, TransportError>;

    /// Largest frame the link can carry in one transmission
    fn max_apdu_size(&self) -> usize {
        usize::MAX
    }

    /// Whether the link can carry extended-length APDUs
    fn supports_extended_length(&self) -> bool {
        false
    }

    /// Check if the transport is connected to a physical card
    fn is_connected(&self) -> bool;

    /// Close the transport connection
    fn close(&mut self) -> Result<(), TransportError>;
}

impl<T: CardTransport + ?Sized> CardTransport for Box<T> {
    fn transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, TransportError> {
        (**self).transmit_raw(command)
    }

    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, TransportError> {
        (**self).do_transmit_raw(command)
    }

    fn max_apdu_size(&self) -> usize {
        (**self).max_apdu_size()
    }

    fn supports_extended_length(&self) -> bool {
        (**self).supports_extended_length()
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn close(&mut self) -> Result<(), TransportError> {
        (**self).close()
    }
}
