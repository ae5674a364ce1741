//! Scripted transport for tests
//!
//! [`MockTransport`] records every frame it is sent and answers either from a
//! queue of canned responses or from a handler closure that emulates a card.

use std::fmt;

use bytes::Bytes;

use super::{CardTransport, TransportError};

type Handler = Box<dyn FnMut(&[u8]) -> Bytes + Send>;
type Failure = Box<dyn FnMut(&[u8]) -> bool + Send>;

/// Mock transport recording sent frames and replaying scripted responses
pub struct MockTransport {
    /// Mock responses to return, in order; the last one repeats
    pub responses: Vec<Bytes>,
    /// Commands that were sent
    pub commands: Vec<Bytes>,
    /// Whether the transport is connected
    pub connected: bool,
    /// Reported maximum frame size
    pub max_apdu_size: usize,
    /// Reported extended-length support
    pub extended: bool,
    handler: Option<Handler>,
    failure: Option<Failure>,
}

impl MockTransport {
    /// Create a new mock transport with the given responses
    pub fn new(responses: Vec<Bytes>) -> Self {
        Self {
            responses,
            commands: Vec::new(),
            connected: true,
            max_apdu_size: usize::MAX,
            extended: false,
            handler: None,
            failure: None,
        }
    }

    /// Create a new mock transport that always returns the given response
    pub fn with_response(response: Bytes) -> Self {
        Self::new(vec![response])
    }

    /// Create a new mock transport that always returns success (90 00)
    pub fn with_success() -> Self {
        Self::with_response(Bytes::from_static(&[0x90, 0x00]))
    }

    /// Create a mock transport that answers every frame through `handler`
    pub fn with_handler<F>(handler: F) -> Self
    where
        F: FnMut(&[u8]) -> Bytes + Send + 'static,
    {
        let mut transport = Self::new(Vec::new());
        transport.handler = Some(Box::new(handler));
        transport
    }

    /// Fail with [`TransportError::Transmission`] on every frame `fails` matches
    ///
    /// The failing frame is still recorded in [`Self::commands`].
    pub fn with_failure<F>(mut self, fails: F) -> Self
    where
        F: FnMut(&[u8]) -> bool + Send + 'static,
    {
        self.failure = Some(Box::new(fails));
        self
    }

    /// Report extended-length support
    pub fn with_extended(mut self, extended: bool) -> Self {
        self.extended = extended;
        self
    }

    /// Report a maximum frame size
    pub fn with_max_apdu_size(mut self, size: usize) -> Self {
        self.max_apdu_size = size;
        self
    }
}

impl fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockTransport")
            .field("responses", &self.responses.len())
            .field("commands", &self.commands.len())
            .field("connected", &self.connected)
            .field("handler", &self.handler.is_some())
            .field("failure", &self.failure.is_some())
            .finish()
    }
}

impl CardTransport for MockTransport {
    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, TransportError> {
        if !self.connected {
            return Err(TransportError::Connection);
        }

        self.commands.push(Bytes::copy_from_slice(command));

        if let Some(fails) = self.failure.as_mut() {
            if fails(command) {
                return Err(TransportError::Transmission);
            }
        }

        if let Some(handler) = self.handler.as_mut() {
            return Ok(handler(command));
        }

        if self.responses.is_empty() {
            return Err(TransportError::Transmission);
        }

        // Either clone the single response or take the next one
        if self.responses.len() == 1 {
            Ok(self.responses[0].clone())
        } else {
            Ok(self.responses.remove(0))
        }
    }

    fn max_apdu_size(&self) -> usize {
        self.max_apdu_size
    }

    fn supports_extended_length(&self) -> bool {
        self.extended
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::Closed);
        }
        self.connected = false;
        Ok(())
    }
}
