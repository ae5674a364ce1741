//! Executor for APDU command execution
//!
//! An executor owns a transport and the active [`ApduProcessor`], and is the
//! single entry point application sessions use to talk to a card. Secure
//! messaging is layered in by swapping the processor.

use std::fmt;

use bytes::Bytes;
use tracing::{debug, instrument, trace, warn};

use crate::command::Command;
use crate::processor::{ApduFormat, ApduProcessor, ChainedResponseProcessor, MaxApduSize};
use crate::response::Response;
use crate::response::status::StatusWord;
use crate::transport::CardTransport;
use crate::{Error, Result, Version};

/// Instruction byte of SELECT
pub const INS_SELECT: u8 = 0xA4;
/// P1 of SELECT by DF name
pub const P1_SELECT_BY_NAME: u8 = 0x04;

/// Trait for APDU command execution
pub trait Executor: Send + fmt::Debug {
    /// Transmit a command through the active processor
    ///
    /// The returned response may carry any status word; use
    /// [`Executor::send_and_receive`] to turn failures into errors.
    #[instrument(level = "trace", skip(self), fields(executor = std::any::type_name::<Self>()))]
    fn transmit(&mut self, command: &Command) -> Result<Response> {
        let response = self.do_transmit(command);
        match &response {
            Ok(response) => {
                trace!(status = %response.status(), len = response.payload().len(), "Received response");
            }
            Err(err) => {
                debug!(error = ?err, "Error during transmission");
            }
        }
        response
    }

    /// Internal implementation of transmit
    fn do_transmit(&mut self, command: &Command) -> Result<Response>;

    /// Transmit a command and return its payload, failing on non-success status
    fn send_and_receive(&mut self, command: &Command) -> Result<Bytes> {
        self.transmit(command)?.into_result()
    }

    /// Select an application by AID
    fn select(&mut self, aid: &[u8]) -> Result<Bytes> {
        let command = Command::new_with_data(
            0x00,
            INS_SELECT,
            P1_SELECT_BY_NAME,
            0x00,
            Bytes::copy_from_slice(aid),
        );
        self.send_and_receive(&command)
    }

    /// Select an application, activating it first if the card reports one of
    /// `statuses`
    ///
    /// The activation command is sent at most once; a second failing select
    /// is returned to the caller.
    fn select_with_activation(
        &mut self,
        aid: &[u8],
        activate: &Command,
        statuses: &[StatusWord],
    ) -> Result<Bytes> {
        match self.select(aid) {
            Ok(payload) => Ok(payload),
            Err(err) => match err.status_word() {
                Some(status) if statuses.contains(&status) => {
                    warn!(%status, aid = %hex::encode(aid), "Application not active, activating");
                    self.send_and_receive(activate)?;
                    self.select(aid)
                }
                _ => Err(err),
            },
        }
    }

    /// The active processor
    fn processor(&self) -> &dyn ApduProcessor;

    /// Mutable access to the active processor
    fn processor_mut(&mut self) -> &mut dyn ApduProcessor;

    /// Replace the active processor, returning the previous one
    fn set_processor(&mut self, processor: Box<dyn ApduProcessor>) -> Box<dyn ApduProcessor>;

    /// The transport below the processor
    fn card_transport(&mut self) -> &mut dyn CardTransport;

    /// Whether the transport can carry extended-length APDUs
    fn supports_extended_length(&self) -> bool;

    /// Switch the length encoding of outgoing commands
    ///
    /// # Errors
    /// [`Error::Unsupported`] when extended form is requested on a transport
    /// that cannot carry it.
    fn set_format(&mut self, format: ApduFormat) -> Result<()> {
        if format == ApduFormat::Extended && !self.supports_extended_length() {
            return Err(Error::unsupported("Transport does not support extended APDUs"));
        }
        debug!(%format, "Setting APDU format");
        self.processor_mut().set_format(format);
        Ok(())
    }

    /// Apply firmware-specific limits for the given device version
    fn enable_workarounds(&mut self, version: &Version) {
        let max_apdu_size = MaxApduSize::for_version(version);
        debug!(%version, max_apdu_size, "Enabling device workarounds");
        self.processor_mut().config_mut().max_apdu_size = max_apdu_size;
    }

    /// Close the processor and the transport
    fn close(&mut self) -> Result<()>;
}

/// Card executor combining a transport with a single active processor
pub struct CardExecutor<T: CardTransport> {
    /// The transport used for communication
    transport: T,
    /// Processor every command goes through
    processor: Box<dyn ApduProcessor>,
}

impl<T: CardTransport> fmt::Debug for CardExecutor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CardExecutor")
            .field("transport", &self.transport)
            .field("processor", &self.processor)
            .finish()
    }
}

impl<T: CardTransport> CardExecutor<T> {
    /// Create a new card executor with the default chaining processor
    pub fn new(transport: T) -> Self {
        Self::with_processor(transport, Box::new(ChainedResponseProcessor::default()))
    }

    /// Create a new card executor with the given processor
    pub fn with_processor(transport: T, processor: Box<dyn ApduProcessor>) -> Self {
        Self { transport, processor }
    }

    /// Get a reference to the underlying transport
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Get a mutable reference to the underlying transport
    pub const fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Take ownership of the transport and return it
    pub fn into_transport(self) -> T {
        self.transport
    }
}

impl<T: CardTransport> Executor for CardExecutor<T> {
    fn do_transmit(&mut self, command: &Command) -> Result<Response> {
        self.processor.process_command(command, &mut self.transport)
    }

    fn processor(&self) -> &dyn ApduProcessor {
        self.processor.as_ref()
    }

    fn processor_mut(&mut self) -> &mut dyn ApduProcessor {
        self.processor.as_mut()
    }

    fn set_processor(&mut self, processor: Box<dyn ApduProcessor>) -> Box<dyn ApduProcessor> {
        std::mem::replace(&mut self.processor, processor)
    }

    fn card_transport(&mut self) -> &mut dyn CardTransport {
        &mut self.transport
    }

    fn supports_extended_length(&self) -> bool {
        self.transport.supports_extended_length()
    }

    fn close(&mut self) -> Result<()> {
        let processor = self.processor.close();
        if self.transport.is_connected() {
            self.transport.close()?;
        }
        debug!("Executor closed");
        processor
    }
}
