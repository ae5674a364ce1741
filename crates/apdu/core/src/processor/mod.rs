//! Command processors for APDU transformations
//!
//! A processor turns one logical [`Command`] into the wire frames a card
//! expects and folds the card's answers back into one logical [`Response`].
//! The default [`ChainedResponseProcessor`] handles length encoding and both
//! directions of chaining; secure messaging processors wrap it.

pub mod chained;
pub mod format;

use std::fmt;

use tracing::{debug, trace};

pub use chained::ChainedResponseProcessor;
pub use format::{ApduFormat, format_apdu};

use crate::command::Command;
use crate::response::Response;
use crate::transport::CardTransport;
use crate::{Result, Version};

/// Known frame size limits of YubiKey firmware families
#[derive(Debug, Clone, Copy)]
pub struct MaxApduSize;

impl MaxApduSize {
    /// YubiKey NEO
    pub const NEO: usize = 1390;
    /// YubiKey 4
    pub const YK4: usize = 2038;
    /// YubiKey 4.3 and later
    pub const YK4_3: usize = 3062;

    /// Frame size limit for a firmware version
    pub fn for_version(version: &Version) -> usize {
        if version.is_at_least(4, 3, 0) {
            Self::YK4_3
        } else if version.is_at_least(4, 0, 0) {
            Self::YK4
        } else {
            Self::NEO
        }
    }
}

/// Default instruction used to fetch the remainder of a chained response
pub const INS_GET_RESPONSE: u8 = 0xC0;

/// Processor configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorConfig {
    /// Length encoding of outgoing frames
    pub format: ApduFormat,
    /// Largest frame this processor will emit
    pub max_apdu_size: usize,
    /// Instruction byte of the "get remaining" command
    pub ins_send_remaining: u8,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            format: ApduFormat::Short,
            max_apdu_size: MaxApduSize::NEO,
            ins_send_remaining: INS_GET_RESPONSE,
        }
    }
}

impl ProcessorConfig {
    /// Set the length encoding
    pub const fn with_format(mut self, format: ApduFormat) -> Self {
        self.format = format;
        self
    }

    /// Set the largest frame size
    pub const fn with_max_apdu_size(mut self, max_apdu_size: usize) -> Self {
        self.max_apdu_size = max_apdu_size;
        self
    }

    /// Set the "get remaining" instruction byte
    pub const fn with_ins_send_remaining(mut self, ins: u8) -> Self {
        self.ins_send_remaining = ins;
        self
    }
}

/// Trait for command processors which transform commands
/// before sending them to the transport
pub trait ApduProcessor: Send + fmt::Debug {
    /// Process a command through this processor
    ///
    /// This method takes a command, potentially transforms it, sends it through
    /// the transport, and potentially transforms the response.
    fn process_command(
        &mut self,
        command: &Command,
        transport: &mut dyn CardTransport,
    ) -> Result<Response> {
        trace!(
            command = ?command,
            processor = std::any::type_name::<Self>(),
            "Processing command"
        );

        let result = self.do_process_command(command, transport);

        match &result {
            Ok(response) => {
                trace!(
                    status = %response.status(),
                    payload_len = response.payload().len(),
                    "Processed response"
                );
            }
            Err(e) => {
                debug!(error = ?e, "Error during command processing");
            }
        }

        result
    }

    /// Internal implementation of process_command
    fn do_process_command(
        &mut self,
        command: &Command,
        transport: &mut dyn CardTransport,
    ) -> Result<Response>;

    /// Current configuration
    fn config(&self) -> &ProcessorConfig;

    /// Mutable access to the configuration
    fn config_mut(&mut self) -> &mut ProcessorConfig;

    /// Length encoding used for outgoing frames
    fn format(&self) -> ApduFormat {
        self.config().format
    }

    /// Switch the length encoding used for outgoing frames
    fn set_format(&mut self, format: ApduFormat) {
        self.config_mut().format = format;
    }

    /// Release any state held by the processor
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<P: ApduProcessor + ?Sized> ApduProcessor for Box<P> {
    fn process_command(
        &mut self,
        command: &Command,
        transport: &mut dyn CardTransport,
    ) -> Result<Response> {
        (**self).process_command(command, transport)
    }

    fn do_process_command(
        &mut self,
        command: &Command,
        transport: &mut dyn CardTransport,
    ) -> Result<Response> {
        (**self).do_process_command(command, transport)
    }

    fn config(&self) -> &ProcessorConfig {
        (**self).config()
    }

    fn config_mut(&mut self) -> &mut ProcessorConfig {
        (**self).config_mut()
    }

    fn format(&self) -> ApduFormat {
        (**self).format()
    }

    fn set_format(&mut self, format: ApduFormat) {
        (**self).set_format(format);
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}
