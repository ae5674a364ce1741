//! Default processor: length encoding, command chaining and response chaining

use bytes::BytesMut;
use tracing::trace;

use super::format::{self, ApduFormat, SHORT_MAX_DATA};
use super::{ApduProcessor, ProcessorConfig};
use crate::command::{CLA_CHAINING, Command, ExpectedLength};
use crate::response::Response;
use crate::transport::CardTransport;
use crate::{Error, Result};

/// Processor that frames commands for the negotiated [`ApduFormat`] and
/// reassembles chained responses
///
/// In short form, data longer than one frame is split with the chaining bit
/// set on every frame but the last; each intermediate frame must be answered
/// with `90 00`. After any exchange, `61 XX` answers are followed up with the
/// configured "get remaining" instruction until a terminal status arrives.
#[derive(Debug, Clone, Default)]
pub struct ChainedResponseProcessor {
    config: ProcessorConfig,
}

impl ChainedResponseProcessor {
    /// Create a new processor with the given configuration
    pub const fn new(config: ProcessorConfig) -> Self {
        Self { config }
    }

    fn exchange(&self, transport: &mut dyn CardTransport, frame: &[u8]) -> Result<Response> {
        let raw = transport.transmit_raw(frame)?;
        Response::from_bytes(&raw)
    }

    /// Send a short-form command, splitting it into chained frames if needed
    fn send_short(
        &self,
        command: &Command,
        transport: &mut dyn CardTransport,
        max_apdu_size: usize,
    ) -> Result<Response> {
        // 5 bytes of header and Lc per frame
        let chunk_size = SHORT_MAX_DATA.min(max_apdu_size.saturating_sub(5)).max(1);
        let data = command.data();
        let mut offset = 0;
        let mut frame_count = 0;

        while data.len() - offset > chunk_size {
            let frame = format::format_apdu(
                command.class() | CLA_CHAINING,
                command.instruction(),
                command.p1(),
                command.p2(),
                &data[offset..offset + chunk_size],
                None,
                ApduFormat::Short,
            )?;
            frame_count += 1;
            trace!(frame = frame_count, offset, chunk_size, "Sending chained command frame");

            let response = self.exchange(transport, &frame)?;
            if !response.is_success() {
                return Err(Error::protocol(format!(
                    "Command chaining aborted by status {} after frame {}",
                    response.status(),
                    frame_count
                )));
            }
            offset += chunk_size;
        }

        let frame = format::format_apdu(
            command.class(),
            command.instruction(),
            command.p1(),
            command.p2(),
            &data[offset..],
            command.expected_length(),
            ApduFormat::Short,
        )?;
        self.exchange(transport, &frame)
    }

    /// Follow `61 XX` answers until a terminal status word is returned
    fn collect_remaining(
        &self,
        response: Response,
        transport: &mut dyn CardTransport,
    ) -> Result<Response> {
        let (payload, mut status) = response.into_parts();
        if !status.is_more_data_available() {
            return Ok(Response::new(payload, status));
        }

        let mut buffer = BytesMut::from(payload.as_ref());
        let mut chain_count = 0usize;

        while let Some(remaining) = status.remaining_bytes() {
            chain_count += 1;
            trace!(remaining, chain_count, "Sending GET RESPONSE command");

            let get_response = Command::new_with_le(
                0x00,
                self.config.ins_send_remaining,
                0x00,
                0x00,
                remaining as ExpectedLength,
            );
            let frame = format::encode(&get_response, ApduFormat::Short)?;
            let response = self.exchange(transport, &frame)?;

            buffer.extend_from_slice(response.payload());
            status = response.status();
        }

        trace!(
            total_data_len = buffer.len(),
            final_sw = %status,
            chain_count,
            "Completed response chaining"
        );

        Ok(Response::new(buffer.freeze(), status))
    }
}

impl ApduProcessor for ChainedResponseProcessor {
    fn do_process_command(
        &mut self,
        command: &Command,
        transport: &mut dyn CardTransport,
    ) -> Result<Response> {
        let max_apdu_size = self.config.max_apdu_size.min(transport.max_apdu_size());

        let response = match self.config.format {
            ApduFormat::Short => self.send_short(command, transport, max_apdu_size)?,
            ApduFormat::Extended => {
                let frame = format::encode(command, ApduFormat::Extended)?;
                if frame.len() > max_apdu_size {
                    return Err(Error::InvalidCommandLength(frame.len()));
                }
                self.exchange(transport, &frame)?
            }
        };

        self.collect_remaining(response, transport)
    }

    fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    fn config_mut(&mut self) -> &mut ProcessorConfig {
        &mut self.config
    }
}
