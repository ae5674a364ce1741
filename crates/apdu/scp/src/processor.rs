//! APDU processor applying SCP03 secure messaging

use bytes::{BufMut, Bytes, BytesMut};
use keyport_apdu_core::command::CLA_SECURE_MESSAGING;
use keyport_apdu_core::prelude::*;
use tracing::{debug, trace};

use crate::state::ScpState;

/// Length of the C-MAC appended to every command
const MAC_LEN: usize = 8;

/// Processor wrapping every command in SCP03 C-MAC and C-DECRYPTION and
/// verifying R-MAC and R-ENCRYPTION on responses
///
/// Framing, command chaining and response chaining are delegated to an inner
/// [`ChainedResponseProcessor`] so secured commands can exceed one frame.
#[derive(Debug)]
pub struct ScpProcessor {
    inner: ChainedResponseProcessor,
    state: ScpState,
}

impl ScpProcessor {
    /// Create a new processor over an authenticated channel
    pub const fn new(state: ScpState, config: ProcessorConfig) -> Self {
        Self {
            inner: ChainedResponseProcessor::new(config),
            state,
        }
    }

    /// Channel state
    pub const fn state(&self) -> &ScpState {
        &self.state
    }

    /// Send a command over the secure channel
    ///
    /// With `encrypt` unset the command data is sent in the clear, still
    /// covered by the C-MAC.
    ///
    /// # Errors
    /// [`Error::Security`] when the response fails verification or the
    /// channel is already desynchronized. Either way the channel refuses all
    /// further commands.
    pub fn send_secure(
        &mut self,
        command: &Command,
        encrypt: bool,
        transport: &mut dyn CardTransport,
    ) -> Result<Response> {
        let inner = &mut self.inner;

        self.state.round(|keys, channel| {
            let data = if encrypt {
                channel.encrypt(keys, command.data())?
            } else {
                command.data().to_vec()
            };

            let cla = command.class() | CLA_SECURE_MESSAGING;
            let header = mac_input(
                cla,
                command.instruction(),
                command.p1(),
                command.p2(),
                &data,
                inner.format(),
            );
            let mac = channel.mac(keys, &header);

            let mut secured = BytesMut::with_capacity(data.len() + MAC_LEN);
            secured.put_slice(&data);
            secured.put_slice(&mac);

            let mut wrapped = Command::new_with_data(
                cla,
                command.instruction(),
                command.p1(),
                command.p2(),
                secured.freeze(),
            );
            if let Some(le) = command.expected_length() {
                wrapped = wrapped.with_le(le);
            }
            trace!(command = ?wrapped, encrypted = encrypt, "Sending secured command");

            let response = inner.process_command(&wrapped, transport)?;
            let (payload, status) = response.into_parts();

            let mut plain = Bytes::new();
            if !payload.is_empty() {
                let unmacked = channel.unmac(keys, &payload, status.to_u16())?;
                if !unmacked.is_empty() {
                    plain = Bytes::from(channel.decrypt(keys, unmacked)?);
                }
            }

            Ok(Response::new(plain, status))
        })
    }
}

/// Bytes covered by the C-MAC: header, Lc counting the MAC, and data
///
/// Lc uses the short encoding when it fits one byte in short format, the
/// three-byte extended encoding otherwise. Le is not covered.
fn mac_input(cla: u8, ins: u8, p1: u8, p2: u8, data: &[u8], format: ApduFormat) -> Vec<u8> {
    let lc = data.len() + MAC_LEN;
    let mut out = Vec::with_capacity(7 + data.len());
    out.extend_from_slice(&[cla, ins, p1, p2]);

    if format == ApduFormat::Short && lc <= 0xFF {
        out.push(lc as u8);
    } else {
        out.push(0x00);
        out.extend_from_slice(&(lc as u16).to_be_bytes());
    }
    out.extend_from_slice(data);
    out
}

impl ApduProcessor for ScpProcessor {
    fn do_process_command(
        &mut self,
        command: &Command,
        transport: &mut dyn CardTransport,
    ) -> Result<Response> {
        self.send_secure(command, true, transport)
    }

    fn config(&self) -> &ProcessorConfig {
        self.inner.config()
    }

    fn config_mut(&mut self) -> &mut ProcessorConfig {
        self.inner.config_mut()
    }

    fn close(&mut self) -> Result<()> {
        self.state.close();
        debug!("SCP03 channel closed");
        self.inner.close()
    }
}
