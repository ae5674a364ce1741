//! CTAP2 over ISO 7816 APDUs
//!
//! The FIDO applet takes CTAP2 commands wrapped in a proprietary APDU,
//! `80 10 00 00 <cmd || cbor>`. The first byte of every response is the CTAP
//! status, the rest an optional CBOR map.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use ciborium::Value;
use keyport_apdu_core::prelude::{ApduFormat, Command, Executor, SessionState};
use tracing::{debug, trace};

use crate::client_pin::{ClientPinRequest, ClientPinResponse, Ctap2Client};
use crate::error::CtapStatus;
use crate::{Error, Result, cbor};

/// AID of the FIDO applet
pub const FIDO_AID: [u8; 8] = [0xA0, 0x00, 0x00, 0x06, 0x47, 0x2F, 0x00, 0x01];

/// CLA of the CTAP2 message APDU
pub const CLA_CTAP: u8 = 0x80;
/// INS of the CTAP2 message APDU
pub const INS_CTAP_MSG: u8 = 0x10;

/// CTAP2 command bytes
pub mod command {
    /// authenticatorMakeCredential
    pub const MAKE_CREDENTIAL: u8 = 0x01;
    /// authenticatorGetAssertion
    pub const GET_ASSERTION: u8 = 0x02;
    /// authenticatorGetInfo
    pub const GET_INFO: u8 = 0x04;
    /// authenticatorClientPIN
    pub const CLIENT_PIN: u8 = 0x06;
    /// authenticatorReset
    pub const RESET: u8 = 0x07;
    /// authenticatorGetNextAssertion
    pub const GET_NEXT_ASSERTION: u8 = 0x08;
    /// authenticatorBioEnrollment
    pub const BIO_ENROLLMENT: u8 = 0x09;
    /// authenticatorCredentialManagement
    pub const CREDENTIAL_MANAGEMENT: u8 = 0x0A;
    /// authenticatorSelection
    pub const SELECTION: u8 = 0x0B;
    /// authenticatorLargeBlobs
    pub const LARGE_BLOBS: u8 = 0x0C;
    /// authenticatorConfig
    pub const CONFIG: u8 = 0x0D;
    /// Vendor prototype of authenticatorBioEnrollment (FIDO_2_1_PRE)
    pub const BIO_ENROLLMENT_PRE: u8 = 0x40;
    /// Vendor prototype of authenticatorCredentialManagement (FIDO_2_1_PRE)
    pub const CREDENTIAL_MANAGEMENT_PRE: u8 = 0x41;
}

/// Protocol version an authenticator implements, ordered oldest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FidoVersion {
    /// CTAP1 / U2F only
    U2fV2,
    /// CTAP 2.0
    Fido2_0,
    /// CTAP 2.1 preview
    Fido2_1Pre,
    /// CTAP 2.1
    Fido2_1,
}

impl FidoVersion {
    /// Version string as reported by authenticatorGetInfo
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::U2fV2 => "U2F_V2",
            Self::Fido2_0 => "FIDO_2_0",
            Self::Fido2_1Pre => "FIDO_2_1_PRE",
            Self::Fido2_1 => "FIDO_2_1",
        }
    }

    /// Highest known version among the reported strings
    pub fn from_versions<S: AsRef<str>>(versions: &[S]) -> Option<Self> {
        versions.iter().filter_map(|v| v.as_ref().parse().ok()).max()
    }
}

impl FromStr for FidoVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "U2F_V2" => Ok(Self::U2fV2),
            "FIDO_2_0" => Ok(Self::Fido2_0),
            "FIDO_2_1_PRE" => Ok(Self::Fido2_1Pre),
            "FIDO_2_1" => Ok(Self::Fido2_1),
            _ => Err(Error::Unsupported("Unknown FIDO version")),
        }
    }
}

impl fmt::Display for FidoVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response to authenticatorGetInfo
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Info {
    /// Supported protocol versions (0x01)
    pub versions: Vec<String>,
    /// Supported extensions (0x02)
    pub extensions: Vec<String>,
    /// Authenticator model identifier (0x03)
    pub aaguid: Vec<u8>,
    /// Options and their current state (0x04)
    pub options: BTreeMap<String, bool>,
    /// Maximum message size (0x05)
    pub max_msg_size: Option<u64>,
    /// Supported PIN/UV auth protocols, in order of preference (0x06)
    pub pin_uv_auth_protocols: Vec<u8>,
    /// Current minimum PIN length (0x0D)
    pub min_pin_length: Option<u64>,
    /// Firmware version (0x0E)
    pub firmware_version: Option<u64>,
}

impl Info {
    /// Parse the response map
    pub fn from_value(value: &Value) -> Result<Self> {
        let map = cbor::as_map(value)?;

        let texts = |label: i64| -> Vec<String> {
            match cbor::get(map, label) {
                Some(Value::Array(items)) => items
                    .iter()
                    .filter_map(|item| item.as_text().map(str::to_owned))
                    .collect(),
                _ => Vec::new(),
            }
        };
        let unsigned = |label: i64| {
            cbor::get(map, label)
                .and_then(cbor::as_i64)
                .and_then(|v| u64::try_from(v).ok())
        };

        let versions = texts(0x01);
        if versions.is_empty() {
            return Err(Error::InvalidResponse("getInfo without versions"));
        }

        let options = match cbor::get(map, 0x04) {
            Some(Value::Map(entries)) => entries
                .iter()
                .filter_map(|(k, v)| Some((k.as_text()?.to_owned(), v.as_bool()?)))
                .collect(),
            _ => BTreeMap::new(),
        };

        let pin_uv_auth_protocols = match cbor::get(map, 0x06) {
            Some(Value::Array(items)) => items.iter().filter_map(cbor::as_u8).collect(),
            _ => Vec::new(),
        };

        Ok(Self {
            versions,
            extensions: texts(0x02),
            aaguid: cbor::get(map, 0x03)
                .and_then(cbor::as_bytes)
                .map(<[u8]>::to_vec)
                .unwrap_or_default(),
            options,
            max_msg_size: unsigned(0x05),
            pin_uv_auth_protocols,
            min_pin_length: unsigned(0x0D),
            firmware_version: unsigned(0x0E),
        })
    }

    /// Highest protocol version listed
    pub fn fido_version(&self) -> Option<FidoVersion> {
        FidoVersion::from_versions(&self.versions)
    }

    /// State of an option, `None` when the authenticator does not list it
    pub fn option(&self, name: &str) -> Option<bool> {
        self.options.get(name).copied()
    }
}

/// CTAP2 session over an APDU executor
#[derive(Debug)]
pub struct Ctap2Session<E: Executor> {
    executor: E,
    info: Info,
    state: SessionState,
}

impl<E: Executor> Ctap2Session<E> {
    /// Select the FIDO applet and read the authenticator info
    ///
    /// Switches to extended APDUs when the transport supports them.
    pub fn new(mut executor: E) -> Result<Self> {
        let mut state = SessionState::default();
        executor.select(&FIDO_AID)?;
        state.advance(SessionState::Selected);
        if executor.supports_extended_length() {
            executor.set_format(ApduFormat::Extended)?;
        }

        let mut session = Self {
            executor,
            info: Info::default(),
            state,
        };
        session.info = session.get_info()?;
        session.state.advance(SessionState::Ready);
        debug!(versions = ?session.info.versions, "CTAP2 session opened");
        Ok(session)
    }

    /// Authenticator info read when the session was opened
    pub const fn info(&self) -> &Info {
        &self.info
    }

    /// Lifecycle state of the session
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Underlying executor
    pub fn executor(&mut self) -> &mut E {
        &mut self.executor
    }

    /// Release the executor
    pub fn into_executor(self) -> E {
        self.executor
    }

    /// Send a CTAP2 command and decode the CBOR response, if any
    ///
    /// # Errors
    /// [`Error::Ctap`] when the authenticator answers with a non-zero status,
    /// [`Error::InvalidState`] once the session is closed.
    pub fn send_cbor(&mut self, cmd: u8, payload: Option<&Value>) -> Result<Option<Value>> {
        if self.state == SessionState::Closed {
            return Err(Error::InvalidState("Session is closed"));
        }
        let mut data = vec![cmd];
        if let Some(payload) = payload {
            data.extend(cbor::encode(payload)?);
        }
        trace!(cmd, len = data.len(), "Sending CTAP2 command");

        let command = Command::new_with_data(CLA_CTAP, INS_CTAP_MSG, 0x00, 0x00, data);
        let response = self.executor.send_and_receive(&command)?;

        let Some((&status, body)) = response.split_first() else {
            return Err(Error::InvalidResponse("Empty CTAP2 response"));
        };
        if status != CtapStatus::OK.0 {
            debug!(status = %CtapStatus(status), cmd, "CTAP2 command failed");
            return Err(Error::Ctap(CtapStatus(status)));
        }

        if body.is_empty() {
            Ok(None)
        } else {
            cbor::decode(body).map(Some)
        }
    }

    /// authenticatorGetInfo
    pub fn get_info(&mut self) -> Result<Info> {
        let value = self
            .send_cbor(command::GET_INFO, None)?
            .ok_or(Error::InvalidResponse("Empty getInfo response"))?;
        Info::from_value(&value)
    }

    /// authenticatorReset
    pub fn reset(&mut self) -> Result<()> {
        self.send_cbor(command::RESET, None)?;
        debug!("Authenticator reset");
        Ok(())
    }

    /// authenticatorSelection, FIDO 2.1 only
    pub fn selection(&mut self) -> Result<()> {
        if self.info.fido_version() < Some(FidoVersion::Fido2_1) {
            return Err(Error::Unsupported("authenticatorSelection requires FIDO 2.1"));
        }
        self.send_cbor(command::SELECTION, None)?;
        Ok(())
    }

    /// Close the session and the underlying executor; safe to call more than once
    pub fn close(&mut self) -> Result<()> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        self.state.advance(SessionState::Closed);
        debug!("Closing CTAP2 session");
        self.executor.close()?;
        Ok(())
    }
}

impl<E: Executor> Ctap2Client for Ctap2Session<E> {
    fn client_pin(&mut self, request: &ClientPinRequest) -> Result<ClientPinResponse> {
        match self.send_cbor(command::CLIENT_PIN, Some(&request.to_value()))? {
            Some(value) => ClientPinResponse::from_value(&value),
            None => Ok(ClientPinResponse::default()),
        }
    }
}
