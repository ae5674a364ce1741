//! authenticatorClientPIN
//!
//! Every operation that sends PIN material first runs a fresh key agreement
//! ([`ClientPin::get_shared_secret`]) and drops the resulting secret when it
//! returns. PINs are validated before anything is sent.

use std::fmt;

use ciborium::Value;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::cbor::{self, key};
use crate::cose::CoseKey;
use crate::ctap::{FidoVersion, Info};
use crate::permissions::Permissions;
use crate::pin::{pin_hash, prepare_pin};
use crate::pin_protocol::{PinUvAuthProtocol, SharedSecret};
use crate::{Error, Result};

/// Sub-command bytes of authenticatorClientPIN
pub mod sub_command {
    /// getPINRetries
    pub const GET_PIN_RETRIES: u8 = 0x01;
    /// getKeyAgreement
    pub const GET_KEY_AGREEMENT: u8 = 0x02;
    /// setPIN
    pub const SET_PIN: u8 = 0x03;
    /// changePIN
    pub const CHANGE_PIN: u8 = 0x04;
    /// getPinToken
    pub const GET_PIN_TOKEN: u8 = 0x05;
    /// getPinUvAuthTokenUsingUvWithPermissions
    pub const GET_TOKEN_USING_UV_WITH_PERMISSIONS: u8 = 0x06;
    /// getUVRetries
    pub const GET_UV_RETRIES: u8 = 0x07;
    /// getPinUvAuthTokenUsingPinWithPermissions
    pub const GET_TOKEN_USING_PIN_WITH_PERMISSIONS: u8 = 0x09;
}

/// Anything that can carry an authenticatorClientPIN exchange
pub trait Ctap2Client {
    /// Send one request and return the decoded response
    fn client_pin(&mut self, request: &ClientPinRequest) -> Result<ClientPinResponse>;
}

impl<T: Ctap2Client + ?Sized> Ctap2Client for &mut T {
    fn client_pin(&mut self, request: &ClientPinRequest) -> Result<ClientPinResponse> {
        (**self).client_pin(request)
    }
}

/// Request parameters of authenticatorClientPIN
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientPinRequest {
    /// pinUvAuthProtocol (0x01)
    pub pin_uv_auth_protocol: u8,
    /// subCommand (0x02)
    pub sub_command: u8,
    /// keyAgreement (0x03)
    pub key_agreement: Option<CoseKey>,
    /// pinUvAuthParam (0x04)
    pub pin_uv_auth_param: Option<Vec<u8>>,
    /// newPinEnc (0x05)
    pub new_pin_enc: Option<Vec<u8>>,
    /// pinHashEnc (0x06)
    pub pin_hash_enc: Option<Vec<u8>>,
    /// permissions (0x09)
    pub permissions: Option<Permissions>,
    /// rpId (0x0A)
    pub rp_id: Option<String>,
}

impl ClientPinRequest {
    /// Request carrying only protocol and sub-command
    pub const fn new(protocol: PinUvAuthProtocol, sub_command: u8) -> Self {
        Self {
            pin_uv_auth_protocol: protocol.version(),
            sub_command,
            key_agreement: None,
            pin_uv_auth_param: None,
            new_pin_enc: None,
            pin_hash_enc: None,
            permissions: None,
            rp_id: None,
        }
    }

    /// CBOR map with keys in ascending order, absent members omitted
    pub fn to_value(&self) -> Value {
        let mut map = vec![
            (key(0x01), key(self.pin_uv_auth_protocol.into())),
            (key(0x02), key(self.sub_command.into())),
        ];
        if let Some(key_agreement) = &self.key_agreement {
            map.push((key(0x03), key_agreement.to_value()));
        }
        if let Some(param) = &self.pin_uv_auth_param {
            map.push((key(0x04), Value::Bytes(param.clone())));
        }
        if let Some(new_pin_enc) = &self.new_pin_enc {
            map.push((key(0x05), Value::Bytes(new_pin_enc.clone())));
        }
        if let Some(pin_hash_enc) = &self.pin_hash_enc {
            map.push((key(0x06), Value::Bytes(pin_hash_enc.clone())));
        }
        if let Some(permissions) = self.permissions {
            map.push((key(0x09), key(permissions.bits().into())));
        }
        if let Some(rp_id) = &self.rp_id {
            map.push((key(0x0A), Value::Text(rp_id.clone())));
        }
        Value::Map(map)
    }

    /// Parse a request map, as an authenticator would
    pub fn from_value(value: &Value) -> Result<Self> {
        let map = cbor::as_map(value)?;
        let bytes = |label| cbor::get(map, label).and_then(cbor::as_bytes).map(<[u8]>::to_vec);

        Ok(Self {
            pin_uv_auth_protocol: cbor::get(map, 0x01)
                .and_then(cbor::as_u8)
                .ok_or(Error::InvalidResponse("Missing pinUvAuthProtocol"))?,
            sub_command: cbor::get(map, 0x02)
                .and_then(cbor::as_u8)
                .ok_or(Error::InvalidResponse("Missing subCommand"))?,
            key_agreement: cbor::get(map, 0x03).map(CoseKey::from_value).transpose()?,
            pin_uv_auth_param: bytes(0x04),
            new_pin_enc: bytes(0x05),
            pin_hash_enc: bytes(0x06),
            permissions: cbor::get(map, 0x09)
                .and_then(cbor::as_u8)
                .map(Permissions::from_bits_retain),
            rp_id: cbor::get(map, 0x0A)
                .and_then(Value::as_text)
                .map(str::to_owned),
        })
    }
}

/// Response members of authenticatorClientPIN
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientPinResponse {
    /// keyAgreement (0x01)
    pub key_agreement: Option<CoseKey>,
    /// Encrypted pinUvAuthToken (0x02)
    pub pin_uv_auth_token: Option<Vec<u8>>,
    /// pinRetries (0x03)
    pub pin_retries: Option<u8>,
    /// powerCycleState (0x04)
    pub power_cycle_state: Option<bool>,
    /// uvRetries (0x05)
    pub uv_retries: Option<u8>,
}

impl ClientPinResponse {
    /// Parse the response map
    pub fn from_value(value: &Value) -> Result<Self> {
        let map = cbor::as_map(value)?;

        Ok(Self {
            key_agreement: cbor::get(map, 0x01).map(CoseKey::from_value).transpose()?,
            pin_uv_auth_token: cbor::get(map, 0x02)
                .and_then(cbor::as_bytes)
                .map(<[u8]>::to_vec),
            pin_retries: cbor::get(map, 0x03).and_then(cbor::as_u8),
            power_cycle_state: cbor::get(map, 0x04).and_then(Value::as_bool),
            uv_retries: cbor::get(map, 0x05).and_then(cbor::as_u8),
        })
    }

    /// CBOR map with keys in ascending order, absent members omitted
    pub fn to_value(&self) -> Value {
        let mut map = Vec::new();
        if let Some(key_agreement) = &self.key_agreement {
            map.push((key(0x01), key_agreement.to_value()));
        }
        if let Some(token) = &self.pin_uv_auth_token {
            map.push((key(0x02), Value::Bytes(token.clone())));
        }
        if let Some(retries) = self.pin_retries {
            map.push((key(0x03), key(retries.into())));
        }
        if let Some(state) = self.power_cycle_state {
            map.push((key(0x04), Value::Bool(state)));
        }
        if let Some(retries) = self.uv_retries {
            map.push((key(0x05), key(retries.into())));
        }
        Value::Map(map)
    }
}

/// Decrypted PIN/UV auth token
#[derive(Clone)]
pub struct PinToken(Zeroizing<Vec<u8>>);

impl PinToken {
    /// Raw token bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Compute `pinUvAuthParam` over `message` with this token
    pub fn authenticate(&self, protocol: PinUvAuthProtocol, message: &[u8]) -> Result<Vec<u8>> {
        protocol.authenticate(&self.0, message)
    }
}

impl fmt::Debug for PinToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PinToken").field(&"<redacted>").finish()
    }
}

/// Client side of authenticatorClientPIN for one protocol version
#[derive(Debug)]
pub struct ClientPin<C> {
    client: C,
    protocol: PinUvAuthProtocol,
    version: FidoVersion,
}

impl<C: Ctap2Client> ClientPin<C> {
    /// Wrap a client speaking `version` with the given PIN/UV auth protocol
    ///
    /// # Errors
    /// [`Error::Unsupported`] for U2F-only authenticators.
    pub fn new(client: C, version: FidoVersion, protocol: PinUvAuthProtocol) -> Result<Self> {
        if version == FidoVersion::U2fV2 {
            return Err(Error::Unsupported("ClientPIN requires FIDO 2.0 or later"));
        }
        Ok(Self {
            client,
            protocol,
            version,
        })
    }

    /// Whether the authenticator supports ClientPIN at all
    pub fn is_supported(info: &Info) -> bool {
        info.options.contains_key("clientPin")
    }

    /// Whether the authenticator issues tokens with permissions
    pub fn is_token_supported(info: &Info) -> bool {
        info.option("pinUvAuthToken") == Some(true)
    }

    /// PIN/UV auth protocol in use
    pub const fn protocol(&self) -> PinUvAuthProtocol {
        self.protocol
    }

    /// Release the client
    pub fn into_inner(self) -> C {
        self.client
    }

    /// Remaining PIN attempts and, if reported, whether a power cycle is needed first
    pub fn get_pin_retries(&mut self) -> Result<(u8, Option<bool>)> {
        debug!("Getting PIN retries");
        let request = ClientPinRequest::new(self.protocol, sub_command::GET_PIN_RETRIES);
        let response = self.client.client_pin(&request)?;

        let retries = response
            .pin_retries
            .ok_or(Error::InvalidResponse("Missing pinRetries"))?;
        Ok((retries, response.power_cycle_state))
    }

    /// Remaining built-in user verification attempts
    pub fn get_uv_retries(&mut self) -> Result<u8> {
        if self.version < FidoVersion::Fido2_1 {
            return Err(Error::Unsupported("UV retries require FIDO 2.1"));
        }
        debug!("Getting UV retries");
        let request = ClientPinRequest::new(self.protocol, sub_command::GET_UV_RETRIES);
        self.client
            .client_pin(&request)?
            .uv_retries
            .ok_or(Error::InvalidResponse("Missing uvRetries"))
    }

    /// Run a key agreement with the authenticator
    ///
    /// Returns the platform key to send with the next request and the secret
    /// both sides now share.
    pub fn get_shared_secret(&mut self) -> Result<(CoseKey, SharedSecret)> {
        debug!("Getting shared secret");
        let request = ClientPinRequest::new(self.protocol, sub_command::GET_KEY_AGREEMENT);
        let peer = self
            .client
            .client_pin(&request)?
            .key_agreement
            .ok_or(Error::InvalidResponse("Missing keyAgreement"))?;
        self.protocol.encapsulate(&peer)
    }

    /// Obtain a PIN/UV auth token
    ///
    /// FIDO 2.1 authenticators get `permissions` and `rp_id` and may be
    /// unlocked with built-in user verification by passing no PIN. Older
    /// authenticators always need a PIN and ignore permissions.
    pub fn get_pin_token(
        &mut self,
        pin: Option<&str>,
        permissions: Option<Permissions>,
        rp_id: Option<&str>,
    ) -> Result<PinToken> {
        let pin_hash = pin.map(pin_hash).transpose()?;

        let sub_command = match (self.version, &pin_hash) {
            (FidoVersion::Fido2_1, Some(_)) => sub_command::GET_TOKEN_USING_PIN_WITH_PERMISSIONS,
            (FidoVersion::Fido2_1, None) => sub_command::GET_TOKEN_USING_UV_WITH_PERMISSIONS,
            (_, Some(_)) => sub_command::GET_PIN_TOKEN,
            (_, None) => return Err(Error::InvalidPin("PIN required before FIDO 2.1")),
        };

        let (platform_key, secret) = self.get_shared_secret()?;
        let mut request = ClientPinRequest::new(self.protocol, sub_command);
        request.key_agreement = Some(platform_key);
        if let Some(pin_hash) = &pin_hash {
            request.pin_hash_enc = Some(self.protocol.encrypt(&secret, pin_hash.as_slice())?);
        }
        if sub_command != sub_command::GET_PIN_TOKEN {
            request.permissions = permissions;
            request.rp_id = rp_id.map(str::to_owned);
        }

        debug!(sub_command, "Getting PIN token");
        let encrypted = self
            .client
            .client_pin(&request)?
            .pin_uv_auth_token
            .ok_or(Error::InvalidResponse("Missing pinUvAuthToken"))?;
        Ok(PinToken(self.protocol.decrypt(&secret, &encrypted)?))
    }

    /// Set the PIN of an authenticator that has none
    pub fn set_pin(&mut self, pin: &str) -> Result<()> {
        let padded = prepare_pin(pin, true)?;
        let (platform_key, secret) = self.get_shared_secret()?;

        let new_pin_enc = self.protocol.encrypt(&secret, &padded)?;
        let mut request = ClientPinRequest::new(self.protocol, sub_command::SET_PIN);
        request.key_agreement = Some(platform_key);
        request.pin_uv_auth_param =
            Some(self.protocol.authenticate(secret.auth_key(), &new_pin_enc)?);
        request.new_pin_enc = Some(new_pin_enc);
        request.permissions = Some(Permissions::CREDENTIAL_MANAGEMENT);

        debug!("Setting PIN");
        self.client.client_pin(&request)?;
        info!("PIN set");
        Ok(())
    }

    /// Replace the current PIN
    pub fn change_pin(&mut self, current_pin: &str, new_pin: &str) -> Result<()> {
        let padded = prepare_pin(new_pin, true)?;
        let current_hash = pin_hash(current_pin)?;
        let (platform_key, secret) = self.get_shared_secret()?;

        let pin_hash_enc = self.protocol.encrypt(&secret, current_hash.as_slice())?;
        let new_pin_enc = self.protocol.encrypt(&secret, &padded)?;
        let message = [new_pin_enc.as_slice(), pin_hash_enc.as_slice()].concat();

        let mut request = ClientPinRequest::new(self.protocol, sub_command::CHANGE_PIN);
        request.key_agreement = Some(platform_key);
        request.pin_uv_auth_param = Some(self.protocol.authenticate(secret.auth_key(), &message)?);
        request.new_pin_enc = Some(new_pin_enc);
        request.pin_hash_enc = Some(pin_hash_enc);
        if self.version != FidoVersion::Fido2_0 {
            request.permissions = Some(Permissions::CREDENTIAL_MANAGEMENT);
        }

        debug!("Changing PIN");
        self.client.client_pin(&request)?;
        info!("PIN changed");
        Ok(())
    }
}
