//! In-memory authenticator answering authenticatorClientPIN, for tests

use p256::SecretKey;

use crate::client_pin::{ClientPinRequest, ClientPinResponse, Ctap2Client, sub_command};
use crate::cose::CoseKey;
use crate::error::CtapStatus;
use crate::pin_protocol::{PinUvAuthProtocol, SharedSecret};
use crate::{Error, Result};

const TOKEN: [u8; 32] = [0x5A; 32];

/// Authenticator state plus a log of every request it received
#[derive(Debug)]
pub(crate) struct MockAuthenticator {
    key: SecretKey,
    key_seed: u8,
    pin_hash: Option<[u8; 16]>,
    pin_retries: u8,
    uv_retries: u8,
    /// Replace the key agreement key right after handing it out
    pub(crate) rotate_key_after_agreement: bool,
    pub(crate) requests: Vec<ClientPinRequest>,
}

impl MockAuthenticator {
    /// Authenticator without a PIN
    pub(crate) fn new() -> Self {
        Self {
            key: Self::key_from_seed(1),
            key_seed: 1,
            pin_hash: None,
            pin_retries: 8,
            uv_retries: 3,
            rotate_key_after_agreement: false,
            requests: Vec::new(),
        }
    }

    /// Authenticator with `pin` already set
    pub(crate) fn with_pin(pin: &str) -> Self {
        let mut authenticator = Self::new();
        authenticator.pin_hash = Some(*crate::pin::pin_hash(pin).unwrap());
        authenticator
    }

    pub(crate) const fn token(&self) -> &[u8] {
        &TOKEN
    }

    fn key_from_seed(seed: u8) -> SecretKey {
        SecretKey::from_slice(&[seed; 32]).unwrap()
    }

    fn shared_secret(&self, request: &ClientPinRequest) -> Result<(PinUvAuthProtocol, SharedSecret)> {
        let protocol = PinUvAuthProtocol::from_version(request.pin_uv_auth_protocol)
            .ok_or(Error::Ctap(CtapStatus::INVALID_PARAMETER))?;
        let platform = request
            .key_agreement
            .as_ref()
            .ok_or(Error::Ctap(CtapStatus::MISSING_PARAMETER))?
            .to_public_key()?;

        let shared = p256::ecdh::diffie_hellman(self.key.to_nonzero_scalar(), platform.as_affine());
        Ok((protocol, protocol.kdf(shared.raw_secret_bytes())?))
    }

    fn verify_param(
        protocol: PinUvAuthProtocol,
        secret: &SharedSecret,
        request: &ClientPinRequest,
        message: &[u8],
    ) -> Result<()> {
        let expected = protocol.authenticate(secret.auth_key(), message)?;
        if request.pin_uv_auth_param.as_deref() == Some(expected.as_slice()) {
            Ok(())
        } else {
            Err(Error::Ctap(CtapStatus::PIN_AUTH_INVALID))
        }
    }

    fn check_pin_hash(
        &mut self,
        protocol: PinUvAuthProtocol,
        secret: &SharedSecret,
        request: &ClientPinRequest,
    ) -> Result<()> {
        let stored = self.pin_hash.ok_or(Error::Ctap(CtapStatus::PIN_NOT_SET))?;
        if self.pin_retries == 0 {
            return Err(Error::Ctap(CtapStatus::PIN_BLOCKED));
        }
        let encrypted = request
            .pin_hash_enc
            .as_ref()
            .ok_or(Error::Ctap(CtapStatus::MISSING_PARAMETER))?;

        if protocol.decrypt(secret, encrypted)?.as_slice() == stored {
            self.pin_retries = 8;
            Ok(())
        } else {
            self.pin_retries -= 1;
            Err(Error::Ctap(CtapStatus::PIN_INVALID))
        }
    }

    fn store_new_pin(
        &mut self,
        protocol: PinUvAuthProtocol,
        secret: &SharedSecret,
        request: &ClientPinRequest,
    ) -> Result<()> {
        let encrypted = request
            .new_pin_enc
            .as_ref()
            .ok_or(Error::Ctap(CtapStatus::MISSING_PARAMETER))?;
        let padded = protocol.decrypt(secret, encrypted)?;
        let end = padded.iter().position(|b| *b == 0).unwrap_or(padded.len());
        let pin = std::str::from_utf8(&padded[..end])
            .map_err(|_| Error::Ctap(CtapStatus::PIN_POLICY_VIOLATION))?;
        self.pin_hash = Some(*crate::pin::pin_hash(pin)?);
        Ok(())
    }

    fn encrypted_token(
        protocol: PinUvAuthProtocol,
        secret: &SharedSecret,
    ) -> Result<ClientPinResponse> {
        Ok(ClientPinResponse {
            pin_uv_auth_token: Some(protocol.encrypt(secret, &TOKEN)?),
            ..Default::default()
        })
    }

    fn handle(&mut self, request: &ClientPinRequest) -> Result<ClientPinResponse> {
        match request.sub_command {
            sub_command::GET_PIN_RETRIES => Ok(ClientPinResponse {
                pin_retries: Some(self.pin_retries),
                power_cycle_state: Some(false),
                ..Default::default()
            }),
            sub_command::GET_UV_RETRIES => Ok(ClientPinResponse {
                uv_retries: Some(self.uv_retries),
                ..Default::default()
            }),
            sub_command::GET_KEY_AGREEMENT => {
                let response = ClientPinResponse {
                    key_agreement: Some(CoseKey::from_public_key(&self.key.public_key())),
                    ..Default::default()
                };
                if self.rotate_key_after_agreement {
                    self.key_seed = self.key_seed.wrapping_add(1);
                    self.key = Self::key_from_seed(self.key_seed);
                }
                Ok(response)
            }
            sub_command::SET_PIN => {
                if self.pin_hash.is_some() {
                    return Err(Error::Ctap(CtapStatus::NOT_ALLOWED));
                }
                let (protocol, secret) = self.shared_secret(request)?;
                let new_pin_enc = request.new_pin_enc.clone().unwrap_or_default();
                Self::verify_param(protocol, &secret, request, &new_pin_enc)?;
                self.store_new_pin(protocol, &secret, request)?;
                Ok(ClientPinResponse::default())
            }
            sub_command::CHANGE_PIN => {
                let (protocol, secret) = self.shared_secret(request)?;
                let message = [
                    request.new_pin_enc.clone().unwrap_or_default(),
                    request.pin_hash_enc.clone().unwrap_or_default(),
                ]
                .concat();
                Self::verify_param(protocol, &secret, request, &message)?;
                self.check_pin_hash(protocol, &secret, request)?;
                self.store_new_pin(protocol, &secret, request)?;
                Ok(ClientPinResponse::default())
            }
            sub_command::GET_PIN_TOKEN | sub_command::GET_TOKEN_USING_PIN_WITH_PERMISSIONS => {
                let (protocol, secret) = self.shared_secret(request)?;
                self.check_pin_hash(protocol, &secret, request)?;
                Self::encrypted_token(protocol, &secret)
            }
            sub_command::GET_TOKEN_USING_UV_WITH_PERMISSIONS => {
                let (protocol, secret) = self.shared_secret(request)?;
                Self::encrypted_token(protocol, &secret)
            }
            _ => Err(Error::Ctap(CtapStatus::INVALID_SUBCOMMAND)),
        }
    }
}

impl Ctap2Client for MockAuthenticator {
    fn client_pin(&mut self, request: &ClientPinRequest) -> Result<ClientPinResponse> {
        self.requests.push(request.clone());
        self.handle(request)
    }
}
