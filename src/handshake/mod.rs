//! Role-specific handshake state machines.
//!
//! Both roles share the same skeleton: pull complete messages from the
//! engine's reassembler in strict message_seq order, validate that each is
//! legal in the current state, advance, and compose the next flight through
//! the engine. The four variants (client/server × full/abbreviated) are
//! tagged states inside the two role machines, not separate types.

mod client;
mod server;

pub use client::ClientHandshaker;
pub use server::ServerHandshaker;

use std::sync::Arc;

use crate::engine::Engine;
use crate::error::Error;
use crate::crypto::EcdsaKey;
use crate::message::{CertificateType, CipherSuite, KeyExchangeAlgorithm};
use crate::service::{CertificateVerifier, PskStore, RawKeyVerifier, SessionCache};
use crate::session::Session;

/// Local identity: a certificate chain (or raw key) plus its private key.
pub struct Credentials {
    pub certificate_chain: Vec<Vec<u8>>,
    pub(crate) key: EcdsaKey,
    pub(crate) spki: Vec<u8>,
}

impl Credentials {
    /// `private_key_der` is a PKCS#8 ECDSA key (P-256 or P-384).
    pub fn new(certificate_chain: Vec<Vec<u8>>, private_key_der: &[u8]) -> Result<Self, Error> {
        let key = EcdsaKey::from_pkcs8_der(private_key_der)?;
        let spki = key.public_spki_der()?;
        Ok(Credentials {
            certificate_chain,
            key,
            spki,
        })
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("certificates", &self.certificate_chain.len())
            .finish_non_exhaustive()
    }
}

/// The pluggable services a handshake consumes (spec-fixed interfaces).
#[derive(Clone, Default)]
pub struct Services {
    pub psk_store: Option<Arc<dyn PskStore>>,
    pub certificate_verifier: Option<Arc<dyn CertificateVerifier>>,
    pub raw_key_verifier: Option<Arc<dyn RawKeyVerifier>>,
    pub session_cache: Option<Arc<dyn SessionCache>>,
    pub credentials: Option<Arc<Credentials>>,
}

impl Services {
    /// Whether a cipher suite is usable with the services present.
    pub(crate) fn supports_suite(&self, suite: CipherSuite, is_client: bool) -> bool {
        match suite.key_exchange_algorithm() {
            KeyExchangeAlgorithm::EcdheEcdsa => {
                if is_client {
                    self.certificate_verifier.is_some() || self.raw_key_verifier.is_some()
                } else {
                    self.credentials.is_some()
                }
            }
            KeyExchangeAlgorithm::Psk | KeyExchangeAlgorithm::EcdhePsk => {
                self.psk_store.is_some()
            }
            KeyExchangeAlgorithm::Unknown => false,
        }
    }

    /// Validate a peer identity blob through the matching verifier.
    pub(crate) fn verify_peer_certificate(
        &self,
        cert_type: CertificateType,
        chain: &[Vec<u8>],
        spki: &[u8],
    ) -> Result<(), Error> {
        match cert_type {
            CertificateType::X509 => {
                let verifier = self.certificate_verifier.as_ref().ok_or_else(|| {
                    Error::CertificateError("no certificate verifier".to_string())
                })?;
                verifier
                    .verify(chain)
                    .map_err(Error::CertificateError)
            }
            CertificateType::RawPublicKey => {
                let verifier = self
                    .raw_key_verifier
                    .as_ref()
                    .ok_or_else(|| Error::CertificateError("no raw key verifier".to_string()))?;
                verifier.verify(spki).map_err(Error::CertificateError)
            }
            CertificateType::Unknown(v) => Err(Error::CertificateError(format!(
                "unsupported certificate type {}",
                v
            ))),
        }
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("psk", &self.psk_store.is_some())
            .field("x509", &self.certificate_verifier.is_some())
            .field("raw_key", &self.raw_key_verifier.is_some())
            .field("session_cache", &self.session_cache.is_some())
            .field("credentials", &self.credentials.is_some())
            .finish()
    }
}

/// One of the two role machines.
pub enum Handshaker {
    Client(Box<ClientHandshaker>),
    Server(Box<ServerHandshaker>),
}

impl Handshaker {
    /// Drive the state machine over everything currently available in the
    /// engine. Returns the established session once, when the handshake
    /// finishes.
    pub fn process(&mut self, engine: &mut Engine) -> Result<Option<Session>, Error> {
        match self {
            Handshaker::Client(h) => h.process(engine),
            Handshaker::Server(h) => h.process(engine),
        }
    }
}

impl std::fmt::Debug for Handshaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Handshaker::Client(_) => write!(f, "Handshaker::Client"),
            Handshaker::Server(_) => write!(f, "Handshaker::Server"),
        }
    }
}
