//! Service callbacks the endpoint consumes.
//!
//! Key material lookup, certificate validation and the session cache are
//! application concerns; the endpoint only fixes their interfaces.

use zeroize::Zeroizing;

use crate::message::SessionId;
use crate::session::SessionTicket;

/// Pre-shared key lookup.
pub trait PskStore: Send + Sync {
    /// Resolve an identity to its key, scoped to the indicated server name
    /// when SNI is in use. `None` fails the handshake with
    /// unknown_psk_identity.
    fn key(&self, server_name: Option<&str>, identity: &[u8]) -> Option<Zeroizing<Vec<u8>>>;

    /// The identity a client should present to this server. Required for
    /// clients offering PSK suites.
    fn identity(&self, server_name: Option<&str>) -> Option<Vec<u8>>;
}

/// X.509 chain validation. Trust anchors and path building live behind this.
pub trait CertificateVerifier: Send + Sync {
    /// `chain` is leaf first. Return an error description on rejection.
    fn verify(&self, chain: &[Vec<u8>]) -> Result<(), String>;
}

/// Raw-public-key validation (RFC 7250): typically a whitelist check.
pub trait RawKeyVerifier: Send + Sync {
    fn verify(&self, spki: &[u8]) -> Result<(), String>;
}

/// Server-side session cache consulted for abbreviated handshakes.
pub trait SessionCache: Send + Sync {
    fn get(&self, session_id: &SessionId) -> Option<SessionTicket>;

    /// Record an established session so it can later be resumed.
    fn put(&self, ticket: SessionTicket);

    /// Drop a session (fatal alert or eviction).
    fn remove(&self, session_id: &SessionId);
}

/// A verifier that accepts any certificate. Useful for tests and for
/// deployments pinning identity at the application layer.
#[derive(Debug, Default)]
pub struct InsecureAcceptAll;

impl CertificateVerifier for InsecureAcceptAll {
    fn verify(&self, chain: &[Vec<u8>]) -> Result<(), String> {
        if chain.is_empty() {
            return Err("empty certificate chain".to_string());
        }
        Ok(())
    }
}

impl RawKeyVerifier for InsecureAcceptAll {
    fn verify(&self, spki: &[u8]) -> Result<(), String> {
        if spki.is_empty() {
            return Err("empty SPKI".to_string());
        }
        Ok(())
    }
}

/// In-memory session cache.
#[derive(Default)]
pub struct InMemorySessionCache {
    inner: std::sync::Mutex<Vec<SessionTicket>>,
}

impl InMemorySessionCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionCache for InMemorySessionCache {
    fn get(&self, session_id: &SessionId) -> Option<SessionTicket> {
        let inner = self.inner.lock().unwrap();
        inner
            .iter()
            .find(|t| t.session_id == *session_id)
            .cloned()
    }

    fn put(&self, ticket: SessionTicket) {
        let mut inner = self.inner.lock().unwrap();
        inner.retain(|t| t.session_id != ticket.session_id);
        inner.push(ticket);
    }

    fn remove(&self, session_id: &SessionId) {
        let mut inner = self.inner.lock().unwrap();
        inner.retain(|t| t.session_id != *session_id);
    }
}

/// Single-key PSK store keyed by identity.
pub struct SingleKeyPskStore {
    pub identity: Vec<u8>,
    pub key: Vec<u8>,
}

impl SingleKeyPskStore {
    pub fn new(identity: &[u8], key: &[u8]) -> Self {
        SingleKeyPskStore {
            identity: identity.to_vec(),
            key: key.to_vec(),
        }
    }
}

impl PskStore for SingleKeyPskStore {
    fn key(&self, _server_name: Option<&str>, identity: &[u8]) -> Option<Zeroizing<Vec<u8>>> {
        (identity == self.identity.as_slice()).then(|| Zeroizing::new(self.key.clone()))
    }

    fn identity(&self, _server_name: Option<&str>) -> Option<Vec<u8>> {
        Some(self.identity.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::CipherSuite;
    use crate::session::PeerIdentity;

    fn ticket(id: u8) -> SessionTicket {
        SessionTicket {
            session_id: SessionId::try_new(&[id; 8]).unwrap(),
            master_secret: Zeroizing::new([0; 48]),
            cipher_suite: CipherSuite::PSK_AES128_GCM_SHA256,
            peer_identity: PeerIdentity::PskIdentity {
                identity: b"x".to_vec(),
                virtual_host: None,
            },
            server_name: None,
        }
    }

    #[test]
    fn cache_get_put_remove() {
        let cache = InMemorySessionCache::new();
        let t = ticket(1);
        assert!(cache.get(&t.session_id).is_none());

        cache.put(t.clone());
        assert!(cache.get(&t.session_id).is_some());

        cache.remove(&t.session_id);
        assert!(cache.get(&t.session_id).is_none());
    }

    #[test]
    fn psk_store_checks_identity() {
        let store = SingleKeyPskStore::new(b"device", b"sesame");
        assert!(store.key(None, b"device").is_some());
        assert!(store.key(None, b"other").is_none());
        assert_eq!(store.identity(None).unwrap(), b"device");
    }
}
