//! Established-session state and the resumption snapshot.

use zeroize::Zeroizing;

use crate::crypto::MASTER_SECRET_LEN;
use crate::message::{CipherSuite, ConnectionId, SessionId};

/// The peer's authenticated identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerIdentity {
    /// X.509 certificate path, leaf first, as validated by the callback.
    Certificate { chain: Vec<Vec<u8>> },
    /// Raw SubjectPublicKeyInfo (RFC 7250).
    RawPublicKey { spki: Vec<u8> },
    /// Pre-shared key identity, scoped to a virtual host when SNI is in use.
    PskIdentity {
        identity: Vec<u8>,
        virtual_host: Option<String>,
    },
}

/// One established security association.
///
/// Invariants: `master_secret` is set before any epoch ≥ 1 record is
/// produced, and `peer_identity` is set before the session is reported
/// established — both are enforced structurally, neither field is optional.
pub struct Session {
    /// Empty when the server suppresses session ids.
    pub session_id: SessionId,
    pub master_secret: Zeroizing<[u8; MASTER_SECRET_LEN]>,
    pub cipher_suite: CipherSuite,
    pub peer_identity: PeerIdentity,
    /// Server name indication, stored when SNI is enabled.
    pub server_name: Option<String>,
    /// Negotiated max fragment length (RFC 6066), if any.
    pub max_fragment_length: Option<usize>,
    /// The CID to attach on records we send; empty disables CID writing.
    pub peer_cid: ConnectionId,
}

impl Session {
    /// Snapshot sufficient to recreate the session for resumption.
    pub fn ticket(&self) -> SessionTicket {
        SessionTicket {
            session_id: self.session_id,
            master_secret: self.master_secret.clone(),
            cipher_suite: self.cipher_suite,
            peer_identity: self.peer_identity.clone(),
            server_name: self.server_name.clone(),
        }
    }

    /// Whether this session can be offered for resumption.
    pub fn is_resumable(&self) -> bool {
        !self.session_id.is_empty()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.session_id)
            .field("cipher_suite", &self.cipher_suite)
            .field("peer_cid", &self.peer_cid)
            .finish_non_exhaustive()
    }
}

/// Resumption snapshot handed to the session cache and back.
#[derive(Clone)]
pub struct SessionTicket {
    pub session_id: SessionId,
    pub master_secret: Zeroizing<[u8; MASTER_SECRET_LEN]>,
    pub cipher_suite: CipherSuite,
    pub peer_identity: PeerIdentity,
    pub server_name: Option<String>,
}

impl std::fmt::Debug for SessionTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTicket")
            .field("session_id", &self.session_id)
            .field("cipher_suite", &self.cipher_suite)
            .finish_non_exhaustive()
    }
}
