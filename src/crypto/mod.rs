//! Cryptographic plumbing for the record layer and handshake.

mod cipher;
mod cookie;
mod kx;
mod prf;
mod sign;

pub use cipher::{AeadCipher, AEAD_TAG_LEN};
pub use cookie::{CookieGenerator, COOKIE_LEN};
pub use kx::EcdheKeyExchange;
pub use prf::{
    calculate_master_secret, generate_verify_data, hash_transcript, key_expansion,
    psk_premaster_secret, CLIENT_FINISHED_LABEL, MASTER_SECRET_LEN, SERVER_FINISHED_LABEL,
};
pub use sign::{spki_from_certificate, verify_with_spki, EcdsaKey};

use zeroize::Zeroizing;

use crate::error::Error;
use crate::message::{CipherSuite, ContentType, ProtocolVersion, Sequence};

/// Length of the explicit (per-record) part of the AEAD nonce.
pub const DTLS_EXPLICIT_NONCE_LEN: usize = 8;

/// Per-record AEAD expansion on the wire: explicit nonce + GCM tag.
pub const DTLS_AEAD_OVERHEAD: usize = DTLS_EXPLICIT_NONCE_LEN + AEAD_TAG_LEN;

/// The 4-byte implicit part of the AEAD nonce from the key block.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Iv([u8; 4]);

impl Iv {
    pub fn new(bytes: &[u8]) -> Self {
        let mut iv = [0u8; 4];
        iv.copy_from_slice(bytes);
        Iv(iv)
    }
}

/// Full 12-byte AEAD nonce: implicit IV followed by the explicit part.
pub struct Nonce([u8; 12]);

impl Nonce {
    pub fn new(iv: &Iv, explicit: &[u8]) -> Self {
        let mut nonce = [0u8; 12];
        nonce[..4].copy_from_slice(&iv.0);
        nonce[4..].copy_from_slice(explicit);
        Nonce(nonce)
    }
}

impl AsRef<[u8]> for Nonce {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Associated data for record protection:
/// epoch ‖ seq ‖ type ‖ version ‖ length ‖ CID-if-present.
pub struct Aad {
    bytes: Vec<u8>,
}

impl Aad {
    pub fn new(
        content_type: ContentType,
        version: ProtocolVersion,
        sequence: Sequence,
        plaintext_len: u16,
        cid: &[u8],
    ) -> Self {
        let mut bytes = Vec::with_capacity(13 + cid.len());
        bytes.extend_from_slice(&sequence.epoch.to_be_bytes());
        bytes.extend_from_slice(&sequence.sequence_number.to_be_bytes()[2..]);
        bytes.push(content_type.as_u8());
        bytes.extend_from_slice(&version.as_u16().to_be_bytes());
        bytes.extend_from_slice(&plaintext_len.to_be_bytes());
        bytes.extend_from_slice(cid);
        Aad { bytes }
    }
}

impl AsRef<[u8]> for Aad {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

/// Keying material for one epoch, both directions.
///
/// Invariant: constructed only after the master secret is set, which is what
/// gates production of epoch ≥ 1 records.
pub struct SessionKeys {
    client_cipher: AeadCipher,
    server_cipher: AeadCipher,
    client_iv: Iv,
    server_iv: Iv,
}

impl SessionKeys {
    /// Expand the key block (RFC 5246 §6.3) and set up both AEAD contexts.
    /// GCM suites use no MAC keys.
    pub fn derive(
        suite: CipherSuite,
        master_secret: &[u8],
        client_random: &[u8],
        server_random: &[u8],
    ) -> Result<Self, Error> {
        let enc_key_len = suite.enc_key_len();
        let iv_len = suite.fixed_iv_len();
        let total = 2 * (enc_key_len + iv_len);

        let key_block: Zeroizing<Vec<u8>> = key_expansion(
            master_secret,
            client_random,
            server_random,
            total,
            suite.hash_algorithm(),
        )?;

        let mut offset = 0;
        let client_key = &key_block[offset..offset + enc_key_len];
        offset += enc_key_len;
        let server_key = &key_block[offset..offset + enc_key_len];
        offset += enc_key_len;
        let client_iv = Iv::new(&key_block[offset..offset + iv_len]);
        offset += iv_len;
        let server_iv = Iv::new(&key_block[offset..offset + iv_len]);

        Ok(SessionKeys {
            client_cipher: AeadCipher::new(client_key)?,
            server_cipher: AeadCipher::new(server_key)?,
            client_iv,
            server_iv,
        })
    }

    pub fn write_cipher(&self, is_client: bool) -> &AeadCipher {
        if is_client {
            &self.client_cipher
        } else {
            &self.server_cipher
        }
    }

    pub fn read_cipher(&self, is_client: bool) -> &AeadCipher {
        if is_client {
            &self.server_cipher
        } else {
            &self.client_cipher
        }
    }

    pub fn write_iv(&self, is_client: bool) -> &Iv {
        if is_client {
            &self.client_iv
        } else {
            &self.server_iv
        }
    }

    pub fn read_iv(&self, is_client: bool) -> &Iv {
        if is_client {
            &self.server_iv
        } else {
            &self.client_iv
        }
    }
}

impl std::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeys").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_keys_seal_and_open_across_roles() {
        let master = [0x42u8; MASTER_SECRET_LEN];
        let client_random = [1u8; 32];
        let server_random = [2u8; 32];

        let keys_client = SessionKeys::derive(
            CipherSuite::PSK_AES128_GCM_SHA256,
            &master,
            &client_random,
            &server_random,
        )
        .unwrap();
        let keys_server = SessionKeys::derive(
            CipherSuite::PSK_AES128_GCM_SHA256,
            &master,
            &client_random,
            &server_random,
        )
        .unwrap();

        let seq = Sequence {
            epoch: 1,
            sequence_number: 0,
        };
        let aad = Aad::new(
            ContentType::ApplicationData,
            ProtocolVersion::DTLS1_2,
            seq,
            5,
            &[],
        );
        let nonce = Nonce::new(keys_client.write_iv(true), &[0; 8]);

        let mut buf = Vec::new();
        buf.extend_from_slice(b"hello");
        keys_client
            .write_cipher(true)
            .encrypt(&mut buf, &aad, &nonce)
            .unwrap();

        // The server's read side must open what the client's write side sealed.
        let aad = Aad::new(
            ContentType::ApplicationData,
            ProtocolVersion::DTLS1_2,
            seq,
            5,
            &[],
        );
        let nonce = Nonce::new(keys_server.read_iv(false), &[0; 8]);
        keys_server
            .read_cipher(false)
            .decrypt(&mut buf, &aad, &nonce)
            .unwrap();
        assert_eq!(&*buf, b"hello");
    }
}
