//! AEAD record protection: AES-128-GCM and AES-256-GCM, in place.

use aes_gcm::aead::AeadInPlace;
use aes_gcm::{Aes128Gcm, Aes256Gcm, KeyInit};

use super::{Aad, Iv, Nonce};
use crate::error::Error;

/// GCM tag length in bytes.
pub const AEAD_TAG_LEN: usize = 16;

pub enum AeadCipher {
    Aes128(Box<Aes128Gcm>),
    Aes256(Box<Aes256Gcm>),
}

impl AeadCipher {
    pub fn new(key: &[u8]) -> Result<Self, Error> {
        match key.len() {
            16 => {
                let cipher = Aes128Gcm::new_from_slice(key)
                    .map_err(|_| Error::CryptoError("bad AES-128-GCM key".to_string()))?;
                Ok(AeadCipher::Aes128(Box::new(cipher)))
            }
            32 => {
                let cipher = Aes256Gcm::new_from_slice(key)
                    .map_err(|_| Error::CryptoError("bad AES-256-GCM key".to_string()))?;
                Ok(AeadCipher::Aes256(Box::new(cipher)))
            }
            n => Err(Error::CryptoError(format!("bad AES-GCM key length {}", n))),
        }
    }

    /// Encrypt in place; the buffer grows by the tag.
    pub fn encrypt(&self, buffer: &mut Vec<u8>, aad: &Aad, nonce: &Nonce) -> Result<(), Error> {
        let nonce = aes_gcm::Nonce::from_slice(nonce.as_ref());
        match self {
            AeadCipher::Aes128(cipher) => cipher.encrypt_in_place(nonce, aad.as_ref(), buffer),
            AeadCipher::Aes256(cipher) => cipher.encrypt_in_place(nonce, aad.as_ref(), buffer),
        }
        .map_err(|_| Error::CryptoError("encryption failed".to_string()))
    }

    /// Decrypt in place; the buffer shrinks by the tag. A failed tag check
    /// is the record-layer authentication failure.
    pub fn decrypt(&self, buffer: &mut Vec<u8>, aad: &Aad, nonce: &Nonce) -> Result<(), Error> {
        let nonce = aes_gcm::Nonce::from_slice(nonce.as_ref());
        match self {
            AeadCipher::Aes128(cipher) => cipher.decrypt_in_place(nonce, aad.as_ref(), buffer),
            AeadCipher::Aes256(cipher) => cipher.decrypt_in_place(nonce, aad.as_ref(), buffer),
        }
        .map_err(|_| Error::DecryptError("record authentication failed".to_string()))
    }
}

impl std::fmt::Debug for AeadCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AeadCipher::Aes128(_) => write!(f, "AeadCipher::Aes128"),
            AeadCipher::Aes256(_) => write!(f, "AeadCipher::Aes256"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ContentType, ProtocolVersion, Sequence};

    fn test_aad() -> Aad {
        Aad::new(
            ContentType::Handshake,
            ProtocolVersion::DTLS1_2,
            Sequence {
                epoch: 1,
                sequence_number: 5,
            },
            12,
            &[],
        )
    }

    #[test]
    fn seal_open_roundtrip() {
        let cipher = AeadCipher::new(&[7; 16]).unwrap();
        let nonce = Nonce::new(&Iv::new(&[1, 2, 3, 4]), &[5, 6, 7, 8, 9, 10, 11, 12]);

        let mut buf = Vec::new();
        buf.extend_from_slice(b"hello records");
        let plain_len = buf.len();

        cipher.encrypt(&mut buf, &test_aad(), &nonce).unwrap();
        assert_eq!(buf.len(), plain_len + AEAD_TAG_LEN);

        cipher.decrypt(&mut buf, &test_aad(), &nonce).unwrap();
        assert_eq!(&*buf, b"hello records");
    }

    #[test]
    fn tampered_ciphertext_fails_open() {
        let cipher = AeadCipher::new(&[7; 32]).unwrap();
        let nonce = Nonce::new(&Iv::new(&[1, 2, 3, 4]), &[5, 6, 7, 8, 9, 10, 11, 12]);

        let mut buf = Vec::new();
        buf.extend_from_slice(b"payload");
        cipher.encrypt(&mut buf, &test_aad(), &nonce).unwrap();
        buf[0] ^= 0x01;

        let err = cipher.decrypt(&mut buf, &test_aad(), &nonce).unwrap_err();
        assert!(matches!(err, Error::DecryptError(_)));
    }

    #[test]
    fn aad_mismatch_fails_open() {
        let cipher = AeadCipher::new(&[7; 16]).unwrap();
        let nonce = Nonce::new(&Iv::new(&[1, 2, 3, 4]), &[5, 6, 7, 8, 9, 10, 11, 12]);

        let mut buf = Vec::new();
        buf.extend_from_slice(b"payload");
        cipher.encrypt(&mut buf, &test_aad(), &nonce).unwrap();

        let other_aad = Aad::new(
            ContentType::Handshake,
            ProtocolVersion::DTLS1_2,
            Sequence {
                epoch: 1,
                sequence_number: 6,
            },
            7,
            &[],
        );
        assert!(cipher.decrypt(&mut buf, &other_aad, &nonce).is_err());
    }
}
