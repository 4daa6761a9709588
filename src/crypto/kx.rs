//! Ephemeral ECDH key exchange over P-256 and P-384.

use p256::ecdh::EphemeralSecret as P256EphemeralSecret;
use p256::PublicKey as P256PublicKey;
use rand_core::OsRng;
use p384::ecdh::EphemeralSecret as P384EphemeralSecret;
use p384::PublicKey as P384PublicKey;
use zeroize::Zeroizing;

use crate::error::Error;
use crate::message::NamedGroup;

pub enum EcdheKeyExchange {
    P256 {
        secret: P256EphemeralSecret,
        public_key: Vec<u8>,
    },
    P384 {
        secret: P384EphemeralSecret,
        public_key: Vec<u8>,
    },
}

impl EcdheKeyExchange {
    /// Generate an ephemeral key pair for the given group.
    pub fn new(group: NamedGroup) -> Result<Self, Error> {
        match group {
            NamedGroup::Secp256r1 => {
                let secret = P256EphemeralSecret::random(&mut OsRng);
                let public_key = P256PublicKey::from(&secret).to_sec1_bytes().to_vec();
                Ok(EcdheKeyExchange::P256 { secret, public_key })
            }
            NamedGroup::Secp384r1 => {
                let secret = P384EphemeralSecret::random(&mut OsRng);
                let public_key = P384PublicKey::from(&secret).to_sec1_bytes().to_vec();
                Ok(EcdheKeyExchange::P384 { secret, public_key })
            }
            NamedGroup::Unknown(v) => {
                Err(Error::CryptoError(format!("unsupported group {}", v)))
            }
        }
    }

    /// Our public key as an uncompressed SEC1 point.
    pub fn public_key(&self) -> &[u8] {
        match self {
            EcdheKeyExchange::P256 { public_key, .. } => public_key,
            EcdheKeyExchange::P384 { public_key, .. } => public_key,
        }
    }

    pub fn group(&self) -> NamedGroup {
        match self {
            EcdheKeyExchange::P256 { .. } => NamedGroup::Secp256r1,
            EcdheKeyExchange::P384 { .. } => NamedGroup::Secp384r1,
        }
    }

    /// Run the agreement against the peer's SEC1 point, consuming the
    /// ephemeral secret.
    pub fn complete(self, peer_public: &[u8]) -> Result<Zeroizing<Vec<u8>>, Error> {
        match self {
            EcdheKeyExchange::P256 { secret, .. } => {
                let peer = P256PublicKey::from_sec1_bytes(peer_public)
                    .map_err(|_| Error::DecodeError("invalid P-256 point".to_string()))?;
                let shared = secret.diffie_hellman(&peer);
                Ok(Zeroizing::new(shared.raw_secret_bytes().as_slice().to_vec()))
            }
            EcdheKeyExchange::P384 { secret, .. } => {
                let peer = P384PublicKey::from_sec1_bytes(peer_public)
                    .map_err(|_| Error::DecodeError("invalid P-384 point".to_string()))?;
                let shared = secret.diffie_hellman(&peer);
                Ok(Zeroizing::new(shared.raw_secret_bytes().as_slice().to_vec()))
            }
        }
    }
}

impl std::fmt::Debug for EcdheKeyExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EcdheKeyExchange")
            .field("group", &self.group())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agreement_matches_on_both_sides() {
        for group in [NamedGroup::Secp256r1, NamedGroup::Secp384r1] {
            let a = EcdheKeyExchange::new(group).unwrap();
            let b = EcdheKeyExchange::new(group).unwrap();

            let a_pub = a.public_key().to_vec();
            let b_pub = b.public_key().to_vec();

            let s1 = a.complete(&b_pub).unwrap();
            let s2 = b.complete(&a_pub).unwrap();
            assert_eq!(&*s1, &*s2);
            assert!(!s1.is_empty());
        }
    }

    #[test]
    fn bad_point_is_rejected() {
        let a = EcdheKeyExchange::new(NamedGroup::Secp256r1).unwrap();
        assert!(a.complete(&[0x04, 1, 2, 3]).is_err());
    }
}
