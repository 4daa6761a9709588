//! ECDSA signing and verification for ServerKeyExchange and
//! CertificateVerify, plus SPKI handling.
//!
//! Certificate chains are validated by the application callback; this module
//! only extracts the SubjectPublicKeyInfo it needs to check handshake
//! signatures.

use ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::NistP256;
use p384::NistP384;
use pkcs8::DecodePrivateKey;
use sha2::{Digest, Sha256, Sha384};
use spki::der::{Decode, Encode};
use spki::{EncodePublicKey, ObjectIdentifier};

use crate::error::Error;
use crate::message::{HashAlgorithm, SignatureAlgorithm, SignatureAndHashAlgorithm};

const OID_EC_PUBLIC_KEY: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");
const OID_SECP256R1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.3.1.7");
const OID_SECP384R1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.132.0.34");

/// A loaded ECDSA private key (PKCS#8 DER).
pub enum EcdsaKey {
    P256(Box<SigningKey<NistP256>>),
    P384(Box<SigningKey<NistP384>>),
}

impl EcdsaKey {
    pub fn from_pkcs8_der(key_der: &[u8]) -> Result<Self, Error> {
        if let Ok(key) = SigningKey::<NistP256>::from_pkcs8_der(key_der) {
            return Ok(EcdsaKey::P256(Box::new(key)));
        }
        if let Ok(key) = SigningKey::<NistP384>::from_pkcs8_der(key_der) {
            return Ok(EcdsaKey::P384(Box::new(key)));
        }
        Err(Error::CryptoError(
            "private key is not PKCS#8 ECDSA P-256/P-384".to_string(),
        ))
    }

    /// Sign with the curve's natural hash; the signature is DER encoded.
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>, Error> {
        match self {
            EcdsaKey::P256(key) => {
                let digest = Sha256::digest(data);
                let signature: Signature<NistP256> = key
                    .sign_prehash(&digest)
                    .map_err(|_| Error::CryptoError("signing failed".to_string()))?;
                Ok(signature.to_der().as_bytes().to_vec())
            }
            EcdsaKey::P384(key) => {
                let digest = Sha384::digest(data);
                let signature: Signature<NistP384> = key
                    .sign_prehash(&digest)
                    .map_err(|_| Error::CryptoError("signing failed".to_string()))?;
                Ok(signature.to_der().as_bytes().to_vec())
            }
        }
    }

    /// The SignatureAndHashAlgorithm this key produces.
    pub fn algorithm(&self) -> SignatureAndHashAlgorithm {
        let hash = match self {
            EcdsaKey::P256(_) => HashAlgorithm::SHA256,
            EcdsaKey::P384(_) => HashAlgorithm::SHA384,
        };
        SignatureAndHashAlgorithm::new(hash, SignatureAlgorithm::ECDSA)
    }

    /// The public half as a DER SubjectPublicKeyInfo (raw-public-key mode).
    pub fn public_spki_der(&self) -> Result<Vec<u8>, Error> {
        let doc = match self {
            EcdsaKey::P256(key) => VerifyingKey::from(key.as_ref()).to_public_key_der(),
            EcdsaKey::P384(key) => VerifyingKey::from(key.as_ref()).to_public_key_der(),
        }
        .map_err(|_| Error::CryptoError("SPKI encoding failed".to_string()))?;
        Ok(doc.as_bytes().to_vec())
    }
}

impl std::fmt::Debug for EcdsaKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EcdsaKey::P256(_) => write!(f, "EcdsaKey::P256"),
            EcdsaKey::P384(_) => write!(f, "EcdsaKey::P384"),
        }
    }
}

/// Extract the SubjectPublicKeyInfo (DER) from an X.509 certificate (DER).
pub fn spki_from_certificate(cert_der: &[u8]) -> Result<Vec<u8>, Error> {
    let cert = x509_cert::Certificate::from_der(cert_der)
        .map_err(|_| Error::CertificateError("malformed certificate".to_string()))?;
    cert.tbs_certificate
        .subject_public_key_info
        .to_der()
        .map_err(|_| Error::CertificateError("malformed SPKI".to_string()))
}

/// Verify a DER ECDSA signature over `data` against a DER SPKI.
///
/// The hash is the peer's declared SignatureAndHashAlgorithm.
pub fn verify_with_spki(
    spki_der: &[u8],
    data: &[u8],
    signature_der: &[u8],
    algorithm: SignatureAndHashAlgorithm,
) -> Result<(), Error> {
    if algorithm.signature != SignatureAlgorithm::ECDSA {
        return Err(Error::DecryptError(format!(
            "unsupported signature algorithm {:?}",
            algorithm.signature
        )));
    }

    let digest = match algorithm.hash {
        HashAlgorithm::SHA256 => Sha256::digest(data).to_vec(),
        HashAlgorithm::SHA384 => Sha384::digest(data).to_vec(),
        HashAlgorithm::Unknown(v) => {
            return Err(Error::DecryptError(format!("unsupported hash {}", v)));
        }
    };

    let spki = spki::SubjectPublicKeyInfoRef::from_der(spki_der)
        .map_err(|_| Error::CertificateError("malformed SPKI".to_string()))?;

    if spki.algorithm.oid != OID_EC_PUBLIC_KEY {
        return Err(Error::CertificateError(
            "public key is not an EC key".to_string(),
        ));
    }

    let curve = spki
        .algorithm
        .parameters_oid()
        .map_err(|_| Error::CertificateError("missing EC curve parameters".to_string()))?;

    let point = spki
        .subject_public_key
        .as_bytes()
        .ok_or_else(|| Error::CertificateError("malformed EC point".to_string()))?;

    if curve == OID_SECP256R1 {
        let key = VerifyingKey::<NistP256>::from_sec1_bytes(point)
            .map_err(|_| Error::CertificateError("malformed P-256 key".to_string()))?;
        let signature = Signature::<NistP256>::from_der(signature_der)
            .map_err(|_| Error::DecryptError("malformed signature".to_string()))?;
        key.verify_prehash(&digest, &signature)
            .map_err(|_| Error::DecryptError("signature verification failed".to_string()))
    } else if curve == OID_SECP384R1 {
        let key = VerifyingKey::<NistP384>::from_sec1_bytes(point)
            .map_err(|_| Error::CertificateError("malformed P-384 key".to_string()))?;
        let signature = Signature::<NistP384>::from_der(signature_der)
            .map_err(|_| Error::DecryptError("malformed signature".to_string()))?;
        key.verify_prehash(&digest, &signature)
            .map_err(|_| Error::DecryptError("signature verification failed".to_string()))
    } else {
        Err(Error::CertificateError(format!(
            "unsupported EC curve {}",
            curve
        )))
    }
}
