//! TLS 1.2 PRF (RFC 5246 §5) and the derivations built on it.
//!
//! The PRF hash follows the negotiated cipher suite: SHA-256 for the
//! *_SHA256 suites, SHA-384 for the *_SHA384 suites.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha384};
use zeroize::Zeroizing;

use crate::error::Error;
use crate::message::{HashAlgorithm, VERIFY_DATA_LEN};

pub const MASTER_SECRET_LEN: usize = 48;

pub const CLIENT_FINISHED_LABEL: &str = "client finished";
pub const SERVER_FINISHED_LABEL: &str = "server finished";

type HmacSha256 = Hmac<Sha256>;
type HmacSha384 = Hmac<Sha384>;

macro_rules! p_hash_impl {
    ($name:ident, $mac:ty) => {
        /// P_hash(secret, seed): HMAC chaining until `output_len` bytes are
        /// produced.
        fn $name(secret: &[u8], input: &[u8], output_len: usize) -> Result<Vec<u8>, Error> {
            let mut result = Vec::with_capacity(output_len);

            // A(1) = HMAC_hash(secret, label + seed)
            let mut hmac =
                <$mac>::new_from_slice(secret).map_err(|e| Error::CryptoError(e.to_string()))?;
            hmac.update(input);
            let mut a = hmac.finalize().into_bytes();

            while result.len() < output_len {
                // HMAC_hash(secret, A(i) + label + seed)
                let mut hmac = <$mac>::new_from_slice(secret)
                    .map_err(|e| Error::CryptoError(e.to_string()))?;
                hmac.update(&a);
                hmac.update(input);
                let output = hmac.finalize().into_bytes();

                let remaining = output_len - result.len();
                let to_copy = remaining.min(output.len());
                result.extend_from_slice(&output[..to_copy]);

                if result.len() < output_len {
                    // A(i+1) = HMAC_hash(secret, A(i))
                    let mut hmac = <$mac>::new_from_slice(secret)
                        .map_err(|e| Error::CryptoError(e.to_string()))?;
                    hmac.update(&a);
                    a = hmac.finalize().into_bytes();
                }
            }

            Ok(result)
        }
    };
}

p_hash_impl!(p_sha256, HmacSha256);
p_hash_impl!(p_sha384, HmacSha384);

/// PRF(secret, label, seed) with the hash selected by the cipher suite.
pub fn prf_tls12(
    secret: &[u8],
    label: &str,
    seed: &[u8],
    output_len: usize,
    hash: HashAlgorithm,
) -> Result<Vec<u8>, Error> {
    let mut input = Vec::with_capacity(label.len() + seed.len());
    input.extend_from_slice(label.as_bytes());
    input.extend_from_slice(seed);

    match hash {
        HashAlgorithm::SHA256 => p_sha256(secret, &input, output_len),
        HashAlgorithm::SHA384 => p_sha384(secret, &input, output_len),
        HashAlgorithm::Unknown(v) => Err(Error::CryptoError(format!("unknown PRF hash {}", v))),
    }
}

/// master_secret = PRF(pre_master_secret, "master secret",
///                     client_random + server_random, 48)
pub fn calculate_master_secret(
    pre_master_secret: &[u8],
    client_random: &[u8],
    server_random: &[u8],
    hash: HashAlgorithm,
) -> Result<Zeroizing<Vec<u8>>, Error> {
    let mut seed = Vec::with_capacity(client_random.len() + server_random.len());
    seed.extend_from_slice(client_random);
    seed.extend_from_slice(server_random);

    prf_tls12(
        pre_master_secret,
        "master secret",
        &seed,
        MASTER_SECRET_LEN,
        hash,
    )
    .map(Zeroizing::new)
}

/// key_block = PRF(master_secret, "key expansion",
///                 server_random + client_random, length)
pub fn key_expansion(
    master_secret: &[u8],
    client_random: &[u8],
    server_random: &[u8],
    key_material_len: usize,
    hash: HashAlgorithm,
) -> Result<Zeroizing<Vec<u8>>, Error> {
    let mut seed = Vec::with_capacity(client_random.len() + server_random.len());
    seed.extend_from_slice(server_random);
    seed.extend_from_slice(client_random);

    prf_tls12(master_secret, "key expansion", &seed, key_material_len, hash).map(Zeroizing::new)
}

/// verify_data = PRF(master_secret, finished_label,
///                   Hash(handshake_messages), 12)
pub fn generate_verify_data(
    master_secret: &[u8],
    transcript: &[u8],
    is_client: bool,
    hash: HashAlgorithm,
) -> Result<[u8; VERIFY_DATA_LEN], Error> {
    let transcript_hash = hash_transcript(transcript, hash)?;
    let label = if is_client {
        CLIENT_FINISHED_LABEL
    } else {
        SERVER_FINISHED_LABEL
    };

    let out = prf_tls12(
        master_secret,
        label,
        &transcript_hash,
        VERIFY_DATA_LEN,
        hash,
    )?;

    let mut verify_data = [0u8; VERIFY_DATA_LEN];
    verify_data.copy_from_slice(&out);
    Ok(verify_data)
}

/// Digest of the whole handshake transcript so far.
pub fn hash_transcript(transcript: &[u8], hash: HashAlgorithm) -> Result<Vec<u8>, Error> {
    match hash {
        HashAlgorithm::SHA256 => Ok(Sha256::digest(transcript).to_vec()),
        HashAlgorithm::SHA384 => Ok(Sha384::digest(transcript).to_vec()),
        HashAlgorithm::Unknown(v) => Err(Error::CryptoError(format!("unknown hash {}", v))),
    }
}

/// Premaster secret for the PSK families (RFC 4279 §2, RFC 5489 §3.2):
/// uint16 length-prefixed other_secret followed by the uint16
/// length-prefixed PSK. Plain PSK uses a zero-filled other_secret of the
/// same length as the PSK.
pub fn psk_premaster_secret(other_secret: Option<&[u8]>, psk: &[u8]) -> Zeroizing<Vec<u8>> {
    let zeroes;
    let other = match other_secret {
        Some(o) => o,
        None => {
            zeroes = vec![0u8; psk.len()];
            &zeroes
        }
    };

    let mut premaster = Vec::with_capacity(4 + other.len() + psk.len());
    premaster.extend_from_slice(&(other.len() as u16).to_be_bytes());
    premaster.extend_from_slice(other);
    premaster.extend_from_slice(&(psk.len() as u16).to_be_bytes());
    premaster.extend_from_slice(psk);
    Zeroizing::new(premaster)
}
