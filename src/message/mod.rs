//! DTLS 1.2 wire formats: records, handshake messages and their fields.
//!
//! Parsing is nom-based and non-allocating where the field counts are
//! bounded (ArrayVec); serialization appends to plain byte vectors.

mod alert;
mod certificate;
mod client_hello;
mod extension;
mod finished;
mod handshake;
mod hello_verify;
mod id;
mod key_exchange;
mod record;
mod server_hello;

pub use alert::{Alert, AlertLevel};
pub use certificate::{
    CertificateMessage, CertificateRequest, CertificateVerify, ClientCertificateType,
    DigitallySigned,
};
pub use client_hello::ClientHello;
pub use extension::{
    ec_point_formats_extension, find as find_extension, CertTypeListExtension,
    ConnectionIdExtension, Extension, ExtensionType, ExtensionVec, MaxFragmentLengthExtension,
    ServerNameExtension, SignatureAlgorithmsExtension, SupportedGroupsExtension,
};
pub use finished::{Finished, VERIFY_DATA_LEN};
pub use handshake::{Body, HandshakeHeader, MessageType, ParseContext};
pub use hello_verify::HelloVerifyRequest;
pub use id::{ConnectionId, Cookie, PskIdentity, Random, SessionId};
pub use key_exchange::{ClientKeyExchange, EcdheParams, ServerKeyExchange};
pub use record::DtlsRecord;
pub use server_hello::ServerHello;

use arrayvec::ArrayVec;
use nom::number::complete::{be_u16, be_u8};
use nom::IResult;

/// Record-layer protocol versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    DTLS1_0,
    DTLS1_2,
    Unknown(u16),
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::Unknown(0)
    }
}

impl ProtocolVersion {
    pub fn as_u16(&self) -> u16 {
        match self {
            ProtocolVersion::DTLS1_0 => 0xFEFF,
            ProtocolVersion::DTLS1_2 => 0xFEFD,
            ProtocolVersion::Unknown(value) => *value,
        }
    }

    /// DTLS versions compare inverted on the wire: 1.2 (0xFEFD) is
    /// numerically below 1.0 (0xFEFF).
    pub fn is_at_least_dtls12(&self) -> bool {
        self.as_u16() <= ProtocolVersion::DTLS1_2.as_u16()
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], ProtocolVersion> {
        let (input, version) = be_u16(input)?;
        let protocol_version = match version {
            0xFEFF => ProtocolVersion::DTLS1_0,
            0xFEFD => ProtocolVersion::DTLS1_2,
            _ => ProtocolVersion::Unknown(version),
        };
        Ok((input, protocol_version))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.extend_from_slice(&self.as_u16().to_be_bytes());
    }
}

/// Record content types, including the RFC 9146 CID record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    ChangeCipherSpec,
    Alert,
    Handshake,
    ApplicationData,
    Tls12Cid,
    Unknown(u8),
}

impl Default for ContentType {
    fn default() -> Self {
        Self::Unknown(0)
    }
}

impl ContentType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            20 => ContentType::ChangeCipherSpec,
            21 => ContentType::Alert,
            22 => ContentType::Handshake,
            23 => ContentType::ApplicationData,
            25 => ContentType::Tls12Cid,
            _ => ContentType::Unknown(value),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            ContentType::ChangeCipherSpec => 20,
            ContentType::Alert => 21,
            ContentType::Handshake => 22,
            ContentType::ApplicationData => 23,
            ContentType::Tls12Cid => 25,
            ContentType::Unknown(value) => *value,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], ContentType> {
        let (input, byte) = be_u8(input)?;
        Ok((input, Self::from_u8(byte)))
    }
}

/// Epoch and 48-bit record sequence number.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Sequence {
    pub epoch: u16,
    pub sequence_number: u64,
}

impl Sequence {
    pub fn new(epoch: u16) -> Self {
        Sequence {
            epoch,
            sequence_number: 0,
        }
    }
}

pub type CipherSuiteVec = ArrayVec<CipherSuite, 16>;

/// Supported DTLS 1.2 cipher suites (AES-GCM members of the certificate,
/// PSK and ECDHE_PSK families).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(non_camel_case_types)]
pub enum CipherSuite {
    /// ECDHE key exchange, ECDSA authentication, AES-128-GCM, SHA-256
    ECDHE_ECDSA_AES128_GCM_SHA256, // 0xC02B
    /// ECDHE key exchange, ECDSA authentication, AES-256-GCM, SHA-384
    ECDHE_ECDSA_AES256_GCM_SHA384, // 0xC02C
    /// Pre-shared key, AES-128-GCM, SHA-256
    PSK_AES128_GCM_SHA256, // 0x00A8
    /// Pre-shared key, AES-256-GCM, SHA-384
    PSK_AES256_GCM_SHA384, // 0x00A9
    /// ECDHE with pre-shared key authentication, AES-128-GCM, SHA-256
    ECDHE_PSK_AES128_GCM_SHA256, // 0xD001
    /// Unknown or unsupported suite by IANA value
    Unknown(u16),
}

impl Default for CipherSuite {
    fn default() -> Self {
        Self::Unknown(0)
    }
}

impl CipherSuite {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0xC02B => CipherSuite::ECDHE_ECDSA_AES128_GCM_SHA256,
            0xC02C => CipherSuite::ECDHE_ECDSA_AES256_GCM_SHA384,
            0x00A8 => CipherSuite::PSK_AES128_GCM_SHA256,
            0x00A9 => CipherSuite::PSK_AES256_GCM_SHA384,
            0xD001 => CipherSuite::ECDHE_PSK_AES128_GCM_SHA256,
            _ => CipherSuite::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CipherSuite::ECDHE_ECDSA_AES128_GCM_SHA256 => 0xC02B,
            CipherSuite::ECDHE_ECDSA_AES256_GCM_SHA384 => 0xC02C,
            CipherSuite::PSK_AES128_GCM_SHA256 => 0x00A8,
            CipherSuite::PSK_AES256_GCM_SHA384 => 0x00A9,
            CipherSuite::ECDHE_PSK_AES128_GCM_SHA256 => 0xD001,
            CipherSuite::Unknown(value) => *value,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], CipherSuite> {
        let (input, value) = be_u16(input)?;
        Ok((input, CipherSuite::from_u16(value)))
    }

    pub fn key_exchange_algorithm(&self) -> KeyExchangeAlgorithm {
        match self {
            CipherSuite::ECDHE_ECDSA_AES128_GCM_SHA256
            | CipherSuite::ECDHE_ECDSA_AES256_GCM_SHA384 => KeyExchangeAlgorithm::EcdheEcdsa,
            CipherSuite::PSK_AES128_GCM_SHA256 | CipherSuite::PSK_AES256_GCM_SHA384 => {
                KeyExchangeAlgorithm::Psk
            }
            CipherSuite::ECDHE_PSK_AES128_GCM_SHA256 => KeyExchangeAlgorithm::EcdhePsk,
            CipherSuite::Unknown(_) => KeyExchangeAlgorithm::Unknown,
        }
    }

    /// Whether the key exchange needs a mutually supported named group.
    pub fn is_ecc(&self) -> bool {
        matches!(
            self.key_exchange_algorithm(),
            KeyExchangeAlgorithm::EcdheEcdsa | KeyExchangeAlgorithm::EcdhePsk
        )
    }

    /// Whether the server must send a Certificate message.
    pub fn requires_server_certificate(&self) -> bool {
        self.key_exchange_algorithm() == KeyExchangeAlgorithm::EcdheEcdsa
    }

    /// Whether the peer is authenticated by a pre-shared key.
    pub fn is_psk(&self) -> bool {
        matches!(
            self.key_exchange_algorithm(),
            KeyExchangeAlgorithm::Psk | KeyExchangeAlgorithm::EcdhePsk
        )
    }

    pub fn hash_algorithm(&self) -> HashAlgorithm {
        match self {
            CipherSuite::ECDHE_ECDSA_AES256_GCM_SHA384 | CipherSuite::PSK_AES256_GCM_SHA384 => {
                HashAlgorithm::SHA384
            }
            CipherSuite::ECDHE_ECDSA_AES128_GCM_SHA256
            | CipherSuite::PSK_AES128_GCM_SHA256
            | CipherSuite::ECDHE_PSK_AES128_GCM_SHA256 => HashAlgorithm::SHA256,
            CipherSuite::Unknown(_) => HashAlgorithm::Unknown(0),
        }
    }

    /// AEAD key length in bytes.
    pub fn enc_key_len(&self) -> usize {
        match self {
            CipherSuite::ECDHE_ECDSA_AES256_GCM_SHA384 | CipherSuite::PSK_AES256_GCM_SHA384 => 32,
            _ => 16,
        }
    }

    /// Implicit AEAD nonce part length in bytes.
    pub fn fixed_iv_len(&self) -> usize {
        4
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, CipherSuite::Unknown(_))
    }

    /// All supported suites in default server preference order.
    pub const fn all() -> &'static [CipherSuite; 5] {
        &[
            CipherSuite::ECDHE_ECDSA_AES256_GCM_SHA384,
            CipherSuite::ECDHE_ECDSA_AES128_GCM_SHA256,
            CipherSuite::ECDHE_PSK_AES128_GCM_SHA256,
            CipherSuite::PSK_AES256_GCM_SHA384,
            CipherSuite::PSK_AES128_GCM_SHA256,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyExchangeAlgorithm {
    EcdheEcdsa,
    Psk,
    EcdhePsk,
    Unknown,
}

pub type CompressionMethodVec = ArrayVec<CompressionMethod, 4>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Null,
    Unknown(u8),
}

impl Default for CompressionMethod {
    fn default() -> Self {
        Self::Unknown(0xFF)
    }
}

impl CompressionMethod {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => CompressionMethod::Null,
            _ => CompressionMethod::Unknown(value),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            CompressionMethod::Null => 0x00,
            CompressionMethod::Unknown(value) => *value,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], CompressionMethod> {
        let (input, value) = be_u8(input)?;
        Ok((input, CompressionMethod::from_u8(value)))
    }
}

/// Named elliptic-curve groups (RFC 8422).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamedGroup {
    Secp256r1,
    Secp384r1,
    Unknown(u16),
}

impl NamedGroup {
    pub fn from_u16(value: u16) -> Self {
        match value {
            23 => NamedGroup::Secp256r1,
            24 => NamedGroup::Secp384r1,
            _ => NamedGroup::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            NamedGroup::Secp256r1 => 23,
            NamedGroup::Secp384r1 => 24,
            NamedGroup::Unknown(value) => *value,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], NamedGroup> {
        let (input, value) = be_u16(input)?;
        Ok((input, NamedGroup::from_u16(value)))
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, NamedGroup::Unknown(_))
    }

    pub const fn all() -> &'static [NamedGroup; 2] {
        &[NamedGroup::Secp256r1, NamedGroup::Secp384r1]
    }
}

pub type NamedGroupVec = ArrayVec<NamedGroup, 16>;

/// Certificate representations (RFC 7250).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateType {
    X509,
    RawPublicKey,
    Unknown(u8),
}

impl CertificateType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => CertificateType::X509,
            2 => CertificateType::RawPublicKey,
            _ => CertificateType::Unknown(value),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            CertificateType::X509 => 0,
            CertificateType::RawPublicKey => 2,
            CertificateType::Unknown(value) => *value,
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, CertificateType::Unknown(_))
    }
}

pub type CertificateTypeVec = ArrayVec<CertificateType, 4>;

/// Hash algorithms in SignatureAndHashAlgorithm (RFC 5246 §7.4.1.4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    SHA256,
    SHA384,
    Unknown(u8),
}

impl Default for HashAlgorithm {
    fn default() -> Self {
        Self::Unknown(0)
    }
}

impl HashAlgorithm {
    pub fn from_u8(value: u8) -> Self {
        match value {
            4 => HashAlgorithm::SHA256,
            5 => HashAlgorithm::SHA384,
            _ => HashAlgorithm::Unknown(value),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            HashAlgorithm::SHA256 => 4,
            HashAlgorithm::SHA384 => 5,
            HashAlgorithm::Unknown(value) => *value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    ECDSA,
    Unknown(u8),
}

impl Default for SignatureAlgorithm {
    fn default() -> Self {
        Self::Unknown(0)
    }
}

impl SignatureAlgorithm {
    pub fn from_u8(value: u8) -> Self {
        match value {
            3 => SignatureAlgorithm::ECDSA,
            _ => SignatureAlgorithm::Unknown(value),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            SignatureAlgorithm::ECDSA => 3,
            SignatureAlgorithm::Unknown(value) => *value,
        }
    }
}

pub type SignatureAndHashAlgorithmVec = ArrayVec<SignatureAndHashAlgorithm, 8>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureAndHashAlgorithm {
    pub hash: HashAlgorithm,
    pub signature: SignatureAlgorithm,
}

impl SignatureAndHashAlgorithm {
    pub const fn new(hash: HashAlgorithm, signature: SignatureAlgorithm) -> Self {
        SignatureAndHashAlgorithm { hash, signature }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], SignatureAndHashAlgorithm> {
        let (input, hash) = be_u8(input)?;
        let (input, signature) = be_u8(input)?;
        Ok((
            input,
            SignatureAndHashAlgorithm {
                hash: HashAlgorithm::from_u8(hash),
                signature: SignatureAlgorithm::from_u8(signature),
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.push(self.hash.as_u8());
        output.push(self.signature.as_u8());
    }

    pub const fn supported() -> &'static [SignatureAndHashAlgorithm; 2] {
        const SUPPORTED: [SignatureAndHashAlgorithm; 2] = [
            SignatureAndHashAlgorithm::new(HashAlgorithm::SHA256, SignatureAlgorithm::ECDSA),
            SignatureAndHashAlgorithm::new(HashAlgorithm::SHA384, SignatureAlgorithm::ECDSA),
        ];
        &SUPPORTED
    }

    pub fn is_supported(&self) -> bool {
        Self::supported().contains(self)
    }
}

/// Parse a big-endian 48-bit integer (record sequence numbers).
pub(crate) fn be_u48(input: &[u8]) -> IResult<&[u8], u64> {
    let (input, bytes) = nom::bytes::complete::take(6usize)(input)?;
    let mut value = 0u64;
    for b in bytes {
        value = (value << 8) | *b as u64;
    }
    Ok((input, value))
}
