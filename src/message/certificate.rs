//! Certificate, CertificateRequest and CertificateVerify messages.

use arrayvec::ArrayVec;
use nom::bytes::complete::take;
use nom::error::{Error as NomError, ErrorKind};
use nom::number::complete::{be_u16, be_u24, be_u8};
use nom::{Err, IResult};

use super::{CertificateType, SignatureAndHashAlgorithm, SignatureAndHashAlgorithmVec};

/// Certificate payload: an X.509 chain, or a bare SubjectPublicKeyInfo when
/// the raw-public-key representation was negotiated (RFC 7250).
#[derive(Debug, PartialEq, Eq)]
pub enum CertificateMessage {
    X509 { chain: Vec<Vec<u8>> },
    RawPublicKey { spki: Vec<u8> },
}

impl CertificateMessage {
    pub fn x509(chain: Vec<Vec<u8>>) -> Self {
        CertificateMessage::X509 { chain }
    }

    pub fn raw_public_key(spki: Vec<u8>) -> Self {
        CertificateMessage::RawPublicKey { spki }
    }

    /// An empty certificate (allowed from clients under `wanted` auth).
    pub fn empty() -> Self {
        CertificateMessage::X509 { chain: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            CertificateMessage::X509 { chain } => chain.is_empty(),
            CertificateMessage::RawPublicKey { spki } => spki.is_empty(),
        }
    }

    /// The end-entity key material: leaf certificate DER or the SPKI itself.
    pub fn end_entity(&self) -> Option<&[u8]> {
        match self {
            CertificateMessage::X509 { chain } => chain.first().map(|c| c.as_slice()),
            CertificateMessage::RawPublicKey { spki } => {
                (!spki.is_empty()).then_some(spki.as_slice())
            }
        }
    }

    pub fn parse(input: &[u8], cert_type: CertificateType) -> IResult<&[u8], CertificateMessage> {
        match cert_type {
            CertificateType::RawPublicKey => {
                let (input, len) = be_u24(input)?;
                let (input, spki) = take(len as usize)(input)?;
                Ok((
                    input,
                    CertificateMessage::RawPublicKey {
                        spki: spki.to_vec(),
                    },
                ))
            }
            _ => {
                let (input, total) = be_u24(input)?;
                let (input, mut list) = take(total as usize)(input)?;
                let mut chain = Vec::new();
                while !list.is_empty() {
                    let (rest, len) = be_u24(list)?;
                    let (rest, cert) = take(len as usize)(rest)?;
                    chain.push(cert.to_vec());
                    list = rest;
                }
                Ok((input, CertificateMessage::X509 { chain }))
            }
        }
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        match self {
            CertificateMessage::X509 { chain } => {
                let total: usize = chain.iter().map(|c| 3 + c.len()).sum();
                output.extend_from_slice(&(total as u32).to_be_bytes()[1..]);
                for cert in chain {
                    output.extend_from_slice(&(cert.len() as u32).to_be_bytes()[1..]);
                    output.extend_from_slice(cert);
                }
            }
            CertificateMessage::RawPublicKey { spki } => {
                output.extend_from_slice(&(spki.len() as u32).to_be_bytes()[1..]);
                output.extend_from_slice(spki);
            }
        }
    }
}

/// ClientCertificateType values in CertificateRequest (RFC 5246 §7.4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientCertificateType {
    EcdsaSign,
    Unknown(u8),
}

impl ClientCertificateType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            64 => ClientCertificateType::EcdsaSign,
            _ => ClientCertificateType::Unknown(value),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            ClientCertificateType::EcdsaSign => 64,
            ClientCertificateType::Unknown(value) => *value,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct CertificateRequest {
    pub certificate_types: ArrayVec<ClientCertificateType, 8>,
    pub supported_signature_algorithms: SignatureAndHashAlgorithmVec,
    // Certificate authorities are not constrained; the list is sent empty
    // and ignored on receipt.
}

impl CertificateRequest {
    pub fn new() -> Self {
        let mut certificate_types = ArrayVec::new();
        certificate_types.push(ClientCertificateType::EcdsaSign);

        let mut supported_signature_algorithms = ArrayVec::new();
        for alg in SignatureAndHashAlgorithm::supported() {
            supported_signature_algorithms.push(*alg);
        }

        CertificateRequest {
            certificate_types,
            supported_signature_algorithms,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], CertificateRequest> {
        let (input, types_len) = be_u8(input)?;
        let (input, types_bytes) = take(types_len as usize)(input)?;
        let mut certificate_types = ArrayVec::new();
        for b in types_bytes {
            let _ = certificate_types.try_push(ClientCertificateType::from_u8(*b));
        }

        let (input, algs_len) = be_u16(input)?;
        let (input, mut algs_bytes) = take(algs_len as usize)(input)?;
        let mut supported_signature_algorithms = ArrayVec::new();
        while !algs_bytes.is_empty() {
            let (rest, alg) = SignatureAndHashAlgorithm::parse(algs_bytes)?;
            let _ = supported_signature_algorithms.try_push(alg);
            algs_bytes = rest;
        }

        let (input, cas_len) = be_u16(input)?;
        let (input, _cas) = take(cas_len as usize)(input)?;

        Ok((
            input,
            CertificateRequest {
                certificate_types,
                supported_signature_algorithms,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.push(self.certificate_types.len() as u8);
        for t in &self.certificate_types {
            output.push(t.as_u8());
        }
        output.extend_from_slice(
            &((self.supported_signature_algorithms.len() * 2) as u16).to_be_bytes(),
        );
        for alg in &self.supported_signature_algorithms {
            alg.serialize(output);
        }
        // Empty certificate_authorities.
        output.extend_from_slice(&0u16.to_be_bytes());
    }
}

impl Default for CertificateRequest {
    fn default() -> Self {
        Self::new()
    }
}

/// A DigitallySigned blob (RFC 5246 §4.7).
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct DigitallySigned {
    pub algorithm: SignatureAndHashAlgorithm,
    pub signature: Vec<u8>,
}

impl DigitallySigned {
    pub fn new(algorithm: SignatureAndHashAlgorithm, signature: Vec<u8>) -> Self {
        DigitallySigned {
            algorithm,
            signature,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], DigitallySigned> {
        let (input, algorithm) = SignatureAndHashAlgorithm::parse(input)?;
        let (input, sig_len) = be_u16(input)?;
        let (input, signature) = take(sig_len as usize)(input)?;

        if signature.is_empty() {
            return Err(Err::Failure(NomError::new(input, ErrorKind::LengthValue)));
        }

        Ok((
            input,
            DigitallySigned {
                algorithm,
                signature: signature.to_vec(),
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        self.algorithm.serialize(output);
        output.extend_from_slice(&(self.signature.len() as u16).to_be_bytes());
        output.extend_from_slice(&self.signature);
    }
}

/// CertificateVerify: a signature over the handshake transcript so far.
#[derive(Debug, PartialEq, Eq)]
pub struct CertificateVerify {
    pub signed: DigitallySigned,
}

impl CertificateVerify {
    pub fn new(signed: DigitallySigned) -> Self {
        CertificateVerify { signed }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], CertificateVerify> {
        let (input, signed) = DigitallySigned::parse(input)?;
        Ok((input, CertificateVerify { signed }))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        self.signed.serialize(output);
    }
}
