//! ServerKeyExchange and ClientKeyExchange bodies.
//!
//! The layout depends on the negotiated key exchange: ECDHE carries curve
//! parameters (signed by the server for certificate suites), PSK carries an
//! identity (hint), ECDHE_PSK combines both (RFC 5489).

use nom::bytes::complete::take;
use nom::error::{Error as NomError, ErrorKind};
use nom::number::complete::{be_u16, be_u8};
use nom::{Err, IResult};

use super::certificate::DigitallySigned;
use super::{CipherSuite, KeyExchangeAlgorithm, NamedGroup, PskIdentity};

// ECCurveType from RFC 8422; only named curves are representable.
const CURVE_TYPE_NAMED: u8 = 3;

/// ServerECDHParams: a named group and an uncompressed EC point.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct EcdheParams {
    pub group: NamedGroup,
    pub public_key: Vec<u8>,
}

impl EcdheParams {
    pub fn new(group: NamedGroup, public_key: Vec<u8>) -> Self {
        EcdheParams { group, public_key }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], EcdheParams> {
        let (input, curve_type) = be_u8(input)?;
        if curve_type != CURVE_TYPE_NAMED {
            return Err(Err::Failure(NomError::new(input, ErrorKind::Tag)));
        }
        let (input, group) = NamedGroup::parse(input)?;
        let (input, point_len) = be_u8(input)?;
        let (input, point) = take(point_len as usize)(input)?;

        Ok((
            input,
            EcdheParams {
                group,
                public_key: point.to_vec(),
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.push(CURVE_TYPE_NAMED);
        output.extend_from_slice(&self.group.as_u16().to_be_bytes());
        output.push(self.public_key.len() as u8);
        output.extend_from_slice(&self.public_key);
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ServerKeyExchange {
    Ecdhe {
        params: EcdheParams,
        signed: DigitallySigned,
    },
    Psk {
        identity_hint: Vec<u8>,
    },
    EcdhePsk {
        identity_hint: Vec<u8>,
        params: EcdheParams,
    },
}

impl ServerKeyExchange {
    pub fn parse(input: &[u8], suite: Option<CipherSuite>) -> IResult<&[u8], ServerKeyExchange> {
        let suite = suite.ok_or_else(|| Err::Failure(NomError::new(input, ErrorKind::Fail)))?;

        match suite.key_exchange_algorithm() {
            KeyExchangeAlgorithm::EcdheEcdsa => {
                let (input, params) = EcdheParams::parse(input)?;
                let (input, signed) = DigitallySigned::parse(input)?;
                Ok((input, ServerKeyExchange::Ecdhe { params, signed }))
            }
            KeyExchangeAlgorithm::Psk => {
                let (input, hint_len) = be_u16(input)?;
                let (input, hint) = take(hint_len as usize)(input)?;
                Ok((
                    input,
                    ServerKeyExchange::Psk {
                        identity_hint: hint.to_vec(),
                    },
                ))
            }
            KeyExchangeAlgorithm::EcdhePsk => {
                let (input, hint_len) = be_u16(input)?;
                let (input, hint) = take(hint_len as usize)(input)?;
                let (input, params) = EcdheParams::parse(input)?;
                Ok((
                    input,
                    ServerKeyExchange::EcdhePsk {
                        identity_hint: hint.to_vec(),
                        params,
                    },
                ))
            }
            KeyExchangeAlgorithm::Unknown => {
                Err(Err::Failure(NomError::new(input, ErrorKind::Fail)))
            }
        }
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        match self {
            ServerKeyExchange::Ecdhe { params, signed } => {
                params.serialize(output);
                signed.serialize(output);
            }
            ServerKeyExchange::Psk { identity_hint } => {
                output.extend_from_slice(&(identity_hint.len() as u16).to_be_bytes());
                output.extend_from_slice(identity_hint);
            }
            ServerKeyExchange::EcdhePsk {
                identity_hint,
                params,
            } => {
                output.extend_from_slice(&(identity_hint.len() as u16).to_be_bytes());
                output.extend_from_slice(identity_hint);
                params.serialize(output);
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ClientKeyExchange {
    Ecdhe {
        public_key: Vec<u8>,
    },
    Psk {
        identity: PskIdentity,
    },
    EcdhePsk {
        identity: PskIdentity,
        public_key: Vec<u8>,
    },
}

impl ClientKeyExchange {
    pub fn parse(input: &[u8], suite: Option<CipherSuite>) -> IResult<&[u8], ClientKeyExchange> {
        let suite = suite.ok_or_else(|| Err::Failure(NomError::new(input, ErrorKind::Fail)))?;

        match suite.key_exchange_algorithm() {
            KeyExchangeAlgorithm::EcdheEcdsa => {
                let (input, point_len) = be_u8(input)?;
                let (input, point) = take(point_len as usize)(input)?;
                Ok((
                    input,
                    ClientKeyExchange::Ecdhe {
                        public_key: point.to_vec(),
                    },
                ))
            }
            KeyExchangeAlgorithm::Psk => {
                let (input, identity) = Self::parse_identity(input)?;
                Ok((input, ClientKeyExchange::Psk { identity }))
            }
            KeyExchangeAlgorithm::EcdhePsk => {
                let (input, identity) = Self::parse_identity(input)?;
                let (input, point_len) = be_u8(input)?;
                let (input, point) = take(point_len as usize)(input)?;
                Ok((
                    input,
                    ClientKeyExchange::EcdhePsk {
                        identity,
                        public_key: point.to_vec(),
                    },
                ))
            }
            KeyExchangeAlgorithm::Unknown => {
                Err(Err::Failure(NomError::new(input, ErrorKind::Fail)))
            }
        }
    }

    fn parse_identity(input: &[u8]) -> IResult<&[u8], PskIdentity> {
        let (input, len) = be_u16(input)?;
        let (input, bytes) = take(len as usize)(input)?;
        let identity = PskIdentity::try_new(bytes)
            .map_err(|_| Err::Failure(NomError::new(input, ErrorKind::LengthValue)))?;
        Ok((input, identity))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        match self {
            ClientKeyExchange::Ecdhe { public_key } => {
                output.push(public_key.len() as u8);
                output.extend_from_slice(public_key);
            }
            ClientKeyExchange::Psk { identity } => {
                output.extend_from_slice(&(identity.len() as u16).to_be_bytes());
                output.extend_from_slice(identity);
            }
            ClientKeyExchange::EcdhePsk {
                identity,
                public_key,
            } => {
                output.extend_from_slice(&(identity.len() as u16).to_be_bytes());
                output.extend_from_slice(identity);
                output.push(public_key.len() as u8);
                output.extend_from_slice(public_key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{HashAlgorithm, SignatureAlgorithm, SignatureAndHashAlgorithm};

    #[test]
    fn ecdhe_server_key_exchange_roundtrip() {
        let ske = ServerKeyExchange::Ecdhe {
            params: EcdheParams::new(NamedGroup::Secp256r1, vec![4; 65]),
            signed: DigitallySigned::new(
                SignatureAndHashAlgorithm::new(HashAlgorithm::SHA256, SignatureAlgorithm::ECDSA),
                vec![1, 2, 3],
            ),
        };
        let mut out = Vec::new();
        ske.serialize(&mut out);

        let (rest, parsed) =
            ServerKeyExchange::parse(&out, Some(CipherSuite::ECDHE_ECDSA_AES128_GCM_SHA256))
                .unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, ske);
    }

    #[test]
    fn psk_hint_roundtrip() {
        let ske = ServerKeyExchange::Psk {
            identity_hint: b"hint".to_vec(),
        };
        let mut out = Vec::new();
        ske.serialize(&mut out);

        let (rest, parsed) =
            ServerKeyExchange::parse(&out, Some(CipherSuite::PSK_AES128_GCM_SHA256)).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, ske);
    }

    #[test]
    fn ecdhe_psk_client_key_exchange_roundtrip() {
        let cke = ClientKeyExchange::EcdhePsk {
            identity: PskIdentity::try_new(b"device-1").unwrap(),
            public_key: vec![4; 65],
        };
        let mut out = Vec::new();
        cke.serialize(&mut out);

        let (rest, parsed) =
            ClientKeyExchange::parse(&out, Some(CipherSuite::ECDHE_PSK_AES128_GCM_SHA256)).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, cke);
    }

    #[test]
    fn key_exchange_needs_suite_context() {
        assert!(ClientKeyExchange::parse(&[0, 1, 2], None).is_err());
        assert!(ServerKeyExchange::parse(&[0, 1, 2], None).is_err());
    }
}
