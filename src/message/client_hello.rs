//! ClientHello.

use arrayvec::ArrayVec;
use nom::bytes::complete::take;
use nom::error::{Error as NomError, ErrorKind};
use nom::number::complete::{be_u16, be_u8};
use nom::{Err, IResult};

use super::extension::{Extension, ExtensionVec};
use super::{
    CipherSuite, CipherSuiteVec, CompressionMethod, CompressionMethodVec, Cookie, ProtocolVersion,
    Random, SessionId,
};

#[derive(Debug, PartialEq, Eq)]
pub struct ClientHello {
    pub client_version: ProtocolVersion,
    pub random: Random,
    pub session_id: SessionId,
    pub cookie: Cookie,
    /// Offered suites in client preference order. Suites this implementation
    /// does not recognize are dropped during parsing.
    pub cipher_suites: CipherSuiteVec,
    pub compression_methods: CompressionMethodVec,
    pub extensions: ExtensionVec,
}

impl ClientHello {
    pub fn new(
        client_version: ProtocolVersion,
        random: Random,
        session_id: SessionId,
        cookie: Cookie,
        cipher_suites: CipherSuiteVec,
    ) -> Self {
        let mut compression_methods = ArrayVec::new();
        compression_methods.push(CompressionMethod::Null);

        ClientHello {
            client_version,
            random,
            session_id,
            cookie,
            cipher_suites,
            compression_methods,
            extensions: ArrayVec::new(),
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], ClientHello> {
        let (input, client_version) = ProtocolVersion::parse(input)?;
        let (input, random) = Random::parse(input)?;
        let (input, session_id) = SessionId::parse(input)?;
        let (input, cookie) = Cookie::parse(input)?;

        let (input, cipher_suites_len) = be_u16(input)?;
        if cipher_suites_len % 2 != 0 {
            return Err(Err::Failure(NomError::new(input, ErrorKind::LengthValue)));
        }
        let (input, mut suites_bytes) = take(cipher_suites_len as usize)(input)?;
        let mut cipher_suites = ArrayVec::new();
        while !suites_bytes.is_empty() {
            let (rest, suite) = CipherSuite::parse(suites_bytes)?;
            if suite.is_supported() {
                // Capacity overflow just drops trailing suites.
                let _ = cipher_suites.try_push(suite);
            }
            suites_bytes = rest;
        }

        let (input, compression_len) = be_u8(input)?;
        let (input, compression_bytes) = take(compression_len as usize)(input)?;
        let mut compression_methods = ArrayVec::new();
        for b in compression_bytes {
            let _ = compression_methods.try_push(CompressionMethod::from_u8(*b));
        }
        if compression_methods.is_empty() {
            return Err(Err::Failure(NomError::new(input, ErrorKind::Many1)));
        }

        let (input, extensions) = Extension::parse_all(input)?;

        Ok((
            input,
            ClientHello {
                client_version,
                random,
                session_id,
                cookie,
                cipher_suites,
                compression_methods,
                extensions,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        self.client_version.serialize(output);
        self.random.serialize(output);
        self.session_id.serialize(output);
        self.cookie.serialize(output);
        output.extend_from_slice(&((self.cipher_suites.len() * 2) as u16).to_be_bytes());
        for suite in &self.cipher_suites {
            output.extend_from_slice(&suite.as_u16().to_be_bytes());
        }
        output.push(self.compression_methods.len() as u8);
        for method in &self.compression_methods {
            output.push(method.as_u8());
        }
        Extension::serialize_all(&self.extensions, output);
    }

    pub fn offers_null_compression(&self) -> bool {
        self.compression_methods
            .iter()
            .any(|m| *m == CompressionMethod::Null)
    }
}
