//! ServerHello.

use nom::error::{Error as NomError, ErrorKind};
use nom::{Err, IResult};

use super::extension::{Extension, ExtensionVec};
use super::{CipherSuite, CompressionMethod, ProtocolVersion, Random, SessionId};

#[derive(Debug, PartialEq, Eq)]
pub struct ServerHello {
    pub server_version: ProtocolVersion,
    pub random: Random,
    pub session_id: SessionId,
    pub cipher_suite: CipherSuite,
    pub compression_method: CompressionMethod,
    pub extensions: ExtensionVec,
}

impl ServerHello {
    pub fn new(
        server_version: ProtocolVersion,
        random: Random,
        session_id: SessionId,
        cipher_suite: CipherSuite,
    ) -> Self {
        ServerHello {
            server_version,
            random,
            session_id,
            cipher_suite,
            compression_method: CompressionMethod::Null,
            extensions: ExtensionVec::new(),
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], ServerHello> {
        let (input, server_version) = ProtocolVersion::parse(input)?;
        let (input, random) = Random::parse(input)?;
        let (input, session_id) = SessionId::parse(input)?;
        let (input, cipher_suite) = CipherSuite::parse(input)?;
        let (input, compression_method) = CompressionMethod::parse(input)?;

        // A server selecting something we never offered is a negotiation
        // violation, caught here rather than in the state machine.
        if !cipher_suite.is_supported() {
            return Err(Err::Failure(NomError::new(input, ErrorKind::Tag)));
        }

        let (input, extensions) = Extension::parse_all(input)?;

        Ok((
            input,
            ServerHello {
                server_version,
                random,
                session_id,
                cipher_suite,
                compression_method,
                extensions,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        self.server_version.serialize(output);
        self.random.serialize(output);
        self.session_id.serialize(output);
        output.extend_from_slice(&self.cipher_suite.as_u16().to_be_bytes());
        output.push(self.compression_method.as_u8());
        Extension::serialize_all(&self.extensions, output);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::extension::MaxFragmentLengthExtension;

    #[test]
    fn roundtrip_with_extension() {
        let random = Random::new([7; 32]);
        let session_id = SessionId::try_new(&[1, 2]).unwrap();
        let mut sh = ServerHello::new(
            ProtocolVersion::DTLS1_2,
            random,
            session_id,
            CipherSuite::PSK_AES128_GCM_SHA256,
        );
        sh.extensions
            .push(MaxFragmentLengthExtension { code: 2 }.to_extension());

        let mut out = Vec::new();
        sh.serialize(&mut out);

        let (rest, parsed) = ServerHello::parse(&out).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, sh);
    }

    #[test]
    fn rejects_unknown_cipher_suite() {
        let random = Random::new([7; 32]);
        let mut sh = ServerHello::new(
            ProtocolVersion::DTLS1_2,
            random,
            SessionId::empty(),
            CipherSuite::PSK_AES128_GCM_SHA256,
        );
        sh.cipher_suite = CipherSuite::Unknown(0x0000);

        let mut out = Vec::new();
        sh.serialize(&mut out);
        assert!(ServerHello::parse(&out).is_err());
    }
}
