//! Handshake message header, types and body dispatch.

use nom::bytes::complete::take;
use nom::number::complete::{be_u16, be_u24, be_u8};
use nom::IResult;

use super::certificate::{CertificateMessage, CertificateRequest, CertificateVerify};
use super::client_hello::ClientHello;
use super::finished::Finished;
use super::hello_verify::HelloVerifyRequest;
use super::key_exchange::{ClientKeyExchange, ServerKeyExchange};
use super::server_hello::ServerHello;
use super::{CertificateType, CipherSuite};

#[derive(Debug, PartialEq, Eq, Default, Clone, Copy)]
pub struct HandshakeHeader {
    pub msg_type: MessageType,
    pub length: u32,
    pub message_seq: u16,
    pub fragment_offset: u32,
    pub fragment_length: u32,
}

impl HandshakeHeader {
    /// Wire length of the handshake header.
    pub const LEN: usize = 12;

    pub fn parse(input: &[u8]) -> IResult<&[u8], HandshakeHeader> {
        let (input, msg_type) = MessageType::parse(input)?;
        let (input, length) = be_u24(input)?;
        let (input, message_seq) = be_u16(input)?;
        let (input, fragment_offset) = be_u24(input)?;
        let (input, fragment_length) = be_u24(input)?;

        Ok((
            input,
            HandshakeHeader {
                msg_type,
                length,
                message_seq,
                fragment_offset,
                fragment_length,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.push(self.msg_type.as_u8());
        output.extend_from_slice(&self.length.to_be_bytes()[1..]);
        output.extend_from_slice(&self.message_seq.to_be_bytes());
        output.extend_from_slice(&self.fragment_offset.to_be_bytes()[1..]);
        output.extend_from_slice(&self.fragment_length.to_be_bytes()[1..]);
    }

    /// Whether this fragment spans the whole message.
    pub fn is_whole_message(&self) -> bool {
        self.fragment_offset == 0 && self.fragment_length == self.length
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    HelloRequest,
    ClientHello,
    ServerHello,
    HelloVerifyRequest,
    Certificate,
    ServerKeyExchange,
    CertificateRequest,
    ServerHelloDone,
    CertificateVerify,
    ClientKeyExchange,
    Finished,
    Unknown(u8),
}

impl Default for MessageType {
    fn default() -> Self {
        Self::Unknown(0)
    }
}

impl MessageType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => MessageType::HelloRequest,
            1 => MessageType::ClientHello,
            2 => MessageType::ServerHello,
            3 => MessageType::HelloVerifyRequest,
            11 => MessageType::Certificate,
            12 => MessageType::ServerKeyExchange,
            13 => MessageType::CertificateRequest,
            14 => MessageType::ServerHelloDone,
            15 => MessageType::CertificateVerify,
            16 => MessageType::ClientKeyExchange,
            20 => MessageType::Finished,
            _ => MessageType::Unknown(value),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            MessageType::HelloRequest => 0,
            MessageType::ClientHello => 1,
            MessageType::ServerHello => 2,
            MessageType::HelloVerifyRequest => 3,
            MessageType::Certificate => 11,
            MessageType::ServerKeyExchange => 12,
            MessageType::CertificateRequest => 13,
            MessageType::ServerHelloDone => 14,
            MessageType::CertificateVerify => 15,
            MessageType::ClientKeyExchange => 16,
            MessageType::Finished => 20,
            MessageType::Unknown(value) => *value,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], MessageType> {
        let (input, byte) = be_u8(input)?;
        Ok((input, Self::from_u8(byte)))
    }

    /// The epoch this message is sent under. Only Finished crosses the
    /// CHANGE_CIPHER_SPEC boundary.
    pub fn epoch(&self) -> u16 {
        if matches!(self, MessageType::Finished) {
            1
        } else {
            0
        }
    }
}

/// Context needed to parse bodies whose layout depends on negotiation.
#[derive(Debug, Clone, Copy)]
pub struct ParseContext {
    pub cipher_suite: Option<CipherSuite>,
    /// Certificate representation expected from the peer.
    pub peer_cert_type: CertificateType,
}

impl Default for ParseContext {
    fn default() -> Self {
        ParseContext {
            cipher_suite: None,
            peer_cert_type: CertificateType::X509,
        }
    }
}

#[derive(Debug)]
#[allow(clippy::large_enum_variant)]
pub enum Body {
    HelloRequest,
    ClientHello(ClientHello),
    ServerHello(ServerHello),
    HelloVerifyRequest(HelloVerifyRequest),
    Certificate(CertificateMessage),
    ServerKeyExchange(ServerKeyExchange),
    CertificateRequest(CertificateRequest),
    ServerHelloDone,
    CertificateVerify(CertificateVerify),
    ClientKeyExchange(ClientKeyExchange),
    Finished(Finished),
    Unknown(u8),
}

impl Body {
    pub fn parse<'a>(
        input: &'a [u8],
        m: MessageType,
        ctx: &ParseContext,
    ) -> IResult<&'a [u8], Body> {
        match m {
            MessageType::HelloRequest => Ok((input, Body::HelloRequest)),
            MessageType::ClientHello => {
                let (input, ch) = ClientHello::parse(input)?;
                Ok((input, Body::ClientHello(ch)))
            }
            MessageType::ServerHello => {
                let (input, sh) = ServerHello::parse(input)?;
                Ok((input, Body::ServerHello(sh)))
            }
            MessageType::HelloVerifyRequest => {
                let (input, hvr) = HelloVerifyRequest::parse(input)?;
                Ok((input, Body::HelloVerifyRequest(hvr)))
            }
            MessageType::Certificate => {
                let (input, cert) = CertificateMessage::parse(input, ctx.peer_cert_type)?;
                Ok((input, Body::Certificate(cert)))
            }
            MessageType::ServerKeyExchange => {
                let (input, ske) = ServerKeyExchange::parse(input, ctx.cipher_suite)?;
                Ok((input, Body::ServerKeyExchange(ske)))
            }
            MessageType::CertificateRequest => {
                let (input, cr) = CertificateRequest::parse(input)?;
                Ok((input, Body::CertificateRequest(cr)))
            }
            MessageType::ServerHelloDone => Ok((input, Body::ServerHelloDone)),
            MessageType::CertificateVerify => {
                let (input, cv) = CertificateVerify::parse(input)?;
                Ok((input, Body::CertificateVerify(cv)))
            }
            MessageType::ClientKeyExchange => {
                let (input, cke) = ClientKeyExchange::parse(input, ctx.cipher_suite)?;
                Ok((input, Body::ClientKeyExchange(cke)))
            }
            MessageType::Finished => {
                let (input, fin) = Finished::parse(input)?;
                Ok((input, Body::Finished(fin)))
            }
            MessageType::Unknown(value) => Ok((input, Body::Unknown(value))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let header = HandshakeHeader {
            msg_type: MessageType::ServerHelloDone,
            length: 0,
            message_seq: 4,
            fragment_offset: 0,
            fragment_length: 0,
        };

        let mut out = Vec::new();
        header.serialize(&mut out);
        assert_eq!(out.len(), HandshakeHeader::LEN);

        let (rest, parsed) = HandshakeHeader::parse(&out).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, header);
        assert!(parsed.is_whole_message());
    }

    #[test]
    fn fragment_header_is_not_whole_message() {
        let header = HandshakeHeader {
            msg_type: MessageType::Certificate,
            length: 1000,
            message_seq: 2,
            fragment_offset: 500,
            fragment_length: 200,
        };
        assert!(!header.is_whole_message());
    }

    #[test]
    fn finished_crosses_the_epoch_boundary() {
        assert_eq!(MessageType::Finished.epoch(), 1);
        assert_eq!(MessageType::ClientHello.epoch(), 0);
        assert_eq!(MessageType::ClientKeyExchange.epoch(), 0);
    }
}
