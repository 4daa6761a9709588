//! HelloVerifyRequest (RFC 6347 §4.2.1).

use nom::error::{Error as NomError, ErrorKind};
use nom::IResult;

use super::{Cookie, ProtocolVersion};

#[derive(Debug, PartialEq, Eq)]
pub struct HelloVerifyRequest {
    pub server_version: ProtocolVersion,
    pub cookie: Cookie,
}

impl HelloVerifyRequest {
    pub fn new(server_version: ProtocolVersion, cookie: Cookie) -> Self {
        HelloVerifyRequest {
            server_version,
            cookie,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], HelloVerifyRequest> {
        let (input, server_version) = ProtocolVersion::parse(input)?;
        let (input, cookie) = Cookie::parse(input)?;

        // An HVR exists only to transport a cookie.
        if cookie.is_empty() {
            return Err(nom::Err::Failure(NomError::new(
                input,
                ErrorKind::LengthValue,
            )));
        }

        Ok((
            input,
            HelloVerifyRequest {
                server_version,
                cookie,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        self.server_version.serialize(output);
        self.cookie.serialize(output);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let cookie = Cookie::try_new(&[0xBB; 32]).unwrap();
        let hvr = HelloVerifyRequest::new(ProtocolVersion::DTLS1_2, cookie);

        let mut out = Vec::new();
        hvr.serialize(&mut out);

        let (rest, parsed) = HelloVerifyRequest::parse(&out).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, hvr);
    }

    #[test]
    fn empty_cookie_is_rejected() {
        let message: &[u8] = &[0xFE, 0xFD, 0x00];
        assert!(HelloVerifyRequest::parse(message).is_err());
    }
}
