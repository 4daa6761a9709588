//! DTLS 1.2 record header, including the RFC 9146 CID variant.
//!
//! A `tls12_cid` (25) record carries the receiver's connection ID between
//! the sequence number and the length field. The true content type of such a
//! record is the last byte of the decrypted plaintext.

use std::fmt;
use std::ops::Range;

use nom::bytes::complete::take;
use nom::error::{Error as NomError, ErrorKind};
use nom::number::complete::be_u16;
use nom::{Err, IResult};

use super::{be_u48, ConnectionId, ContentType, ProtocolVersion, Sequence};

#[derive(PartialEq, Eq, Default)]
pub struct DtlsRecord {
    /// Content type on the wire. `Tls12Cid` for CID records.
    pub content_type: ContentType,
    pub version: ProtocolVersion,
    pub sequence: Sequence,
    /// Connection ID, empty unless `content_type` is `Tls12Cid`.
    pub cid: ConnectionId,
    /// Length of the fragment.
    pub length: u16,
    /// Range of the fragment in the source buffer.
    pub fragment_range: Range<usize>,
}

impl DtlsRecord {
    /// Header length without CID: type(1) + version(2) + epoch(2) + seq(6) + length(2).
    pub const HEADER_LEN: usize = 13;

    /// Explicit nonce prefix length under AES-GCM record protection.
    pub const EXPLICIT_NONCE_LEN: usize = 8;

    /// Inspect the start of `packet` and return the total wire length of the
    /// first record. `local_cid_len` is the length of CIDs this endpoint
    /// hands out; CID records from the peer must carry exactly that many
    /// bytes (out-of-band agreement from the handshake).
    pub fn peek_record_len(packet: &[u8], local_cid_len: usize) -> Option<usize> {
        if packet.len() < Self::HEADER_LEN {
            return None;
        }
        let cid_len = if ContentType::from_u8(packet[0]) == ContentType::Tls12Cid {
            local_cid_len
        } else {
            0
        };
        let length_at = 11 + cid_len;
        if packet.len() < length_at + 2 {
            return None;
        }
        let length = u16::from_be_bytes([packet[length_at], packet[length_at + 1]]) as usize;
        Some(length_at + 2 + length)
    }

    /// Parse one record. The fragment is left untouched (decryption happens
    /// on a copy at the engine level).
    pub fn parse(
        input: &[u8],
        base_offset: usize,
        local_cid_len: usize,
    ) -> IResult<&[u8], DtlsRecord> {
        let original_input = input;
        let (input, content_type) = ContentType::parse(input)?;
        let (input, version) = ProtocolVersion::parse(input)?;

        // The record layer accepts DTLS 1.0 during epoch 0 for compatibility;
        // handshake-level negotiation enforces the protocol version proper.
        match version {
            ProtocolVersion::DTLS1_0 | ProtocolVersion::DTLS1_2 => {}
            _ => {
                return Err(Err::Failure(NomError::new(input, ErrorKind::Tag)));
            }
        }

        let (input, epoch) = be_u16(input)?;
        let (input, sequence_number) = be_u48(input)?;

        let (input, cid) = if content_type == ContentType::Tls12Cid {
            let (input, cid_bytes) = take(local_cid_len)(input)?;
            let cid = ConnectionId::try_new(cid_bytes)
                .map_err(|_| Err::Failure(NomError::new(input, ErrorKind::LengthValue)))?;
            (input, cid)
        } else {
            (input, ConnectionId::empty())
        };

        let (input, length) = be_u16(input)?;
        let (rest, fragment_slice) = take(length as usize)(input)?;

        let relative_offset = fragment_slice.as_ptr() as usize - original_input.as_ptr() as usize;
        let start = base_offset + relative_offset;
        let end = start + fragment_slice.len();

        let sequence = Sequence {
            epoch,
            sequence_number,
        };

        Ok((
            rest,
            DtlsRecord {
                content_type,
                version,
                sequence,
                cid,
                length,
                fragment_range: start..end,
            },
        ))
    }

    /// Get the fragment data from the source buffer.
    pub fn fragment<'a>(&self, buf: &'a [u8]) -> &'a [u8] {
        &buf[self.fragment_range.clone()]
    }

    /// Serialize this record to the output buffer.
    pub fn serialize(&self, buf: &[u8], output: &mut Vec<u8>) {
        output.push(self.content_type.as_u8());
        self.version.serialize(output);
        output.extend_from_slice(&self.sequence.epoch.to_be_bytes());
        output.extend_from_slice(&self.sequence.sequence_number.to_be_bytes()[2..]);
        if self.content_type == ContentType::Tls12Cid {
            output.extend_from_slice(&self.cid);
        }
        output.extend_from_slice(&self.length.to_be_bytes());
        output.extend_from_slice(self.fragment(buf));
    }

    /// The explicit AEAD nonce at the start of an encrypted fragment.
    pub fn nonce<'a>(&self, buf: &'a [u8]) -> &'a [u8] {
        let fragment = self.fragment(buf);
        &fragment[..Self::EXPLICIT_NONCE_LEN]
    }
}

impl fmt::Debug for DtlsRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DtlsRecord")
            .field("content_type", &self.content_type)
            .field("version", &self.version)
            .field("sequence", &self.sequence)
            .field("cid", &self.cid)
            .field("length", &self.length)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECORD: &[u8] = &[
        0x16, // ContentType::Handshake
        0xFE, 0xFD, // DTLS 1.2
        0x00, 0x01, // epoch
        0x00, 0x00, 0x00, 0x00, 0x00, 0x01, // sequence_number
        0x00, 0x04, // length
        0x01, 0x02, 0x03, 0x04, // fragment
    ];

    const CID_RECORD: &[u8] = &[
        0x19, // ContentType::Tls12Cid
        0xFE, 0xFD, // DTLS 1.2
        0x00, 0x01, // epoch
        0x00, 0x00, 0x00, 0x00, 0x00, 0x07, // sequence_number
        0xAA, 0xBB, 0xCC, // cid (3 bytes)
        0x00, 0x02, // length
        0x10, 0x20, // fragment
    ];

    #[test]
    fn roundtrip() {
        let (rest, parsed) = DtlsRecord::parse(RECORD, 0, 0).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed.content_type, ContentType::Handshake);
        assert_eq!(parsed.sequence.epoch, 1);

        let mut out = Vec::new();
        parsed.serialize(RECORD, &mut out);
        assert_eq!(&*out, RECORD);
    }

    #[test]
    fn roundtrip_with_cid() {
        let (rest, parsed) = DtlsRecord::parse(CID_RECORD, 0, 3).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed.content_type, ContentType::Tls12Cid);
        assert_eq!(&*parsed.cid, &[0xAA, 0xBB, 0xCC]);
        assert_eq!(parsed.length, 2);

        let mut out = Vec::new();
        parsed.serialize(CID_RECORD, &mut out);
        assert_eq!(&*out, CID_RECORD);
    }

    #[test]
    fn peek_record_len_accounts_for_cid() {
        assert_eq!(DtlsRecord::peek_record_len(RECORD, 0), Some(RECORD.len()));
        assert_eq!(
            DtlsRecord::peek_record_len(CID_RECORD, 3),
            Some(CID_RECORD.len())
        );
        assert_eq!(DtlsRecord::peek_record_len(&RECORD[..10], 0), None);
    }

    #[test]
    fn rejects_unknown_record_version() {
        let mut bad = RECORD.to_vec();
        bad[1] = 0x03; // TLS, not DTLS
        bad[2] = 0x03;
        assert!(DtlsRecord::parse(&bad, 0, 0).is_err());
    }
}
