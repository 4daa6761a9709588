//! Hello extensions.
//!
//! Extensions are carried as owned `(type, data)` pairs; the typed structs
//! below parse and serialize the data payloads this implementation uses.

use arrayvec::ArrayVec;
use nom::bytes::complete::take;
use nom::error::{Error as NomError, ErrorKind};
use nom::number::complete::{be_u16, be_u8};
use nom::{Err, IResult};

use super::{
    CertificateType, CertificateTypeVec, ConnectionId, NamedGroup, NamedGroupVec,
    SignatureAndHashAlgorithm, SignatureAndHashAlgorithmVec,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionType {
    ServerName,
    MaxFragmentLength,
    SupportedGroups,
    EcPointFormats,
    SignatureAlgorithms,
    ClientCertificateType,
    ServerCertificateType,
    ConnectionId,
    Unknown(u16),
}

impl ExtensionType {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => ExtensionType::ServerName,
            1 => ExtensionType::MaxFragmentLength,
            10 => ExtensionType::SupportedGroups,
            11 => ExtensionType::EcPointFormats,
            13 => ExtensionType::SignatureAlgorithms,
            19 => ExtensionType::ClientCertificateType,
            20 => ExtensionType::ServerCertificateType,
            54 => ExtensionType::ConnectionId,
            _ => ExtensionType::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            ExtensionType::ServerName => 0,
            ExtensionType::MaxFragmentLength => 1,
            ExtensionType::SupportedGroups => 10,
            ExtensionType::EcPointFormats => 11,
            ExtensionType::SignatureAlgorithms => 13,
            ExtensionType::ClientCertificateType => 19,
            ExtensionType::ServerCertificateType => 20,
            ExtensionType::ConnectionId => 54,
            ExtensionType::Unknown(value) => *value,
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, ExtensionType::Unknown(_))
    }
}

pub type ExtensionVec = ArrayVec<Extension, 16>;

/// A raw extension: type plus opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extension {
    pub extension_type: ExtensionType,
    pub data: Vec<u8>,
}

impl Extension {
    pub fn new(extension_type: ExtensionType, data: Vec<u8>) -> Self {
        Extension {
            extension_type,
            data,
        }
    }

    fn parse_one(input: &[u8]) -> IResult<&[u8], Extension> {
        let (input, ty) = be_u16(input)?;
        let (input, len) = be_u16(input)?;
        let (input, data) = take(len as usize)(input)?;
        Ok((
            input,
            Extension {
                extension_type: ExtensionType::from_u16(ty),
                data: data.to_vec(),
            },
        ))
    }

    /// Parse an extensions block. An absent block (empty input) is legal and
    /// yields no extensions. Unknown extension types are kept so callers can
    /// ignore them knowingly.
    pub fn parse_all(input: &[u8]) -> IResult<&[u8], ExtensionVec> {
        let mut extensions = ArrayVec::new();

        if input.is_empty() {
            return Ok((input, extensions));
        }

        let (input, total_len) = be_u16(input)?;
        let (input, mut block) = take(total_len as usize)(input)?;

        while !block.is_empty() {
            let (rest, extension) = Self::parse_one(block)?;
            if extensions.try_push(extension).is_err() {
                return Err(Err::Failure(NomError::new(rest, ErrorKind::Count)));
            }
            block = rest;
        }

        Ok((input, extensions))
    }

    /// Serialize an extensions block; nothing is written for an empty list.
    pub fn serialize_all(extensions: &[Extension], output: &mut Vec<u8>) {
        if extensions.is_empty() {
            return;
        }

        let total: usize = extensions.iter().map(|e| 4 + e.data.len()).sum();
        output.extend_from_slice(&(total as u16).to_be_bytes());

        for ext in extensions {
            output.extend_from_slice(&ext.extension_type.as_u16().to_be_bytes());
            output.extend_from_slice(&(ext.data.len() as u16).to_be_bytes());
            output.extend_from_slice(&ext.data);
        }
    }
}

/// Find an extension by type.
pub fn find<'a>(extensions: &'a [Extension], ty: ExtensionType) -> Option<&'a Extension> {
    extensions.iter().find(|e| e.extension_type == ty)
}

/// supported_groups (RFC 8422): u16-length-prefixed list of group ids.
#[derive(Debug, PartialEq, Eq)]
pub struct SupportedGroupsExtension {
    pub groups: NamedGroupVec,
}

impl SupportedGroupsExtension {
    pub fn new(groups: &[NamedGroup]) -> Self {
        let mut v = ArrayVec::new();
        for g in groups.iter().take(v.capacity()) {
            v.push(*g);
        }
        SupportedGroupsExtension { groups: v }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], SupportedGroupsExtension> {
        let (input, len) = be_u16(input)?;
        let (input, mut list) = take(len as usize)(input)?;
        let mut groups = ArrayVec::new();
        while !list.is_empty() {
            let (rest, group) = NamedGroup::parse(list)?;
            // Unknown groups are skipped, not rejected.
            if group.is_supported() && groups.try_push(group).is_err() {
                break;
            }
            list = rest;
        }
        Ok((input, SupportedGroupsExtension { groups }))
    }

    pub fn to_extension(&self) -> Extension {
        let mut data = Vec::with_capacity(2 + self.groups.len() * 2);
        data.extend_from_slice(&((self.groups.len() * 2) as u16).to_be_bytes());
        for g in &self.groups {
            data.extend_from_slice(&g.as_u16().to_be_bytes());
        }
        Extension::new(ExtensionType::SupportedGroups, data)
    }
}

/// signature_algorithms (RFC 5246 §7.4.1.4.1).
#[derive(Debug, PartialEq, Eq)]
pub struct SignatureAlgorithmsExtension {
    pub algorithms: SignatureAndHashAlgorithmVec,
}

impl SignatureAlgorithmsExtension {
    pub fn supported() -> Self {
        let mut algorithms = ArrayVec::new();
        for alg in SignatureAndHashAlgorithm::supported() {
            algorithms.push(*alg);
        }
        SignatureAlgorithmsExtension { algorithms }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], SignatureAlgorithmsExtension> {
        let (input, len) = be_u16(input)?;
        let (input, mut list) = take(len as usize)(input)?;
        let mut algorithms = ArrayVec::new();
        while !list.is_empty() {
            let (rest, alg) = SignatureAndHashAlgorithm::parse(list)?;
            if alg.is_supported() && algorithms.try_push(alg).is_err() {
                break;
            }
            list = rest;
        }
        Ok((input, SignatureAlgorithmsExtension { algorithms }))
    }

    pub fn to_extension(&self) -> Extension {
        let mut data = Vec::with_capacity(2 + self.algorithms.len() * 2);
        data.extend_from_slice(&((self.algorithms.len() * 2) as u16).to_be_bytes());
        for alg in &self.algorithms {
            data.push(alg.hash.as_u8());
            data.push(alg.signature.as_u8());
        }
        Extension::new(ExtensionType::SignatureAlgorithms, data)
    }
}

/// max_fragment_length (RFC 6066 §4): a single code byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxFragmentLengthExtension {
    pub code: u8,
}

impl MaxFragmentLengthExtension {
    /// The negotiated fragment length in bytes, if the code is valid.
    pub fn fragment_length(&self) -> Option<usize> {
        match self.code {
            1 => Some(512),
            2 => Some(1024),
            3 => Some(2048),
            4 => Some(4096),
            _ => None,
        }
    }

    /// The largest legal code not exceeding `len` bytes.
    pub fn from_length(len: usize) -> Option<Self> {
        let code = match len {
            0..=511 => return None,
            512..=1023 => 1,
            1024..=2047 => 2,
            2048..=4095 => 3,
            _ => 4,
        };
        Some(MaxFragmentLengthExtension { code })
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], MaxFragmentLengthExtension> {
        let (input, code) = be_u8(input)?;
        Ok((input, MaxFragmentLengthExtension { code }))
    }

    pub fn to_extension(&self) -> Extension {
        Extension::new(ExtensionType::MaxFragmentLength, vec![self.code])
    }
}

/// server_name (RFC 6066 §3). Only `host_name` entries are understood; the
/// server echoes an empty payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerNameExtension {
    pub host_name: Option<String>,
}

impl ServerNameExtension {
    pub fn new(host_name: &str) -> Self {
        ServerNameExtension {
            host_name: Some(host_name.to_string()),
        }
    }

    pub fn empty() -> Self {
        ServerNameExtension { host_name: None }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], ServerNameExtension> {
        if input.is_empty() {
            return Ok((input, ServerNameExtension { host_name: None }));
        }
        let (input, list_len) = be_u16(input)?;
        let (input, mut list) = take(list_len as usize)(input)?;
        let mut host_name = None;
        while !list.is_empty() {
            let (rest, name_type) = be_u8(list)?;
            let (rest, len) = be_u16(rest)?;
            let (rest, name) = take(len as usize)(rest)?;
            if name_type == 0 && host_name.is_none() {
                let s = std::str::from_utf8(name)
                    .map_err(|_| Err::Failure(NomError::new(rest, ErrorKind::Char)))?;
                host_name = Some(s.to_string());
            }
            list = rest;
        }
        Ok((input, ServerNameExtension { host_name }))
    }

    pub fn to_extension(&self) -> Extension {
        let data = match &self.host_name {
            Some(name) => {
                let bytes = name.as_bytes();
                let mut data = Vec::with_capacity(5 + bytes.len());
                data.extend_from_slice(&((3 + bytes.len()) as u16).to_be_bytes());
                data.push(0); // host_name
                data.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
                data.extend_from_slice(bytes);
                data
            }
            None => Vec::new(),
        };
        Extension::new(ExtensionType::ServerName, data)
    }
}

/// connection_id (RFC 9146 §5): the CID the sender wants to receive.
/// A zero-length CID advertises support without using one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionIdExtension {
    pub cid: ConnectionId,
}

impl ConnectionIdExtension {
    pub fn new(cid: ConnectionId) -> Self {
        ConnectionIdExtension { cid }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], ConnectionIdExtension> {
        let (input, cid) = ConnectionId::parse(input)?;
        Ok((input, ConnectionIdExtension { cid }))
    }

    pub fn to_extension(&self) -> Extension {
        let mut data = Vec::with_capacity(1 + self.cid.len());
        data.push(self.cid.len() as u8);
        data.extend_from_slice(&self.cid);
        Extension::new(ExtensionType::ConnectionId, data)
    }
}

/// client_certificate_type / server_certificate_type (RFC 7250).
///
/// The client sends a length-prefixed preference list; the server answers
/// with the single selected type.
#[derive(Debug, PartialEq, Eq)]
pub struct CertTypeListExtension {
    pub types: CertificateTypeVec,
}

impl CertTypeListExtension {
    pub fn new(types: &[CertificateType]) -> Self {
        let mut v = ArrayVec::new();
        for t in types.iter().take(v.capacity()) {
            v.push(*t);
        }
        CertTypeListExtension { types: v }
    }

    pub fn parse_list(input: &[u8]) -> IResult<&[u8], CertTypeListExtension> {
        let (input, len) = be_u8(input)?;
        let (input, list) = take(len as usize)(input)?;
        let mut types = ArrayVec::new();
        for b in list {
            let t = CertificateType::from_u8(*b);
            if t.is_supported() && types.try_push(t).is_err() {
                break;
            }
        }
        Ok((input, CertTypeListExtension { types }))
    }

    pub fn parse_single(input: &[u8]) -> IResult<&[u8], CertificateType> {
        let (input, b) = be_u8(input)?;
        Ok((input, CertificateType::from_u8(b)))
    }

    pub fn to_list_extension(&self, ty: ExtensionType) -> Extension {
        let mut data = Vec::with_capacity(1 + self.types.len());
        data.push(self.types.len() as u8);
        for t in &self.types {
            data.push(t.as_u8());
        }
        Extension::new(ty, data)
    }

    pub fn to_single_extension(selected: CertificateType, ty: ExtensionType) -> Extension {
        Extension::new(ty, vec![selected.as_u8()])
    }
}

/// ec_point_formats (RFC 8422 §5.1.2); only uncompressed is ever used.
pub fn ec_point_formats_extension() -> Extension {
    Extension::new(ExtensionType::EcPointFormats, vec![1, 0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_block_roundtrip() {
        let exts = vec![
            SupportedGroupsExtension::new(NamedGroup::all()).to_extension(),
            SignatureAlgorithmsExtension::supported().to_extension(),
            MaxFragmentLengthExtension { code: 2 }.to_extension(),
        ];

        let mut out = Vec::new();
        Extension::serialize_all(&exts, &mut out);

        let (rest, parsed) = Extension::parse_all(&out).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[0].extension_type, ExtensionType::SupportedGroups);
        assert_eq!(parsed[2].extension_type, ExtensionType::MaxFragmentLength);
    }

    #[test]
    fn supported_groups_skips_unknown() {
        // x25519 (29) is not supported and must be skipped.
        let data = [0x00, 0x06, 0x00, 0x1D, 0x00, 0x17, 0x00, 0x18];
        let (_, ext) = SupportedGroupsExtension::parse(&data).unwrap();
        assert_eq!(&ext.groups[..], &[NamedGroup::Secp256r1, NamedGroup::Secp384r1]);
    }

    #[test]
    fn max_fragment_length_codes() {
        assert_eq!(MaxFragmentLengthExtension { code: 1 }.fragment_length(), Some(512));
        assert_eq!(MaxFragmentLengthExtension { code: 4 }.fragment_length(), Some(4096));
        assert_eq!(MaxFragmentLengthExtension { code: 9 }.fragment_length(), None);
        assert_eq!(
            MaxFragmentLengthExtension::from_length(2048).unwrap().code,
            3
        );
        assert!(MaxFragmentLengthExtension::from_length(100).is_none());
    }

    #[test]
    fn server_name_roundtrip() {
        let ext = ServerNameExtension::new("coap.example").to_extension();
        let (_, parsed) = ServerNameExtension::parse(&ext.data).unwrap();
        assert_eq!(parsed.host_name.as_deref(), Some("coap.example"));

        // Empty echo from the server.
        let empty = ServerNameExtension::empty().to_extension();
        let (_, parsed) = ServerNameExtension::parse(&empty.data).unwrap();
        assert_eq!(parsed.host_name, None);
    }

    #[test]
    fn connection_id_roundtrip() {
        let cid = ConnectionId::try_new(&[9, 8, 7, 6, 5, 4]).unwrap();
        let ext = ConnectionIdExtension::new(cid).to_extension();
        let (_, parsed) = ConnectionIdExtension::parse(&ext.data).unwrap();
        assert_eq!(parsed.cid, cid);

        // Zero-length advertises support without a CID.
        let ext = ConnectionIdExtension::new(ConnectionId::empty()).to_extension();
        let (_, parsed) = ConnectionIdExtension::parse(&ext.data).unwrap();
        assert!(parsed.cid.is_empty());
    }
}
