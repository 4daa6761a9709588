//! Bounded opaque byte strings used in hello messages.
//!
//! Each type is a fixed-capacity array plus a length, so hello parsing never
//! allocates. The wire form is a one-byte length prefix followed by the data
//! (except `Random`, which is always 32 bytes with no prefix).

use std::fmt;
use std::ops::Deref;

use nom::bytes::complete::take;
use nom::error::{Error as NomError, ErrorKind};
use nom::number::complete::be_u8;
use nom::IResult;

pub struct InvalidLength(&'static str, usize, usize, usize);

impl fmt::Debug for InvalidLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl fmt::Display for InvalidLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid {} length: {} <= {} <= {}",
            self.0, self.1, self.3, self.2
        )
    }
}

macro_rules! var_array {
    ($name:ident, $min:expr, $max:expr) => {
        #[derive(Clone, Copy)]
        pub struct $name([u8; $max], usize);

        impl $name {
            pub fn try_new(data: &[u8]) -> Result<Self, InvalidLength> {
                #[allow(unused_comparisons)]
                if data.len() < $min || data.len() > $max {
                    return Err(InvalidLength(stringify!($name), $min, $max, data.len()));
                }
                let mut array = [0; $max];
                array[..data.len()].copy_from_slice(data);
                Ok($name(array, data.len()))
            }

            pub fn empty() -> Self {
                $name([0; $max], 0)
            }

            pub fn is_empty(&self) -> bool {
                self.1 == 0
            }

            /// Parse the one-byte-length-prefixed wire form.
            pub fn parse(input: &[u8]) -> IResult<&[u8], $name> {
                let (input, len) = be_u8(input)?;
                let (input, data) = take(len as usize)(input)?;
                let id = $name::try_new(data).map_err(|_| {
                    nom::Err::Failure(NomError::new(input, ErrorKind::LengthValue))
                })?;
                Ok((input, id))
            }

            /// Serialize as a one-byte length prefix followed by the data.
            pub fn serialize(&self, output: &mut Vec<u8>) {
                output.push(self.1 as u8);
                output.extend_from_slice(self);
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:02x?})", stringify!($name), &self.0[..self.1])
            }
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                self.deref() == other.deref()
            }
        }

        impl Eq for $name {}

        impl std::hash::Hash for $name {
            fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
                self.deref().hash(state)
            }
        }

        impl Deref for $name {
            type Target = [u8];

            fn deref(&self) -> &Self::Target {
                &self.0[..self.1]
            }
        }

        impl Default for $name {
            fn default() -> Self {
                $name::empty()
            }
        }

        impl<'a> TryFrom<&'a [u8]> for $name {
            type Error = InvalidLength;

            fn try_from(value: &'a [u8]) -> Result<Self, Self::Error> {
                Self::try_new(value)
            }
        }
    };
}

var_array!(SessionId, 0, 32);
var_array!(Cookie, 0, 255);
var_array!(ConnectionId, 0, 255);
var_array!(PskIdentity, 0, 128);

/// The 32-byte hello random.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Random([u8; 32]);

impl Random {
    pub fn new(bytes: [u8; 32]) -> Self {
        Random(bytes)
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Random> {
        let (input, data) = take(32usize)(input)?;
        let mut array = [0; 32];
        array.copy_from_slice(data);
        Ok((input, Random(array)))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.extend_from_slice(&self.0);
    }
}

impl Deref for Random {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Debug for Random {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Random({:02x?}…)", &self.0[..4])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_roundtrip() {
        let id = SessionId::try_new(&[1, 2, 3]).unwrap();
        let mut out = Vec::new();
        id.serialize(&mut out);
        assert_eq!(&*out, &[3, 1, 2, 3]);
        let (rest, parsed) = SessionId::parse(&out).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, id);
    }

    #[test]
    fn session_id_rejects_overlong() {
        assert!(SessionId::try_new(&[0; 33]).is_err());
        // Wire form with a 33-byte length must fail to parse.
        let mut wire = vec![33u8];
        wire.extend_from_slice(&[0; 33]);
        assert!(SessionId::parse(&wire).is_err());
    }

    #[test]
    fn empty_ids_serialize_as_zero_length() {
        let cid = ConnectionId::empty();
        let mut out = Vec::new();
        cid.serialize(&mut out);
        assert_eq!(&*out, &[0]);
        assert!(cid.is_empty());
    }
}
