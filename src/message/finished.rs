//! Finished: 12 bytes of verify_data over the handshake transcript.

use nom::bytes::complete::take;
use nom::IResult;

pub const VERIFY_DATA_LEN: usize = 12;

#[derive(Debug, PartialEq, Eq)]
pub struct Finished {
    pub verify_data: [u8; VERIFY_DATA_LEN],
}

impl Finished {
    pub fn new(verify_data: [u8; VERIFY_DATA_LEN]) -> Self {
        Finished { verify_data }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Finished> {
        let (input, data) = take(VERIFY_DATA_LEN)(input)?;
        let mut verify_data = [0u8; VERIFY_DATA_LEN];
        verify_data.copy_from_slice(data);
        Ok((input, Finished { verify_data }))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.extend_from_slice(&self.verify_data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let fin = Finished::new([7; VERIFY_DATA_LEN]);
        let mut out = Vec::new();
        fin.serialize(&mut out);
        assert_eq!(out.len(), VERIFY_DATA_LEN);

        let (rest, parsed) = Finished::parse(&out).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, fin);
    }

    #[test]
    fn truncated_is_rejected() {
        assert!(Finished::parse(&[0; 11]).is_err());
    }
}
