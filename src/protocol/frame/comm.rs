use super::{
    super::error::{Error, Result, S7HeaderError},
    types::S7PduType,
};
use bytes::BufMut;
use nom::number::complete::{be_u16, be_u8};

/// S7comm protocol identifier
pub const S7_PROTOCOL_ID: u8 = 0x32;
/// Header length of Job and UserData PDUs
pub const S7_HEADER_LEN: usize = 10;
/// Header length of Ack and AckData PDUs (error class/code appended)
pub const S7_HEADER_LEN_ACK: usize = 12;

/// S7 Header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S7Header {
    pub pdu_type: S7PduType,
    pub reserved: u16,
    pub pdu_ref: u16,
    pub param_len: u16,
    pub payload_len: u16,
    /// Present for Ack/AckData only.
    pub error: Option<S7HeaderError>,
}

type NomErr<'a> = nom::error::Error<&'a [u8]>;

type FixedHeader = (u8, u8, u16, u16, u16, u16);

fn parse_fixed(i: &[u8]) -> nom::IResult<&[u8], FixedHeader, NomErr<'_>> {
    let (i, protocol_id) = be_u8(i)?;
    let (i, rosctr) = be_u8(i)?;
    let (i, reserved) = be_u16(i)?;
    let (i, pdu_ref) = be_u16(i)?;
    let (i, param_len) = be_u16(i)?;
    let (i, payload_len) = be_u16(i)?;
    Ok((i, (protocol_id, rosctr, reserved, pdu_ref, param_len, payload_len)))
}

impl S7Header {
    pub fn new(pdu_type: S7PduType, pdu_ref: u16, param_len: u16, payload_len: u16) -> Self {
        Self {
            pdu_type,
            reserved: 0,
            pdu_ref,
            param_len,
            payload_len,
            error: pdu_type
                .has_error_field()
                .then_some(S7HeaderError::NONE),
        }
    }

    #[inline]
    pub fn encoded_len(&self) -> usize {
        if self.pdu_type.has_error_field() {
            S7_HEADER_LEN_ACK
        } else {
            S7_HEADER_LEN
        }
    }

    /// Header error, `NONE` for PDU kinds that carry no error field.
    #[inline]
    pub fn error_or_none(&self) -> S7HeaderError {
        self.error.unwrap_or(S7HeaderError::NONE)
    }

    /// Parse a header, returning it with the remaining bytes.
    pub fn parse(input: &[u8]) -> Result<(S7Header, &[u8])> {
        if input.len() < S7_HEADER_LEN {
            return Err(Error::InsufficientData {
                needed: S7_HEADER_LEN,
                available: input.len(),
            });
        }
        let (rest, (protocol_id, rosctr, reserved, pdu_ref, param_len, payload_len)) =
            parse_fixed(input).map_err(|_| Error::ErrInvalidFrame)?;
        if protocol_id != S7_PROTOCOL_ID {
            return Err(Error::ErrInvalidFrame);
        }
        let pdu_type = S7PduType::try_from(rosctr).map_err(|_| Error::ErrInvalidFrame)?;

        let (rest, error) = if pdu_type.has_error_field() {
            let (rest, raw) = be_u16::<_, NomErr<'_>>(rest).map_err(|_| {
                Error::InsufficientData {
                    needed: S7_HEADER_LEN_ACK,
                    available: input.len(),
                }
            })?;
            (rest, Some(S7HeaderError::from(raw)))
        } else {
            (rest, None)
        };

        Ok((
            S7Header {
                pdu_type,
                reserved,
                pdu_ref,
                param_len,
                payload_len,
                error,
            },
            rest,
        ))
    }

    pub fn encode_to<B: BufMut>(&self, dst: &mut B) {
        dst.put_u8(S7_PROTOCOL_ID);
        dst.put_u8(self.pdu_type as u8);
        dst.put_u16(self.reserved);
        dst.put_u16(self.pdu_ref);
        dst.put_u16(self.param_len);
        dst.put_u16(self.payload_len);
        if self.pdu_type.has_error_field() {
            dst.put_u16(self.error_or_none().as_u16());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn ack_data_header_carries_error_pair() {
        let mut h = S7Header::new(S7PduType::AckData, 0x0102, 2, 5);
        h.error = Some(S7HeaderError::FEATURE_NOT_ENABLED);
        let mut buf = BytesMut::new();
        h.encode_to(&mut buf);
        assert_eq!(buf.len(), S7_HEADER_LEN_ACK);
        assert_eq!(&buf[10..], &[0x81, 0x04]);

        let (parsed, rest) = S7Header::parse(&buf).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, h);
    }

    #[test]
    fn rejects_foreign_protocol() {
        let raw = [0x33, 0x01, 0, 0, 0, 1, 0, 0, 0, 0];
        assert!(matches!(S7Header::parse(&raw), Err(Error::ErrInvalidFrame)));
        assert!(matches!(
            S7Header::parse(&raw[..4]),
            Err(Error::InsufficientData { needed: 10, .. })
        ));
    }
}
