use super::owned::{S7ParamOwned, S7PayloadOwned};
use super::{
    super::error::{Error, Result, S7HeaderError},
    comm::S7Header,
    r#ref::{parse_param_ref, parse_payload_ref, S7ParamRef, S7PayloadRef},
    types::S7PduType,
};
use crate::wire::{WireDecode, WireEncode};
use bytes::{BufMut, Bytes};

/// One S7 PDU: header plus zero-copy parameter and payload slices
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S7Pdu {
    pub header: S7Header,
    pub param: Bytes,
    pub payload: Bytes,
}

impl S7Pdu {
    /// Build from structured parameter and payload; header lengths are filled in.
    pub fn from_owned(
        pdu_type: S7PduType,
        pdu_ref: u16,
        param: &S7ParamOwned,
        payload: &S7PayloadOwned,
    ) -> Result<S7Pdu> {
        let param = param.to_bytes(&())?;
        let payload = payload.to_bytes(&())?;
        let param_len = u16::try_from(param.len()).map_err(|_| Error::Encode {
            context: "parameter block longer than 65535 bytes",
        })?;
        let payload_len = u16::try_from(payload.len()).map_err(|_| Error::Encode {
            context: "payload block longer than 65535 bytes",
        })?;
        Ok(S7Pdu {
            header: S7Header::new(pdu_type, pdu_ref, param_len, payload_len),
            param,
            payload,
        })
    }

    /// Parse a complete PDU out of an owned buffer.
    pub fn from_bytes(buf: Bytes) -> Result<S7Pdu> {
        let (rest, pdu) = S7Pdu::parse(&buf, &buf, &())?;
        if !rest.is_empty() {
            return Err(Error::ProtocolViolation {
                context: "trailing bytes after S7 PDU",
            });
        }
        Ok(pdu)
    }

    #[inline]
    pub fn pdu_ref(&self) -> u16 {
        self.header.pdu_ref
    }

    #[inline]
    pub fn header_error(&self) -> S7HeaderError {
        self.header.error_or_none()
    }

    /// Fail with the header error of an Ack/AckData, if any.
    pub fn validate_response(&self) -> Result<()> {
        match self.header.error {
            Some(e) if !e.is_ok() => Err(Error::S7Error(e)),
            _ => Ok(()),
        }
    }

    /// Structured zero-copy view over parameter and payload.
    pub fn as_ref_view(&self) -> Result<S7PduRef<'_>> {
        let (_, param) = parse_param_ref(self.header.pdu_type, &self.param)?;
        let (_, payload) = parse_payload_ref(self.header.pdu_type, &param, &self.payload)?;
        Ok(S7PduRef {
            header: &self.header,
            param,
            payload,
        })
    }
}

impl WireEncode for S7Pdu {
    type Error = Error;
    type Context = ();

    fn encoded_len(&self, _ctx: &Self::Context) -> usize {
        self.header.encoded_len() + self.param.len() + self.payload.len()
    }

    fn encode_to<B: BufMut>(&self, dst: &mut B, _ctx: &Self::Context) -> Result<()> {
        self.header.encode_to(dst);
        dst.put_slice(&self.param);
        dst.put_slice(&self.payload);
        Ok(())
    }
}

impl WireDecode for S7Pdu {
    type Error = Error;
    type Context = ();

    fn parse<'a>(
        input: &'a [u8],
        parent: &Bytes,
        _ctx: &Self::Context,
    ) -> Result<(&'a [u8], Self)> {
        let (hdr, rest) = S7Header::parse(input)?;
        let param_len = hdr.param_len as usize;
        let need = param_len + hdr.payload_len as usize;
        if rest.len() < need {
            return Err(Error::InsufficientData {
                needed: need,
                available: rest.len(),
            });
        }
        let (param_bytes, tail) = rest.split_at(param_len);
        let (payload_bytes, remain) = tail.split_at(hdr.payload_len as usize);
        Ok((
            remain,
            S7Pdu {
                header: hdr,
                param: parent.slice_ref(param_bytes),
                payload: parent.slice_ref(payload_bytes),
            },
        ))
    }
}

/// Structured view borrowed from an `S7Pdu`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S7PduRef<'a> {
    pub header: &'a S7Header,
    pub param: S7ParamRef<'a>,
    pub payload: S7PayloadRef<'a>,
}
