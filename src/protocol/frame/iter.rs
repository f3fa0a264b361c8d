use super::{
    super::error::{Error, Result},
    types::{
        CpuFunctionGroup, CpuFunctionType, S7Area, S7DataVariableType, S7ReturnCode,
        S7TransportSize, S7ANY_SPEC_LEN, SYNTAX_ID_S7ANY, VAR_SPEC_TYPE,
    },
};
use bytes::BufMut;
use nom::number::complete::{be_u16, be_u24, be_u8};

type NomErr<'a> = nom::error::Error<&'a [u8]>;

/// Encoded length of one S7ANY address item
pub const S7_VAR_SPEC_LEN: usize = 12;

/// S7ANY address item of ReadVar/WriteVar requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct S7VarSpec {
    pub transport_size: S7TransportSize,
    /// number of elements of `transport_size`
    pub count: u16,
    /// block number for DB/DI, else 0
    pub db_number: u16,
    pub area: S7Area,
    pub byte_address: u32,
    /// bit index [0..7] for bit access
    pub bit_index: u8,
}

impl S7VarSpec {
    /// Bytes the device returns (or expects) for this address item.
    #[inline]
    pub fn data_len(&self) -> usize {
        self.count as usize * self.transport_size.element_bytes()
    }

    pub fn encode_to<B: BufMut>(&self, dst: &mut B) {
        dst.put_u8(VAR_SPEC_TYPE);
        dst.put_u8(S7ANY_SPEC_LEN);
        dst.put_u8(SYNTAX_ID_S7ANY);
        dst.put_u8(self.transport_size as u8);
        dst.put_u16(self.count);
        dst.put_u16(self.db_number);
        dst.put_u8(self.area as u8);
        let address = ((self.byte_address & 0x1F_FFFF) << 3) | (self.bit_index as u32 & 0x07);
        dst.put_uint(address as u64, 3);
    }
}

type RawVarSpec = (u8, u8, u8, u8, u16, u16, u8, u32);

fn parse_var_spec(input: &[u8]) -> nom::IResult<&[u8], RawVarSpec, NomErr<'_>> {
    let (i, spec_type) = be_u8(input)?;
    let (i, len) = be_u8(i)?;
    let (i, syntax) = be_u8(i)?;
    let (i, ts) = be_u8(i)?;
    let (i, count) = be_u16(i)?;
    let (i, db) = be_u16(i)?;
    let (i, area) = be_u8(i)?;
    let (i, address) = be_u24(i)?;
    Ok((i, (spec_type, len, syntax, ts, count, db, area, address)))
}

fn parse_single_varspec(input: &[u8]) -> Result<(&[u8], S7VarSpec)> {
    let (rest, (spec_type, len, syntax, ts, count, db_number, area, address)) =
        parse_var_spec(input).map_err(|_| Error::ErrInvalidFrame)?;
    if spec_type != VAR_SPEC_TYPE || len != S7ANY_SPEC_LEN || syntax != SYNTAX_ID_S7ANY {
        return Err(Error::UnsupportedFeature {
            feature: "non-S7ANY variable specification",
        });
    }
    Ok((
        rest,
        S7VarSpec {
            transport_size: S7TransportSize::try_from(ts).map_err(|_| Error::ErrInvalidFrame)?,
            count,
            db_number,
            area: S7Area::try_from(area).map_err(|_| Error::ErrInvalidFrame)?,
            byte_address: address >> 3,
            bit_index: (address & 0x07) as u8,
        },
    ))
}

/// Iterates the address items of a ReadVar/WriteVar request parameter.
#[derive(Debug, Clone, Copy)]
pub struct VarSpecIter<'a> {
    remaining: &'a [u8],
    left: u8,
}

impl<'a> VarSpecIter<'a> {
    pub fn new(item_count: u8, raw: &'a [u8]) -> Self {
        Self {
            remaining: raw,
            left: item_count,
        }
    }
}

impl Iterator for VarSpecIter<'_> {
    type Item = Result<S7VarSpec>;
    fn next(&mut self) -> Option<Self::Item> {
        if self.left == 0 {
            return None;
        }
        self.left -= 1;
        match parse_single_varspec(self.remaining) {
            Ok((rest, spec)) => {
                self.remaining = rest;
                Some(Ok(spec))
            }
            Err(e) => {
                self.left = 0;
                Some(Err(e))
            }
        }
    }
}

/// CPU functions parameter item of a UserData PDU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct S7UserDataParam {
    pub method: u8,
    pub cpu_function_type: CpuFunctionType,
    pub cpu_function_group: CpuFunctionGroup,
    pub cpu_subfunction: u8,
    pub sequence_number: u8,
}

fn parse_single_userdata_item(input: &[u8]) -> Result<(&[u8], S7UserDataParam)> {
    // itemType (0x12), itemLength, then itemLength bytes:
    // method, type<<4 | group, subfunction, sequence, optional tail
    let (i, item_type) = be_u8::<_, NomErr<'_>>(input).map_err(|_| Error::ErrInvalidFrame)?;
    let (i, item_len) = be_u8::<_, NomErr<'_>>(i).map_err(|_| Error::ErrInvalidFrame)?;
    let item_len = item_len as usize;
    if item_type != VAR_SPEC_TYPE || item_len < 4 || i.len() < item_len {
        return Err(Error::ErrInvalidFrame);
    }
    let (body, rest) = i.split_at(item_len);
    let cpu_function_type =
        CpuFunctionType::try_from(body[1] >> 4).map_err(|_| Error::ErrInvalidFrame)?;
    let cpu_function_group =
        CpuFunctionGroup::try_from(body[1] & 0x0F).map_err(|_| Error::ErrInvalidFrame)?;
    Ok((
        rest,
        S7UserDataParam {
            method: body[0],
            cpu_function_type,
            cpu_function_group,
            cpu_subfunction: body[2],
            sequence_number: body[3],
        },
    ))
}

#[derive(Debug, Clone, Copy)]
pub struct UserDataParamIter<'a> {
    remaining: &'a [u8],
    left: u8,
}

impl<'a> UserDataParamIter<'a> {
    pub fn new(item_count: u8, raw: &'a [u8]) -> Self {
        Self {
            remaining: raw,
            left: item_count,
        }
    }
}

impl Iterator for UserDataParamIter<'_> {
    type Item = Result<S7UserDataParam>;
    fn next(&mut self) -> Option<Self::Item> {
        if self.left == 0 {
            return None;
        }
        self.left -= 1;
        match parse_single_userdata_item(self.remaining) {
            Ok((rest, item)) => {
                self.remaining = rest;
                Some(Ok(item))
            }
            Err(e) => {
                self.left = 0;
                Some(Err(e))
            }
        }
    }
}

/// Data item of a ReadVar response, WriteVar request or UserData payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarPayloadDataItemRef<'a> {
    pub return_code: S7ReturnCode,
    pub transport_size: S7DataVariableType,
    pub data: &'a [u8],
}

fn data_len_in_bytes(typ: S7DataVariableType, len_field: u16) -> usize {
    if typ.length_in_bits() {
        (len_field as usize).div_ceil(8)
    } else {
        len_field as usize
    }
}

fn parse_data_item(input: &[u8]) -> Result<(&[u8], VarPayloadDataItemRef<'_>)> {
    let (i, rc) = be_u8::<_, NomErr<'_>>(input).map_err(|_| Error::ErrInvalidFrame)?;
    let (i, ts) = be_u8::<_, NomErr<'_>>(i).map_err(|_| Error::ErrInvalidFrame)?;
    let (i, len_field) = be_u16::<_, NomErr<'_>>(i).map_err(|_| Error::ErrInvalidFrame)?;
    let return_code = S7ReturnCode::from(rc);
    // failed items may carry a null type and no data
    let transport_size = match S7DataVariableType::try_from(ts) {
        Ok(t) => t,
        Err(()) if return_code != S7ReturnCode::Success => S7DataVariableType::Null,
        Err(()) => return Err(Error::ErrInvalidFrame),
    };
    let data_len = data_len_in_bytes(transport_size, len_field);
    if i.len() < data_len {
        return Err(Error::InsufficientData {
            needed: data_len,
            available: i.len(),
        });
    }
    let (data, rest) = i.split_at(data_len);
    Ok((
        rest,
        VarPayloadDataItemRef {
            return_code,
            transport_size,
            data,
        },
    ))
}

/// Iterates data items, skipping the fill byte after odd-length items
/// that are followed by another item.
#[derive(Debug, Clone, Copy)]
pub struct VarPayloadDataItemIter<'a> {
    remaining: &'a [u8],
    left: u8,
    padded: bool,
}

impl<'a> VarPayloadDataItemIter<'a> {
    pub fn new(item_count: u8, raw: &'a [u8]) -> Self {
        Self {
            remaining: raw,
            left: item_count,
            padded: true,
        }
    }

    /// UserData payload items are never padded.
    pub fn unpadded(item_count: u8, raw: &'a [u8]) -> Self {
        Self {
            padded: false,
            ..Self::new(item_count, raw)
        }
    }
}

impl<'a> Iterator for VarPayloadDataItemIter<'a> {
    type Item = Result<VarPayloadDataItemRef<'a>>;
    fn next(&mut self) -> Option<Self::Item> {
        if self.left == 0 {
            return None;
        }
        self.left -= 1;
        match parse_data_item(self.remaining) {
            Ok((mut rest, item)) => {
                if self.padded && self.left > 0 && item.data.len() % 2 == 1 && !rest.is_empty() {
                    rest = &rest[1..];
                }
                self.remaining = rest;
                Some(Ok(item))
            }
            Err(e) => {
                self.left = 0;
                Some(Err(e))
            }
        }
    }
}

/// Iterates the one-byte return codes of a WriteVar response.
#[derive(Debug, Clone, Copy)]
pub struct VarPayloadStatusItemIter<'a> {
    remaining: &'a [u8],
    left: u8,
}

impl<'a> VarPayloadStatusItemIter<'a> {
    pub fn new(item_count: u8, raw: &'a [u8]) -> Self {
        Self {
            remaining: raw,
            left: item_count,
        }
    }
}

impl Iterator for VarPayloadStatusItemIter<'_> {
    type Item = Result<S7ReturnCode>;
    fn next(&mut self) -> Option<Self::Item> {
        if self.left == 0 {
            return None;
        }
        self.left -= 1;
        match self.remaining.split_first() {
            Some((rc, rest)) => {
                self.remaining = rest;
                Some(Ok(S7ReturnCode::from(*rc)))
            }
            None => {
                self.left = 0;
                Some(Err(Error::ErrInvalidFrame))
            }
        }
    }
}

/// UserData payload items share the data item layout without padding.
pub type UserDataPayloadItemIter<'a> = VarPayloadDataItemIter<'a>;
