use super::{
    super::error::{Error, Result},
    iter::{
        UserDataParamIter, UserDataPayloadItemIter, VarPayloadDataItemIter,
        VarPayloadStatusItemIter, VarSpecIter,
    },
    types::{S7Function, S7PduType},
};
use nom::number::complete::{be_u16, be_u8};

type NomErr<'a> = nom::error::Error<&'a [u8]>;

#[inline]
fn invalid<E>(_: E) -> Error {
    Error::ErrInvalidFrame
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum S7ParamRef<'a> {
    Job(S7JobParamRef<'a>),
    Ack,
    AckData(S7ParamAckDataRef),
    UserData(S7UserDataParamRef<'a>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum S7JobParamRef<'a> {
    SetupCommunication(SetupParam),
    ReadVarRequest(ItemsParamRef<'a>),
    WriteVarRequest(ItemsParamRef<'a>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum S7ParamAckDataRef {
    SetupCommunication(SetupParam),
    ReadVarResponse(ItemsCountParam),
    WriteVarResponse(ItemsCountParam),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum S7UserDataParamRef<'a> {
    CpuService(CpuServiceParam<'a>),
}

/// Negotiation values of a SetupCommunication exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetupParam {
    pub amq_caller: u16,
    pub amq_callee: u16,
    pub pdu_len: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemsParamRef<'a> {
    pub item_count: u8,
    pub raw_tail: &'a [u8],
}

impl<'a> ItemsParamRef<'a> {
    pub fn iter_specs(&self) -> VarSpecIter<'a> {
        VarSpecIter::new(self.item_count, self.raw_tail)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemsCountParam {
    pub item_count: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuServiceParam<'a> {
    pub item_count: u8,
    pub raw_tail: &'a [u8],
}

impl<'a> CpuServiceParam<'a> {
    pub fn iter_items(&self) -> UserDataParamIter<'a> {
        UserDataParamIter::new(self.item_count, self.raw_tail)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum S7PayloadRef<'a> {
    Empty,
    WriteVarRequest(ItemsPayloadRef<'a>),
    ReadVarResponse(ItemsPayloadRef<'a>),
    WriteVarResponse(ItemsPayloadRef<'a>),
    UserData(ItemsPayloadRef<'a>),
}

/// Item count plus the undecoded item bytes of a payload block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemsPayloadRef<'a> {
    pub item_count: u8,
    pub raw_tail: &'a [u8],
}

impl<'a> ItemsPayloadRef<'a> {
    /// Data items of WriteVar requests and ReadVar responses.
    pub fn iter_data_items(&self) -> VarPayloadDataItemIter<'a> {
        VarPayloadDataItemIter::new(self.item_count, self.raw_tail)
    }

    /// Return-code items of WriteVar responses.
    pub fn iter_status_items(&self) -> VarPayloadStatusItemIter<'a> {
        VarPayloadStatusItemIter::new(self.item_count, self.raw_tail)
    }

    /// Items of UserData payloads.
    pub fn iter_user_data_items(&self) -> UserDataPayloadItemIter<'a> {
        UserDataPayloadItemIter::unpadded(self.item_count, self.raw_tail)
    }
}

fn parse_setup(input: &[u8]) -> nom::IResult<&[u8], SetupParam, NomErr<'_>> {
    let (i, _reserved) = be_u8(input)?;
    let (i, amq_caller) = be_u16(i)?;
    let (i, amq_callee) = be_u16(i)?;
    let (i, pdu_len) = be_u16(i)?;
    Ok((
        i,
        SetupParam {
            amq_caller,
            amq_callee,
            pdu_len,
        },
    ))
}

pub fn parse_param_ref(pdu: S7PduType, input: &[u8]) -> Result<(&[u8], S7ParamRef<'_>)> {
    if pdu == S7PduType::Ack {
        return Ok((input, S7ParamRef::Ack));
    }
    let (i, func) = be_u8::<_, NomErr<'_>>(input).map_err(invalid)?;
    if pdu == S7PduType::UserData {
        // parameter type byte, then item count
        let (i, item_count) = be_u8::<_, NomErr<'_>>(i).map_err(invalid)?;
        return Ok((
            &[],
            S7ParamRef::UserData(S7UserDataParamRef::CpuService(CpuServiceParam {
                item_count,
                raw_tail: i,
            })),
        ));
    }
    let func = S7Function::try_from(func).map_err(|_| Error::ErrUnexpectedPdu)?;
    match (pdu, func) {
        (_, S7Function::SetupCommunication) => {
            let (rest, setup) = parse_setup(i).map_err(invalid)?;
            let param = if pdu == S7PduType::Job {
                S7ParamRef::Job(S7JobParamRef::SetupCommunication(setup))
            } else {
                S7ParamRef::AckData(S7ParamAckDataRef::SetupCommunication(setup))
            };
            Ok((rest, param))
        }
        (S7PduType::Job, S7Function::ReadVar | S7Function::WriteVar) => {
            let (i, item_count) = be_u8::<_, NomErr<'_>>(i).map_err(invalid)?;
            let items = ItemsParamRef {
                item_count,
                raw_tail: i,
            };
            let param = if func == S7Function::ReadVar {
                S7JobParamRef::ReadVarRequest(items)
            } else {
                S7JobParamRef::WriteVarRequest(items)
            };
            Ok((&[], S7ParamRef::Job(param)))
        }
        (S7PduType::AckData, S7Function::ReadVar | S7Function::WriteVar) => {
            let (rest, item_count) = be_u8::<_, NomErr<'_>>(i).map_err(invalid)?;
            let count = ItemsCountParam { item_count };
            let param = if func == S7Function::ReadVar {
                S7ParamAckDataRef::ReadVarResponse(count)
            } else {
                S7ParamAckDataRef::WriteVarResponse(count)
            };
            Ok((rest, S7ParamRef::AckData(param)))
        }
        _ => Err(Error::ErrUnexpectedPdu),
    }
}

pub fn parse_payload_ref<'a>(
    _pdu: S7PduType,
    param: &S7ParamRef<'_>,
    input: &'a [u8],
) -> Result<(&'a [u8], S7PayloadRef<'a>)> {
    let count = |item_count: u8| ItemsPayloadRef {
        item_count,
        raw_tail: input,
    };
    let payload = match param {
        S7ParamRef::Job(S7JobParamRef::WriteVarRequest(p)) => {
            S7PayloadRef::WriteVarRequest(count(p.item_count))
        }
        S7ParamRef::AckData(S7ParamAckDataRef::ReadVarResponse(p)) => {
            S7PayloadRef::ReadVarResponse(count(p.item_count))
        }
        S7ParamRef::AckData(S7ParamAckDataRef::WriteVarResponse(p)) => {
            S7PayloadRef::WriteVarResponse(count(p.item_count))
        }
        S7ParamRef::UserData(S7UserDataParamRef::CpuService(p)) => {
            S7PayloadRef::UserData(count(p.item_count))
        }
        _ => return Ok((input, S7PayloadRef::Empty)),
    };
    Ok((&[], payload))
}
