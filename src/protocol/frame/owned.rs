use super::super::error::{Error, Result};
use super::{
    iter::{S7VarSpec, S7_VAR_SPEC_LEN},
    r#ref::SetupParam,
    types::{
        CpuFunctionGroup, CpuFunctionType, S7DataVariableType, S7Function, S7ReturnCode,
        VAR_SPEC_TYPE,
    },
};
use crate::wire::WireEncode;
use bytes::{BufMut, Bytes};

/// Owned parameter block for outbound PDUs
#[derive(Debug, Clone)]
pub enum S7ParamOwned {
    Job(S7JobParamOwned),
    AckData(S7ParamAckDataOwned),
    UserData(Vec<S7UserDataParamItemOwned>),
    Empty,
}

impl WireEncode for S7ParamOwned {
    type Error = Error;
    type Context = ();

    fn encoded_len(&self, ctx: &Self::Context) -> usize {
        match self {
            S7ParamOwned::Job(inner) => inner.encoded_len(ctx),
            S7ParamOwned::AckData(inner) => inner.encoded_len(ctx),
            S7ParamOwned::UserData(items) => {
                2 + items.iter().map(|it| 2 + it.body_len()).sum::<usize>()
            }
            S7ParamOwned::Empty => 0,
        }
    }

    fn encode_to<B: BufMut>(&self, dst: &mut B, ctx: &Self::Context) -> Result<()> {
        match self {
            S7ParamOwned::Job(inner) => inner.encode_to(dst, ctx),
            S7ParamOwned::AckData(inner) => inner.encode_to(dst, ctx),
            S7ParamOwned::UserData(items) => {
                dst.put_u8(S7Function::CpuService as u8);
                dst.put_u8(item_count(items.len())?);
                for it in items {
                    it.encode_to(dst);
                }
                Ok(())
            }
            S7ParamOwned::Empty => Ok(()),
        }
    }
}

fn item_count(n: usize) -> Result<u8> {
    u8::try_from(n).map_err(|_| Error::Encode {
        context: "more than 255 items in one PDU",
    })
}

/// Job parameters
#[derive(Debug, Clone)]
pub enum S7JobParamOwned {
    SetupCommunication(SetupParam),
    ReadVarRequest { specs: Vec<S7VarSpec> },
    WriteVarRequest { specs: Vec<S7VarSpec> },
}

impl WireEncode for S7JobParamOwned {
    type Error = Error;
    type Context = ();

    fn encoded_len(&self, _ctx: &Self::Context) -> usize {
        match self {
            S7JobParamOwned::SetupCommunication(_) => 8,
            S7JobParamOwned::ReadVarRequest { specs }
            | S7JobParamOwned::WriteVarRequest { specs } => 2 + specs.len() * S7_VAR_SPEC_LEN,
        }
    }

    fn encode_to<B: BufMut>(&self, dst: &mut B, _ctx: &Self::Context) -> Result<()> {
        match self {
            S7JobParamOwned::SetupCommunication(setup) => {
                encode_setup(dst, setup);
            }
            S7JobParamOwned::ReadVarRequest { specs } => {
                dst.put_u8(S7Function::ReadVar as u8);
                dst.put_u8(item_count(specs.len())?);
                specs.iter().for_each(|s| s.encode_to(dst));
            }
            S7JobParamOwned::WriteVarRequest { specs } => {
                dst.put_u8(S7Function::WriteVar as u8);
                dst.put_u8(item_count(specs.len())?);
                specs.iter().for_each(|s| s.encode_to(dst));
            }
        }
        Ok(())
    }
}

fn encode_setup<B: BufMut>(dst: &mut B, setup: &SetupParam) {
    dst.put_u8(S7Function::SetupCommunication as u8);
    dst.put_u8(0x00);
    dst.put_u16(setup.amq_caller);
    dst.put_u16(setup.amq_callee);
    dst.put_u16(setup.pdu_len);
}

/// AckData parameters, produced by device-side code and tests
#[derive(Debug, Clone)]
pub enum S7ParamAckDataOwned {
    SetupCommunication(SetupParam),
    ReadVarResponse { item_count: u8 },
    WriteVarResponse { item_count: u8 },
}

impl WireEncode for S7ParamAckDataOwned {
    type Error = Error;
    type Context = ();

    fn encoded_len(&self, _ctx: &Self::Context) -> usize {
        match self {
            S7ParamAckDataOwned::SetupCommunication(_) => 8,
            _ => 2,
        }
    }

    fn encode_to<B: BufMut>(&self, dst: &mut B, _ctx: &Self::Context) -> Result<()> {
        match self {
            S7ParamAckDataOwned::SetupCommunication(setup) => encode_setup(dst, setup),
            S7ParamAckDataOwned::ReadVarResponse { item_count } => {
                dst.put_u8(S7Function::ReadVar as u8);
                dst.put_u8(*item_count);
            }
            S7ParamAckDataOwned::WriteVarResponse { item_count } => {
                dst.put_u8(S7Function::WriteVar as u8);
                dst.put_u8(*item_count);
            }
        }
        Ok(())
    }
}

/// CPU functions item of a UserData parameter block
#[derive(Debug, Clone)]
pub struct S7UserDataParamItemOwned {
    pub method: u8,
    pub cpu_function_type: CpuFunctionType,
    pub cpu_function_group: CpuFunctionGroup,
    pub cpu_subfunction: u8,
    pub sequence_number: u8,
    /// data unit reference, last unit flag and error code of responses
    pub extra: Bytes,
}

impl S7UserDataParamItemOwned {
    fn body_len(&self) -> usize {
        4 + self.extra.len()
    }

    fn encode_to<B: BufMut>(&self, dst: &mut B) {
        dst.put_u8(VAR_SPEC_TYPE);
        dst.put_u8(self.body_len() as u8);
        dst.put_u8(self.method);
        dst.put_u8(((self.cpu_function_type as u8) << 4) | (self.cpu_function_group as u8 & 0x0F));
        dst.put_u8(self.cpu_subfunction);
        dst.put_u8(self.sequence_number);
        dst.put_slice(&self.extra);
    }
}

/// Data item of a WriteVar request, ReadVar response or UserData payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataItemOwned {
    pub return_code: S7ReturnCode,
    pub transport_size: S7DataVariableType,
    pub data: Bytes,
}

impl DataItemOwned {
    fn encode_to<B: BufMut>(&self, dst: &mut B) -> Result<()> {
        dst.put_u8(u8::from(self.return_code));
        dst.put_u8(self.transport_size as u8);
        // bit items carry one bit per byte, so their bit count equals the byte count
        let len = match self.transport_size {
            S7DataVariableType::Bit => self.data.len(),
            t if t.length_in_bits() => self.data.len() * 8,
            _ => self.data.len(),
        };
        let len = u16::try_from(len).map_err(|_| Error::Encode {
            context: "data item longer than the length field allows",
        })?;
        dst.put_u16(len);
        dst.put_slice(&self.data);
        Ok(())
    }
}

/// Owned payload block for outbound PDUs
#[derive(Debug, Clone)]
pub enum S7PayloadOwned {
    Empty,
    /// WriteVar request and ReadVar response items, odd items padded when followed by another
    DataItems(Vec<DataItemOwned>),
    WriteVarResponse(Vec<S7ReturnCode>),
    /// UserData items, never padded
    UserData(Vec<DataItemOwned>),
}

#[inline]
fn needs_fill(item: &DataItemOwned, is_last: bool) -> bool {
    !is_last && item.data.len() % 2 == 1
}

impl WireEncode for S7PayloadOwned {
    type Error = Error;
    type Context = ();

    fn encoded_len(&self, _ctx: &Self::Context) -> usize {
        match self {
            S7PayloadOwned::Empty => 0,
            S7PayloadOwned::DataItems(items) => items
                .iter()
                .enumerate()
                .map(|(i, it)| 4 + it.data.len() + needs_fill(it, i + 1 == items.len()) as usize)
                .sum(),
            S7PayloadOwned::WriteVarResponse(codes) => codes.len(),
            S7PayloadOwned::UserData(items) => items.iter().map(|it| 4 + it.data.len()).sum(),
        }
    }

    fn encode_to<B: BufMut>(&self, dst: &mut B, _ctx: &Self::Context) -> Result<()> {
        match self {
            S7PayloadOwned::Empty => {}
            S7PayloadOwned::DataItems(items) => {
                for (i, it) in items.iter().enumerate() {
                    it.encode_to(dst)?;
                    if needs_fill(it, i + 1 == items.len()) {
                        dst.put_u8(0x00);
                    }
                }
            }
            S7PayloadOwned::WriteVarResponse(codes) => {
                codes.iter().for_each(|rc| dst.put_u8(u8::from(*rc)));
            }
            S7PayloadOwned::UserData(items) => {
                for it in items {
                    it.encode_to(dst)?;
                }
            }
        }
        Ok(())
    }
}
