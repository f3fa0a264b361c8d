use super::{
    super::error::{Result, S7HeaderError},
    iter::S7VarSpec,
    owned::{
        DataItemOwned, S7JobParamOwned, S7ParamAckDataOwned, S7ParamOwned, S7PayloadOwned,
        S7UserDataParamItemOwned,
    },
    r#ref::SetupParam,
    types::{
        CpuFunctionGroup, CpuFunctionType, S7DataVariableType, S7PduType, S7ReturnCode,
        SUBFUNCTION_READ_CLOCK, SUBFUNCTION_READ_SZL, USERDATA_METHOD_REQUEST,
        USERDATA_METHOD_RESPONSE,
    },
    S7Pdu,
};
use bytes::{BufMut, Bytes, BytesMut};

/// ReadVar job for the given address items.
pub fn build_read_var(pdu_ref: u16, specs: &[S7VarSpec]) -> Result<S7Pdu> {
    let param = S7ParamOwned::Job(S7JobParamOwned::ReadVarRequest {
        specs: specs.to_vec(),
    });
    S7Pdu::from_owned(S7PduType::Job, pdu_ref, &param, &S7PayloadOwned::Empty)
}

/// WriteVar job; each item carries its already encoded bytes.
pub fn build_write_var(pdu_ref: u16, items: &[(S7VarSpec, Bytes)]) -> Result<S7Pdu> {
    let param = S7ParamOwned::Job(S7JobParamOwned::WriteVarRequest {
        specs: items.iter().map(|(s, _)| *s).collect(),
    });
    let payload = S7PayloadOwned::DataItems(
        items
            .iter()
            .map(|(spec, data)| DataItemOwned {
                return_code: S7ReturnCode::Reserved,
                transport_size: spec.transport_size.write_variable_type(),
                data: data.clone(),
            })
            .collect(),
    );
    S7Pdu::from_owned(S7PduType::Job, pdu_ref, &param, &payload)
}

/// SetupCommunication job proposing concurrency and PDU length.
pub fn build_setup_comm(pdu_ref: u16, proposal: SetupParam) -> Result<S7Pdu> {
    let param = S7ParamOwned::Job(S7JobParamOwned::SetupCommunication(proposal));
    S7Pdu::from_owned(S7PduType::Job, pdu_ref, &param, &S7PayloadOwned::Empty)
}

fn user_data_request(
    pdu_ref: u16,
    group: CpuFunctionGroup,
    subfunction: u8,
    item: DataItemOwned,
) -> Result<S7Pdu> {
    let param = S7ParamOwned::UserData(vec![S7UserDataParamItemOwned {
        method: USERDATA_METHOD_REQUEST,
        cpu_function_type: CpuFunctionType::Request,
        cpu_function_group: group,
        cpu_subfunction: subfunction,
        sequence_number: 0,
        extra: Bytes::new(),
    }]);
    S7Pdu::from_owned(
        S7PduType::UserData,
        pdu_ref,
        &param,
        &S7PayloadOwned::UserData(vec![item]),
    )
}

/// Read of one system status list (SZL) record set.
pub fn build_read_szl(pdu_ref: u16, szl_id: u16, szl_index: u16) -> Result<S7Pdu> {
    let mut data = BytesMut::with_capacity(4);
    data.put_u16(szl_id);
    data.put_u16(szl_index);
    user_data_request(
        pdu_ref,
        CpuFunctionGroup::CpuFunctions,
        SUBFUNCTION_READ_SZL,
        DataItemOwned {
            return_code: S7ReturnCode::Success,
            transport_size: S7DataVariableType::OctetString,
            data: data.freeze(),
        },
    )
}

/// Read of the device clock.
pub fn build_read_clock(pdu_ref: u16) -> Result<S7Pdu> {
    user_data_request(
        pdu_ref,
        CpuFunctionGroup::TimeFunctions,
        SUBFUNCTION_READ_CLOCK,
        DataItemOwned {
            return_code: S7ReturnCode::ObjectDoesNotExist,
            transport_size: S7DataVariableType::Null,
            data: Bytes::new(),
        },
    )
}

fn ack_data(
    pdu_ref: u16,
    param: S7ParamAckDataOwned,
    payload: S7PayloadOwned,
) -> Result<S7Pdu> {
    S7Pdu::from_owned(
        S7PduType::AckData,
        pdu_ref,
        &S7ParamOwned::AckData(param),
        &payload,
    )
}

/// AckData answering a SetupCommunication job.
pub fn build_ack_setup_comm(pdu_ref: u16, negotiated: SetupParam) -> Result<S7Pdu> {
    ack_data(
        pdu_ref,
        S7ParamAckDataOwned::SetupCommunication(negotiated),
        S7PayloadOwned::Empty,
    )
}

/// AckData answering a ReadVar job.
pub fn build_ack_read_var(pdu_ref: u16, items: Vec<DataItemOwned>) -> Result<S7Pdu> {
    ack_data(
        pdu_ref,
        S7ParamAckDataOwned::ReadVarResponse {
            item_count: u8::try_from(items.len()).unwrap_or(u8::MAX),
        },
        S7PayloadOwned::DataItems(items),
    )
}

/// AckData answering a WriteVar job.
pub fn build_ack_write_var(pdu_ref: u16, codes: Vec<S7ReturnCode>) -> Result<S7Pdu> {
    ack_data(
        pdu_ref,
        S7ParamAckDataOwned::WriteVarResponse {
            item_count: u8::try_from(codes.len()).unwrap_or(u8::MAX),
        },
        S7PayloadOwned::WriteVarResponse(codes),
    )
}

/// Header-level rejection without parameter or payload.
pub fn build_ack_error(pdu_ref: u16, error: S7HeaderError) -> S7Pdu {
    let mut pdu = S7Pdu {
        header: super::S7Header::new(S7PduType::AckData, pdu_ref, 0, 0),
        param: Bytes::new(),
        payload: Bytes::new(),
    };
    pdu.header.error = Some(error);
    pdu
}

/// UserData response carrying one item.
pub fn build_user_data_response(
    pdu_ref: u16,
    group: CpuFunctionGroup,
    subfunction: u8,
    item: DataItemOwned,
) -> Result<S7Pdu> {
    let param = S7ParamOwned::UserData(vec![S7UserDataParamItemOwned {
        method: USERDATA_METHOD_RESPONSE,
        cpu_function_type: CpuFunctionType::Response,
        cpu_function_group: group,
        cpu_subfunction: subfunction,
        sequence_number: 0,
        // data unit reference, last data unit, error code
        extra: Bytes::from_static(&[0x00, 0x00, 0x00, 0x00]),
    }]);
    S7Pdu::from_owned(
        S7PduType::UserData,
        pdu_ref,
        &param,
        &S7PayloadOwned::UserData(vec![item]),
    )
}
