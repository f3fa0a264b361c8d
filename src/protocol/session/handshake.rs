use super::super::{
    error::{Error, Result},
    frame::{CpuType, S7ParamAckDataRef, S7ParamRef, S7Pdu, S7PayloadRef, S7ReturnCode, SetupParam},
    transport::{ConnectionParams, TransportFrame},
};
use super::state::{ConnectionState, SessionConfig};
use tracing::{debug, warn};

/// SZL id/index of the module identification record.
pub(super) const SZL_MODULE_ID: u16 = 0x0011;
pub(super) const SZL_MODULE_ID_INDEX: u16 = 0x0001;

/// SZL id, index, record length and record count precede the records.
const SZL_HEADER_LEN: usize = 8;
/// Article number inside the first record, after its 2-byte index.
const ARTICLE_NUMBER_OFFSET: usize = 2;
const ARTICLE_NUMBER_LEN: usize = 20;

/// Parameters fixed by a completed handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Negotiated {
    pub connection: ConnectionParams,
    pub setup: SetupParam,
    pub cpu: CpuType,
}

/// Next step the session must perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Action {
    SendSetup(SetupParam),
    SendIdentify,
    Complete(Negotiated),
}

#[derive(Debug)]
pub(super) struct HandshakeMachine {
    state: ConnectionState,
    request: ConnectionParams,
    proposal: SetupParam,
    cpu: Option<CpuType>,
    connection: Option<ConnectionParams>,
    setup: Option<SetupParam>,
}

impl HandshakeMachine {
    pub(super) fn new(config: &SessionConfig) -> Result<Self> {
        let tsap = config.tsap.resolve(config.cpu.unwrap_or_default())?;
        Ok(Self {
            state: ConnectionState::Disconnected,
            request: ConnectionParams {
                calling_tsap: tsap.local.into(),
                called_tsap: tsap.remote.into(),
                tpdu_size: config.tpdu_size,
            },
            proposal: SetupParam {
                amq_caller: config.preferred_amq_caller,
                amq_callee: config.preferred_amq_callee,
                pdu_len: config.preferred_pdu_size,
            },
            cpu: config.cpu,
            connection: None,
            setup: None,
        })
    }

    #[inline]
    pub(super) fn state(&self) -> ConnectionState {
        self.state
    }

    /// Values negotiated by SetupCommunication, once its response arrived.
    #[inline]
    pub(super) fn setup(&self) -> Option<SetupParam> {
        self.setup
    }

    /// Leave `Disconnected`; the returned request goes out first.
    pub(super) fn start(&mut self) -> Result<ConnectionParams> {
        if self.state != ConnectionState::Disconnected {
            return Err(Error::ProtocolViolation {
                context: "handshake already started",
            });
        }
        self.state = ConnectionState::AwaitingTransportConnect;
        Ok(self.request)
    }

    /// Failure in the current state; the machine is finished afterwards.
    pub(super) fn fail(&mut self, source: Error) -> Error {
        let state = self.state;
        self.state = ConnectionState::Failed;
        Error::Handshake {
            state,
            source: Box::new(source),
        }
    }

    pub(super) fn advance(&mut self, frame: TransportFrame) -> Result<Action> {
        match (self.state, frame) {
            (_, TransportFrame::Disconnect) => Err(Error::ErrUseClosedConnection),
            (ConnectionState::AwaitingTransportConnect, TransportFrame::ConnectionConfirm(cc)) => {
                self.on_connection_confirm(cc);
                Ok(Action::SendSetup(self.proposal))
            }
            (ConnectionState::AwaitingSessionSetup, TransportFrame::Data(pdu)) => {
                self.on_setup_response(&pdu)
            }
            (ConnectionState::AwaitingIdentify, TransportFrame::Data(pdu)) => {
                let cpu = identify_cpu(&pdu)?;
                self.complete(cpu)
            }
            _ => Err(Error::ErrUnexpectedPdu),
        }
    }

    fn on_connection_confirm(&mut self, cc: ConnectionParams) {
        if cc != self.request {
            warn!(
                requested = ?self.request,
                confirmed = ?cc,
                "Device changed connection parameters, adopting its values"
            );
        }
        self.connection = Some(cc);
        self.state = ConnectionState::AwaitingSessionSetup;
    }

    fn on_setup_response(&mut self, pdu: &S7Pdu) -> Result<Action> {
        pdu.validate_response()?;
        let view = pdu.as_ref_view()?;
        let S7ParamRef::AckData(S7ParamAckDataRef::SetupCommunication(negotiated)) = view.param
        else {
            return Err(Error::ErrUnexpectedPdu);
        };
        if negotiated.pdu_len == 0 || negotiated.amq_callee == 0 {
            return Err(Error::ProtocolViolation {
                context: "device negotiated a zero PDU length or queue depth",
            });
        }
        debug!(
            pdu_len = negotiated.pdu_len,
            amq_caller = negotiated.amq_caller,
            amq_callee = negotiated.amq_callee,
            "Session setup negotiated"
        );
        self.setup = Some(negotiated);

        match self.cpu {
            Some(cpu) => self.complete(cpu),
            None => {
                self.state = ConnectionState::AwaitingIdentify;
                Ok(Action::SendIdentify)
            }
        }
    }

    fn complete(&mut self, cpu: CpuType) -> Result<Action> {
        let (Some(connection), Some(setup)) = (self.connection, self.setup) else {
            return Err(Error::ProtocolViolation {
                context: "handshake completed without negotiated parameters",
            });
        };
        self.cpu = Some(cpu);
        self.state = ConnectionState::Connected;
        Ok(Action::Complete(Negotiated {
            connection,
            setup,
            cpu,
        }))
    }
}

/// Device family from a module identification response.
///
/// Unreadable or unknown identification degrades to [`CpuType::Any`].
fn identify_cpu(pdu: &S7Pdu) -> Result<CpuType> {
    let view = pdu.as_ref_view()?;
    let S7PayloadRef::UserData(items) = view.payload else {
        return Err(Error::ErrUnexpectedPdu);
    };
    let item = match items.iter_user_data_items().next() {
        Some(item) => item?,
        None => {
            warn!("Identify response carries no item, using generic profile");
            return Ok(CpuType::Any);
        }
    };
    if item.return_code != S7ReturnCode::Success {
        warn!(code = ?item.return_code, "Identify rejected by device, using generic profile");
        return Ok(CpuType::Any);
    }
    let Some(article) = article_number(item.data) else {
        warn!(len = item.data.len(), "Identify record too short, using generic profile");
        return Ok(CpuType::Any);
    };
    let cpu = CpuType::from_article_number(&article);
    if cpu == CpuType::Any {
        warn!(article = %article, "Unknown article number, using generic profile");
    } else {
        debug!(article = %article, cpu = ?cpu, "Device identified");
    }
    Ok(cpu)
}

fn article_number(szl: &[u8]) -> Option<String> {
    let start = SZL_HEADER_LEN + ARTICLE_NUMBER_OFFSET;
    let raw = szl.get(start..start + ARTICLE_NUMBER_LEN)?;
    Some(String::from_utf8_lossy(raw).trim_end_matches('\0').to_owned())
}

#[cfg(test)]
pub(super) mod tests {
    use super::super::super::frame::{
        build_ack_error, build_ack_setup_comm, build_user_data_response, CpuFunctionGroup,
        DataItemOwned, S7DataVariableType,
    };
    use super::*;
    use crate::protocol::error::S7HeaderError;
    use bytes::{BufMut, Bytes, BytesMut};

    /// Module identification payload as a device returns it.
    pub(crate) fn szl_module_id(article: &str) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u16(SZL_MODULE_ID);
        buf.put_u16(SZL_MODULE_ID_INDEX);
        buf.put_u16(28);
        buf.put_u16(1);
        buf.put_u16(0x0001);
        let mut mlfb = [b' '; ARTICLE_NUMBER_LEN];
        let n = article.len().min(ARTICLE_NUMBER_LEN);
        mlfb[..n].copy_from_slice(&article.as_bytes()[..n]);
        buf.put_slice(&mlfb);
        buf.put_u16(0);
        buf.put_u16(0);
        buf.put_u16(0);
        buf.freeze()
    }

    pub(crate) fn identify_response(pdu_ref: u16, data: Bytes) -> S7Pdu {
        build_user_data_response(
            pdu_ref,
            CpuFunctionGroup::CpuFunctions,
            0x01,
            DataItemOwned {
                return_code: S7ReturnCode::Success,
                transport_size: S7DataVariableType::OctetString,
                data,
            },
        )
        .unwrap()
    }

    fn confirm(m: &HandshakeMachine) -> TransportFrame {
        TransportFrame::ConnectionConfirm(m.request)
    }

    fn setup_ack(pdu_len: u16, amq_callee: u16) -> TransportFrame {
        TransportFrame::Data(
            build_ack_setup_comm(
                1,
                SetupParam {
                    amq_caller: 8,
                    amq_callee,
                    pdu_len,
                },
            )
            .unwrap(),
        )
    }

    #[test]
    fn known_family_skips_identify() {
        let config = SessionConfig {
            cpu: Some(CpuType::S71200),
            ..Default::default()
        };
        let mut m = HandshakeMachine::new(&config).unwrap();
        let cr = m.start().unwrap();
        assert_eq!(cr.called_tsap, 0x0301);
        assert_eq!(m.state(), ConnectionState::AwaitingTransportConnect);

        let action = m.advance(confirm(&m)).unwrap();
        assert!(matches!(action, Action::SendSetup(p) if p.pdu_len == 960));
        assert_eq!(m.state(), ConnectionState::AwaitingSessionSetup);

        let Action::Complete(n) = m.advance(setup_ack(480, 3)).unwrap() else {
            panic!("expected completion");
        };
        assert_eq!(m.state(), ConnectionState::Connected);
        assert_eq!(n.cpu, CpuType::S71200);
        assert_eq!(n.setup.pdu_len, 480);
        assert_eq!(n.setup.amq_callee, 3);
    }

    #[test]
    fn unknown_family_is_identified() {
        let mut m = HandshakeMachine::new(&SessionConfig::default()).unwrap();
        m.start().unwrap();
        m.advance(confirm(&m)).unwrap();
        assert_eq!(m.advance(setup_ack(960, 8)).unwrap(), Action::SendIdentify);
        assert_eq!(m.state(), ConnectionState::AwaitingIdentify);

        let resp = identify_response(2, szl_module_id("6ES7 315-2EH14-0AB0"));
        let Action::Complete(n) = m.advance(TransportFrame::Data(resp)).unwrap() else {
            panic!("expected completion");
        };
        assert_eq!(n.cpu, CpuType::S7300);
    }

    #[test]
    fn unknown_article_number_degrades_to_generic() {
        let mut m = HandshakeMachine::new(&SessionConfig::default()).unwrap();
        m.start().unwrap();
        m.advance(confirm(&m)).unwrap();
        m.advance(setup_ack(960, 8)).unwrap();
        let resp = identify_response(2, szl_module_id("6AV2 123-2GB03-0AX0"));
        let Action::Complete(n) = m.advance(TransportFrame::Data(resp)).unwrap() else {
            panic!("expected completion");
        };
        assert_eq!(n.cpu, CpuType::Any);

        let mut m = HandshakeMachine::new(&SessionConfig::default()).unwrap();
        m.start().unwrap();
        m.advance(confirm(&m)).unwrap();
        m.advance(setup_ack(960, 8)).unwrap();
        let resp = identify_response(2, Bytes::from_static(&[0x00, 0x11]));
        assert!(matches!(
            m.advance(TransportFrame::Data(resp)),
            Ok(Action::Complete(Negotiated { cpu: CpuType::Any, .. }))
        ));
    }

    #[test]
    fn device_connection_params_are_adopted() {
        let config = SessionConfig {
            cpu: Some(CpuType::S71500),
            ..Default::default()
        };
        let mut m = HandshakeMachine::new(&config).unwrap();
        let mut cc = m.start().unwrap();
        cc.tpdu_size = 0x09;
        m.advance(TransportFrame::ConnectionConfirm(cc)).unwrap();
        let Action::Complete(n) = m.advance(setup_ack(240, 1)).unwrap() else {
            panic!("expected completion");
        };
        assert_eq!(n.connection.tpdu_size, 0x09);
    }

    #[test]
    fn rejected_setup_fails() {
        let mut m = HandshakeMachine::new(&SessionConfig::default()).unwrap();
        m.start().unwrap();
        m.advance(confirm(&m)).unwrap();
        let nack = TransportFrame::Data(build_ack_error(1, S7HeaderError::FEATURE_NOT_ENABLED));
        let err = m.advance(nack).unwrap_err();
        assert!(matches!(err, Error::S7Error(S7HeaderError::FEATURE_NOT_ENABLED)));

        let err = m.fail(err);
        assert_eq!(m.state(), ConnectionState::Failed);
        assert!(matches!(
            err,
            Error::Handshake {
                state: ConnectionState::AwaitingSessionSetup,
                ..
            }
        ));
    }

    #[test]
    fn out_of_order_frames_are_rejected() {
        let mut m = HandshakeMachine::new(&SessionConfig::default()).unwrap();
        m.start().unwrap();
        assert!(matches!(
            m.advance(setup_ack(960, 8)),
            Err(Error::ErrUnexpectedPdu)
        ));
        assert!(m.start().is_err());
        assert!(matches!(
            m.advance(TransportFrame::Disconnect),
            Err(Error::ErrUseClosedConnection)
        ));
    }
}
