use super::super::{
    error::Result,
    frame::{default_tsap_pair, CpuType, Tsap, TsapPair},
    planner::PlannerConfig,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connection state published to API consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No transport, initial and final state
    Disconnected,
    /// Connection request sent, waiting for the confirm
    AwaitingTransportConnect,
    /// SetupCommunication sent
    AwaitingSessionSetup,
    /// Identify (SZL) request sent
    AwaitingIdentify,
    /// Ready for reads and writes
    Connected,
    /// Handshake failed; the session is unusable
    Failed,
}

impl ConnectionState {
    /// States in which a handshake is still running.
    #[inline]
    pub fn is_handshaking(self) -> bool {
        matches!(
            self,
            ConnectionState::AwaitingTransportConnect
                | ConnectionState::AwaitingSessionSetup
                | ConnectionState::AwaitingIdentify
        )
    }
}

/// How the TSAP pair of the connection request is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum TsapConfig {
    /// Derived from the device family and its rack/slot position
    RackSlot { rack: u8, slot: u8 },
    /// Explicit pair, e.g. `{"kind":"tsap","local":"01:00","remote":"03:01"}`
    Tsap { local: Tsap, remote: Tsap },
}

impl Default for TsapConfig {
    fn default() -> Self {
        TsapConfig::RackSlot { rack: 0, slot: 1 }
    }
}

impl TsapConfig {
    pub fn resolve(&self, cpu: CpuType) -> Result<TsapPair> {
        match *self {
            TsapConfig::RackSlot { rack, slot } => default_tsap_pair(cpu, rack, slot),
            TsapConfig::Tsap { local, remote } => Ok(TsapPair { local, remote }),
        }
    }
}

/// Read/write optimizer knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OptimizerConfig {
    /// First-fit-decreasing frame packing instead of request order
    pub bin_packing: bool,
    /// Upper bound of address items per frame (the protocol allows 255)
    pub max_items_per_frame: Option<usize>,
}

impl OptimizerConfig {
    pub(crate) fn planner(&self, pdu_len: u16) -> PlannerConfig {
        PlannerConfig::new(pdu_len)
            .with_bin_packing(self.bin_packing)
            .with_max_items_per_request(self.max_items_per_frame)
    }
}

/// Session configuration for the S7 handshake and runtime behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    /// Device family when known up front; `None` identifies it after setup
    pub cpu: Option<CpuType>,
    pub tsap: TsapConfig,
    /// Proposed S7 PDU length in bytes
    pub preferred_pdu_size: u16,
    /// Proposed max outstanding jobs towards the device
    pub preferred_amq_caller: u16,
    /// Proposed max outstanding jobs the device may queue
    pub preferred_amq_callee: u16,
    /// Caller-side bound of concurrent requests (back pressure)
    pub max_concurrent_requests: usize,
    /// COTP TPDU size code, 0x0A = 1024 bytes
    pub tpdu_size: u8,
    /// Bound for every handshake step
    #[serde(with = "duration_ms")]
    pub connect_timeout: Duration,
    /// Bound for each request/response exchange once connected
    #[serde(with = "duration_ms")]
    pub read_timeout: Duration,
    /// Outbound request queue capacity
    pub request_queue_capacity: usize,
    pub optimizer: OptimizerConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cpu: None,
            tsap: TsapConfig::default(),
            preferred_pdu_size: 960,
            preferred_amq_caller: 8,
            preferred_amq_callee: 80,
            max_concurrent_requests: 32,
            tpdu_size: 0x0A,
            connect_timeout: Duration::from_millis(10_000),
            read_timeout: Duration::from_millis(5_000),
            request_queue_capacity: 256,
            optimizer: OptimizerConfig::default(),
        }
    }
}

/// Durations as integer milliseconds.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
