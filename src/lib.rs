//! Siemens S7 communication core.

pub mod protocol;
pub mod wire;

pub use protocol::{
    error::{Error, Result, S7HeaderError},
    frame::{CpuType, S7Area, Tsap, TsapPair},
    request::{
        NamedMap, ReadItem, ReadRequest, ReadResponse, ResponseCode, WriteRequest, WriteResponse,
    },
    session::{
        ConnectionState, Negotiated, OptimizerConfig, Session, SessionConfig, TagAccess,
        TsapConfig,
    },
    tag::{Address, DataType, StringKind, Tag},
    transaction::{TransactionGuard, TransactionManager},
    transport::{channel_pair, ChannelTransport, ConnectionParams, Transport, TransportFrame},
    value::Value,
};
