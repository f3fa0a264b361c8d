/// S7 PDU kinds (ROSCTR)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum S7PduType {
    Job = 0x01,
    Ack = 0x02,
    AckData = 0x03,
    UserData = 0x07,
}

impl TryFrom<u8> for S7PduType {
    type Error = ();
    fn try_from(v: u8) -> std::result::Result<Self, Self::Error> {
        match v {
            0x01 => Ok(S7PduType::Job),
            0x02 => Ok(S7PduType::Ack),
            0x03 => Ok(S7PduType::AckData),
            0x07 => Ok(S7PduType::UserData),
            _ => Err(()),
        }
    }
}

impl S7PduType {
    /// Ack and AckData headers carry two extra error bytes.
    #[inline]
    pub fn has_error_field(self) -> bool {
        matches!(self, S7PduType::Ack | S7PduType::AckData)
    }
}

/// Job/AckData function codes handled by this crate
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum S7Function {
    CpuService = 0x00,
    ReadVar = 0x04,
    WriteVar = 0x05,
    /// param: [0xF0, 0x00, amq_caller, amq_callee, pdu_len]
    SetupCommunication = 0xF0,
}

impl TryFrom<u8> for S7Function {
    type Error = ();

    fn try_from(v: u8) -> std::result::Result<Self, Self::Error> {
        match v {
            0x00 => Ok(S7Function::CpuService),
            0x04 => Ok(S7Function::ReadVar),
            0x05 => Ok(S7Function::WriteVar),
            0xF0 => Ok(S7Function::SetupCommunication),
            _ => Err(()),
        }
    }
}

/// Variable specification type byte
pub const VAR_SPEC_TYPE: u8 = 0x12;
/// Length of an S7ANY address following the spec type and length bytes
pub const S7ANY_SPEC_LEN: u8 = 0x0A;
/// S7ANY syntax identifier
pub const SYNTAX_ID_S7ANY: u8 = 0x10;

/// S7 memory areas
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum S7Area {
    /// System info of 200 family
    SI200 = 0x03,
    /// System flags of 200 family
    SF200 = 0x05,
    /// Analog inputs of 200 family
    AI200 = 0x06,
    /// Analog outputs of 200 family
    AO200 = 0x07,
    /// Direct peripheral access
    DP = 0x80,
    /// Inputs
    I = 0x81,
    /// Outputs
    O = 0x82,
    /// Merkers
    M = 0x83,
    /// Data blocks
    DB = 0x84,
    /// Instance data blocks
    DI = 0x85,
    /// Local data
    L = 0x86,
    V = 0x87,
    /// Counters
    C = 0x1C,
    /// Timers
    T = 0x1D,
    /// IEC counters of 200 family
    Iecc = 0x1E,
    /// IEC timers of 200 family
    Iecd = 0x1F,
}

impl TryFrom<u8> for S7Area {
    type Error = ();
    fn try_from(v: u8) -> std::result::Result<Self, Self::Error> {
        match v {
            0x03 => Ok(S7Area::SI200),
            0x05 => Ok(S7Area::SF200),
            0x06 => Ok(S7Area::AI200),
            0x07 => Ok(S7Area::AO200),
            0x80 => Ok(S7Area::DP),
            0x81 => Ok(S7Area::I),
            0x82 => Ok(S7Area::O),
            0x83 => Ok(S7Area::M),
            0x84 => Ok(S7Area::DB),
            0x85 => Ok(S7Area::DI),
            0x86 => Ok(S7Area::L),
            0x87 => Ok(S7Area::V),
            0x1C => Ok(S7Area::C),
            0x1D => Ok(S7Area::T),
            0x1E => Ok(S7Area::Iecc),
            0x1F => Ok(S7Area::Iecd),
            _ => Err(()),
        }
    }
}

impl S7Area {
    /// Areas addressed by a block number.
    #[inline]
    pub fn is_block_scoped(self) -> bool {
        matches!(self, S7Area::DB | S7Area::DI)
    }

    /// Areas the device only serves with counter/timer transport sizes.
    #[inline]
    pub fn is_counter_or_timer(self) -> bool {
        matches!(self, S7Area::C | S7Area::T | S7Area::Iecc | S7Area::Iecd)
    }

    pub fn short_name(self) -> &'static str {
        match self {
            S7Area::SI200 => "SI",
            S7Area::SF200 => "SF",
            S7Area::AI200 => "AI",
            S7Area::AO200 => "AO",
            S7Area::DP => "P",
            S7Area::I => "I",
            S7Area::O => "Q",
            S7Area::M => "M",
            S7Area::DB => "DB",
            S7Area::DI => "DI",
            S7Area::L => "L",
            S7Area::V => "V",
            S7Area::C => "C",
            S7Area::T => "T",
            S7Area::Iecc => "IC",
            S7Area::Iecd => "IT",
        }
    }
}

/// Transport size codes of S7ANY address items
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum S7TransportSize {
    Bit = 0x01,
    Byte = 0x02,
    Char = 0x03,
    Word = 0x04,
    Int = 0x05,
    DWord = 0x06,
    DInt = 0x07,
    Real = 0x08,
    Date = 0x09,
    TimeOfDay = 0x0A,
    Time = 0x0B,
    S5Time = 0x0C,
    DateTime = 0x0F,
    Counter = 0x1C,
    Timer = 0x1D,
    IECTimer = 0x1E,
    IECCounter = 0x1F,
}

impl TryFrom<u8> for S7TransportSize {
    type Error = ();
    fn try_from(v: u8) -> std::result::Result<Self, Self::Error> {
        use S7TransportSize::*;
        Ok(match v {
            0x01 => Bit,
            0x02 => Byte,
            0x03 => Char,
            0x04 => Word,
            0x05 => Int,
            0x06 => DWord,
            0x07 => DInt,
            0x08 => Real,
            0x09 => Date,
            0x0A => TimeOfDay,
            0x0B => Time,
            0x0C => S5Time,
            0x0F => DateTime,
            0x1C => Counter,
            0x1D => Timer,
            0x1E => IECTimer,
            0x1F => IECCounter,
            _ => Err(())?,
        })
    }
}

impl S7TransportSize {
    /// Bytes per addressed element.
    #[inline]
    pub fn element_bytes(self) -> usize {
        match self {
            S7TransportSize::Bit | S7TransportSize::Byte | S7TransportSize::Char => 1,
            S7TransportSize::Word
            | S7TransportSize::Int
            | S7TransportSize::Date
            | S7TransportSize::S5Time
            | S7TransportSize::Counter
            | S7TransportSize::Timer
            | S7TransportSize::IECTimer
            | S7TransportSize::IECCounter => 2,
            S7TransportSize::DWord
            | S7TransportSize::DInt
            | S7TransportSize::Real
            | S7TransportSize::TimeOfDay
            | S7TransportSize::Time => 4,
            S7TransportSize::DateTime => 8,
        }
    }

    /// Data variable type used when this transport size is written.
    #[inline]
    pub fn write_variable_type(self) -> S7DataVariableType {
        match self {
            S7TransportSize::Bit => S7DataVariableType::Bit,
            S7TransportSize::Counter
            | S7TransportSize::Timer
            | S7TransportSize::IECTimer
            | S7TransportSize::IECCounter => S7DataVariableType::OctetString,
            _ => S7DataVariableType::ByteWordDWord,
        }
    }
}

/// Per-item return code of ReadVar/WriteVar responses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum S7ReturnCode {
    Reserved,
    Success,
    HardwareFault,
    AccessDenied,
    AddressOutOfRange,
    DataTypeNotSupported,
    DataTypeInconsistent,
    ObjectDoesNotExist,
    ObjectNotAvailable,
    Unknown(u8),
}

impl From<u8> for S7ReturnCode {
    fn from(v: u8) -> Self {
        match v {
            0x00 => S7ReturnCode::Reserved,
            0xFF => S7ReturnCode::Success,
            0x01 => S7ReturnCode::HardwareFault,
            0x03 => S7ReturnCode::AccessDenied,
            0x05 => S7ReturnCode::AddressOutOfRange,
            0x06 => S7ReturnCode::DataTypeNotSupported,
            0x07 => S7ReturnCode::DataTypeInconsistent,
            0x0A => S7ReturnCode::ObjectDoesNotExist,
            0x0B => S7ReturnCode::ObjectNotAvailable,
            other => S7ReturnCode::Unknown(other),
        }
    }
}

impl From<S7ReturnCode> for u8 {
    fn from(value: S7ReturnCode) -> Self {
        match value {
            S7ReturnCode::Reserved => 0x00,
            S7ReturnCode::Success => 0xFF,
            S7ReturnCode::HardwareFault => 0x01,
            S7ReturnCode::AccessDenied => 0x03,
            S7ReturnCode::AddressOutOfRange => 0x05,
            S7ReturnCode::DataTypeNotSupported => 0x06,
            S7ReturnCode::DataTypeInconsistent => 0x07,
            S7ReturnCode::ObjectDoesNotExist => 0x0A,
            S7ReturnCode::ObjectNotAvailable => 0x0B,
            S7ReturnCode::Unknown(v) => v,
        }
    }
}

/// Data variable type of AckData and WriteVar data items
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum S7DataVariableType {
    Null = 0x00,
    /// length in bits
    Bit = 0x03,
    /// length in bits
    ByteWordDWord = 0x04,
    /// length in bits
    Integer = 0x05,
    DInteger = 0x06,
    Real = 0x07,
    OctetString = 0x09,
}

impl TryFrom<u8> for S7DataVariableType {
    type Error = ();
    fn try_from(v: u8) -> std::result::Result<Self, Self::Error> {
        Ok(match v {
            0x00 => S7DataVariableType::Null,
            0x03 => S7DataVariableType::Bit,
            0x04 => S7DataVariableType::ByteWordDWord,
            0x05 => S7DataVariableType::Integer,
            0x06 => S7DataVariableType::DInteger,
            0x07 => S7DataVariableType::Real,
            0x09 => S7DataVariableType::OctetString,
            _ => Err(())?,
        })
    }
}

impl S7DataVariableType {
    /// Whether the item length field counts bits rather than bytes.
    #[inline]
    pub fn length_in_bits(self) -> bool {
        matches!(
            self,
            S7DataVariableType::Null
                | S7DataVariableType::Bit
                | S7DataVariableType::ByteWordDWord
                | S7DataVariableType::Integer
        )
    }
}

/// UserData function group
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuFunctionGroup {
    ModeTransition = 0x00,
    ProgrammerCommands = 0x01,
    CyclicServices = 0x02,
    BlockFunctions = 0x03,
    CpuFunctions = 0x04,
    SecurityFunctions = 0x05,
    TimeFunctions = 0x07,
}

impl TryFrom<u8> for CpuFunctionGroup {
    type Error = ();
    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0x00 => Ok(CpuFunctionGroup::ModeTransition),
            0x01 => Ok(CpuFunctionGroup::ProgrammerCommands),
            0x02 => Ok(CpuFunctionGroup::CyclicServices),
            0x03 => Ok(CpuFunctionGroup::BlockFunctions),
            0x04 => Ok(CpuFunctionGroup::CpuFunctions),
            0x05 => Ok(CpuFunctionGroup::SecurityFunctions),
            0x07 => Ok(CpuFunctionGroup::TimeFunctions),
            _ => Err(()),
        }
    }
}

/// UserData function type nibble
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuFunctionType {
    IndicationPush = 0x00,
    Request = 0x04,
    Response = 0x08,
}

impl TryFrom<u8> for CpuFunctionType {
    type Error = ();
    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0x00 => Ok(CpuFunctionType::IndicationPush),
            0x04 => Ok(CpuFunctionType::Request),
            0x08 => Ok(CpuFunctionType::Response),
            _ => Err(()),
        }
    }
}

/// Subfunction of `CpuFunctions` reading a system status list.
pub const SUBFUNCTION_READ_SZL: u8 = 0x01;
/// Subfunction of `TimeFunctions` reading the device clock.
pub const SUBFUNCTION_READ_CLOCK: u8 = 0x01;
/// UserData request method byte
pub const USERDATA_METHOD_REQUEST: u8 = 0x11;
/// UserData response method byte
pub const USERDATA_METHOD_RESPONSE: u8 = 0x12;
