use super::frame::{S7Area, S7TransportSize, S7VarSpec};
use std::fmt;

/// Highest byte (or element) number an S7ANY address item can carry.
pub const MAX_ITEM_ADDRESS: u32 = 0x1F_FFFF;

/// Element type of a `Tag::Simple`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Bool,
    Byte,
    Word,
    DWord,
    LWord,
    SInt,
    USInt,
    Int,
    UInt,
    DInt,
    UDInt,
    LInt,
    ULInt,
    Real,
    LReal,
    Char,
    WChar,
    /// IEC time, signed milliseconds
    Time,
    /// IEC long time, signed nanoseconds
    LTime,
    S5Time,
    /// Days since 1990-01-01
    Date,
    /// Milliseconds since midnight
    TimeOfDay,
    /// BCD encoded DATE_AND_TIME
    DateAndTime,
    Dtl,
    Counter,
    Timer,
}

impl DataType {
    /// Bytes occupied by one element on the device.
    pub const fn size_in_bytes(self) -> usize {
        match self {
            DataType::Bool
            | DataType::Byte
            | DataType::SInt
            | DataType::USInt
            | DataType::Char => 1,
            DataType::Word
            | DataType::Int
            | DataType::UInt
            | DataType::WChar
            | DataType::S5Time
            | DataType::Date
            | DataType::Counter
            | DataType::Timer => 2,
            DataType::DWord
            | DataType::DInt
            | DataType::UDInt
            | DataType::Real
            | DataType::Time
            | DataType::TimeOfDay => 4,
            DataType::LWord
            | DataType::LInt
            | DataType::ULInt
            | DataType::LReal
            | DataType::LTime
            | DataType::DateAndTime => 8,
            DataType::Dtl => 12,
        }
    }
}

/// Character width of a string tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StringKind {
    /// Single-byte characters, 2-byte header `[max, actual]`
    String,
    /// UTF-16 characters, 4-byte header `[max: u16, actual: u16]`
    WString,
}

impl StringKind {
    #[inline]
    pub const fn header_len(self) -> usize {
        match self {
            StringKind::String => 2,
            StringKind::WString => 4,
        }
    }

    #[inline]
    pub const fn char_width(self) -> usize {
        match self {
            StringKind::String => 1,
            StringKind::WString => 2,
        }
    }

    /// Bytes of one string element declared with `max_len` characters.
    #[inline]
    pub const fn element_size(self, max_len: u16) -> usize {
        self.header_len() + max_len as usize * self.char_width()
    }
}

/// Start of an addressable location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    pub area: S7Area,
    /// Block number, meaningful for DB/DI only
    pub block: u16,
    pub byte_offset: u32,
    pub bit_offset: u8,
}

impl Address {
    pub fn new(area: S7Area, block: u16, byte_offset: u32, bit_offset: u8) -> Self {
        Self {
            area,
            block: if area.is_block_scoped() { block } else { 0 },
            byte_offset,
            bit_offset: bit_offset & 0x07,
        }
    }

    /// Data block address.
    pub fn db(block: u16, byte_offset: u32) -> Self {
        Self::new(S7Area::DB, block, byte_offset, 0)
    }

    #[inline]
    pub fn with_bit(self, bit_offset: u8) -> Self {
        Self {
            bit_offset: bit_offset & 0x07,
            ..self
        }
    }

    /// Key of the area bucket this address merges within.
    #[inline]
    pub fn area_key(&self) -> (S7Area, u16) {
        (self.area, self.block)
    }

    #[inline]
    pub fn position(&self) -> (u32, u8) {
        (self.byte_offset, self.bit_offset)
    }

    /// Bytes per unit of `byte_offset`. Counters and timers are addressed
    /// by element number.
    #[inline]
    pub fn unit_bytes(&self) -> u32 {
        if self.area.is_counter_or_timer() {
            2
        } else {
            1
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.area.is_block_scoped() {
            write!(f, "{}{}.", self.area.short_name(), self.block)?;
        } else {
            f.write_str(self.area.short_name())?;
        }
        write!(f, "{}.{}", self.byte_offset, self.bit_offset)
    }
}

/// Position of a fragment within a split entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fragment {
    pub index: u16,
    pub count: u16,
    /// Byte size of the unsplit entry
    pub total_size: u32,
}

impl Fragment {
    /// Descriptor of an entry that was not split.
    pub const fn whole(total_size: u32) -> Self {
        Self {
            index: 0,
            count: 1,
            total_size,
        }
    }

    #[inline]
    pub fn is_split(&self) -> bool {
        self.count > 1
    }
}

/// Contiguous byte range covering one or more caller tags.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub address: Address,
    pub byte_count: u32,
    /// Covered caller tags with their request names; owned exclusively
    pub members: Vec<(String, Tag)>,
    pub fragment: Fragment,
}

/// Addressable device location.
#[derive(Debug, Clone, PartialEq)]
pub enum Tag {
    Simple {
        address: Address,
        data_type: DataType,
        count: u16,
    },
    FixedString {
        address: Address,
        kind: StringKind,
        /// Declared maximum character count
        max_len: u16,
        count: u16,
    },
    /// String whose declared length is read from the device first.
    VarString {
        address: Address,
        kind: StringKind,
        count: u16,
    },
    Chunk(Chunk),
    /// System status list record set
    Szl { id: u16, index: u16 },
    /// Device real-time clock
    Clock,
}

impl Tag {
    pub fn simple(address: Address, data_type: DataType, count: u16) -> Self {
        Tag::Simple {
            address,
            data_type,
            count: count.max(1),
        }
    }

    pub fn bool(address: Address) -> Self {
        Tag::simple(address, DataType::Bool, 1)
    }

    pub fn string(address: Address, max_len: u16) -> Self {
        Tag::FixedString {
            address,
            kind: StringKind::String,
            max_len,
            count: 1,
        }
    }

    pub fn wstring(address: Address, max_len: u16) -> Self {
        Tag::FixedString {
            address,
            kind: StringKind::WString,
            max_len,
            count: 1,
        }
    }

    pub fn var_string(address: Address, kind: StringKind) -> Self {
        Tag::VarString {
            address,
            kind,
            count: 1,
        }
    }

    pub fn address(&self) -> Option<&Address> {
        match self {
            Tag::Simple { address, .. }
            | Tag::FixedString { address, .. }
            | Tag::VarString { address, .. } => Some(address),
            Tag::Chunk(c) => Some(&c.address),
            Tag::Szl { .. } | Tag::Clock => None,
        }
    }

    /// Byte size on the device. `VarString` reports its header size, system tags zero.
    pub fn size(&self) -> usize {
        match self {
            Tag::Simple {
                address,
                data_type: DataType::Bool,
                count,
            } => bool_span(address.bit_offset, *count),
            Tag::Simple {
                data_type, count, ..
            } => data_type.size_in_bytes() * *count as usize,
            Tag::FixedString {
                kind,
                max_len,
                count,
                ..
            } => kind.element_size(*max_len) * *count as usize,
            Tag::VarString { kind, count, .. } => kind.header_len() * *count as usize,
            Tag::Chunk(c) => c.byte_count as usize,
            Tag::Szl { .. } | Tag::Clock => 0,
        }
    }

    /// Tags that take part in byte-range merging.
    pub fn is_mergeable(&self) -> bool {
        match self {
            Tag::Simple { address, .. } | Tag::FixedString { address, .. } => {
                !address.area.is_counter_or_timer()
            }
            Tag::VarString { .. } | Tag::Chunk(_) | Tag::Szl { .. } | Tag::Clock => false,
        }
    }

    /// Whether the whole addressed range fits an S7ANY item address.
    /// System tags always do.
    pub fn in_address_range(&self) -> bool {
        match self.address() {
            Some(address) => {
                let units = (self.size() as u64).div_ceil(address.unit_bytes() as u64);
                address.byte_offset as u64 + units <= MAX_ITEM_ADDRESS as u64 + 1
            }
            None => true,
        }
    }

    /// Served by UserData requests rather than ReadVar.
    #[inline]
    pub fn is_system(&self) -> bool {
        matches!(self, Tag::Szl { .. } | Tag::Clock)
    }

    /// S7ANY address item addressing this tag, `None` for system tags.
    pub fn var_spec(&self) -> Option<S7VarSpec> {
        let (address, transport_size, count) = match self {
            Tag::Simple {
                address,
                data_type,
                count,
            } => {
                let (ts, n) = simple_transport(address, *data_type, *count);
                (address, ts, n)
            }
            Tag::FixedString {
                address,
                kind: StringKind::String,
                max_len,
                count,
            } => (
                address,
                S7TransportSize::Char,
                *count as usize * (*max_len as usize + 2),
            ),
            Tag::FixedString {
                address,
                kind: StringKind::WString,
                max_len,
                count,
            } => (
                address,
                S7TransportSize::Byte,
                *count as usize * (*max_len as usize + 2) * 2,
            ),
            Tag::VarString { address, .. } => (address, S7TransportSize::Byte, self.size()),
            Tag::Chunk(c) => match element_transport(c.address.area) {
                Some(ts) => (&c.address, ts, (c.byte_count / 2) as usize),
                None => (&c.address, S7TransportSize::Byte, c.byte_count as usize),
            },
            Tag::Szl { .. } | Tag::Clock => return None,
        };
        let bit_index = if transport_size == S7TransportSize::Bit {
            address.bit_offset
        } else {
            0
        };
        Some(S7VarSpec {
            transport_size,
            count: u16::try_from(count).unwrap_or(u16::MAX),
            db_number: address.block,
            area: address.area,
            byte_address: address.byte_offset,
            bit_index,
        })
    }
}

fn simple_transport(address: &Address, data_type: DataType, count: u16) -> (S7TransportSize, usize) {
    if let Some(ts) = element_transport(address.area) {
        return (ts, count as usize);
    }
    match data_type {
        DataType::Bool if count == 1 => (S7TransportSize::Bit, 1),
        DataType::Bool => (
            S7TransportSize::Byte,
            bool_span(address.bit_offset, count),
        ),
        DataType::Counter => (S7TransportSize::Counter, count as usize),
        DataType::Timer => (S7TransportSize::Timer, count as usize),
        _ => (
            S7TransportSize::Byte,
            data_type.size_in_bytes() * count as usize,
        ),
    }
}

/// Transport size the device requires in counter and timer areas.
fn element_transport(area: S7Area) -> Option<S7TransportSize> {
    match area {
        S7Area::C => Some(S7TransportSize::Counter),
        S7Area::T => Some(S7TransportSize::Timer),
        S7Area::Iecc => Some(S7TransportSize::IECCounter),
        S7Area::Iecd => Some(S7TransportSize::IECTimer),
        _ => None,
    }
}

/// Bytes covering `count` bits starting at `bit_offset`.
#[inline]
fn bool_span(bit_offset: u8, count: u16) -> usize {
    if count <= 1 {
        1
    } else {
        (bit_offset as usize + count as usize).div_ceil(8)
    }
}
