use super::{
    error::{Error, Result},
    frame::CpuType,
    tag::{DataType, StringKind, Tag},
};
use bytes::{BufMut, Bytes, BytesMut};
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use nom::number::complete::{be_u16, be_u8};
use tracing::warn;

type NomErr<'a> = nom::error::Error<&'a [u8]>;

/// Decoded value of a tag.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// No value: failed entry or undecodable array element
    Null,
    Bool(bool),
    Byte(u8),
    Word(u16),
    DWord(u32),
    LWord(u64),
    SInt(i8),
    USInt(u8),
    Int(i16),
    UInt(u16),
    DInt(i32),
    UDInt(u32),
    LInt(i64),
    ULInt(u64),
    Real(f32),
    LReal(f64),
    Char(char),
    String(String),
    /// TIME, LTIME, S5TIME and TIMER
    Duration(Duration),
    Date(NaiveDate),
    TimeOfDay(NaiveTime),
    /// DATE_AND_TIME, DTL and the device clock
    DateTime(NaiveDateTime),
    Counter(u16),
    /// Raw bytes: BYTE arrays, chunks, SZL records
    Bytes(Bytes),
    List(Vec<Value>),
}

impl Value {
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    fn as_integer(&self) -> Option<i128> {
        Some(match *self {
            Value::Bool(b) => b as i128,
            Value::Byte(v) | Value::USInt(v) => v as i128,
            Value::Word(v) | Value::UInt(v) | Value::Counter(v) => v as i128,
            Value::DWord(v) | Value::UDInt(v) => v as i128,
            Value::LWord(v) | Value::ULInt(v) => v as i128,
            Value::SInt(v) => v as i128,
            Value::Int(v) => v as i128,
            Value::DInt(v) => v as i128,
            Value::LInt(v) => v as i128,
            _ => return None,
        })
    }

    fn as_float(&self) -> Option<f64> {
        match *self {
            Value::Real(v) => Some(v as f64),
            Value::LReal(v) => Some(v),
            _ => self.as_integer().map(|v| v as f64),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::DInt(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Real(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

#[inline]
fn fixed<const N: usize>(data: &[u8]) -> Result<[u8; N]> {
    data.get(..N)
        .and_then(|s| <[u8; N]>::try_from(s).ok())
        .ok_or(Error::InsufficientData {
            needed: N,
            available: data.len(),
        })
}

fn bcd_to_u8(b: u8) -> Result<u8> {
    let (hi, lo) = (b >> 4, b & 0x0F);
    if hi > 9 || lo > 9 {
        return Err(Error::Decode {
            context: "invalid BCD digit",
        });
    }
    Ok(hi * 10 + lo)
}

#[inline]
fn u8_to_bcd(v: u8) -> u8 {
    ((v / 10) << 4) | (v % 10)
}

fn bcd3_to_u16(raw: u16) -> Result<u16> {
    let digits = [(raw >> 8) & 0x0F, (raw >> 4) & 0x0F, raw & 0x0F];
    if digits.iter().any(|d| *d > 9) {
        return Err(Error::Decode {
            context: "invalid BCD digit",
        });
    }
    Ok(digits[0] * 100 + digits[1] * 10 + digits[2])
}

#[inline]
fn u16_to_bcd3(v: u16) -> u16 {
    ((v / 100 % 10) << 8) | ((v / 10 % 10) << 4) | (v % 10)
}

fn s7_epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1990, 1, 1).unwrap_or_default()
}

const S5_TIME_BASES_MS: [i64; 4] = [10, 100, 1_000, 10_000];

fn decode_s5time(raw: u16) -> Result<Duration> {
    let base = S5_TIME_BASES_MS[((raw >> 12) & 0x03) as usize];
    Ok(Duration::milliseconds(bcd3_to_u16(raw & 0x0FFF)? as i64 * base))
}

fn encode_s5time(d: Duration) -> Option<u16> {
    let ms = d.num_milliseconds();
    if ms < 0 {
        return None;
    }
    S5_TIME_BASES_MS
        .iter()
        .enumerate()
        .find(|(_, base)| ms / **base <= 999)
        .map(|(code, base)| ((code as u16) << 12) | u16_to_bcd3((ms / base) as u16))
}

/// DATE_AND_TIME: BCD year, month, day, hour, minute, second, two millisecond
/// digits, then the last millisecond digit in the high nibble and weekday in
/// the low nibble. Years 90..99 are 19xx unless a century is given.
fn decode_date_and_time(b: &[u8; 8], century: Option<u16>) -> Result<NaiveDateTime> {
    let yy = bcd_to_u8(b[0])? as u16;
    let year = match century {
        Some(c) => c * 100 + yy,
        None if yy >= 90 => 1900 + yy,
        None => 2000 + yy,
    };
    let ms = bcd_to_u8(b[6])? as u32 * 10 + (b[7] >> 4) as u32;
    let (month, day) = (bcd_to_u8(b[1])? as u32, bcd_to_u8(b[2])? as u32);
    let (hour, minute, second) = (
        bcd_to_u8(b[3])? as u32,
        bcd_to_u8(b[4])? as u32,
        bcd_to_u8(b[5])? as u32,
    );
    NaiveDate::from_ymd_opt(year as i32, month, day)
        .and_then(|d| d.and_hms_milli_opt(hour, minute, second, ms))
        .ok_or(Error::Decode {
            context: "invalid DATE_AND_TIME",
        })
}

fn encode_date_and_time(dt: &NaiveDateTime) -> Option<[u8; 8]> {
    if !(1990..=2089).contains(&dt.year()) {
        return None;
    }
    let ms = (dt.nanosecond() / 1_000_000).min(999);
    Some([
        u8_to_bcd((dt.year() % 100) as u8),
        u8_to_bcd(dt.month() as u8),
        u8_to_bcd(dt.day() as u8),
        u8_to_bcd(dt.hour() as u8),
        u8_to_bcd(dt.minute() as u8),
        u8_to_bcd(dt.second() as u8),
        u8_to_bcd((ms / 10) as u8),
        (((ms % 10) as u8) << 4) | dt.weekday().number_from_sunday() as u8,
    ])
}

/// DTL: year u16, month, day, weekday, hour, minute, second, nanoseconds u32.
fn decode_dtl(b: &[u8; 12]) -> Result<NaiveDateTime> {
    let year = u16::from_be_bytes([b[0], b[1]]) as i32;
    let nanos = u32::from_be_bytes([b[8], b[9], b[10], b[11]]);
    NaiveDate::from_ymd_opt(year, b[2] as u32, b[3] as u32)
        .and_then(|d| d.and_hms_nano_opt(b[5] as u32, b[6] as u32, b[7] as u32, nanos))
        .ok_or(Error::Decode {
            context: "invalid DTL",
        })
}

fn encode_dtl(dt: &NaiveDateTime) -> Option<[u8; 12]> {
    let year = u16::try_from(dt.year()).ok()?;
    let [y0, y1] = year.to_be_bytes();
    let [n0, n1, n2, n3] = dt.nanosecond().min(999_999_999).to_be_bytes();
    Some([
        y0,
        y1,
        dt.month() as u8,
        dt.day() as u8,
        dt.weekday().number_from_sunday() as u8,
        dt.hour() as u8,
        dt.minute() as u8,
        dt.second() as u8,
        n0,
        n1,
        n2,
        n3,
    ])
}

/// Declared maximum and actual character count of a string header.
pub fn parse_string_header(kind: StringKind, data: &[u8]) -> Result<(u16, u16)> {
    let parsed = match kind {
        StringKind::String => nom::sequence::pair(be_u8::<_, NomErr<'_>>, be_u8)(data)
            .map(|(_, (max, actual))| (max as u16, actual as u16)),
        StringKind::WString => nom::sequence::pair(be_u16::<_, NomErr<'_>>, be_u16)(data)
            .map(|(_, pair)| pair),
    };
    parsed.map_err(|_| Error::InsufficientData {
        needed: kind.header_len(),
        available: data.len(),
    })
}

/// One string element: header, then at most `declared` characters.
fn decode_string(kind: StringKind, declared: u16, data: &[u8]) -> Result<String> {
    let (_, actual) = parse_string_header(kind, data)?;
    let chars = actual.min(declared) as usize;
    let body = &data[kind.header_len()..];
    let needed = chars * kind.char_width();
    if body.len() < needed {
        return Err(Error::InsufficientData {
            needed,
            available: body.len(),
        });
    }
    match kind {
        StringKind::String => Ok(body[..chars].iter().map(|&b| b as char).collect()),
        StringKind::WString => {
            let units: Vec<u16> = body[..needed]
                .chunks_exact(2)
                .map(|c| u16::from_be_bytes([c[0], c[1]]))
                .collect();
            String::from_utf16(&units).map_err(|_| Error::Decode {
                context: "invalid UTF-16 in WSTRING",
            })
        }
    }
}

fn decode_scalar(data_type: DataType, data: &[u8], cpu: CpuType) -> Result<Value> {
    Ok(match data_type {
        DataType::Bool => Value::Bool(fixed::<1>(data)?[0] & 0x01 != 0),
        DataType::Byte => Value::Byte(fixed::<1>(data)?[0]),
        DataType::USInt => Value::USInt(fixed::<1>(data)?[0]),
        DataType::SInt => Value::SInt(fixed::<1>(data)?[0] as i8),
        DataType::Char => Value::Char(fixed::<1>(data)?[0] as char),
        DataType::Word => Value::Word(u16::from_be_bytes(fixed(data)?)),
        DataType::UInt => Value::UInt(u16::from_be_bytes(fixed(data)?)),
        DataType::Int => Value::Int(i16::from_be_bytes(fixed(data)?)),
        DataType::DWord => Value::DWord(u32::from_be_bytes(fixed(data)?)),
        DataType::UDInt => Value::UDInt(u32::from_be_bytes(fixed(data)?)),
        DataType::DInt => Value::DInt(i32::from_be_bytes(fixed(data)?)),
        DataType::LWord => Value::LWord(u64::from_be_bytes(fixed(data)?)),
        DataType::ULInt => Value::ULInt(u64::from_be_bytes(fixed(data)?)),
        DataType::LInt => Value::LInt(i64::from_be_bytes(fixed(data)?)),
        DataType::Real => Value::Real(f32::from_be_bytes(fixed(data)?)),
        DataType::LReal => Value::LReal(f64::from_be_bytes(fixed(data)?)),
        DataType::WChar => {
            let unit = u16::from_be_bytes(fixed(data)?);
            Value::Char(char::from_u32(unit as u32).ok_or(Error::Decode {
                context: "WCHAR is a lone surrogate",
            })?)
        }
        DataType::Time => {
            Value::Duration(Duration::milliseconds(
                i32::from_be_bytes(fixed(data)?) as i64,
            ))
        }
        DataType::LTime => {
            Value::Duration(Duration::nanoseconds(i64::from_be_bytes(fixed(data)?)))
        }
        DataType::S5Time | DataType::Timer => {
            Value::Duration(decode_s5time(u16::from_be_bytes(fixed(data)?))?)
        }
        DataType::Date => {
            let days = u16::from_be_bytes(fixed(data)?);
            Value::Date(
                s7_epoch()
                    .checked_add_signed(Duration::days(days as i64))
                    .ok_or(Error::Decode {
                        context: "invalid DATE",
                    })?,
            )
        }
        DataType::TimeOfDay => {
            let ms = u32::from_be_bytes(fixed(data)?);
            Value::TimeOfDay(
                NaiveTime::from_num_seconds_from_midnight_opt(ms / 1000, (ms % 1000) * 1_000_000)
                    .ok_or(Error::Decode {
                        context: "invalid TIME_OF_DAY",
                    })?,
            )
        }
        DataType::DateAndTime => Value::DateTime(decode_date_and_time(&fixed(data)?, None)?),
        DataType::Dtl => Value::DateTime(decode_dtl(&fixed(data)?)?),
        DataType::Counter => {
            let raw = u16::from_be_bytes(fixed(data)?);
            if cpu.has_binary_counters() {
                Value::Counter(raw)
            } else {
                Value::Counter(bcd3_to_u16(raw)?)
            }
        }
    })
}

/// Decode `count` consecutive elements; undecodable elements become `Value::Null`.
fn decode_elements<F>(data: &[u8], element_size: usize, count: usize, mut f: F) -> Result<Value>
where
    F: FnMut(&[u8]) -> Result<Value>,
{
    let needed = element_size * count;
    if data.len() < needed {
        return Err(Error::InsufficientData {
            needed,
            available: data.len(),
        });
    }
    let items = data[..needed]
        .chunks_exact(element_size.max(1))
        .enumerate()
        .map(|(i, element)| {
            f(element).unwrap_or_else(|e| {
                warn!(error = %e, index = i, "Array element could not be decoded");
                Value::Null
            })
        })
        .collect();
    Ok(Value::List(items))
}

/// Decode the bytes read for `tag`.
pub fn decode(tag: &Tag, data: &[u8], cpu: CpuType) -> Result<Value> {
    match tag {
        Tag::Simple {
            data_type, count, ..
        } if *count <= 1 => decode_scalar(*data_type, data, cpu),
        Tag::Simple {
            address,
            data_type: DataType::Bool,
            count,
        } => {
            let needed = tag.size();
            if data.len() < needed {
                return Err(Error::InsufficientData {
                    needed,
                    available: data.len(),
                });
            }
            Ok(Value::List(
                (0..*count as usize)
                    .map(|i| {
                        let pos = address.bit_offset as usize + i;
                        Value::Bool((data[pos / 8] >> (pos % 8)) & 0x01 != 0)
                    })
                    .collect(),
            ))
        }
        Tag::Simple {
            data_type: DataType::Byte,
            ..
        } => {
            let needed = tag.size();
            if data.len() < needed {
                return Err(Error::InsufficientData {
                    needed,
                    available: data.len(),
                });
            }
            Ok(Value::Bytes(Bytes::copy_from_slice(&data[..needed])))
        }
        Tag::Simple {
            data_type, count, ..
        } => decode_elements(data, data_type.size_in_bytes(), *count as usize, |e| {
            decode_scalar(*data_type, e, cpu)
        }),
        Tag::FixedString {
            kind,
            max_len,
            count,
            ..
        } if *count <= 1 => Ok(Value::String(decode_string(*kind, *max_len, data)?)),
        Tag::FixedString {
            kind,
            max_len,
            count,
            ..
        } => decode_elements(data, kind.element_size(*max_len), *count as usize, |e| {
            decode_string(*kind, *max_len, e).map(Value::String)
        }),
        Tag::VarString { kind, .. } => {
            let available = (data.len().saturating_sub(kind.header_len()) / kind.char_width())
                .min(u16::MAX as usize) as u16;
            let (max, _) = parse_string_header(*kind, data)?;
            Ok(Value::String(decode_string(*kind, max.min(available), data)?))
        }
        Tag::Chunk(_) | Tag::Szl { .. } => Ok(Value::Bytes(Bytes::copy_from_slice(data))),
        Tag::Clock => {
            // reserved byte, century in BCD, then DATE_AND_TIME
            let raw = fixed::<10>(data)?;
            let century = bcd_to_u8(raw[1])? as u16;
            let mut dt = [0u8; 8];
            dt.copy_from_slice(&raw[2..]);
            Ok(Value::DateTime(decode_date_and_time(&dt, Some(century))?))
        }
    }
}

fn mismatch(tag: &Tag, reason: impl Into<String>) -> Error {
    Error::ValueMismatch {
        tag: tag
            .address()
            .map(ToString::to_string)
            .unwrap_or_else(|| format!("{tag:?}")),
        reason: reason.into(),
    }
}

fn integer<T: TryFrom<i128>>(tag: &Tag, value: &Value, type_name: &str) -> Result<T> {
    value
        .as_integer()
        .and_then(|v| T::try_from(v).ok())
        .ok_or_else(|| mismatch(tag, format!("{value:?} does not fit {type_name}")))
}

fn encode_scalar(
    tag: &Tag,
    data_type: DataType,
    value: &Value,
    cpu: CpuType,
    dst: &mut BytesMut,
) -> Result<()> {
    match data_type {
        DataType::Bool => match value {
            Value::Bool(b) => dst.put_u8(*b as u8),
            other => dst.put_u8(integer::<bool>(tag, other, "BOOL").map(|b| b as u8)?),
        },
        DataType::Byte | DataType::USInt => dst.put_u8(integer(tag, value, "BYTE")?),
        DataType::SInt => dst.put_i8(integer(tag, value, "SINT")?),
        DataType::Word | DataType::UInt => dst.put_u16(integer(tag, value, "WORD")?),
        DataType::Int => dst.put_i16(integer(tag, value, "INT")?),
        DataType::DWord | DataType::UDInt => dst.put_u32(integer(tag, value, "DWORD")?),
        DataType::DInt => dst.put_i32(integer(tag, value, "DINT")?),
        DataType::LWord | DataType::ULInt => dst.put_u64(integer(tag, value, "LWORD")?),
        DataType::LInt => dst.put_i64(integer(tag, value, "LINT")?),
        DataType::Real => dst.put_f32(
            value
                .as_float()
                .ok_or_else(|| mismatch(tag, "REAL expects a number"))? as f32,
        ),
        DataType::LReal => dst.put_f64(
            value
                .as_float()
                .ok_or_else(|| mismatch(tag, "LREAL expects a number"))?,
        ),
        DataType::Char => {
            let c = single_char(tag, value)?;
            dst.put_u8(u8::try_from(c as u32).map_err(|_| mismatch(tag, "CHAR outside Latin-1"))?);
        }
        DataType::WChar => {
            let c = single_char(tag, value)?;
            dst.put_u16(
                u16::try_from(c as u32).map_err(|_| mismatch(tag, "WCHAR outside the BMP"))?,
            );
        }
        DataType::Time => {
            let d = duration(tag, value)?;
            dst.put_i32(
                i32::try_from(d.num_milliseconds()).map_err(|_| mismatch(tag, "TIME overflow"))?,
            );
        }
        DataType::LTime => {
            let d = duration(tag, value)?;
            dst.put_i64(
                d.num_nanoseconds()
                    .ok_or_else(|| mismatch(tag, "LTIME overflow"))?,
            );
        }
        DataType::S5Time | DataType::Timer => {
            let d = duration(tag, value)?;
            dst.put_u16(
                encode_s5time(d).ok_or_else(|| mismatch(tag, "S5TIME out of range 0..=9990s"))?,
            );
        }
        DataType::Date => match value {
            Value::Date(d) => {
                let days = d.signed_duration_since(s7_epoch()).num_days();
                dst.put_u16(
                    u16::try_from(days).map_err(|_| mismatch(tag, "DATE out of range"))?,
                );
            }
            _ => return Err(mismatch(tag, "DATE expects a date")),
        },
        DataType::TimeOfDay => match value {
            Value::TimeOfDay(t) => {
                dst.put_u32(t.num_seconds_from_midnight() * 1000 + t.nanosecond() / 1_000_000)
            }
            _ => return Err(mismatch(tag, "TIME_OF_DAY expects a time")),
        },
        DataType::DateAndTime => match value {
            Value::DateTime(dt) => dst.put_slice(
                &encode_date_and_time(dt)
                    .ok_or_else(|| mismatch(tag, "DATE_AND_TIME covers 1990..=2089"))?,
            ),
            _ => return Err(mismatch(tag, "DATE_AND_TIME expects a date-time")),
        },
        DataType::Dtl => match value {
            Value::DateTime(dt) => dst.put_slice(
                &encode_dtl(dt).ok_or_else(|| mismatch(tag, "DTL year out of range"))?,
            ),
            _ => return Err(mismatch(tag, "DTL expects a date-time")),
        },
        DataType::Counter => {
            let v: u16 = integer(tag, value, "COUNTER")?;
            if cpu.has_binary_counters() {
                dst.put_u16(v);
            } else if v <= 999 {
                dst.put_u16(u16_to_bcd3(v));
            } else {
                return Err(mismatch(tag, "COUNTER exceeds 999"));
            }
        }
    }
    Ok(())
}

fn single_char(tag: &Tag, value: &Value) -> Result<char> {
    match value {
        Value::Char(c) => Ok(*c),
        Value::String(s) if s.chars().count() == 1 => s
            .chars()
            .next()
            .ok_or_else(|| mismatch(tag, "empty string for CHAR")),
        _ => Err(mismatch(tag, "CHAR expects a single character")),
    }
}

fn duration(tag: &Tag, value: &Value) -> Result<Duration> {
    match value {
        Value::Duration(d) => Ok(*d),
        other => other
            .as_integer()
            .and_then(|ms| i64::try_from(ms).ok())
            .map(Duration::milliseconds)
            .ok_or_else(|| mismatch(tag, "duration expects a duration or milliseconds")),
    }
}

fn encode_string(
    tag: &Tag,
    kind: StringKind,
    max_len: u16,
    value: &Value,
    dst: &mut BytesMut,
) -> Result<()> {
    let Value::String(s) = value else {
        return Err(mismatch(tag, "string tag expects a string"));
    };
    match kind {
        StringKind::String => {
            let max = u8::try_from(max_len).map_err(|_| mismatch(tag, "STRING longer than 255"))?;
            let body = s
                .chars()
                .map(|c| u8::try_from(c as u32))
                .collect::<std::result::Result<Vec<u8>, _>>()
                .map_err(|_| mismatch(tag, "STRING outside Latin-1"))?;
            if body.len() > max as usize {
                return Err(mismatch(
                    tag,
                    format!("{} characters exceed capacity {max}", body.len()),
                ));
            }
            dst.put_u8(max);
            dst.put_u8(body.len() as u8);
            dst.put_slice(&body);
            dst.put_bytes(0, max as usize - body.len());
        }
        StringKind::WString => {
            let units: Vec<u16> = s.encode_utf16().collect();
            if units.len() > max_len as usize {
                return Err(mismatch(
                    tag,
                    format!("{} characters exceed capacity {max_len}", units.len()),
                ));
            }
            dst.put_u16(max_len);
            dst.put_u16(units.len() as u16);
            units.iter().for_each(|u| dst.put_u16(*u));
            dst.put_bytes(0, (max_len as usize - units.len()) * 2);
        }
    }
    Ok(())
}

fn expect_list<'a>(tag: &Tag, value: &'a Value, count: u16) -> Result<&'a [Value]> {
    match value {
        Value::List(items) if items.len() == count as usize => Ok(items),
        Value::List(items) => Err(mismatch(
            tag,
            format!("{} values for {count} elements", items.len()),
        )),
        _ => Err(mismatch(tag, format!("{count} elements expect a list"))),
    }
}

/// Encode `value` into the bytes written to `tag`.
pub fn encode(tag: &Tag, value: &Value, cpu: CpuType) -> Result<Bytes> {
    let mut dst = BytesMut::with_capacity(tag.size());
    match tag {
        Tag::Simple {
            data_type, count, ..
        } if *count <= 1 => encode_scalar(tag, *data_type, value, cpu, &mut dst)?,
        Tag::Simple {
            address,
            data_type: DataType::Bool,
            count,
        } => {
            if address.bit_offset != 0 || count % 8 != 0 {
                return Err(Error::UnsupportedFeature {
                    feature: "BOOL array write not covering whole bytes",
                });
            }
            let items = expect_list(tag, value, *count)?;
            for byte in items.chunks(8) {
                let mut b = 0u8;
                for (i, v) in byte.iter().enumerate() {
                    if integer::<u8>(tag, v, "BOOL")? != 0 {
                        b |= 1 << i;
                    }
                }
                dst.put_u8(b);
            }
        }
        Tag::Simple {
            data_type: DataType::Byte,
            count,
            ..
        } if matches!(value, Value::Bytes(_)) => {
            let Value::Bytes(raw) = value else {
                unreachable!()
            };
            if raw.len() != *count as usize {
                return Err(mismatch(tag, format!("{} bytes for {count}", raw.len())));
            }
            return Ok(raw.clone());
        }
        Tag::Simple {
            data_type, count, ..
        } => {
            for v in expect_list(tag, value, *count)? {
                encode_scalar(tag, *data_type, v, cpu, &mut dst)?;
            }
        }
        Tag::FixedString {
            kind,
            max_len,
            count,
            ..
        } if *count <= 1 => encode_string(tag, *kind, *max_len, value, &mut dst)?,
        Tag::FixedString {
            kind,
            max_len,
            count,
            ..
        } => {
            for v in expect_list(tag, value, *count)? {
                encode_string(tag, *kind, *max_len, v, &mut dst)?;
            }
        }
        Tag::Chunk(_) => match value {
            Value::Bytes(raw) => return Ok(raw.clone()),
            _ => return Err(mismatch(tag, "chunk expects raw bytes")),
        },
        Tag::VarString { .. } => {
            return Err(Error::UnsupportedFeature {
                feature: "variable length string must be resolved before encoding",
            })
        }
        Tag::Szl { .. } | Tag::Clock => {
            return Err(Error::UnsupportedFeature {
                feature: "writing system tags",
            })
        }
    }
    Ok(dst.freeze())
}
