use super::{
    error::{Error, Result},
    frame::S7ReturnCode,
    tag::Tag,
    value::Value,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Insertion-ordered map from caller-assigned names to entries.
///
/// Requests are small, a linear scan beats hashing here.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedMap<T> {
    entries: Vec<(String, T)>,
}

impl<T> Default for NamedMap<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T> NamedMap<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Add an entry. Names are unique within one map.
    pub fn insert(&mut self, name: impl Into<String>, value: T) -> Result<()> {
        let name = name.into();
        if self.contains(&name) {
            return Err(Error::DuplicateTagName(name));
        }
        self.entries.push((name, value));
        Ok(())
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, name: impl Into<String>, value: T) -> Result<Self> {
        self.insert(name, value)?;
        Ok(self)
    }

    pub(crate) fn push_unchecked(&mut self, name: String, value: T) {
        self.entries.push((name, value));
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Entry at insertion position `index`.
    pub fn get_index(&self, index: usize) -> Option<(&str, &T)> {
        self.entries.get(index).map(|(n, v)| (n.as_str(), v))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().map(|(_, v)| v)
    }
}

impl<T> IntoIterator for NamedMap<T> {
    type Item = (String, T);
    type IntoIter = std::vec::IntoIter<(String, T)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<T> TryFrom<Vec<(String, T)>> for NamedMap<T> {
    type Error = Error;

    fn try_from(entries: Vec<(String, T)>) -> Result<Self> {
        let mut map = NamedMap::with_capacity(entries.len());
        for (name, value) in entries {
            map.insert(name, value)?;
        }
        Ok(map)
    }
}

/// Per-tag outcome. Never aborts sibling entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseCode {
    Ok,
    AccessDenied,
    InvalidAddress,
    InvalidDataType,
    InternalError,
}

impl ResponseCode {
    #[inline]
    pub fn is_ok(self) -> bool {
        self == ResponseCode::Ok
    }
}

impl From<S7ReturnCode> for ResponseCode {
    fn from(rc: S7ReturnCode) -> Self {
        match rc {
            S7ReturnCode::Success => ResponseCode::Ok,
            S7ReturnCode::AccessDenied => ResponseCode::AccessDenied,
            S7ReturnCode::AddressOutOfRange | S7ReturnCode::ObjectDoesNotExist => {
                ResponseCode::InvalidAddress
            }
            S7ReturnCode::DataTypeNotSupported => ResponseCode::InvalidDataType,
            _ => ResponseCode::InternalError,
        }
    }
}

/// Status and raw bytes of one wire item, before decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct RawItem {
    pub code: ResponseCode,
    pub data: Bytes,
}

impl RawItem {
    pub fn ok(data: Bytes) -> Self {
        Self {
            code: ResponseCode::Ok,
            data,
        }
    }

    pub fn failed(code: ResponseCode) -> Self {
        Self {
            code,
            data: Bytes::new(),
        }
    }
}

/// Decoded result of one read entry. Failed entries carry `Value::Null`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadItem {
    pub code: ResponseCode,
    pub value: Value,
}

impl ReadItem {
    pub fn failed(code: ResponseCode) -> Self {
        Self {
            code,
            value: Value::Null,
        }
    }
}

pub type ReadRequest = NamedMap<Tag>;
pub type WriteRequest = NamedMap<(Tag, Value)>;
pub type ReadResponse = NamedMap<ReadItem>;
pub type WriteResponse = NamedMap<ResponseCode>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::tag::{Address, DataType};

    #[test]
    fn names_are_unique_and_ordered() {
        let mut req = ReadRequest::new();
        req.insert("b", Tag::bool(Address::db(1, 0))).unwrap();
        req.insert("a", Tag::simple(Address::db(1, 2), DataType::Int, 1))
            .unwrap();
        assert!(matches!(
            req.insert("b", Tag::Clock),
            Err(Error::DuplicateTagName(n)) if n == "b"
        ));
        assert_eq!(req.keys().collect::<Vec<_>>(), ["b", "a"]);
        assert_eq!(req.len(), 2);
        assert!(req.get("a").is_some());
    }

    #[test]
    fn return_code_mapping() {
        let cases = [
            (0xFF, ResponseCode::Ok),
            (0x03, ResponseCode::AccessDenied),
            (0x05, ResponseCode::InvalidAddress),
            (0x0A, ResponseCode::InvalidAddress),
            (0x06, ResponseCode::InvalidDataType),
            (0x07, ResponseCode::InternalError),
            (0x01, ResponseCode::InternalError),
        ];
        for (raw, want) in cases {
            assert_eq!(ResponseCode::from(S7ReturnCode::from(raw)), want, "{raw:#x}");
        }
    }
}
