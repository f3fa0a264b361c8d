use super::super::{
    error::{Error, Result},
    request::{NamedMap, ReadRequest, ReadResponse, ResponseCode, WriteRequest, WriteResponse},
    tag::{Address, DataType, StringKind, Tag},
    value::{parse_string_header, Value},
};
use async_trait::async_trait;
use std::collections::HashMap;
use tracing::debug;

/// Optimized single-round-trip access to fixed-size tags.
#[async_trait]
pub trait TagAccess: Send + Sync {
    async fn read_tags(&self, request: &ReadRequest) -> Result<ReadResponse>;
    async fn write_tags(&self, request: &WriteRequest) -> Result<WriteResponse>;
}

#[inline]
fn is_var_string(tag: &Tag) -> bool {
    matches!(tag, Tag::VarString { .. })
}

/// Raw header bytes of the first element at `address`.
fn header_tag(address: Address, kind: StringKind) -> Tag {
    Tag::simple(address, DataType::Byte, kind.header_len() as u16)
}

/// Declared capacity and current length from a phase-one result.
fn header_of(name: &str, kind: StringKind, value: &Value) -> Result<(u16, u16)> {
    let Value::Bytes(raw) = value else {
        return Err(Error::ProtocolViolation {
            context: "string header read did not yield raw bytes",
        });
    };
    let (max, actual) = parse_string_header(kind, raw)?;
    debug!(tag = %name, max, actual, "Resolved string header");
    Ok((max, actual.min(max)))
}

/// Read, resolving variable-length strings in a second round trip.
pub async fn read<A: TagAccess + ?Sized>(access: &A, request: &ReadRequest) -> Result<ReadResponse> {
    if !request.values().any(is_var_string) {
        return access.read_tags(request).await;
    }

    let mut phase1 = ReadRequest::with_capacity(request.len());
    for (name, tag) in request.iter() {
        let tag = match tag {
            Tag::VarString { address, kind, .. } => header_tag(*address, *kind),
            other => other.clone(),
        };
        phase1.push_unchecked(name.to_owned(), tag);
    }
    let first = access.read_tags(&phase1).await?;

    let mut phase2 = ReadRequest::new();
    for ((name, tag), (_, item)) in request.iter().zip(first.iter()) {
        let Tag::VarString {
            address,
            kind,
            count,
        } = tag
        else {
            continue;
        };
        if !item.code.is_ok() {
            continue;
        }
        let (max, actual) = header_of(name, *kind, &item.value)?;
        // array elements share the declared stride
        let max_len = if *count <= 1 { actual } else { max };
        phase2.push_unchecked(
            name.to_owned(),
            Tag::FixedString {
                address: *address,
                kind: *kind,
                max_len,
                count: *count,
            },
        );
    }
    let second = if phase2.is_empty() {
        ReadResponse::new()
    } else {
        access.read_tags(&phase2).await?
    };

    let mut response = ReadResponse::with_capacity(request.len());
    for ((name, tag), (_, item)) in request.iter().zip(first) {
        let item = if is_var_string(tag) && item.code.is_ok() {
            resolved(&second, name)?
        } else {
            item
        };
        response.push_unchecked(name.to_owned(), item);
    }
    Ok(response)
}

fn resolved<T: Clone>(map: &NamedMap<T>, name: &str) -> Result<T> {
    map.get(name).cloned().ok_or(Error::ProtocolViolation {
        context: "second string phase lacks a resolved tag",
    })
}

/// Write, sizing variable-length strings by the capacity the device declares.
pub async fn write<A: TagAccess + ?Sized>(
    access: &A,
    request: &WriteRequest,
) -> Result<WriteResponse> {
    if !request.values().any(|(tag, _)| is_var_string(tag)) {
        return access.write_tags(request).await;
    }

    let mut headers = ReadRequest::new();
    for (name, (tag, _)) in request.iter() {
        if let Tag::VarString { address, kind, .. } = tag {
            headers.push_unchecked(name.to_owned(), header_tag(*address, *kind));
        }
    }
    let resolved = access.read_tags(&headers).await?;

    let mut failed: HashMap<&str, ResponseCode> = HashMap::new();
    let mut phase2 = WriteRequest::with_capacity(request.len());
    for (name, (tag, value)) in request.iter() {
        let tag = match tag {
            Tag::VarString {
                address,
                kind,
                count,
            } => {
                let item = resolved.get(name).ok_or(Error::ProtocolViolation {
                    context: "string header read lacks a requested tag",
                })?;
                if !item.code.is_ok() {
                    failed.insert(name, item.code);
                    continue;
                }
                let (max, _) = header_of(name, *kind, &item.value)?;
                Tag::FixedString {
                    address: *address,
                    kind: *kind,
                    max_len: max,
                    count: *count,
                }
            }
            other => other.clone(),
        };
        phase2.push_unchecked(name.to_owned(), (tag, value.clone()));
    }
    let written = if phase2.is_empty() {
        WriteResponse::new()
    } else {
        access.write_tags(&phase2).await?
    };

    let mut response = WriteResponse::with_capacity(request.len());
    for name in request.keys() {
        let code = match failed.get(name) {
            Some(code) => *code,
            None => *written.get(name).ok_or(Error::ProtocolViolation {
                context: "second string phase lacks a written tag",
            })?,
        };
        response.push_unchecked(name.to_owned(), code);
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::super::super::{
        frame::CpuType,
        request::ReadItem,
        value::{decode, encode},
    };
    use super::*;
    use std::sync::Mutex;

    /// One data block served directly by the value codec.
    struct Memory {
        db: Mutex<Vec<u8>>,
        reads: Mutex<Vec<ReadRequest>>,
        writes: Mutex<Vec<WriteRequest>>,
        /// Offsets that answer with ACCESS_DENIED
        denied: Vec<u32>,
    }

    impl Memory {
        fn new(db: Vec<u8>) -> Self {
            Self {
                db: Mutex::new(db),
                reads: Mutex::new(Vec::new()),
                writes: Mutex::new(Vec::new()),
                denied: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl TagAccess for Memory {
        async fn read_tags(&self, request: &ReadRequest) -> Result<ReadResponse> {
            self.reads.lock().unwrap().push(request.clone());
            let db = self.db.lock().unwrap();
            let mut out = ReadResponse::new();
            for (name, tag) in request.iter() {
                let address = tag.address().copied().unwrap();
                let item = if self.denied.contains(&address.byte_offset) {
                    ReadItem::failed(ResponseCode::AccessDenied)
                } else {
                    let start = address.byte_offset as usize;
                    let value = decode(tag, &db[start..start + tag.size()], CpuType::S71500)?;
                    ReadItem {
                        code: ResponseCode::Ok,
                        value,
                    }
                };
                out.insert(name, item)?;
            }
            Ok(out)
        }

        async fn write_tags(&self, request: &WriteRequest) -> Result<WriteResponse> {
            self.writes.lock().unwrap().push(request.clone());
            let mut db = self.db.lock().unwrap();
            let mut out = WriteResponse::new();
            for (name, (tag, value)) in request.iter() {
                let start = tag.address().unwrap().byte_offset as usize;
                let data = encode(tag, value, CpuType::S71500)?;
                db[start..start + data.len()].copy_from_slice(&data);
                out.insert(name, ResponseCode::Ok)?;
            }
            Ok(out)
        }
    }

    fn string_field(offset: usize, db: &mut [u8], max: u8, text: &str) {
        db[offset] = max;
        db[offset + 1] = text.len() as u8;
        db[offset + 2..offset + 2 + text.len()].copy_from_slice(text.as_bytes());
    }

    #[tokio::test]
    async fn short_string_in_wide_field() {
        let mut db = vec![0u8; 300];
        string_field(0, &mut db, 254, "hello");
        db[280] = 0x12;
        db[281] = 0x34;
        let mem = Memory::new(db);

        let request = ReadRequest::new()
            .with("s", Tag::var_string(Address::db(1, 0), StringKind::String))
            .unwrap()
            .with("w", Tag::simple(Address::db(1, 280), DataType::Word, 1))
            .unwrap();
        let response = read(&mem, &request).await.unwrap();

        assert_eq!(response.keys().collect::<Vec<_>>(), ["s", "w"]);
        assert_eq!(response.get("s").unwrap().value, Value::String("hello".into()));
        assert_eq!(response.get("w").unwrap().value, Value::Word(0x1234));

        let reads = mem.reads.lock().unwrap();
        assert_eq!(reads.len(), 2);
        assert_eq!(
            reads[0].get("s"),
            Some(&Tag::simple(Address::db(1, 0), DataType::Byte, 2))
        );
        assert_eq!(reads[1].len(), 1);
        assert!(matches!(
            reads[1].get("s"),
            Some(Tag::FixedString { max_len: 5, kind: StringKind::String, .. })
        ));
        assert_eq!(reads[1].get("s").unwrap().size(), 7);
    }

    #[tokio::test]
    async fn failed_header_keeps_its_status() {
        let mut db = vec![0u8; 64];
        string_field(0, &mut db, 20, "ok");
        let mut mem = Memory::new(db);
        mem.denied.push(32);

        let request = ReadRequest::new()
            .with("denied", Tag::var_string(Address::db(1, 32), StringKind::String))
            .unwrap()
            .with("fine", Tag::var_string(Address::db(1, 0), StringKind::String))
            .unwrap();
        let response = read(&mem, &request).await.unwrap();
        assert_eq!(
            response.get("denied").unwrap(),
            &ReadItem::failed(ResponseCode::AccessDenied)
        );
        assert_eq!(response.get("fine").unwrap().value, Value::String("ok".into()));
        assert_eq!(mem.reads.lock().unwrap()[1].len(), 1);
    }

    #[tokio::test]
    async fn fixed_only_requests_take_one_round_trip() {
        let mem = Memory::new(vec![0u8; 8]);
        let request = ReadRequest::new()
            .with("b", Tag::bool(Address::db(1, 0)))
            .unwrap();
        read(&mem, &request).await.unwrap();
        assert_eq!(mem.reads.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn write_uses_declared_capacity() {
        let mut db = vec![0u8; 40];
        string_field(0, &mut db, 10, "old value!");
        let mem = Memory::new(db);

        let request = WriteRequest::new()
            .with(
                "s",
                (
                    Tag::var_string(Address::db(1, 0), StringKind::String),
                    Value::from("new"),
                ),
            )
            .unwrap()
            .with(
                "i",
                (Tag::simple(Address::db(1, 20), DataType::Int, 1), Value::Int(-2)),
            )
            .unwrap();
        let response = write(&mem, &request).await.unwrap();
        assert!(response.values().all(|c| c.is_ok()));

        let writes = mem.writes.lock().unwrap();
        assert!(matches!(
            writes[0].get("s"),
            Some((Tag::FixedString { max_len: 10, .. }, _))
        ));
        let db = mem.db.lock().unwrap();
        assert_eq!(&db[..5], &[10, 3, b'n', b'e', b'w']);
        assert_eq!(&db[20..22], &[0xFF, 0xFE]);
    }

    #[tokio::test]
    async fn write_reports_failed_header_without_writing() {
        let mut mem = Memory::new(vec![0u8; 16]);
        mem.denied.push(0);
        let request = WriteRequest::new()
            .with(
                "s",
                (
                    Tag::var_string(Address::db(1, 0), StringKind::String),
                    Value::from("x"),
                ),
            )
            .unwrap();
        let response = write(&mem, &request).await.unwrap();
        assert_eq!(response.get("s"), Some(&ResponseCode::AccessDenied));
        assert!(mem.writes.lock().unwrap().is_empty());
    }
}
