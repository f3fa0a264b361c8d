use super::{
    error::{Error, Result},
    frame::{CpuType, S7TransportSize, S7VarSpec, S7_VAR_SPEC_LEN},
    request::{
        RawItem, ReadItem, ReadRequest, ReadResponse, ResponseCode, WriteRequest, WriteResponse,
    },
    tag::{Address, Chunk, DataType, Fragment, Tag},
    value,
};
use bytes::{Bytes, BytesMut};
use std::{
    cmp::{max, min, Reverse},
    collections::{BTreeMap, HashMap, HashSet},
};
use tracing::{debug, warn};

/// Wire cost of one extra address item. Gaps up to this size are cheaper to
/// read through than to address separately.
pub const ADDRESS_OVERHEAD: u32 = 12;

const S7_REQ_HEADER_JOB: usize = 10; // Job header, no error field
const S7_RESP_HEADER_ACK_DATA: usize = 12; // AckData header with error field
const S7_REQ_PARAM_BASE: usize = 2; // function + item_count
const S7_RESP_PARAM_BASE: usize = 2; // function + item_count
const S7_RESP_ITEM_HEADER: usize = 4; // rc + type + length
const MAX_ITEMS_PER_FRAME: usize = u8::MAX as usize;

const CHUNK_PREFIX: &str = "__chunk__";

/// Planner limits derived from the negotiated session parameters.
#[derive(Debug, Clone, Copy)]
pub struct PlannerConfig {
    /// Negotiated S7 PDU length (header + param + payload)
    pub s7_pdu_len: u16,
    /// Place items first-fit-decreasing instead of in request order.
    pub bin_packing: bool,
    /// Upper bound of address items per frame, `None` only applies the PDU cap.
    pub max_items_per_request: Option<usize>,
}

impl PlannerConfig {
    pub fn new(s7_pdu_len: u16) -> Self {
        Self {
            s7_pdu_len,
            bin_packing: false,
            max_items_per_request: None,
        }
    }

    #[inline]
    pub fn with_bin_packing(mut self, enabled: bool) -> Self {
        self.bin_packing = enabled;
        self
    }

    #[inline]
    pub fn with_max_items_per_request(mut self, max_items: Option<usize>) -> Self {
        self.max_items_per_request = max_items;
        self
    }

    /// Largest data block one read item may return: an AckData with a
    /// single item minus its item header.
    #[inline]
    pub fn read_budget(&self) -> usize {
        (self.s7_pdu_len as usize)
            .saturating_sub(S7_RESP_HEADER_ACK_DATA + S7_RESP_PARAM_BASE + S7_RESP_ITEM_HEADER)
    }

    /// Largest data block one write item may carry, leaving room for a pad byte.
    #[inline]
    pub fn write_budget(&self) -> usize {
        (self.s7_pdu_len as usize).saturating_sub(
            S7_REQ_HEADER_JOB + S7_REQ_PARAM_BASE + S7_VAR_SPEC_LEN + S7_RESP_ITEM_HEADER + 1,
        )
    }

    fn max_items(&self) -> usize {
        self.max_items_per_request
            .unwrap_or(MAX_ITEMS_PER_FRAME)
            .clamp(1, MAX_ITEMS_PER_FRAME)
    }
}

fn chunk_name(request: &ReadRequest, next: &mut usize) -> String {
    loop {
        let name = format!("{CHUNK_PREFIX}{next}");
        *next += 1;
        if !request.contains(&name) {
            return name;
        }
    }
}

/// Merge the mergeable tags of each `(area, block)` bucket into chunks.
///
/// Every mergeable tag ends up inside a chunk, a lone tag in a one-member
/// chunk. Other entries keep their name and tag.
pub fn pack(request: &ReadRequest) -> ReadRequest {
    let mut packed = ReadRequest::with_capacity(request.len());
    let mut buckets: BTreeMap<_, Vec<(&str, &Tag, &Address)>> = BTreeMap::new();
    for (name, tag) in request.iter() {
        match tag.address() {
            Some(address) if tag.is_mergeable() => buckets
                .entry(address.area_key())
                .or_default()
                .push((name, tag, address)),
            _ => packed.push_unchecked(name.to_owned(), tag.clone()),
        }
    }

    let mut next = 0usize;
    for ((area, block), mut tags) in buckets {
        tags.sort_by_key(|(_, _, address)| address.position());

        let mut window: Option<(u32, u32, Vec<(String, Tag)>)> = None;
        let mut close = |(start, end, members): (u32, u32, Vec<(String, Tag)>)| {
            let name = chunk_name(request, &mut next);
            let byte_count = end - start;
            debug!(%name, start, byte_count, members = members.len(), "Packed chunk");
            packed.push_unchecked(
                name,
                Tag::Chunk(Chunk {
                    address: Address::new(area, block, start, 0),
                    byte_count,
                    members,
                    fragment: Fragment::whole(byte_count),
                }),
            );
        };
        for (name, tag, address) in tags {
            let start = address.byte_offset;
            let end = start.saturating_add(tag.size() as u32);
            window = match window.take() {
                Some((w_start, w_end, mut members))
                    if start <= w_end.saturating_add(ADDRESS_OVERHEAD) =>
                {
                    members.push((name.to_owned(), tag.clone()));
                    Some((w_start, max(w_end, end), members))
                }
                prev => {
                    if let Some(prev) = prev {
                        close(prev);
                    }
                    Some((start, end, vec![(name.to_owned(), tag.clone())]))
                }
            };
        }
        if let Some(last) = window {
            close(last);
        }
    }
    packed
}

/// Every name `request` already uses, including tags folded into chunks.
fn taken_names(request: &ReadRequest) -> HashSet<String> {
    let mut taken = HashSet::with_capacity(request.len());
    for (name, tag) in request.iter() {
        taken.insert(name.to_owned());
        if let Tag::Chunk(chunk) = tag {
            taken.extend(chunk.members.iter().map(|(n, _)| n.clone()));
        }
    }
    taken
}

/// Base for `count` fragment names `base.i`, none of which is taken.
fn fragment_base(name: &str, count: usize, taken: &HashSet<String>) -> String {
    let free = |base: &str| (0..count).all(|i| !taken.contains(&format!("{base}.{i}")));
    if free(name) {
        return name.to_owned();
    }
    (1..)
        .map(|n| format!("{name}~{n}"))
        .find(|base| free(base))
        .unwrap_or_else(|| name.to_owned())
}

/// Cut entries larger than `budget` bytes into fragments named `base.i`.
///
/// Counter and timer entries are cut at element boundaries and their
/// fragments advance by element. System tags are never split.
pub fn split(packed: ReadRequest, budget: usize) -> Result<ReadRequest> {
    if budget == 0 {
        return Err(Error::InvalidConfiguration("pdu size"));
    }
    let mut taken = taken_names(&packed);
    let mut out = ReadRequest::with_capacity(packed.len());
    for (name, tag) in packed {
        let size = tag.size();
        let chunk = match (tag, size > budget) {
            (Tag::Chunk(chunk), true) => chunk,
            (tag, true) => match tag.address().copied() {
                Some(address) => Chunk {
                    address: Address::new(address.area, address.block, address.byte_offset, 0),
                    byte_count: size as u32,
                    members: vec![(name.clone(), tag)],
                    fragment: Fragment::whole(size as u32),
                },
                None => {
                    out.insert(name, tag)?;
                    continue;
                }
            },
            (tag, false) => {
                out.insert(name, tag)?;
                continue;
            }
        };

        let unit = chunk.address.unit_bytes() as usize;
        let step = budget - budget % unit;
        if step == 0 {
            return Err(Error::InvalidConfiguration("pdu size"));
        }
        let total = chunk.byte_count as usize;
        let count = total.div_ceil(step);
        let count_u16 = u16::try_from(count).map_err(|_| Error::UnsupportedFeature {
            feature: "more than 65535 fragments",
        })?;
        let base = fragment_base(&name, count, &taken);
        debug!(%name, %base, total, count, step, "Splitting entry into fragments");
        for i in 0..count {
            let offset = step * i;
            let mut address = chunk.address;
            address.byte_offset += (offset / unit) as u32;
            let fragment_name = format!("{base}.{i}");
            taken.insert(fragment_name.clone());
            out.insert(
                fragment_name,
                Tag::Chunk(Chunk {
                    address,
                    byte_count: min(step, total - offset) as u32,
                    members: chunk.members.clone(),
                    fragment: Fragment {
                        index: i as u16,
                        count: count_u16,
                        total_size: total as u32,
                    },
                }),
            )?;
        }
    }
    Ok(out)
}

/// One exchange with the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadJob {
    /// ReadVar frame; indices into [`ReadPlan::entries`] in item order
    Var(Vec<usize>),
    /// UserData request for one system tag
    System(usize),
}

/// Running size of a frame under construction.
#[derive(Debug, Clone, Copy)]
struct FrameCap {
    items: usize,
    req_param_len: usize,
    req_payload_len: usize,
    resp_payload_len: usize,
}

impl Default for FrameCap {
    fn default() -> Self {
        Self {
            items: 0,
            req_param_len: S7_REQ_PARAM_BASE,
            req_payload_len: 0,
            resp_payload_len: 0,
        }
    }
}

impl FrameCap {
    /// Account for one more read item if the frame still fits. An empty frame
    /// always takes the item.
    fn try_add_read(&mut self, data_len: usize, full_cap: usize, max_items: usize) -> bool {
        let next_req_param_len = self.req_param_len + S7_VAR_SPEC_LEN;
        let next_resp_payload_len = self.resp_payload_len + compute_add_resp_payload_read(data_len);
        if self.items > 0
            && (self.items >= max_items
                || !fits_read_cap(
                    full_cap,
                    next_req_param_len,
                    S7_RESP_PARAM_BASE,
                    next_resp_payload_len,
                ))
        {
            return false;
        }
        self.items += 1;
        self.req_param_len = next_req_param_len;
        self.resp_payload_len = next_resp_payload_len;
        true
    }

    fn try_add_write(&mut self, data_len: usize, full_cap: usize, max_items: usize) -> bool {
        let next_req_param_len = self.req_param_len + S7_VAR_SPEC_LEN;
        let next_req_payload_len =
            self.req_payload_len + S7_RESP_ITEM_HEADER + data_len + pad_byte(data_len);
        // one return code byte per item
        let next_resp_payload_len = self.resp_payload_len + 1;
        if self.items > 0
            && (self.items >= max_items
                || !fits_write_cap(
                    full_cap,
                    next_req_param_len,
                    next_req_payload_len,
                    S7_RESP_PARAM_BASE,
                    next_resp_payload_len,
                ))
        {
            return false;
        }
        self.items += 1;
        self.req_param_len = next_req_param_len;
        self.req_payload_len = next_req_payload_len;
        self.resp_payload_len = next_resp_payload_len;
        true
    }
}

type AddFn = fn(&mut FrameCap, usize, usize, usize) -> bool;

/// Group `(index, data_len)` items into frames, returning indices per frame.
///
/// Sequential placement keeps request order and only ever appends to the
/// newest frame. Bin packing sorts by size and places first-fit-decreasing.
fn batch(sizes: &[(usize, usize)], config: &PlannerConfig, add: AddFn) -> Vec<Vec<usize>> {
    let full_cap = config.s7_pdu_len as usize;
    let max_items = config.max_items();
    let mut frames: Vec<(FrameCap, Vec<usize>)> = Vec::new();

    let mut order = sizes.to_vec();
    if config.bin_packing {
        order.sort_by_key(|(_, len)| Reverse(*len));
    }

    for (index, len) in order {
        let placed = if config.bin_packing {
            frames
                .iter_mut()
                .find(|(cap, _)| {
                    let mut trial = *cap;
                    add(&mut trial, len, full_cap, max_items)
                })
        } else {
            frames.last_mut().filter(|(cap, _)| {
                let mut trial = *cap;
                add(&mut trial, len, full_cap, max_items)
            })
        };
        match placed {
            Some((cap, items)) => {
                add(cap, len, full_cap, max_items);
                items.push(index);
            }
            None => {
                let mut cap = FrameCap::default();
                add(&mut cap, len, full_cap, max_items);
                frames.push((cap, vec![index]));
            }
        }
    }

    frames.into_iter().map(|(_, items)| items).collect()
}

/// Packed, split and batched read.
#[derive(Debug, Clone)]
pub struct ReadPlan {
    /// Wire entries: chunks, fragments and pass-through tags
    pub entries: ReadRequest,
    pub jobs: Vec<ReadJob>,
    /// Caller tags outside the S7ANY address range, answered `InvalidAddress`
    pub rejected: Vec<String>,
}

impl ReadPlan {
    pub fn new(request: &ReadRequest, config: &PlannerConfig) -> Result<Self> {
        let mut rejected = Vec::new();
        let mut reachable = ReadRequest::with_capacity(request.len());
        for (name, tag) in request.iter() {
            if tag.in_address_range() {
                reachable.push_unchecked(name.to_owned(), tag.clone());
            } else {
                warn!(tag = %name, "Address beyond the S7ANY range");
                rejected.push(name.to_owned());
            }
        }
        let entries = split(pack(&reachable), config.read_budget())?;

        let mut jobs = Vec::new();
        let mut sizes = Vec::with_capacity(entries.len());
        for (index, (_, tag)) in entries.iter().enumerate() {
            match tag.var_spec() {
                Some(spec) => sizes.push((index, spec.data_len())),
                None => jobs.push(ReadJob::System(index)),
            }
        }
        jobs.extend(
            batch(&sizes, config, FrameCap::try_add_read)
                .into_iter()
                .map(ReadJob::Var),
        );
        debug!(
            tags = request.len(),
            entries = entries.len(),
            jobs = jobs.len(),
            "Planned read"
        );
        Ok(Self {
            entries,
            jobs,
            rejected,
        })
    }

    /// Rebuild the caller's response from one raw item per entry.
    ///
    /// Keys and order follow `request`. A tag whose bytes can not be decoded
    /// fails the whole read.
    pub fn merge(
        &self,
        request: &ReadRequest,
        raw: Vec<RawItem>,
        cpu: CpuType,
    ) -> Result<ReadResponse> {
        if raw.len() != self.entries.len() {
            return Err(Error::ItemCountMismatch {
                expected: self.entries.len(),
                actual: raw.len(),
            });
        }

        let mut items: HashMap<String, ReadItem> = HashMap::with_capacity(request.len());
        for (name, tag, raw) in defragment(&self.entries, &raw)? {
            match tag {
                Tag::Chunk(chunk) => unchunk(&chunk, &raw, cpu, &mut items)?,
                tag => {
                    let item = if raw.code.is_ok() {
                        ReadItem {
                            code: ResponseCode::Ok,
                            value: value::decode(&tag, &raw.data, cpu)?,
                        }
                    } else {
                        ReadItem::failed(raw.code)
                    };
                    items.insert(name, item);
                }
            }
        }
        for name in &self.rejected {
            items.insert(name.clone(), ReadItem::failed(ResponseCode::InvalidAddress));
        }

        let mut response = ReadResponse::with_capacity(request.len());
        for name in request.keys() {
            let item = items.remove(name).ok_or(Error::ProtocolViolation {
                context: "merged response lacks a requested tag",
            })?;
            response.push_unchecked(name.to_owned(), item);
        }
        Ok(response)
    }
}

/// Reassemble split entries under their base name. Fragments are copied at
/// their offset from fragment 0; the first failed fragment decides the status.
fn defragment(entries: &ReadRequest, raw: &[RawItem]) -> Result<Vec<(String, Tag, RawItem)>> {
    let entries: Vec<(&str, &Tag)> = entries.iter().collect();

    let mut groups: HashMap<&str, Vec<usize>> = HashMap::new();
    for (index, (name, tag)) in entries.iter().enumerate() {
        if let Tag::Chunk(chunk) = tag {
            if chunk.fragment.is_split() {
                let base = name.rsplit_once('.').map_or(*name, |(base, _)| base);
                groups.entry(base).or_default().push(index);
            }
        }
    }

    let mut out = Vec::with_capacity(entries.len());
    for (index, (name, tag)) in entries.iter().enumerate() {
        let first = match tag {
            Tag::Chunk(chunk) if chunk.fragment.is_split() => chunk,
            _ => {
                out.push(((*name).to_owned(), (*tag).clone(), raw[index].clone()));
                continue;
            }
        };
        if first.fragment.index != 0 {
            continue;
        }

        let base = name.rsplit_once('.').map_or(*name, |(base, _)| base);
        let mut fragments: Vec<(&Chunk, &RawItem)> = groups
            .get(base)
            .into_iter()
            .flatten()
            .filter_map(|&i| match entries[i].1 {
                Tag::Chunk(c) => Some((c, &raw[i])),
                _ => None,
            })
            .collect();
        if fragments.len() != first.fragment.count as usize {
            return Err(Error::ProtocolViolation {
                context: "fragment set is incomplete",
            });
        }
        fragments.sort_by_key(|(c, _)| c.fragment.index);

        let total = first.fragment.total_size as usize;
        let mut buf = BytesMut::zeroed(total);
        let mut code = ResponseCode::Ok;
        for (fragment, item) in fragments {
            if !item.code.is_ok() {
                code = item.code;
                break;
            }
            let offset = ((fragment.address.byte_offset - first.address.byte_offset)
                * first.address.unit_bytes()) as usize;
            let len = min(item.data.len(), total.saturating_sub(offset));
            buf[offset..offset + len].copy_from_slice(&item.data[..len]);
        }

        out.push((
            base.to_owned(),
            Tag::Chunk(Chunk {
                address: first.address,
                byte_count: first.fragment.total_size,
                members: first.members.clone(),
                fragment: Fragment::whole(first.fragment.total_size),
            }),
            RawItem {
                code,
                data: if code.is_ok() { buf.freeze() } else { Bytes::new() },
            },
        ));
    }
    Ok(out)
}

/// Decode every member of a chunk from its slice of the chunk bytes.
fn unchunk(
    chunk: &Chunk,
    raw: &RawItem,
    cpu: CpuType,
    out: &mut HashMap<String, ReadItem>,
) -> Result<()> {
    for (name, member) in &chunk.members {
        let item = if raw.code.is_ok() {
            let data = member_bytes(chunk, member, &raw.data)?;
            ReadItem {
                code: ResponseCode::Ok,
                value: value::decode(member, &data, cpu)?,
            }
        } else {
            ReadItem::failed(raw.code)
        };
        out.insert(name.clone(), item);
    }
    Ok(())
}

fn member_bytes(chunk: &Chunk, member: &Tag, data: &Bytes) -> Result<Bytes> {
    let address = member.address().ok_or(Error::ProtocolViolation {
        context: "chunk member without address",
    })?;
    let start = address
        .byte_offset
        .checked_sub(chunk.address.byte_offset)
        .ok_or(Error::ProtocolViolation {
            context: "chunk member before chunk start",
        })? as usize
        * chunk.address.unit_bytes() as usize;
    let end = start + member.size();
    if data.len() < end {
        return Err(Error::InsufficientData {
            needed: end,
            available: data.len(),
        });
    }
    let slice = data.slice(start..end);
    // a single bit is read as part of its byte
    if let Tag::Simple {
        data_type: DataType::Bool,
        count: 1,
        ..
    } = member
    {
        return Ok(Bytes::from(vec![(slice[0] >> address.bit_offset) & 0x01]));
    }
    Ok(slice)
}

/// Encoded write item addressed at the device.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteItem {
    /// Request name the item reports its status to
    pub name: String,
    pub spec: S7VarSpec,
    pub data: Bytes,
}

/// Encoded, split and batched write.
#[derive(Debug, Clone)]
pub struct WritePlan {
    pub items: Vec<WriteItem>,
    /// Indices into `items` per WriteVar frame
    pub frames: Vec<Vec<usize>>,
    /// Caller tags outside the S7ANY address range, answered `InvalidAddress`
    pub rejected: Vec<String>,
}

impl WritePlan {
    pub fn new(request: &WriteRequest, config: &PlannerConfig, cpu: CpuType) -> Result<Self> {
        let budget = config.write_budget();
        if budget == 0 {
            return Err(Error::InvalidConfiguration("pdu size"));
        }

        let mut items = Vec::with_capacity(request.len());
        let mut rejected = Vec::new();
        for (name, (tag, value)) in request.iter() {
            let spec = tag.var_spec().ok_or(Error::UnsupportedFeature {
                feature: "writing system tags",
            })?;
            let data = value::encode(tag, value, cpu)?;
            if data.len() != spec.data_len() {
                return Err(Error::ValueMismatch {
                    tag: name.to_owned(),
                    reason: format!(
                        "encoded {} bytes for an item of {}",
                        data.len(),
                        spec.data_len()
                    ),
                });
            }

            if !tag.in_address_range() {
                warn!(tag = %name, "Address beyond the S7ANY range");
                rejected.push(name.to_owned());
                continue;
            }

            let element_addressed = tag
                .address()
                .is_some_and(|a| a.area.is_counter_or_timer());
            let byte_addressed = matches!(
                spec.transport_size,
                S7TransportSize::Byte | S7TransportSize::Char
            );
            if data.len() <= budget || !(byte_addressed || element_addressed) {
                items.push(WriteItem {
                    name: name.to_owned(),
                    spec,
                    data,
                });
                continue;
            }

            // counters and timers keep their transport size and move by element
            let unit = if element_addressed {
                spec.transport_size.element_bytes()
            } else {
                1
            };
            let step = budget - budget % unit;
            if step == 0 {
                return Err(Error::InvalidConfiguration("pdu size"));
            }
            debug!(tag = %name, len = data.len(), step, "Splitting write item");
            let mut offset = 0usize;
            while offset < data.len() {
                let len = min(step, data.len() - offset);
                items.push(WriteItem {
                    name: name.to_owned(),
                    spec: S7VarSpec {
                        transport_size: if element_addressed {
                            spec.transport_size
                        } else {
                            S7TransportSize::Byte
                        },
                        count: (len / unit) as u16,
                        byte_address: spec.byte_address + (offset / unit) as u32,
                        ..spec
                    },
                    data: data.slice(offset..offset + len),
                });
                offset += len;
            }
        }

        let sizes: Vec<(usize, usize)> = items
            .iter()
            .enumerate()
            .map(|(i, it)| (i, it.data.len()))
            .collect();
        let frames = batch(&sizes, config, FrameCap::try_add_write);
        debug!(
            tags = request.len(),
            items = items.len(),
            frames = frames.len(),
            "Planned write"
        );
        Ok(Self {
            items,
            frames,
            rejected,
        })
    }

    /// Fold one status per item back to one status per request name; the
    /// first failure of a split item wins.
    pub fn merge(&self, request: &WriteRequest, codes: Vec<ResponseCode>) -> Result<WriteResponse> {
        if codes.len() != self.items.len() {
            return Err(Error::ItemCountMismatch {
                expected: self.items.len(),
                actual: codes.len(),
            });
        }
        let mut status: HashMap<&str, ResponseCode> = HashMap::with_capacity(request.len());
        for (item, code) in self.items.iter().zip(codes) {
            let entry = status.entry(item.name.as_str()).or_insert(ResponseCode::Ok);
            if entry.is_ok() {
                *entry = code;
            }
        }
        for name in &self.rejected {
            status.insert(name.as_str(), ResponseCode::InvalidAddress);
        }

        let mut response = WriteResponse::with_capacity(request.len());
        for name in request.keys() {
            let code = status.get(name).copied().ok_or(Error::ProtocolViolation {
                context: "merged response lacks a requested tag",
            })?;
            response.push_unchecked(name.to_owned(), code);
        }
        Ok(response)
    }
}

#[inline]
fn pad_byte(n: usize) -> usize {
    n & 1
}

/// Response bytes one read item adds: item header, data and fill byte.
#[inline]
fn compute_add_resp_payload_read(frag_data_len: usize) -> usize {
    S7_RESP_ITEM_HEADER + frag_data_len + pad_byte(frag_data_len)
}

/// Evaluate if a read batch fits capacity after adding one item.
///
/// This checks:
/// - Response: 12 + resp_param_len + resp_payload_len <= full_cap
/// - Request: 10 + req_param_len <= full_cap (read has no request payload)
#[inline]
fn fits_read_cap(
    full_cap: usize,
    next_req_param_len: usize,
    next_resp_param_len: usize,
    next_resp_payload_len: usize,
) -> bool {
    (S7_RESP_HEADER_ACK_DATA + next_resp_param_len + next_resp_payload_len <= full_cap)
        && (S7_REQ_HEADER_JOB + next_req_param_len <= full_cap)
}

/// Evaluate if a write batch fits capacity after adding one item.
///
/// This checks:
/// - Request: 10 + req_param_len + req_payload_len <= full_cap
/// - Response: 12 + resp_param_len + resp_payload_len <= full_cap
#[inline]
fn fits_write_cap(
    full_cap: usize,
    next_req_param_len: usize,
    next_req_payload_len: usize,
    next_resp_param_len: usize,
    next_resp_payload_len: usize,
) -> bool {
    (S7_REQ_HEADER_JOB + next_req_param_len + next_req_payload_len <= full_cap)
        && (S7_RESP_HEADER_ACK_DATA + next_resp_param_len + next_resp_payload_len <= full_cap)
}
