//! `InputStream`/`OutputStream`: the bidirectional compact binary codec
//! (spec.md §4.1). Every container length, string and tagged-member header
//! funnels through here so that the size-validation and tag-ordering
//! invariants (spec.md §8) are enforced in one place rather than at every
//! call site.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::buffer::{LittleEndianReader, LittleEndianWriter};
use crate::encoding::format::{Format, VersionPair, ENCODING_VERSION};
use crate::encoding::slicing::{ClassFactoryRegistry, ClassValue, InstanceArena};
use crate::encoding::varint::{
    read_signed_size, read_size, require, write_signed_size, write_size,
};
use crate::error::{LocalError, MarshalError, MemoryLimitError};

/// Default cap applied when no explicit `message_size_max` is supplied
/// (spec.md §6, `MessageSizeMax` default 1 MiB).
pub const DEFAULT_MESSAGE_SIZE_MAX: usize = 1024 * 1024;

/// Default class-graph nesting limit (spec.md §4.1).
pub const DEFAULT_CLASS_GRAPH_DEPTH_MAX: u32 = 100;

/// Append-only writer over a growable buffer.
pub struct OutputStream {
    buf: BytesMut,
    encoding: VersionPair,
    message_size_max: usize,
    instance_ids: HashMap<usize, i32>,
    next_instance_id: i32,
    last_tag: Option<u32>,
}

impl OutputStream {
    pub fn new(encoding: VersionPair, message_size_max: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            encoding,
            message_size_max,
            instance_ids: HashMap::new(),
            next_instance_id: 1,
            last_tag: None,
        }
    }

    pub fn with_default_encoding() -> Self {
        Self::new(ENCODING_VERSION, DEFAULT_MESSAGE_SIZE_MAX)
    }

    pub fn encoding(&self) -> VersionPair {
        self.encoding
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }

    // --- primitives ---

    pub fn write_bool(&mut self, value: bool) {
        self.buf.put_u8(value as u8);
    }
    pub fn write_u8(&mut self, value: u8) {
        LittleEndianWriter::put_u8(&mut self.buf, value);
    }
    pub fn write_i16(&mut self, value: i16) {
        LittleEndianWriter::put_i16_le(&mut self.buf, value);
    }
    pub fn write_i32(&mut self, value: i32) {
        LittleEndianWriter::put_i32_le(&mut self.buf, value);
    }
    pub fn write_i64(&mut self, value: i64) {
        LittleEndianWriter::put_i64_le(&mut self.buf, value);
    }
    pub fn write_f32(&mut self, value: f32) {
        LittleEndianWriter::put_f32_le(&mut self.buf, value);
    }
    pub fn write_f64(&mut self, value: f64) {
        LittleEndianWriter::put_f64_le(&mut self.buf, value);
    }

    pub fn write_size(&mut self, value: i32) {
        write_size(&mut self.buf, value);
    }

    pub fn write_string(&mut self, value: &str) {
        write_size(&mut self.buf, value.len() as i32);
        self.buf.extend_from_slice(value.as_bytes());
    }

    pub fn write_bytes(&mut self, value: &[u8]) {
        write_size(&mut self.buf, value.len() as i32);
        self.buf.extend_from_slice(value);
    }

    /// Raw bytes with no size prefix, for callers that track the length
    /// out of band (e.g. a pre-encoded encapsulation).
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_enum(&mut self, index: i32) {
        write_size(&mut self.buf, index);
    }

    /// Writes a sequence size followed by letting `write_elem` run once per
    /// element; the caller supplies the element writer since element shape
    /// is generic.
    pub fn write_sequence<T>(&mut self, items: &[T], mut write_elem: impl FnMut(&mut Self, &T)) {
        self.write_size(items.len() as i32);
        for item in items {
            write_elem(self, item);
        }
    }

    pub fn write_dictionary<K, V>(
        &mut self,
        items: &[(K, V)],
        mut write_key: impl FnMut(&mut Self, &K),
        mut write_value: impl FnMut(&mut Self, &V),
    ) {
        self.write_size(items.len() as i32);
        for (k, v) in items {
            write_key(self, k);
            write_value(self, v);
        }
    }

    // --- encapsulation ---

    /// Starts an encapsulation: reserves the 4-byte total-size prefix and
    /// writes the encoding version. Returns a token that must be passed to
    /// [`OutputStream::end_encapsulation`].
    pub fn start_encapsulation(&mut self) -> EncapsulationMark {
        let mark = self.buf.len();
        self.buf.put_i32_le(0); // patched in `end_encapsulation`
        self.buf.put_u8(self.encoding.major);
        self.buf.put_u8(self.encoding.minor);
        EncapsulationMark(mark)
    }

    pub fn end_encapsulation(&mut self, mark: EncapsulationMark) {
        let total = (self.buf.len() - mark.0) as i32;
        self.buf[mark.0..mark.0 + 4].copy_from_slice(&total.to_le_bytes());
    }

    /// Writes an already-materialized encapsulation payload verbatim: a
    /// fresh `total-size | encoding-major | encoding-minor` header around
    /// `payload` (spec.md §4.1 "Encapsulation"). Used by the request/reply
    /// envelope, whose parameter bytes are produced by a generated
    /// operation encoder independently of the enclosing message's own
    /// `OutputStream` and may even carry a different encoding version.
    pub fn write_encapsulation(&mut self, encoding: VersionPair, payload: &[u8]) {
        let total = (payload.len() + 6) as i32;
        self.buf.put_i32_le(total);
        self.buf.put_u8(encoding.major);
        self.buf.put_u8(encoding.minor);
        self.buf.extend_from_slice(payload);
    }

    // --- tagged optionals ---

    /// Writes a tag header; `tag` must be strictly greater than the last
    /// tag written in the current scope (spec.md §4.1, §8). Scopes are
    /// reset with [`OutputStream::reset_tag_scope`] when starting a new
    /// slice or parameter list.
    pub fn write_tag(&mut self, tag: u32, format: Format) -> Result<(), LocalError> {
        if let Some(last) = self.last_tag {
            if tag <= last {
                return Err(MarshalError::TagOutOfOrder {
                    tag,
                    previous: last,
                }
                .into());
            }
        }
        self.last_tag = Some(tag);
        if tag < 30 {
            self.buf.put_u8(((tag as u8) << 3) | format.bits());
        } else {
            self.buf.put_u8((30 << 3) | format.bits());
            write_size(&mut self.buf, tag as i32);
        }
        Ok(())
    }

    pub fn reset_tag_scope(&mut self) {
        self.last_tag = None;
    }

    /// Writes an `FSize`-formatted tagged value: a 4-byte length prefix
    /// around whatever `write_body` emits, so an unaware reader can skip it.
    pub fn write_fsize_scoped(&mut self, write_body: impl FnOnce(&mut Self)) {
        let mark = self.buf.len();
        self.buf.put_i32_le(0);
        write_body(self);
        let total = (self.buf.len() - mark - 4) as i32;
        self.buf[mark..mark + 4].copy_from_slice(&total.to_le_bytes());
    }

    // --- class graph ---

    /// Writes a reference to a class instance (or `None` for a null
    /// reference). First-time references are written inline; repeat
    /// references to the same `Arc` emit the already-assigned id as a
    /// negative size (spec.md §4.1 "Class instance graph").
    pub fn write_class_ref(&mut self, value: Option<&Arc<dyn ClassValue>>) {
        let Some(instance) = value else {
            self.write_size(0);
            return;
        };
        let ptr = Arc::as_ptr(instance) as *const () as usize;
        if let Some(&id) = self.instance_ids.get(&ptr) {
            write_signed_size(&mut self.buf, -id);
            return;
        }
        let id = self.next_instance_id;
        self.next_instance_id += 1;
        self.instance_ids.insert(ptr, id);
        write_signed_size(&mut self.buf, 1);
        instance.encode_slices(self);
    }
}

#[derive(Clone, Copy, Debug)]
pub struct EncapsulationMark(usize);

/// Cursor over an already-received message; tracks the ascending-tag
/// cursor, the class-instance arena used to patch cyclic references, and
/// the configured resource limits (spec.md §4.1 error conditions).
pub struct InputStream {
    buf: Bytes,
    encoding: VersionPair,
    message_size_max: usize,
    class_graph_depth_max: u32,
    class_graph_depth: u32,
    pending_tag: Option<(u32, Format)>,
    arena: InstanceArena,
    class_factories: Arc<ClassFactoryRegistry>,
}

impl InputStream {
    pub fn new(
        data: Bytes,
        encoding: VersionPair,
        message_size_max: usize,
        class_factories: Arc<ClassFactoryRegistry>,
    ) -> Self {
        Self {
            buf: data,
            encoding,
            message_size_max,
            class_graph_depth_max: DEFAULT_CLASS_GRAPH_DEPTH_MAX,
            class_graph_depth: 0,
            pending_tag: None,
            arena: InstanceArena::new(),
            class_factories,
        }
    }

    pub fn with_depth_limit(mut self, limit: u32) -> Self {
        self.class_graph_depth_max = limit;
        self
    }

    pub fn encoding(&self) -> VersionPair {
        self.encoding
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    pub fn message_size_max(&self) -> usize {
        self.message_size_max
    }

    pub fn class_graph_depth_max(&self) -> u32 {
        self.class_graph_depth_max
    }

    pub(crate) fn class_factories(&self) -> &Arc<ClassFactoryRegistry> {
        &self.class_factories
    }

    pub(crate) fn arena_mut(&mut self) -> &mut InstanceArena {
        &mut self.arena
    }

    /// Enters one more level of class-graph nesting, rejecting before any
    /// further recursion (and the allocation that comes with it) once
    /// `class_graph_depth_max` is reached (spec.md §4.1 "Class graph depth
    /// limit", §8: "Reject-with-error, do not truncate"). A back-reference
    /// to an already-decoded instance never calls this — only a freshly
    /// inlined instance counts towards depth, so cycles closed via id are
    /// O(1) rather than re-entering this guard.
    pub(crate) fn enter_class_graph(&mut self) -> Result<(), LocalError> {
        if self.class_graph_depth >= self.class_graph_depth_max {
            return Err(MarshalError::ClassGraphTooDeep {
                limit: self.class_graph_depth_max,
            }
            .into());
        }
        self.class_graph_depth += 1;
        Ok(())
    }

    pub(crate) fn exit_class_graph(&mut self) {
        self.class_graph_depth -= 1;
    }

    /// Guards against allocating more than `messageSizeMax` bytes for a
    /// single claimed length, rejecting hostile peers before any
    /// allocation proportional to the claim happens (spec.md §4.1, §8).
    pub fn check_allocation(&self, requested: usize) -> Result<(), LocalError> {
        if requested > self.message_size_max {
            return Err(MemoryLimitError {
                requested,
                limit: self.message_size_max,
            }
            .into());
        }
        Ok(())
    }

    // --- primitives ---

    pub fn read_bool(&mut self) -> Result<bool, LocalError> {
        require(&self.buf, 1)?;
        Ok(self.buf.get_u8() != 0)
    }
    pub fn read_u8(&mut self) -> Result<u8, LocalError> {
        require(&self.buf, 1)?;
        Ok(LittleEndianReader::get_u8(&mut self.buf))
    }
    pub fn read_i16(&mut self) -> Result<i16, LocalError> {
        require(&self.buf, 2)?;
        Ok(LittleEndianReader::get_i16_le(&mut self.buf))
    }
    pub fn read_i32(&mut self) -> Result<i32, LocalError> {
        require(&self.buf, 4)?;
        Ok(LittleEndianReader::get_i32_le(&mut self.buf))
    }
    pub fn read_i64(&mut self) -> Result<i64, LocalError> {
        require(&self.buf, 8)?;
        Ok(LittleEndianReader::get_i64_le(&mut self.buf))
    }
    pub fn read_f32(&mut self) -> Result<f32, LocalError> {
        require(&self.buf, 4)?;
        Ok(LittleEndianReader::get_f32_le(&mut self.buf))
    }
    pub fn read_f64(&mut self) -> Result<f64, LocalError> {
        require(&self.buf, 8)?;
        Ok(LittleEndianReader::get_f64_le(&mut self.buf))
    }

    pub fn read_size(&mut self) -> Result<i32, LocalError> {
        Ok(read_size(&mut self.buf)?)
    }

    pub fn read_string(&mut self) -> Result<String, LocalError> {
        let len = self.read_size()? as usize;
        self.check_allocation(len)?;
        require(&self.buf, len)?;
        let mut dst = vec![0u8; len];
        self.buf.copy_to_slice(&mut dst);
        String::from_utf8(dst)
            .map_err(|e| LocalError::Marshal(MarshalError::Other(e.to_string())))
    }

    pub fn read_bytes(&mut self) -> Result<Vec<u8>, LocalError> {
        let len = self.read_size()? as usize;
        self.check_allocation(len)?;
        require(&self.buf, len)?;
        let mut dst = vec![0u8; len];
        self.buf.copy_to_slice(&mut dst);
        Ok(dst)
    }

    /// Splits off exactly `len` bytes with no size prefix of its own,
    /// validating against `messageSizeMax` first. Used to lift an
    /// encapsulation's payload out as a zero-copy [`Bytes`] slice rather
    /// than a owned `Vec`, since that payload is typically handed to a
    /// nested `InputStream` rather than consumed byte-by-byte here.
    pub fn read_raw(&mut self, len: usize) -> Result<Bytes, LocalError> {
        self.check_allocation(len)?;
        require(&self.buf, len)?;
        Ok(self.buf.split_to(len))
    }

    pub fn read_enum(&mut self, max: i32) -> Result<i32, LocalError> {
        let value = self.read_size()?;
        if value < 0 || value > max {
            return Err(MarshalError::EnumOutOfRange { value, max }.into());
        }
        Ok(value)
    }

    /// Reads a sequence size, pre-validating `size * min_wire_size` against
    /// the bytes actually remaining before the caller allocates anything
    /// (spec.md §4.1 "Sequence").
    pub fn begin_sequence(&mut self, min_wire_size: usize) -> Result<usize, LocalError> {
        let size = self.read_size()? as usize;
        let claimed = size.saturating_mul(min_wire_size);
        if claimed > self.buf.remaining() {
            return Err(MarshalError::InsufficientBytes {
                needed: claimed,
                available: self.buf.remaining(),
            }
            .into());
        }
        self.check_allocation(claimed)?;
        Ok(size)
    }

    /// Dictionaries use the same size pre-validation as sequences, with the
    /// combined minimum wire size of one key/value pair.
    pub fn begin_dictionary(&mut self, min_pair_wire_size: usize) -> Result<usize, LocalError> {
        self.begin_sequence(min_pair_wire_size)
    }

    // --- encapsulation ---

    pub fn read_encapsulation_header(&mut self) -> Result<EncapsulationHeader, LocalError> {
        require(&self.buf, 6)?;
        let total_size = self.buf.get_i32_le();
        if total_size < 6 {
            return Err(LocalError::Marshal(MarshalError::Other(
                "encapsulation total-size smaller than header".into(),
            )));
        }
        self.check_allocation(total_size as usize)?;
        let major = LittleEndianReader::get_u8(&mut self.buf);
        let minor = LittleEndianReader::get_u8(&mut self.buf);
        Ok(EncapsulationHeader {
            total_size,
            encoding: VersionPair::new(major, minor),
        })
    }

    /// Skips an encapsulation's payload without understanding its
    /// encoding, using only `total_size` (spec.md §4.1: "An encapsulation
    /// is independently skippable").
    pub fn skip_encapsulation_payload(&mut self, header: EncapsulationHeader) -> Result<(), LocalError> {
        let payload_len = header.total_size as usize - 6;
        require(&self.buf, payload_len)?;
        self.buf.advance(payload_len);
        Ok(())
    }

    /// Reads an encapsulation header followed by its full payload, kept
    /// together as an [`Encapsulation`] so a caller (the request/reply
    /// envelope) can both decode the parameters it understands and retain
    /// the untouched bytes for re-marshaling unchanged (e.g. a collocated
    /// forward, or an opaque operation an intermediary doesn't implement).
    pub fn read_encapsulation(&mut self) -> Result<Encapsulation, LocalError> {
        let header = self.read_encapsulation_header()?;
        let payload_len = header.total_size as usize - 6;
        let payload = self.read_raw(payload_len)?;
        Ok(Encapsulation {
            encoding: header.encoding,
            payload,
        })
    }

    // --- tagged optionals ---

    pub fn reset_tag_scope(&mut self) {
        self.pending_tag = None;
    }

    /// Returns `Ok(Some(format))` if `tag` is present next in ascending
    /// order, skipping (and discarding) any lower, unrecognized tags along
    /// the way (spec.md §4.1, §8: readers skipping unknown tags consume
    /// exactly `sizeForFormat(fmt)` bytes).
    pub fn read_optional(&mut self, tag: u32) -> Result<Option<Format>, LocalError> {
        loop {
            let (peek_tag, peek_format) = match self.pending_tag {
                Some(pair) => pair,
                None => {
                    if self.buf.remaining() == 0 {
                        return Ok(None);
                    }
                    let header = self.read_tag_header_raw()?;
                    match header {
                        None => return Ok(None),
                        Some(pair) => pair,
                    }
                }
            };
            if peek_tag < tag {
                self.pending_tag = None;
                self.skip_tagged_value(peek_format)?;
                continue;
            }
            if peek_tag == tag {
                self.pending_tag = None;
                return Ok(Some(peek_format));
            }
            self.pending_tag = Some((peek_tag, peek_format));
            return Ok(None);
        }
    }

    fn read_tag_header_raw(&mut self) -> Result<Option<(u32, Format)>, LocalError> {
        require(&self.buf, 1)?;
        let byte = LittleEndianReader::get_u8(&mut self.buf);
        let format = Format::from_bits(byte & 0x7)
            .ok_or_else(|| LocalError::Marshal(MarshalError::Other("invalid tag format".into())))?;
        let raw_tag = byte >> 3;
        let tag = if raw_tag == 30 {
            self.read_size()? as u32
        } else {
            raw_tag as u32
        };
        Ok(Some((tag, format)))
    }

    /// Skips one tagged value's payload using only its format, without
    /// understanding the value's type (spec.md §4.1, §8).
    pub fn skip_tagged_value(&mut self, format: Format) -> Result<(), LocalError> {
        match format.fixed_width() {
            Some(width) => {
                require(&self.buf, width)?;
                self.buf.advance(width);
            }
            None => match format {
                Format::Size => {
                    self.read_size()?;
                }
                Format::VSize => {
                    let len = self.read_size()? as usize;
                    self.check_allocation(len)?;
                    require(&self.buf, len)?;
                    self.buf.advance(len);
                }
                Format::FSize => {
                    require(&self.buf, 4)?;
                    let len = self.buf.get_i32_le() as usize;
                    self.check_allocation(len)?;
                    require(&self.buf, len)?;
                    self.buf.advance(len);
                }
                Format::Class => {
                    self.skip_class_ref()?;
                }
                _ => unreachable!("fixed-width formats handled above"),
            },
        }
        Ok(())
    }

    fn skip_class_ref(&mut self) -> Result<(), LocalError> {
        self.read_class_ref()?;
        Ok(())
    }

    /// Reads an `FSize`-framed region (a 4-byte declared length, matching
    /// [`OutputStream::write_fsize_scoped`]) and decodes its contents via
    /// `read_body`, run against `self` directly rather than a detached
    /// sub-buffer — so anything `read_body` decodes (including a nested
    /// class reference) shares this stream's arena and depth bookkeeping
    /// (spec.md §4.1 per-slice `has-slice-size`, §9 "arena ... dropped
    /// after decode"). Used for a slice body whose type is known: the
    /// length prefix still lets an unaware reader skip the same bytes via
    /// [`InputStream::read_fsize_region`], but a reader that understands
    /// the type never has to re-parse them out of a separate buffer.
    /// Errors with [`MarshalError::SliceSizeMismatch`] if `read_body`
    /// consumes a different number of bytes than was declared.
    pub fn read_fsize_scoped<T>(
        &mut self,
        read_body: impl FnOnce(&mut Self) -> Result<T, LocalError>,
    ) -> Result<T, LocalError> {
        require(&self.buf, 4)?;
        let declared = self.buf.get_i32_le();
        if declared < 0 {
            return Err(MarshalError::NegativeSize.into());
        }
        self.check_allocation(declared as usize)?;
        require(&self.buf, declared as usize)?;
        let before = self.buf.remaining();
        let value = read_body(self)?;
        let consumed = (before - self.buf.remaining()) as i32;
        if consumed != declared {
            return Err(MarshalError::SliceSizeMismatch {
                declared,
                consumed,
            }
            .into());
        }
        Ok(value)
    }

    /// Reads an `FSize`-framed region's raw bytes without interpreting
    /// them, for a caller with no factory for the enclosing type: it can
    /// still skip past (or, to support re-marshaling unchanged, capture
    /// verbatim) exactly the declared span (spec.md §4.1 "An encapsulation
    /// is independently skippable", the same principle applied here to a
    /// slice body).
    pub fn read_fsize_region(&mut self) -> Result<Bytes, LocalError> {
        require(&self.buf, 4)?;
        let declared = self.buf.get_i32_le();
        if declared < 0 {
            return Err(MarshalError::NegativeSize.into());
        }
        self.check_allocation(declared as usize)?;
        require(&self.buf, declared as usize)?;
        Ok(self.buf.split_to(declared as usize))
    }

    /// Reads a class-instance reference: `None` for null, a resolved
    /// handle for a back-reference to an already-decoded instance, or a
    /// freshly-decoded instance (spec.md §4.1 "Class instance graph",
    /// §9 arena design note).
    pub fn read_class_ref(&mut self) -> Result<Option<Arc<dyn ClassValue>>, LocalError> {
        let marker = read_signed_size(&mut self.buf)?;
        if marker == 0 {
            return Ok(None);
        }
        if marker < 0 {
            let id = -marker;
            return self
                .arena
                .get(id)
                .ok_or(LocalError::Marshal(MarshalError::UnresolvedInstanceId(id)))
                .map(Some);
        }
        crate::encoding::slicing::decode_instance(self)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct EncapsulationHeader {
    pub total_size: i32,
    pub encoding: VersionPair,
}

/// A decoded encapsulation held as encoding version plus raw payload
/// (spec.md §4.1 "Encapsulation"). Kept distinct from a bare `Bytes` so
/// call sites such as the request/reply envelope don't have to carry the
/// encoding version alongside it by hand, and can open a nested
/// [`InputStream`] over the payload on demand via [`Encapsulation::reader`].
#[derive(Clone, Debug, Default)]
pub struct Encapsulation {
    pub encoding: VersionPair,
    pub payload: Bytes,
}

impl Encapsulation {
    pub fn empty(encoding: VersionPair) -> Self {
        Self {
            encoding,
            payload: Bytes::new(),
        }
    }

    /// Opens a fresh `InputStream` over this encapsulation's payload, for
    /// decoding the operation parameters (or exception slices) it
    /// contains.
    pub fn reader(&self, message_size_max: usize, class_factories: Arc<ClassFactoryRegistry>) -> InputStream {
        InputStream::new(self.payload.clone(), self.encoding, message_size_max, class_factories)
    }

    pub fn encode(&self, os: &mut OutputStream) {
        os.write_encapsulation(self.encoding, &self.payload);
    }
}
