//! # Track Stream Format
//!
//! ```text
//! [4 bytes: magic "MTRK"]
//! [2 bytes: format version]
//! [2 bytes: flags, reserved]
//!
//! Record format:
//! [1 byte:  tag (event kind)]
//! [2 bytes: body length]
//! [N bytes: body]
//! [4 bytes: CRC32 of tag, length and body]
//! ```
//!
//! Declaration body: group `u32`, parent `u32` (`u32::MAX` for none),
//! timestamp `u64`, sequence `u64`, then the UTF-8 path. Operation and
//! marker bodies are one fixed [`EventBody`]. All integers little-endian.
//!
//! Readers skip records whose tag they do not know, provided the checksum
//! holds, so newer writers can add record kinds without a version bump.

use std::collections::HashSet;
use std::io::{ErrorKind, Read, Write};
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use memtrail_profile::{Event, EventKind, EventPayload, GroupDeclaration, GroupId, Profiler};

use crate::error::{TrackError, TrackResult};

/// Magic bytes identifying a track stream.
pub const TRACK_MAGIC: &[u8; 4] = b"MTRK";

/// Current track format version.
pub const TRACK_VERSION: u16 = 1;

/// Header size in bytes.
pub const HEADER_LEN: usize = 8;

/// Tag, length and checksum bytes around every record body.
pub const RECORD_OVERHEAD: usize = 1 + 2 + 4;

/// Fixed part of a declaration body.
const DECLARE_FIXED_LEN: usize = 4 + 4 + 8 + 8;

/// Encoded "no parent".
const NO_PARENT: u32 = u32::MAX;

/// Fixed body of operation and marker records.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct EventBody {
    /// Group id, little-endian.
    pub group: u32,
    /// Always zero.
    pub reserved: u32,
    /// Byte count or marker value, little-endian.
    pub amount: u64,
    /// Event timestamp, little-endian.
    pub timestamp: u64,
    /// Event sequence, little-endian.
    pub sequence: u64,
}

impl EventBody {
    /// Encoded size in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    fn encode(event: &Event, amount: u64) -> Self {
        Self {
            group: event.group.raw().to_le(),
            reserved: 0,
            amount: amount.to_le(),
            timestamp: event.timestamp.to_le(),
            sequence: event.sequence.to_le(),
        }
    }

    fn decode(bytes: &[u8]) -> Option<Self> {
        let raw: Self = bytemuck::try_pod_read_unaligned(bytes).ok()?;
        Some(Self {
            group: u32::from_le(raw.group),
            reserved: u32::from_le(raw.reserved),
            amount: u64::from_le(raw.amount),
            timestamp: u64::from_le(raw.timestamp),
            sequence: u64::from_le(raw.sequence),
        })
    }
}

/// Source of group declarations for groups an event stream has not
/// declared yet.
pub trait GroupDirectory {
    /// Returns the declaration of `id`, if known.
    fn declaration(&self, id: GroupId) -> Option<GroupDeclaration>;
}

impl GroupDirectory for Profiler {
    fn declaration(&self, id: GroupId) -> Option<GroupDeclaration> {
        Profiler::declaration(self, id)
    }
}

/// Incremental track encoder.
///
/// The root group is implicit in every track and is never written.
pub struct TrackWriter<W: Write> {
    inner: W,
    declared: HashSet<GroupId>,
    records: u64,
    bytes: u64,
    scratch: Vec<u8>,
}

impl<W: Write> TrackWriter<W> {
    /// Writes the stream header.
    ///
    /// # Errors
    ///
    /// Returns [`TrackError::Io`] if the header cannot be written.
    pub fn new(mut inner: W) -> TrackResult<Self> {
        let mut header = [0u8; HEADER_LEN];
        header[0..4].copy_from_slice(TRACK_MAGIC);
        header[4..6].copy_from_slice(&TRACK_VERSION.to_le_bytes());
        inner.write_all(&header)?;
        Ok(Self {
            inner,
            declared: HashSet::from([GroupId::ROOT]),
            records: 0,
            bytes: HEADER_LEN as u64,
            scratch: Vec::with_capacity(64),
        })
    }

    /// Encodes one event.
    ///
    /// If the event refers to a group this writer has not declared yet, the
    /// group and any undeclared ancestors are looked up in `directory` and
    /// declared first. A declaration event for an already declared group
    /// writes nothing.
    ///
    /// # Errors
    ///
    /// - [`TrackError::UnknownGroup`] if `directory` does not know a group.
    /// - [`TrackError::MalformedRecord`] if a path is too long to encode.
    /// - [`TrackError::Io`] on write failure.
    pub fn serialize_event<D>(&mut self, event: &Event, directory: &D) -> TrackResult<()>
    where
        D: GroupDirectory + ?Sized,
    {
        match &event.payload {
            EventPayload::Declared { parent, path } => {
                if self.declared.contains(&event.group) {
                    return Ok(());
                }
                if let Some(parent) = parent {
                    self.ensure_declared(*parent, event, directory)?;
                }
                self.write_declaration(event.group, *parent, path, event.timestamp, event.sequence)
            }
            EventPayload::Allocate(amount)
            | EventPayload::Acquire(amount)
            | EventPayload::Release(amount)
            | EventPayload::Free(amount)
            | EventPayload::Marker(amount) => {
                self.ensure_declared(event.group, event, directory)?;
                let body = EventBody::encode(event, *amount);
                self.write_record(event.kind() as u8, bytemuck::bytes_of(&body))
            }
        }
    }

    /// Declares `id` and its undeclared ancestors, outermost first.
    ///
    /// Synthesized declarations take their timestamp and sequence from the
    /// event that needed them.
    fn ensure_declared<D>(&mut self, id: GroupId, cause: &Event, directory: &D) -> TrackResult<()>
    where
        D: GroupDirectory + ?Sized,
    {
        let mut chain = Vec::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            if self.declared.contains(&current) {
                break;
            }
            let declaration = directory
                .declaration(current)
                .ok_or(TrackError::UnknownGroup(current))?;
            cursor = declaration.parent;
            chain.push(declaration);
        }
        for declaration in chain.into_iter().rev() {
            tracing::trace!(group = %declaration.id, path = %declaration.path, "synthesized declaration");
            self.write_declaration(
                declaration.id,
                declaration.parent,
                &declaration.path,
                cause.timestamp,
                cause.sequence,
            )?;
        }
        Ok(())
    }

    fn write_declaration(
        &mut self,
        id: GroupId,
        parent: Option<GroupId>,
        path: &str,
        timestamp: u64,
        sequence: u64,
    ) -> TrackResult<()> {
        let mut body = Vec::with_capacity(DECLARE_FIXED_LEN + path.len());
        body.extend_from_slice(&id.raw().to_le_bytes());
        body.extend_from_slice(&parent.map_or(NO_PARENT, GroupId::raw).to_le_bytes());
        body.extend_from_slice(&timestamp.to_le_bytes());
        body.extend_from_slice(&sequence.to_le_bytes());
        body.extend_from_slice(path.as_bytes());
        self.write_record(EventKind::Declared as u8, &body)?;
        self.declared.insert(id);
        Ok(())
    }

    fn write_record(&mut self, tag: u8, body: &[u8]) -> TrackResult<()> {
        let len = u16::try_from(body.len()).map_err(|_| TrackError::MalformedRecord {
            offset: self.bytes,
            reason: format!("record body of {} bytes exceeds {}", body.len(), u16::MAX),
        })?;
        self.scratch.clear();
        self.scratch.push(tag);
        self.scratch.extend_from_slice(&len.to_le_bytes());
        self.scratch.extend_from_slice(body);
        let crc = crc32fast::hash(&self.scratch);
        self.scratch.extend_from_slice(&crc.to_le_bytes());

        self.inner.write_all(&self.scratch)?;
        self.records += 1;
        self.bytes += self.scratch.len() as u64;
        Ok(())
    }

    /// Records written so far, synthesized declarations included.
    #[must_use]
    pub const fn records_written(&self) -> u64 {
        self.records
    }

    /// Bytes written so far, header included.
    #[must_use]
    pub const fn bytes_written(&self) -> u64 {
        self.bytes
    }

    /// Flushes the underlying writer.
    ///
    /// # Errors
    ///
    /// Returns [`TrackError::Io`] on failure.
    pub fn flush(&mut self) -> TrackResult<()> {
        self.inner.flush()?;
        Ok(())
    }

    /// Flushes and returns the underlying writer.
    ///
    /// # Errors
    ///
    /// Returns [`TrackError::Io`] if the final flush fails.
    pub fn into_inner(mut self) -> TrackResult<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}

/// One decoded record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Record {
    /// A known event.
    Event(Event),
    /// A record with a tag this reader does not understand.
    Unknown {
        /// The tag.
        tag: u8,
        /// Offset of the record.
        offset: u64,
    },
}

/// Incremental track decoder. Reads exactly one record per call.
pub struct TrackReader<R: Read> {
    inner: R,
    offset: u64,
    version: u16,
    flags: u16,
}

impl<R: Read> TrackReader<R> {
    /// Reads and checks the stream header.
    ///
    /// # Errors
    ///
    /// - [`TrackError::UnexpectedEof`] if the header is incomplete.
    /// - [`TrackError::BadMagic`] if this is not a track stream.
    /// - [`TrackError::UnsupportedVersion`] for a newer format version.
    pub fn new(mut inner: R) -> TrackResult<Self> {
        let mut header = [0u8; HEADER_LEN];
        if read_full(&mut inner, &mut header)? < HEADER_LEN {
            return Err(TrackError::UnexpectedEof { offset: 0 });
        }
        let magic = [header[0], header[1], header[2], header[3]];
        if &magic != TRACK_MAGIC {
            return Err(TrackError::BadMagic(magic));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version > TRACK_VERSION {
            return Err(TrackError::UnsupportedVersion {
                found: version,
                supported: TRACK_VERSION,
            });
        }
        Ok(Self {
            inner,
            offset: HEADER_LEN as u64,
            version,
            flags: u16::from_le_bytes([header[6], header[7]]),
        })
    }

    /// Format version found in the header.
    #[must_use]
    pub const fn version(&self) -> u16 {
        self.version
    }

    /// Header flags.
    #[must_use]
    pub const fn flags(&self) -> u16 {
        self.flags
    }

    /// Bytes consumed so far, header included.
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// Reads the next record. `Ok(None)` at a clean end of stream.
    ///
    /// # Errors
    ///
    /// - [`TrackError::UnexpectedEof`] if the stream stops mid-record.
    /// - [`TrackError::ChecksumMismatch`] if the record is damaged.
    /// - [`TrackError::MalformedRecord`] if an intact record cannot be decoded.
    pub fn next_record(&mut self) -> TrackResult<Option<Record>> {
        let start = self.offset;
        let mut prefix = [0u8; 3];
        match read_full(&mut self.inner, &mut prefix)? {
            0 => return Ok(None),
            3 => {}
            _ => return Err(TrackError::UnexpectedEof { offset: start }),
        }
        let tag = prefix[0];
        let len = usize::from(u16::from_le_bytes([prefix[1], prefix[2]]));

        let mut rest = vec![0u8; len + 4];
        if read_full(&mut self.inner, &mut rest)? < rest.len() {
            return Err(TrackError::UnexpectedEof { offset: start });
        }
        let (body, crc) = rest.split_at(len);
        let stored = u32::from_le_bytes([crc[0], crc[1], crc[2], crc[3]]);
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&prefix);
        hasher.update(body);
        let computed = hasher.finalize();
        if stored != computed {
            return Err(TrackError::ChecksumMismatch {
                offset: start,
                stored,
                computed,
            });
        }
        self.offset += (prefix.len() + rest.len()) as u64;

        let malformed = |reason: String| TrackError::MalformedRecord { offset: start, reason };
        let Some(kind) = EventKind::from_u8(tag) else {
            return Ok(Some(Record::Unknown { tag, offset: start }));
        };
        let event = if kind == EventKind::Declared {
            decode_declaration(body).map_err(malformed)?
        } else {
            let Some(fixed) = (body.len() == EventBody::SIZE)
                .then(|| EventBody::decode(body))
                .flatten()
            else {
                return Err(malformed(format!(
                    "{kind:?} body is {} bytes, expected {}",
                    body.len(),
                    EventBody::SIZE
                )));
            };
            let payload = match kind {
                EventKind::Marker => EventPayload::Marker(fixed.amount),
                other => EventPayload::operation(other, fixed.amount)
                    .ok_or_else(|| malformed(format!("{other:?} is not an operation")))?,
            };
            Event {
                sequence: fixed.sequence,
                timestamp: fixed.timestamp,
                group: GroupId::from_raw(fixed.group),
                payload,
            }
        };
        Ok(Some(Record::Event(event)))
    }
}

fn decode_declaration(body: &[u8]) -> Result<Event, String> {
    if body.len() < DECLARE_FIXED_LEN {
        return Err(format!(
            "declaration body is {} bytes, expected at least {DECLARE_FIXED_LEN}",
            body.len()
        ));
    }
    let (fixed, path) = body.split_at(DECLARE_FIXED_LEN);
    let u32_at = |at: usize| u32::from_le_bytes([fixed[at], fixed[at + 1], fixed[at + 2], fixed[at + 3]]);
    let u64_at = |at: usize| {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&fixed[at..at + 8]);
        u64::from_le_bytes(bytes)
    };
    let group = GroupId::from_raw(u32_at(0));
    let parent = match u32_at(4) {
        NO_PARENT => None,
        raw => Some(GroupId::from_raw(raw)),
    };
    let path = std::str::from_utf8(path).map_err(|error| format!("group path is not UTF-8: {error}"))?;
    Ok(Event {
        sequence: u64_at(16),
        timestamp: u64_at(8),
        group,
        payload: EventPayload::Declared {
            parent,
            path: Arc::from(path),
        },
    })
}

/// Fills `buf` as far as the stream allows. Returns the bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> TrackResult<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(error) if error.kind() == ErrorKind::Interrupted => {}
            Err(error) => return Err(TrackError::Io(error)),
        }
    }
    Ok(filled)
}
