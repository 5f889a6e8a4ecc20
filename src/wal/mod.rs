//! Generic write-ahead log.
//!
//! [`Wal<T>`] is the durability primitive shared by the memtable (logging
//! puts/deletes/range-deletes before they land in the in-memory map) and the
//! manifest (logging catalog mutations before they're applied to the
//! in-memory file list). Both callers get the same guarantee: once
//! `append()` returns, the record has been fsynced and will be recovered on
//! the next `replay_iter()` even across a process crash.
//!
//! # On-disk layout
//!
//! ```text
//! [header bytes][header crc32]
//! [len][record bytes][crc32]
//! [len][record bytes][crc32]
//! ...
//! ```
//!
//! The header identifies the segment (magic, format version, the segment's
//! own sequence number parsed from its filename) and caps how large a
//! single record may be. Every record is length-prefixed and checksummed
//! independently, so replay can stop cleanly at the first corrupt or
//! truncated entry instead of losing the whole segment.
//!
//! # Concurrency
//!
//! The file handle lives behind `Arc<Mutex<File>>` so a [`Wal`] can be
//! shared between the thread appending new records and any number of
//! [`WalIter`] replay iterators — each iterator tracks its own read cursor
//! and seeks to it before every read, so interleaved appends never corrupt
//! a concurrent replay.
//!
//! # Guarantees
//!
//! - Every `append()` calls `fsync` before returning.
//! - Header and record checksums are both verified on replay.
//! - A truncated trailing record stops replay without an error; any other
//!   corruption surfaces as [`WalError::ChecksumMismatch`].
//! - Generic over any record type implementing [`WalData`], so the same
//!   segment format backs both memtable and manifest logs.

#[cfg(test)]
mod tests;

use std::{
    ffi::OsStr,
    fs::{File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use crc32fast::Hasher as Crc32;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use crate::encoding::{self, EncodingError};

const LEN_PREFIX_SIZE: usize = std::mem::size_of::<u32>();

/// Errors returned by WAL operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WalError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding / decoding error.
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Data integrity failure — checksum did not match.
    #[error("Checksum mismatch")]
    ChecksumMismatch,

    /// Record exceeds the configured maximum size.
    #[error("Record size exceeds limit ({0} bytes)")]
    RecordTooLarge(usize),

    /// Unexpected end-of-file during read.
    #[error("Unexpected end of file")]
    UnexpectedEof,

    /// WAL header failed integrity validation.
    #[error("Internal header: {0}")]
    InvalidHeader(String),

    /// Internal consistency or locking error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Fixed-size metadata block written at the start of every segment.
///
/// Followed on disk by a trailing CRC32 over the encoded header bytes.
#[derive(Debug)]
pub struct WalHeader {
    magic: [u8; 4],
    version: u32,
    max_record_size: u32,
    wal_seq: u64,
}

impl WalHeader {
    /// 4-byte magic identifying a WAL segment file.
    pub const MAGIC: [u8; 4] = *b"AWAL";

    /// Current on-disk format version.
    pub const VERSION: u32 = 1;

    /// Default record-size ceiling (1 MiB) when the caller doesn't specify one.
    pub const DEFAULT_MAX_RECORD_SIZE: u32 = 1024 * 1024;

    /// Encoded size in bytes, excluding the trailing CRC32:
    /// `magic(4) + version(4) + max_record_size(4) + wal_seq(8)`.
    pub const ENCODED_SIZE: usize = 4 + 4 + 4 + 8;

    /// Total on-disk size including the trailing CRC32.
    pub const HEADER_DISK_SIZE: usize = Self::ENCODED_SIZE + LEN_PREFIX_SIZE;

    pub fn new(max_record_size: u32, wal_seq: u64) -> Self {
        Self {
            magic: Self::MAGIC,
            version: Self::VERSION,
            max_record_size,
            wal_seq,
        }
    }

    /// Segment sequence number, parsed from the file's name at open time.
    pub fn wal_seq(&self) -> u64 {
        self.wal_seq
    }

    /// Configured maximum size, in bytes, of any single record.
    pub fn max_record_size(&self) -> u32 {
        self.max_record_size
    }

    /// On-disk format version this header was written with.
    pub fn version(&self) -> u32 {
        self.version
    }
}

impl encoding::Encode for WalHeader {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        encoding::Encode::encode_to(&self.magic, buf)?;
        encoding::Encode::encode_to(&self.version, buf)?;
        encoding::Encode::encode_to(&self.max_record_size, buf)?;
        encoding::Encode::encode_to(&self.wal_seq, buf)?;
        Ok(())
    }
}

impl encoding::Decode for WalHeader {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (magic, n) = <[u8; 4]>::decode_from(&buf[offset..])?;
        offset += n;
        let (version, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        let (max_record_size, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        let (wal_seq, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        Ok((
            Self {
                magic,
                version,
                max_record_size,
                wal_seq,
            },
            offset,
        ))
    }
}

/// Marker trait for record types a [`Wal`] can store.
///
/// Blanket-implemented for anything already satisfying the bound — callers
/// never implement it directly.
pub trait WalData: encoding::Encode + encoding::Decode + std::fmt::Debug + Send + Sync {}
impl<T> WalData for T where T: encoding::Encode + encoding::Decode + std::fmt::Debug + Send + Sync {}

/// A single append-only, checksummed log segment holding records of type `T`.
///
/// See the [module-level documentation](self) for the on-disk layout and
/// concurrency model.
#[derive(Debug)]
pub struct Wal<T: WalData> {
    handle: Arc<Mutex<File>>,
    path: PathBuf,
    header: WalHeader,
    _marker: std::marker::PhantomData<T>,
}

impl<T: WalData> Wal<T> {
    /// Opens an existing segment or creates a new one at `path`.
    ///
    /// The segment's sequence number is parsed from the filename
    /// (`wal-<seq>.log`); a fresh file gets a new header written and
    /// synced immediately, an existing one has its header validated
    /// (magic, version, checksum, and sequence-number agreement with the
    /// filename).
    pub fn open<P: AsRef<Path>>(path: P, max_record_size: Option<u32>) -> Result<Self, WalError> {
        let path_ref = path.as_ref();
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path_ref)?;

        let wal_seq = Self::seq_from_filename(path_ref)
            .ok_or(WalError::Internal("WAL name incorrect".into()))?;

        let header = if file.metadata()?.len() == 0 {
            let header = WalHeader::new(
                max_record_size.unwrap_or(WalHeader::DEFAULT_MAX_RECORD_SIZE),
                wal_seq,
            );

            emit_header(&mut file, &header)?;
            file.sync_all()?;

            info!(path = %path_ref.display(), seq = wal_seq, "WAL segment created");

            header
        } else {
            file.seek(SeekFrom::Start(0))?;

            let header = read_header(&mut file)?;

            if header.wal_seq != wal_seq {
                return Err(WalError::InvalidHeader("sequence number mismatch".into()));
            }

            debug!(
                path = %path_ref.display(),
                max_record_size = header.max_record_size,
                seq = header.wal_seq,
                "WAL header validated"
            );

            header
        };

        info!(path = %path_ref.display(), seq = header.wal_seq, "WAL opened");

        Ok(Self {
            handle: Arc::new(Mutex::new(file)),
            path: path_ref.to_path_buf(),
            header,
            _marker: std::marker::PhantomData,
        })
    }

    /// Extracts the sequence number from a `wal-<seq>.log` filename.
    fn seq_from_filename(path: &Path) -> Option<u64> {
        path.file_name()
            .and_then(OsStr::to_str)?
            .strip_prefix("wal-")
            .and_then(|s| s.strip_suffix(".log"))
            .and_then(|s| s.parse::<u64>().ok())
    }

    /// Appends one record, fsyncing before returning.
    ///
    /// On-disk shape: `[u32 len LE][encoded record][u32 crc32 LE]`, with the
    /// CRC computed over `len || encoded record`.
    pub fn append(&self, record: &T) -> Result<(), WalError> {
        let record_bytes = encoding::encode_to_vec(record)?;
        let record_len = u32::try_from(record_bytes.len())
            .map_err(|_| WalError::RecordTooLarge(record_bytes.len()))?;

        if record_len > self.header.max_record_size {
            return Err(WalError::RecordTooLarge(record_len as usize));
        }

        let len_bytes = record_len.to_le_bytes();
        let checksum = crc32_of(&[&len_bytes, &record_bytes]);

        let mut guard = self
            .handle
            .lock()
            .map_err(|_| WalError::Internal("Mutex poisoned".into()))?;

        guard.write_all(&len_bytes)?;
        guard.write_all(&record_bytes)?;
        guard.write_all(&checksum.to_le_bytes())?;
        guard.sync_all()?;

        trace!(
            len = record_len,
            crc = format_args!("{checksum:08x}"),
            "WAL record appended"
        );
        Ok(())
    }

    /// Returns an iterator that replays every valid record from the start
    /// of the segment, stopping at the first checksum failure or truncated
    /// tail.
    pub fn replay_iter(&self) -> Result<WalIter<T>, WalError> {
        debug!(path = %self.path.display(), "WAL replay started");

        Ok(WalIter {
            file: Arc::clone(&self.handle),
            offset: WalHeader::HEADER_DISK_SIZE as u64,
            max_record_size: self.header.max_record_size as usize,
            _marker: std::marker::PhantomData,
        })
    }

    /// Clears all records and rewrites the header, leaving only the header
    /// and its checksum on disk.
    pub fn truncate(&mut self) -> Result<(), WalError> {
        let mut guard = self
            .handle
            .lock()
            .map_err(|_| WalError::Internal("Mutex poisoned".into()))?;

        guard.set_len(0)?;
        guard.seek(SeekFrom::Start(0))?;

        emit_header(&mut *guard, &self.header)?;
        guard.sync_all()?;

        info!(path = %self.path.display(), "WAL truncated");
        Ok(())
    }

    /// Syncs the current segment and opens the next one (`wal_seq + 1`) in
    /// the same directory, replacing `self` in place.
    ///
    /// Returns the new segment's sequence number.
    pub fn rotate_next(&mut self) -> Result<u64, WalError> {
        {
            let guard = self
                .handle
                .lock()
                .map_err(|_| WalError::Internal("Mutex poisoned".into()))?;
            guard.sync_all()?;
        }

        let next_seq = self
            .header
            .wal_seq
            .checked_add(1)
            .ok_or_else(|| WalError::Internal("WAL sequence number overflow".into()))?;

        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let next_path = dir.join(format!("wal-{next_seq:06}.log"));

        *self = Wal::<T>::open(&next_path, Some(self.header.max_record_size))?;

        Ok(next_seq)
    }

    /// Path to the underlying segment file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// This segment's sequence number.
    pub fn wal_seq(&self) -> u64 {
        self.header.wal_seq
    }

    /// Configured maximum record size, in bytes.
    pub fn max_record_size(&self) -> u32 {
        self.header.max_record_size
    }

    /// Current on-disk size of the segment file, in bytes.
    pub fn file_size(&self) -> Result<u64, WalError> {
        let guard = self
            .handle
            .lock()
            .map_err(|_| WalError::Internal("Mutex poisoned".into()))?;
        Ok(guard.metadata()?.len())
    }
}

impl<T: WalData> Drop for Wal<T> {
    fn drop(&mut self) {
        match self.handle.lock() {
            Ok(guard) => {
                if let Err(e) = guard.sync_all() {
                    error!(path = %self.path.display(), error = %e, "WAL sync failed on drop");
                }
            }
            Err(poisoned) => {
                let file = poisoned.into_inner();
                if let Err(e) = file.sync_all() {
                    error!(path = %self.path.display(), error = %e, "WAL sync failed on drop (poisoned lock)");
                } else {
                    warn!(path = %self.path.display(), "WAL recovered and synced after poisoned lock");
                }
            }
        }
    }
}

/// Sequential replay iterator over a [`Wal`] segment.
///
/// Holds its own `Arc` to the file handle and its own read cursor, so it
/// can safely outlive the [`Wal`] that produced it and coexist with
/// concurrent appenders — each read seeks to `self.offset` first.
pub struct WalIter<T: WalData> {
    file: Arc<Mutex<File>>,
    offset: u64,
    max_record_size: usize,
    _marker: std::marker::PhantomData<T>,
}

impl<T: WalData> std::fmt::Debug for WalIter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalIter")
            .field("offset", &self.offset)
            .field("max_record_size", &self.max_record_size)
            .finish_non_exhaustive()
    }
}

impl<T: WalData> Iterator for WalIter<T> {
    type Item = Result<T, WalError>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut guard = match self.file.lock() {
            Ok(g) => g,
            Err(_) => return Some(Err(WalError::Internal("Mutex poisoned".into()))),
        };

        if let Err(e) = guard.seek(SeekFrom::Start(self.offset)) {
            return Some(Err(WalError::Io(e)));
        }

        let mut len_bytes = [0u8; LEN_PREFIX_SIZE];
        match guard.read_exact(&mut len_bytes) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                trace!(offset = self.offset, "WAL replay reached end of file");
                return None;
            }
            Err(e) => return Some(Err(WalError::Io(e))),
        }

        let record_len = u32::from_le_bytes(len_bytes) as usize;
        if record_len > self.max_record_size {
            return Some(Err(WalError::RecordTooLarge(record_len)));
        }

        trace!(offset = self.offset, len = record_len, "WAL reading record");

        let mut record_bytes = vec![0u8; record_len];
        if let Err(e) = guard.read_exact(&mut record_bytes) {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                warn!(
                    offset = self.offset,
                    len = record_len,
                    "WAL truncated record (partial payload)"
                );
                return Some(Err(WalError::UnexpectedEof));
            }
            return Some(Err(WalError::Io(e)));
        }

        let mut checksum_bytes = [0u8; LEN_PREFIX_SIZE];
        if let Err(e) = guard.read_exact(&mut checksum_bytes) {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                warn!(
                    offset = self.offset,
                    len = record_len,
                    "WAL truncated record (partial checksum)"
                );
                return Some(Err(WalError::UnexpectedEof));
            }
            return Some(Err(WalError::Io(e)));
        }
        let stored_checksum = u32::from_le_bytes(checksum_bytes);

        if let Ok(pos) = guard.stream_position() {
            self.offset = pos;
        }

        if let Err(e) = check_crc32(&[&len_bytes, &record_bytes], stored_checksum) {
            warn!(
                offset = self.offset,
                len = record_len,
                "WAL record checksum mismatch"
            );
            return Some(Err(e));
        }

        match encoding::decode_from_slice::<T>(&record_bytes) {
            Ok((record, _)) => Some(Ok(record)),
            Err(e) => Some(Err(WalError::Encoding(e))),
        }
    }
}

/// Encodes and writes `header` followed by its CRC32. Does not sync — the
/// caller follows up with its own `sync_all` once it knows the write is
/// complete.
fn emit_header<W: Write>(writer: &mut W, header: &WalHeader) -> Result<(), WalError> {
    let header_bytes = encoding::encode_to_vec(header)?;
    let checksum = crc32_of(&[&header_bytes]);

    writer.write_all(&header_bytes)?;
    writer.write_all(&checksum.to_le_bytes())?;

    Ok(())
}

/// Reads a header and its CRC32 from the current position, validating the
/// checksum, magic, and version. Sequence-number agreement with the
/// filename is the caller's responsibility.
fn read_header<R: Read>(reader: &mut R) -> Result<WalHeader, WalError> {
    let mut header_bytes = vec![0u8; WalHeader::ENCODED_SIZE];
    reader.read_exact(&mut header_bytes)?;

    let mut checksum_bytes = [0u8; LEN_PREFIX_SIZE];
    reader.read_exact(&mut checksum_bytes)?;
    let stored_checksum = u32::from_le_bytes(checksum_bytes);

    check_crc32(&[&header_bytes], stored_checksum)
        .map_err(|_| WalError::InvalidHeader("header checksum mismatch".into()))?;

    let (header, _) = encoding::decode_from_slice::<WalHeader>(&header_bytes)?;

    if header.magic != WalHeader::MAGIC {
        return Err(WalError::InvalidHeader("bad magic".into()));
    }
    if header.version != WalHeader::VERSION {
        return Err(WalError::InvalidHeader(format!(
            "unsupported version {}",
            header.version
        )));
    }

    Ok(header)
}

fn crc32_of(parts: &[&[u8]]) -> u32 {
    let mut hasher = Crc32::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize()
}

fn check_crc32(parts: &[&[u8]], expected: u32) -> Result<(), WalError> {
    if crc32_of(parts) != expected {
        return Err(WalError::ChecksumMismatch);
    }
    Ok(())
}
