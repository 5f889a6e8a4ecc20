//! Restart-point, shared-prefix-compressed data blocks.
//!
//! Each data block is a sequence of entries followed by a trailing restart
//! array. Every entry stores only the suffix of its key that differs from
//! the previous one (`shared_len` bytes reused, `unshared_len` bytes
//! appended). A full key is written every [`DEFAULT_RESTART_INTERVAL`]
//! entries (a "restart point"), so a reader can binary-search the restart
//! array and then linearly decode forward instead of replaying the whole
//! block from the start.
//!
//! ```text
//! entry := varint(shared_len) varint(unshared_len) varint(value_len)
//!          kind(u8) lsn(u64) timestamp(u64)
//!          unshared_key_bytes value_bytes
//!
//! block := entry* restart_offset(u32)* num_restarts(u32)
//! ```
//!
//! `kind` is `0` for a put and `1` for a point delete; deletes carry a
//! zero-length value. Restart offsets are relative to the start of the
//! entry region, little-endian `u32`.

use crate::encoding::{self, Decode, Encode, Varint32};

/// Number of entries between consecutive restart points.
///
/// LevelDB-family stores use 16; picking the same value keeps per-entry
/// overhead low while bounding the linear scan after a restart seek.
pub const DEFAULT_RESTART_INTERVAL: usize = 16;

const KIND_PUT: u8 = 0;
const KIND_DELETE: u8 = 1;

/// A fully decoded entry from a data block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockEntry {
    /// The user key bytes.
    pub key: Vec<u8>,
    /// The value bytes. Empty for tombstones.
    pub value: Vec<u8>,
    /// Whether this entry represents a point delete.
    pub is_delete: bool,
    /// Log sequence number associated with this version.
    pub lsn: u64,
    /// Commit timestamp supplied by the storage engine.
    pub timestamp: u64,
}

fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

// ------------------------------------------------------------------------------------------------
// BlockWriter
// ------------------------------------------------------------------------------------------------

/// Accumulates entries for a single data block, emitting restart points
/// and shared-prefix-compressed keys as it goes.
pub struct BlockWriter {
    buf: Vec<u8>,
    restarts: Vec<u32>,
    restart_interval: usize,
    entries_since_restart: usize,
    last_key: Vec<u8>,
}

impl BlockWriter {
    /// Creates a writer that emits a restart point every `restart_interval`
    /// entries (minimum 1).
    pub fn new(restart_interval: usize) -> Self {
        Self {
            buf: Vec::new(),
            restarts: Vec::new(),
            restart_interval: restart_interval.max(1),
            entries_since_restart: 0,
            last_key: Vec::new(),
        }
    }

    /// Number of entries written so far.
    pub fn is_empty(&self) -> bool {
        self.restarts.is_empty() && self.entries_since_restart == 0
    }

    /// Approximate encoded size, including the not-yet-written restart
    /// trailer. Used by callers deciding when to roll over to a new block.
    pub fn size_estimate(&self) -> usize {
        self.buf.len() + self.restarts.len() * 4 + 4 + 4
    }

    /// Appends one entry. Keys must be supplied in ascending order.
    pub fn add(
        &mut self,
        key: &[u8],
        value: &[u8],
        is_delete: bool,
        lsn: u64,
        timestamp: u64,
    ) -> Result<(), encoding::EncodingError> {
        let at_restart = self.entries_since_restart == 0;
        let shared = if at_restart {
            0
        } else {
            common_prefix_len(&self.last_key, key)
        };

        if at_restart {
            self.restarts.push(self.buf.len() as u32);
        }

        let unshared = &key[shared..];

        Varint32(shared as u32).encode_to(&mut self.buf)?;
        Varint32(unshared.len() as u32).encode_to(&mut self.buf)?;
        Varint32(value.len() as u32).encode_to(&mut self.buf)?;
        self.buf.push(if is_delete { KIND_DELETE } else { KIND_PUT });
        lsn.encode_to(&mut self.buf)?;
        timestamp.encode_to(&mut self.buf)?;
        self.buf.extend_from_slice(unshared);
        self.buf.extend_from_slice(value);

        self.last_key.clear();
        self.last_key.extend_from_slice(key);

        self.entries_since_restart += 1;
        if self.entries_since_restart == self.restart_interval {
            self.entries_since_restart = 0;
        }

        Ok(())
    }

    /// Serializes the block body plus its restart trailer.
    pub fn finish(mut self) -> Vec<u8> {
        let num_restarts = self.restarts.len() as u32;
        for offset in &self.restarts {
            self.buf.extend_from_slice(&offset.to_le_bytes());
        }
        self.buf.extend_from_slice(&num_restarts.to_le_bytes());
        self.buf
    }
}

// ------------------------------------------------------------------------------------------------
// BlockIterator
// ------------------------------------------------------------------------------------------------

/// Iterator over the entries contained within a single encoded data block.
///
/// Supports `seek_to_first()` for a plain forward scan and `seek_to(key)`
/// which binary-searches the restart array before linearly decoding
/// forward from the nearest restart point at or before `key`.
pub struct BlockIterator {
    data: Vec<u8>,
    restarts: Vec<u32>,
    entries_end: usize,
    cursor: usize,
    current_key: Vec<u8>,
}

impl BlockIterator {
    /// Builds an iterator over a block previously produced by
    /// [`BlockWriter::finish`].
    pub fn new(data: Vec<u8>) -> Self {
        let len = data.len();
        if len < 4 {
            return Self {
                data,
                restarts: Vec::new(),
                entries_end: 0,
                cursor: 0,
                current_key: Vec::new(),
            };
        }

        let num_restarts = u32::from_le_bytes(
            data[len - 4..]
                .try_into()
                .expect("slice of len 4 into [u8; 4]"),
        ) as usize;

        let trailer_len = 4 + num_restarts.saturating_mul(4);
        let (restarts, entries_end) = if trailer_len <= len {
            let restarts_start = len - trailer_len;
            let mut restarts = Vec::with_capacity(num_restarts);
            for i in 0..num_restarts {
                let off = restarts_start + i * 4;
                let bytes: [u8; 4] = data[off..off + 4]
                    .try_into()
                    .expect("slice of len 4 into [u8; 4]");
                restarts.push(u32::from_le_bytes(bytes));
            }
            (restarts, restarts_start)
        } else {
            (Vec::new(), 0)
        };

        Self {
            data,
            restarts,
            entries_end,
            cursor: 0,
            current_key: Vec::new(),
        }
    }

    /// Reset the iterator to the first entry in the block.
    pub fn seek_to_first(&mut self) {
        self.cursor = 0;
        self.current_key.clear();
    }

    /// Seek to the first entry whose key is **≥ `search_key`**.
    ///
    /// Binary-searches the restart points, then linearly decodes forward.
    /// Corruption or truncation leaves the iterator exhausted.
    pub fn seek_to(&mut self, search_key: &[u8]) {
        if self.restarts.is_empty() {
            self.seek_to_first();
            self.advance_to(search_key);
            return;
        }

        let mut lo = 0usize;
        let mut hi = self.restarts.len();
        while lo + 1 < hi {
            let mid = lo + (hi - lo) / 2;
            match self.key_at_restart(mid) {
                Some(k) if k.as_slice() <= search_key => lo = mid,
                _ => hi = mid,
            }
        }

        self.cursor = self.restarts[lo] as usize;
        self.current_key.clear();
        self.advance_to(search_key);
    }

    /// Decodes the full key stored at the given restart index, without
    /// disturbing iterator state.
    fn key_at_restart(&self, idx: usize) -> Option<Vec<u8>> {
        let offset = *self.restarts.get(idx)? as usize;
        let slice = self.data.get(offset..self.entries_end)?;
        let (shared, n1) = Varint32::decode_from(slice).ok()?;
        if shared.0 != 0 {
            return None; // restart points always store a full key
        }
        let (unshared, n2) = Varint32::decode_from(&slice[n1..]).ok()?;
        let (_value_len, n3) = Varint32::decode_from(&slice[n1 + n2..]).ok()?;
        let header_len = n1 + n2 + n3 + 1 + 8 + 8;
        let unshared_len = unshared.0 as usize;
        slice
            .get(header_len..header_len + unshared_len)
            .map(|b| b.to_vec())
    }

    /// Advances past entries strictly less than `search_key`, leaving the
    /// cursor at the first entry `>= search_key` (or exhausted).
    fn advance_to(&mut self, search_key: &[u8]) {
        loop {
            let saved_cursor = self.cursor;
            let saved_key = self.current_key.clone();
            match self.next_entry() {
                Some(entry) => {
                    if entry.key.as_slice() >= search_key {
                        self.cursor = saved_cursor;
                        self.current_key = saved_key;
                        return;
                    }
                }
                None => return,
            }
        }
    }

    /// Decode and return the next entry, advancing the cursor.
    pub fn next_entry(&mut self) -> Option<BlockEntry> {
        if self.cursor >= self.entries_end {
            return None;
        }

        let slice = &self.data[self.cursor..self.entries_end];
        let (shared, n1) = Varint32::decode_from(slice).ok()?;
        let (unshared, n2) = Varint32::decode_from(&slice[n1..]).ok()?;
        let (value_len, n3) = Varint32::decode_from(&slice[n1 + n2..]).ok()?;
        let mut off = n1 + n2 + n3;

        let kind = *slice.get(off)?;
        off += 1;

        let (lsn, n4) = u64::decode_from(&slice[off..]).ok()?;
        off += n4;
        let (timestamp, n5) = u64::decode_from(&slice[off..]).ok()?;
        off += n5;

        let shared_len = shared.0 as usize;
        let unshared_len = unshared.0 as usize;
        let value_len = value_len.0 as usize;

        if shared_len > self.current_key.len() || off + unshared_len + value_len > slice.len() {
            self.cursor = self.entries_end;
            return None;
        }

        let mut key = Vec::with_capacity(shared_len + unshared_len);
        key.extend_from_slice(&self.current_key[..shared_len]);
        key.extend_from_slice(&slice[off..off + unshared_len]);
        off += unshared_len;

        let value = slice[off..off + value_len].to_vec();
        off += value_len;

        self.cursor += off;
        self.current_key = key.clone();

        Some(BlockEntry {
            key,
            value,
            is_delete: kind == KIND_DELETE,
            lsn,
            timestamp,
        })
    }

    /// Returns `true` if the iterator has reached the end of the block or
    /// encountered corruption.
    #[allow(dead_code)]
    pub fn is_end(&self) -> bool {
        self.cursor >= self.entries_end
    }
}

impl Iterator for BlockIterator {
    type Item = BlockEntry;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry()
    }
}
