//! Block reference table.
//!
//! Per relation fork, the set of block numbers modified between a parent and
//! a child backup. The block space is split into chunks of 2^16 consecutive
//! blocks; each present chunk holds either a sorted array of 16-bit offsets
//! or an 8 KiB bitmap, chosen by cardinality. A chunk converts from array to
//! bitmap when an insert would push it past 4,096 entries. Chunks with zero
//! entries are never stored.
//!
//! A table is created empty, mutated only while a backup executes,
//! serialised once, and immutable thereafter.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::io::{Read, Write};
use thiserror::Error;

/// File magic: "RBAT" read as a little-endian u32.
pub const BRT_MAGIC: u32 = 0x5242_4154;

/// Current serialisation version.
pub const BRT_VERSION: u16 = 1;

/// Blocks per chunk.
const CHUNK_SPAN: u64 = 1 << 16;

/// An array chunk converts to a bitmap strictly above this population.
const ARRAY_MAX_ENTRIES: usize = 4096;

/// Bitmap payload size: one bit per block in the chunk.
const BITMAP_BYTES: usize = 8192;

/// Relation fork.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ForkId {
    /// Main data fork
    Main = 0,
    /// Free-space map
    Fsm = 1,
    /// Visibility map
    Vm = 2,
    /// Init fork for unlogged relations
    Init = 3,
}

impl ForkId {
    /// Decode a fork tag.
    pub fn from_u8(tag: u8) -> Option<ForkId> {
        match tag {
            0 => Some(ForkId::Main),
            1 => Some(ForkId::Fsm),
            2 => Some(ForkId::Vm),
            3 => Some(ForkId::Init),
            _ => None,
        }
    }
}

/// Identifies one relation fork: tablespace, database, relation, fork.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ForkKey {
    /// Tablespace OID
    pub spc_oid: u32,
    /// Database OID
    pub db_oid: u32,
    /// Relation OID (relfilenode)
    pub rel_oid: u32,
    /// Fork within the relation
    pub fork: ForkId,
}

impl ForkKey {
    /// Key for the main fork.
    pub fn main(spc_oid: u32, db_oid: u32, rel_oid: u32) -> Self {
        ForkKey {
            spc_oid,
            db_oid,
            rel_oid,
            fork: ForkId::Main,
        }
    }
}

/// BRT errors.
#[derive(Debug, Error)]
pub enum BrtError {
    /// `entry_get_blocks` found more matches than the caller's capacity
    #[error("Output capacity exceeded")]
    Overflow,

    /// Serialized table does not start with the RBAT magic
    #[error("Bad magic 0x{0:08X}")]
    BadMagic(u32),

    /// Unsupported serialisation version
    #[error("Unsupported version {0}")]
    BadVersion(u16),

    /// Trailing checksum mismatch
    #[error("Checksum mismatch")]
    BadCrc,

    /// Structural problem in the serialized bytes
    #[error("Corrupt table: {0}")]
    Corrupt(String),

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

enum Chunk {
    /// Sorted ascending offsets within the chunk, unique.
    Array(Vec<u16>),
    /// One bit per block in the chunk.
    Bitmap(Box<[u8; BITMAP_BYTES]>),
}

impl Chunk {
    fn insert(&mut self, offset: u16) {
        match self {
            Chunk::Array(offsets) => {
                if let Err(pos) = offsets.binary_search(&offset) {
                    if offsets.len() + 1 > ARRAY_MAX_ENTRIES {
                        let mut bitmap = Box::new([0u8; BITMAP_BYTES]);
                        for &o in offsets.iter() {
                            bitmap[(o >> 3) as usize] |= 1 << (o & 7);
                        }
                        bitmap[(offset >> 3) as usize] |= 1 << (offset & 7);
                        *self = Chunk::Bitmap(bitmap);
                    } else {
                        offsets.insert(pos, offset);
                    }
                }
            }
            Chunk::Bitmap(bitmap) => {
                bitmap[(offset >> 3) as usize] |= 1 << (offset & 7);
            }
        }
    }

    fn contains(&self, offset: u16) -> bool {
        match self {
            Chunk::Array(offsets) => offsets.binary_search(&offset).is_ok(),
            Chunk::Bitmap(bitmap) => bitmap[(offset >> 3) as usize] & (1 << (offset & 7)) != 0,
        }
    }

    fn len(&self) -> usize {
        match self {
            Chunk::Array(offsets) => offsets.len(),
            Chunk::Bitmap(bitmap) => bitmap.iter().map(|b| b.count_ones() as usize).sum(),
        }
    }

    /// Offsets within `[lo, hi)` of this chunk, ascending.
    fn collect_range(&self, lo: u16, hi_inclusive: u16, out: &mut Vec<u16>) {
        match self {
            Chunk::Array(offsets) => {
                for &o in offsets {
                    if o >= lo && o <= hi_inclusive {
                        out.push(o);
                    }
                }
            }
            Chunk::Bitmap(bitmap) => {
                for o in lo..=hi_inclusive {
                    if bitmap[(o >> 3) as usize] & (1 << (o & 7)) != 0 {
                        out.push(o);
                    }
                }
            }
        }
    }
}

/// One fork's chunk map. Opaque to callers; obtained via
/// [`BlockRefTable::get_entry`].
pub struct BrtEntry {
    chunks: BTreeMap<u32, Chunk>,
}

impl BrtEntry {
    fn new() -> Self {
        BrtEntry {
            chunks: BTreeMap::new(),
        }
    }

    fn mark(&mut self, block: u32) {
        let chunk_index = (block as u64 / CHUNK_SPAN) as u32;
        let offset = (block as u64 % CHUNK_SPAN) as u16;
        self.chunks
            .entry(chunk_index)
            .or_insert_with(|| Chunk::Array(Vec::new()))
            .insert(offset);
    }

    /// Whether the exact block is marked.
    pub fn contains(&self, block: u32) -> bool {
        let chunk_index = (block as u64 / CHUNK_SPAN) as u32;
        let offset = (block as u64 % CHUNK_SPAN) as u16;
        self.chunks
            .get(&chunk_index)
            .is_some_and(|c| c.contains(offset))
    }

    /// Total marked blocks in this entry.
    pub fn len(&self) -> usize {
        self.chunks.values().map(Chunk::len).sum()
    }

    /// Whether no blocks are marked.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Emit the marked blocks within `[lo, hi)` in ascending order.
    ///
    /// Writes at most `out.len()` entries and returns the count. When more
    /// blocks match than fit, returns [`BrtError::Overflow`] and leaves
    /// `out` unmodified.
    pub fn get_blocks(&self, lo: u32, hi: u32, out: &mut [u32]) -> Result<usize, BrtError> {
        if hi <= lo {
            return Ok(0);
        }
        let mut matches: Vec<u32> = Vec::new();
        let first_chunk = (lo as u64 / CHUNK_SPAN) as u32;
        let last_chunk = ((hi as u64 - 1) / CHUNK_SPAN) as u32;
        let mut scratch: Vec<u16> = Vec::new();

        for (&chunk_index, chunk) in self.chunks.range(first_chunk..=last_chunk) {
            let base = chunk_index as u64 * CHUNK_SPAN;
            let chunk_lo = if (lo as u64) > base { (lo as u64 - base) as u16 } else { 0 };
            let chunk_hi = if (hi as u64) < base + CHUNK_SPAN {
                (hi as u64 - base - 1) as u16
            } else {
                (CHUNK_SPAN - 1) as u16
            };
            scratch.clear();
            chunk.collect_range(chunk_lo, chunk_hi, &mut scratch);
            matches.extend(scratch.iter().map(|&o| (base + o as u64) as u32));
        }

        if matches.len() > out.len() {
            return Err(BrtError::Overflow);
        }
        out[..matches.len()].copy_from_slice(&matches);
        Ok(matches.len())
    }

    /// Every marked block, ascending.
    pub fn all_blocks(&self) -> Vec<u32> {
        let mut out = Vec::with_capacity(self.len());
        let mut scratch = Vec::new();
        for (&chunk_index, chunk) in &self.chunks {
            let base = chunk_index as u64 * CHUNK_SPAN;
            scratch.clear();
            chunk.collect_range(0, (CHUNK_SPAN - 1) as u16, &mut scratch);
            out.extend(scratch.iter().map(|&o| (base + o as u64) as u32));
        }
        out
    }
}

/// The block reference table: fork key to set of modified blocks.
#[derive(Default)]
pub struct BlockRefTable {
    entries: FxHashMap<ForkKey, BrtEntry>,
}

impl BlockRefTable {
    /// Empty table.
    pub fn new() -> Self {
        BlockRefTable {
            entries: FxHashMap::default(),
        }
    }

    /// Record a modified block. O(1) average.
    pub fn mark_block_modified(&mut self, key: ForkKey, block: u32) {
        self.entries.entry(key).or_insert_with(BrtEntry::new).mark(block);
    }

    /// Entry for a fork key, if any block was marked for it.
    pub fn get_entry(&self, key: &ForkKey) -> Option<&BrtEntry> {
        self.entries.get(key)
    }

    /// Number of fork keys present.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was marked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fork keys in sorted order.
    pub fn keys(&self) -> Vec<ForkKey> {
        let mut keys: Vec<ForkKey> = self.entries.keys().copied().collect();
        keys.sort();
        keys
    }

    /// Serialise in the RBAT layout, little-endian, CRC-32 trailer.
    pub fn serialize<W: Write>(&self, writer: &mut W) -> Result<(), BrtError> {
        let mut buf: Vec<u8> = Vec::new();
        buf.write_u32::<LittleEndian>(BRT_MAGIC)?;
        buf.write_u16::<LittleEndian>(BRT_VERSION)?;

        for key in self.keys() {
            let entry = &self.entries[&key];
            // 24-byte key: three OIDs, fork tag, padded
            buf.write_u32::<LittleEndian>(key.spc_oid)?;
            buf.write_u32::<LittleEndian>(key.db_oid)?;
            buf.write_u32::<LittleEndian>(key.rel_oid)?;
            buf.write_u32::<LittleEndian>(key.fork as u32)?;
            buf.write_u64::<LittleEndian>(0)?;

            let chunk_count = u16::try_from(entry.chunks.len())
                .map_err(|_| BrtError::Corrupt("too many chunks in one entry".to_string()))?;
            buf.write_u16::<LittleEndian>(chunk_count)?;

            for (&chunk_index, chunk) in &entry.chunks {
                buf.write_u32::<LittleEndian>(chunk_index)?;
                match chunk {
                    Chunk::Array(offsets) => {
                        buf.write_u8(0)?;
                        buf.write_u16::<LittleEndian>(offsets.len() as u16)?;
                        for &offset in offsets {
                            buf.write_u16::<LittleEndian>(offset)?;
                        }
                    }
                    Chunk::Bitmap(bitmap) => {
                        buf.write_u8(1)?;
                        buf.extend_from_slice(&bitmap[..]);
                    }
                }
            }
        }

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&buf);
        buf.write_u32::<LittleEndian>(hasher.finalize())?;
        writer.write_all(&buf)?;
        Ok(())
    }

    /// Read a table back from the RBAT layout.
    pub fn deserialize<R: Read>(reader: &mut R) -> Result<Self, BrtError> {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        if buf.len() < 10 {
            return Err(BrtError::Corrupt("file shorter than header".to_string()));
        }

        let (body, trailer) = buf.split_at(buf.len() - 4);
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(body);
        let stored = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        if hasher.finalize() != stored {
            return Err(BrtError::BadCrc);
        }

        let mut cursor = std::io::Cursor::new(body);
        let magic = cursor.read_u32::<LittleEndian>()?;
        if magic != BRT_MAGIC {
            return Err(BrtError::BadMagic(magic));
        }
        let version = cursor.read_u16::<LittleEndian>()?;
        if version != BRT_VERSION {
            return Err(BrtError::BadVersion(version));
        }

        let mut table = BlockRefTable::new();
        while (cursor.position() as usize) < body.len() {
            let spc_oid = cursor.read_u32::<LittleEndian>()?;
            let db_oid = cursor.read_u32::<LittleEndian>()?;
            let rel_oid = cursor.read_u32::<LittleEndian>()?;
            let fork_tag = cursor.read_u32::<LittleEndian>()?;
            let _reserved = cursor.read_u64::<LittleEndian>()?;
            let fork = ForkId::from_u8(fork_tag as u8)
                .ok_or_else(|| BrtError::Corrupt(format!("bad fork tag {fork_tag}")))?;
            let key = ForkKey {
                spc_oid,
                db_oid,
                rel_oid,
                fork,
            };

            let chunk_count = cursor.read_u16::<LittleEndian>()?;
            let mut entry = BrtEntry::new();
            for _ in 0..chunk_count {
                let chunk_index = cursor.read_u32::<LittleEndian>()?;
                let kind = cursor.read_u8()?;
                let chunk = match kind {
                    0 => {
                        let length = cursor.read_u16::<LittleEndian>()?;
                        let mut offsets = Vec::with_capacity(length as usize);
                        let mut previous: Option<u16> = None;
                        for _ in 0..length {
                            let offset = cursor.read_u16::<LittleEndian>()?;
                            if previous.is_some_and(|p| p >= offset) {
                                return Err(BrtError::Corrupt(
                                    "array chunk not strictly ascending".to_string(),
                                ));
                            }
                            previous = Some(offset);
                            offsets.push(offset);
                        }
                        Chunk::Array(offsets)
                    }
                    1 => {
                        let mut bitmap = Box::new([0u8; BITMAP_BYTES]);
                        cursor.read_exact(&mut bitmap[..])?;
                        Chunk::Bitmap(bitmap)
                    }
                    other => {
                        return Err(BrtError::Corrupt(format!("bad chunk kind {other}")));
                    }
                };
                if chunk.len() == 0 {
                    return Err(BrtError::Corrupt("empty chunk stored".to_string()));
                }
                entry.chunks.insert(chunk_index, chunk);
            }
            table.entries.insert(key, entry);
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn key() -> ForkKey {
        ForkKey::main(1663, 16384, 1234)
    }

    #[test]
    fn test_mark_is_idempotent() {
        let mut table = BlockRefTable::new();
        table.mark_block_modified(key(), 7);
        table.mark_block_modified(key(), 7);
        let entry = table.get_entry(&key()).unwrap();
        assert_eq!(entry.len(), 1);
        assert_eq!(entry.all_blocks(), vec![7]);
    }

    #[test]
    fn test_get_blocks_range_and_overflow() {
        let mut table = BlockRefTable::new();
        for block in [5u32, 10, 15, 70_000, 70_001] {
            table.mark_block_modified(key(), block);
        }
        let entry = table.get_entry(&key()).unwrap();

        let mut out = [0u32; 8];
        let n = entry.get_blocks(0, 100_000, &mut out).unwrap();
        assert_eq!(&out[..n], &[5, 10, 15, 70_000, 70_001]);

        // half-open: hi excluded
        let n = entry.get_blocks(5, 15, &mut out).unwrap();
        assert_eq!(&out[..n], &[5, 10]);

        // overflow leaves out unmodified
        let mut small = [99u32; 2];
        assert!(matches!(
            entry.get_blocks(0, 100_000, &mut small),
            Err(BrtError::Overflow)
        ));
        assert_eq!(small, [99, 99]);
    }

    #[test]
    fn test_array_to_bitmap_boundary() {
        let mut table = BlockRefTable::new();
        // exactly ARRAY_MAX_ENTRIES entries stay an array
        for block in 0..4096u32 {
            table.mark_block_modified(key(), block * 2);
        }
        {
            let entry = table.get_entry(&key()).unwrap();
            assert!(matches!(entry.chunks[&0], Chunk::Array(_)));
            assert_eq!(entry.len(), 4096);
        }

        // the 4,097th insert converts the chunk
        table.mark_block_modified(key(), 9001);
        let entry = table.get_entry(&key()).unwrap();
        assert!(matches!(entry.chunks[&0], Chunk::Bitmap(_)));
        assert_eq!(entry.len(), 4097);

        // query results identical before and after conversion
        let blocks = entry.all_blocks();
        let mut expected: Vec<u32> = (0..4096u32).map(|b| b * 2).collect();
        expected.push(9001);
        expected.sort_unstable();
        assert_eq!(blocks, expected);
    }

    #[test]
    fn test_chunk_boundaries() {
        let mut table = BlockRefTable::new();
        for block in [65_535u32, 65_536, 131_071, 131_072] {
            table.mark_block_modified(key(), block);
        }
        let entry = table.get_entry(&key()).unwrap();
        assert_eq!(entry.chunks.len(), 3);
        assert_eq!(entry.all_blocks(), vec![65_535, 65_536, 131_071, 131_072]);

        let mut out = [0u32; 4];
        let n = entry.get_blocks(65_536, 131_072, &mut out).unwrap();
        assert_eq!(&out[..n], &[65_536, 131_071]);
    }

    #[test]
    fn test_serialize_roundtrip() {
        let mut table = BlockRefTable::new();
        let fsm = ForkKey {
            fork: ForkId::Fsm,
            ..key()
        };
        for block in [1u32, 2, 3, 100_000] {
            table.mark_block_modified(key(), block);
        }
        table.mark_block_modified(fsm, 42);
        // force one bitmap chunk
        for block in 0..=4096u32 {
            table.mark_block_modified(fsm, 200_000 + block);
        }

        let mut bytes = Vec::new();
        table.serialize(&mut bytes).unwrap();
        assert_eq!(&bytes[..4], &BRT_MAGIC.to_le_bytes());

        let restored = BlockRefTable::deserialize(&mut bytes.as_slice()).unwrap();
        assert_eq!(restored.len(), table.len());
        for k in table.keys() {
            assert_eq!(
                restored.get_entry(&k).unwrap().all_blocks(),
                table.get_entry(&k).unwrap().all_blocks()
            );
        }
    }

    #[test]
    fn test_deserialize_rejects_corruption() {
        let mut table = BlockRefTable::new();
        table.mark_block_modified(key(), 1);
        let mut bytes = Vec::new();
        table.serialize(&mut bytes).unwrap();

        // flip one payload byte: CRC must catch it
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xFF;
        assert!(matches!(
            BlockRefTable::deserialize(&mut bytes.as_slice()),
            Err(BrtError::BadCrc)
        ));
    }

    #[test]
    fn test_deserialize_rejects_bad_magic() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0xDEAD_BEEFu32.to_le_bytes());
        bytes.extend_from_slice(&BRT_VERSION.to_le_bytes());
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&bytes);
        let crc = hasher.finalize();
        bytes.extend_from_slice(&crc.to_le_bytes());
        assert!(matches!(
            BlockRefTable::deserialize(&mut bytes.as_slice()),
            Err(BrtError::BadMagic(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_roundtrip_preserves_queries(blocks in proptest::collection::btree_set(0u32..300_000, 0..500)) {
            let mut table = BlockRefTable::new();
            for &b in &blocks {
                table.mark_block_modified(key(), b);
            }
            let mut bytes = Vec::new();
            table.serialize(&mut bytes).unwrap();
            let restored = BlockRefTable::deserialize(&mut bytes.as_slice()).unwrap();

            let expected: Vec<u32> = blocks.iter().copied().collect();
            if expected.is_empty() {
                prop_assert!(restored.get_entry(&key()).is_none());
            } else {
                prop_assert_eq!(restored.get_entry(&key()).unwrap().all_blocks(), expected);
            }
        }
    }
}
