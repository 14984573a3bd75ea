//! WAL record decoding.
//!
//! A record is a 24-byte common header followed by per-block headers, block
//! payloads (images then data), and a main payload. The reader hands this
//! module a fully reassembled record; everything here is pure parsing. The
//! header CRC covers the payload first and then the header bytes before the
//! CRC field itself.

use crate::brt::{ForkId, ForkKey};
use crate::crc32c::Crc32c;
use crate::error::WalError;
use byteorder::{LittleEndian, ReadBytesExt};
use smallvec::SmallVec;
use std::io::Read;
use vault_core::Lsn;

/// Size of the record header.
pub const RECORD_HEADER_LEN: usize = 24;

/// Highest block reference id; larger ids are control chunks.
pub const MAX_BLOCK_ID: u8 = 32;

const BLOCK_ID_DATA_SHORT: u8 = 255;
const BLOCK_ID_DATA_LONG: u8 = 254;
const BLOCK_ID_ORIGIN: u8 = 253;
const BLOCK_ID_TOPLEVEL_XID: u8 = 252;

// fork_flags bits
const BKPBLOCK_FORK_MASK: u8 = 0x0F;
const BKPBLOCK_HAS_IMAGE: u8 = 0x10;
const BKPBLOCK_HAS_DATA: u8 = 0x20;
const BKPBLOCK_WILL_INIT: u8 = 0x40;
const BKPBLOCK_SAME_REL: u8 = 0x80;

// bimg_info bits
const BKPIMAGE_HAS_HOLE: u8 = 0x01;
const BKPIMAGE_COMPRESS_PGLZ: u8 = 0x04;
const BKPIMAGE_COMPRESS_LZ4: u8 = 0x08;
const BKPIMAGE_COMPRESS_ZSTD: u8 = 0x10;

/// Mask for the rmgr-private bits of `info`.
pub const XLR_INFO_MASK: u8 = 0x0F;

/// The fixed record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Total record length including this header
    pub total_len: u32,
    /// Transaction id
    pub xid: u32,
    /// Start of the previous record
    pub prev: Lsn,
    /// Flag bits: low nibble engine, high nibble rmgr
    pub info: u8,
    /// Resource manager id
    pub rmid: u8,
    /// CRC-32C over payload + header prefix
    pub crc: u32,
}

impl RecordHeader {
    /// Parse the 24-byte header.
    pub fn parse(bytes: &[u8]) -> Result<RecordHeader, WalError> {
        if bytes.len() < RECORD_HEADER_LEN {
            return Err(WalError::ShortRead {
                expected: RECORD_HEADER_LEN,
                got: bytes.len(),
            });
        }
        let mut cursor = std::io::Cursor::new(bytes);
        let total_len = cursor.read_u32::<LittleEndian>()?;
        let xid = cursor.read_u32::<LittleEndian>()?;
        let prev = Lsn(cursor.read_u64::<LittleEndian>()?);
        let info = cursor.read_u8()?;
        let rmid = cursor.read_u8()?;
        let _padding = cursor.read_u16::<LittleEndian>()?;
        let crc = cursor.read_u32::<LittleEndian>()?;
        Ok(RecordHeader {
            total_len,
            xid,
            prev,
            info,
            rmid,
            crc,
        })
    }
}

/// One block reference carried by a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRef {
    /// Block reference id within the record (0..=32)
    pub id: u8,
    /// Relation fork key
    pub key: ForkKey,
    /// Block number within the fork
    pub block: u32,
    /// A full-page image accompanies this reference
    pub has_image: bool,
    /// Record-specific data accompanies this reference
    pub has_data: bool,
    /// The block is reinitialised, prior contents irrelevant
    pub will_init: bool,
}

/// A fully decoded record.
///
/// `main_data` and the block references are owned copies; nothing borrows
/// the reader's buffer past the decode call.
#[derive(Debug)]
pub struct DecodedRecord {
    /// Start position of this record
    pub lsn: Lsn,
    /// Header fields
    pub header: RecordHeader,
    /// Block references in record order
    pub blocks: SmallVec<[BlockRef; 4]>,
    /// The rmgr-specific main payload
    pub main_data: Vec<u8>,
}

impl DecodedRecord {
    /// Rmgr-private info bits.
    pub fn rm_info(&self) -> u8 {
        self.header.info & !XLR_INFO_MASK
    }

    /// Feed every block reference into a callback; used for BRT tracking.
    pub fn for_each_block<F: FnMut(ForkKey, u32)>(&self, mut f: F) {
        for block in &self.blocks {
            f(block.key, block.block);
        }
    }
}

/// Verify the record CRC: payload bytes, then the header up to the CRC field.
pub fn verify_crc(lsn: Lsn, header: &RecordHeader, raw: &[u8]) -> Result<(), WalError> {
    let payload = &raw[RECORD_HEADER_LEN..];
    let mut crc = Crc32c::new();
    crc.update(payload);
    crc.update(&raw[..20]);
    if crc.finalize() != header.crc {
        return Err(WalError::BadCrc { lsn });
    }
    Ok(())
}

/// Decode a reassembled record (header already parsed, CRC already checked).
///
/// Header chunks are parsed until only accounted-for payload bytes remain,
/// mirroring the upstream decoder: a record whose last header is a block
/// reference (no main-data chunk) ends its header section implicitly.
pub fn decode(lsn: Lsn, header: RecordHeader, raw: &[u8]) -> Result<DecodedRecord, WalError> {
    let payload = &raw[RECORD_HEADER_LEN..];
    let mut cursor = std::io::Cursor::new(payload);
    let mut blocks: SmallVec<[BlockRef; 4]> = SmallVec::new();
    let mut main_data_len: usize = 0;
    // payload bytes promised by the headers seen so far
    let mut datatotal: usize = 0;
    let mut last_key: Option<ForkKey> = None;

    let malformed = |detail: &str| WalError::Malformed {
        lsn,
        detail: detail.to_string(),
    };

    while payload.len() - cursor.position() as usize > datatotal {
        let id = cursor.read_u8()?;
        match id {
            BLOCK_ID_DATA_SHORT => {
                main_data_len = cursor.read_u8()? as usize;
                datatotal += main_data_len;
                break;
            }
            BLOCK_ID_DATA_LONG => {
                main_data_len = cursor.read_u32::<LittleEndian>()? as usize;
                datatotal += main_data_len;
                break;
            }
            BLOCK_ID_ORIGIN => {
                let _origin = cursor.read_u16::<LittleEndian>()?;
            }
            BLOCK_ID_TOPLEVEL_XID => {
                let _toplevel = cursor.read_u32::<LittleEndian>()?;
            }
            id if id <= MAX_BLOCK_ID => {
                let fork_flags = cursor.read_u8()?;
                let data_length = cursor.read_u16::<LittleEndian>()?;
                let has_image = fork_flags & BKPBLOCK_HAS_IMAGE != 0;
                let has_data = fork_flags & BKPBLOCK_HAS_DATA != 0;
                let will_init = fork_flags & BKPBLOCK_WILL_INIT != 0;
                let fork = ForkId::from_u8(fork_flags & BKPBLOCK_FORK_MASK)
                    .ok_or_else(|| malformed("bad fork in block reference"))?;

                if has_data != (data_length > 0) {
                    return Err(malformed("block data length disagrees with flags"));
                }
                datatotal += data_length as usize;

                if has_image {
                    let bimg_len = cursor.read_u16::<LittleEndian>()?;
                    let _hole_offset = cursor.read_u16::<LittleEndian>()?;
                    let bimg_info = cursor.read_u8()?;
                    let compressed = bimg_info
                        & (BKPIMAGE_COMPRESS_PGLZ | BKPIMAGE_COMPRESS_LZ4 | BKPIMAGE_COMPRESS_ZSTD)
                        != 0;
                    if bimg_info & BKPIMAGE_HAS_HOLE != 0 && compressed {
                        let _hole_length = cursor.read_u16::<LittleEndian>()?;
                    }
                    datatotal += bimg_len as usize;
                }

                let key = if fork_flags & BKPBLOCK_SAME_REL != 0 {
                    last_key.ok_or_else(|| malformed("SAME_REL without a prior reference"))?
                } else {
                    let spc_oid = cursor.read_u32::<LittleEndian>()?;
                    let db_oid = cursor.read_u32::<LittleEndian>()?;
                    let rel_oid = cursor.read_u32::<LittleEndian>()?;
                    ForkKey {
                        spc_oid,
                        db_oid,
                        rel_oid,
                        fork: ForkId::Main,
                    }
                };
                let key = ForkKey { fork, ..key };
                last_key = Some(key);
                let block = cursor.read_u32::<LittleEndian>()?;

                blocks.push(BlockRef {
                    id,
                    key,
                    block,
                    has_image,
                    has_data,
                    will_init,
                });
            }
            other => {
                return Err(WalError::Malformed {
                    lsn,
                    detail: format!("unexpected block id {other}"),
                })
            }
        }
    }

    // the per-block payloads sit between the headers and the main data
    let headers_end = cursor.position() as usize;
    let main_start = headers_end + (datatotal - main_data_len);
    if main_start + main_data_len > payload.len() {
        return Err(WalError::ShortRead {
            expected: main_start + main_data_len,
            got: payload.len(),
        });
    }
    let main_data = payload[main_start..main_start + main_data_len].to_vec();

    Ok(DecodedRecord {
        lsn,
        header,
        blocks,
        main_data,
    })
}

#[cfg(test)]
pub(crate) mod testenc {
    //! Record encoder used by the reader and rmgr tests: builds records the
    //! decoder must accept, including the CRC.

    use super::*;

    pub struct TestBlock {
        pub key: ForkKey,
        pub block: u32,
        pub data: Vec<u8>,
    }

    /// Encode a record with the given rmgr, info, blocks and main data.
    pub fn encode_record(
        rmid: u8,
        info: u8,
        xid: u32,
        prev: Lsn,
        blocks: &[TestBlock],
        main_data: &[u8],
    ) -> Vec<u8> {
        let mut payload = Vec::new();
        for (i, block) in blocks.iter().enumerate() {
            payload.push(i as u8);
            let mut fork_flags = block.key.fork as u8;
            if !block.data.is_empty() {
                fork_flags |= BKPBLOCK_HAS_DATA;
            }
            payload.push(fork_flags);
            payload.extend_from_slice(&(block.data.len() as u16).to_le_bytes());
            payload.extend_from_slice(&block.key.spc_oid.to_le_bytes());
            payload.extend_from_slice(&block.key.db_oid.to_le_bytes());
            payload.extend_from_slice(&block.key.rel_oid.to_le_bytes());
            payload.extend_from_slice(&block.block.to_le_bytes());
        }
        if !main_data.is_empty() {
            if main_data.len() <= u8::MAX as usize {
                payload.push(BLOCK_ID_DATA_SHORT);
                payload.push(main_data.len() as u8);
            } else {
                payload.push(BLOCK_ID_DATA_LONG);
                payload.extend_from_slice(&(main_data.len() as u32).to_le_bytes());
            }
        }
        for block in blocks {
            payload.extend_from_slice(&block.data);
        }
        payload.extend_from_slice(main_data);

        let total_len = (RECORD_HEADER_LEN + payload.len()) as u32;
        let mut header = Vec::with_capacity(RECORD_HEADER_LEN);
        header.extend_from_slice(&total_len.to_le_bytes());
        header.extend_from_slice(&xid.to_le_bytes());
        header.extend_from_slice(&prev.0.to_le_bytes());
        header.push(info);
        header.push(rmid);
        header.extend_from_slice(&0u16.to_le_bytes());

        let mut crc = Crc32c::new();
        crc.update(&payload);
        crc.update(&header);
        header.extend_from_slice(&crc.finalize().to_le_bytes());

        let mut record = header;
        record.extend_from_slice(&payload);
        record
    }
}
