//! Page- and segment-aware record framing.
//!
//! WAL segments are a run of 8 KiB pages, each with its own header; records
//! are 8-byte aligned and may continue across page and segment boundaries.
//! The reader reassembles full records, verifies their CRC, and hands them
//! to a callback. Framing state survives between segments so a record whose
//! payload spans a segment boundary decodes exactly once.

use crate::error::WalError;
use crate::record::{self, DecodedRecord, RecordHeader, RECORD_HEADER_LEN};
use byteorder::{LittleEndian, ReadBytesExt};
use tracing::{debug, warn};
use vault_core::Lsn;

/// WAL page size.
pub const PAGE_SIZE: usize = 8192;

/// Default segment size (16 MiB).
pub const DEFAULT_SEGMENT_SIZE: u64 = 16 * 1024 * 1024;

/// Record alignment within pages.
const ALIGN: usize = 8;

/// Page magics by upstream major version.
const PAGE_MAGICS: &[(u16, u32)] = &[(0xD110, 15), (0xD113, 16), (0xD116, 17)];

const XLP_FIRST_IS_CONTRECORD: u16 = 0x0001;
const XLP_LONG_HEADER: u16 = 0x0002;

const SHORT_PAGE_HEADER_LEN: usize = 24;
const LONG_PAGE_HEADER_LEN: usize = 40;

fn align_up(v: usize) -> usize {
    (v + ALIGN - 1) & !(ALIGN - 1)
}

/// Reader configuration.
#[derive(Debug, Clone)]
pub struct WalReaderOptions {
    /// Upstream major version; gates page magic acceptance and rmgr parsing
    pub server_version: u32,
    /// Skip CRC-failed records with a warning instead of failing; used by
    /// best-effort summarisation
    pub best_effort: bool,
    /// Segment size in bytes
    pub segment_size: u64,
}

impl Default for WalReaderOptions {
    fn default() -> Self {
        WalReaderOptions {
            server_version: 17,
            best_effort: false,
            segment_size: DEFAULT_SEGMENT_SIZE,
        }
    }
}

struct PageHeader {
    magic: u16,
    info: u16,
    _timeline: u32,
    pageaddr: u64,
    rem_len: u32,
    header_len: usize,
}

fn parse_page_header(page: &[u8], at: Lsn) -> Result<PageHeader, WalError> {
    if page.len() < SHORT_PAGE_HEADER_LEN {
        return Err(WalError::ShortRead {
            expected: SHORT_PAGE_HEADER_LEN,
            got: page.len(),
        });
    }
    let mut cursor = std::io::Cursor::new(page);
    let magic = cursor.read_u16::<LittleEndian>()?;
    let info = cursor.read_u16::<LittleEndian>()?;
    let timeline = cursor.read_u32::<LittleEndian>()?;
    let pageaddr = cursor.read_u64::<LittleEndian>()?;
    let rem_len = cursor.read_u32::<LittleEndian>()?;
    // 4 bytes padding follow, then the long-header extension if present
    let header_len = if info & XLP_LONG_HEADER != 0 {
        LONG_PAGE_HEADER_LEN
    } else {
        SHORT_PAGE_HEADER_LEN
    };
    if !PAGE_MAGICS.iter().any(|&(m, _)| m == magic) {
        return Err(WalError::BadMagic { got: magic, lsn: at });
    }
    Ok(PageHeader {
        magic,
        info,
        _timeline: timeline,
        pageaddr,
        rem_len,
        header_len,
    })
}

struct Partial {
    lsn: Lsn,
    bytes: Vec<u8>,
    total_len: usize,
}

/// Streaming record reader.
pub struct WalReader {
    options: WalReaderOptions,
    partial: Option<Partial>,
    /// Set once the reader hits zeroed WAL (end of valid stream).
    end_of_wal: bool,
    skipped_bad_crc: usize,
}

impl WalReader {
    /// New reader with the given options.
    pub fn new(options: WalReaderOptions) -> Self {
        WalReader {
            options,
            partial: None,
            end_of_wal: false,
            skipped_bad_crc: 0,
        }
    }

    /// Number of records skipped in best-effort mode.
    pub fn skipped(&self) -> usize {
        self.skipped_bad_crc
    }

    /// Whether the reader reached zeroed (unwritten) WAL.
    pub fn at_end_of_wal(&self) -> bool {
        self.end_of_wal
    }

    /// Feed one whole segment. `segment_start` is the LSN of its first byte.
    pub fn feed_segment<F>(
        &mut self,
        segment: &[u8],
        segment_start: Lsn,
        mut on_record: F,
    ) -> Result<(), WalError>
    where
        F: FnMut(DecodedRecord),
    {
        if self.end_of_wal {
            return Ok(());
        }
        let page_count = segment.len() / PAGE_SIZE;
        for page_index in 0..page_count {
            let page_offset = page_index * PAGE_SIZE;
            let page = &segment[page_offset..page_offset + PAGE_SIZE];
            let page_addr = Lsn(segment_start.0 + page_offset as u64);

            // an entirely zeroed page means the stream ends here
            if page.iter().all(|&b| b == 0) {
                self.end_of_wal = true;
                return Ok(());
            }

            let header = parse_page_header(page, page_addr)?;
            if header.pageaddr != page_addr.0 {
                return Err(WalError::Malformed {
                    lsn: page_addr,
                    detail: format!(
                        "page address 0x{:X} does not match position",
                        header.pageaddr
                    ),
                });
            }
            self.check_version(header.magic, page_addr);

            let mut pos = header.header_len;

            // continuation of a record started on an earlier page
            if let Some(partial) = self.partial.as_mut() {
                if header.info & XLP_FIRST_IS_CONTRECORD == 0 {
                    let lsn = partial.lsn;
                    self.partial = None;
                    return Err(WalError::Malformed {
                        lsn,
                        detail: "expected continuation page".to_string(),
                    });
                }
                let missing = partial.total_len - partial.bytes.len();
                if header.rem_len as usize != missing {
                    let lsn = partial.lsn;
                    self.partial = None;
                    return Err(WalError::Malformed {
                        lsn,
                        detail: format!(
                            "continuation length {} disagrees with missing {missing}",
                            header.rem_len
                        ),
                    });
                }
                let take = missing.min(PAGE_SIZE - pos);
                partial.bytes.extend_from_slice(&page[pos..pos + take]);
                pos += take;
                if partial.bytes.len() == partial.total_len {
                    let partial = self.partial.take().expect("checked above");
                    self.emit(partial.lsn, &partial.bytes, &mut on_record)?;
                    pos = align_up(pos);
                } else {
                    // record continues on the next page as well
                    continue;
                }
            } else if header.info & XLP_FIRST_IS_CONTRECORD != 0 {
                // we joined mid-record (start LSN inside a record); skip the
                // leftover continuation bytes
                let skip = (header.rem_len as usize).min(PAGE_SIZE - pos);
                pos = align_up(pos + skip);
            }

            // whole records on this page
            while pos + 4 <= PAGE_SIZE {
                let avail = PAGE_SIZE - pos;
                let total_len = u32::from_le_bytes([
                    page[pos],
                    page[pos + 1],
                    page[pos + 2],
                    page[pos + 3],
                ]) as usize;
                if total_len == 0 {
                    self.end_of_wal = true;
                    return Ok(());
                }
                let record_lsn = Lsn(page_addr.0 + pos as u64);
                if total_len < RECORD_HEADER_LEN {
                    return Err(WalError::Malformed {
                        lsn: record_lsn,
                        detail: format!("record length {total_len} below header size"),
                    });
                }
                if total_len <= avail {
                    let raw = &page[pos..pos + total_len];
                    self.emit(record_lsn, raw, &mut on_record)?;
                    pos = align_up(pos + total_len);
                } else {
                    // header or payload spans into the next page
                    self.partial = Some(Partial {
                        lsn: record_lsn,
                        bytes: page[pos..PAGE_SIZE].to_vec(),
                        total_len,
                    });
                    break;
                }
            }
        }
        Ok(())
    }

    /// Whether a record is still being reassembled.
    pub fn has_partial(&self) -> bool {
        self.partial.is_some()
    }

    fn check_version(&self, magic: u16, at: Lsn) {
        if let Some(&(_, version)) = PAGE_MAGICS.iter().find(|&&(m, _)| m == magic) {
            if version != self.options.server_version {
                debug!(
                    page_version = version,
                    configured = self.options.server_version,
                    lsn = %at,
                    "page magic from a different major version"
                );
            }
        }
    }

    fn emit<F>(&mut self, lsn: Lsn, raw: &[u8], on_record: &mut F) -> Result<(), WalError>
    where
        F: FnMut(DecodedRecord),
    {
        let header = RecordHeader::parse(raw)?;
        if let Err(err) = record::verify_crc(lsn, &header, raw) {
            if self.options.best_effort {
                warn!(lsn = %lsn, "skipping record with CRC mismatch");
                self.skipped_bad_crc += 1;
                return Ok(());
            }
            return Err(err);
        }
        let decoded = record::decode(lsn, header, raw)?;
        on_record(decoded);
        Ok(())
    }
}

/// Upstream segment file name: timeline, log id, segment index, hex.
pub fn segment_file_name(timeline: u32, lsn: Lsn, segment_size: u64) -> String {
    let segno = lsn.0 / segment_size;
    let segments_per_log = 0x1_0000_0000 / segment_size;
    format!(
        "{:08X}{:08X}{:08X}",
        timeline,
        segno / segments_per_log,
        segno % segments_per_log
    )
}


#[cfg(test)]
mod tests {
    use super::testseg::build_segments;
    use super::*;
    use crate::record::testenc::{encode_record, TestBlock};
    use crate::rmgr;
    use crate::brt::ForkKey;

    fn read_all(segments: &[Vec<u8>], start: Lsn, options: WalReaderOptions) -> Vec<DecodedRecord> {
        let mut reader = WalReader::new(options);
        let mut out = Vec::new();
        let mut addr = start.0;
        for segment in segments {
            reader
                .feed_segment(segment, Lsn(addr), |r| out.push(r))
                .unwrap();
            addr += segment.len() as u64;
        }
        out
    }

    fn small_record(tag: u8) -> Vec<u8> {
        encode_record(
            rmgr::RM_XLOG_ID,
            0,
            tag as u32,
            Lsn(0),
            &[],
            &vec![tag; 32],
        )
    }

    #[test]
    fn test_single_page_records() {
        let records = vec![small_record(1), small_record(2), small_record(3)];
        let segments = build_segments(&records, Lsn(0), PAGE_SIZE * 4);
        let out = read_all(&segments, Lsn(0), WalReaderOptions::default());
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].header.xid, 1);
        assert_eq!(out[2].header.xid, 3);
        assert_eq!(out[0].main_data, vec![1u8; 32]);
    }

    #[test]
    fn test_record_spans_page_boundary() {
        // payload longer than a page forces continuation, and the second
        // record lands after it
        let big = encode_record(
            rmgr::RM_XLOG_ID,
            0,
            7,
            Lsn(0),
            &[],
            &vec![0xAAu8; PAGE_SIZE + 500],
        );
        let records = vec![big, small_record(9)];
        let segments = build_segments(&records, Lsn(0), PAGE_SIZE * 8);
        let out = read_all(&segments, Lsn(0), WalReaderOptions::default());
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].main_data.len(), PAGE_SIZE + 500);
        assert!(out[0].main_data.iter().all(|&b| b == 0xAA));
        assert_eq!(out[1].header.xid, 9);
    }

    #[test]
    fn test_record_header_spans_page_boundary() {
        // size the first record so the next one starts with 16 bytes left
        // on the page: its 24-byte header is split across the boundary
        let first_total = (PAGE_SIZE - LONG_PAGE_HEADER_LEN) - 16;
        let main_len = first_total - RECORD_HEADER_LEN - 5; // long data header
        let first = encode_record(rmgr::RM_XLOG_ID, 0, 1, Lsn(0), &[], &vec![0x11u8; main_len]);
        assert_eq!(first.len(), first_total);
        let records = vec![first, small_record(2)];
        let segments = build_segments(&records, Lsn(0), PAGE_SIZE * 4);

        let out = read_all(&segments, Lsn(0), WalReaderOptions::default());
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].header.xid, 2);
        assert_eq!(out[1].main_data, vec![2u8; 32]);
    }

    #[test]
    fn test_record_spans_segment_boundary() {
        let seg_size = PAGE_SIZE * 2;
        let big = encode_record(
            rmgr::RM_XLOG_ID,
            0,
            11,
            Lsn(0),
            &[],
            &vec![0x55u8; seg_size],
        );
        let records = vec![big, small_record(12)];
        let segments = build_segments(&records, Lsn(0), seg_size);
        assert!(segments.len() >= 2);
        let out = read_all(&segments, Lsn(0), WalReaderOptions::default());
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].main_data.len(), seg_size);
        assert_eq!(out[1].header.xid, 12);
    }

    #[test]
    fn test_bad_crc_fatal_by_default() {
        let mut record = small_record(1);
        let last = record.len() - 1;
        record[last] ^= 0xFF;
        let segments = build_segments(&[record], Lsn(0), PAGE_SIZE * 2);

        let mut reader = WalReader::new(WalReaderOptions::default());
        let err = reader.feed_segment(&segments[0], Lsn(0), |_| {}).unwrap_err();
        assert!(matches!(err, WalError::BadCrc { .. }));
    }

    #[test]
    fn test_bad_crc_skipped_in_best_effort() {
        let mut bad = small_record(1);
        let last = bad.len() - 1;
        bad[last] ^= 0xFF;
        let records = vec![bad, small_record(2)];
        let segments = build_segments(&records, Lsn(0), PAGE_SIZE * 2);

        let options = WalReaderOptions {
            best_effort: true,
            ..WalReaderOptions::default()
        };
        let mut reader = WalReader::new(options);
        let mut out = Vec::new();
        reader
            .feed_segment(&segments[0], Lsn(0), |r| out.push(r))
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].header.xid, 2);
        assert_eq!(reader.skipped(), 1);
    }

    #[test]
    fn test_zeroed_tail_ends_stream() {
        let records = vec![small_record(1)];
        let segments = build_segments(&records, Lsn(0), PAGE_SIZE * 4);
        let mut reader = WalReader::new(WalReaderOptions::default());
        let mut count = 0;
        reader
            .feed_segment(&segments[0], Lsn(0), |_| count += 1)
            .unwrap();
        assert_eq!(count, 1);
        assert!(reader.at_end_of_wal());
    }

    #[test]
    fn test_block_refs_survive_framing() {
        let record = encode_record(
            rmgr::RM_HEAP_ID,
            0,
            5,
            Lsn(0),
            &[TestBlock {
                key: ForkKey::main(1663, 16384, 1234),
                block: 0,
                data: vec![1, 2, 3, 4],
            }],
            b"",
        );
        let segments = build_segments(&[record], Lsn(0), PAGE_SIZE * 2);
        let out = read_all(&segments, Lsn(0), WalReaderOptions::default());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].blocks.len(), 1);
        assert_eq!(out[0].blocks[0].key, ForkKey::main(1663, 16384, 1234));
    }

    #[test]
    fn test_bad_page_magic() {
        let records = vec![small_record(1)];
        let mut segments = build_segments(&records, Lsn(0), PAGE_SIZE * 2);
        segments[0][0] = 0x00;
        segments[0][1] = 0x00;
        let mut reader = WalReader::new(WalReaderOptions::default());
        let err = reader.feed_segment(&segments[0], Lsn(0), |_| {}).unwrap_err();
        assert!(matches!(err, WalError::BadMagic { .. }));
    }

    #[test]
    fn test_segment_file_name() {
        assert_eq!(
            segment_file_name(1, Lsn(0), DEFAULT_SEGMENT_SIZE),
            "000000010000000000000000"
        );
        assert_eq!(
            segment_file_name(1, Lsn(16 * 1024 * 1024), DEFAULT_SEGMENT_SIZE),
            "000000010000000000000001"
        );
        assert_eq!(
            segment_file_name(1, Lsn(0x1_0000_0000), DEFAULT_SEGMENT_SIZE),
            "000000010000000100000000"
        );
    }
}
