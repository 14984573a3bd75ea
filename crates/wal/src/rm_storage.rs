//! Storage-adjacent resource managers: Storage (smgr), CLOG, Tablespace
//! and RelMap.

use crate::record::DecodedRecord;
use crate::rm_util::{raw_info, Fields};

const XLOG_SMGR_CREATE: u8 = 0x10;
const XLOG_SMGR_TRUNCATE: u8 = 0x20;

pub(crate) fn describe_smgr(record: &DecodedRecord, _server_version: u32) -> String {
    let info = record.rm_info();
    let mut fields = Fields::new(&record.main_data);
    match info {
        XLOG_SMGR_CREATE => {
            // xl_smgr_create: RelFileLocator + fork number
            let spc = fields.u32();
            let db = fields.u32();
            let rel = fields.u32();
            let fork = fields.i32();
            match (spc, db, rel, fork) {
                (Some(spc), Some(db), Some(rel), Some(fork)) => {
                    format!("create rel {spc}/{db}/{rel} fork {fork}")
                }
                _ => raw_info(info),
            }
        }
        XLOG_SMGR_TRUNCATE => {
            // xl_smgr_truncate: block count, RelFileLocator, flags
            let blkno = fields.u32();
            let spc = fields.u32();
            let db = fields.u32();
            let rel = fields.u32();
            match (blkno, spc, db, rel) {
                (Some(blkno), Some(spc), Some(db), Some(rel)) => {
                    format!("truncate rel {spc}/{db}/{rel} to {blkno} blocks")
                }
                _ => raw_info(info),
            }
        }
        other => raw_info(other),
    }
}

const CLOG_ZEROPAGE: u8 = 0x00;
const CLOG_TRUNCATE: u8 = 0x10;

pub(crate) fn describe_clog(record: &DecodedRecord, server_version: u32) -> String {
    let info = record.rm_info();
    let mut fields = Fields::new(&record.main_data);
    // page numbers widened to 64 bits in major version 17
    let page = |fields: &mut Fields| -> Option<i64> {
        if server_version >= 17 {
            fields.i64()
        } else {
            fields.i32().map(i64::from)
        }
    };
    match info {
        CLOG_ZEROPAGE => match page(&mut fields) {
            Some(page) => format!("zero page {page}"),
            None => raw_info(info),
        },
        CLOG_TRUNCATE => {
            let page = page(&mut fields);
            let oldest_xact = fields.u32();
            match (page, oldest_xact) {
                (Some(page), Some(oldest)) => {
                    format!("truncate before page {page}, oldest running {oldest}")
                }
                _ => raw_info(info),
            }
        }
        other => raw_info(other),
    }
}

const TBLSPC_CREATE: u8 = 0x00;
const TBLSPC_DROP: u8 = 0x10;

pub(crate) fn describe_tablespace(record: &DecodedRecord, _server_version: u32) -> String {
    let info = record.rm_info();
    let mut fields = Fields::new(&record.main_data);
    match info {
        TBLSPC_CREATE => {
            // xl_tblspc_create_rec: oid then the location path
            let oid = fields.u32();
            let path = fields.cstr();
            match (oid, path) {
                (Some(oid), Some(path)) => format!("create tablespace {oid} at {path}"),
                (Some(oid), None) => format!("create tablespace {oid}"),
                _ => raw_info(info),
            }
        }
        TBLSPC_DROP => match fields.u32() {
            Some(oid) => format!("drop tablespace {oid}"),
            None => raw_info(info),
        },
        other => raw_info(other),
    }
}

const RELMAP_UPDATE: u8 = 0x00;

pub(crate) fn describe_relmap(record: &DecodedRecord, _server_version: u32) -> String {
    let info = record.rm_info();
    let mut fields = Fields::new(&record.main_data);
    match info {
        RELMAP_UPDATE => {
            // xl_relmap_update: database, tablespace, payload length,
            // then the opaque map bytes
            let db = fields.u32();
            let spc = fields.u32();
            let nbytes = fields.i32();
            match (db, spc, nbytes) {
                (Some(db), Some(spc), Some(nbytes)) => {
                    format!("update relmap {spc}/{db} ({nbytes} bytes)")
                }
                _ => raw_info(info),
            }
        }
        other => raw_info(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::testenc::encode_record;
    use crate::record::RecordHeader;
    use crate::rmgr::{RM_CLOG_ID, RM_SMGR_ID, RM_TBLSPC_ID};
    use vault_core::Lsn;

    fn record(rmid: u8, info: u8, main: &[u8]) -> DecodedRecord {
        let raw = encode_record(rmid, info, 0, Lsn(0), &[], main);
        let header = RecordHeader::parse(&raw).unwrap();
        crate::record::decode(Lsn(0), header, &raw).unwrap()
    }

    #[test]
    fn test_smgr_create() {
        let mut main = Vec::new();
        for v in [1663u32, 5, 16384] {
            main.extend_from_slice(&v.to_le_bytes());
        }
        main.extend_from_slice(&0i32.to_le_bytes());
        assert_eq!(
            describe_smgr(&record(RM_SMGR_ID, XLOG_SMGR_CREATE, &main), 17),
            "create rel 1663/5/16384 fork 0"
        );
    }

    #[test]
    fn test_clog_page_width_gated_by_version() {
        // v17 reads an i64 page number
        let main64 = 70_000i64.to_le_bytes();
        assert_eq!(
            describe_clog(&record(RM_CLOG_ID, CLOG_ZEROPAGE, &main64), 17),
            "zero page 70000"
        );
        // v16 reads an i32
        let main32 = 70_000i32.to_le_bytes();
        assert_eq!(
            describe_clog(&record(RM_CLOG_ID, CLOG_ZEROPAGE, &main32), 16),
            "zero page 70000"
        );
    }

    #[test]
    fn test_tablespace_create_path() {
        let mut main = Vec::new();
        main.extend_from_slice(&9999u32.to_le_bytes());
        main.extend_from_slice(b"/mnt/fast\0");
        assert_eq!(
            describe_tablespace(&record(RM_TBLSPC_ID, TBLSPC_CREATE, &main), 17),
            "create tablespace 9999 at /mnt/fast"
        );
    }
}
