//! Database resource manager. The record layout changed in major version
//! 17; both variants are maintained until the earlier series reaches end
//! of life.

use crate::record::DecodedRecord;
use crate::rm_util::{raw_info, Fields};

// version >= 17
const XLOG_DBASE_CREATE_FILE_COPY: u8 = 0x00;
const XLOG_DBASE_CREATE_WAL_LOG: u8 = 0x10;
const XLOG_DBASE_DROP_V17: u8 = 0x20;

// earlier series
const XLOG_DBASE_CREATE: u8 = 0x00;
const XLOG_DBASE_DROP: u8 = 0x10;

pub(crate) fn describe(record: &DecodedRecord, server_version: u32) -> String {
    if server_version >= 17 {
        describe_v17(record)
    } else {
        describe_legacy(record)
    }
}

fn describe_v17(record: &DecodedRecord) -> String {
    let info = record.rm_info();
    let mut fields = Fields::new(&record.main_data);
    match info {
        XLOG_DBASE_CREATE_FILE_COPY => {
            // xl_dbase_create_file_copy_rec
            let db = fields.u32();
            let spc = fields.u32();
            let src_db = fields.u32();
            let src_spc = fields.u32();
            match (db, spc, src_db, src_spc) {
                (Some(db), Some(spc), Some(src_db), Some(src_spc)) => {
                    format!("copy dir {src_spc}/{src_db} to {spc}/{db}")
                }
                _ => raw_info(info),
            }
        }
        XLOG_DBASE_CREATE_WAL_LOG => {
            let db = fields.u32();
            let spc = fields.u32();
            match (db, spc) {
                (Some(db), Some(spc)) => format!("create dir {spc}/{db}"),
                _ => raw_info(info),
            }
        }
        XLOG_DBASE_DROP_V17 => describe_drop(&mut fields, info),
        other => raw_info(other),
    }
}

fn describe_legacy(record: &DecodedRecord) -> String {
    let info = record.rm_info();
    let mut fields = Fields::new(&record.main_data);
    match info {
        XLOG_DBASE_CREATE => {
            let db = fields.u32();
            let spc = fields.u32();
            let src_db = fields.u32();
            let src_spc = fields.u32();
            match (db, spc, src_db, src_spc) {
                (Some(db), Some(spc), Some(src_db), Some(src_spc)) => {
                    format!("copy dir {src_spc}/{src_db} to {spc}/{db}")
                }
                _ => raw_info(info),
            }
        }
        XLOG_DBASE_DROP => describe_drop(&mut fields, info),
        other => raw_info(other),
    }
}

/// xl_dbase_drop_rec: db oid, tablespace count, then the flexible
/// tablespace id array, parsed to a typed list before formatting.
fn describe_drop(fields: &mut Fields, info: u8) -> String {
    let db = match fields.u32() {
        Some(db) => db,
        None => return raw_info(info),
    };
    let count = match fields.i32() {
        Some(count) if count >= 0 => count as usize,
        _ => return raw_info(info),
    };
    let mut tablespaces = Vec::with_capacity(count);
    for _ in 0..count {
        match fields.u32() {
            Some(spc) => tablespaces.push(spc),
            None => return raw_info(info),
        }
    }
    let mut line = "dir".to_string();
    for spc in tablespaces {
        line.push_str(&format!(" {spc}/{db}"));
    }
    line
}
