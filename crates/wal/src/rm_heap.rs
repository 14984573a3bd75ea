//! Heap and Heap2 resource managers. These carry the bulk of a busy
//! cluster's WAL, so the describes stay terse: operation, offset, block.

use crate::record::DecodedRecord;
use crate::rm_util::{raw_info, Fields};

const XLOG_HEAP_OPMASK: u8 = 0x70;

const XLOG_HEAP_INSERT: u8 = 0x00;
const XLOG_HEAP_DELETE: u8 = 0x10;
const XLOG_HEAP_UPDATE: u8 = 0x20;
const XLOG_HEAP_TRUNCATE: u8 = 0x30;
const XLOG_HEAP_HOT_UPDATE: u8 = 0x40;
const XLOG_HEAP_CONFIRM: u8 = 0x50;
const XLOG_HEAP_LOCK: u8 = 0x60;
const XLOG_HEAP_INPLACE: u8 = 0x70;

fn block_suffix(record: &DecodedRecord) -> String {
    match record.blocks.first() {
        Some(block) => format!(" blk {}", block.block),
        None => String::new(),
    }
}

pub(crate) fn describe_heap(record: &DecodedRecord, _server_version: u32) -> String {
    let info = record.rm_info() & XLOG_HEAP_OPMASK;
    let mut fields = Fields::new(&record.main_data);
    let suffix = block_suffix(record);
    match info {
        XLOG_HEAP_INSERT => {
            // xl_heap_insert: offset number, flags
            match fields.u16() {
                Some(offnum) => format!("insert off {offnum}{suffix}"),
                None => raw_info(info),
            }
        }
        XLOG_HEAP_DELETE => match fields.u16() {
            Some(offnum) => format!("delete off {offnum}{suffix}"),
            None => raw_info(info),
        },
        XLOG_HEAP_UPDATE | XLOG_HEAP_HOT_UPDATE => {
            // xl_heap_update: old offset, old xmax, flags, new offset...
            let kind = if info == XLOG_HEAP_UPDATE { "update" } else { "hot update" };
            let old_off = fields.u16();
            let _old_xmax = fields.u32();
            let _flags = fields.u8();
            let new_off = fields.u16();
            match (old_off, new_off) {
                (Some(old_off), Some(new_off)) => {
                    format!("{kind} off {old_off} to {new_off}{suffix}")
                }
                _ => raw_info(info),
            }
        }
        XLOG_HEAP_TRUNCATE => {
            // xl_heap_truncate: database, relation count, flexible id array
            let _db = fields.u32();
            match fields.i32() {
                Some(nrelids) => format!("truncate {nrelids} relations"),
                None => raw_info(info),
            }
        }
        XLOG_HEAP_CONFIRM => match fields.u16() {
            Some(offnum) => format!("confirm off {offnum}{suffix}"),
            None => raw_info(info),
        },
        XLOG_HEAP_LOCK => {
            let _locking_xid = fields.u32();
            match fields.u16() {
                Some(offnum) => format!("lock off {offnum}{suffix}"),
                None => raw_info(info),
            }
        }
        XLOG_HEAP_INPLACE => match fields.u16() {
            Some(offnum) => format!("inplace off {offnum}{suffix}"),
            None => raw_info(info),
        },
        other => raw_info(other),
    }
}

const XLOG_HEAP2_REWRITE: u8 = 0x00;
const XLOG_HEAP2_PRUNE: u8 = 0x10;
const XLOG_HEAP2_VACUUM: u8 = 0x20;
const XLOG_HEAP2_FREEZE_PAGE: u8 = 0x30;
const XLOG_HEAP2_VISIBLE: u8 = 0x40;
const XLOG_HEAP2_MULTI_INSERT: u8 = 0x50;
const XLOG_HEAP2_LOCK_UPDATED: u8 = 0x60;
const XLOG_HEAP2_NEW_CID: u8 = 0x70;

pub(crate) fn describe_heap2(record: &DecodedRecord, _server_version: u32) -> String {
    let info = record.rm_info() & XLOG_HEAP_OPMASK;
    let mut fields = Fields::new(&record.main_data);
    let suffix = block_suffix(record);
    match info {
        XLOG_HEAP2_REWRITE => "rewrite".to_string(),
        XLOG_HEAP2_PRUNE => {
            // xl_heap_prune: latest removed xid, redirected/dead counts
            let _latest_removed = fields.u32();
            let nredirected = fields.u16();
            let ndead = fields.u16();
            match (nredirected, ndead) {
                (Some(nredirected), Some(ndead)) => {
                    format!("prune {nredirected} redirected, {ndead} dead{suffix}")
                }
                _ => raw_info(info),
            }
        }
        XLOG_HEAP2_VACUUM => match fields.u16() {
            Some(nunused) => format!("vacuum {nunused} unused{suffix}"),
            None => raw_info(info),
        },
        XLOG_HEAP2_FREEZE_PAGE => {
            let _cutoff = fields.u32();
            match fields.u16() {
                Some(ntuples) => format!("freeze {ntuples} tuples{suffix}"),
                None => raw_info(info),
            }
        }
        XLOG_HEAP2_VISIBLE => format!("visible{suffix}"),
        XLOG_HEAP2_MULTI_INSERT => match fields.u16() {
            Some(ntuples) => format!("multi-insert {ntuples} tuples{suffix}"),
            None => raw_info(info),
        },
        XLOG_HEAP2_LOCK_UPDATED => format!("lock updated{suffix}"),
        XLOG_HEAP2_NEW_CID => "new cid".to_string(),
        other => raw_info(other),
    }
}
