//! Standby resource manager: lock and running-transaction records shipped
//! to hot standbys.

use crate::record::DecodedRecord;
use crate::rm_util::{raw_info, Fields};

const XLOG_STANDBY_LOCK: u8 = 0x00;
const XLOG_RUNNING_XACTS: u8 = 0x10;
const XLOG_INVALIDATIONS: u8 = 0x20;

pub(crate) fn describe(record: &DecodedRecord, _server_version: u32) -> String {
    let info = record.rm_info();
    let mut fields = Fields::new(&record.main_data);
    match info {
        XLOG_STANDBY_LOCK => {
            // xl_standby_locks: nlocks then the lock array
            let nlocks = match fields.i32() {
                Some(n) if n >= 0 => n as usize,
                _ => return raw_info(info),
            };
            let mut line = format!("{nlocks} locks:");
            for _ in 0..nlocks {
                let xid = fields.u32();
                let db = fields.u32();
                let rel = fields.u32();
                match (xid, db, rel) {
                    (Some(xid), Some(db), Some(rel)) => {
                        line.push_str(&format!(" xid {xid} db {db} rel {rel}"));
                    }
                    _ => return raw_info(info),
                }
            }
            line
        }
        XLOG_RUNNING_XACTS => {
            // xl_running_xacts header fields
            let xcnt = fields.i32();
            let subxcnt = fields.i32();
            let overflowed = fields.u8();
            match (xcnt, subxcnt, overflowed) {
                (Some(xcnt), Some(subxcnt), Some(overflowed)) => format!(
                    "running xacts {xcnt} (+{subxcnt} sub){}",
                    if overflowed != 0 { ", overflowed" } else { "" }
                ),
                _ => raw_info(info),
            }
        }
        XLOG_INVALIDATIONS => match fields.i32() {
            Some(nmsgs) => format!("invalidations {nmsgs}"),
            None => raw_info(info),
        },
        other => raw_info(other),
    }
}
