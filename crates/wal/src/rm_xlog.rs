//! XLOG resource manager: checkpoints and engine-level control records.

use crate::record::DecodedRecord;
use crate::rm_util::{raw_info, Fields};
use vault_core::Lsn;

const XLOG_CHECKPOINT_SHUTDOWN: u8 = 0x00;
const XLOG_CHECKPOINT_ONLINE: u8 = 0x10;
const XLOG_NOOP: u8 = 0x20;
const XLOG_NEXTOID: u8 = 0x30;
const XLOG_SWITCH: u8 = 0x40;
const XLOG_BACKUP_END: u8 = 0x50;
const XLOG_PARAMETER_CHANGE: u8 = 0x60;
const XLOG_RESTORE_POINT: u8 = 0x70;
const XLOG_FPW_CHANGE: u8 = 0x80;
const XLOG_END_OF_RECOVERY: u8 = 0x90;
const XLOG_FPI_FOR_HINT: u8 = 0xA0;
const XLOG_FPI: u8 = 0xB0;
const XLOG_OVERWRITE_CONTRECORD: u8 = 0xC0;
/// Added in major version 17.
const XLOG_CHECKPOINT_REDO: u8 = 0xD0;

pub(crate) fn describe(record: &DecodedRecord, server_version: u32) -> String {
    let info = record.rm_info();
    let mut fields = Fields::new(&record.main_data);
    match info {
        XLOG_CHECKPOINT_SHUTDOWN | XLOG_CHECKPOINT_ONLINE => {
            // checkpoint starts with its redo LSN
            let redo = fields.u64().map(Lsn);
            let kind = if info == XLOG_CHECKPOINT_SHUTDOWN {
                "shutdown"
            } else {
                "online"
            };
            match redo {
                Some(redo) => format!("checkpoint {kind} redo {redo}"),
                None => format!("checkpoint {kind}"),
            }
        }
        XLOG_NOOP => "noop".to_string(),
        XLOG_NEXTOID => match fields.u32() {
            Some(oid) => format!("nextOid {oid}"),
            None => raw_info(info),
        },
        XLOG_SWITCH => "xlog switch".to_string(),
        XLOG_BACKUP_END => match fields.u64().map(Lsn) {
            Some(start) => format!("backup end, start {start}"),
            None => "backup end".to_string(),
        },
        XLOG_PARAMETER_CHANGE => "parameter change".to_string(),
        XLOG_RESTORE_POINT => match fields.i64() {
            Some(time) => format!("restore point at {time}"),
            None => "restore point".to_string(),
        },
        XLOG_FPW_CHANGE => match fields.u8() {
            Some(fpw) => format!("full_page_writes {}", fpw != 0),
            None => raw_info(info),
        },
        XLOG_END_OF_RECOVERY => "end of recovery".to_string(),
        XLOG_FPI_FOR_HINT => "full page image for hint".to_string(),
        XLOG_FPI => "full page image".to_string(),
        XLOG_OVERWRITE_CONTRECORD => "overwrite contrecord".to_string(),
        XLOG_CHECKPOINT_REDO if server_version >= 17 => "checkpoint redo".to_string(),
        other => raw_info(other),
    }
}
