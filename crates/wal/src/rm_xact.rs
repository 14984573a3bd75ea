//! Transaction resource manager.

use crate::record::DecodedRecord;
use crate::rm_util::{raw_info, Fields};

const XLOG_XACT_COMMIT: u8 = 0x00;
const XLOG_XACT_PREPARE: u8 = 0x10;
const XLOG_XACT_ABORT: u8 = 0x20;
const XLOG_XACT_COMMIT_PREPARED: u8 = 0x30;
const XLOG_XACT_ABORT_PREPARED: u8 = 0x40;
const XLOG_XACT_ASSIGNMENT: u8 = 0x50;
const XLOG_XACT_INVALIDATIONS: u8 = 0x60;

/// Only the opcode bits; the high bit flags extra info in the payload.
const XLOG_XACT_OPMASK: u8 = 0x70;

pub(crate) fn describe(record: &DecodedRecord, _server_version: u32) -> String {
    let info = record.rm_info() & XLOG_XACT_OPMASK;
    let mut fields = Fields::new(&record.main_data);
    match info {
        XLOG_XACT_COMMIT | XLOG_XACT_COMMIT_PREPARED => {
            // both start with the commit timestamp
            let prepared = info == XLOG_XACT_COMMIT_PREPARED;
            match fields.i64() {
                Some(time) if prepared => format!("commit prepared {} at {time}", record.header.xid),
                Some(time) => format!("commit {} at {time}", record.header.xid),
                None => raw_info(info),
            }
        }
        XLOG_XACT_ABORT | XLOG_XACT_ABORT_PREPARED => {
            let prepared = info == XLOG_XACT_ABORT_PREPARED;
            match fields.i64() {
                Some(time) if prepared => format!("abort prepared {} at {time}", record.header.xid),
                Some(time) => format!("abort {} at {time}", record.header.xid),
                None => raw_info(info),
            }
        }
        XLOG_XACT_PREPARE => format!("prepare {}", record.header.xid),
        XLOG_XACT_ASSIGNMENT => match fields.u32() {
            Some(top) => format!("assignment top {top}"),
            None => raw_info(info),
        },
        XLOG_XACT_INVALIDATIONS => {
            // xl_xact_invals: nmsgs then the flexible message array,
            // parsed to a count before exposure
            match fields.i32() {
                Some(nmsgs) => format!("invalidations {nmsgs}"),
                None => raw_info(info),
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
    use crate::rmgr::RM_XACT_ID;
    use vault_core::Lsn;

    fn describe_main(info: u8, xid: u32, main: &[u8]) -> String {
        let raw = encode_record(RM_XACT_ID, info, xid, Lsn(0), &[], main);
        let header = RecordHeader::parse(&raw).unwrap();
        let record = crate::record::decode(Lsn(0), header, &raw).unwrap();
        describe(&record, 17)
    }

    #[test]
    fn test_commit() {
        let main = 1234567890i64.to_le_bytes();
        assert_eq!(
            describe_main(XLOG_XACT_COMMIT, 501, &main),
            "commit 501 at 1234567890"
        );
    }

    #[test]
    fn test_abort_prepared() {
        let main = 42i64.to_le_bytes();
        assert_eq!(
            describe_main(XLOG_XACT_ABORT_PREPARED, 7, &main),
            "abort prepared 7 at 42"
        );
    }

    #[test]
    fn test_invalidation_count() {
        let mut main = Vec::new();
        main.extend_from_slice(&3i32.to_le_bytes());
        main.extend_from_slice(&[0u8; 36]); // three opaque messages
        assert_eq!(
            describe_main(XLOG_XACT_INVALIDATIONS, 0, &main),
            "invalidations 3"
        );
    }
}
