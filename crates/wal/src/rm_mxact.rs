//! MultiXact resource manager.

use crate::record::DecodedRecord;
use crate::rm_util::{raw_info, Fields};

const XLOG_MULTIXACT_ZERO_OFF_PAGE: u8 = 0x00;
const XLOG_MULTIXACT_ZERO_MEM_PAGE: u8 = 0x10;
const XLOG_MULTIXACT_CREATE_ID: u8 = 0x20;
const XLOG_MULTIXACT_TRUNCATE_ID: u8 = 0x30;

/// One member of a multixact, parsed out of the record's flexible array.
#[derive(Debug, PartialEq, Eq)]
struct Member {
    xid: u32,
    status: u32,
}

pub(crate) fn describe(record: &DecodedRecord, server_version: u32) -> String {
    let info = record.rm_info();
    let mut fields = Fields::new(&record.main_data);
    // offset/member page numbers widened to 64 bits in major version 17
    let page = |fields: &mut Fields| -> Option<i64> {
        if server_version >= 17 {
            fields.i64()
        } else {
            fields.i32().map(i64::from)
        }
    };
    match info {
        XLOG_MULTIXACT_ZERO_OFF_PAGE => match page(&mut fields) {
            Some(page) => format!("zero offsets page {page}"),
            None => raw_info(info),
        },
        XLOG_MULTIXACT_ZERO_MEM_PAGE => match page(&mut fields) {
            Some(page) => format!("zero members page {page}"),
            None => raw_info(info),
        },
        XLOG_MULTIXACT_CREATE_ID => {
            // xl_multixact_create: mid, moff, nmembers, then the members
            let mid = fields.u32();
            let moff = fields.u32();
            let nmembers = fields.i32();
            let (mid, moff, nmembers) = match (mid, moff, nmembers) {
                (Some(a), Some(b), Some(c)) if c >= 0 => (a, b, c as usize),
                _ => return raw_info(info),
            };
            let mut members = Vec::with_capacity(nmembers);
            for _ in 0..nmembers {
                match (fields.u32(), fields.u32()) {
                    (Some(xid), Some(status)) => members.push(Member { xid, status }),
                    _ => return raw_info(info),
                }
            }
            let mut line = format!("create mxid {mid} offset {moff} nmembers {nmembers}:");
            for member in members {
                line.push_str(&format!(" {}(status {})", member.xid, member.status));
            }
            line
        }
        XLOG_MULTIXACT_TRUNCATE_ID => {
            let oldest = fields.u32();
            match oldest {
                Some(oldest) => format!("truncate before mxid {oldest}"),
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
    use crate::rmgr::RM_MULTIXACT_ID;
    use vault_core::Lsn;

    fn record(info: u8, main: &[u8]) -> DecodedRecord {
        let raw = encode_record(RM_MULTIXACT_ID, info, 0, Lsn(0), &[], main);
        let header = RecordHeader::parse(&raw).unwrap();
        crate::record::decode(Lsn(0), header, &raw).unwrap()
    }

    #[test]
    fn test_create_parses_flexible_member_array() {
        let mut main = Vec::new();
        main.extend_from_slice(&88u32.to_le_bytes());
        main.extend_from_slice(&100u32.to_le_bytes());
        main.extend_from_slice(&2i32.to_le_bytes());
        for (xid, status) in [(900u32, 3u32), (901, 2)] {
            main.extend_from_slice(&xid.to_le_bytes());
            main.extend_from_slice(&status.to_le_bytes());
        }
        assert_eq!(
            describe(&record(XLOG_MULTIXACT_CREATE_ID, &main), 17),
            "create mxid 88 offset 100 nmembers 2: 900(status 3) 901(status 2)"
        );
    }

    #[test]
    fn test_truncated_member_array_degrades() {
        let mut main = Vec::new();
        main.extend_from_slice(&88u32.to_le_bytes());
        main.extend_from_slice(&100u32.to_le_bytes());
        main.extend_from_slice(&5i32.to_le_bytes()); // promises five members
        assert_eq!(
            describe(&record(XLOG_MULTIXACT_CREATE_ID, &main), 17),
            "info 0x20"
        );
    }

    #[test]
    fn test_page_width_gating() {
        let main = 12i64.to_le_bytes();
        assert_eq!(
            describe(&record(XLOG_MULTIXACT_ZERO_OFF_PAGE, &main), 17),
            "zero offsets page 12"
        );
        let main = 12i32.to_le_bytes();
        assert_eq!(
            describe(&record(XLOG_MULTIXACT_ZERO_OFF_PAGE, &main), 16),
            "zero offsets page 12"
        );
    }
}
