//! CommitTs, ReplicationOrigin, Generic and LogicalMessage resource
//! managers.

use crate::record::DecodedRecord;
use crate::rm_util::{raw_info, Fields};
use vault_core::Lsn;

const COMMIT_TS_ZEROPAGE: u8 = 0x00;
const COMMIT_TS_TRUNCATE: u8 = 0x10;

pub(crate) fn describe_commit_ts(record: &DecodedRecord, server_version: u32) -> String {
    let info = record.rm_info();
    let mut fields = Fields::new(&record.main_data);
    let page = if server_version >= 17 {
        fields.i64()
    } else {
        fields.i32().map(i64::from)
    };
    match info {
        COMMIT_TS_ZEROPAGE => match page {
            Some(page) => format!("zero page {page}"),
            None => raw_info(info),
        },
        COMMIT_TS_TRUNCATE => match page {
            Some(page) => format!("truncate before page {page}"),
            None => raw_info(info),
        },
        other => raw_info(other),
    }
}

const REPLORIGIN_SET: u8 = 0x00;
const REPLORIGIN_DROP: u8 = 0x10;

pub(crate) fn describe_replorigin(record: &DecodedRecord, _server_version: u32) -> String {
    let info = record.rm_info();
    let mut fields = Fields::new(&record.main_data);
    match info {
        REPLORIGIN_SET => {
            // xl_replorigin_set: remote LSN, origin id
            let remote = fields.u64().map(Lsn);
            let origin = fields.u16();
            match (remote, origin) {
                (Some(remote), Some(origin)) => format!("set origin {origin} to {remote}"),
                _ => raw_info(info),
            }
        }
        REPLORIGIN_DROP => match fields.u16() {
            Some(origin) => format!("drop origin {origin}"),
            None => raw_info(info),
        },
        other => raw_info(other),
    }
}

pub(crate) fn describe_generic(record: &DecodedRecord, _server_version: u32) -> String {
    format!("data length {}", record.main_data.len())
}

const LOGICAL_MESSAGE: u8 = 0x00;

pub(crate) fn describe_logicalmsg(record: &DecodedRecord, _server_version: u32) -> String {
    let info = record.rm_info();
    let mut fields = Fields::new(&record.main_data);
    match info {
        LOGICAL_MESSAGE => {
            // xl_logical_message: db, transactional flag, prefix size,
            // message size, then prefix and payload
            let _db = fields.u32();
            let transactional = fields.u8();
            let _pad = (fields.u8(), fields.u16());
            let prefix_size = fields.u64();
            let message_size = fields.u64();
            let (transactional, prefix_size, message_size) =
                match (transactional, prefix_size, message_size) {
                    (Some(t), Some(p), Some(m)) => (t != 0, p as usize, m),
                    _ => return raw_info(info),
                };
            // prefix is a NUL-terminated string of prefix_size bytes
            let prefix = match fields.cstr() {
                Some(prefix) if prefix.len() + 1 == prefix_size => prefix,
                Some(prefix) => prefix,
                None => return raw_info(info),
            };
            format!(
                "{} message, prefix \"{prefix}\", {message_size} bytes",
                if transactional { "transactional" } else { "non-transactional" }
            )
        }
        other => raw_info(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::testenc::encode_record;
    use crate::record::RecordHeader;
    use crate::rmgr::{RM_LOGICALMSG_ID, RM_REPLORIGIN_ID};

    fn record(rmid: u8, info: u8, main: &[u8]) -> DecodedRecord {
        let raw = encode_record(rmid, info, 0, Lsn(0), &[], main);
        let header = RecordHeader::parse(&raw).unwrap();
        crate::record::decode(Lsn(0), header, &raw).unwrap()
    }

    #[test]
    fn test_replorigin_set() {
        let mut main = Vec::new();
        main.extend_from_slice(&0x3000u64.to_le_bytes());
        main.extend_from_slice(&4u16.to_le_bytes());
        assert_eq!(
            describe_replorigin(&record(RM_REPLORIGIN_ID, REPLORIGIN_SET, &main), 17),
            "set origin 4 to 0/3000"
        );
    }

    #[test]
    fn test_logical_message() {
        let mut main = Vec::new();
        main.extend_from_slice(&5u32.to_le_bytes()); // db
        main.push(1); // transactional
        main.extend_from_slice(&[0u8; 3]); // padding
        main.extend_from_slice(&5u64.to_le_bytes()); // prefix size incl NUL
        main.extend_from_slice(&3u64.to_le_bytes()); // message size
        main.extend_from_slice(b"test\0");
        main.extend_from_slice(b"abc");
        assert_eq!(
            describe_logicalmsg(&record(RM_LOGICALMSG_ID, LOGICAL_MESSAGE, &main), 17),
            "transactional message, prefix \"test\", 3 bytes"
        );
    }
}
