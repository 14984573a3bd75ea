//! Resource-manager dispatch.
//!
//! Every record names the subsystem that produced it with an 8-bit id. The
//! table below maps that id to a name and a describe function producing a
//! one-line human-readable summary. Describe functions are read-only over
//! the decoded record.

use crate::error::WalError;
use crate::record::DecodedRecord;
use crate::{
    rm_database, rm_heap, rm_index, rm_misc, rm_mxact, rm_standby, rm_storage, rm_xact, rm_xlog,
};

pub const RM_XLOG_ID: u8 = 0;
pub const RM_XACT_ID: u8 = 1;
pub const RM_SMGR_ID: u8 = 2;
pub const RM_CLOG_ID: u8 = 3;
pub const RM_DBASE_ID: u8 = 4;
pub const RM_TBLSPC_ID: u8 = 5;
pub const RM_MULTIXACT_ID: u8 = 6;
pub const RM_RELMAP_ID: u8 = 7;
pub const RM_STANDBY_ID: u8 = 8;
pub const RM_HEAP2_ID: u8 = 9;
pub const RM_HEAP_ID: u8 = 10;
pub const RM_BTREE_ID: u8 = 11;
pub const RM_HASH_ID: u8 = 12;
pub const RM_GIN_ID: u8 = 13;
pub const RM_GIST_ID: u8 = 14;
pub const RM_SEQ_ID: u8 = 15;
pub const RM_SPGIST_ID: u8 = 16;
pub const RM_BRIN_ID: u8 = 17;
pub const RM_COMMIT_TS_ID: u8 = 18;
pub const RM_REPLORIGIN_ID: u8 = 19;
pub const RM_GENERIC_ID: u8 = 20;
pub const RM_LOGICALMSG_ID: u8 = 21;

/// Highest valid resource manager id.
pub const RM_MAX_ID: u8 = RM_LOGICALMSG_ID;

/// Describe function: decoded record + server major version to a one-liner.
pub type DescribeFn = fn(&DecodedRecord, u32) -> String;

/// One row of the dispatch table.
pub struct RmgrDescriptor {
    /// Display name
    pub name: &'static str,
    /// Describe function
    pub describe: DescribeFn,
}

static RMGR_TABLE: [RmgrDescriptor; (RM_MAX_ID + 1) as usize] = [
    RmgrDescriptor { name: "XLOG", describe: rm_xlog::describe },
    RmgrDescriptor { name: "Transaction", describe: rm_xact::describe },
    RmgrDescriptor { name: "Storage", describe: rm_storage::describe_smgr },
    RmgrDescriptor { name: "CLOG", describe: rm_storage::describe_clog },
    RmgrDescriptor { name: "Database", describe: rm_database::describe },
    RmgrDescriptor { name: "Tablespace", describe: rm_storage::describe_tablespace },
    RmgrDescriptor { name: "MultiXact", describe: rm_mxact::describe },
    RmgrDescriptor { name: "RelMap", describe: rm_storage::describe_relmap },
    RmgrDescriptor { name: "Standby", describe: rm_standby::describe },
    RmgrDescriptor { name: "Heap2", describe: rm_heap::describe_heap2 },
    RmgrDescriptor { name: "Heap", describe: rm_heap::describe_heap },
    RmgrDescriptor { name: "Btree", describe: rm_index::describe_btree },
    RmgrDescriptor { name: "Hash", describe: rm_index::describe_hash },
    RmgrDescriptor { name: "Gin", describe: rm_index::describe_gin },
    RmgrDescriptor { name: "Gist", describe: rm_index::describe_gist },
    RmgrDescriptor { name: "Sequence", describe: rm_index::describe_sequence },
    RmgrDescriptor { name: "SPGist", describe: rm_index::describe_spgist },
    RmgrDescriptor { name: "BRIN", describe: rm_index::describe_brin },
    RmgrDescriptor { name: "CommitTs", describe: rm_misc::describe_commit_ts },
    RmgrDescriptor { name: "ReplicationOrigin", describe: rm_misc::describe_replorigin },
    RmgrDescriptor { name: "Generic", describe: rm_misc::describe_generic },
    RmgrDescriptor { name: "LogicalMessage", describe: rm_misc::describe_logicalmsg },
];

/// Descriptor for an rmgr id.
pub fn descriptor(rmid: u8) -> Result<&'static RmgrDescriptor, WalError> {
    RMGR_TABLE
        .get(rmid as usize)
        .ok_or(WalError::UnknownRmgr(rmid))
}

/// Display name for an rmgr id.
pub fn rmgr_name(rmid: u8) -> Result<&'static str, WalError> {
    descriptor(rmid).map(|d| d.name)
}

/// One-line description of a record: `Name: detail`.
pub fn describe_record(record: &DecodedRecord, server_version: u32) -> Result<String, WalError> {
    let descriptor = descriptor(record.header.rmid)?;
    Ok(format!(
        "{}: {}",
        descriptor.name,
        (descriptor.describe)(record, server_version)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::testenc::encode_record;
    use crate::record::RecordHeader;
    use vault_core::Lsn;

    fn decoded(rmid: u8, info: u8, main: &[u8]) -> DecodedRecord {
        let raw = encode_record(rmid, info, 1, Lsn(0), &[], main);
        let header = RecordHeader::parse(&raw).unwrap();
        crate::record::decode(Lsn(0x40), header, &raw).unwrap()
    }

    #[test]
    fn test_table_covers_all_ids() {
        for rmid in 0..=RM_MAX_ID {
            assert!(rmgr_name(rmid).is_ok(), "no descriptor for id {rmid}");
        }
        assert!(matches!(rmgr_name(RM_MAX_ID + 1), Err(WalError::UnknownRmgr(_))));
    }

    #[test]
    fn test_names_match_upstream() {
        assert_eq!(rmgr_name(RM_XLOG_ID).unwrap(), "XLOG");
        assert_eq!(rmgr_name(RM_XACT_ID).unwrap(), "Transaction");
        assert_eq!(rmgr_name(RM_HEAP2_ID).unwrap(), "Heap2");
        assert_eq!(rmgr_name(RM_LOGICALMSG_ID).unwrap(), "LogicalMessage");
    }

    #[test]
    fn test_describe_prefixes_name() {
        let record = decoded(RM_XLOG_ID, 0x40, b"");
        let line = describe_record(&record, 17).unwrap();
        assert!(line.starts_with("XLOG: "));
    }

    #[test]
    fn test_describe_does_not_mutate() {
        let record = decoded(RM_HEAP_ID, 0x00, &[0u8; 8]);
        let before = record.main_data.clone();
        let _ = describe_record(&record, 17).unwrap();
        let _ = describe_record(&record, 16).unwrap();
        assert_eq!(record.main_data, before);
    }

    #[test]
    fn test_unknown_rmgr_in_record() {
        let raw = encode_record(42, 0, 1, Lsn(0), &[], b"");
        let header = RecordHeader::parse(&raw).unwrap();
        let record = crate::record::decode(Lsn(0), header, &raw).unwrap();
        assert!(matches!(
            describe_record(&record, 17),
            Err(WalError::UnknownRmgr(42))
        ));
    }
}
