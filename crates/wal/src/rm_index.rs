//! Index resource managers: Btree, Hash, Gin, Gist, SPGist, BRIN, plus
//! Sequence. Index internals mostly matter as block references; the
//! describes name the operation and lean on the block suffix.

use crate::record::DecodedRecord;
use crate::rm_util::{raw_info, Fields};

fn block_suffix(record: &DecodedRecord) -> String {
    match record.blocks.first() {
        Some(block) => format!(" blk {}", block.block),
        None => String::new(),
    }
}

fn named_op(record: &DecodedRecord, names: &[(u8, &str)]) -> String {
    let info = record.rm_info();
    match names.iter().find(|(op, _)| *op == info) {
        Some((_, name)) => format!("{name}{}", block_suffix(record)),
        None => raw_info(info),
    }
}

pub(crate) fn describe_btree(record: &DecodedRecord, _server_version: u32) -> String {
    let info = record.rm_info();
    let mut fields = Fields::new(&record.main_data);
    match info {
        // xl_btree_insert: offset number
        0x00 | 0x10 | 0x20 | 0x50 => {
            let kind = match info {
                0x00 => "insert leaf",
                0x10 => "insert upper",
                0x20 => "insert meta",
                _ => "insert post",
            };
            match fields.u16() {
                Some(offnum) => format!("{kind} off {offnum}{}", block_suffix(record)),
                None => raw_info(info),
            }
        }
        0x30 => format!("split left{}", block_suffix(record)),
        0x40 => format!("split right{}", block_suffix(record)),
        0x60 => format!("dedup{}", block_suffix(record)),
        0x70 => {
            // xl_btree_delete: latest removed xid, count
            let _latest = fields.u32();
            match fields.u16() {
                Some(ndeleted) => format!("delete {ndeleted}{}", block_suffix(record)),
                None => raw_info(info),
            }
        }
        0x80 => format!("mark page half-dead{}", block_suffix(record)),
        0x90 => format!("unlink page{}", block_suffix(record)),
        0xA0 => format!("unlink page meta{}", block_suffix(record)),
        0xB0 => format!("new root{}", block_suffix(record)),
        0xC0 => "reuse page".to_string(),
        0xD0 => format!("vacuum{}", block_suffix(record)),
        other => raw_info(other),
    }
}

pub(crate) fn describe_hash(record: &DecodedRecord, _server_version: u32) -> String {
    named_op(
        record,
        &[
            (0x00, "init meta page"),
            (0x10, "init bitmap page"),
            (0x20, "insert"),
            (0x30, "add ovfl page"),
            (0x40, "split allocate page"),
            (0x50, "split complete"),
            (0x60, "move page contents"),
            (0x70, "squeeze page"),
            (0x80, "delete"),
            (0x90, "split cleanup"),
            (0xA0, "update meta page"),
            (0xB0, "vacuum one page"),
        ],
    )
}

pub(crate) fn describe_gin(record: &DecodedRecord, _server_version: u32) -> String {
    named_op(
        record,
        &[
            (0x00, "create ptree"),
            (0x10, "insert"),
            (0x20, "split"),
            (0x30, "vacuum page"),
            (0x40, "delete page"),
            (0x50, "update meta page"),
            (0x60, "insert listpage"),
            (0x70, "delete listpage"),
            (0x80, "vacuum data leaf page"),
        ],
    )
}

pub(crate) fn describe_gist(record: &DecodedRecord, _server_version: u32) -> String {
    named_op(
        record,
        &[
            (0x00, "page update"),
            (0x10, "delete"),
            (0x20, "page reuse"),
            (0x30, "page split"),
            (0x40, "page delete"),
            (0x50, "assign lsn"),
        ],
    )
}

pub(crate) fn describe_sequence(record: &DecodedRecord, _server_version: u32) -> String {
    let info = record.rm_info();
    match info {
        // xl_seq_rec: the relfilelocator, then the rewritten tuple
        0x00 => {
            let mut fields = Fields::new(&record.main_data);
            let spc = fields.u32();
            let db = fields.u32();
            let rel = fields.u32();
            match (spc, db, rel) {
                (Some(spc), Some(db), Some(rel)) => format!("log rel {spc}/{db}/{rel}"),
                _ => raw_info(info),
            }
        }
        other => raw_info(other),
    }
}

pub(crate) fn describe_spgist(record: &DecodedRecord, _server_version: u32) -> String {
    named_op(
        record,
        &[
            (0x00, "add leaf"),
            (0x10, "move leafs"),
            (0x20, "add node"),
            (0x30, "split tuple"),
            (0x40, "picksplit"),
            (0x50, "vacuum leaf"),
            (0x60, "vacuum root"),
            (0x70, "vacuum redirect"),
        ],
    )
}

pub(crate) fn describe_brin(record: &DecodedRecord, _server_version: u32) -> String {
    named_op(
        record,
        &[
            (0x00, "create index"),
            (0x10, "insert"),
            (0x20, "update"),
            (0x30, "samepage update"),
            (0x40, "revmap extend"),
            (0x50, "desummarize"),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brt::ForkKey;
    use crate::record::testenc::{encode_record, TestBlock};
    use crate::record::RecordHeader;
    use crate::rmgr::{RM_BTREE_ID, RM_SEQ_ID};
    use vault_core::Lsn;

    #[test]
    fn test_btree_insert_leaf() {
        let main = 12u16.to_le_bytes();
        let raw = encode_record(
            RM_BTREE_ID,
            0x00,
            0,
            Lsn(0),
            &[TestBlock {
                key: ForkKey::main(1663, 5, 2600),
                block: 4,
                data: vec![1],
            }],
            &main,
        );
        let header = RecordHeader::parse(&raw).unwrap();
        let record = crate::record::decode(Lsn(0), header, &raw).unwrap();
        assert_eq!(describe_btree(&record, 17), "insert leaf off 12 blk 4");
    }

    #[test]
    fn test_sequence_log() {
        let mut main = Vec::new();
        for v in [1663u32, 5, 16999] {
            main.extend_from_slice(&v.to_le_bytes());
        }
        let raw = encode_record(RM_SEQ_ID, 0x00, 0, Lsn(0), &[], &main);
        let header = RecordHeader::parse(&raw).unwrap();
        let record = crate::record::decode(Lsn(0), header, &raw).unwrap();
        assert_eq!(describe_sequence(&record, 17), "log rel 1663/5/16999");
    }
}
