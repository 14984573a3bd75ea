//! Colon-delimited checksum catalogue I/O.
//!
//! The `backup.sha256` catalogue is one row per file, `<path>:<hex>`,
//! sorted by path. Rows go through the `csv` reader/writer with `:` as the
//! delimiter so paths containing quotes survive a round trip.

use std::io::{Read, Write};

/// One catalogue row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogueRow {
    /// Relative forward-slash path
    pub path: String,
    /// Lowercase hex digest
    pub checksum: String,
}

/// Write rows in the given order.
pub fn write_rows<W: Write>(writer: W, rows: &[CatalogueRow]) -> csv::Result<()> {
    let mut out = csv::WriterBuilder::new()
        .delimiter(b':')
        .has_headers(false)
        .from_writer(writer);
    for row in rows {
        out.write_record([row.path.as_str(), row.checksum.as_str()])?;
    }
    out.flush()?;
    Ok(())
}

/// Read all rows.
pub fn read_rows<R: Read>(reader: R) -> csv::Result<Vec<CatalogueRow>> {
    let mut input = csv::ReaderBuilder::new()
        .delimiter(b':')
        .has_headers(false)
        .flexible(false)
        .from_reader(reader);
    let mut rows = Vec::new();
    for record in input.records() {
        let record = record?;
        rows.push(CatalogueRow {
            path: record.get(0).unwrap_or_default().to_string(),
            checksum: record.get(1).unwrap_or_default().to_string(),
        });
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let rows = vec![
            CatalogueRow {
                path: "data/PG_VERSION".to_string(),
                checksum: "ab".repeat(32),
            },
            CatalogueRow {
                path: "data/base/16384/1234".to_string(),
                checksum: "cd".repeat(32),
            },
        ];
        let mut buf = Vec::new();
        write_rows(&mut buf, &rows).unwrap();
        let read = read_rows(buf.as_slice()).unwrap();
        assert_eq!(read, rows);
    }

    #[test]
    fn test_line_format() {
        let rows = vec![CatalogueRow {
            path: "a/b".to_string(),
            checksum: "00ff".to_string(),
        }];
        let mut buf = Vec::new();
        write_rows(&mut buf, &rows).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "a/b:00ff\n");
    }

    #[test]
    fn test_empty_input() {
        assert!(read_rows(&b""[..]).unwrap().is_empty());
    }
}
