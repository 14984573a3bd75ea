//! Retention set computation.
//!
//! The policy keeps the newest `keep_last` backups plus anything younger
//! than `min_days`. A backup that some kept incremental depends on is kept
//! too, whatever its age; deleting it would orphan the chain.

use crate::backup_info::BackupInfo;
use crate::catalogue::{Catalogue, CatalogueError};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tracing::debug;
use vault_core::config::RetentionWindow;

/// Labels that fall outside the retention window, oldest first. Every
/// label in the result is safe to delete in order: ancestors of kept
/// backups are never included.
pub fn compute_retention_set(
    catalogue: &Catalogue,
    window: RetentionWindow,
    now: DateTime<Utc>,
) -> Result<Vec<String>, CatalogueError> {
    let backups = catalogue.list_backups()?;
    if backups.is_empty() {
        return Ok(Vec::new());
    }

    let mut kept: HashSet<String> = HashSet::new();

    // newest keep_last
    let keep_from = backups.len().saturating_sub(window.keep_last);
    for backup in &backups[keep_from..] {
        kept.insert(backup.label.clone());
    }
    if window.keep_last == 0 {
        // 0 means unlimited: everything is kept
        for backup in &backups {
            kept.insert(backup.label.clone());
        }
    }

    // age floor
    if window.min_days > 0 {
        let cutoff = now - chrono::Duration::days(window.min_days as i64);
        for backup in &backups {
            if backup.created_at().is_some_and(|at| at > cutoff) {
                kept.insert(backup.label.clone());
            }
        }
    }

    // ancestors of kept incrementals stay
    let labels: Vec<String> = kept.iter().cloned().collect();
    for label in labels {
        for ancestor in catalogue.parent_chain(&label)? {
            kept.insert(ancestor.label);
        }
    }

    let expired: Vec<String> = backups
        .iter()
        .filter(|b| !kept.contains(&b.label))
        .map(|b| b.label.clone())
        .collect();
    debug!(total = backups.len(), expired = expired.len(), "retention set computed");
    Ok(expired)
}

/// Order the expired labels so children are deleted before parents.
pub fn deletion_order(catalogue: &Catalogue, expired: &[String]) -> Result<Vec<String>, CatalogueError> {
    let backups = catalogue.list_backups()?;
    let expired_set: HashSet<&String> = expired.iter().collect();
    let mut ordered: Vec<BackupInfo> = backups
        .into_iter()
        .filter(|b| expired_set.contains(&b.label))
        .collect();
    // children have later labels than their parents, so deleting newest
    // first never hits HasChildren within the expired set
    ordered.sort_by(|a, b| b.label.cmp(&a.label));
    Ok(ordered.into_iter().map(|b| b.label).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use vault_core::BackupKind;

    fn seed(catalogue: &Catalogue, label: &str, kind: BackupKind, parent: Option<&str>) {
        let dir = catalogue.backup_dir(label);
        std::fs::create_dir_all(&dir).unwrap();
        let mut info = BackupInfo::new(label, kind);
        info.parent = parent.map(str::to_string);
        info.store(&dir).unwrap();
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_zero_backups_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let catalogue = Catalogue::open(dir.path(), "primary");
        catalogue.ensure_layout().unwrap();
        let window = RetentionWindow {
            keep_last: 2,
            min_days: 0,
        };
        assert!(compute_retention_set(&catalogue, window, now())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_keep_last() {
        let dir = tempfile::tempdir().unwrap();
        let catalogue = Catalogue::open(dir.path(), "primary");
        catalogue.ensure_layout().unwrap();
        for label in [
            "20260710000000",
            "20260720000000",
            "20260730000000",
            "20260801000000",
        ] {
            seed(&catalogue, label, BackupKind::Full, None);
        }
        let window = RetentionWindow {
            keep_last: 2,
            min_days: 0,
        };
        let expired = compute_retention_set(&catalogue, window, now()).unwrap();
        assert_eq!(expired, ["20260710000000", "20260720000000"]);
    }

    #[test]
    fn test_age_floor_keeps_young_backups() {
        let dir = tempfile::tempdir().unwrap();
        let catalogue = Catalogue::open(dir.path(), "primary");
        catalogue.ensure_layout().unwrap();
        for label in ["20260601000000", "20260725000000", "20260801000000"] {
            seed(&catalogue, label, BackupKind::Full, None);
        }
        let window = RetentionWindow {
            keep_last: 1,
            min_days: 10,
        };
        // 20260725 is within 10 days of 2026-08-01, kept despite keep_last=1
        let expired = compute_retention_set(&catalogue, window, now()).unwrap();
        assert_eq!(expired, ["20260601000000"]);
    }

    #[test]
    fn test_ancestors_of_kept_incrementals_survive() {
        let dir = tempfile::tempdir().unwrap();
        let catalogue = Catalogue::open(dir.path(), "primary");
        catalogue.ensure_layout().unwrap();
        seed(&catalogue, "20260601000000", BackupKind::Full, None);
        seed(
            &catalogue,
            "20260801000000",
            BackupKind::Incremental,
            Some("20260601000000"),
        );
        let window = RetentionWindow {
            keep_last: 1,
            min_days: 0,
        };
        // the full is ancient, but the kept incremental needs it
        let expired = compute_retention_set(&catalogue, window, now()).unwrap();
        assert!(expired.is_empty());
    }

    #[test]
    fn test_deletion_order_children_first() {
        let dir = tempfile::tempdir().unwrap();
        let catalogue = Catalogue::open(dir.path(), "primary");
        catalogue.ensure_layout().unwrap();
        seed(&catalogue, "20260601000000", BackupKind::Full, None);
        seed(
            &catalogue,
            "20260610000000",
            BackupKind::Incremental,
            Some("20260601000000"),
        );
        seed(&catalogue, "20260801000000", BackupKind::Full, None);

        let window = RetentionWindow {
            keep_last: 1,
            min_days: 0,
        };
        let expired = compute_retention_set(&catalogue, window, now()).unwrap();
        let ordered = deletion_order(&catalogue, &expired).unwrap();
        assert_eq!(ordered, ["20260610000000", "20260601000000"]);

        // the order is actually deletable
        for label in &ordered {
            catalogue.delete_backup(label).unwrap();
        }
    }
}
