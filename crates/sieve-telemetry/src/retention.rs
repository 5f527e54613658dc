//! Retention for persisted tables.
//!
//! A file is expired once its age exceeds the table TTL. Age comes from the
//! `year=/month=/day=` partition in its path, falling back to mtime when the
//! path carries no usable date.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::schema::TableName;
use crate::writer::WriteError;

const SECS_PER_DAY: u64 = 86_400;

/// One file removed (or, in a dry run, selected for removal).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrunedPartition {
    pub path: PathBuf,
    pub table: String,
    pub size_bytes: u64,
    pub age_days: u32,
    pub partition_date: Option<NaiveDate>,
}

/// Remove `table` files older than `retention_days` under `root`.
///
/// `retention_days == 0` keeps everything. Empty partition directories left
/// behind are removed too.
pub fn prune_partitions(
    root: &Path,
    table: TableName,
    retention_days: u32,
    now: SystemTime,
    dry_run: bool,
) -> Result<Vec<PrunedPartition>, WriteError> {
    if retention_days == 0 {
        return Ok(Vec::new());
    }
    let table_dir = root.join(table.as_str());
    if !table_dir.is_dir() {
        return Ok(Vec::new());
    }

    let ttl = Duration::from_secs(u64::from(retention_days) * SECS_PER_DAY);
    let mut files = Vec::new();
    scan(&table_dir, &mut files)?;

    let mut pruned = Vec::new();
    for path in files {
        let metadata = fs::metadata(&path)?;
        let relative = path.strip_prefix(root).unwrap_or(&path);
        let partition_date = partition_date(relative);
        let age = match partition_date {
            Some(date) => age_from_date(date, now),
            None => now
                .duration_since(metadata.modified()?)
                .unwrap_or(Duration::ZERO),
        };
        if age <= ttl {
            continue;
        }

        let record = PrunedPartition {
            path: path.clone(),
            table: table.as_str().to_string(),
            size_bytes: metadata.len(),
            age_days: (age.as_secs() / SECS_PER_DAY) as u32,
            partition_date,
        };

        if dry_run {
            debug!(path = %path.display(), age_days = record.age_days, "retention: would prune");
        } else {
            fs::remove_file(&path)?;
            info!(
                path = %path.display(),
                table = table.as_str(),
                size_bytes = record.size_bytes,
                age_days = record.age_days,
                ttl_days = retention_days,
                "retention: pruned file"
            );
            if let Some(parent) = path.parent() {
                remove_empty_dirs(parent, &table_dir);
            }
        }
        pruned.push(record);
    }

    Ok(pruned)
}

fn scan(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), WriteError> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            scan(&path, out)?;
        } else if path.extension().is_some_and(|ext| ext == "parquet") {
            out.push(path);
        }
    }
    Ok(())
}

/// Extract the partition date from `table/year=YYYY/month=MM/day=DD/file`.
fn partition_date(path: &Path) -> Option<NaiveDate> {
    let mut year: Option<i32> = None;
    let mut month: Option<u32> = None;
    let mut day: Option<u32> = None;

    for part in path.iter().filter_map(|p| p.to_str()) {
        if let Some(y) = part.strip_prefix("year=") {
            year = y.parse().ok();
        } else if let Some(m) = part.strip_prefix("month=") {
            month = m.parse().ok();
        } else if let Some(d) = part.strip_prefix("day=") {
            day = d.parse().ok();
        }
    }

    NaiveDate::from_ymd_opt(year?, month?, day?)
}

/// Age measured from the end of the partition day.
fn age_from_date(date: NaiveDate, now: SystemTime) -> Duration {
    let now: DateTime<Utc> = now.into();
    let end_of_day = date
        .succ_opt()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc());
    match end_of_day {
        Some(end) => (now - end).to_std().unwrap_or(Duration::ZERO),
        None => Duration::ZERO,
    }
}

fn remove_empty_dirs(mut dir: &Path, stop: &Path) {
    while dir != stop && dir.starts_with(stop) {
        let empty = fs::read_dir(dir)
            .map(|mut it| it.next().is_none())
            .unwrap_or(false);
        if !empty || fs::remove_dir(dir).is_err() {
            return;
        }
        match dir.parent() {
            Some(parent) => dir = parent,
            None => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn create_fake_parquet(path: &Path, age_days: u64) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut file = fs::File::create(path).unwrap();
        file.write_all(&[0u8; 128]).unwrap();
        let mtime = SystemTime::now() - Duration::from_secs(age_days * SECS_PER_DAY);
        let ft = filetime::FileTime::from_system_time(mtime);
        filetime::set_file_times(path, ft, ft).unwrap();
    }

    #[test]
    fn partition_date_from_path() {
        let p = Path::new("log_records/year=2025/month=01/day=15/x.parquet");
        assert_eq!(partition_date(p), NaiveDate::from_ymd_opt(2025, 1, 15));
        assert_eq!(partition_date(Path::new("log_records/year=2025/x.parquet")), None);
    }

    #[test]
    fn prunes_by_partition_date() {
        let dir = tempdir().unwrap();
        let old = dir
            .path()
            .join("log_records/year=2025/month=01/day=01/log_records_a_000000.parquet");
        let fresh = dir
            .path()
            .join("log_records/year=2025/month=02/day=25/log_records_a_000001.parquet");
        create_fake_parquet(&old, 0);
        create_fake_parquet(&fresh, 0);

        let now: SystemTime = NaiveDate::from_ymd_opt(2025, 3, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
            .and_utc()
            .into();

        let pruned = prune_partitions(dir.path(), TableName::LogRecords, 30, now, false).unwrap();
        assert_eq!(pruned.len(), 1);
        assert_eq!(pruned[0].path, old);
        assert!(!old.exists());
        assert!(fresh.exists());
        // emptied partition directories are cleaned up
        assert!(!dir.path().join("log_records/year=2025/month=01").exists());
    }

    #[test]
    fn falls_back_to_mtime_and_honours_dry_run() {
        let dir = tempdir().unwrap();
        let old = dir.path().join("dead_letters/loose.parquet");
        create_fake_parquet(&old, 45);

        let pruned =
            prune_partitions(dir.path(), TableName::DeadLetters, 30, SystemTime::now(), true)
                .unwrap();
        assert_eq!(pruned.len(), 1);
        assert!(pruned[0].age_days >= 44);
        assert!(old.exists());
    }

    #[test]
    fn zero_days_keeps_everything() {
        let dir = tempdir().unwrap();
        let old = dir.path().join("log_records/old.parquet");
        create_fake_parquet(&old, 400);
        let pruned =
            prune_partitions(dir.path(), TableName::LogRecords, 0, SystemTime::now(), false)
                .unwrap();
        assert!(pruned.is_empty());
        assert!(old.exists());
    }
}
