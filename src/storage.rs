//! Disk-usage-triggered cleanup of the output directory (C6).

use crate::jobs::JobStore;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use sysinfo::Disks;
use tokio::time::interval;
use tracing::{info, warn};

pub struct ReaperReport {
    pub files_removed: usize,
    pub bytes_reclaimed: u64,
}

/// Measures used/total space for the filesystem containing `output_dir`.
/// Returns `(used_pct, total_bytes)`. Reused by the readiness probe's disk
/// free-space check.
pub fn measure_usage(output_dir: &Path) -> Option<(f64, u64)> {
    let disks = Disks::new_with_refreshed_list();
    let canonical = std::fs::canonicalize(output_dir).ok()?;

    let mut best: Option<(&sysinfo::Disk, usize)> = None;
    for disk in disks.list() {
        let mount = disk.mount_point();
        if canonical.starts_with(mount) {
            let mount_len = mount.as_os_str().len();
            if best.map(|(_, len)| mount_len > len).unwrap_or(true) {
                best = Some((disk, mount_len));
            }
        }
    }
    let disk = best?.0;
    let total = disk.total_space();
    let available = disk.available_space();
    if total == 0 {
        return None;
    }
    let used_pct = 100.0 * (total - available) as f64 / total as f64;
    Some((used_pct, total))
}

/// Runs one pass over `output_dir`: deletes regular files older than
/// `cleanup_age` that are not in `active_files`, unless `dry_run`. Never
/// follows symlinks out of the directory (`read_dir` does not traverse
/// into symlinked directories and `metadata` on the walked entry is used
/// rather than `symlink_metadata` only to measure age, but removal targets
/// the direct walked path, never a resolved symlink target outside the
/// tree).
async fn sweep_once(
    output_dir: &Path,
    active_files: &HashSet<String>,
    cleanup_age: Duration,
    dry_run: bool,
) -> ReaperReport {
    let mut files_removed = 0usize;
    let mut bytes_reclaimed = 0u64;

    let mut entries = match tokio::fs::read_dir(output_dir).await {
        Ok(e) => e,
        Err(e) => {
            warn!(error = %e, "failed to read output directory for reaping");
            return ReaperReport {
                files_removed: 0,
                bytes_reclaimed: 0,
            };
        }
    };

    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let file_type = match entry.file_type().await {
            Ok(t) => t,
            Err(_) => continue,
        };
        if !file_type.is_file() {
            continue;
        }

        let relative = match path.strip_prefix(output_dir) {
            Ok(r) => r.to_string_lossy().to_string(),
            Err(_) => continue,
        };
        if active_files.contains(&relative) {
            continue;
        }

        let metadata = match tokio::fs::metadata(&path).await {
            Ok(m) => m,
            Err(_) => continue,
        };
        let age = metadata
            .modified()
            .ok()
            .and_then(|m| SystemTime::now().duration_since(m).ok())
            .unwrap_or(Duration::ZERO);
        if age < cleanup_age {
            continue;
        }

        let size = metadata.len();
        if dry_run {
            files_removed += 1;
            bytes_reclaimed += size;
            continue;
        }
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                files_removed += 1;
                bytes_reclaimed += size;
            }
            Err(e) => warn!(path = %path.display(), error = %e, "failed to remove stale output file"),
        }
    }

    ReaperReport {
        files_removed,
        bytes_reclaimed,
    }
}

/// Runs the reaper on `interval_secs` and spawns the maintenance daemon.
/// Mirrors the shape of a fixed-interval background sweep: acquire a
/// read-only snapshot of the shared active-file set, then mutate the
/// filesystem outside any lock.
pub fn spawn_reaper(
    output_dir: std::path::PathBuf,
    job_store: Arc<JobStore>,
    interval_secs: u64,
    cleanup_threshold_pct: f64,
    cleanup_age: Duration,
) {
    let mut ticker = interval(Duration::from_secs(interval_secs));

    tokio::spawn(async move {
        info!("storage reaper daemon started");
        loop {
            ticker.tick().await;
            run_reaper_pass(&output_dir, &job_store, cleanup_threshold_pct, cleanup_age, false).await;
        }
    });
}

/// Runs a single reaper pass, either from the timer or an explicit admin
/// trigger. `explicit` bypasses the usage-threshold gate.
pub async fn run_reaper_pass(
    output_dir: &Path,
    job_store: &JobStore,
    cleanup_threshold_pct: f64,
    cleanup_age: Duration,
    explicit: bool,
) -> ReaperReport {
    if !explicit {
        match measure_usage(output_dir) {
            Some((used_pct, _total)) if used_pct < cleanup_threshold_pct => {
                return ReaperReport {
                    files_removed: 0,
                    bytes_reclaimed: 0,
                };
            }
            None => {
                warn!("could not measure disk usage for output directory, skipping reap");
                return ReaperReport {
                    files_removed: 0,
                    bytes_reclaimed: 0,
                };
            }
            _ => {}
        }
    }

    let active = job_store.active_file_snapshot().await;
    let report = sweep_once(output_dir, &active, cleanup_age, false).await;
    if report.files_removed > 0 {
        info!(
            files_removed = report.files_removed,
            bytes_reclaimed = report.bytes_reclaimed,
            "reaper cleaned up stale output files"
        );
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;

    #[tokio::test]
    async fn skips_files_in_active_set() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("active.mp4");
        let mut file = File::create(&path).unwrap();
        writeln!(file, "data").unwrap();
        // Back-date the file so it would otherwise qualify for removal.
        filetime::set_file_mtime(&path, filetime::FileTime::from_system_time(
            SystemTime::now() - Duration::from_secs(3600 * 48),
        ))
        .ok();

        let mut active = HashSet::new();
        active.insert("active.mp4".to_string());

        let report = sweep_once(dir.path(), &active, Duration::from_secs(3600 * 24), false).await;
        assert_eq!(report.files_removed, 0);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn removes_stale_files_not_in_active_set() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stale.mp4");
        File::create(&path).unwrap();
        filetime::set_file_mtime(&path, filetime::FileTime::from_system_time(
            SystemTime::now() - Duration::from_secs(3600 * 48),
        ))
        .ok();

        let report = sweep_once(dir.path(), &HashSet::new(), Duration::from_secs(3600 * 24), false).await;
        assert_eq!(report.files_removed, 1);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn dry_run_reports_without_deleting() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stale.mp4");
        File::create(&path).unwrap();
        filetime::set_file_mtime(&path, filetime::FileTime::from_system_time(
            SystemTime::now() - Duration::from_secs(3600 * 48),
        ))
        .ok();

        let report = sweep_once(dir.path(), &HashSet::new(), Duration::from_secs(3600 * 24), true).await;
        assert_eq!(report.files_removed, 1);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn skips_files_younger_than_cleanup_age() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fresh.mp4");
        File::create(&path).unwrap();

        let report = sweep_once(dir.path(), &HashSet::new(), Duration::from_secs(3600 * 24), false).await;
        assert_eq!(report.files_removed, 0);
        assert!(path.exists());
    }
}
