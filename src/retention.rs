// Retention sweeper
//
// Deletes placed files older than the retention window from each camera's
// video/ and images/ folders. Only files carrying the normalized output
// extension are considered; anything else in those folders is left alone.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};

use serde::Serialize;
use walkdir::WalkDir;

use crate::config::{CameraConfig, SyncConfig};
use crate::constants::SECONDS_PER_DAY;
use crate::sync::MediaKind;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionAction {
    Deleted,
    WouldDelete,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetentionEntry {
    pub path: PathBuf,
    pub age_days: f64,
    pub size: u64,
    pub action: RetentionAction,
}

/// Result of sweeping one camera.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub tag: String,
    pub entries: Vec<RetentionEntry>,
    /// Deleted, or would be deleted in a dry run.
    pub deleted: usize,
    pub freed_bytes: u64,
    pub failed: usize,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RetentionReport {
    pub retention_days: u32,
    pub dry_run: bool,
    pub cameras: Vec<SweepReport>,
    pub interrupted: bool,
}

impl RetentionReport {
    pub fn total_deleted(&self) -> usize {
        self.cameras.iter().map(|c| c.deleted).sum()
    }

    pub fn total_freed_bytes(&self) -> u64 {
        self.cameras.iter().map(|c| c.freed_bytes).sum()
    }

    pub fn total_failed(&self) -> usize {
        self.cameras.iter().map(|c| c.failed).sum()
    }
}

pub fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_MB
}

/// Sweep one camera's destination tree.
///
/// `retention_days == 0` disables the sweep. A file qualifies when its age is
/// strictly greater than the window.
pub fn sweep(camera: &CameraConfig, retention_days: u32, dry_run: bool, now: SystemTime) -> SweepReport {
    let mut report = SweepReport {
        tag: camera.tag.clone(),
        dry_run,
        ..Default::default()
    };

    if retention_days == 0 {
        return report;
    }

    let window = Duration::from_secs(u64::from(retention_days) * SECONDS_PER_DAY);

    for kind in MediaKind::ALL {
        let dir = camera.media_dir(kind);
        for (path, age, size) in expired_files(&dir, kind, window, now) {
            let action = if dry_run {
                log::info!("Would delete {} ({} bytes) [{}]", path.display(), size, camera.tag);
                RetentionAction::WouldDelete
            } else {
                match fs::remove_file(&path) {
                    Ok(()) => {
                        log::info!("Deleted old file: {} ({} bytes) [{}]", path.display(), size, camera.tag);
                        RetentionAction::Deleted
                    }
                    Err(e) => {
                        log::warn!("Error deleting file {}: {}", path.display(), e);
                        RetentionAction::Failed
                    }
                }
            };

            if action == RetentionAction::Failed {
                report.failed += 1;
            } else {
                report.deleted += 1;
                report.freed_bytes += size;
            }

            report.entries.push(RetentionEntry {
                path,
                age_days: age.as_secs_f64() / SECONDS_PER_DAY as f64,
                size,
                action,
            });
        }
    }

    if report.deleted > 0 || report.failed > 0 {
        log::info!(
            "{}: {} {} file(s), {:.1} MB{}",
            camera.tag,
            if dry_run { "would delete" } else { "deleted" },
            report.deleted,
            bytes_to_mb(report.freed_bytes),
            if report.failed > 0 { format!(", {} failed", report.failed) } else { String::new() }
        );
    }

    report
}

/// Files directly in `dir` with the output extension for `kind` and older
/// than `window`. A missing directory yields nothing.
fn expired_files(dir: &Path, kind: MediaKind, window: Duration, now: SystemTime) -> Vec<(PathBuf, Duration, u64)> {
    if !dir.is_dir() {
        return Vec::new();
    }

    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(e) => Some(e),
            Err(e) => {
                log::warn!("Skipping unreadable entry during retention: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| has_extension(entry.path(), kind.output_extension()))
        .filter_map(|entry| {
            let metadata = entry.metadata().ok()?;
            let modified = metadata.modified().ok()?;
            let age = now.duration_since(modified).ok()?;
            (age > window).then(|| (entry.path().to_path_buf(), age, metadata.len()))
        })
        .collect()
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(ext))
        .unwrap_or(false)
}

/// Sweep every configured camera with the run's retention settings.
pub fn run_retention_pass(config: &SyncConfig, shutdown: &AtomicBool) -> RetentionReport {
    let mut report = RetentionReport {
        retention_days: config.retention_days,
        dry_run: config.dry_run,
        ..Default::default()
    };

    if config.retention_days == 0 {
        log::info!("Retention policy disabled (retention_days = 0)");
        return report;
    }

    log::info!(
        "Applying retention policy: {}files older than {} days",
        if config.dry_run { "[dry run] " } else { "" },
        config.retention_days
    );

    let now = SystemTime::now();
    for camera in &config.cameras {
        if shutdown.load(Ordering::SeqCst) {
            report.interrupted = true;
            log::warn!("Retention pass interrupted by shutdown request");
            break;
        }
        report.cameras.push(sweep(camera, config.retention_days, config.dry_run, now));
    }

    let deleted = report.total_deleted();
    if deleted > 0 {
        log::info!(
            "Retention cleanup completed: {} files {}, {:.1} MB freed",
            deleted,
            if config.dry_run { "would be deleted" } else { "deleted" },
            bytes_to_mb(report.total_freed_bytes())
        );
    } else {
        log::info!("Retention cleanup completed: no files needed deletion");
    }

    report
}
