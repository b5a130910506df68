// File discovery for sync
//
// Cameras write into numbered segment directories directly under their root
// (datadir0, datadir1, ...). Discovery fans out exactly one level into the
// directories matching the segment pattern and lists the media files inside.

use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use walkdir::{DirEntry, WalkDir};

use crate::config::{CameraConfig, SyncConfig};
use crate::constants::SECONDS_PER_DAY;
use crate::error::{CamSyncError, Result};
use crate::sync::MediaKind;

/// A file found in a camera's source tree, with size and mtime as read at
/// discovery time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFile {
    pub path: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
    pub kind: MediaKind,
}

/// Lazily enumerate candidate files for one camera.
///
/// The iterator is one-shot and walks the tree as it is consumed. A missing
/// source directory is an error so the caller can skip this camera; unreadable
/// entries further down are logged and skipped.
pub fn discover<'a>(
    camera: &'a CameraConfig,
    config: &'a SyncConfig,
    now: SystemTime,
) -> Result<impl Iterator<Item = CandidateFile> + 'a> {
    if !camera.source.is_dir() {
        return Err(CamSyncError::SourceMissing(camera.source.clone()));
    }

    let segments = WalkDir::new(&camera.source)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(skip_walk_error)
        .filter(move |entry| is_segment_dir(entry, config));

    Ok(segments.flat_map(move |segment| {
        WalkDir::new(segment.path())
            .min_depth(1)
            .max_depth(1)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_map(skip_walk_error)
            .filter(|entry| entry.file_type().is_file())
            .filter_map(move |entry| to_candidate(&entry, config))
            .filter(move |candidate| within_sync_window(candidate, config, now))
    }))
}

fn is_segment_dir(entry: &DirEntry, config: &SyncConfig) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|name| config.segment_dir_pattern.is_match(name))
            .unwrap_or(false)
}

fn skip_walk_error(entry: walkdir::Result<DirEntry>) -> Option<DirEntry> {
    match entry {
        Ok(e) => Some(e),
        Err(e) => {
            log::warn!("Skipping unreadable entry during discovery: {}", e);
            None
        }
    }
}

fn to_candidate(entry: &DirEntry, config: &SyncConfig) -> Option<CandidateFile> {
    let kind = config.classify(entry.path())?;

    let metadata = match entry.metadata() {
        Ok(m) => m,
        Err(e) => {
            log::warn!("Cannot stat {}: {}", entry.path().display(), e);
            return None;
        }
    };
    let modified = match metadata.modified() {
        Ok(t) => t,
        Err(e) => {
            log::warn!("No modification time for {}: {}", entry.path().display(), e);
            return None;
        }
    };

    Some(CandidateFile {
        path: entry.path().to_path_buf(),
        size: metadata.len(),
        modified,
        kind,
    })
}

/// Files older than the per-kind sync window are not considered at all.
fn within_sync_window(candidate: &CandidateFile, config: &SyncConfig, now: SystemTime) -> bool {
    let days = config.sync_days(candidate.kind);
    if days == 0 {
        return true;
    }
    let window = Duration::from_secs(u64::from(days) * SECONDS_PER_DAY);
    now.duration_since(candidate.modified)
        .map(|age| age <= window)
        .unwrap_or(true)
}
