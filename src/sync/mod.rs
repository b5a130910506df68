// Sync pass module

pub mod convert;
pub mod discover;
pub mod naming;
pub mod placement;
pub mod stability;


use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

use serde::Serialize;

use crate::config::{CameraConfig, SyncConfig};
use crate::constants::{IMAGES_FOLDER, IMAGE_OUTPUT_EXTENSION, VIDEO_FOLDER, VIDEO_OUTPUT_EXTENSION};
use crate::error::{CamSyncError, Result};

use convert::Converter;
use discover::{discover, CandidateFile};
use placement::{PlacementEngine, PlacementOutcome, PlacementResult, SkipReason};
use stability::{Stability, StabilityFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Image,
}

impl MediaKind {
    pub const ALL: [MediaKind; 2] = [MediaKind::Video, MediaKind::Image];

    /// Subdirectory under a camera's destination.
    pub fn folder(&self) -> &'static str {
        match self {
            MediaKind::Video => VIDEO_FOLDER,
            MediaKind::Image => IMAGES_FOLDER,
        }
    }

    pub fn output_extension(&self) -> &'static str {
        match self {
            MediaKind::Video => VIDEO_OUTPUT_EXTENSION,
            MediaKind::Image => IMAGE_OUTPUT_EXTENSION,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Image => "image",
        }
    }
}

/// Counters for one media kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MediaStats {
    /// Discovered inside the sync window.
    pub total: usize,
    pub new: usize,
    pub existing: usize,
    /// Too new, still growing or vanished. Picked up again next pass.
    pub unstable: usize,
    pub empty: usize,
    pub failed: usize,
}

impl MediaStats {
    pub fn record(&mut self, outcome: &PlacementOutcome) {
        match outcome {
            PlacementOutcome::Placed => self.new += 1,
            PlacementOutcome::Skipped(SkipReason::AlreadyPlaced) => self.existing += 1,
            PlacementOutcome::Skipped(SkipReason::Empty) => self.empty += 1,
            PlacementOutcome::Skipped(_) => self.unstable += 1,
            PlacementOutcome::Failed(_) => self.failed += 1,
        }
    }

    fn add(&mut self, other: &MediaStats) {
        self.total += other.total;
        self.new += other.new;
        self.existing += other.existing;
        self.unstable += other.unstable;
        self.empty += other.empty;
        self.failed += other.failed;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CameraStats {
    pub tag: String,
    pub videos: MediaStats,
    pub images: MediaStats,
    /// Source path was missing; nothing was attempted for this camera.
    pub source_missing: bool,
}

impl CameraStats {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            videos: MediaStats::default(),
            images: MediaStats::default(),
            source_missing: false,
        }
    }

    pub fn kind(&self, kind: MediaKind) -> &MediaStats {
        match kind {
            MediaKind::Video => &self.videos,
            MediaKind::Image => &self.images,
        }
    }

    fn kind_mut(&mut self, kind: MediaKind) -> &mut MediaStats {
        match kind {
            MediaKind::Video => &mut self.videos,
            MediaKind::Image => &mut self.images,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub cameras: Vec<CameraStats>,
    /// Stopped early by a shutdown request.
    pub interrupted: bool,
}

impl SyncReport {
    pub fn totals(&self, kind: MediaKind) -> MediaStats {
        let mut totals = MediaStats::default();
        for camera in &self.cameras {
            totals.add(camera.kind(kind));
        }
        totals
    }

    pub fn total_new(&self) -> usize {
        MediaKind::ALL.iter().map(|k| self.totals(*k).new).sum()
    }

    pub fn total_existing(&self) -> usize {
        MediaKind::ALL.iter().map(|k| self.totals(*k).existing).sum()
    }

    pub fn total_discovered(&self) -> usize {
        MediaKind::ALL.iter().map(|k| self.totals(*k).total).sum()
    }

    pub fn total_failed(&self) -> usize {
        MediaKind::ALL.iter().map(|k| self.totals(*k).failed).sum()
    }

    /// Share of discovered files skipped as already placed, in percent.
    pub fn efficiency(&self) -> Option<f64> {
        let discovered = self.total_discovered();
        if discovered == 0 {
            return None;
        }
        Some(self.total_existing() as f64 / discovered as f64 * 100.0)
    }
}

/// Create `video/` (and `images/` when enabled) for every camera.
/// Failure here is fatal for the run.
pub fn create_directories(config: &SyncConfig) -> Result<()> {
    for camera in &config.cameras {
        for kind in MediaKind::ALL {
            if !config.kind_enabled(kind) {
                continue;
            }
            let dir = camera.media_dir(kind);
            fs::create_dir_all(&dir).map_err(|source| CamSyncError::Destination {
                path: dir.clone(),
                source,
            })?;
        }
    }
    Ok(())
}

/// One complete sync pass over every configured camera, in order.
///
/// Only destination setup can fail the pass. A missing source skips that
/// camera; every per-file problem is counted and logged.
pub fn run_sync_pass(config: &SyncConfig, converter: &dyn Converter, shutdown: &AtomicBool) -> Result<SyncReport> {
    create_directories(config)?;

    let engine = PlacementEngine::new(converter);
    let filter = StabilityFilter::from_config(config);
    let mut report = SyncReport::default();

    log::info!("Starting sync pass for {} camera(s)", config.cameras.len());

    for camera in &config.cameras {
        if shutdown.load(Ordering::SeqCst) {
            report.interrupted = true;
            break;
        }
        report.cameras.push(sync_camera(camera, config, &engine, &filter, shutdown));
    }

    if shutdown.load(Ordering::SeqCst) {
        report.interrupted = true;
        log::warn!("Sync pass interrupted by shutdown request");
    }

    log_summary(&report);
    Ok(report)
}

fn sync_camera(
    camera: &CameraConfig,
    config: &SyncConfig,
    engine: &PlacementEngine<'_>,
    filter: &StabilityFilter,
    shutdown: &AtomicBool,
) -> CameraStats {
    let mut stats = CameraStats::new(&camera.tag);
    let now = SystemTime::now();

    let candidates = match discover(camera, config, now) {
        Ok(candidates) => candidates,
        Err(e) => {
            log::warn!("Skipping camera {}: {}", camera.tag, e);
            stats.source_missing = true;
            return stats;
        }
    };

    log::info!("Processing camera {}: {}", camera.tag, camera.source.display());

    // First reading for everything, then a single recheck delay for the camera
    let mut screened: Vec<CandidateFile> = Vec::new();
    for candidate in candidates {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        stats.kind_mut(candidate.kind).total += 1;

        match filter.screen(&candidate, now) {
            Stability::Stable => screened.push(candidate),
            other => {
                log::debug!("Not ready ({:?}): {}", other, candidate.path.display());
                stats.kind_mut(candidate.kind).record(&skipped(other));
            }
        }
    }

    let empty = stats.videos.empty + stats.images.empty;
    if empty > 0 {
        log::warn!("{}: skipped {} empty file(s)", camera.tag, empty);
    }

    if !screened.is_empty() && !shutdown.load(Ordering::SeqCst) {
        filter.wait();
    }

    for candidate in screened {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        let result = match filter.confirm(&candidate) {
            Stability::Stable => engine.place(&candidate, camera),
            other => {
                log::debug!("Not ready ({:?}): {}", other, candidate.path.display());
                PlacementResult::skipped(None, skip_reason(other))
            }
        };
        stats.kind_mut(candidate.kind).record(&result.outcome);
    }

    log::info!(
        "Finished camera {}: videos {} new / {} existing / {} failed, images {} new / {} existing / {} failed",
        camera.tag,
        stats.videos.new,
        stats.videos.existing,
        stats.videos.failed,
        stats.images.new,
        stats.images.existing,
        stats.images.failed
    );

    stats
}

fn skip_reason(stability: Stability) -> SkipReason {
    match stability {
        Stability::TooNew | Stability::Stable => SkipReason::TooNew,
        Stability::Empty => SkipReason::Empty,
        Stability::Growing => SkipReason::StillGrowing,
        Stability::Vanished => SkipReason::Vanished,
    }
}

fn skipped(stability: Stability) -> PlacementOutcome {
    PlacementOutcome::Skipped(skip_reason(stability))
}

/// Log the per-camera and overall summary of a sync pass.
pub fn log_summary(report: &SyncReport) {
    log::info!("SYNC SUMMARY REPORT");

    for camera in &report.cameras {
        if camera.source_missing {
            log::info!("{}: source missing", camera.tag);
            continue;
        }
        log::info!(
            "{}: Videos {}/{}, Images {}/{}",
            camera.tag,
            camera.videos.new,
            camera.videos.total,
            camera.images.new,
            camera.images.total
        );
    }

    log::info!(
        "Total: {} new, {} existing, {} failed, {} discovered",
        report.total_new(),
        report.total_existing(),
        report.total_failed(),
        report.total_discovered()
    );

    if let Some(efficiency) = report.efficiency() {
        log::info!("Efficiency: {:.1}% skipped", efficiency);
    }
}
