// Placement engine
//
// Converts a stable candidate into a temp sibling inside the destination
// directory, picks a collision-free output name, then renames into place.
// A file only ever appears under its output name complete.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use filetime::FileTime;
use serde::Serialize;

use crate::config::CameraConfig;
use crate::constants::MAX_COLLISION_ATTEMPTS;
use crate::error::{CamSyncError, Result};
use crate::sync::convert::Converter;
use crate::sync::discover::CandidateFile;
use crate::sync::naming::{format_timestamp, output_file_name, temp_file_name};
use crate::sync::MediaKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Same-size file already sits at one of the candidate names.
    AlreadyPlaced,
    TooNew,
    Empty,
    StillGrowing,
    Vanished,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum PlacementOutcome {
    Placed,
    Skipped(SkipReason),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlacementResult {
    pub destination: Option<PathBuf>,
    pub outcome: PlacementOutcome,
}

impl PlacementResult {
    pub fn placed(destination: PathBuf) -> Self {
        Self { destination: Some(destination), outcome: PlacementOutcome::Placed }
    }

    pub fn skipped(destination: Option<PathBuf>, reason: SkipReason) -> Self {
        Self { destination, outcome: PlacementOutcome::Skipped(reason) }
    }

    pub fn failed(destination: Option<PathBuf>, reason: impl Into<String>) -> Self {
        Self { destination, outcome: PlacementOutcome::Failed(reason.into()) }
    }
}

/// Where a file of a given size should go.
#[derive(Debug, PartialEq, Eq)]
enum Slot {
    Free(PathBuf),
    /// Same size already present here.
    Existing(PathBuf),
    Exhausted,
}

pub struct PlacementEngine<'a> {
    converter: &'a dyn Converter,
    max_attempts: u32,
}

impl<'a> PlacementEngine<'a> {
    pub fn new(converter: &'a dyn Converter) -> Self {
        Self {
            converter,
            max_attempts: MAX_COLLISION_ATTEMPTS,
        }
    }

    /// Number of `_n` suffixes tried after the plain name.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Place one candidate. Never fails outright: errors become `Failed`.
    pub fn place(&self, candidate: &CandidateFile, camera: &CameraConfig) -> PlacementResult {
        match self.try_place(candidate, camera) {
            Ok(result) => result,
            Err(e) => {
                log::warn!("Failed to place {}: {}", candidate.path.display(), e);
                PlacementResult::failed(None, e.to_string())
            }
        }
    }

    fn try_place(&self, candidate: &CandidateFile, camera: &CameraConfig) -> Result<PlacementResult> {
        let dir = camera.media_dir(candidate.kind);
        let timestamp = format_timestamp(candidate.modified);
        let naming = Naming { dir: &dir, timestamp: &timestamp, tag: &camera.tag, kind: candidate.kind };

        // Cheap duplicate check when the output size is known up front
        if let Some(size) = self.converter.output_size_hint(candidate) {
            if let Slot::Existing(existing) = naming.resolve_slot(size, self.max_attempts)? {
                log::debug!("Already placed: {} -> {}", candidate.path.display(), existing.display());
                return Ok(PlacementResult::skipped(Some(existing), SkipReason::AlreadyPlaced));
            }
        }

        let temp_path = dir.join(temp_file_name(&naming.file_name(0)));

        if let Err(e) = self.converter.convert(&candidate.path, candidate.kind, &temp_path) {
            remove_temp(&temp_path);
            log::warn!("Conversion failed for {}: {}", candidate.path.display(), e);
            return Ok(PlacementResult::failed(None, e.to_string()));
        }

        let produced = match fs::metadata(&temp_path) {
            Ok(m) => m.len(),
            Err(e) => {
                remove_temp(&temp_path);
                return Err(e.into());
            }
        };
        if produced == 0 {
            remove_temp(&temp_path);
            log::warn!("Conversion of {} produced an empty file", candidate.path.display());
            return Ok(PlacementResult::failed(None, "conversion produced an empty file"));
        }

        // Output carries the recording time, which retention ages by
        if let Err(e) = filetime::set_file_mtime(&temp_path, FileTime::from_system_time(candidate.modified)) {
            log::debug!("Could not preserve mtime on {}: {}", temp_path.display(), e);
        }

        let slot = match naming.resolve_slot(produced, self.max_attempts) {
            Ok(slot) => slot,
            Err(e) => {
                remove_temp(&temp_path);
                return Err(e);
            }
        };

        match slot {
            Slot::Existing(existing) => {
                remove_temp(&temp_path);
                log::debug!("Already placed: {} -> {}", candidate.path.display(), existing.display());
                Ok(PlacementResult::skipped(Some(existing), SkipReason::AlreadyPlaced))
            }
            Slot::Exhausted => {
                remove_temp(&temp_path);
                let err = CamSyncError::CollisionsExhausted(naming.file_name(0));
                log::warn!("{} (source {})", err, candidate.path.display());
                Ok(PlacementResult::failed(None, err.to_string()))
            }
            Slot::Free(destination) => {
                if let Err(e) = fs::rename(&temp_path, &destination) {
                    remove_temp(&temp_path);
                    log::warn!("Rename to {} failed: {}", destination.display(), e);
                    return Ok(PlacementResult::failed(Some(destination), e.to_string()));
                }
                log::info!(
                    "Placed {}: {} -> {} [{}]",
                    candidate.kind.as_str(),
                    candidate.path.display(),
                    destination.display(),
                    camera.tag
                );
                Ok(PlacementResult::placed(destination))
            }
        }
    }
}

struct Naming<'n> {
    dir: &'n Path,
    timestamp: &'n str,
    tag: &'n str,
    kind: MediaKind,
}

impl Naming<'_> {
    fn file_name(&self, counter: u32) -> String {
        output_file_name(self.timestamp, self.tag, self.kind, counter)
    }

    /// Walk the plain name, then `_1` .. `_max_attempts`: the first name holding
    /// a same-size file means already placed, the first unused name is free.
    fn resolve_slot(&self, size: u64, max_attempts: u32) -> Result<Slot> {
        for counter in 0..=max_attempts {
            let path = self.dir.join(self.file_name(counter));
            match fs::metadata(&path) {
                Ok(m) if m.is_file() && m.len() == size => return Ok(Slot::Existing(path)),
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Slot::Free(path)),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(Slot::Exhausted)
    }
}

fn remove_temp(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            log::warn!("Failed to remove temp file {}: {}", path.display(), e);
        }
    }
}
