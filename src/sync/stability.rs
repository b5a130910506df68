// Stability filter
//
// A file is safe to move once it is older than the age threshold, non-empty,
// and its size does not change across a short delay. Cameras only append, so
// two size readings are enough without coordinating with the camera's writer.

use std::fs;
use std::time::{Duration, SystemTime};

use crate::config::SyncConfig;
use crate::sync::discover::CandidateFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stability {
    Stable,
    /// Modified within the age threshold (or in the future).
    TooNew,
    /// Zero bytes. Never placed.
    Empty,
    /// Size changed between the two readings.
    Growing,
    /// Disappeared between the two readings.
    Vanished,
}

#[derive(Debug, Clone, Copy)]
pub struct StabilityFilter {
    age_threshold: Duration,
    recheck_delay: Duration,
}

impl StabilityFilter {
    pub fn new(age_threshold: Duration, recheck_delay: Duration) -> Self {
        Self {
            age_threshold,
            recheck_delay,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.age_threshold, config.size_recheck_delay)
    }

    /// Checks on the discovery-time reading: age, then size.
    pub fn screen(&self, candidate: &CandidateFile, now: SystemTime) -> Stability {
        let age = now
            .duration_since(candidate.modified)
            .unwrap_or(Duration::ZERO);

        if age <= self.age_threshold {
            Stability::TooNew
        } else if candidate.size == 0 {
            Stability::Empty
        } else {
            Stability::Stable
        }
    }

    /// Sleep for the recheck delay.
    pub fn wait(&self) {
        if !self.recheck_delay.is_zero() {
            std::thread::sleep(self.recheck_delay);
        }
    }

    /// Second size reading, taken after `wait`.
    pub fn confirm(&self, candidate: &CandidateFile) -> Stability {
        match fs::metadata(&candidate.path) {
            Ok(m) if m.len() == candidate.size => Stability::Stable,
            Ok(_) => Stability::Growing,
            Err(_) => Stability::Vanished,
        }
    }

    /// Full check for a single file: screen, wait, confirm.
    ///
    /// The sync pass screens a whole camera first and waits once before
    /// confirming, which gives the same answer per file.
    pub fn check(&self, candidate: &CandidateFile, now: SystemTime) -> Stability {
        match self.screen(candidate, now) {
            Stability::Stable => {
                self.wait();
                self.confirm(candidate)
            }
            other => other,
        }
    }

    pub fn is_stable(&self, candidate: &CandidateFile, now: SystemTime) -> bool {
        self.check(candidate, now) == Stability::Stable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::MediaKind;
    use std::path::Path;
    use tempfile::TempDir;

    fn candidate(path: &Path, size: u64, age: Duration) -> CandidateFile {
        CandidateFile {
            path: path.to_path_buf(),
            size,
            modified: SystemTime::now() - age,
            kind: MediaKind::Video,
        }
    }

    fn filter() -> StabilityFilter {
        StabilityFilter::new(Duration::from_secs(120), Duration::ZERO)
    }

    #[test]
    fn test_too_new() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("a.mp4");
        std::fs::write(&path, b"data").unwrap();

        let now = SystemTime::now();
        assert_eq!(filter().check(&candidate(&path, 4, Duration::from_secs(30)), now), Stability::TooNew);
        // Exactly at the threshold is still too new
        let at_threshold = CandidateFile { modified: now - Duration::from_secs(120), ..candidate(&path, 4, Duration::ZERO) };
        assert_eq!(filter().screen(&at_threshold, now), Stability::TooNew);
    }

    #[test]
    fn test_future_mtime_is_too_new() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("a.mp4");
        let future = CandidateFile {
            path,
            size: 4,
            modified: SystemTime::now() + Duration::from_secs(3600),
            kind: MediaKind::Video,
        };
        assert_eq!(filter().screen(&future, SystemTime::now()), Stability::TooNew);
    }

    #[test]
    fn test_empty() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("snap.pic");
        std::fs::write(&path, b"").unwrap();
        assert_eq!(
            filter().check(&candidate(&path, 0, Duration::from_secs(600)), SystemTime::now()),
            Stability::Empty
        );
    }

    #[test]
    fn test_stable() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("rec.mp4");
        std::fs::write(&path, vec![7u8; 1000]).unwrap();
        assert!(filter().is_stable(&candidate(&path, 1000, Duration::from_secs(600)), SystemTime::now()));
    }

    #[test]
    fn test_growing() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("rec.mp4");
        std::fs::write(&path, vec![7u8; 1500]).unwrap();
        // Discovered at 1000 bytes, now 1500
        assert_eq!(
            filter().check(&candidate(&path, 1000, Duration::from_secs(600)), SystemTime::now()),
            Stability::Growing
        );
    }

    #[test]
    fn test_vanished() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("gone.mp4");
        assert_eq!(filter().confirm(&candidate(&path, 10, Duration::from_secs(600))), Stability::Vanished);
    }
}
