// Camera registry and run configuration
//
// The configuration is assembled once at startup (flags > env > config file >
// defaults) into a SyncConfig and handed to every pass by reference.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_AGE_THRESHOLD_SECS, DEFAULT_IMAGE_SUFFIXES, DEFAULT_IMAGE_SYNC_DAYS, DEFAULT_LOCK_FILE,
    DEFAULT_RETENTION_DAYS, DEFAULT_SEGMENT_DIR_PATTERN, DEFAULT_SIZE_RECHECK_DELAY_SECS,
    DEFAULT_VIDEO_SUFFIXES, DEFAULT_VIDEO_SYNC_DAYS,
};
use crate::error::{CamSyncError, Result};
use crate::sync::MediaKind;

/// One configured camera: where it records, where its footage goes, and the
/// tag stamped into every output filename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraConfig {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub tag: String,
}

impl CameraConfig {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>, tag: impl Into<String>) -> Result<Self> {
        let tag = tag.into();
        validate_tag(&tag)?;
        Ok(Self {
            source: source.into(),
            destination: destination.into(),
            tag,
        })
    }

    /// Output directory for one media kind (`<destination>/video` or `<destination>/images`).
    pub fn media_dir(&self, kind: MediaKind) -> PathBuf {
        self.destination.join(kind.folder())
    }
}

/// Tags end up in filenames, so only a conservative character set is allowed.
pub fn validate_tag(tag: &str) -> Result<()> {
    let safe = !tag.is_empty()
        && !tag.starts_with('.')
        && tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));

    if safe {
        Ok(())
    } else {
        Err(CamSyncError::InvalidTag(tag.to_string()))
    }
}

/// Scalar settings. Every field is optional so that layers (command line,
/// config file) can be merged before defaults are applied.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub lock_file: Option<PathBuf>,
    pub age_threshold_secs: Option<u64>,
    pub size_recheck_delay_secs: Option<u64>,
    pub retention_days: Option<u32>,
    pub dry_run: Option<bool>,
    pub sync_images: Option<bool>,
    pub video_sync_days: Option<u32>,
    pub image_sync_days: Option<u32>,
    pub segment_dir_pattern: Option<String>,
    pub video_suffixes: Option<Vec<String>>,
    pub image_suffixes: Option<Vec<String>>,
    pub converter: Option<String>,
}

impl Settings {
    /// Field-wise merge: values set on `self` win over `fallback`.
    pub fn or(self, fallback: Settings) -> Settings {
        Settings {
            lock_file: self.lock_file.or(fallback.lock_file),
            age_threshold_secs: self.age_threshold_secs.or(fallback.age_threshold_secs),
            size_recheck_delay_secs: self.size_recheck_delay_secs.or(fallback.size_recheck_delay_secs),
            retention_days: self.retention_days.or(fallback.retention_days),
            dry_run: self.dry_run.or(fallback.dry_run),
            sync_images: self.sync_images.or(fallback.sync_images),
            video_sync_days: self.video_sync_days.or(fallback.video_sync_days),
            image_sync_days: self.image_sync_days.or(fallback.image_sync_days),
            segment_dir_pattern: self.segment_dir_pattern.or(fallback.segment_dir_pattern),
            video_suffixes: self.video_suffixes.or(fallback.video_suffixes),
            image_suffixes: self.image_suffixes.or(fallback.image_suffixes),
            converter: self.converter.or(fallback.converter),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct CameraEntry {
    source: PathBuf,
    destination: PathBuf,
    tag: String,
}

/// Contents of a TOML config file:
///
/// ```toml
/// retention_days = 30
///
/// [[camera]]
/// source = "/input/Camera-Tuin"
/// destination = "/output/garden"
/// tag = "garden"
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(flatten)]
    pub settings: Settings,
    #[serde(default, rename = "camera")]
    cameras: Vec<CameraEntry>,
}

/// Top-level keys a config file may use. `deny_unknown_fields` does not work
/// together with `flatten`, so keys are checked against this list instead.
const CONFIG_FILE_KEYS: [&str; 13] = [
    "lock_file",
    "age_threshold_secs",
    "size_recheck_delay_secs",
    "retention_days",
    "dry_run",
    "sync_images",
    "video_sync_days",
    "image_sync_days",
    "segment_dir_pattern",
    "video_suffixes",
    "image_suffixes",
    "converter",
    "camera",
];

impl ConfigFile {
    /// Unknown keys are rejected so a misspelled setting cannot silently fall
    /// back to its default.
    pub fn parse(contents: &str) -> Result<Self> {
        let table: toml::Table = toml::from_str(contents)?;
        if let Some(key) = table.keys().find(|k| !CONFIG_FILE_KEYS.contains(&k.as_str())) {
            return Err(CamSyncError::Config(format!("unknown config file key '{}'", key)));
        }
        Ok(toml::from_str(contents)?)
    }

    /// Explicitly listed cameras. An unsafe tag here is a configuration error.
    pub fn cameras(&self) -> Result<Vec<CameraConfig>> {
        self.cameras
            .iter()
            .map(|c| CameraConfig::new(&c.source, &c.destination, &c.tag))
            .collect()
    }
}

pub fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let contents = fs::read_to_string(path)?;
    ConfigFile::parse(&contents)
}

/// Immutable configuration for a run.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub cameras: Vec<CameraConfig>,
    pub lock_file: PathBuf,
    pub age_threshold: Duration,
    pub size_recheck_delay: Duration,
    pub retention_days: u32,
    pub dry_run: bool,
    pub sync_images: bool,
    pub video_sync_days: u32,
    pub image_sync_days: u32,
    pub segment_dir_pattern: Regex,
    pub video_suffixes: Vec<String>,
    pub image_suffixes: Vec<String>,
    pub converter: Option<String>,
}

impl SyncConfig {
    /// Apply defaults to whatever `settings` leaves unset.
    pub fn build(cameras: Vec<CameraConfig>, settings: Settings) -> Result<Self> {
        let pattern = settings
            .segment_dir_pattern
            .as_deref()
            .unwrap_or(DEFAULT_SEGMENT_DIR_PATTERN);

        let video_suffixes = normalize_suffixes(settings.video_suffixes, &DEFAULT_VIDEO_SUFFIXES);
        let image_suffixes = normalize_suffixes(settings.image_suffixes, &DEFAULT_IMAGE_SUFFIXES);
        if video_suffixes.is_empty() {
            return Err(CamSyncError::Config("video suffix list is empty".to_string()));
        }

        Ok(Self {
            cameras,
            lock_file: settings
                .lock_file
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOCK_FILE)),
            age_threshold: Duration::from_secs(
                settings.age_threshold_secs.unwrap_or(DEFAULT_AGE_THRESHOLD_SECS),
            ),
            size_recheck_delay: Duration::from_secs(
                settings
                    .size_recheck_delay_secs
                    .unwrap_or(DEFAULT_SIZE_RECHECK_DELAY_SECS),
            ),
            retention_days: settings.retention_days.unwrap_or(DEFAULT_RETENTION_DAYS),
            dry_run: settings.dry_run.unwrap_or(false),
            sync_images: settings.sync_images.unwrap_or(true),
            video_sync_days: settings.video_sync_days.unwrap_or(DEFAULT_VIDEO_SYNC_DAYS),
            image_sync_days: settings.image_sync_days.unwrap_or(DEFAULT_IMAGE_SYNC_DAYS),
            segment_dir_pattern: Regex::new(pattern)?,
            video_suffixes,
            image_suffixes,
            converter: settings.converter.filter(|c| !c.trim().is_empty()),
        })
    }

    pub fn kind_enabled(&self, kind: MediaKind) -> bool {
        match kind {
            MediaKind::Video => true,
            MediaKind::Image => self.sync_images,
        }
    }

    /// How far back discovery looks for this kind; 0 means no limit.
    ///
    /// Never reaches past the retention window: a file old enough to be swept
    /// would otherwise be placed and deleted again on every run.
    pub fn sync_days(&self, kind: MediaKind) -> u32 {
        let configured = match kind {
            MediaKind::Video => self.video_sync_days,
            MediaKind::Image => self.image_sync_days,
        };
        match (configured, self.retention_days) {
            (days, 0) => days,
            (0, retention) => retention,
            (days, retention) => days.min(retention),
        }
    }

    /// Map a source file extension to the media kind it belongs to, if any.
    /// Video suffixes win when a suffix is configured for both kinds.
    pub fn classify(&self, path: &Path) -> Option<MediaKind> {
        let ext = path.extension()?.to_str()?.to_lowercase();

        if self.video_suffixes.iter().any(|s| *s == ext) {
            Some(MediaKind::Video)
        } else if self.sync_images && self.image_suffixes.iter().any(|s| *s == ext) {
            Some(MediaKind::Image)
        } else {
            None
        }
    }
}

fn normalize_suffixes(configured: Option<Vec<String>>, defaults: &[&str]) -> Vec<String> {
    match configured {
        Some(list) => list
            .iter()
            .map(|s| s.trim().trim_start_matches('.').to_lowercase())
            .filter(|s| !s.is_empty())
            .collect(),
        None => defaults.iter().map(|s| s.to_string()).collect(),
    }
}

/// Parse a camera translation table.
///
/// Format: `"Camera-Tuin:garden,Camera-Oprit:driveway"`. Entries without a
/// colon or with an empty side are ignored.
pub fn parse_camera_translation(value: &str) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();

    for pair in value.split(',') {
        let Some((original, translated)) = pair.split_once(':') else {
            if !pair.trim().is_empty() {
                log::warn!("Ignoring malformed camera translation entry '{}'", pair.trim());
            }
            continue;
        };

        let (original, translated) = (original.trim(), translated.trim());
        if original.is_empty() || translated.is_empty() {
            log::warn!("Ignoring incomplete camera translation entry '{}'", pair.trim());
            continue;
        }
        map.insert(original.to_string(), translated.to_string());
    }

    map
}

/// Interpret an optional boolean setting from the command line or environment.
/// Unrecognized values are ignored with a warning so the next layer applies.
pub fn bool_setting(name: &str, value: Option<&str>) -> Option<bool> {
    let value = value?;
    let parsed = parse_bool(value);
    if parsed.is_none() {
        log::warn!("Ignoring unrecognized {} value '{}'", name, value);
    }
    parsed
}

/// Where cameras come from when the config file lists none.
#[derive(Debug, Clone, Copy)]
pub struct CameraSource<'a> {
    pub input_dir: &'a Path,
    pub output_dir: &'a Path,
    pub translation: Option<&'a str>,
}

/// Assemble the run configuration from its layers.
///
/// `overrides` holds command-line and environment values and wins over the
/// config file's settings; `SyncConfig::build` fills in defaults for the rest.
/// Cameras listed in the config file replace auto-discovery. Ending up with
/// no cameras at all is a configuration error.
pub fn resolve_config(overrides: Settings, file: Option<ConfigFile>, source: &CameraSource<'_>) -> Result<SyncConfig> {
    let (file_settings, file_cameras) = match file {
        Some(file) => {
            let cameras = file.cameras()?;
            (file.settings, cameras)
        }
        None => (Settings::default(), Vec::new()),
    };

    let cameras = if file_cameras.is_empty() {
        let translation = parse_camera_translation(source.translation.unwrap_or(""));
        discover_cameras(source.input_dir, source.output_dir, &translation)
    } else {
        file_cameras
    };

    if cameras.is_empty() {
        return Err(CamSyncError::Config(format!(
            "no cameras configured: add [[camera]] entries to the config file or camera directories under {}",
            source.input_dir.display()
        )));
    }

    SyncConfig::build(cameras, overrides.or(file_settings))
}

/// Parse a boolean setting. Accepts true/1/yes/on and false/0/no/off, any case.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Treat every directory directly under `input_dir` as a camera.
///
/// Destination is `output_dir/<tag>` where the tag is the translated directory
/// name. Cameras whose tag is not filesystem-safe are skipped with a warning.
pub fn discover_cameras(
    input_dir: &Path,
    output_dir: &Path,
    translation: &BTreeMap<String, String>,
) -> Vec<CameraConfig> {
    let entries = match fs::read_dir(input_dir) {
        Ok(entries) => entries,
        Err(e) => {
            log::warn!("Cannot read input directory {}: {}", input_dir.display(), e);
            return Vec::new();
        }
    };

    let mut dirs: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();

    let mut cameras = Vec::new();
    for dir in dirs {
        let Some(name) = dir.file_name().and_then(|n| n.to_str()) else {
            log::warn!("Skipping camera directory with non UTF-8 name: {}", dir.display());
            continue;
        };

        let tag = translation.get(name).map(String::as_str).unwrap_or(name);
        match CameraConfig::new(&dir, output_dir.join(tag), tag) {
            Ok(camera) => cameras.push(camera),
            Err(e) => log::warn!("Skipping camera {}: {}", dir.display(), e),
        }
    }

    log::info!(
        "Discovered {} camera(s): {:?}",
        cameras.len(),
        cameras.iter().map(|c| c.tag.as_str()).collect::<Vec<_>>()
    );

    cameras
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_camera_translation() {
        assert!(parse_camera_translation("").is_empty());

        let map = parse_camera_translation("  Camera-Tuin : garden  ,  Camera-Oprit : driveway  ");
        assert_eq!(map.get("Camera-Tuin").map(String::as_str), Some("garden"));
        assert_eq!(map.get("Camera-Oprit").map(String::as_str), Some("driveway"));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_parse_camera_translation_ignores_malformed() {
        let map = parse_camera_translation("Camera-Tuin:garden,InvalidEntry,:empty,Blank:,Camera-Oprit:driveway");
        assert_eq!(map.len(), 2);
        assert!(!map.contains_key("InvalidEntry"));
        assert!(!map.contains_key("Blank"));
    }

    #[test]
    fn test_parse_camera_translation_splits_on_first_colon() {
        let map = parse_camera_translation("Cam:a:b");
        assert_eq!(map.get("Cam").map(String::as_str), Some("a:b"));
    }

    #[test]
    fn test_parse_bool() {
        for v in ["true", "True", "1", "yes", "YES", "on", "  On \n"] {
            assert_eq!(parse_bool(v), Some(true), "{v:?}");
        }
        for v in ["false", "FALSE", "0", "no", "off", "\tOff\t"] {
            assert_eq!(parse_bool(v), Some(false), "{v:?}");
        }
        assert_eq!(parse_bool("maybe"), None);
        assert_eq!(parse_bool(""), None);
    }

    #[test]
    fn test_validate_tag() {
        assert!(validate_tag("garden").is_ok());
        assert!(validate_tag("front_door-2.cam").is_ok());
        assert!(validate_tag("").is_err());
        assert!(validate_tag(".hidden").is_err());
        assert!(validate_tag("with space").is_err());
        assert!(validate_tag("a/b").is_err());
        assert!(validate_tag("..").is_err());
    }

    #[test]
    fn test_discover_cameras() {
        let tmp = TempDir::new().unwrap();
        let input = tmp.path().join("input");
        std::fs::create_dir_all(input.join("Camera-Tuin")).unwrap();
        std::fs::create_dir_all(input.join("Camera-Oprit")).unwrap();
        std::fs::create_dir_all(input.join("Bad Name")).unwrap();
        std::fs::write(input.join("notes.txt"), b"not a camera").unwrap();

        let translation = parse_camera_translation("Camera-Tuin:garden");
        let output = tmp.path().join("output");
        let cameras = discover_cameras(&input, &output, &translation);

        // Sorted by directory name; the unsafe name and the plain file are skipped
        assert_eq!(cameras.len(), 2);
        assert_eq!(cameras[0].tag, "Camera-Oprit");
        assert_eq!(cameras[1].tag, "garden");
        assert_eq!(cameras[1].source, input.join("Camera-Tuin"));
        assert_eq!(cameras[1].destination, output.join("garden"));
    }

    #[test]
    fn test_discover_cameras_missing_input() {
        let tmp = TempDir::new().unwrap();
        let cameras = discover_cameras(&tmp.path().join("nope"), tmp.path(), &BTreeMap::new());
        assert!(cameras.is_empty());
    }

    #[test]
    fn test_config_file() {
        let file = ConfigFile::parse(
            r#"
            retention_days = 30
            sync_images = false
            video_suffixes = [".MP4", "mkv"]

            [[camera]]
            source = "/input/Camera-Tuin"
            destination = "/output/garden"
            tag = "garden"
            "#,
        )
        .unwrap();

        let cameras = file.cameras().unwrap();
        assert_eq!(cameras.len(), 1);
        assert_eq!(cameras[0].tag, "garden");

        let config = SyncConfig::build(cameras, file.settings).unwrap();
        assert_eq!(config.retention_days, 30);
        assert!(!config.sync_images);
        assert_eq!(config.video_suffixes, vec!["mp4", "mkv"]);
        assert_eq!(config.age_threshold, Duration::from_secs(DEFAULT_AGE_THRESHOLD_SECS));
    }

    #[test]
    fn test_config_file_rejects_unsafe_tag() {
        let file = ConfigFile::parse(
            r#"
            [[camera]]
            source = "/a"
            destination = "/b"
            tag = "../escape"
            "#,
        )
        .unwrap();
        assert!(matches!(file.cameras(), Err(CamSyncError::InvalidTag(_))));
    }

    #[test]
    fn test_settings_precedence() {
        let cli = Settings { retention_days: Some(10), ..Default::default() };
        let file = Settings { retention_days: Some(30), dry_run: Some(true), ..Default::default() };
        let merged = cli.or(file);
        assert_eq!(merged.retention_days, Some(10));
        assert_eq!(merged.dry_run, Some(true));
    }

    #[test]
    fn test_defaults_and_classify() {
        let config = SyncConfig::build(Vec::new(), Settings::default()).unwrap();
        assert_eq!(config.retention_days, DEFAULT_RETENTION_DAYS);
        assert!(config.sync_images);
        assert!(!config.dry_run);
        assert_eq!(config.classify(Path::new("hiv00001.MP4")), Some(MediaKind::Video));
        assert_eq!(config.classify(Path::new("hiv00001.pic")), Some(MediaKind::Image));
        assert_eq!(config.classify(Path::new("index00.bin")), None);
        assert_eq!(config.classify(Path::new("noext")), None);

        let no_images = SyncConfig::build(
            Vec::new(),
            Settings { sync_images: Some(false), ..Default::default() },
        )
        .unwrap();
        assert_eq!(no_images.classify(Path::new("hiv00001.pic")), None);
    }

    #[test]
    fn test_invalid_segment_pattern() {
        let settings = Settings { segment_dir_pattern: Some("([".to_string()), ..Default::default() };
        assert!(matches!(SyncConfig::build(Vec::new(), settings), Err(CamSyncError::Pattern(_))));
    }

    #[test]
    fn test_sync_window_capped_by_retention() {
        let build = |video: u32, image: u32, retention: u32| {
            SyncConfig::build(
                Vec::new(),
                Settings {
                    video_sync_days: Some(video),
                    image_sync_days: Some(image),
                    retention_days: Some(retention),
                    ..Default::default()
                },
            )
            .unwrap()
        };

        // Unlimited sync window still stops at the retention window
        let config = build(0, 120, 90);
        assert_eq!(config.sync_days(MediaKind::Video), 90);
        assert_eq!(config.sync_days(MediaKind::Image), 90);

        // Shorter sync windows are kept
        assert_eq!(build(7, 3, 90).sync_days(MediaKind::Image), 3);

        // Retention disabled leaves the configured window alone
        let no_retention = build(0, 120, 0);
        assert_eq!(no_retention.sync_days(MediaKind::Video), 0);
        assert_eq!(no_retention.sync_days(MediaKind::Image), 120);
    }

    #[test]
    fn test_config_file_rejects_unknown_key() {
        let result = ConfigFile::parse("retention_day = 7\n");
        assert!(matches!(result, Err(CamSyncError::Config(ref msg)) if msg.contains("retention_day")));

        let camera_typo = ConfigFile::parse(
            r#"
            [[camera]]
            source = "/a"
            destination = "/b"
            tga = "garden"
            "#,
        );
        assert!(camera_typo.is_err());
    }

    #[test]
    fn test_bool_setting_falls_through() {
        assert_eq!(bool_setting("DRY_RUN", None), None);
        assert_eq!(bool_setting("DRY_RUN", Some("yes")), Some(true));
        assert_eq!(bool_setting("DRY_RUN", Some("OFF")), Some(false));
        assert_eq!(bool_setting("DRY_RUN", Some("perhaps")), None);

        // An unrecognized flag value leaves the config file value in charge
        let overrides = Settings { dry_run: bool_setting("DRY_RUN", Some("perhaps")), ..Default::default() };
        let merged = overrides.or(Settings { dry_run: Some(true), ..Default::default() });
        assert_eq!(merged.dry_run, Some(true));
    }

    fn camera_dirs(tmp: &TempDir) -> (PathBuf, PathBuf) {
        let input = tmp.path().join("input");
        std::fs::create_dir_all(input.join("Camera-Tuin")).unwrap();
        (input, tmp.path().join("output"))
    }

    #[test]
    fn test_resolve_config_precedence() {
        let tmp = TempDir::new().unwrap();
        let (input, output) = camera_dirs(&tmp);
        let source = CameraSource { input_dir: &input, output_dir: &output, translation: Some("Camera-Tuin:garden") };
        let file = ConfigFile::parse("retention_days = 30\nage_threshold_secs = 60\n").unwrap();
        let overrides = Settings { retention_days: Some(10), ..Default::default() };

        let config = resolve_config(overrides, Some(file), &source).unwrap();

        // Flag/env over config file over default
        assert_eq!(config.retention_days, 10);
        assert_eq!(config.age_threshold, Duration::from_secs(60));
        assert_eq!(config.size_recheck_delay, Duration::from_secs(DEFAULT_SIZE_RECHECK_DELAY_SECS));
        // No [[camera]] entries: auto-discovered and translated
        assert_eq!(config.cameras.len(), 1);
        assert_eq!(config.cameras[0].tag, "garden");
        assert_eq!(config.cameras[0].destination, output.join("garden"));
    }

    #[test]
    fn test_resolve_config_file_cameras_replace_discovery() {
        let tmp = TempDir::new().unwrap();
        let (input, output) = camera_dirs(&tmp);
        let source = CameraSource { input_dir: &input, output_dir: &output, translation: None };
        let file = ConfigFile::parse(
            r#"
            [[camera]]
            source = "/mnt/driveway"
            destination = "/srv/driveway"
            tag = "driveway"
            "#,
        )
        .unwrap();

        let config = resolve_config(Settings::default(), Some(file), &source).unwrap();
        assert_eq!(config.cameras.len(), 1);
        assert_eq!(config.cameras[0].tag, "driveway");
    }

    #[test]
    fn test_resolve_config_without_cameras_fails() {
        let tmp = TempDir::new().unwrap();
        let empty = tmp.path().join("empty");
        std::fs::create_dir_all(&empty).unwrap();
        let source = CameraSource { input_dir: &empty, output_dir: tmp.path(), translation: None };

        let result = resolve_config(Settings::default(), None, &source);
        assert!(matches!(result, Err(CamSyncError::Config(_))));
    }
}
