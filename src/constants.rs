// Camsync Constants
// Defaults for the sync and retention passes. Every value here can be overridden
// through config, except the output folder names and extensions which define the
// on-disk layout.

// Output layout
pub const VIDEO_FOLDER: &str = "video";
pub const IMAGES_FOLDER: &str = "images";
pub const VIDEO_OUTPUT_EXTENSION: &str = "mp4";
pub const IMAGE_OUTPUT_EXTENSION: &str = "jpg";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

// Temp artifacts: "<final name>.part.<pid>"
pub const TEMP_FILE_MARKER: &str = ".part.";

// Collision handling
pub const MAX_COLLISION_ATTEMPTS: u32 = 1000;

// Stability
pub const DEFAULT_AGE_THRESHOLD_SECS: u64 = 120;
pub const DEFAULT_SIZE_RECHECK_DELAY_SECS: u64 = 2;

// Sync windows (0 = unlimited)
pub const DEFAULT_VIDEO_SYNC_DAYS: u32 = 7;
pub const DEFAULT_IMAGE_SYNC_DAYS: u32 = 7;

// Retention
pub const DEFAULT_RETENTION_DAYS: u32 = 90;
pub const SECONDS_PER_DAY: u64 = 86_400;

// Paths
pub const DEFAULT_INPUT_DIR: &str = "/input";
pub const DEFAULT_OUTPUT_DIR: &str = "/output";
pub const DEFAULT_LOCK_FILE: &str = "/tmp/camsync.lock";
pub const RETENTION_LOCK_QUALIFIER: &str = "retention";

// Camera storage layout. Cameras write into numbered segment directories
// (datadir0, datadir1, ...) directly below their root.
pub const DEFAULT_SEGMENT_DIR_PATTERN: &str = r"^datadir\d+$";

// Source suffixes (case-insensitive)
pub const DEFAULT_VIDEO_SUFFIXES: [&str; 1] = ["mp4"];
pub const DEFAULT_IMAGE_SUFFIXES: [&str; 2] = ["pic", "jpg"];

// Converter program lookup
pub const CONVERTER_PATH_ENV: &str = "CAMSYNC_CONVERTER_PATH";
