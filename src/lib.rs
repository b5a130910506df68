// Camsync - Library Entry Point
//
// Sync pass: discover -> stability filter -> placement, per camera.
// Retention pass: sweep each camera's destination tree.
// Each pass runs under its own execution lock (see `lock`).

pub mod constants;
pub mod error;
pub mod config;
pub mod lock;
pub mod tools;
pub mod sync;
pub mod retention;

pub use config::{CameraConfig, Settings, SyncConfig};
pub use error::{CamSyncError, Result};
pub use lock::{LockGuard, LockKind, LockOutcome};
pub use retention::{run_retention_pass, RetentionReport};
pub use sync::{run_sync_pass, MediaKind, SyncReport};
