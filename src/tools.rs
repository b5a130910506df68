// External converter program resolver
//
// Resolution order for a bare program name:
// 1) CAMSYNC_CONVERTER_PATH environment override
// 2) Next to the executable (or its bin/ subdirectory)
// 3) PATH lookup at spawn time
// Names containing a path separator are used as given.

use std::env;
use std::path::{Path, PathBuf};

use crate::constants::CONVERTER_PATH_ENV;

/// Get the directory containing the current executable
fn exe_dir() -> Option<PathBuf> {
    env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|d| d.to_path_buf()))
}

fn resolve_tool(env_key: &str, default_name: &str) -> PathBuf {
    if let Ok(v) = env::var(env_key) {
        let p = PathBuf::from(&v);
        if p.exists() {
            return p;
        }
    }

    let mut filename = default_name.to_string();
    if cfg!(windows) && !filename.to_lowercase().ends_with(".exe") {
        filename.push_str(".exe");
    }

    if let Some(dir) = exe_dir() {
        let candidate = dir.join(&filename);
        if candidate.exists() {
            return candidate;
        }

        let bin_candidate = dir.join("bin").join(&filename);
        if bin_candidate.exists() {
            return bin_candidate;
        }
    }

    PathBuf::from(default_name)
}

/// Resolve the program named first in a converter command template.
pub fn converter_path(program: &str) -> PathBuf {
    if Path::new(program).components().count() > 1 {
        return PathBuf::from(program);
    }
    resolve_tool(CONVERTER_PATH_ENV, program)
}
