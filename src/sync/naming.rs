// Output file naming
//
// Every placed file is named `YYYY-MM-DD_HH-MM-SS-<tag>[_<n>].<ext>`, built from
// the source file's modification time (local time). `<n>` starts at 1 and is
// only present when the plain name is taken by different content.

use std::time::SystemTime;

use chrono::{DateTime, Local};

use crate::constants::{TEMP_FILE_MARKER, TIMESTAMP_FORMAT};
use crate::sync::MediaKind;

pub fn format_timestamp(modified: SystemTime) -> String {
    let datetime: DateTime<Local> = modified.into();
    datetime.format(TIMESTAMP_FORMAT).to_string()
}

/// `counter == 0` gives the plain name.
pub fn output_file_name(timestamp: &str, tag: &str, kind: MediaKind, counter: u32) -> String {
    if counter == 0 {
        format!("{}-{}.{}", timestamp, tag, kind.output_extension())
    } else {
        format!("{}-{}_{}.{}", timestamp, tag, counter, kind.output_extension())
    }
}

/// Sibling name used while a file is being written. Unique per process, and
/// never matches the output name pattern.
pub fn temp_file_name(final_name: &str) -> String {
    format!("{}{}{}", final_name, TEMP_FILE_MARKER, std::process::id())
}

#[cfg(test)]
pub fn is_temp_file_name(name: &str) -> bool {
    name.contains(TEMP_FILE_MARKER)
}

/// Whether `name` is a well-formed output name for this tag and kind.
#[cfg(test)]
pub fn is_output_file_name(name: &str, tag: &str, kind: MediaKind) -> bool {
    let pattern = format!(
        r"^\d{{4}}-\d{{2}}-\d{{2}}_\d{{2}}-\d{{2}}-\d{{2}}-{}(_[1-9]\d*)?\.{}$",
        regex::escape(tag),
        kind.output_extension()
    );
    regex::Regex::new(&pattern)
        .map(|re| re.is_match(name))
        .unwrap_or(false)
}
