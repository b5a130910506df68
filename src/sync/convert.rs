// Converter boundary
//
// Turning camera-native files into standard mp4/jpg is somebody else's job.
// The engine only asks a Converter to write the rendition of a source file to
// a path and treats any error as a failed placement.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{CamSyncError, Result};
use crate::sync::discover::CandidateFile;
use crate::sync::MediaKind;

pub trait Converter {
    /// Write the standard-format rendition of `source` to `output`.
    fn convert(&self, source: &Path, kind: MediaKind, output: &Path) -> Result<()>;

    /// Size the rendition will have, when known without converting. Lets the
    /// placement engine recognize already-placed files before doing any work.
    fn output_size_hint(&self, _candidate: &CandidateFile) -> Option<u64> {
        None
    }
}

/// For cameras that already record standard files: a verified byte copy.
///
/// Only sources already in the output format qualify. Anything else (such as
/// a camera-native `.pic` container) needs a real converter and fails here.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughConverter;

impl PassthroughConverter {
    fn accepts(source: &Path, kind: MediaKind) -> bool {
        source
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case(kind.output_extension()))
            .unwrap_or(false)
    }
}

impl Converter for PassthroughConverter {
    fn convert(&self, source: &Path, kind: MediaKind, output: &Path) -> Result<()> {
        if !Self::accepts(source, kind) {
            return Err(CamSyncError::Conversion(format!(
                "{} is not a .{} file; configure a converter for this format",
                source.display(),
                kind.output_extension()
            )));
        }

        let copied = fs::copy(source, output)?;
        fs::File::open(output)?.sync_all()?;

        let source_size = fs::metadata(source)?.len();
        if copied != source_size {
            return Err(CamSyncError::Conversion(format!(
                "size mismatch after copy ({} vs {})",
                copied, source_size
            )));
        }
        Ok(())
    }

    fn output_size_hint(&self, candidate: &CandidateFile) -> Option<u64> {
        Self::accepts(&candidate.path, candidate.kind).then_some(candidate.size)
    }
}

/// Runs an external program per file.
///
/// Built from a template such as `hikextract --kind {kind} {input} {output}`;
/// `{input}`, `{output}` and `{kind}` (`video`/`image`) are substituted per
/// argument.
#[derive(Debug, Clone)]
pub struct CommandConverter {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandConverter {
    pub fn parse(template: &str) -> Result<Self> {
        let mut parts = template.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| CamSyncError::Config("converter command is empty".to_string()))?;
        let args: Vec<String> = parts.map(String::from).collect();

        if !args.iter().any(|a| a.contains("{output}")) {
            return Err(CamSyncError::Config(format!(
                "converter command must reference {{output}}: {}",
                template
            )));
        }

        Ok(Self {
            program: crate::tools::converter_path(program),
            args,
        })
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn render_args(&self, source: &Path, kind: MediaKind, output: &Path) -> Vec<String> {
        let input = source.to_string_lossy();
        let output = output.to_string_lossy();
        self.args
            .iter()
            .map(|a| {
                a.replace("{input}", &input)
                    .replace("{output}", &output)
                    .replace("{kind}", kind.as_str())
            })
            .collect()
    }
}

impl Converter for CommandConverter {
    fn convert(&self, source: &Path, kind: MediaKind, output: &Path) -> Result<()> {
        let result = Command::new(&self.program)
            .args(self.render_args(source, kind, output))
            .output()
            .map_err(|e| {
                CamSyncError::Conversion(format!("failed to run {}: {}", self.program.display(), e))
            })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(CamSyncError::Conversion(format!(
                "{} exited with {}: {}",
                self.program.display(),
                result.status,
                stderr.trim()
            )));
        }

        if !output.is_file() {
            return Err(CamSyncError::Conversion(format!(
                "{} did not produce {}",
                self.program.display(),
                output.display()
            )));
        }
        Ok(())
    }
}

/// Pick the converter for a run: the configured command, or a plain copy.
pub fn converter_for(template: Option<&str>) -> Result<Box<dyn Converter>> {
    match template {
        Some(t) => Ok(Box::new(CommandConverter::parse(t)?)),
        None => Ok(Box::new(PassthroughConverter)),
    }
}
