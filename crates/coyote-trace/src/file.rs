//! Replay trace files.
//!
//! A [`TraceFile`] is the reproducible artifact of a bug: the full decision
//! trace plus the metadata needed to rerun it (test name, seed, strategy,
//! iteration, configuration snapshot). Files are pretty-printed JSON so they
//! can be diffed and attached to bug reports.

use crate::trace::ExecutionTrace;
use serde::{Deserialize, Serialize};
use snafu::{ensure, ResultExt, Snafu};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Current on-disk format version.
pub const TRACE_FORMAT_VERSION: u32 = 1;

/// Errors reading or writing trace files.
#[derive(Debug, Snafu)]
pub enum TraceFileError {
    #[snafu(display("I/O error on {}: {source}", path.display()))]
    Io { source: std::io::Error, path: PathBuf },

    #[snafu(display("JSON error in {}: {source}", path.display()))]
    Json { source: serde_json::Error, path: PathBuf },

    #[snafu(display("{}: unsupported trace format version {found} (expected {expected})", path.display()))]
    UnsupportedVersion { found: u32, expected: u32, path: PathBuf },
}

/// Classification and message of the bug a trace reproduces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedBug {
    pub kind: String,
    pub message: String,
}

/// A serialized execution trace with its run metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceFile {
    pub version: u32,
    pub test_name: String,
    pub seed: u64,
    /// Description of the strategy that produced the trace.
    pub strategy: String,
    pub iteration: u32,
    /// Whether the recording strategy was fair, which selects the step
    /// bound a replay runs under.
    #[serde(default = "default_fair")]
    pub fair: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bug: Option<RecordedBug>,
    /// Configuration snapshot, opaque to this crate.
    #[serde(default)]
    pub config: serde_json::Value,
    pub trace: ExecutionTrace,
}

impl TraceFile {
    pub fn new(
        test_name: impl Into<String>,
        seed: u64,
        strategy: impl Into<String>,
        iteration: u32,
        trace: ExecutionTrace,
    ) -> Self {
        Self {
            version: TRACE_FORMAT_VERSION,
            test_name: test_name.into(),
            seed,
            strategy: strategy.into(),
            iteration,
            fair: true,
            bug: None,
            config: serde_json::Value::Null,
            trace,
        }
    }

    pub fn with_bug(mut self, kind: impl Into<String>, message: impl Into<String>) -> Self {
        self.bug = Some(RecordedBug {
            kind: kind.into(),
            message: message.into(),
        });
        self
    }

    pub fn with_fairness(mut self, fair: bool) -> Self {
        self.fair = fair;
        self
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    /// Conventional file name: `<test>-iter<N>.trace.json`.
    pub fn file_name(&self) -> String {
        let sanitized: String = self
            .test_name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        let stem = if sanitized.is_empty() { "test".to_string() } else { sanitized };
        format!("{}-iter{}.trace.json", stem, self.iteration)
    }
}

fn default_fair() -> bool {
    true
}

/// Save a trace file as pretty-printed JSON.
pub fn save_trace_file(file: &TraceFile, path: &Path) -> Result<(), TraceFileError> {
    let mut writer = BufWriter::new(File::create(path).context(IoSnafu { path })?);
    serde_json::to_writer_pretty(&mut writer, file).context(JsonSnafu { path })?;
    writer.write_all(b"\n").context(IoSnafu { path })?;
    writer.flush().context(IoSnafu { path })?;
    Ok(())
}

/// Load a trace file, rejecting unknown format versions.
pub fn load_trace_file(path: &Path) -> Result<TraceFile, TraceFileError> {
    let reader = BufReader::new(File::open(path).context(IoSnafu { path })?);
    let file: TraceFile = serde_json::from_reader(reader).context(JsonSnafu { path })?;
    ensure!(
        file.version == TRACE_FORMAT_VERSION,
        UnsupportedVersionSnafu {
            found: file.version,
            expected: TRACE_FORMAT_VERSION,
            path,
        }
    );
    Ok(file)
}
