use crate::instrument::ProfilingMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default location of the trace database.
pub const DEFAULT_DATABASE: &str = "traces/database.json";

/// Configuration of trace generation and basic block profiling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Only accumulate the per-kernel header, do not record events.
    pub header_only: bool,
    /// Path of the trace database.
    ///
    /// Trace and header files are written next to it.
    pub database: PathBuf,
    /// Kernel to analyze for basic block profiling.
    ///
    /// All kernels of the module when unset.
    pub kernel_name: Option<String>,
    /// Basic block profiling mode.
    pub mode: Option<ProfilingMode>,
    /// Number of threads grouped into one half-warp when estimating coalescing.
    pub half_warp_size: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            header_only: false,
            database: PathBuf::from(DEFAULT_DATABASE),
            kernel_name: None,
            mode: None,
            half_warp_size: trace_model::WARP_SIZE / 2,
        }
    }
}

impl Config {
    pub fn from_reader(reader: impl std::io::Read) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_reader(reader)
    }

    /// Directory receiving the trace and header files.
    #[must_use]
    pub fn trace_dir(&self) -> &Path {
        match self.database.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }
}
