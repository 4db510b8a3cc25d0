use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Fs(#[from] utils::fs::Error),

    #[error("failed to parse trace database {path:?}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to write trace database {path:?}")]
    Write {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Trace files generated for one kernel launch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TraceEntry {
    /// Kernel name.
    pub name: String,
    /// Path of the module containing the kernel.
    pub module: String,
    /// Format of the trace.
    pub format: String,
    /// Trace body.
    pub path: PathBuf,
    pub header: PathBuf,
}

impl TraceEntry {
    /// Registers this entry in the database at `path`.
    pub fn update_database(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        let path = path.as_ref();
        let mut database = TraceDatabase::open(path)?;
        database.insert(self.clone());
        database.save(path)?;
        log::debug!(
            "registered trace {} of kernel {} in {}",
            self.path.display(),
            self.name,
            path.display()
        );
        Ok(())
    }
}

impl std::fmt::Display for TraceEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{}] {} ({})",
            self.name,
            self.format,
            self.path.display(),
            self.module
        )
    }
}

/// Index of all generated traces, stored as a JSON list.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TraceDatabase {
    pub entries: Vec<TraceEntry>,
}

impl TraceDatabase {
    /// Loads the database at `path`.
    ///
    /// A missing file is an empty database.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        if !path.is_file() {
            return Ok(Self::default());
        }
        let reader = utils::fs::open_readable(path)?;
        serde_json::from_reader(reader).map_err(|source| Error::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Writes the database to `path`, replacing its previous contents.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        use std::io::Write;
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            utils::fs::create_dirs(parent)?;
        }
        let mut writer = utils::fs::open_writable(path)?;
        write_json(&mut writer, self).map_err(|source| Error::Write {
            path: path.to_path_buf(),
            source,
        })?;
        writer.flush()?;
        Ok(())
    }

    /// Inserts `entry`, replacing an existing entry for the same trace file.
    pub fn insert(&mut self, entry: TraceEntry) {
        match self.entries.iter_mut().find(|e| e.path == entry.path) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    /// Entries of kernel `name` in insertion order.
    pub fn find<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a TraceEntry> + 'a {
        self.entries.iter().filter(move |entry| entry.name == name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Serializes `value` as JSON indented by four spaces.
pub fn write_json<W, T>(writer: W, value: &T) -> Result<(), serde_json::Error>
where
    W: std::io::Write,
    T: Serialize + ?Sized,
{
    let mut serializer = serde_json::Serializer::with_formatter(
        writer,
        serde_json::ser::PrettyFormatter::with_indent(b"    "),
    );
    value.serialize(&mut serializer)
}
