use serde::{de::DeserializeOwned, Serialize};
use std::io::{BufRead, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("stream {path:?} is closed")]
    Closed { path: PathBuf },

    #[error(transparent)]
    Open(#[from] utils::fs::Error),

    #[error(transparent)]
    Encode(#[from] rmp_serde::encode::Error),

    #[error(transparent)]
    Decode(#[from] rmp_serde::decode::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Forward-only output stream of MessagePack values.
///
/// The underlying file is flushed and released exactly once, either by
/// [`TraceStream::close`] or when the stream is dropped.
#[derive(Debug)]
pub struct TraceStream {
    path: PathBuf,
    writer: Option<std::io::BufWriter<std::fs::File>>,
    num_values: u64,
}

impl TraceStream {
    /// Creates (or truncates) the file at `path`.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, utils::fs::Error> {
        let path = path.into();
        let writer = utils::fs::open_writable(&path)?;
        Ok(Self {
            path,
            writer: Some(writer),
            num_values: 0,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    /// Number of values written so far.
    #[must_use]
    pub fn num_values(&self) -> u64 {
        self.num_values
    }

    /// Appends `value` to the stream.
    pub fn write<T>(&mut self, value: &T) -> Result<(), Error>
    where
        T: Serialize + ?Sized,
    {
        let writer = self.writer.as_mut().ok_or_else(|| Error::Closed {
            path: self.path.clone(),
        })?;
        rmp_serde::encode::write(writer, value)?;
        self.num_values += 1;
        Ok(())
    }

    /// Flushes and releases the stream.
    ///
    /// Closing an already closed stream does nothing.
    pub fn close(&mut self) -> std::io::Result<()> {
        match self.writer.take() {
            Some(mut writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for TraceStream {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            log::warn!("failed to close {}: {err}", self.path.display());
        }
    }
}

/// Lazily decodes a sequence of MessagePack values.
///
/// Values are decoded one at a time, the stream is never loaded as a whole.
#[derive(Debug)]
pub struct StreamReader<R, T> {
    reader: R,
    value: PhantomData<T>,
}

impl<R, T> StreamReader<R, T> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            value: PhantomData,
        }
    }
}

impl<T> StreamReader<std::io::BufReader<std::fs::File>, T> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        Ok(Self::new(utils::fs::open_readable(path)?))
    }
}

impl<R, T> Iterator for StreamReader<R, T>
where
    R: BufRead,
    T: DeserializeOwned,
{
    type Item = Result<T, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        let at_end = match self.reader.fill_buf() {
            Ok(buf) => buf.is_empty(),
            Err(err) => return Some(Err(err.into())),
        };
        if at_end {
            return None;
        }
        Some(rmp_serde::from_read(&mut self.reader).map_err(Error::from))
    }
}

/// Decodes the single value stored in the file at `path`.
pub fn read_value<T>(path: impl AsRef<Path>) -> Result<T, Error>
where
    T: DeserializeOwned,
{
    let reader = utils::fs::open_readable(path)?;
    Ok(rmp_serde::from_read(reader)?)
}
