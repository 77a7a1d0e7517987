//! Temporary sorted runs stored on file system.

use std::fs;
use std::io;
use std::io::prelude::*;
use std::path::{Path, PathBuf};

use log;
use tempfile;

use crate::record::Record;
use crate::sort::{SortError, Stage};

/// Prefix of the per-sort temporary directory holding run files.
pub const RUN_DIR_PREFIX: &str = ".ext-line-sort-";

/// Sorted run persisted on file system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Run {
    index: usize,
    path: PathBuf,
}

impl Run {
    /// Returns the path of a run file with index `index` inside `dir`.
    pub fn path_in(dir: &Path, index: usize) -> PathBuf {
        dir.join(format!("run_{:06}.txt", index))
    }

    /// Writes sorted records to a new run file, one `"<number>. <text>"` line per record.
    /// The file is flushed and synced before the run is returned.
    ///
    /// # Arguments
    /// * `dir` - Directory the run file is created in
    /// * `index` - Run index assigned when the chunk was produced
    /// * `records` - Sorted records
    /// * `buf_size` - File write buffer size
    pub fn write<'a>(
        dir: &Path,
        index: usize,
        records: impl IntoIterator<Item = &'a Record>,
        buf_size: Option<usize>,
    ) -> Result<Self, SortError> {
        let path = Self::path_in(dir, index);
        let io_err = |err| SortError::io(Stage::WriteRun, Some(path.as_path()), err);

        let file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(io_err)?;

        let mut writer = match buf_size {
            Some(buf_size) => io::BufWriter::with_capacity(buf_size, file),
            None => io::BufWriter::new(file),
        };

        for record in records.into_iter() {
            writeln!(writer, "{}", record).map_err(io_err)?;
        }

        let file = writer.into_inner().map_err(|err| io_err(err.into_error()))?;
        file.sync_all().map_err(io_err)?;

        return Ok(Run { index, path });
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opens a reader over the run records.
    pub fn open(&self, buf_size: Option<usize>) -> Result<RunReader, SortError> {
        let file =
            fs::File::open(&self.path).map_err(|err| SortError::io(Stage::Merge, Some(self.path.as_path()), err))?;
        let reader = match buf_size {
            Some(buf_size) => io::BufReader::with_capacity(buf_size, file),
            None => io::BufReader::new(file),
        };

        return Ok(RunReader {
            path: self.path.clone(),
            lines: Some(reader.lines()),
            line_number: 0,
        });
    }
}

/// Single-pass reader of a run. The run file is closed and removed as soon as it is drained.
pub struct RunReader {
    path: PathBuf,
    lines: Option<io::Lines<io::BufReader<fs::File>>>,
    line_number: u64,
}

impl RunReader {
    fn finish(&mut self) {
        if self.lines.take().is_some() {
            match fs::remove_file(&self.path) {
                Ok(()) => log::debug!("run {} drained and removed", self.path.display()),
                Err(err) => log::warn!("drained run {} not removed: {}", self.path.display(), err),
            }
        }
    }
}

impl Iterator for RunReader {
    type Item = Result<Record, SortError>;

    fn next(&mut self) -> Option<Self::Item> {
        let line = match self.lines.as_mut()?.next() {
            Some(Ok(line)) => line,
            Some(Err(err)) => {
                self.lines = None;
                return Some(Err(SortError::io(Stage::Merge, Some(self.path.as_path()), err)));
            }
            None => {
                self.finish();
                return None;
            }
        };
        self.line_number += 1;

        match Record::parse(&line) {
            Ok(record) => Some(Ok(record)),
            Err(err) => {
                self.lines = None;
                Some(Err(SortError::MalformedRecord {
                    stage: Stage::Merge,
                    path: Some(self.path.clone()),
                    line: self.line_number,
                    source: err,
                }))
            }
        }
    }
}

/// Set of runs produced by one sort. Owns the temporary directory the runs live in:
/// every run still present is removed when the set is closed or dropped, whatever
/// way the merge phase ended.
pub struct RunSet {
    dir: tempfile::TempDir,
    runs: Vec<Run>,
}

impl RunSet {
    /// Creates an empty run directory inside `parent` (OS temporary directory if [`None`]).
    pub fn create(parent: Option<&Path>) -> Result<Self, SortError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(RUN_DIR_PREFIX);

        let dir = match parent {
            Some(parent) => builder.tempdir_in(parent),
            None => builder.tempdir(),
        }
        .map_err(SortError::TempDir)?;

        log::info!("using {} as a temporary directory", dir.path().display());

        return Ok(RunSet { dir, runs: Vec::new() });
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn runs(&self) -> &[Run] {
        &self.runs
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Registers written runs, keeping them ordered by index.
    pub fn extend(&mut self, runs: impl IntoIterator<Item = Run>) {
        self.runs.extend(runs);
        self.runs.sort_by_key(Run::index);
    }

    /// Opens a reader for every run.
    pub fn open_all(&self, buf_size: Option<usize>) -> Result<Vec<RunReader>, SortError> {
        self.runs.iter().map(|run| run.open(buf_size)).collect()
    }

    /// Removes the run directory with all remaining runs.
    pub fn close(self) {
        let path = self.dir.path().to_path_buf();
        match self.dir.close() {
            Ok(()) => log::debug!("temporary directory {} removed", path.display()),
            Err(err) => log::warn!("temporary directory {} not removed: {}", path.display(), err),
        }
    }
}
