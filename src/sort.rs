//! External sorter.

use log;
use std::collections::TryReserveError;
use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::fs;
use std::io;
use std::io::prelude::*;
use std::path::{Path, PathBuf};

use crate::buffer::{ChunkBufferBuilder, LimitedBufferBuilder};
use crate::merger::BinaryHeapMerger;
use crate::pipeline::{MergePipeline, MergeSummary, SplitPipeline, SplitSummary};
use crate::record::ParseError;
use crate::run::RunSet;

/// Default number of merged records handed to the output writer at once.
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

/// Pipeline stage an error occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Reading and parsing the input into chunks.
    ReadInput,
    /// Sorting a chunk in memory.
    SortChunk,
    /// Writing a sorted chunk to a run file.
    WriteRun,
    /// Merging runs.
    Merge,
    /// Writing merged records to the output.
    WriteOutput,
}

impl Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::ReadInput => "read input",
            Stage::SortChunk => "sort chunk",
            Stage::WriteRun => "write run",
            Stage::Merge => "merge",
            Stage::WriteOutput => "write output",
        };
        f.write_str(name)
    }
}

/// Sorting error.
#[derive(Debug)]
pub enum SortError {
    /// Temporary directory creation error.
    TempDir(io::Error),
    /// Workers thread pool initialization error.
    ThreadPoolBuildError(rayon::ThreadPoolBuildError),
    /// Sorter configuration error.
    InvalidConfig(&'static str),
    /// Chunk buffer of the configured size can not be allocated.
    ChunkAllocation(TryReserveError),
    /// I/O error on the input, a run or the output.
    IO {
        stage: Stage,
        path: Option<PathBuf>,
        source: io::Error,
    },
    /// A line doesn't have `"<number>. <text>"` shape.
    MalformedRecord {
        stage: Stage,
        path: Option<PathBuf>,
        line: u64,
        source: ParseError,
    },
    /// A stage stopped because its neighbour stage went away.
    Pipeline(Stage),
    /// A stage thread panicked.
    StagePanicked(Stage),
}

impl SortError {
    pub(crate) fn io(stage: Stage, path: Option<&Path>, source: io::Error) -> Self {
        SortError::IO {
            stage,
            path: path.map(Path::to_path_buf),
            source,
        }
    }

    /// Returns the stage the error occurred in if the error is tied to a stage.
    pub fn stage(&self) -> Option<Stage> {
        match &self {
            SortError::IO { stage, .. } => Some(*stage),
            SortError::MalformedRecord { stage, .. } => Some(*stage),
            SortError::Pipeline(stage) => Some(*stage),
            SortError::StagePanicked(stage) => Some(*stage),
            SortError::ChunkAllocation(_) => Some(Stage::ReadInput),
            _ => None,
        }
    }

    /// Checks whether the error is only a consequence of another stage failure.
    pub fn is_pipeline(&self) -> bool {
        matches!(self, SortError::Pipeline(_))
    }
}

impl Error for SortError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            SortError::TempDir(err) => Some(err),
            SortError::ThreadPoolBuildError(err) => Some(err),
            SortError::ChunkAllocation(err) => Some(err),
            SortError::IO { source, .. } => Some(source),
            SortError::MalformedRecord { source, .. } => Some(source),
            SortError::InvalidConfig(_) | SortError::Pipeline(_) | SortError::StagePanicked(_) => None,
        }
    }
}

struct DisplayPath<'a>(&'a Option<PathBuf>);

impl Display for DisplayPath<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(path) => write!(f, " ({})", path.display()),
            None => Ok(()),
        }
    }
}

impl Display for SortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            SortError::TempDir(err) => write!(f, "temporary directory not created: {}", err),
            SortError::ThreadPoolBuildError(err) => write!(f, "thread pool initialization failed: {}", err),
            SortError::InvalidConfig(msg) => write!(f, "invalid sorter configuration: {}", msg),
            SortError::ChunkAllocation(err) => write!(f, "[{}] chunk buffer not allocated: {}", Stage::ReadInput, err),
            SortError::IO { stage, path, source } => {
                write!(f, "[{}] I/O operation failed{}: {}", stage, DisplayPath(path), source)
            }
            SortError::MalformedRecord {
                stage,
                path,
                line,
                source,
            } => write!(f, "[{}] malformed record at line {}{}: {}", stage, line, DisplayPath(path), source),
            SortError::Pipeline(stage) => write!(f, "[{}] pipeline interrupted by a failed stage", stage),
            SortError::StagePanicked(stage) => write!(f, "[{}] stage thread panicked", stage),
        }
    }
}

/// Sorting statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SortSummary {
    /// Lines read from the input, blank ones included.
    pub input_lines: u64,
    /// Records parsed from the input.
    pub records: u64,
    /// Runs written during the split phase.
    pub runs: usize,
    /// Records written to runs.
    pub run_records: u64,
    /// Records produced by the merger.
    pub merged: u64,
    /// Records written to the output.
    pub written: u64,
}

impl SortSummary {
    fn new(split: SplitSummary, merge: MergeSummary) -> Self {
        SortSummary {
            input_lines: split.input_lines,
            records: split.records,
            runs: split.runs,
            run_records: split.run_records,
            merged: merge.merged,
            written: merge.written,
        }
    }
}

/// External sorter builder. Provides methods for [`ExternalSorter`] initialization.
#[derive(Clone)]
pub struct ExternalSorterBuilder<B = LimitedBufferBuilder>
where
    B: ChunkBufferBuilder,
{
    /// Number of threads to be used to sort chunks in parallel.
    threads_number: Option<usize>,
    /// Directory the temporary run directory is created in.
    tmp_dir: Option<Box<Path>>,
    /// Run and output files read/write buffer size.
    rw_buf_size: Option<usize>,
    /// Number of merged records handed to the output writer at once.
    batch_size: usize,
    /// Chunk buffer builder.
    buffer_builder: B,
}

impl ExternalSorterBuilder<LimitedBufferBuilder> {
    /// Creates an instance of a builder with default parameters.
    pub fn new() -> Self {
        ExternalSorterBuilder::default()
    }

    /// Sets maximum number of records in a chunk. Chunks are preallocated, so a chunk size
    /// that can not be satisfied fails with [`SortError::ChunkAllocation`] before any record is read.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.buffer_builder = LimitedBufferBuilder::new(chunk_size, true);
        return self;
    }
}

impl<B> ExternalSorterBuilder<B>
where
    B: ChunkBufferBuilder,
{
    /// Builds an [`ExternalSorter`] instance using provided configuration.
    pub fn build(self) -> Result<ExternalSorter<B>, SortError> {
        ExternalSorter::new(
            self.threads_number,
            self.tmp_dir.as_deref(),
            self.buffer_builder,
            self.batch_size,
            self.rw_buf_size,
        )
    }

    /// Sets number of threads to be used to sort chunks in parallel.
    pub fn with_threads_number(mut self, threads_number: usize) -> Self {
        self.threads_number = Some(threads_number);
        return self;
    }

    /// Sets directory to be used to store temporary data.
    pub fn with_tmp_dir(mut self, path: &Path) -> Self {
        self.tmp_dir = Some(path.into());
        return self;
    }

    /// Sets chunk buffer builder.
    pub fn with_buffer<N: ChunkBufferBuilder>(self, buffer_builder: N) -> ExternalSorterBuilder<N> {
        ExternalSorterBuilder {
            threads_number: self.threads_number,
            tmp_dir: self.tmp_dir,
            rw_buf_size: self.rw_buf_size,
            batch_size: self.batch_size,
            buffer_builder,
        }
    }

    /// Sets number of merged records handed to the output writer at once.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        return self;
    }

    /// Sets run and output files read/write buffer size.
    pub fn with_rw_buf_size(mut self, buf_size: usize) -> Self {
        self.rw_buf_size = Some(buf_size);
        return self;
    }
}

impl<B> Default for ExternalSorterBuilder<B>
where
    B: ChunkBufferBuilder,
{
    fn default() -> Self {
        ExternalSorterBuilder {
            threads_number: None,
            tmp_dir: None,
            rw_buf_size: None,
            batch_size: DEFAULT_BATCH_SIZE,
            buffer_builder: B::default(),
        }
    }
}

/// External sorter of `"<number>. <text>"` lines.
///
/// Sorting runs in two sequential phases. The split phase reads the input, sorts it chunk
/// by chunk and persists every sorted chunk as a run file. The merge phase streams all runs
/// back through a binary heap into the output. Both phases are pipelines of stages running
/// in their own threads and connected by single-slot channels.
pub struct ExternalSorter<B = LimitedBufferBuilder>
where
    B: ChunkBufferBuilder,
{
    /// Chunk sorting thread pool.
    thread_pool: rayon::ThreadPool,
    /// Directory the temporary run directory is created in.
    tmp_dir: Option<Box<Path>>,
    /// Chunk buffer builder.
    buffer_builder: B,
    /// Number of merged records handed to the output writer at once.
    batch_size: usize,
    /// Run and output files read/write buffer size.
    rw_buf_size: Option<usize>,
}

impl<B> ExternalSorter<B>
where
    B: ChunkBufferBuilder,
{
    /// Creates a new external sorter instance.
    ///
    /// # Arguments
    /// * `threads_number` - Number of threads to be used to sort chunks in parallel. If the parameter is [`None`]
    ///   threads number will be selected based on available CPU core number.
    /// * `tmp_path` - Directory the temporary run directory is created in. If parameter is [`None`] default OS
    ///   temporary directory will be used.
    /// * `buffer_builder` - An instance of a buffer builder that will be used for chunk buffer creation.
    /// * `batch_size` - Number of merged records handed to the output writer at once.
    /// * `rw_buf_size` - Run and output files read/write buffer size.
    pub fn new(
        threads_number: Option<usize>,
        tmp_path: Option<&Path>,
        buffer_builder: B,
        batch_size: usize,
        rw_buf_size: Option<usize>,
    ) -> Result<Self, SortError> {
        if !buffer_builder.is_valid() {
            return Err(SortError::InvalidConfig("chunk size must be positive"));
        }
        if batch_size == 0 {
            return Err(SortError::InvalidConfig("batch size must be positive"));
        }
        if rw_buf_size == Some(0) {
            return Err(SortError::InvalidConfig("read/write buffer size must be positive"));
        }

        return Ok(ExternalSorter {
            thread_pool: Self::init_thread_pool(threads_number)?,
            tmp_dir: tmp_path.map(Into::into),
            buffer_builder,
            batch_size,
            rw_buf_size,
        });
    }

    fn init_thread_pool(threads_number: Option<usize>) -> Result<rayon::ThreadPool, SortError> {
        let mut thread_pool_builder = rayon::ThreadPoolBuilder::new();

        if let Some(threads_number) = threads_number {
            log::info!("initializing thread-pool (threads: {})", threads_number);
            thread_pool_builder = thread_pool_builder.num_threads(threads_number);
        } else {
            log::info!("initializing thread-pool (threads: default)");
        }
        let thread_pool = thread_pool_builder
            .build()
            .map_err(|err| SortError::ThreadPoolBuildError(err))?;

        return Ok(thread_pool);
    }

    /// Sorts lines from the input and writes them to the output.
    /// Blank lines are skipped, any other line that is not a record fails the sort.
    ///
    /// # Arguments
    /// * `input` - Input stream data to be fetched from
    /// * `output` - Output stream sorted data to be written to
    pub fn sort<R, W>(&self, input: R, output: W) -> Result<SortSummary, SortError>
    where
        R: BufRead + Send,
        W: Write + Send,
    {
        let (run_set, split) = self.split(input, None)?;
        let merge = self.merge(run_set, output, None)?;

        return Ok(self.summarize(split, merge));
    }

    /// Sorts the file at `input_path` into the file at `output_path`.
    ///
    /// The output file is created only when the split phase succeeded, so malformed input
    /// leaves no output behind. If the merge phase fails the partially written output is removed.
    pub fn sort_file(&self, input_path: &Path, output_path: &Path) -> Result<SortSummary, SortError> {
        let input = fs::File::open(input_path).map_err(|err| SortError::io(Stage::ReadInput, Some(input_path), err))?;
        let input = match self.rw_buf_size {
            Some(buf_size) => io::BufReader::with_capacity(buf_size, input),
            None => io::BufReader::new(input),
        };

        let (run_set, split) = self.split(input, Some(input_path))?;

        let output =
            fs::File::create(output_path).map_err(|err| SortError::io(Stage::WriteOutput, Some(output_path), err))?;

        let merge = match self.merge(run_set, output, Some(output_path)) {
            Ok(merge) => merge,
            Err(err) => {
                if let Err(rm_err) = fs::remove_file(output_path) {
                    log::warn!("partial output {} not removed: {}", output_path.display(), rm_err);
                }
                return Err(err);
            }
        };

        return Ok(self.summarize(split, merge));
    }

    fn split<R>(&self, input: R, input_path: Option<&Path>) -> Result<(RunSet, SplitSummary), SortError>
    where
        R: BufRead + Send,
    {
        let mut run_set = RunSet::create(self.tmp_dir.as_deref())?;

        log::info!("splitting input into sorted runs ...");
        let pipeline = SplitPipeline {
            buffer_builder: &self.buffer_builder,
            thread_pool: &self.thread_pool,
            input_path,
            run_dir: run_set.path(),
            rw_buf_size: self.rw_buf_size,
        };

        match pipeline.run(input) {
            Ok((runs, summary)) => {
                run_set.extend(runs);
                log::info!(
                    "split done (lines: {}, records: {}, runs: {})",
                    summary.input_lines,
                    summary.records,
                    summary.runs
                );
                Ok((run_set, summary))
            }
            Err(err) => {
                run_set.close();
                Err(err)
            }
        }
    }

    fn merge<W>(&self, run_set: RunSet, output: W, output_path: Option<&Path>) -> Result<MergeSummary, SortError>
    where
        W: Write + Send,
    {
        log::info!("merging {} runs ...", run_set.len());
        let pipeline = MergePipeline {
            batch_size: self.batch_size,
            output_path,
            rw_buf_size: self.rw_buf_size,
        };

        let result = run_set
            .open_all(self.rw_buf_size)
            .and_then(|readers| pipeline.run(BinaryHeapMerger::new(readers), output));
        run_set.close();

        return result;
    }

    fn summarize(&self, split: SplitSummary, merge: MergeSummary) -> SortSummary {
        let summary = SortSummary::new(split, merge);
        log::info!(
            "sort done (lines: {}, records: {}, runs: {}, run records: {}, merged: {}, written: {})",
            summary.input_lines,
            summary.records,
            summary.runs,
            summary.run_records,
            summary.merged,
            summary.written
        );

        return summary;
    }
}
