//! Split and merge pipelines.
//!
//! Every stage runs in its own scoped thread. Adjacent stages are connected by a channel of
//! capacity one, so a stage is at most one chunk (or batch) ahead of the next one. The last
//! item of every channel is [`Handoff::Done`]; a channel disconnected before `Done` means the
//! peer stage failed and the stage stops with [`SortError::Pipeline`].

use std::io;
use std::io::prelude::*;
use std::mem;
use std::path::Path;
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender};
use log;
use rayon::slice::ParallelSliceMut;

use crate::buffer::{ChunkBuffer, ChunkBufferBuilder};
use crate::merger::BinaryHeapMerger;
use crate::record::Record;
use crate::run::Run;
use crate::sort::{SortError, Stage};

const BYTE_ORDER_MARK: char = '\u{FEFF}';

/// Item passed between two adjacent stages.
#[derive(Debug)]
pub enum Handoff<T> {
    Item(T),
    Done,
}

/// Chunk of records. The index is assigned by the producer and names the run the chunk
/// is written to.
#[derive(Debug)]
pub struct Chunk {
    pub index: usize,
    pub records: Vec<Record>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SplitSummary {
    pub input_lines: u64,
    pub records: u64,
    pub runs: usize,
    pub run_records: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MergeSummary {
    pub merged: u64,
    pub written: u64,
}

fn handoff<T>() -> (Sender<Handoff<T>>, Receiver<Handoff<T>>) {
    bounded(1)
}

fn send<T>(tx: &Sender<Handoff<T>>, item: Handoff<T>, stage: Stage) -> Result<(), SortError> {
    tx.send(item).map_err(|_| SortError::Pipeline(stage))
}

fn recv<T>(rx: &Receiver<Handoff<T>>, stage: Stage) -> Result<Handoff<T>, SortError> {
    rx.recv().map_err(|_| SortError::Pipeline(stage))
}

fn join<T>(handle: thread::ScopedJoinHandle<'_, Result<T, SortError>>, stage: Stage) -> Result<T, SortError> {
    handle.join().unwrap_or_else(|_| Err(SortError::StagePanicked(stage)))
}

/// Picks the error that brought the pipeline down: a stage failure of its own wins over
/// stages stopped by a disconnected neighbour.
fn root_cause(errors: Vec<Option<SortError>>) -> SortError {
    let mut errors = Vec::from_iter(errors.into_iter().flatten());
    let idx = errors.iter().position(|err| !err.is_pipeline()).unwrap_or(0);

    return errors.swap_remove(idx);
}

/// Producer -> sorter -> writer pipeline turning the input into sorted runs.
pub struct SplitPipeline<'a, B: ChunkBufferBuilder> {
    pub buffer_builder: &'a B,
    pub thread_pool: &'a rayon::ThreadPool,
    pub input_path: Option<&'a Path>,
    pub run_dir: &'a Path,
    pub rw_buf_size: Option<usize>,
}

impl<'a, B: ChunkBufferBuilder> SplitPipeline<'a, B> {
    /// Runs all the stages to completion. Returns written runs ordered by index.
    pub fn run<R>(&self, input: R) -> Result<(Vec<Run>, SplitSummary), SortError>
    where
        R: BufRead + Send,
    {
        let (chunk_tx, chunk_rx) = handoff();
        let (sorted_tx, sorted_rx) = handoff();

        thread::scope(|scope| {
            let producer = scope.spawn(move || self.produce_chunks(input, chunk_tx));
            let sorter = scope.spawn(move || self.sort_chunks(chunk_rx, sorted_tx));
            let writer = scope.spawn(move || self.write_runs(sorted_rx));

            let produced = join(producer, Stage::ReadInput);
            let sorted = join(sorter, Stage::SortChunk);
            let written = join(writer, Stage::WriteRun);

            match (produced, sorted, written) {
                (Ok(mut summary), Ok(()), Ok((runs, run_records))) => {
                    summary.runs = runs.len();
                    summary.run_records = run_records;
                    Ok((runs, summary))
                }
                (produced, sorted, written) => Err(root_cause(vec![produced.err(), sorted.err(), written.err()])),
            }
        })
    }

    fn new_buffer(&self) -> Result<B::Buffer, SortError> {
        self.buffer_builder.build().map_err(SortError::ChunkAllocation)
    }

    fn publish(&self, tx: &Sender<Handoff<Chunk>>, index: usize, buffer: B::Buffer) -> Result<(), SortError> {
        let records = buffer.into_records();
        log::debug!("chunk {} filled ({} records)", index, records.len());

        send(tx, Handoff::Item(Chunk { index, records }), Stage::ReadInput)
    }

    /// Reads the input into chunks. A leading byte-order mark and blank lines are dropped,
    /// a line that is not a record stops the stage.
    fn produce_chunks<R: BufRead>(&self, input: R, tx: Sender<Handoff<Chunk>>) -> Result<SplitSummary, SortError> {
        let mut summary = SplitSummary::default();
        let mut buffer = self.new_buffer()?;
        let mut index = 0;

        for line in input.lines() {
            let mut line = line.map_err(|err| SortError::io(Stage::ReadInput, self.input_path, err))?;
            summary.input_lines += 1;

            if summary.input_lines == 1 && line.starts_with(BYTE_ORDER_MARK) {
                line.drain(..BYTE_ORDER_MARK.len_utf8());
            }

            if Record::is_blank(&line) {
                continue;
            }
            let record = Record::parse(&line).map_err(|source| SortError::MalformedRecord {
                stage: Stage::ReadInput,
                path: self.input_path.map(Path::to_path_buf),
                line: summary.input_lines,
                source,
            })?;
            buffer.push(record);
            summary.records += 1;

            if buffer.is_full() {
                self.publish(&tx, index, buffer)?;
                index += 1;
                buffer = self.new_buffer()?;
            }
        }

        if !buffer.is_empty() {
            self.publish(&tx, index, buffer)?;
        }
        send(&tx, Handoff::Done, Stage::ReadInput)?;

        return Ok(summary);
    }

    fn sort_chunks(&self, rx: Receiver<Handoff<Chunk>>, tx: Sender<Handoff<Chunk>>) -> Result<(), SortError> {
        loop {
            match recv(&rx, Stage::SortChunk)? {
                Handoff::Item(mut chunk) => {
                    log::debug!("sorting chunk {} ...", chunk.index);
                    self.thread_pool.install(|| chunk.records.par_sort_unstable());
                    send(&tx, Handoff::Item(chunk), Stage::SortChunk)?;
                }
                Handoff::Done => {
                    send(&tx, Handoff::Done, Stage::SortChunk)?;
                    return Ok(());
                }
            }
        }
    }

    fn write_runs(&self, rx: Receiver<Handoff<Chunk>>) -> Result<(Vec<Run>, u64), SortError> {
        let mut runs = Vec::new();
        let mut run_records = 0;

        loop {
            match recv(&rx, Stage::WriteRun)? {
                Handoff::Item(chunk) => {
                    let run = Run::write(self.run_dir, chunk.index, &chunk.records, self.rw_buf_size)?;
                    log::debug!("run {} saved ({} records)", run.path().display(), chunk.records.len());
                    run_records += chunk.records.len() as u64;
                    runs.push(run);
                }
                Handoff::Done => {
                    runs.sort_by_key(Run::index);
                    return Ok((runs, run_records));
                }
            }
        }
    }
}

/// Merger -> output writer pipeline.
pub struct MergePipeline<'a> {
    pub batch_size: usize,
    pub output_path: Option<&'a Path>,
    pub rw_buf_size: Option<usize>,
}

impl<'a> MergePipeline<'a> {
    /// Streams merged records into the output.
    pub fn run<C, W>(&self, merger: BinaryHeapMerger<C, SortError>, output: W) -> Result<MergeSummary, SortError>
    where
        C: Iterator<Item = Result<Record, SortError>> + Send,
        W: Write + Send,
    {
        let (batch_tx, batch_rx) = handoff();

        thread::scope(|scope| {
            let merging = scope.spawn(move || self.merge_batches(merger, batch_tx));
            let writer = scope.spawn(move || self.write_output(output, batch_rx));

            let merged = join(merging, Stage::Merge);
            let written = join(writer, Stage::WriteOutput);

            match (merged, written) {
                (Ok(merged), Ok(written)) => Ok(MergeSummary { merged, written }),
                (merged, written) => Err(root_cause(vec![merged.err(), written.err()])),
            }
        })
    }

    /// Groups merged records into batches. The partial batch is handed off even when the
    /// merger fails, the failure is reported afterwards.
    fn merge_batches<C>(
        &self,
        merger: BinaryHeapMerger<C, SortError>,
        tx: Sender<Handoff<Vec<Record>>>,
    ) -> Result<u64, SortError>
    where
        C: Iterator<Item = Result<Record, SortError>>,
    {
        let mut batch = Vec::with_capacity(self.batch_size);
        let mut merged = 0;
        let mut failure = None;

        for record in merger {
            match record {
                Ok(record) => batch.push(record),
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
            merged += 1;

            if batch.len() >= self.batch_size {
                let full = mem::replace(&mut batch, Vec::with_capacity(self.batch_size));
                send(&tx, Handoff::Item(full), Stage::Merge)?;
            }
        }

        let flushed = if batch.is_empty() {
            Ok(())
        } else {
            send(&tx, Handoff::Item(batch), Stage::Merge)
        }
        .and_then(|()| send(&tx, Handoff::Done, Stage::Merge));

        return match failure {
            Some(err) => Err(err),
            None => flushed.map(|()| merged),
        };
    }

    fn write_output<W: Write>(&self, output: W, rx: Receiver<Handoff<Vec<Record>>>) -> Result<u64, SortError> {
        let io_err = |err| SortError::io(Stage::WriteOutput, self.output_path, err);
        let mut writer = match self.rw_buf_size {
            Some(buf_size) => io::BufWriter::with_capacity(buf_size, output),
            None => io::BufWriter::new(output),
        };
        let mut written = 0;

        loop {
            match recv(&rx, Stage::WriteOutput)? {
                Handoff::Item(batch) => {
                    for record in batch.iter() {
                        writeln!(writer, "{}", record).map_err(io_err)?;
                    }
                    written += batch.len() as u64;
                }
                Handoff::Done => break,
            }
        }
        writer.flush().map_err(io_err)?;

        return Ok(written);
    }
}
