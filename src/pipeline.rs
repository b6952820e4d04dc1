use std::fs::File;
use std::io::{BufRead, BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::Path;
use std::thread::ScopedJoinHandle;

use anyhow::{anyhow, bail, Context, Result};
use crossbeam::channel::Sender;
use tracing::debug;

use crate::compute::{fold_line, process_chunk, AggMap, LineCounts};
use crate::config::{Backend, Config};
use crate::partition::{split_segments, Segment};
use crate::store::ShardedStore;

// here we can tweak the buffer size for the buffered backend. every worker gets one.
pub const BUF_SIZE: usize = 1 << 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    pub index: usize,
    pub segment: Segment,
    pub counts: LineCounts,
    pub keys: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub lines: u64,
    pub skipped: u64,
    pub keys: usize,
    pub workers: Vec<WorkerReport>,
}

/// Aggregates every line of the file at `path` into a fresh store.
///
/// The file is split into `config.workers` line-aligned segments, each worker folds its segment
/// into a private map and merges that into the shared store, and this returns once every worker
/// has joined. Any I/O error (or a panicking worker) fails the whole run.
pub fn aggregate_file(path: &Path, config: &Config) -> Result<(ShardedStore, RunSummary)> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let len = file
        .metadata()
        .with_context(|| format!("reading metadata of {}", path.display()))?
        .len();

    let store = ShardedStore::new(config.shards);
    let (report_tx, report_rx) = crossbeam::channel::unbounded();
    let res = match config.backend {
        Backend::Mmap => run_mmap(&file, len, config.workers, &store, report_tx),
        Backend::Buffered => run_buffered(path, &file, len, config.workers, &store, report_tx),
    };
    res.with_context(|| format!("aggregating {}", path.display()))?;

    let mut workers = report_rx.try_iter().collect::<Vec<_>>();
    workers.sort_unstable_by_key(|r| r.index);
    let mut counts = LineCounts::default();
    for report in &workers {
        debug!(
            worker = report.index,
            start = report.segment.start,
            end = report.segment.end,
            lines = report.counts.lines,
            skipped = report.counts.skipped,
            keys = report.keys,
            "worker finished"
        );
        counts += report.counts;
    }
    debug!(shards = store.num_shards(), sizes = ?store.shard_sizes(), "merged");

    let summary = RunSummary {
        lines: counts.lines,
        skipped: counts.skipped,
        keys: store.len(),
        workers,
    };
    Ok((store, summary))
}

fn run_mmap(
    file: &File,
    len: u64,
    workers: usize,
    store: &ShardedStore,
    reports: Sender<WorkerReport>,
) -> Result<()> {
    // mapping a zero-length file isn't portable, and there's nothing to read anyway
    let mmap;
    let data: &[u8] = if len == 0 {
        &[]
    } else {
        // SAFETY: the input is treated as immutable for the length of the run.
        mmap = unsafe { memmap2::MmapOptions::new().map(file) }.context("mapping input")?;
        &mmap[..]
    };

    let segments = split_segments(Cursor::new(data), data.len() as u64, workers)?;
    debug!(?segments, "split points");

    std::thread::scope(|scope| {
        let handles = segments
            .iter()
            .enumerate()
            .map(|(index, &segment)| {
                let reports = reports.clone();
                scope.spawn(move || -> Result<()> {
                    let mut totals = AggMap::default();
                    let counts = process_chunk(&data[segment.range()], &mut totals);
                    finish(index, segment, counts, totals, store, &reports);
                    Ok(())
                })
            })
            .collect::<Vec<_>>(); // collect here to eagerly spin up the threads
        join_all(handles)
    })
}

fn run_buffered(
    path: &Path,
    file: &File,
    len: u64,
    workers: usize,
    store: &ShardedStore,
    reports: Sender<WorkerReport>,
) -> Result<()> {
    let segments = split_segments(file, len, workers)?;
    debug!(?segments, "split points");

    std::thread::scope(|scope| {
        let handles = segments
            .iter()
            .enumerate()
            .map(|(index, &segment)| {
                let reports = reports.clone();
                scope.spawn(move || -> Result<()> {
                    let mut totals = AggMap::default();
                    let counts = read_segment(path, segment, &mut totals)?;
                    finish(index, segment, counts, totals, store, &reports);
                    Ok(())
                })
            })
            .collect::<Vec<_>>();
        join_all(handles)
    })
}

fn read_segment(path: &Path, segment: Segment, totals: &mut AggMap) -> Result<LineCounts> {
    let mut counts = LineCounts::default();
    if segment.is_empty() {
        return Ok(counts);
    }

    let mut file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    file.seek(SeekFrom::Start(segment.start))
        .with_context(|| format!("seeking to offset {}", segment.start))?;
    let mut reader = BufReader::with_capacity(BUF_SIZE, file.take(segment.len()));

    let mut line = Vec::with_capacity(64);
    let mut consumed = 0;
    loop {
        line.clear();
        let read = reader
            .read_until(b'\n', &mut line)
            .with_context(|| format!("reading segment at offset {}", segment.start + consumed))?;
        if read == 0 {
            break;
        }
        consumed += read as u64;
        counts.lines += 1;
        if !fold_line(&line, totals) {
            counts.skipped += 1;
        }
    }
    if consumed != segment.len() {
        bail!(
            "segment {}..{} ended early after {consumed} bytes, was the file truncated?",
            segment.start,
            segment.end
        );
    }
    Ok(counts)
}

fn finish(
    index: usize,
    segment: Segment,
    counts: LineCounts,
    totals: AggMap,
    store: &ShardedStore,
    reports: &Sender<WorkerReport>,
) {
    let keys = totals.len();
    store.merge(totals);
    reports
        .send(WorkerReport {
            index,
            segment,
            counts,
            keys,
        })
        .ok();
}

fn join_all(handles: Vec<ScopedJoinHandle<'_, Result<()>>>) -> Result<()> {
    let mut first_err = None;
    for (index, handle) in handles.into_iter().enumerate() {
        let res = handle
            .join()
            .map_err(|_| anyhow!("worker {index} panicked"))
            .and_then(|r| r.with_context(|| format!("worker {index}")));
        if let Err(e) = res {
            first_err.get_or_insert(e);
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
