// ========================================================================================
//
//                        Sharded load and idempotent merge
//
// ========================================================================================
//
// The coordinator reads the header once, then deals batches of data rows round-robin to
// worker threads. Each worker owns a parser, a uniqueness-checking sink and a pair of
// part files. A part is renamed into place only when its worker finishes cleanly, so a
// failed run leaves every committed sibling part valid for a later merge.

use crate::columns::ColumnError;
use crate::config::{ConfigError, LoadConfig};
use crate::document::{DocumentError, IngestSummary, emit_row, next_data_row};
use crate::header::{PreambleError, read_preamble};
use crate::identity::IdentityResolver;
use crate::row::RowParser;
use crate::shared::files::{SourceError, TextSource, open_text_source};
use crate::sink::{
    CALLS_FILE, JsonLinesSink, Record, RecordSink, SAMPLES_FILE, SinkError, UniqueKeys,
    VARIANTS_FILE,
};
use crate::types::Sample;
use ahash::AHashMap;
use crossbeam_channel::{Receiver, Sender, bounded};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::{debug, info};
use natord::compare;
use serde::Deserialize;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use thiserror::Error;

/// Directory under the output directory that holds per-worker part files.
pub const PARTS_DIR: &str = "parts";

const PART_PREFIX: &str = "part-";
const PART_VARIANTS_SUFFIX: &str = ".variants.jsonl";
const PART_CALLS_SUFFIX: &str = ".calls.jsonl";
const TMP_SUFFIX: &str = ".tmp";
/// Batches queued per worker before the reader blocks.
const QUEUED_BATCHES: usize = 2;

// ========================================================================================
//                                    Error handling
// ========================================================================================

#[derive(Debug, Error)]
pub enum ShardError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Preamble(#[from] PreambleError),
    #[error(transparent)]
    Columns(#[from] ColumnError),
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("integrity violation: variant '{key}' appears in both {first} and {second}")]
    Integrity {
        key: String,
        first: String,
        second: String,
    },
    #[error("{path} line {line}: not a variant record: {source}")]
    MalformedPart {
        path: String,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("part '{0}' has no matching calls file")]
    UnpairedPart(String),
    #[error("worker {0} panicked")]
    WorkerPanicked(usize),
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> ShardError + '_ {
    move |source| ShardError::Io {
        path: path.display().to_string(),
        source,
    }
}

// ========================================================================================
//                                      Summaries
// ========================================================================================

/// Counts reported after merging part files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub parts: usize,
    pub variants: usize,
    pub calls: usize,
}

/// Counts reported after a sharded load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub rows: usize,
    pub samples: usize,
    pub variants: usize,
    pub calls: usize,
    /// Rows on unplaced contigs dropped under `ContigPolicy::Skip`.
    pub skipped: usize,
    pub shards: usize,
}

// ========================================================================================
//                                      Part files
// ========================================================================================

/// The pair of files one worker writes.
struct PartFiles {
    variants: PathBuf,
    calls: PathBuf,
}

impl PartFiles {
    fn new(parts_dir: &Path, index: usize) -> Self {
        let stem = format!("{PART_PREFIX}{index:03}");
        Self {
            variants: parts_dir.join(format!("{stem}{PART_VARIANTS_SUFFIX}")),
            calls: parts_dir.join(format!("{stem}{PART_CALLS_SUFFIX}")),
        }
    }

    fn pending(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_owned();
        name.push(TMP_SUFFIX);
        PathBuf::from(name)
    }

    fn create_pending(path: &Path) -> Result<Box<dyn Write>, ShardError> {
        let pending = Self::pending(path);
        let file = File::create(&pending).map_err(io_error(&pending))?;
        Ok(Box::new(BufWriter::new(file)))
    }

    fn open_sink(&self) -> Result<UniqueKeys<JsonLinesSink<Box<dyn Write>>>, ShardError> {
        Ok(UniqueKeys::new(JsonLinesSink::new(
            Self::create_pending(&self.variants)?,
            discard(),
            Self::create_pending(&self.calls)?,
        )))
    }

    fn commit(&self) -> Result<(), ShardError> {
        for path in [&self.variants, &self.calls] {
            let pending = Self::pending(path);
            fs::rename(&pending, path).map_err(io_error(&pending))?;
        }
        Ok(())
    }
}

fn discard() -> Box<dyn Write> {
    Box::new(io::sink())
}

/// Removes every part file (committed or pending) left by an earlier run.
fn clear_parts(parts_dir: &Path) -> Result<(), ShardError> {
    for entry in fs::read_dir(parts_dir).map_err(io_error(parts_dir))? {
        let path = entry.map_err(io_error(parts_dir))?.path();
        let is_part = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with(PART_PREFIX));
        if is_part {
            fs::remove_file(&path).map_err(io_error(&path))?;
        }
    }
    Ok(())
}

/// Writes the sample entities into `parts/` once, before any row is dispatched. They
/// reach the output directory only through a successful merge.
fn write_samples(parts_dir: &Path, samples: &[String]) -> Result<(), ShardError> {
    let target = parts_dir.join(SAMPLES_FILE);
    let pending = PartFiles::pending(&target);
    let file = File::create(&pending).map_err(io_error(&pending))?;
    let writer: Box<dyn Write> = Box::new(BufWriter::new(file));
    let mut sink = UniqueKeys::new(JsonLinesSink::new(discard(), writer, discard()));
    for key in samples {
        sink.append(Record::Sample(&Sample::new(key.clone())))?;
    }
    sink.flush()?;
    drop(sink);
    fs::rename(&pending, &target).map_err(io_error(&pending))
}

fn create_progress_bar(message: &str) -> ProgressBar {
    let draw_target = if io::stderr().is_terminal() {
        ProgressDrawTarget::stderr_with_hz(10)
    } else {
        ProgressDrawTarget::hidden()
    };

    let pb = ProgressBar::with_draw_target(None, draw_target);
    if let Ok(style) =
        ProgressStyle::with_template("> [{elapsed_precise}] {spinner} {human_pos} rows {msg}")
    {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb
}

// ========================================================================================
//                                      Coordinator
// ========================================================================================

type RowBatch = Vec<(usize, String)>;

pub struct ShardCoordinator {
    config: LoadConfig,
}

impl ShardCoordinator {
    pub fn new(config: LoadConfig) -> Result<Self, ShardError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &LoadConfig {
        &self.config
    }

    /// Loads `input` (plain, gzip or `-`) into `output_dir`.
    pub fn run(&self, input: &Path, output_dir: &Path) -> Result<LoadSummary, ShardError> {
        let mut source = open_text_source(input)?;
        self.run_source(source.as_mut(), output_dir)
    }

    pub fn run_source(
        &self,
        source: &mut dyn TextSource,
        output_dir: &Path,
    ) -> Result<LoadSummary, ShardError> {
        let (schema, columns) = read_preamble(source)?.into_parts()?;
        let parser = RowParser::new(
            Arc::new(schema),
            Arc::new(columns),
            IdentityResolver::new(self.config.identity),
        )
        .with_contig_policy(self.config.contigs);

        let parts_dir = output_dir.join(PARTS_DIR);
        fs::create_dir_all(&parts_dir).map_err(io_error(&parts_dir))?;
        clear_parts(&parts_dir)?;
        write_samples(&parts_dir, parser.columns().samples())?;

        let workers = self.config.workers;
        info!(
            "Loading {} with {} worker(s), {} rows per batch",
            source.display_name(),
            workers,
            self.config.batch_rows
        );

        let progress = create_progress_bar(source.display_name());
        let failed = AtomicBool::new(false);
        let outcome = thread::scope(|s| {
            let mut senders: Vec<Sender<RowBatch>> = Vec::with_capacity(workers);
            let mut handles = Vec::with_capacity(workers);
            for index in 0..workers {
                let (tx, rx) = bounded::<RowBatch>(QUEUED_BATCHES);
                senders.push(tx);
                let parser = parser.clone();
                let parts_dir = parts_dir.as_path();
                let progress = &progress;
                let failed = &failed;
                handles.push(s.spawn(move || {
                    let result = run_worker(index, &parser, rx, parts_dir, progress);
                    if result.is_err() {
                        failed.store(true, Ordering::Relaxed);
                    }
                    result
                }));
            }

            let dispatched = self.dispatch(source, &senders, &failed);
            drop(senders);

            let mut totals = IngestSummary::default();
            let mut first_error = None;
            for (index, handle) in handles.into_iter().enumerate() {
                match handle.join() {
                    Ok(Ok(summary)) => totals.absorb(summary),
                    Ok(Err(err)) => {
                        first_error.get_or_insert(err);
                    }
                    Err(_) => {
                        first_error.get_or_insert(ShardError::WorkerPanicked(index));
                    }
                }
            }
            match (first_error, dispatched) {
                (Some(err), _) | (None, Err(err)) => Err(err),
                (None, Ok(())) => Ok(totals),
            }
        });
        progress.finish_and_clear();
        let totals = outcome?;

        let merged = merge_parts(&parts_dir, output_dir)?;
        if !self.config.keep_parts {
            fs::remove_dir_all(&parts_dir).map_err(io_error(&parts_dir))?;
            debug!("Removed {}", parts_dir.display());
        }

        let summary = LoadSummary {
            rows: totals.rows,
            samples: parser.columns().samples().len(),
            variants: merged.variants,
            calls: merged.calls,
            skipped: totals.skipped,
            shards: workers,
        };
        info!(
            "Loaded {} rows into {} ({} variants, {} samples, {} calls)",
            summary.rows,
            output_dir.display(),
            summary.variants,
            summary.samples,
            summary.calls
        );
        Ok(summary)
    }

    /// Reads data rows and deals them out in batches. Stops at the first worker failure.
    fn dispatch(
        &self,
        source: &mut dyn TextSource,
        senders: &[Sender<RowBatch>],
        failed: &AtomicBool,
    ) -> Result<(), ShardError> {
        let batch_rows = self.config.batch_rows;
        let mut batch: RowBatch = Vec::with_capacity(batch_rows);
        let mut next_worker = 0;

        let mut send = |batch: RowBatch| -> bool {
            let accepted = senders[next_worker].send(batch).is_ok();
            next_worker = (next_worker + 1) % senders.len();
            accepted
        };

        while let Some(row) = next_data_row(source)? {
            batch.push(row);
            if batch.len() == batch_rows {
                let full = std::mem::replace(&mut batch, Vec::with_capacity(batch_rows));
                if failed.load(Ordering::Relaxed) || !send(full) {
                    debug!("A worker failed; dispatch stopped");
                    return Ok(());
                }
            }
        }
        if !batch.is_empty() && !failed.load(Ordering::Relaxed) {
            send(batch);
        }
        Ok(())
    }
}

fn run_worker(
    index: usize,
    parser: &RowParser,
    batches: Receiver<RowBatch>,
    parts_dir: &Path,
    progress: &ProgressBar,
) -> Result<IngestSummary, ShardError> {
    let part = PartFiles::new(parts_dir, index);
    let mut sink = part.open_sink()?;
    let mut summary = IngestSummary::default();

    for batch in batches {
        for (line, row) in &batch {
            summary.record(emit_row(parser, row, *line, &mut sink)?);
        }
        progress.inc(batch.len() as u64);
    }
    sink.flush()?;
    drop(sink);
    part.commit()?;

    debug!(
        "Worker {index} wrote {} variants and {} calls",
        summary.variants, summary.calls
    );
    Ok(summary)
}

// ========================================================================================
//                                        Merge
// ========================================================================================

#[derive(Deserialize)]
struct KeyOnly {
    #[serde(rename = "_key")]
    key: String,
}

/// Committed part-variant files in natural order (`part-2` before `part-10`).
fn list_parts(parts_dir: &Path) -> Result<Vec<PathBuf>, ShardError> {
    let mut parts = Vec::new();
    for entry in fs::read_dir(parts_dir).map_err(io_error(parts_dir))? {
        let path = entry.map_err(io_error(parts_dir))?.path();
        let is_variants_part = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| {
                name.starts_with(PART_PREFIX) && name.ends_with(PART_VARIANTS_SUFFIX)
            });
        if is_variants_part {
            parts.push(path);
        }
    }
    parts.sort_by(|a, b| compare(&a.to_string_lossy(), &b.to_string_lossy()));
    Ok(parts)
}

fn calls_part_for(variants_part: &Path) -> Option<PathBuf> {
    let name = variants_part.file_name()?.to_str()?;
    let stem = name.strip_suffix(PART_VARIANTS_SUFFIX)?;
    Some(variants_part.with_file_name(format!("{stem}{PART_CALLS_SUFFIX}")))
}

fn part_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

struct MergeTargets {
    variants: PathBuf,
    calls: PathBuf,
    samples: PathBuf,
    /// `parts/samples.jsonl`, when the load that produced the parts wrote one.
    staged_samples: Option<PathBuf>,
}

impl MergeTargets {
    fn new(parts_dir: &Path, output_dir: &Path) -> Self {
        let staged = parts_dir.join(SAMPLES_FILE);
        Self {
            variants: output_dir.join(VARIANTS_FILE),
            calls: output_dir.join(CALLS_FILE),
            samples: output_dir.join(SAMPLES_FILE),
            staged_samples: staged.is_file().then_some(staged),
        }
    }

    fn published(&self) -> Vec<&PathBuf> {
        let mut paths = vec![&self.variants, &self.calls];
        if self.staged_samples.is_some() {
            paths.push(&self.samples);
        }
        paths
    }

    fn discard_pending(&self) {
        for path in self.published() {
            let pending = PartFiles::pending(path);
            if let Err(err) = fs::remove_file(&pending) {
                debug!("Could not remove {}: {err}", pending.display());
            }
        }
    }

    fn commit(&self) -> Result<(), ShardError> {
        for path in self.published() {
            let pending = PartFiles::pending(path);
            fs::rename(&pending, path).map_err(io_error(&pending))?;
        }
        Ok(())
    }
}

/// Concatenates committed parts into `variants.jsonl` and `calls.jsonl`, and publishes
/// the `samples.jsonl` staged in `parts_dir` alongside them.
///
/// Variant keys must be unique across parts. On a collision nothing in `output_dir` is
/// replaced. The merged files are rewritten from scratch, so running the merge again
/// over the same parts produces the same output.
pub fn merge_parts(parts_dir: &Path, output_dir: &Path) -> Result<MergeSummary, ShardError> {
    fs::create_dir_all(output_dir).map_err(io_error(output_dir))?;
    let targets = MergeTargets::new(parts_dir, output_dir);
    let result = write_merged(parts_dir, &targets);
    match result {
        Ok(summary) => {
            targets.commit()?;
            info!(
                "Merged {} parts: {} variants, {} calls",
                summary.parts, summary.variants, summary.calls
            );
            Ok(summary)
        }
        Err(err) => {
            targets.discard_pending();
            Err(err)
        }
    }
}

fn write_merged(parts_dir: &Path, targets: &MergeTargets) -> Result<MergeSummary, ShardError> {
    let pending_variants = PartFiles::pending(&targets.variants);
    let pending_calls = PartFiles::pending(&targets.calls);
    let mut variants_out = BufWriter::new(
        File::create(&pending_variants).map_err(io_error(&pending_variants))?,
    );
    let mut calls_out =
        BufWriter::new(File::create(&pending_calls).map_err(io_error(&pending_calls))?);

    let mut owners: AHashMap<String, String> = AHashMap::new();
    let mut summary = MergeSummary::default();

    for variants_part in list_parts(parts_dir)? {
        let label = part_label(&variants_part);
        let calls_part = calls_part_for(&variants_part)
            .filter(|path| path.is_file())
            .ok_or_else(|| ShardError::UnpairedPart(label.clone()))?;

        let reader = BufReader::new(File::open(&variants_part).map_err(io_error(&variants_part))?);
        for (offset, line) in reader.lines().enumerate() {
            let line = line.map_err(io_error(&variants_part))?;
            let record: KeyOnly =
                serde_json::from_str(&line).map_err(|source| ShardError::MalformedPart {
                    path: label.clone(),
                    line: offset + 1,
                    source,
                })?;
            if let Some(first) = owners.get(&record.key) {
                return Err(ShardError::Integrity {
                    key: record.key,
                    first: first.clone(),
                    second: label,
                });
            }
            writeln!(variants_out, "{line}").map_err(io_error(&pending_variants))?;
            owners.insert(record.key, label.clone());
            summary.variants += 1;
        }

        let reader = BufReader::new(File::open(&calls_part).map_err(io_error(&calls_part))?);
        for line in reader.lines() {
            let line = line.map_err(io_error(&calls_part))?;
            writeln!(calls_out, "{line}").map_err(io_error(&pending_calls))?;
            summary.calls += 1;
        }
        summary.parts += 1;
        debug!("Merged {label}");
    }

    variants_out.flush().map_err(io_error(&pending_variants))?;
    calls_out.flush().map_err(io_error(&pending_calls))?;

    if let Some(staged) = &targets.staged_samples {
        let pending_samples = PartFiles::pending(&targets.samples);
        fs::copy(staged, &pending_samples).map_err(io_error(&pending_samples))?;
    }
    Ok(summary)
}
