// ========================================================================================
//
//                                  Record sinks
//
// ========================================================================================
//
// The model builder never decides where entities end up. It hands each Variant, Sample
// and Call to a `RecordSink`, and the sink reports write failures back, including
// uniqueness violations, which are never resolved by overwriting.

use crate::types::{Sample, SampleCall, Variant};
use ahash::{AHashMap, AHashSet};
use serde::Serialize;
use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use thiserror::Error;

pub const VARIANTS_FILE: &str = "variants.jsonl";
pub const SAMPLES_FILE: &str = "samples.jsonl";
pub const CALLS_FILE: &str = "calls.jsonl";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Variant,
    Sample,
    Call,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Variant => "variant",
            Self::Sample => "sample",
            Self::Call => "call",
        })
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error writing {kind} records: {source}")]
    Io {
        kind: RecordKind,
        #[source]
        source: io::Error,
    },
    #[error("failed to serialize a {kind} record: {source}")]
    Serialize {
        kind: RecordKind,
        #[source]
        source: serde_json::Error,
    },
    #[error("integrity violation: a {kind} with key '{key}' already exists")]
    Duplicate { kind: RecordKind, key: String },
    #[error("call references sample '{0}', which was never appended")]
    UnknownSample(String),
}

/// One entity handed to a sink.
#[derive(Debug, Clone, Copy)]
pub enum Record<'a> {
    Variant(&'a Variant),
    Sample(&'a Sample),
    Call(&'a SampleCall),
}

impl Record<'_> {
    pub fn kind(&self) -> RecordKind {
        match self {
            Record::Variant(_) => RecordKind::Variant,
            Record::Sample(_) => RecordKind::Sample,
            Record::Call(_) => RecordKind::Call,
        }
    }

    /// The unique key of keyed entities; calls have none.
    pub fn key(&self) -> Option<&str> {
        match self {
            Record::Variant(variant) => Some(&variant.key),
            Record::Sample(sample) => Some(&sample.key),
            Record::Call(_) => None,
        }
    }
}

pub trait RecordSink {
    fn append(&mut self, record: Record<'_>) -> Result<(), SinkError>;

    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

impl<S: RecordSink + ?Sized> RecordSink for &mut S {
    fn append(&mut self, record: Record<'_>) -> Result<(), SinkError> {
        (**self).append(record)
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        (**self).flush()
    }
}

/// Writes each entity as one JSON object per line, one stream per entity kind.
pub struct JsonLinesSink<W: Write> {
    variants: W,
    samples: W,
    calls: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(variants: W, samples: W, calls: W) -> Self {
        Self {
            variants,
            samples,
            calls,
        }
    }

    pub fn into_inner(self) -> (W, W, W) {
        (self.variants, self.samples, self.calls)
    }
}

impl JsonLinesSink<BufWriter<File>> {
    /// Creates (truncating) `variants.jsonl`, `samples.jsonl` and `calls.jsonl` in `dir`.
    pub fn create_in(dir: &Path) -> Result<Self, SinkError> {
        let open = |name: &str, kind: RecordKind| {
            File::create(dir.join(name))
                .map(BufWriter::new)
                .map_err(|source| SinkError::Io { kind, source })
        };
        Ok(Self::new(
            open(VARIANTS_FILE, RecordKind::Variant)?,
            open(SAMPLES_FILE, RecordKind::Sample)?,
            open(CALLS_FILE, RecordKind::Call)?,
        ))
    }
}

fn write_line<W: Write, T: Serialize>(
    writer: &mut W,
    kind: RecordKind,
    value: &T,
) -> Result<(), SinkError> {
    serde_json::to_writer(&mut *writer, value)
        .map_err(|source| SinkError::Serialize { kind, source })?;
    writer
        .write_all(b"\n")
        .map_err(|source| SinkError::Io { kind, source })
}

impl<W: Write> RecordSink for JsonLinesSink<W> {
    fn append(&mut self, record: Record<'_>) -> Result<(), SinkError> {
        let kind = record.kind();
        match record {
            Record::Variant(variant) => write_line(&mut self.variants, kind, variant),
            Record::Sample(sample) => write_line(&mut self.samples, kind, sample),
            Record::Call(call) => write_line(&mut self.calls, kind, call),
        }
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        for (writer, kind) in [
            (&mut self.variants, RecordKind::Variant),
            (&mut self.samples, RecordKind::Sample),
            (&mut self.calls, RecordKind::Call),
        ] {
            writer
                .flush()
                .map_err(|source| SinkError::Io { kind, source })?;
        }
        Ok(())
    }
}

/// Keeps owned copies of everything appended.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    pub variants: Vec<Variant>,
    pub samples: Vec<Sample>,
    pub calls: Vec<SampleCall>,
}

impl RecordSink for MemorySink {
    fn append(&mut self, record: Record<'_>) -> Result<(), SinkError> {
        match record {
            Record::Variant(variant) => self.variants.push(variant.clone()),
            Record::Sample(sample) => self.samples.push(sample.clone()),
            Record::Call(call) => self.calls.push(call.clone()),
        }
        Ok(())
    }
}

/// Enforces a uniqueness constraint on variant and sample keys in front of another sink.
/// A colliding write is rejected and never reaches the inner sink.
pub struct UniqueKeys<S> {
    inner: S,
    seen: AHashMap<RecordKind, AHashSet<String>>,
}

impl<S: RecordSink> UniqueKeys<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            seen: AHashMap::new(),
        }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: RecordSink> RecordSink for UniqueKeys<S> {
    fn append(&mut self, record: Record<'_>) -> Result<(), SinkError> {
        if let Some(key) = record.key() {
            let kind = record.kind();
            let keys = self.seen.entry(kind).or_default();
            if keys.contains(key) {
                return Err(SinkError::Duplicate {
                    kind,
                    key: key.to_string(),
                });
            }
            self.inner.append(record)?;
            keys.insert(key.to_string());
            return Ok(());
        }
        self.inner.append(record)
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.inner.flush()
    }
}

/// Batch-mode accumulator: folds streamed call records into their Sample aggregates.
#[derive(Debug, Default)]
pub struct DocumentCollector {
    variants: Vec<Variant>,
    samples: Vec<Sample>,
    positions: AHashMap<String, usize>,
}

impl DocumentCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_parts(self) -> (Vec<Variant>, Vec<Sample>) {
        (self.variants, self.samples)
    }
}

impl RecordSink for DocumentCollector {
    fn append(&mut self, record: Record<'_>) -> Result<(), SinkError> {
        match record {
            Record::Variant(variant) => self.variants.push(variant.clone()),
            Record::Sample(sample) => {
                self.positions
                    .insert(sample.key.clone(), self.samples.len());
                self.samples.push(sample.clone());
            }
            Record::Call(record) => {
                let position = *self
                    .positions
                    .get(&record.sample)
                    .ok_or_else(|| SinkError::UnknownSample(record.sample.clone()))?;
                self.samples[position].calls.push(record.call.clone());
            }
        }
        Ok(())
    }
}
