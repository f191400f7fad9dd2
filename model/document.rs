//! Single-worker ingest: streaming into a sink, batch loading into memory, and the
//! per-sample extraction used to build one sample document at a time.

use crate::columns::{ColumnError, SampleSelector};
use crate::header::{HeaderSchema, LineKind, PreambleError, classify_line, read_preamble};
use crate::identity::{IdentityResolver, IdentityStrategy};
use crate::row::{ContigPolicy, RowError, RowParser};
use crate::shared::files::{SourceError, TextSource};
use crate::sink::{DocumentCollector, Record, RecordSink, SinkError, UniqueKeys};
use crate::types::{Sample, SampleCall, Variant};
use log::{info, warn};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Preamble(#[from] PreambleError),
    #[error(transparent)]
    Columns(#[from] ColumnError),
    #[error(transparent)]
    Row(#[from] RowError),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error("line {line}: a second column-header line was found")]
    DuplicateColumnHeader { line: usize },
    #[error("random identities cannot link a sample document to separately loaded variants")]
    UnlinkableIdentity,
}

/// Counts reported after an ingest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub rows: usize,
    pub variants: usize,
    pub calls: usize,
    /// Rows dropped under `ContigPolicy::Skip`.
    pub skipped: usize,
}

impl IngestSummary {
    /// Counts one row given what `emit_row` returned for it.
    pub fn record(&mut self, emitted: Option<usize>) {
        self.rows += 1;
        match emitted {
            Some(calls) => {
                self.variants += 1;
                self.calls += calls;
            }
            None => self.skipped += 1,
        }
    }

    pub fn absorb(&mut self, other: IngestSummary) {
        self.rows += other.rows;
        self.variants += other.variants;
        self.calls += other.calls;
        self.skipped += other.skipped;
    }
}

/// Variants and fully populated samples of one file.
#[derive(Debug, Clone)]
pub struct Document {
    pub schema: Arc<HeaderSchema>,
    pub variants: Vec<Variant>,
    pub samples: Vec<Sample>,
}

/// Reads the next data row, skipping blank lines and late metadata lines.
///
/// Returns an owned copy of the row with its 1-based line number.
pub(crate) fn next_data_row(
    source: &mut dyn TextSource,
) -> Result<Option<(usize, String)>, DocumentError> {
    loop {
        let Some(line) = source.next_line()? else {
            return Ok(None);
        };
        match classify_line(line) {
            LineKind::Data => {
                let row = line.to_string();
                return Ok(Some((source.line_number(), row)));
            }
            LineKind::Blank => continue,
            LineKind::Meta => {
                warn!(
                    "{} line {}: metadata after the column header is ignored",
                    source.display_name(),
                    source.line_number()
                );
            }
            LineKind::ColumnHeader => {
                return Err(DocumentError::DuplicateColumnHeader {
                    line: source.line_number(),
                });
            }
        }
    }
}

/// Emits the parsed row: the variant first, then each call tagged with its sample key.
///
/// Returns the number of calls emitted, or `None` when the row sits on an unplaced
/// contig and the parser skips those.
pub fn emit_row<S: RecordSink>(
    parser: &RowParser,
    row: &str,
    line: usize,
    sink: &mut S,
) -> Result<Option<usize>, DocumentError> {
    let parsed = match parser.parse_row(row, line) {
        Ok(parsed) => parsed,
        Err(RowError::Chromosome { line, message })
            if parser.contig_policy() == ContigPolicy::Skip =>
        {
            warn!("line {line}: {message} Row skipped.");
            return Ok(None);
        }
        Err(err) => return Err(err.into()),
    };
    sink.append(Record::Variant(&parsed.variant))?;

    let samples = parser.columns().samples();
    let emitted = parsed.calls.len();
    for (position, call) in parsed.calls {
        let record = SampleCall {
            sample: samples[position].clone(),
            call,
        };
        sink.append(Record::Call(&record))?;
    }
    Ok(Some(emitted))
}

/// Streams a whole file into `sink`: every Sample once (with no calls), then each row's
/// Variant followed by its Calls.
///
/// Variant and sample keys must be unique within the file; a repeated key fails with
/// `SinkError::Duplicate` before the record reaches `sink`.
pub fn ingest<S: RecordSink>(
    source: &mut dyn TextSource,
    identity: IdentityStrategy,
    sink: &mut S,
) -> Result<(Arc<HeaderSchema>, IngestSummary), DocumentError> {
    let mut sink = UniqueKeys::new(sink);
    let (schema, columns) = read_preamble(source)?.into_parts()?;
    let schema = Arc::new(schema);
    let parser = RowParser::new(
        Arc::clone(&schema),
        Arc::new(columns),
        IdentityResolver::new(identity),
    );

    for key in parser.columns().samples() {
        sink.append(Record::Sample(&Sample::new(key.clone())))?;
    }

    let mut summary = IngestSummary::default();
    while let Some((line, row)) = next_data_row(source)? {
        summary.record(emit_row(&parser, &row, line, &mut sink)?);
    }
    sink.flush()?;

    info!(
        "Ingested {} rows from {} ({} calls)",
        summary.rows,
        source.display_name(),
        summary.calls
    );
    Ok((schema, summary))
}

/// Batch mode: loads the whole file into memory.
pub fn load_document(
    source: &mut dyn TextSource,
    identity: IdentityStrategy,
) -> Result<Document, DocumentError> {
    let mut collector = DocumentCollector::new();
    let (schema, _) = ingest(source, identity, &mut collector)?;
    let (variants, samples) = collector.into_parts();
    Ok(Document {
        schema,
        variants,
        samples,
    })
}

/// Builds the document of a single sample, selected by name or by position.
pub fn extract_sample(
    source: &mut dyn TextSource,
    selector: &SampleSelector,
    identity: IdentityStrategy,
) -> Result<Sample, DocumentError> {
    if !identity.is_deterministic() {
        return Err(DocumentError::UnlinkableIdentity);
    }

    let (schema, columns) = read_preamble(source)?.into_parts()?;
    let (position, name) = columns.resolve(selector)?;
    let mut sample = Sample::new(name);
    info!("Extracting sample '{name}' (sample column {position})");

    let parser = RowParser::new(
        Arc::new(schema),
        Arc::new(columns),
        IdentityResolver::new(identity),
    );
    while let Some((line, row)) = next_data_row(source)? {
        if let Some(call) = parser.parse_sample_call(&row, line, position)? {
            sample.calls.push(call);
        }
    }
    Ok(sample)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::files::ReaderSource;
    use crate::sink::{MemorySink, RecordKind};
    use crate::types::InfoValue;
    use std::io::Cursor;

    const VCF: &str = "##fileformat=VCFv4.1\n\
##INFO=<ID=DP,Number=1,Type=Integer,Description=\"Total Depth\">\n\
##INFO=<ID=AF,Number=A,Type=Float,Description=\"Allele Frequency, alt\">\n\
##ALT=<ID=DEL,Description=\"Deletion\">\n\
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tS1\tS2\n\
1\t100\trs1\tA\tG\t.\tPASS\tAF=0.5\tGT\t0|1\t./.\n\
1\t200\trs2\tC\t<DEL>\t.\tPASS\tDP=10;AF=0.1\tGT\t1/1\t0|1|2\n";

    fn source(text: &str) -> ReaderSource<Cursor<String>> {
        ReaderSource::new(Cursor::new(text.to_string()), "mem")
    }

    #[test]
    fn streaming_emits_samples_then_rows() {
        let mut sink = MemorySink::default();
        let (schema, summary) =
            ingest(&mut source(VCF), IdentityStrategy::Identifier, &mut sink).unwrap();

        assert_eq!(
            summary,
            IngestSummary {
                rows: 2,
                variants: 2,
                calls: 3,
                skipped: 0
            }
        );
        assert!(schema.alt.contains_key("DEL"));
        let keys: Vec<&str> = sink.samples.iter().map(|s| s.key.as_str()).collect();
        assert_eq!(keys, vec!["S1", "S2"]);
        assert!(sink.samples.iter().all(|s| s.calls.is_empty()));
        assert_eq!(sink.variants[1].info["DP"].value, vec![InfoValue::Integer(10)]);
        assert_eq!(sink.calls[0].sample, "S1");
        assert_eq!(sink.calls[0].call.genotype, vec![0, 1]);
    }

    #[test]
    fn batch_mode_folds_calls_into_samples() {
        let document = load_document(&mut source(VCF), IdentityStrategy::Identifier).unwrap();
        assert_eq!(document.variants.len(), 2);

        let s1 = &document.samples[0];
        assert_eq!(s1.key, "S1");
        assert_eq!(s1.calls.len(), 2);
        assert!(s1.calls[0].phased);
        assert!(!s1.calls[1].phased);

        let s2 = &document.samples[1];
        assert_eq!(s2.calls.len(), 1);
        assert_eq!(s2.calls[0].variant, "rs2");
        assert_eq!(s2.calls[0].genotype, vec![0, 1, 2]);
    }

    #[test]
    fn extracting_one_sample_matches_batch_mode() {
        let document = load_document(&mut source(VCF), IdentityStrategy::Identifier).unwrap();
        let by_name = extract_sample(
            &mut source(VCF),
            &SampleSelector::Name("S2".into()),
            IdentityStrategy::Identifier,
        )
        .unwrap();
        let by_position = extract_sample(
            &mut source(VCF),
            &SampleSelector::Position(1),
            IdentityStrategy::Identifier,
        )
        .unwrap();

        assert_eq!(by_name, document.samples[1]);
        assert_eq!(by_position, by_name);
    }

    #[test]
    fn extracting_an_unknown_sample_is_not_found() {
        let err = extract_sample(
            &mut source(VCF),
            &SampleSelector::Name("S3".into()),
            IdentityStrategy::Identifier,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            DocumentError::Columns(ColumnError::SampleNotFound(_))
        ));
    }

    #[test]
    fn random_identities_cannot_extract_samples() {
        let err = extract_sample(
            &mut source(VCF),
            &SampleSelector::Position(0),
            IdentityStrategy::Random,
        )
        .unwrap_err();
        assert!(matches!(err, DocumentError::UnlinkableIdentity));
    }

    #[test]
    fn files_without_column_header_fail_fast() {
        let text = "##INFO=<ID=DP,Number=1,Type=Integer>\n";
        let err = load_document(&mut source(text), IdentityStrategy::Identifier).unwrap_err();
        assert!(matches!(
            err,
            DocumentError::Columns(ColumnError::MissingColumnHeader)
        ));
    }

    #[test]
    fn late_metadata_is_ignored_and_second_header_rejected() {
        let late = format!("{VCF}##INFO=<ID=NEW,Number=1,Type=Integer>\n");
        let document = load_document(&mut source(&late), IdentityStrategy::Identifier).unwrap();
        assert!(!document.schema.info.contains_key("NEW"));

        let doubled = format!("{VCF}#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n");
        let err = load_document(&mut source(&doubled), IdentityStrategy::Identifier).unwrap_err();
        assert!(matches!(
            err,
            DocumentError::DuplicateColumnHeader { line: 8 }
        ));
    }

    #[test]
    fn repeated_variant_keys_fail_batch_and_streaming_modes() {
        let repeated = format!("{VCF}2\t300\trs1\tT\tA\t.\tPASS\t.\tGT\t0|0\t0|1\n");
        let err = load_document(&mut source(&repeated), IdentityStrategy::Identifier).unwrap_err();
        assert!(matches!(
            err,
            DocumentError::Sink(SinkError::Duplicate { kind: RecordKind::Variant, ref key })
                if key == "rs1"
        ));

        let mut sink = MemorySink::default();
        let err = ingest(&mut source(&repeated), IdentityStrategy::Identifier, &mut sink)
            .unwrap_err();
        assert!(matches!(err, DocumentError::Sink(SinkError::Duplicate { .. })));
        assert_eq!(sink.variants.len(), 2);

        let document = load_document(&mut source(&repeated), IdentityStrategy::Content).unwrap();
        assert_eq!(document.variants.len(), 3);
    }

    #[test]
    fn repeated_sample_names_are_rejected() {
        let doubled = VCF.replace("\tS1\tS2\n", "\tS1\tS1\n");
        let err = load_document(&mut source(&doubled), IdentityStrategy::Identifier).unwrap_err();
        assert!(matches!(
            err,
            DocumentError::Sink(SinkError::Duplicate { kind: RecordKind::Sample, .. })
        ));
    }

    #[test]
    fn unplaced_contigs_fail_unless_skipped() {
        let with_decoy = format!("{VCF}hs37d5\t10\trs9\tA\tT\t.\tPASS\t.\tGT\t0|1\t0|1\n");
        let err = load_document(&mut source(&with_decoy), IdentityStrategy::Identifier)
            .unwrap_err();
        assert!(matches!(err, DocumentError::Row(RowError::Chromosome { line: 8, .. })));

        let mut text = source(&with_decoy);
        let (schema, columns) = read_preamble(&mut text).unwrap().into_parts().unwrap();
        let parser = RowParser::new(
            Arc::new(schema),
            Arc::new(columns),
            IdentityResolver::new(IdentityStrategy::Identifier),
        )
        .with_contig_policy(ContigPolicy::Skip);
        let mut sink = MemorySink::default();
        let mut summary = IngestSummary::default();
        while let Some((line, row)) = next_data_row(&mut text).unwrap() {
            summary.record(emit_row(&parser, &row, line, &mut sink).unwrap());
        }
        assert_eq!(summary.rows, 3);
        assert_eq!(summary.variants, 2);
        assert_eq!(summary.skipped, 1);
        assert!(sink.variants.iter().all(|v| v.key != "rs9"));
    }

    #[test]
    fn row_errors_carry_line_numbers() {
        let broken = format!("{VCF}1\t300\trs3\tA\tT\t.\tPASS\tXX=1\tGT\t0|0\t0|0\n");
        let err = load_document(&mut source(&broken), IdentityStrategy::Identifier).unwrap_err();
        assert_eq!(
            err.to_string(),
            "line 8: annotation 'XX' is used in a row but never declared in the header"
        );
    }
}
