use flate2::read::MultiGzDecoder;
use log::debug;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;
use thiserror::Error;

/// The display name used for standard input.
pub const STDIN_DISPLAY: &str = "<stdin>";

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("error reading {path} at line {line}: {source}")]
    Read {
        path: String,
        line: usize,
        #[source]
        source: io::Error,
    },
    #[error("{path} line {line} is not valid UTF-8")]
    Utf8 { path: String, line: usize },
}

/// A trait that abstracts sequential, line-oriented access to VCF text,
/// regardless of whether it comes from a plain file, a gzip stream, or stdin.
pub trait TextSource: Send {
    /// A human-readable name for error messages.
    fn display_name(&self) -> &str;

    /// The 1-based number of the line most recently returned by `next_line`.
    fn line_number(&self) -> usize;

    /// Returns the next line with its terminator removed, or `None` at end of input.
    fn next_line(&mut self) -> Result<Option<&str>, SourceError>;
}

/// Line reader over any buffered reader.
pub struct ReaderSource<R: BufRead + Send> {
    reader: R,
    line: Vec<u8>,
    line_number: usize,
    path_display: String,
}

impl<R: BufRead + Send> ReaderSource<R> {
    pub fn new(reader: R, path_display: impl Into<String>) -> Self {
        Self {
            reader,
            line: Vec::with_capacity(1024),
            line_number: 0,
            path_display: path_display.into(),
        }
    }
}

impl<R: BufRead + Send> TextSource for ReaderSource<R> {
    fn display_name(&self) -> &str {
        &self.path_display
    }

    fn line_number(&self) -> usize {
        self.line_number
    }

    fn next_line(&mut self) -> Result<Option<&str>, SourceError> {
        self.line.clear();

        let bytes_read =
            self.reader
                .read_until(b'\n', &mut self.line)
                .map_err(|source| SourceError::Read {
                    path: self.path_display.clone(),
                    line: self.line_number + 1,
                    source,
                })?;

        if bytes_read == 0 {
            return Ok(None);
        }
        self.line_number += 1;

        if self.line.last() == Some(&b'\n') {
            self.line.pop();
        }
        if self.line.last() == Some(&b'\r') {
            self.line.pop();
        }

        std::str::from_utf8(&self.line)
            .map(Some)
            .map_err(|_| SourceError::Utf8 {
                path: self.path_display.clone(),
                line: self.line_number,
            })
    }
}

/// Returns true when the path names gzip (or BGZF) compressed text.
pub fn is_gzip_path(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz") || ext.eq_ignore_ascii_case("bgz"))
}

/// Opens a VCF text source. `-` reads standard input; `.gz`/`.bgz` files are
/// decompressed on the fly.
pub fn open_text_source(path: &Path) -> Result<Box<dyn TextSource>, SourceError> {
    if path.as_os_str() == "-" {
        debug!("Reading VCF text from standard input");
        let reader: Box<dyn Read + Send> = Box::new(io::stdin());
        return Ok(Box::new(ReaderSource::new(
            BufReader::new(reader),
            STDIN_DISPLAY,
        )));
    }

    let path_display = path.display().to_string();
    let file = File::open(path).map_err(|source| SourceError::Open {
        path: path_display.clone(),
        source,
    })?;

    let reader: Box<dyn Read + Send> = if is_gzip_path(path) {
        debug!("Opening {path_display} as gzip-compressed text");
        Box::new(MultiGzDecoder::new(file))
    } else {
        Box::new(file)
    };

    Ok(Box::new(ReaderSource::new(
        BufReader::with_capacity(1 << 16, reader),
        path_display,
    )))
}
