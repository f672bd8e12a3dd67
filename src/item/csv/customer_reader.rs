use csv::{ReaderBuilder, StringRecord, Trim};
use std::{
    cell::{Cell, RefCell},
    fs::File,
    io::{BufRead, BufReader, Lines, Read},
    path::Path,
};

use crate::{
    core::item::{ItemReader, ItemReaderResult},
    domain::CustomerRecord,
    error::BatchError,
};

/// Reads customer rows from delimited text, one line per row.
///
/// Every line after the header is a row: a blank line is a row without fields
/// and fails like any other malformed row. Fields are split by a `csv` reader
/// over the single line, so quoting follows the usual CSV rules.
///
/// Uses a `RefCell` around the line iterator so that `read` can advance it
/// through a shared reference, as the `ItemReader` trait requires.
pub struct CustomerItemReader<R> {
    lines: RefCell<Lines<BufReader<R>>>,
    tokenizer: ReaderBuilder,
    header_skipped: Cell<bool>,
    /// Number of data rows consumed so far, header excluded
    row: Cell<usize>,
}

impl<R: Read> CustomerItemReader<R> {
    fn next_line(&self) -> Result<Option<String>, BatchError> {
        match self.lines.borrow_mut().next() {
            Some(line) => Ok(Some(line?)),
            None => Ok(None),
        }
    }

    fn tokenize(&self, row: usize, line: &str) -> Result<StringRecord, BatchError> {
        let line = line.strip_suffix('\r').unwrap_or(line);
        let mut record = StringRecord::new();
        if line.is_empty() {
            return Ok(record);
        }

        self.tokenizer
            .from_reader(line.as_bytes())
            .read_record(&mut record)
            .map_err(|e| BatchError::Parse {
                row,
                reason: e.to_string(),
            })?;
        Ok(record)
    }
}

impl<R: Read> ItemReader<CustomerRecord> for CustomerItemReader<R> {
    /// Reads and maps the next row.
    ///
    /// # Returns
    /// - `Ok(Some(record))` for a well-formed row
    /// - `Ok(None)` at the end of the input
    /// - `Err(BatchError::Parse)` for a malformed or blank row, with its 1-based row number
    fn read(&self) -> ItemReaderResult<CustomerRecord> {
        if !self.header_skipped.get() {
            self.header_skipped.set(true);
            if self.next_line()?.is_none() {
                return Ok(None);
            }
        }

        let Some(line) = self.next_line()? else {
            return Ok(None);
        };

        let row = self.row.get() + 1;
        self.row.set(row);

        let record = self.tokenize(row, &line)?;
        CustomerRecord::from_record(row, &record).map(Some)
    }
}

/// A builder for configuring customer record reading.
///
/// # Default Configuration
///
/// - Delimiter: comma (,)
/// - Header: one line, skipped
pub struct CustomerItemReaderBuilder {
    delimiter: u8,
}

impl Default for CustomerItemReaderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CustomerItemReaderBuilder {
    pub fn new() -> Self {
        Self { delimiter: b',' }
    }

    /// Sets the field delimiter.
    pub fn delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    fn tokenizer(&self) -> ReaderBuilder {
        let mut builder = ReaderBuilder::new();
        builder
            .trim(Trim::All)
            .delimiter(self.delimiter)
            .has_headers(false)
            // Field counts are checked by the record mapper
            .flexible(true);
        builder
    }

    /// Creates a reader over any `Read` source.
    pub fn from_reader<R: Read>(self, rdr: R) -> CustomerItemReader<R> {
        CustomerItemReader {
            lines: RefCell::new(BufReader::new(rdr).lines()),
            tokenizer: self.tokenizer(),
            header_skipped: Cell::new(false),
            row: Cell::new(0),
        }
    }

    /// Creates a reader over a file.
    ///
    /// # Errors
    /// `BatchError::Io` when the file cannot be opened.
    pub fn from_path<P: AsRef<Path>>(self, path: P) -> Result<CustomerItemReader<File>, BatchError> {
        let file = File::open(path)?;
        Ok(self.from_reader(file))
    }
}
