// Row-at-a-time CSV encoding of books over resolved columns.
use std::io::Write;

use crate::core::book::Book;
use crate::core::columns::Column;
use crate::core::error::{Error, ErrorKind};

/// Incremental CSV encoder.
///
/// The header is written on construction. Every row is flushed to the sink
/// as soon as it is encoded, so the sink only ever observes whole rows.
pub struct CsvEncoder<W: Write> {
    writer: csv::Writer<W>,
    columns: Vec<Column>,
    rows: usize,
}

impl<W: Write> CsvEncoder<W> {
    pub fn new(sink: W, columns: &[Column]) -> Result<Self, Error> {
        let writer = csv::WriterBuilder::new()
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(sink);
        let mut encoder = Self {
            writer,
            columns: columns.to_vec(),
            rows: 0,
        };
        encoder
            .writer
            .write_record(columns.iter().map(|column| column.name()))
            .map_err(|err| csv_error("failed to write csv header", err))?;
        encoder.flush_row()?;
        Ok(encoder)
    }

    pub fn write_book(&mut self, book: &Book) -> Result<(), Error> {
        let columns = &self.columns;
        self.writer
            .write_record(columns.iter().map(|column| column.value(book)))
            .map_err(|err| csv_error("failed to write csv row", err).with_id(book.id))?;
        self.flush_row().map_err(|err| err.with_id(book.id))?;
        self.rows += 1;
        Ok(())
    }

    /// Rows written so far, excluding the header.
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn finish(mut self) -> Result<W, Error> {
        self.flush_row()?;
        self.writer.into_inner().map_err(|err| {
            Error::new(ErrorKind::Encoding)
                .with_message("failed to finish csv output")
                .with_source(std::io::Error::new(err.error().kind(), err.error().to_string()))
        })
    }

    fn flush_row(&mut self) -> Result<(), Error> {
        self.writer.flush().map_err(|err| {
            Error::new(ErrorKind::Encoding)
                .with_message("failed to flush csv output")
                .with_source(err)
        })
    }
}

/// Encodes `books` into `sink`, stopping at the first sink failure.
pub fn write_csv<W: Write>(sink: W, books: &[Book], columns: &[Column]) -> Result<W, Error> {
    let mut encoder = CsvEncoder::new(sink, columns)?;
    for book in books {
        encoder.write_book(book)?;
    }
    encoder.finish()
}

fn csv_error(message: &str, err: csv::Error) -> Error {
    Error::new(ErrorKind::Encoding)
        .with_message(message)
        .with_source(err)
}
