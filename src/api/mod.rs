//! Purpose: Define the public Rust API boundary for the book catalog.
//! Exports: Book model, store backends, column resolution, encoders, errors, export glue.
//! Role: Single surface used by the CLI, the HTTP server, and integration tests.
//! Invariants: This module is the only public path to core types.

mod export;

pub use crate::core::book::{Book, BookDraft, BookFields, BookId, MAX_FIELD_CHARS};
pub use crate::core::columns::{Column, DEFAULT_COLUMNS, resolve as resolve_columns};
pub use crate::core::csv_export::{CsvEncoder, write_csv};
#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind, FieldMessages};
pub use crate::core::file_store::FileStore;
pub use crate::core::store::{BookStore, MemoryStore};
pub use crate::core::xml_export::{to_xml_bytes, write_xml};
pub use export::{ExportFormat, columns_from_query, export_to_writer};
