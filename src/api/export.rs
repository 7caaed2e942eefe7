//! Purpose: Tie column resolution, the record store, and encoders into one export operation.
//! Exports: `ExportFormat`, `columns_from_query`, `export_to_writer`.
//! Role: Shared by the HTTP export handlers and the `export` CLI command.
//! Invariants: Callers resolve columns before the store is read; invalid requests never touch it.
//! Invariants: Exports never mutate the store.
use std::fmt;
use std::io::Write;
use std::str::FromStr;

use crate::core::columns::Column;
use crate::core::csv_export::write_csv;
use crate::core::error::{Error, ErrorKind};
use crate::core::store::BookStore;
use crate::core::xml_export::write_xml;

const COLUMN_KEYS: [&str; 2] = ["columns[]", "columns"];

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExportFormat {
    Csv,
    Xml,
}

impl ExportFormat {
    pub fn media_type(self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv",
            ExportFormat::Xml => "application/xml",
        }
    }

    pub fn content_disposition(self) -> &'static str {
        match self {
            ExportFormat::Csv => "attachment; filename=\"books.csv\"",
            ExportFormat::Xml => "attachment; filename=\"books.xml\"",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::Csv => f.write_str("csv"),
            ExportFormat::Xml => f.write_str("xml"),
        }
    }
}

impl FromStr for ExportFormat {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "csv" => Ok(ExportFormat::Csv),
            "xml" => Ok(ExportFormat::Xml),
            other => Err(Error::new(ErrorKind::Usage)
                .with_message(format!("unsupported export format `{other}`"))
                .with_hint("Use csv or xml.")),
        }
    }
}

/// Collects repeated `columns[]` (or bare `columns`) query values in order.
///
/// Returns `None` when neither key is present so the caller gets defaults.
pub fn columns_from_query(query: Option<&str>) -> Option<Vec<String>> {
    let query = query?;
    let columns: Vec<String> = url::form_urlencoded::parse(query.as_bytes())
        .filter(|(key, _)| COLUMN_KEYS.iter().any(|candidate| key == candidate))
        .map(|(_, value)| value.into_owned())
        .collect();
    if columns.is_empty() {
        None
    } else {
        Some(columns)
    }
}

/// Snapshots the store and encodes it into `sink` over already-resolved columns.
///
/// Callers resolve columns first so that a bad request never reaches the store.
pub fn export_to_writer<W: Write>(
    store: &dyn BookStore,
    format: ExportFormat,
    columns: &[Column],
    sink: W,
) -> Result<W, Error> {
    let books = store.list_all()?;
    match format {
        ExportFormat::Csv => write_csv(sink, &books, columns),
        ExportFormat::Xml => write_xml(sink, &books, columns),
    }
}

#[cfg(test)]
mod tests {
    use super::{ExportFormat, columns_from_query, export_to_writer};
    use crate::core::book::BookDraft;
    use crate::core::columns::{DEFAULT_COLUMNS, resolve};
    use crate::core::error::ErrorKind;
    use crate::core::store::{BookStore, MemoryStore};

    #[test]
    fn query_columns_keep_order_and_decode_brackets() {
        assert_eq!(
            columns_from_query(Some("columns%5B%5D=author&columns%5B%5D=title")),
            Some(vec!["author".to_string(), "title".to_string()])
        );
        assert_eq!(
            columns_from_query(Some("columns[]=title&x=1&columns=author")),
            Some(vec!["title".to_string(), "author".to_string()])
        );
        assert_eq!(columns_from_query(Some("other=1")), None);
        assert_eq!(columns_from_query(None), None);
    }

    #[test]
    fn omitted_columns_equal_explicit_defaults() {
        let store = MemoryStore::new();
        store
            .create(&BookDraft::new("Dune", "Frank Herbert"))
            .expect("create");
        let defaults = resolve::<&str>(None).expect("defaults");
        let explicit = resolve(Some(&["title", "author"][..])).expect("explicit");
        for format in [ExportFormat::Csv, ExportFormat::Xml] {
            let implicit = export_to_writer(&store, format, &defaults, Vec::new()).expect("export");
            let requested =
                export_to_writer(&store, format, &explicit, Vec::new()).expect("export");
            assert_eq!(implicit, requested);
        }
    }

    #[test]
    fn csv_export_matches_catalog() {
        let store = MemoryStore::new();
        store
            .create(&BookDraft::new("Dune", "Frank Herbert"))
            .expect("create");
        store.create(&BookDraft::new("A, B", "X")).expect("create");
        let bytes = export_to_writer(&store, ExportFormat::Csv, &DEFAULT_COLUMNS, Vec::new())
            .expect("export");
        assert_eq!(
            String::from_utf8(bytes).expect("utf8"),
            "title,author\nDune,Frank Herbert\n\"A, B\",X\n"
        );
        assert_eq!(store.count().expect("count"), 2);
    }

    #[test]
    fn format_metadata_is_fixed() {
        assert_eq!(ExportFormat::Csv.media_type(), "text/csv");
        assert_eq!(ExportFormat::Xml.media_type(), "application/xml");
        assert_eq!(
            ExportFormat::Csv.content_disposition(),
            "attachment; filename=\"books.csv\""
        );
        assert_eq!(
            ExportFormat::Xml.content_disposition(),
            "attachment; filename=\"books.xml\""
        );
        assert_eq!("xml".parse::<ExportFormat>().expect("xml"), ExportFormat::Xml);
        assert_eq!(
            "json".parse::<ExportFormat>().expect_err("json").kind(),
            ErrorKind::Usage
        );
    }
}
