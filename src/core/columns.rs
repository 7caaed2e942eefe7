// Export column allowlist and request resolution.
use std::fmt;
use std::str::FromStr;

use crate::core::book::Book;
use crate::core::error::{Error, ErrorKind};

/// Field that may appear in an export; the closed set of exportable fields.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Column {
    Title,
    Author,
}

pub const DEFAULT_COLUMNS: [Column; 2] = [Column::Title, Column::Author];

impl Column {
    pub const ALL: [Column; 2] = [Column::Title, Column::Author];

    pub fn name(self) -> &'static str {
        match self {
            Column::Title => "title",
            Column::Author => "author",
        }
    }

    pub fn value(self, book: &Book) -> &str {
        match self {
            Column::Title => &book.title,
            Column::Author => &book.author,
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Column {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Column::ALL
            .into_iter()
            .find(|column| column.name() == value)
            .ok_or_else(|| column_error(format!("The column `{value}` is not exportable.")))
    }
}

/// Resolves an optional caller column list into the ordered export columns.
///
/// `None` yields the defaults. An explicit list must be non-empty, contain
/// only known names, and name each column at most once; the caller's order
/// is kept.
pub fn resolve<S: AsRef<str>>(requested: Option<&[S]>) -> Result<Vec<Column>, Error> {
    let Some(requested) = requested else {
        return Ok(DEFAULT_COLUMNS.to_vec());
    };
    if requested.is_empty() {
        return Err(column_error("At least one column must be selected."));
    }

    let mut resolved = Vec::with_capacity(requested.len());
    let mut err: Option<Error> = None;
    for name in requested {
        let name = name.as_ref();
        let message = match name.parse::<Column>() {
            Ok(column) if resolved.contains(&column) => {
                format!("The column `{name}` is selected more than once.")
            }
            Ok(column) => {
                resolved.push(column);
                continue;
            }
            Err(_) => format!("The column `{name}` is not exportable."),
        };
        err = Some(
            err.unwrap_or_else(|| Error::new(ErrorKind::Validation).with_hint(allowed_hint()))
                .with_field("columns", message),
        );
    }

    match err {
        Some(err) => Err(err.with_message("invalid export columns")),
        None => Ok(resolved),
    }
}

fn column_error(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::Validation)
        .with_message("invalid export columns")
        .with_hint(allowed_hint())
        .with_field("columns", message)
}

fn allowed_hint() -> String {
    let names: Vec<&str> = Column::ALL.iter().map(|column| column.name()).collect();
    format!("Allowed columns: {}.", names.join(", "))
}
