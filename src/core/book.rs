// Book entity, caller-supplied drafts, and field validation for create/update.
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::error::{Error, ErrorKind, FieldMessages};

pub const MAX_FIELD_CHARS: usize = 255;

pub type BookId = u64;

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub id: BookId,
    pub title: String,
    pub author: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Unvalidated create/update input.
///
/// Fields are raw JSON so that type mismatches surface as per-field messages
/// instead of a wholesale decode failure.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct BookDraft {
    #[serde(default)]
    pub title: Option<Value>,
    #[serde(default)]
    pub author: Option<Value>,
}

/// Title and author that passed validation, already trimmed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BookFields {
    pub title: String,
    pub author: String,
}

impl BookDraft {
    pub fn new(title: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            title: Some(Value::String(title.into())),
            author: Some(Value::String(author.into())),
        }
    }

    pub fn validate(&self) -> Result<BookFields, Error> {
        let mut fields = FieldMessages::new();
        let title = validate_text("title", self.title.as_ref(), &mut fields);
        let author = validate_text("author", self.author.as_ref(), &mut fields);
        match (title, author) {
            (Some(title), Some(author)) if fields.is_empty() => Ok(BookFields { title, author }),
            _ => Err(Error::new(ErrorKind::Validation)
                .with_message("the given data was invalid")
                .with_fields(fields)),
        }
    }
}

fn validate_text(name: &str, value: Option<&Value>, fields: &mut FieldMessages) -> Option<String> {
    let text = match value {
        None | Some(Value::Null) => {
            push(fields, name, format!("The {name} field is required."));
            return None;
        }
        Some(Value::String(text)) => text.trim(),
        Some(_) => {
            push(fields, name, format!("The {name} must be a string."));
            return None;
        }
    };
    if text.is_empty() {
        push(fields, name, format!("The {name} field is required."));
        return None;
    }
    if text.chars().count() > MAX_FIELD_CHARS {
        push(
            fields,
            name,
            format!("The {name} may not be greater than {MAX_FIELD_CHARS} characters."),
        );
        return None;
    }
    Some(text.to_string())
}

fn push(fields: &mut FieldMessages, name: &str, message: String) {
    fields.entry(name.to_string()).or_default().push(message);
}
