// Record store contract, the shared in-memory catalog, and the process-local backend.
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::core::book::{Book, BookDraft, BookFields, BookId};
use crate::core::error::{Error, ErrorKind};

/// Persistence capability set for books.
///
/// Implementations validate drafts before touching state, keep insertion
/// order for `list_all`, and serialize mutations. A failed call leaves the
/// stored catalog unchanged.
pub trait BookStore: Send + Sync {
    fn list_all(&self) -> Result<Vec<Book>, Error>;
    fn get(&self, id: BookId) -> Result<Book, Error>;
    fn create(&self, draft: &BookDraft) -> Result<Book, Error>;
    fn update(&self, id: BookId, draft: &BookDraft) -> Result<Book, Error>;
    fn delete(&self, id: BookId) -> Result<(), Error>;

    fn count(&self) -> Result<usize, Error> {
        self.list_all().map(|books| books.len())
    }
}

/// Catalog state shared by every backend; also the on-disk document shape.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Catalog {
    next_id: BookId,
    books: Vec<Book>,
}

impl Catalog {
    pub fn books(&self) -> &[Book] {
        &self.books
    }

    pub fn get(&self, id: BookId) -> Result<&Book, Error> {
        self.books
            .iter()
            .find(|book| book.id == id)
            .ok_or_else(|| not_found(id))
    }

    pub fn insert(&mut self, fields: BookFields, now: String) -> Result<Book, Error> {
        self.next_id = self
            .next_id
            .max(self.max_id())
            .checked_add(1)
            .ok_or_else(|| {
                Error::new(ErrorKind::Corrupt)
                    .with_message("book id space exhausted")
                    .with_hint("The catalog's next id is at its maximum; repair the catalog file.")
            })?;
        let book = Book {
            id: self.next_id,
            title: fields.title,
            author: fields.author,
            created_at: now.clone(),
            updated_at: now,
        };
        self.books.push(book.clone());
        Ok(book)
    }

    pub fn replace(&mut self, id: BookId, fields: BookFields, now: String) -> Result<Book, Error> {
        let book = self
            .books
            .iter_mut()
            .find(|book| book.id == id)
            .ok_or_else(|| not_found(id))?;
        book.title = fields.title;
        book.author = fields.author;
        book.updated_at = now;
        Ok(book.clone())
    }

    pub fn remove(&mut self, id: BookId) -> Result<Book, Error> {
        let index = self
            .books
            .iter()
            .position(|book| book.id == id)
            .ok_or_else(|| not_found(id))?;
        Ok(self.books.remove(index))
    }

    fn max_id(&self) -> BookId {
        self.books.iter().map(|book| book.id).max().unwrap_or(0)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    catalog: Mutex<Catalog>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Catalog> {
        self.catalog
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}

impl BookStore for MemoryStore {
    fn list_all(&self) -> Result<Vec<Book>, Error> {
        Ok(self.lock().books.clone())
    }

    fn get(&self, id: BookId) -> Result<Book, Error> {
        self.lock().get(id).cloned()
    }

    fn create(&self, draft: &BookDraft) -> Result<Book, Error> {
        let fields = draft.validate()?;
        let now = now_rfc3339()?;
        let book = self.lock().insert(fields, now)?;
        tracing::debug!(id = book.id, "book created");
        Ok(book)
    }

    fn update(&self, id: BookId, draft: &BookDraft) -> Result<Book, Error> {
        let fields = draft.validate()?;
        let now = now_rfc3339()?;
        let book = self.lock().replace(id, fields, now)?;
        tracing::debug!(id, "book updated");
        Ok(book)
    }

    fn delete(&self, id: BookId) -> Result<(), Error> {
        self.lock().remove(id)?;
        tracing::debug!(id, "book deleted");
        Ok(())
    }

    fn count(&self) -> Result<usize, Error> {
        Ok(self.lock().books.len())
    }
}

pub(crate) fn not_found(id: BookId) -> Error {
    Error::new(ErrorKind::NotFound)
        .with_message("book not found")
        .with_id(id)
}

pub(crate) fn now_rfc3339() -> Result<String, Error> {
    OffsetDateTime::now_utc().format(&Rfc3339).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("timestamp format failed")
            .with_source(err)
    })
}

#[cfg(test)]
mod tests {
    use super::{BookStore, Catalog, MemoryStore};
    use crate::core::book::{BookDraft, BookFields};
    use crate::core::error::ErrorKind;

    #[test]
    fn create_then_get_returns_same_values() {
        let store = MemoryStore::new();
        let created = store
            .create(&BookDraft::new("Adventures of Tom Sawyer", "Mark Twain"))
            .expect("create");
        let loaded = store.get(created.id).expect("get");
        assert_eq!(loaded, created);
        assert_eq!(loaded.title, "Adventures of Tom Sawyer");
        assert_eq!(loaded.author, "Mark Twain");
        assert_eq!(loaded.created_at, loaded.updated_at);
    }

    #[test]
    fn list_preserves_insertion_order() {
        let store = MemoryStore::new();
        for title in ["Zed", "Alpha", "Middle"] {
            store.create(&BookDraft::new(title, "A")).expect("create");
        }
        let titles: Vec<String> = store
            .list_all()
            .expect("list")
            .into_iter()
            .map(|book| book.title)
            .collect();
        assert_eq!(titles, ["Zed", "Alpha", "Middle"]);
    }

    #[test]
    fn invalid_create_does_not_mutate() {
        let store = MemoryStore::new();
        let err = store.create(&BookDraft::default()).expect_err("invalid");
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(store.count().expect("count"), 0);
    }

    #[test]
    fn update_replaces_fields_in_place() {
        let store = MemoryStore::new();
        let first = store.create(&BookDraft::new("One", "A")).expect("create");
        let second = store.create(&BookDraft::new("Two", "B")).expect("create");

        let updated = store
            .update(first.id, &BookDraft::new("Updated Title", "Updated Author"))
            .expect("update");
        assert_eq!(updated.id, first.id);
        assert_eq!(updated.created_at, first.created_at);

        let books = store.list_all().expect("list");
        assert_eq!(books[0].title, "Updated Title");
        assert_eq!(books[1], second);
    }

    #[test]
    fn invalid_update_keeps_prior_values() {
        let store = MemoryStore::new();
        let book = store.create(&BookDraft::new("Keep", "Me")).expect("create");
        let err = store
            .update(book.id, &BookDraft::new("", "Someone"))
            .expect_err("invalid");
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(store.get(book.id).expect("get"), book);
    }

    #[test]
    fn missing_ids_are_not_found() {
        let store = MemoryStore::new();
        store.create(&BookDraft::new("Only", "One")).expect("create");

        let err = store.delete(99).expect_err("missing");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.id(), Some(99));
        assert_eq!(store.count().expect("count"), 1);

        let err = store.get(99).expect_err("missing");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err = store
            .update(99, &BookDraft::new("T", "A"))
            .expect_err("missing");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn ids_are_not_reused_after_delete() {
        let store = MemoryStore::new();
        let first = store.create(&BookDraft::new("A", "A")).expect("create");
        let second = store.create(&BookDraft::new("B", "B")).expect("create");
        store.delete(second.id).expect("delete");
        let third = store.create(&BookDraft::new("C", "C")).expect("create");
        assert!(third.id > second.id);
        assert!(second.id > first.id);
    }

    #[test]
    fn exhausted_id_space_is_corrupt() {
        let mut catalog: Catalog =
            serde_json::from_str(&format!("{{\"next_id\":{},\"books\":[]}}", u64::MAX))
                .expect("catalog");
        let fields = BookFields {
            title: "Dune".to_string(),
            author: "Frank Herbert".to_string(),
        };
        let err = catalog
            .insert(fields, "2026-01-01T00:00:00Z".to_string())
            .expect_err("overflow");
        assert_eq!(err.kind(), ErrorKind::Corrupt);
        assert!(catalog.books().is_empty());
    }
}
