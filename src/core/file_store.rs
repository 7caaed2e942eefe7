// JSON catalog file backend with cross-process locking and atomic replace.
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use fs2::FileExt;
use libc::{EACCES, EPERM};

use crate::core::book::{Book, BookDraft, BookId};
use crate::core::error::{Error, ErrorKind};
use crate::core::store::{BookStore, Catalog, now_rfc3339};

/// Store persisted as a single JSON document.
///
/// Writers hold an exclusive lock on `<catalog>.lock` for the whole
/// read-modify-write cycle; readers hold a shared lock. The document is
/// replaced via a temp file and rename, so a failed write leaves the
/// previous catalog readable.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock_path: PathBuf,
    writer: Mutex<()>,
}

impl FileStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, Error> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| {
                Error::new(io_error_kind(&err))
                    .with_message("failed to create catalog directory")
                    .with_path(parent)
                    .with_source(err)
            })?;
        }
        let lock_path = sidecar_path(&path, "lock");
        let store = Self {
            path,
            lock_path,
            writer: Mutex::new(()),
        };
        store.read_shared()?;
        Ok(store)
    }

    fn read_shared(&self) -> Result<Catalog, Error> {
        let _lock = CatalogLock::acquire(&self.lock_path, LockMode::Shared)?;
        read_catalog(&self.path)
    }

    fn mutate<T>(&self, apply: impl FnOnce(&mut Catalog) -> Result<T, Error>) -> Result<T, Error> {
        let _writer = self.writer_guard();
        let _lock = CatalogLock::acquire(&self.lock_path, LockMode::Exclusive)?;
        let mut catalog = read_catalog(&self.path)?;
        let value = apply(&mut catalog)?;
        write_catalog(&self.path, &catalog)?;
        Ok(value)
    }

    fn writer_guard(&self) -> MutexGuard<'_, ()> {
        self.writer
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}

impl BookStore for FileStore {
    fn list_all(&self) -> Result<Vec<Book>, Error> {
        Ok(self.read_shared()?.books().to_vec())
    }

    fn get(&self, id: BookId) -> Result<Book, Error> {
        self.read_shared()?.get(id).cloned()
    }

    fn create(&self, draft: &BookDraft) -> Result<Book, Error> {
        let fields = draft.validate()?;
        let now = now_rfc3339()?;
        let book = self.mutate(|catalog| catalog.insert(fields, now))?;
        tracing::debug!(id = book.id, path = %self.path.display(), "book created");
        Ok(book)
    }

    fn update(&self, id: BookId, draft: &BookDraft) -> Result<Book, Error> {
        let fields = draft.validate()?;
        let now = now_rfc3339()?;
        let book = self.mutate(|catalog| catalog.replace(id, fields, now))?;
        tracing::debug!(id, path = %self.path.display(), "book updated");
        Ok(book)
    }

    fn delete(&self, id: BookId) -> Result<(), Error> {
        self.mutate(|catalog| catalog.remove(id))?;
        tracing::debug!(id, path = %self.path.display(), "book deleted");
        Ok(())
    }
}

#[derive(Clone, Copy, Debug)]
enum LockMode {
    Shared,
    Exclusive,
}

struct CatalogLock {
    file: File,
}

impl CatalogLock {
    fn acquire(path: &Path, mode: LockMode) -> Result<Self, Error> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|err| {
                Error::new(io_error_kind(&err))
                    .with_message("failed to open catalog lock")
                    .with_path(path)
                    .with_source(err)
            })?;
        let locked = match mode {
            LockMode::Shared => file.lock_shared(),
            LockMode::Exclusive => file.lock_exclusive(),
        };
        locked.map_err(|err| {
            Error::new(lock_error_kind(&err))
                .with_message("failed to lock catalog")
                .with_path(path)
                .with_source(err)
        })?;
        Ok(Self { file })
    }
}

impl Drop for CatalogLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

fn read_catalog(path: &Path) -> Result<Catalog, Error> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Catalog::default()),
        Err(err) => {
            return Err(Error::new(io_error_kind(&err))
                .with_message("failed to read catalog")
                .with_path(path)
                .with_source(err));
        }
    };
    if text.trim().is_empty() {
        return Ok(Catalog::default());
    }
    serde_json::from_str(&text).map_err(|err| {
        Error::new(ErrorKind::Corrupt)
            .with_message("catalog file is not valid")
            .with_path(path)
            .with_hint("Restore the catalog from a backup or move it aside to start empty.")
            .with_source(err)
    })
}

fn write_catalog(path: &Path, catalog: &Catalog) -> Result<(), Error> {
    let bytes = serde_json::to_vec_pretty(catalog).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("failed to encode catalog")
            .with_source(err)
    })?;
    let tmp_path = sidecar_path(path, "tmp");
    let io_err = |err: io::Error| {
        Error::new(io_error_kind(&err))
            .with_message("failed to write catalog")
            .with_path(&tmp_path)
            .with_source(err)
    };
    let mut file = File::create(&tmp_path).map_err(io_err)?;
    file.write_all(&bytes).map_err(io_err)?;
    file.sync_all().map_err(io_err)?;
    drop(file);
    fs::rename(&tmp_path, path).map_err(|err| {
        let _ = fs::remove_file(&tmp_path);
        Error::new(io_error_kind(&err))
            .with_message("failed to replace catalog")
            .with_path(path)
            .with_source(err)
    })
}

fn sidecar_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

fn io_error_kind(err: &io::Error) -> ErrorKind {
    match err.kind() {
        io::ErrorKind::PermissionDenied => ErrorKind::Permission,
        _ => ErrorKind::Io,
    }
}

fn lock_error_kind(err: &io::Error) -> ErrorKind {
    let errno = err.raw_os_error().unwrap_or_default();
    if errno == EACCES || errno == EPERM {
        return ErrorKind::Permission;
    }
    match err.kind() {
        io::ErrorKind::WouldBlock => ErrorKind::Busy,
        io::ErrorKind::PermissionDenied => ErrorKind::Permission,
        _ => ErrorKind::Io,
    }
}
