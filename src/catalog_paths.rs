//! Purpose: Resolve where the catalog file lives when `--data` is not given.
//! Exports: `default_data_path`.
//! Role: Keep the CLI and server defaults aligned from one source.
//! Invariants: Default catalog path remains `~/.bookshelf/catalog.json`.

use std::path::PathBuf;

pub(crate) fn default_data_path() -> PathBuf {
    let home = std::env::var_os("HOME").unwrap_or_default();
    PathBuf::from(home).join(".bookshelf").join("catalog.json")
}
