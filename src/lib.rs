//! Purpose: Shared library crate used by the `bookshelf` binary and tests.
//! Exports: `api` (book store, column resolution, export encoders, errors).
//! Role: Keeps CRUD and export semantics in one place for the CLI and HTTP server.
//! Invariants: Core modules prefer explicit inputs/outputs over hidden state.
mod core;

pub mod api;
