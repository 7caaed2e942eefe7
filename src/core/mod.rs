// Core modules implementing the book model, storage backends, and export encoders.
pub mod book;
pub mod columns;
pub mod csv_export;
pub mod error;
pub mod file_store;
pub mod store;
pub mod xml_export;
