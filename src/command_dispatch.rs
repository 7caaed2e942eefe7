//! Purpose: Hold top-level CLI command dispatch for `bookshelf`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: Book commands print `{"book":...}`, `{"books":[...]}`, or `{"ok":true}`.
//! Invariants: Export columns are resolved before the catalog is opened.
//! Invariants: `--output` files are replaced only by a complete export.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use super::*;
use bookshelf::api::{
    BookDraft, BookStore, Column, FileStore, export_to_writer, resolve_columns,
};

pub(super) fn dispatch_command(command: Command, data_path: PathBuf) -> Result<RunOutcome, Error> {
    match command {
        Command::Serve(run) => {
            let bind: SocketAddr = run.bind.parse().map_err(|_| {
                Error::new(ErrorKind::Usage)
                    .with_message("invalid bind address")
                    .with_hint("Use a host:port value like 127.0.0.1:9800.")
            })?;
            let config = serve::ServeConfig {
                bind,
                data: (!run.memory).then_some(data_path),
                allow_non_loopback: run.allow_non_loopback,
                max_body_bytes: run.max_body_bytes,
            };
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .map_err(|err| {
                    Error::new(ErrorKind::Internal)
                        .with_message("failed to start runtime")
                        .with_source(err)
                })?;
            runtime.block_on(serve::serve(config))?;
            Ok(RunOutcome::ok())
        }
        Command::Book { command } => {
            let store = FileStore::open(&data_path)?;
            run_book_command(&store, command)?;
            Ok(RunOutcome::ok())
        }
        Command::Export {
            format,
            columns,
            output,
        } => {
            let requested = (!columns.is_empty()).then_some(columns);
            let columns = resolve_columns(requested.as_deref())?;
            let store = FileStore::open(&data_path)?;
            run_export(&store, format.into(), &columns, output.as_deref())?;
            Ok(RunOutcome::ok())
        }
    }
}

fn run_book_command(store: &dyn BookStore, command: BookCommand) -> Result<(), Error> {
    match command {
        BookCommand::Add(fields) => {
            let book = store.create(&draft_from_args(fields))?;
            emit_json(json!({ "book": book }));
        }
        BookCommand::List => {
            let books = store.list_all()?;
            emit_json(json!({ "books": books }));
        }
        BookCommand::Get { id } => {
            let book = store.get(id)?;
            emit_json(json!({ "book": book }));
        }
        BookCommand::Edit { id, fields } => {
            let book = store.update(id, &draft_from_args(fields))?;
            emit_json(json!({ "book": book }));
        }
        BookCommand::Delete { id } => {
            store.delete(id)?;
            emit_json(json!({ "ok": true }));
        }
    }
    Ok(())
}

fn draft_from_args(fields: BookFieldsArgs) -> BookDraft {
    BookDraft {
        title: fields.title.map(Value::String),
        author: fields.author.map(Value::String),
    }
}

fn run_export(
    store: &dyn BookStore,
    format: ExportFormat,
    columns: &[Column],
    output: Option<&Path>,
) -> Result<(), Error> {
    match output {
        Some(path) => {
            let partial = partial_path(path);
            let result = write_export_file(store, format, columns, &partial).and_then(|()| {
                fs::rename(&partial, path).map_err(|err| {
                    Error::new(ErrorKind::Io)
                        .with_message("failed to replace export file")
                        .with_path(path)
                        .with_source(err)
                })
            });
            if result.is_err() {
                let _ = fs::remove_file(&partial);
            }
            result
        }
        None => {
            let stdout = io::stdout();
            let mut sink = export_to_writer(store, format, columns, stdout.lock())?;
            sink.flush().map_err(|err| {
                Error::new(ErrorKind::Encoding)
                    .with_message("failed to write export to stdout")
                    .with_source(err)
            })
        }
    }
}

fn write_export_file(
    store: &dyn BookStore,
    format: ExportFormat,
    columns: &[Column],
    path: &Path,
) -> Result<(), Error> {
    let io_err = |message: &str, err: io::Error| {
        Error::new(ErrorKind::Io)
            .with_message(message)
            .with_path(path)
            .with_source(err)
    };
    let file = File::create(path).map_err(|err| io_err("failed to create export file", err))?;
    let mut sink = export_to_writer(store, format, columns, BufWriter::new(file))?;
    sink.flush()
        .map_err(|err| io_err("failed to write export file", err))?;
    sink.get_ref()
        .sync_all()
        .map_err(|err| io_err("failed to write export file", err))
}

/// `<output>.partial` beside the requested output path.
fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".partial");
    PathBuf::from(name)
}
