//! Purpose: `bookshelf` CLI entry point.
//! Role: Binary crate root; parses args, runs commands, emits JSON on stdout.
//! Invariants: Commands emit JSON on stdout, except `export`, which writes the export body.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
use std::io::{self, IsTerminal};
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum, error::ErrorKind as ClapErrorKind};
use serde_json::{Map, Value, json};
use std::error::Error as StdError;

mod catalog_paths;
mod command_dispatch;
mod serve;

use bookshelf::api::{Error, ErrorKind, ExportFormat, to_exit_code};
use catalog_paths::default_data_path;

const DEFAULT_BIND: &str = "127.0.0.1:9800";
const DEFAULT_MAX_BODY_BYTES: u64 = 64 * 1024;

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }
}

fn main() {
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err((err, color_mode)) => {
            emit_error(&err, color_mode);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, (Error, ColorMode)> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    (
                        Error::new(ErrorKind::Io)
                            .with_message("failed to write help")
                            .with_source(io_err),
                        ColorMode::Auto,
                    )
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome { exit_code });
            }
            _ => {
                return Err((
                    Error::new(ErrorKind::Usage)
                        .with_message(clap_error_summary(&err))
                        .with_hint("Run `bookshelf --help` for usage."),
                    ColorMode::Auto,
                ));
            }
        },
    };

    let data_path = cli.data.unwrap_or_else(default_data_path);
    let color_mode = cli.color;

    command_dispatch::dispatch_command(cli.command, data_path)
        .map_err(add_corrupt_hint)
        .map_err(|err| (err, color_mode))
}

#[derive(Parser)]
#[command(
    name = "bookshelf",
    version,
    about = "Book catalog manager with CSV/XML export",
    long_about = None,
    after_help = r#"EXAMPLES
  $ bookshelf book add --title "Dune" --author "Frank Herbert"
  $ bookshelf book list
  $ bookshelf export csv --column title
  $ bookshelf serve                     # http://127.0.0.1:9800
  $ curl 'http://127.0.0.1:9800/export/xml?columns[]=author'"#,
    arg_required_else_help = true
)]
struct Cli {
    #[arg(
        long,
        value_name = "PATH",
        help = "Catalog file (default: ~/.bookshelf/catalog.json)"
    )]
    data: Option<PathBuf>,
    #[arg(
        long,
        default_value = "auto",
        value_enum,
        help = "Colorize stderr diagnostics: auto|always|never"
    )]
    color: ColorMode,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ColorMode {
    Auto,
    Always,
    Never,
}

impl ColorMode {
    fn use_color(self, is_tty: bool) -> bool {
        match self {
            ColorMode::Auto => is_tty,
            ColorMode::Always => true,
            ColorMode::Never => false,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ExportFormatCli {
    Csv,
    Xml,
}

impl From<ExportFormatCli> for ExportFormat {
    fn from(value: ExportFormatCli) -> Self {
        match value {
            ExportFormatCli::Csv => ExportFormat::Csv,
            ExportFormatCli::Xml => ExportFormat::Xml,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Serve the catalog over HTTP (loopback by default)")]
    Serve(ServeRunArgs),
    #[command(about = "Create, list, edit, and delete books")]
    Book {
        #[command(subcommand)]
        command: BookCommand,
    },
    #[command(
        about = "Export the catalog as CSV or XML",
        after_help = r#"EXAMPLES
  $ bookshelf export csv
  $ bookshelf export csv --column author --column title
  $ bookshelf export xml --output books.xml"#
    )]
    Export {
        #[arg(value_enum, help = "Output format: csv|xml")]
        format: ExportFormatCli,
        #[arg(
            long = "column",
            value_name = "NAME",
            help = "Column to include, in order (repeatable; default: title, author)"
        )]
        columns: Vec<String>,
        #[arg(long, value_name = "PATH", help = "Write to a file instead of stdout")]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum BookCommand {
    #[command(about = "Add a book")]
    Add(BookFieldsArgs),
    #[command(about = "List all books in insertion order")]
    List,
    #[command(about = "Show one book")]
    Get { id: u64 },
    #[command(about = "Replace a book's title and author")]
    Edit {
        id: u64,
        #[command(flatten)]
        fields: BookFieldsArgs,
    },
    #[command(about = "Delete a book")]
    Delete { id: u64 },
}

#[derive(Args)]
struct BookFieldsArgs {
    #[arg(long, help = "Book title (1-255 characters)")]
    title: Option<String>,
    #[arg(long, help = "Book author (1-255 characters)")]
    author: Option<String>,
}

#[derive(Args)]
struct ServeRunArgs {
    #[arg(
        long,
        default_value = DEFAULT_BIND,
        help = "Bind address",
        help_heading = "Connection"
    )]
    bind: String,
    #[arg(
        long,
        help = "Keep the catalog in memory instead of --data",
        help_heading = "Storage"
    )]
    memory: bool,
    #[arg(
        long,
        help = "Allow non-loopback binds (there is no authentication)",
        help_heading = "Safety"
    )]
    allow_non_loopback: bool,
    #[arg(
        long,
        default_value_t = DEFAULT_MAX_BODY_BYTES,
        help = "Max request body size in bytes",
        help_heading = "Safety"
    )]
    max_body_bytes: u64,
}

fn clap_error_summary(err: &clap::Error) -> String {
    let rendered = err.render().to_string();
    rendered
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(|line| line.trim_start_matches("error: ").to_string())
        .unwrap_or_else(|| "invalid arguments".to_string())
}

fn add_corrupt_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Corrupt || err.hint().is_some() {
        return err;
    }
    err.with_hint("The catalog file could not be parsed; restore it or pass a different --data.")
}

fn emit_json(value: Value) {
    let json = if io::stdout().is_terminal() {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    }
    .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string());
    println!("{json}");
}

fn emit_error(err: &Error, color_mode: ColorMode) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        eprintln!("{}", error_text(err, color_mode.use_color(is_tty)));
        return;
    }

    let value = error_json(err);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::Validation => "invalid input".to_string(),
        ErrorKind::NotFound => "not found".to_string(),
        ErrorKind::Busy => "resource is busy".to_string(),
        ErrorKind::Permission => "permission denied".to_string(),
        ErrorKind::Corrupt => "corrupt data".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
        ErrorKind::Encoding => "export encoding failed".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    if let Some(id) = err.id() {
        inner.insert("id".to_string(), json!(id));
    }
    if !err.fields().is_empty() {
        inner.insert("fields".to_string(), json!(err.fields()));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn colorize_label(label: &str, enabled: bool, code: &str) -> String {
    if !enabled {
        return label.to_string();
    }
    format!("\u{1b}[{code}m{label}\u{1b}[0m")
}

fn error_text(err: &Error, use_color: bool) -> String {
    const RED: &str = "31";
    const YELLOW: &str = "33";

    let mut lines = vec![format!(
        "{} {}",
        colorize_label("error:", use_color, RED),
        error_message(err)
    )];
    for (field, messages) in err.fields() {
        for message in messages {
            lines.push(format!(
                "{} {message}",
                colorize_label(&format!("{field}:"), use_color, YELLOW)
            ));
        }
    }
    if let Some(hint) = err.hint() {
        lines.push(format!("{} {hint}", colorize_label("hint:", use_color, YELLOW)));
    }
    if let Some(path) = err.path() {
        lines.push(format!(
            "{} {}",
            colorize_label("path:", use_color, YELLOW),
            path.display()
        ));
    }
    if let Some(id) = err.id() {
        lines.push(format!("{} {id}", colorize_label("id:", use_color, YELLOW)));
    }
    lines.join("\n")
}
