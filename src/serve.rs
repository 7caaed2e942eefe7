//! Purpose: Provide the HTTP server for the book catalog.
//! Exports: `ServeConfig`, `serve`, `router`.
//! Role: Axum-based server exposing book CRUD and the CSV/XML export endpoints.
//! Invariants: Error envelopes are `{"error":{"kind","message",...}}`; kinds remain stable.
//! Invariants: Loopback-only unless explicitly allowed; there is no auth layer.
//! Notes: CSV export streams row chunks from a blocking task; XML is built whole.

use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Path as AxumPath, RawQuery, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use bytes::Bytes;
use serde::Serialize;
use serde_json::json;
use std::future::IntoFuture;
use std::io::{self, Write};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Duration;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use bookshelf::api::{
    BookDraft, BookId, BookStore, CsvEncoder, Error, ErrorKind, ExportFormat, FieldMessages,
    FileStore, MemoryStore, columns_from_query, resolve_columns, to_xml_bytes,
};

#[derive(Clone, Debug)]
pub struct ServeConfig {
    pub bind: SocketAddr,
    /// Catalog file; `None` keeps the catalog in memory for this run.
    pub data: Option<PathBuf>,
    pub allow_non_loopback: bool,
    pub max_body_bytes: u64,
}

#[derive(Clone)]
struct AppState {
    store: Arc<dyn BookStore>,
}

pub async fn serve(config: ServeConfig) -> Result<(), Error> {
    validate_config(&config)?;

    init_tracing();

    let max_body_bytes: usize = config
        .max_body_bytes
        .try_into()
        .map_err(|_| Error::new(ErrorKind::Usage).with_message("--max-body-bytes is too large"))?;

    let store: Arc<dyn BookStore> = match &config.data {
        Some(path) => Arc::new(FileStore::open(path)?),
        None => Arc::new(MemoryStore::new()),
    };
    let app = router(store, max_body_bytes);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to bind server")
                .with_source(err)
        })?;
    match &config.data {
        Some(path) => tracing::info!(bind = %config.bind, data = %path.display(), "serving catalog"),
        None => tracing::info!(bind = %config.bind, "serving in-memory catalog"),
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        })
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => {
            result.map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("server failed")
                    .with_source(err)
            })?;
        }
        _ = shutdown_signal() => {
            let _ = shutdown_tx.send(());
            match tokio::time::timeout(Duration::from_secs(10), &mut server).await {
                Ok(result) => result.map_err(|err| {
                    Error::new(ErrorKind::Io)
                        .with_message("server failed")
                        .with_source(err)
                })?,
                Err(_) => {
                    return Err(Error::new(ErrorKind::Io).with_message("server shutdown timed out"));
                }
            }
        }
    };
    Ok(())
}

pub fn router(store: Arc<dyn BookStore>, max_body_bytes: usize) -> Router {
    let state = Arc::new(AppState { store });
    Router::new()
        .route("/healthz", get(healthz))
        .route("/", get(list_books))
        .route("/books", get(list_books).post(create_book))
        .route(
            "/books/:id",
            get(get_book)
                .put(update_book)
                .patch(update_book)
                .delete(delete_book),
        )
        .route("/export/csv", get(export_csv))
        .route("/export/xml", get(export_xml))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn is_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(addr) => addr.is_loopback(),
        IpAddr::V6(addr) => addr.is_loopback(),
    }
}

pub fn validate_config(config: &ServeConfig) -> Result<(), Error> {
    if !is_loopback(config.bind.ip()) && !config.allow_non_loopback {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("non-loopback bind requires explicit opt-in")
            .with_hint("Re-run with --allow-non-loopback or use a loopback address."));
    }

    if config.max_body_bytes == 0 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--max-body-bytes must be greater than zero")
            .with_hint("Use a positive value like 65536."));
    }

    if config.max_body_bytes > usize::MAX as u64 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--max-body-bytes exceeds platform limits")
            .with_hint("Use a smaller value that fits in memory."));
    }

    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(unix)]
    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    #[cfg(not(unix))]
    ctrl_c.await;
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    kind: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<BookId>,
    #[serde(skip_serializing_if = "FieldMessages::is_empty")]
    fields: FieldMessages,
}

async fn healthz() -> Response {
    json_response(StatusCode::OK, json!({ "ok": true }))
}

async fn list_books(State(state): State<Arc<AppState>>) -> Response {
    match state.store.list_all() {
        Ok(books) => json_response(StatusCode::OK, json!({ "books": books })),
        Err(err) => error_response(err),
    }
}

async fn create_book(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let result = draft_from_body(&headers, &body).and_then(|draft| state.store.create(&draft));
    match result {
        Ok(book) => {
            tracing::info!(id = book.id, "book created");
            json_response(StatusCode::CREATED, json!({ "book": book }))
        }
        Err(err) => error_response(err),
    }
}

async fn get_book(State(state): State<Arc<AppState>>, AxumPath(id): AxumPath<String>) -> Response {
    match parse_id(&id).and_then(|id| state.store.get(id)) {
        Ok(book) => json_response(StatusCode::OK, json!({ "book": book })),
        Err(err) => error_response(err),
    }
}

async fn update_book(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let result = parse_id(&id).and_then(|id| {
        let draft = draft_from_body(&headers, &body)?;
        state.store.update(id, &draft)
    });
    match result {
        Ok(book) => {
            tracing::info!(id = book.id, "book updated");
            json_response(StatusCode::OK, json!({ "book": book }))
        }
        Err(err) => error_response(err),
    }
}

async fn delete_book(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
) -> Response {
    let result = parse_id(&id).and_then(|id| state.store.delete(id).map(|()| id));
    match result {
        Ok(id) => {
            tracing::info!(id, "book deleted");
            json_response(StatusCode::OK, json!({ "ok": true }))
        }
        Err(err) => error_response(err),
    }
}

async fn export_csv(State(state): State<Arc<AppState>>, RawQuery(query): RawQuery) -> Response {
    let requested = columns_from_query(query.as_deref());
    let columns = match resolve_columns(requested.as_deref()) {
        Ok(columns) => columns,
        Err(err) => return error_response(err),
    };
    let books = match state.store.list_all() {
        Ok(books) => books,
        Err(err) => return error_response(err),
    };

    let (tx, rx) = mpsc::channel::<Result<Bytes, Error>>(16);
    let sink = ChannelSink::new(tx.clone());
    tokio::task::spawn_blocking(move || {
        let result = CsvEncoder::new(sink, &columns).and_then(|mut encoder| {
            for book in &books {
                encoder.write_book(book)?;
            }
            let rows = encoder.rows();
            encoder.finish()?;
            Ok(rows)
        });
        match result {
            Ok(rows) => tracing::debug!(rows, "csv export complete"),
            Err(_) if tx.is_closed() => tracing::debug!("csv export receiver closed"),
            Err(err) => {
                tracing::warn!(error = %err, "csv export failed mid-stream");
                let _ = tx.blocking_send(Err(err));
            }
        }
    });

    let stream = ReceiverStream::new(rx)
        .map(|result| result.map_err(|err| io::Error::other(err.to_string())));
    attachment_response(ExportFormat::Csv, Body::from_stream(stream))
}

async fn export_xml(State(state): State<Arc<AppState>>, RawQuery(query): RawQuery) -> Response {
    let requested = columns_from_query(query.as_deref());
    let result = resolve_columns(requested.as_deref()).and_then(|columns| {
        let books = state.store.list_all()?;
        to_xml_bytes(&books, &columns)
    });
    match result {
        Ok(bytes) => attachment_response(ExportFormat::Xml, Body::from(bytes)),
        Err(err) => error_response(err),
    }
}

/// `Write` adapter that forwards each flushed chunk to the response body.
///
/// Fails with `BrokenPipe` once the receiving body has been dropped, which
/// stops the encoder on client disconnect.
struct ChannelSink {
    tx: mpsc::Sender<Result<Bytes, Error>>,
    pending: Vec<u8>,
}

impl ChannelSink {
    fn new(tx: mpsc::Sender<Result<Bytes, Error>>) -> Self {
        Self {
            tx,
            pending: Vec::new(),
        }
    }
}

impl Write for ChannelSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let chunk = Bytes::from(std::mem::take(&mut self.pending));
        self.tx
            .blocking_send(Ok(chunk))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "export receiver closed"))
    }
}

fn draft_from_body(headers: &HeaderMap, body: &[u8]) -> Result<BookDraft, Error> {
    let is_form = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/x-www-form-urlencoded"));
    if is_form {
        let mut draft = BookDraft::default();
        for (key, value) in url::form_urlencoded::parse(body) {
            let value = Some(serde_json::Value::String(value.into_owned()));
            match key.as_ref() {
                "title" => draft.title = value,
                "author" => draft.author = value,
                _ => {}
            }
        }
        return Ok(draft);
    }
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(BookDraft::default());
    }
    let mut object: serde_json::Map<String, serde_json::Value> = serde_json::from_slice(body)
        .map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message("request body must be a JSON object")
                .with_hint("Send {\"title\": \"...\", \"author\": \"...\"}.")
                .with_source(err)
        })?;
    Ok(BookDraft {
        title: object.remove("title"),
        author: object.remove("author"),
    })
}

fn parse_id(raw: &str) -> Result<BookId, Error> {
    raw.parse::<BookId>().map_err(|_| {
        Error::new(ErrorKind::NotFound)
            .with_message("book not found")
            .with_hint("Book ids are positive integers.")
    })
}

fn attachment_response(format: ExportFormat, body: Body) -> Response {
    let mut response = Response::new(body);
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(format.media_type()));
    headers.insert(
        CONTENT_DISPOSITION,
        HeaderValue::from_static(format.content_disposition()),
    );
    response
}

fn json_response(status: StatusCode, payload: serde_json::Value) -> Response {
    (status, Json(payload)).into_response()
}

fn error_status(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Usage => StatusCode::BAD_REQUEST,
        ErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Busy => StatusCode::LOCKED,
        ErrorKind::Permission
        | ErrorKind::Corrupt
        | ErrorKind::Io
        | ErrorKind::Encoding
        | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: Error) -> Response {
    let status = error_status(err.kind());
    if status.is_server_error() {
        tracing::error!(error = %err, "request failed");
    }
    let body = ErrorEnvelope {
        error: ErrorBody {
            kind: format!("{:?}", err.kind()),
            message: err.message().unwrap_or("error").to_string(),
            hint: err.hint().map(str::to_string),
            id: err.id(),
            fields: err.fields().clone(),
        },
    };
    (status, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::{ServeConfig, error_status, router, serve, validate_config};
    use axum::Router;
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode, header};
    use axum::response::Response;
    use bookshelf::api::{BookDraft, BookStore, ErrorKind, MemoryStore};
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tower_service::Service;

    fn config(bind: &str) -> ServeConfig {
        ServeConfig {
            bind: bind.parse().expect("bind"),
            data: None,
            allow_non_loopback: false,
            max_body_bytes: 64 * 1024,
        }
    }

    fn app_with(books: &[(&str, &str)]) -> (Router, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        for (title, author) in books {
            store
                .create(&BookDraft::new(*title, *author))
                .expect("seed");
        }
        (router(store.clone(), 64 * 1024), store)
    }

    async fn send(app: &mut Router, method: Method, uri: &str, body: Option<Value>) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        let request = builder.body(body).expect("request");
        app.call(request).await.expect("infallible")
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        String::from_utf8(bytes.to_vec()).expect("utf8")
    }

    async fn body_json(response: Response) -> Value {
        serde_json::from_str(&body_text(response).await).expect("json")
    }

    fn header_value<'a>(response: &'a Response, name: header::HeaderName) -> &'a str {
        response
            .headers()
            .get(name)
            .and_then(|value| value.to_str().ok())
            .expect("header")
    }

    #[tokio::test]
    async fn serve_rejects_non_loopback_bind() {
        let err = serve(config("0.0.0.0:0")).await.expect_err("expected usage error");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn non_loopback_bind_allowed_with_flag() {
        let mut config = config("0.0.0.0:0");
        config.allow_non_loopback = true;
        validate_config(&config).expect("config ok");
    }

    #[test]
    fn body_limit_must_be_positive() {
        let mut config = config("127.0.0.1:0");
        config.max_body_bytes = 0;
        let err = validate_config(&config).expect_err("expected usage error");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn error_kinds_map_to_statuses() {
        assert_eq!(error_status(ErrorKind::Validation), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(error_status(ErrorKind::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(error_status(ErrorKind::Usage), StatusCode::BAD_REQUEST);
        assert_eq!(error_status(ErrorKind::Encoding), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn csv_export_defaults_to_title_and_author() {
        let (mut app, _store) = app_with(&[("Dune", "Frank Herbert"), ("A, B", "X")]);
        let response = send(&mut app, Method::GET, "/export/csv", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header_value(&response, header::CONTENT_TYPE), "text/csv");
        assert_eq!(
            header_value(&response, header::CONTENT_DISPOSITION),
            "attachment; filename=\"books.csv\""
        );
        let body = body_text(response).await;
        assert!(body.starts_with("title,author\n"));
        assert!(body.contains("Dune,Frank Herbert\n"));
        assert!(body.contains("\"A, B\",X\n"));
    }

    #[tokio::test]
    async fn csv_export_honors_selected_columns() {
        let (mut app, _store) = app_with(&[("Dune", "Frank Herbert")]);
        let response = send(&mut app, Method::GET, "/export/csv?columns[]=author", None).await;
        assert_eq!(body_text(response).await, "author\nFrank Herbert\n");

        let response = send(
            &mut app,
            Method::GET,
            "/export/csv?columns%5B%5D=author&columns%5B%5D=title",
            None,
        )
        .await;
        assert_eq!(body_text(response).await, "author,title\nFrank Herbert,Dune\n");
    }

    #[tokio::test]
    async fn unknown_export_column_is_unprocessable() {
        let (mut app, _store) = app_with(&[("Dune", "Frank Herbert")]);
        for uri in ["/export/csv?columns[]=isbn", "/export/xml?columns[]=id"] {
            let response = send(&mut app, Method::GET, uri, None).await;
            assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
            let body = body_json(response).await;
            assert_eq!(body["error"]["kind"], "Validation");
            assert!(body["error"]["fields"]["columns"].is_array());
        }
    }

    #[tokio::test]
    async fn xml_export_escapes_and_sets_headers() {
        let (mut app, _store) = app_with(&[("<Tom>", "M & T")]);
        let response = send(&mut app, Method::GET, "/export/xml", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header_value(&response, header::CONTENT_TYPE), "application/xml");
        assert_eq!(
            header_value(&response, header::CONTENT_DISPOSITION),
            "attachment; filename=\"books.xml\""
        );
        let body = body_text(response).await;
        assert!(body.contains("<title>&lt;Tom&gt;</title>"));
        assert!(body.contains("<author>M &amp; T</author>"));

        let response = send(&mut app, Method::GET, "/export/xml?columns[]=title", None).await;
        let body = body_text(response).await;
        assert!(body.contains("<title>&lt;Tom&gt;</title>"));
        assert!(!body.contains("<author>"));
    }

    #[tokio::test]
    async fn crud_round_trip() {
        let (mut app, store) = app_with(&[]);

        let response = send(
            &mut app,
            Method::POST,
            "/books",
            Some(json!({ "title": "Adventures of Tom Sawyer", "author": "Mark Twain" })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = body_json(response).await;
        let id = created["book"]["id"].as_u64().expect("id");

        let response = send(&mut app, Method::GET, &format!("/books/{id}"), None).await;
        assert_eq!(body_json(response).await["book"]["title"], "Adventures of Tom Sawyer");

        let response = send(
            &mut app,
            Method::PUT,
            &format!("/books/{id}"),
            Some(json!({ "title": "Updated Title", "author": "Updated Author" })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(store.get(id).expect("get").author, "Updated Author");

        let response = send(&mut app, Method::GET, "/books", None).await;
        let listed = body_json(response).await;
        assert_eq!(listed["books"].as_array().expect("books").len(), 1);

        let response = send(&mut app, Method::DELETE, &format!("/books/{id}"), None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(store.count().expect("count"), 0);
    }

    #[tokio::test]
    async fn create_with_missing_fields_reports_both() {
        let (mut app, store) = app_with(&[]);
        let response = send(&mut app, Method::POST, "/books", None).await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = body_json(response).await;
        assert!(body["error"]["fields"]["title"].is_array());
        assert!(body["error"]["fields"]["author"].is_array());
        assert_eq!(store.count().expect("count"), 0);
    }

    #[tokio::test]
    async fn form_bodies_are_accepted() {
        let (mut app, store) = app_with(&[]);
        let request = Request::builder()
            .method(Method::POST)
            .uri("/books")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("title=Emma&author=Jane+Austen"))
            .expect("request");
        let response = app.call(request).await.expect("infallible");
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(store.list_all().expect("list")[0].author, "Jane Austen");
    }

    #[tokio::test]
    async fn non_object_json_bodies_are_rejected() {
        let (mut app, store) = app_with(&[]);
        for body in [json!(["Dune", "Frank Herbert"]), json!("Dune"), json!(42)] {
            let response = send(&mut app, Method::POST, "/books", Some(body)).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            assert_eq!(body_json(response).await["error"]["kind"], "Usage");
        }
        assert_eq!(store.count().expect("count"), 0);
    }

    #[tokio::test]
    async fn patch_replaces_fields() {
        let (mut app, store) = app_with(&[("Dune", "Frank Herbert")]);
        let id = store.list_all().expect("list")[0].id;
        let response = send(
            &mut app,
            Method::PATCH,
            &format!("/books/{id}"),
            Some(json!({ "title": "Dune Messiah", "author": "Frank Herbert" })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["book"]["title"], "Dune Messiah");
        assert_eq!(store.get(id).expect("get").title, "Dune Messiah");

        let response = send(
            &mut app,
            Method::PATCH,
            &format!("/books/{id}"),
            Some(json!({ "title": "" })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(store.get(id).expect("get").title, "Dune Messiah");
    }

    #[tokio::test]
    async fn missing_books_are_not_found() {
        let (mut app, store) = app_with(&[("Only", "One")]);
        let response = send(&mut app, Method::DELETE, "/books/42", None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"]["id"], 42);
        assert_eq!(store.count().expect("count"), 1);

        let response = send(&mut app, Method::GET, "/books/not-a-number", None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
