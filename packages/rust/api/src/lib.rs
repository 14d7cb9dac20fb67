//! HTTP surface: document submission and progress polling.
//!
//! Routes:
//! - `GET /` upload page
//! - `GET /health` liveness probe
//! - `POST /upload` multipart field `file`, answers `202 {"task_id"}`
//! - `GET /progress/:task_id` `{status, percent}`, plus `results` once finished

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tracing::{info, warn};

use exposecast_core::TaskRunner;
use exposecast_document::allowed_file;
use exposecast_shared::{ExposecastError, Progress, Result, ServerConfig, TaskId, TaskResult};

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Serialize)]
struct UploadResponse {
    task_id: String,
}

#[derive(Debug, Serialize)]
struct ProgressResponse {
    status: String,
    percent: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    results: Option<TaskResult>,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the application router around `runner`.
///
/// Request bodies above `max_upload_bytes` are refused with 413.
pub fn router(runner: Arc<TaskRunner>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(upload_page))
        .route("/health", get(|| async { "ok" }))
        .route("/upload", post(upload))
        .route("/progress/:task_id", get(progress))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(runner)
}

/// Bind `config.bind` and serve until Ctrl-C.
pub async fn serve(config: &ServerConfig, runner: Arc<TaskRunner>) -> Result<()> {
    let addr: SocketAddr = config.bind.parse().map_err(|e| {
        ExposecastError::config(format!("[server] bind '{}' is invalid: {e}", config.bind))
    })?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ExposecastError::Network(format!("failed to bind {addr}: {e}")))?;

    let app = router(runner, config.max_upload_mb * 1024 * 1024);
    info!(%addr, "exposecast listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ExposecastError::Network(format!("server error: {e}")))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn upload_page() -> Html<&'static str> {
    Html(UPLOAD_PAGE_HTML)
}

async fn upload(State(runner): State<Arc<TaskRunner>>, mut multipart: Multipart) -> Response {
    let mut upload: Option<(String, Vec<u8>)> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "failed to read multipart body");
                return error_response(e.status(), e.body_text());
            }
        };

        if field.name() != Some("file") {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        match field.bytes().await {
            Ok(bytes) => upload = Some((filename, bytes.to_vec())),
            Err(e) => {
                warn!(error = %e, "failed to read upload bytes");
                return error_response(e.status(), e.body_text());
            }
        }
    }

    let Some((filename, bytes)) = upload.filter(|(name, _)| !name.is_empty()) else {
        return error_response(StatusCode::BAD_REQUEST, "No file selected");
    };

    if !allowed_file(&filename) {
        return error_response(StatusCode::BAD_REQUEST, "Invalid file type");
    }

    match runner.submit(bytes) {
        Ok(task_id) => {
            info!(%task_id, %filename, "upload accepted");
            (
                StatusCode::ACCEPTED,
                Json(UploadResponse {
                    task_id: task_id.to_string(),
                }),
            )
                .into_response()
        }
        Err(ExposecastError::Overloaded { .. }) => error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "Server is busy, please try again later",
        ),
        Err(e) => {
            warn!(error = %e, "submission failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn progress(
    State(runner): State<Arc<TaskRunner>>,
    Path(task_id): Path<String>,
) -> Json<ProgressResponse> {
    let snapshot = task_id
        .parse::<TaskId>()
        .ok()
        .and_then(|id| runner.store().snapshot(&id));

    let Some(snapshot) = snapshot else {
        let Progress { status, percent } = Progress::not_found();
        return Json(ProgressResponse {
            status,
            percent,
            results: None,
        });
    };

    let finished = snapshot.progress.is_terminal();
    Json(ProgressResponse {
        status: snapshot.progress.status,
        percent: snapshot.progress.percent,
        results: finished.then_some(snapshot.result),
    })
}

// ---------------------------------------------------------------------------
// Upload page
// ---------------------------------------------------------------------------

const UPLOAD_PAGE_HTML: &str = r#"<!DOCTYPE html>
<html lang="de">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>exposecast</title>
<style>
  body { font-family: system-ui, sans-serif; max-width: 44rem; margin: 3rem auto; padding: 0 1rem; }
  progress { width: 100%; }
  pre { background: #f4f4f4; padding: 1rem; overflow-x: auto; }
</style>
</head>
<body>
<h1>Exposé hochladen</h1>
<form id="upload">
  <input type="file" name="file" accept=".pdf" required>
  <button type="submit">Analysieren</button>
</form>
<p id="status"></p>
<progress id="bar" max="100" value="0"></progress>
<div id="email"></div>
<pre id="results"></pre>
<script>
const form = document.getElementById('upload');
const statusLine = document.getElementById('status');
const bar = document.getElementById('bar');

form.addEventListener('submit', async (event) => {
  event.preventDefault();
  const response = await fetch('/upload', { method: 'POST', body: new FormData(form) });
  const body = await response.json();
  if (!response.ok) { statusLine.textContent = body.error; return; }
  poll(body.task_id);
});

async function poll(taskId) {
  const response = await fetch('/progress/' + taskId);
  const body = await response.json();
  statusLine.textContent = body.status;
  bar.value = body.percent;
  if (body.percent < 100) { setTimeout(() => poll(taskId), 1000); return; }
  if (body.results) {
    document.getElementById('email').innerHTML = body.results.email;
    document.getElementById('results').textContent = JSON.stringify(body.results, null, 2);
  }
}
</script>
</body>
</html>
"#;
