use std::convert::Infallible;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};

use screen_guide::{AskMode, AskRequest, DisplayInfo, Inbound, InputEvent, ShellEvent};

use crate::hands::FrameStore;

const PORT_ATTEMPTS: u16 = 10;
// Full-resolution PNG frames of large monitors.
const FRAME_BODY_LIMIT: usize = 64 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub inbound: mpsc::Sender<Inbound>,
    pub shell: broadcast::Sender<ShellEvent>,
    pub frames: Arc<FrameStore>,
}

impl AppState {
    async fn forward(&self, message: Inbound) -> StatusCode {
        match self.inbound.send(message).await {
            Ok(()) => StatusCode::ACCEPTED,
            Err(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

#[derive(Deserialize)]
struct QuestionPayload {
    #[serde(default)]
    question: String,
    #[serde(default)]
    mode: Option<AskMode>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/events", get(sse_handler))
        .route("/question", post(question_handler))
        .route("/next", post(next_handler))
        .route("/complete", post(complete_handler))
        .route("/reset", post(reset_handler))
        .route("/input", post(input_handler))
        .route("/display", post(display_handler).delete(display_cleared_handler))
        .route("/frame", post(frame_handler))
        .route("/favicon.ico", get(|| async { StatusCode::NO_CONTENT }))
        .layer(DefaultBodyLimit::max(FRAME_BODY_LIMIT))
        .with_state(Arc::new(state))
}

/// Binds the first free port from `port` upward and serves in the background.
pub async fn start_server(port: u16, state: AppState) -> Result<u16> {
    let mut bound = None;
    for candidate in port..port.saturating_add(PORT_ATTEMPTS) {
        match tokio::net::TcpListener::bind(("127.0.0.1", candidate)).await {
            Ok(listener) => {
                bound = Some((listener, candidate));
                break;
            }
            Err(e) => debug!(port = candidate, error = %e, "port taken"),
        }
    }
    let (listener, port) = bound.ok_or_else(|| {
        anyhow!(
            "could not bind any port {port}-{}; stop the old agent first",
            port.saturating_add(PORT_ATTEMPTS - 1)
        )
    })?;

    info!("shell endpoint at http://localhost:{port}");

    let app = router(state);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            warn!(error = %e, "http server stopped");
        }
    });

    Ok(port)
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn question_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<QuestionPayload>,
) -> StatusCode {
    debug!(mode = ?payload.mode, "question from shell");
    let mut request = AskRequest::question(payload.question);
    request.mode = payload.mode;
    state.forward(Inbound::Ask(request)).await
}

async fn next_handler(State(state): State<Arc<AppState>>) -> StatusCode {
    state.forward(Inbound::Next).await
}

async fn complete_handler(State(state): State<Arc<AppState>>) -> StatusCode {
    state.forward(Inbound::TaskCompleted).await
}

async fn reset_handler(State(state): State<Arc<AppState>>) -> StatusCode {
    state.forward(Inbound::Reset).await
}

async fn input_handler(
    State(state): State<Arc<AppState>>,
    Json(event): Json<InputEvent>,
) -> StatusCode {
    state.forward(Inbound::Input(event)).await
}

async fn display_handler(
    State(state): State<Arc<AppState>>,
    Json(selected): Json<DisplayInfo>,
) -> StatusCode {
    info!(id = ?selected.id, scale = selected.scale_factor, "display selected");
    state.forward(Inbound::DisplaySelected(selected)).await
}

async fn display_cleared_handler(State(state): State<Arc<AppState>>) -> StatusCode {
    state.frames.clear();
    state.forward(Inbound::DisplayCleared).await
}

async fn frame_handler(State(state): State<Arc<AppState>>, body: Bytes) -> (StatusCode, String) {
    match state.frames.push_png(body.to_vec()) {
        Ok(frame) => (StatusCode::ACCEPTED, frame.id.to_string()),
        Err(e) => {
            warn!(error = %e, "rejected frame");
            (StatusCode::BAD_REQUEST, e.to_string())
        }
    }
}

async fn sse_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.shell.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(event) => match Event::default().event(event.name()).json_data(&event) {
            Ok(sse) => Some(Ok::<_, Infallible>(sse)),
            Err(e) => {
                warn!(error = %e, "could not encode shell event");
                None
            }
        },
        Err(e) => {
            warn!(error = %e, "shell stream lagged");
            None
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<title>Screen Guide</title>
<style>
  body { background: #0a0a0f; color: #e0e0e0; font-family: system-ui, sans-serif; margin: 0; }
  main { max-width: 720px; margin: 0 auto; padding: 24px; display: flex; flex-direction: column; gap: 12px; height: 100vh; box-sizing: border-box; }
  #log { flex: 1; overflow-y: auto; display: flex; flex-direction: column; gap: 6px; }
  .entry { padding: 8px 12px; border-radius: 6px; background: #111118; font-size: 14px; }
  .entry.user { border-left: 3px solid #6366f1; }
  .entry.assistant { border-left: 3px solid #3b82f6; }
  .entry.system { border-left: 3px solid #22c55e; color: #86efac; }
  #status { font-size: 13px; color: #888; }
  #status.error { color: #fca5a5; }
  #status.success { color: #86efac; }
  .row { display: flex; gap: 8px; }
  #question { flex: 1; background: #111118; border: 1px solid #222; border-radius: 6px; padding: 10px; color: #fff; }
  button { background: #6366f1; color: #fff; border: none; border-radius: 6px; padding: 10px 14px; cursor: pointer; }
  button:disabled { background: #333; }
</style>
</head>
<body>
<main>
  <div id="status">Idle</div>
  <div id="log"></div>
  <div class="row">
    <input id="question" placeholder="What do you want to do?" autofocus />
    <button id="ask">Ask</button>
  </div>
  <div class="row">
    <button data-post="/next">Next</button>
    <button data-mode="diff_method">Different method</button>
    <button data-mode="point">Point at it</button>
    <button data-post="/complete">Done</button>
  </div>
</main>
<script>
  const log = document.getElementById('log');
  const status = document.getElementById('status');
  const question = document.getElementById('question');
  const ask = document.getElementById('ask');

  function addEntry(role, text) {
    const div = document.createElement('div');
    div.className = 'entry ' + role;
    div.textContent = text;
    log.appendChild(div);
    log.scrollTop = log.scrollHeight;
  }

  function post(path, body) {
    return fetch(path, {
      method: 'POST',
      headers: { 'Content-Type': 'application/json' },
      body: JSON.stringify(body || {})
    });
  }

  function send(mode) {
    post('/question', { question: question.value, mode: mode || null });
    question.value = '';
  }

  ask.onclick = () => send();
  question.addEventListener('keydown', e => { if (e.key === 'Enter') send(); });
  document.querySelectorAll('[data-post]').forEach(b => b.onclick = () => post(b.dataset.post));
  document.querySelectorAll('[data-mode]').forEach(b => b.onclick = () => send(b.dataset.mode));

  const events = new EventSource('/events');
  events.addEventListener('chat', e => {
    const d = JSON.parse(e.data);
    addEntry(d.role, d.text);
  });
  events.addEventListener('status', e => {
    const d = JSON.parse(e.data);
    status.textContent = d.message;
    status.className = d.tone;
  });
  events.addEventListener('loading', e => {
    ask.disabled = JSON.parse(e.data).active;
  });
  events.addEventListener('task_complete', () => addEntry('system', 'Task completed.'));
</script>
</body>
</html>
"##;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn question_payload_accepts_missing_fields() {
        let payload: QuestionPayload = serde_json::from_str("{}").unwrap();
        assert!(payload.question.is_empty());
        assert!(payload.mode.is_none());

        let payload: QuestionPayload =
            serde_json::from_str(r#"{"question":"","mode":"diff_method"}"#).unwrap();
        assert_eq!(payload.mode, Some(AskMode::DifferentMethod));
    }

    #[tokio::test]
    async fn forwarding_fails_once_the_engine_is_gone() {
        let (inbound, rx) = mpsc::channel(1);
        let (shell, _) = broadcast::channel(4);
        let state = AppState {
            inbound,
            shell,
            frames: Arc::new(FrameStore::new()),
        };
        drop(rx);
        assert_eq!(state.forward(Inbound::Next).await, StatusCode::SERVICE_UNAVAILABLE);
    }
}
