use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use page_pilot::{Agent, AgentEvent, BrowserSession, EventSink, PilotError};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;

type SharedAgent = Arc<Mutex<Agent<BrowserSession>>>;

#[derive(Clone)]
struct AppState {
    agent: SharedAgent,
    events: EventSink,
}

#[derive(Deserialize)]
struct InstructionPayload {
    instruction: String,
}

struct ApiError(PilotError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": self.0 })),
        )
            .into_response()
    }
}

impl From<PilotError> for ApiError {
    fn from(e: PilotError) -> Self {
        Self(e)
    }
}

/// Serves the control page on the first free port from `port`.
pub async fn serve(agent: SharedAgent, events: EventSink, port: u16) -> Result<SocketAddr> {
    let state = AppState { agent, events };

    let app = Router::new()
        .route("/", get(index_handler))
        .route("/act", post(act_handler))
        .route("/observe", post(observe_handler))
        .route("/extract", post(extract_handler))
        .route("/refresh", post(refresh_handler))
        .route("/show", post(show_handler))
        .route("/cleanup", post(cleanup_handler))
        .route("/events", get(sse_handler))
        .route("/favicon.ico", get(|| async { StatusCode::NO_CONTENT }))
        .with_state(state);

    let mut listener = None;
    for candidate in port..port.saturating_add(10) {
        if let Ok(l) = tokio::net::TcpListener::bind(("127.0.0.1", candidate)).await {
            listener = Some(l);
            break;
        }
    }
    let listener = listener.ok_or_else(|| anyhow!("no free port in {port}..{}", port.saturating_add(10)))?;
    let addr = listener.local_addr()?;

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "control page server stopped");
        }
    });
    Ok(addr)
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// Starts a task in the background; progress arrives over `/events`.
async fn act_handler(State(state): State<AppState>, Json(payload): Json<InstructionPayload>) -> StatusCode {
    tracing::info!(instruction = %payload.instruction, "task requested");
    let agent = state.agent.clone();
    let events = state.events.clone();
    tokio::spawn(async move {
        let outcome = agent.lock().await.run_task(&payload.instruction).await;
        events.emit(AgentEvent::info(format!("task finished after {} steps", outcome.steps)));
    });
    StatusCode::ACCEPTED
}

async fn observe_handler(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let observations = state.agent.lock().await.observe().await?;
    Ok(Json(json!({ "observations": observations })))
}

async fn extract_handler(
    State(state): State<AppState>,
    Json(payload): Json<InstructionPayload>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let extraction = state.agent.lock().await.extract(&payload.instruction).await?;
    Ok(Json(json!({ "data": extraction.data, "confidence": extraction.confidence })))
}

async fn refresh_handler(State(state): State<AppState>) -> Result<Json<AgentEvent>, ApiError> {
    Ok(Json(state.agent.lock().await.refresh_state().await?))
}

async fn show_handler(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.agent.lock().await.show().await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn cleanup_handler(State(state): State<AppState>) -> StatusCode {
    state.agent.lock().await.cleanup();
    StatusCode::NO_CONTENT
}

async fn sse_handler(
    State(state): State<AppState>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(state.events.subscribe()).filter_map(|result| {
        let event = result.ok()?;
        let data = serde_json::to_string(&event).ok()?;
        Some(Ok::<_, Infallible>(Event::default().event(event.name()).data(data)))
    });
    Sse::new(stream)
}

const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<title>Page Pilot</title>
<style>
  body { background: #0b0d12; color: #ddd; font: 14px system-ui, sans-serif; margin: 0; display: flex; height: 100vh; }
  #side { width: 420px; display: flex; flex-direction: column; padding: 16px; gap: 8px; border-right: 1px solid #222; }
  #log { flex: 1; overflow-y: auto; display: flex; flex-direction: column; gap: 6px; }
  .entry { padding: 8px 10px; border-radius: 6px; background: #14161d; border-left: 3px solid #3b82f6; }
  .entry.success { border-color: #22c55e; }
  .entry.error { border-color: #ef4444; color: #fca5a5; }
  #view { flex: 1; padding: 16px; }
  #view img { max-width: 100%; border: 1px solid #222; }
  input, button { font: inherit; padding: 8px; border-radius: 6px; border: 1px solid #333; background: #14161d; color: #fff; }
  .row { display: flex; gap: 6px; }
  .row input { flex: 1; }
</style>
</head>
<body>
  <div id="side">
    <div id="log"></div>
    <div class="row"><input id="cmd" placeholder="Tell the agent what to do..." autofocus /><button onclick="act()">Go</button></div>
    <div class="row">
      <button onclick="post('/observe').then(r => show((r.observations || []).join(' | ')))">Observe</button>
      <button onclick="extract()">Extract</button>
      <button onclick="post('/refresh')">Refresh</button>
      <button onclick="post('/show')">Show</button>
      <button onclick="post('/cleanup')">Close</button>
    </div>
  </div>
  <div id="view"><div id="where"></div><img id="shot" /></div>
<script>
  const log = document.getElementById('log');
  const cmd = document.getElementById('cmd');
  const esc = (s) => String(s).replace(/</g, '&lt;');

  function show(message, severity) {
    const div = document.createElement('div');
    div.className = 'entry ' + (severity || 'info');
    div.innerHTML = esc(message);
    log.appendChild(div);
    log.scrollTop = log.scrollHeight;
  }

  async function post(path, body) {
    const res = await fetch(path, {
      method: 'POST',
      headers: { 'Content-Type': 'application/json' },
      body: JSON.stringify(body || {}),
    });
    if (res.status === 204 || res.status === 202) return {};
    const data = await res.json();
    if (data.error) show(data.error, 'error');
    return data;
  }

  function act() {
    const instruction = cmd.value.trim();
    if (!instruction) return;
    cmd.value = '';
    show('You: ' + instruction);
    post('/act', { instruction });
  }

  async function extract() {
    const instruction = cmd.value.trim();
    if (!instruction) return;
    const r = await post('/extract', { instruction });
    if (!r.error) show(JSON.stringify(r.data), 'success');
  }

  cmd.addEventListener('keydown', (e) => { if (e.key === 'Enter') act(); });

  const es = new EventSource('/events');
  es.addEventListener('status', (e) => {
    const d = JSON.parse(e.data);
    show(d.message, d.severity);
  });
  es.addEventListener('state', (e) => {
    const d = JSON.parse(e.data);
    document.getElementById('where').textContent = d.title + ' - ' + d.url + ' (' + d.pagesCount + ' pages)';
    if (d.screenshot) document.getElementById('shot').src = 'data:image/jpeg;base64,' + d.screenshot;
  });
</script>
</body>
</html>
"##;
