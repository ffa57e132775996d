use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use browser_agent::{AgentEvent, Orchestrator, PoolError};
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Ports tried in order when the preferred one is taken.
const PORT_ATTEMPTS: u16 = 10;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

#[derive(Deserialize)]
struct TaskPayload {
    task: String,
}

#[derive(Serialize)]
struct TaskCreated {
    task_id: String,
}

fn to_sse_event(event: &AgentEvent) -> Option<Event> {
    Event::default().event(event.name()).json_data(event).ok()
}

/// Bind to `port`, or the next free one of the following nine, and serve
/// until `shutdown` fires. Returns the bound address.
pub async fn start_server(
    orchestrator: Arc<Orchestrator>,
    port: u16,
    shutdown: CancellationToken,
) -> Result<SocketAddr> {
    let state = AppState { orchestrator };
    let app = Router::new()
        .route("/", get(index_handler))
        .route("/tasks", post(submit_handler))
        .route("/events", get(sse_handler))
        .route("/metrics", get(metrics_handler))
        .route("/favicon.ico", get(|| async { StatusCode::NO_CONTENT }))
        .with_state(state);

    let mut listener = None;
    for p in port..port.saturating_add(PORT_ATTEMPTS) {
        match tokio::net::TcpListener::bind(("127.0.0.1", p)).await {
            Ok(l) => {
                listener = Some(l);
                break;
            }
            Err(e) => debug!(port = p, error = %e, "port unavailable"),
        }
    }
    let Some(listener) = listener else {
        anyhow::bail!("could not bind to any port {port}-{}", port.saturating_add(PORT_ATTEMPTS - 1));
    };
    let addr = listener.local_addr()?;
    info!(%addr, "web UI running at http://{addr}");

    tokio::spawn(async move {
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;
        if let Err(e) = served {
            error!(error = %e, "web server failed");
        }
    });

    Ok(addr)
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn submit_handler(State(state): State<AppState>, Json(payload): Json<TaskPayload>) -> Response {
    let text = payload.task.trim();
    if text.is_empty() {
        return (StatusCode::BAD_REQUEST, "task must not be empty").into_response();
    }
    match state.orchestrator.submit(text).await {
        Ok(task_id) => (StatusCode::ACCEPTED, Json(TaskCreated { task_id })).into_response(),
        Err(PoolError::PoolClosed) => (StatusCode::SERVICE_UNAVAILABLE, "agent is shutting down").into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.orchestrator.metrics())
}

async fn sse_handler(
    State(state): State<AppState>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.orchestrator.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(event) => to_sse_event(&event).map(Ok::<_, Infallible>),
        // A slow listener missed some events; keep streaming.
        Err(_) => None,
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>Browser Agent</title>
<style>
  * { margin: 0; padding: 0; box-sizing: border-box; }
  body {
    background: #0a0a0f;
    color: #e0e0e0;
    font-family: system-ui, -apple-system, sans-serif;
    height: 100vh;
    display: flex;
    flex-direction: column;
  }
  header { padding: 20px 32px; border-bottom: 1px solid #1a1a2e; display: flex; gap: 16px; align-items: baseline; }
  header h1 { font-size: 20px; color: #fff; }
  #metrics { font-size: 13px; color: #777; font-family: monospace; }
  .main { flex: 1; display: flex; flex-direction: column; max-width: 860px; width: 100%; margin: 0 auto; padding: 24px 32px; gap: 16px; overflow: hidden; }
  #log { flex: 1; overflow-y: auto; display: flex; flex-direction: column; gap: 6px; }
  .entry { padding: 8px 12px; border-radius: 6px; font-size: 13px; line-height: 1.5; background: #111118; border-left: 3px solid #3b82f6; }
  .entry .id { color: #6366f1; font-family: monospace; margin-right: 8px; }
  .entry.queued { border-color: #6366f1; }
  .entry.thinking { border-color: #f59e0b; color: #fcd34d; }
  .entry.error { border-color: #ef4444; color: #fca5a5; background: #1a0a0a; }
  .entry.done { border-color: #22c55e; color: #86efac; background: #0a1a0a; }
  .input-area { display: flex; gap: 8px; }
  #task { flex: 1; background: #111118; border: 1px solid #222; border-radius: 8px; padding: 12px 16px; color: #fff; font-size: 16px; outline: none; }
  #task:focus { border-color: #6366f1; }
  button { background: #6366f1; color: #fff; border: none; border-radius: 8px; padding: 12px 24px; font-size: 15px; cursor: pointer; }
  button:hover { background: #4f46e5; }
</style>
</head>
<body>
  <header><h1>Browser Agent</h1><span id="metrics"></span></header>
  <div class="main">
    <div id="log"></div>
    <div class="input-area">
      <input type="text" id="task" placeholder="Tell the agent what to do..." autofocus />
      <button onclick="send()">Queue</button>
    </div>
  </div>
<script>
  const log = document.getElementById('log');
  const input = document.getElementById('task');
  const esc = s => String(s).replace(/&/g, '&amp;').replace(/</g, '&lt;');
  const short = id => esc(id).slice(0, 8);

  function addEntry(cls, id, html) {
    const div = document.createElement('div');
    div.className = 'entry ' + cls;
    div.innerHTML = '<span class="id">' + short(id) + '</span>' + html;
    log.appendChild(div);
    log.scrollTop = log.scrollHeight;
  }

  async function send() {
    const text = input.value.trim();
    if (!text) return;
    input.value = '';
    const res = await fetch('/tasks', {
      method: 'POST',
      headers: {'Content-Type': 'application/json'},
      body: JSON.stringify({task: text}),
    });
    if (!res.ok) addEntry('error', '-', esc(await res.text()));
  }

  input.addEventListener('keydown', e => { if (e.key === 'Enter') send(); });

  async function refreshMetrics() {
    const m = await (await fetch('/metrics')).json();
    document.getElementById('metrics').textContent =
      'workers ' + m.workers_current + ' | queued ' + m.queued + ' | running ' + (m.dispatched - m.finished) + ' | finished ' + m.finished;
  }
  setInterval(refreshMetrics, 2000);
  refreshMetrics();

  const es = new EventSource('/events');
  const on = (name, fn) => es.addEventListener(name, e => fn(JSON.parse(e.data)));
  on('task_queued', d => addEntry('queued', d.task_id, '<strong>Queued:</strong> ' + esc(d.text)));
  on('task_started', d => addEntry('queued', d.task_id, 'Started on worker ' + d.worker));
  on('thinking', d => addEntry('thinking', d.task_id, 'Step ' + d.step + ': thinking...'));
  on('step', d => addEntry('step', d.task_id, 'Step ' + d.step + ': ' + esc(d.description)));
  on('step_error', d => addEntry('error', d.task_id, 'Step ' + d.step + ' failed: ' + esc(d.message)));
  on('task_finished', d => {
    const ok = d.outcome.kind === 'completed';
    const detail = d.outcome.detail ? ': ' + esc(d.outcome.detail) : '';
    addEntry(ok ? 'done' : 'error', d.task_id, '<strong>' + esc(d.outcome.kind) + '</strong>' + detail + ' after ' + d.steps + ' steps');
  });
</script>
</body>
</html>
"##;
