//! HTTP handlers for the proxy surface.

mod messages;
mod passthrough;
mod stats;

pub use messages::handle_messages;
pub use passthrough::handle_passthrough;
pub use stats::handle_stats;

use axum::extract::State;
use axum::response::{Html, IntoResponse, Json};
use serde_json::json;

use super::server::AppState;

const INLINE_DASHBOARD: &str = r#"<!doctype html>
<html>
<head><meta charset="utf-8"><title>cruise</title></head>
<body style="font-family: monospace; margin: 2rem">
<h1>cruise</h1>
<p>Quota-aware proxy is running. Live numbers: <a href="/stats">/stats</a></p>
<pre id="out">loading…</pre>
<script>
fetch('/stats')
  .then(r => r.json())
  .then(s => { document.getElementById('out').textContent = JSON.stringify(s, null, 2); })
  .catch(e => { document.getElementById('out').textContent = String(e); });
</script>
</body>
</html>
"#;

/// Serve the dashboard page, falling back to a minimal inline page when no
/// static asset is configured or readable.
pub async fn handle_index(State(state): State<AppState>) -> Html<String> {
    if let Some(dir) = &state.static_dir {
        match tokio::fs::read_to_string(dir.join("index.html")).await {
            Ok(page) => return Html(page),
            Err(err) => {
                tracing::debug!("Dashboard asset unavailable ({}), serving inline page", err);
            }
        }
    }
    Html(INLINE_DASHBOARD.to_string())
}

pub async fn handle_health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
