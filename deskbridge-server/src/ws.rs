//! WebSocket endpoints: structured sessions at `/ws` and raw RFB
//! passthrough at `/vnc/{id}/websocket`.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::response::Response;
use futures::{Sink, SinkExt, Stream, StreamExt, future};
use serde::Deserialize;
use tracing::{debug, info};

use deskbridge_core::{ClientFrame, RelayMode, ServerFrame};

use crate::app::AppState;

#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

pub async fn structured(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| relay(state, RelayMode::Structured, Some(session_id), socket))
}

/// `/ws?sessionId=…`; a missing parameter is reported over the socket.
pub async fn structured_query(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| relay(state, RelayMode::Structured, query.session_id, socket))
}

pub async fn raw(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| relay(state, RelayMode::Raw, Some(session_id), socket))
}

async fn relay(state: AppState, mode: RelayMode, session_id: Option<String>, socket: WebSocket) {
    let (sink, stream) = socket.split();
    let cancel = state.cancel.child_token();
    let report = state
        .bridge
        .serve(
            mode,
            session_id.as_deref(),
            inbound(stream),
            outbound(sink),
            &cancel,
        )
        .await;

    match &report.error {
        Some(e) => info!(
            session_id = report.session_id.as_deref().unwrap_or("-"),
            kind = %e.kind(),
            "websocket session ended with error"
        ),
        None => debug!(
            session_id = report.session_id.as_deref().unwrap_or("-"),
            phases = ?report.phases.names(),
            "websocket session ended"
        ),
    }
}

// ── Frame adapters ───────────────────────────────────────────────

/// WebSocket messages as client frames. Ping/pong are handled by axum;
/// a read error ends the stream like a close.
fn inbound<S>(stream: S) -> impl Stream<Item = ClientFrame> + Unpin + Send
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin + Send,
{
    stream.filter_map(|msg| {
        future::ready(match msg {
            Ok(Message::Text(text)) => Some(ClientFrame::Text(text.as_str().to_owned())),
            Ok(Message::Binary(bytes)) => Some(ClientFrame::Binary(bytes)),
            Ok(Message::Close(_)) => Some(ClientFrame::Close),
            Ok(Message::Ping(_) | Message::Pong(_)) => None,
            Err(e) => {
                debug!("websocket read error: {e}");
                Some(ClientFrame::Close)
            }
        })
    })
}

fn outbound<S>(sink: S) -> impl Sink<ServerFrame, Error = axum::Error> + Unpin + Send + 'static
where
    S: Sink<Message, Error = axum::Error> + Unpin + Send + 'static,
{
    sink.with(|frame: ServerFrame| {
        future::ready(Ok::<_, axum::Error>(match frame {
            ServerFrame::Text(text) => Message::Text(text.into()),
            ServerFrame::Binary(bytes) => Message::Binary(bytes),
            ServerFrame::Close => Message::Close(None),
        }))
    })
}
