use crate::gateway::Gateway;
use crate::router::{ClientConnection, ResultRouter};
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use bytes::Bytes;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt, future};
use serde::Deserialize;
use sitemapper_core::{Response, Status};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub gateway: Gateway,
    pub router: ResultRouter,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/crawl", get(crawl_handler))
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct CrawlQuery {
    #[serde(default)]
    url: String,
}

async fn crawl_handler(
    State(state): State<AppState>,
    Query(query): Query<CrawlQuery>,
) -> (StatusCode, Json<Response>) {
    // the publish keeps running after the response is sent
    let (response, _outcome) = state.gateway.crawl(&query.url).await;
    let code = match response.status {
        Status::Ok => StatusCode::OK,
        Status::Accepted => StatusCode::ACCEPTED,
        Status::Error => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (code, Json(response))
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.router))
}

async fn handle_socket(socket: WebSocket, router: ResultRouter) {
    let (sink, stream) = socket.split();
    let conn: Arc<dyn ClientConnection> = Arc::new(WsConnection {
        sink: Mutex::new(sink),
    });

    let inbound = stream
        .take_while(|message| {
            future::ready(matches!(message, Ok(msg) if !matches!(msg, Message::Close(_))))
        })
        .filter_map(|message| {
            future::ready(match message {
                Ok(Message::Text(text)) => Some(Bytes::from(text)),
                Ok(Message::Binary(data)) => Some(Bytes::from(data)),
                _ => None,
            })
        });

    router.register_connection(conn, inbound).await;
}

struct WsConnection {
    sink: Mutex<SplitSink<WebSocket, Message>>,
}

#[async_trait]
impl ClientConnection for WsConnection {
    async fn send(&self, payload: Bytes) -> anyhow::Result<()> {
        let message = match String::from_utf8(payload.to_vec()) {
            Ok(text) => Message::Text(text),
            Err(e) => Message::Binary(e.into_bytes()),
        };
        self.sink.lock().await.send(message).await?;
        Ok(())
    }

    async fn close(&self) {
        let _ = self.sink.lock().await.close().await;
    }
}
