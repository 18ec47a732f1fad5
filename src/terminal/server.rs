//! HTTP surface: the terminal WebSocket and a health probe.
//!
//! - `GET /ssh-terminal`: WebSocket upgrade. The caller presents a login token
//!   as `?token=` or `Authorization: Bearer <token>`. Unknown tokens get a
//!   401 and no upgrade. The token is checked before the upgrade request
//!   itself, so a bad token is always a 401 whatever the headers.
//! - `GET /health`: liveness plus the number of registered connections.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use poem::http::{StatusCode, header};
use poem::middleware::Tracing;
use poem::web::websocket::{Message, WebSocket, WebSocketStream};
use poem::web::{Data, Json, Query};
use poem::{Endpoint, EndpointExt, IntoResponse, Request, Response, Route, get, handler};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::gateway::SessionGateway;
use super::login::SessionAuthenticator;
use super::types::ServerEvent;

/// Shared state behind every route.
pub struct AppState {
    pub gateway: SessionGateway,
    pub authenticator: Arc<dyn SessionAuthenticator>,
    pub outbound_capacity: usize,
}

#[derive(Debug, Default, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Token from the query string, else from a bearer header.
fn presented_token(req: &Request, query: &TokenQuery) -> Option<String> {
    if let Some(token) = query.token.as_deref().map(str::trim)
        && !token.is_empty()
    {
        return Some(token.to_string());
    }

    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

fn authorize(authenticator: &dyn SessionAuthenticator, req: &Request, query: &TokenQuery) -> bool {
    presented_token(req, query).is_some_and(|token| authenticator.is_authenticated(&token))
}

#[handler]
async fn terminal(
    req: &Request,
    ws: poem::Result<WebSocket>,
    Query(query): Query<TokenQuery>,
    Data(state): Data<&Arc<AppState>>,
) -> Response {
    if !authorize(state.authenticator.as_ref(), req, &query) {
        warn!(
            "Unauthenticated terminal connection attempt from {}",
            req.remote_addr()
        );
        return Response::builder()
            .status(StatusCode::UNAUTHORIZED)
            .body("Authentication required");
    }

    let ws = match ws {
        Ok(ws) => ws,
        Err(e) => return e.into_response(),
    };

    let state = state.clone();
    ws.on_upgrade(move |socket| run_session(socket, state))
        .into_response()
}

/// Drive one socket until either side goes away.
async fn run_session(socket: WebSocketStream, state: Arc<AppState>) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerEvent>(state.outbound_capacity);

    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match event.to_json() {
                Ok(text) => text,
                Err(e) => {
                    warn!("Failed to encode outbound event: {}", e);
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let gateway = &state.gateway;
    let mut ctx = gateway.open_session(tx);
    gateway.on_open(&ctx).await;

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => gateway.handle_text(&mut ctx, &text).await,
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("WebSocket error on session {}: {}", ctx.id(), e);
                break;
            }
        }
    }

    gateway.on_close(&mut ctx).await;
    drop(ctx);
    writer.abort();
}

#[handler]
fn health(Data(state): Data<&Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "connections": state.gateway.registry().len(),
    }))
}

/// Build the routed application.
pub fn app(state: Arc<AppState>) -> impl Endpoint {
    Route::new()
        .at("/ssh-terminal", get(terminal))
        .at("/health", get(health))
        .data(state)
        .with(Tracing)
}
