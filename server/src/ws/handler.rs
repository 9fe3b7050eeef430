use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use serde::Deserialize;

use crate::auth::jwt;
use crate::error::SessionError;
use crate::state::AppState;
use crate::ws::actor;

/// Query parameters for WebSocket connection.
/// A session token from a previous login resumes that identity.
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    #[serde(default)]
    pub token: Option<String>,
}

/// WebSocket close codes for token failures:
/// 4001 = token expired
/// 4002 = token invalid
const CLOSE_TOKEN_EXPIRED: u16 = 4001;
const CLOSE_TOKEN_INVALID: u16 = 4002;

/// GET /ws[?token=JWT]
/// WebSocket upgrade endpoint. Without a token the session starts
/// unauthenticated. On token failure, upgrades then immediately closes with
/// the appropriate close code.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(token) = params.token else {
        return ws.on_upgrade(move |socket| actor::run_connection(socket, state, None));
    };

    match jwt::validate_session_token(&state.session_secret, &token) {
        Ok(claims) => {
            tracing::info!(username = %claims.sub, "WebSocket session resumed from token");
            ws.on_upgrade(move |socket| actor::run_connection(socket, state, Some(claims.sub)))
        }
        Err(err) => {
            let close_code = match err {
                SessionError::Expired => CLOSE_TOKEN_EXPIRED,
                _ => CLOSE_TOKEN_INVALID,
            };
            let reason = err.to_string();

            tracing::warn!(close_code = close_code, reason = %reason, "WebSocket token rejected");

            // Upgrade the connection, then immediately close with the error code
            ws.on_upgrade(move |mut socket| async move {
                let close_frame = CloseFrame {
                    code: close_code,
                    reason: reason.into(),
                };
                let _ = socket.send(Message::Close(Some(close_frame))).await;
            })
        }
    }
}
