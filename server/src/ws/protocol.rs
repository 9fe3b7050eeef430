use axum::extract::ws::Message;

use crate::auth::jwt;
use crate::envelope::{
    decode_envelope, encode_envelope, encode_reply, ActionEnvelope, ActionKind, Envelope,
    MessageEnvelope, Reply, ACK,
};
use crate::error::{AuthError, RegistryError};
use crate::state::AppState;
use crate::ws::Session;

/// What the reader loop should do after a frame has been handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

/// Handle one inbound text or binary frame.
/// Decodes the envelope, dispatches on its type, writes the response.
pub async fn handle_frame(data: &[u8], session: &mut Session, state: &AppState) -> Flow {
    let envelope = match decode_envelope(data) {
        Ok(env) => env,
        Err(e) => {
            tracing::warn!(
                connection_id = %session.handle().id(),
                error = %e,
                "Failed to decode envelope"
            );
            send_error(session, e.kind(), &e.client_message());
            return if e.is_fatal() { Flow::Close } else { Flow::Continue };
        }
    };

    match envelope {
        Envelope::Message(message) => handle_message(message, session, state),
        Envelope::Action(action) => handle_action(action, session, state).await,
    }
    Flow::Continue
}

/// Acknowledge a chat message and forward it to the recipient's connection.
fn handle_message(message: MessageEnvelope, session: &Session, state: &AppState) {
    if let Err(e) = session.authorize(&message) {
        tracing::warn!(
            connection_id = %session.handle().id(),
            from = %message.from,
            error = %e,
            "Rejected message"
        );
        send_error(session, e.kind(), &e.to_string());
        return;
    }

    tracing::info!(
        from = %message.from,
        to = %message.to,
        content_type = %message.content_type,
        bytes = message.content.len(),
        "Message received"
    );
    session.handle().send_text(ACK);

    let to = message.to.clone();
    let wire = encode_envelope(&Envelope::Message(message));
    match state.connections.send_to(&to, &wire) {
        Ok(()) => tracing::debug!(to = %to, "Message delivered"),
        Err(RegistryError::NotFound) => tracing::debug!(to = %to, "Recipient offline, message dropped"),
    }
}

/// Dispatch a register/login action to the auth service.
async fn handle_action(action: ActionEnvelope, session: &mut Session, state: &AppState) {
    let ActionEnvelope {
        action,
        username,
        password,
    } = action;

    let result = match action {
        ActionKind::Register => state.auth.register(&username, password).await,
        ActionKind::Login => state.auth.login(&username, password).await,
    };

    if let Err(e) = result {
        log_auth_failure(action, &username, &e);
        send_error(session, e.kind(), &e.client_message());
        return;
    }

    match action {
        ActionKind::Register => {
            tracing::info!(username = %username, "User registered");
            session.handle().send_text(ACK);
        }
        ActionKind::Login => complete_login(&username, session, state),
    }
}

/// Issue a session token and bind the connection to the identity.
fn complete_login(username: &str, session: &mut Session, state: &AppState) {
    let issued = match jwt::issue_session_token(
        &state.session_secret,
        username,
        state.settings.session_ttl_secs,
    ) {
        Ok(issued) => issued,
        Err(e) => {
            tracing::error!(username = %username, error = %e, "Failed to issue session token");
            let err = AuthError::Io(e.to_string());
            send_error(session, err.kind(), &err.client_message());
            return;
        }
    };

    session.authenticate(&state.connections, username);
    tracing::info!(
        username = %username,
        connection_id = %session.handle().id(),
        "User logged in"
    );

    send_reply(
        session,
        &Reply::Session {
            username: username.to_string(),
            token: issued.token,
            expires_at: issued.expires_at,
        },
    );
}

fn log_auth_failure(action: ActionKind, username: &str, err: &AuthError) {
    match err {
        AuthError::Io(_) => tracing::error!(
            action = action.as_str(),
            username = %username,
            error = %err,
            "Auth action failed"
        ),
        _ => tracing::info!(
            action = action.as_str(),
            username = %username,
            error = %err,
            "Auth action rejected"
        ),
    }
}

fn send_reply(session: &Session, reply: &Reply) {
    session.handle().send(Message::Text(encode_reply(reply).into()));
}

/// Send an error frame naming the failure kind.
fn send_error(session: &Session, kind: &str, message: &str) {
    send_reply(session, &Reply::error(kind, message));
}
