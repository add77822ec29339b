//! Per-connection handler: handshake, identity, and request routing.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The flow is:
//!   1. Upgrade to WebSocket
//!   2. Receive Handshake → validate version → resolve token to a user id
//!   3. Send HandshakeAck
//!   4. Loop: receive a request → call the attendance service → reply
//!      with the same envelope id

use std::net::SocketAddr;
use std::sync::Arc;

use rollcall_attendance::{AttendanceBook, AttendanceError, Directory, IdentityResolver};
use rollcall_codes::CodeError;
use rollcall_protocol::{ClassSession, Codec, Envelope, Message, ProtocolError, UserId};
use tokio::net::TcpStream;
use tokio::time::Instant;

use crate::RollcallError;
use crate::server::{PROTOCOL_VERSION, ServerState};
use crate::transport::WebSocketConnection;

/// Upgrades `stream` and serves it until it closes. Errors are logged,
/// never propagated: one broken client must not affect the others.
pub(crate) async fn serve_connection<R, D, B>(
    stream: TcpStream,
    peer: SocketAddr,
    state: Arc<ServerState<R, D, B>>,
) where
    R: IdentityResolver,
    D: Directory,
    B: AttendanceBook,
{
    // One budget covers both the upgrade and the Handshake message.
    let deadline = Instant::now() + state.handshake_timeout;
    let upgrade = WebSocketConnection::upgrade(stream, peer);
    let conn = match tokio::time::timeout_at(deadline, upgrade).await {
        Ok(Ok(conn)) => conn,
        Ok(Err(e)) => {
            tracing::debug!(%peer, error = %e, "websocket upgrade failed");
            return;
        }
        Err(_) => {
            tracing::debug!(%peer, "websocket upgrade timed out");
            return;
        }
    };

    if let Err(e) = handle_connection(conn, &state, deadline).await {
        tracing::debug!(%peer, error = %e, "connection ended with error");
    }
}

/// Handles a single connection from handshake to close.
async fn handle_connection<R, D, B>(
    mut conn: WebSocketConnection,
    state: &ServerState<R, D, B>,
    handshake_deadline: Instant,
) -> Result<(), RollcallError>
where
    R: IdentityResolver,
    D: Directory,
    B: AttendanceBook,
{
    let conn_id = conn.id();
    tracing::debug!(%conn_id, peer = %conn.peer(), "handling new connection");

    let user_id = match perform_handshake(&mut conn, state, handshake_deadline).await {
        Ok(user_id) => user_id,
        Err(e) => {
            let _ = conn.close().await;
            return Err(e);
        }
    };
    tracing::info!(%conn_id, %user_id, "user authenticated");

    loop {
        let data = match tokio::time::timeout(state.idle_timeout, conn.recv()).await {
            Ok(Ok(Some(data))) => data,
            Ok(Ok(None)) => {
                tracing::info!(%user_id, "connection closed cleanly");
                return Ok(());
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                tracing::info!(%user_id, "connection idle, closing");
                break;
            }
        };

        let envelope: Envelope = match state.codec.decode(&data) {
            Ok(env) => env,
            Err(e) => {
                tracing::debug!(%user_id, error = %e, "failed to decode envelope");
                let reply = error_message(400, format!("malformed request: {e}"));
                send(&mut conn, state, 0, reply).await?;
                continue;
            }
        };

        let reply = match envelope.payload {
            Message::Disconnect { reason } => {
                tracing::info!(%user_id, %reason, "client disconnected");
                break;
            }
            request => respond(state, &user_id, request).await,
        };
        send(&mut conn, state, envelope.id, reply).await?;
    }

    conn.close().await?;
    Ok(())
}

/// Performs the initial handshake: receive Handshake, validate, resolve,
/// send Ack. The Handshake must arrive before `deadline`.
async fn perform_handshake<R, D, B>(
    conn: &mut WebSocketConnection,
    state: &ServerState<R, D, B>,
    deadline: Instant,
) -> Result<UserId, RollcallError>
where
    R: IdentityResolver,
    D: Directory,
    B: AttendanceBook,
{
    let data = match tokio::time::timeout_at(deadline, conn.recv()).await {
        Ok(Ok(Some(data))) => data,
        Ok(Ok(None)) => {
            return Err(invalid("connection closed before handshake"));
        }
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => return Err(invalid("handshake timed out")),
    };

    let envelope: Envelope = match state.codec.decode(&data) {
        Ok(env) => env,
        Err(e) => {
            send(conn, state, 0, error_message(400, "malformed handshake")).await?;
            return Err(e.into());
        }
    };

    let Message::Handshake { version, token } = envelope.payload else {
        send(conn, state, envelope.id, error_message(400, "expected Handshake")).await?;
        return Err(invalid("first message must be Handshake"));
    };

    if version != PROTOCOL_VERSION {
        let reply = error_message(
            400,
            format!("version mismatch: expected {PROTOCOL_VERSION}, got {version}"),
        );
        send(conn, state, envelope.id, reply).await?;
        return Err(invalid("protocol version mismatch"));
    }

    let hook_timeout = state.service.config().hook_timeout;
    let resolved = match tokio::time::timeout(hook_timeout, state.resolver.resolve(&token)).await {
        Ok(resolved) => resolved,
        Err(_) => Err(AttendanceError::Timeout {
            hook: "identity",
            after: hook_timeout,
        }),
    };
    let user_id = match resolved {
        Ok(user_id) => user_id,
        Err(e) => {
            let status = match e {
                AttendanceError::Timeout { .. } => 504,
                _ => 401,
            };
            send(conn, state, envelope.id, error_message(status, "unauthorized")).await?;
            return Err(e.into());
        }
    };

    let ack = Message::HandshakeAck {
        user_id: user_id.clone(),
    };
    send(conn, state, envelope.id, ack).await?;
    Ok(user_id)
}

/// Runs one request against the attendance service and builds the reply.
async fn respond<R, D, B>(
    state: &ServerState<R, D, B>,
    user_id: &UserId,
    request: Message,
) -> Message
where
    D: Directory,
    B: AttendanceBook,
{
    let service = &state.service;

    let result = match request {
        Message::InitialInfo => service
            .initial_info(user_id)
            .await
            .map(|info| Message::InitialInfoResult {
                subjects: info.subjects,
                classes: info.classes,
                modules: info.modules,
            }),

        Message::Classes { subject } => service
            .classes(user_id, &subject)
            .await
            .map(|classes| Message::ClassList { classes }),

        Message::RequestCode {
            subject,
            class_name,
            module_id,
            coordinates,
        } => {
            let session = ClassSession {
                subject,
                class_name,
                module_id,
            };
            service
                .generate_code(user_id, session, coordinates)
                .await
                .map(|entry| {
                    let remaining = entry.remaining();
                    Message::CodeIssued {
                        code: entry.code().to_string(),
                        expires_in_secs: remaining.as_secs()
                            + u64::from(remaining.subsec_nanos() > 0),
                    }
                })
        }

        Message::CloseCode { code } => {
            service
                .close_code(user_id, &code)
                .await
                .map(|entry| Message::CodeClosed {
                    code: entry.code().to_string(),
                })
        }

        Message::RegisterAttendance { code, coordinates } => service
            .register_attendance(user_id, &code, coordinates)
            .await
            .map(|outcome| Message::Attendance { outcome }),

        other => {
            tracing::debug!(%user_id, ?other, "ignoring unexpected message");
            return error_message(400, "unexpected message");
        }
    };

    result.unwrap_or_else(|e| error_message(status_code(&e), e.to_string()))
}

/// Maps a system failure to the status code sent to the client.
fn status_code(error: &AttendanceError) -> u16 {
    match error {
        AttendanceError::Code(CodeError::InvalidCoordinates(_)) => 400,
        AttendanceError::AuthFailed(_) => 401,
        AttendanceError::Code(CodeError::NotIssuer { .. }) => 403,
        AttendanceError::Code(CodeError::NotFound(_)) => 404,
        AttendanceError::Code(CodeError::Collision(_))
        | AttendanceError::Capacity { .. }
        | AttendanceError::Unavailable(_) => 503,
        AttendanceError::Timeout { .. } => 504,
    }
}

fn error_message(code: u16, message: impl Into<String>) -> Message {
    Message::Error {
        code,
        message: message.into(),
    }
}

fn invalid(reason: &str) -> RollcallError {
    ProtocolError::InvalidMessage(reason.to_string()).into()
}

/// Encodes `payload` under envelope `id` and sends it.
async fn send<R, D, B>(
    conn: &mut WebSocketConnection,
    state: &ServerState<R, D, B>,
    id: u64,
    payload: Message,
) -> Result<(), RollcallError>
where
    D: Directory,
    B: AttendanceBook,
{
    let bytes = state.codec.encode(&Envelope::new(id, payload))?;
    conn.send(&bytes).await?;
    Ok(())
}
