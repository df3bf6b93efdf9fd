//! Notification stream over WebSocket.
//!
//! Credentials come from the `Authorization` header or, for browser clients
//! that cannot set headers on an upgrade, a `token` query parameter. After
//! the upgrade the client joins its own room with
//! `{"type":"join","topic":"user:<id>"}` and receives
//! `{"type":"event","topic":..,"event":..}` frames from then on.

use std::sync::Arc;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use flux_core::{Delivered, NotificationEvent, Principal, Topic};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::{ApiError, AppState, CorrelationId};

#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    pub token: Option<String>,
}

#[derive(Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Join { topic: String },
    Ping,
}

#[derive(Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Connected { principal: String },
    Joined { topic: Topic },
    Event { topic: Topic, event: NotificationEvent },
    Error { message: String },
    Pong,
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error { message: message.into() }
    }

    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"type":"error","message":"failed to encode message"}"#.to_owned()
        })
    }
}

impl From<&Delivered> for ServerMessage {
    fn from(delivered: &Delivered) -> Self {
        Self::Event { topic: delivered.topic.clone(), event: delivered.event.clone() }
    }
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/notifications/ws", get(ws_handler))
}

async fn ws_handler(
    State(state): State<AppState>,
    CorrelationId(correlation_id): CorrelationId,
    headers: HeaderMap,
    Query(query): Query<StreamQuery>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let header = headers.get(AUTHORIZATION).and_then(|value| value.to_str().ok());
    let authenticated = match (header, query.token.as_deref()) {
        (None, Some(token)) => state.authenticator.authenticate_token(token).await,
        _ => state.authenticator.authenticate_header(header).await,
    };
    let principal = match authenticated {
        Ok(principal) => principal,
        Err(error) => return ApiError(error.into_interface(correlation_id)).into_response(),
    };

    let ws = match upgrade {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    info!(
        event_name = "notify.stream.opened",
        correlation_id = %correlation_id,
        principal = %principal.actor_label(),
        "notification stream opened"
    );
    ws.on_upgrade(move |socket| handle_socket(socket, state, principal))
}

/// Only a principal's own room may be joined.
pub fn authorize_join(principal: &Principal, requested: &str) -> Result<Topic, String> {
    let topic = Topic::parse(requested).ok_or_else(|| format!("invalid topic `{requested}`"))?;
    let own = match principal {
        Principal::User(user_id) => Topic::User(user_id.clone()),
        Principal::Agent(agent_id) => Topic::Agent(agent_id.clone()),
    };
    if topic == own {
        Ok(topic)
    } else {
        Err(format!("not allowed to join `{requested}`"))
    }
}

async fn handle_socket(mut socket: WebSocket, state: AppState, principal: Principal) {
    let connected = ServerMessage::Connected { principal: principal.actor_label() };
    if send_message(&mut socket, &connected).await.is_err() {
        return;
    }

    let mut subscription: Option<broadcast::Receiver<Arc<Delivered>>> = None;
    loop {
        tokio::select! {
            incoming = socket.recv() => {
                let message = match incoming {
                    Some(Ok(message)) => message,
                    Some(Err(error)) => {
                        debug!(event_name = "notify.stream.receive_failed", error = %error, "websocket receive error");
                        break;
                    }
                    None => break,
                };
                let outcome = match message {
                    Message::Text(text) => {
                        handle_text(&mut socket, &state, &principal, &mut subscription, text.as_str()).await
                    }
                    Message::Ping(data) => socket.send(Message::Pong(data)).await,
                    Message::Close(_) => break,
                    _ => Ok(()),
                };
                if outcome.is_err() {
                    break;
                }
            }
            delivery = next_delivery(&mut subscription) => match delivery {
                Ok(delivered) => {
                    if send_message(&mut socket, &ServerMessage::from(delivered.as_ref())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        event_name = "notify.stream.lagged",
                        principal = %principal.actor_label(),
                        skipped,
                        "subscriber fell behind; notifications dropped"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => subscription = None,
            },
        }
    }

    info!(
        event_name = "notify.stream.closed",
        principal = %principal.actor_label(),
        "notification stream closed"
    );
}

async fn handle_text(
    socket: &mut WebSocket,
    state: &AppState,
    principal: &Principal,
    subscription: &mut Option<broadcast::Receiver<Arc<Delivered>>>,
    text: &str,
) -> Result<(), axum::Error> {
    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => message,
        Err(error) => {
            return send_message(socket, &ServerMessage::error(format!("invalid message: {error}"))).await;
        }
    };

    match message {
        ClientMessage::Join { topic } => match authorize_join(principal, &topic) {
            Ok(topic) => {
                *subscription = Some(state.hub.subscribe(&topic));
                send_message(socket, &ServerMessage::Joined { topic }).await
            }
            Err(reason) => send_message(socket, &ServerMessage::error(reason)).await,
        },
        ClientMessage::Ping => send_message(socket, &ServerMessage::Pong).await,
    }
}

async fn next_delivery(
    subscription: &mut Option<broadcast::Receiver<Arc<Delivered>>>,
) -> Result<Arc<Delivered>, broadcast::error::RecvError> {
    match subscription {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}

async fn send_message(socket: &mut WebSocket, message: &ServerMessage) -> Result<(), axum::Error> {
    socket.send(Message::Text(message.to_json().into())).await
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use flux_core::{AgentId, Delivered, IntentId, NotificationEvent, Principal, Topic, UserId};
    use serde_json::json;

    use super::{authorize_join, ClientMessage, ServerMessage};
    use crate::api::tests::test_app;

    fn user() -> Principal {
        Principal::User(UserId("user-demo".to_owned()))
    }

    #[test]
    fn principals_join_only_their_own_room() {
        assert_eq!(
            authorize_join(&user(), "user:user-demo"),
            Ok(Topic::User(UserId("user-demo".to_owned())))
        );
        assert!(authorize_join(&user(), "user:user-other").is_err());
        assert!(authorize_join(&user(), "agent:agent-travelgpt").is_err());

        let agent = Principal::Agent(AgentId("agent-travelgpt".to_owned()));
        assert!(authorize_join(&agent, "agent:agent-travelgpt").is_ok());
        assert!(authorize_join(&agent, "user:user-demo").is_err());
    }

    #[test]
    fn malformed_topics_are_refused() {
        let refused = authorize_join(&user(), "room-1").expect_err("refused");
        assert!(refused.contains("invalid topic"));
        assert!(authorize_join(&user(), "user:").is_err());
    }

    #[test]
    fn client_messages_parse_from_tagged_json() {
        let join: ClientMessage =
            serde_json::from_str(r#"{"type":"join","topic":"user:user-demo"}"#).expect("join");
        assert_eq!(join, ClientMessage::Join { topic: "user:user-demo".to_owned() });

        let ping: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).expect("ping");
        assert_eq!(ping, ClientMessage::Ping);

        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"leave"}"#).is_err());
    }

    #[test]
    fn deliveries_are_framed_as_events() {
        let delivered = Delivered {
            topic: Topic::Agent(AgentId("agent-travelgpt".to_owned())),
            event: NotificationEvent::Rejected {
                intent_id: IntentId("intent-1".to_owned()),
                reason: "User rejected".to_owned(),
            },
        };

        let frame: serde_json::Value =
            serde_json::from_str(&ServerMessage::from(&delivered).to_json()).expect("frame");

        assert_eq!(
            frame,
            json!({
                "type": "event",
                "topic": "agent:agent-travelgpt",
                "event": {"type": "rejected", "intent_id": "intent-1", "reason": "User rejected"}
            })
        );
    }

    #[tokio::test]
    async fn stream_requires_credentials_before_upgrade() {
        let app = test_app().await;

        let (status, body) = app.send("GET", "/v1/notifications/ws?token=flux_live_unknown", None, None).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["kind"], "authentication_error");
    }
}
