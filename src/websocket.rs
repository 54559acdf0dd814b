//! # WebSocket Transport Adapter
//!
//! Handles real-time audio streaming over WebSocket. Clients connect to
//! `/ws/asr`; the connection is implicitly registered with the session
//! manager and torn down again on disconnect.
//!
//! ## Protocol:
//! - **Binary messages** carry one audio frame each (see
//!   `contracts::AudioFrame` for the header layout). Frames are admitted in
//!   arrival order; while a frame waits for queue space the actor's inbound
//!   stream is paused, so backpressure reaches the socket.
//! - **Text messages** are JSON control commands tagged by `type`:
//!   `stop_stream` and `generate_questions`.
//! - **Server → client** messages are the JSON `ServerMessage` events
//!   (`session`, `partial`, `final`, `questions`, `error`).
//! - Liveness uses native WebSocket ping/pong frames.

use crate::contracts::{AudioFrame, GenerateQuestionsOptions};
use crate::session::{ClientNotifier, ServerMessage, SessionManager};
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How often the server pings an idle connection.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// How long a connection may stay silent before it is closed.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Control messages sent by the client as JSON text frames.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Drain and stop the audio stream for this connection
    #[serde(rename = "stop_stream")]
    StopStream,

    /// Request follow-up question suggestions
    #[serde(rename = "generate_questions")]
    GenerateQuestions {
        #[serde(default)]
        topic: Option<String>,
        #[serde(default)]
        preferred_style: Option<String>,
        #[serde(default)]
        force_refresh: bool,
    },
}

/// Actor message wrapping an outbound server event.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Outbound(pub ServerMessage);

/// Actor message asking the connection to close (after a fatal setup error).
#[derive(Message)]
#[rtype(result = "()")]
struct CloseConnection;

/// Routes outbound server events to the right live WebSocket actor.
///
/// The session manager only sees the `ClientNotifier` trait; this registry
/// keeps actix types out of the core.
#[derive(Default)]
pub struct WsNotifier {
    clients: DashMap<String, Recipient<Outbound>>,
}

impl WsNotifier {
    pub fn register(&self, connection_id: &str, recipient: Recipient<Outbound>) {
        self.clients.insert(connection_id.to_string(), recipient);
    }

    pub fn deregister(&self, connection_id: &str) {
        self.clients.remove(connection_id);
    }

    pub fn connected_count(&self) -> usize {
        self.clients.len()
    }
}

#[async_trait]
impl ClientNotifier for WsNotifier {
    async fn notify(&self, connection_id: &str, message: ServerMessage) {
        match self.clients.get(connection_id) {
            Some(recipient) => recipient.do_send(Outbound(message)),
            None => debug!("Dropping message for disconnected client {}", connection_id),
        }
    }
}

/// One WebSocket connection, as an actix actor.
pub struct AsrWebSocket {
    /// Server-assigned connection id
    connection_id: String,

    app_state: web::Data<AppState>,
    manager: Arc<SessionManager>,
    notifier: Arc<WsNotifier>,
    last_heartbeat: Instant,
}

impl AsrWebSocket {
    pub fn new(app_state: web::Data<AppState>) -> Self {
        let manager = Arc::clone(&app_state.sessions);
        let notifier = Arc::clone(&app_state.notifier);
        Self {
            connection_id: Uuid::new_v4().to_string(),
            app_state,
            manager,
            notifier,
            last_heartbeat: Instant::now(),
        }
    }

    fn send_server_message(&self, ctx: &mut ws::WebsocketContext<Self>, message: ServerMessage) {
        match serde_json::to_string(&message) {
            Ok(json) => ctx.text(json),
            Err(err) => error!("Failed to serialize server message: {}", err),
        }
    }

    /// Admit one decoded audio frame, pausing the inbound stream until the
    /// frame is accepted or rejected so frames stay ordered and backpressure
    /// propagates.
    fn handle_audio_frame(&self, frame: AudioFrame, ctx: &mut ws::WebsocketContext<Self>) {
        let manager = Arc::clone(&self.manager);
        let connection_id = self.connection_id.clone();

        let admit = actix::fut::wrap_future::<_, Self>(async move {
            manager.handle_audio_frame(&connection_id, frame).await
        });
        ctx.wait(admit.map(|result, act, ctx| {
            if let Err(err) = result {
                act.send_server_message(
                    ctx,
                    ServerMessage::Error {
                        reason: err.reason().to_string(),
                        details: err.to_string(),
                    },
                );
            }
        }));
    }

    fn handle_control_message(&self, text: &str, ctx: &mut ws::WebsocketContext<Self>) {
        let parsed: Result<ClientMessage, _> = serde_json::from_str(text);
        match parsed {
            Ok(ClientMessage::StopStream) => {
                let manager = Arc::clone(&self.manager);
                let notifier = Arc::clone(&self.notifier);
                let connection_id = self.connection_id.clone();
                tokio::spawn(async move {
                    if let Err(err) = manager.stop_stream(&connection_id).await {
                        notifier
                            .notify(
                                &connection_id,
                                ServerMessage::Error {
                                    reason: err.reason().to_string(),
                                    details: err.to_string(),
                                },
                            )
                            .await;
                    }
                });
            }
            Ok(ClientMessage::GenerateQuestions {
                topic,
                preferred_style,
                force_refresh,
            }) => {
                let manager = Arc::clone(&self.manager);
                let notifier = Arc::clone(&self.notifier);
                let connection_id = self.connection_id.clone();
                let options = GenerateQuestionsOptions {
                    topic,
                    preferred_style,
                    force_refresh,
                };

                // Question generation may take seconds; it must not block
                // audio frames, so it runs off the actor's mailbox.
                tokio::spawn(async move {
                    let message = match manager.generate_questions(&connection_id, options).await {
                        Ok(items) => ServerMessage::Questions { items },
                        Err(err) => ServerMessage::Error {
                            reason: err.reason().to_string(),
                            details: err.to_string(),
                        },
                    };
                    notifier.notify(&connection_id, message).await;
                });
            }
            Err(err) => {
                self.send_server_message(
                    ctx,
                    ServerMessage::Error {
                        reason: "BadRequest".to_string(),
                        details: format!("Invalid control message: {}", err),
                    },
                );
            }
        }
    }
}

impl Actor for AsrWebSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!("WebSocket connection {} started", self.connection_id);
        self.notifier
            .register(&self.connection_id, ctx.address().recipient());
        self.app_state.increment_active_sessions();

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!(
                    "WebSocket heartbeat timeout for {}, closing connection",
                    act.connection_id
                );
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });

        // Implicit registration: the session exists as soon as the socket is
        // up, announced with a session event (or an error plus close).
        let manager = Arc::clone(&self.manager);
        let notifier = Arc::clone(&self.notifier);
        let connection_id = self.connection_id.clone();
        let addr = ctx.address();
        tokio::spawn(async move {
            match manager.register_connection(&connection_id).await {
                Ok(()) => {
                    notifier
                        .notify(
                            &connection_id,
                            ServerMessage::Session {
                                state: "started".to_string(),
                            },
                        )
                        .await;
                }
                Err(err) => {
                    error!("Failed to register connection {}: {}", connection_id, err);
                    notifier
                        .notify(
                            &connection_id,
                            ServerMessage::Error {
                                reason: err.reason().to_string(),
                                details: err.to_string(),
                            },
                        )
                        .await;
                    addr.do_send(CloseConnection);
                }
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!("WebSocket connection {} stopped", self.connection_id);
        self.notifier.deregister(&self.connection_id);
        self.app_state.decrement_active_sessions();

        let manager = Arc::clone(&self.manager);
        let connection_id = self.connection_id.clone();
        tokio::spawn(async move {
            manager.cleanup_connection(&connection_id).await;
        });
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for AsrWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Binary(data)) => match AudioFrame::from_wire(&data) {
                Ok(frame) => self.handle_audio_frame(frame, ctx),
                Err(err) => {
                    self.send_server_message(
                        ctx,
                        ServerMessage::Error {
                            reason: "BadRequest".to_string(),
                            details: err,
                        },
                    );
                }
            },
            Ok(ws::Message::Text(text)) => self.handle_control_message(&text, ctx),
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!("WebSocket {} closed: {:?}", self.connection_id, reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!("Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!("WebSocket protocol error on {}: {}", self.connection_id, err);
                ctx.stop();
            }
        }
    }
}

impl Handler<Outbound> for AsrWebSocket {
    type Result = ();

    fn handle(&mut self, msg: Outbound, ctx: &mut Self::Context) {
        self.send_server_message(ctx, msg.0);
    }
}

impl Handler<CloseConnection> for AsrWebSocket {
    type Result = ();

    fn handle(&mut self, _msg: CloseConnection, ctx: &mut Self::Context) {
        ctx.close(Some(ws::CloseReason::from(ws::CloseCode::Error)));
        ctx.stop();
    }
}

/// WebSocket endpoint handler: upgrades the HTTP request and hands the
/// connection to an `AsrWebSocket` actor.
pub async fn asr_websocket(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    info!(
        "New WebSocket connection request from: {:?}",
        req.connection_info().peer_addr()
    );
    ws::start(AsrWebSocket::new(app_state), &req, stream)
}
