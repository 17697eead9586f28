//! WebSocket module for real-time device status streaming
//!
//! Each session polls storage on the broadcast interval and pushes the
//! status snapshot when it changed since the last push. Clients may send
//! device commands, which are recorded in the activity log.

use actix::{Actor, ActorContext, ActorFutureExt, AsyncContext, StreamHandler};
use actix_web_actors::ws;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::models::{DeviceCommand, DeviceStatus, WsMessage};
use crate::state::AppState;
use crate::storage::Storage;

/// How often heartbeat pings are sent
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// How long before lack of client response causes a timeout
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// WebSocket session actor
pub struct WsSession {
    client_id: String,
    last_heartbeat: Instant,
    state: Arc<RwLock<AppState>>,
    storage: Storage,
    broadcast_interval: Duration,
    last_snapshot: Option<Vec<DeviceStatus>>,
}

impl WsSession {
    pub fn new(
        client_id: String,
        state: Arc<RwLock<AppState>>,
        storage: Storage,
        broadcast_interval: Duration,
    ) -> Self {
        Self {
            client_id,
            last_heartbeat: Instant::now(),
            state,
            storage,
            broadcast_interval,
            last_snapshot: None,
        }
    }

    fn send(ctx: &mut ws::WebsocketContext<Self>, msg: &WsMessage) {
        if let Ok(json) = serde_json::to_string(msg) {
            ctx.text(json);
        }
    }

    fn start_heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!(
                    client_id = %act.client_id,
                    "WebSocket heartbeat timeout"
                );
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    /// Load the current snapshot and push it if it differs from the last one sent.
    fn push_status(&self, ctx: &mut ws::WebsocketContext<Self>) {
        let storage = self.storage.clone();
        let fut = actix::fut::wrap_future::<_, Self>(async move { storage.device_statuses().await });

        ctx.spawn(fut.map(|snapshot, act, ctx| {
            if act.last_snapshot.as_ref() == Some(&snapshot) {
                return;
            }

            debug!(client_id = %act.client_id, devices = snapshot.len(), "Pushing status update");
            Self::send(ctx, &WsMessage::StatusUpdate(snapshot.clone()));
            act.last_snapshot = Some(snapshot);
        }));
    }

    fn start_status_polling(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(self.broadcast_interval, |act, ctx| act.push_status(ctx));
    }

    fn handle_command(&self, command: DeviceCommand, ctx: &mut ws::WebsocketContext<Self>) {
        info!(
            client_id = %self.client_id,
            device_id = command.device_id,
            command = %command.command,
            "Device command received"
        );

        let storage = self.storage.clone();
        let fut = actix::fut::wrap_future::<_, Self>(async move {
            storage
                .record_activity(command.device_id, &command.action(), command.activity_status())
                .await
        });

        ctx.spawn(fut.map(|record, _act, ctx| {
            Self::send(
                ctx,
                &WsMessage::CommandAck {
                    activity_id: record.activity_id,
                    device_id: record.device_id,
                },
            );
        }));
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(client_id = %self.client_id, "WebSocket connected");

        Self::send(
            ctx,
            &WsMessage::Connected {
                client_id: self.client_id.clone(),
            },
        );

        self.start_heartbeat(ctx);
        self.push_status(ctx);
        self.start_status_polling(ctx);
    }

    fn stopped(&mut self, _: &mut Self::Context) {
        info!(client_id = %self.client_id, "WebSocket disconnected");

        let state = self.state.clone();
        let client_id = self.client_id.clone();

        // IMPORTANT: Actix runtime spawn (not Tokio)
        actix_rt::spawn(async move {
            let mut state = state.write().await;
            state.remove_client(&client_id);
        });
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                debug!(client_id = %self.client_id, message = %text);

                match serde_json::from_str::<WsMessage>(&text) {
                    Ok(WsMessage::Ping) => {
                        self.last_heartbeat = Instant::now();
                        Self::send(ctx, &WsMessage::Pong);
                    }
                    Ok(WsMessage::DeviceCommand(command)) => {
                        self.handle_command(command, ctx);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(client_id = %self.client_id, error = %e);
                        Self::send(
                            ctx,
                            &WsMessage::Error {
                                message: "Invalid message format".into(),
                            },
                        );
                    }
                }
            }
            Ok(ws::Message::Close(reason)) => {
                info!(client_id = %self.client_id, reason = ?reason);
                ctx.close(reason);
                ctx.stop();
            }
            Err(e) => {
                warn!(client_id = %self.client_id, error = %e);
                ctx.stop();
            }
            _ => {}
        }
    }
}
