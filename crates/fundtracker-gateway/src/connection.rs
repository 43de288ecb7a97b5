//! Per-connection gateway loop.
//!
//! Each WebSocket client owns one `SessionResolver` and at most one active
//! notification pipeline. The pipeline activates when the resolver reaches
//! `Authenticated` and is torn down on sign-out, re-auth, or disconnect —
//! subscription handles never survive an identity change.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{info, warn};

use fundtracker_types::events::{ClientCommand, Notification, ServerEvent};
use fundtracker_types::models::{AppRole, Identity};

use crate::dispatcher::Dispatcher;
use crate::pipeline::{self, NotificationSink, PipelineHandle, ProjectDirectory};
use crate::session::{AuthError, SessionResolver};

/// Everything a connection needs, shared across all connections.
#[derive(Clone)]
pub struct GatewayContext {
    pub backend: Arc<dyn crate::session::AuthBackend>,
    pub directory: Arc<dyn ProjectDirectory>,
    pub dispatcher: Dispatcher,
}

/// Forwards pipeline notifications into this connection's outgoing queue.
struct ConnectionSink {
    outgoing: mpsc::UnboundedSender<ServerEvent>,
}

impl NotificationSink for ConnectionSink {
    fn display(&self, notification: Notification) {
        let _ = self.outgoing.send(ServerEvent::Notify(notification));
    }
}

pub async fn handle_connection(socket: WebSocket, ctx: GatewayContext) {
    let (mut sender, mut receiver) = socket.split();
    let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<ServerEvent>();

    // Writer task: serialize outgoing events onto the socket.
    let mut send_task = tokio::spawn(async move {
        while let Some(event) = outgoing_rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Failed to serialize server event: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let resolver = SessionResolver::new(ctx.backend.clone());
    // A fresh socket carries no stored session; the client may Resume.
    let _ = resolver.restore(None).await;

    let mut pipeline: Option<PipelineHandle> = None;

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientCommand>(&text) {
                Ok(cmd) => {
                    handle_command(cmd, &resolver, &mut pipeline, &ctx, &outgoing_tx).await;
                }
                Err(e) => {
                    warn!("Bad gateway command ({} bytes): {}", text.len(), e);
                }
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    // Disconnect is a deactivation boundary: release both feed handles.
    if let Some(handle) = pipeline.take() {
        handle.deactivate().await;
    }
    resolver.sign_out();
    send_task.abort();
    let _ = send_task.await;
}

async fn handle_command(
    cmd: ClientCommand,
    resolver: &SessionResolver,
    pipeline: &mut Option<PipelineHandle>,
    ctx: &GatewayContext,
    outgoing: &mpsc::UnboundedSender<ServerEvent>,
) {
    match cmd {
        ClientCommand::SignIn { email, password } => {
            // Re-auth tears the old activation down first; no handle reuse
            // across identities.
            deactivate_if_active(pipeline, resolver).await;
            let outcome = resolver.sign_in(&email, &password).await;
            finish_auth(outcome, resolver, pipeline, ctx, outgoing).await;
        }

        ClientCommand::SignUp {
            email,
            password,
            full_name,
            role,
        } => {
            deactivate_if_active(pipeline, resolver).await;
            let outcome = resolver.sign_up(&email, &password, &full_name, role).await;
            finish_auth(outcome, resolver, pipeline, ctx, outgoing).await;
        }

        ClientCommand::Resume { token } => {
            deactivate_if_active(pipeline, resolver).await;
            let outcome = resolver.restore(Some(&token)).await.and_then(|state| {
                match state {
                    crate::session::SessionState::Authenticated { identity, role } => {
                        Ok((identity, role))
                    }
                    // restore(Some) either authenticates or errors.
                    _ => Err(AuthError::InvalidToken),
                }
            });
            finish_auth(outcome, resolver, pipeline, ctx, outgoing).await;
        }

        ClientCommand::SignOut => {
            deactivate_if_active(pipeline, resolver).await;
            let _ = outgoing.send(ServerEvent::SignedOut);
        }
    }
}

/// Sign out and release the activation, in that order: the resolver clears
/// role state synchronously, then the feed handles go away.
async fn deactivate_if_active(pipeline: &mut Option<PipelineHandle>, resolver: &SessionResolver) {
    resolver.sign_out();
    if let Some(handle) = pipeline.take() {
        handle.deactivate().await;
    }
}

async fn finish_auth(
    outcome: Result<(Identity, AppRole), AuthError>,
    resolver: &SessionResolver,
    pipeline: &mut Option<PipelineHandle>,
    ctx: &GatewayContext,
    outgoing: &mpsc::UnboundedSender<ServerEvent>,
) {
    match outcome {
        Ok((identity, role)) => {
            info!("{} ({}) authenticated as {}", identity.email, identity.user_id, role);

            let sink = Arc::new(ConnectionSink {
                outgoing: outgoing.clone(),
            });
            let handle = pipeline::activate(
                &identity,
                role,
                &ctx.dispatcher,
                ctx.directory.clone(),
                sink,
            )
            .await;
            *pipeline = Some(handle);

            let _ = outgoing.send(ServerEvent::Ready {
                user_id: identity.user_id,
                email: identity.email,
                role,
            });
        }
        Err(AuthError::Superseded) => {
            // A newer transition won; the loser stays quiet.
        }
        Err(e) => {
            debug_assert!(matches!(resolver.state(), crate::session::SessionState::Anonymous));
            let _ = outgoing.send(ServerEvent::AuthFailed {
                reason: e.to_string(),
                recoverable: e.user_correctable(),
            });
        }
    }
}
