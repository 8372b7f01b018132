/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - HUDDLE Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use futures_util::{Sink, SinkExt, StreamExt};
use huddle_protocol::{ClientEvent, ServerEvent, PRESENCE_ONLINE};
use rand::{thread_rng, Rng};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::{Signaling, SignalingEvent};
use crate::config::SignalingConfig;
use crate::error::{CallError, CallResult};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Relay connection for one workspace, kept alive by a background task that
/// reconnects with backoff and replays our presence.
pub struct WsSignaling {
    workspace_id: String,
    cmd_tx: mpsc::UnboundedSender<ClientEvent>,
    events: broadcast::Sender<SignalingEvent>,
    shutdown: watch::Sender<bool>,
    connected: Arc<AtomicBool>,
}

impl WsSignaling {
    /// The first connection is made eagerly so a refused token or an
    /// unreachable relay is reported to the caller.
    pub async fn connect(cfg: &SignalingConfig, workspace_id: &str) -> CallResult<Self> {
        let url = signaling_url(cfg, workspace_id);
        info!(workspace=%workspace_id, relay=%cfg.url, "connecting signaling");
        let socket = open_socket(&url)
            .await
            .map_err(|e| CallError::SignalingDisconnected(format!("{e:#}")))?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(128);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let connected = Arc::new(AtomicBool::new(true));

        let link = Link {
            url,
            workspace_id: workspace_id.to_string(),
            cfg: cfg.clone(),
            events: events.clone(),
            connected: connected.clone(),
            presence: None,
        };
        tokio::spawn(link.run(socket, cmd_rx, shutdown_rx));

        Ok(Self {
            workspace_id: workspace_id.to_string(),
            cmd_tx,
            events,
            shutdown,
            connected,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn enqueue(&self, ev: ClientEvent) -> CallResult<()> {
        if *self.shutdown.borrow() {
            return Err(CallError::SignalingDisconnected("signaling was closed".to_string()));
        }
        self.cmd_tx
            .send(ev)
            .map_err(|_| CallError::SignalingDisconnected("signaling task stopped".to_string()))
    }
}

impl Signaling for WsSignaling {
    fn workspace_id(&self) -> &str {
        &self.workspace_id
    }

    fn announce(&self, peer_id: &str) -> CallResult<()> {
        self.enqueue(ClientEvent::PeerJoined {
            workspace_id: self.workspace_id.clone(),
            peer_id: peer_id.to_string(),
        })
    }

    fn depart(&self, peer_id: &str) -> CallResult<()> {
        self.enqueue(ClientEvent::PeerLeft {
            workspace_id: self.workspace_id.clone(),
            peer_id: peer_id.to_string(),
        })
    }

    fn events(&self) -> broadcast::Receiver<SignalingEvent> {
        self.events.subscribe()
    }

    fn disconnect(&self) {
        if !self.shutdown.send_replace(true) {
            info!(workspace=%self.workspace_id, "signaling disconnect requested");
        }
    }
}

fn signaling_url(cfg: &SignalingConfig, workspace_id: &str) -> String {
    let sep = if cfg.url.contains('?') { '&' } else { '?' };
    let mut url = format!(
        "{}{sep}workspace={}",
        cfg.url,
        urlencoding::encode(workspace_id)
    );
    if let Some(token) = cfg.token.as_deref() {
        url.push_str("&token=");
        url.push_str(&urlencoding::encode(token));
    }
    url
}

async fn open_socket(url: &str) -> Result<Socket> {
    let (socket, _) = tokio_tungstenite::connect_async(url)
        .await
        .context("connect signaling relay")?;
    Ok(socket)
}

async fn send_event<S>(sink: &mut S, ev: &ClientEvent) -> Result<()>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let json = serde_json::to_string(ev).context("encode signaling event")?;
    sink.send(Message::Text(json))
        .await
        .context("send signaling event")?;
    Ok(())
}

async fn sleep_with_jitter(base: Duration) {
    let cap = (base.as_millis() as u64 / 4).max(1);
    let jitter = Duration::from_millis(thread_rng().gen_range(0..=cap));
    tokio::time::sleep(base + jitter).await;
}

enum Exit {
    Shutdown,
    Lost(String),
}

struct Link {
    url: String,
    workspace_id: String,
    cfg: SignalingConfig,
    events: broadcast::Sender<SignalingEvent>,
    connected: Arc<AtomicBool>,
    /// Peer id currently announced; replayed after a reconnect.
    presence: Option<String>,
}

impl Link {
    async fn run(
        mut self,
        mut socket: Socket,
        mut cmd_rx: mpsc::UnboundedReceiver<ClientEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut restored = false;
        loop {
            let reason = match self.drive(socket, &mut cmd_rx, &mut shutdown, restored).await {
                Ok(Exit::Shutdown) => break,
                Ok(Exit::Lost(reason)) => reason,
                Err(e) => format!("{e:#}"),
            };
            self.connected.store(false, Ordering::Relaxed);
            warn!(workspace=%self.workspace_id, %reason, "signaling link lost");
            let _ = self.events.send(SignalingEvent::Disconnected { reason });

            socket = match self.reconnect(&mut shutdown).await {
                Some(s) => s,
                None => break,
            };
            self.connected.store(true, Ordering::Relaxed);
            // Fold what was queued while offline into the presence we replay.
            while let Ok(cmd) = cmd_rx.try_recv() {
                if let ClientEvent::PeerLeft { peer_id, .. } = &cmd {
                    debug!(
                        workspace=%self.workspace_id,
                        peer=%peer_id,
                        "dropping departure queued while offline"
                    );
                }
                self.track(&cmd);
            }
            restored = true;
        }
        self.connected.store(false, Ordering::Relaxed);
        debug!(workspace=%self.workspace_id, "signaling task stopped");
    }

    async fn drive(
        &mut self,
        socket: Socket,
        cmd_rx: &mut mpsc::UnboundedReceiver<ClientEvent>,
        shutdown: &mut watch::Receiver<bool>,
        restored: bool,
    ) -> Result<Exit> {
        let (mut ws_tx, mut ws_rx) = socket.split();

        send_event(
            &mut ws_tx,
            &ClientEvent::JoinWorkspace {
                workspace_id: self.workspace_id.clone(),
            },
        )
        .await?;
        if let Some(peer_id) = self.presence.clone() {
            send_event(
                &mut ws_tx,
                &ClientEvent::PeerJoined {
                    workspace_id: self.workspace_id.clone(),
                    peer_id,
                },
            )
            .await?;
        }
        if restored {
            info!(workspace=%self.workspace_id, "signaling link restored");
            let _ = self.events.send(SignalingEvent::Reconnected);
        }

        let mut ping = tokio::time::interval(self.cfg.ping_interval());
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ping.tick().await;

        loop {
            if *shutdown.borrow() {
                let _ = ws_tx.send(Message::Close(None)).await;
                return Ok(Exit::Shutdown);
            }
            tokio::select! {
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        let _ = ws_tx.send(Message::Close(None)).await;
                        return Ok(Exit::Shutdown);
                    }
                }
                _ = ping.tick() => {
                    ws_tx.send(Message::Ping(Vec::new())).await.context("send ping")?;
                }
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else {
                        let _ = ws_tx.send(Message::Close(None)).await;
                        return Ok(Exit::Shutdown);
                    };
                    self.track(&cmd);
                    send_event(&mut ws_tx, &cmd).await?;
                }
                msg = ws_rx.next() => {
                    let Some(msg) = msg else {
                        return Ok(Exit::Lost("relay ended the stream".to_string()));
                    };
                    match msg.context("read signaling frame")? {
                        Message::Text(text) => self.dispatch(&text),
                        Message::Ping(p) => {
                            let _ = ws_tx.send(Message::Pong(p)).await;
                        }
                        Message::Close(_) => {
                            return Ok(Exit::Lost("relay closed the connection".to_string()));
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    async fn reconnect(&self, shutdown: &mut watch::Receiver<bool>) -> Option<Socket> {
        let mut backoff = self.cfg.reconnect_min();
        loop {
            if *shutdown.borrow() {
                return None;
            }
            tokio::select! {
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        return None;
                    }
                    continue;
                }
                _ = sleep_with_jitter(backoff) => {}
            }
            match open_socket(&self.url).await {
                Ok(s) => return Some(s),
                Err(e) => {
                    debug!(workspace=%self.workspace_id, "signaling reconnect failed: {e:#}");
                    backoff = backoff.saturating_mul(2).min(self.cfg.reconnect_max());
                }
            }
        }
    }

    fn track(&mut self, cmd: &ClientEvent) {
        match cmd {
            ClientEvent::PeerJoined { peer_id, .. } => self.presence = Some(peer_id.clone()),
            ClientEvent::PeerLeft { peer_id, .. } => {
                if self.presence.as_deref() == Some(peer_id.as_str()) {
                    self.presence = None;
                }
            }
            ClientEvent::JoinWorkspace { .. } => {}
        }
    }

    fn dispatch(&self, text: &str) {
        let ev = match serde_json::from_str::<ServerEvent>(text) {
            Ok(v) => v,
            Err(e) => {
                debug!("ignoring relay frame: {e}");
                return;
            }
        };
        let ev = match ev {
            ServerEvent::PeerJoined { peer_id, user_id } => {
                SignalingEvent::PeerJoined { peer_id, user_id }
            }
            ServerEvent::PeerLeft { peer_id } => SignalingEvent::PeerLeft { peer_id },
            ServerEvent::ParticipantsList { participants } => SignalingEvent::Roster(participants),
            ServerEvent::PresenceUpdate { user_id, status } => SignalingEvent::Presence {
                user_id,
                online: status.eq_ignore_ascii_case(PRESENCE_ONLINE),
            },
        };
        let _ = self.events.send(ev);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_carries_workspace_and_token() {
        let cfg = SignalingConfig {
            url: "wss://relay.example/ws".to_string(),
            token: Some("a b&c".to_string()),
            ..Default::default()
        };
        assert_eq!(
            signaling_url(&cfg, "team/1"),
            "wss://relay.example/ws?workspace=team%2F1&token=a%20b%26c"
        );

        let cfg = SignalingConfig {
            url: "ws://relay/ws?v=2".to_string(),
            ..Default::default()
        };
        assert_eq!(signaling_url(&cfg, "w"), "ws://relay/ws?v=2&workspace=w");
    }
}
