/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - HUDDLE Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Mesh call session.
//!
//! All session state lives in one task. [`CallSession`] is a cheap handle that
//! posts commands to it; signaling events, inbound calls and the completions
//! of media, transport and dial operations go through the same queue, so the
//! state is only ever touched by one writer.

mod actor;
mod participants;

pub use participants::{CallDirection, ParticipantInfo, ParticipantStatus};

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::config::CallConfig;
use crate::error::{CallError, CallResult};
use crate::events::SessionEvent;
use crate::media::{MediaDevices, VideoSource};
use crate::metrics::{CallMetrics, MetricsSnapshot};
use crate::signaling::{ParticipantEntry, Signaling};
use crate::transport::Transport;
use actor::{Command, Msg, SessionActor};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Joining,
    Active,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionState::Idle => "idle",
            SessionState::Joining => "joining",
            SessionState::Active => "active",
        })
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub local_peer_id: Option<String>,
    pub local_stream_id: Option<String>,
    pub audio_enabled: bool,
    pub video_enabled: bool,
    pub video_source: VideoSource,
    /// Sorted by peer id.
    pub participants: Vec<ParticipantInfo>,
    pub pending_dials: Vec<String>,
    pub roster: Vec<ParticipantEntry>,
    pub signaling_connected: bool,
}

impl SessionSnapshot {
    pub fn participant(&self, peer_id: &str) -> Option<&ParticipantInfo> {
        self.participants.iter().find(|p| p.peer_id == peer_id)
    }

    pub fn connected(&self) -> usize {
        self.participants
            .iter()
            .filter(|p| p.status == ParticipantStatus::Connected)
            .count()
    }
}

/// Collaborators the session drives.
pub struct SessionDeps {
    pub signaling: Arc<dyn Signaling>,
    pub transport: Arc<dyn Transport>,
    pub devices: Arc<dyn MediaDevices>,
}

/// Owned by every clone of a [`CallSession`]; dropping the last one shuts
/// the session down.
struct Handle {
    tx: mpsc::UnboundedSender<Msg>,
}

impl Drop for Handle {
    fn drop(&mut self) {
        let (reply, _) = oneshot::channel();
        let _ = self.tx.send(Msg::Command(Command::Shutdown(reply)));
    }
}

#[derive(Clone)]
pub struct CallSession {
    handle: Arc<Handle>,
    events: broadcast::Sender<SessionEvent>,
    metrics: Arc<CallMetrics>,
}

impl CallSession {
    /// Starts the session task. The transport identity is opened right away so
    /// joining a call later only waits for local media.
    pub fn spawn(config: CallConfig, deps: SessionDeps) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(128);
        let metrics = Arc::new(CallMetrics::new());
        let signal_rx = deps.signaling.events();
        let actor = SessionActor::new(config, deps, tx.clone(), events.clone(), metrics.clone());
        tokio::spawn(actor.run(rx, signal_rx));
        Self {
            handle: Arc::new(Handle { tx }),
            events,
            metrics,
        }
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> CallResult<T> {
        let (reply, rx) = oneshot::channel();
        self.handle
            .tx
            .send(Msg::Command(make(reply)))
            .map_err(|_| CallError::SessionClosed)?;
        rx.await.map_err(|_| CallError::SessionClosed)
    }

    /// Acquires local media, announces this member and accepts calls until
    /// `end_call`. Fails with `InvalidState` unless the session is idle.
    pub async fn start_call(&self) -> CallResult<()> {
        self.request(Command::Start).await?
    }

    /// Idempotent; also cancels a join in progress.
    pub async fn end_call(&self) -> CallResult<()> {
        self.request(Command::End).await
    }

    pub async fn set_audio_enabled(&self, enabled: bool) -> CallResult<()> {
        self.request(|reply| Command::SetAudio { enabled, reply }).await?
    }

    pub async fn set_video_enabled(&self, enabled: bool) -> CallResult<()> {
        self.request(|reply| Command::SetVideo { enabled, reply }).await?
    }

    /// Replaces the outgoing video on every live call. Calls that cannot swap
    /// the track in place are ended.
    pub async fn switch_video_source(&self, source: VideoSource) -> CallResult<()> {
        self.request(|reply| Command::SwitchVideo { source, reply }).await?
    }

    pub async fn snapshot(&self) -> CallResult<SessionSnapshot> {
        self.request(Command::Snapshot).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Ends the call, closes the transport and signaling, and stops the task.
    /// Also happens when the last handle is dropped.
    pub async fn shutdown(&self) -> CallResult<()> {
        self.request(Command::Shutdown).await
    }
}
