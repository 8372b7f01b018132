/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - HUDDLE Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

mod ws;

pub use huddle_protocol::ParticipantEntry;
pub use ws::WsSignaling;

use tokio::sync::broadcast;

use crate::error::CallResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingEvent {
    PeerJoined { peer_id: String, user_id: String },
    PeerLeft { peer_id: String },
    Roster(Vec<ParticipantEntry>),
    Presence { user_id: String, online: bool },
    /// Link to the relay lost. Existing calls are unaffected; no new presence
    /// events arrive until `Reconnected`.
    Disconnected { reason: String },
    Reconnected,
}

/// Presence channel for one workspace membership.
pub trait Signaling: Send + Sync {
    fn workspace_id(&self) -> &str;

    fn announce(&self, peer_id: &str) -> CallResult<()>;

    fn depart(&self, peer_id: &str) -> CallResult<()>;

    fn events(&self) -> broadcast::Receiver<SignalingEvent>;

    /// Idempotent.
    fn disconnect(&self);
}
