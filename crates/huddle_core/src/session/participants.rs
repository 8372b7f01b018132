/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - HUDDLE Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use serde::Serialize;
use std::collections::HashMap;

use crate::media::MediaStream;
use crate::transport::BoxedCall;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    Connecting,
    Connected,
    Closed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallDirection {
    Outbound,
    Inbound,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ParticipantInfo {
    pub peer_id: String,
    pub user_id: Option<String>,
    pub status: ParticipantStatus,
    pub direction: CallDirection,
    pub stream_id: Option<String>,
}

pub(crate) struct RemoteParticipant {
    pub(crate) peer_id: String,
    pub(crate) user_id: Option<String>,
    pub(crate) attempt: u64,
    pub(crate) direction: CallDirection,
    pub(crate) status: ParticipantStatus,
    pub(crate) call: BoxedCall,
    pub(crate) stream: Option<MediaStream>,
}

impl RemoteParticipant {
    pub(crate) fn info(&self) -> ParticipantInfo {
        ParticipantInfo {
            peer_id: self.peer_id.clone(),
            user_id: self.user_id.clone(),
            status: self.status,
            direction: self.direction,
            stream_id: self.stream.as_ref().map(|s| s.id().to_string()),
        }
    }
}

pub(crate) struct PendingDial {
    pub(crate) attempt: u64,
    pub(crate) user_id: Option<String>,
}

/// At most one entry per remote peer, counting dials still in flight.
#[derive(Default)]
pub(crate) struct ParticipantTable {
    entries: HashMap<String, RemoteParticipant>,
    pending: HashMap<String, PendingDial>,
}

impl ParticipantTable {
    pub(crate) fn is_known(&self, peer_id: &str) -> bool {
        self.entries.contains_key(peer_id) || self.pending.contains_key(peer_id)
    }

    /// Registered participants plus pending dials.
    pub(crate) fn occupancy(&self) -> usize {
        self.entries.len() + self.pending.len()
    }

    pub(crate) fn connected(&self) -> usize {
        self.entries
            .values()
            .filter(|p| p.status == ParticipantStatus::Connected)
            .count()
    }

    pub(crate) fn begin_dial(&mut self, peer_id: &str, attempt: u64, user_id: Option<String>) -> bool {
        if self.is_known(peer_id) {
            return false;
        }
        self.pending
            .insert(peer_id.to_string(), PendingDial { attempt, user_id });
        true
    }

    pub(crate) fn has_pending(&self, peer_id: &str) -> bool {
        self.pending.contains_key(peer_id)
    }

    pub(crate) fn cancel_dial(&mut self, peer_id: &str) -> Option<PendingDial> {
        self.pending.remove(peer_id)
    }

    /// Takes the pending dial only if it is still the given attempt.
    pub(crate) fn finish_dial(&mut self, peer_id: &str, attempt: u64) -> Option<PendingDial> {
        match self.pending.get(peer_id) {
            Some(p) if p.attempt == attempt => self.pending.remove(peer_id),
            _ => None,
        }
    }

    /// Refuses a second entry for the same peer, handing the participant back.
    pub(crate) fn register(&mut self, p: RemoteParticipant) -> Result<(), RemoteParticipant> {
        if self.entries.contains_key(&p.peer_id) {
            return Err(p);
        }
        self.entries.insert(p.peer_id.clone(), p);
        Ok(())
    }

    pub(crate) fn get(&self, peer_id: &str) -> Option<&RemoteParticipant> {
        self.entries.get(peer_id)
    }

    pub(crate) fn current_mut(&mut self, peer_id: &str, attempt: u64) -> Option<&mut RemoteParticipant> {
        self.entries
            .get_mut(peer_id)
            .filter(|p| p.attempt == attempt)
    }

    pub(crate) fn remove(&mut self, peer_id: &str) -> Option<RemoteParticipant> {
        self.entries.remove(peer_id)
    }

    pub(crate) fn remove_current(&mut self, peer_id: &str, attempt: u64) -> Option<RemoteParticipant> {
        match self.entries.get(peer_id) {
            Some(p) if p.attempt == attempt => self.entries.remove(peer_id),
            _ => None,
        }
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &RemoteParticipant> {
        self.entries.values()
    }

    /// Empties the table, pending dials included.
    pub(crate) fn drain(&mut self) -> Vec<RemoteParticipant> {
        self.pending.clear();
        self.entries.drain().map(|(_, p)| p).collect()
    }

    pub(crate) fn infos(&self) -> Vec<ParticipantInfo> {
        let mut out = self.entries.values().map(RemoteParticipant::info).collect::<Vec<_>>();
        out.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        out
    }

    pub(crate) fn pending_peers(&self) -> Vec<String> {
        let mut out = self.pending.keys().cloned().collect::<Vec<_>>();
        out.sort();
        out
    }
}
