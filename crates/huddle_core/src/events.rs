/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - HUDDLE Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use serde::Serialize;

use crate::media::VideoSource;
use crate::session::SessionState;

pub(crate) fn now_ms_u64() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaveReason {
    /// The call closed from either side.
    Closed,
    /// The relay reported the peer gone.
    PeerLeft,
    Failed,
    TimedOut,
    /// Dropped in favour of the remote's own call during a simultaneous dial.
    Superseded,
    /// The call could not take the new video source in place.
    SourceSwitchUnsupported,
    CallEnded,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionEventKind {
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    ParticipantConnected {
        peer_id: String,
        stream_id: String,
    },
    ParticipantLeft {
        peer_id: String,
        reason: LeaveReason,
    },
    PeerConnectionFailed {
        peer_id: String,
        reason: String,
    },
    SignalingLost {
        reason: String,
    },
    SignalingRestored,
    RosterUpdated {
        members: usize,
    },
    VideoSourceChanged {
        source: VideoSource,
    },
}

#[derive(Clone, Debug, Serialize)]
pub struct SessionEvent {
    #[serde(flatten)]
    pub kind: SessionEventKind,
    pub ts_ms: u64,
}

impl SessionEvent {
    pub fn new(kind: SessionEventKind) -> Self {
        Self {
            kind,
            ts_ms: now_ms_u64(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_flat() {
        let ev = SessionEvent::new(SessionEventKind::ParticipantLeft {
            peer_id: "p1".to_string(),
            reason: LeaveReason::Superseded,
        });
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["kind"], "participant_left");
        assert_eq!(v["peer_id"], "p1");
        assert_eq!(v["reason"], "superseded");
        assert!(v["ts_ms"].as_u64().unwrap() > 0);
    }
}
