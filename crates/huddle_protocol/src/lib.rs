/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - HUDDLE Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use serde::{Deserialize, Serialize};

/// Events a client emits on the workspace channel.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    #[serde(rename_all = "camelCase")]
    JoinWorkspace { workspace_id: String },
    #[serde(rename_all = "camelCase")]
    PeerJoined {
        workspace_id: String,
        peer_id: String,
    },
    #[serde(rename_all = "camelCase")]
    PeerLeft {
        workspace_id: String,
        peer_id: String,
    },
}

/// Events the relay fans out to the members of a workspace.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    #[serde(rename_all = "camelCase")]
    PeerJoined { peer_id: String, user_id: String },
    #[serde(rename_all = "camelCase")]
    PeerLeft { peer_id: String },
    #[serde(rename_all = "camelCase")]
    ParticipantsList {
        #[serde(default)]
        participants: Vec<ParticipantEntry>,
    },
    #[serde(rename_all = "camelCase")]
    PresenceUpdate { user_id: String, status: String },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantEntry {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<String>,
}

pub const PRESENCE_ONLINE: &str = "online";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_events_use_relay_names() {
        let ev = ClientEvent::PeerJoined {
            workspace_id: "ws1".to_string(),
            peer_id: "p1".to_string(),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "event": "peer_joined",
                "data": { "workspaceId": "ws1", "peerId": "p1" }
            })
        );
    }

    #[test]
    fn participants_list_tolerates_missing_fields() {
        let raw = r#"{"event":"participants_list","data":{"participants":[{"userId":"u1"},{"userId":"u2","peerId":"p2"}]}}"#;
        let ev: ServerEvent = serde_json::from_str(raw).unwrap();
        let ServerEvent::ParticipantsList { participants } = ev else {
            panic!("unexpected event");
        };
        assert_eq!(participants.len(), 2);
        assert_eq!(participants[0].peer_id, None);
        assert_eq!(participants[1].peer_id.as_deref(), Some("p2"));
    }

    #[test]
    fn unknown_event_is_an_error() {
        let raw = r#"{"event":"whiteboard_draw","data":{}}"#;
        assert!(serde_json::from_str::<ServerEvent>(raw).is_err());
    }
}
