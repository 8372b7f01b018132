/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - HUDDLE Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use serde::Serialize;

use crate::session::{ParticipantStatus, SessionSnapshot};

const LABEL_CHARS: usize = 8;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Tile {
    pub label: String,
    pub stream_id: String,
    pub local: bool,
    pub audio_muted: bool,
    pub video_off: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct VideoGrid {
    pub columns: usize,
    pub tiles: Vec<Tile>,
    pub status: String,
}

pub fn columns_for(tiles: usize) -> usize {
    match tiles {
        0 | 1 => 1,
        2 => 2,
        3 => 3,
        4 => 2,
        _ => 3,
    }
}

pub fn short_label(id: &str) -> String {
    if id.chars().count() <= LABEL_CHARS {
        return id.to_string();
    }
    let head: String = id.chars().take(LABEL_CHARS).collect();
    format!("{head}...")
}

pub fn status_line(participants: usize) -> String {
    if participants == 1 {
        "1 participant".to_string()
    } else {
        format!("{participants} participants")
    }
}

/// One tile for local media plus one per remote participant with a stream.
pub fn grid(snapshot: &SessionSnapshot) -> VideoGrid {
    let mut tiles = Vec::new();
    if let Some(stream_id) = &snapshot.local_stream_id {
        tiles.push(Tile {
            label: "You".to_string(),
            stream_id: stream_id.clone(),
            local: true,
            audio_muted: !snapshot.audio_enabled,
            video_off: !snapshot.video_enabled,
        });
    }
    for p in &snapshot.participants {
        if p.status != ParticipantStatus::Connected {
            continue;
        }
        let Some(stream_id) = &p.stream_id else {
            continue;
        };
        let name = p.user_id.as_deref().unwrap_or(&p.peer_id);
        tiles.push(Tile {
            label: short_label(name),
            stream_id: stream_id.clone(),
            local: false,
            audio_muted: false,
            video_off: false,
        });
    }
    VideoGrid {
        columns: columns_for(tiles.len()),
        status: status_line(tiles.len()),
        tiles,
    }
}

impl VideoGrid {
    /// Plain-text rendering, one row per line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for row in self.tiles.chunks(self.columns.max(1)) {
            let cells = row
                .iter()
                .map(|t| format!("[{:^12}]", t.label))
                .collect::<Vec<_>>();
            out.push_str(&cells.join(" "));
            out.push('\n');
        }
        out.push_str(&self.status);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::VideoSource;
    use crate::session::{CallDirection, ParticipantInfo, SessionState};

    fn snapshot(remotes: usize) -> SessionSnapshot {
        SessionSnapshot {
            state: SessionState::Active,
            local_peer_id: Some("local".to_string()),
            local_stream_id: Some("stream-local".to_string()),
            audio_enabled: false,
            video_enabled: true,
            video_source: VideoSource::Camera,
            participants: (0..remotes)
                .map(|i| ParticipantInfo {
                    peer_id: format!("0123456789abcdef{i}"),
                    user_id: None,
                    status: ParticipantStatus::Connected,
                    direction: CallDirection::Inbound,
                    stream_id: Some(format!("stream-{i}")),
                })
                .collect(),
            pending_dials: Vec::new(),
            roster: Vec::new(),
            signaling_connected: true,
        }
    }

    #[test]
    fn columns_follow_tile_count() {
        let got = (1..=7).map(columns_for).collect::<Vec<_>>();
        assert_eq!(got, vec![1, 2, 3, 2, 3, 3, 3]);
    }

    #[test]
    fn labels_are_truncated() {
        assert_eq!(short_label("alice"), "alice");
        assert_eq!(short_label("12345678"), "12345678");
        assert_eq!(short_label("0123456789abcdef"), "01234567...");
    }

    #[test]
    fn grid_has_local_tile_first() {
        let g = grid(&snapshot(3));
        assert_eq!(g.tiles.len(), 4);
        assert_eq!(g.columns, 2);
        assert!(g.tiles[0].local);
        assert_eq!(g.tiles[0].label, "You");
        assert!(g.tiles[0].audio_muted);
        assert_eq!(g.tiles[1].label, "01234567...");
        assert_eq!(g.status, "4 participants");
    }

    #[test]
    fn connecting_peers_have_no_tile() {
        let mut s = snapshot(2);
        s.participants[1].status = ParticipantStatus::Connecting;
        let g = grid(&s);
        assert_eq!(g.tiles.len(), 2);
        assert_eq!(g.render().lines().count(), 2);
    }

    #[test]
    fn idle_grid_is_empty() {
        let mut s = snapshot(0);
        s.local_stream_id = None;
        let g = grid(&s);
        assert!(g.tiles.is_empty());
        assert_eq!(g.status, "0 participants");
    }
}
