/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - HUDDLE Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::media::{MediaConstraints, VideoConstraints};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CallConfig {
    pub workspace_id: String,
    /// Local user id. Peers announced under the same user id (another tab or
    /// device of ours) are never dialed.
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub signaling: SignalingConfig,
    #[serde(default)]
    pub media: MediaConstraints,
    /// Upper bound for a dial plus the wait for the first remote stream.
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,
    /// Total call size including ourselves.
    #[serde(default)]
    pub max_participants: Option<usize>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignalingConfig {
    pub url: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub ping_secs: Option<u64>,
    #[serde(default)]
    pub reconnect_min_ms: Option<u64>,
    #[serde(default)]
    pub reconnect_max_ms: Option<u64>,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080/ws".to_string(),
            token: None,
            ping_secs: None,
            reconnect_min_ms: None,
            reconnect_max_ms: None,
        }
    }
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            workspace_id: "default".to_string(),
            user_id: None,
            signaling: SignalingConfig::default(),
            media: MediaConstraints::default(),
            connect_timeout_secs: None,
            max_participants: None,
        }
    }
}

impl CallConfig {
    pub fn new(workspace_id: impl Into<String>) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            ..Default::default()
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("parse call config json")
    }

    pub fn from_env() -> Result<Self> {
        Self::from_vars(|k| std::env::var(k).ok())
    }

    fn from_vars(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut cfg = CallConfig::default();
        if let Some(v) = get("HUDDLE_WORKSPACE") {
            cfg.workspace_id = v;
        }
        cfg.user_id = get("HUDDLE_USER")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        if let Some(v) = get("HUDDLE_SIGNALING_URL") {
            cfg.signaling.url = v;
        }
        cfg.signaling.token = get("HUDDLE_TOKEN")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        if let Some(v) = get("HUDDLE_CONNECT_TIMEOUT_SECS") {
            cfg.connect_timeout_secs = Some(v.parse().context("HUDDLE_CONNECT_TIMEOUT_SECS")?);
        }
        if let Some(v) = get("HUDDLE_MAX_PARTICIPANTS") {
            cfg.max_participants = Some(v.parse().context("HUDDLE_MAX_PARTICIPANTS")?);
        }
        if let Some(v) = get("HUDDLE_VIDEO") {
            cfg.media.video = match v.trim() {
                "off" | "0" | "false" => None,
                dims => Some(parse_dims(dims)?),
            };
        }
        Ok(cfg)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.unwrap_or(30).max(5).min(120))
    }

    /// Remote peers we are willing to hold at once.
    pub fn max_remote_peers(&self) -> usize {
        self.max_participants.unwrap_or(6).max(2).min(32) - 1
    }
}

impl SignalingConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_secs.unwrap_or(15).max(1).min(300))
    }

    pub fn reconnect_min(&self) -> Duration {
        Duration::from_millis(self.reconnect_min_ms.unwrap_or(250).max(10).min(10_000))
    }

    pub fn reconnect_max(&self) -> Duration {
        let max = self.reconnect_max_ms.unwrap_or(10_000).max(100).min(120_000);
        Duration::from_millis(max).max(self.reconnect_min())
    }
}

// "640x480", "640" or "on"
fn parse_dims(raw: &str) -> Result<VideoConstraints> {
    if raw.is_empty() || raw == "on" || raw == "1" || raw == "true" {
        return Ok(VideoConstraints::default());
    }
    let (w, h) = match raw.split_once('x') {
        Some((w, h)) => (w, Some(h)),
        None => (raw, None),
    };
    Ok(VideoConstraints {
        width: Some(w.trim().parse().context("video width")?),
        height: h.map(|h| h.trim().parse()).transpose().context("video height")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn tunables_are_clamped() {
        let mut cfg = CallConfig::new("ws");
        assert_eq!(cfg.connect_timeout(), Duration::from_secs(30));
        cfg.connect_timeout_secs = Some(1);
        assert_eq!(cfg.connect_timeout(), Duration::from_secs(5));
        cfg.connect_timeout_secs = Some(10_000);
        assert_eq!(cfg.connect_timeout(), Duration::from_secs(120));

        assert_eq!(cfg.max_remote_peers(), 5);
        cfg.max_participants = Some(1);
        assert_eq!(cfg.max_remote_peers(), 1);

        cfg.signaling.reconnect_min_ms = Some(5_000);
        cfg.signaling.reconnect_max_ms = Some(200);
        assert_eq!(cfg.signaling.reconnect_max(), Duration::from_secs(5));
    }

    #[test]
    fn env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("HUDDLE_WORKSPACE", "team-42"),
            ("HUDDLE_USER", " u7 "),
            ("HUDDLE_TOKEN", ""),
            ("HUDDLE_CONNECT_TIMEOUT_SECS", "12"),
            ("HUDDLE_VIDEO", "640x480"),
        ]
        .into_iter()
        .collect();
        let cfg = CallConfig::from_vars(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(cfg.workspace_id, "team-42");
        assert_eq!(cfg.user_id.as_deref(), Some("u7"));
        assert_eq!(cfg.signaling.token, None);
        assert_eq!(cfg.connect_timeout(), Duration::from_secs(12));
        let video = cfg.media.video.unwrap();
        assert_eq!((video.width, video.height), (Some(640), Some(480)));
    }

    #[test]
    fn bad_env_number_is_reported() {
        let err = CallConfig::from_vars(|k| {
            (k == "HUDDLE_MAX_PARTICIPANTS").then(|| "many".to_string())
        })
        .unwrap_err();
        assert!(format!("{err:#}").contains("HUDDLE_MAX_PARTICIPANTS"));
    }

    #[test]
    fn json_defaults() {
        let cfg = CallConfig::from_json_str(r#"{"workspace_id":"w1","signaling":{"url":"ws://relay/ws"}}"#)
            .unwrap();
        assert_eq!(cfg.workspace_id, "w1");
        assert!(cfg.media.audio);
        assert!(cfg.media.video.is_some());
        assert_eq!(cfg.signaling.url, "ws://relay/ws");
    }
}
