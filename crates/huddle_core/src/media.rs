/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - HUDDLE Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Local capture ownership.
//!
//! Tracks behave like browser tracks: cloning a [`MediaStream`] or a
//! [`MediaTrack`] hands out another reference to the same underlying track, so
//! muting through one reference is visible to every call holding the stream.
//! Only [`LocalMedia`] stops tracks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::error::CallResult;

static MEDIA_SEQ: AtomicU64 = AtomicU64::new(1);

fn next_media_id(prefix: &str) -> String {
    format!("{prefix}-{}", MEDIA_SEQ.fetch_add(1, Ordering::Relaxed))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug)]
struct TrackInner {
    id: String,
    kind: TrackKind,
    label: String,
    enabled: AtomicBool,
    live: AtomicBool,
}

#[derive(Clone, Debug)]
pub struct MediaTrack {
    inner: Arc<TrackInner>,
}

impl MediaTrack {
    pub fn new(kind: TrackKind, label: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(TrackInner {
                id: next_media_id("track"),
                kind,
                label: label.into(),
                enabled: AtomicBool::new(true),
                live: AtomicBool::new(true),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> TrackKind {
        self.inner.kind
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Relaxed)
    }

    pub fn is_live(&self) -> bool {
        self.inner.live.load(Ordering::Acquire)
    }

    pub fn same_track(&self, other: &MediaTrack) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Returns true only for the call that actually ended the track.
    pub(crate) fn stop(&self) -> bool {
        self.inner.live.swap(false, Ordering::AcqRel)
    }
}

#[derive(Clone, Debug)]
pub struct MediaStream {
    id: String,
    tracks: Vec<MediaTrack>,
}

impl MediaStream {
    pub fn new(tracks: Vec<MediaTrack>) -> Self {
        Self {
            id: next_media_id("stream"),
            tracks,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn audio_tracks(&self) -> impl Iterator<Item = &MediaTrack> {
        self.tracks.iter().filter(|t| t.kind() == TrackKind::Audio)
    }

    pub fn video_tracks(&self) -> impl Iterator<Item = &MediaTrack> {
        self.tracks.iter().filter(|t| t.kind() == TrackKind::Video)
    }

    pub fn is_live(&self) -> bool {
        self.tracks.iter().any(MediaTrack::is_live)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoConstraints {
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaConstraints {
    #[serde(default = "default_true")]
    pub audio: bool,
    #[serde(default = "default_video")]
    pub video: Option<VideoConstraints>,
}

fn default_true() -> bool {
    true
}

fn default_video() -> Option<VideoConstraints> {
    Some(VideoConstraints::default())
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: default_video(),
        }
    }
}

/// Capture backend: camera, microphone and display.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Fails with `DeviceUnavailable` when permission is denied or the
    /// hardware is busy.
    async fn acquire(&self, constraints: &MediaConstraints) -> CallResult<MediaStream>;

    async fn acquire_display(&self) -> CallResult<MediaStream>;

    /// Called exactly once per track when it is stopped.
    fn on_track_stopped(&self, _track: &MediaTrack) {}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoSource {
    Camera,
    Screen,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProbeReport {
    pub audio_tracks: Vec<String>,
    pub video_tracks: Vec<String>,
}

#[derive(Clone)]
pub struct LocalMedia {
    devices: Arc<dyn MediaDevices>,
    constraints: MediaConstraints,
}

impl LocalMedia {
    pub fn new(devices: Arc<dyn MediaDevices>, constraints: MediaConstraints) -> Self {
        Self {
            devices,
            constraints,
        }
    }

    pub async fn acquire(&self) -> CallResult<MediaStream> {
        let stream = self.devices.acquire(&self.constraints).await?;
        debug!(stream=%stream.id(), tracks=stream.tracks().len(), "local media acquired");
        Ok(stream)
    }

    pub async fn acquire_display(&self) -> CallResult<MediaStream> {
        self.devices.acquire_display().await
    }

    /// Stops every track of a locally captured stream. Safe to repeat.
    pub fn release(&self, stream: &MediaStream) {
        for track in stream.tracks() {
            self.release_track(track);
        }
    }

    pub fn release_track(&self, track: &MediaTrack) {
        if track.stop() {
            self.devices.on_track_stopped(track);
        }
    }

    /// Stops the tracks of a stream received from a remote peer.
    pub fn release_remote(&self, stream: &MediaStream) {
        for track in stream.tracks() {
            track.stop();
        }
    }

    /// Mutes in place; no renegotiation.
    pub fn set_audio_enabled(&self, stream: &MediaStream, enabled: bool) {
        for track in stream.audio_tracks() {
            track.set_enabled(enabled);
        }
    }

    pub fn set_video_enabled(&self, stream: &MediaStream, enabled: bool) {
        for track in stream.video_tracks() {
            track.set_enabled(enabled);
        }
    }

    /// Puts `replacement` in place of the stream's video tracks and stops the
    /// old ones.
    pub fn swap_video_track(&self, stream: &mut MediaStream, replacement: MediaTrack, enabled: bool) {
        replacement.set_enabled(enabled);
        let (old, mut kept): (Vec<_>, Vec<_>) = stream
            .tracks
            .drain(..)
            .partition(|t| t.kind() == TrackKind::Video);
        kept.push(replacement);
        stream.tracks = kept;
        for track in old {
            if track.stop() {
                self.devices.on_track_stopped(&track);
            }
        }
    }

    /// Camera test: capture with the configured constraints and release
    /// immediately.
    pub async fn probe(&self) -> CallResult<ProbeReport> {
        let stream = self.acquire().await?;
        let report = ProbeReport {
            audio_tracks: stream.audio_tracks().map(|t| t.label().to_string()).collect(),
            video_tracks: stream.video_tracks().map(|t| t.label().to_string()).collect(),
        };
        self.release(&stream);
        Ok(report)
    }
}
