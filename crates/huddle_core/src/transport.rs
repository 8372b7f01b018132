/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - HUDDLE Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Peer-to-peer media transport seam.
//!
//! The transport owns connection establishment, codec negotiation and NAT
//! traversal. The session only needs an identity, a way to place and receive
//! calls, and the lifecycle of each call.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::CallResult;
use crate::media::{MediaStream, MediaTrack};

#[derive(Debug, Clone)]
pub enum CallEvent {
    /// Remote media arrived.
    Stream(MediaStream),
    /// Emitted at most once, never after the call is already closed.
    Closed,
    Error(String),
}

pub trait CallHandle: Send + Sync {
    fn remote_peer_id(&self) -> &str;

    /// Accepts an inbound call, sending `local` to the caller.
    fn answer(&mut self, local: MediaStream) -> CallResult<()>;

    /// Lifecycle events. Yields `Some` once; the session takes the receiver
    /// when it registers the call.
    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<CallEvent>>;

    /// Replaces the outgoing video track without renegotiating. `Ok(false)`
    /// means in-place replacement is not supported by this call.
    fn replace_video_track(&self, _track: &MediaTrack) -> CallResult<bool> {
        Ok(false)
    }

    fn close(&self);

    fn reject(&self) {
        self.close()
    }
}

pub type BoxedCall = Box<dyn CallHandle>;

pub struct OpenedTransport {
    /// Globally unique within the workspace for the life of the session.
    pub peer_id: String,
    pub incoming: mpsc::UnboundedReceiver<BoxedCall>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Fails with `TransportUnavailable` when no network path is usable.
    async fn open(&self) -> CallResult<OpenedTransport>;

    async fn dial(&self, remote_peer_id: &str, local: MediaStream) -> CallResult<BoxedCall>;

    async fn close(&self);
}
