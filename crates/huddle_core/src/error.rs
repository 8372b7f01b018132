/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - HUDDLE Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use thiserror::Error;

use crate::session::SessionState;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CallError {
    /// Camera or microphone denied, missing or busy. The caller may retry.
    #[error("media device unavailable: {0}")]
    DeviceUnavailable(String),
    /// No usable network path to open a transport identity.
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),
    /// A single dial or accept failed; only that participant is affected.
    #[error("peer connection to {peer_id} failed: {reason}")]
    PeerConnectionFailed { peer_id: String, reason: String },
    /// Presence channel lost or refused.
    #[error("signaling disconnected: {0}")]
    SignalingDisconnected(String),
    #[error("operation not valid while session is {0}")]
    InvalidState(SessionState),
    #[error("call ended before it became active")]
    Cancelled,
    #[error("call session has shut down")]
    SessionClosed,
}

impl CallError {
    pub fn peer(peer_id: &str, reason: impl Into<String>) -> Self {
        Self::PeerConnectionFailed {
            peer_id: peer_id.to_string(),
            reason: reason.into(),
        }
    }

    /// Errors after which `start_call` may simply be retried.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::SessionClosed)
    }
}

pub type CallResult<T> = Result<T, CallError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_peer() {
        let err = CallError::peer("abc", "timed out");
        assert_eq!(err.to_string(), "peer connection to abc failed: timed out");
        assert!(err.is_recoverable());
        assert!(!CallError::SessionClosed.is_recoverable());
    }
}
