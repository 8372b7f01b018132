/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - HUDDLE Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! In-process stand-ins for the relay, the peer-to-peer transport and the
//! capture devices. Used by the tests and the development binary.

use async_trait::async_trait;
use rand::RngCore as _;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::debug;

use crate::error::{CallError, CallResult};
use crate::media::{MediaConstraints, MediaDevices, MediaStream, MediaTrack, TrackKind};
use crate::signaling::{ParticipantEntry, Signaling, SignalingEvent};
use crate::transport::{BoxedCall, CallEvent, CallHandle, OpenedTransport, Transport};

fn guard<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

fn random_peer_id() -> String {
    let mut b = [0u8; 8];
    rand::rngs::OsRng.fill_bytes(&mut b);
    b.iter().map(|v| format!("{v:02x}")).collect()
}

/// Holds async operations until released.
#[derive(Clone)]
pub struct Gate {
    open: Arc<watch::Sender<bool>>,
}

impl Gate {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(true);
        Self { open: Arc::new(tx) }
    }

    pub fn hold(&self) {
        self.open.send_replace(false);
    }

    pub fn release(&self) {
        self.open.send_replace(true);
    }

    async fn pass(&self) {
        let mut rx = self.open.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

struct Member {
    id: u64,
    workspace_id: String,
    user_id: String,
    tx: broadcast::Sender<SignalingEvent>,
    presence: Option<String>,
    online: bool,
    closed: bool,
}

struct Link {
    caller: String,
    callee: String,
    caller_stream: MediaStream,
    /// Copies handed to each side as "remote" media.
    delivered: Vec<MediaStream>,
    answered: bool,
    closed: bool,
    to_caller: mpsc::UnboundedSender<CallEvent>,
    to_callee: mpsc::UnboundedSender<CallEvent>,
}

impl Link {
    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.to_caller.send(CallEvent::Closed);
        let _ = self.to_callee.send(CallEvent::Closed);
    }

    fn joins(&self, a: &str, b: &str) -> bool {
        (self.caller == a && self.callee == b) || (self.caller == b && self.callee == a)
    }
}

#[derive(Default)]
struct NetInner {
    members: Vec<Member>,
    next_member: u64,
    peers: HashMap<String, mpsc::UnboundedSender<BoxedCall>>,
    unreachable: HashSet<String>,
    links: Vec<Arc<Mutex<Link>>>,
    dials: u64,
    announcements: u64,
    replaced_tracks: u64,
}

struct NetFlags {
    fail_open: AtomicBool,
    replace_supported: AtomicBool,
    silent_answers: AtomicBool,
}

/// One relay plus one rendezvous service shared by every member created from
/// it.
#[derive(Clone)]
pub struct MemoryNetwork {
    inner: Arc<Mutex<NetInner>>,
    flags: Arc<NetFlags>,
    dial_gate: Gate,
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(NetInner::default())),
            flags: Arc::new(NetFlags {
                fail_open: AtomicBool::new(false),
                replace_supported: AtomicBool::new(true),
                silent_answers: AtomicBool::new(false),
            }),
            dial_gate: Gate::new(),
        }
    }

    pub fn signaling(&self, workspace_id: &str, user_id: &str) -> MemorySignaling {
        let (tx, _) = broadcast::channel(128);
        let mut g = guard(&self.inner);
        g.next_member += 1;
        let id = g.next_member;
        g.members.push(Member {
            id,
            workspace_id: workspace_id.to_string(),
            user_id: user_id.to_string(),
            tx: tx.clone(),
            presence: None,
            online: true,
            closed: false,
        });
        MemorySignaling {
            net: self.clone(),
            member: id,
            workspace_id: workspace_id.to_string(),
            tx,
        }
    }

    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport {
            net: self.clone(),
            peer_id: Mutex::new(None),
        }
    }

    /// Dials wait until `release_dials`.
    pub fn hold_dials(&self) {
        self.dial_gate.hold();
    }

    pub fn release_dials(&self) {
        self.dial_gate.release();
    }

    pub fn fail_open(&self, fail: bool) {
        self.flags.fail_open.store(fail, Ordering::Relaxed);
    }

    pub fn set_replace_supported(&self, supported: bool) {
        self.flags.replace_supported.store(supported, Ordering::Relaxed);
    }

    /// Answered calls never deliver media.
    pub fn set_silent_answers(&self, silent: bool) {
        self.flags.silent_answers.store(silent, Ordering::Relaxed);
    }

    pub fn set_unreachable(&self, peer_id: &str) {
        guard(&self.inner).unreachable.insert(peer_id.to_string());
    }

    /// Closes the call between two peers from the network side.
    pub fn drop_link(&self, a: &str, b: &str) -> bool {
        let links = guard(&self.inner).links.clone();
        let mut dropped = false;
        for link in links {
            let mut l = guard(&link);
            if l.joins(a, b) && !l.closed {
                l.close();
                dropped = true;
            }
        }
        dropped
    }

    pub fn open_calls(&self) -> usize {
        let g = guard(&self.inner);
        let open = g.links.iter().filter(|l| !guard(l).closed).count();
        open
    }

    /// Calls between `a` and `b` that are answered and still open.
    pub fn live_calls_between(&self, a: &str, b: &str) -> usize {
        let g = guard(&self.inner);
        let live = g
            .links
            .iter()
            .filter(|l| {
                let l = guard(l);
                l.joins(a, b) && l.answered && !l.closed
            })
            .count();
        live
    }

    /// Remote copies of media still playing anywhere in the network.
    pub fn live_remote_streams(&self) -> usize {
        let g = guard(&self.inner);
        let live = g
            .links
            .iter()
            .map(|l| guard(l).delivered.iter().filter(|s| s.is_live()).count())
            .sum();
        live
    }

    pub fn dial_count(&self) -> u64 {
        guard(&self.inner).dials
    }

    pub fn announcements(&self) -> u64 {
        guard(&self.inner).announcements
    }

    pub fn replaced_tracks(&self) -> u64 {
        guard(&self.inner).replaced_tracks
    }

    fn fan_out(g: &NetInner, from: u64, workspace_id: &str, ev: SignalingEvent) {
        for m in &g.members {
            if m.id != from && m.workspace_id == workspace_id && m.online && !m.closed {
                let _ = m.tx.send(ev.clone());
            }
        }
    }

    fn publish_roster(g: &NetInner, workspace_id: &str) {
        let roster = g
            .members
            .iter()
            .filter(|m| m.workspace_id == workspace_id && !m.closed)
            .map(|m| ParticipantEntry {
                user_id: m.user_id.clone(),
                peer_id: m.presence.clone(),
            })
            .collect::<Vec<_>>();
        for m in &g.members {
            if m.workspace_id == workspace_id && m.online && !m.closed {
                let _ = m.tx.send(SignalingEvent::Roster(roster.clone()));
            }
        }
    }
}

pub struct MemorySignaling {
    net: MemoryNetwork,
    member: u64,
    workspace_id: String,
    tx: broadcast::Sender<SignalingEvent>,
}

impl MemorySignaling {
    /// Simulates losing (`false`) or regaining (`true`) the relay link. On
    /// regain the current presence is replayed to the workspace.
    pub fn set_online(&self, online: bool) {
        let mut g = guard(&self.net.inner);
        let Some(idx) = g.members.iter().position(|m| m.id == self.member) else {
            return;
        };
        if g.members[idx].closed || g.members[idx].online == online {
            return;
        }
        g.members[idx].online = online;
        if !online {
            let _ = self.tx.send(SignalingEvent::Disconnected {
                reason: "simulated outage".to_string(),
            });
            return;
        }
        let _ = self.tx.send(SignalingEvent::Reconnected);
        if let Some(peer_id) = g.members[idx].presence.clone() {
            let user_id = g.members[idx].user_id.clone();
            MemoryNetwork::fan_out(
                &g,
                self.member,
                &self.workspace_id,
                SignalingEvent::PeerJoined { peer_id, user_id },
            );
        }
    }

    /// Feeds an event to this member as if the relay had sent it.
    pub fn deliver(&self, ev: SignalingEvent) {
        let _ = self.tx.send(ev);
    }
}

impl Signaling for MemorySignaling {
    fn workspace_id(&self) -> &str {
        &self.workspace_id
    }

    fn announce(&self, peer_id: &str) -> CallResult<()> {
        let mut g = guard(&self.net.inner);
        let Some(idx) = g.members.iter().position(|m| m.id == self.member && !m.closed) else {
            return Err(CallError::SignalingDisconnected("member left".to_string()));
        };
        g.announcements += 1;
        g.members[idx].presence = Some(peer_id.to_string());
        if !g.members[idx].online {
            return Ok(());
        }
        let user_id = g.members[idx].user_id.clone();
        MemoryNetwork::fan_out(
            &g,
            self.member,
            &self.workspace_id,
            SignalingEvent::PeerJoined {
                peer_id: peer_id.to_string(),
                user_id,
            },
        );
        MemoryNetwork::publish_roster(&g, &self.workspace_id);
        Ok(())
    }

    fn depart(&self, peer_id: &str) -> CallResult<()> {
        let mut g = guard(&self.net.inner);
        let Some(idx) = g.members.iter().position(|m| m.id == self.member && !m.closed) else {
            return Err(CallError::SignalingDisconnected("member left".to_string()));
        };
        if g.members[idx].presence.as_deref() == Some(peer_id) {
            g.members[idx].presence = None;
        }
        if g.members[idx].online {
            MemoryNetwork::fan_out(
                &g,
                self.member,
                &self.workspace_id,
                SignalingEvent::PeerLeft {
                    peer_id: peer_id.to_string(),
                },
            );
            MemoryNetwork::publish_roster(&g, &self.workspace_id);
        }
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<SignalingEvent> {
        self.tx.subscribe()
    }

    fn disconnect(&self) {
        let mut g = guard(&self.net.inner);
        let Some(idx) = g.members.iter().position(|m| m.id == self.member && !m.closed) else {
            return;
        };
        g.members[idx].closed = true;
        if let Some(peer_id) = g.members[idx].presence.take() {
            MemoryNetwork::fan_out(
                &g,
                self.member,
                &self.workspace_id,
                SignalingEvent::PeerLeft { peer_id },
            );
        }
        MemoryNetwork::publish_roster(&g, &self.workspace_id);
    }
}

pub struct MemoryTransport {
    net: MemoryNetwork,
    peer_id: Mutex<Option<String>>,
}

impl MemoryTransport {
    pub fn peer_id(&self) -> Option<String> {
        guard(&self.peer_id).clone()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self) -> CallResult<OpenedTransport> {
        if self.net.flags.fail_open.load(Ordering::Relaxed) {
            return Err(CallError::TransportUnavailable(
                "rendezvous service unreachable".to_string(),
            ));
        }
        let peer_id = random_peer_id();
        let (tx, incoming) = mpsc::unbounded_channel();
        {
            let mut g = guard(&self.net.inner);
            if let Some(old) = guard(&self.peer_id).replace(peer_id.clone()) {
                g.peers.remove(&old);
            }
            g.peers.insert(peer_id.clone(), tx);
        }
        debug!(peer=%peer_id, "memory transport open");
        Ok(OpenedTransport { peer_id, incoming })
    }

    async fn dial(&self, remote_peer_id: &str, local: MediaStream) -> CallResult<BoxedCall> {
        self.net.dial_gate.pass().await;
        let Some(caller) = self.peer_id() else {
            return Err(CallError::TransportUnavailable("transport not open".to_string()));
        };

        let mut g = guard(&self.net.inner);
        g.dials += 1;
        if g.unreachable.contains(remote_peer_id) {
            return Err(CallError::peer(remote_peer_id, "peer unreachable"));
        }
        let Some(remote_tx) = g.peers.get(remote_peer_id).cloned() else {
            return Err(CallError::peer(remote_peer_id, "unknown peer"));
        };

        let (to_caller, caller_rx) = mpsc::unbounded_channel();
        let (to_callee, callee_rx) = mpsc::unbounded_channel();
        let link = Arc::new(Mutex::new(Link {
            caller: caller.clone(),
            callee: remote_peer_id.to_string(),
            caller_stream: local,
            delivered: Vec::new(),
            answered: false,
            closed: false,
            to_caller,
            to_callee,
        }));

        let inbound = MemoryCall {
            link: link.clone(),
            flags: self.net.flags.clone(),
            net: self.net.inner.clone(),
            remote: caller,
            callee_side: true,
            events: Some(callee_rx),
        };
        if remote_tx.send(Box::new(inbound)).is_err() {
            return Err(CallError::peer(remote_peer_id, "peer went away"));
        }
        g.links.push(link.clone());

        Ok(Box::new(MemoryCall {
            link,
            flags: self.net.flags.clone(),
            net: self.net.inner.clone(),
            remote: remote_peer_id.to_string(),
            callee_side: false,
            events: Some(caller_rx),
        }))
    }

    async fn close(&self) {
        let Some(peer_id) = guard(&self.peer_id).take() else {
            return;
        };
        let links = {
            let mut g = guard(&self.net.inner);
            g.peers.remove(&peer_id);
            g.links.clone()
        };
        for link in links {
            let mut l = guard(&link);
            if l.caller == peer_id || l.callee == peer_id {
                l.close();
            }
        }
    }
}

fn remote_copy(stream: &MediaStream) -> MediaStream {
    MediaStream::new(
        stream
            .tracks()
            .iter()
            .map(|t| MediaTrack::new(t.kind(), format!("remote {}", t.label())))
            .collect(),
    )
}

pub struct MemoryCall {
    link: Arc<Mutex<Link>>,
    flags: Arc<NetFlags>,
    net: Arc<Mutex<NetInner>>,
    remote: String,
    callee_side: bool,
    events: Option<mpsc::UnboundedReceiver<CallEvent>>,
}

impl CallHandle for MemoryCall {
    fn remote_peer_id(&self) -> &str {
        &self.remote
    }

    fn answer(&mut self, local: MediaStream) -> CallResult<()> {
        if !self.callee_side {
            return Err(CallError::peer(&self.remote, "outbound calls cannot be answered"));
        }
        let mut l = guard(&self.link);
        if l.closed {
            return Err(CallError::peer(&self.remote, "caller hung up"));
        }
        if l.answered {
            return Err(CallError::peer(&self.remote, "already answered"));
        }
        l.answered = true;
        if self.flags.silent_answers.load(Ordering::Relaxed) {
            return Ok(());
        }
        let for_caller = remote_copy(&local);
        let for_callee = remote_copy(&l.caller_stream);
        l.delivered.push(for_caller.clone());
        l.delivered.push(for_callee.clone());
        let _ = l.to_caller.send(CallEvent::Stream(for_caller));
        let _ = l.to_callee.send(CallEvent::Stream(for_callee));
        Ok(())
    }

    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<CallEvent>> {
        self.events.take()
    }

    fn replace_video_track(&self, track: &MediaTrack) -> CallResult<bool> {
        if !self.flags.replace_supported.load(Ordering::Relaxed) {
            return Ok(false);
        }
        if track.kind() != TrackKind::Video {
            return Err(CallError::peer(&self.remote, "not a video track"));
        }
        if guard(&self.link).closed {
            return Err(CallError::peer(&self.remote, "call closed"));
        }
        guard(&self.net).replaced_tracks += 1;
        Ok(true)
    }

    fn close(&self) {
        guard(&self.link).close();
    }
}

/// Camera, microphone and screen that always exist unless told otherwise.
pub struct MemoryDevices {
    gate: Gate,
    deny_camera: AtomicBool,
    deny_display: AtomicBool,
    tracks: Mutex<Vec<MediaTrack>>,
    acquisitions: AtomicU64,
    stopped: AtomicU64,
}

impl Default for MemoryDevices {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDevices {
    pub fn new() -> Self {
        Self {
            gate: Gate::new(),
            deny_camera: AtomicBool::new(false),
            deny_display: AtomicBool::new(false),
            tracks: Mutex::new(Vec::new()),
            acquisitions: AtomicU64::new(0),
            stopped: AtomicU64::new(0),
        }
    }

    pub fn deny_camera(&self, deny: bool) {
        self.deny_camera.store(deny, Ordering::Relaxed);
    }

    pub fn deny_display(&self, deny: bool) {
        self.deny_display.store(deny, Ordering::Relaxed);
    }

    /// Acquisitions wait until `resume_acquire`.
    pub fn hold_acquire(&self) {
        self.gate.hold();
    }

    pub fn resume_acquire(&self) {
        self.gate.release();
    }

    pub fn tracks(&self) -> Vec<MediaTrack> {
        guard(&self.tracks).clone()
    }

    pub fn live_tracks(&self) -> usize {
        guard(&self.tracks).iter().filter(|t| t.is_live()).count()
    }

    pub fn stopped_tracks(&self) -> u64 {
        self.stopped.load(Ordering::Relaxed)
    }

    pub fn acquisitions(&self) -> u64 {
        self.acquisitions.load(Ordering::Relaxed)
    }

    fn capture(&self, tracks: Vec<MediaTrack>) -> MediaStream {
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        guard(&self.tracks).extend(tracks.iter().cloned());
        MediaStream::new(tracks)
    }
}

#[async_trait]
impl MediaDevices for MemoryDevices {
    async fn acquire(&self, constraints: &MediaConstraints) -> CallResult<MediaStream> {
        self.gate.pass().await;
        if self.deny_camera.load(Ordering::Relaxed) {
            return Err(CallError::DeviceUnavailable("permission denied".to_string()));
        }
        let mut tracks = Vec::new();
        if constraints.audio {
            tracks.push(MediaTrack::new(TrackKind::Audio, "memory microphone"));
        }
        if let Some(video) = &constraints.video {
            let label = match (video.width, video.height) {
                (Some(w), Some(h)) => format!("memory camera {w}x{h}"),
                _ => "memory camera".to_string(),
            };
            tracks.push(MediaTrack::new(TrackKind::Video, label));
        }
        if tracks.is_empty() {
            return Err(CallError::DeviceUnavailable("no tracks requested".to_string()));
        }
        Ok(self.capture(tracks))
    }

    async fn acquire_display(&self) -> CallResult<MediaStream> {
        self.gate.pass().await;
        if self.deny_display.load(Ordering::Relaxed) {
            return Err(CallError::DeviceUnavailable("screen capture denied".to_string()));
        }
        Ok(self.capture(vec![MediaTrack::new(TrackKind::Video, "memory screen")]))
    }

    fn on_track_stopped(&self, _track: &MediaTrack) {
        self.stopped.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream() -> MediaStream {
        MediaStream::new(vec![
            MediaTrack::new(TrackKind::Audio, "mic"),
            MediaTrack::new(TrackKind::Video, "cam"),
        ])
    }

    #[tokio::test]
    async fn answered_call_delivers_media_both_ways() {
        let net = MemoryNetwork::new();
        let a = net.transport();
        let b = net.transport();
        let _a_open = a.open().await.unwrap();
        let mut b_open = b.open().await.unwrap();

        let mut outbound = a.dial(&b_open.peer_id, stream()).await.unwrap();
        let mut inbound = b_open.incoming.recv().await.unwrap();
        assert_eq!(inbound.remote_peer_id(), a.peer_id().unwrap());

        inbound.answer(stream()).unwrap();
        let mut a_events = outbound.take_events().unwrap();
        let mut b_events = inbound.take_events().unwrap();
        assert!(matches!(a_events.recv().await, Some(CallEvent::Stream(_))));
        assert!(matches!(b_events.recv().await, Some(CallEvent::Stream(_))));
        assert_eq!(net.open_calls(), 1);

        outbound.close();
        inbound.close();
        assert!(matches!(a_events.recv().await, Some(CallEvent::Closed)));
        assert!(matches!(b_events.recv().await, Some(CallEvent::Closed)));
        assert!(a_events.try_recv().is_err());
        assert_eq!(net.open_calls(), 0);
    }

    #[tokio::test]
    async fn dialing_an_unknown_peer_fails() {
        let net = MemoryNetwork::new();
        let a = net.transport();
        a.open().await.unwrap();
        let err = a.dial("nobody", stream()).await.err().unwrap();
        assert!(matches!(err, CallError::PeerConnectionFailed { .. }));
    }

    #[tokio::test]
    async fn relay_skips_the_sender() {
        let net = MemoryNetwork::new();
        let a = net.signaling("w", "alice");
        let b = net.signaling("w", "bob");
        let other = net.signaling("elsewhere", "carol");
        let mut a_rx = a.events();
        let mut b_rx = b.events();
        let mut other_rx = other.events();

        a.announce("pa").unwrap();
        assert_eq!(
            b_rx.recv().await.unwrap(),
            SignalingEvent::PeerJoined {
                peer_id: "pa".to_string(),
                user_id: "alice".to_string()
            }
        );
        assert!(matches!(a_rx.recv().await.unwrap(), SignalingEvent::Roster(_)));
        assert!(other_rx.try_recv().is_err());

        a.disconnect();
        a.disconnect();
        assert!(a.announce("pa").is_err());
    }
}
