/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - HUDDLE Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use super::participants::{
    CallDirection, ParticipantStatus, ParticipantTable, RemoteParticipant,
};
use super::{SessionDeps, SessionSnapshot, SessionState};
use crate::config::CallConfig;
use crate::error::{CallError, CallResult};
use crate::events::{LeaveReason, SessionEvent, SessionEventKind};
use crate::media::{LocalMedia, MediaStream, MediaTrack, VideoSource};
use crate::metrics::CallMetrics;
use crate::signaling::{ParticipantEntry, Signaling, SignalingEvent};
use crate::transport::{BoxedCall, CallEvent, OpenedTransport, Transport};

pub(crate) enum Command {
    Start(oneshot::Sender<CallResult<()>>),
    End(oneshot::Sender<()>),
    SetAudio {
        enabled: bool,
        reply: oneshot::Sender<CallResult<()>>,
    },
    SetVideo {
        enabled: bool,
        reply: oneshot::Sender<CallResult<()>>,
    },
    SwitchVideo {
        source: VideoSource,
        reply: oneshot::Sender<CallResult<()>>,
    },
    Snapshot(oneshot::Sender<SessionSnapshot>),
    Shutdown(oneshot::Sender<()>),
}

pub(crate) enum Msg {
    Command(Command),
    Signal(SignalingEvent),
    Incoming(BoxedCall),
    TransportOpened(CallResult<OpenedTransport>),
    MediaReady {
        generation: u64,
        result: CallResult<MediaStream>,
    },
    VideoReady {
        generation: u64,
        source: VideoSource,
        result: CallResult<MediaStream>,
        reply: oneshot::Sender<CallResult<()>>,
    },
    DialDone {
        generation: u64,
        attempt: u64,
        peer_id: String,
        /// Video track the call was dialed with.
        sent_video: Option<MediaTrack>,
        result: CallResult<BoxedCall>,
    },
    Call {
        peer_id: String,
        attempt: u64,
        event: CallEvent,
    },
    ConnectDeadline {
        peer_id: String,
        attempt: u64,
    },
}

enum Identity {
    Unopened,
    Opening,
    Open(String),
}

pub(crate) struct SessionActor {
    config: CallConfig,
    signaling: Arc<dyn Signaling>,
    transport: Arc<dyn Transport>,
    media: LocalMedia,
    tx: mpsc::UnboundedSender<Msg>,
    events: broadcast::Sender<SessionEvent>,
    metrics: Arc<CallMetrics>,

    state: SessionState,
    /// Bumped on every start and end; completions from older generations are
    /// released and dropped.
    generation: u64,
    next_attempt: u64,
    identity: Identity,
    local_stream: Option<MediaStream>,
    pending_start: Option<oneshot::Sender<CallResult<()>>>,
    announced: bool,
    audio_enabled: bool,
    video_enabled: bool,
    video_source: VideoSource,
    participants: ParticipantTable,
    roster: Vec<ParticipantEntry>,
    peer_users: HashMap<String, String>,
    signaling_connected: bool,
}

impl SessionActor {
    pub(crate) fn new(
        config: CallConfig,
        deps: SessionDeps,
        tx: mpsc::UnboundedSender<Msg>,
        events: broadcast::Sender<SessionEvent>,
        metrics: Arc<CallMetrics>,
    ) -> Self {
        let media = LocalMedia::new(deps.devices, config.media.clone());
        Self {
            config,
            signaling: deps.signaling,
            transport: deps.transport,
            media,
            tx,
            events,
            metrics,
            state: SessionState::Idle,
            generation: 0,
            next_attempt: 0,
            identity: Identity::Unopened,
            local_stream: None,
            pending_start: None,
            announced: false,
            audio_enabled: true,
            video_enabled: true,
            video_source: VideoSource::Camera,
            participants: ParticipantTable::default(),
            roster: Vec::new(),
            peer_users: HashMap::new(),
            signaling_connected: true,
        }
    }

    pub(crate) async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<Msg>,
        signal_rx: broadcast::Receiver<SignalingEvent>,
    ) {
        info!(workspace=%self.config.workspace_id, "call session started");
        self.forward_signaling(signal_rx);
        self.open_transport();

        while let Some(msg) = rx.recv().await {
            match msg {
                Msg::Command(Command::Shutdown(reply)) => {
                    self.shutdown().await;
                    let _ = reply.send(());
                    break;
                }
                msg => self.handle(msg),
            }
            self.metrics.participants_set(self.participants.connected());
        }
        debug!(workspace=%self.config.workspace_id, "call session stopped");
    }

    fn handle(&mut self, msg: Msg) {
        match msg {
            Msg::Command(cmd) => self.on_command(cmd),
            Msg::Signal(ev) => self.on_signal(ev),
            Msg::Incoming(call) => self.on_incoming(call),
            Msg::TransportOpened(result) => self.on_transport_opened(result),
            Msg::MediaReady { generation, result } => self.on_media_ready(generation, result),
            Msg::VideoReady {
                generation,
                source,
                result,
                reply,
            } => self.on_video_ready(generation, source, result, reply),
            Msg::DialDone {
                generation,
                attempt,
                peer_id,
                sent_video,
                result,
            } => self.on_dial_done(generation, attempt, peer_id, sent_video, result),
            Msg::Call {
                peer_id,
                attempt,
                event,
            } => self.on_call_event(peer_id, attempt, event),
            Msg::ConnectDeadline { peer_id, attempt } => self.on_deadline(peer_id, attempt),
        }
    }

    fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::Start(reply) => self.start(reply),
            Command::End(reply) => {
                self.end_call();
                let _ = reply.send(());
            }
            Command::SetAudio { enabled, reply } => {
                let res = match &self.local_stream {
                    Some(stream) => {
                        self.media.set_audio_enabled(stream, enabled);
                        self.audio_enabled = enabled;
                        Ok(())
                    }
                    None => Err(CallError::InvalidState(self.state)),
                };
                let _ = reply.send(res);
            }
            Command::SetVideo { enabled, reply } => {
                let res = match &self.local_stream {
                    Some(stream) => {
                        self.media.set_video_enabled(stream, enabled);
                        self.video_enabled = enabled;
                        Ok(())
                    }
                    None => Err(CallError::InvalidState(self.state)),
                };
                let _ = reply.send(res);
            }
            Command::SwitchVideo { source, reply } => self.switch_video(source, reply),
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            Command::Shutdown(reply) => {
                // Handled by the run loop.
                let _ = reply.send(());
            }
        }
    }

    fn forward_signaling(&self, mut signal_rx: broadcast::Receiver<SignalingEvent>) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            loop {
                match signal_rx.recv().await {
                    Ok(ev) => {
                        if tx.send(Msg::Signal(ev)).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "signaling events lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    fn open_transport(&mut self) {
        if !matches!(self.identity, Identity::Unopened) {
            return;
        }
        self.identity = Identity::Opening;
        let transport = self.transport.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = transport.open().await;
            let _ = tx.send(Msg::TransportOpened(result));
        });
    }

    fn on_transport_opened(&mut self, result: CallResult<OpenedTransport>) {
        match result {
            Ok(opened) => {
                info!(peer=%opened.peer_id, "transport identity open");
                self.identity = Identity::Open(opened.peer_id);
                let tx = self.tx.clone();
                let mut incoming = opened.incoming;
                tokio::spawn(async move {
                    while let Some(call) = incoming.recv().await {
                        if tx.send(Msg::Incoming(call)).is_err() {
                            break;
                        }
                    }
                });
                if self.state == SessionState::Joining && self.local_stream.is_some() {
                    self.activate();
                }
            }
            Err(e) => {
                warn!("transport open failed: {e}");
                self.identity = Identity::Unopened;
                if self.state == SessionState::Joining {
                    self.abort_join(e);
                }
            }
        }
    }

    fn start(&mut self, reply: oneshot::Sender<CallResult<()>>) {
        if self.state != SessionState::Idle {
            let _ = reply.send(Err(CallError::InvalidState(self.state)));
            return;
        }
        self.generation += 1;
        self.metrics.call_started();
        self.set_state(SessionState::Joining);
        self.pending_start = Some(reply);
        self.open_transport();

        let media = self.media.clone();
        let tx = self.tx.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            let result = media.acquire().await;
            let _ = tx.send(Msg::MediaReady { generation, result });
        });
    }

    fn on_media_ready(&mut self, generation: u64, result: CallResult<MediaStream>) {
        if generation != self.generation || self.state != SessionState::Joining {
            if let Ok(stream) = result {
                debug!(stream=%stream.id(), "releasing media captured for an abandoned join");
                self.media.release(&stream);
            }
            self.metrics.stale_discarded();
            return;
        }
        match result {
            Err(e) => self.abort_join(e),
            Ok(stream) => {
                self.local_stream = Some(stream);
                self.audio_enabled = true;
                self.video_enabled = true;
                self.video_source = VideoSource::Camera;
                if matches!(self.identity, Identity::Open(_)) {
                    self.activate();
                }
            }
        }
    }

    fn abort_join(&mut self, err: CallError) {
        warn!(%err, "call start failed");
        if let Some(stream) = self.local_stream.take() {
            self.media.release(&stream);
        }
        self.generation += 1;
        self.set_state(SessionState::Idle);
        if let Some(reply) = self.pending_start.take() {
            let _ = reply.send(Err(err));
        }
    }

    fn activate(&mut self) {
        let Identity::Open(peer_id) = &self.identity else {
            return;
        };
        // Relay trouble does not stop the call; we still accept calls from
        // peers that already know us.
        if let Err(e) = self.signaling.announce(peer_id) {
            warn!(peer=%peer_id, "presence announcement failed: {e}");
        }
        self.announced = true;
        self.set_state(SessionState::Active);
        if let Some(reply) = self.pending_start.take() {
            let _ = reply.send(Ok(()));
        }
    }

    fn end_call(&mut self) {
        if self.state == SessionState::Idle {
            return;
        }
        info!(state=%self.state, "ending call");
        self.generation += 1;

        for p in self.participants.drain() {
            self.retire(p, LeaveReason::CallEnded);
        }
        if let Some(stream) = self.local_stream.take() {
            self.media.release(&stream);
        }
        if self.announced {
            self.announced = false;
            if let Identity::Open(peer_id) = &self.identity {
                if let Err(e) = self.signaling.depart(peer_id) {
                    debug!("departure not sent: {e}");
                }
            }
        }
        if let Some(reply) = self.pending_start.take() {
            let _ = reply.send(Err(CallError::Cancelled));
        }
        self.audio_enabled = true;
        self.video_enabled = true;
        self.video_source = VideoSource::Camera;
        self.set_state(SessionState::Idle);
    }

    async fn shutdown(&mut self) {
        self.end_call();
        self.transport.close().await;
        self.identity = Identity::Unopened;
        self.signaling.disconnect();
        info!(workspace=%self.config.workspace_id, "call session shut down");
    }

    fn on_signal(&mut self, ev: SignalingEvent) {
        match ev {
            SignalingEvent::PeerJoined { peer_id, user_id } => self.on_peer_joined(peer_id, user_id),
            SignalingEvent::PeerLeft { peer_id } => self.on_peer_left(&peer_id),
            SignalingEvent::Roster(list) => {
                for entry in &list {
                    if let Some(peer_id) = &entry.peer_id {
                        self.peer_users.insert(peer_id.clone(), entry.user_id.clone());
                    }
                }
                self.roster = list;
                self.emit(SessionEventKind::RosterUpdated {
                    members: self.roster.len(),
                });
            }
            SignalingEvent::Presence { user_id, online } => {
                let known = self.roster.iter().any(|e| e.user_id == user_id);
                if online && !known {
                    self.roster.push(ParticipantEntry {
                        user_id,
                        peer_id: None,
                    });
                } else if !online && known {
                    self.roster.retain(|e| e.user_id != user_id);
                } else {
                    return;
                }
                self.emit(SessionEventKind::RosterUpdated {
                    members: self.roster.len(),
                });
            }
            SignalingEvent::Disconnected { reason } => {
                self.signaling_connected = false;
                self.emit(SessionEventKind::SignalingLost { reason });
            }
            SignalingEvent::Reconnected => {
                self.signaling_connected = true;
                self.emit(SessionEventKind::SignalingRestored);
            }
        }
    }

    fn on_peer_joined(&mut self, peer_id: String, user_id: String) {
        self.peer_users.insert(peer_id.clone(), user_id.clone());
        if self.state != SessionState::Active {
            debug!(peer=%peer_id, state=%self.state, "ignoring peer joined outside a call");
            return;
        }
        let Identity::Open(local) = &self.identity else {
            return;
        };
        if peer_id == *local {
            return;
        }
        if self.config.user_id.as_deref() == Some(user_id.as_str()) {
            debug!(peer=%peer_id, "not dialing another device of the same user");
            return;
        }
        if self.participants.is_known(&peer_id) {
            debug!(peer=%peer_id, "already connected or dialing");
            return;
        }
        if self.participants.occupancy() >= self.config.max_remote_peers() {
            warn!(peer=%peer_id, "call is full; not dialing");
            return;
        }
        self.dial(peer_id, Some(user_id));
    }

    fn dial(&mut self, peer_id: String, user_id: Option<String>) {
        let Some(stream) = self.local_stream.clone() else {
            return;
        };
        self.next_attempt += 1;
        let attempt = self.next_attempt;
        if !self.participants.begin_dial(&peer_id, attempt, user_id) {
            return;
        }
        self.metrics.dial_started();
        info!(peer=%peer_id, attempt, "dialing");

        let sent_video = stream.video_tracks().next().cloned();
        let transport = self.transport.clone();
        let tx = self.tx.clone();
        let metrics = self.metrics.clone();
        let generation = self.generation;
        let timeout = self.config.connect_timeout();
        tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, transport.dial(&peer_id, stream)).await {
                Ok(r) => r,
                Err(_) => {
                    metrics.timeout();
                    Err(CallError::peer(
                        &peer_id,
                        format!("no answer within {}s", timeout.as_secs()),
                    ))
                }
            };
            let _ = tx.send(Msg::DialDone {
                generation,
                attempt,
                peer_id,
                sent_video,
                result,
            });
        });
    }

    fn on_dial_done(
        &mut self,
        generation: u64,
        attempt: u64,
        peer_id: String,
        sent_video: Option<MediaTrack>,
        result: CallResult<BoxedCall>,
    ) {
        let pending = if generation == self.generation && self.state == SessionState::Active {
            self.participants.finish_dial(&peer_id, attempt)
        } else {
            None
        };
        let Some(pending) = pending else {
            if let Ok(call) = result {
                debug!(peer=%peer_id, attempt, "closing call from an abandoned dial");
                call.close();
            }
            self.metrics.stale_discarded();
            return;
        };
        match result {
            Ok(call) => {
                let video_current = self.catch_up_video(&peer_id, &call, sent_video.as_ref());
                self.register(peer_id.clone(), pending.user_id, attempt, CallDirection::Outbound, call);
                if !video_current {
                    if let Some(p) = self.participants.remove_current(&peer_id, attempt) {
                        warn!(peer=%peer_id, "ending call that cannot switch video source");
                        self.retire(p, LeaveReason::SourceSwitchUnsupported);
                    }
                }
            }
            Err(e) => {
                self.metrics.dial_failed();
                self.report_failure(&peer_id, failure_reason(&e));
            }
        }
    }

    fn on_incoming(&mut self, mut call: BoxedCall) {
        let remote = call.remote_peer_id().to_string();
        if self.state != SessionState::Active {
            debug!(peer=%remote, state=%self.state, "rejecting call outside an active call");
            self.metrics.inbound_rejected();
            call.reject();
            return;
        }
        let Identity::Open(local) = &self.identity else {
            call.reject();
            return;
        };
        // When both sides dial at once, the call placed by the lower peer id
        // survives on both ends.
        let ours_wins = local.as_str() < remote.as_str();

        let existing = self.participants.get(&remote).map(|p| (p.direction, p.status));
        match existing {
            Some((CallDirection::Outbound, ParticipantStatus::Connecting)) if !ours_wins => {
                if let Some(p) = self.participants.remove(&remote) {
                    info!(peer=%remote, "simultaneous dial; yielding to remote call");
                    self.metrics.glare_yield();
                    self.retire(p, LeaveReason::Superseded);
                }
            }
            Some(_) => {
                debug!(peer=%remote, "rejecting duplicate call");
                self.metrics.inbound_rejected();
                call.reject();
                return;
            }
            None if self.participants.has_pending(&remote) => {
                if ours_wins {
                    debug!(peer=%remote, "simultaneous dial; keeping ours");
                    self.metrics.inbound_rejected();
                    call.reject();
                    return;
                }
                info!(peer=%remote, "simultaneous dial; dropping pending dial");
                self.participants.cancel_dial(&remote);
                self.metrics.glare_yield();
            }
            None => {}
        }

        if self.participants.occupancy() >= self.config.max_remote_peers() {
            warn!(peer=%remote, "call is full; rejecting");
            self.metrics.inbound_rejected();
            call.reject();
            return;
        }
        let Some(stream) = self.local_stream.clone() else {
            call.reject();
            return;
        };
        if let Err(e) = call.answer(stream) {
            call.close();
            self.report_failure(&remote, failure_reason(&e));
            return;
        }
        self.metrics.inbound_accepted();
        let user_id = self.peer_users.get(&remote).cloned();
        self.next_attempt += 1;
        let attempt = self.next_attempt;
        self.register(remote, user_id, attempt, CallDirection::Inbound, call);
    }

    fn register(
        &mut self,
        peer_id: String,
        user_id: Option<String>,
        attempt: u64,
        direction: CallDirection,
        mut call: BoxedCall,
    ) {
        let events = call.take_events();
        let participant = RemoteParticipant {
            peer_id: peer_id.clone(),
            user_id,
            attempt,
            direction,
            status: ParticipantStatus::Connecting,
            call,
            stream: None,
        };
        if let Err(p) = self.participants.register(participant) {
            warn!(peer=%peer_id, "peer already has a call; closing the newer one");
            p.call.close();
            return;
        }
        info!(peer=%peer_id, ?direction, attempt, "call registered");
        match events {
            Some(rx) => self.pump(peer_id.clone(), attempt, rx),
            None => warn!(peer=%peer_id, "call has no event stream"),
        }
        self.arm_deadline(peer_id, attempt);
    }

    fn pump(&self, peer_id: String, attempt: u64, mut rx: mpsc::UnboundedReceiver<CallEvent>) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let closed = matches!(event, CallEvent::Closed);
                let msg = Msg::Call {
                    peer_id: peer_id.clone(),
                    attempt,
                    event,
                };
                if tx.send(msg).is_err() || closed {
                    return;
                }
            }
            // Event source dropped without a close.
            let _ = tx.send(Msg::Call {
                peer_id,
                attempt,
                event: CallEvent::Closed,
            });
        });
    }

    fn arm_deadline(&self, peer_id: String, attempt: u64) {
        let tx = self.tx.clone();
        let timeout = self.config.connect_timeout();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = tx.send(Msg::ConnectDeadline { peer_id, attempt });
        });
    }

    fn on_deadline(&mut self, peer_id: String, attempt: u64) {
        let still_connecting = self
            .participants
            .current_mut(&peer_id, attempt)
            .map(|p| p.status == ParticipantStatus::Connecting)
            .unwrap_or(false);
        if !still_connecting {
            return;
        }
        if let Some(p) = self.participants.remove(&peer_id) {
            self.metrics.timeout();
            self.retire(p, LeaveReason::TimedOut);
            self.report_failure(
                &peer_id,
                format!("no media within {}s", self.config.connect_timeout().as_secs()),
            );
        }
    }

    fn on_call_event(&mut self, peer_id: String, attempt: u64, event: CallEvent) {
        match event {
            CallEvent::Stream(stream) => {
                let Some(p) = self.participants.current_mut(&peer_id, attempt) else {
                    debug!(peer=%peer_id, attempt, "dropping media from a retired call");
                    self.media.release_remote(&stream);
                    return;
                };
                if p.stream.as_ref().map(|s| s.id()) == Some(stream.id()) {
                    return;
                }
                if let Some(old) = p.stream.replace(stream.clone()) {
                    self.media.release_remote(&old);
                }
                p.status = ParticipantStatus::Connected;
                info!(peer=%peer_id, stream=%stream.id(), "participant connected");
                self.emit(SessionEventKind::ParticipantConnected {
                    peer_id,
                    stream_id: stream.id().to_string(),
                });
            }
            CallEvent::Closed => {
                if let Some(p) = self.participants.remove_current(&peer_id, attempt) {
                    self.retire(p, LeaveReason::Closed);
                }
            }
            CallEvent::Error(reason) => {
                if let Some(p) = self.participants.remove_current(&peer_id, attempt) {
                    self.retire(p, LeaveReason::Failed);
                    self.report_failure(&peer_id, reason);
                }
            }
        }
    }

    fn on_peer_left(&mut self, peer_id: &str) {
        if self.participants.cancel_dial(peer_id).is_some() {
            debug!(peer=%peer_id, "peer left before our dial completed");
        }
        if let Some(p) = self.participants.remove(peer_id) {
            self.retire(p, LeaveReason::PeerLeft);
        }
    }

    fn switch_video(&mut self, source: VideoSource, reply: oneshot::Sender<CallResult<()>>) {
        if self.state != SessionState::Active {
            let _ = reply.send(Err(CallError::InvalidState(self.state)));
            return;
        }
        if source == self.video_source {
            let _ = reply.send(Ok(()));
            return;
        }
        let media = self.media.clone();
        let tx = self.tx.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            let result = match source {
                VideoSource::Screen => media.acquire_display().await,
                VideoSource::Camera => media.acquire().await,
            };
            let _ = tx.send(Msg::VideoReady {
                generation,
                source,
                result,
                reply,
            });
        });
    }

    fn on_video_ready(
        &mut self,
        generation: u64,
        source: VideoSource,
        result: CallResult<MediaStream>,
        reply: oneshot::Sender<CallResult<()>>,
    ) {
        if generation != self.generation || self.state != SessionState::Active {
            if let Ok(stream) = result {
                self.media.release(&stream);
            }
            self.metrics.stale_discarded();
            let _ = reply.send(Err(CallError::Cancelled));
            return;
        }
        let capture = match result {
            Ok(s) => s,
            Err(e) => {
                warn!(?source, "video source unavailable: {e}");
                let _ = reply.send(Err(e));
                return;
            }
        };
        let Some(track) = capture.video_tracks().next().cloned() else {
            self.media.release(&capture);
            let _ = reply.send(Err(CallError::DeviceUnavailable(
                "capture has no video track".to_string(),
            )));
            return;
        };
        // Only the video track is used; a camera capture also brings audio.
        for extra in capture.tracks().iter().filter(|t| !t.same_track(&track)) {
            self.media.release_track(extra);
        }

        let mut unsupported = Vec::new();
        for p in self.participants.iter() {
            match p.call.replace_video_track(&track) {
                Ok(true) => {}
                Ok(false) => unsupported.push(p.peer_id.clone()),
                Err(e) => {
                    warn!(peer=%p.peer_id, "video track replacement failed: {e}");
                    unsupported.push(p.peer_id.clone());
                }
            }
        }
        for peer_id in unsupported {
            if let Some(p) = self.participants.remove(&peer_id) {
                warn!(peer=%peer_id, "ending call that cannot switch video source");
                self.retire(p, LeaveReason::SourceSwitchUnsupported);
            }
        }

        if let Some(local) = self.local_stream.as_mut() {
            self.media.swap_video_track(local, track, self.video_enabled);
        }
        self.video_source = source;
        info!(?source, "video source switched");
        self.emit(SessionEventKind::VideoSourceChanged { source });
        let _ = reply.send(Ok(()));
    }

    /// A dial that was in flight across a video source switch still carries
    /// the old track. Returns false when the call cannot be moved onto the
    /// current one.
    fn catch_up_video(&self, peer_id: &str, call: &BoxedCall, sent: Option<&MediaTrack>) -> bool {
        let Some(current) = self.local_stream.as_ref().and_then(|s| s.video_tracks().next()) else {
            return true;
        };
        if sent.is_some_and(|t| t.same_track(current)) {
            return true;
        }
        debug!(peer=%peer_id, "video source changed while dialing");
        match call.replace_video_track(current) {
            Ok(replaced) => replaced,
            Err(e) => {
                warn!(peer=%peer_id, "video track replacement failed: {e}");
                false
            }
        }
    }

    /// Closes the call and releases the remote stream of a participant already
    /// taken out of the table.
    fn retire(&self, mut p: RemoteParticipant, reason: LeaveReason) {
        p.call.close();
        if let Some(stream) = p.stream.take() {
            self.media.release_remote(&stream);
        }
        p.status = ParticipantStatus::Closed;
        info!(peer=%p.peer_id, ?reason, "participant left");
        self.emit(SessionEventKind::ParticipantLeft {
            peer_id: p.peer_id,
            reason,
        });
    }

    fn report_failure(&self, peer_id: &str, reason: String) {
        warn!(peer=%peer_id, %reason, "peer connection failed");
        self.emit(SessionEventKind::PeerConnectionFailed {
            peer_id: peer_id.to_string(),
            reason,
        });
    }

    fn set_state(&mut self, to: SessionState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        info!(%from, %to, "call state");
        self.emit(SessionEventKind::StateChanged { from, to });
    }

    fn emit(&self, kind: SessionEventKind) {
        let _ = self.events.send(SessionEvent::new(kind));
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            local_peer_id: match &self.identity {
                Identity::Open(id) => Some(id.clone()),
                _ => None,
            },
            local_stream_id: self.local_stream.as_ref().map(|s| s.id().to_string()),
            audio_enabled: self.audio_enabled,
            video_enabled: self.video_enabled,
            video_source: self.video_source,
            participants: self.participants.infos(),
            pending_dials: self.participants.pending_peers(),
            roster: self.roster.clone(),
            signaling_connected: self.signaling_connected,
        }
    }
}

fn failure_reason(err: &CallError) -> String {
    match err {
        CallError::PeerConnectionFailed { reason, .. } => reason.clone(),
        other => other.to_string(),
    }
}
