/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - HUDDLE Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use futures_util::{SinkExt, StreamExt};
use huddle_core::config::SignalingConfig;
use huddle_core::error::CallError;
use huddle_core::signaling::{ParticipantEntry, Signaling, SignalingEvent, WsSignaling};
use huddle_protocol::{ClientEvent, ServerEvent};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, oneshot};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

type Relay = WebSocketStream<TcpStream>;

async fn accept(listener: &TcpListener) -> (Relay, String) {
    let (stream, _) = listener.accept().await.unwrap();
    let (uri_tx, uri_rx) = oneshot::channel();
    let ws = tokio_tungstenite::accept_hdr_async(
        stream,
        move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            let _ = uri_tx.send(req.uri().to_string());
            Ok(resp)
        },
    )
    .await
    .unwrap();
    (ws, uri_rx.await.unwrap())
}

async fn read_event(ws: &mut Relay) -> ClientEvent {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("client frame")
            .unwrap()
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn push(ws: &mut Relay, ev: &ServerEvent) {
    ws.send(Message::Text(serde_json::to_string(ev).unwrap()))
        .await
        .unwrap();
}

async fn next_event(rx: &mut broadcast::Receiver<SignalingEvent>) -> SignalingEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("signaling event")
        .unwrap()
}

fn config(listener: &TcpListener) -> SignalingConfig {
    SignalingConfig {
        url: format!("ws://{}/ws", listener.local_addr().unwrap()),
        token: Some("s3cret".to_string()),
        ping_secs: Some(300),
        reconnect_min_ms: Some(10),
        reconnect_max_ms: Some(100),
    }
}

#[tokio::test]
async fn joins_announces_and_maps_relay_events() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let cfg = config(&listener);
    let (sig, (mut relay, uri)) = tokio::join!(WsSignaling::connect(&cfg, "team"), accept(&listener));
    let sig = sig.unwrap();
    assert!(uri.contains("workspace=team"));
    assert!(uri.contains("token=s3cret"));
    assert!(sig.is_connected());
    assert_eq!(sig.workspace_id(), "team");

    assert_eq!(
        read_event(&mut relay).await,
        ClientEvent::JoinWorkspace {
            workspace_id: "team".to_string()
        }
    );

    let mut events = sig.events();
    sig.announce("p1").unwrap();
    assert_eq!(
        read_event(&mut relay).await,
        ClientEvent::PeerJoined {
            workspace_id: "team".to_string(),
            peer_id: "p1".to_string()
        }
    );

    let roster = vec![
        ParticipantEntry {
            user_id: "alice".to_string(),
            peer_id: Some("p1".to_string()),
        },
        ParticipantEntry {
            user_id: "bob".to_string(),
            peer_id: None,
        },
    ];
    push(
        &mut relay,
        &ServerEvent::ParticipantsList {
            participants: roster.clone(),
        },
    )
    .await;
    relay
        .send(Message::Text("{\"event\":\"chat\",\"data\":{}}".to_string()))
        .await
        .unwrap();
    push(
        &mut relay,
        &ServerEvent::PeerJoined {
            peer_id: "p2".to_string(),
            user_id: "bob".to_string(),
        },
    )
    .await;
    push(
        &mut relay,
        &ServerEvent::PresenceUpdate {
            user_id: "carol".to_string(),
            status: "offline".to_string(),
        },
    )
    .await;
    push(
        &mut relay,
        &ServerEvent::PeerLeft {
            peer_id: "p2".to_string(),
        },
    )
    .await;

    assert_eq!(next_event(&mut events).await, SignalingEvent::Roster(roster));
    assert_eq!(
        next_event(&mut events).await,
        SignalingEvent::PeerJoined {
            peer_id: "p2".to_string(),
            user_id: "bob".to_string()
        }
    );
    assert_eq!(
        next_event(&mut events).await,
        SignalingEvent::Presence {
            user_id: "carol".to_string(),
            online: false
        }
    );
    assert_eq!(
        next_event(&mut events).await,
        SignalingEvent::PeerLeft {
            peer_id: "p2".to_string()
        }
    );

    sig.depart("p1").unwrap();
    assert_eq!(
        read_event(&mut relay).await,
        ClientEvent::PeerLeft {
            workspace_id: "team".to_string(),
            peer_id: "p1".to_string()
        }
    );

    sig.disconnect();
    sig.disconnect();
    assert!(matches!(
        sig.announce("p1"),
        Err(CallError::SignalingDisconnected(_))
    ));
    loop {
        match tokio::time::timeout(Duration::from_secs(5), relay.next())
            .await
            .expect("close from client")
        {
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
            Some(Ok(_)) => continue,
        }
    }
}

#[tokio::test]
async fn reconnects_and_replays_presence() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let cfg = config(&listener);
    let (sig, (mut relay, _)) = tokio::join!(WsSignaling::connect(&cfg, "team"), accept(&listener));
    let sig = sig.unwrap();
    let mut events = sig.events();

    read_event(&mut relay).await;
    sig.announce("p1").unwrap();
    read_event(&mut relay).await;

    drop(relay);
    assert!(matches!(
        next_event(&mut events).await,
        SignalingEvent::Disconnected { .. }
    ));

    let (mut relay, uri) = accept(&listener).await;
    assert!(uri.contains("token=s3cret"));
    assert_eq!(
        read_event(&mut relay).await,
        ClientEvent::JoinWorkspace {
            workspace_id: "team".to_string()
        }
    );
    assert_eq!(
        read_event(&mut relay).await,
        ClientEvent::PeerJoined {
            workspace_id: "team".to_string(),
            peer_id: "p1".to_string()
        }
    );
    assert_eq!(next_event(&mut events).await, SignalingEvent::Reconnected);
    assert!(sig.is_connected());
    sig.disconnect();
}

#[tokio::test]
async fn unreachable_relay_is_reported() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let cfg = config(&listener);
    drop(listener);

    let err = WsSignaling::connect(&cfg, "team").await.err().unwrap();
    assert!(matches!(err, CallError::SignalingDisconnected(_)));
}

#[tokio::test]
async fn departure_while_offline_is_not_replayed() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let cfg = config(&listener);
    let (sig, (mut relay, _)) = tokio::join!(WsSignaling::connect(&cfg, "team"), accept(&listener));
    let sig = sig.unwrap();
    let mut events = sig.events();

    read_event(&mut relay).await;
    sig.announce("p1").unwrap();
    read_event(&mut relay).await;

    drop(relay);
    assert!(matches!(
        next_event(&mut events).await,
        SignalingEvent::Disconnected { .. }
    ));
    sig.depart("p1").unwrap();

    let (mut relay, _) = accept(&listener).await;
    assert_eq!(
        read_event(&mut relay).await,
        ClientEvent::JoinWorkspace {
            workspace_id: "team".to_string()
        }
    );
    assert_eq!(next_event(&mut events).await, SignalingEvent::Reconnected);

    sig.announce("p2").unwrap();
    assert_eq!(
        read_event(&mut relay).await,
        ClientEvent::PeerJoined {
            workspace_id: "team".to_string(),
            peer_id: "p2".to_string()
        }
    );
    sig.disconnect();
}
