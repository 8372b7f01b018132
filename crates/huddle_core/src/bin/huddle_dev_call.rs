/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - HUDDLE Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::Context;
use huddle_core::config::CallConfig;
use huddle_core::layout;
use huddle_core::memory::{MemoryDevices, MemoryNetwork};
use huddle_core::session::{CallSession, SessionDeps};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("info".parse().unwrap()),
        )
        .init();

    let mut base = CallConfig::from_env()?;
    if base.workspace_id.trim().is_empty() {
        base.workspace_id = "dev".to_string();
    }
    let members: usize = std::env::var("HUDDLE_DEV_MEMBERS")
        .ok()
        .map(|v| v.parse::<usize>().context("HUDDLE_DEV_MEMBERS"))
        .transpose()?
        .unwrap_or(3)
        .max(1)
        .min(16);
    let secs: u64 = std::env::var("HUDDLE_DEV_SECS")
        .ok()
        .map(|v| v.parse::<u64>().context("HUDDLE_DEV_SECS"))
        .transpose()?
        .unwrap_or(2);

    info!(huddle = huddle_core::huddle_core_version(), workspace=%base.workspace_id, members, "starting in-memory call");
    let net = MemoryNetwork::new();
    let mut sessions = Vec::with_capacity(members);
    for i in 0..members {
        let user = format!("user-{i}");
        let cfg = base.clone().with_user(user.clone());
        let session = CallSession::spawn(
            cfg,
            SessionDeps {
                signaling: Arc::new(net.signaling(&base.workspace_id, &user)),
                transport: Arc::new(net.transport()),
                devices: Arc::new(MemoryDevices::new()),
            },
        );
        sessions.push(session);
    }

    let mut events = sessions[0].subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ev) => match serde_json::to_string(&ev) {
                    Ok(line) => info!("user-0 event: {line}"),
                    Err(e) => warn!("event encode failed: {e}"),
                },
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "event log lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    for (i, session) in sessions.iter().enumerate() {
        session
            .start_call()
            .await
            .with_context(|| format!("user-{i} start_call"))?;
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("interrupted"),
        _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
    }

    let snapshot = sessions[0].snapshot().await?;
    println!("{}", layout::grid(&snapshot).render());
    println!("{}", serde_json::to_string_pretty(&sessions[0].metrics())?);

    for session in &sessions {
        session.end_call().await?;
        session.shutdown().await?;
    }
    info!(open_calls = net.open_calls(), "done");
    Ok(())
}
