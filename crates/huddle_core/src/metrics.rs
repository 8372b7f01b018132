/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - HUDDLE Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::events::now_ms_u64;

#[derive(Default)]
pub struct CallMetrics {
    pub dials_started: AtomicU64,
    pub dials_failed: AtomicU64,
    pub inbound_accepted: AtomicU64,
    pub inbound_rejected: AtomicU64,
    pub glare_yields: AtomicU64,
    pub stale_discarded: AtomicU64,
    pub timeouts: AtomicU64,
    pub participants: AtomicU64,
    pub calls_started: AtomicU64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub ts_ms: u64,
    pub dials_started: u64,
    pub dials_failed: u64,
    pub inbound_accepted: u64,
    pub inbound_rejected: u64,
    pub glare_yields: u64,
    pub stale_discarded: u64,
    pub timeouts: u64,
    pub participants: u64,
    pub calls_started: u64,
}

impl CallMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dial_started(&self) {
        self.dials_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dial_failed(&self) {
        self.dials_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inbound_accepted(&self) {
        self.inbound_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inbound_rejected(&self) {
        self.inbound_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn glare_yield(&self) {
        self.glare_yields.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stale_discarded(&self) {
        self.stale_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn call_started(&self) {
        self.calls_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn participants_set(&self, n: usize) {
        self.participants.store(n as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            ts_ms: now_ms_u64(),
            dials_started: self.dials_started.load(Ordering::Relaxed),
            dials_failed: self.dials_failed.load(Ordering::Relaxed),
            inbound_accepted: self.inbound_accepted.load(Ordering::Relaxed),
            inbound_rejected: self.inbound_rejected.load(Ordering::Relaxed),
            glare_yields: self.glare_yields.load(Ordering::Relaxed),
            stale_discarded: self.stale_discarded.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            participants: self.participants.load(Ordering::Relaxed),
            calls_started: self.calls_started.load(Ordering::Relaxed),
        }
    }
}
