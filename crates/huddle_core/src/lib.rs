/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - HUDDLE Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

pub mod config;
pub mod error;
pub mod events;
pub mod layout;
pub mod media;
pub mod memory;
pub mod metrics;
pub mod session;
pub mod signaling;
pub mod transport;

pub fn huddle_core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
