// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 cftunnel Contributors

// cftunnel - Quick Tunnel Supervisor
// Runs `cloudflared tunnel --url`, captures its public URL and keeps enough
// state on disk for a later invocation to find and stop it

pub mod launcher;
pub mod locate;
pub mod permissions;
pub mod process;
pub mod records;
pub mod scanner;
pub mod store;
pub mod supervisor;
pub mod watcher;

pub use locate::locate_binary;
pub use process::{Pid, ProcessControl, StopSignal, SystemProcessControl};
pub use records::StateRecords;
pub use scanner::{extract_tunnel_url, EndpointMatcher};
pub use supervisor::Supervisor;

// Re-export the shared types callers need alongside the supervisor
pub use cftunnel_common::{Error, QuickConfig, QuickResult, QuickStatus, Result, StopOutcome};
