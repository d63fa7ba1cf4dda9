// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 cftunnel Contributors

// cftunnel - Common Library
// Shared configuration, error and result types for the quick-tunnel supervisor

pub mod config;
pub mod error;
pub mod types;

pub use config::{QuickConfig, PORT_PLACEHOLDER, STATE_DIR_NAME};
pub use error::{Error, Result};
pub use types::{QuickResult, QuickStatus, StopOutcome};
