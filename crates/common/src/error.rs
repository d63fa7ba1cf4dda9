// Error types for the cftunnel quick-tunnel supervisor

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Quick tunnel is already running, stop it first")]
    AlreadyRunning,

    #[error("cloudflared binary not found (searched: {searched})")]
    BinaryNotFound { searched: String },

    #[error("Failed to start cloudflared: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Failed to attach to cloudflared output: {0}")]
    Pipe(String),

    #[error("cloudflared exited before a public URL was assigned ({status}){}", last_line_suffix(.last_line))]
    EarlyExit {
        status: String,
        last_line: Option<String>,
    },

    #[error("Quick tunnel was stopped while it was starting")]
    Interrupted,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

fn last_line_suffix(last_line: &Option<String>) -> String {
    match last_line {
        Some(line) => format!(": {}", line),
        None => String::new(),
    }
}

pub type Result<T> = std::result::Result<T, Error>;
