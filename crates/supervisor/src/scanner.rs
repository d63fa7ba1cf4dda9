// cftunnel - Output Scanner
// Picks the public URL out of cloudflared's diagnostic stream

use std::sync::Arc;

use cftunnel_common::QuickConfig;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tracing::{debug, info, warn};

use crate::records::StateRecords;
use crate::store::{HandleStore, RunId};

const DEFAULT_MARKER: &str = "trycloudflare.com";
const DEFAULT_SCHEME: &str = "https://";

/// Longer lines are split into chunks of this size
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Recognises the line announcing the quick tunnel hostname
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointMatcher {
    marker: String,
    scheme: String,
}

impl Default for EndpointMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_MARKER, DEFAULT_SCHEME)
    }
}

impl EndpointMatcher {
    pub fn new(marker: impl Into<String>, scheme: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
            scheme: scheme.into(),
        }
    }

    pub fn from_config(config: &QuickConfig) -> Self {
        Self::new(config.hostname_marker.clone(), config.url_scheme.clone())
    }

    /// First whitespace-delimited token starting with the scheme, on a line
    /// that mentions the marker
    pub fn extract<'a>(&self, line: &'a str) -> Option<&'a str> {
        if !line.contains(&self.marker) {
            return None;
        }
        line.split_whitespace()
            .find(|word| word.starts_with(&self.scheme))
    }

    /// First endpoint found in a block of output
    pub fn extract_from_output<'a>(&self, output: &'a str) -> Option<&'a str> {
        output.lines().find_map(|line| self.extract(line))
    }
}

/// Extract a `trycloudflare.com` URL from captured cloudflared output
pub fn extract_tunnel_url(output: &str) -> Option<&str> {
    EndpointMatcher::default().extract_from_output(output)
}

/// Background task consuming one run's stderr
pub struct OutputScanner {
    run: RunId,
    matcher: EndpointMatcher,
    store: Arc<HandleStore>,
    records: Arc<StateRecords>,
}

impl OutputScanner {
    pub fn new(
        run: RunId,
        matcher: EndpointMatcher,
        store: Arc<HandleStore>,
        records: Arc<StateRecords>,
    ) -> Self {
        Self {
            run,
            matcher,
            store,
            records,
        }
    }

    /// Read until end of stream and return the endpoint this scanner resolved.
    ///
    /// The stream is drained to the end even after resolution so the process
    /// never stalls on a full pipe. Cleanup is left to the exit watcher.
    pub async fn run<R>(self, stream: R) -> Option<String>
    where
        R: AsyncRead + Unpin,
    {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        let mut resolved: Option<String> = None;

        loop {
            buf.clear();
            let mut limited = (&mut reader).take(MAX_LINE_BYTES as u64);
            match limited.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!("Tunnel output stream closed: {}", e);
                    break;
                }
            }

            let line = String::from_utf8_lossy(&buf);
            let line = line.trim_end_matches(['\r', '\n']);
            debug!(target: "cloudflared", "{}", line);
            self.store.note_line(self.run, line);

            if resolved.is_some() {
                continue;
            }
            if let Some(url) = self.matcher.extract(line) {
                resolved = Some(url.to_string());
                self.publish(url);
            }
        }

        debug!("Tunnel output ended (run {})", self.run);
        resolved
    }

    fn publish(&self, url: &str) {
        // the record is written under the store lock, so an exit or stop
        // cannot slip in between and leave it behind
        let published = self.store.resolve(self.run, url, |url| {
            if let Err(e) = self.records.write_endpoint(url) {
                warn!("Failed to persist tunnel URL: {}", e);
            }
        });

        if published {
            info!("Quick tunnel available at {}", url);
        } else {
            debug!("Discarding URL for inactive run {}: {}", self.run, url);
        }
    }
}
