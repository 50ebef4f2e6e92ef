//! Replay of recorded requests through a rate limiter.
//!
//! Input is JSON lines, one request per line:
//!
//! ```text
//! {"api_key": "abc", "remote_addr": "10.0.0.1", "path": "/maths/<method>", "method": "GET", "at": 1700000000}
//! ```
//!
//! `api_key`, `remote_addr` and `at` are optional; `method` defaults to `GET`
//! and `at` to the current time. One verdict is written per request.

use std::io::{BufRead, Write};
use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::ratelimit::{now_secs, RateLimiter, RequestContext};

/// One recorded request.
#[derive(Debug, Clone, Deserialize)]
pub struct ReplayRequest {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub remote_addr: Option<IpAddr>,
    pub path: String,
    #[serde(default = "default_method")]
    pub method: String,
    /// Unix seconds the request arrived at
    #[serde(default)]
    pub at: Option<u64>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl ReplayRequest {
    fn context(&self) -> RequestContext<'_> {
        RequestContext {
            api_key: self.api_key.as_deref(),
            remote_addr: self.remote_addr,
            path: &self.path,
            method: &self.method,
        }
    }
}

/// The verdict for one replayed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplayOutcome {
    /// 1-based input line number
    pub line: usize,
    pub allowed: bool,
    pub retry_after: Option<u64>,
    pub breached: Vec<String>,
}

/// Totals over a replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub allowed: usize,
    pub denied: usize,
    /// Lines that could not be parsed
    pub skipped: usize,
}

/// Check every request in `input` against `limiter`, writing one JSON
/// outcome per line to `output`.
///
/// Blank lines are ignored. Lines that fail to parse are logged and skipped.
pub fn replay<R: BufRead, W: Write>(limiter: &RateLimiter, input: R, mut output: W) -> Result<ReplaySummary> {
    let mut summary = ReplaySummary::default();

    for (index, line) in input.lines().enumerate() {
        let line = line?;
        let line_no = index + 1;

        if line.trim().is_empty() {
            continue;
        }

        let request: ReplayRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                warn!(line = line_no, error = %e, "Skipping malformed request");
                summary.skipped += 1;
                continue;
            }
        };

        let now = request.at.unwrap_or_else(now_secs);
        let verdict = limiter.check(&request.context(), now);

        debug!(
            line = line_no,
            path = %request.path,
            method = %request.method,
            allowed = verdict.is_allowed(),
            "Replayed request"
        );

        if verdict.is_allowed() {
            summary.allowed += 1;
        } else {
            summary.denied += 1;
        }

        let outcome = ReplayOutcome {
            line: line_no,
            allowed: verdict.is_allowed(),
            retry_after: verdict.retry_after(),
            breached: verdict.breached().iter().map(ToString::to_string).collect(),
        };

        serde_json::to_writer(&mut output, &outcome).map_err(std::io::Error::from)?;
        writeln!(output)?;
    }

    output.flush()?;
    Ok(summary)
}
