use std::sync::OnceLock;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

/// Local wall clock in unix seconds.
pub fn local_now() -> i64 {
    Utc::now().timestamp()
}

/// Local wall clock in unix milliseconds.
pub fn local_now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Wall clock corrected towards the service's clock.
///
/// Anchored once from the first parsable `Date` response header; the anchor
/// pairs the server time with a monotonic instant so later readings are
/// immune to local clock changes. Before anchoring it reads the local clock.
#[derive(Debug, Default)]
pub struct ServerClock {
    anchor: OnceLock<(i64, Instant)>,
}

impl ServerClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_anchored(&self) -> bool {
        self.anchor.get().is_some()
    }

    /// Unix seconds.
    pub fn now(&self) -> i64 {
        match self.anchor.get() {
            Some((server_time, instant)) => *server_time + instant.elapsed().as_secs() as i64,
            None => local_now(),
        }
    }

    /// Unix milliseconds.
    pub fn now_millis(&self) -> i64 {
        match self.anchor.get() {
            Some((server_time, instant)) => {
                *server_time * 1000 + instant.elapsed().as_millis() as i64
            }
            None => local_now_millis(),
        }
    }

    /// Returns `true` when this call set the anchor.
    pub fn anchor(&self, server_time: i64) -> bool {
        let set = self.anchor.set((server_time, Instant::now())).is_ok();
        if set {
            debug!(event = "server_clock_anchored", skew = server_time - local_now());
        }
        set
    }

    /// Anchors from an HTTP `Date` header value such as
    /// `Sun, 06 Nov 1994 08:49:37 GMT`. No-op once anchored.
    pub fn observe_date_header(&self, value: Option<&str>) {
        if self.is_anchored() {
            return;
        }
        let Some(value) = value else {
            warn!(event = "server_date_missing");
            return;
        };
        match parse_http_date(value) {
            Some(server_time) => {
                self.anchor(server_time);
            }
            None => warn!(event = "server_date_invalid", value = %value),
        }
    }
}

pub fn parse_http_date(value: &str) -> Option<i64> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|parsed| parsed.timestamp())
}
