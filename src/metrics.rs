//! Hand-rolled Prometheus text-format counters. `/metrics` exists and
//! reports real numbers without pulling in a dedicated metrics crate.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct Metrics {
    requests_total: AtomicU64,
    errors_total: AtomicU64,
    bytes_received_total: AtomicU64,
    bytes_sent_total: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bytes_received(&self, n: u64) {
        self.bytes_received_total.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_bytes_sent(&self, n: u64) {
        self.bytes_sent_total.fetch_add(n, Ordering::Relaxed);
    }

    pub fn render(&self) -> String {
        format!(
            "# HELP bleepstore_requests_total Total HTTP requests handled.\n\
             # TYPE bleepstore_requests_total counter\n\
             bleepstore_requests_total {}\n\
             # HELP bleepstore_errors_total Total requests that resulted in an S3 error response.\n\
             # TYPE bleepstore_errors_total counter\n\
             bleepstore_errors_total {}\n\
             # HELP bleepstore_bytes_received_total Total request body bytes received.\n\
             # TYPE bleepstore_bytes_received_total counter\n\
             bleepstore_bytes_received_total {}\n\
             # HELP bleepstore_bytes_sent_total Total response body bytes sent.\n\
             # TYPE bleepstore_bytes_sent_total counter\n\
             bleepstore_bytes_sent_total {}\n",
            self.requests_total.load(Ordering::Relaxed),
            self.errors_total.load(Ordering::Relaxed),
            self.bytes_received_total.load(Ordering::Relaxed),
            self.bytes_sent_total.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_all_counters() {
        let m = Metrics::new();
        m.record_request();
        m.record_error();
        let text = m.render();
        assert!(text.contains("bleepstore_requests_total 1"));
        assert!(text.contains("bleepstore_errors_total 1"));
    }
}
