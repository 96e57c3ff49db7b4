//! Prometheus text exposition for the queue state.

use std::collections::BTreeMap;
use std::fmt::Write;

use coldfront_queue::Counts;
use coldfront_routing::HostKey;

/// Render the queue snapshot into the Prometheus text format.
pub fn render_prometheus(counts: &Counts, rates: &BTreeMap<HostKey, f64>) -> String {
    let mut out = String::new();

    out.push_str("# HELP coldfront_pending_requests In-flight requests per host.\n");
    out.push_str("# TYPE coldfront_pending_requests gauge\n");
    for (key, level) in &counts.counts {
        let _ = writeln!(out, "coldfront_pending_requests{{host=\"{key}\"}} {level}");
    }

    out.push_str("# HELP coldfront_requests_per_second Windowed request rate per host.\n");
    out.push_str("# TYPE coldfront_requests_per_second gauge\n");
    for (key, rate) in rates {
        let _ = writeln!(out, "coldfront_requests_per_second{{host=\"{key}\"}} {rate:.4}");
    }

    out
}
