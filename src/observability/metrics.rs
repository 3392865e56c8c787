//! Pool liveness metrics.
//!
//! # Metrics
//! - `ring_client_ring_members` (gauge): members currently eligible for dispatch
//! - `ring_client_member_up` (gauge): 1=connected, 0=down, labelled by server
//! - `ring_client_connect_failures_total` (counter): failed connect attempts by server

pub fn record_ring_size(members: usize) {
    metrics::gauge!("ring_client_ring_members").set(members as f64);
}

pub fn record_member_liveness(server: &str, up: bool) {
    metrics::gauge!("ring_client_member_up", "server" => server.to_string())
        .set(if up { 1.0 } else { 0.0 });
}

pub fn record_connect_failure(server: &str) {
    metrics::counter!("ring_client_connect_failures_total", "server" => server.to_string())
        .increment(1);
}
