/// Metrics and telemetry for the identity core
///
/// Provides Prometheus-compatible counters for:
/// - Login attempts by method and outcome
/// - Refresh rotations by outcome
/// - Registrations
/// - Revoked sessions by reason

use lazy_static::lazy_static;
use prometheus::{register_int_counter_vec, Encoder, IntCounterVec, TextEncoder};

lazy_static! {
    /// Login attempts by method (email, username, federated) and outcome
    pub static ref LOGINS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "identity_logins_total",
        "Total number of login attempts",
        &["method", "outcome"]
    )
    .unwrap();

    /// Refresh attempts by outcome
    pub static ref REFRESH_TOTAL: IntCounterVec = register_int_counter_vec!(
        "identity_refresh_total",
        "Total number of refresh token rotations attempted",
        &["outcome"]
    )
    .unwrap();

    /// Accounts created, by who created them
    pub static ref REGISTRATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "identity_registrations_total",
        "Total number of accounts registered",
        &["by"]
    )
    .unwrap();

    /// Sessions deleted, by reason
    pub static ref SESSIONS_REVOKED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "identity_sessions_revoked_total",
        "Total number of sessions revoked",
        &["reason"]
    )
    .unwrap();
}

/// Render metrics in Prometheus text format
pub fn render_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Record a login attempt
pub fn record_login(method: &str, outcome: &str) {
    LOGINS_TOTAL.with_label_values(&[method, outcome]).inc();
}

/// Record a refresh attempt
pub fn record_refresh(outcome: &str) {
    REFRESH_TOTAL.with_label_values(&[outcome]).inc();
}

/// Record an account registration
pub fn record_registration(by: &str) {
    REGISTRATIONS_TOTAL.with_label_values(&[by]).inc();
}

/// Record revoked sessions
pub fn record_sessions_revoked(reason: &str, count: u64) {
    SESSIONS_REVOKED_TOTAL
        .with_label_values(&[reason])
        .inc_by(count);
}
