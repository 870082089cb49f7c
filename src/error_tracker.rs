//! Error tracker capability (spec.md §4.4, §6): `Capture(err, {ctx, fields…})`.

use std::collections::BTreeMap;

use async_trait::async_trait;

/// Dispatches an error (or a recovered panic) to an external tracking
/// service, tagged with the reporting component and correlation id.
#[async_trait]
pub trait ErrorTracker: Send + Sync {
    fn capture(&self, component: &str, correlation_id: &str, message: &str);

    /// Flush any buffered events, bounded by `timeout`. Called before
    /// re-raising a caught panic (spec.md §4.4).
    async fn flush(&self, timeout: std::time::Duration);
}

/// `Sentry`-backed tracker. Sentry's SDK is initialized once at process
/// start in `main`; this type just shapes each call with the fields the
/// core's components need.
#[derive(Debug, Clone, Default)]
pub struct SentryErrorTracker;

#[async_trait]
impl ErrorTracker for SentryErrorTracker {
    fn capture(&self, component: &str, correlation_id: &str, message: &str) {
        sentry::configure_scope(|scope| {
            let mut extra = BTreeMap::new();
            extra.insert(
                "correlation_id".to_string(),
                serde_json::Value::String(correlation_id.to_string()),
            );
            scope.set_tag("component", component);
            for (key, value) in extra {
                scope.set_extra(&key, value);
            }
        });
        sentry::capture_message(message, sentry::Level::Error);
    }

    async fn flush(&self, timeout: std::time::Duration) {
        if let Some(client) = sentry::Hub::current().client() {
            client.flush(Some(timeout));
        }
    }
}

/// A no-op tracker for local development and tests where `sentry_dsn` is
/// unset.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopErrorTracker;

#[async_trait]
impl ErrorTracker for NoopErrorTracker {
    fn capture(&self, _component: &str, _correlation_id: &str, _message: &str) {}

    async fn flush(&self, _timeout: std::time::Duration) {}
}
