//! Request deduplication.
//!
//! A source fingerprints each compiled request and skips the network
//! round trip when nothing changed since the last issue. The
//! fingerprint updates synchronously at issue time, so the check only
//! guards against immediately-repeated identical triggers, not against
//! overlapping in-flight requests.

use bv_core::protocol::SearchRequest;

/// Serialized form of a request, stable for equality comparison.
pub fn fingerprint(request: &SearchRequest) -> String {
    serde_json::to_string(request).unwrap_or_default()
}

/// Tracks the fingerprint of the last issued request.
#[derive(Debug, Default)]
pub struct RequestDeduplicator {
    last: Option<String>,
}

impl RequestDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decides whether a request should actually be issued, recording
    /// its fingerprint when it is.
    pub fn should_issue(&mut self, fingerprint: &str, force: bool) -> bool {
        if force || self.last.as_deref() != Some(fingerprint) {
            self.last = Some(fingerprint.to_string());
            true
        } else {
            false
        }
    }
}
