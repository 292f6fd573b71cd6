//! Lightweight topic-based publish/subscribe bus.
//!
//! The bus is the only coordination mechanism between the ghostwriter
//! processes: a broker routes every published `(topic, payload)` pair to
//! all current subscribers of that topic, independent of sender and
//! receiver identity. Payloads are JSON objects carried as newline-delimited
//! frames over localhost TCP.
//!
//! Guarantees:
//! - Per-subscriber delivery order follows publish order from a single
//!   publisher; no ordering is promised across publishers.
//! - At QoS [`QoS::AtLeastOnce`] a message is delivered at least once;
//!   consumers must be idempotent under duplicates.
//! - A subscription made `durable` survives a disconnect: the broker parks
//!   it and buffers matching messages up to a bounded retention, replaying
//!   them in order when a client reconnects with the same client id.
//! - The wildcard pattern `#` subscribes to every topic (for inspection
//!   tooling).
//!
//! Connect failures are retried a bounded number of times with a fixed
//! backoff, then surfaced as [`Error::Connect`] so the owning process can
//! treat them as fatal to startup.

mod broker;
mod client;
mod error;
mod frame;

pub use broker::{Broker, RETAINED_LIMIT};
pub use client::{BusClient, BusHandle, CONNECT_MAX_ATTEMPTS, CONNECT_RETRY_DELAY_MS};
pub use error::{Error, Result};
pub use frame::{Frame, QoS};

/// True when `pattern` matches `topic`. `#` matches every topic; anything
/// else is an exact match.
pub(crate) fn pattern_matches(pattern: &str, topic: &str) -> bool {
    pattern == "#" || pattern == topic
}

#[cfg(test)]
mod tests {
    use super::pattern_matches;

    #[test]
    fn wildcard_matches_everything() {
        assert!(pattern_matches("#", "TYPER"));
        assert!(pattern_matches("#", ""));
    }

    #[test]
    fn exact_match_only_otherwise() {
        assert!(pattern_matches("STATE", "STATE"));
        assert!(!pattern_matches("STATE", "STATE2"));
        assert!(!pattern_matches("STATE", "state"));
    }
}
