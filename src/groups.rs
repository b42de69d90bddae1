//! Notification group names published by the server under test.
//!
//! Per-object groups are `{kind}_{id}`, e.g. `limit_reached_42`.

pub const CHANGED: &str = "changed";
pub const LIMIT_REACHED: &str = "limit_reached";
pub const STATUS_CHANGED: &str = "status_changed";
pub const SUMMARY: &str = "summary";

/// Group endpoint for one object of `kind`.
#[must_use]
pub fn group_endpoint(kind: &str, id: impl std::fmt::Display) -> String {
    format!("{kind}_{id}")
}
