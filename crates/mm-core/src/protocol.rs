//! # Acceptance Protocol Constants
//!
//! Both parties have [`ACCEPTANCE_WINDOW_SECS`] from the creation of the
//! request to accept. When the window closes without mutual acceptance the
//! session is declined and the coordination thread is deleted
//! [`TEARDOWN_GRACE_SECS`] after the warning is posted.

use chrono::{DateTime, Duration, Utc};

/// Length of the acceptance window (5 minutes).
pub const ACCEPTANCE_WINDOW_SECS: u64 = 300;

/// Delay between the teardown warning and the thread deletion.
pub const TEARDOWN_GRACE_SECS: u64 = 10;

/// Reaction that signals acceptance when no other emoji is configured.
pub const DEFAULT_ACCEPT_EMOJI: &str = "\u{2705}";

/// Deadline for a request created at `created_at` with the given window.
pub fn acceptance_deadline(created_at: DateTime<Utc>, window: std::time::Duration) -> DateTime<Utc> {
    let window = Duration::from_std(window).unwrap_or(Duration::seconds(ACCEPTANCE_WINDOW_SECS as i64));
    created_at + window
}
