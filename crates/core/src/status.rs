//! Status vocabulary for query runs, dispatch runs, and dispatch items.
//!
//! Statuses are stored as TEXT and validated here. Query runs follow
//! `pending -> running -> {completed | cancelled | error}`; the only
//! permitted exit from a terminal state is an explicit restart back to
//! `pending`, which also clears the run's detail rows.

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Query run statuses
// ---------------------------------------------------------------------------

/// Run created but not yet picked up by an orchestrator.
pub const RUN_STATUS_PENDING: &str = "pending";

/// Orchestrator is iterating the source rows.
pub const RUN_STATUS_RUNNING: &str = "running";

/// Run finished the full loop (individual items may still have failed).
pub const RUN_STATUS_COMPLETED: &str = "completed";

/// Run was cancelled by an operator mid-loop.
pub const RUN_STATUS_CANCELLED: &str = "cancelled";

/// Run aborted: no source rows, failed authentication, or an unhandled error.
pub const RUN_STATUS_ERROR: &str = "error";

/// All valid query run status strings.
const ALL_RUN_STATUSES: &[&str] = &[
    RUN_STATUS_PENDING,
    RUN_STATUS_RUNNING,
    RUN_STATUS_COMPLETED,
    RUN_STATUS_CANCELLED,
    RUN_STATUS_ERROR,
];

/// Query run statuses that are final.
const TERMINAL_RUN_STATUSES: &[&str] = &[
    RUN_STATUS_COMPLETED,
    RUN_STATUS_CANCELLED,
    RUN_STATUS_ERROR,
];

// ---------------------------------------------------------------------------
// Dispatch run statuses
// ---------------------------------------------------------------------------

/// Dispatch run created but not started.
pub const DISPATCH_STATUS_PENDING: &str = "pending";

/// Dispatch loop is sending messages.
pub const DISPATCH_STATUS_SENDING: &str = "sending";

/// Dispatch loop finished (error counters may be non-zero).
pub const DISPATCH_STATUS_COMPLETED: &str = "completed";

/// Dispatch run cancelled by an operator mid-loop.
pub const DISPATCH_STATUS_CANCELLED: &str = "cancelled";

/// Dispatch run aborted before or during the loop.
pub const DISPATCH_STATUS_ERROR: &str = "error";

/// Dispatch run paused by an operator; may be started again.
pub const DISPATCH_STATUS_PAUSED: &str = "paused";

/// All valid dispatch run status strings.
const ALL_DISPATCH_STATUSES: &[&str] = &[
    DISPATCH_STATUS_PENDING,
    DISPATCH_STATUS_SENDING,
    DISPATCH_STATUS_COMPLETED,
    DISPATCH_STATUS_CANCELLED,
    DISPATCH_STATUS_ERROR,
    DISPATCH_STATUS_PAUSED,
];

/// Dispatch run statuses that are final.
const TERMINAL_DISPATCH_STATUSES: &[&str] = &[
    DISPATCH_STATUS_COMPLETED,
    DISPATCH_STATUS_CANCELLED,
    DISPATCH_STATUS_ERROR,
];

// ---------------------------------------------------------------------------
// Dispatch item statuses
// ---------------------------------------------------------------------------

/// Item queued, not yet attempted.
pub const ITEM_STATUS_PENDING: &str = "pending";

/// Item is being sent right now.
pub const ITEM_STATUS_SENDING: &str = "sending";

/// Provider accepted the message.
pub const ITEM_STATUS_SENT: &str = "sent";

/// The send attempt failed; detail stored on the item.
pub const ITEM_STATUS_ERROR: &str = "error";

/// Item skipped because the run was cancelled first.
pub const ITEM_STATUS_CANCELLED: &str = "cancelled";

// ---------------------------------------------------------------------------
// Template variants
// ---------------------------------------------------------------------------

/// The configured primary HSM template was used for an item.
pub const TEMPLATE_PRIMARY: &str = "primary";

/// The fallback template was used because primary data was incomplete.
pub const TEMPLATE_FALLBACK: &str = "fallback";

// ---------------------------------------------------------------------------
// Predicates & validation
// ---------------------------------------------------------------------------

/// True if the query run status is final.
pub fn is_terminal(status: &str) -> bool {
    TERMINAL_RUN_STATUSES.contains(&status)
}

/// True if a query run in this status may be cancelled.
pub fn can_cancel(status: &str) -> bool {
    status == RUN_STATUS_PENDING || status == RUN_STATUS_RUNNING
}

/// True if a query run in this status may be restarted. Restart is the one
/// sanctioned exception to terminal-state immutability.
pub fn can_restart(status: &str) -> bool {
    is_terminal(status)
}

/// True if the dispatch run status is final.
pub fn dispatch_is_terminal(status: &str) -> bool {
    TERMINAL_DISPATCH_STATUSES.contains(&status)
}

/// True if a dispatch run in this status may be started.
pub fn dispatch_can_start(status: &str) -> bool {
    status == DISPATCH_STATUS_PENDING || status == DISPATCH_STATUS_PAUSED
}

/// True if a dispatch run in this status may be cancelled.
pub fn dispatch_can_cancel(status: &str) -> bool {
    status == DISPATCH_STATUS_PENDING
        || status == DISPATCH_STATUS_SENDING
        || status == DISPATCH_STATUS_PAUSED
}

/// Validate that a query run status string is recognized.
pub fn validate_run_status(status: &str) -> Result<(), CoreError> {
    if ALL_RUN_STATUSES.contains(&status) {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "Unknown run status: '{status}'. Valid statuses: {}",
            ALL_RUN_STATUSES.join(", ")
        )))
    }
}

/// Validate that a dispatch run status string is recognized.
pub fn validate_dispatch_status(status: &str) -> Result<(), CoreError> {
    if ALL_DISPATCH_STATUSES.contains(&status) {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "Unknown dispatch status: '{status}'. Valid statuses: {}",
            ALL_DISPATCH_STATUSES.join(", ")
        )))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
