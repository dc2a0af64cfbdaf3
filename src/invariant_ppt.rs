//! Runtime invariants for the call-entry pipeline
//!
//! Handlers assert the invariants they are responsible for via
//! [`assert_invariant!`]. Every check is counted in a per-thread log so a
//! contract test can prove the invariant was actually exercised by the
//! scenario it drove, not merely declared.
//!
//! ```rust,ignore
//! use crabcall::invariant_ppt::{contract_test, SINGLE_LIVE_STREAM};
//!
//! // ... drive toggles through a coordinator ...
//! contract_test("toggle storm", &[SINGLE_LIVE_STREAM]);
//! ```

use std::cell::RefCell;
use std::collections::HashMap;
use std::thread_local;

/// At most one capture stream holds live tracks once a reconcile step completes.
pub const SINGLE_LIVE_STREAM: &str = "at most one capture stream is live";

/// The join message needs a current stream and an acknowledged transport.
pub const JOIN_REQUIRES_STREAM_AND_TRANSPORT: &str =
    "join is emitted only with a current stream and an acknowledged transport";

/// A join is emitted at most once per connection attempt.
pub const SINGLE_JOIN_PER_ATTEMPT: &str = "join is emitted at most once per connection attempt";

/// The local identity never appears in the peer roster.
pub const ROSTER_EXCLUDES_LOCAL: &str = "peer roster never contains the local identity";

thread_local! {
    static INVARIANT_LOG: RefCell<HashMap<String, u64>> = RefCell::new(HashMap::new());
}

/// Assert an invariant and record that it was checked.
///
/// # Panics
/// Panics if the condition is false.
#[macro_export]
macro_rules! assert_invariant {
    ($condition:expr, $message:expr) => {
        $crate::invariant_ppt::__assert_invariant_impl($condition, $message, None)
    };
    ($condition:expr, $message:expr, $context:expr) => {
        $crate::invariant_ppt::__assert_invariant_impl($condition, $message, Some($context))
    };
}

#[doc(hidden)]
pub fn __assert_invariant_impl(condition: bool, message: &str, context: Option<&str>) {
    INVARIANT_LOG.with(|log| {
        *log.borrow_mut().entry(message.to_string()).or_insert(0) += 1;
    });

    if !condition {
        let ctx = context.unwrap_or("unknown");
        log::error!("Invariant violated [{}]: {}", ctx, message);
        panic!("INVARIANT VIOLATION [{}]: {}", ctx, message);
    }
}

/// Number of times `message` has been checked on this thread.
pub fn invariant_checks(message: &str) -> u64 {
    INVARIANT_LOG.with(|log| log.borrow().get(message).copied().unwrap_or(0))
}

/// Check that every listed invariant was verified at least once on this thread.
///
/// # Panics
/// Panics naming the invariants that were never checked.
pub fn contract_test(test_name: &str, required_invariants: &[&str]) {
    let missing: Vec<&str> = required_invariants
        .iter()
        .copied()
        .filter(|invariant| invariant_checks(invariant) == 0)
        .collect();

    if !missing.is_empty() {
        panic!(
            "CONTRACT FAILURE [{}]: The following invariants were not checked:\n  - {}",
            test_name,
            missing.join("\n  - ")
        );
    }
}

/// Clear the invariant log
pub fn clear_invariant_log() {
    INVARIANT_LOG.with(|log| log.borrow_mut().clear());
}
