//! Rotation pool for Gemini API keys
//!
//! Manages a fixed set of API keys with cursor-based rotation, failure
//! quarantine, and time-based forgiveness. The pool never shrinks: a failed
//! key stays in the list and is merely skipped until its cooldown elapses.
//!
//! Key lifecycle:
//! 1. Keys are loaded once at startup from environment-provided configuration
//! 2. The request layer calls `acquire()` before each upstream call
//! 3. A quota-class upstream error is reported via `report_failure()`,
//!    quarantining the key and advancing the rotation cursor
//! 4. Quarantine expires lazily: every read purges entries older than the
//!    cooldown, so a key becomes selectable again without explicit action
//!
//! Exhaustion (every key quarantined) is an absence value, not an error —
//! callers must handle `acquire()` returning `None`.

pub mod pool;
pub mod quota;

pub use pool::{DEFAULT_COOLDOWN, KeyPool, PoolStatus};
pub use quota::{ErrorClass, classify_status};
