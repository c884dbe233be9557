//! Session model: one row per proxy process lifetime.

use serde::{Deserialize, Serialize};

/// A single process lifetime, used to bucket totals.
///
/// Exactly one session is current per process; it is created at startup and
/// closed (given an `ended_at`) at shutdown.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    /// `session_<start-instant-ms>`
    pub session_id: String,
    pub started_at: i64,
    pub ended_at: Option<i64>,
    /// Sum of `cost_usd` over all usage logs in this session
    pub total_cost: f64,
    /// Sum of input+output tokens over all usage logs in this session
    pub total_tokens: u64,
    pub project_path: String,
}
