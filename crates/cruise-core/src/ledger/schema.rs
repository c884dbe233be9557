//! Usage database schema.
//!
//! Four tables mirroring the ledger entities. Timestamps are integer epoch
//! milliseconds; booleans are 0/1. Statements are idempotent so the schema
//! can be applied on every startup.

pub(super) const SCHEMA_STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS sessions (
        session_id TEXT PRIMARY KEY,
        started_at INTEGER NOT NULL,
        ended_at INTEGER,
        total_cost REAL NOT NULL DEFAULT 0,
        total_tokens INTEGER NOT NULL DEFAULT 0,
        project_path TEXT NOT NULL DEFAULT ''
    )",
    "CREATE TABLE IF NOT EXISTS usage_logs (
        id TEXT PRIMARY KEY,
        timestamp INTEGER NOT NULL,
        session_id TEXT NOT NULL REFERENCES sessions(session_id),
        model TEXT NOT NULL,
        provider TEXT NOT NULL,
        input_tokens INTEGER NOT NULL DEFAULT 0,
        output_tokens INTEGER NOT NULL DEFAULT 0,
        cache_read_tokens INTEGER NOT NULL DEFAULT 0,
        cache_write_tokens INTEGER NOT NULL DEFAULT 0,
        cost_usd REAL NOT NULL DEFAULT 0,
        latency_ms INTEGER NOT NULL DEFAULT 0,
        success INTEGER NOT NULL DEFAULT 1,
        error_type TEXT,
        project_path TEXT NOT NULL DEFAULT '',
        routed_from TEXT,
        routing_reason TEXT
    )",
    "CREATE TABLE IF NOT EXISTS rate_limit_events (
        id TEXT PRIMARY KEY,
        timestamp INTEGER NOT NULL,
        model TEXT NOT NULL,
        error_type TEXT NOT NULL,
        reset_time INTEGER,
        tokens_used_before_limit INTEGER NOT NULL DEFAULT 0,
        window_hours INTEGER NOT NULL DEFAULT 5
    )",
    "CREATE TABLE IF NOT EXISTS routing_decisions (
        id TEXT PRIMARY KEY,
        timestamp INTEGER NOT NULL,
        session_id TEXT NOT NULL REFERENCES sessions(session_id),
        original_provider TEXT NOT NULL,
        routed_provider TEXT NOT NULL,
        routed_model TEXT NOT NULL,
        reason TEXT NOT NULL DEFAULT '',
        estimated_savings REAL NOT NULL DEFAULT 0
    )",
    "CREATE INDEX IF NOT EXISTS idx_usage_logs_timestamp ON usage_logs (timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_usage_logs_session ON usage_logs (session_id)",
    "CREATE INDEX IF NOT EXISTS idx_rate_limit_events_model_ts
        ON rate_limit_events (model, timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_routing_decisions_timestamp ON routing_decisions (timestamp)",
];
