//! Durable usage ledger backed by SQLite.
//!
//! The ledger uniquely owns the store: every other component holds an `Arc`
//! and goes through these operations, nothing mutates the database
//! directly. WAL journaling admits concurrent reads during writes; writes
//! are serialized by the pool.
#![allow(
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::as_conversions,
    reason = "token counts and timestamps round-trip through SQLite as i64"
)]

mod schema;

use cruise_types::models::{
    NewRateLimitEvent, NewRoutingDecision, NewUsageLog, RateLimitEvent, RoutingDecision, Session,
    Timeframe, UsageLog, UsageTotals,
};
use cruise_types::{pricing, ProxyError};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::Row;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::now_ms;

const MS_PER_HOUR: i64 = 3_600_000;
const MS_PER_DAY: i64 = 86_400_000;

/// Durable store for usage logs, rate-limit events, routing decisions, and
/// sessions. One instance per process; owns the current session.
pub struct UsageLedger {
    pool: SqlitePool,
    session_id: String,
    project_path: String,
    closed: AtomicBool,
}

impl UsageLedger {
    /// Open (or create) the database at `db_path` and start a new session.
    pub async fn open(db_path: &Path, project_path: String) -> Result<Self, ProxyError> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| ProxyError::Ledger {
                message: format!("Failed to create database directory: {e}"),
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(ledger_err)?;

        for statement in schema::SCHEMA_STATEMENTS {
            sqlx::query(statement).execute(&pool).await.map_err(ledger_err)?;
        }

        let started_at = now_ms();
        let session_id = format!("session_{started_at}");
        sqlx::query(
            "INSERT INTO sessions (session_id, started_at, total_cost, total_tokens, project_path)
             VALUES (?, ?, 0, 0, ?)",
        )
        .bind(&session_id)
        .bind(started_at)
        .bind(&project_path)
        .execute(&pool)
        .await
        .map_err(ledger_err)?;

        tracing::info!("Usage ledger opened, session {}", session_id);

        Ok(Self { pool, session_id, project_path, closed: AtomicBool::new(false) })
    }

    /// Id of the session this process writes to.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Insert one usage log row and refresh the session totals atomically.
    ///
    /// Assigns a fresh id, stamps the current session and project path, and
    /// computes `cost_usd` from the pricing table.
    pub async fn add_log(&self, entry: NewUsageLog) -> Result<UsageLog, ProxyError> {
        let cost_usd = pricing::cost_usd(
            &entry.model,
            entry.input_tokens,
            entry.output_tokens,
            entry.cache_read_tokens,
            entry.cache_write_tokens,
        );
        let log = UsageLog {
            id: generate_entry_id("log"),
            timestamp: entry.timestamp,
            session_id: self.session_id.clone(),
            model: entry.model,
            provider: entry.provider,
            input_tokens: entry.input_tokens,
            output_tokens: entry.output_tokens,
            cache_read_tokens: entry.cache_read_tokens,
            cache_write_tokens: entry.cache_write_tokens,
            cost_usd,
            latency_ms: entry.latency_ms,
            success: entry.success,
            error_type: entry.error_type,
            project_path: self.project_path.clone(),
            routed_from: entry.routed_from,
            routing_reason: entry.routing_reason,
        };

        let mut tx = self.pool.begin().await.map_err(ledger_err)?;

        sqlx::query(
            "INSERT INTO usage_logs (id, timestamp, session_id, model, provider,
                input_tokens, output_tokens, cache_read_tokens, cache_write_tokens,
                cost_usd, latency_ms, success, error_type, project_path,
                routed_from, routing_reason)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&log.id)
        .bind(log.timestamp)
        .bind(&log.session_id)
        .bind(&log.model)
        .bind(&log.provider)
        .bind(log.input_tokens as i64)
        .bind(log.output_tokens as i64)
        .bind(log.cache_read_tokens as i64)
        .bind(log.cache_write_tokens as i64)
        .bind(log.cost_usd)
        .bind(log.latency_ms as i64)
        .bind(log.success)
        .bind(&log.error_type)
        .bind(&log.project_path)
        .bind(&log.routed_from)
        .bind(&log.routing_reason)
        .execute(&mut *tx)
        .await
        .map_err(ledger_err)?;

        sqlx::query(
            "UPDATE sessions SET
                total_cost = (SELECT COALESCE(SUM(cost_usd), 0)
                    FROM usage_logs WHERE session_id = ?),
                total_tokens = (SELECT COALESCE(SUM(input_tokens + output_tokens), 0)
                    FROM usage_logs WHERE session_id = ?)
             WHERE session_id = ?",
        )
        .bind(&log.session_id)
        .bind(&log.session_id)
        .bind(&log.session_id)
        .execute(&mut *tx)
        .await
        .map_err(ledger_err)?;

        tx.commit().await.map_err(ledger_err)?;

        Ok(log)
    }

    /// Logs covering `[now - hours, now]`, newest first.
    pub async fn get_window_logs(&self, hours: u32) -> Result<Vec<UsageLog>, ProxyError> {
        self.fetch_logs_since(now_ms() - i64::from(hours) * MS_PER_HOUR).await
    }

    /// Logs of the current session, newest first.
    pub async fn get_session_logs(&self) -> Result<Vec<UsageLog>, ProxyError> {
        let rows = sqlx::query(
            "SELECT * FROM usage_logs WHERE session_id = ? ORDER BY timestamp DESC",
        )
        .bind(&self.session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(ledger_err)?;
        rows.iter().map(map_usage_log).collect()
    }

    /// Logs since local midnight today, newest first.
    pub async fn get_today_logs(&self) -> Result<Vec<UsageLog>, ProxyError> {
        self.fetch_logs_since(local_midnight_ms()).await
    }

    /// Most recent logs regardless of window, newest first.
    pub async fn get_recent_logs(&self, limit: u32) -> Result<Vec<UsageLog>, ProxyError> {
        let rows = sqlx::query("SELECT * FROM usage_logs ORDER BY timestamp DESC LIMIT ?")
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(ledger_err)?;
        rows.iter().map(map_usage_log).collect()
    }

    async fn fetch_logs_since(&self, since: i64) -> Result<Vec<UsageLog>, ProxyError> {
        let rows = sqlx::query(
            "SELECT * FROM usage_logs WHERE timestamp >= ? ORDER BY timestamp DESC",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(ledger_err)?;
        rows.iter().map(map_usage_log).collect()
    }

    /// Sum of input+output tokens over the window, for rate-limit events.
    pub async fn get_window_token_sum(&self, hours: u32) -> Result<u64, ProxyError> {
        let since = now_ms() - i64::from(hours) * MS_PER_HOUR;
        let sum: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(input_tokens + output_tokens), 0)
             FROM usage_logs WHERE timestamp >= ?",
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(ledger_err)?;
        Ok(sum as u64)
    }

    /// Reduce one timeframe of logs into totals.
    pub async fn get_total_usage(&self, timeframe: Timeframe) -> Result<UsageTotals, ProxyError> {
        let (predicate, bound) = self.timeframe_predicate(timeframe);
        let sql = format!(
            "SELECT COALESCE(SUM(input_tokens), 0),
                    COALESCE(SUM(output_tokens), 0),
                    COALESCE(SUM(cache_read_tokens), 0),
                    COALESCE(SUM(cache_write_tokens), 0),
                    COALESCE(SUM(cost_usd), 0.0),
                    COUNT(*),
                    COALESCE(AVG(latency_ms), 0.0)
             FROM usage_logs WHERE {predicate}"
        );
        let row = bind_timeframe(sqlx::query(&sql), &bound)
            .fetch_one(&self.pool)
            .await
            .map_err(ledger_err)?;

        Ok(UsageTotals {
            input_tokens: row.try_get::<i64, _>(0).map_err(ledger_err)? as u64,
            output_tokens: row.try_get::<i64, _>(1).map_err(ledger_err)? as u64,
            cache_read_tokens: row.try_get::<i64, _>(2).map_err(ledger_err)? as u64,
            cache_write_tokens: row.try_get::<i64, _>(3).map_err(ledger_err)? as u64,
            total_cost: row.try_get::<f64, _>(4).map_err(ledger_err)?,
            request_count: row.try_get::<i64, _>(5).map_err(ledger_err)? as u64,
            avg_latency: row.try_get::<f64, _>(6).map_err(ledger_err)?,
        })
    }

    /// Insert one rate-limit event. Does not touch learned limits; the
    /// limit learner reads these back.
    pub async fn add_rate_limit_event(
        &self,
        event: NewRateLimitEvent,
    ) -> Result<RateLimitEvent, ProxyError> {
        let stored = RateLimitEvent {
            id: generate_entry_id("rle"),
            timestamp: event.timestamp,
            model: event.model,
            error_type: event.error_type,
            reset_time: event.reset_time,
            tokens_used_before_limit: event.tokens_used_before_limit,
            window_hours: event.window_hours,
        };

        sqlx::query(
            "INSERT INTO rate_limit_events
                (id, timestamp, model, error_type, reset_time,
                 tokens_used_before_limit, window_hours)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&stored.id)
        .bind(stored.timestamp)
        .bind(&stored.model)
        .bind(&stored.error_type)
        .bind(stored.reset_time)
        .bind(stored.tokens_used_before_limit as i64)
        .bind(i64::from(stored.window_hours))
        .execute(&self.pool)
        .await
        .map_err(ledger_err)?;

        Ok(stored)
    }

    /// All observed rate-limit events for one model, newest first.
    pub async fn get_rate_limit_history(
        &self,
        model: &str,
    ) -> Result<Vec<RateLimitEvent>, ProxyError> {
        let rows = sqlx::query(
            "SELECT * FROM rate_limit_events WHERE model = ? ORDER BY timestamp DESC",
        )
        .bind(model)
        .fetch_all(&self.pool)
        .await
        .map_err(ledger_err)?;
        rows.iter().map(map_rate_limit_event).collect()
    }

    /// Rate-limit events across all models in `[now - hours, now]`, newest first.
    pub async fn get_rate_limit_window(
        &self,
        hours: u32,
    ) -> Result<Vec<RateLimitEvent>, ProxyError> {
        let since = now_ms() - i64::from(hours) * MS_PER_HOUR;
        let rows = sqlx::query(
            "SELECT * FROM rate_limit_events WHERE timestamp >= ? ORDER BY timestamp DESC",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(ledger_err)?;
        rows.iter().map(map_rate_limit_event).collect()
    }

    /// Insert one routing decision, stamped with the current session.
    pub async fn add_routing_decision(
        &self,
        decision: NewRoutingDecision,
    ) -> Result<RoutingDecision, ProxyError> {
        let stored = RoutingDecision {
            id: generate_entry_id("route"),
            timestamp: decision.timestamp,
            session_id: self.session_id.clone(),
            original_provider: decision.original_provider,
            routed_provider: decision.routed_provider,
            routed_model: decision.routed_model,
            reason: decision.reason,
            estimated_savings: decision.estimated_savings,
        };

        sqlx::query(
            "INSERT INTO routing_decisions
                (id, timestamp, session_id, original_provider, routed_provider,
                 routed_model, reason, estimated_savings)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&stored.id)
        .bind(stored.timestamp)
        .bind(&stored.session_id)
        .bind(&stored.original_provider)
        .bind(&stored.routed_provider)
        .bind(&stored.routed_model)
        .bind(&stored.reason)
        .bind(stored.estimated_savings)
        .execute(&self.pool)
        .await
        .map_err(ledger_err)?;

        Ok(stored)
    }

    /// Sum of estimated savings over one timeframe, in USD.
    pub async fn get_routing_savings(&self, timeframe: Timeframe) -> Result<f64, ProxyError> {
        let (predicate, bound) = self.timeframe_predicate(timeframe);
        let sql = format!(
            "SELECT COALESCE(SUM(estimated_savings), 0.0) FROM routing_decisions WHERE {predicate}"
        );
        let row = bind_timeframe(sqlx::query(&sql), &bound)
            .fetch_one(&self.pool)
            .await
            .map_err(ledger_err)?;
        row.try_get::<f64, _>(0).map_err(ledger_err)
    }

    /// The current session row, with up-to-date totals.
    pub async fn get_current_session(&self) -> Result<Session, ProxyError> {
        let row = sqlx::query("SELECT * FROM sessions WHERE session_id = ?")
            .bind(&self.session_id)
            .fetch_one(&self.pool)
            .await
            .map_err(ledger_err)?;
        map_session(&row)
    }

    /// Delete usage logs older than `retention_days`. Returns the number of
    /// rows deleted. Events, decisions, and sessions are untouched.
    pub async fn cleanup(&self, retention_days: u32) -> Result<u64, ProxyError> {
        let cutoff = now_ms() - i64::from(retention_days) * MS_PER_DAY;
        let result = sqlx::query("DELETE FROM usage_logs WHERE timestamp < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(ledger_err)?;
        let deleted = result.rows_affected();
        if deleted > 0 {
            tracing::info!("Ledger cleanup removed {} usage log(s)", deleted);
        }
        Ok(deleted)
    }

    /// Reclaim disk space.
    pub async fn vacuum(&self) -> Result<(), ProxyError> {
        sqlx::query("VACUUM").execute(&self.pool).await.map_err(ledger_err)?;
        Ok(())
    }

    /// Mark the session ended and close the store. Idempotent.
    pub async fn close(&self) -> Result<(), ProxyError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        sqlx::query("UPDATE sessions SET ended_at = ? WHERE session_id = ?")
            .bind(now_ms())
            .bind(&self.session_id)
            .execute(&self.pool)
            .await
            .map_err(ledger_err)?;
        self.pool.close().await;
        tracing::info!("Usage ledger closed, session {}", self.session_id);
        Ok(())
    }

    fn timeframe_predicate(&self, timeframe: Timeframe) -> (&'static str, TimeframeBound) {
        match timeframe {
            Timeframe::Session => {
                ("session_id = ?", TimeframeBound::Session(self.session_id.clone()))
            }
            Timeframe::Today => ("timestamp >= ?", TimeframeBound::Since(local_midnight_ms())),
            Timeframe::Week => {
                ("timestamp >= ?", TimeframeBound::Since(now_ms() - 7 * MS_PER_DAY))
            }
        }
    }
}

enum TimeframeBound {
    Session(String),
    Since(i64),
}

fn bind_timeframe<'q>(
    query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    bound: &'q TimeframeBound,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    match bound {
        TimeframeBound::Session(session_id) => query.bind(session_id),
        TimeframeBound::Since(since) => query.bind(since),
    }
}

fn ledger_err(err: sqlx::Error) -> ProxyError {
    ProxyError::Ledger { message: err.to_string() }
}

/// Entry id: millisecond timestamp plus a short random alphanumeric suffix.
/// Collision avoidance only, not a security measure.
fn generate_entry_id(prefix: &str) -> String {
    use rand::Rng;
    let suffix: String = rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();
    format!("{}_{}_{}", prefix, now_ms(), suffix)
}

/// Epoch milliseconds of local midnight today. Falls back to now if the
/// local timezone has no representable midnight (DST edge).
fn local_midnight_ms() -> i64 {
    let now = chrono::Local::now();
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .and_then(|t| t.and_local_timezone(chrono::Local).earliest())
        .map_or_else(|| now.timestamp_millis(), |midnight| midnight.timestamp_millis())
}

fn map_usage_log(row: &SqliteRow) -> Result<UsageLog, ProxyError> {
    Ok(UsageLog {
        id: row.try_get("id").map_err(ledger_err)?,
        timestamp: row.try_get("timestamp").map_err(ledger_err)?,
        session_id: row.try_get("session_id").map_err(ledger_err)?,
        model: row.try_get("model").map_err(ledger_err)?,
        provider: row.try_get("provider").map_err(ledger_err)?,
        input_tokens: row.try_get::<i64, _>("input_tokens").map_err(ledger_err)? as u64,
        output_tokens: row.try_get::<i64, _>("output_tokens").map_err(ledger_err)? as u64,
        cache_read_tokens: row.try_get::<i64, _>("cache_read_tokens").map_err(ledger_err)? as u64,
        cache_write_tokens: row.try_get::<i64, _>("cache_write_tokens").map_err(ledger_err)?
            as u64,
        cost_usd: row.try_get("cost_usd").map_err(ledger_err)?,
        latency_ms: row.try_get::<i64, _>("latency_ms").map_err(ledger_err)? as u64,
        success: row.try_get("success").map_err(ledger_err)?,
        error_type: row.try_get("error_type").map_err(ledger_err)?,
        project_path: row.try_get("project_path").map_err(ledger_err)?,
        routed_from: row.try_get("routed_from").map_err(ledger_err)?,
        routing_reason: row.try_get("routing_reason").map_err(ledger_err)?,
    })
}

fn map_rate_limit_event(row: &SqliteRow) -> Result<RateLimitEvent, ProxyError> {
    Ok(RateLimitEvent {
        id: row.try_get("id").map_err(ledger_err)?,
        timestamp: row.try_get("timestamp").map_err(ledger_err)?,
        model: row.try_get("model").map_err(ledger_err)?,
        error_type: row.try_get("error_type").map_err(ledger_err)?,
        reset_time: row.try_get("reset_time").map_err(ledger_err)?,
        tokens_used_before_limit: row
            .try_get::<i64, _>("tokens_used_before_limit")
            .map_err(ledger_err)? as u64,
        window_hours: row.try_get::<i64, _>("window_hours").map_err(ledger_err)? as u32,
    })
}

fn map_session(row: &SqliteRow) -> Result<Session, ProxyError> {
    Ok(Session {
        session_id: row.try_get("session_id").map_err(ledger_err)?,
        started_at: row.try_get("started_at").map_err(ledger_err)?,
        ended_at: row.try_get("ended_at").map_err(ledger_err)?,
        total_cost: row.try_get("total_cost").map_err(ledger_err)?,
        total_tokens: row.try_get::<i64, _>("total_tokens").map_err(ledger_err)? as u64,
        project_path: row.try_get("project_path").map_err(ledger_err)?,
    })
}
