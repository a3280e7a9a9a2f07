//! Query Executor
//!
//! Runs one accepted statement against the database under a wall-clock
//! timeout and a row-count bound. The connection is opened read-only with
//! `PRAGMA query_only` on top, so writes are refused here even if the
//! validator were bypassed.

use crate::error::{EngineError, Result};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Result rows of a successful execution. Truncation at the row bound is a
/// fact about the outcome, not an error.
#[derive(Debug, Clone, Serialize)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    pub row_count: usize,
    pub truncated: bool,
}

pub struct QueryExecutor {
    db_path: PathBuf,
    timeout: Duration,
    max_rows: usize,
}

impl QueryExecutor {
    pub fn new(db_path: impl AsRef<Path>, timeout: Duration, max_rows: usize) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
            timeout,
            max_rows,
        }
    }

    /// Execute one statement. The query runs on a blocking thread; when the
    /// timeout expires the in-flight query is interrupted instead of left
    /// running.
    pub async fn execute(&self, sql: &str) -> Result<QueryRows> {
        let sql = sql.trim().trim_end_matches(';').to_string();
        let db_path = self.db_path.clone();
        let max_rows = self.max_rows;
        let (handle_tx, handle_rx) = oneshot::channel();

        let task = tokio::task::spawn_blocking(move || -> Result<QueryRows> {
            let conn = Connection::open_with_flags(
                &db_path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
            .map_err(|e| EngineError::Execution(format!("failed to open database: {}", e)))?;
            conn.pragma_update(None, "query_only", true)
                .map_err(|e| EngineError::Execution(e.to_string()))?;
            let _ = handle_tx.send(conn.get_interrupt_handle());
            run_query(&conn, &sql, max_rows)
        });

        // One deadline covers both the connection open and the query. The
        // handle arrives as soon as the connection opens; if the task failed
        // before sending, the join below reports the error.
        let deadline = tokio::time::Instant::now() + self.timeout;
        let interrupt = match tokio::time::timeout_at(deadline, handle_rx).await {
            Ok(received) => received.ok(),
            Err(_) => {
                // A blocking open cannot be interrupted; the task is left to
                // finish on its own.
                warn!("database open exceeded {}s", self.timeout.as_secs());
                return Err(EngineError::QueryTimeout(self.timeout.as_secs()));
            }
        };

        match tokio::time::timeout_at(deadline, task).await {
            Ok(joined) => joined
                .map_err(|e| EngineError::Execution(format!("executor task failed: {}", e)))?,
            Err(_) => {
                warn!("query exceeded {}s, interrupting", self.timeout.as_secs());
                if let Some(handle) = interrupt {
                    handle.interrupt();
                }
                Err(EngineError::QueryTimeout(self.timeout.as_secs()))
            }
        }
    }
}

fn run_query(conn: &Connection, sql: &str, max_rows: usize) -> Result<QueryRows> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| EngineError::Execution(e.to_string()))?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let column_count = columns.len();

    let mut rows = stmt
        .query([])
        .map_err(|e| EngineError::Execution(e.to_string()))?;
    let mut out: Vec<Vec<serde_json::Value>> = Vec::new();
    let mut truncated = false;
    while let Some(row) = rows.next().map_err(|e| EngineError::Execution(e.to_string()))? {
        if out.len() >= max_rows {
            truncated = true;
            break;
        }
        let mut record = Vec::with_capacity(column_count);
        for i in 0..column_count {
            let value = row
                .get_ref(i)
                .map_err(|e| EngineError::Execution(e.to_string()))?;
            record.push(value_to_json(value));
        }
        out.push(record);
    }

    debug!("query returned {} row(s), truncated: {}", out.len(), truncated);
    Ok(QueryRows {
        columns,
        row_count: out.len(),
        rows: out,
        truncated,
    })
}

fn value_to_json(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ValueRef::Text(t) => serde_json::Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => serde_json::Value::String(format!("<blob {} bytes>", b.len())),
    }
}
