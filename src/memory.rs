/// Session memory backed by SQLite
///
/// Summaries of working sessions are recorded per scope (normally the
/// indexed root) so the next session can pick up where the last one left
/// off. Resume also pulls recent commits from the repository when one is
/// present; that part degrades silently outside a git checkout.
use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::error::MemoryError;
use crate::types::{CommitInfo, SessionSummaryRecord};

pub struct SessionMemory {
    conn: Mutex<Connection>,
}

impl SessionMemory {
    /// Open (or create) the session database at `path`
    pub fn open(path: &Path) -> Result<Self, MemoryError> {
        let conn = Connection::open(path).map_err(|e| MemoryError::OpenFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS session_summaries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                scope TEXT NOT NULL,
                title TEXT NOT NULL,
                details TEXT NOT NULL,
                next_action TEXT,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_summaries_scope
                ON session_summaries (scope, created_at DESC);",
        )
        .map_err(|e| MemoryError::OpenFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database, used by tests
    pub fn open_in_memory() -> Result<Self, MemoryError> {
        Self::open(Path::new(":memory:"))
    }

    /// Record a session summary; returns the new row id
    pub fn record(
        &self,
        scope: &str,
        title: &str,
        details: &str,
        next_action: Option<&str>,
    ) -> Result<i64, MemoryError> {
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        let conn = self.conn.lock().unwrap_or_else(|p| p.into_inner());
        conn.execute(
            "INSERT INTO session_summaries (scope, title, details, next_action, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![scope, title, details, next_action, created_at],
        )
        .map_err(|e| MemoryError::RecordFailed(e.to_string()))?;
        Ok(conn.last_insert_rowid())
    }

    /// Most recent summary for a scope
    pub fn latest(&self, scope: &str) -> Result<Option<SessionSummaryRecord>, MemoryError> {
        let conn = self.conn.lock().unwrap_or_else(|p| p.into_inner());
        conn.query_row(
            "SELECT id, scope, title, details, next_action, created_at
             FROM session_summaries WHERE scope = ?1
             ORDER BY created_at DESC, id DESC LIMIT 1",
            params![scope],
            |row| {
                Ok(SessionSummaryRecord {
                    id: row.get(0)?,
                    scope: row.get(1)?,
                    title: row.get(2)?,
                    details: row.get(3)?,
                    next_action: row.get(4)?,
                    created_at: row.get(5)?,
                })
            },
        )
        .optional()
        .map_err(|e| MemoryError::ReadFailed(e.to_string()))
    }

    /// Recent summaries for a scope, newest first
    pub fn list(&self, scope: &str, limit: usize) -> Result<Vec<SessionSummaryRecord>, MemoryError> {
        let conn = self.conn.lock().unwrap_or_else(|p| p.into_inner());
        let mut stmt = conn
            .prepare(
                "SELECT id, scope, title, details, next_action, created_at
                 FROM session_summaries WHERE scope = ?1
                 ORDER BY created_at DESC, id DESC LIMIT ?2",
            )
            .map_err(|e| MemoryError::ReadFailed(e.to_string()))?;
        let rows = stmt
            .query_map(params![scope, limit as i64], |row| {
                Ok(SessionSummaryRecord {
                    id: row.get(0)?,
                    scope: row.get(1)?,
                    title: row.get(2)?,
                    details: row.get(3)?,
                    next_action: row.get(4)?,
                    created_at: row.get(5)?,
                })
            })
            .map_err(|e| MemoryError::ReadFailed(e.to_string()))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| MemoryError::ReadFailed(e.to_string()))
    }
}

/// Last `limit` commits of the repository containing `root`, newest first
///
/// Returns an empty list when `root` is not inside a git repository or the
/// repository has no commits yet.
pub fn recent_commits(root: &Path, limit: usize) -> Vec<CommitInfo> {
    let repo = match git2::Repository::discover(root) {
        Ok(r) => r,
        Err(e) => {
            debug!("No repository at {}: {}", root.display(), e);
            return Vec::new();
        }
    };
    let mut walk = match repo.revwalk() {
        Ok(w) => w,
        Err(_) => return Vec::new(),
    };
    if walk.push_head().is_err() {
        return Vec::new();
    }
    let mut commits = Vec::new();
    for oid in walk.take(limit) {
        let Ok(oid) = oid else { break };
        let Ok(commit) = repo.find_commit(oid) else {
            continue;
        };
        let full_id = oid.to_string();
        commits.push(CommitInfo {
            id: full_id[..12.min(full_id.len())].to_string(),
            summary: commit.summary().unwrap_or("").to_string(),
            time: commit.time().seconds(),
        });
    }
    commits
}
