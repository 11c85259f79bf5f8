//! Durable storage behind the context store.
//!
//! Three logical tables: missions (context blob), execution logs (one row per
//! entry, indexed by mission and timestamp), report versions (unique
//! `(mission_id, version)`, at most one current). SQLite runs on blocking
//! threads; the trait keeps a seam for the in-memory test double.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::error::ContextError;
use crate::schemas::{ExecutionLogEntry, MissionContext, MissionStatus, ResearchReportVersion};

/// Persistence seam for mission state.
#[async_trait]
pub trait MissionPersistence: Send + Sync {
    /// Writes the full context blob (insert or replace).
    async fn save_context(&self, ctx: &MissionContext) -> Result<(), ContextError>;

    /// Appends one execution log row.
    async fn append_log_entry(
        &self,
        mission_id: &str,
        entry: &ExecutionLogEntry,
    ) -> Result<(), ContextError>;

    /// Loads one mission context, if present.
    async fn load_context(&self, mission_id: &str) -> Result<Option<MissionContext>, ContextError>;

    /// Loads every mission not in a terminal status (startup recovery).
    async fn load_open_missions(&self) -> Result<Vec<MissionContext>, ContextError>;

    /// Inserts a report version; flips `is_current` off on the others when the
    /// new row is current. Rejects duplicate `(mission_id, version)`.
    async fn insert_report_version(
        &self,
        version: &ResearchReportVersion,
    ) -> Result<(), ContextError>;

    /// Marks the given version current and all others not.
    async fn set_current_version(&self, mission_id: &str, version: u32)
        -> Result<(), ContextError>;

    async fn list_report_versions(
        &self,
        mission_id: &str,
    ) -> Result<Vec<ResearchReportVersion>, ContextError>;

    /// Log rows for a mission, oldest first, optionally after `since`.
    async fn load_logs(
        &self,
        mission_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ExecutionLogEntry>, ContextError>;
}

fn store_err(e: impl std::fmt::Display) -> ContextError {
    ContextError::Persistence(e.to_string())
}

/// SQLite-backed persistence. One file; a connection is opened per operation
/// on a blocking thread.
pub struct SqlitePersistence {
    db_path: std::path::PathBuf,
}

impl SqlitePersistence {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, ContextError> {
        let db_path = path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(store_err)?;
        }
        let conn = rusqlite::Connection::open(&db_path).map_err(store_err)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS missions (
                mission_id TEXT PRIMARY KEY,
                chat_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                status TEXT NOT NULL,
                error_info TEXT,
                context TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS execution_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                mission_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                entry TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_execution_logs_mission
                ON execution_logs(mission_id, timestamp);
            CREATE TABLE IF NOT EXISTS report_versions (
                mission_id TEXT NOT NULL,
                version INTEGER NOT NULL,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                revision_notes TEXT,
                is_current INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                UNIQUE(mission_id, version)
            );
            "#,
        )
        .map_err(store_err)?;
        Ok(Self { db_path })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, ContextError>
    where
        T: Send + 'static,
        F: FnOnce(&rusqlite::Connection) -> Result<T, ContextError> + Send + 'static,
    {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path).map_err(store_err)?;
            f(&conn)
        })
        .await
        .map_err(store_err)?
    }
}

fn row_to_version(row: &rusqlite::Row<'_>) -> rusqlite::Result<ResearchReportVersion> {
    Ok(ResearchReportVersion {
        mission_id: row.get(0)?,
        version: row.get::<_, i64>(1)? as u32,
        title: row.get(2)?,
        content: row.get(3)?,
        revision_notes: row.get(4)?,
        is_current: row.get::<_, i64>(5)? != 0,
        created_at: row
            .get::<_, String>(6)?
            .parse::<DateTime<Utc>>()
            .unwrap_or_else(|_| Utc::now()),
    })
}

#[async_trait]
impl MissionPersistence for SqlitePersistence {
    async fn save_context(&self, ctx: &MissionContext) -> Result<(), ContextError> {
        let blob = serde_json::to_string(ctx).map_err(store_err)?;
        let (mission_id, chat_id, user_id) = (
            ctx.mission_id.clone(),
            ctx.chat_id.clone(),
            ctx.user_id.clone(),
        );
        let status = ctx.status.as_str().to_string();
        let error_info = ctx.error_info.clone();
        let created_at = ctx.created_at.to_rfc3339();
        let updated_at = ctx.updated_at.to_rfc3339();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO missions
                 (mission_id, chat_id, user_id, status, error_info, context, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    mission_id, chat_id, user_id, status, error_info, blob, created_at, updated_at
                ],
            )
            .map_err(store_err)?;
            Ok(())
        })
        .await
    }

    async fn append_log_entry(
        &self,
        mission_id: &str,
        entry: &ExecutionLogEntry,
    ) -> Result<(), ContextError> {
        let mission_id = mission_id.to_string();
        let timestamp = entry.timestamp.to_rfc3339();
        let blob = serde_json::to_string(entry).map_err(store_err)?;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO execution_logs (mission_id, timestamp, entry) VALUES (?1, ?2, ?3)",
                params![mission_id, timestamp, blob],
            )
            .map_err(store_err)?;
            Ok(())
        })
        .await
    }

    async fn load_context(&self, mission_id: &str) -> Result<Option<MissionContext>, ContextError> {
        let mission_id = mission_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare("SELECT context FROM missions WHERE mission_id = ?1")
                .map_err(store_err)?;
            let mut rows = stmt.query(params![mission_id]).map_err(store_err)?;
            match rows.next().map_err(store_err)? {
                Some(row) => {
                    let blob: String = row.get(0).map_err(store_err)?;
                    Ok(Some(serde_json::from_str(&blob).map_err(store_err)?))
                }
                None => Ok(None),
            }
        })
        .await
    }

    async fn load_open_missions(&self) -> Result<Vec<MissionContext>, ContextError> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT context FROM missions
                     WHERE status NOT IN ('stopped', 'completed', 'failed')",
                )
                .map_err(store_err)?;
            let mut rows = stmt.query([]).map_err(store_err)?;
            let mut out = Vec::new();
            while let Some(row) = rows.next().map_err(store_err)? {
                let blob: String = row.get(0).map_err(store_err)?;
                match serde_json::from_str::<MissionContext>(&blob) {
                    Ok(ctx) => out.push(ctx),
                    Err(e) => tracing::warn!(error = %e, "skipping unreadable mission blob"),
                }
            }
            Ok(out)
        })
        .await
    }

    async fn insert_report_version(
        &self,
        version: &ResearchReportVersion,
    ) -> Result<(), ContextError> {
        let v = version.clone();
        self.with_conn(move |conn| {
            let tx = conn.unchecked_transaction().map_err(store_err)?;
            if v.is_current {
                tx.execute(
                    "UPDATE report_versions SET is_current = 0 WHERE mission_id = ?1",
                    params![v.mission_id],
                )
                .map_err(store_err)?;
            }
            tx.execute(
                "INSERT INTO report_versions
                 (mission_id, version, title, content, revision_notes, is_current, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    v.mission_id,
                    v.version as i64,
                    v.title,
                    v.content,
                    v.revision_notes,
                    v.is_current as i64,
                    v.created_at.to_rfc3339()
                ],
            )
            .map_err(store_err)?;
            tx.commit().map_err(store_err)?;
            Ok(())
        })
        .await
    }

    async fn set_current_version(
        &self,
        mission_id: &str,
        version: u32,
    ) -> Result<(), ContextError> {
        let mission_id = mission_id.to_string();
        self.with_conn(move |conn| {
            let tx = conn.unchecked_transaction().map_err(store_err)?;
            let changed = tx
                .execute(
                    "UPDATE report_versions SET is_current = 1
                     WHERE mission_id = ?1 AND version = ?2",
                    params![mission_id, version as i64],
                )
                .map_err(store_err)?;
            if changed == 0 {
                return Err(ContextError::UnknownVersion(version));
            }
            tx.execute(
                "UPDATE report_versions SET is_current = 0
                 WHERE mission_id = ?1 AND version != ?2",
                params![mission_id, version as i64],
            )
            .map_err(store_err)?;
            tx.commit().map_err(store_err)?;
            Ok(())
        })
        .await
    }

    async fn list_report_versions(
        &self,
        mission_id: &str,
    ) -> Result<Vec<ResearchReportVersion>, ContextError> {
        let mission_id = mission_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT mission_id, version, title, content, revision_notes, is_current, created_at
                     FROM report_versions WHERE mission_id = ?1 ORDER BY version ASC",
                )
                .map_err(store_err)?;
            let rows = stmt
                .query_map(params![mission_id], row_to_version)
                .map_err(store_err)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row.map_err(store_err)?);
            }
            Ok(out)
        })
        .await
    }

    async fn load_logs(
        &self,
        mission_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ExecutionLogEntry>, ContextError> {
        let mission_id = mission_id.to_string();
        let since = since.map(|t| t.to_rfc3339());
        self.with_conn(move |conn| {
            let sql = match since {
                Some(_) => {
                    "SELECT entry FROM execution_logs
                     WHERE mission_id = ?1 AND timestamp > ?2 ORDER BY id ASC"
                }
                None => "SELECT entry FROM execution_logs WHERE mission_id = ?1 ORDER BY id ASC",
            };
            let mut stmt = conn.prepare(sql).map_err(store_err)?;
            let mut rows = match &since {
                Some(s) => stmt.query(params![mission_id, s]),
                None => stmt.query(params![mission_id]),
            }
            .map_err(store_err)?;
            let mut out = Vec::new();
            while let Some(row) = rows.next().map_err(store_err)? {
                let blob: String = row.get(0).map_err(store_err)?;
                out.push(serde_json::from_str(&blob).map_err(store_err)?);
            }
            Ok(out)
        })
        .await
    }
}

/// In-memory persistence used by unit tests and as a fallback when no durable
/// path is configured.
#[derive(Default)]
pub struct MemoryPersistence {
    contexts: Mutex<std::collections::HashMap<String, MissionContext>>,
    logs: Mutex<std::collections::HashMap<String, Vec<ExecutionLogEntry>>>,
    versions: Mutex<std::collections::HashMap<String, Vec<ResearchReportVersion>>>,
    /// When set, every write fails (persistence failure tests).
    pub fail_writes: std::sync::atomic::AtomicBool,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops the durable row for a mission (consistency-sweep tests).
    #[cfg(test)]
    pub(crate) fn wipe_context_for_test(&self, mission_id: &str) {
        self.contexts
            .lock()
            .expect("contexts lock")
            .remove(mission_id);
    }

    fn check(&self) -> Result<(), ContextError> {
        if self.fail_writes.load(std::sync::atomic::Ordering::Relaxed) {
            return Err(ContextError::Persistence("simulated write failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl MissionPersistence for MemoryPersistence {
    async fn save_context(&self, ctx: &MissionContext) -> Result<(), ContextError> {
        self.check()?;
        self.contexts
            .lock()
            .expect("contexts lock")
            .insert(ctx.mission_id.clone(), ctx.clone());
        Ok(())
    }

    async fn append_log_entry(
        &self,
        mission_id: &str,
        entry: &ExecutionLogEntry,
    ) -> Result<(), ContextError> {
        self.check()?;
        self.logs
            .lock()
            .expect("logs lock")
            .entry(mission_id.to_string())
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    async fn load_context(&self, mission_id: &str) -> Result<Option<MissionContext>, ContextError> {
        Ok(self
            .contexts
            .lock()
            .expect("contexts lock")
            .get(mission_id)
            .cloned())
    }

    async fn load_open_missions(&self) -> Result<Vec<MissionContext>, ContextError> {
        Ok(self
            .contexts
            .lock()
            .expect("contexts lock")
            .values()
            .filter(|c| !c.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn insert_report_version(
        &self,
        version: &ResearchReportVersion,
    ) -> Result<(), ContextError> {
        self.check()?;
        let mut versions = self.versions.lock().expect("versions lock");
        let list = versions.entry(version.mission_id.clone()).or_default();
        if list.iter().any(|v| v.version == version.version) {
            return Err(ContextError::Persistence(format!(
                "duplicate report version {}",
                version.version
            )));
        }
        if version.is_current {
            for v in list.iter_mut() {
                v.is_current = false;
            }
        }
        list.push(version.clone());
        Ok(())
    }

    async fn set_current_version(
        &self,
        mission_id: &str,
        version: u32,
    ) -> Result<(), ContextError> {
        self.check()?;
        let mut versions = self.versions.lock().expect("versions lock");
        let list = versions
            .get_mut(mission_id)
            .ok_or_else(|| ContextError::NotFound(mission_id.to_string()))?;
        if !list.iter().any(|v| v.version == version) {
            return Err(ContextError::UnknownVersion(version));
        }
        for v in list.iter_mut() {
            v.is_current = v.version == version;
        }
        Ok(())
    }

    async fn list_report_versions(
        &self,
        mission_id: &str,
    ) -> Result<Vec<ResearchReportVersion>, ContextError> {
        let mut out = self
            .versions
            .lock()
            .expect("versions lock")
            .get(mission_id)
            .cloned()
            .unwrap_or_default();
        out.sort_by_key(|v| v.version);
        Ok(out)
    }

    async fn load_logs(
        &self,
        mission_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ExecutionLogEntry>, ContextError> {
        let logs = self
            .logs
            .lock()
            .expect("logs lock")
            .get(mission_id)
            .cloned()
            .unwrap_or_default();
        Ok(match since {
            Some(t) => logs.into_iter().filter(|e| e.timestamp > t).collect(),
            None => logs,
        })
    }
}

/// Missions in a terminal status never reload; used by startup recovery.
pub fn is_recoverable(status: MissionStatus) -> bool {
    !status.is_terminal()
}
