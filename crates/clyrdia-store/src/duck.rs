//! DuckDB record store.
//!
//! Each entity is kept as a JSON body next to the handful of columns the
//! store filters or aggregates on, so the wire shape can evolve without
//! schema migrations.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use clyrdia_core::fix::{FixRequest, FixStatus, StoredFix};
use clyrdia_core::{AnalysisRecord, ContractTemplate, Industry, Issue};
use duckdb::{Connection, ToSql, params};
use serde::de::DeserializeOwned;
use tracing::info;
use uuid::Uuid;

use crate::StoreError;
use crate::record::{AnalyticsSummary, Provenance, RecordStore};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS analyses (
    id VARCHAR PRIMARY KEY,
    fingerprint VARCHAR NOT NULL,
    risk_level VARCHAR NOT NULL,
    total_issues BIGINT NOT NULL,
    owner VARCHAR,
    source_text VARCHAR,
    body VARCHAR NOT NULL,
    created_at_ms BIGINT NOT NULL,
    deleted BOOLEAN NOT NULL DEFAULT false
);
CREATE TABLE IF NOT EXISTS issues (
    id VARCHAR PRIMARY KEY,
    analysis_id VARCHAR NOT NULL,
    body VARCHAR NOT NULL
);
CREATE TABLE IF NOT EXISTS fixes (
    id VARCHAR PRIMARY KEY,
    issue_id VARCHAR NOT NULL,
    body VARCHAR NOT NULL
);
CREATE TABLE IF NOT EXISTS templates (
    id VARCHAR PRIMARY KEY,
    industry VARCHAR NOT NULL,
    name VARCHAR NOT NULL,
    body VARCHAR NOT NULL
);
";

/// DuckDB-backed [`RecordStore`].
///
/// Supports both in-memory (ephemeral) and persistent (file-backed) modes.
/// Use [`open`](Self::open) for in-memory and [`open_persistent`](Self::open_persistent)
/// for storage that survives restarts.
pub struct DuckRecordStore {
    conn: Mutex<Connection>,
}

impl DuckRecordStore {
    /// Open an in-memory DuckDB database.
    pub fn open() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    /// Open or create a persistent DuckDB database at the given path.
    pub fn open_persistent(path: &Path) -> Result<Self, StoreError> {
        let store = Self::init(Connection::open(path)?)?;
        info!(path = %path.display(), "opened record store");
        Ok(store)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Counts ──

    /// Number of rows in `table`, soft-deleted rows included.
    pub fn count(&self, table: &str) -> Result<usize, StoreError> {
        let sql = format!("SELECT count(*)::BIGINT FROM {table}");
        let n: i64 = self.conn().query_row(&sql, [], |row| row.get(0))?;
        Ok(n as usize)
    }

    // ── JSON bodies ──

    fn bodies<T: DeserializeOwned>(
        &self,
        sql: &str,
        params: &[&dyn ToSql],
    ) -> Result<Vec<T>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql)?;
        let raw: Vec<String> = stmt
            .query_map(params, |row| row.get::<_, String>(0))?
            .collect::<Result<_, _>>()?;
        raw.iter()
            .map(|body| serde_json::from_str(body).map_err(StoreError::from))
            .collect()
    }

    fn first_body<T: DeserializeOwned>(
        &self,
        sql: &str,
        params: &[&dyn ToSql],
    ) -> Result<Option<T>, StoreError> {
        Ok(self.bodies(sql, params)?.into_iter().next())
    }
}

#[async_trait]
impl RecordStore for DuckRecordStore {
    async fn insert_analysis(
        &self,
        record: &AnalysisRecord,
        provenance: &Provenance,
    ) -> Result<String, StoreError> {
        let body = serde_json::to_string(record)?;
        self.conn().execute(
            "INSERT OR REPLACE INTO analyses
                (id, fingerprint, risk_level, total_issues, owner, source_text, body, created_at_ms, deleted)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, false)",
            params![
                record.id,
                record.fingerprint,
                record.risk_level.as_str(),
                record.total_issues as i64,
                provenance.owner,
                provenance.source_text,
                body,
                record.created_at.timestamp_millis(),
            ],
        )?;
        Ok(record.id.clone())
    }

    async fn insert_issues(
        &self,
        analysis_id: &str,
        issues: &[Issue],
    ) -> Result<Vec<String>, StoreError> {
        let conn = self.conn();
        let parents: i64 = conn.query_row(
            "SELECT count(*)::BIGINT FROM analyses WHERE id = ?",
            params![analysis_id],
            |row| row.get(0),
        )?;
        if parents == 0 {
            return Err(StoreError::NotFound {
                entity: "analysis",
                id: analysis_id.to_string(),
            });
        }
        let mut ids = Vec::with_capacity(issues.len());
        for issue in issues {
            conn.execute(
                "INSERT OR REPLACE INTO issues (id, analysis_id, body) VALUES (?, ?, ?)",
                params![issue.id, analysis_id, serde_json::to_string(issue)?],
            )?;
            ids.push(issue.id.clone());
        }
        Ok(ids)
    }

    async fn get_analysis(&self, id: &str) -> Result<Option<AnalysisRecord>, StoreError> {
        self.first_body(
            "SELECT body FROM analyses WHERE id = ? AND NOT deleted",
            params![id],
        )
    }

    async fn get_analysis_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<AnalysisRecord>, StoreError> {
        self.first_body(
            "SELECT body FROM analyses WHERE fingerprint = ? AND NOT deleted
             ORDER BY created_at_ms DESC LIMIT 1",
            params![fingerprint],
        )
    }

    async fn get_source_text(&self, analysis_id: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT source_text FROM analyses WHERE id = ? AND NOT deleted")?;
        let mut rows = stmt.query_map(params![analysis_id], |row| row.get::<_, Option<String>>(0))?;
        match rows.next() {
            Some(text) => Ok(text?),
            None => Ok(None),
        }
    }

    async fn get_issue(&self, issue_id: &str) -> Result<Option<Issue>, StoreError> {
        self.first_body("SELECT body FROM issues WHERE id = ?", params![issue_id])
    }

    async fn insert_fix(
        &self,
        issue_id: &str,
        request: &FixRequest,
        applied_by: Option<&str>,
    ) -> Result<String, StoreError> {
        let now = Utc::now();
        let fix = StoredFix {
            fix_id: Uuid::new_v4().to_string(),
            issue_id: issue_id.to_string(),
            request: request.clone(),
            status: FixStatus::Pending,
            applied_by: applied_by.map(str::to_string),
            extra: serde_json::Map::new(),
            created_at: now,
            updated_at: now,
        };
        self.conn().execute(
            "INSERT INTO fixes (id, issue_id, body) VALUES (?, ?, ?)",
            params![fix.fix_id, fix.issue_id, serde_json::to_string(&fix)?],
        )?;
        Ok(fix.fix_id)
    }

    async fn update_fix_status(
        &self,
        fix_id: &str,
        status: FixStatus,
        extra: serde_json::Map<String, serde_json::Value>,
    ) -> Result<bool, StoreError> {
        let Some(mut fix) = self.get_fix(fix_id).await? else {
            return Ok(false);
        };
        fix.status = status;
        fix.extra.extend(extra);
        fix.updated_at = Utc::now();
        let changed = self.conn().execute(
            "UPDATE fixes SET body = ? WHERE id = ?",
            params![serde_json::to_string(&fix)?, fix_id],
        )?;
        Ok(changed > 0)
    }

    async fn get_fix(&self, fix_id: &str) -> Result<Option<StoredFix>, StoreError> {
        self.first_body("SELECT body FROM fixes WHERE id = ?", params![fix_id])
    }

    async fn insert_template(&self, template: &ContractTemplate) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT OR REPLACE INTO templates (id, industry, name, body) VALUES (?, ?, ?, ?)",
            params![
                template.id,
                template.industry.as_str(),
                template.name,
                serde_json::to_string(template)?,
            ],
        )?;
        Ok(())
    }

    async fn get_templates(&self, industry: Industry) -> Result<Vec<ContractTemplate>, StoreError> {
        self.bodies(
            "SELECT body FROM templates WHERE industry = ? ORDER BY name, id",
            params![industry.as_str()],
        )
    }

    async fn get_user_analyses(
        &self,
        owner: &str,
        limit: usize,
    ) -> Result<Vec<AnalysisRecord>, StoreError> {
        self.bodies(
            "SELECT body FROM analyses WHERE owner = ? AND NOT deleted
             ORDER BY created_at_ms DESC LIMIT ?",
            params![owner, limit as i64],
        )
    }

    async fn soft_delete_analysis(&self, id: &str) -> Result<bool, StoreError> {
        let changed = self.conn().execute(
            "UPDATE analyses SET deleted = true WHERE id = ? AND NOT deleted",
            params![id],
        )?;
        Ok(changed > 0)
    }

    async fn analytics(&self, days: u32) -> Result<AnalyticsSummary, StoreError> {
        let since = (Utc::now() - ChronoDuration::days(i64::from(days))).timestamp_millis();
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT risk_level, count(*)::BIGINT, sum(total_issues)::BIGINT
             FROM analyses WHERE NOT deleted AND created_at_ms >= ?
             GROUP BY risk_level",
        )?;
        let rows: Vec<(String, i64, i64)> = stmt
            .query_map(params![since], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<Result<_, _>>()?;

        let mut summary = AnalyticsSummary {
            total_analyses: 0,
            total_issues: 0,
            risk_distribution: Default::default(),
            period_days: days,
        };
        for (level, analyses, issues) in rows {
            summary.total_analyses += analyses as usize;
            summary.total_issues += issues as usize;
            summary.risk_distribution.insert(level, analyses as usize);
        }
        Ok(summary)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let one: i32 = self.conn().query_row("SELECT 1", [], |row| row.get(0))?;
        if one == 1 {
            Ok(())
        } else {
            Err(StoreError::Other("unexpected ping result".into()))
        }
    }
}
