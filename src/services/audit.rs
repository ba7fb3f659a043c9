//! Audit trail dispatch
//!
//! Entries are handed to the configured sink on a spawned task after the
//! mutation they describe has committed. A failing sink is logged and
//! otherwise ignored.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, Pool, Postgres, QueryBuilder};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{ActorRole, AuditAction, AuditEntry, AuditQuery, EntityKind},
};

/// Destination for audit entries
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: &AuditEntry) -> AppResult<()>;

    /// Stored entries matching `query`, newest first, and their total.
    /// Sinks that keep nothing list nothing.
    async fn list(&self, _query: &AuditQuery) -> AppResult<(Vec<AuditEntry>, i64)> {
        Ok((Vec::new(), 0))
    }
}

/// Writes entries to the `audit` tracing target
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, entry: &AuditEntry) -> AppResult<()> {
        tracing::info!(
            target: "audit",
            actor_id = %entry.actor_id,
            actor_role = entry.actor_role.as_str(),
            action = entry.action.as_str(),
            entity_kind = entry.entity_kind.as_str(),
            entity_ref = %entry.entity_ref,
            details = %entry.details,
            "audit"
        );
        Ok(())
    }
}

/// Persists entries to the `audit_logs` table
#[derive(Clone)]
pub struct PgAuditSink {
    pool: Pool<Postgres>,
}

impl PgAuditSink {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for PgAuditSink {
    async fn record(&self, entry: &AuditEntry) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (actor_id, actor_role, action, entity_kind, entity_ref, details, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(entry.actor_id)
        .bind(entry.actor_role.as_str())
        .bind(entry.action.as_str())
        .bind(entry.entity_kind.as_str())
        .bind(&entry.entity_ref)
        .bind(&entry.details)
        .bind(entry.recorded_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list(&self, query: &AuditQuery) -> AppResult<(Vec<AuditEntry>, i64)> {
        let mut count_builder =
            QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM audit_logs WHERE 1=1");
        push_audit_filters(&mut count_builder, query);
        let total: i64 = count_builder
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;

        let mut builder = QueryBuilder::<Postgres>::new(
            "SELECT actor_id, actor_role, action, entity_kind, entity_ref, details, recorded_at \
             FROM audit_logs WHERE 1=1",
        );
        push_audit_filters(&mut builder, query);
        builder.push(" ORDER BY recorded_at DESC, id DESC LIMIT ");
        builder.push_bind(query.per_page());
        builder.push(" OFFSET ");
        builder.push_bind(query.offset());

        let rows = builder.build_query_as::<AuditRow>().fetch_all(&self.pool).await?;
        let entries = rows
            .into_iter()
            .map(AuditEntry::try_from)
            .collect::<AppResult<Vec<_>>>()?;
        Ok((entries, total))
    }
}

fn push_audit_filters(builder: &mut QueryBuilder<'_, Postgres>, query: &AuditQuery) {
    if let Some(action) = query.action {
        builder.push(" AND action = ");
        builder.push_bind(action.as_str());
    }
    if let Some(role) = query.actor_role {
        builder.push(" AND actor_role = ");
        builder.push_bind(role.as_str());
    }
    if let Some(ref entity_ref) = query.entity_ref {
        builder.push(" AND entity_ref = ");
        builder.push_bind(entity_ref.clone());
    }
    if let Some(start) = query.start_date {
        builder.push(" AND recorded_at >= ");
        builder.push_bind(start);
    }
    if let Some(end) = query.end_date {
        builder.push(" AND recorded_at <= ");
        builder.push_bind(end);
    }
}

/// `audit_logs` row before its text columns are read back into enums
#[derive(FromRow)]
struct AuditRow {
    actor_id: Uuid,
    actor_role: String,
    action: String,
    entity_kind: String,
    entity_ref: String,
    details: serde_json::Value,
    recorded_at: DateTime<Utc>,
}

impl TryFrom<AuditRow> for AuditEntry {
    type Error = AppError;

    fn try_from(row: AuditRow) -> AppResult<Self> {
        let unknown = |column: &str, value: &str| {
            AppError::Internal(format!("Unrecognized audit {} '{}'", column, value))
        };
        Ok(AuditEntry {
            actor_id: row.actor_id,
            actor_role: ActorRole::from_stored(&row.actor_role)
                .ok_or_else(|| unknown("role", &row.actor_role))?,
            action: AuditAction::from_stored(&row.action)
                .ok_or_else(|| unknown("action", &row.action))?,
            entity_kind: EntityKind::from_stored(&row.entity_kind)
                .ok_or_else(|| unknown("entity kind", &row.entity_kind))?,
            entity_ref: row.entity_ref,
            details: row.details,
            recorded_at: row.recorded_at,
        })
    }
}

/// Keeps entries in memory and mirrors them to the tracing sink; used when
/// running without a database and in tests
#[derive(Clone, Default)]
pub struct MemoryAuditSink {
    entries: Arc<Mutex<Vec<AuditEntry>>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().await.clone()
    }

    /// Entries once at least `count` have arrived, giving up after about a
    /// second
    pub async fn wait_for(&self, count: usize) -> Vec<AuditEntry> {
        for _ in 0..100 {
            let entries = self.entries().await;
            if entries.len() >= count {
                return entries;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        self.entries().await
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, entry: &AuditEntry) -> AppResult<()> {
        self.entries.lock().await.push(entry.clone());
        TracingAuditSink.record(entry).await
    }

    async fn list(&self, query: &AuditQuery) -> AppResult<(Vec<AuditEntry>, i64)> {
        let mut entries: Vec<AuditEntry> = self
            .entries
            .lock()
            .await
            .iter()
            .filter(|e| query.matches(e))
            .cloned()
            .collect();
        // Stable sort keeps later arrivals first among equal timestamps
        entries.reverse();
        entries.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));

        let total = entries.len() as i64;
        let page = entries
            .into_iter()
            .skip(query.offset() as usize)
            .take(query.per_page() as usize)
            .collect();
        Ok((page, total))
    }
}

#[derive(Clone)]
pub struct AuditService {
    sink: Arc<dyn AuditSink>,
}

impl AuditService {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    /// Hand `entry` to the sink without waiting for it
    pub fn record(&self, entry: AuditEntry) -> JoinHandle<()> {
        let sink = self.sink.clone();
        tokio::spawn(async move {
            if let Err(e) = sink.record(&entry).await {
                tracing::warn!(
                    "Failed to record audit entry {} for {}: {}",
                    entry.action.as_str(),
                    entry.entity_ref,
                    e
                );
            }
        })
    }

    /// Audit trail page, newest first
    pub async fn list(&self, query: &AuditQuery) -> AppResult<(Vec<AuditEntry>, i64)> {
        self.sink.list(query).await
    }
}

impl Default for AuditService {
    fn default() -> Self {
        Self::new(Arc::new(MemoryAuditSink::new()))
    }
}
