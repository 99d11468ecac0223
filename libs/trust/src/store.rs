//! Trust persistence.
//!
//! The durable store is a transactional database; writers rely on row-level
//! atomic updates with `RETURNING`, and readers tolerate the engine's 60 s
//! staleness window. The in-memory implementation backs tests and
//! single-node development.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;
use vorion_common::error::Result;
use vorion_models::{Attestation, TrustHistoryEntry, TrustRecord, TrustSignal};

#[async_trait]
pub trait TrustStore: Send + Sync {
    async fn load_record(&self, entity_id: &str) -> Result<Option<TrustRecord>>;

    /// Insert-or-update; returns the stored row.
    async fn upsert_record(&self, record: &TrustRecord) -> Result<TrustRecord>;

    /// Append a signal. Returns false when a signal with the same id was
    /// already stored (idempotent resubmission).
    async fn insert_signal(&self, signal: &TrustSignal) -> Result<bool>;

    async fn recent_signals(
        &self,
        entity_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<TrustSignal>>;

    /// Advance `last_activity_at` to `at` when it is newer. Applying the
    /// same timestamp twice leaves the record unchanged.
    async fn touch_activity(&self, entity_id: &str, at: DateTime<Utc>) -> Result<()>;

    async fn append_history(&self, entry: &TrustHistoryEntry) -> Result<()>;

    async fn history(&self, entity_id: &str, limit: i64) -> Result<Vec<TrustHistoryEntry>>;

    async fn attestations(&self, agent_id: &str) -> Result<Vec<Attestation>>;

    async fn upsert_attestation(&self, attestation: &Attestation) -> Result<()>;

    async fn revoke_attestation(&self, id: Uuid) -> Result<bool>;
}

// ---------------------------------------------------------------------------
// Postgres implementation
// ---------------------------------------------------------------------------

pub struct PgTrustStore {
    pool: PgPool,
}

impl PgTrustStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TrustStore for PgTrustStore {
    async fn load_record(&self, entity_id: &str) -> Result<Option<TrustRecord>> {
        let record = sqlx::query_as::<_, TrustRecord>(
            r#"
            SELECT entity_id, score, band, behavioral, compliance, identity, context,
                   last_calculated_at, last_activity_at, signal_count
            FROM trust_records
            WHERE entity_id = $1
            "#,
        )
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn upsert_record(&self, record: &TrustRecord) -> Result<TrustRecord> {
        let stored = sqlx::query_as::<_, TrustRecord>(
            r#"
            INSERT INTO trust_records
                (entity_id, score, band, behavioral, compliance, identity, context,
                 last_calculated_at, last_activity_at, signal_count)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (entity_id) DO UPDATE SET
                score = EXCLUDED.score,
                band = EXCLUDED.band,
                behavioral = EXCLUDED.behavioral,
                compliance = EXCLUDED.compliance,
                identity = EXCLUDED.identity,
                context = EXCLUDED.context,
                last_calculated_at = EXCLUDED.last_calculated_at,
                last_activity_at = EXCLUDED.last_activity_at,
                signal_count = EXCLUDED.signal_count
            RETURNING entity_id, score, band, behavioral, compliance, identity, context,
                      last_calculated_at, last_activity_at, signal_count
            "#,
        )
        .bind(&record.entity_id)
        .bind(record.score)
        .bind(record.band)
        .bind(record.behavioral)
        .bind(record.compliance)
        .bind(record.identity)
        .bind(record.context)
        .bind(record.last_calculated_at)
        .bind(record.last_activity_at)
        .bind(record.signal_count)
        .fetch_one(&self.pool)
        .await?;
        Ok(stored)
    }

    async fn insert_signal(&self, signal: &TrustSignal) -> Result<bool> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO trust_signals
                (id, entity_id, signal_type, value, weight, source, timestamp, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(signal.id)
        .bind(&signal.entity_id)
        .bind(&signal.signal_type)
        .bind(signal.value)
        .bind(signal.weight)
        .bind(&signal.source)
        .bind(signal.timestamp)
        .bind(&signal.metadata)
        .execute(&self.pool)
        .await?;
        Ok(inserted.rows_affected() > 0)
    }

    async fn recent_signals(
        &self,
        entity_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<TrustSignal>> {
        let signals = sqlx::query_as::<_, TrustSignal>(
            r#"
            SELECT id, entity_id, signal_type, value, weight, source, timestamp, metadata
            FROM trust_signals
            WHERE entity_id = $1 AND timestamp >= $2
            ORDER BY timestamp ASC
            "#,
        )
        .bind(entity_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(signals)
    }

    async fn touch_activity(&self, entity_id: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE trust_records
            SET last_activity_at = $2
            WHERE entity_id = $1 AND last_activity_at < $2
            "#,
        )
        .bind(entity_id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_history(&self, entry: &TrustHistoryEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trust_history
                (id, entity_id, previous_score, new_score, previous_band, new_band,
                 reason, signal_id, timestamp)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(entry.id)
        .bind(&entry.entity_id)
        .bind(entry.previous_score)
        .bind(entry.new_score)
        .bind(entry.previous_band)
        .bind(entry.new_band)
        .bind(&entry.reason)
        .bind(entry.signal_id)
        .bind(entry.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn history(&self, entity_id: &str, limit: i64) -> Result<Vec<TrustHistoryEntry>> {
        let entries = sqlx::query_as::<_, TrustHistoryEntry>(
            r#"
            SELECT id, entity_id, previous_score, new_score, previous_band, new_band,
                   reason, signal_id, timestamp
            FROM trust_history
            WHERE entity_id = $1
            ORDER BY timestamp DESC
            LIMIT $2
            "#,
        )
        .bind(entity_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    async fn attestations(&self, agent_id: &str) -> Result<Vec<Attestation>> {
        let attestations = sqlx::query_as::<_, Attestation>(
            r#"
            SELECT id, agent_id, issuer, attestation_type, claims, issued_at, expires_at,
                   signature, algorithm, revoked
            FROM attestations
            WHERE agent_id = $1
            ORDER BY issued_at DESC
            "#,
        )
        .bind(agent_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(attestations)
    }

    async fn upsert_attestation(&self, attestation: &Attestation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO attestations
                (id, agent_id, issuer, attestation_type, claims, issued_at, expires_at,
                 signature, algorithm, revoked)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                claims = EXCLUDED.claims,
                expires_at = EXCLUDED.expires_at,
                revoked = EXCLUDED.revoked
            "#,
        )
        .bind(attestation.id)
        .bind(&attestation.agent_id)
        .bind(&attestation.issuer)
        .bind(attestation.attestation_type)
        .bind(&attestation.claims)
        .bind(attestation.issued_at)
        .bind(attestation.expires_at)
        .bind(&attestation.signature)
        .bind(&attestation.algorithm)
        .bind(attestation.revoked)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn revoke_attestation(&self, id: Uuid) -> Result<bool> {
        let updated = sqlx::query(
            r#"
            UPDATE attestations SET revoked = TRUE WHERE id = $1 AND revoked = FALSE
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(updated.rows_affected() > 0)
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryState {
    records: HashMap<String, TrustRecord>,
    signals: Vec<TrustSignal>,
    signal_ids: HashSet<Uuid>,
    history: Vec<TrustHistoryEntry>,
    attestations: HashMap<Uuid, Attestation>,
}

#[derive(Clone, Default)]
pub struct InMemoryTrustStore {
    state: Arc<RwLock<MemoryState>>,
}

impl InMemoryTrustStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TrustStore for InMemoryTrustStore {
    async fn load_record(&self, entity_id: &str) -> Result<Option<TrustRecord>> {
        let state = self.state.read().await;
        Ok(state.records.get(entity_id).cloned())
    }

    async fn upsert_record(&self, record: &TrustRecord) -> Result<TrustRecord> {
        let mut state = self.state.write().await;
        state
            .records
            .insert(record.entity_id.clone(), record.clone());
        Ok(record.clone())
    }

    async fn insert_signal(&self, signal: &TrustSignal) -> Result<bool> {
        let mut state = self.state.write().await;
        if !state.signal_ids.insert(signal.id) {
            return Ok(false);
        }
        state.signals.push(signal.clone());
        Ok(true)
    }

    async fn recent_signals(
        &self,
        entity_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<TrustSignal>> {
        let state = self.state.read().await;
        let mut signals: Vec<TrustSignal> = state
            .signals
            .iter()
            .filter(|s| s.entity_id == entity_id && s.timestamp >= since)
            .cloned()
            .collect();
        signals.sort_by_key(|s| s.timestamp);
        Ok(signals)
    }

    async fn touch_activity(&self, entity_id: &str, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(record) = state.records.get_mut(entity_id) {
            if record.last_activity_at < at {
                record.last_activity_at = at;
            }
        }
        Ok(())
    }

    async fn append_history(&self, entry: &TrustHistoryEntry) -> Result<()> {
        let mut state = self.state.write().await;
        state.history.push(entry.clone());
        Ok(())
    }

    async fn history(&self, entity_id: &str, limit: i64) -> Result<Vec<TrustHistoryEntry>> {
        let state = self.state.read().await;
        let mut entries: Vec<TrustHistoryEntry> = state
            .history
            .iter()
            .filter(|e| e.entity_id == entity_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        entries.truncate(limit as usize);
        Ok(entries)
    }

    async fn attestations(&self, agent_id: &str) -> Result<Vec<Attestation>> {
        let state = self.state.read().await;
        Ok(state
            .attestations
            .values()
            .filter(|a| a.agent_id == agent_id)
            .cloned()
            .collect())
    }

    async fn upsert_attestation(&self, attestation: &Attestation) -> Result<()> {
        let mut state = self.state.write().await;
        state.attestations.insert(attestation.id, attestation.clone());
        Ok(())
    }

    async fn revoke_attestation(&self, id: Uuid) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.attestations.get_mut(&id) {
            Some(attestation) if !attestation.revoked => {
                attestation.revoked = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
