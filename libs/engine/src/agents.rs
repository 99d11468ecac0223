//! Agent identity persistence and registration.
//!
//! An [`AgentIdentity`] is created on first registration and never
//! destroyed; revocation is a trust signal, not a row delete. The trust
//! fields are only ever rewritten from the trust engine's composed view,
//! keeping `band = scoreToBand(score)` true at every read.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::RwLock;
use vorion_common::error::{AppError, Result};
use vorion_common::utils;
use vorion_models::{parse_aci, AgentIdentity, TrustBand};

#[async_trait]
pub trait AgentStore: Send + Sync {
    async fn load(&self, agent_id: &str) -> Result<Option<AgentIdentity>>;

    /// Insert a new identity; an existing `agent_id` is a `Conflict`.
    async fn insert(&self, agent: &AgentIdentity) -> Result<AgentIdentity>;

    /// Rewrite the trust projection; returns the updated row.
    async fn update_trust(&self, agent_id: &str, score: i32, band: i16) -> Result<AgentIdentity>;

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<AgentIdentity>>;
}

/// Build a fresh identity from a validated ACI. New agents start at the
/// neutral score until signals accumulate.
pub fn identity_from_aci(
    publisher: impl Into<String>,
    name: impl Into<String>,
    aci: &str,
    metadata: serde_json::Value,
) -> Result<AgentIdentity> {
    let parsed = parse_aci(aci)?;
    let now = utils::current_timestamp();
    Ok(AgentIdentity {
        agent_id: utils::generate_id().to_string(),
        publisher: publisher.into(),
        name: name.into(),
        aci: aci.to_string(),
        competence_level: parsed.level as i16,
        domain_mask: parsed.domain_bits() as i64,
        version: parsed.version.to_string(),
        trust_band: TrustBand::T2.index() as i16,
        trust_score: 500,
        metadata,
        created_at: now,
        updated_at: now,
    })
}

// ---------------------------------------------------------------------------
// Postgres implementation
// ---------------------------------------------------------------------------

pub struct PgAgentStore {
    pool: PgPool,
}

impl PgAgentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AgentStore for PgAgentStore {
    async fn load(&self, agent_id: &str) -> Result<Option<AgentIdentity>> {
        let agent = sqlx::query_as::<_, AgentIdentity>(
            r#"
            SELECT agent_id, publisher, name, aci, competence_level, domain_mask, version,
                   trust_band, trust_score, metadata, created_at, updated_at
            FROM agent_identities
            WHERE agent_id = $1
            "#,
        )
        .bind(agent_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(agent)
    }

    async fn insert(&self, agent: &AgentIdentity) -> Result<AgentIdentity> {
        let stored = sqlx::query_as::<_, AgentIdentity>(
            r#"
            INSERT INTO agent_identities
                (agent_id, publisher, name, aci, competence_level, domain_mask, version,
                 trust_band, trust_score, metadata, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING agent_id, publisher, name, aci, competence_level, domain_mask, version,
                      trust_band, trust_score, metadata, created_at, updated_at
            "#,
        )
        .bind(&agent.agent_id)
        .bind(&agent.publisher)
        .bind(&agent.name)
        .bind(&agent.aci)
        .bind(agent.competence_level)
        .bind(agent.domain_mask)
        .bind(&agent.version)
        .bind(agent.trust_band)
        .bind(agent.trust_score)
        .bind(&agent.metadata)
        .bind(agent.created_at)
        .bind(agent.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db_err)
                if db_err.constraint() == Some("agent_identities_pkey") =>
            {
                AppError::Conflict(format!("agent {} already registered", agent.agent_id))
            }
            _ => AppError::Database(e),
        })?;
        Ok(stored)
    }

    async fn update_trust(&self, agent_id: &str, score: i32, band: i16) -> Result<AgentIdentity> {
        let updated = sqlx::query_as::<_, AgentIdentity>(
            r#"
            UPDATE agent_identities
            SET trust_score = $2, trust_band = $3, updated_at = NOW()
            WHERE agent_id = $1
            RETURNING agent_id, publisher, name, aci, competence_level, domain_mask, version,
                      trust_band, trust_score, metadata, created_at, updated_at
            "#,
        )
        .bind(agent_id)
        .bind(score)
        .bind(band)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("agent {} is not registered", agent_id)))?;
        Ok(updated)
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<AgentIdentity>> {
        let agents = sqlx::query_as::<_, AgentIdentity>(
            r#"
            SELECT agent_id, publisher, name, aci, competence_level, domain_mask, version,
                   trust_band, trust_score, metadata, created_at, updated_at
            FROM agent_identities
            ORDER BY created_at ASC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(agents)
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct InMemoryAgentStore {
    agents: Arc<RwLock<HashMap<String, AgentIdentity>>>,
}

impl InMemoryAgentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AgentStore for InMemoryAgentStore {
    async fn load(&self, agent_id: &str) -> Result<Option<AgentIdentity>> {
        let agents = self.agents.read().await;
        Ok(agents.get(agent_id).cloned())
    }

    async fn insert(&self, agent: &AgentIdentity) -> Result<AgentIdentity> {
        let mut agents = self.agents.write().await;
        if agents.contains_key(&agent.agent_id) {
            return Err(AppError::Conflict(format!(
                "agent {} already registered",
                agent.agent_id
            )));
        }
        agents.insert(agent.agent_id.clone(), agent.clone());
        Ok(agent.clone())
    }

    async fn update_trust(&self, agent_id: &str, score: i32, band: i16) -> Result<AgentIdentity> {
        let mut agents = self.agents.write().await;
        let agent = agents
            .get_mut(agent_id)
            .ok_or_else(|| AppError::NotFound(format!("agent {} is not registered", agent_id)))?;
        agent.trust_score = score;
        agent.trust_band = band;
        agent.updated_at = utils::current_timestamp();
        Ok(agent.clone())
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<AgentIdentity>> {
        let agents = self.agents.read().await;
        let mut all: Vec<AgentIdentity> = agents.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(all
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_identity_from_aci() {
        let agent = identity_from_aci(
            "a3i",
            "Banquet Advisor",
            "a3i.vorion.banquet-advisor:FHC-L3@1.2.0#gov,audit",
            json!({"team": "events"}),
        )
        .unwrap();

        assert_eq!(agent.competence_level, 3);
        assert_eq!(agent.version, "1.2.0");
        assert_eq!(agent.trust_score, 500);
        assert_eq!(agent.band(), TrustBand::T2);
        let expected_mask = (1i64 << 5) | (1 << 7) | (1 << 2);
        assert_eq!(agent.domain_mask, expected_mask);
    }

    #[test]
    fn test_identity_from_invalid_aci_fails() {
        assert!(identity_from_aci("a3i", "x", "not-an-aci", json!({})).is_err());
    }

    #[tokio::test]
    async fn test_insert_is_exclusive() {
        let store = InMemoryAgentStore::new();
        let agent = identity_from_aci(
            "a3i",
            "Banquet Advisor",
            "a3i.vorion.banquet-advisor:FHC-L3@1.2.0",
            json!({}),
        )
        .unwrap();

        store.insert(&agent).await.unwrap();
        let err = store.insert(&agent).await.unwrap_err();
        assert_eq!(err.code(), "CONFLICT");
    }

    #[tokio::test]
    async fn test_update_trust_keeps_band_invariant() {
        let store = InMemoryAgentStore::new();
        let agent = identity_from_aci(
            "a3i",
            "Banquet Advisor",
            "a3i.vorion.banquet-advisor:FHC-L3@1.2.0",
            json!({}),
        )
        .unwrap();
        store.insert(&agent).await.unwrap();

        let band = TrustBand::from_score(820);
        let updated = store
            .update_trust(&agent.agent_id, 820, band.index() as i16)
            .await
            .unwrap();
        assert_eq!(updated.trust_score, 820);
        assert_eq!(updated.band(), TrustBand::T4);
    }
}
