//! Trust engine façade.
//!
//! Owns score composition, read-time decay, and the ceiling/floor
//! composition; persistence goes through [`TrustStore`] guarded by the
//! `database` circuit breaker, and record reads flow through the XFetch
//! cache.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;
use vorion_cache::XFetchCache;
use vorion_common::error::Result;
use vorion_common::utils;
use vorion_models::{
    Attestation, TrustBand, TrustComponents, TrustHistoryEntry, TrustRecord, TrustSignal,
};
use vorion_resilience::CircuitBreakerRegistry;

use crate::ceilings::{attestation_ceiling, certification_floor, effective_score, TrustContext};
use crate::decay::decay_multiplier;
use crate::store::TrustStore;

const WEIGHT_BEHAVIORAL: f64 = 0.40;
const WEIGHT_COMPLIANCE: f64 = 0.25;
const WEIGHT_IDENTITY: f64 = 0.20;
const WEIGHT_CONTEXT: f64 = 0.15;

/// Exponential age-weighting constant: 182 days in milliseconds.
const AGE_SCALE_MS: f64 = 182.0 * 24.0 * 3600.0 * 1000.0;

const CACHE_KEY_PREFIX: &str = "vorion:trust:record:";

#[derive(Debug, Clone)]
pub struct TrustEngineConfig {
    /// Records older than this are recalculated synchronously on read.
    pub recalc_staleness_secs: i64,
    /// Signal window consulted by a recalculation.
    pub signal_window_days: i64,
    /// Minimum |Δscore| that emits a history entry.
    pub history_threshold: i64,
    /// Logical TTL for cached trust records.
    pub cache_ttl_ms: u64,
}

impl Default for TrustEngineConfig {
    fn default() -> Self {
        Self {
            recalc_staleness_secs: 60,
            signal_window_days: 7,
            history_threshold: 10,
            cache_ttl_ms: 30_000,
        }
    }
}

/// Fully composed trust view returned to callers.
#[derive(Debug, Clone, Serialize)]
pub struct EffectiveTrust {
    pub entity_id: String,
    pub raw_score: u16,
    pub decay_multiplier: f64,
    pub decayed_score: u16,
    pub effective_score: u16,
    pub band: TrustBand,
    pub components: TrustComponents,
}

pub struct TrustEngine {
    store: Arc<dyn TrustStore>,
    cache: XFetchCache,
    breakers: Arc<CircuitBreakerRegistry>,
    config: TrustEngineConfig,
}

impl TrustEngine {
    pub fn new(
        store: Arc<dyn TrustStore>,
        cache: XFetchCache,
        breakers: Arc<CircuitBreakerRegistry>,
    ) -> Self {
        Self::with_config(store, cache, breakers, TrustEngineConfig::default())
    }

    pub fn with_config(
        store: Arc<dyn TrustStore>,
        cache: XFetchCache,
        breakers: Arc<CircuitBreakerRegistry>,
        config: TrustEngineConfig,
    ) -> Self {
        Self {
            store,
            cache,
            breakers,
            config,
        }
    }

    fn cache_key(entity_id: &str) -> String {
        format!("{}{}", CACHE_KEY_PREFIX, entity_id)
    }

    /// Append a behavioral signal. Duplicate submissions by signal id are
    /// idempotent and return `false`; a trust-positive signal resets the
    /// entity's activity clock, collapsing decay.
    pub async fn record_signal(&self, signal: &TrustSignal) -> Result<bool> {
        signal.validate()?;
        let breaker = self.breakers.breaker("database").await;

        let inserted = {
            let store = self.store.clone();
            breaker
                .execute(|| async move { store.insert_signal(signal).await })
                .await?
        };
        if !inserted {
            return Ok(false);
        }

        self.ensure_record(&signal.entity_id).await?;
        if signal.is_trust_positive() {
            let store = self.store.clone();
            breaker
                .execute(|| async move {
                    store.touch_activity(&signal.entity_id, signal.timestamp).await
                })
                .await?;
        }
        let _ = self.cache.invalidate(&Self::cache_key(&signal.entity_id)).await;
        Ok(true)
    }

    /// Reset the activity clock directly (e.g. from a successful action).
    /// Applying the same timestamp twice yields an identical record.
    pub async fn record_activity(&self, entity_id: &str, at: DateTime<Utc>) -> Result<()> {
        self.ensure_record(entity_id).await?;
        let breaker = self.breakers.breaker("database").await;
        let store = self.store.clone();
        breaker
            .execute(|| async move { store.touch_activity(entity_id, at).await })
            .await?;
        let _ = self.cache.invalidate(&Self::cache_key(entity_id)).await;
        Ok(())
    }

    pub async fn add_attestation(&self, attestation: &Attestation) -> Result<()> {
        let breaker = self.breakers.breaker("database").await;
        let store = self.store.clone();
        breaker
            .execute(|| async move { store.upsert_attestation(attestation).await })
            .await?;
        let _ = self.cache.invalidate(&Self::cache_key(&attestation.agent_id)).await;
        Ok(())
    }

    pub async fn revoke_attestation(&self, agent_id: &str, id: Uuid) -> Result<bool> {
        let breaker = self.breakers.breaker("database").await;
        let store = self.store.clone();
        let revoked = breaker
            .execute(|| async move { store.revoke_attestation(id).await })
            .await?;
        if revoked {
            let _ = self.cache.invalidate(&Self::cache_key(agent_id)).await;
        }
        Ok(revoked)
    }

    pub async fn history(&self, entity_id: &str, limit: i64) -> Result<Vec<TrustHistoryEntry>> {
        self.store.history(entity_id, limit).await
    }

    /// The authoritative read path: load (via cache), recalculate when
    /// stale, then apply decay, certification floor, and the observability /
    /// context / attestation ceilings.
    pub async fn get_score(&self, entity_id: &str, context: &TrustContext) -> Result<EffectiveTrust> {
        let now = utils::current_timestamp();
        let mut record = self.load_cached(entity_id).await?;

        let stale = now - record.last_calculated_at
            > Duration::seconds(self.config.recalc_staleness_secs);
        if stale {
            record = self.recalculate(record, now).await?;
        }

        let attestations = {
            let breaker = self.breakers.breaker("database").await;
            let store = self.store.clone();
            breaker
                .execute(|| async move { store.attestations(entity_id).await })
                .await?
        };

        let days_inactive = (now - record.last_activity_at).num_seconds() as f64 / 86_400.0;
        let multiplier = decay_multiplier(days_inactive);
        let raw = record.score.clamp(0, 1000) as u16;
        let decayed = ((raw as f64) * multiplier).round().clamp(0.0, 1000.0) as u16;

        let floor = certification_floor(&attestations, now);
        let att_ceiling = attestation_ceiling(&attestations, now);
        let effective = effective_score(decayed, floor, context, att_ceiling);

        Ok(EffectiveTrust {
            entity_id: entity_id.to_string(),
            raw_score: raw,
            decay_multiplier: multiplier,
            decayed_score: decayed,
            effective_score: effective,
            band: TrustBand::from_score(effective),
            components: record.components(),
        })
    }

    async fn load_cached(&self, entity_id: &str) -> Result<TrustRecord> {
        let key = Self::cache_key(entity_id);
        let store = self.store.clone();
        let breaker = self.breakers.breaker("database").await;
        let entity = entity_id.to_string();
        self.cache
            .get_with_xfetch(&key, self.config.cache_ttl_ms, move || async move {
                breaker
                    .execute(|| async {
                        match store.load_record(&entity).await? {
                            Some(record) => Ok(record),
                            None => {
                                let record = TrustRecord::new(&entity, utils::current_timestamp());
                                store.upsert_record(&record).await
                            }
                        }
                    })
                    .await
            })
            .await
    }

    async fn ensure_record(&self, entity_id: &str) -> Result<()> {
        let breaker = self.breakers.breaker("database").await;
        let store = self.store.clone();
        breaker
            .execute(|| async move {
                if store.load_record(entity_id).await?.is_none() {
                    let record = TrustRecord::new(entity_id, utils::current_timestamp());
                    store.upsert_record(&record).await?;
                }
                Ok(())
            })
            .await
    }

    /// Recompose the persisted components from the recent signal window.
    /// With no recent signals only the calculation timestamp advances; the
    /// last composed score stands.
    async fn recalculate(&self, mut record: TrustRecord, now: DateTime<Utc>) -> Result<TrustRecord> {
        let since = now - Duration::days(self.config.signal_window_days);
        let breaker = self.breakers.breaker("database").await;
        let signals = {
            let store = self.store.clone();
            let entity = record.entity_id.clone();
            breaker
                .execute(|| async move { store.recent_signals(&entity, since).await })
                .await?
        };

        let previous_score = record.score;
        let new_signals = signals
            .iter()
            .filter(|s| s.timestamp > record.last_calculated_at)
            .count() as i64;

        if !signals.is_empty() {
            let components = TrustComponents {
                behavioral: component_mean(&signals, "behavioral", now).unwrap_or(0.5),
                compliance: component_mean(&signals, "compliance", now).unwrap_or(0.5),
                identity: component_mean(&signals, "identity", now).unwrap_or(0.5),
                context: component_mean(&signals, "context", now).unwrap_or(0.5),
            };
            let score = compose_score(&components);
            record.behavioral = components.behavioral;
            record.compliance = components.compliance;
            record.identity = components.identity;
            record.context = components.context;
            record.score = score as i32;
            record.band = TrustBand::from_score(score).index() as i16;
        }
        record.last_calculated_at = now;
        record.signal_count += new_signals;

        if (record.score - previous_score).abs() as i64 >= self.config.history_threshold {
            let entry = TrustHistoryEntry {
                id: utils::generate_id(),
                entity_id: record.entity_id.clone(),
                previous_score,
                new_score: record.score,
                previous_band: TrustBand::from_score(previous_score.clamp(0, 1000) as u16).index()
                    as i16,
                new_band: record.band,
                reason: "signal recalculation".to_string(),
                signal_id: signals.last().map(|s| s.id),
                timestamp: now,
            };
            let store = self.store.clone();
            let entry_ref = &entry;
            breaker
                .execute(|| async move { store.append_history(entry_ref).await })
                .await?;
        }

        let stored = {
            let store = self.store.clone();
            let record_ref = &record;
            breaker
                .execute(|| async move { store.upsert_record(record_ref).await })
                .await?
        };
        self.cache
            .put(&Self::cache_key(&stored.entity_id), &stored, self.config.cache_ttl_ms, 0)
            .await;
        Ok(stored)
    }
}

/// Time-weighted mean of the signals feeding one component, or `None` when
/// the window holds none.
fn component_mean(signals: &[TrustSignal], component: &str, now: DateTime<Utc>) -> Option<f64> {
    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for signal in signals {
        if signal.component() != Some(component) {
            continue;
        }
        let age_ms = (now - signal.timestamp).num_milliseconds().max(0) as f64;
        let weight = (-age_ms / AGE_SCALE_MS).exp() * signal.weight;
        numerator += signal.value * weight;
        denominator += weight;
    }
    if denominator > 0.0 {
        Some(numerator / denominator)
    } else {
        None
    }
}

/// `Σ componentᵢ · wᵢ · 1000`, rounded and clamped to [0, 1000].
fn compose_score(components: &TrustComponents) -> u16 {
    let raw = (components.behavioral * WEIGHT_BEHAVIORAL
        + components.compliance * WEIGHT_COMPLIANCE
        + components.identity * WEIGHT_IDENTITY
        + components.context * WEIGHT_CONTEXT)
        * 1000.0;
    raw.round().clamp(0.0, 1000.0) as u16
}
