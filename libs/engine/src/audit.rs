//! Cryptographically chained decision proofs.
//!
//! Every decision appends a [`ProofRecord`]: `self_hash` commits to the
//! position, the previous record's hash, and the canonical JSON of the
//! decision, its inputs, and its outputs; the hash is then signed. The
//! `previous_hash` linkage forms a total order per tenant, so any mutation
//! or reordering of history breaks verification.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use tokio::sync::Mutex;
use vorion_common::crypto::{verify_signature, DecisionSigner, SignatureAlgorithm};
use vorion_common::error::{AppError, Result};
use vorion_common::utils;
use vorion_models::proof::GENESIS_HASH;
use vorion_models::ProofRecord;

#[async_trait]
pub trait ProofStore: Send + Sync {
    async fn last_proof(&self, tenant_id: &str) -> Result<Option<ProofRecord>>;

    async fn append(&self, proof: &ProofRecord) -> Result<()>;

    async fn chain(&self, tenant_id: &str) -> Result<Vec<ProofRecord>>;
}

/// Canonical JSON: objects serialized with lexicographically sorted keys at
/// every level, so the same logical document always hashes identically.
pub fn canonical_json(value: &serde_json::Value) -> String {
    fn canonicalize(value: &serde_json::Value) -> serde_json::Value {
        match value {
            serde_json::Value::Object(map) => {
                let sorted: BTreeMap<&String, serde_json::Value> =
                    map.iter().map(|(k, v)| (k, canonicalize(v))).collect();
                serde_json::to_value(sorted).unwrap_or(serde_json::Value::Null)
            }
            serde_json::Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(canonicalize).collect())
            }
            other => other.clone(),
        }
    }
    canonicalize(value).to_string()
}

fn compute_self_hash(
    position: i64,
    previous_hash: &str,
    decision: &serde_json::Value,
    inputs: &serde_json::Value,
    outputs: &serde_json::Value,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(position.to_be_bytes());
    hasher.update(previous_hash.as_bytes());
    hasher.update(canonical_json(decision).as_bytes());
    hasher.update(canonical_json(inputs).as_bytes());
    hasher.update(canonical_json(outputs).as_bytes());
    format!("{:x}", hasher.finalize())
}

fn algorithm_name(algorithm: SignatureAlgorithm) -> &'static str {
    match algorithm {
        SignatureAlgorithm::Ed25519 => "ed25519",
        SignatureAlgorithm::EcdsaP256 => "ecdsa_p256",
    }
}

fn parse_algorithm(name: &str) -> Result<SignatureAlgorithm> {
    match name {
        "ed25519" => Ok(SignatureAlgorithm::Ed25519),
        "ecdsa_p256" => Ok(SignatureAlgorithm::EcdsaP256),
        other => Err(AppError::Validation(format!(
            "unknown signature algorithm {:?}",
            other
        ))),
    }
}

pub struct ProofChain {
    store: Arc<dyn ProofStore>,
    signer: Arc<DecisionSigner>,
    // Serializes appends per process; the per-tenant position uniqueness in
    // the durable store is the cross-instance backstop.
    append_lock: Mutex<()>,
}

impl ProofChain {
    pub fn new(store: Arc<dyn ProofStore>, signer: Arc<DecisionSigner>) -> Self {
        Self {
            store,
            signer,
            append_lock: Mutex::new(()),
        }
    }

    pub async fn append(
        &self,
        tenant_id: &str,
        decision: serde_json::Value,
        inputs: serde_json::Value,
        outputs: serde_json::Value,
    ) -> Result<ProofRecord> {
        let _guard = self.append_lock.lock().await;

        let previous = self.store.last_proof(tenant_id).await?;
        let (position, previous_hash) = match &previous {
            Some(prev) => (prev.position + 1, prev.self_hash.clone()),
            None => (0, GENESIS_HASH.to_string()),
        };

        let self_hash = compute_self_hash(position, &previous_hash, &decision, &inputs, &outputs);
        let signature = hex::encode(self.signer.sign(self_hash.as_bytes()));

        let proof = ProofRecord {
            id: utils::generate_id(),
            tenant_id: tenant_id.to_string(),
            position,
            previous_hash,
            self_hash,
            decision,
            inputs,
            outputs,
            signature,
            algorithm: algorithm_name(self.signer.algorithm()).to_string(),
            public_key: hex::encode(self.signer.public_key_bytes()),
            timestamp: utils::current_timestamp(),
        };
        self.store.append(&proof).await?;
        Ok(proof)
    }

    /// Re-derive every hash and signature in a tenant's chain. Returns the
    /// verified length; any break is an error naming the position.
    pub async fn verify(&self, tenant_id: &str) -> Result<usize> {
        let chain = self.store.chain(tenant_id).await?;
        let mut expected_previous = GENESIS_HASH.to_string();
        for (index, proof) in chain.iter().enumerate() {
            if proof.position != index as i64 {
                return Err(AppError::Validation(format!(
                    "proof chain position gap at {}",
                    index
                )));
            }
            if proof.previous_hash != expected_previous {
                return Err(AppError::Validation(format!(
                    "proof chain linkage broken at position {}",
                    proof.position
                )));
            }
            let recomputed = compute_self_hash(
                proof.position,
                &proof.previous_hash,
                &proof.decision,
                &proof.inputs,
                &proof.outputs,
            );
            if recomputed != proof.self_hash {
                return Err(AppError::Validation(format!(
                    "proof content hash mismatch at position {}",
                    proof.position
                )));
            }
            let algorithm = parse_algorithm(&proof.algorithm)?;
            let public_key = hex::decode(&proof.public_key)
                .map_err(|_| AppError::Validation("malformed proof public key".to_string()))?;
            let signature = hex::decode(&proof.signature)
                .map_err(|_| AppError::Validation("malformed proof signature".to_string()))?;
            let valid = verify_signature(
                algorithm,
                &public_key,
                proof.self_hash.as_bytes(),
                &signature,
            )?;
            if !valid {
                return Err(AppError::Validation(format!(
                    "proof signature invalid at position {}",
                    proof.position
                )));
            }
            expected_previous = proof.self_hash.clone();
        }
        Ok(chain.len())
    }
}

// ---------------------------------------------------------------------------
// Postgres implementation
// ---------------------------------------------------------------------------

pub struct PgProofStore {
    pool: PgPool,
}

impl PgProofStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProofStore for PgProofStore {
    async fn last_proof(&self, tenant_id: &str) -> Result<Option<ProofRecord>> {
        let proof = sqlx::query_as::<_, ProofRecord>(
            r#"
            SELECT id, tenant_id, position, previous_hash, self_hash, decision, inputs,
                   outputs, signature, algorithm, public_key, timestamp
            FROM proof_records
            WHERE tenant_id = $1
            ORDER BY position DESC
            LIMIT 1
            "#,
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(proof)
    }

    async fn append(&self, proof: &ProofRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO proof_records
                (id, tenant_id, position, previous_hash, self_hash, decision, inputs,
                 outputs, signature, algorithm, public_key, timestamp)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(proof.id)
        .bind(&proof.tenant_id)
        .bind(proof.position)
        .bind(&proof.previous_hash)
        .bind(&proof.self_hash)
        .bind(&proof.decision)
        .bind(&proof.inputs)
        .bind(&proof.outputs)
        .bind(&proof.signature)
        .bind(&proof.algorithm)
        .bind(&proof.public_key)
        .bind(proof.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn chain(&self, tenant_id: &str) -> Result<Vec<ProofRecord>> {
        let chain = sqlx::query_as::<_, ProofRecord>(
            r#"
            SELECT id, tenant_id, position, previous_hash, self_hash, decision, inputs,
                   outputs, signature, algorithm, public_key, timestamp
            FROM proof_records
            WHERE tenant_id = $1
            ORDER BY position ASC
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(chain)
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct InMemoryProofStore {
    proofs: Arc<tokio::sync::RwLock<Vec<ProofRecord>>>,
}

impl InMemoryProofStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProofStore for InMemoryProofStore {
    async fn last_proof(&self, tenant_id: &str) -> Result<Option<ProofRecord>> {
        let proofs = self.proofs.read().await;
        Ok(proofs
            .iter()
            .filter(|p| p.tenant_id == tenant_id)
            .max_by_key(|p| p.position)
            .cloned())
    }

    async fn append(&self, proof: &ProofRecord) -> Result<()> {
        let mut proofs = self.proofs.write().await;
        if proofs
            .iter()
            .any(|p| p.tenant_id == proof.tenant_id && p.position == proof.position)
        {
            return Err(AppError::Conflict(format!(
                "proof position {} already exists for tenant {}",
                proof.position, proof.tenant_id
            )));
        }
        proofs.push(proof.clone());
        Ok(())
    }

    async fn chain(&self, tenant_id: &str) -> Result<Vec<ProofRecord>> {
        let proofs = self.proofs.read().await;
        let mut chain: Vec<ProofRecord> = proofs
            .iter()
            .filter(|p| p.tenant_id == tenant_id)
            .cloned()
            .collect();
        chain.sort_by_key(|p| p.position);
        Ok(chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chain() -> ProofChain {
        ProofChain::new(
            Arc::new(InMemoryProofStore::new()),
            Arc::new(DecisionSigner::generate_ed25519()),
        )
    }

    #[test]
    fn test_canonical_json_sorts_keys() {
        let value = json!({ "zeta": 1, "alpha": { "nested_z": 2, "nested_a": 3 } });
        assert_eq!(
            canonical_json(&value),
            r#"{"alpha":{"nested_a":3,"nested_z":2},"zeta":1}"#
        );
    }

    #[tokio::test]
    async fn test_chain_links_and_verifies() {
        let chain = chain();
        let first = chain
            .append("tenant-a", json!({"granted": true}), json!({"level": 3}), json!({}))
            .await
            .unwrap();
        let second = chain
            .append("tenant-a", json!({"granted": false}), json!({"level": 5}), json!({}))
            .await
            .unwrap();

        assert_eq!(first.position, 0);
        assert_eq!(first.previous_hash, GENESIS_HASH);
        assert_eq!(second.position, 1);
        assert_eq!(second.previous_hash, first.self_hash);

        assert_eq!(chain.verify("tenant-a").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_tenants_have_independent_chains() {
        let chain = chain();
        chain
            .append("tenant-a", json!({"n": 1}), json!({}), json!({}))
            .await
            .unwrap();
        let other = chain
            .append("tenant-b", json!({"n": 2}), json!({}), json!({}))
            .await
            .unwrap();
        assert_eq!(other.position, 0);
        assert_eq!(other.previous_hash, GENESIS_HASH);
    }

    #[tokio::test]
    async fn test_tampered_decision_fails_verification() {
        let store = Arc::new(InMemoryProofStore::new());
        let chain = ProofChain::new(store.clone(), Arc::new(DecisionSigner::generate_ed25519()));
        chain
            .append("tenant-a", json!({"granted": true}), json!({}), json!({}))
            .await
            .unwrap();

        {
            let mut proofs = store.proofs.write().await;
            proofs[0].decision = json!({"granted": false});
        }
        assert!(chain.verify("tenant-a").await.is_err());
    }

    #[tokio::test]
    async fn test_p256_fallback_chain_verifies() {
        let chain = ProofChain::new(
            Arc::new(InMemoryProofStore::new()),
            Arc::new(DecisionSigner::generate_p256()),
        );
        chain
            .append("tenant-a", json!({"granted": true}), json!({}), json!({}))
            .await
            .unwrap();
        assert_eq!(chain.verify("tenant-a").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_appends_keep_total_order() {
        let chain = Arc::new(chain());
        let mut handles = Vec::new();
        for i in 0..20 {
            let chain = chain.clone();
            handles.push(tokio::spawn(async move {
                chain
                    .append("tenant-a", json!({ "n": i }), json!({}), json!({}))
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(chain.verify("tenant-a").await.unwrap(), 20);
    }
}
