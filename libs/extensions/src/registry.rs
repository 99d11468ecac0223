//! Extension registry.
//!
//! Holds the registered providers in registration order and resolves the
//! active subset for an agent from the short-codes declared in its ACI.

use std::sync::Arc;

use tokio::sync::RwLock;
use vorion_common::error::{AppError, Result};
use vorion_models::parse_aci;

use crate::hooks::{has_any_hook, ExtensionProvider};

#[derive(Default)]
pub struct ExtensionRegistry {
    extensions: RwLock<Vec<Arc<dyn ExtensionProvider>>>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider.
    ///
    /// Validates the manifest grammar, rejects duplicate ids and
    /// short-codes with `Conflict`, requires at least one hook, and runs
    /// `on_load` when present — a failing `on_load` rolls the registration
    /// back.
    pub async fn register(&self, extension: Arc<dyn ExtensionProvider>) -> Result<()> {
        let manifest = extension.manifest().clone();
        manifest.validate()?;

        if !has_any_hook(extension.as_ref()) {
            return Err(AppError::Validation(format!(
                "extension {} provides no hooks",
                manifest.extension_id
            )));
        }

        {
            let extensions = self.extensions.read().await;
            for existing in extensions.iter() {
                let existing = existing.manifest();
                if existing.extension_id == manifest.extension_id {
                    return Err(AppError::Conflict(format!(
                        "extension id {} is already registered",
                        manifest.extension_id
                    )));
                }
                if existing.short_code == manifest.short_code {
                    return Err(AppError::Conflict(format!(
                        "extension short-code {} is already registered by {}",
                        manifest.short_code, existing.extension_id
                    )));
                }
            }
        }

        if let Some(lifecycle) = extension.lifecycle() {
            if let Err(e) = lifecycle.on_load().await {
                tracing::warn!(
                    extension_id = %manifest.extension_id,
                    error = %e,
                    "extension onLoad failed; rolling back registration"
                );
                return Err(e);
            }
        }

        let mut extensions = self.extensions.write().await;
        // Re-check id uniqueness: a concurrent register may have won the
        // race while onLoad ran.
        if extensions.iter().any(|existing| {
            existing.manifest().extension_id == manifest.extension_id
                || existing.manifest().short_code == manifest.short_code
        }) {
            return Err(AppError::Conflict(format!(
                "extension {} was concurrently registered",
                manifest.extension_id
            )));
        }
        extensions.push(extension);
        tracing::info!(extension_id = %manifest.extension_id, short_code = %manifest.short_code, "extension registered");
        Ok(())
    }

    /// Unregister a provider. `on_unload` runs best-effort; the extension is
    /// removed regardless of its outcome.
    pub async fn unregister(&self, extension_id: &str) -> Result<()> {
        let removed = {
            let mut extensions = self.extensions.write().await;
            let index = extensions
                .iter()
                .position(|ext| ext.manifest().extension_id == extension_id);
            match index {
                Some(index) => extensions.remove(index),
                None => {
                    return Err(AppError::NotFound(format!(
                        "extension {} is not registered",
                        extension_id
                    )))
                }
            }
        };
        if let Some(lifecycle) = removed.lifecycle() {
            if let Err(e) = lifecycle.on_unload().await {
                tracing::warn!(extension_id, error = %e, "extension onUnload failed");
            }
        }
        tracing::info!(extension_id, "extension unregistered");
        Ok(())
    }

    pub async fn get(&self, extension_id: &str) -> Option<Arc<dyn ExtensionProvider>> {
        let extensions = self.extensions.read().await;
        extensions
            .iter()
            .find(|ext| ext.manifest().extension_id == extension_id)
            .cloned()
    }

    pub async fn by_short_code(&self, short_code: &str) -> Option<Arc<dyn ExtensionProvider>> {
        let extensions = self.extensions.read().await;
        extensions
            .iter()
            .find(|ext| ext.manifest().short_code == short_code)
            .cloned()
    }

    pub async fn len(&self) -> usize {
        self.extensions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Resolve the active extension set for an agent: the intersection of
    /// the registry and the short-codes declared in the agent's ACI, in ACI
    /// declaration order. Unknown short-codes warn and are dropped.
    pub async fn resolve_for_aci(&self, aci: &str) -> Result<Vec<Arc<dyn ExtensionProvider>>> {
        let parsed = parse_aci(aci)?;
        let mut active = Vec::new();
        for code in &parsed.extension_shortcodes {
            match self.by_short_code(code).await {
                Some(ext) => active.push(ext),
                None => {
                    tracing::warn!(short_code = %code, aci, "unknown extension short-code; dropping");
                }
            }
        }
        Ok(active)
    }
}
