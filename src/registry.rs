// src/registry.rs
//! Workflow model registry: registration, lookups, and the model selection
//! algorithm. Registration is a configuration-time operation; lookups are
//! concurrent and never exclude each other (shared read locks).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::defaults;
use crate::error::{EngineError, Result};
use crate::models::WorkflowModel;

pub struct WorkflowRegistry {
    inner: RwLock<Store>,
    default_model_id: String,
    defaults_installed: AtomicBool,
}

#[derive(Default)]
struct Store {
    /// Registration order; drives the first-match-wins tie-break.
    order: Vec<String>,
    models: HashMap<String, WorkflowModel>,
}

impl WorkflowRegistry {
    pub fn new(default_model_id: impl Into<String>) -> Self {
        Self {
            inner: RwLock::new(Store::default()),
            default_model_id: default_model_id.into(),
            defaults_installed: AtomicBool::new(false),
        }
    }

    pub fn default_model_id(&self) -> &str {
        &self.default_model_id
    }

    /// Registers the built-in models exactly once; later calls are no-ops.
    pub async fn install_defaults(&self) -> Result<()> {
        if self.defaults_installed.swap(true, Ordering::SeqCst) {
            debug!("default workflow models already installed");
            return Ok(());
        }
        for model in defaults::builtin_models() {
            self.register(model).await?;
        }
        Ok(())
    }

    pub async fn register(&self, model: WorkflowModel) -> Result<()> {
        if model.id.trim().is_empty() {
            return Err(EngineError::InvalidModel(
                "model id must not be empty".to_string(),
            ));
        }
        if model.phases.is_empty() {
            return Err(EngineError::InvalidModel(format!(
                "model '{}' declares no phases",
                model.id
            )));
        }
        if let Some(bad) = model.phases.iter().find(|p| p.outputs.is_empty()) {
            return Err(EngineError::InvalidModel(format!(
                "phase '{}' of model '{}' declares no output keys",
                bad.id, model.id
            )));
        }

        let mut store = self.inner.write().await;
        let id = model.id.clone();
        if store.models.insert(id.clone(), model).is_some() {
            // Replacing keeps the original registration-order slot.
            warn!(model_id = %id, "overwriting already-registered workflow model");
        } else {
            store.order.push(id);
        }
        Ok(())
    }

    /// Removes a model. The configured default model cannot be removed.
    pub async fn unregister(&self, id: &str) -> bool {
        if id == self.default_model_id {
            warn!(model_id = %id, "refusing to unregister the default workflow model");
            return false;
        }
        let mut store = self.inner.write().await;
        if store.models.remove(id).is_some() {
            store.order.retain(|m| m != id);
            true
        } else {
            false
        }
    }

    pub async fn get(&self, id: &str) -> Option<WorkflowModel> {
        self.inner.read().await.models.get(id).cloned()
    }

    /// All models in registration order.
    pub async fn get_all(&self) -> Vec<WorkflowModel> {
        let store = self.inner.read().await;
        store
            .order
            .iter()
            .filter_map(|id| store.models.get(id).cloned())
            .collect()
    }

    pub async fn has(&self, id: &str) -> bool {
        self.inner.read().await.models.contains_key(id)
    }

    /// Resolves the workflow model for a run. Priority order:
    /// an explicitly requested id, then content-type match, then
    /// quality-level match, then platform match, then the configured
    /// default, then the first model ever registered. Within each pass the
    /// scan runs in registration order and the first match wins; matching
    /// is case-insensitive. A declared platform list on a candidate must
    /// include the requested platform for the first two passes.
    pub async fn select_model(
        &self,
        quality_level: &str,
        content_type: Option<&str>,
        platform: Option<&str>,
        explicit_model_id: Option<&str>,
    ) -> Result<WorkflowModel> {
        let store = self.inner.read().await;
        if store.order.is_empty() {
            return Err(EngineError::NoModelsRegistered);
        }

        if let Some(id) = explicit_model_id {
            if let Some(model) = store.models.get(id) {
                debug!(model_id = %id, "explicit workflow model requested");
                return Ok(model.clone());
            }
        }

        let in_order = || store.order.iter().filter_map(|id| store.models.get(id));
        let platform_ok = |model: &WorkflowModel| match platform {
            Some(p) if model.declares_platforms() => model.supports_platform(p),
            _ => true,
        };

        if let Some(ct) = content_type {
            if let Some(model) = in_order().find(|m| m.supports_content_type(ct) && platform_ok(m))
            {
                return Ok(model.clone());
            }
        }

        if let Some(model) =
            in_order().find(|m| m.supports_quality(quality_level) && platform_ok(m))
        {
            return Ok(model.clone());
        }

        if let Some(p) = platform {
            if let Some(model) = in_order().find(|m| m.supports_platform(p)) {
                return Ok(model.clone());
            }
        }

        if let Some(model) = store.models.get(&self.default_model_id) {
            return Ok(model.clone());
        }

        // Registry is non-empty here, so the first registered id resolves.
        store
            .models
            .get(&store.order[0])
            .cloned()
            .ok_or(EngineError::NoModelsRegistered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PhaseSpec;

    fn test_phase() -> PhaseSpec {
        PhaseSpec {
            id: "content_generation".to_string(),
            name: "Generate".to_string(),
            description: String::new(),
            model: "claude-sonnet-4-5".to_string(),
            temperature: 0.7,
            max_tokens: 1024,
            timeout_ms: 0,
            system_prompt: None,
            user_prompt: "Write about {{topic}}".to_string(),
            required_inputs: vec!["topic".to_string()],
            outputs: vec!["content".to_string()],
            retryable: true,
            max_retries: 2,
        }
    }

    fn test_model(
        id: &str,
        qualities: &[&str],
        content_types: &[&str],
        platforms: &[&str],
    ) -> WorkflowModel {
        WorkflowModel {
            id: id.to_string(),
            name: id.to_string(),
            description: String::new(),
            version: "1.0.0".to_string(),
            quality_levels: qualities.iter().map(|s| s.to_string()).collect(),
            content_types: content_types.iter().map(|s| s.to_string()).collect(),
            platforms: platforms.iter().map(|s| s.to_string()).collect(),
            phases: vec![test_phase()],
            post_processing: vec![],
            structural_rules: None,
        }
    }

    async fn registry_with(models: Vec<WorkflowModel>) -> WorkflowRegistry {
        let registry = WorkflowRegistry::new("standard");
        for model in models {
            registry.register(model).await.expect("registers");
        }
        registry
    }

    #[tokio::test]
    async fn test_register_rejects_empty_id_and_empty_phases() {
        let registry = WorkflowRegistry::new("standard");

        let mut no_id = test_model("x", &["low"], &[], &[]);
        no_id.id = "  ".to_string();
        assert!(matches!(
            registry.register(no_id).await,
            Err(EngineError::InvalidModel(_))
        ));

        let mut no_phases = test_model("x", &["low"], &[], &[]);
        no_phases.phases.clear();
        assert!(matches!(
            registry.register(no_phases).await,
            Err(EngineError::InvalidModel(_))
        ));

        let mut no_outputs = test_model("x", &["low"], &[], &[]);
        no_outputs.phases[0].outputs.clear();
        assert!(matches!(
            registry.register(no_outputs).await,
            Err(EngineError::InvalidModel(_))
        ));
    }

    #[tokio::test]
    async fn test_overwrite_keeps_registration_order() {
        let registry = registry_with(vec![
            test_model("a", &["low"], &[], &[]),
            test_model("b", &["low"], &[], &[]),
        ])
        .await;

        let mut replacement = test_model("a", &["low"], &[], &[]);
        replacement.version = "2.0.0".to_string();
        registry.register(replacement).await.expect("overwrites");

        let all = registry.get_all().await;
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, "a");
        assert_eq!(all[0].version, "2.0.0");
        // "a" still wins the quality scan over "b".
        let selected = registry
            .select_model("low", None, None, None)
            .await
            .expect("selects");
        assert_eq!(selected.id, "a");
    }

    #[tokio::test]
    async fn test_unregister_refuses_default_model() {
        let registry = registry_with(vec![
            test_model("standard", &["low"], &[], &[]),
            test_model("other", &["high"], &[], &[]),
        ])
        .await;
        assert!(!registry.unregister("standard").await);
        assert!(registry.has("standard").await);
        assert!(registry.unregister("other").await);
        assert!(!registry.has("other").await);
        assert!(!registry.unregister("never-registered").await);
    }

    #[tokio::test]
    async fn test_explicit_model_id_wins_unconditionally() {
        let registry = registry_with(vec![
            test_model("standard", &["low"], &["article"], &[]),
            test_model("special", &[], &[], &["ghost"]),
        ])
        .await;
        let selected = registry
            .select_model("low", Some("article"), Some("wordpress"), Some("special"))
            .await
            .expect("selects");
        assert_eq!(selected.id, "special");
    }

    #[tokio::test]
    async fn test_content_type_match_beats_quality_match() {
        let registry = registry_with(vec![
            test_model("by-quality", &["low"], &[], &[]),
            test_model("by-type", &["premium"], &["article"], &[]),
        ])
        .await;
        let selected = registry
            .select_model("low", Some("article"), None, None)
            .await
            .expect("selects");
        assert_eq!(selected.id, "by-type");
    }

    #[tokio::test]
    async fn test_declared_platforms_filter_content_type_candidates() {
        let registry = registry_with(vec![
            test_model("wrong-platform", &[], &["article"], &["medium"]),
            test_model("right-platform", &[], &["article"], &["wordpress"]),
        ])
        .await;
        let selected = registry
            .select_model("low", Some("article"), Some("wordpress"), None)
            .await
            .expect("selects");
        assert_eq!(selected.id, "right-platform");
    }

    #[tokio::test]
    async fn test_platform_scan_when_nothing_else_matches() {
        let registry = registry_with(vec![
            test_model("standard", &["high"], &[], &[]),
            test_model("wp-only", &[], &[], &["wordpress"]),
        ])
        .await;
        let selected = registry
            .select_model("low", None, Some("wordpress"), None)
            .await
            .expect("selects");
        assert_eq!(selected.id, "wp-only");
    }

    #[tokio::test]
    async fn test_falls_back_to_default_then_first_registered() {
        let registry = registry_with(vec![
            test_model("first", &["high"], &[], &[]),
            test_model("standard", &["medium"], &[], &[]),
        ])
        .await;
        let selected = registry
            .select_model("nonexistent", None, None, None)
            .await
            .expect("selects");
        assert_eq!(selected.id, "standard");

        let registry = registry_with(vec![test_model("first", &["high"], &[], &[])]).await;
        let selected = registry
            .select_model("nonexistent", None, None, None)
            .await
            .expect("selects");
        assert_eq!(selected.id, "first");
    }

    #[tokio::test]
    async fn test_empty_registry_fails() {
        let registry = WorkflowRegistry::new("standard");
        assert!(matches!(
            registry.select_model("low", None, None, None).await,
            Err(EngineError::NoModelsRegistered)
        ));
    }

    #[tokio::test]
    async fn test_selection_is_case_insensitive() {
        let registry = registry_with(vec![test_model("standard", &["Low"], &[], &[])]).await;
        let selected = registry
            .select_model("LOW", None, None, None)
            .await
            .expect("selects");
        assert_eq!(selected.id, "standard");
    }

    #[tokio::test]
    async fn test_install_defaults_is_idempotent() {
        let registry = WorkflowRegistry::new(crate::defaults::DEFAULT_MODEL_ID);
        registry.install_defaults().await.expect("installs");
        registry.install_defaults().await.expect("second call no-ops");
        assert_eq!(registry.get_all().await.len(), 3);
        assert!(registry.has("standard").await);
        assert!(registry.has("premium").await);
        assert!(registry.has("social-post").await);
    }
}
