// src/models.rs
//! Workflow model definitions and the generation job payload.

use serde::{Deserialize, Serialize};

use crate::template::{TemplateValue, TemplateVars};

/// A named pipeline definition: an ordered list of generation phases plus
/// the selection metadata (quality levels, content types, platforms) the
/// registry matches against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowModel {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub version: String,
    pub quality_levels: Vec<String>,
    /// Empty means the model declares no content types.
    #[serde(default)]
    pub content_types: Vec<String>,
    /// Empty means the model declares no platforms and matches any.
    #[serde(default)]
    pub platforms: Vec<String>,
    pub phases: Vec<PhaseSpec>,
    #[serde(default)]
    pub post_processing: Vec<String>,
    /// Consumed by downstream content validation, not by the orchestrator.
    #[serde(default)]
    pub structural_rules: Option<StructuralRules>,
}

impl WorkflowModel {
    pub fn declares_platforms(&self) -> bool {
        !self.platforms.is_empty()
    }

    pub fn supports_quality(&self, quality_level: &str) -> bool {
        contains_ignore_case(&self.quality_levels, quality_level)
    }

    pub fn supports_content_type(&self, content_type: &str) -> bool {
        contains_ignore_case(&self.content_types, content_type)
    }

    pub fn supports_platform(&self, platform: &str) -> bool {
        contains_ignore_case(&self.platforms, platform)
    }
}

fn contains_ignore_case(values: &[String], needle: &str) -> bool {
    values.iter().any(|v| v.eq_ignore_ascii_case(needle))
}

/// One generation step of a workflow model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseSpec {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Generation model name forwarded to the backend.
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Per-call timeout in milliseconds; 0 falls back to the service default.
    #[serde(default)]
    pub timeout_ms: u64,
    #[serde(default)]
    pub system_prompt: Option<String>,
    pub user_prompt: String,
    #[serde(default)]
    pub required_inputs: Vec<String>,
    pub outputs: Vec<String>,
    #[serde(default = "default_retryable")]
    pub retryable: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_retryable() -> bool {
    true
}

fn default_max_retries() -> u32 {
    2
}

/// Structural bounds a finished artifact is validated against downstream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StructuralRules {
    pub min_sections: Option<u32>,
    pub max_sections: Option<u32>,
    pub min_internal_links: Option<u32>,
    pub max_internal_links: Option<u32>,
    pub min_external_links: Option<u32>,
    pub max_external_links: Option<u32>,
}

/// The job submission payload: everything the queue (or the local phase
/// driver) needs to produce one content artifact.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationJobConfig {
    pub topic: String,
    pub keywords: Vec<String>,
    pub target_audience: Option<String>,
    pub tone: Option<String>,
    pub word_count: Option<u32>,
    pub quality_level: String,
    pub content_type: Option<String>,
    pub custom_instructions: Option<String>,
    pub generate_featured_image: bool,
    pub generate_content_images: bool,
    pub optimize_for_seo: bool,
    pub generate_structured_data: bool,
    pub crawl_external_links: bool,
    pub include_cluster_links: bool,
    pub min_internal_links: Option<u32>,
    pub max_internal_links: Option<u32>,
    pub platform: Option<String>,
    /// Explicit model override; wins over every selection rule.
    pub workflow_model_id: Option<String>,
    pub is_draft: bool,
    /// Cost attribution identifiers, resolved by the identity collaborator.
    pub organization_id: Option<String>,
    pub user_id: Option<String>,
}

impl GenerationJobConfig {
    /// Variable map exposed to phase prompt templates.
    pub fn template_vars(&self) -> TemplateVars {
        let mut vars = TemplateVars::new();
        vars.set("topic", TemplateValue::text(&self.topic));
        vars.set(
            "keywords",
            TemplateValue::List(
                self.keywords
                    .iter()
                    .map(|k| TemplateValue::text(k))
                    .collect(),
            ),
        );
        vars.set("target_audience", opt_text(&self.target_audience));
        vars.set("tone", opt_text(&self.tone));
        vars.set(
            "word_count",
            self.word_count
                .map(|n| TemplateValue::Number(n as f64))
                .unwrap_or(TemplateValue::Null),
        );
        vars.set("quality_level", TemplateValue::text(&self.quality_level));
        vars.set("content_type", opt_text(&self.content_type));
        vars.set("custom_instructions", opt_text(&self.custom_instructions));
        vars.set("platform", opt_text(&self.platform));
        vars.set(
            "generate_featured_image",
            TemplateValue::Bool(self.generate_featured_image),
        );
        vars.set(
            "generate_content_images",
            TemplateValue::Bool(self.generate_content_images),
        );
        vars.set("optimize_for_seo", TemplateValue::Bool(self.optimize_for_seo));
        vars.set(
            "generate_structured_data",
            TemplateValue::Bool(self.generate_structured_data),
        );
        vars.set(
            "crawl_external_links",
            TemplateValue::Bool(self.crawl_external_links),
        );
        vars.set(
            "include_cluster_links",
            TemplateValue::Bool(self.include_cluster_links),
        );
        vars
    }
}

fn opt_text(value: &Option<String>) -> TemplateValue {
    match value {
        Some(v) => TemplateValue::text(v),
        None => TemplateValue::Null,
    }
}
