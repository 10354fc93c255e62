// src/defaults.rs
//! Built-in workflow models registered once at startup.

use crate::models::{PhaseSpec, StructuralRules, WorkflowModel};

pub const DEFAULT_MODEL_ID: &str = "standard";

pub fn builtin_models() -> Vec<WorkflowModel> {
    vec![standard(), premium(), social_post()]
}

fn phase(
    id: &str,
    name: &str,
    model: &str,
    temperature: f32,
    max_tokens: u32,
    system_prompt: Option<&str>,
    user_prompt: &str,
    required_inputs: &[&str],
    outputs: &[&str],
) -> PhaseSpec {
    PhaseSpec {
        id: id.to_string(),
        name: name.to_string(),
        description: String::new(),
        model: model.to_string(),
        temperature,
        max_tokens,
        timeout_ms: 60_000,
        system_prompt: system_prompt.map(str::to_string),
        user_prompt: user_prompt.to_string(),
        required_inputs: required_inputs.iter().map(|s| s.to_string()).collect(),
        outputs: outputs.iter().map(|s| s.to_string()).collect(),
        retryable: true,
        max_retries: 2,
    }
}

/// The default long-form article pipeline.
fn standard() -> WorkflowModel {
    WorkflowModel {
        id: "standard".to_string(),
        name: "Standard Article".to_string(),
        description: "Long-form article generation with images, SEO enhancement, \
                      interlinking and publish preparation"
            .to_string(),
        version: "1.2.0".to_string(),
        quality_levels: vec![
            "low".to_string(),
            "medium".to_string(),
            "standard".to_string(),
        ],
        content_types: vec!["article".to_string(), "blog_post".to_string()],
        platforms: vec![],
        phases: vec![
            phase(
                "content_generation",
                "Content Generation",
                "claude-sonnet-4-5",
                0.7,
                8192,
                Some(
                    "You are a senior content writer. Produce well-structured markdown \
                     with clear section headings. Never invent statistics.",
                ),
                "Write a comprehensive article about {{topic}}.\n\n\
                 Target audience: {{target_audience}}\n\
                 Tone: {{tone}}\n\
                 Target length: {{word_count}} words\n\
                 Primary keywords: {{keywords}}\n\n\
                 Additional instructions:\n{{custom_instructions}}",
                &["topic"],
                &["content"],
            ),
            phase(
                "image_generation",
                "Image Prompt Generation",
                "claude-sonnet-4-5",
                0.8,
                2048,
                None,
                "Read the article below and propose prompts for a featured image and \
                 up to three in-body illustrations. Return a JSON array of objects \
                 with \"placement\" and \"prompt\" fields.\n\n\
                 Article:\n{{content}}",
                &["content"],
                &["image_prompts"],
            ),
            phase(
                "content_enhancement",
                "SEO Enhancement",
                "claude-sonnet-4-5",
                0.4,
                8192,
                Some(
                    "You are an SEO editor. Improve readability and keyword coverage \
                     without changing the article's meaning.",
                ),
                "Enhance the article below for search visibility. Keywords: \
                 {{keywords}}. Return a JSON object with \"content\" (the revised \
                 markdown), \"meta_title\" and \"meta_description\".\n\n\
                 Article:\n{{content}}",
                &["content"],
                &["content", "meta_title", "meta_description"],
            ),
            phase(
                "interlinking",
                "Interlinking",
                "claude-sonnet-4-5",
                0.3,
                8192,
                None,
                "Insert internal link placeholders into the article below where a \
                 reader would benefit from related coverage. Return a JSON object \
                 with \"content\" and \"internal_links\" (an array of anchor-text / \
                 target-slug pairs).\n\n\
                 Article:\n{{content}}",
                &["content"],
                &["content", "internal_links"],
            ),
            phase(
                "publishing_preparation",
                "Publishing Preparation",
                "claude-sonnet-4-5",
                0.2,
                2048,
                None,
                "Prepare publication metadata for the article below. Return a JSON \
                 object with \"slug\", \"excerpt\", \"meta_title\" and \
                 \"meta_description\".\n\n\
                 Article:\n{{content}}",
                &["content"],
                &["slug", "excerpt", "meta_title", "meta_description"],
            ),
        ],
        post_processing: vec![
            "markdown_cleanup".to_string(),
            "heading_normalization".to_string(),
        ],
        structural_rules: Some(StructuralRules {
            min_sections: Some(3),
            max_sections: Some(12),
            min_internal_links: Some(2),
            max_internal_links: Some(10),
            min_external_links: None,
            max_external_links: Some(5),
        }),
    }
}

/// Higher-temperature pipeline with a dedicated review pass for premium
/// quality tiers.
fn premium() -> WorkflowModel {
    let mut model = standard();
    model.id = "premium".to_string();
    model.name = "Premium Article".to_string();
    model.description =
        "Premium long-form pipeline with an additional editorial review pass".to_string();
    model.version = "1.0.0".to_string();
    model.quality_levels = vec!["high".to_string(), "premium".to_string()];
    model.content_types = vec![];
    for p in &mut model.phases {
        p.max_tokens = p.max_tokens.max(4096);
    }
    // Review runs between enhancement and interlinking.
    model.phases.insert(
        3,
        phase(
            "content_enhancement_review",
            "Editorial Review",
            "claude-sonnet-4-5",
            0.2,
            8192,
            Some("You are a meticulous editor. Keep the author's voice."),
            "Review the article below for factual hedging, repetition and weak \
             transitions. Return the corrected markdown only.\n\n\
             Article:\n{{content}}",
            &["content"],
            &["content"],
        ),
    );
    model.post_processing.push("fact_check_pass".to_string());
    model.structural_rules = Some(StructuralRules {
        min_sections: Some(5),
        max_sections: Some(16),
        min_internal_links: Some(3),
        max_internal_links: Some(12),
        min_external_links: Some(2),
        max_external_links: Some(8),
    });
    model
}

/// Short-form pipeline for social platforms: no imagery or interlinking,
/// straight from draft to publish metadata.
fn social_post() -> WorkflowModel {
    WorkflowModel {
        id: "social-post".to_string(),
        name: "Social Post".to_string(),
        description: "Short-form social content".to_string(),
        version: "1.1.0".to_string(),
        quality_levels: vec!["standard".to_string()],
        content_types: vec!["social".to_string(), "social_post".to_string()],
        platforms: vec!["twitter".to_string(), "linkedin".to_string()],
        phases: vec![
            phase(
                "content_generation",
                "Post Generation",
                "claude-sonnet-4-5",
                0.9,
                1024,
                Some("You write concise, high-engagement social posts."),
                "Write a {{platform}} post about {{topic}}.\n\
                 Tone: {{tone}}\n\
                 Keywords to weave in naturally: {{keywords}}\n\n\
                 {{custom_instructions}}",
                &["topic"],
                &["content"],
            ),
            phase(
                "publishing_preparation",
                "Publishing Preparation",
                "claude-sonnet-4-5",
                0.3,
                512,
                None,
                "Suggest posting metadata for the post below. Return a JSON object \
                 with \"slug\" and \"excerpt\".\n\n\
                 Post:\n{{content}}",
                &["content"],
                &["slug", "excerpt"],
            ),
        ],
        post_processing: vec!["hashtag_dedup".to_string()],
        structural_rules: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_models_are_well_formed() {
        let models = builtin_models();
        assert_eq!(models.len(), 3);
        for model in &models {
            assert!(!model.id.is_empty());
            assert!(!model.phases.is_empty());
            for phase in &model.phases {
                assert!(!phase.outputs.is_empty(), "phase {} has outputs", phase.id);
                assert!(!phase.user_prompt.is_empty());
            }
        }
    }

    #[test]
    fn test_default_model_covers_low_quality() {
        let standard = builtin_models()
            .into_iter()
            .find(|m| m.id == DEFAULT_MODEL_ID)
            .expect("standard model exists");
        assert!(standard.supports_quality("low"));
        assert_eq!(standard.phases[0].outputs, vec!["content"]);
    }
}
