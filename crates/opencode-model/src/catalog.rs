// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Model catalog: static metadata for known models.

use serde::{Deserialize, Serialize};

/// Metadata for a single model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    /// Catalog identifier used in configuration (e.g. "claude-4-sonnet").
    pub id: String,
    /// Human-readable display name
    pub name: String,
    /// Provider identifier: "anthropic" | "openai" | "gemini" | "groq" |
    /// "bedrock" | "azure" | "openrouter" | "vertexai" | "local"
    pub provider: String,
    /// Model name forwarded on the provider API
    pub api_model: String,
    /// Total context window in tokens.  Zero means unknown; auto-compaction
    /// is disabled for such models.
    pub context_window: u64,
    /// Maximum output tokens requested when the agent config sets none
    pub default_max_tokens: u32,
    /// USD per million input tokens
    pub cost_per_1m_in: f64,
    /// USD per million output tokens
    pub cost_per_1m_out: f64,
    /// USD per million cache-creation input tokens
    pub cost_per_1m_in_cached: f64,
    /// USD per million cache-read tokens
    pub cost_per_1m_out_cached: f64,
    /// The model exposes a reasoning/thinking track
    pub can_reason: bool,
    /// The model accepts binary attachments (images, documents)
    pub supports_attachments: bool,
}

macro_rules! model {
    ($id:expr, $name:expr, $provider:expr, $api:expr, $cw:expr, $max_out:expr,
     $in:expr, $out:expr, $in_cached:expr, $out_cached:expr, $reason:expr, $attach:expr) => {
        Model {
            id: $id.to_string(),
            name: $name.to_string(),
            provider: $provider.to_string(),
            api_model: $api.to_string(),
            context_window: $cw,
            default_max_tokens: $max_out,
            cost_per_1m_in: $in,
            cost_per_1m_out: $out,
            cost_per_1m_in_cached: $in_cached,
            cost_per_1m_out_cached: $out_cached,
            can_reason: $reason,
            supports_attachments: $attach,
        }
    };
}

/// Return all entries from the bundled static catalog.
pub fn static_catalog() -> Vec<Model> {
    vec![
        // ── Anthropic ────────────────────────────────────────────────────────
        model!("claude-4-opus", "Claude 4 Opus", "anthropic",
               "claude-opus-4-20250514", 200_000, 32_000,
               15.0, 75.0, 18.75, 1.50, true, true),
        model!("claude-4-sonnet", "Claude 4 Sonnet", "anthropic",
               "claude-sonnet-4-20250514", 200_000, 16_000,
               3.0, 15.0, 3.75, 0.30, true, true),
        model!("claude-3-7-sonnet", "Claude 3.7 Sonnet", "anthropic",
               "claude-3-7-sonnet-20250219", 200_000, 16_000,
               3.0, 15.0, 3.75, 0.30, true, true),
        model!("claude-3-5-haiku", "Claude 3.5 Haiku", "anthropic",
               "claude-3-5-haiku-20241022", 200_000, 8_192,
               0.80, 4.0, 1.0, 0.08, false, true),
        // ── OpenAI ───────────────────────────────────────────────────────────
        model!("gpt-4.1", "GPT-4.1", "openai",
               "gpt-4.1", 1_047_576, 32_768,
               2.0, 8.0, 0.0, 0.50, false, true),
        model!("gpt-4.1-mini", "GPT-4.1 Mini", "openai",
               "gpt-4.1-mini", 1_047_576, 32_768,
               0.40, 1.60, 0.0, 0.10, false, true),
        model!("gpt-4o", "GPT-4o", "openai",
               "gpt-4o", 128_000, 16_384,
               2.50, 10.0, 0.0, 1.25, false, true),
        model!("o3-mini", "o3 Mini", "openai",
               "o3-mini", 200_000, 100_000,
               1.10, 4.40, 0.0, 0.55, true, false),
        // ── Google ───────────────────────────────────────────────────────────
        model!("gemini-2.5-pro", "Gemini 2.5 Pro", "gemini",
               "gemini-2.5-pro", 1_048_576, 65_536,
               1.25, 10.0, 0.0, 0.31, true, true),
        model!("gemini-2.0-flash", "Gemini 2.0 Flash", "gemini",
               "gemini-2.0-flash", 1_048_576, 8_192,
               0.10, 0.40, 0.0, 0.025, false, true),
        // ── Groq ─────────────────────────────────────────────────────────────
        model!("llama-3.3-70b", "Llama 3.3 70B Versatile", "groq",
               "llama-3.3-70b-versatile", 128_000, 32_768,
               0.59, 0.79, 0.0, 0.0, false, false),
        model!("qwen-qwq-32b", "Qwen QwQ 32B", "groq",
               "qwen-qwq-32b", 128_000, 16_384,
               0.29, 0.39, 0.0, 0.0, true, false),
        // ── AWS Bedrock ──────────────────────────────────────────────────────
        model!("bedrock.claude-4-sonnet", "Claude 4 Sonnet (Bedrock)", "bedrock",
               "anthropic.claude-sonnet-4-20250514-v1:0", 200_000, 16_000,
               3.0, 15.0, 3.75, 0.30, true, true),
        // ── Azure OpenAI ─────────────────────────────────────────────────────
        model!("azure.gpt-4o", "GPT-4o (Azure)", "azure",
               "gpt-4o", 128_000, 16_384,
               2.50, 10.0, 0.0, 1.25, false, true),
        // ── OpenRouter ───────────────────────────────────────────────────────
        model!("openrouter.gpt-4o", "GPT-4o (OpenRouter)", "openrouter",
               "openai/gpt-4o", 128_000, 16_384,
               2.50, 10.0, 0.0, 1.25, false, true),
        model!("openrouter.claude-4-sonnet", "Claude 4 Sonnet (OpenRouter)", "openrouter",
               "anthropic/claude-sonnet-4", 200_000, 16_000,
               3.0, 15.0, 3.75, 0.30, true, true),
        // ── Google VertexAI ──────────────────────────────────────────────────
        model!("vertexai.gemini-2.5-pro", "Gemini 2.5 Pro (VertexAI)", "vertexai",
               "gemini-2.5-pro", 1_048_576, 65_536,
               1.25, 10.0, 0.0, 0.31, true, true),
        // ── Local (OpenAI-compatible endpoint) ───────────────────────────────
        model!("local", "Local model", "local",
               "local", 32_768, 4_096,
               0.0, 0.0, 0.0, 0.0, false, false),
    ]
}

/// Look up a single model by catalog id (or display name).
pub fn lookup(model_id: &str) -> Option<Model> {
    static_catalog()
        .into_iter()
        .find(|m| m.id == model_id || m.name == model_id)
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_catalog_is_non_empty() {
        assert!(!static_catalog().is_empty());
    }

    #[test]
    fn claude_sonnet_is_in_catalog() {
        let m = lookup("claude-4-sonnet").expect("claude-4-sonnet must be in catalog");
        assert_eq!(m.provider, "anthropic");
        assert!(m.context_window >= 200_000);
        assert!(m.supports_attachments);
    }

    #[test]
    fn gpt4o_is_in_catalog() {
        let m = lookup("gpt-4o").expect("gpt-4o must be in catalog");
        assert_eq!(m.provider, "openai");
        assert!(m.context_window >= 128_000);
    }

    #[test]
    fn lookup_by_display_name_works() {
        let m = lookup("Claude 4 Sonnet").unwrap();
        assert_eq!(m.id, "claude-4-sonnet");
    }

    #[test]
    fn lookup_unknown_model_returns_none() {
        assert!(lookup("nonexistent-model-xyz").is_none());
    }

    #[test]
    fn catalog_ids_are_unique() {
        let models = static_catalog();
        for (i, a) in models.iter().enumerate() {
            for b in &models[i + 1..] {
                assert_ne!(a.id, b.id, "duplicate catalog id {}", a.id);
            }
        }
    }

    #[test]
    fn cost_rates_are_non_negative() {
        for m in static_catalog() {
            assert!(m.cost_per_1m_in >= 0.0, "{}", m.id);
            assert!(m.cost_per_1m_out >= 0.0, "{}", m.id);
            assert!(m.cost_per_1m_in_cached >= 0.0, "{}", m.id);
            assert!(m.cost_per_1m_out_cached >= 0.0, "{}", m.id);
        }
    }

    #[test]
    fn every_provider_id_is_recognized() {
        const PROVIDERS: &[&str] = &[
            "anthropic", "openai", "gemini", "groq", "bedrock",
            "azure", "openrouter", "vertexai", "local",
        ];
        for m in static_catalog() {
            assert!(
                PROVIDERS.contains(&m.provider.as_str()),
                "{} has unknown provider {}",
                m.id,
                m.provider
            );
        }
    }
}
