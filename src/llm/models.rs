//! Centralized model definitions for all LLM providers
//!
//! This module contains all model definitions in a single location,
//! making it easier to add new models and providers.

use super::anthropic::AnthropicModel;
use super::openai::OpenAIModel;
use super::{AnthropicService, LlmService, OpenAIService};
use std::sync::Arc;

/// LLM provider enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    Anthropic,
    OpenAI,
}

impl Provider {
    /// Get the display name for this provider
    pub fn display_name(self) -> &'static str {
        match self {
            Provider::Anthropic => "Anthropic",
            Provider::OpenAI => "OpenAI",
        }
    }

    /// Get the environment variable name for this provider's API key
    pub fn api_key_env_var(self) -> &'static str {
        match self {
            Provider::Anthropic => "ANTHROPIC_API_KEY",
            Provider::OpenAI => "OPENAI_API_KEY",
        }
    }
}

/// Model definition with metadata
#[derive(Debug, Clone)]
pub struct ModelDef {
    /// User-facing model ID (e.g., "gpt-4o-mini")
    pub id: &'static str,
    /// Provider for this model
    pub provider: Provider,
    /// Human-readable description
    pub description: &'static str,
    /// Factory function to create the service
    pub factory: fn(&str, Option<&str>) -> Result<Arc<dyn LlmService>, String>,
}

fn openai(api_key: &str, gateway: Option<&str>, model: OpenAIModel) -> Result<Arc<dyn LlmService>, String> {
    // Accept any non-empty key (including "implicit" for gateway mode)
    if api_key.is_empty() {
        return Err(format!("{} requires OPENAI_API_KEY or gateway", model.model_id()));
    }
    Ok(Arc::new(OpenAIService::new(api_key.to_string(), model, gateway)))
}

fn anthropic(
    api_key: &str,
    gateway: Option<&str>,
    model: AnthropicModel,
) -> Result<Arc<dyn LlmService>, String> {
    if api_key.is_empty() {
        return Err(format!("{} requires ANTHROPIC_API_KEY or gateway", model.model_id()));
    }
    Ok(Arc::new(AnthropicService::new(api_key.to_string(), model, gateway)))
}

/// Get all available model definitions
pub fn all_models() -> &'static [ModelDef] {
    &[
        // OpenAI models
        ModelDef {
            id: "gpt-4o",
            provider: Provider::OpenAI,
            description: "GPT-4o (balanced quality for replies)",
            factory: |key, gw| openai(key, gw, OpenAIModel::GPT4o),
        },
        ModelDef {
            id: "gpt-4o-mini",
            provider: Provider::OpenAI,
            description: "GPT-4o mini (fast, cheap, good for classification)",
            factory: |key, gw| openai(key, gw, OpenAIModel::GPT4oMini),
        },
        ModelDef {
            id: "gpt-4.1-mini",
            provider: Provider::OpenAI,
            description: "GPT-4.1 mini",
            factory: |key, gw| openai(key, gw, OpenAIModel::GPT41Mini),
        },
        ModelDef {
            id: "o4-mini",
            provider: Provider::OpenAI,
            description: "o4-mini (reasoning, ignores temperature)",
            factory: |key, gw| openai(key, gw, OpenAIModel::O4Mini),
        },
        ModelDef {
            id: "gpt-5-mini",
            provider: Provider::OpenAI,
            description: "GPT-5 mini (reasoning, ignores temperature)",
            factory: |key, gw| openai(key, gw, OpenAIModel::GPT5Mini),
        },
        // Anthropic models
        ModelDef {
            id: "claude-4.5-sonnet",
            provider: Provider::Anthropic,
            description: "Claude Sonnet 4.5",
            factory: |key, gw| anthropic(key, gw, AnthropicModel::Claude45Sonnet),
        },
        ModelDef {
            id: "claude-4.5-haiku",
            provider: Provider::Anthropic,
            description: "Claude Haiku 4.5 (fast, cheap)",
            factory: |key, gw| anthropic(key, gw, AnthropicModel::Claude45Haiku),
        },
    ]
}
