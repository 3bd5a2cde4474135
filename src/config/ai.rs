// src/config/ai.rs
use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

/// One OpenAI-compatible chat-completions endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// "openai" | "mistral" | "glm" | anything else (label only)
    pub name: String,
    pub base_url: String,
    pub model: String,
    /// "ENV" means: read from `api_key_env`
    pub api_key: String,
    pub api_key_env: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self::openai()
    }
}

impl ProviderConfig {
    pub fn openai() -> Self {
        Self {
            name: "openai".into(),
            base_url: "https://api.openai.com/v1".into(),
            model: "gpt-4o-mini".into(),
            api_key: "ENV".into(),
            api_key_env: "OPENAI_API_KEY".into(),
            temperature: 0.1,
            max_tokens: 400,
        }
    }

    pub fn mistral() -> Self {
        Self {
            name: "mistral".into(),
            base_url: "https://api.mistral.ai/v1".into(),
            model: "mistral-large-latest".into(),
            api_key_env: "MISTRAL_API_KEY".into(),
            ..Self::openai()
        }
    }

    /// `None` when the key is missing; the provider is then skipped.
    pub fn resolved_key(&self) -> Option<String> {
        super::resolve_secret(&self.api_key, &self.api_key_env)
    }

    fn sanitize(&mut self) {
        self.name = self.name.trim().to_lowercase();
        self.base_url = self.base_url.trim().trim_end_matches('/').to_string();
        if !(0.0..=2.0).contains(&self.temperature) {
            self.temperature = 0.1;
        }
        if self.max_tokens == 0 {
            self.max_tokens = 400;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub enabled: bool,
    pub primary: ProviderConfig,
    /// Used only when the primary has no key; chosen once at start-up.
    pub fallback: Option<ProviderConfig>,
    /// Real provider calls per UTC day; 0 disables the budget.
    pub daily_limit: u32,
    /// Items analyzed concurrently.
    pub concurrency: usize,
    pub retry: RetryPolicy,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            primary: ProviderConfig::openai(),
            fallback: Some(ProviderConfig::mistral()),
            daily_limit: 500,
            concurrency: 4,
            retry: RetryPolicy::default(),
        }
    }
}

impl AnalyzerConfig {
    pub(crate) fn sanitize(&mut self) {
        self.primary.sanitize();
        if let Some(f) = self.fallback.as_mut() {
            f.sanitize();
        }
        self.concurrency = self.concurrency.clamp(1, 32);
        self.retry.max_attempts = self.retry.max_attempts.max(1);
    }
}
