use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryConfig;
use crate::types::{GenerationOptions, Provider};

/// Connection settings for one provider family.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    /// Overrides the public endpoint, e.g. for an OpenAI-compatible gateway.
    #[serde(default)]
    pub base_url: Option<String>,
    /// API version header; only Anthropic uses one.
    #[serde(default)]
    pub version: Option<String>,
    /// Extra headers sent with every request to this provider.
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl ProviderConfig {
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            ..Self::default()
        }
    }

    /// The configured key, ignoring blank strings.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }
}

/// Values applied to every request that does not set them itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Model used by [`crate::client::AIClient::ask`] when none is given.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub options: GenerationOptions,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl DefaultsConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// Spend limits checked before any request leaves the process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Ceiling on the pre-flight estimate of a single request, in dollars.
    #[serde(default)]
    pub max_cost_per_request: Option<f64>,
    /// Ceiling on the ledger's running total, in dollars.
    #[serde(default)]
    pub max_total_cost: Option<f64>,
}

/// Everything an [`crate::client::AIClient`] is built from.
///
/// # Examples
///
/// ```
/// use relay_llm::config::ClientConfig;
/// use relay_llm::types::Provider;
///
/// let config: ClientConfig = serde_json::from_str(r#"{
///     "providers": { "openai": { "api_key": "sk-test" } },
///     "retry": { "enabled": true },
///     "fallbacks": ["claude-3-5-haiku-20241022"],
///     "aliases": { "default": "gpt-4o-mini" }
/// }"#).unwrap();
///
/// assert_eq!(config.provider(Provider::OpenAi).api_key(), Some("sk-test"));
/// assert!(config.retry.enabled);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub providers: HashMap<Provider, ProviderConfig>,
    #[serde(default)]
    pub defaults: DefaultsConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    /// Models tried in order after the primary one fails.
    #[serde(default)]
    pub fallbacks: Vec<String>,
    #[serde(default)]
    pub budget: BudgetConfig,
    /// Alias overrides layered over the built-in aliases.
    #[serde(default)]
    pub aliases: HashMap<String, String>,
}

static EMPTY_PROVIDER: LazyLock<ProviderConfig> = LazyLock::new(ProviderConfig::default);

impl ClientConfig {
    /// Settings for `provider`, empty when none are configured.
    pub fn provider(&self, provider: Provider) -> &ProviderConfig {
        self.providers
            .get(&provider)
            .unwrap_or_else(|| &*EMPTY_PROVIDER)
    }

    pub fn provider_mut(&mut self, provider: Provider) -> &mut ProviderConfig {
        self.providers.entry(provider).or_default()
    }

    /// Fills missing API keys from the environment.
    pub fn with_env_credentials(self) -> Self {
        self.with_credentials_from(|name| std::env::var(name).ok())
    }

    /// Fills missing API keys using `lookup`, trying each provider's variable names in order.
    ///
    /// The first non-empty value wins. Keys already present are left alone.
    pub fn with_credentials_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        for provider in Provider::ALL {
            if self.provider(provider).api_key().is_some() {
                continue;
            }
            let found = env_key_names(provider)
                .iter()
                .filter_map(|name| lookup(name))
                .map(|value| value.trim().to_string())
                .find(|value| !value.is_empty());
            if let Some(key) = found {
                tracing::debug!(%provider, "api key discovered from environment");
                self.provider_mut(provider).api_key = Some(key);
            }
        }
        self
    }
}

/// Environment variables consulted for each provider, in priority order.
pub fn env_key_names(provider: Provider) -> &'static [&'static str] {
    match provider {
        Provider::OpenAi => &["OPENAI_API_KEY"],
        Provider::Anthropic => &["ANTHROPIC_API_KEY", "CLAUDE_API_KEY"],
        Provider::Google => &[
            "GOOGLE_API_KEY",
            "GEMINI_API_KEY",
            "GOOGLE_GENERATIVE_AI_API_KEY",
        ],
    }
}
