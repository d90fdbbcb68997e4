use std::collections::HashMap;

use crate::pricing::{BUILTIN_ALIASES, PRICING};
use crate::types::Provider;

/// Ordered prefix rules, narrowest first. The first matching rule wins.
///
/// OSS families served through OpenAI-compatible gateways come after the vendor
/// prefixes so that, say, `gemini-` never falls into a catch-all.
const PREFIX_RULES: &[(&str, Provider)] = &[
    ("claude", Provider::Anthropic),
    ("models/gemini", Provider::Google),
    ("gemini-", Provider::Google),
    ("gemma-", Provider::Google),
    ("learnlm", Provider::Google),
    ("gpt-", Provider::OpenAi),
    ("chatgpt-", Provider::OpenAi),
    ("o1", Provider::OpenAi),
    ("o3", Provider::OpenAi),
    ("o4", Provider::OpenAi),
    ("text-embedding-", Provider::OpenAi),
    ("llama", Provider::OpenAi),
    ("mistral", Provider::OpenAi),
    ("mixtral", Provider::OpenAi),
    ("deepseek", Provider::OpenAi),
    ("qwen", Provider::OpenAi),
];

/// Maps a canonical model id to the provider that serves it.
///
/// The pricing table is consulted first; prefix rules only apply to models it does not
/// list. A vendor-qualified id such as `openrouter/some-model` is treated as an
/// OpenAI-compatible gateway route.
///
/// # Examples
///
/// ```
/// use relay_llm::resolver::resolve_provider;
/// use relay_llm::types::Provider;
///
/// assert_eq!(resolve_provider("claude-3-opus-20240229"), Some(Provider::Anthropic));
/// assert_eq!(resolve_provider("gemini-exp-1206"), Some(Provider::Google));
/// assert_eq!(resolve_provider("not-a-real-model"), None);
/// ```
pub fn resolve_provider(model: &str) -> Option<Provider> {
    if let Some(entry) = PRICING.get(model) {
        return Some(entry.provider);
    }

    let lower = model.trim().to_ascii_lowercase();
    PREFIX_RULES
        .iter()
        .find(|(prefix, _)| lower.starts_with(prefix))
        .map(|(_, provider)| *provider)
        .or_else(|| lower.contains('/').then_some(Provider::OpenAi))
}

/// Alias lookup with per-client overrides layered over the built-in set.
#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    overrides: HashMap<String, String>,
}

impl AliasTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a table from override pairs. Keys are matched case-insensitively.
    pub fn with_overrides<I, K, V>(overrides: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut table = Self::new();
        for (alias, target) in overrides {
            table.insert(alias, target);
        }
        table
    }

    pub fn insert(&mut self, alias: impl AsRef<str>, target: impl Into<String>) {
        self.overrides
            .insert(alias.as_ref().trim().to_lowercase(), target.into());
    }

    /// Returns the canonical id for `token`, or `token` unchanged when it is not an alias.
    pub fn resolve(&self, token: &str) -> String {
        let key = token.trim().to_lowercase();
        if let Some(target) = self.overrides.get(&key) {
            return target.clone();
        }
        if let Some(target) = BUILTIN_ALIASES.get(key.as_str()) {
            return (*target).to_string();
        }
        token.to_string()
    }
}
