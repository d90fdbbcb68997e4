//! Static pricing and alias tables.
//!
//! Rates are US dollars per million tokens. The table is the authority for provider
//! resolution: a model listed here is never routed by prefix.

use std::collections::HashMap;
use std::sync::LazyLock;

use crate::types::Provider;

/// Rates and capabilities of one canonical model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricingEntry {
    /// Dollars per million input tokens.
    pub input: f64,
    /// Dollars per million output tokens.
    pub output: f64,
    pub provider: Provider,
    pub vision: bool,
    pub tools: bool,
}

const fn entry(input: f64, output: f64, provider: Provider, vision: bool) -> PricingEntry {
    PricingEntry {
        input,
        output,
        provider,
        vision,
        tools: true,
    }
}

pub static PRICING: LazyLock<HashMap<&'static str, PricingEntry>> = LazyLock::new(|| {
    use Provider::{Anthropic, Google, OpenAi};

    HashMap::from([
        ("gpt-4o", entry(2.5, 10.0, OpenAi, true)),
        ("gpt-4o-mini", entry(0.15, 0.6, OpenAi, true)),
        ("gpt-4.1", entry(2.0, 8.0, OpenAi, true)),
        ("gpt-4.1-mini", entry(0.4, 1.6, OpenAi, true)),
        ("gpt-3.5-turbo", entry(0.5, 1.5, OpenAi, false)),
        ("o3-mini", entry(1.1, 4.4, OpenAi, false)),
        ("claude-3-5-sonnet-20241022", entry(3.0, 15.0, Anthropic, true)),
        ("claude-3-5-haiku-20241022", entry(0.8, 4.0, Anthropic, true)),
        ("claude-sonnet-4-20250514", entry(3.0, 15.0, Anthropic, true)),
        ("claude-opus-4-20250514", entry(15.0, 75.0, Anthropic, true)),
        ("gemini-1.5-pro", entry(1.25, 5.0, Google, true)),
        ("gemini-1.5-flash", entry(0.075, 0.3, Google, true)),
        ("gemini-2.0-flash", entry(0.1, 0.4, Google, true)),
        ("gemini-2.5-pro", entry(1.25, 10.0, Google, true)),
        ("gemini-2.5-flash", entry(0.3, 2.5, Google, true)),
    ])
});

/// Built-in shorthand names, keyed in lower case.
pub static BUILTIN_ALIASES: LazyLock<HashMap<&'static str, &'static str>> = LazyLock::new(|| {
    HashMap::from([
        ("fast", "gpt-4o-mini"),
        ("smart", "gpt-4o"),
        ("best", "claude-opus-4-20250514"),
        ("code", "claude-sonnet-4-20250514"),
        ("cheap", "gemini-2.0-flash"),
        ("vision", "gpt-4o"),
        ("long", "gemini-1.5-pro"),
    ])
});

/// Looks up the pricing entry for an exact canonical id.
pub fn pricing_for(model: &str) -> Option<&'static PricingEntry> {
    PRICING.get(model)
}
