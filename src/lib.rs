//! Unified chat client over OpenAI-compatible, Anthropic and Google Gemini APIs.
//!
//! One request model, one result shape and one error taxonomy for every provider,
//! with per-request cost accounting against a static pricing table.

pub mod builder;
pub mod client;
pub mod config;
pub mod cost;
pub mod error;
pub mod http;
pub mod pricing;
pub mod provider;
pub mod resolver;
pub mod retry;
pub mod stream;
pub mod types;

pub use builder::RequestBuilder;
pub use client::{AIClient, AIClientBuilder, shared_client};
pub use config::{BudgetConfig, ClientConfig, DefaultsConfig, ProviderConfig};
pub use cost::{CostLedger, CostSummary, UsageRecord, UsageTracker, calculate_cost};
pub use error::{AIError, ErrorKind};
pub use resolver::resolve_provider;
pub use retry::{RetryConfig, RetryPolicy};
pub use stream::ChatStream;
pub use types::*;
