//! Cost calculation and the caller-owned usage ledger.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::pricing::pricing_for;
use crate::types::{ChatRequest, Cost, Provider, Usage};

const TOKENS_PER_UNIT: f64 = 1_000_000.0;
const CHARS_PER_TOKEN: u64 = 4;
const TOKENS_PER_IMAGE: u64 = 1_000;
const DEFAULT_OUTPUT_TOKENS: u64 = 1_000;

/// Prices `usage` against the table entry for `model`.
///
/// Models missing from the table cost exactly zero. No rounding is applied.
///
/// # Examples
///
/// ```
/// use relay_llm::cost::calculate_cost;
/// use relay_llm::types::Usage;
///
/// let usage = Usage { input_tokens: 100, output_tokens: 50, total_tokens: 150 };
/// let cost = calculate_cost("gpt-4o", &usage);
/// assert!((cost.total - 0.00075).abs() < 1e-12);
/// ```
pub fn calculate_cost(model: &str, usage: &Usage) -> Cost {
    match pricing_for(model) {
        Some(entry) => {
            let input = usage.input_tokens as f64 / TOKENS_PER_UNIT * entry.input;
            let output = usage.output_tokens as f64 / TOKENS_PER_UNIT * entry.output;
            Cost {
                input,
                output,
                total: input + output,
            }
        }
        None => Cost::default(),
    }
}

/// One successful dispatch, as handed to trackers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub model: String,
    pub provider: Provider,
    pub usage: Usage,
    pub cost: Cost,
    pub latency_ms: u64,
    pub streamed: bool,
}

/// Persistence seam for usage analytics.
///
/// Called once per successful dispatch, after the in-memory ledger is updated.
pub trait UsageTracker: Send + Sync {
    fn track(&self, record: &UsageRecord);
}

/// Aggregated spend for one model or provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rollup {
    pub requests: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
}

impl Rollup {
    fn add(&mut self, record: &UsageRecord) {
        self.requests += 1;
        self.input_tokens += record.usage.input_tokens;
        self.output_tokens += record.usage.output_tokens;
        self.cost += record.cost.total;
    }
}

/// Snapshot of the ledger at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostSummary {
    pub total_cost: f64,
    pub request_count: u64,
    pub average_cost: f64,
    pub by_model: HashMap<String, Rollup>,
    pub by_provider: HashMap<Provider, Rollup>,
}

#[derive(Debug, Default)]
struct LedgerState {
    total_cost: f64,
    request_count: u64,
    by_model: HashMap<String, Rollup>,
    by_provider: HashMap<Provider, Rollup>,
}

/// Running cost totals for one client.
#[derive(Debug, Default)]
pub struct CostLedger {
    state: Mutex<LedgerState>,
}

impl CostLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut LedgerState) -> R) -> R {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    pub fn total_cost(&self) -> f64 {
        self.with_state(|state| state.total_cost)
    }

    pub fn request_count(&self) -> u64 {
        self.with_state(|state| state.request_count)
    }

    pub fn summary(&self) -> CostSummary {
        self.with_state(|state| CostSummary {
            total_cost: state.total_cost,
            request_count: state.request_count,
            average_cost: if state.request_count == 0 {
                0.0
            } else {
                state.total_cost / state.request_count as f64
            },
            by_model: state.by_model.clone(),
            by_provider: state.by_provider.clone(),
        })
    }

    /// Models ordered by descending spend.
    pub fn top_models(&self, limit: usize) -> Vec<(String, Rollup)> {
        self.with_state(|state| top_by_cost(state.by_model.clone(), limit))
    }

    /// Providers ordered by descending spend.
    pub fn top_providers(&self, limit: usize) -> Vec<(Provider, Rollup)> {
        self.with_state(|state| top_by_cost(state.by_provider.clone(), limit))
    }

    pub fn reset(&self) {
        self.with_state(|state| *state = LedgerState::default());
    }
}

impl UsageTracker for CostLedger {
    fn track(&self, record: &UsageRecord) {
        self.with_state(|state| {
            state.total_cost += record.cost.total;
            state.request_count += 1;
            state
                .by_model
                .entry(record.model.clone())
                .or_default()
                .add(record);
            state.by_provider.entry(record.provider).or_default().add(record);
        });
    }
}

/// Rough pre-flight estimate for `request` priced as `model`.
///
/// Counts one token per four characters of message text and a flat weight per
/// image. Output is assumed to be `max_tokens`, or a thousand tokens when unset.
pub fn estimate_request_cost(model: &str, request: &ChatRequest) -> Cost {
    let (chars, images) = request
        .messages
        .iter()
        .fold((0u64, 0u64), |(chars, images), message| {
            (
                chars + message.content.text().chars().count() as u64,
                images + message.content.image_count() as u64,
            )
        });
    let input_tokens = chars.div_ceil(CHARS_PER_TOKEN) + images * TOKENS_PER_IMAGE;
    let output_tokens = request
        .options
        .max_tokens
        .map(u64::from)
        .unwrap_or(DEFAULT_OUTPUT_TOKENS);
    calculate_cost(
        model,
        &Usage::from_counts(Some(input_tokens), Some(output_tokens), None),
    )
}

fn top_by_cost<K>(map: HashMap<K, Rollup>, limit: usize) -> Vec<(K, Rollup)> {
    let mut entries: Vec<(K, Rollup)> = map.into_iter().collect();
    entries.sort_by(|a, b| b.1.cost.total_cmp(&a.1.cost));
    entries.truncate(limit);
    entries
}
