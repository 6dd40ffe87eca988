//! Cost accounting
//!
//! Maps backend token usage to a monetary estimate through a fixed
//! per-backend rate table, accumulates per-run records, and merges finished
//! runs into a cross-run cumulative store. The cumulative store is explicit
//! state: loaded, appended to and rewritten atomically by the orchestrator,
//! never a process-wide global.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::backend::TokenUsage;
use crate::error::StorageError;
use crate::state::write_json_atomic;

/// USD per 1M tokens.
#[derive(Debug, Clone, Copy)]
pub struct Rate {
    pub input: f64,
    pub output: f64,
}

static PRICING: Lazy<BTreeMap<&'static str, Rate>> = Lazy::new(|| {
    BTreeMap::from([
        (
            "claude/claude-3-5-sonnet-20241022",
            Rate { input: 3.0, output: 15.0 },
        ),
        (
            "claude/claude-3-opus-20240229",
            Rate { input: 15.0, output: 75.0 },
        ),
        (
            "claude/claude-3-sonnet-20240229",
            Rate { input: 3.0, output: 15.0 },
        ),
        (
            "claude/claude-3-haiku-20240307",
            Rate { input: 0.25, output: 1.25 },
        ),
    ])
});

const FREE: Rate = Rate { input: 0.0, output: 0.0 };
const DEFAULT_CLAUDE: Rate = Rate { input: 3.0, output: 15.0 };

/// Rate for a backend name: exact table rows first, then family prefixes.
/// Local and mock backends are free; an unrecognized hosted model falls back
/// to the default Sonnet rate rather than silently costing nothing.
pub fn rate_for(backend: &str) -> Rate {
    if let Some(rate) = PRICING.get(backend) {
        return *rate;
    }
    if backend.starts_with("claude") {
        return DEFAULT_CLAUDE;
    }
    FREE
}

/// Cost of a usage sample on a backend.
pub fn estimate(backend: &str, usage: TokenUsage) -> f64 {
    let rate = rate_for(backend);
    (usage.input_tokens as f64 / 1_000_000.0) * rate.input
        + (usage.output_tokens as f64 / 1_000_000.0) * rate.output
}

/// One backend's accumulated usage and estimated cost within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostRecord {
    pub backend: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub estimated_cost_usd: f64,
    pub recorded_at: DateTime<Utc>,
}

/// Per-run ledger, append-only and keyed by backend name.
#[derive(Debug, Clone, Default)]
pub struct CostTracker {
    records: BTreeMap<String, CostRecord>,
}

impl CostTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a tracker from persisted per-backend usage totals (used when
    /// resuming a run whose earlier stages already consumed tokens).
    pub fn from_usage(usage: &BTreeMap<String, TokenUsage>) -> Self {
        let mut tracker = Self::new();
        for (backend, sample) in usage {
            tracker.record(backend, *sample);
        }
        tracker
    }

    pub fn record(&mut self, backend: &str, delta: TokenUsage) {
        if delta.is_zero() {
            return;
        }
        let record = self
            .records
            .entry(backend.to_string())
            .or_insert_with(|| CostRecord {
                backend: backend.to_string(),
                input_tokens: 0,
                output_tokens: 0,
                estimated_cost_usd: 0.0,
                recorded_at: Utc::now(),
            });
        record.input_tokens += delta.input_tokens;
        record.output_tokens += delta.output_tokens;
        record.estimated_cost_usd = estimate(
            backend,
            TokenUsage::new(record.input_tokens, record.output_tokens),
        );
        record.recorded_at = Utc::now();
    }

    pub fn total_cost(&self) -> f64 {
        self.records.values().map(|r| r.estimated_cost_usd).sum()
    }

    pub fn summary(&self) -> CostSummary {
        CostSummary {
            records: self.records.clone(),
            total_cost_usd: self.total_cost(),
        }
    }
}

/// Cost summary embedded in the manifest and in the cumulative store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostSummary {
    #[serde(default)]
    pub records: BTreeMap<String, CostRecord>,
    pub total_cost_usd: f64,
}

/// One finished run's contribution to the cumulative store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunCostEntry {
    pub run_id: String,
    pub total_cost_usd: f64,
    pub recorded_at: DateTime<Utc>,
}

/// Cross-run cumulative cost store: a flat running total plus a per-run
/// breakdown in append order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CumulativeCosts {
    pub cumulative_cost_usd: f64,

    #[serde(default)]
    pub runs: Vec<RunCostEntry>,
}

impl CumulativeCosts {
    /// Load the store, or an empty one when the file does not exist yet.
    pub fn load(path: &Path) -> Result<Self, StorageError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| StorageError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| StorageError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Append one run's total and advance the running sum.
    pub fn append(&mut self, run_id: &str, summary: &CostSummary, recorded_at: DateTime<Utc>) {
        self.cumulative_cost_usd += summary.total_cost_usd;
        self.runs.push(RunCostEntry {
            run_id: run_id.to_string(),
            total_cost_usd: summary.total_cost_usd,
            recorded_at,
        });
    }

    pub fn save(&self, path: &Path) -> Result<(), StorageError> {
        write_json_atomic(path, self)
    }
}
