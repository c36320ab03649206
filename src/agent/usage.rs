//! Token cost estimation and the per-call usage ledger.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

use super::message::TokenUsage;

/// USD per million tokens, `(input, output)`, matched by model-name substring.
///
/// More specific patterns come first.
const PRICES: &[(&str, f64, f64)] = &[
    ("opus-4", 15.0, 75.0),
    ("sonnet-4", 3.0, 15.0),
    ("haiku-4", 0.8, 4.0),
    ("claude-3-5-sonnet", 3.0, 15.0),
    ("claude-3-5-haiku", 0.8, 4.0),
    ("gpt-4o-mini", 0.15, 0.6),
    ("gpt-4o", 2.5, 10.0),
    ("llama-3.3-70b", 0.59, 0.79),
    ("llama-3.1-8b", 0.05, 0.08),
    ("gemini-2.5-flash", 0.3, 2.5),
];

/// Estimated cost in USD of `usage` on `model`; unknown models cost 0.
#[must_use]
pub fn estimate_cost(model: &str, usage: &TokenUsage) -> f64 {
    let model = model.to_ascii_lowercase();
    PRICES
        .iter()
        .find(|(pattern, _, _)| model.contains(pattern))
        .map_or(0.0, |(_, input, output)| {
            (f64::from(usage.prompt_tokens) * input + f64::from(usage.completion_tokens) * output)
                / 1_000_000.0
        })
}

/// One provider call.
#[derive(Debug, Clone, Serialize)]
pub struct UsageRecord {
    /// Provider name.
    pub provider: String,
    /// Model name.
    pub model: String,
    /// Operation (`generate`, `stream`, `tools`).
    pub operation: &'static str,
    /// Token counts (zero when the call failed or did not report).
    pub usage: TokenUsage,
    /// Estimated cost in USD.
    pub cost: f64,
    /// Wall time.
    #[serde(serialize_with = "serialize_secs")]
    pub elapsed: Duration,
    /// Whether the call succeeded.
    pub success: bool,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

/// Aggregate statistics over a set of records.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UsageTotals {
    /// Number of calls.
    pub calls: usize,
    /// Prompt tokens.
    pub prompt_tokens: u64,
    /// Completion tokens.
    pub completion_tokens: u64,
    /// Estimated cost in USD.
    pub cost: f64,
    /// Mean call latency in milliseconds.
    pub avg_latency_ms: f64,
    /// Fraction of successful calls (1.0 when there were none).
    pub success_rate: f64,
}

impl UsageTotals {
    fn from_records<'a>(records: impl Iterator<Item = &'a UsageRecord>) -> Self {
        let mut totals = Self::default();
        let mut successes = 0usize;
        let mut latency_ms = 0.0;
        for record in records {
            totals.calls += 1;
            totals.prompt_tokens += u64::from(record.usage.prompt_tokens);
            totals.completion_tokens += u64::from(record.usage.completion_tokens);
            totals.cost += record.cost;
            latency_ms += record.elapsed.as_secs_f64() * 1_000.0;
            if record.success {
                successes += 1;
            }
        }
        #[allow(clippy::cast_precision_loss)]
        if totals.calls > 0 {
            totals.avg_latency_ms = latency_ms / totals.calls as f64;
            totals.success_rate = successes as f64 / totals.calls as f64;
        } else {
            totals.success_rate = 1.0;
        }
        totals
    }
}

/// Shared, append-only log of provider calls.
#[derive(Debug, Default)]
pub struct UsageLedger {
    records: Mutex<Vec<UsageRecord>>,
}

impl UsageLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record.
    pub fn record(&self, record: UsageRecord) {
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(record);
    }

    /// Copy of every record, oldest first.
    #[must_use]
    pub fn records(&self) -> Vec<UsageRecord> {
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Totals over all records.
    #[must_use]
    pub fn totals(&self) -> UsageTotals {
        let records = self
            .records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        UsageTotals::from_records(records.iter())
    }

    /// Totals per provider name.
    #[must_use]
    pub fn by_provider(&self) -> BTreeMap<String, UsageTotals> {
        let records = self
            .records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut names: Vec<&str> = records.iter().map(|r| r.provider.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        names
            .into_iter()
            .map(|name| {
                let totals =
                    UsageTotals::from_records(records.iter().filter(|r| r.provider == name));
                (name.to_string(), totals)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(provider: &str, success: bool, ms: u64) -> UsageRecord {
        let usage = TokenUsage::new(1_000, 500);
        UsageRecord {
            provider: provider.to_string(),
            model: "gpt-4o-mini".to_string(),
            operation: "generate",
            usage,
            cost: estimate_cost("gpt-4o-mini", &usage),
            elapsed: Duration::from_millis(ms),
            success,
        }
    }

    #[test]
    fn test_estimate_cost_prefers_specific_model() {
        let usage = TokenUsage::new(1_000_000, 1_000_000);
        assert!((estimate_cost("gpt-4o-mini", &usage) - 0.75).abs() < 1e-9);
        assert!((estimate_cost("gpt-4o-2024-08-06", &usage) - 12.5).abs() < 1e-9);
        assert!((estimate_cost("claude-sonnet-4-20250514", &usage) - 18.0).abs() < 1e-9);
        assert!(estimate_cost("mystery-model", &usage).abs() < f64::EPSILON);
    }

    #[test]
    fn test_ledger_totals_and_grouping() {
        let ledger = UsageLedger::new();
        ledger.record(record("openai", true, 100));
        ledger.record(record("openai", false, 300));
        ledger.record(record("groq", true, 50));

        let totals = ledger.totals();
        assert_eq!(totals.calls, 3);
        assert_eq!(totals.prompt_tokens, 3_000);
        assert!((totals.success_rate - 2.0 / 3.0).abs() < 1e-9);

        let grouped = ledger.by_provider();
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped["openai"].calls, 2);
        assert!((grouped["openai"].avg_latency_ms - 200.0).abs() < 1e-6);
        assert!((grouped["groq"].success_rate - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_ledger() {
        let totals = UsageLedger::new().totals();
        assert_eq!(totals.calls, 0);
        assert!((totals.success_rate - 1.0).abs() < f64::EPSILON);
    }
}
