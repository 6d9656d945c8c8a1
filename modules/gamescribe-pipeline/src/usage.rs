use std::fmt;
use std::sync::Mutex;

use serde::Serialize;
use tracing::info;

use gamescribe_common::TokenUsage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Scout,
    Editor,
    Specialist,
    Reviewer,
    Fixer,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Scout => "scout",
            Stage::Editor => "editor",
            Stage::Specialist => "specialist",
            Stage::Reviewer => "reviewer",
            Stage::Fixer => "fixer",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What one stage spent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageMetrics {
    pub stage: Stage,
    pub duration_ms: u64,
    pub usage: TokenUsage,
    pub cost_usd: f64,
    pub llm_calls: u32,
    /// Search spend attributed to this stage.
    pub search_cost_usd: f64,
}

/// Accumulates LLM usage across concurrent calls. Thread-safe so parallel
/// section writes and background cleaning can share one meter.
#[derive(Debug, Default)]
pub struct UsageMeter {
    inner: Mutex<MeterTotals>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct MeterTotals {
    pub usage: TokenUsage,
    pub cost_usd: f64,
    pub llm_calls: u32,
}

impl UsageMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, usage: TokenUsage, cost_usd: Option<f64>) {
        let mut totals = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        totals.usage += usage;
        totals.cost_usd += cost_usd.unwrap_or(0.0);
        totals.llm_calls += 1;
    }

    pub fn totals(&self) -> MeterTotals {
        *self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Per-run rollup returned with the article.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunMetrics {
    pub stages: Vec<StageMetrics>,
    /// LLM spend on source cleaning, which happens inside research.
    pub cleaning: Option<CleaningMetrics>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CleaningMetrics {
    pub usage: TokenUsage,
    pub cost_usd: f64,
    pub llm_calls: u32,
}

impl RunMetrics {
    pub fn push(&mut self, metrics: StageMetrics) {
        info!(
            stage = metrics.stage.as_str(),
            duration_ms = metrics.duration_ms,
            input_tokens = metrics.usage.input_tokens,
            output_tokens = metrics.usage.output_tokens,
            llm_calls = metrics.llm_calls,
            cost_usd = metrics.cost_usd,
            search_cost_usd = metrics.search_cost_usd,
            "Stage complete"
        );
        self.stages.push(metrics);
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageMetrics> {
        self.stages.iter().find(|m| m.stage == stage)
    }

    pub fn total_usage(&self) -> TokenUsage {
        let stages = self
            .stages
            .iter()
            .fold(TokenUsage::default(), |acc, m| acc + m.usage);
        stages + self.cleaning.map(|c| c.usage).unwrap_or_default()
    }

    pub fn total_cost_usd(&self) -> f64 {
        let stages: f64 = self
            .stages
            .iter()
            .map(|m| m.cost_usd + m.search_cost_usd)
            .sum();
        stages + self.cleaning.map(|c| c.cost_usd).unwrap_or(0.0)
    }

    pub fn total_duration_ms(&self) -> u64 {
        self.stages.iter().map(|m| m.duration_ms).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meter_accumulates_calls() {
        let meter = UsageMeter::new();
        meter.record(TokenUsage::new(100, 20), Some(0.01));
        meter.record(TokenUsage::new(50, 5), None);
        let totals = meter.totals();
        assert_eq!(totals.usage, TokenUsage::new(150, 25));
        assert_eq!(totals.llm_calls, 2);
        assert!((totals.cost_usd - 0.01).abs() < 1e-9);
    }

    #[test]
    fn run_totals_include_search_and_cleaning() {
        let mut run = RunMetrics::default();
        run.push(StageMetrics {
            stage: Stage::Scout,
            duration_ms: 10,
            usage: TokenUsage::new(10, 10),
            cost_usd: 0.5,
            llm_calls: 1,
            search_cost_usd: 0.25,
        });
        run.cleaning = Some(CleaningMetrics {
            usage: TokenUsage::new(5, 5),
            cost_usd: 0.25,
            llm_calls: 2,
        });
        assert_eq!(run.total_usage().total(), 30);
        assert!((run.total_cost_usd() - 1.0).abs() < 1e-9);
        assert!(run.stage(Stage::Editor).is_none());
    }
}
