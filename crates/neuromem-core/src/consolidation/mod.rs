//! Consolidation - Offline maintenance strategies
//!
//! A dispatcher over the eight maintenance passes. Every strategy runs in
//! dry-run or commit mode, honors an optional wall-clock budget by
//! aborting at the next item boundary, and returns a uniform report.

mod associative;
mod habits;
mod structural;

pub use habits::{mine_workflows, suggest_workflows, WorkflowTemplate};

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::graph::BrainConfig;
use crate::storage::Store;

// ============================================================================
// STRATEGY
// ============================================================================

/// The consolidation strategies
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Remove neurons and synapses below the retention thresholds
    Prune,
    /// Fold near-identical fibers together
    Merge,
    /// Compress old episodic fibers into summary neurons
    Summarize,
    /// Advance maturation stages and extract patterns
    Mature,
    /// Promote repeated co-activation into edges
    Infer,
    /// Derive edges by transitive and cross-cluster reasoning
    Enrich,
    /// Random replay that discovers weak speculative links
    Dream,
    /// Mine action sequences into workflow templates
    LearnHabits,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Prune => "prune",
            Strategy::Merge => "merge",
            Strategy::Summarize => "summarize",
            Strategy::Mature => "mature",
            Strategy::Infer => "infer",
            Strategy::Enrich => "enrich",
            Strategy::Dream => "dream",
            Strategy::LearnHabits => "learn_habits",
        }
    }

    pub fn parse_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "prune" => Some(Strategy::Prune),
            "merge" => Some(Strategy::Merge),
            "summarize" => Some(Strategy::Summarize),
            "mature" => Some(Strategy::Mature),
            "infer" => Some(Strategy::Infer),
            "enrich" => Some(Strategy::Enrich),
            "dream" => Some(Strategy::Dream),
            "learn_habits" | "habits" => Some(Strategy::LearnHabits),
            _ => None,
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// REPORT
// ============================================================================

/// Uniform outcome of one strategy run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidationReport {
    /// Which strategy ran
    pub strategy: Strategy,
    /// Items examined
    pub examined: usize,
    /// Items mutated (or that would be, in dry-run mode)
    pub mutated: usize,
    /// Human-readable notes on what happened
    pub details: Vec<String>,
    /// True when the wall-clock budget cut the pass short
    pub partial: bool,
    /// True when no writes were made
    pub dry_run: bool,
    /// Wall-clock duration
    pub duration_ms: u64,
}

impl ConsolidationReport {
    fn new(strategy: Strategy, dry_run: bool) -> Self {
        Self {
            strategy,
            examined: 0,
            mutated: 0,
            details: Vec::new(),
            partial: false,
            dry_run,
            duration_ms: 0,
        }
    }
}

// ============================================================================
// CONTEXT
// ============================================================================

/// Shared state handed to every strategy
pub(crate) struct Ctx<'a> {
    pub store: &'a Store,
    pub config: &'a BrainConfig,
    pub now: DateTime<Utc>,
    pub deadline: Option<Instant>,
    pub dry_run: bool,
}

impl Ctx<'_> {
    /// True once the wall-clock budget is spent; strategies abort at the
    /// next item boundary when this fires
    pub fn expired(&self) -> bool {
        self.deadline.map(|d| Instant::now() >= d).unwrap_or(false)
    }
}

// ============================================================================
// DISPATCH
// ============================================================================

/// Run one consolidation strategy
pub fn consolidate(
    store: &Store,
    config: &BrainConfig,
    strategy: Strategy,
    dry_run: bool,
    max_duration: Option<std::time::Duration>,
    now: DateTime<Utc>,
) -> Result<ConsolidationReport> {
    let started = Instant::now();
    let ctx = Ctx {
        store,
        config,
        now,
        deadline: max_duration.map(|d| started + d),
        dry_run,
    };
    let mut report = ConsolidationReport::new(strategy, dry_run);

    match strategy {
        Strategy::Prune => structural::prune(&ctx, &mut report)?,
        Strategy::Merge => structural::merge(&ctx, &mut report)?,
        Strategy::Summarize => structural::summarize(&ctx, &mut report)?,
        Strategy::Mature => mature(&ctx, &mut report)?,
        Strategy::Infer => associative::infer(&ctx, &mut report)?,
        Strategy::Enrich => associative::enrich(&ctx, &mut report)?,
        Strategy::Dream => associative::dream(&ctx, &mut report)?,
        Strategy::LearnHabits => habits::learn_habits(&ctx, &mut report)?,
    }

    report.duration_ms = started.elapsed().as_millis() as u64;
    tracing::info!(
        strategy = %strategy,
        examined = report.examined,
        mutated = report.mutated,
        partial = report.partial,
        dry_run,
        "consolidation pass complete"
    );
    Ok(report)
}

/// MATURE: advance every stage transition that is due, then extract
/// patterns from the episodic layer
fn mature(ctx: &Ctx<'_>, report: &mut ConsolidationReport) -> Result<()> {
    use crate::graph::MaturationStage;

    for stage in [
        MaturationStage::Stm,
        MaturationStage::Working,
        MaturationStage::Episodic,
    ] {
        for mut maturation in ctx.store.maturations_by_stage(stage)? {
            if ctx.expired() {
                report.partial = true;
                return Ok(());
            }
            report.examined += 1;
            let entered = maturation.advance(ctx.now);
            if entered.is_empty() {
                continue;
            }
            report.mutated += 1;
            report.details.push(format!(
                "fiber {} -> {}",
                maturation.fiber_id,
                maturation.stage.as_str()
            ));
            if !ctx.dry_run {
                ctx.store.save_maturation(&maturation)?;
            }
        }
    }

    let patterns = crate::lifecycle::extract_patterns(ctx.store, ctx.now, ctx.dry_run)?;
    if patterns.concepts_created > 0 {
        report.mutated += patterns.concepts_created;
        report
            .details
            .push(format!("{} pattern concepts extracted", patterns.concepts_created));
    }
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Fiber, Maturation, MaturationStage, MemoryType, Neuron, NeuronType};
    use chrono::Duration;

    #[test]
    fn test_strategy_name_roundtrip() {
        for s in [
            Strategy::Prune,
            Strategy::Merge,
            Strategy::Summarize,
            Strategy::Mature,
            Strategy::Infer,
            Strategy::Enrich,
            Strategy::Dream,
            Strategy::LearnHabits,
        ] {
            assert_eq!(Strategy::parse_name(s.as_str()), Some(s));
        }
        assert_eq!(Strategy::parse_name("unknown"), None);
    }

    #[test]
    fn test_mature_advances_due_transitions() {
        let store = Store::open_in_memory().unwrap();
        let config = BrainConfig::default();
        let now = Utc::now();

        let id = store
            .add_neuron(&Neuron::new(NeuronType::Entity, "subject"))
            .unwrap();
        let fiber = Fiber::new(id, MemoryType::Fact);
        store.save_fiber(&fiber).unwrap();

        let mut maturation = Maturation::new(fiber.id.clone());
        maturation.stage_entered_at = now - Duration::hours(2);
        maturation.created_at = now - Duration::hours(2);
        maturation.reinforce(now - Duration::hours(1));
        store.save_maturation(&maturation).unwrap();

        let report =
            consolidate(&store, &config, Strategy::Mature, false, None, now).unwrap();
        assert_eq!(report.mutated, 1);
        assert_eq!(
            store.get_maturation(&fiber.id).unwrap().unwrap().stage,
            MaturationStage::Working
        );
    }

    #[test]
    fn test_zero_duration_budget_reports_partial() {
        let store = Store::open_in_memory().unwrap();
        let config = BrainConfig::default();
        let now = Utc::now();

        let id = store
            .add_neuron(&Neuron::new(NeuronType::Entity, "subject"))
            .unwrap();
        let fiber = Fiber::new(id, MemoryType::Fact);
        store.save_fiber(&fiber).unwrap();
        store.save_maturation(&Maturation::new(fiber.id.clone())).unwrap();

        let report = consolidate(
            &store,
            &config,
            Strategy::Mature,
            true,
            Some(std::time::Duration::ZERO),
            now,
        )
        .unwrap();
        assert!(report.partial);
    }
}
