//! Maturation - Per-fiber memory stage tracking
//!
//! Fibers pass through four stages: short-term, working, episodic and
//! semantic. Advancement depends on age, reinforcement count, and for the
//! final transition on reinforcement across distinct calendar days (the
//! spacing effect).

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// STAGES
// ============================================================================

/// Memory consolidation stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MaturationStage {
    /// Short-term memory; decays fast, promoted quickly when reinforced
    #[default]
    Stm,
    /// Working memory
    Working,
    /// Episodic memory; candidate for pattern extraction
    Episodic,
    /// Semantic memory; near-permanent
    Semantic,
}

impl MaturationStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            MaturationStage::Stm => "stm",
            MaturationStage::Working => "working",
            MaturationStage::Episodic => "episodic",
            MaturationStage::Semantic => "semantic",
        }
    }

    pub fn parse_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "stm" => MaturationStage::Stm,
            "working" => MaturationStage::Working,
            "episodic" => MaturationStage::Episodic,
            "semantic" => MaturationStage::Semantic,
            _ => MaturationStage::Stm,
        }
    }

    /// Decay multiplier applied to member neurons of fibers in this stage
    pub fn decay_multiplier(&self) -> f64 {
        match self {
            MaturationStage::Stm => 5.0,
            MaturationStage::Working => 2.0,
            MaturationStage::Episodic => 1.0,
            MaturationStage::Semantic => 0.3,
        }
    }
}

impl std::fmt::Display for MaturationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// MATURATION RECORD
// ============================================================================

/// Per-fiber stage record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Maturation {
    /// The fiber this record tracks
    pub fiber_id: String,
    /// Current stage
    pub stage: MaturationStage,
    /// Total reinforcements since creation
    pub reinforcement_count: u32,
    /// Calendar days on which the fiber was reinforced
    pub reinforcement_days: BTreeSet<NaiveDate>,
    /// When the current stage was entered
    pub stage_entered_at: DateTime<Utc>,
    /// When the record was created
    pub created_at: DateTime<Utc>,
}

impl Maturation {
    /// Fresh short-term record for a newly encoded fiber
    pub fn new(fiber_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            fiber_id: fiber_id.into(),
            stage: MaturationStage::Stm,
            reinforcement_count: 0,
            reinforcement_days: BTreeSet::new(),
            stage_entered_at: now,
            created_at: now,
        }
    }

    /// Record a reinforcement event at `now`
    pub fn reinforce(&mut self, now: DateTime<Utc>) {
        self.reinforcement_count = self.reinforcement_count.saturating_add(1);
        self.reinforcement_days.insert(now.date_naive());
    }

    /// The stage this record qualifies for at `now`, or `None` when it
    /// should stay where it is.
    ///
    /// Rules:
    /// - STM → Working after ≥ 30 min in stage and ≥ 1 reinforcement
    /// - Working → Episodic after ≥ 4 h in stage
    /// - Episodic → Semantic after ≥ 7 d of total age AND ≥ 3 distinct
    ///   reinforcement days (spacing effect)
    pub fn next_stage(&self, now: DateTime<Utc>) -> Option<MaturationStage> {
        let in_stage = now - self.stage_entered_at;
        let age = now - self.created_at;
        match self.stage {
            MaturationStage::Stm => {
                if in_stage >= Duration::minutes(30) && self.reinforcement_count >= 1 {
                    Some(MaturationStage::Working)
                } else {
                    None
                }
            }
            MaturationStage::Working => {
                if in_stage >= Duration::hours(4) {
                    Some(MaturationStage::Episodic)
                } else {
                    None
                }
            }
            MaturationStage::Episodic => {
                if age >= Duration::days(7) && self.reinforcement_days.len() >= 3 {
                    Some(MaturationStage::Semantic)
                } else {
                    None
                }
            }
            MaturationStage::Semantic => None,
        }
    }

    /// Advance through any transitions that are due; returns the stages
    /// entered, in order.
    pub fn advance(&mut self, now: DateTime<Utc>) -> Vec<MaturationStage> {
        let mut entered = Vec::new();
        while let Some(next) = self.next_stage(now) {
            self.stage = next;
            self.stage_entered_at = now;
            entered.push(next);
        }
        entered
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn backdate(m: &mut Maturation, stage_hours: i64, age_days: i64) {
        let now = Utc::now();
        m.stage_entered_at = now - Duration::hours(stage_hours);
        m.created_at = now - Duration::days(age_days);
    }

    #[test]
    fn test_stm_needs_reinforcement() {
        let mut m = Maturation::new("f-1");
        backdate(&mut m, 1, 0);
        // 1 hour in STM but zero reinforcements: stays
        assert_eq!(m.next_stage(Utc::now()), None);
        m.reinforce(Utc::now());
        assert_eq!(m.next_stage(Utc::now()), Some(MaturationStage::Working));
    }

    #[test]
    fn test_working_to_episodic_is_time_only() {
        let mut m = Maturation::new("f-1");
        m.stage = MaturationStage::Working;
        backdate(&mut m, 5, 1);
        assert_eq!(m.next_stage(Utc::now()), Some(MaturationStage::Episodic));
    }

    #[test]
    fn test_spacing_effect_gates_semantic() {
        let now = Utc::now();
        let mut m = Maturation::new("f-1");
        m.stage = MaturationStage::Episodic;
        backdate(&mut m, 24 * 8, 8);

        // Five reinforcements all on one day do not qualify
        for _ in 0..5 {
            m.reinforce(now - Duration::days(8));
        }
        assert_eq!(m.reinforcement_days.len(), 1);
        assert_eq!(m.next_stage(now), None);

        // Two more days of reinforcement unlock the transition
        m.reinforce(now - Duration::days(6));
        m.reinforce(now - Duration::days(4));
        assert_eq!(m.next_stage(now), Some(MaturationStage::Semantic));
    }

    #[test]
    fn test_advance_one_transition_per_sweep() {
        let now = Utc::now();
        let mut m = Maturation::new("f-1");
        m.reinforce(now - Duration::days(9));
        m.reinforce(now - Duration::days(5));
        m.reinforce(now - Duration::days(2));
        backdate(&mut m, 24 * 9, 9);

        // Entering a stage resets the in-stage clock, so a long-idle STM
        // fiber climbs one stage per sweep, not straight to the top
        assert_eq!(m.advance(now), vec![MaturationStage::Working]);
        assert_eq!(m.advance(now), vec![]);

        // Once the working stage has aged, the episodic gate opens; the
        // semantic gate is measured from total age and spacing, so both
        // fire in the same sweep
        m.stage_entered_at = now - Duration::hours(5);
        assert_eq!(
            m.advance(now),
            vec![MaturationStage::Episodic, MaturationStage::Semantic]
        );
        assert_eq!(m.stage, MaturationStage::Semantic);
    }

    #[test]
    fn test_decay_multiplier_ordering() {
        assert!(MaturationStage::Stm.decay_multiplier() > MaturationStage::Working.decay_multiplier());
        assert!(
            MaturationStage::Episodic.decay_multiplier()
                > MaturationStage::Semantic.decay_multiplier()
        );
    }
}
