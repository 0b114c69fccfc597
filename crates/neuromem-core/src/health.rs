//! Health reporting - Graded brain quality assessment
//!
//! Rolls connectivity, freshness, maturity, conflict load and orphan
//! coverage into a 0–100 purity score with a letter grade, plus concrete
//! warnings and recommendations.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::graph::MaturationStage;
use crate::storage::Store;

/// Page size for sampling sweeps
const SWEEP_PAGE: usize = 512;

// ============================================================================
// TYPES
// ============================================================================

/// Component subscores, each in [0, 1]
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthComponents {
    /// Edge density relative to a healthy graph
    pub connectivity: f64,
    /// Share of neurons touched in the last month
    pub freshness: f64,
    /// Share of fibers promoted beyond short-term memory
    pub maturity: f64,
    /// Inverse share of disputed or superseded neurons
    pub conflict_load: f64,
    /// Share of neurons that belong to at least one fiber
    pub orphans: f64,
}

/// A graded health report
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    /// Letter grade A–F
    pub grade: char,
    /// Composite purity score, 0–100
    pub purity: f64,
    /// Component subscores
    pub components: HealthComponents,
    /// Conditions worth attention
    pub warnings: Vec<String>,
    /// Suggested maintenance
    pub recommendations: Vec<String>,
    /// Whether the storage layer passed its integrity check
    pub storage_ok: bool,
}

// ============================================================================
// ASSESSMENT
// ============================================================================

/// Assess one brain
pub fn assess(store: &Store, now: DateTime<Utc>) -> Result<HealthReport> {
    let stats = store.stats()?;
    let storage_ok = store.integrity_check().is_ok();

    let mut components = HealthComponents::default();
    let mut warnings = Vec::new();
    let mut recommendations = Vec::new();

    if stats.neurons == 0 {
        // An empty brain is trivially healthy
        return Ok(HealthReport {
            grade: 'A',
            purity: 100.0,
            components: HealthComponents {
                connectivity: 1.0,
                freshness: 1.0,
                maturity: 1.0,
                conflict_load: 1.0,
                orphans: 1.0,
            },
            warnings,
            recommendations,
            storage_ok,
        });
    }

    // Connectivity: two edges per neuron reads as fully connected
    components.connectivity =
        ((stats.synapses as f64 / stats.neurons as f64) / 2.0).min(1.0);

    // Freshness and conflict load from a state/metadata sweep
    let month_ago = now - Duration::days(30);
    let mut fresh = 0usize;
    let mut states_seen = 0usize;
    let mut offset = 0;
    loop {
        let page = store.states_page(SWEEP_PAGE, offset)?;
        if page.is_empty() {
            break;
        }
        offset += page.len();
        states_seen += page.len();
        fresh += page
            .iter()
            .filter(|s| s.last_activated.map(|t| t >= month_ago).unwrap_or(false))
            .count();
    }
    components.freshness = if states_seen > 0 {
        fresh as f64 / states_seen as f64
    } else {
        0.0
    };

    let mut disputed = 0usize;
    let mut member_ids: BTreeSet<String> = BTreeSet::new();
    let mut offset = 0;
    loop {
        let page = store.neurons_page(SWEEP_PAGE, offset)?;
        if page.is_empty() {
            break;
        }
        offset += page.len();
        disputed += page
            .iter()
            .filter(|n| n.is_disputed() || n.is_superseded())
            .count();
    }
    components.conflict_load = 1.0 - (disputed as f64 / stats.neurons as f64).min(1.0);

    // Maturity: anything beyond STM counts
    let mature: i64 = stats
        .fibers_by_stage
        .iter()
        .filter(|(stage, _)| MaturationStage::parse_name(stage) != MaturationStage::Stm)
        .map(|(_, n)| n)
        .sum();
    components.maturity = if stats.fibers > 0 {
        (mature as f64 / stats.fibers as f64).min(1.0)
    } else {
        1.0
    };

    // Orphans: neurons belonging to no fiber
    let mut offset = 0;
    loop {
        let page = store.fibers_page(SWEEP_PAGE, offset)?;
        if page.is_empty() {
            break;
        }
        offset += page.len();
        for fiber in page {
            member_ids.extend(fiber.neuron_ids);
        }
    }
    components.orphans = (member_ids.len() as f64 / stats.neurons as f64).min(1.0);

    // Composite: connectivity and freshness carry the most weight
    let purity = 100.0
        * (0.3 * components.connectivity
            + 0.25 * components.freshness
            + 0.15 * components.maturity
            + 0.15 * components.conflict_load
            + 0.15 * components.orphans);

    if !storage_ok {
        warnings.push("storage integrity check failed; writes are refused".to_string());
        recommendations.push("run a recheck after repairing the database file".to_string());
    }
    if components.connectivity < 0.3 {
        warnings.push("graph is sparsely connected".to_string());
        recommendations.push("run infer and enrich consolidation".to_string());
    }
    if components.freshness < 0.2 {
        warnings.push("most memories have not been touched in a month".to_string());
        recommendations.push("run decay followed by prune consolidation".to_string());
    }
    if components.conflict_load < 0.8 {
        warnings.push("many memories are disputed or superseded".to_string());
        recommendations.push("review contradicting memories and prune the stale side".to_string());
    }
    if components.orphans < 0.7 {
        warnings.push("many neurons belong to no fiber".to_string());
        recommendations.push("run prune consolidation to clear orphaned neurons".to_string());
    }

    let purity = if storage_ok { purity } else { purity.min(40.0) };
    Ok(HealthReport {
        grade: grade_for(purity),
        purity,
        components,
        warnings,
        recommendations,
        storage_ok,
    })
}

fn grade_for(purity: f64) -> char {
    match purity {
        p if p >= 90.0 => 'A',
        p if p >= 80.0 => 'B',
        p if p >= 70.0 => 'C',
        p if p >= 60.0 => 'D',
        p if p >= 50.0 => 'E',
        _ => 'F',
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::{EncodeRequest, Encoder};
    use crate::extract::Extractor;
    use crate::graph::BrainConfig;

    #[test]
    fn test_empty_brain_is_grade_a() {
        let store = Store::open_in_memory().unwrap();
        let report = assess(&store, Utc::now()).unwrap();
        assert_eq!(report.grade, 'A');
        assert_eq!(report.purity, 100.0);
        assert!(report.storage_ok);
    }

    #[test]
    fn test_fresh_encode_scores_reasonably() {
        let store = Store::open_in_memory().unwrap();
        let extractor = Extractor::new();
        let config = BrainConfig::default();
        Encoder::new(&store, &extractor, &config)
            .encode(
                &EncodeRequest::new("Met Alice at coffee shop. She suggested JWT for auth."),
                Utc::now(),
            )
            .unwrap();

        let report = assess(&store, Utc::now()).unwrap();
        // Freshly encoded: well connected, nothing disputed, no orphans,
        // but nothing recalled yet and everything still short-term
        assert!(report.components.connectivity > 0.5);
        assert!(report.components.conflict_load > 0.99);
        assert!(report.components.orphans > 0.99);
        assert!(report.components.maturity < 0.01);
        assert!(report.purity > 40.0);
        assert!(report.grade != 'A');
    }

    #[test]
    fn test_grade_boundaries() {
        assert_eq!(grade_for(95.0), 'A');
        assert_eq!(grade_for(85.0), 'B');
        assert_eq!(grade_for(75.0), 'C');
        assert_eq!(grade_for(65.0), 'D');
        assert_eq!(grade_for(55.0), 'E');
        assert_eq!(grade_for(10.0), 'F');
    }
}
