//! Stabilization - Settling the activation map before reconstruction
//!
//! A few rounds of noise-floor subtraction, global damping and
//! homeostatic normalization. The loop converges when the L1 change
//! between rounds drops below a small epsilon, typically in two to four
//! iterations; ten rounds is the hard ceiling.

use super::ActivationMap;

/// Hard ceiling on stabilization rounds
const MAX_ROUNDS: u32 = 10;

/// Fraction of the current max subtracted as the noise floor
const NOISE_FLOOR_FRACTION: f64 = 0.05;

/// Global damping per round
const DAMPING: f64 = 0.85;

/// Convergence threshold on the L1 change between rounds
const CONVERGENCE_EPSILON: f64 = 1e-3;

/// Below this max, the map counts as fully settled
const ZERO_EPSILON: f64 = 1e-6;

// ============================================================================
// OUTCOME
// ============================================================================

/// What stabilization did
#[derive(Debug, Clone, Copy)]
pub struct StabilizeOutcome {
    /// Rounds actually run
    pub rounds: u32,
    /// Whether the loop converged (vs. hitting the round ceiling)
    pub converged: bool,
}

// ============================================================================
// STABILIZE
// ============================================================================

/// Settle the map in place. `budget` caps the post-round activation sum
/// (homeostatic normalization).
///
/// Convergence: the absolute L1 change drops under epsilon, or the
/// surviving ranking stops moving while the sum sits inside the budget —
/// noise has been cleared and further rounds would only shrink everything
/// uniformly.
pub fn stabilize(map: &mut ActivationMap, budget: f64) -> StabilizeOutcome {
    let mut rounds = 0;
    let mut converged = false;
    let mut previous_ranking: Option<Vec<String>> = None;

    while rounds < MAX_ROUNDS {
        rounds += 1;

        let max = map.values().map(|s| s.raw).fold(0.0f64, f64::max);
        if max < ZERO_EPSILON {
            converged = true;
            break;
        }

        let floor = max * NOISE_FLOOR_FRACTION;
        let mut l1_change = 0.0;

        for score in map.values_mut() {
            let before = score.raw;
            let after = ((before - floor).max(0.0)) * DAMPING;
            score.raw = after;
            l1_change += (before - after).abs();
        }

        // Homeostatic normalization: the settled sum never exceeds budget
        let sum: f64 = map.values().map(|s| s.raw).sum();
        if sum > budget && sum > 0.0 {
            let scale = budget / sum;
            for score in map.values_mut() {
                score.raw *= scale;
            }
        }

        if l1_change < CONVERGENCE_EPSILON {
            converged = true;
            break;
        }

        let ranking = current_ranking(map);
        if sum <= budget && previous_ranking.as_ref() == Some(&ranking) {
            converged = true;
            break;
        }
        previous_ranking = Some(ranking);
    }

    // Settled-out entries carry no information downstream
    map.retain(|_, score| score.raw > ZERO_EPSILON);

    StabilizeOutcome { rounds, converged }
}

/// Surviving ids in score order; equality between rounds means the map
/// has settled structurally
fn current_ranking(map: &ActivationMap) -> Vec<String> {
    let mut ids: Vec<(&String, f64)> = map
        .iter()
        .filter(|(_, s)| s.raw > ZERO_EPSILON)
        .map(|(id, s)| (id, s.raw))
        .collect();
    ids.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(b.0))
    });
    ids.into_iter().map(|(id, _)| id.clone()).collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::NodeScore;

    fn map_of(values: &[(&str, f64)]) -> ActivationMap {
        values
            .iter()
            .map(|(id, raw)| {
                (
                    id.to_string(),
                    NodeScore {
                        raw: *raw,
                        ..Default::default()
                    },
                )
            })
            .collect()
    }

    #[test]
    fn test_sum_respects_budget() {
        let mut map = map_of(&[("a", 5.0), ("b", 4.0), ("c", 3.0)]);
        stabilize(&mut map, 5.0);
        let sum: f64 = map.values().map(|s| s.raw).sum();
        assert!(sum <= 5.0 + 1e-9);
    }

    #[test]
    fn test_ranking_is_preserved() {
        let mut map = map_of(&[("a", 0.9), ("b", 0.6), ("c", 0.3)]);
        stabilize(&mut map, 5.0);
        let a = map.get("a").map(|s| s.raw).unwrap_or(0.0);
        let b = map.get("b").map(|s| s.raw).unwrap_or(0.0);
        let c = map.get("c").map(|s| s.raw).unwrap_or(0.0);
        assert!(a > b);
        assert!(b >= c);
    }

    #[test]
    fn test_deterministic_across_runs() {
        let mut first = map_of(&[("a", 0.9), ("b", 0.6), ("c", 0.3)]);
        let mut second = map_of(&[("a", 0.9), ("b", 0.6), ("c", 0.3)]);
        stabilize(&mut first, 5.0);
        stabilize(&mut second, 5.0);
        for (id, score) in &first {
            assert_eq!(score.raw, second[id].raw);
        }
    }

    #[test]
    fn test_noise_floor_clears_weak_entries() {
        let mut map = map_of(&[("strong", 1.0), ("noise", 0.04)]);
        stabilize(&mut map, 5.0);
        assert!(map.contains_key("strong"));
        assert!(!map.contains_key("noise"));
    }

    #[test]
    fn test_empty_map_settles_immediately() {
        let mut map = ActivationMap::new();
        let outcome = stabilize(&mut map, 5.0);
        assert!(outcome.converged);
        assert_eq!(outcome.rounds, 1);
    }

    #[test]
    fn test_converges_in_a_few_rounds() {
        let mut map = map_of(&[("a", 2.0), ("b", 1.0)]);
        let outcome = stabilize(&mut map, 5.0);
        assert!(outcome.converged);
        assert!(outcome.rounds <= 4, "took {} rounds", outcome.rounds);
    }
}
