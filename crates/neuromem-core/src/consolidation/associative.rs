//! Associative consolidation - Infer, enrich and dream
//!
//! The passes that add edges instead of removing content: co-activation
//! statistics promoted to real synapses, transitive causal closure, and
//! a speculative replay pass that plants weak links for later
//! reinforcement to confirm.

use std::collections::{BTreeSet, HashMap};

use chrono::Duration;

use super::{ConsolidationReport, Ctx};
use crate::activation::{classic_spread, Anchor, ActivationGraph, SpreadParams};
use crate::error::Result;
use crate::graph::{Synapse, SynapseType};
use crate::lifecycle::UnionFind;
use crate::storage::Store;

/// Page size for sweep reads
const SWEEP_PAGE: usize = 512;

/// How many neurons one dream pass replays
const DREAM_SAMPLE: usize = 10;

/// Dream edges start here and decay an order of magnitude faster
const DREAM_WEIGHT: f64 = 0.1;
const DREAM_DECAY_MULTIPLIER: f64 = 10.0;

// ============================================================================
// INFER
// ============================================================================

/// Promote repeated co-activation into edges: pairs seen at least the
/// configured number of times inside the window either gain a CoOccurs
/// synapse or reinforce the one they have.
pub fn infer(ctx: &Ctx<'_>, report: &mut ConsolidationReport) -> Result<()> {
    let since = ctx.now - Duration::days(ctx.config.co_activation_window_days);
    let counts = ctx.store.co_activation_counts(since)?;
    report.examined = counts.len();

    let mut created: Vec<(String, String)> = Vec::new();
    for (a, b, count) in counts {
        if ctx.expired() {
            report.partial = true;
            break;
        }
        if count < ctx.config.co_activation_threshold {
            // Counts are ordered descending; nothing below qualifies
            break;
        }
        if report.mutated >= ctx.config.max_inferences_per_run {
            report
                .details
                .push("inference cap reached".to_string());
            break;
        }

        let existing = ctx.store.get_synapses_between(&a, &b)?;
        if let Some(synapse) = existing.first() {
            report.mutated += 1;
            if !ctx.dry_run {
                let weight = (synapse.weight + 0.05).min(1.0);
                ctx.store.update_synapse_weight(
                    &synapse.id,
                    weight,
                    synapse.reinforced_count.saturating_add(1),
                    ctx.now,
                )?;
            }
            continue;
        }

        report.mutated += 1;
        report
            .details
            .push(format!("co-activation pair ({count}x) linked"));
        if !ctx.dry_run {
            let weight = (f64::from(count) / 10.0).min(1.0);
            let mut edge = Synapse::new(&a, &b, SynapseType::CoOccurs, weight).mark_inferred();
            edge.created_at = ctx.now;
            ctx.store.add_synapse(&edge)?;
            created.push((a, b));
        }
    }

    // Associative tags: clusters of co-activated neurons tag the fibers
    // they span
    if !ctx.dry_run && created.len() >= 2 {
        tag_clusters(ctx.store, &created)?;
    }

    // The window is also the retention horizon for raw events
    if !ctx.dry_run {
        let pruned = ctx.store.prune_co_activation(since)?;
        if pruned > 0 {
            report.details.push(format!("{pruned} stale events pruned"));
        }
    }
    Ok(())
}

/// Union-find over newly linked pairs; clusters of three or more stamp a
/// shared tag onto the fibers containing at least two members
fn tag_clusters(store: &Store, pairs: &[(String, String)]) -> Result<()> {
    let mut ids: Vec<String> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();
    for (a, b) in pairs {
        for id in [a, b] {
            if !index.contains_key(id.as_str()) {
                index.insert(id.as_str(), ids.len());
                ids.push(id.clone());
            }
        }
    }
    let mut uf = UnionFind::new(ids.len());
    for (a, b) in pairs {
        uf.union(index[a.as_str()], index[b.as_str()]);
    }

    let mut clusters: HashMap<usize, Vec<usize>> = HashMap::new();
    for i in 0..ids.len() {
        clusters.entry(uf.find(i)).or_default().push(i);
    }

    for members in clusters.values().filter(|m| m.len() >= 3) {
        let member_ids: BTreeSet<String> = members.iter().map(|&i| ids[i].clone()).collect();
        let neurons = store.get_neurons_batch(&member_ids)?;
        // The shortest canonical content names the association
        let Some(tag) = neurons
            .iter()
            .map(|n| n.canonical_content())
            .min_by_key(|c| (c.len(), c.clone()))
        else {
            continue;
        };
        for mut fiber in store.fibers_for_neurons(&member_ids)? {
            let overlap = fiber
                .neuron_ids
                .iter()
                .filter(|id| member_ids.contains(*id))
                .count();
            if overlap >= 2 && fiber.auto_tags.insert(tag.clone()) {
                store.save_fiber(&fiber)?;
            }
        }
    }
    Ok(())
}

// ============================================================================
// ENRICH
// ============================================================================

/// Derive edges: transitive closure over causal chains, and RelatedTo
/// links between fibers that share an entity
pub fn enrich(ctx: &Ctx<'_>, report: &mut ConsolidationReport) -> Result<()> {
    // ---- Causal closure: A->B, B->C gives A->C ----
    let mut causal: Vec<Synapse> = Vec::new();
    let mut offset = 0;
    loop {
        let page = ctx.store.synapses_page(SWEEP_PAGE, offset)?;
        if page.is_empty() {
            break;
        }
        offset += page.len();
        causal.extend(
            page.into_iter()
                .filter(|s| s.synapse_type == SynapseType::CausedBy),
        );
    }
    report.examined += causal.len();

    let by_source: HashMap<&str, Vec<&Synapse>> = causal.iter().fold(
        HashMap::new(),
        |mut acc, s| {
            acc.entry(s.source_id.as_str()).or_default().push(s);
            acc
        },
    );

    for first in &causal {
        if ctx.expired() {
            report.partial = true;
            return Ok(());
        }
        let Some(continuations) = by_source.get(first.target_id.as_str()) else {
            continue;
        };
        for second in continuations {
            if second.target_id == first.source_id {
                continue;
            }
            if !ctx
                .store
                .get_synapses_between(&first.source_id, &second.target_id)?
                .is_empty()
            {
                continue;
            }
            report.mutated += 1;
            report.details.push(format!(
                "causal chain closed {} -> {}",
                first.source_id, second.target_id
            ));
            if ctx.dry_run {
                continue;
            }
            let weight = 0.5 * first.weight.min(second.weight);
            let mut edge = Synapse::new(
                &first.source_id,
                &second.target_id,
                SynapseType::CausedBy,
                weight,
            )
            .mark_inferred();
            edge.created_at = ctx.now;
            ctx.store.add_synapse(&edge)?;
        }
    }

    // ---- Cross-cluster links: fibers sharing an entity relate ----
    let mut offset = 0;
    loop {
        if ctx.expired() {
            report.partial = true;
            break;
        }
        let page = ctx.store.neurons_page(SWEEP_PAGE, offset)?;
        if page.is_empty() {
            break;
        }
        offset += page.len();
        for neuron in page {
            if neuron.neuron_type != crate::graph::NeuronType::Entity {
                continue;
            }
            let fibers = ctx
                .store
                .fibers_for_neurons(&[neuron.id.clone()].into_iter().collect())?;
            if fibers.len() < 2 {
                continue;
            }
            report.examined += 1;
            for i in 0..fibers.len() {
                for j in (i + 1)..fibers.len() {
                    let (a, b) = (&fibers[i].anchor_neuron_id, &fibers[j].anchor_neuron_id);
                    if a == b || !ctx.store.get_synapses_between(a, b)?.is_empty() {
                        continue;
                    }
                    report.mutated += 1;
                    if !ctx.dry_run {
                        let mut edge =
                            Synapse::new(a, b, SynapseType::RelatedTo, 0.3).mark_inferred();
                        edge.created_at = ctx.now;
                        ctx.store.add_synapse(&edge)?;
                    }
                }
            }
        }
    }
    Ok(())
}

// ============================================================================
// DREAM
// ============================================================================

/// Replay from a deterministic pseudo-random sample of neurons; pairs
/// that co-activate without being linked gain a featherweight RelatedTo
/// that survives only if something later reinforces it.
pub fn dream(ctx: &Ctx<'_>, report: &mut ConsolidationReport) -> Result<()> {
    let stats = ctx.store.stats()?;
    if stats.neurons == 0 {
        return Ok(());
    }

    // Deterministic sample: an xorshift walk seeded by the clock
    let mut seed = ctx.now.timestamp() as u64 ^ (stats.neurons as u64).rotate_left(17);
    if seed == 0 {
        seed = 0x9e37_79b9;
    }
    let mut sample: BTreeSet<String> = BTreeSet::new();
    for _ in 0..DREAM_SAMPLE * 2 {
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;
        let offset = (seed % stats.neurons as u64) as usize;
        if let Some(neuron) = ctx.store.neurons_page(1, offset)?.pop() {
            sample.insert(neuron.id);
        }
        if sample.len() >= DREAM_SAMPLE {
            break;
        }
    }
    report.examined = sample.len();

    // Short spread from each sampled neuron over its loaded neighborhood
    let universe = sample.clone();
    let edges = ctx.store.synapses_for_neurons(&universe)?;
    let mut full: BTreeSet<String> = universe.clone();
    for edge in &edges {
        full.insert(edge.source_id.clone());
        full.insert(edge.target_id.clone());
    }
    let mut graph = ActivationGraph::default();
    for neuron in ctx.store.get_neurons_batch(&full)? {
        graph.neurons.insert(neuron.id.clone(), neuron);
    }
    graph.synapses = edges;
    graph.index_synapses();

    let params = SpreadParams {
        decay_rate: ctx.config.decay_rate,
        activation_threshold: ctx.config.activation_threshold * 0.5,
        max_hops: 2,
        queue_cap: ctx.config.queue_cap,
    };
    let anchors: Vec<Anchor> = sample
        .iter()
        .map(|id| Anchor {
            neuron_id: id.clone(),
            weight: 0.8,
        })
        .collect();
    let (map, _) = classic_spread(&graph, &anchors, &params, ctx.now, ctx.deadline);

    // Unexpected pairs: co-activated from different seeds, not yet linked
    let activated: Vec<&String> = map
        .iter()
        .filter(|(_, score)| score.anchor_sources.len() >= 2)
        .map(|(id, _)| id)
        .collect();
    for i in 0..activated.len() {
        if ctx.expired() {
            report.partial = true;
            break;
        }
        for j in (i + 1)..activated.len() {
            let (a, b) = (activated[i], activated[j]);
            if graph.edge_between(a, b).is_some()
                || !ctx.store.get_synapses_between(a, b)?.is_empty()
            {
                continue;
            }
            report.mutated += 1;
            report
                .details
                .push(format!("dream link {a} ~ {b}"));
            if ctx.dry_run {
                continue;
            }
            let mut edge = Synapse::new(a, b, SynapseType::RelatedTo, DREAM_WEIGHT).mark_inferred();
            edge.metadata.insert(
                "_decay_multiplier".into(),
                serde_json::Value::from(DREAM_DECAY_MULTIPLIER),
            );
            edge.created_at = ctx.now;
            ctx.store.add_synapse(&edge)?;
        }
    }
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consolidation::{consolidate, Strategy};
    use crate::graph::{BrainConfig, Neuron, NeuronType};
    use chrono::Utc;

    fn setup() -> (Store, BrainConfig) {
        (Store::open_in_memory().unwrap(), BrainConfig::default())
    }

    fn neuron(store: &Store, content: &str) -> String {
        store
            .add_neuron(&Neuron::new(NeuronType::Concept, content))
            .unwrap()
    }

    #[test]
    fn test_infer_creates_co_occurs_from_repeated_pairs() {
        let (store, config) = setup();
        let x = neuron(&store, "x");
        let y = neuron(&store, "y");
        let (a, b) = if x < y { (x, y) } else { (y, x) };

        let now = Utc::now();
        for _ in 0..3 {
            store.record_co_activation(&a, &b, now).unwrap();
        }

        let report =
            consolidate(&store, &config, Strategy::Infer, false, None, now).unwrap();
        assert_eq!(report.mutated, 1);

        let edges = store.get_synapses_between(&a, &b).unwrap();
        assert_eq!(edges.len(), 1);
        let edge = &edges[0];
        assert_eq!(edge.synapse_type, SynapseType::CoOccurs);
        assert!((edge.weight - 0.3).abs() < 1e-9);
        assert!(edge.is_inferred());
    }

    #[test]
    fn test_infer_below_threshold_does_nothing() {
        let (store, config) = setup();
        let a = neuron(&store, "a");
        let b = neuron(&store, "b");
        let (a, b) = if a < b { (a, b) } else { (b, a) };
        store.record_co_activation(&a, &b, Utc::now()).unwrap();

        let report =
            consolidate(&store, &config, Strategy::Infer, false, None, Utc::now()).unwrap();
        assert_eq!(report.mutated, 0);
        assert!(store.get_synapses_between(&a, &b).unwrap().is_empty());
    }

    #[test]
    fn test_infer_reinforces_existing_edge() {
        let (store, config) = setup();
        let x = neuron(&store, "x");
        let y = neuron(&store, "y");
        let (a, b) = if x < y { (x, y) } else { (y, x) };
        let sid = store
            .add_synapse(&Synapse::new(&a, &b, SynapseType::CoOccurs, 0.4))
            .unwrap();

        let now = Utc::now();
        for _ in 0..4 {
            store.record_co_activation(&a, &b, now).unwrap();
        }
        consolidate(&store, &config, Strategy::Infer, false, None, now).unwrap();

        let edge = store.get_synapse(&sid).unwrap().unwrap();
        assert!((edge.weight - 0.45).abs() < 1e-9);
        assert_eq!(edge.reinforced_count, 1);
    }

    #[test]
    fn test_enrich_closes_causal_chains() {
        let (store, config) = setup();
        let a = neuron(&store, "deploy failed");
        let b = neuron(&store, "lockfile drift");
        let c = neuron(&store, "stale ci cache");
        store
            .add_synapse(&Synapse::new(&a, &b, SynapseType::CausedBy, 0.8))
            .unwrap();
        store
            .add_synapse(&Synapse::new(&b, &c, SynapseType::CausedBy, 0.6))
            .unwrap();

        let report =
            consolidate(&store, &config, Strategy::Enrich, false, None, Utc::now()).unwrap();
        assert!(report.mutated >= 1);

        let closed = store.get_synapses_between(&a, &c).unwrap();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].synapse_type, SynapseType::CausedBy);
        // 0.5 * min(0.8, 0.6)
        assert!((closed[0].weight - 0.3).abs() < 1e-9);
        assert!(closed[0].is_inferred());
    }

    #[test]
    fn test_dream_creates_weak_fast_decaying_links() {
        let (store, config) = setup();
        // A hub topology: two seeds, both wired to a middle neuron but
        // not to each other
        let hub = neuron(&store, "hub");
        let mut spokes = Vec::new();
        for i in 0..6 {
            let spoke = neuron(&store, &format!("spoke-{i}"));
            store
                .add_synapse(&Synapse::new(&spoke, &hub, SynapseType::CoOccurs, 0.9))
                .unwrap();
            spokes.push(spoke);
        }

        let report =
            consolidate(&store, &config, Strategy::Dream, false, None, Utc::now()).unwrap();
        assert!(report.examined > 0);

        // Any created edge carries the dream signature
        let mut offset = 0;
        let mut found_dream_edge = false;
        loop {
            let page = store.synapses_page(256, offset).unwrap();
            if page.is_empty() {
                break;
            }
            offset += page.len();
            for synapse in page {
                if synapse.synapse_type == SynapseType::RelatedTo && synapse.is_inferred() {
                    assert!((synapse.weight - DREAM_WEIGHT).abs() < 1e-9);
                    assert_eq!(
                        synapse
                            .metadata
                            .get("_decay_multiplier")
                            .and_then(serde_json::Value::as_f64),
                        Some(DREAM_DECAY_MULTIPLIER)
                    );
                    found_dream_edge = true;
                }
            }
        }
        // The sample is clock-seeded; the hub makes collisions likely but
        // not guaranteed, so only the signature is asserted
        let _ = found_dream_edge;
    }
}
