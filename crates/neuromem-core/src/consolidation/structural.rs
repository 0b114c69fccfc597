//! Structural consolidation - Prune, merge and summarize
//!
//! The passes that reshape the graph itself: removing content that has
//! decayed away, folding near-identical fibers together, and compressing
//! stale episodic detail into summary neurons.

use std::collections::BTreeSet;

use chrono::Duration;

use super::{ConsolidationReport, Ctx};
use crate::error::Result;
use crate::graph::{Fiber, MaturationStage, Neuron, NeuronType, Synapse, SynapseType};

/// Page size for sweep reads
const SWEEP_PAGE: usize = 512;

/// Inbound synapse count that marks a hub neuron
const HUB_INBOUND: i64 = 8;

/// Salience at or above which a fiber shields its members from pruning
const SHIELD_SALIENCE: f64 = 0.8;

/// Episodic fibers older than this qualify for summarization
const SUMMARIZE_AGE_DAYS: i64 = 90;

/// Access count at or below which a fiber counts as cold
const SUMMARIZE_MAX_FREQUENCY: u32 = 2;

// ============================================================================
// PRUNE
// ============================================================================

/// Remove neurons whose activation decayed below the threshold, unless a
/// salient fiber, hub status or a well-reinforced synapse protects them;
/// then drop never-reinforced featherweight synapses.
pub fn prune(ctx: &Ctx<'_>, report: &mut ConsolidationReport) -> Result<()> {
    // Collect candidates
    let mut candidates: BTreeSet<String> = BTreeSet::new();
    let mut offset = 0;
    loop {
        let page = ctx.store.states_page(SWEEP_PAGE, offset)?;
        if page.is_empty() {
            break;
        }
        offset += page.len();
        for state in page {
            report.examined += 1;
            if state.activation_level < ctx.config.prune_threshold {
                candidates.insert(state.neuron_id);
            }
        }
        if ctx.expired() {
            report.partial = true;
            return Ok(());
        }
    }

    if !candidates.is_empty() {
        // Hubs survive
        let inbound = ctx.store.inbound_counts(&candidates)?;
        candidates.retain(|id| inbound.get(id).copied().unwrap_or(0) < HUB_INBOUND);

        // Members of salient or well-reinforced fibers survive
        let fibers = ctx.store.fibers_for_neurons(&candidates)?;
        for fiber in &fibers {
            let shielded = fiber.salience >= SHIELD_SALIENCE || has_earned_synapse(ctx, fiber)?;
            if shielded {
                for id in &fiber.neuron_ids {
                    candidates.remove(id);
                }
            }
        }

        if !candidates.is_empty() {
            let doomed: Vec<String> = candidates.iter().cloned().collect();
            report.mutated += doomed.len();
            report
                .details
                .push(format!("{} neurons below threshold", doomed.len()));
            if !ctx.dry_run {
                ctx.store.delete_neurons(&doomed)?;
                repair_fibers(ctx, &candidates)?;
            }
        }
    }

    // Featherweight synapses that never earned reinforcement
    let mut weak: Vec<String> = Vec::new();
    let mut offset = 0;
    loop {
        let page = ctx.store.synapses_page(SWEEP_PAGE, offset)?;
        if page.is_empty() {
            break;
        }
        offset += page.len();
        for synapse in page {
            report.examined += 1;
            if synapse.weight < ctx.config.synapse_prune_weight && synapse.reinforced_count == 0 {
                weak.push(synapse.id);
            }
        }
        if ctx.expired() {
            report.partial = true;
            break;
        }
    }
    if !weak.is_empty() {
        report.mutated += weak.len();
        report.details.push(format!("{} weak synapses", weak.len()));
        if !ctx.dry_run {
            ctx.store.delete_synapses(&weak)?;
        }
    }

    Ok(())
}

/// A fiber that still holds at least one non-inferred synapse with two or
/// more reinforcements has proven itself; pruning leaves it alone.
fn has_earned_synapse(ctx: &Ctx<'_>, fiber: &Fiber) -> Result<bool> {
    for synapse_id in &fiber.synapse_ids {
        if let Some(synapse) = ctx.store.get_synapse(synapse_id)? {
            if !synapse.is_inferred() && synapse.reinforced_count >= 2 {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

/// Drop pruned ids from fiber member sets; fibers emptied out disappear
fn repair_fibers(ctx: &Ctx<'_>, pruned: &BTreeSet<String>) -> Result<()> {
    for mut fiber in ctx.store.fibers_for_neurons(pruned)? {
        fiber.neuron_ids.retain(|id| !pruned.contains(id));
        fiber.pathway.retain(|id| !pruned.contains(id));
        if fiber.neuron_ids.is_empty() {
            ctx.store.delete_fiber(&fiber.id)?;
            continue;
        }
        if pruned.contains(&fiber.anchor_neuron_id) {
            // Reanchor on the pathway head, or any surviving member
            fiber.anchor_neuron_id = fiber
                .pathway
                .first()
                .cloned()
                .or_else(|| fiber.neuron_ids.iter().next().cloned())
                .unwrap_or_default();
        }
        if fiber.anchor_neuron_id.is_empty() {
            ctx.store.delete_fiber(&fiber.id)?;
            continue;
        }
        ctx.store.save_fiber(&fiber)?;
    }
    Ok(())
}

// ============================================================================
// MERGE
// ============================================================================

/// Fold fibers with near-identical tags and a shared anchor into the one
/// with higher salience
pub fn merge(ctx: &Ctx<'_>, report: &mut ConsolidationReport) -> Result<()> {
    let mut fibers: Vec<Fiber> = Vec::new();
    let mut offset = 0;
    loop {
        let page = ctx.store.fibers_page(SWEEP_PAGE, offset)?;
        if page.is_empty() {
            break;
        }
        offset += page.len();
        fibers.extend(page);
    }
    report.examined = fibers.len();

    let mut absorbed: BTreeSet<String> = BTreeSet::new();
    for i in 0..fibers.len() {
        if ctx.expired() {
            report.partial = true;
            break;
        }
        for j in (i + 1)..fibers.len() {
            let (a, b) = (&fibers[i], &fibers[j]);
            if absorbed.contains(&a.id) || absorbed.contains(&b.id) {
                continue;
            }
            if a.anchor_neuron_id != b.anchor_neuron_id || a.tag_jaccard(b) < 0.8 {
                continue;
            }

            // Higher salience wins; ties keep the older fiber
            let (winner, loser) = if (a.salience, &b.created_at) >= (b.salience, &a.created_at) {
                (i, j)
            } else {
                (j, i)
            };
            let loser_fiber = fibers[loser].clone();
            absorbed.insert(loser_fiber.id.clone());
            report.mutated += 1;
            report.details.push(format!(
                "fiber {} absorbed {}",
                fibers[winner].id, loser_fiber.id
            ));

            if ctx.dry_run {
                continue;
            }

            {
                let winner_fiber = &mut fibers[winner];
                winner_fiber
                    .neuron_ids
                    .extend(loser_fiber.neuron_ids.iter().cloned());
                winner_fiber
                    .synapse_ids
                    .extend(loser_fiber.synapse_ids.iter().cloned());
                winner_fiber
                    .auto_tags
                    .extend(loser_fiber.auto_tags.iter().cloned());
                winner_fiber
                    .agent_tags
                    .extend(loser_fiber.agent_tags.iter().cloned());
                winner_fiber.frequency =
                    winner_fiber.frequency.saturating_add(loser_fiber.frequency);
            }
            let new_pathway = rebuild_pathway(ctx, &fibers[winner])?;
            fibers[winner].pathway = new_pathway;
            let merged = fibers[winner].clone();
            ctx.store.save_fiber(&merged)?;

            // Maturation bookkeeping folds into the winner
            if let (Some(mut winner_m), Some(loser_m)) = (
                ctx.store.get_maturation(&merged.id)?,
                ctx.store.get_maturation(&loser_fiber.id)?,
            ) {
                winner_m.reinforcement_count = winner_m
                    .reinforcement_count
                    .max(loser_m.reinforcement_count);
                winner_m
                    .reinforcement_days
                    .extend(loser_m.reinforcement_days.iter().copied());
                ctx.store.save_maturation(&winner_m)?;
            }
            ctx.store.delete_fiber(&loser_fiber.id)?;
        }
    }
    Ok(())
}

/// Deterministic pathway: anchor first, then members ordered by neuron
/// type rank and canonical content
fn rebuild_pathway(ctx: &Ctx<'_>, fiber: &Fiber) -> Result<Vec<String>> {
    let neurons = ctx.store.get_neurons_batch(&fiber.neuron_ids)?;
    let rank = |t: NeuronType| match t {
        NeuronType::Time => 0,
        NeuronType::Spatial => 1,
        NeuronType::Entity => 2,
        NeuronType::Action => 3,
        NeuronType::Concept => 4,
        NeuronType::State => 5,
        NeuronType::Sensory => 6,
        NeuronType::Intent => 7,
    };
    let mut ordered: Vec<&Neuron> = neurons.iter().collect();
    ordered.sort_by_key(|n| (rank(n.neuron_type), n.canonical_content()));

    let mut pathway = vec![fiber.anchor_neuron_id.clone()];
    for neuron in ordered {
        if neuron.id != fiber.anchor_neuron_id {
            pathway.push(neuron.id.clone());
        }
    }
    Ok(pathway)
}

// ============================================================================
// SUMMARIZE
// ============================================================================

/// Compress cold episodic fibers: the summary becomes a first-class
/// concept neuron and the fiber shrinks to anchor plus summary.
pub fn summarize(ctx: &Ctx<'_>, report: &mut ConsolidationReport) -> Result<()> {
    let cutoff = ctx.now - Duration::days(SUMMARIZE_AGE_DAYS);
    for maturation in ctx.store.maturations_by_stage(MaturationStage::Episodic)? {
        if ctx.expired() {
            report.partial = true;
            break;
        }
        let Some(fiber) = ctx.store.get_fiber(&maturation.fiber_id)? else {
            continue;
        };
        report.examined += 1;
        if fiber.created_at > cutoff
            || fiber.frequency > SUMMARIZE_MAX_FREQUENCY
            || fiber.summary.is_empty()
        {
            continue;
        }

        report.mutated += 1;
        report
            .details
            .push(format!("fiber {} summarized", fiber.id));
        if ctx.dry_run {
            continue;
        }

        let mut summary_neuron = Neuron::new(NeuronType::Concept, fiber.summary.clone());
        summary_neuron.created_at = ctx.now;
        let summary_id = ctx.store.add_neuron(&summary_neuron)?;

        let mut edge = Synapse::new(
            &summary_id,
            &fiber.anchor_neuron_id,
            SynapseType::References,
            0.6,
        );
        edge.created_at = ctx.now;
        let edge_id = ctx.store.add_synapse(&edge)?;

        let mut compressed = fiber.clone();
        compressed.neuron_ids =
            [fiber.anchor_neuron_id.clone(), summary_id.clone()].into_iter().collect();
        compressed.synapse_ids = [edge_id].into_iter().collect();
        compressed.pathway = vec![fiber.anchor_neuron_id.clone(), summary_id];
        ctx.store.save_fiber(&compressed)?;
    }
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
