//! Pattern extraction - Episodic clusters become semantic concepts
//!
//! Episodic fibers with heavily overlapping tags are clustered with
//! union-find; clusters of three or more yield a concept neuron named
//! after the most frequent entity, wired to each recurring entity with
//! taxonomy edges.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::graph::{Direction, MaturationStage, Neuron, NeuronType, Synapse, SynapseType};
use crate::storage::Store;

/// Tag overlap needed to cluster two episodic fibers
const CLUSTER_JACCARD: f64 = 0.6;

/// Minimum cluster size that yields a concept
const MIN_CLUSTER: usize = 3;

// ============================================================================
// UNION-FIND
// ============================================================================

/// Path-compressing union-find over dense indexes
#[derive(Debug)]
pub struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u32>,
}

impl UnionFind {
    pub fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
            rank: vec![0; size],
        }
    }

    pub fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            let root = self.find(self.parent[x]);
            self.parent[x] = root;
        }
        self.parent[x]
    }

    pub fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }
}

// ============================================================================
// REPORT
// ============================================================================

/// What pattern extraction found
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternReport {
    /// Episodic fibers examined
    pub fibers_examined: usize,
    /// Clusters meeting the size floor
    pub clusters_found: usize,
    /// Concept neurons created
    pub concepts_created: usize,
    /// Taxonomy synapses created
    pub synapses_created: usize,
    /// True when no writes were made
    pub dry_run: bool,
}

// ============================================================================
// EXTRACTION
// ============================================================================

/// Cluster episodic fibers and promote recurring structure to concepts
pub fn extract_patterns(store: &Store, now: DateTime<Utc>, dry_run: bool) -> Result<PatternReport> {
    let mut report = PatternReport {
        dry_run,
        ..Default::default()
    };

    let episodic = store.maturations_by_stage(MaturationStage::Episodic)?;
    let mut fibers = Vec::with_capacity(episodic.len());
    for maturation in &episodic {
        if let Some(fiber) = store.get_fiber(&maturation.fiber_id)? {
            fibers.push(fiber);
        }
    }
    report.fibers_examined = fibers.len();
    if fibers.len() < MIN_CLUSTER {
        return Ok(report);
    }

    let mut uf = UnionFind::new(fibers.len());
    for i in 0..fibers.len() {
        for j in (i + 1)..fibers.len() {
            if fibers[i].tag_jaccard(&fibers[j]) >= CLUSTER_JACCARD {
                uf.union(i, j);
            }
        }
    }

    let mut clusters: HashMap<usize, Vec<usize>> = HashMap::new();
    for i in 0..fibers.len() {
        clusters.entry(uf.find(i)).or_default().push(i);
    }

    for members in clusters.values() {
        if members.len() < MIN_CLUSTER {
            continue;
        }
        report.clusters_found += 1;

        // Entity frequency across the cluster
        let mut all_neuron_ids: BTreeSet<String> = BTreeSet::new();
        for &index in members {
            all_neuron_ids.extend(fibers[index].neuron_ids.iter().cloned());
        }
        let neurons = store.get_neurons_batch(&all_neuron_ids)?;
        let mut entity_counts: HashMap<String, (usize, String)> = HashMap::new();
        for neuron in neurons.iter().filter(|n| n.neuron_type == NeuronType::Entity) {
            let presence = members
                .iter()
                .filter(|&&index| fibers[index].neuron_ids.contains(&neuron.id))
                .count();
            entity_counts.insert(neuron.id.clone(), (presence, neuron.content.clone()));
        }

        // The namesake is the entity present in the most cluster fibers
        let Some((_, (_, namesake))) = entity_counts
            .iter()
            .max_by_key(|(id, (count, _))| (*count, std::cmp::Reverse((*id).clone())))
        else {
            continue;
        };

        tracing::info!(
            cluster_size = members.len(),
            concept = %namesake,
            "episodic cluster promoted to concept"
        );

        if dry_run {
            report.concepts_created += 1;
            continue;
        }

        let mut concept = Neuron::new(NeuronType::Concept, namesake.clone());
        concept.created_at = now;
        let concept_id = store.add_neuron(&concept)?;
        report.concepts_created += 1;

        // Entities recurring across the cluster join the concept
        for (entity_id, (presence, _)) in &entity_counts {
            if *presence < 2 || *entity_id == concept_id {
                continue;
            }
            let mut edge = Synapse::new(entity_id, &concept_id, SynapseType::IsA, 0.6);
            edge.direction = Direction::Bi;
            edge.created_at = now;
            store.add_synapse(&edge)?;
            report.synapses_created += 1;
        }
    }

    Ok(report)
}

// ============================================================================
// TESTS
// ============================================================================
