//! Encoder - Text to graph mutations
//!
//! One encode turns a memory into neurons, synapses, a fiber with an
//! ordered pathway, and a short-term maturation record, then commits all
//! of it in a single store transaction. Near-duplicate content reuses the
//! existing fiber instead of writing anything.

mod conflict;
mod tags;

pub use conflict::{contradicts, extract_predicates, Predicate, VerbClass};
pub use tags::{normalize_tag, normalize_tags};

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::extract::{ContentAnalysis, Extractor, Sentiment, Valence};
use crate::graph::{
    BrainConfig, Fiber, Maturation, MemoryType, Neuron, NeuronState, NeuronType, Synapse,
    SynapseType, W_MAX,
};
use crate::storage::Store;

// ============================================================================
// REQUEST / RESULT
// ============================================================================

/// Input for encoding one memory
///
/// Uses `deny_unknown_fields` to reject malformed callers early.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EncodeRequest {
    /// The memory text
    pub content: String,
    /// Caller-supplied tags
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Memory classification; inferred from content when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_type: Option<MemoryType>,
    /// Free-form metadata attached to the fiber's anchor neuron
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl EncodeRequest {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tags: BTreeSet::new(),
            memory_type: None,
            metadata: serde_json::Map::new(),
        }
    }
}

/// What an encode produced
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodeResult {
    /// The fiber holding the memory (existing one on dedup)
    pub fiber_id: String,
    /// Neurons newly created by this encode
    pub neurons_created: usize,
    /// Synapses newly created by this encode
    pub synapses_created: usize,
    /// Whether near-duplicate detection reused an existing fiber
    pub deduplicated: bool,
}

// ============================================================================
// ENCODER
// ============================================================================

/// Encodes memories into one brain
pub struct Encoder<'a> {
    store: &'a Store,
    extractor: &'a Extractor,
    config: &'a BrainConfig,
}

impl<'a> Encoder<'a> {
    pub fn new(store: &'a Store, extractor: &'a Extractor, config: &'a BrainConfig) -> Self {
        Self {
            store,
            extractor,
            config,
        }
    }

    /// Encode one memory. All graph mutations commit atomically; a
    /// concurrent retrieval sees either the whole memory or none of it.
    pub fn encode(&self, request: &EncodeRequest, now: DateTime<Utc>) -> Result<EncodeResult> {
        let content = request.content.trim();
        if content.is_empty() {
            return Err(EngineError::Invalid("empty content".into()));
        }

        let analysis = self.extractor.analyze(content, now);
        if analysis.mentions.is_empty() {
            return Err(EngineError::Invalid(
                "content yielded no extractable mentions".into(),
            ));
        }

        // ---- Dedup: near-duplicate hash plus equivalent fiber content ----
        if let Some(existing) = self.find_duplicate_fiber(content, analysis.content_hash)? {
            tracing::debug!(fiber = %existing, "near-duplicate content, reusing fiber");
            return Ok(EncodeResult {
                fiber_id: existing,
                neurons_created: 0,
                synapses_created: 0,
                deduplicated: true,
            });
        }

        let memory_type = request
            .memory_type
            .unwrap_or_else(|| infer_memory_type(content));

        // ---- Neurons ----
        let mut neurons: Vec<Neuron> = Vec::new();
        let mut by_mention: BTreeMap<(String, String), usize> = BTreeMap::new();
        for mention in &analysis.mentions {
            // Time phrases become TIME neurons below, not concepts
            let in_temporal = analysis
                .temporal
                .iter()
                .any(|t| t.text.to_lowercase().contains(&mention.text.to_lowercase()));
            if in_temporal {
                continue;
            }
            let mut neuron = Neuron::new(mention.neuron_type, mention.text.clone());
            neuron.content_hash = Some(analysis.content_hash);
            neuron.created_at = now;
            let key = (
                mention.neuron_type.as_str().to_string(),
                neuron.canonical_content(),
            );
            if !by_mention.contains_key(&key) {
                by_mention.insert(key, neurons.len());
                neurons.push(neuron);
            }
        }
        for span in &analysis.temporal {
            let mut neuron = Neuron::new(NeuronType::Time, span.text.to_lowercase());
            neuron.content_hash = Some(analysis.content_hash);
            neuron.created_at = now;
            neuron.metadata.insert(
                "resolved_at".into(),
                serde_json::Value::String(span.resolved.to_rfc3339()),
            );
            let key = ("time".to_string(), neuron.canonical_content());
            if !by_mention.contains_key(&key) {
                by_mention.insert(key, neurons.len());
                neurons.push(neuron);
            }
        }

        // ---- Topic taxonomy: known proper nouns join their topic concept
        // so topic-level queries reach entity-level memories ----
        let mut topic_links: Vec<(String, String)> = Vec::new();
        for i in 0..neurons.len() {
            if neurons[i].neuron_type != NeuronType::Entity {
                continue;
            }
            let Some(topic) = crate::extract::topic_of(&neurons[i].canonical_content()) else {
                continue;
            };
            let key = ("concept".to_string(), topic.to_string());
            let topic_index = match by_mention.get(&key) {
                Some(&index) => index,
                None => {
                    let mut neuron = Neuron::new(NeuronType::Concept, topic);
                    neuron.content_hash = Some(analysis.content_hash);
                    neuron.created_at = now;
                    by_mention.insert(key, neurons.len());
                    neurons.push(neuron);
                    neurons.len() - 1
                }
            };
            topic_links.push((neurons[i].id.clone(), neurons[topic_index].id.clone()));
        }

        // ---- Anchor: highest-salience entity, else temporal head, else
        // first mention ----
        let anchor_index = pick_anchor(&neurons);
        let anchor_id = neurons[anchor_index].id.clone();
        if !request.metadata.is_empty() {
            for (k, v) in &request.metadata {
                neurons[anchor_index].metadata.insert(k.clone(), v.clone());
            }
        }

        // ---- Synapses ----
        let mut synapses = self.build_synapses(&neurons, anchor_index, &analysis);

        // Taxonomy edges conduct both ways so spreading can descend from
        // a topic to its members
        for (entity_id, topic_id) in &topic_links {
            let mut edge = Synapse::new(entity_id, topic_id, SynapseType::IsA, 0.8);
            edge.direction = crate::graph::Direction::Bi;
            edge.created_at = now;
            synapses.push(edge);
        }

        // ---- Sentiment: affective edge to the brain's emotion singleton ----
        if !analysis.sentiment.is_neutral() {
            let emotion = emotion_neuron(&analysis.sentiment, analysis.content_hash, now);
            let mut felt = Synapse::new(
                &anchor_id,
                &emotion.id,
                SynapseType::Felt,
                analysis.sentiment.intensity.max(0.1),
            );
            felt.created_at = now;
            neurons.push(emotion);
            synapses.push(felt);
        }

        // ---- Tags ----
        let mut auto_tags = tags::normalize_tags(
            self.store,
            analysis
                .mentions
                .iter()
                .filter(|m| {
                    matches!(m.neuron_type, NeuronType::Entity | NeuronType::Concept)
                })
                .map(|m| m.text.as_str()),
        )?;
        for (_, topic_id) in &topic_links {
            if let Some(topic) = neurons.iter().find(|n| &n.id == topic_id) {
                auto_tags.insert(topic.canonical_content());
            }
        }
        let agent_tags =
            tags::normalize_tags(self.store, request.tags.iter().map(String::as_str))?;

        // Confirmatory boost: the agent naming what extraction also found
        // strengthens the anchor's outgoing edges
        if auto_tags.intersection(&agent_tags).next().is_some() {
            for synapse in synapses.iter_mut().filter(|s| s.source_id == anchor_id) {
                synapse.weight = (synapse.weight + 0.1).min(W_MAX);
            }
        }

        // ---- Fiber ----
        let mut fiber = Fiber::new(anchor_id.clone(), memory_type);
        for neuron in &neurons {
            fiber.neuron_ids.insert(neuron.id.clone());
        }
        for synapse in &synapses {
            fiber.synapse_ids.insert(synapse.id.clone());
        }
        fiber.pathway = build_pathway(&neurons, &anchor_id);
        fiber.summary = summarize(content);
        fiber.auto_tags = auto_tags;
        fiber.agent_tags = agent_tags;
        fiber.created_at = now;
        if let Some(first) = analysis.temporal.first() {
            fiber.time_start = Some(first.resolved.min(now));
        }

        // ---- States: type-aware decay defaults ----
        let decay_rate = memory_type.default_decay_rate();
        let states: Vec<NeuronState> = neurons
            .iter()
            .map(|n| {
                let mut state = NeuronState::new(&n.id, decay_rate);
                state.firing_threshold = self.config.default_firing_threshold;
                state.refractory_period_ms = self.config.default_refractory_ms;
                state.created_at = now;
                state
            })
            .collect();

        // ---- Conflict detection against existing memories ----
        let conflicts = self.detect_conflicts(content, &mut neurons, now)?;
        for synapse in &conflicts.edges {
            fiber.synapse_ids.insert(synapse.id.clone());
        }
        synapses.extend(conflicts.edges);

        let maturation = {
            let mut m = Maturation::new(fiber.id.clone());
            m.created_at = now;
            m.stage_entered_at = now;
            m
        };

        // ---- Commit ----
        let neuron_count = neurons.len();
        let synapse_count = synapses.len();
        let fiber_id = fiber.id.clone();
        let owners = self
            .store
            .apply_encode(&neurons, &states, &synapses, &fiber, &maturation)?;
        let reused = owners.iter().filter(|(req, owner)| req != owner).count();

        // Disputed flags land after the commit: fresh rows already carry
        // them from the insert, but a pre-existing disputed neuron needs
        // its stored metadata merged
        for (neuron_id, metadata) in conflicts.metadata_updates {
            let owner = owners.get(&neuron_id).cloned().unwrap_or(neuron_id);
            if let Some(existing) = self.store.get_neuron(&owner)? {
                let mut merged = existing.metadata.clone();
                for (k, v) in metadata {
                    merged.insert(k, v);
                }
                self.store.update_neuron_metadata(&owner, &merged)?;
            }
        }

        tracing::debug!(
            fiber = %fiber_id,
            neurons = neuron_count,
            reused,
            synapses = synapse_count,
            "encoded memory"
        );

        Ok(EncodeResult {
            fiber_id,
            neurons_created: neuron_count - reused,
            synapses_created: synapse_count,
            deduplicated: false,
        })
    }

    /// Near-duplicate lookup: a hash-close neuron whose fiber holds
    /// equivalent content
    fn find_duplicate_fiber(&self, content: &str, hash: u64) -> Result<Option<String>> {
        let candidates = self
            .store
            .find_neurons_by_hash(hash, crate::extract::NEAR_DUPLICATE_DISTANCE)?;
        if candidates.is_empty() {
            return Ok(None);
        }
        let ids: BTreeSet<String> = candidates.iter().map(|(n, _)| n.id.clone()).collect();
        for fiber in self.store.fibers_for_neurons(&ids)? {
            if contents_equivalent(content, &fiber.summary) {
                return Ok(Some(fiber.id));
            }
        }
        Ok(None)
    }

    /// Structural edges: anchor co-occurrence, action involvement, verb
    /// edges and extracted relations
    fn build_synapses(
        &self,
        neurons: &[Neuron],
        anchor_index: usize,
        analysis: &ContentAnalysis,
    ) -> Vec<Synapse> {
        let anchor = &neurons[anchor_index];
        let mut out: Vec<Synapse> = Vec::new();
        let mut push = |mut s: Synapse| {
            s.created_at = anchor.created_at;
            let dup = out.iter().any(|e| {
                e.source_id == s.source_id
                    && e.target_id == s.target_id
                    && e.synapse_type == s.synapse_type
            });
            if !dup {
                out.push(s);
            }
        };

        // Anchor links every other member
        for neuron in neurons {
            if neuron.id == anchor.id {
                continue;
            }
            push(Synapse::new(
                &anchor.id,
                &neuron.id,
                SynapseType::CoOccurs,
                0.5,
            ));
        }

        // Actions involve the entities around them
        let actions: Vec<&Neuron> = neurons
            .iter()
            .filter(|n| n.neuron_type == NeuronType::Action)
            .collect();
        let entities: Vec<&Neuron> = neurons
            .iter()
            .filter(|n| n.neuron_type == NeuronType::Entity)
            .collect();
        let concepts: Vec<&Neuron> = neurons
            .iter()
            .filter(|n| n.neuron_type == NeuronType::Concept)
            .collect();
        for action in &actions {
            for entity in &entities {
                push(Synapse::new(
                    &action.id,
                    &entity.id,
                    SynapseType::Involves,
                    0.6,
                ));
            }
        }

        // A suggestion verb wires the subject entity to what it suggested
        let has_suggestion = actions
            .iter()
            .any(|a| a.canonical_content().starts_with("suggest"));
        if let Some(subject) = entities.first() {
            for concept in &concepts {
                let (synapse_type, weight) = if has_suggestion {
                    (SynapseType::Suggests, 0.7)
                } else {
                    (SynapseType::Involves, 0.6)
                };
                push(Synapse::new(&subject.id, &concept.id, synapse_type, weight));
            }
        }

        // Temporal head pins the memory in time
        if let Some(time) = neurons.iter().find(|n| n.neuron_type == NeuronType::Time) {
            push(Synapse::new(
                &anchor.id,
                &time.id,
                SynapseType::HappenedAt,
                0.6,
            ));
        }

        // Extracted relations become typed edges at confidence-scaled weight
        for relation in &analysis.relations {
            let Some(source) = best_mention_neuron(neurons, &relation.source_span) else {
                continue;
            };
            let Some(target) = best_mention_neuron(neurons, &relation.target_span) else {
                continue;
            };
            if source == target {
                continue;
            }
            push(Synapse::new(
                source,
                target,
                relation.synapse_type,
                0.3 + 0.4 * relation.confidence,
            ));
        }

        out
    }

    /// Compare this content's predicates against stored memories sharing
    /// the subject; contradictions wire the object neurons together and
    /// flag them. Metadata writes for rows the commit cannot carry are
    /// returned for the caller to apply after the transaction.
    fn detect_conflicts(
        &self,
        content: &str,
        neurons: &mut [Neuron],
        now: DateTime<Utc>,
    ) -> Result<ConflictOutcome> {
        let predicates = conflict::extract_predicates(content);
        let mut outcome = ConflictOutcome::default();
        if predicates.is_empty() {
            return Ok(outcome);
        }

        for predicate in &predicates {
            // Prior fibers mentioning this subject as a tag
            let prior_fibers = self.store.fibers_by_tag(&predicate.subject)?;
            let mut prior_matches: Vec<Predicate> = Vec::new();
            for fiber in prior_fibers {
                for prior in conflict::extract_predicates(&fiber.summary) {
                    if conflict::contradicts(&prior, predicate) {
                        prior_matches.push(prior);
                    }
                }
            }
            // Decision fibers are also checked by summary even when the
            // subject never became a tag
            if prior_matches.is_empty() {
                for fiber in self.fibers_with_decisions()? {
                    for prior in conflict::extract_predicates(&fiber.summary) {
                        if conflict::contradicts(&prior, predicate) {
                            prior_matches.push(prior);
                        }
                    }
                }
            }

            for prior in prior_matches {
                let Some(old_neuron) = self
                    .store
                    .find_neuron(NeuronType::Entity, &prior.object)?
                    .or(self.store.find_neuron(NeuronType::Concept, &prior.object)?)
                else {
                    continue;
                };
                let Some(new_index) = neurons.iter().position(|n| {
                    n.canonical_content() == predicate.object
                        || predicate.object.contains(&n.canonical_content())
                }) else {
                    continue;
                };

                tracing::info!(
                    old = %old_neuron.content,
                    new = %neurons[new_index].content,
                    subject = %predicate.subject,
                    "contradicting assertion detected"
                );

                let mut edge = Synapse::new(
                    &neurons[new_index].id,
                    &old_neuron.id,
                    SynapseType::Contradicts,
                    0.8,
                );
                edge.created_at = now;
                outcome.edges.push(edge);

                // Both sides disputed; the older one additionally
                // superseded. The new side is flagged in the insert batch
                // and re-asserted post-commit in case the row pre-existed.
                let disputed = serde_json::Value::Bool(true);
                neurons[new_index]
                    .metadata
                    .insert("_disputed".into(), disputed.clone());
                let mut new_meta = serde_json::Map::new();
                new_meta.insert("_disputed".into(), disputed.clone());
                outcome
                    .metadata_updates
                    .push((neurons[new_index].id.clone(), new_meta));

                let mut old_meta = serde_json::Map::new();
                old_meta.insert("_disputed".into(), disputed.clone());
                old_meta.insert("_superseded".into(), disputed);
                outcome.metadata_updates.push((old_neuron.id, old_meta));
            }
        }

        Ok(outcome)
    }

    /// All decision-typed fibers (small set; decisions are rare)
    fn fibers_with_decisions(&self) -> Result<Vec<Fiber>> {
        let mut out = Vec::new();
        let mut offset = 0;
        loop {
            let page = self.store.fibers_page(256, offset)?;
            if page.is_empty() {
                break;
            }
            offset += page.len();
            out.extend(
                page.into_iter()
                    .filter(|f| f.memory_type == MemoryType::Decision),
            );
        }
        Ok(out)
    }
}

/// Edges and deferred metadata writes produced by conflict detection
#[derive(Debug, Default)]
struct ConflictOutcome {
    edges: Vec<Synapse>,
    metadata_updates: Vec<(String, serde_json::Map<String, serde_json::Value>)>,
}

// ============================================================================
// HELPERS
// ============================================================================

/// Anchor choice: first entity, else temporal head, else first mention
fn pick_anchor(neurons: &[Neuron]) -> usize {
    neurons
        .iter()
        .position(|n| n.neuron_type == NeuronType::Entity)
        .or_else(|| neurons.iter().position(|n| n.neuron_type == NeuronType::Time))
        .unwrap_or(0)
}

/// Deterministic pathway order: time, space, entity, action, concept,
/// everything else; anchor first
fn build_pathway(neurons: &[Neuron], anchor_id: &str) -> Vec<String> {
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

    let mut pathway = vec![anchor_id.to_string()];
    for neuron in ordered {
        if neuron.id != anchor_id {
            pathway.push(neuron.id.clone());
        }
    }
    pathway
}

/// The emotion singleton for this sentiment. Identity is the canonical
/// content, so every memory with the same dominant emotion shares it.
fn emotion_neuron(sentiment: &Sentiment, content_hash: u64, now: DateTime<Utc>) -> Neuron {
    let label = sentiment
        .emotion_tags
        .first()
        .cloned()
        .unwrap_or_else(|| match sentiment.valence {
            Valence::Pos => "positive".to_string(),
            Valence::Neg => "negative".to_string(),
            Valence::Neu => "neutral".to_string(),
        });
    let mut neuron = Neuron::new(NeuronType::Concept, format!("emotion:{label}"));
    neuron.content_hash = Some(content_hash);
    neuron.created_at = now;
    neuron
}

/// First 200 characters of content, on a word boundary
fn summarize(content: &str) -> String {
    if content.len() <= 200 {
        return content.to_string();
    }
    let mut cut = 200;
    while !content.is_char_boundary(cut) {
        cut -= 1;
    }
    let head = &content[..cut];
    match head.rfind(' ') {
        Some(space) => format!("{}…", &head[..space]),
        None => format!("{head}…"),
    }
}

/// The neuron whose content best covers a relation span: the longest
/// mention appearing inside it
fn best_mention_neuron<'a>(neurons: &'a [Neuron], span: &str) -> Option<&'a str> {
    let span_lower = span.to_lowercase();
    neurons
        .iter()
        .filter(|n| span_lower.contains(&n.canonical_content()))
        .max_by_key(|n| n.canonical_content().len())
        .map(|n| n.id.as_str())
}

/// Token-level content equivalence: every content token of the shorter
/// text matches a token of the longer by equality or prefix. Catches
/// paraphrase via abbreviation ("DB" for "Database") that raw substring
/// comparison misses.
pub fn contents_equivalent(a: &str, b: &str) -> bool {
    let tokens = |s: &str| -> Vec<String> {
        s.split_whitespace()
            .map(|t| {
                t.trim_matches(|c: char| !c.is_alphanumeric() && c != '.')
                    .to_lowercase()
            })
            .filter(|t| !t.is_empty() && !crate::extract::is_stopword(t))
            .collect()
    };
    let ta = tokens(a);
    let tb = tokens(b);
    if ta.is_empty() || tb.is_empty() {
        return false;
    }
    let (shorter, longer) = if ta.len() <= tb.len() { (&ta, &tb) } else { (&tb, &ta) };
    shorter.iter().all(|s| {
        longer.iter().any(|l| {
            s == l || (s.len() >= 2 && l.starts_with(s.as_str())) || (l.len() >= 2 && s.starts_with(l.as_str()))
        })
    })
}

/// Light memory-type inference used when the request does not classify
fn infer_memory_type(content: &str) -> MemoryType {
    let lower = content.to_lowercase();
    if lower.contains("decided") || lower.contains("decision") || lower.contains("quyết định") {
        MemoryType::Decision
    } else if lower.contains("todo")
        || lower.contains("need to")
        || lower.contains("remember to")
        || lower.contains("cần làm")
    {
        MemoryType::Todo
    } else {
        MemoryType::Fact
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Store, Extractor, BrainConfig) {
        (
            Store::open_in_memory().unwrap(),
            Extractor::new(),
            BrainConfig::default(),
        )
    }

    #[test]
    fn test_basic_encode_creates_expected_neurons() {
        let (store, extractor, config) = setup();
        let encoder = Encoder::new(&store, &extractor, &config);
        let result = encoder
            .encode(
                &EncodeRequest::new("Met Alice at coffee shop. She suggested JWT for auth."),
                Utc::now(),
            )
            .unwrap();

        assert!(!result.deduplicated);
        assert!(result.neurons_created >= 4);
        assert!(result.synapses_created >= 3);

        let alice = store
            .find_neuron(NeuronType::Entity, "alice")
            .unwrap()
            .expect("alice neuron");
        let jwt = store
            .find_neuron(NeuronType::Concept, "jwt")
            .unwrap()
            .expect("jwt neuron");
        assert!(store
            .find_neuron(NeuronType::Spatial, "coffee shop")
            .unwrap()
            .is_some());
        assert!(store
            .find_neuron(NeuronType::Concept, "auth")
            .unwrap()
            .is_some());

        // Alice links to JWT both by co-occurrence and by suggestion
        let edges = store.get_synapses_between(&alice.id, &jwt.id).unwrap();
        let types: Vec<SynapseType> = edges.iter().map(|s| s.synapse_type).collect();
        assert!(types.contains(&SynapseType::CoOccurs));
        assert!(types.contains(&SynapseType::Suggests));
    }

    #[test]
    fn test_encode_same_content_twice_dedups() {
        let (store, extractor, config) = setup();
        let encoder = Encoder::new(&store, &extractor, &config);
        let request = EncodeRequest::new("Database host is db.example.com");

        let first = encoder.encode(&request, Utc::now()).unwrap();
        let second = encoder.encode(&request, Utc::now()).unwrap();

        assert!(!first.deduplicated);
        assert!(second.deduplicated);
        assert_eq!(first.fiber_id, second.fiber_id);
        assert_eq!(second.neurons_created, 0);
        assert_eq!(store.stats().unwrap().fibers, 1);
    }

    #[test]
    fn test_encode_paraphrase_dedups() {
        let (store, extractor, config) = setup();
        let encoder = Encoder::new(&store, &extractor, &config);

        let first = encoder
            .encode(&EncodeRequest::new("Database host is db.example.com"), Utc::now())
            .unwrap();
        let second = encoder
            .encode(&EncodeRequest::new("DB host is db.example.com"), Utc::now())
            .unwrap();

        assert!(second.deduplicated);
        assert_eq!(first.fiber_id, second.fiber_id);
    }

    #[test]
    fn test_conflicting_decisions_get_contradicts_edge() {
        let (store, extractor, config) = setup();
        let encoder = Encoder::new(&store, &extractor, &config);

        encoder
            .encode(&EncodeRequest::new("We decided to use PostgreSQL"), Utc::now())
            .unwrap();
        encoder
            .encode(&EncodeRequest::new("We decided to use MongoDB"), Utc::now())
            .unwrap();

        let old = store
            .find_neuron(NeuronType::Entity, "postgresql")
            .unwrap()
            .expect("postgresql neuron");
        let new = store
            .find_neuron(NeuronType::Entity, "mongodb")
            .unwrap()
            .expect("mongodb neuron");

        let edges = store.get_synapses_between(&new.id, &old.id).unwrap();
        assert!(edges
            .iter()
            .any(|s| s.synapse_type == SynapseType::Contradicts));
        assert!(old.is_disputed());
        assert!(old.is_superseded());
    }

    #[test]
    fn test_pathway_order_and_anchor() {
        let (store, extractor, config) = setup();
        let encoder = Encoder::new(&store, &extractor, &config);
        let result = encoder
            .encode(
                &EncodeRequest::new("Met Alice at coffee shop yesterday"),
                Utc::now(),
            )
            .unwrap();

        let fiber = store.get_fiber(&result.fiber_id).unwrap().unwrap();
        let alice = store.find_neuron(NeuronType::Entity, "alice").unwrap().unwrap();
        assert_eq!(fiber.anchor_neuron_id, alice.id);
        assert_eq!(fiber.pathway[0], alice.id);
        assert!(fiber.check_integrity());
        // A time neuron landed in the pathway right after the anchor
        let time = store.find_neuron(NeuronType::Time, "yesterday").unwrap().unwrap();
        assert_eq!(fiber.pathway[1], time.id);
    }

    #[test]
    fn test_emotion_singleton_shared_across_memories() {
        let (store, extractor, config) = setup();
        let encoder = Encoder::new(&store, &extractor, &config);
        encoder
            .encode(&EncodeRequest::new("Alice was frustrated with the broken deploy"), Utc::now())
            .unwrap();
        encoder
            .encode(&EncodeRequest::new("Bob was frustrated with the slow tests"), Utc::now())
            .unwrap();

        let emotion = store
            .find_neuron(NeuronType::Concept, "emotion:frustration")
            .unwrap();
        assert!(emotion.is_some());
        // Exactly one emotion singleton despite two memories
        let hits = store.find_neurons_containing("emotion:", 10).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_agent_tag_confirmation_boosts_anchor_edges() {
        let (store, extractor, config) = setup();
        let encoder = Encoder::new(&store, &extractor, &config);
        let mut request = EncodeRequest::new("Alice suggested JWT for auth");
        request.tags.insert("jwt".into());
        encoder.encode(&request, Utc::now()).unwrap();

        let alice = store.find_neuron(NeuronType::Entity, "alice").unwrap().unwrap();
        let jwt = store.find_neuron(NeuronType::Concept, "jwt").unwrap().unwrap();
        let edges = store.get_synapses_between(&alice.id, &jwt.id).unwrap();
        let co = edges
            .iter()
            .find(|s| s.synapse_type == SynapseType::CoOccurs)
            .unwrap();
        // 0.5 base + 0.1 confirmatory boost
        assert!((co.weight - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_empty_content_is_invalid() {
        let (store, extractor, config) = setup();
        let encoder = Encoder::new(&store, &extractor, &config);
        let err = encoder.encode(&EncodeRequest::new("   "), Utc::now());
        assert!(matches!(err, Err(EngineError::Invalid(_))));
    }

    #[test]
    fn test_memory_type_defaults_decay() {
        let (store, extractor, config) = setup();
        let encoder = Encoder::new(&store, &extractor, &config);
        let mut request = EncodeRequest::new("Renew the TLS certificate");
        request.memory_type = Some(MemoryType::Todo);
        let result = encoder.encode(&request, Utc::now()).unwrap();

        let fiber = store.get_fiber(&result.fiber_id).unwrap().unwrap();
        assert_eq!(fiber.memory_type, MemoryType::Todo);
        assert!(fiber.time_end.is_some());

        let states = store.get_states_batch(&fiber.neuron_ids).unwrap();
        assert!(states.values().all(|s| (s.decay_rate - 0.15).abs() < 1e-9));
    }

    #[test]
    fn test_contents_equivalent() {
        assert!(contents_equivalent(
            "Database host is db.example.com",
            "DB host is db.example.com"
        ));
        assert!(contents_equivalent("same text", "same text"));
        assert!(!contents_equivalent(
            "Database host is db.example.com",
            "We moved the database to a new region"
        ));
        assert!(!contents_equivalent("", "anything"));
    }
}
