//! Cross-cutting invariant checks over the public API

use std::collections::BTreeSet;

use chrono::Utc;
use neuromem_core::recall::RecallPipeline;
use neuromem_core::{
    BrainConfig, EncodeRequest, Encoder, Extractor, MergeStrategy, QueryRequest, Store, W_MAX,
};
use neuromem_e2e_tests::TestEngine;

fn populated() -> (Store, Extractor, BrainConfig) {
    let store = Store::open_in_memory().unwrap();
    let extractor = Extractor::new();
    let config = BrainConfig::default();
    let encoder = Encoder::new(&store, &extractor, &config);
    for content in [
        "Met Alice at coffee shop. She suggested JWT for auth.",
        "We decided to use PostgreSQL",
        "The deploy failed because the lockfile drifted",
    ] {
        encoder.encode(&EncodeRequest::new(content), Utc::now()).unwrap();
    }
    (store, extractor, config)
}

/// After any retrieval, every stored activation level sits in [0, 1]
#[test]
fn invariant_activation_levels_bounded() {
    let (store, extractor, config) = populated();
    let pipeline = RecallPipeline::new(&store, &extractor, &config);
    for (step, query) in ["What did Alice suggest?", "why did the deploy fail?"]
        .iter()
        .enumerate()
    {
        let at = Utc::now() + chrono::Duration::seconds(step as i64 * 2);
        let (_, batch) = pipeline.run(&QueryRequest::new(*query), at, None).unwrap();
        store.apply_deferred(&batch).unwrap();
    }

    let mut offset = 0;
    loop {
        let states = store.states_page(256, offset).unwrap();
        if states.is_empty() {
            break;
        }
        offset += states.len();
        for state in states {
            assert!(
                (0.0..=1.0).contains(&state.activation_level),
                "state {} out of range: {}",
                state.neuron_id,
                state.activation_level
            );
        }
    }
}

/// No sequence of retrievals pushes a synapse weight past the cap, and
/// reinforcement bookkeeping never regresses
#[test]
fn invariant_weights_capped_and_counters_monotone() {
    let (store, extractor, config) = populated();
    let pipeline = RecallPipeline::new(&store, &extractor, &config);

    let mut last_counts: std::collections::HashMap<String, u32> = Default::default();
    for step in 0..6 {
        let at = Utc::now() + chrono::Duration::seconds(step * 2);
        let (_, batch) = pipeline
            .run(&QueryRequest::new("What did Alice suggest?"), at, None)
            .unwrap();
        store.apply_deferred(&batch).unwrap();

        let mut offset = 0;
        loop {
            let page = store.synapses_page(256, offset).unwrap();
            if page.is_empty() {
                break;
            }
            offset += page.len();
            for synapse in page {
                assert!(synapse.weight <= W_MAX + 1e-9, "weight {} over cap", synapse.weight);
                let previous = last_counts.insert(synapse.id.clone(), synapse.reinforced_count);
                if let Some(previous) = previous {
                    assert!(synapse.reinforced_count >= previous);
                }
            }
        }
    }
}

/// Co-activation events always store their pair in canonical order
#[test]
fn invariant_co_activation_canonical_order() {
    let (store, extractor, config) = populated();
    let pipeline = RecallPipeline::new(&store, &extractor, &config);
    let (_, batch) = pipeline
        .run(&QueryRequest::new("What did Alice suggest?"), Utc::now(), None)
        .unwrap();
    for event in &batch.co_activations {
        assert!(event.neuron_a < event.neuron_b);
    }
    store.apply_deferred(&batch).unwrap();

    let counts = store
        .co_activation_counts(Utc::now() - chrono::Duration::days(1))
        .unwrap();
    assert!(!counts.is_empty());
    for (a, b, _) in counts {
        assert!(a < b);
    }
}

/// Export then import into a fresh brain reproduces the graph id-for-id
#[tokio::test]
async fn invariant_snapshot_roundtrip() {
    let harness = TestEngine::in_memory();
    let source = harness.engine.create_brain("source").await.unwrap();
    for content in [
        "Met Alice at coffee shop. She suggested JWT for auth.",
        "Database host is db.example.com",
    ] {
        harness
            .engine
            .encode(&source.id, &EncodeRequest::new(content))
            .await
            .unwrap();
    }

    let snapshot = harness.engine.export(&source.id, false).await.unwrap();
    let target = harness.engine.create_brain("target").await.unwrap();
    harness
        .engine
        .import(&target.id, &snapshot, MergeStrategy::Skip)
        .await
        .unwrap();

    let reexport = harness.engine.export(&target.id, false).await.unwrap();
    let ids = |neurons: &[neuromem_core::Neuron]| -> BTreeSet<String> {
        neurons.iter().map(|n| n.id.clone()).collect()
    };
    assert_eq!(ids(&snapshot.neurons), ids(&reexport.neurons));
    assert_eq!(
        snapshot.synapses.iter().map(|s| s.id.clone()).collect::<BTreeSet<_>>(),
        reexport.synapses.iter().map(|s| s.id.clone()).collect::<BTreeSet<_>>()
    );
    assert_eq!(
        snapshot.fibers.iter().map(|f| f.id.clone()).collect::<BTreeSet<_>>(),
        reexport.fibers.iter().map(|f| f.id.clone()).collect::<BTreeSet<_>>()
    );
}

/// Encoding identical content any number of times yields exactly one fiber
#[tokio::test]
async fn invariant_dedup_idempotent() {
    let harness = TestEngine::in_memory();
    let brain = harness.engine.create_brain("agent").await.unwrap();

    for _ in 0..4 {
        harness
            .engine
            .encode(&brain.id, &EncodeRequest::new("Database host is db.example.com"))
            .await
            .unwrap();
    }
    let stats = harness.engine.stats(&brain.id).await.unwrap();
    assert_eq!(stats.store.fibers, 1);
}

/// A retrieval on identical input produces identical ranking
#[test]
fn invariant_retrieval_deterministic() {
    let (store, extractor, config) = populated();
    let pipeline = RecallPipeline::new(&store, &extractor, &config);
    let at = Utc::now();

    // No flush between runs: both observe the same store
    let (first, _) = pipeline
        .run(&QueryRequest::new("What did Alice suggest?"), at, None)
        .unwrap();
    let (second, _) = pipeline
        .run(&QueryRequest::new("What did Alice suggest?"), at, None)
        .unwrap();

    let ranked = |result: &neuromem_core::RetrievalResult| -> Vec<(String, String)> {
        result
            .neurons_activated
            .iter()
            .map(|n| (n.id.clone(), format!("{:.9}", n.score)))
            .collect()
    };
    assert_eq!(first.answer, second.answer);
    assert_eq!(ranked(&first), ranked(&second));
    assert_eq!(first.confidence, second.confidence);
}
