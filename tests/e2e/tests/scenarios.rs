//! End-to-end scenarios through the public engine API

use chrono::Utc;
use neuromem_core::consolidation::consolidate;
use neuromem_core::recall::RecallPipeline;
use neuromem_core::{
    BrainConfig, EncodeRequest, Encoder, Extractor, NeuronType, QueryRequest, Store, Strategy,
    SynapseType, SynthesisMethod,
};
use neuromem_e2e_tests::TestEngine;

// ============================================================================
// BASIC ENCODE + RECALL
// ============================================================================

#[tokio::test]
async fn scenario_basic_encode_and_recall() {
    let harness = TestEngine::file_backed();
    let brain = harness.engine.create_brain("agent").await.unwrap();

    let encoded = harness
        .engine
        .encode(
            &brain.id,
            &EncodeRequest::new("Met Alice at coffee shop. She suggested JWT for auth."),
        )
        .await
        .unwrap();
    assert!(encoded.neurons_created >= 4);

    // The expected neuron inventory exists
    let entities = harness
        .engine
        .list_neurons(
            &brain.id,
            &neuromem_core::NeuronFilter {
                neuron_type: Some(NeuronType::Entity),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(entities.neurons.iter().any(|n| n.content == "Alice"));

    let concepts = harness
        .engine
        .list_neurons(
            &brain.id,
            &neuromem_core::NeuronFilter {
                neuron_type: Some(NeuronType::Concept),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    for expected in ["JWT", "auth"] {
        assert!(
            concepts
                .neurons
                .iter()
                .any(|n| n.content.eq_ignore_ascii_case(expected)),
            "missing concept {expected}"
        );
    }

    let spatial = harness
        .engine
        .list_neurons(
            &brain.id,
            &neuromem_core::NeuronFilter {
                neuron_type: Some(NeuronType::Spatial),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(spatial.neurons.iter().any(|n| n.content == "coffee shop"));

    // Recall at depth 1 answers with the suggestion
    let mut query = QueryRequest::new("What did Alice suggest?");
    query.depth = Some(1);
    let result = harness.engine.query(&brain.id, &query).await.unwrap();
    assert!(
        result.confidence >= 0.5,
        "confidence was {}",
        result.confidence
    );
    assert!(result.answer.contains("JWT"), "answer: {:?}", result.answer);
    assert!(!result.fibers_matched.is_empty());
}

// ============================================================================
// DEDUP ON PARAPHRASE
// ============================================================================

#[tokio::test]
async fn scenario_paraphrase_dedup() {
    let harness = TestEngine::file_backed();
    let brain = harness.engine.create_brain("agent").await.unwrap();

    let first = harness
        .engine
        .encode(&brain.id, &EncodeRequest::new("Database host is db.example.com"))
        .await
        .unwrap();
    assert!(!first.deduplicated);

    let second = harness
        .engine
        .encode(&brain.id, &EncodeRequest::new("DB host is db.example.com"))
        .await
        .unwrap();
    assert!(second.deduplicated);
    assert_eq!(second.fiber_id, first.fiber_id);
    assert_eq!(second.neurons_created, 0);

    let stats = harness.engine.stats(&brain.id).await.unwrap();
    assert_eq!(stats.store.fibers, 1);
}

// ============================================================================
// CO-ACTIVATION -> INFERRED SYNAPSE
// ============================================================================

#[test]
fn scenario_repeated_co_activation_yields_inferred_edge() {
    let store = Store::open_in_memory().unwrap();
    let extractor = Extractor::new();
    let config = BrainConfig::default();

    Encoder::new(&store, &extractor, &config)
        .encode(
            &EncodeRequest::new("Met Alice at coffee shop. She suggested JWT for auth."),
            Utc::now(),
        )
        .unwrap();

    // The same retrieval three times inside the window co-activates the
    // same neuron pairs each time. Each run is stamped a second apart so
    // refractory windows from the previous retrieval have expired.
    let pipeline = RecallPipeline::new(&store, &extractor, &config);
    for step in 0..3 {
        let at = Utc::now() + chrono::Duration::seconds(step * 2);
        let (_, batch) = pipeline
            .run(&QueryRequest::new("What did Alice suggest?"), at, None)
            .unwrap();
        assert!(!batch.co_activations.is_empty(), "run {step} recorded no pairs");
        store.apply_deferred(&batch).unwrap();
    }

    let now = Utc::now() + chrono::Duration::seconds(10);
    let report = consolidate(&store, &config, Strategy::Infer, false, None, now).unwrap();
    assert!(report.mutated > 0, "inference produced nothing");

    // A pair that encoding never linked directly is now wired with an
    // inferred co-occurrence edge at count/10 weight
    let mut found = false;
    let mut offset = 0;
    loop {
        let page = store.synapses_page(256, offset).unwrap();
        if page.is_empty() {
            break;
        }
        offset += page.len();
        for edge in page {
            if edge.synapse_type == SynapseType::CoOccurs && edge.is_inferred() {
                assert!((edge.weight - 0.3).abs() < 1e-9);
                found = true;
            }
        }
    }
    assert!(found, "no inferred co-occurrence edge was created");
}

// ============================================================================
// CONFLICT DETECTION
// ============================================================================

#[tokio::test]
async fn scenario_conflicting_decisions() {
    let harness = TestEngine::file_backed();
    let brain = harness.engine.create_brain("agent").await.unwrap();

    harness
        .engine
        .encode(&brain.id, &EncodeRequest::new("We decided to use PostgreSQL"))
        .await
        .unwrap();
    harness
        .engine
        .encode(&brain.id, &EncodeRequest::new("We decided to use MongoDB"))
        .await
        .unwrap();

    // The older side is superseded, the newer side disputed
    let entities = harness
        .engine
        .list_neurons(
            &brain.id,
            &neuromem_core::NeuronFilter {
                neuron_type: Some(NeuronType::Entity),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let postgres = entities
        .neurons
        .iter()
        .find(|n| n.content.eq_ignore_ascii_case("postgresql"))
        .expect("postgresql neuron");
    let mongo = entities
        .neurons
        .iter()
        .find(|n| n.content.eq_ignore_ascii_case("mongodb"))
        .expect("mongodb neuron");
    assert!(postgres.is_superseded());
    assert!(postgres.is_disputed());
    assert!(mongo.is_disputed());
    assert!(!mongo.is_superseded());

    // The penalty ladder ranks the newer decision first
    let result = harness
        .engine
        .query(&brain.id, &QueryRequest::new("database choice"))
        .await
        .unwrap();
    let position = |needle: &str| {
        result
            .neurons_activated
            .iter()
            .position(|n| n.content.eq_ignore_ascii_case(needle))
    };
    let mongo_rank = position("mongodb").expect("mongodb activated");
    let postgres_rank = position("postgresql").expect("postgresql activated");
    assert!(
        mongo_rank < postgres_rank,
        "ranking was {:?}",
        result.neurons_activated
    );
}

// ============================================================================
// SYNTHESIS SELECTION
// ============================================================================

#[tokio::test]
async fn scenario_fiber_summary_synthesis() {
    let harness = TestEngine::in_memory();
    let brain = harness.engine.create_brain("agent").await.unwrap();

    harness
        .engine
        .encode(
            &brain.id,
            &EncodeRequest::new("Met Alice at coffee shop. She suggested JWT for auth."),
        )
        .await
        .unwrap();

    let result = harness
        .engine
        .query(&brain.id, &QueryRequest::new("What did Alice suggest?"))
        .await
        .unwrap();
    // A single dominant fiber answers with its own summary
    assert_eq!(result.synthesis_method, SynthesisMethod::FiberSummary);
    assert!(result.context.contains("Alice"));
}

// ============================================================================
// EMPTY AND NONSENSE QUERIES
// ============================================================================

#[tokio::test]
async fn scenario_unresolvable_query_returns_empty() {
    let harness = TestEngine::in_memory();
    let brain = harness.engine.create_brain("agent").await.unwrap();
    harness
        .engine
        .encode(&brain.id, &EncodeRequest::new("Alice suggested JWT for auth"))
        .await
        .unwrap();

    let result = harness
        .engine
        .query(&brain.id, &QueryRequest::new("zebra quantum sandwich"))
        .await
        .unwrap();
    assert_eq!(result.confidence, 0.0);
    assert!(result.answer.is_empty());
    assert_eq!(result.synthesis_method, SynthesisMethod::Empty);
}
