//! Decay and maturation behavior over simulated time

use chrono::{Duration, Utc};
use neuromem_core::consolidation::consolidate;
use neuromem_core::lifecycle::DecayManager;
use neuromem_core::{
    BrainConfig, Fiber, Maturation, MaturationStage, MemoryType, Neuron, NeuronState, NeuronType,
    Store, Strategy,
};

fn store() -> (Store, BrainConfig) {
    (Store::open_in_memory().unwrap(), BrainConfig::default())
}

fn seeded(store: &Store, content: &str, decay_rate: f64, days_ago: i64) -> String {
    let neuron = Neuron::new(NeuronType::Concept, content);
    let id = store.add_neuron(&neuron).unwrap();
    let mut state = NeuronState::new(&id, decay_rate);
    state.activation_level = 1.0;
    state.last_activated = Some(Utc::now() - Duration::days(days_ago));
    state.created_at = Utc::now() - Duration::days(days_ago);
    store.upsert_state(&state).unwrap();
    id
}

// ============================================================================
// TYPE-AWARE DECAY
// ============================================================================

#[test]
fn fact_decays_slowly_todo_decays_fast() {
    let (store, config) = store();
    let fact = seeded(&store, "fact neuron", 0.02, 30);
    let todo = seeded(&store, "todo neuron", 0.15, 30);

    let report = DecayManager::new(&store, &config).run(Utc::now(), false).unwrap();
    assert_eq!(report.states_decayed, 2);
    // Only the todo fell under the prune threshold
    assert_eq!(report.prune_candidates, 1);

    let states = store
        .get_states_batch(&[fact.clone(), todo.clone()].into_iter().collect())
        .unwrap();

    let fact_level = states[&fact].activation_level;
    let todo_level = states[&todo].activation_level;
    // 30 days at 0.02/day: exp(-0.6) ≈ 0.549
    assert!((fact_level - (-0.6f64).exp()).abs() < 1e-3);
    // 30 days at 0.15/day: exp(-4.5) ≈ 0.011, under the 0.02 threshold
    assert!((todo_level - (-4.5f64).exp()).abs() < 1e-3);
    assert!(todo_level < config.prune_threshold);

    // Pruning then removes the todo but not the fact
    let prune = consolidate(&store, &config, Strategy::Prune, false, None, Utc::now()).unwrap();
    assert_eq!(prune.mutated, 1);
    assert!(store.get_neuron(&todo).unwrap().is_none());
    assert!(store.get_neuron(&fact).unwrap().is_some());
}

// ============================================================================
// MATURATION SPACING EFFECT
// ============================================================================

#[test]
fn spacing_effect_gates_semantic_promotion() {
    let (store, config) = store();
    let day0 = Utc::now() - Duration::days(7);

    let anchor = store
        .add_neuron(&Neuron::new(NeuronType::Entity, "project"))
        .unwrap();
    let fiber = Fiber::new(anchor, MemoryType::Fact);
    store.save_fiber(&fiber).unwrap();

    // Encoded on day 0, then reinforced five times the same day
    let mut maturation = Maturation::new(fiber.id.clone());
    maturation.created_at = day0;
    maturation.stage = MaturationStage::Episodic;
    maturation.stage_entered_at = day0;
    for _ in 0..5 {
        maturation.reinforce(day0);
    }
    store.save_maturation(&maturation).unwrap();

    // Seven days later the fiber is still episodic: five reinforcements
    // on one calendar day are one day of spacing
    consolidate(&store, &config, Strategy::Mature, false, None, Utc::now()).unwrap();
    let stage = store.get_maturation(&fiber.id).unwrap().unwrap().stage;
    assert_eq!(stage, MaturationStage::Episodic);

    // Reinforcing on two more distinct days opens the gate
    let mut maturation = store.get_maturation(&fiber.id).unwrap().unwrap();
    maturation.reinforce(day0 + Duration::days(2));
    maturation.reinforce(day0 + Duration::days(4));
    store.save_maturation(&maturation).unwrap();

    consolidate(&store, &config, Strategy::Mature, false, None, Utc::now()).unwrap();
    let stage = store.get_maturation(&fiber.id).unwrap().unwrap().stage;
    assert_eq!(stage, MaturationStage::Semantic);
}

// ============================================================================
// STAGE-AWARE DECAY PROTECTION
// ============================================================================

#[test]
fn semantic_members_outlive_short_term_ones() {
    let (store, config) = store();
    let stm_neuron = seeded(&store, "ephemeral detail", 0.1, 10);
    let semantic_neuron = seeded(&store, "settled knowledge", 0.1, 10);

    let stm_fiber = Fiber::new(stm_neuron.clone(), MemoryType::Fact);
    store.save_fiber(&stm_fiber).unwrap();
    store
        .save_maturation(&Maturation::new(stm_fiber.id.clone()))
        .unwrap();

    let semantic_fiber = Fiber::new(semantic_neuron.clone(), MemoryType::Fact);
    store.save_fiber(&semantic_fiber).unwrap();
    let mut maturation = Maturation::new(semantic_fiber.id.clone());
    maturation.stage = MaturationStage::Semantic;
    store.save_maturation(&maturation).unwrap();

    DecayManager::new(&store, &config).run(Utc::now(), false).unwrap();

    let states = store
        .get_states_batch(
            &[stm_neuron.clone(), semantic_neuron.clone()]
                .into_iter()
                .collect(),
        )
        .unwrap();
    // STM multiplies decay 5x, semantic 0.3x
    assert!(states[&stm_neuron].activation_level < states[&semantic_neuron].activation_level);
    assert!((states[&stm_neuron].activation_level - (-5.0f64).exp()).abs() < 1e-2);
    assert!((states[&semantic_neuron].activation_level - (-0.3f64).exp()).abs() < 1e-2);
}
