//! Habit learning - Workflow mining over action events
//!
//! Action events are appended by callers as agents work; this pass mines
//! recurring subsequences across sessions and promotes the frequent,
//! tag-consistent ones to workflow templates. Templates feed the
//! `workflow_suggestions` field of habit-shaped retrievals.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use super::{ConsolidationReport, Ctx};
use crate::error::Result;
use crate::extract::Stimulus;
use crate::storage::Store;

/// Sessions must repeat a sequence this often before it becomes a habit
const MIN_FREQUENCY: usize = 3;

/// Mined subsequence length bounds
const MIN_SEQUENCE: usize = 2;
const MAX_SEQUENCE: usize = 5;

/// Tag overlap across occurrences needed to call a sequence consistent
const TAG_CONSISTENCY: f64 = 0.5;

// ============================================================================
// TEMPLATE
// ============================================================================

/// A recurring action sequence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowTemplate {
    /// Display name: the actions joined in order
    pub name: String,
    /// The action sequence
    pub actions: Vec<String>,
    /// How many sessions repeated it
    pub frequency: usize,
    /// Tags shared by every occurrence
    pub shared_tags: BTreeSet<String>,
}

// ============================================================================
// MINING
// ============================================================================

/// Mine workflow templates from the brain's action event log
pub fn mine_workflows(store: &Store) -> Result<Vec<WorkflowTemplate>> {
    let sessions = store.action_sequences()?;
    if sessions.is_empty() {
        return Ok(Vec::new());
    }

    // Sliding-window subsequence counting across sessions; a session
    // counts each distinct subsequence once
    let mut occurrences: HashMap<Vec<String>, Vec<BTreeSet<String>>> = HashMap::new();
    for events in sessions.values() {
        let actions: Vec<&str> = events.iter().map(|e| e.action.as_str()).collect();
        let mut seen_in_session: BTreeSet<Vec<String>> = BTreeSet::new();
        for len in MIN_SEQUENCE..=MAX_SEQUENCE.min(actions.len()) {
            for window in actions.windows(len) {
                let key: Vec<String> = window.iter().map(|a| (*a).to_string()).collect();
                if !seen_in_session.insert(key.clone()) {
                    continue;
                }
                // Tags active across the window
                let start = actions
                    .windows(len)
                    .position(|w| w == window)
                    .unwrap_or(0);
                let tags: BTreeSet<String> = events[start..start + len]
                    .iter()
                    .flat_map(|e| e.tags.iter().cloned())
                    .collect();
                occurrences.entry(key).or_default().push(tags);
            }
        }
    }

    let mut templates: Vec<WorkflowTemplate> = occurrences
        .into_iter()
        .filter(|(_, tag_sets)| tag_sets.len() >= MIN_FREQUENCY)
        .filter_map(|(actions, tag_sets)| {
            // Consistency: tags present in at least half the occurrences
            let mut tag_counts: HashMap<String, usize> = HashMap::new();
            for tags in &tag_sets {
                for tag in tags {
                    *tag_counts.entry(tag.clone()).or_default() += 1;
                }
            }
            let threshold = (tag_sets.len() as f64 * TAG_CONSISTENCY).ceil() as usize;
            let shared_tags: BTreeSet<String> = tag_counts
                .into_iter()
                .filter(|(_, count)| *count >= threshold)
                .map(|(tag, _)| tag)
                .collect();

            // An all-over-the-place sequence with tags but no overlap is
            // coincidence, not habit
            let any_tagged = tag_sets.iter().any(|t| !t.is_empty());
            if any_tagged && shared_tags.is_empty() {
                return None;
            }

            Some(WorkflowTemplate {
                name: actions.join(" → "),
                frequency: tag_sets.len(),
                actions,
                shared_tags,
            })
        })
        .collect();

    // Longer and more frequent habits first; drop sub-sequences of kept
    // templates
    templates.sort_by(|a, b| {
        (b.actions.len(), b.frequency)
            .cmp(&(a.actions.len(), a.frequency))
            .then_with(|| a.name.cmp(&b.name))
    });
    let mut kept: Vec<WorkflowTemplate> = Vec::new();
    for template in templates {
        let subsumed = kept.iter().any(|k| {
            k.actions
                .windows(template.actions.len())
                .any(|w| w == template.actions.as_slice())
        });
        if !subsumed {
            kept.push(template);
        }
    }
    Ok(kept)
}

/// LEARN_HABITS strategy body
pub fn learn_habits(ctx: &Ctx<'_>, report: &mut ConsolidationReport) -> Result<()> {
    let templates = mine_workflows(ctx.store)?;
    report.examined = ctx.store.action_sequences()?.len();
    report.mutated = templates.len();
    for template in &templates {
        report.details.push(format!(
            "workflow '{}' ({} sessions)",
            template.name, template.frequency
        ));
    }
    Ok(())
}

/// Workflows relevant to a habit-shaped query: any mined template whose
/// actions or shared tags intersect the stimulus keywords
pub fn suggest_workflows(store: &Store, stimulus: &Stimulus) -> Result<Vec<String>> {
    let templates = mine_workflows(store)?;
    let keywords: BTreeSet<&str> = stimulus.keywords.iter().map(String::as_str).collect();
    Ok(templates
        .into_iter()
        .filter(|t| {
            t.actions.iter().any(|a| keywords.contains(a.as_str()))
                || t.shared_tags.iter().any(|tag| keywords.contains(tag.as_str()))
        })
        .map(|t| t.name)
        .collect())
}

// ============================================================================
// TESTS
// ============================================================================
