//! Batch deduplication of candidate identities.
//!
//! Each candidate gets a key from the first rule (in priority order) for
//! which it has at least one non-empty match field. Candidates sharing a key
//! are folded pairwise through the [`ConflictResolver`], the first one seen
//! acting as the existing record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use dirsync_core::CandidateIdentity;

use crate::metrics::SyncMetrics;
use crate::resolver::{ConflictResolver, DeferredConflict, Resolution, Resolvable};

/// Fields that identify the same person across records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeduplicationRule {
    /// `username`, `email`, `phone`, or an attribute-bag key.
    pub match_fields: Vec<String>,
    /// Lower values are evaluated first.
    #[serde(default)]
    pub priority: i32,
}

impl DeduplicationRule {
    pub fn new<S: Into<String>>(match_fields: impl IntoIterator<Item = S>, priority: i32) -> Self {
        Self {
            match_fields: match_fields.into_iter().map(Into::into).collect(),
            priority,
        }
    }

    /// Label used for the duplicate metric, e.g. `email+username`.
    pub fn label(&self) -> String {
        self.match_fields.join("+")
    }

    /// Deduplication key for a candidate, or `None` if every field is empty.
    ///
    /// Parts are `field:value`, joined with `;`. Fields without a value are
    /// left out, so partial keys are allowed.
    pub fn key_for(&self, candidate: &CandidateIdentity) -> Option<String> {
        let parts: Vec<String> = self
            .match_fields
            .iter()
            .filter_map(|field| {
                candidate
                    .field_text(field)
                    .map(|value| format!("{field}:{value}"))
            })
            .collect();
        (!parts.is_empty()).then(|| parts.join(";"))
    }
}

/// Result of deduplicating one batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeduplicationOutcome {
    /// Surviving candidates in first-seen order.
    pub deduped: Vec<CandidateIdentity>,
    /// Candidates whose merge was deferred.
    pub deferred: Vec<DeferredConflict>,
    /// Number of candidates folded into another one.
    pub merged: usize,
}

/// Collapses duplicate candidates within one batch.
pub struct Deduplicator {
    rules: Vec<DeduplicationRule>,
    resolver: ConflictResolver,
    metrics: Arc<dyn SyncMetrics>,
}

impl Deduplicator {
    pub fn new(
        mut rules: Vec<DeduplicationRule>,
        resolver: ConflictResolver,
        metrics: Arc<dyn SyncMetrics>,
    ) -> Self {
        // Stable sort keeps declaration order for equal priorities.
        rules.sort_by_key(|rule| rule.priority);
        Self {
            rules,
            resolver,
            metrics,
        }
    }

    pub fn rules(&self) -> &[DeduplicationRule] {
        &self.rules
    }

    /// Key of the first rule that yields one.
    pub fn dedup_key(&self, candidate: &CandidateIdentity) -> Option<(String, &DeduplicationRule)> {
        self.rules
            .iter()
            .find_map(|rule| rule.key_for(candidate).map(|key| (key, rule)))
    }

    pub fn process(&self, candidates: Vec<CandidateIdentity>) -> DeduplicationOutcome {
        self.process_at(candidates, Utc::now())
    }

    /// Deduplicate with a fixed merge timestamp, so identical input yields
    /// identical output.
    pub fn process_at(
        &self,
        candidates: Vec<CandidateIdentity>,
        at: DateTime<Utc>,
    ) -> DeduplicationOutcome {
        let mut outcome = DeduplicationOutcome::default();
        let mut positions: HashMap<String, usize> = HashMap::new();

        for candidate in candidates {
            let Some((key, rule)) = self.dedup_key(&candidate) else {
                outcome.deduped.push(candidate);
                continue;
            };

            let Some(&position) = positions.get(&key) else {
                positions.insert(key, outcome.deduped.len());
                outcome.deduped.push(candidate);
                continue;
            };

            self.metrics
                .record_duplicate(&candidate.source_id, &rule.label());
            debug!(
                key = %key,
                existing = %outcome.deduped[position].external_id,
                incoming = %candidate.external_id,
                "Duplicate candidate detected"
            );

            match self
                .resolver
                .resolve(&outcome.deduped[position], &candidate, at)
            {
                Resolution::Resolved(merged) => {
                    outcome.deduped[position] = merged;
                    outcome.merged += 1;
                }
                Resolution::Deferred(conflict) => outcome.deferred.push(conflict),
            }
        }

        outcome
    }
}
