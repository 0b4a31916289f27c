//! Lifecycle rules: derive an identity status from directory attributes.

use serde::{Deserialize, Serialize};

use dirsync_connector::ExternalRecord;
use dirsync_core::{CandidateIdentity, IdentityStatus};

/// Sets `target_status` when `source_attr` has a value equal to `match_value`.
///
/// Values are compared case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleRule {
    pub source_attr: String,
    pub match_value: String,
    pub target_status: IdentityStatus,
}

impl LifecycleRule {
    pub fn new(
        source_attr: impl Into<String>,
        match_value: impl Into<String>,
        target_status: IdentityStatus,
    ) -> Self {
        Self {
            source_attr: source_attr.into(),
            match_value: match_value.into(),
            target_status,
        }
    }

    fn matches(&self, record: &ExternalRecord) -> bool {
        record.get(&self.source_attr).is_some_and(|values| {
            values
                .iter()
                .any(|v| v.trim().eq_ignore_ascii_case(self.match_value.trim()))
        })
    }
}

/// Ordered rule list; the first matching rule wins.
#[derive(Debug, Clone, Default)]
pub struct LifecycleRules {
    rules: Vec<LifecycleRule>,
}

impl LifecycleRules {
    pub fn new(rules: Vec<LifecycleRule>) -> Self {
        Self { rules }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Apply the first matching rule to the candidate.
    ///
    /// Returns the rule that fired, if any. A matching rule overrides any
    /// status derived during mapping.
    pub fn apply(
        &self,
        record: &ExternalRecord,
        candidate: &mut CandidateIdentity,
    ) -> Option<&LifecycleRule> {
        let rule = self.rules.iter().find(|rule| rule.matches(record))?;
        candidate.status = Some(rule.target_status);
        Some(rule)
    }
}
