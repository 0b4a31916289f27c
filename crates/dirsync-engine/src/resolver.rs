//! Conflict resolution between an existing record and an incoming candidate.
//!
//! The same resolution rules apply whether the existing side is another
//! candidate from the same batch (deduplication) or an identity already in
//! the store. Both implement [`Resolvable`].
//!
//! | Strategy     | Profile fields                  | Attribute bag            | Status             |
//! |--------------|---------------------------------|--------------------------|--------------------|
//! | `RemoteWins` | taken from incoming             | replaced by incoming     | incoming, if set   |
//! | `LocalWins`  | kept                            | kept                     | kept               |
//! | `Merge`      | incoming fills empty fields only| union, existing wins     | filled only if unset |
//!
//! Every successful resolution appends exactly one [`MergeRecord`].

use chrono::{DateTime, Utc};
use serde::Serialize;

use dirsync_core::{
    AttributeBag, CandidateIdentity, ConflictStrategy, Identity, IdentityStatus, MergeRecord,
};

/// Mutable view of the synchronized profile fields.
pub struct ProfileMut<'a> {
    pub username: &'a mut String,
    pub email: &'a mut String,
    pub phone: &'a mut String,
    pub attributes: &'a mut AttributeBag,
}

/// A record that an incoming candidate can be resolved into.
pub trait Resolvable: Clone {
    fn profile_mut(&mut self) -> ProfileMut<'_>;

    /// Text value of a profile field or attribute-bag key; `None` when empty.
    fn field_text(&self, field: &str) -> Option<String>;

    /// External identifiers already represented by this record.
    fn linked_ids(&self) -> Vec<String>;

    fn overwrite_status(&mut self, status: Option<IdentityStatus>);

    fn fill_status(&mut self, status: Option<IdentityStatus>);

    /// Update the link to the directory after a successful resolution.
    fn link(&mut self, incoming: &CandidateIdentity, strategy: ConflictStrategy);

    fn merge_history_mut(&mut self) -> &mut Vec<MergeRecord>;
}

/// Text form of an attribute-bag value.
pub(crate) fn attribute_text(value: &serde_json::Value) -> Option<String> {
    let text = match value {
        serde_json::Value::Null => return None,
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(values) => values
            .iter()
            .filter_map(attribute_text)
            .collect::<Vec<_>>()
            .join(","),
        other => other.to_string(),
    };
    (!text.is_empty()).then_some(text)
}

fn profile_field(
    username: &str,
    email: &str,
    phone: &str,
    attributes: &AttributeBag,
    field: &str,
) -> Option<String> {
    let value = match field.to_lowercase().as_str() {
        "username" => username.to_string(),
        "email" => email.to_string(),
        "phone" => phone.to_string(),
        _ => return attributes.get(field).and_then(attribute_text),
    };
    (!value.is_empty()).then_some(value)
}

impl Resolvable for CandidateIdentity {
    fn profile_mut(&mut self) -> ProfileMut<'_> {
        ProfileMut {
            username: &mut self.username,
            email: &mut self.email,
            phone: &mut self.phone,
            attributes: &mut self.attributes,
        }
    }

    fn field_text(&self, field: &str) -> Option<String> {
        profile_field(&self.username, &self.email, &self.phone, &self.attributes, field)
    }

    fn linked_ids(&self) -> Vec<String> {
        self.external_ids().map(str::to_string).collect()
    }

    fn overwrite_status(&mut self, status: Option<IdentityStatus>) {
        if status.is_some() {
            self.status = status;
        }
    }

    fn fill_status(&mut self, status: Option<IdentityStatus>) {
        if self.status.is_none() {
            self.status = status;
        }
    }

    fn link(&mut self, incoming: &CandidateIdentity, _strategy: ConflictStrategy) {
        // Both records collapse into this candidate regardless of strategy.
        for id in incoming.external_ids() {
            if id != self.external_id && !self.merged_from.iter().any(|m| m == id) {
                self.merged_from.push(id.to_string());
            }
        }
    }

    fn merge_history_mut(&mut self) -> &mut Vec<MergeRecord> {
        &mut self.merge_history
    }
}

impl Resolvable for Identity {
    fn profile_mut(&mut self) -> ProfileMut<'_> {
        ProfileMut {
            username: &mut self.username,
            email: &mut self.email,
            phone: &mut self.phone,
            attributes: &mut self.attributes,
        }
    }

    fn field_text(&self, field: &str) -> Option<String> {
        profile_field(&self.username, &self.email, &self.phone, &self.attributes, field)
    }

    fn linked_ids(&self) -> Vec<String> {
        self.external_id.iter().cloned().collect()
    }

    fn overwrite_status(&mut self, status: Option<IdentityStatus>) {
        if let Some(status) = status {
            self.status = status;
        }
    }

    fn fill_status(&mut self, _status: Option<IdentityStatus>) {
        // Never empty on a stored identity, so Merge leaves it alone.
    }

    fn link(&mut self, incoming: &CandidateIdentity, strategy: ConflictStrategy) {
        match strategy {
            ConflictStrategy::RemoteWins => {
                self.external_id = Some(incoming.external_id.clone());
                self.source_id = Some(incoming.source_id.clone());
            }
            ConflictStrategy::Merge if self.external_id.is_none() => {
                self.external_id = Some(incoming.external_id.clone());
                self.source_id = Some(incoming.source_id.clone());
            }
            ConflictStrategy::Merge | ConflictStrategy::LocalWins => {}
        }
    }

    fn merge_history_mut(&mut self) -> &mut Vec<MergeRecord> {
        &mut self.merge_history
    }
}

/// A candidate that could not be merged automatically.
///
/// Deferred candidates are never persisted and never dropped; they are
/// returned to the caller for manual review.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeferredConflict {
    /// Field whose values disagree.
    pub field: String,
    pub existing_value: String,
    pub incoming_value: String,
    /// External identifiers of the record the candidate collided with.
    pub existing_ids: Vec<String>,
    /// The candidate that was set aside.
    pub candidate: CandidateIdentity,
    pub detected_at: DateTime<Utc>,
}

/// Outcome of resolving a candidate against an existing record.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution<T> {
    Resolved(T),
    Deferred(DeferredConflict),
}

impl<T> Resolution<T> {
    pub fn is_deferred(&self) -> bool {
        matches!(self, Resolution::Deferred(_))
    }
}

/// Applies one [`ConflictStrategy`] uniformly.
#[derive(Debug, Clone, Default)]
pub struct ConflictResolver {
    strategy: ConflictStrategy,
    guard_fields: Vec<String>,
}

impl ConflictResolver {
    pub fn new(strategy: ConflictStrategy) -> Self {
        Self {
            strategy,
            guard_fields: Vec::new(),
        }
    }

    /// Defer instead of resolving when any of these fields carries two
    /// different non-empty values.
    #[must_use]
    pub fn with_guard_fields(mut self, fields: Vec<String>) -> Self {
        self.guard_fields = fields;
        self
    }

    pub fn strategy(&self) -> ConflictStrategy {
        self.strategy
    }

    /// Resolve `incoming` into a copy of `existing`.
    ///
    /// Pure: the inputs are not modified and nothing is persisted.
    pub fn resolve<T: Resolvable>(
        &self,
        existing: &T,
        incoming: &CandidateIdentity,
        at: DateTime<Utc>,
    ) -> Resolution<T> {
        if let Some(conflict) = self.find_conflict(existing, incoming, at) {
            return Resolution::Deferred(conflict);
        }

        let mut resolved = existing.clone();
        let mut source_ids = existing.linked_ids();
        for id in incoming.external_ids() {
            if !source_ids.iter().any(|s| s == id) {
                source_ids.push(id.to_string());
            }
        }

        let profile = resolved.profile_mut();
        match self.strategy {
            ConflictStrategy::RemoteWins => {
                profile.username.clone_from(&incoming.username);
                profile.email.clone_from(&incoming.email);
                profile.phone.clone_from(&incoming.phone);
                profile.attributes.clone_from(&incoming.attributes);
            }
            ConflictStrategy::LocalWins => {}
            ConflictStrategy::Merge => {
                fill_if_empty(profile.username, &incoming.username);
                fill_if_empty(profile.email, &incoming.email);
                fill_if_empty(profile.phone, &incoming.phone);
                for (key, value) in &incoming.attributes {
                    profile
                        .attributes
                        .entry(key.clone())
                        .or_insert_with(|| value.clone());
                }
            }
        }

        match self.strategy {
            ConflictStrategy::RemoteWins => resolved.overwrite_status(incoming.status),
            ConflictStrategy::Merge => resolved.fill_status(incoming.status),
            ConflictStrategy::LocalWins => {}
        }

        resolved.link(incoming, self.strategy);

        let history = resolved.merge_history_mut();
        history.extend(incoming.merge_history.iter().cloned());
        history.push(MergeRecord::new(at, self.strategy, source_ids));

        Resolution::Resolved(resolved)
    }

    fn find_conflict<T: Resolvable>(
        &self,
        existing: &T,
        incoming: &CandidateIdentity,
        at: DateTime<Utc>,
    ) -> Option<DeferredConflict> {
        self.guard_fields.iter().find_map(|field| {
            let existing_value = existing.field_text(field)?;
            let incoming_value = incoming.field_text(field)?;
            (existing_value != incoming_value).then(|| DeferredConflict {
                field: field.clone(),
                existing_value,
                incoming_value,
                existing_ids: existing.linked_ids(),
                candidate: incoming.clone(),
                detected_at: at,
            })
        })
    }
}

fn fill_if_empty(target: &mut String, value: &str) {
    if target.is_empty() {
        value.clone_into(target);
    }
}
