//! Schema mapping from directory records to candidate identities.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use dirsync_connector::ExternalRecord;
use dirsync_core::{CandidateIdentity, IdentityStatus};

use crate::config::SourceConfig;
use crate::error::MappingError;

/// Active Directory `userAccountControl` ACCOUNTDISABLE flag.
const ACCOUNT_DISABLE: u32 = 0x0002;

/// Value transformation applied after a value has been selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transform {
    #[default]
    None,
    Lowercase,
    Trim,
}

impl Transform {
    /// Convert to string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Transform::None => "none",
            Transform::Lowercase => "lowercase",
            Transform::Trim => "trim",
        }
    }

    pub fn apply(&self, value: &str) -> String {
        match self {
            Transform::None => value.to_string(),
            Transform::Lowercase => value.to_lowercase(),
            Transform::Trim => value.trim().to_string(),
        }
    }
}

impl std::fmt::Display for Transform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Transform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "" => Ok(Transform::None),
            "lowercase" => Ok(Transform::Lowercase),
            "trim" => Ok(Transform::Trim),
            _ => Err(format!("Unknown transform: {s}")),
        }
    }
}

/// Maps one external attribute onto one internal field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    /// Directory attribute read first.
    pub external_attr: String,
    /// `username`, `email`, `phone`, `account_control`, or an attribute-bag key.
    pub internal_field: String,
    /// Directory attribute read when the primary one is empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_attr: Option<String>,
    /// Records without a value for this field are rejected.
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub transform: Transform,
}

impl FieldMapping {
    /// Create a simple optional mapping.
    pub fn new(external_attr: impl Into<String>, internal_field: impl Into<String>) -> Self {
        Self {
            external_attr: external_attr.into(),
            internal_field: internal_field.into(),
            fallback_attr: None,
            required: false,
            transform: Transform::None,
        }
    }

    /// Set the fallback attribute.
    pub fn with_fallback(mut self, attr: impl Into<String>) -> Self {
        self.fallback_attr = Some(attr.into());
        self
    }

    /// Mark the mapping as required.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }
}

/// Where a mapped value lands on the candidate.
enum Target<'a> {
    Username,
    Email,
    Phone,
    AccountControl,
    Attribute(&'a str),
}

impl<'a> Target<'a> {
    fn of(internal_field: &'a str) -> Self {
        match internal_field.to_lowercase().as_str() {
            "username" => Target::Username,
            "email" => Target::Email,
            "phone" => Target::Phone,
            "account_control" => Target::AccountControl,
            _ => Target::Attribute(internal_field),
        }
    }
}

/// Status implied by an AD `userAccountControl` value.
fn status_from_account_control(value: &str) -> Option<IdentityStatus> {
    let flags: u32 = value.trim().parse().ok()?;
    if flags & ACCOUNT_DISABLE != 0 {
        Some(IdentityStatus::Inactive)
    } else {
        Some(IdentityStatus::Active)
    }
}

/// Applies the configured attribute map to directory records.
#[derive(Debug, Clone)]
pub struct SchemaMapper {
    source_id: String,
    mappings: Vec<FieldMapping>,
    defaults: BTreeMap<String, String>,
    /// Lowercased primary attributes; everything else passes through.
    mapped_attributes: HashSet<String>,
}

impl SchemaMapper {
    pub fn new(
        source_id: impl Into<String>,
        mappings: Vec<FieldMapping>,
        defaults: BTreeMap<String, String>,
    ) -> Self {
        let mapped_attributes = mappings
            .iter()
            .map(|m| m.external_attr.to_lowercase())
            .collect();
        Self {
            source_id: source_id.into(),
            mappings,
            defaults,
            mapped_attributes,
        }
    }

    pub fn from_config(source: &SourceConfig) -> Self {
        Self::new(
            source.source_id.clone(),
            source.attribute_map.clone(),
            source.defaults.clone(),
        )
    }

    /// Map one record.
    ///
    /// Each field takes the primary attribute, then the fallback, then the
    /// configured default. A required field left empty rejects the record.
    /// Attributes that are not the primary source of any mapping are copied
    /// into the attribute bag with all their values. A copied attribute whose
    /// name is already taken by a mapped bag key rejects the record.
    pub fn map(&self, record: &ExternalRecord) -> Result<CandidateIdentity, MappingError> {
        if record.id.is_empty() {
            return Err(MappingError::InvalidRecord {
                dn: record.dn.clone(),
                message: "record has no external identifier".to_string(),
            });
        }

        let mut candidate = CandidateIdentity::new(self.source_id.as_str(), record.id.as_str());

        for mapping in &self.mappings {
            let raw = non_empty(record.first(&mapping.external_attr))
                .or_else(|| {
                    mapping
                        .fallback_attr
                        .as_deref()
                        .and_then(|attr| non_empty(record.first(attr)))
                })
                .or_else(|| non_empty(self.default_for(&mapping.internal_field)));

            let Some(raw) = raw else {
                if mapping.required {
                    return Err(MappingError::MissingRequiredField {
                        record_id: record.id.clone(),
                        field: mapping.internal_field.clone(),
                        attribute: mapping.external_attr.clone(),
                    });
                }
                continue;
            };

            let value = mapping.transform.apply(raw);
            match Target::of(&mapping.internal_field) {
                Target::Username => candidate.username = value,
                Target::Email => candidate.email = value,
                Target::Phone => candidate.phone = value,
                Target::AccountControl => candidate.status = status_from_account_control(&value),
                Target::Attribute(key) => {
                    candidate
                        .attributes
                        .insert(key.to_string(), serde_json::Value::String(value));
                }
            }
        }

        for (name, values) in &record.attributes {
            if self.mapped_attributes.contains(&name.to_lowercase()) {
                continue;
            }
            if candidate.attributes.contains_key(name) {
                return Err(MappingError::AttributeCollision {
                    record_id: record.id.clone(),
                    key: name.clone(),
                });
            }
            candidate.attributes.insert(
                name.clone(),
                serde_json::Value::Array(
                    values
                        .iter()
                        .map(|v| serde_json::Value::String(v.clone()))
                        .collect(),
                ),
            );
        }

        Ok(candidate)
    }

    fn default_for(&self, internal_field: &str) -> Option<&str> {
        self.defaults.get(internal_field).map(String::as_str)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}
