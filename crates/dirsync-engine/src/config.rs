//! Sync engine configuration.
//!
//! Configuration is parsed once at startup and validated eagerly. Any
//! problem (unknown conflict strategy, unparseable cron expression, zero
//! batch size, duplicate mapping target) is a [`ConfigError`] and the engine
//! refuses to start.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use thiserror::Error;

use dirsync_connector_ldap::LdapConfig;
use dirsync_core::ConflictStrategy;

use crate::dedup::DeduplicationRule;
use crate::lifecycle::LifecycleRule;
use crate::mapper::FieldMapping;
use crate::retry::RetryPolicy;
use crate::scheduler::FullSyncSchedule;

/// Configuration errors. Always fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Missing required configuration value: {0}")]
    MissingValue(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Directory source settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Identifier of the source; stored on every identity it produces.
    pub source_id: String,

    /// Connection settings, when the source is an LDAP server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<LdapConfig>,

    /// Search base for users.
    pub base_dn: String,

    /// LDAP filter selecting user entries.
    #[serde(default = "default_user_filter")]
    pub user_filter: String,

    /// Page size for full scans. Falls back to the engine batch size.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u32>,

    /// Attribute mappings.
    #[serde(default)]
    pub attribute_map: Vec<FieldMapping>,

    /// Values used when a mapped attribute and its fallback are both empty,
    /// keyed by internal field.
    #[serde(default)]
    pub defaults: BTreeMap<String, String>,

    /// Attributes requested by the change listener. Empty means all.
    #[serde(default)]
    pub listen_attributes: Vec<String>,
}

fn default_user_filter() -> String {
    "(objectClass=person)".to_string()
}

impl SourceConfig {
    /// Source with the default filter and no mappings.
    pub fn new(source_id: impl Into<String>, base_dn: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            connection: None,
            base_dn: base_dn.into(),
            user_filter: default_user_filter(),
            page_size: None,
            attribute_map: Vec::new(),
            defaults: BTreeMap::new(),
            listen_attributes: Vec::new(),
        }
    }
}

/// When and how runs are triggered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Cron expression for periodic full syncs. `None` disables them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_sync_cron: Option<String>,

    /// Run the continuous incremental listener.
    #[serde(default)]
    pub incremental_enabled: bool,

    /// Retries after a failed full sync.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay between full sync retries; doubles with every attempt.
    #[serde(default = "default_retry_backoff_secs")]
    pub retry_backoff_secs: u64,

    /// Delay before the incremental listener is restarted.
    #[serde(default = "default_restart_backoff_secs")]
    pub incremental_restart_backoff_secs: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_secs() -> u64 {
    30
}

fn default_restart_backoff_secs() -> u64 {
    10
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            full_sync_cron: None,
            incremental_enabled: false,
            max_retries: default_max_retries(),
            retry_backoff_secs: default_retry_backoff_secs(),
            incremental_restart_backoff_secs: default_restart_backoff_secs(),
        }
    }
}

impl ScheduleConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_secs(self.retry_backoff_secs))
    }

    pub fn incremental_restart_backoff(&self) -> Duration {
        Duration::from_secs(self.incremental_restart_backoff_secs)
    }

    /// Parse the full sync schedule, if one is configured.
    pub fn full_sync_schedule(&self) -> Result<Option<FullSyncSchedule>, ConfigError> {
        self.full_sync_cron
            .as_deref()
            .map(FullSyncSchedule::parse)
            .transpose()
    }
}

/// Top-level engine configuration for one directory source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncEngineConfig {
    pub source: SourceConfig,

    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Records per page and per upsert call.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Maximum concurrent store lookups while processing a page.
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,

    /// How an incoming record is reconciled with a stored identity. Only
    /// `remote_wins` carries a mapped or lifecycle status onto an existing
    /// identity; `merge` and `local_wins` keep the stored status and apply
    /// it to newly created identities only.
    #[serde(default)]
    pub conflict_strategy: ConflictStrategy,

    /// Fields whose differing values make a conflict unresolvable.
    #[serde(default)]
    pub defer_on_conflicting: Vec<String>,

    #[serde(default)]
    pub dedup_rules: Vec<DeduplicationRule>,

    /// Status rules evaluated against each record. See `conflict_strategy`
    /// for when the status reaches an existing identity.
    #[serde(default)]
    pub lifecycle_rules: Vec<LifecycleRule>,
}

fn default_batch_size() -> u32 {
    500
}

fn default_concurrency_limit() -> usize {
    8
}

/// LDAP page sizes travel as a signed 32-bit integer.
const MAX_PAGE_SIZE: u32 = i32::MAX as u32;

impl SyncEngineConfig {
    /// Create a configuration with defaults for everything but the source.
    pub fn new(source: SourceConfig) -> Self {
        Self {
            source,
            schedule: ScheduleConfig::default(),
            batch_size: default_batch_size(),
            concurrency_limit: default_concurrency_limit(),
            conflict_strategy: ConflictStrategy::default(),
            defer_on_conflicting: Vec::new(),
            dedup_rules: Vec::new(),
            lifecycle_rules: Vec::new(),
        }
    }

    /// Parse and validate a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Page size used for full scans.
    pub fn page_size(&self) -> u32 {
        self.source.page_size.unwrap_or(self.batch_size)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let source = &self.source;
        if source.source_id.trim().is_empty() {
            return Err(ConfigError::MissingValue("source.source_id".to_string()));
        }
        if source.base_dn.trim().is_empty() {
            return Err(ConfigError::MissingValue("source.base_dn".to_string()));
        }
        if source.user_filter.trim().is_empty() {
            return Err(ConfigError::MissingValue("source.user_filter".to_string()));
        }
        if let Some(connection) = &source.connection {
            connection
                .validate()
                .map_err(|e| ConfigError::invalid("source.connection", e.to_string()))?;
        }

        if self.batch_size == 0 || self.batch_size > MAX_PAGE_SIZE {
            return Err(ConfigError::invalid(
                "batch_size",
                format!("must be between 1 and {MAX_PAGE_SIZE}"),
            ));
        }
        if let Some(page_size) = source.page_size {
            if page_size == 0 || page_size > MAX_PAGE_SIZE {
                return Err(ConfigError::invalid(
                    "source.page_size",
                    format!("must be between 1 and {MAX_PAGE_SIZE}"),
                ));
            }
        }
        if self.concurrency_limit == 0 {
            return Err(ConfigError::invalid("concurrency_limit", "must be at least 1"));
        }

        let mut targets = HashSet::new();
        for mapping in &source.attribute_map {
            if mapping.external_attr.trim().is_empty() {
                return Err(ConfigError::invalid(
                    "source.attribute_map",
                    format!("mapping for '{}' has no external attribute", mapping.internal_field),
                ));
            }
            if mapping.internal_field.trim().is_empty() {
                return Err(ConfigError::invalid(
                    "source.attribute_map",
                    format!("mapping for '{}' has no internal field", mapping.external_attr),
                ));
            }
            if !targets.insert(mapping.internal_field.to_lowercase()) {
                return Err(ConfigError::invalid(
                    "source.attribute_map",
                    format!("internal field '{}' is mapped twice", mapping.internal_field),
                ));
            }
        }

        for rule in &self.dedup_rules {
            if rule.match_fields.is_empty()
                || rule.match_fields.iter().any(|f| f.trim().is_empty())
            {
                return Err(ConfigError::invalid(
                    "dedup_rules",
                    format!("rule with priority {} needs non-empty match fields", rule.priority),
                ));
            }
        }

        for rule in &self.lifecycle_rules {
            if rule.source_attr.trim().is_empty() {
                return Err(ConfigError::invalid(
                    "lifecycle_rules",
                    "source_attr must not be empty",
                ));
            }
        }

        self.schedule.full_sync_schedule()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::Transform;

    const CONFIG: &str = r#"{
        "source": {
            "source_id": "corp-ad",
            "base_dn": "ou=people,dc=example,dc=com",
            "attribute_map": [
                { "external_attr": "uid", "internal_field": "username", "required": true },
                { "external_attr": "mail", "internal_field": "email",
                  "fallback_attr": "userPrincipalName", "transform": "lowercase" }
            ],
            "defaults": { "department": "unassigned" }
        },
        "schedule": {
            "full_sync_cron": "0 2 * * *",
            "incremental_enabled": true
        },
        "batch_size": 100,
        "conflict_strategy": "merge",
        "dedup_rules": [
            { "match_fields": ["email"], "priority": 1 }
        ],
        "lifecycle_rules": [
            { "source_attr": "employeeStatus", "match_value": "terminated", "target_status": "inactive" }
        ]
    }"#;

    #[test]
    fn test_parse_full_config() {
        let config = SyncEngineConfig::from_json(CONFIG).unwrap();
        assert_eq!(config.source.source_id, "corp-ad");
        assert_eq!(config.source.user_filter, "(objectClass=person)");
        assert_eq!(config.conflict_strategy, ConflictStrategy::Merge);
        assert_eq!(config.page_size(), 100);
        assert_eq!(config.concurrency_limit, 8);
        assert_eq!(config.source.attribute_map[1].transform, Transform::Lowercase);
        assert!(config.schedule.incremental_enabled);
        assert_eq!(config.schedule.max_retries, 3);
        assert!(config.schedule.full_sync_schedule().unwrap().is_some());
    }

    #[test]
    fn test_unknown_strategy_is_fatal() {
        let json = CONFIG.replace("\"merge\"", "\"newest_wins\"");
        assert!(matches!(
            SyncEngineConfig::from_json(&json),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_invalid_cron_is_fatal() {
        let json = CONFIG.replace("0 2 * * *", "every night");
        let err = SyncEngineConfig::from_json(&json).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "schedule.full_sync_cron"));
    }

    #[test]
    fn test_zero_batch_size_is_rejected() {
        let json = CONFIG.replace("\"batch_size\": 100", "\"batch_size\": 0");
        let err = SyncEngineConfig::from_json(&json).unwrap_err();
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn test_duplicate_mapping_target_is_rejected() {
        let mut config = SyncEngineConfig::from_json(CONFIG).unwrap();
        config.source.attribute_map.push(FieldMapping::new("cn", "Username"));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("mapped twice"));
    }

    #[test]
    fn test_empty_dedup_rule_is_rejected() {
        let mut config = SyncEngineConfig::from_json(CONFIG).unwrap();
        config.dedup_rules.push(DeduplicationRule::new(Vec::<String>::new(), 2));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_source_id() {
        let json = CONFIG.replace("\"corp-ad\"", "\"  \"");
        assert!(matches!(
            SyncEngineConfig::from_json(&json),
            Err(ConfigError::MissingValue(_))
        ));
    }

    #[test]
    fn test_invalid_connection_is_rejected() {
        let mut config = SyncEngineConfig::from_json(CONFIG).unwrap();
        config.source.connection = Some(LdapConfig::new("", "dc=example,dc=com", "cn=sync"));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("source.connection"));
    }
}
