//! LDAP connection configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use dirsync_connector::{ConnectorError, ConnectorResult};

/// Configuration for an LDAP or Active Directory source.
#[derive(Clone, Serialize, Deserialize)]
pub struct LdapConfig {
    /// LDAP server hostname or IP address.
    pub host: String,

    /// LDAP server port (389 for LDAP, 636 for LDAPS).
    #[serde(default = "default_ldap_port")]
    pub port: u16,

    /// Use SSL/TLS (LDAPS).
    #[serde(default)]
    pub use_ssl: bool,

    /// Use STARTTLS upgrade on plain LDAP connection.
    #[serde(default)]
    pub use_starttls: bool,

    /// Base DN for all operations (e.g., "dc=example,dc=com").
    pub base_dn: String,

    /// Bind DN for authentication (e.g., "cn=admin,dc=example,dc=com").
    pub bind_dn: String,

    /// Bind password.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_password: Option<String>,

    /// User container DN (e.g., "ou=users" - relative to `base_dn`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_container: Option<String>,

    /// Attribute used as the unique external identifier.
    #[serde(default = "default_uid_attribute")]
    pub uid_attribute: String,

    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Timeout for a single search page in seconds.
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_secs: u64,

    /// Number of changes buffered between the listener task and its consumer.
    #[serde(default = "default_change_buffer")]
    pub change_buffer: usize,
}

impl std::fmt::Debug for LdapConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LdapConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("use_ssl", &self.use_ssl)
            .field("use_starttls", &self.use_starttls)
            .field("base_dn", &self.base_dn)
            .field("bind_dn", &self.bind_dn)
            .field(
                "bind_password",
                &self.bind_password.as_ref().map(|_| "***REDACTED***"),
            )
            .field("user_container", &self.user_container)
            .field("uid_attribute", &self.uid_attribute)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("operation_timeout_secs", &self.operation_timeout_secs)
            .field("change_buffer", &self.change_buffer)
            .finish()
    }
}

fn default_ldap_port() -> u16 {
    389
}

fn default_uid_attribute() -> String {
    "entryUUID".to_string()
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_operation_timeout() -> u64 {
    120
}

fn default_change_buffer() -> usize {
    256
}

impl LdapConfig {
    /// Create a new LDAP config with required fields.
    pub fn new(
        host: impl Into<String>,
        base_dn: impl Into<String>,
        bind_dn: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: default_ldap_port(),
            use_ssl: false,
            use_starttls: false,
            base_dn: base_dn.into(),
            bind_dn: bind_dn.into(),
            bind_password: None,
            user_container: None,
            uid_attribute: default_uid_attribute(),
            connect_timeout_secs: default_connect_timeout(),
            operation_timeout_secs: default_operation_timeout(),
            change_buffer: default_change_buffer(),
        }
    }

    /// Set bind password.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.bind_password = Some(password.into());
        self
    }

    /// Enable SSL (LDAPS).
    #[must_use]
    pub fn with_ssl(mut self) -> Self {
        self.use_ssl = true;
        self.port = 636;
        self
    }

    /// Enable STARTTLS.
    #[must_use]
    pub fn with_starttls(mut self) -> Self {
        self.use_starttls = true;
        self
    }

    /// Set user container.
    pub fn with_user_container(mut self, container: impl Into<String>) -> Self {
        self.user_container = Some(container.into());
        self
    }

    /// Set the unique identifier attribute (e.g. `objectGUID` for AD).
    pub fn with_uid_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.uid_attribute = attribute.into();
        self
    }

    /// Get the full user container DN.
    #[must_use]
    pub fn user_dn(&self) -> String {
        match &self.user_container {
            Some(container) => format!("{},{}", container, self.base_dn),
            None => self.base_dn.clone(),
        }
    }

    /// Get the LDAP URL.
    #[must_use]
    pub fn url(&self) -> String {
        let scheme = if self.use_ssl { "ldaps" } else { "ldap" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    /// Attributes requested when the caller does not name any.
    ///
    /// Operational attributes such as `entryUUID` and `modifyTimestamp` are
    /// not returned for `*` and must be listed explicitly.
    pub fn default_attributes(&self) -> Vec<String> {
        let mut attrs = vec!["*".to_string(), "modifyTimestamp".to_string()];
        if !attrs.iter().any(|a| a.eq_ignore_ascii_case(&self.uid_attribute)) {
            attrs.push(self.uid_attribute.clone());
        }
        attrs
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ConnectorResult<()> {
        if self.host.is_empty() {
            return Err(ConnectorError::invalid_configuration("host is required"));
        }

        if self.base_dn.is_empty() {
            return Err(ConnectorError::invalid_configuration("base_dn is required"));
        }

        if self.bind_dn.is_empty() {
            return Err(ConnectorError::invalid_configuration("bind_dn is required"));
        }

        if self.use_ssl && self.use_starttls {
            return Err(ConnectorError::invalid_configuration(
                "cannot use both SSL and STARTTLS",
            ));
        }

        if self.uid_attribute.trim().is_empty() {
            return Err(ConnectorError::invalid_configuration(
                "uid_attribute must not be empty",
            ));
        }

        if self.change_buffer == 0 {
            return Err(ConnectorError::invalid_configuration(
                "change_buffer must be at least 1",
            ));
        }

        Ok(())
    }

    /// Copy of the configuration safe to log or return from an API.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if config.bind_password.is_some() {
            config.bind_password = Some("***REDACTED***".to_string());
        }
        config
    }
}
