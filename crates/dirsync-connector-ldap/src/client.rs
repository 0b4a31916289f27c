//! LDAP directory client built on `ldap3`.

use async_trait::async_trait;
use ldap3::controls::{Control, ControlType, PagedResults};
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, LdapError, Scope, SearchEntry};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use dirsync_connector::{
    ChangeStream, ConnectorError, ConnectorResult, DirectoryClient, DirectoryConnector, PageCursor,
    SearchPage,
};

use crate::config::LdapConfig;
use crate::control::{change_listen_control, record_from_entry};

/// LDAP result code for invalid credentials.
const LDAP_INVALID_CREDENTIALS: u32 = 49;

/// Connection factory for one LDAP source.
#[derive(Debug, Clone)]
pub struct LdapConnector {
    config: Arc<LdapConfig>,
}

impl LdapConnector {
    /// Create a connector after validating the configuration.
    pub fn new(config: LdapConfig) -> ConnectorResult<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &LdapConfig {
        &self.config
    }

    /// Open a connection and bind.
    async fn open(&self) -> ConnectorResult<Ldap> {
        let url = self.config.url();

        debug!(url = %url, "Connecting to LDAP server");

        let settings = LdapConnSettings::new()
            .set_conn_timeout(self.config.connect_timeout())
            .set_starttls(self.config.use_starttls);

        let (conn, mut ldap) = LdapConnAsync::with_settings(settings, &url)
            .await
            .map_err(|e| {
                ConnectorError::connection_failed_with_source(
                    format!("Failed to connect to LDAP server at {url}"),
                    e,
                )
            })?;

        // Spawn the connection driver
        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                warn!(error = %e, "LDAP connection driver error");
            }
        });

        let bind_dn = &self.config.bind_dn;
        let bind_password = self.config.bind_password.as_deref().unwrap_or("");

        debug!(bind_dn = %bind_dn, "Performing LDAP bind");

        let result = ldap
            .simple_bind(bind_dn, bind_password)
            .await
            .map_err(|e| {
                ConnectorError::connection_failed_with_source(
                    format!("LDAP bind failed for {bind_dn}"),
                    e,
                )
            })?;

        if result.rc != 0 {
            if result.rc == LDAP_INVALID_CREDENTIALS {
                return Err(ConnectorError::AuthenticationFailed);
            }
            return Err(ConnectorError::connection_failed(format!(
                "LDAP bind failed with code {}: {}",
                result.rc, result.text
            )));
        }

        info!(host = %self.config.host, "LDAP connection established");
        Ok(ldap)
    }
}

#[async_trait]
impl DirectoryConnector for LdapConnector {
    fn display_name(&self) -> &str {
        &self.config.host
    }

    #[instrument(skip(self), fields(host = %self.config.host))]
    async fn connect(&self) -> ConnectorResult<Box<dyn DirectoryClient>> {
        let ldap = self.open().await?;
        Ok(Box::new(LdapDirectoryClient {
            ldap,
            config: Arc::clone(&self.config),
        }))
    }
}

/// One bound LDAP connection.
pub struct LdapDirectoryClient {
    ldap: Ldap,
    config: Arc<LdapConfig>,
}

impl LdapDirectoryClient {
    fn requested_attributes(&self, attributes: &[String]) -> Vec<String> {
        if attributes.is_empty() {
            return self.config.default_attributes();
        }
        let mut attrs = attributes.to_vec();
        if !attrs
            .iter()
            .any(|a| a.eq_ignore_ascii_case(&self.config.uid_attribute))
        {
            attrs.push(self.config.uid_attribute.clone());
        }
        attrs
    }
}

fn search_error(context: &str, err: LdapError) -> ConnectorError {
    match err {
        LdapError::LdapResult { result } => ConnectorError::SearchFailed {
            code: result.rc,
            message: result.text,
        },
        other => ConnectorError::network_with_source(context.to_string(), other),
    }
}

#[async_trait]
impl DirectoryClient for LdapDirectoryClient {
    #[instrument(skip(self, cursor), fields(first_page = cursor.is_empty()))]
    async fn paged_search(
        &mut self,
        base: &str,
        filter: &str,
        page_size: u32,
        cursor: &PageCursor,
    ) -> ConnectorResult<SearchPage> {
        let size = i32::try_from(page_size).map_err(|_| {
            ConnectorError::invalid_configuration(format!("page size {page_size} out of range"))
        })?;
        let paging = PagedResults {
            size,
            cookie: cursor.as_bytes().to_vec(),
        };
        let attrs = self.config.default_attributes();
        let timeout = self.config.operation_timeout();

        let result = self
            .ldap
            .with_controls(paging)
            .with_timeout(timeout)
            .search(base, Scope::Subtree, filter, attrs)
            .await
            .map_err(|e| search_error("paged search failed", e))?;

        let (entries, outcome) = result
            .success()
            .map_err(|e| search_error("paged search failed", e))?;

        let cookie = outcome
            .ctrls
            .iter()
            .find_map(|ctrl| match ctrl {
                Control(Some(ControlType::PagedResults), raw) => {
                    Some(raw.parse::<PagedResults>().cookie)
                }
                _ => None,
            })
            .unwrap_or_default();

        let records: Vec<_> = entries
            .into_iter()
            .map(|entry| record_from_entry(SearchEntry::construct(entry), &self.config.uid_attribute))
            .collect();

        debug!(
            records = records.len(),
            more = !cookie.is_empty(),
            "Fetched search page"
        );

        Ok(SearchPage::new(records, PageCursor::from_bytes(cookie)))
    }

    #[instrument(skip(self, attributes))]
    async fn change_listen(
        &mut self,
        base: &str,
        filter: &str,
        attributes: &[String],
    ) -> ConnectorResult<ChangeStream> {
        let attrs = self.requested_attributes(attributes);
        let uid_attribute = self.config.uid_attribute.clone();

        let mut search = self
            .ldap
            .with_controls(change_listen_control())
            .streaming_search(base, Scope::Subtree, filter, attrs)
            .await
            .map_err(|e| search_error("persistent search failed", e))?;

        let (tx, stream) = ChangeStream::channel(self.config.change_buffer);

        let producer = tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    _ = tx.closed() => None,
                    next = search.next() => Some(next),
                };

                let item = match next {
                    None => break,
                    Some(Ok(Some(entry))) => {
                        Ok(record_from_entry(SearchEntry::construct(entry), &uid_attribute))
                    }
                    Some(Ok(None)) => {
                        let outcome = search.finish().await;
                        let err = if outcome.rc == 0 {
                            ConnectorError::StreamClosed
                        } else {
                            ConnectorError::SearchFailed {
                                code: outcome.rc,
                                message: outcome.text,
                            }
                        };
                        let _ = tx.send(Err(err)).await;
                        break;
                    }
                    Some(Err(e)) => {
                        let _ = tx.send(Err(search_error("change stream failed", e))).await;
                        break;
                    }
                };

                if tx.send(item).await.is_err() {
                    break;
                }
            }
            debug!("Persistent search listener stopped");
        });

        info!(base = %base, "Persistent search started");
        Ok(stream.with_producer(producer.abort_handle()))
    }

    async fn close(&mut self) -> ConnectorResult<()> {
        self.ldap
            .unbind()
            .await
            .map_err(|e| ConnectorError::network_with_source("LDAP unbind failed", e))
    }
}
