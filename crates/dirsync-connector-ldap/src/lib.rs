//! LDAP Directory Client
//!
//! [`LdapConnector`] implements the directory access traits on top of
//! `ldap3`:
//!
//! - Paged full scans use the Simple Paged Results control (RFC 2696). The
//!   server cookie becomes the opaque [`dirsync_connector::PageCursor`].
//! - Change notification uses the Persistent Search control
//!   (`2.16.840.1.113730.3.4.3`), with entries forwarded from a background
//!   task into a [`dirsync_connector::ChangeStream`].
//!
//! Each call to [`LdapConnector::connect`](dirsync_connector::DirectoryConnector::connect)
//! binds a fresh connection.
//!
//! # Example
//!
//! ```no_run
//! use dirsync_connector::DirectoryConnector;
//! use dirsync_connector_ldap::{LdapConfig, LdapConnector};
//!
//! # async fn example() -> dirsync_connector::ConnectorResult<()> {
//! let config = LdapConfig::new("ldap.example.com", "dc=example,dc=com", "cn=sync,dc=example,dc=com")
//!     .with_password("secret");
//! let connector = LdapConnector::new(config)?;
//! let mut client = connector.connect().await?;
//! client.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod control;

pub use client::{LdapConnector, LdapDirectoryClient};
pub use config::LdapConfig;
