//! Directory Access Layer
//!
//! Abstractions over an LDAP-compatible user directory as seen by the sync
//! engine. The engine only ever talks to a [`DirectoryConnector`], which
//! opens one [`DirectoryClient`] connection per run.
//!
//! # Overview
//!
//! - **Paged search**: [`DirectoryClient::paged_search`] returns one
//!   [`SearchPage`] at a time together with an opaque [`PageCursor`]. An
//!   empty cursor marks the last page.
//! - **Change notification**: [`DirectoryClient::change_listen`] returns a
//!   [`ChangeStream`] that yields one [`ExternalRecord`] per change and ends
//!   with an error, never silently.
//! - **Errors**: [`ConnectorError`] distinguishes transient failures (worth a
//!   retry by the caller) from permanent ones. Clients never retry internally.
//!
//! # Example
//!
//! ```
//! use dirsync_connector::{ExternalRecord, PageCursor, SearchPage};
//!
//! let record = ExternalRecord::new("7f1c", "uid=jdoe,ou=people,dc=example,dc=com")
//!     .with_attribute("mail", vec!["jdoe@example.com".to_string()]);
//! assert_eq!(record.first("MAIL"), Some("jdoe@example.com"));
//!
//! let page = SearchPage::new(vec![record], PageCursor::end());
//! assert!(page.is_last());
//! ```

pub mod error;
pub mod record;
pub mod stream;
pub mod traits;

pub use error::{ConnectorError, ConnectorResult};
pub use record::{ExternalRecord, PageCursor, SearchPage};
pub use stream::{ChangeSender, ChangeStream};
pub use traits::{DirectoryClient, DirectoryConnector};

/// Re-export async_trait for implementors.
pub use async_trait::async_trait;
