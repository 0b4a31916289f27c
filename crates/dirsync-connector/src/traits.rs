//! Directory connector traits.
//!
//! A [`DirectoryConnector`] is a cheap, shareable handle holding connection
//! settings. Every sync run calls [`DirectoryConnector::connect`] to obtain
//! its own [`DirectoryClient`], so concurrent runs never share a connection
//! or a paging cursor.

use async_trait::async_trait;

use crate::error::ConnectorResult;
use crate::record::{PageCursor, SearchPage};
use crate::stream::ChangeStream;

/// Factory for directory connections.
#[async_trait]
pub trait DirectoryConnector: Send + Sync {
    /// Display name used in logs.
    fn display_name(&self) -> &str;

    /// Open and authenticate a new connection.
    async fn connect(&self) -> ConnectorResult<Box<dyn DirectoryClient>>;
}

/// An authenticated directory connection.
///
/// Implementations return network and protocol errors to the caller and
/// never retry on their own.
#[async_trait]
pub trait DirectoryClient: Send {
    /// Fetch one page of entries matching `filter` under `base`.
    ///
    /// Pass [`PageCursor::end`] to start. Repeating the call with the
    /// returned cursor eventually yields a page whose cursor is empty.
    async fn paged_search(
        &mut self,
        base: &str,
        filter: &str,
        page_size: u32,
        cursor: &PageCursor,
    ) -> ConnectorResult<SearchPage>;

    /// Subscribe to changes of entries matching `filter` under `base`.
    ///
    /// An empty attribute list requests all user attributes.
    async fn change_listen(
        &mut self,
        base: &str,
        filter: &str,
        attributes: &[String],
    ) -> ConnectorResult<ChangeStream>;

    /// Release the connection.
    async fn close(&mut self) -> ConnectorResult<()> {
        Ok(())
    }
}
