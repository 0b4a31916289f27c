//! Records and paging primitives returned by directory searches.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{ConnectorError, ConnectorResult};

/// A decoded directory entry.
///
/// Attribute names keep the casing the directory returned; lookups through
/// [`ExternalRecord::get`] ignore case, as LDAP attribute descriptions do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalRecord {
    /// Unique external identifier (configured uid attribute, or the DN).
    pub id: String,
    /// Distinguished name of the entry.
    pub dn: String,
    /// Attribute name to values.
    #[serde(default)]
    pub attributes: BTreeMap<String, Vec<String>>,
}

impl ExternalRecord {
    pub fn new(id: impl Into<String>, dn: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            dn: dn.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Add an attribute (builder style).
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, values: Vec<String>) -> Self {
        self.attributes.insert(name.into(), values);
        self
    }

    /// All values of an attribute, matched case-insensitively.
    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.attributes
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, values)| values.as_slice())
    }

    /// First value of an attribute, if any.
    pub fn first(&self, name: &str) -> Option<&str> {
        self.get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }
}

/// Opaque continuation token for paged searches.
///
/// An empty cursor requests the first page when passed in and marks the last
/// page when returned. The cursor is only meaningful on the connection that
/// produced it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct PageCursor(Vec<u8>);

impl PageCursor {
    /// The cursor that starts a search and ends one.
    pub fn end() -> Self {
        Self(Vec::new())
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Printable form of the cursor.
    pub fn to_token(&self) -> String {
        STANDARD.encode(&self.0)
    }

    /// Parse a cursor from its printable form.
    pub fn from_token(token: &str) -> ConnectorResult<Self> {
        STANDARD
            .decode(token)
            .map(Self)
            .map_err(|e| ConnectorError::invalid_cursor(e.to_string()))
    }
}

impl From<PageCursor> for String {
    fn from(cursor: PageCursor) -> Self {
        cursor.to_token()
    }
}

impl TryFrom<String> for PageCursor {
    type Error = ConnectorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_token(&value)
    }
}

/// One page of search results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPage {
    pub records: Vec<ExternalRecord>,
    /// Cursor for the next page; empty on the last page.
    pub next_cursor: PageCursor,
}

impl SearchPage {
    pub fn new(records: Vec<ExternalRecord>, next_cursor: PageCursor) -> Self {
        Self {
            records,
            next_cursor,
        }
    }

    /// Whether this is the final page of the search.
    pub fn is_last(&self) -> bool {
        self.next_cursor.is_empty()
    }
}
