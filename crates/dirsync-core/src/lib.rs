//! dirsync Core Library
//!
//! Shared types for the directory synchronization crates.
//!
//! # Modules
//!
//! - [`ids`] - Identity identifier (IdentityId)
//! - [`identity`] - Internal identity model, sync candidates and merge history
//!
//! # Example
//!
//! ```
//! use dirsync_core::{CandidateIdentity, Identity, IdentityStatus};
//! use chrono::Utc;
//!
//! let mut candidate = CandidateIdentity::new("corp-ad", "0b9d4c1e");
//! candidate.username = "jdoe".to_string();
//!
//! let identity = Identity::from_candidate(candidate, Utc::now());
//! assert_eq!(identity.status, IdentityStatus::Active);
//! assert_eq!(identity.external_id.as_deref(), Some("0b9d4c1e"));
//! ```

pub mod identity;
pub mod ids;

pub use identity::{
    AttributeBag, CandidateIdentity, ConflictStrategy, Identity, IdentityStatus, MergeRecord,
};
pub use ids::{IdentityId, ParseIdError};
