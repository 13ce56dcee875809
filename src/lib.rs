//! # Page Store
//!
//! A versioned store of plain-text pages. Every page write is committed to a
//! linear, content addressed revision history kept next to the pages, so any
//! past version of a page can be read back by a prefix of its revision id.

/// A data structure representing a directory structure with
/// names of files pointing to an [`ObjectId`].
pub mod directory;
/// Hash-based binary object identifier.
pub mod object_id;
/// Content addressible store API using the [`ObjectId`].
pub mod object_store;
/// Validated page paths.
pub mod page;
/// Reading pages at past revisions.
pub mod resolve;
/// Revisions and their authors.
pub mod revision;
/// The on-disk history: head, revisions, trees and blobs.
pub mod revision_store;
/// Writing pages and committing them.
pub mod write;

pub use object_id::ObjectId;
pub use page::PagePath;
pub use resolve::VersionResolver;
pub use revision::{Author, Revision};
pub use revision_store::{Error, RevisionStore};
pub use write::WriteCoordinator;
