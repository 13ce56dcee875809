use crate::{object_id::ObjectId, revision_store::Error};

pub mod directory;
pub mod in_memory;

/// A content addressed store of immutable binary objects.
///
/// Inserting the same bytes twice yields the same [`ObjectId`] and stores
/// them once.
pub trait ObjectStore {
    type Error: Into<Error>;

    fn has(&self, id: ObjectId) -> Result<bool, Self::Error>;

    fn read(&self, id: ObjectId) -> Result<Option<Vec<u8>>, Self::Error>;

    fn insert(&mut self, object: &[u8]) -> Result<ObjectId, Self::Error>;
}
