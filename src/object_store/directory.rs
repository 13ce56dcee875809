use std::{
    fs::{create_dir_all, File},
    io::{ErrorKind, Read, Write},
    path::PathBuf,
};

use tempfile::NamedTempFile;

use crate::object_id::ObjectId;

use super::ObjectStore;

/// A persistent [`ObjectStore`] stored in a directory,
/// using the first two hexadecimal characters of the [`ObjectId`]
/// to determine which directory to place the binary object in
/// and creating a file with the rest of the hexadecimal characters
/// as the file name.
///
/// Objects are written to a temporary file and renamed into place, so an
/// object file is either complete or missing.
#[derive(Debug, Clone)]
pub struct DirectoryObjectStore {
    root: PathBuf,
}

impl DirectoryObjectStore {
    pub fn new(root: PathBuf) -> Result<Self, std::io::Error> {
        if !root.try_exists()? {
            log::info!("creating directory store root: {:?}", root);
            create_dir_all(&root)?;
        }
        Ok(Self { root })
    }

    fn object_path(&self, id: ObjectId) -> PathBuf {
        let s: String = id.to_string();
        let (subdir, filename) = s.split_at(2);
        self.root.join(subdir).join(filename)
    }
}

impl ObjectStore for DirectoryObjectStore {
    type Error = std::io::Error;

    fn has(&self, id: ObjectId) -> Result<bool, Self::Error> {
        log::debug!("checking whether {} is contained in {:?}", id, self.root);
        self.object_path(id).try_exists()
    }

    fn read(&self, id: ObjectId) -> Result<Option<Vec<u8>>, Self::Error> {
        log::debug!("reading {} from {:?}", id, self.root);
        match File::options().read(true).open(self.object_path(id)) {
            Ok(mut f) => {
                let mut v = Vec::new();
                f.read_to_end(&mut v)?;
                Ok(Some(v))
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn insert(&mut self, object: &[u8]) -> Result<ObjectId, Self::Error> {
        let id: ObjectId = object.into();
        let path = self.object_path(id);
        if path.try_exists()? {
            log::debug!("{:?} already exists", path);
            return Ok(id);
        }
        log::debug!("inserting {} into {:?}", id, self.root);
        let subdir_path = path.parent().unwrap_or(self.root.as_path());
        if !subdir_path.try_exists()? {
            log::debug!("creating subdir path {:?} in {:?}", subdir_path, self.root);
            create_dir_all(subdir_path)?;
        }
        let mut f = NamedTempFile::new_in(subdir_path)?;
        f.write_all(object)?;
        f.as_file().sync_all()?;
        f.persist(&path)?;
        Ok(id)
    }
}

#[test]
fn test_directory_object_store() {
    let tempdir = tempfile::tempdir().unwrap();
    let mut store = DirectoryObjectStore::new(tempdir.path().into()).unwrap();
    store.insert(b"hello, world").unwrap();
    let b: &[u8] = b"hello, world";
    assert!(store.has(b.into()).unwrap());
    assert_eq!(store.read(b.into()).unwrap(), Some(Vec::from(b)));
}

#[test]
fn test_directory_object_store_layout_and_missing() {
    let tempdir = tempfile::tempdir().unwrap();
    let mut store = DirectoryObjectStore::new(tempdir.path().join("objects")).unwrap();
    let id = store.insert(b"page body").unwrap();
    let hex = id.to_string();
    assert!(tempdir.path().join("objects").join(&hex[..2]).join(&hex[2..]).is_file());
    assert_eq!(store.insert(b"page body").unwrap(), id);

    let absent = ObjectId::from(b"never inserted".as_slice());
    assert!(!store.has(absent).unwrap());
    assert_eq!(store.read(absent).unwrap(), None);
}
