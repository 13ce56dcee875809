use std::{
    collections::HashMap,
    convert::Infallible,
    fs::{create_dir_all, File},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, OnceLock},
};

use chrono::Utc;
use derive_more::{Display, From};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::{
    directory::{Directory, Ignores},
    object_id::ObjectId,
    object_store::{directory::DirectoryObjectStore, ObjectStore},
    page::PagePath,
    revision::{Author, Revision},
};

/// Name of the directory under the store root that holds the history.
/// It is never a valid page path segment.
pub const DOT_REV: &str = ".rev";

#[derive(Debug, Display, From)]
pub enum Error {
    #[from]
    #[display(fmt = "io error: {}", _0)]
    IO(std::io::Error),
    #[from]
    #[display(fmt = "serialization error: {}", _0)]
    Serde(serde_json::Error),
    #[display(fmt = "object {} is missing from the store", _0)]
    MissingObject(ObjectId),
    #[display(fmt = "no revision history at {:?}", _0)]
    NotInitialized(PathBuf),
    #[display(fmt = "revision history already exists at {:?}", _0)]
    AlreadyInitialized(PathBuf),
    #[display(fmt = "invalid page path: {}", _0)]
    InvalidPath(String),
    #[display(fmt = "commit failed: {}", _0)]
    Commit(Box<Error>),
    #[display(fmt = "head moved from {:?} to {:?} during commit", expected, actual)]
    HeadMoved {
        expected: Option<ObjectId>,
        actual: Option<ObjectId>,
    },
    #[display(fmt = "version length should be in range [4, 40], provided {}", _0)]
    InvalidVersionLength(usize),
    #[display(fmt = "no revision matches version {}", _0)]
    VersionNotFound(String),
    #[display(fmt = "{} does not exist at revision {}", path, revision)]
    PathNotFoundAtRevision { path: String, revision: ObjectId },
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IO(err) => Some(err),
            Error::Serde(err) => Some(err),
            Error::Commit(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<Infallible> for Error {
    fn from(never: Infallible) -> Self {
        match never {}
    }
}

/// The on-disk revision history of a page store rooted at a directory.
///
/// ```text
/// <root>/.rev/HEAD     JSON null, or the id of the newest revision
/// <root>/.rev/ignores  names excluded from snapshots and page paths
/// <root>/.rev/objects  blobs, directory trees and revisions
/// ```
///
/// Reads need no coordination. Writers must hold [`RevisionStore::lock_writes`]
/// from the moment they read [`RevisionStore::head`] until their commit
/// returns. Every handle opened on the same root in one process shares that
/// lock; separate processes are not coordinated.
#[derive(Debug)]
pub struct RevisionStore {
    root: PathBuf,
    dot_rev: PathBuf,
    ignores: Ignores,
    write_lock: Arc<Mutex<()>>,
}

/// The write lock for `root`, shared by every handle in this process.
fn write_lock_for(root: &Path) -> Result<Arc<Mutex<()>>, Error> {
    static LOCKS: OnceLock<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> = OnceLock::new();
    let key = root.canonicalize()?;
    let mut locks = LOCKS
        .get_or_init(Default::default)
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    Ok(locks.entry(key).or_default().clone())
}

impl RevisionStore {
    /// Creates an empty history under `root`, creating `root` if needed.
    pub fn initialize(root: impl Into<PathBuf>) -> Result<Self, Error> {
        let root = root.into();
        let dot_rev = root.join(DOT_REV);
        if dot_rev.join("HEAD").try_exists()? {
            return Err(Error::AlreadyInitialized(root));
        }
        create_dir_all(&dot_rev)?;
        DirectoryObjectStore::new(dot_rev.join("objects"))?;
        let ignores = Ignores::new(DOT_REV, Vec::new());
        write_json(&ignores, &dot_rev.join("ignores"))?;

        // HEAD goes last: its presence is what marks the store initialized.
        let head: Option<ObjectId> = None;
        write_json(&head, &dot_rev.join("HEAD"))?;
        log::info!("initialized empty revision history in {:?}", dot_rev);

        Self::open(root)
    }

    /// Opens the existing history under `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, Error> {
        let root = root.into();
        let dot_rev = root.join(DOT_REV);
        if !dot_rev.join("HEAD").try_exists()? {
            return Err(Error::NotInitialized(root));
        }
        let ignores: Ignores = match read_json(&dot_rev.join("ignores")) {
            Ok(ignores) => ignores,
            Err(Error::IO(err)) if err.kind() == ErrorKind::NotFound => {
                log::warn!("no ignores file in {:?}, using defaults", dot_rev);
                Ignores::new(DOT_REV, Vec::new())
            }
            Err(err) => return Err(err),
        };
        // A hand edited ignores file must still hide the history directory.
        let ignores = Ignores::new(DOT_REV, ignores.iter().map(String::from));
        let write_lock = write_lock_for(&root)?;
        Ok(RevisionStore {
            root,
            dot_rev,
            ignores,
            write_lock,
        })
    }

    /// Initializes `root` if necessary, then opens it. An existing history
    /// is not an error.
    pub fn init_or_open(root: impl Into<PathBuf>) -> Result<Self, Error> {
        let root = root.into();
        match Self::initialize(root.clone()) {
            Ok(store) => Ok(store),
            Err(Error::AlreadyInitialized(_)) => {
                log::info!("revision history already found in {:?}, skipping init", root);
                Self::open(root)
            }
            Err(err) => Err(err),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dot_rev(&self) -> &Path {
        &self.dot_rev
    }

    pub fn ignores(&self) -> &Ignores {
        &self.ignores
    }

    pub fn store(&self) -> Result<DirectoryObjectStore, Error> {
        Ok(DirectoryObjectStore::new(self.dot_rev.join("objects"))?)
    }

    /// Serializes writers. See [`crate::write::WriteCoordinator::save`].
    pub fn lock_writes(&self) -> MutexGuard<'_, ()> {
        // The guarded value is `()`, so a panicked writer leaves nothing to repair.
        self.write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Validates `raw` as a page path for this store.
    pub fn page_path(&self, raw: &str) -> Result<PagePath, Error> {
        let page = PagePath::parse(raw).map_err(Error::InvalidPath)?;
        if let Some(segment) = page.segments().iter().find(|s| self.ignores.contains(s)) {
            return Err(Error::InvalidPath(format!(
                "{:?} refers to the reserved name {:?}",
                raw, segment
            )));
        }
        Ok(page)
    }

    /// The newest revision, or `None` before the first commit.
    pub fn head(&self) -> Result<Option<ObjectId>, Error> {
        read_json(&self.head_path())
    }

    pub fn lookup_revision(&self, id: ObjectId) -> Result<Revision, Error> {
        self.store()?.read_json(id)
    }

    /// The single parent of `revision`, or `None` at the root of history.
    pub fn parent_of(&self, revision: &Revision) -> Result<Option<(ObjectId, Revision)>, Error> {
        match revision.parent {
            None => Ok(None),
            Some(id) => Ok(Some((id, self.lookup_revision(id)?))),
        }
    }

    /// Walks from head to the root revision.
    pub fn history(&self) -> Result<History<'_>, Error> {
        Ok(History {
            store: self,
            next: self.head()?,
        })
    }

    /// Contents of `page` as recorded in `revision`, or `None` if the page
    /// did not exist then.
    pub fn read_path(&self, revision: &Revision, page: &PagePath) -> Result<Option<Vec<u8>>, Error> {
        let store = self.store()?;
        let directory: Directory = store.read_json(revision.directory)?;
        match directory.lookup(page) {
            None => Ok(None),
            Some(blob) => match store.read(blob)? {
                None => Err(Error::MissingObject(blob)),
                Some(bytes) => Ok(Some(bytes)),
            },
        }
    }

    /// Every page path recorded in `revision`, sorted. The history directory
    /// is never part of a snapshot, so it is never listed.
    pub fn list_pages(&self, revision: &Revision) -> Result<Vec<String>, Error> {
        let directory: Directory = self.store()?.read_json(revision.directory)?;
        Ok(directory.files())
    }

    /// Page paths at head; empty before the first commit.
    pub fn list_current(&self) -> Result<Vec<String>, Error> {
        match self.head()? {
            None => Ok(Vec::new()),
            Some(id) => self.list_pages(&self.lookup_revision(id)?),
        }
    }

    /// Contents of `page` at head.
    pub fn read_current(&self, page: &PagePath) -> Result<Option<Vec<u8>>, Error> {
        match self.head()? {
            None => Ok(None),
            Some(id) => {
                let revision = self.lookup_revision(id)?;
                self.read_path(&revision, page)
            }
        }
    }

    /// Snapshots the whole working directory as a new revision on top of
    /// `parent` and moves head to it.
    ///
    /// Fails with [`Error::HeadMoved`] if head is no longer `parent` when the
    /// snapshot is done. That check and the rename of HEAD are two steps, so
    /// only [`RevisionStore::lock_writes`] rules out a fork. Objects written
    /// before a failure are unreachable, and head only changes through a
    /// single rename, so a failed commit is never visible.
    pub fn commit(
        &self,
        parent: Option<ObjectId>,
        author: &Author,
        message: &str,
    ) -> Result<ObjectId, Error> {
        let mut store = self.store()?;
        let directory = Directory::new(&self.root, &self.ignores, &mut store)?;
        let directory = store.insert_json(&directory)?;
        let revision = Revision {
            message: String::from(message),
            directory,
            parent,
            author: author.clone(),
            timestamp: Utc::now(),
        };
        let id = store.insert_json(&revision)?;

        let actual = self.head()?;
        if actual != parent {
            return Err(Error::HeadMoved {
                expected: parent,
                actual,
            });
        }
        write_json(&Some(id), &self.head_path())?;
        log::info!("committed {} by {}: {}", id, author, message);
        Ok(id)
    }

    fn head_path(&self) -> PathBuf {
        self.dot_rev.join("HEAD")
    }
}

/// Iterator over `(id, revision)` pairs from head back to the root,
/// following only the single parent link. A failed lookup is yielded once
/// and ends the walk.
pub struct History<'a> {
    store: &'a RevisionStore,
    next: Option<ObjectId>,
}

impl Iterator for History<'_> {
    type Item = Result<(ObjectId, Revision), Error>;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next.take()?;
        match self.store.lookup_revision(id) {
            Ok(revision) => {
                self.next = revision.parent;
                Some(Ok((id, revision)))
            }
            Err(err) => Some(Err(err)),
        }
    }
}

/// A convenience trait for writing and reading JSON from an [`ObjectStore`].
pub trait InsertJson {
    /// Inserts a pretty JSON encoded version of the thing into the store.
    fn insert_json<A: Serialize>(&mut self, thing: &A) -> Result<ObjectId, Error>;

    /// Reads a JSON encoded thing of the given type from the store at that given [`ObjectId`].
    fn read_json<A: for<'de> Deserialize<'de>>(&self, object_id: ObjectId) -> Result<A, Error>;
}

impl<S: ObjectStore> InsertJson for S {
    fn insert_json<A: Serialize>(&mut self, thing: &A) -> Result<ObjectId, Error> {
        let bytes = serde_json::to_vec_pretty(thing)?;
        self.insert(&bytes).map_err(Into::into)
    }

    fn read_json<A: for<'de> Deserialize<'de>>(&self, object_id: ObjectId) -> Result<A, Error> {
        match self.read(object_id).map_err(Into::<Error>::into)? {
            None => Err(Error::MissingObject(object_id)),
            Some(obj) => Ok(serde_json::from_slice(&obj)?),
        }
    }
}

fn read_json<A: for<'de> Deserialize<'de>>(path: &Path) -> Result<A, Error> {
    Ok(serde_json::from_reader(
        File::options().read(true).open(path)?,
    )?)
}

/// Replaces the file at `path` by renaming a fully written temporary file
/// over it.
fn write_json<A: Serialize>(thing: &A, path: &Path) -> Result<(), Error> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut file = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut file, thing)?;
    file.write_all(b"\n")?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|err| err.error)?;
    Ok(())
}

#[test]
fn test_initialize_then_open() {
    let tempdir = tempfile::tempdir().unwrap();
    let root = tempdir.path().join("wiki");
    let store = RevisionStore::initialize(&root).unwrap();
    assert_eq!(store.head().unwrap(), None);
    assert!(store.history().unwrap().next().is_none());
    assert!(root.join(".rev/objects").is_dir());

    let reopened = RevisionStore::open(&root).unwrap();
    assert_eq!(reopened.head().unwrap(), None);
    assert!(reopened.ignores().contains(DOT_REV));
}

#[test]
fn test_bootstrap_errors() {
    let tempdir = tempfile::tempdir().unwrap();
    assert!(matches!(
        RevisionStore::open(tempdir.path()),
        Err(Error::NotInitialized(_))
    ));
    RevisionStore::initialize(tempdir.path()).unwrap();
    assert!(matches!(
        RevisionStore::initialize(tempdir.path()),
        Err(Error::AlreadyInitialized(_))
    ));
    assert!(RevisionStore::init_or_open(tempdir.path()).is_ok());
}

#[test]
fn test_commit_snapshots_whole_directory() {
    let tempdir = tempfile::tempdir().unwrap();
    let store = RevisionStore::initialize(tempdir.path()).unwrap();
    std::fs::write(tempdir.path().join("a.md"), b"alpha").unwrap();
    std::fs::create_dir(tempdir.path().join("sub")).unwrap();
    std::fs::write(tempdir.path().join("sub/b.md"), b"beta").unwrap();

    let author = Author::new("alice");
    let h1 = store.commit(None, &author, "first").unwrap();
    assert_eq!(store.head().unwrap(), Some(h1));

    let revision = store.lookup_revision(h1).unwrap();
    assert_eq!(revision.parent, None);
    assert_eq!(revision.author, author);
    assert_eq!(revision.message, "first");
    assert_eq!(store.parent_of(&revision).unwrap(), None);

    let a = store.page_path("a.md").unwrap();
    let b = store.page_path("sub/b.md").unwrap();
    assert_eq!(store.read_path(&revision, &a).unwrap(), Some(b"alpha".to_vec()));
    assert_eq!(store.read_path(&revision, &b).unwrap(), Some(b"beta".to_vec()));

    let h2 = store.commit(Some(h1), &Author::new("bob"), "second").unwrap();
    let second = store.lookup_revision(h2).unwrap();
    let (parent_id, parent) = store.parent_of(&second).unwrap().unwrap();
    assert_eq!(parent_id, h1);
    assert_eq!(parent, revision);
    assert_eq!(second.directory, revision.directory);

    let ids: Vec<ObjectId> = store.history().unwrap().map(|r| r.unwrap().0).collect();
    assert_eq!(ids, [h2, h1]);
}

#[test]
fn test_commit_rejects_stale_parent() {
    let tempdir = tempfile::tempdir().unwrap();
    let store = RevisionStore::initialize(tempdir.path()).unwrap();
    let author = Author::new("alice");
    let h1 = store.commit(None, &author, "first").unwrap();

    let err = store.commit(None, &author, "stale").unwrap_err();
    assert!(matches!(
        err,
        Error::HeadMoved { expected: None, actual: Some(actual) } if actual == h1
    ));
    assert_eq!(store.head().unwrap(), Some(h1));
}

#[test]
fn test_lookup_missing_revision() {
    let tempdir = tempfile::tempdir().unwrap();
    let store = RevisionStore::initialize(tempdir.path()).unwrap();
    let id = ObjectId::from(b"no such revision".as_slice());
    assert!(matches!(store.lookup_revision(id), Err(Error::MissingObject(missing)) if missing == id));
}

#[test]
fn test_page_path_rejects_reserved_names() {
    let tempdir = tempfile::tempdir().unwrap();
    let store = RevisionStore::initialize(tempdir.path()).unwrap();
    for raw in [".rev", ".rev/HEAD", "a/.rev/x.md", "../x.md", ""] {
        assert!(matches!(store.page_path(raw), Err(Error::InvalidPath(_))), "{:?}", raw);
    }
    assert!(store.page_path("a/b.md").is_ok());
}

#[test]
fn test_read_current_before_first_commit() {
    let tempdir = tempfile::tempdir().unwrap();
    let store = RevisionStore::initialize(tempdir.path()).unwrap();
    std::fs::write(tempdir.path().join("a.md"), b"uncommitted").unwrap();
    let page = store.page_path("a.md").unwrap();
    assert_eq!(store.read_current(&page).unwrap(), None);
}

#[test]
fn test_page_path_reserved_names_ignore_case() {
    let tempdir = tempfile::tempdir().unwrap();
    let store = RevisionStore::initialize(tempdir.path()).unwrap();
    for raw in [".REV/HEAD", ".Rev", "a/.rEv/x.md"] {
        assert!(matches!(store.page_path(raw), Err(Error::InvalidPath(_))), "{:?}", raw);
    }
}

#[test]
fn test_list_pages_never_shows_history() {
    let tempdir = tempfile::tempdir().unwrap();
    let store = RevisionStore::initialize(tempdir.path()).unwrap();
    assert!(store.list_current().unwrap().is_empty());

    std::fs::create_dir(tempdir.path().join("docs")).unwrap();
    std::fs::write(tempdir.path().join("docs/b.md"), b"beta").unwrap();
    std::fs::write(tempdir.path().join("a.md"), b"alpha").unwrap();
    let h1 = store.commit(None, &Author::new("alice"), "first").unwrap();
    std::fs::write(tempdir.path().join("c.md"), b"gamma").unwrap();
    store.commit(Some(h1), &Author::new("alice"), "second").unwrap();

    assert_eq!(store.list_current().unwrap(), ["a.md", "c.md", "docs/b.md"]);
    let first = store.lookup_revision(h1).unwrap();
    assert_eq!(store.list_pages(&first).unwrap(), ["a.md", "docs/b.md"]);
    assert!(store
        .list_current()
        .unwrap()
        .iter()
        .all(|page| !page.starts_with(DOT_REV)));
}

#[test]
fn test_handles_on_one_root_share_the_write_lock() {
    let tempdir = tempfile::tempdir().unwrap();
    let first = RevisionStore::initialize(tempdir.path()).unwrap();
    let second = RevisionStore::open(tempdir.path()).unwrap();
    assert!(Arc::ptr_eq(&first.write_lock, &second.write_lock));

    let _guard = first.lock_writes();
    assert!(second.write_lock.try_lock().is_err());
}
