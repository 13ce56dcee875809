use std::{
    fs::{create_dir_all, symlink_metadata},
    io::ErrorKind,
    path::Path,
    sync::Arc,
};

use crate::{
    object_id::ObjectId,
    page::PagePath,
    revision::Author,
    revision_store::{Error, RevisionStore},
};

/// Persists page writes and records each one as a new revision.
#[derive(Debug, Clone)]
pub struct WriteCoordinator {
    store: Arc<RevisionStore>,
}

impl WriteCoordinator {
    pub fn new(store: Arc<RevisionStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &RevisionStore {
        &self.store
    }

    /// Writes `content` to `path` and commits the whole store on top of the
    /// current head, returning the new head.
    ///
    /// Without a `message` the revision is described as `update <path>`.
    /// Errors:
    /// - [`Error::InvalidPath`] before anything is written, including when an
    ///   existing part of the path is a symlink.
    /// - [`Error::IO`] if the page could not be written; no commit is attempted.
    /// - [`Error::Commit`] if the page was written but the revision was not
    ///   recorded. The file on disk then differs from head.
    pub fn save(
        &self,
        path: &str,
        content: &[u8],
        message: Option<&str>,
        author: &Author,
    ) -> Result<ObjectId, Error> {
        let page = self.store.page_path(path)?;
        let message = match message {
            Some(message) => message.to_owned(),
            None => format!("update {}", page),
        };

        let _guard = self.store.lock_writes();
        reject_symlinks(self.store.root(), &page)?;
        let file = page.under(self.store.root());
        if let Some(dir) = file.parent() {
            create_dir_all(dir)?;
        }
        std::fs::write(&file, content)?;
        log::debug!("wrote {} bytes to {:?}", content.len(), file);

        self.store
            .head()
            .and_then(|parent| self.store.commit(parent, author, &message))
            .map_err(|err| {
                log::error!("{:?} written but not committed: {}", file, err);
                Error::Commit(Box::new(err))
            })
    }
}

/// Fails if any existing component of `page` under `root` is a symlink,
/// which could lead outside the root and is never captured by a snapshot.
fn reject_symlinks(root: &Path, page: &PagePath) -> Result<(), Error> {
    let mut path = root.to_path_buf();
    for segment in page.segments() {
        path.push(segment);
        match symlink_metadata(&path) {
            Ok(metadata) if metadata.file_type().is_symlink() => {
                return Err(Error::InvalidPath(format!(
                    "{:?} passes through the symlink {:?}",
                    page.to_string(),
                    path
                )));
            }
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

#[cfg(test)]
fn test_writer() -> (tempfile::TempDir, WriteCoordinator) {
    let tempdir = tempfile::tempdir().unwrap();
    let store = RevisionStore::initialize(tempdir.path()).unwrap();
    (tempdir, WriteCoordinator::new(Arc::new(store)))
}

#[test]
fn test_save_then_read_current() {
    let (tempdir, writer) = test_writer();
    let author = Author::new("alice");
    writer.save("docs/a.md", b"hello", None, &author).unwrap();

    let store = writer.store();
    let page = store.page_path("docs/a.md").unwrap();
    assert_eq!(store.read_current(&page).unwrap(), Some(b"hello".to_vec()));
    assert_eq!(std::fs::read(tempdir.path().join("docs/a.md")).unwrap(), b"hello");

    let (_, revision) = store.history().unwrap().next().unwrap().unwrap();
    assert_eq!(revision.message, "update docs/a.md");
    assert_eq!(revision.author, author);
}

#[test]
fn test_save_advances_head_onto_previous() {
    let (_tempdir, writer) = test_writer();
    let author = Author::new("alice");
    let store = writer.store();

    assert_eq!(store.head().unwrap(), None);
    let h1 = writer.save("a.md", b"one", Some("init"), &author).unwrap();
    assert_eq!(store.head().unwrap(), Some(h1));
    assert_eq!(store.lookup_revision(h1).unwrap().parent, None);

    let h2 = writer.save("a.md", b"two", Some("update"), &author).unwrap();
    assert_ne!(h1, h2);
    assert_eq!(store.head().unwrap(), Some(h2));
    assert_eq!(store.lookup_revision(h2).unwrap().parent, Some(h1));
}

#[test]
fn test_identical_save_still_commits() {
    let (_tempdir, writer) = test_writer();
    let author = Author::new("alice");
    let store = writer.store();

    let h1 = writer.save("a.md", b"same", None, &author).unwrap();
    let h2 = writer.save("a.md", b"same", None, &author).unwrap();
    assert_ne!(h1, h2);

    let first = store.lookup_revision(h1).unwrap();
    let second = store.lookup_revision(h2).unwrap();
    assert_eq!(second.parent, Some(h1));
    assert_eq!(first.directory, second.directory);
}

#[test]
fn test_save_rejects_invalid_paths_without_io() {
    let (tempdir, writer) = test_writer();
    let author = Author::new("mallory");
    for path in ["../escape.md", ".rev/HEAD", "/abs.md", "a/../../b.md"] {
        assert!(matches!(
            writer.save(path, b"x", None, &author),
            Err(Error::InvalidPath(_))
        ));
    }
    assert_eq!(writer.store().head().unwrap(), None);
    assert!(!tempdir.path().parent().unwrap().join("escape.md").exists());
}

#[test]
fn test_disk_failure_aborts_before_commit() {
    let (tempdir, writer) = test_writer();
    let author = Author::new("alice");
    std::fs::write(tempdir.path().join("blocker"), b"a file, not a directory").unwrap();

    let err = writer.save("blocker/a.md", b"x", None, &author).unwrap_err();
    assert!(matches!(err, Error::IO(_)));
    assert_eq!(writer.store().head().unwrap(), None);
}

#[test]
fn test_concurrent_saves_form_a_single_line() {
    let (_tempdir, writer) = test_writer();
    let threads: Vec<_> = (0..8)
        .map(|i| {
            let writer = writer.clone();
            std::thread::spawn(move || {
                let author = Author::new(format!("writer-{}", i));
                writer
                    .save(&format!("page-{}.md", i), b"body", None, &author)
                    .unwrap()
            })
        })
        .collect();
    let mut committed: Vec<ObjectId> = threads.into_iter().map(|t| t.join().unwrap()).collect();

    let mut walked: Vec<ObjectId> = writer
        .store()
        .history()
        .unwrap()
        .map(|r| r.unwrap().0)
        .collect();
    assert_eq!(walked.len(), 8);
    committed.sort();
    walked.sort();
    assert_eq!(committed, walked);
}

#[cfg(unix)]
#[test]
fn test_save_refuses_symlinked_paths() {
    use std::os::unix::fs::symlink;

    let (tempdir, writer) = test_writer();
    let outside = tempfile::tempdir().unwrap();
    symlink(outside.path(), tempdir.path().join("link")).unwrap();
    std::fs::write(outside.path().join("target.md"), b"outside").unwrap();
    symlink(outside.path().join("target.md"), tempdir.path().join("file.md")).unwrap();

    let author = Author::new("mallory");
    for path in ["link/x.md", "link/deeper/x.md", "file.md"] {
        assert!(
            matches!(writer.save(path, b"escaped", None, &author), Err(Error::InvalidPath(_))),
            "{:?}",
            path
        );
    }
    assert!(!outside.path().join("x.md").exists());
    assert!(!outside.path().join("deeper").exists());
    assert_eq!(std::fs::read(outside.path().join("target.md")).unwrap(), b"outside");
    assert_eq!(writer.store().head().unwrap(), None);
}

#[test]
fn test_commit_failure_keeps_disk_write_and_head() {
    let (tempdir, writer) = test_writer();
    let author = Author::new("alice");
    let h1 = writer.save("a.md", b"one", None, &author).unwrap();

    let objects = tempdir.path().join(".rev/objects");
    std::fs::remove_dir_all(&objects).unwrap();
    std::fs::write(&objects, b"not a directory").unwrap();

    let err = writer.save("a.md", b"two", None, &author).unwrap_err();
    assert!(matches!(err, Error::Commit(_)));
    assert_eq!(writer.store().head().unwrap(), Some(h1));
    assert_eq!(std::fs::read(tempdir.path().join("a.md")).unwrap(), b"two");
}

#[test]
fn test_separate_handles_on_one_root_stay_linear() {
    let tempdir = tempfile::tempdir().unwrap();
    RevisionStore::initialize(tempdir.path()).unwrap();
    let threads: Vec<_> = (0..6)
        .map(|i| {
            let root = tempdir.path().to_path_buf();
            std::thread::spawn(move || {
                let writer = WriteCoordinator::new(Arc::new(RevisionStore::open(root).unwrap()));
                writer
                    .save(&format!("page-{}.md", i), b"body", None, &Author::new("w"))
                    .unwrap()
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    let store = RevisionStore::open(tempdir.path()).unwrap();
    assert_eq!(store.history().unwrap().count(), 6);
    assert_eq!(store.list_current().unwrap().len(), 6);
}
