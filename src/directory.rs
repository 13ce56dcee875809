use std::{
    collections::{BTreeMap, BTreeSet},
    fs::read_dir,
    path::Path,
};

use serde::{Deserialize, Serialize};

use crate::{object_id::ObjectId, object_store::ObjectStore, page::PagePath, revision_store::Error};

/// A data structure representing a directory structure with
/// names of files pointing to the [`ObjectId`] of their contents.
///
/// A whole working directory is captured in one value, so a revision's
/// tree reflects everything on disk at commit time.
#[derive(PartialEq, Eq, Debug, Clone, Default, Serialize, Deserialize)]
pub struct Directory {
    pub root: BTreeMap<String, DirectoryEntry>,
}

/// Entry names skipped when snapshotting and refused as page path segments.
#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub struct Ignores {
    set: BTreeSet<String>,
}

#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub enum DirectoryEntry {
    Directory(Box<Directory>),
    File(ObjectId),
}

impl Ignores {
    /// Ignores that always contain `reserved`, plus any `extra` names.
    pub fn new<I: IntoIterator<Item = String>>(reserved: &str, extra: I) -> Self {
        let mut set: BTreeSet<String> = extra.into_iter().collect();
        set.insert(reserved.to_owned());
        Ignores { set }
    }

    /// Matches ignoring ASCII case, so `.REV` cannot alias `.rev` on
    /// case-insensitive filesystems.
    pub fn contains(&self, name: &str) -> bool {
        self.set.iter().any(|ignored| ignored.eq_ignore_ascii_case(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.set.iter().map(String::as_str)
    }
}

impl Directory {
    /// Walks `dir`, inserting every file's contents into `store` as a blob.
    pub fn new<S: ObjectStore>(dir: &Path, ignores: &Ignores, store: &mut S) -> Result<Self, Error> {
        let mut root = BTreeMap::new();
        for f in read_dir(dir)? {
            let dir_entry = f?;
            let name = match dir_entry.file_name().into_string() {
                Ok(name) => name,
                Err(name) => {
                    log::warn!("skipping non UTF-8 entry {:?} in {:?}", name, dir);
                    continue;
                }
            };
            if ignores.contains(&name) {
                continue;
            }
            let file_type = dir_entry.file_type()?;
            if file_type.is_dir() {
                let directory = Directory::new(dir_entry.path().as_path(), ignores, store)?;
                root.insert(name, DirectoryEntry::Directory(Box::new(directory)));
            } else if file_type.is_file() {
                let bytes = std::fs::read(dir_entry.path())?;
                let id = store.insert(&bytes).map_err(Into::<Error>::into)?;
                root.insert(name, DirectoryEntry::File(id));
            } else {
                log::warn!("skipping {:?}: not a regular file or directory", dir_entry.path());
            }
        }
        Ok(Directory { root })
    }

    /// The blob holding `page`, or `None` if no file exists at that path.
    pub fn lookup(&self, page: &PagePath) -> Option<ObjectId> {
        let (file, dirs) = page.segments().split_last()?;
        let mut directory = self;
        for name in dirs {
            match directory.root.get(name)? {
                DirectoryEntry::Directory(sub) => directory = sub,
                DirectoryEntry::File(_) => return None,
            }
        }
        match directory.root.get(file)? {
            DirectoryEntry::File(id) => Some(*id),
            DirectoryEntry::Directory(_) => None,
        }
    }

    /// Every file path in this tree, in sorted order.
    pub fn files(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_files("", &mut out);
        out
    }

    fn collect_files(&self, prefix: &str, out: &mut Vec<String>) {
        for (name, entry) in &self.root {
            let path = format!("{}{}", prefix, name);
            match entry {
                DirectoryEntry::File(_) => out.push(path),
                DirectoryEntry::Directory(sub) => sub.collect_files(&format!("{}/", path), out),
            }
        }
    }
}

#[test]
fn test_directory_snapshot_and_lookup() {
    use crate::object_store::directory::DirectoryObjectStore;

    let work = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(work.path().join("notes/deep")).unwrap();
    std::fs::create_dir_all(work.path().join(".rev")).unwrap();
    std::fs::write(work.path().join("a.md"), b"hello").unwrap();
    std::fs::write(work.path().join("notes/deep/b.md"), b"nested").unwrap();
    std::fs::write(work.path().join(".rev/HEAD"), b"null").unwrap();

    let objects = tempfile::tempdir().unwrap();
    let mut store = DirectoryObjectStore::new(objects.path().into()).unwrap();
    let ignores = Ignores::new(".rev", Vec::new());
    let directory = Directory::new(work.path(), &ignores, &mut store).unwrap();

    assert_eq!(directory.files(), ["a.md", "notes/deep/b.md"]);
    let a = directory.lookup(&PagePath::parse("a.md").unwrap()).unwrap();
    assert_eq!(store.read(a).unwrap(), Some(b"hello".to_vec()));
    let b = directory.lookup(&PagePath::parse("notes/deep/b.md").unwrap()).unwrap();
    assert_eq!(store.read(b).unwrap(), Some(b"nested".to_vec()));

    assert_eq!(directory.lookup(&PagePath::parse("notes").unwrap()), None);
    assert_eq!(directory.lookup(&PagePath::parse("a.md/x").unwrap()), None);
    assert_eq!(directory.lookup(&PagePath::parse("missing.md").unwrap()), None);
    assert_eq!(directory.lookup(&PagePath::parse(".rev/HEAD").unwrap()), None);
}

#[test]
fn test_unchanged_content_shares_blobs() {
    use crate::object_store::in_memory::InMemoryObjectStore;

    let work = tempfile::tempdir().unwrap();
    std::fs::write(work.path().join("x.md"), b"same").unwrap();
    std::fs::write(work.path().join("y.md"), b"same").unwrap();

    let mut store = InMemoryObjectStore::new();
    let ignores = Ignores::new(".rev", Vec::new());
    let first = Directory::new(work.path(), &ignores, &mut store).unwrap();
    let second = Directory::new(work.path(), &ignores, &mut store).unwrap();

    assert_eq!(store.len(), 1);
    assert_eq!(first, second);
    assert_eq!(
        first.lookup(&PagePath::parse("x.md").unwrap()),
        first.lookup(&PagePath::parse("y.md").unwrap())
    );
}

#[test]
fn test_ignores_match_any_case() {
    let ignores = Ignores::new(".rev", vec![String::from("Drafts")]);
    assert!(ignores.contains(".rev"));
    assert!(ignores.contains(".REV"));
    assert!(ignores.contains("drafts"));
    assert!(!ignores.contains("rev"));
}
