use std::{ops::RangeInclusive, sync::Arc};

use crate::{
    object_id::{ObjectId, OBJECT_ID_HEX_LEN},
    revision::Revision,
    revision_store::{Error, RevisionStore},
};

/// Accepted lengths of a version prefix.
pub const VERSION_PREFIX_LEN: RangeInclusive<usize> = 4..=OBJECT_ID_HEX_LEN;

/// Reads pages as they were at a past revision named by an id prefix.
#[derive(Debug, Clone)]
pub struct VersionResolver {
    store: Arc<RevisionStore>,
}

impl VersionResolver {
    pub fn new(store: Arc<RevisionStore>) -> Self {
        Self { store }
    }

    /// Contents of `path` at the newest revision whose id starts with
    /// `version`.
    ///
    /// The prefix must be 4 to 40 characters and is compared case-sensitively
    /// against lowercase hex ids. History is walked from head through single
    /// parents, so recent versions are found first.
    pub fn resolve(&self, path: &str, version: &str) -> Result<Vec<u8>, Error> {
        check_version_len(version)?;
        let page = self.store.page_path(path)?;
        let (id, revision) = self.resolve_revision(version)?;
        log::info!("version {} of {} resolved to {}", version, page, id);
        match self.store.read_path(&revision, &page)? {
            Some(content) => Ok(content),
            None => Err(Error::PathNotFoundAtRevision {
                path: page.to_string(),
                revision: id,
            }),
        }
    }

    /// The newest revision whose id starts with `version`.
    pub fn resolve_revision(&self, version: &str) -> Result<(ObjectId, Revision), Error> {
        check_version_len(version)?;
        for entry in self.store.history()? {
            let (id, revision) = entry?;
            if id.has_prefix(version) {
                return Ok((id, revision));
            }
        }
        Err(Error::VersionNotFound(version.to_owned()))
    }

    /// Page paths recorded at the revision named by `version`.
    pub fn list(&self, version: &str) -> Result<Vec<String>, Error> {
        let (_, revision) = self.resolve_revision(version)?;
        self.store.list_pages(&revision)
    }
}

fn check_version_len(version: &str) -> Result<(), Error> {
    if VERSION_PREFIX_LEN.contains(&version.len()) {
        Ok(())
    } else {
        Err(Error::InvalidVersionLength(version.len()))
    }
}

#[cfg(test)]
fn test_pair() -> (
    tempfile::TempDir,
    crate::write::WriteCoordinator,
    VersionResolver,
) {
    use crate::write::WriteCoordinator;

    let tempdir = tempfile::tempdir().unwrap();
    let store = Arc::new(RevisionStore::initialize(tempdir.path()).unwrap());
    (
        tempdir,
        WriteCoordinator::new(store.clone()),
        VersionResolver::new(store),
    )
}

#[test]
fn test_hello_world_scenario() {
    use crate::revision::Author;

    let (_tempdir, writer, resolver) = test_pair();
    let store = writer.store();
    let h1 = writer
        .save("a.md", b"hello", Some("init"), &Author::new("alice"))
        .unwrap();
    let h2 = writer
        .save("a.md", b"world", Some("update"), &Author::new("bob"))
        .unwrap();
    assert_eq!(store.lookup_revision(h2).unwrap().parent, Some(h1));

    let h1_hex = h1.to_string();
    assert_eq!(resolver.resolve("a.md", &h1_hex[..4]).unwrap(), b"hello");
    let page = store.page_path("a.md").unwrap();
    assert_eq!(store.read_current(&page).unwrap(), Some(b"world".to_vec()));
    assert!(matches!(
        resolver.resolve("a.md", "zzzz"),
        Err(Error::VersionNotFound(v)) if v == "zzzz"
    ));
}

#[test]
fn test_every_prefix_length_resolves() {
    use crate::revision::Author;

    let (_tempdir, writer, resolver) = test_pair();
    let author = Author::new("alice");
    let bodies = ["one", "two", "three"];
    let ids: Vec<_> = bodies
        .iter()
        .map(|body| writer.save("p.md", body.as_bytes(), None, &author).unwrap())
        .collect();

    for id in &ids {
        let hex = id.to_string();
        for len in VERSION_PREFIX_LEN {
            // Short prefixes may also match a newer revision, which then wins.
            let newest = ids.iter().rposition(|id| id.has_prefix(&hex[..len])).unwrap();
            assert_eq!(
                resolver.resolve("p.md", &hex[..len]).unwrap(),
                bodies[newest].as_bytes()
            );
        }
    }
}

#[test]
fn test_prefix_length_checked_before_walk() {
    use crate::revision::Author;

    let (_tempdir, writer, resolver) = test_pair();
    let id = writer.save("a.md", b"x", None, &Author::new("alice")).unwrap();
    let hex = id.to_string();

    let too_long = format!("{}0", hex);
    for version in [&hex[..0], &hex[..3], too_long.as_str()] {
        assert!(matches!(
            resolver.resolve("a.md", version),
            Err(Error::InvalidVersionLength(len)) if len == version.len()
        ));
    }
    // The length check wins even over a bad path.
    assert!(matches!(
        resolver.resolve("../a.md", "ab"),
        Err(Error::InvalidVersionLength(2))
    ));
}

#[test]
fn test_page_missing_at_matching_revision() {
    use crate::revision::Author;

    let (_tempdir, writer, resolver) = test_pair();
    let author = Author::new("alice");
    let h1 = writer.save("a.md", b"first", None, &author).unwrap();
    writer.save("b.md", b"later", None, &author).unwrap();

    let err = resolver.resolve("b.md", &h1.to_string()[..8]).unwrap_err();
    assert!(matches!(
        err,
        Error::PathNotFoundAtRevision { ref path, revision } if path == "b.md" && revision == h1
    ));
}

#[test]
fn test_empty_history_has_no_versions() {
    let (_tempdir, _writer, resolver) = test_pair();
    assert!(matches!(
        resolver.resolve("a.md", "abcd"),
        Err(Error::VersionNotFound(_))
    ));
}

#[test]
fn test_prefix_is_case_sensitive() {
    use crate::revision::Author;

    let (_tempdir, writer, resolver) = test_pair();
    let id = writer.save("a.md", b"x", None, &Author::new("alice")).unwrap();
    let upper = id.to_string().to_uppercase();
    if upper != id.to_string() {
        assert!(matches!(
            resolver.resolve("a.md", &upper),
            Err(Error::VersionNotFound(_))
        ));
    }
}

#[test]
fn test_list_at_version() {
    use crate::revision::Author;

    let (_tempdir, writer, resolver) = test_pair();
    let author = Author::new("alice");
    let h1 = writer.save("a.md", b"first", None, &author).unwrap();
    writer.save("notes/b.md", b"later", None, &author).unwrap();

    assert_eq!(resolver.list(&h1.to_string()[..6]).unwrap(), ["a.md"]);
    assert_eq!(writer.store().list_current().unwrap(), ["a.md", "notes/b.md"]);
    assert!(matches!(resolver.list("abc"), Err(Error::InvalidVersionLength(3))));
    assert!(matches!(resolver.list("zzzz"), Err(Error::VersionNotFound(_))));
}

#[cfg(test)]
mod properties {
    use proptest::prelude::*;

    use super::*;
    use crate::revision::Author;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn saved_content_reads_back(
            path in "[a-z]{1,8}(/[a-z]{1,8}){0,2}\\.md",
            content in proptest::collection::vec(any::<u8>(), 0..256),
        ) {
            let (_tempdir, writer, _resolver) = test_pair();
            writer.save(&path, &content, None, &Author::new("prop")).unwrap();
            let store = writer.store();
            let page = store.page_path(&path).unwrap();
            prop_assert_eq!(store.read_current(&page).unwrap(), Some(content));
        }

        #[test]
        fn any_prefix_finds_its_revision(
            bodies in proptest::collection::vec("[a-z ]{0,32}", 1..5),
            pick in any::<prop::sample::Index>(),
            len in VERSION_PREFIX_LEN,
        ) {
            let (_tempdir, writer, resolver) = test_pair();
            let author = Author::new("prop");
            let ids: Vec<_> = bodies
                .iter()
                .map(|body| writer.save("p.md", body.as_bytes(), None, &author).unwrap())
                .collect();
            let hex = ids[pick.index(ids.len())].to_string();
            let newest = ids.iter().rposition(|id| id.has_prefix(&hex[..len])).unwrap();
            prop_assert_eq!(resolver.resolve("p.md", &hex[..len]).unwrap(), bodies[newest].as_bytes());
        }
    }
}
