use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::object_id::ObjectId;

/// Email recorded for authors who only supply a display name.
pub const DEFAULT_EMAIL: &str = "pagestore@localhost";

/// Who made a revision.
#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    pub email: String,
}

impl Author {
    /// An author with the [`DEFAULT_EMAIL`].
    pub fn new(name: impl Into<String>) -> Self {
        Author {
            name: name.into(),
            email: String::from(DEFAULT_EMAIL),
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = email.into();
        self
    }
}

impl Display for Author {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} <{}>", self.name, self.email)
    }
}

/// A particular revision of the whole page store.
///
/// Its identifier is the [`ObjectId`] of its JSON encoding, so it can never
/// change once written.
#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub struct Revision {
    /// The message added with the commit.
    pub message: String,
    /// The [`ObjectId`] of the directory structure.
    pub directory: ObjectId,
    /// The previous [`Revision`]'s [`ObjectId`], absent for the first one.
    /// History is a single line, so there is never more than one.
    pub parent: Option<ObjectId>,
    pub author: Author,
    pub timestamp: DateTime<Utc>,
}

#[test]
fn test_author_display() {
    let author = Author::new("alice");
    assert_eq!(author.to_string(), "alice <pagestore@localhost>");
    let author = author.with_email("alice@example.org");
    assert_eq!(author.to_string(), "alice <alice@example.org>");
}

#[test]
fn test_root_revision_json_has_null_parent() {
    let revision = Revision {
        message: String::from("init"),
        directory: ObjectId::from(b"{}".as_slice()),
        parent: None,
        author: Author::new("alice"),
        timestamp: Utc::now(),
    };
    let json = serde_json::to_value(&revision).unwrap();
    assert!(json["parent"].is_null());
    let revision_: Revision = serde_json::from_value(json).unwrap();
    assert_eq!(revision, revision_);
}
