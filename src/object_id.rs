use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

/// Number of bytes in an [`ObjectId`].
pub const OBJECT_ID_LEN: usize = 20;

/// Number of hexadecimal characters in a rendered [`ObjectId`].
pub const OBJECT_ID_HEX_LEN: usize = OBJECT_ID_LEN * 2;

/// An identifier for a particular piece of binary content.
/// Under the hood, this is the first 20 bytes of the [`blake3`]
/// extendable output for the content.
///
/// It is displayed in hexadecimal format, 40 characters long.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId([u8; OBJECT_ID_LEN]);

impl ObjectId {
    pub fn as_bytes(&self) -> &[u8; OBJECT_ID_LEN] {
        &self.0
    }

    /// Whether the hexadecimal rendering of this id begins with `prefix`.
    /// The comparison is case-sensitive.
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.to_string().starts_with(prefix)
    }
}

impl Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for ObjectId {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; OBJECT_ID_LEN];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(ObjectId(bytes))
    }
}

impl From<&[u8]> for ObjectId {
    fn from(bytes: &[u8]) -> Self {
        let mut out = [0u8; OBJECT_ID_LEN];
        let mut hasher = blake3::Hasher::new();
        hasher.update(bytes);
        hasher.finalize_xof().fill(&mut out);
        ObjectId(out)
    }
}

impl From<&Vec<u8>> for ObjectId {
    fn from(vec: &Vec<u8>) -> Self {
        ObjectId::from(vec.as_slice())
    }
}

impl Serialize for ObjectId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_string().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s: String = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[test]
fn test_display_is_forty_lowercase_hex() {
    let id = ObjectId::from(b"hello, world".as_slice());
    let s = id.to_string();
    assert_eq!(s.len(), OBJECT_ID_HEX_LEN);
    assert!(s.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')));
}

#[test]
fn test_same_content_same_id() {
    let a = ObjectId::from(b"same".as_slice());
    let b = ObjectId::from(&b"same".to_vec());
    assert_eq!(a, b);
    assert_ne!(a, ObjectId::from(b"other".as_slice()));
}

#[test]
fn test_parse_rejects_bad_input() {
    let id = ObjectId::from(b"x".as_slice());
    assert_eq!(id.to_string().parse::<ObjectId>().unwrap(), id);
    assert!("abcd".parse::<ObjectId>().is_err());
    assert!("zz".repeat(20).parse::<ObjectId>().is_err());
}

#[test]
fn test_json_is_hex_string() {
    let id = ObjectId::from(b"x".as_slice());
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, format!("\"{}\"", id));
    let id_: ObjectId = serde_json::from_str(&json).unwrap();
    assert_eq!(id, id_);
    assert!(serde_json::from_str::<ObjectId>("\"nothex\"").is_err());
}

#[test]
fn test_has_prefix() {
    let id = ObjectId::from(b"x".as_slice());
    let s = id.to_string();
    assert!(id.has_prefix(&s[..4]));
    assert!(id.has_prefix(&s));
    assert!(!id.has_prefix("zzzz"));
}
