use std::{
    fmt::Display,
    path::{Path, PathBuf},
};

/// A validated, store relative page path made of plain `/` separated
/// segments. It cannot escape the store root.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PagePath {
    segments: Vec<String>,
}

impl PagePath {
    /// Parses `raw`, rejecting anything that is not a plain relative path:
    /// empty input, NUL bytes, backslashes, leading or doubled `/`,
    /// and `.` or `..` segments. The error carries the reason.
    pub fn parse(raw: &str) -> Result<Self, String> {
        if raw.is_empty() {
            return Err(String::from("page path is empty"));
        }
        if raw.contains('\0') {
            return Err(format!("{:?} contains a NUL byte", raw));
        }
        if raw.contains('\\') {
            return Err(format!("{:?} contains a backslash", raw));
        }
        if raw.starts_with('/') {
            return Err(format!("{:?} is absolute", raw));
        }
        let mut segments = Vec::new();
        for segment in raw.split('/') {
            match segment {
                "" => return Err(format!("{:?} has an empty segment", raw)),
                "." | ".." => {
                    return Err(format!("{:?} contains a {:?} segment", raw, segment))
                }
                _ => segments.push(segment.to_owned()),
            }
        }
        Ok(PagePath { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// The on-disk location of this page under `root`.
    pub fn under(&self, root: &Path) -> PathBuf {
        let mut path = root.to_path_buf();
        path.extend(&self.segments);
        path
    }
}

impl Display for PagePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.segments.join("/"))
    }
}

#[test]
fn test_parse_accepts_nested_pages() {
    let page = PagePath::parse("notes/2024/a.md").unwrap();
    assert_eq!(page.segments(), ["notes", "2024", "a.md"]);
    assert_eq!(page.to_string(), "notes/2024/a.md");
    assert_eq!(
        page.under(Path::new("/srv/wiki")),
        PathBuf::from("/srv/wiki/notes/2024/a.md")
    );
}

#[test]
fn test_parse_rejects_escapes() {
    for raw in [
        "",
        "/etc/passwd",
        "../a.md",
        "a/../../b.md",
        "./a.md",
        "a//b.md",
        "a/",
        "a\\b.md",
        "a\0.md",
    ] {
        assert!(PagePath::parse(raw).is_err(), "{:?} should be rejected", raw);
    }
}
