// path.rs — Path: an ordered list of segments addressing the document tree.
//
// Two textual forms exist:
//   - slash form `/a/b` used by storage APIs and bundle roots
//   - dotted form `a.b` used by data plugin configuration keys
// Both parse into the same segment list. Comparisons are segment-wise, so
// `/ab` is NOT a prefix of `/abc`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// A location in the document tree. The empty path is the root.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Path {
    segments: Vec<String>,
}

impl Path {
    /// The root path (no segments).
    pub fn root() -> Self {
        Self::default()
    }

    /// Build a path from segments. Empty segments and segments containing
    /// `/` are rejected, so the slash form always parses back to the same
    /// path.
    pub fn new<I, S>(segments: I) -> Result<Self, StoreError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        let reason = if segments.iter().any(|s| s.is_empty()) {
            "path segments must be non-empty"
        } else if segments.iter().any(|s| s.contains('/')) {
            "path segments must not contain '/'"
        } else {
            return Ok(Self { segments });
        };
        Err(StoreError::InvalidPath {
            path: segments.join("/"),
            reason: reason.to_string(),
        })
    }

    /// Parse the slash form. `""` and `"/"` denote the root; a single
    /// trailing slash is tolerated.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        let trimmed = s.strip_prefix('/').unwrap_or(s);
        let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
        if trimmed.is_empty() {
            return Ok(Self::root());
        }
        Self::new(trimmed.split('/')).map_err(|_| StoreError::InvalidPath {
            path: s.to_string(),
            reason: "empty segment".to_string(),
        })
    }

    /// Parse the dotted form used in configuration keys (`kafka.updates`).
    /// The empty string is rejected: a plugin may never claim the root.
    pub fn from_dotted(s: &str) -> Result<Self, StoreError> {
        if s.is_empty() {
            return Err(StoreError::InvalidPath {
                path: s.to_string(),
                reason: "path must not be empty".to_string(),
            });
        }
        Self::new(s.split('.')).map_err(|e| match e {
            StoreError::InvalidPath { reason, .. } => StoreError::InvalidPath {
                path: s.to_string(),
                reason,
            },
            other => other,
        })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// True when `prefix`'s segments are a leading subsequence of ours.
    /// Every path has the root as a prefix, and every path is a prefix of itself.
    pub fn has_prefix(&self, prefix: &Path) -> bool {
        self.segments.starts_with(&prefix.segments)
    }

    /// True when either path is a prefix of the other (including equality).
    pub fn overlaps(&self, other: &Path) -> bool {
        self.has_prefix(other) || other.has_prefix(self)
    }

    /// The parent path, or `None` for the root.
    pub fn parent(&self) -> Option<Path> {
        if self.segments.is_empty() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Last segment, or `None` for the root.
    pub fn last(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// A new path with `segment` appended.
    pub fn child(&self, segment: impl Into<String>) -> Result<Path, StoreError> {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self::new(segments)
    }

    /// The first `len` segments of this path.
    pub(crate) fn prefix(&self, len: usize) -> Path {
        Self {
            segments: self.segments[..len.min(self.segments.len())].to_vec(),
        }
    }

    /// Concatenate two paths.
    pub fn join(&self, other: &Path) -> Path {
        let mut segments = self.segments.clone();
        segments.extend(other.segments.iter().cloned());
        Self { segments }
    }

    /// Render in dotted form (`a.b`), the way configuration keys are written.
    pub fn to_dotted(&self) -> String {
        self.segments.join(".")
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return write!(f, "/");
        }
        for segment in &self.segments {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}

impl TryFrom<String> for Path {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Path::parse(&value)
    }
}

impl From<Path> for String {
    fn from(path: Path) -> Self {
        path.to_string()
    }
}

impl std::str::FromStr for Path {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Path::parse(s)
    }
}

/// Build a path from string literals. Panics on empty segments, so it is
/// meant for constants and tests.
#[macro_export]
macro_rules! path {
    () => {
        $crate::Path::root()
    };
    ($($seg:expr),+ $(,)?) => {
        $crate::Path::new([$($seg),+]).expect("path! segments must be non-empty and slash-free")
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_slash_form() {
        let p = Path::parse("/a/b/c").unwrap();
        assert_eq!(p.segments(), &["a", "b", "c"]);
        assert_eq!(p.to_string(), "/a/b/c");
        assert!(Path::parse("/").unwrap().is_root());
        assert!(Path::parse("").unwrap().is_root());
        assert_eq!(Path::parse("a/b/").unwrap().len(), 2);
    }

    #[test]
    fn parse_rejects_empty_segments() {
        assert!(Path::parse("/a//b").is_err());
        assert!(Path::from_dotted("a..b").is_err());
        assert!(Path::from_dotted("").is_err());
        assert!(Path::from_dotted(".a").is_err());
    }

    #[test]
    fn slash_inside_segment_is_rejected() {
        let err = Path::from_dotted("a/b.c").unwrap_err();
        assert!(matches!(
            err,
            StoreError::InvalidPath { ref path, ref reason } if path == "a/b.c" && reason.contains('/')
        ));
        assert!(Path::new(["a", "b/c"]).is_err());
        assert!(path!["a"].child("x/y").is_err());

        // Every accepted path survives the trip through its slash form.
        let p = Path::from_dotted("kafka.updates").unwrap();
        let back: Path = serde_json::from_value(serde_json::to_value(&p).unwrap()).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn dotted_form_matches_slash_form() {
        assert_eq!(
            Path::from_dotted("kafka.updates").unwrap(),
            Path::parse("/kafka/updates").unwrap()
        );
    }

    #[test]
    fn prefix_is_segment_wise() {
        let abc = Path::parse("/ab/c").unwrap();
        let ab = Path::parse("/ab").unwrap();
        let a = Path::parse("/a").unwrap();
        assert!(abc.has_prefix(&ab));
        assert!(!abc.has_prefix(&a));
        assert!(abc.has_prefix(&Path::root()));
        assert!(ab.has_prefix(&ab));
    }

    #[test]
    fn overlap_is_symmetric() {
        let kafka = Path::from_dotted("kafka").unwrap();
        let updates = Path::from_dotted("kafka.updates").unwrap();
        let downdates = Path::from_dotted("kafka.downdates").unwrap();
        assert!(kafka.overlaps(&updates));
        assert!(updates.overlaps(&kafka));
        assert!(!updates.overlaps(&downdates));
        assert!(updates.overlaps(&updates));
    }

    #[test]
    fn parent_and_child() {
        let p = path!["a", "b"];
        assert_eq!(p.parent(), Some(path!["a"]));
        assert_eq!(path!["a"].parent(), Some(Path::root()));
        assert_eq!(Path::root().parent(), None);
        assert_eq!(p.child("c").unwrap(), path!["a", "b", "c"]);
        assert!(p.child("").is_err());
    }

    #[test]
    fn serde_uses_slash_form() {
        let p = path!["x", "y"];
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, "\"/x/y\"");
        let back: Path = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }
}
