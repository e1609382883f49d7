//! Request-relative resource paths.
//!
//! A `DavPath` is the decoded path of a resource relative to the share
//! root: a sequence of segments joined by `/`, never starting with a
//! slash and never containing `.` or `..`. The empty path is the root
//! collection itself.

use std::path::PathBuf;

use percent_encoding as pct;

use crate::errors::DavError;

// Encode all non-unreserved characters, except '/'.
// See RFC3986, and https://en.wikipedia.org/wiki/Percent-encoding .
const PATH_ENCODE_SET: &pct::AsciiSet = &pct::NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct DavPath {
    rel: String,
}

impl std::fmt::Display for DavPath {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "/{}", self.rel)
    }
}

impl std::fmt::Debug for DavPath {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", &self.rel)
    }
}

// Normalize an URL-encoded absolute path into relative segments:
// - merge consecutive slashes, drop "." segments
// - ".." pops a segment, going above the root is an error
// - decode percent escapes, fail on invalid encodings
// - no NUL, '/' or invalid utf-8 inside a decoded segment
fn normalize_path(rawpath: &str) -> Result<Vec<String>, DavError> {
    let mut rawpath = rawpath.as_bytes();
    if let Some(pos) = rawpath.iter().position(|&x| x == b'?' || x == b'#') {
        if rawpath[pos] == b'#' {
            return Err(DavError::InvalidPath);
        }
        rawpath = &rawpath[..pos];
    }
    if rawpath.is_empty() || rawpath[0] != b'/' {
        return Err(DavError::InvalidPath);
    }

    let mut segs: Vec<String> = Vec::new();
    for segment in rawpath.split(|&c| c == b'/') {
        match segment {
            b"" | b"." => {}
            b".." => {
                if segs.pop().is_none() {
                    return Err(DavError::ForbiddenPath);
                }
            }
            s => {
                let decoded: Vec<u8> = pct::percent_decode(s).collect();
                if decoded.iter().any(|&x| x == 0 || x == b'/') {
                    return Err(DavError::InvalidPath);
                }
                let seg = String::from_utf8(decoded).map_err(|_| DavError::InvalidPath)?;
                segs.push(seg);
            }
        }
    }
    Ok(segs)
}

impl DavPath {
    /// The root collection.
    pub fn root() -> DavPath {
        DavPath { rel: String::new() }
    }

    /// From an URL-encoded absolute request path, stripping `prefix`.
    pub fn from_request_path(path: &str, prefix: &str) -> Result<DavPath, DavError> {
        let stripped = match path.strip_prefix(prefix) {
            Some(rest) if prefix.is_empty() || rest.is_empty() || rest.starts_with('/') => {
                if rest.is_empty() { "/" } else { rest }
            }
            _ => return Err(DavError::IllegalPath),
        };
        let segs = normalize_path(stripped)?;
        Ok(DavPath {
            rel: segs.join("/"),
        })
    }

    /// From an already-decoded relative path ("" is the root).
    pub(crate) fn from_rel(rel: impl Into<String>) -> DavPath {
        let rel = rel.into();
        debug_assert!(!rel.starts_with('/'));
        DavPath { rel }
    }

    /// The relative path as stored in the lock table: "" or "a/b/c".
    pub fn as_rel_str(&self) -> &str {
        &self.rel
    }

    pub fn is_root(&self) -> bool {
        self.rel.is_empty()
    }

    /// Parent collection; `None` for the root.
    pub fn parent(&self) -> Option<DavPath> {
        if self.is_root() {
            return None;
        }
        let rel = match self.rel.rfind('/') {
            Some(pos) => self.rel[..pos].to_string(),
            None => String::new(),
        };
        Some(DavPath { rel })
    }

    /// All ancestor collections, nearest first, ending with the root.
    pub(crate) fn ancestors(&self) -> Vec<DavPath> {
        let mut v = Vec::new();
        let mut cur = self.clone();
        while let Some(p) = cur.parent() {
            v.push(p.clone());
            cur = p;
        }
        v
    }

    /// Append one segment.
    pub(crate) fn join(&self, segment: &str) -> DavPath {
        let mut rel = self.rel.clone();
        if !rel.is_empty() {
            rel.push('/');
        }
        rel.push_str(segment);
        DavPath { rel }
    }

    /// Is `self` equal to or located below `other`.
    pub(crate) fn is_within(&self, other: &DavPath) -> bool {
        if other.is_root() {
            return true;
        }
        self.rel == other.rel
            || (self.rel.len() > other.rel.len()
                && self.rel.starts_with(&other.rel)
                && self.rel.as_bytes()[other.rel.len()] == b'/')
    }

    /// The last segment, if any.
    pub fn file_name(&self) -> Option<&str> {
        if self.is_root() {
            None
        } else {
            Some(match self.rel.rfind('/') {
                Some(pos) => &self.rel[pos + 1..],
                None => &self.rel,
            })
        }
    }

    /// The real filesystem path under `root`.
    pub(crate) fn real_path(&self, root: &std::path::Path) -> PathBuf {
        let mut p = root.to_path_buf();
        if !self.is_root() {
            p.push(&self.rel);
        }
        p
    }

    /// URL-encoded path relative to the share root, no leading slash.
    pub(crate) fn as_url_rel(&self) -> String {
        pct::percent_encode(self.rel.as_bytes(), PATH_ENCODE_SET).to_string()
    }

    pub(crate) fn mime_type_str(&self) -> &'static str {
        if let Some(name) = self.file_name() {
            if let Some((_, ext)) = name.rsplit_once('.') {
                if let Some(t) = mime_guess::from_ext(ext).first_raw() {
                    return t;
                }
            }
        }
        "application/octet-stream"
    }
}
