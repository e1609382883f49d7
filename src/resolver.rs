//! Translation of request-relative paths to real filesystem paths,
//! with containment, deny-list and mode-bit checks.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use http::StatusCode;
use log::trace;
use unicode_normalization::UnicodeNormalization;

use crate::davpath::DavPath;
use crate::errors::{DavError, DavResult};

/// Unicode normalization applied to resolved paths.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnicodeForm {
    Nfc,
    Nfd,
    Nfkc,
    Nfkd,
}

/// One entry of a deny list: a shell glob matched against every path
/// component, or a callback over the whole real path.
#[derive(Clone)]
pub enum Restriction {
    Pattern(regex::Regex),
    Callback(Arc<dyn Fn(&Path) -> bool + Send + Sync>),
}

impl std::fmt::Debug for Restriction {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Restriction::Pattern(re) => write!(f, "Pattern({})", re.as_str()),
            Restriction::Callback(_) => write!(f, "Callback(..)"),
        }
    }
}

fn matches_restrictions(real: &Path, restrictions: &[Restriction]) -> bool {
    for r in restrictions {
        match r {
            Restriction::Callback(f) => {
                if f(real) {
                    return true;
                }
            }
            Restriction::Pattern(re) => {
                for comp in real.components() {
                    if let Component::Normal(seg) = comp {
                        if re.is_match(&seg.to_string_lossy()) {
                            return true;
                        }
                    }
                }
            }
        }
    }
    false
}

// os.access()-style mode-bit check for the server process.
#[cfg(unix)]
fn fs_access(path: &Path, write: bool) -> bool {
    use std::os::unix::ffi::OsStrExt;
    let Ok(cpath) = std::ffi::CString::new(path.as_os_str().as_bytes()) else {
        return false;
    };
    let mode = if write { libc::W_OK } else { libc::R_OK };
    unsafe { libc::access(cpath.as_ptr(), mode) == 0 }
}

#[cfg(not(unix))]
fn fs_access(path: &Path, write: bool) -> bool {
    match std::fs::metadata(path) {
        Ok(meta) => !(write && meta.permissions().readonly()),
        Err(_) => false,
    }
}

#[derive(Debug)]
pub(crate) struct PathResolver {
    root: PathBuf,
    normalize: Option<UnicodeForm>,
    restrict_access: Vec<Restriction>,
    restrict_write: Vec<Restriction>,
}

impl PathResolver {
    pub fn new(
        root: PathBuf,
        normalize: Option<UnicodeForm>,
        restrict_access: Vec<Restriction>,
        restrict_write: Vec<Restriction>,
    ) -> PathResolver {
        PathResolver {
            root,
            normalize,
            restrict_access,
            restrict_write,
        }
    }

    /// Map a request-relative path onto the filesystem. The result is
    /// always a descendant of the root; `DavPath` construction already
    /// rejected `.`/`..`, this re-verifies the invariant.
    pub fn resolve(&self, rel: &DavPath) -> DavResult<PathBuf> {
        let real = match self.normalize {
            None => rel.real_path(&self.root),
            Some(form) => {
                let s = rel.as_rel_str();
                let normalized: String = match form {
                    UnicodeForm::Nfc => s.nfc().collect(),
                    UnicodeForm::Nfd => s.nfd().collect(),
                    UnicodeForm::Nfkc => s.nfkc().collect(),
                    UnicodeForm::Nfkd => s.nfkd().collect(),
                };
                DavPath::from_rel(normalized).real_path(&self.root)
            }
        };
        if !self.contains(&real) {
            trace!("resolve: {:?} escapes root", real);
            return Err(DavError::Status(StatusCode::FORBIDDEN));
        }
        Ok(real)
    }

    fn contains(&self, real: &Path) -> bool {
        let mut root = self.root.components();
        let mut path = real.components();
        loop {
            match (root.next(), path.next()) {
                (None, _) => return true,
                (Some(a), Some(b)) if a == b => {}
                _ => return false,
            }
        }
    }

    /// The path may be read: not denied, present, readable.
    pub fn check_read(&self, real: &Path) -> DavResult<()> {
        if !self.contains(real) || matches_restrictions(real, &self.restrict_access) {
            return Err(DavError::Status(StatusCode::FORBIDDEN));
        }
        if !real.exists() {
            return Err(DavError::Status(StatusCode::NOT_FOUND));
        }
        if !fs_access(real, false) {
            return Err(DavError::Status(StatusCode::FORBIDDEN));
        }
        Ok(())
    }

    /// The path may be written, or created if absent (then the parent
    /// must be a writable directory; a non-directory parent is 409).
    /// Lock verification is the caller's job.
    pub fn check_write(&self, real: &Path) -> DavResult<()> {
        if !self.contains(real)
            || matches_restrictions(real, &self.restrict_access)
            || matches_restrictions(real, &self.restrict_write)
        {
            return Err(DavError::Status(StatusCode::FORBIDDEN));
        }
        if !real.exists() {
            let parent = real.parent().unwrap_or(&self.root);
            if !parent.is_dir() {
                return Err(DavError::Status(StatusCode::CONFLICT));
            }
            if !fs_access(parent, true) {
                return Err(DavError::Status(StatusCode::FORBIDDEN));
            }
        } else if !fs_access(real, true) {
            return Err(DavError::Status(StatusCode::FORBIDDEN));
        }
        Ok(())
    }
}
