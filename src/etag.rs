//! Entity tags derived from a file's mutation-observable state.

use std::fs::Metadata;
use std::time::UNIX_EPOCH;

/// Compute the entity tag for a file: the quoted string
/// `"<mtime>S<size>"`. Two files carry the same tag iff their
/// modification time and size are equal. Tags never contain commas.
pub(crate) fn make(meta: &Metadata) -> String {
    let mtime = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("\"{}S{}\"", mtime, meta.len())
}

/// Compare an etag against a comma-separated list or `*`.
/// Etags with commas are outside the supported domain; `make`
/// never produces them.
pub(crate) fn matches(etag: &str, list: &str) -> bool {
    let mut parts = list.split(',').map(str::trim);
    if list.trim() == "*" {
        return true;
    }
    parts.any(|p| p == etag)
}
