//! Conditional request evaluation: the RFC 4918 `If:` header and the
//! HTTP `If-Match`/`If-None-Match` pair.

use headers::HeaderMapExt;
use http::{Request, StatusCode};
use log::trace;

use crate::davhandler::DavInner;
use crate::davheaders::{ETagList, If, IfItem, IfMatch, IfNoneMatch};
use crate::davpath::DavPath;
use crate::errors::{DavError, DavResult};
use crate::etag;

/// What the `If:` header evaluation produced: the state tokens the
/// client presented that resolved against a live lock. Mutation
/// handlers use these to decide which locks the client holds.
#[derive(Debug, Default)]
pub(crate) struct Conditional {
    provided_tokens: Vec<(DavPath, String)>,
}

impl Conditional {
    pub fn has_token(&self, urn: &str) -> bool {
        self.provided_tokens.iter().any(|(_, t)| t == urn)
    }

    pub fn first_token(&self) -> Option<&(DavPath, String)> {
        self.provided_tokens.first()
    }
}

/// Evaluate the `If:` header, RFC 4918 10.4. The request passes if the
/// header is absent, or if at least one list has all of its conditions
/// true; otherwise 412. Valid state tokens are recorded from every
/// list, also failing ones; an unmatched list can never contribute a
/// token that also satisfies a lock, so over-recording is harmless.
pub(crate) fn evaluate_if(
    inner: &DavInner,
    req: &Request<()>,
    req_path: &DavPath,
) -> DavResult<Conditional> {
    let mut cond = Conditional::default();

    let hdr = match req.headers().typed_try_get::<If>() {
        Ok(Some(hdr)) => hdr,
        Ok(None) => return Ok(cond),
        Err(_) => return Err(DavError::Status(StatusCode::BAD_REQUEST)),
    };

    let root_url = inner.root_url(req);
    let mut any_list_ok = false;

    for iflist in &hdr.0 {
        // find the resource this list applies to. A tag pointing
        // outside our root makes the list unsatisfiable; a tag that
        // does not parse at all fails the request as 400.
        let rel = match iflist.resource_tag {
            None => Some(req_path.clone()),
            Some(ref tag) => inner.parse_simple_ref(req, &root_url, tag)?,
        };

        let mut list_ok = rel.is_some();
        if let Some(ref rel) = rel {
            for c in &iflist.conditions {
                let mut passed = match c.item {
                    IfItem::ETag(ref tag) => {
                        // needs read access; 403/404 propagate.
                        let real = inner.resolver.resolve(rel)?;
                        inner.resolver.check_read(&real)?;
                        let meta = std::fs::metadata(&real)?;
                        etag::make(&meta) == *tag
                    }
                    IfItem::StateToken(ref token) => match inner.lockmanager()? {
                        Some(ls) => {
                            let valid = ls.validate(rel, token)?;
                            if valid {
                                cond.provided_tokens.push((rel.clone(), token.clone()));
                            }
                            valid
                        }
                        None => false,
                    },
                };
                if c.invert {
                    passed = !passed;
                }
                if !passed {
                    list_ok = false;
                    break;
                }
            }
        }
        if list_ok {
            any_list_ok = true;
        }
    }

    if !any_list_ok {
        trace!("precondition fail: If {:?}", hdr.0);
        return Err(DavError::Status(StatusCode::PRECONDITION_FAILED));
    }
    Ok(cond)
}

fn etaglist_match(tags: &ETagList, current: Option<&str>) -> bool {
    match tags {
        // `*` matches any current entity, but there has to be one.
        ETagList::Star => current.is_some(),
        ETagList::Tags(list) => match current {
            Some(current) => list.iter().any(|t| etag::matches(current, t)),
            None => false,
        },
    }
}

/// Check `If-Match` / `If-None-Match` against the current entity tag
/// (`None` when the target does not exist). Both headers on one
/// request conflict, that is 400. A failed check is 412; note that
/// `If-None-Match: *` means "must not exist".
pub(crate) fn check_ifmatch(req: &Request<()>, etag: Option<&str>) -> DavResult<()> {
    let if_match = req.headers().typed_get::<IfMatch>();
    let if_none_match = req.headers().typed_get::<IfNoneMatch>();

    if if_match.is_some() && if_none_match.is_some() {
        return Err(DavError::Status(StatusCode::BAD_REQUEST));
    }

    if let Some(m) = if_match {
        if !etaglist_match(&m.0, etag) {
            trace!("precondition fail: If-Match {:?}", m);
            return Err(DavError::Status(StatusCode::PRECONDITION_FAILED));
        }
    } else if let Some(m) = if_none_match {
        if etaglist_match(&m.0, etag) {
            trace!("precondition fail: If-None-Match {:?}", m);
            return Err(DavError::Status(StatusCode::PRECONDITION_FAILED));
        }
    }
    Ok(())
}
