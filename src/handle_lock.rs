use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};
use log::debug;

use crate::body::Body;
use crate::conditional::Conditional;
use crate::davhandler::{Access, DavInner, parse_xml_body};
use crate::davheaders::{self, Depth, Timeout};
use crate::davpath::DavPath;
use crate::errors::{DavError, DavResult};
use crate::locks::Lock;
use crate::multistatus::ActiveLock;
use crate::xmltree_ext::{ElementExt, element_to_string};

const DEFAULT_OWNER: &str = r#"<D:owner xmlns:D="DAV:" />"#;

// Decode a <lockinfo> body into (shared, owner-xml).
fn parse_lockinfo(body_data: &[u8]) -> DavResult<(bool, String)> {
    let root = parse_xml_body(body_data)?.ok_or(DavError::XmlParseError)?;
    if !root.is_dav("lockinfo") {
        return Err(DavError::XmlParseError);
    }

    let mut shared: Option<bool> = None;
    let mut locktype = false;
    let mut owner: Option<String> = None;

    for elem in root.child_elems() {
        if elem.is_dav("lockscope") {
            for scope in elem.child_elems() {
                if scope.is_dav("exclusive") {
                    shared = Some(false);
                } else if scope.is_dav("shared") {
                    shared = Some(true);
                }
            }
        } else if elem.is_dav("locktype") {
            locktype = elem.child_elems().iter().any(|e| e.is_dav("write"));
        } else if elem.is_dav("owner") {
            owner = Some(element_to_string(elem));
        }
    }

    // only write locks with a known scope exist.
    let Some(shared) = shared else {
        return Err(DavError::XmlParseError);
    };
    if !locktype {
        return Err(DavError::XmlParseError);
    }
    Ok((shared, owner.unwrap_or_else(|| DEFAULT_OWNER.to_string())))
}

impl DavInner {
    fn activelock(&self, req: &Request<()>, lock: &Lock, is_dir: bool) -> ActiveLock {
        let root_url = self.root_url(req);
        ActiveLock {
            shared: lock.shared,
            infinite_depth: lock.infinite_depth,
            timeout_secs: lock.seconds_until_timeout(),
            urn: lock.urn.clone(),
            owner: lock.owner.clone(),
            lockroot: self.href(&root_url, &lock.path, is_dir),
        }
    }

    pub(crate) async fn handle_lock(
        &self,
        req: &Request<()>,
        path: DavPath,
        cond: &Conditional,
        body_data: &[u8],
    ) -> DavResult<Response<Body>> {
        // must have a locksystem or bail
        let Some(ls) = self.lockmanager()? else {
            return Err(DavError::Status(StatusCode::NOT_IMPLEMENTED));
        };

        let timeout = req
            .headers()
            .typed_get::<Timeout>()
            .and_then(|t| t.0.first().copied());

        // write access, but lock conflicts are the create transaction's
        // concern, so skip the lock verification here.
        let real = self.real_path(&path, Access::WriteNoLock, cond)?;

        let lock = if body_data.iter().all(|b| b.is_ascii_whitespace()) {
            // refresh: the token comes from the If: header.
            let Some((_, token)) = cond.first_token() else {
                return Err(DavError::Status(StatusCode::BAD_REQUEST));
            };
            debug!("refresh lock {} on {}", token, path);
            ls.refresh(&path, token, timeout)?
        } else {
            let deep = match req.headers().typed_try_get::<Depth>() {
                Ok(None) | Ok(Some(Depth::Zero)) => false,
                Ok(Some(Depth::Infinity)) => true,
                _ => return Err(DavError::Status(StatusCode::BAD_REQUEST)),
            };
            let (shared, owner) = parse_lockinfo(body_data)?;
            debug!(
                "lock {} shared={} deep={} timeout={:?}",
                path, shared, deep, timeout
            );
            ls.create(&path, shared, &owner, deep, !real.exists(), timeout)?
        };

        // lock-null resource: materialize an empty placeholder file.
        let status = if real.exists() {
            StatusCode::OK
        } else {
            if let Err(e) = tokio::fs::write(&real, b"").await {
                ls.release(&path, &lock.urn).ok();
                return Err(e.into());
            }
            StatusCode::CREATED
        };

        let is_dir = real.is_dir();
        let body = self.activelock(req, &lock, is_dir).into_body()?;
        let resp = Response::builder()
            .status(status)
            .header("Content-Type", "application/xml; charset=utf-8")
            .header("Lock-Token", format!("<{}>", lock.urn))
            .body(body)
            .unwrap();
        Ok(resp)
    }

    pub(crate) async fn handle_unlock(
        &self,
        req: &Request<()>,
        path: DavPath,
        cond: &Conditional,
    ) -> DavResult<Response<Body>> {
        // must have a locksystem or bail
        let Some(ls) = self.lockmanager()? else {
            return Err(DavError::Status(StatusCode::NOT_IMPLEMENTED));
        };

        let t = req
            .headers()
            .typed_get::<davheaders::LockToken>()
            .ok_or(DavError::Status(StatusCode::BAD_REQUEST))?;
        let token = t.0.trim().trim_matches(|c| c == '<' || c == '>');

        let real = self.real_path(&path, Access::Read, cond)?;
        let released = ls.release(&path, token)?;

        // Releasing the last lock on an untouched lock-null resource
        // takes the placeholder file with it.
        if released.is_placeholder && ls.get_locks(&path, false)?.is_empty() {
            if let Ok(meta) = tokio::fs::metadata(&real).await {
                if meta.is_file() && meta.len() == 0 {
                    tokio::fs::remove_file(&real).await?;
                }
            }
        }

        Ok(Response::builder()
            .status(StatusCode::NO_CONTENT)
            .body(Body::empty())
            .unwrap())
    }
}
