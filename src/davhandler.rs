//
// This module contains the main entry point of the library,
// DavHandler.
//
use std::error::Error as StdError;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use bytes::Buf;
use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};
use http_body::Body as HttpBody;
use http_body_util::BodyExt;
use log::{debug, warn};

use crate::body::Body;
use crate::conditional::{self, Conditional};
use crate::davheaders;
use crate::davpath::DavPath;
use crate::errors::{DavError, DavResult};
use crate::locks::LockManager;
use crate::props::PropertyRegistry;
use crate::resolver::{PathResolver, Restriction, UnicodeForm};
use crate::util::{DavMethod, dav_method, dav_xml_error, glob_to_regex};

/// Which parts of the HTML browsing interface are enabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlInterface {
    pub read: bool,
    pub write: bool,
}

impl HtmlInterface {
    /// Parse the `r`/`w`/`rw`/empty configuration form.
    pub fn from_flags(flags: &str) -> HtmlInterface {
        HtmlInterface {
            read: flags.contains('r'),
            write: flags.contains('w'),
        }
    }
}

/// Configuration of the handler, a builder.
#[derive(Default)]
pub struct DavConfig {
    prefix: Option<String>,
    root_dir: Option<PathBuf>,
    root_url: Option<String>,
    lock_db: Option<PathBuf>,
    lock_max_time: Option<u32>,
    lock_wait: Option<u32>,
    restrict_access: Vec<Restriction>,
    restrict_write: Vec<Restriction>,
    unicode_normalize: Option<UnicodeForm>,
    html_interface: Option<HtmlInterface>,
}

fn push_glob(list: &mut Vec<Restriction>, pattern: &str) {
    match glob_to_regex(pattern) {
        Ok(re) => list.push(Restriction::Pattern(re)),
        Err(e) => warn!("ignoring invalid deny pattern {:?}: {}", pattern, e),
    }
}

impl DavConfig {
    /// Create a new configuration builder.
    pub fn new() -> DavConfig {
        DavConfig::default()
    }

    /// Prefix to be stripped off before translating the rest of
    /// the request path to a filesystem path.
    pub fn strip_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// The filesystem subtree to serve. Required.
    pub fn root_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.root_dir = Some(dir.into());
        self
    }

    /// Override for generated URLs; derived from the request if unset.
    pub fn root_url(mut self, url: impl Into<String>) -> Self {
        self.root_url = Some(url.into());
        self
    }

    /// Path of the lock table. Locking is disabled when unset.
    pub fn lock_db(mut self, path: impl Into<PathBuf>) -> Self {
        self.lock_db = Some(path.into());
        self
    }

    /// Hard cap on granted lock TTLs, in seconds (default 3600).
    pub fn lock_max_time(mut self, secs: u32) -> Self {
        self.lock_max_time = Some(secs);
        self
    }

    /// How long to wait on lock store write contention (default 5s).
    pub fn lock_wait(mut self, secs: u32) -> Self {
        self.lock_wait = Some(secs);
        self
    }

    /// Deny all access to path components matching this glob.
    pub fn restrict_access(mut self, pattern: &str) -> Self {
        push_glob(&mut self.restrict_access, pattern);
        self
    }

    /// Deny writes to path components matching this glob.
    pub fn restrict_write(mut self, pattern: &str) -> Self {
        push_glob(&mut self.restrict_write, pattern);
        self
    }

    /// Deny access via a callback over the real path.
    pub fn restrict_access_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&std::path::Path) -> bool + Send + Sync + 'static,
    {
        self.restrict_access.push(Restriction::Callback(Arc::new(f)));
        self
    }

    /// Deny writes via a callback over the real path.
    pub fn restrict_write_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&std::path::Path) -> bool + Send + Sync + 'static,
    {
        self.restrict_write.push(Restriction::Callback(Arc::new(f)));
        self
    }

    /// Unicode-normalize resolved paths (NFC/NFD/NFKC/NFKD).
    pub fn unicode_normalize(mut self, form: UnicodeForm) -> Self {
        self.unicode_normalize = Some(form);
        self
    }

    /// Enable the HTML browsing interface (`"r"`, `"w"`, `"rw"`, `""`).
    pub fn html_interface(mut self, flags: &str) -> Self {
        self.html_interface = Some(HtmlInterface::from_flags(flags));
        self
    }

    /// Use the configuration that was built to generate a DavHandler.
    pub fn build_handler(self) -> DavHandler {
        let root_dir = self.root_dir.expect("DavConfig: root_dir is required");
        let lock_db = self.lock_db;
        let resolver = PathResolver::new(
            root_dir,
            self.unicode_normalize,
            self.restrict_access,
            self.restrict_write,
        );
        DavHandler {
            inner: Arc::new(DavInner {
                prefix: self.prefix.unwrap_or_default(),
                root_url: self.root_url,
                lock_max_time: self.lock_max_time.unwrap_or(3600),
                lock_wait: self.lock_wait.unwrap_or(5),
                html: self.html_interface.unwrap_or(HtmlInterface {
                    read: true,
                    write: false,
                }),
                props: PropertyRegistry::new(lock_db.is_some()),
                lock_db,
                resolver,
                ls: OnceLock::new(),
            }),
        }
    }
}

/// The webdav handler. Cheap to clone; one instance serves any number
/// of concurrent requests.
#[derive(Clone)]
pub struct DavHandler {
    inner: Arc<DavInner>,
}

pub(crate) struct DavInner {
    pub(crate) prefix: String,
    pub(crate) root_url: Option<String>,
    pub(crate) lock_db: Option<PathBuf>,
    pub(crate) lock_max_time: u32,
    pub(crate) lock_wait: u32,
    pub(crate) html: HtmlInterface,
    pub(crate) resolver: PathResolver,
    pub(crate) props: PropertyRegistry,
    pub(crate) ls: OnceLock<LockManager>,
}

/// How a request wants to use a path (resolver modes r/w/wl/wd).
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Access {
    Read,
    Write,
    // write, but skip lock verification (shared LOCK acquisition)
    WriteNoLock,
    // write with the lock check covering all descendants (DELETE, MOVE source)
    WriteDeep,
}

impl DavHandler {
    /// Return a configuration builder.
    pub fn builder() -> DavConfig {
        DavConfig::new()
    }

    /// Handle a webdav request.
    pub async fn handle<ReqBody, ReqData, ReqError>(&self, req: Request<ReqBody>) -> Response<Body>
    where
        ReqData: Buf + Send,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: HttpBody<Data = ReqData, Error = ReqError> + Send,
    {
        match self.inner.handle2(req).await {
            Ok(resp) => {
                debug!("== END REQUEST result OK");
                resp
            }
            Err(err) => {
                debug!("== END REQUEST result {:?}", err);
                let mut resp = Response::builder().status(err.statuscode());
                let body = match err.precondition() {
                    Some(precondition) => {
                        resp = resp.header("content-type", "application/xml; charset=utf-8");
                        dav_xml_error(&format!("<D:{}/>", precondition))
                    }
                    None => {
                        resp = resp.header("content-length", "0");
                        Body::empty()
                    }
                };
                resp.body(body).unwrap()
            }
        }
    }
}

impl DavInner {
    // The lock manager, opened on first use when locking is enabled.
    // It is one shared handle over a store that serializes its own
    // writes; never one per request.
    pub(crate) fn lockmanager(&self) -> DavResult<Option<&LockManager>> {
        let Some(ref db) = self.lock_db else {
            return Ok(None);
        };
        if let Some(ls) = self.ls.get() {
            return Ok(Some(ls));
        }
        let ls = LockManager::open(
            db,
            Duration::from_secs(self.lock_wait as u64),
            self.lock_max_time,
        )?;
        Ok(Some(self.ls.get_or_init(|| ls)))
    }

    fn scheme(&self, req: &Request<()>) -> String {
        req.headers()
            .get(&*davheaders::X_FORWARDED_PROTO)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("http")
            .to_string()
    }

    // The url where the webdav share is rooted, with a trailing slash.
    pub(crate) fn root_url(&self, req: &Request<()>) -> String {
        let mut url = match self.root_url {
            Some(ref url) => url.clone(),
            None => {
                let host = req
                    .headers()
                    .get(http::header::HOST)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("localhost");
                format!("{}://{}{}", self.scheme(req), host, self.prefix)
            }
        };
        if !url.ends_with('/') {
            url.push('/');
        }
        url
    }

    // A fully specified, percent-encoded URI for a resource.
    // Collections get a trailing slash.
    pub(crate) fn href(&self, root_url: &str, path: &DavPath, is_dir: bool) -> String {
        let mut url = format!("{}{}", root_url, path.as_url_rel());
        if is_dir && !url.ends_with('/') {
            url.push('/');
        }
        url
    }

    // Resolve a Simple-ref (absolute URI, or absolute path on this
    // host) to a request-relative path. `Ok(None)` for a well-formed
    // reference that points outside the share root; a reference that
    // does not even parse is a malformed header value, so an error.
    pub(crate) fn parse_simple_ref(
        &self,
        req: &Request<()>,
        root_url: &str,
        simple_ref: &str,
    ) -> DavResult<Option<DavPath>> {
        let url = if simple_ref.starts_with('/') {
            let host = req
                .headers()
                .get(http::header::HOST)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("localhost");
            format!("{}://{}{}", self.scheme(req), host, simple_ref)
        } else {
            // absolute-URI form
            if url::Url::parse(simple_ref).is_err() {
                return Err(DavError::InvalidPath);
            }
            simple_ref.to_string()
        };
        let Some(rel) = url.strip_prefix(root_url) else {
            return Ok(None);
        };
        let rel = rel.trim_matches('/');
        Ok(Some(DavPath::from_request_path(&format!("/{}", rel), "")?))
    }

    /// Resolve the Destination header; a malformed value is 400,
    /// a destination outside the root is 502.
    pub(crate) fn destination_path(&self, req: &Request<()>) -> DavResult<DavPath> {
        let dest = req
            .headers()
            .typed_get::<davheaders::Destination>()
            .ok_or(DavError::Status(StatusCode::BAD_REQUEST))?;
        let root_url = self.root_url(req);
        self.parse_simple_ref(req, &root_url, &dest.0)?
            .ok_or(DavError::IllegalPath)
    }

    // Verify that no foreign lock covers `rel`. A lock only blocks a
    // write when its urn was not presented in the If: header. For a
    // yet-to-be-created resource the parent collection's own locks
    // apply as well.
    pub(crate) fn assert_locks(
        &self,
        rel: &DavPath,
        real: &std::path::Path,
        recursive: bool,
        cond: &Conditional,
    ) -> DavResult<()> {
        let Some(ls) = self.lockmanager()? else {
            return Ok(());
        };
        let mut applied = ls.get_locks(rel, recursive)?;
        if !real.exists() {
            if let Some(parent) = rel.parent() {
                applied.extend(ls.get_locks(&parent, false)?);
            }
        }
        for lock in applied {
            if !cond.has_token(&lock.urn) {
                debug!("{} locked by {}", rel, lock.urn);
                return Err(DavError::Status(StatusCode::LOCKED));
            }
        }
        Ok(())
    }

    /// Translate a request-relative path to a real path, verifying the
    /// access rights for the given mode.
    pub(crate) fn real_path(
        &self,
        rel: &DavPath,
        mode: Access,
        cond: &Conditional,
    ) -> DavResult<PathBuf> {
        let real = self.resolver.resolve(rel)?;
        match mode {
            Access::Read => self.resolver.check_read(&real)?,
            Access::WriteNoLock => self.resolver.check_write(&real)?,
            Access::Write => {
                self.resolver.check_write(&real)?;
                self.assert_locks(rel, &real, false, cond)?;
            }
            Access::WriteDeep => {
                self.resolver.check_write(&real)?;
                self.assert_locks(rel, &real, true, cond)?;
            }
        }
        Ok(real)
    }

    // drain request body and return it, up to max_size.
    pub(crate) async fn read_request<ReqBody, ReqData, ReqError>(
        &self,
        body: ReqBody,
        max_size: usize,
    ) -> DavResult<Vec<u8>>
    where
        ReqData: Buf + Send,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: HttpBody<Data = ReqData, Error = ReqError> + Send,
    {
        let mut data = Vec::new();
        let mut body = std::pin::pin!(body);
        while let Some(frame) = body.frame().await {
            let frame = frame.map_err(|_| {
                DavError::IoError(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "UnexpectedEof",
                ))
            })?;
            if let Ok(mut buf) = frame.into_data() {
                if data.len() + buf.remaining() > max_size {
                    return Err(StatusCode::PAYLOAD_TOO_LARGE.into());
                }
                while buf.has_remaining() {
                    let chunk = buf.chunk();
                    data.extend_from_slice(chunk);
                    let n = chunk.len();
                    buf.advance(n);
                }
            }
        }
        Ok(data)
    }

    // internal dispatcher.
    async fn handle2<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
    ) -> DavResult<Response<Body>>
    where
        ReqData: Buf + Send,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: HttpBody<Data = ReqData, Error = ReqError> + Send,
    {
        let (parts, body) = req.into_parts();
        let req = Request::from_parts(parts, ());

        // translate HTTP method to Webdav method.
        let method = match dav_method(req.method()) {
            Ok(m) => m,
            Err(e) => {
                debug!("refusing method {} request {}", req.method(), req.uri());
                return Err(e);
            }
        };

        // make sure the request path is valid.
        let path = DavPath::from_request_path(req.uri().path(), &self.prefix)?;

        // PUT is the only handler that reads the body itself. All the
        // other handlers either expect no body, or a pre-read Vec<u8>.
        let (body_strm, body_data) = match method {
            DavMethod::Put => (Some(body), Vec::new()),
            _ => (None, self.read_request(body, 65536).await?),
        };

        // Methods that take no body reject one with 415.
        if !method.takes_body() && !body_data.is_empty() {
            return Err(StatusCode::UNSUPPORTED_MEDIA_TYPE.into());
        }

        debug!("== START REQUEST {:?} {}", method, path);

        // Evaluate the If: header once per request; this populates the
        // provided lock tokens or fails the request with 412.
        let cond = conditional::evaluate_if(self, &req, &path)?;

        match method {
            DavMethod::Options => self.handle_options(&req).await,
            DavMethod::PropFind => self.handle_propfind(&req, path, &cond, &body_data).await,
            DavMethod::PropPatch => self.handle_proppatch(&req, path, &cond, &body_data).await,
            DavMethod::MkCol => self.handle_mkcol(&req, path, &cond).await,
            DavMethod::Delete => self.handle_delete(&req, path, &cond).await,
            DavMethod::Lock => self.handle_lock(&req, path, &cond, &body_data).await,
            DavMethod::Unlock => self.handle_unlock(&req, path, &cond).await,
            DavMethod::Head | DavMethod::Get => self.handle_get(&req, path, &cond).await,
            DavMethod::Put => self.handle_put(&req, path, &cond, body_strm.unwrap()).await,
            DavMethod::Copy | DavMethod::Move => {
                self.handle_copymove(&req, path, &cond, method).await
            }
        }
    }
}

// Read a small XML request body into an element tree.
pub(crate) fn parse_xml_body(body_data: &[u8]) -> DavResult<Option<xmltree::Element>> {
    use crate::xmltree_ext::ElementExt;
    if body_data.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(None);
    }
    Ok(Some(xmltree::Element::parse2(std::io::Cursor::new(
        body_data,
    ))?))
}
