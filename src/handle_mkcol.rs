use http::{Request, Response, StatusCode};
use log::debug;

use crate::body::Body;
use crate::conditional::Conditional;
use crate::davhandler::Access;
use crate::davpath::DavPath;
use crate::errors::{DavError, DavResult};

impl crate::davhandler::DavInner {
    pub(crate) async fn handle_mkcol(
        &self,
        _req: &Request<()>,
        path: DavPath,
        cond: &Conditional,
    ) -> DavResult<Response<Body>> {
        let real = self.real_path(&path, Access::Write, cond)?;

        // RFC 4918 9.3.1 MKCOL Status Codes.
        if real.exists() {
            return Err(DavError::Status(StatusCode::METHOD_NOT_ALLOWED));
        }
        tokio::fs::create_dir(&real).await?;
        debug!("created collection {}", path);

        let resp = Response::builder()
            .status(StatusCode::CREATED)
            .header("content-length", "0")
            .body(Body::empty())
            .unwrap();
        Ok(resp)
    }
}
