use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::errors::DavResult;

impl crate::davhandler::DavInner {
    pub(crate) async fn handle_options(&self, _req: &Request<()>) -> DavResult<Response<Body>> {
        // Class 2 is only advertised when the lock backend is enabled.
        let dav = if self.lock_db.is_some() { "1,2" } else { "1" };
        let resp = Response::builder()
            .status(StatusCode::OK)
            .header("DAV", dav)
            .header("MS-Author-Via", "DAV")
            .header("content-length", "0")
            .body(Body::empty())
            .unwrap();
        Ok(resp)
    }
}
