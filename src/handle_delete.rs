use http::{Request, Response, StatusCode};
use log::debug;

use crate::body::Body;
use crate::conditional::Conditional;
use crate::davhandler::Access;
use crate::davpath::DavPath;
use crate::errors::{DavError, DavResult};

impl crate::davhandler::DavInner {
    pub(crate) async fn handle_delete(
        &self,
        _req: &Request<()>,
        path: DavPath,
        cond: &Conditional,
    ) -> DavResult<Response<Body>> {
        // deep write: every lock in the subtree must have been provided.
        let real = self.real_path(&path, Access::WriteDeep, cond)?;

        // locks on the parent collection prohibit deletion of members.
        if let Some(parent) = path.parent() {
            let parent_real = self.resolver.resolve(&parent)?;
            self.assert_locks(&parent, &parent_real, false, cond)?;
        }

        if !real.exists() {
            return Err(DavError::Status(StatusCode::NOT_FOUND));
        }

        debug!("delete {}", path);
        if real.is_dir() {
            tokio::fs::remove_dir_all(&real).await?;
        } else {
            tokio::fs::remove_file(&real).await?;
        }

        // the subtree is gone, so are its locks.
        if let Some(ls) = self.lockmanager()? {
            ls.purge_below(&path)?;
        }

        let resp = Response::builder()
            .status(StatusCode::NO_CONTENT)
            .body(Body::empty())
            .unwrap();
        Ok(resp)
    }
}
