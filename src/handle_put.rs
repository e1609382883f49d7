use std::error::Error as StdError;
use std::io;

use bytes::Buf;
use http::{Request, Response, StatusCode};
use http_body::Body as HttpBody;
use http_body_util::BodyExt;
use log::debug;
use tokio::io::AsyncWriteExt;

use crate::body::Body;
use crate::conditional::{self, Conditional};
use crate::davhandler::Access;
use crate::davpath::DavPath;
use crate::errors::{DavError, DavResult};
use crate::etag;
use crate::util::systemtime_to_httpdate;

impl crate::davhandler::DavInner {
    pub(crate) async fn handle_put<ReqBody, ReqData, ReqError>(
        &self,
        req: &Request<()>,
        path: DavPath,
        cond: &Conditional,
        body: ReqBody,
    ) -> DavResult<Response<Body>>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError> + Send,
        ReqData: Buf + Send,
        ReqError: StdError + Send + Sync + 'static,
    {
        let real = self.real_path(&path, Access::Write, cond)?;

        if real.is_dir() {
            return Err(DavError::Status(StatusCode::METHOD_NOT_ALLOWED));
        }

        let tag = std::fs::metadata(&real).ok().map(|m| etag::make(&m));
        conditional::check_ifmatch(req, tag.as_deref())?;

        let existed = real.exists();
        if existed {
            // Unlink the old file to reset mode bits. This also lets
            // in-flight GETs keep reading the previous content.
            tokio::fs::remove_file(&real).await?;
        }

        let mut file = tokio::fs::File::create(&real).await?;
        let mut body = std::pin::pin!(body);
        let mut total = 0u64;
        while let Some(frame) = body.frame().await {
            let frame = frame.map_err(|_| {
                DavError::IoError(io::Error::new(io::ErrorKind::UnexpectedEof, "UnexpectedEof"))
            })?;
            if let Ok(mut buf) = frame.into_data() {
                while buf.has_remaining() {
                    let chunk = buf.chunk();
                    file.write_all(chunk).await?;
                    total += chunk.len() as u64;
                    let n = chunk.len();
                    buf.advance(n);
                }
            }
        }
        file.flush().await?;
        debug!("put {} ({} bytes)", path, total);

        let mut builder = Response::builder().status(if existed {
            StatusCode::NO_CONTENT
        } else {
            StatusCode::CREATED
        });
        if let Ok(meta) = std::fs::metadata(&real) {
            builder = builder.header("Etag", etag::make(&meta));
            if let Ok(modified) = meta.modified() {
                builder = builder.header("Last-Modified", systemtime_to_httpdate(modified));
            }
        }
        Ok(builder.body(Body::empty()).unwrap())
    }
}
