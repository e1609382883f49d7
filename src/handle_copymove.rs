use std::path::Path;

use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};
use log::debug;

use crate::body::Body;
use crate::conditional::Conditional;
use crate::davhandler::Access;
use crate::davheaders::{Depth, Overwrite};
use crate::davpath::DavPath;
use crate::errors::{DavError, DavResult};
use crate::util::DavMethod;

// Carry over mtime and permission bits, like a local `cp -p`.
fn copy_stat(src: &Path, dest: &Path) -> std::io::Result<()> {
    let meta = std::fs::metadata(src)?;
    std::fs::set_permissions(dest, meta.permissions())?;
    if let Ok(mtime) = meta.modified() {
        let f = std::fs::File::options().write(true).open(dest).or_else(
            // directories need no write access for utimes
            |_| std::fs::File::open(dest),
        )?;
        f.set_modified(mtime)?;
    }
    Ok(())
}

fn copy_tree(src: &Path, dest: &Path) -> std::io::Result<()> {
    std::fs::create_dir(dest)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let nsrc = entry.path();
        let ndest = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree(&nsrc, &ndest)?;
        } else {
            std::fs::copy(&nsrc, &ndest)?;
            copy_stat(&nsrc, &ndest)?;
        }
    }
    copy_stat(src, dest)
}

impl crate::davhandler::DavInner {
    pub(crate) async fn handle_copymove(
        &self,
        req: &Request<()>,
        path: DavPath,
        cond: &Conditional,
        method: DavMethod,
    ) -> DavResult<Response<Body>> {
        // get and check headers.
        let overwrite = match req.headers().typed_try_get::<Overwrite>() {
            Ok(hdr) => hdr.map_or(true, |o| o.0),
            Err(_) => return Err(DavError::Status(StatusCode::BAD_REQUEST)),
        };
        let depth = match req.headers().typed_try_get::<Depth>() {
            Ok(None) | Ok(Some(Depth::Zero)) => Depth::Zero,
            Ok(Some(Depth::Infinity)) => Depth::Infinity,
            _ => return Err(DavError::Status(StatusCode::BAD_REQUEST)),
        };

        // the source; MOVE releases locks, so it needs the deep check.
        let real_source = match method {
            DavMethod::Move => self.real_path(&path, Access::WriteDeep, cond)?,
            _ => self.real_path(&path, Access::Read, cond)?,
        };

        // the destination must resolve under our own root (else 502)
        // and be writable.
        let dest = self.destination_path(req)?;
        let real_dest = self.real_path(&dest, Access::Write, cond)?;

        if path == dest {
            return Err(DavError::Status(StatusCode::FORBIDDEN));
        }

        let existed = real_dest.exists();
        if existed {
            if !overwrite {
                return Err(DavError::Status(StatusCode::PRECONDITION_FAILED));
            }
            debug!("replacing destination {}", dest);
            if real_dest.is_dir() {
                tokio::fs::remove_dir_all(&real_dest).await?;
            } else {
                tokio::fs::remove_file(&real_dest).await?;
            }
        }

        if method == DavMethod::Copy {
            debug!("copy {} -> {} depth {:?}", path, dest, depth);
            if real_source.is_dir() {
                if depth == Depth::Zero {
                    // copy the collection itself, not its contents.
                    tokio::fs::create_dir(&real_dest).await?;
                    copy_stat(&real_source, &real_dest)?;
                } else {
                    copy_tree(&real_source, &real_dest)?;
                }
            } else {
                tokio::fs::copy(&real_source, &real_dest).await?;
                copy_stat(&real_source, &real_dest)?;
            }
        } else {
            debug!("move {} -> {}", path, dest);
            tokio::fs::rename(&real_source, &real_dest).await?;
            // the source subtree is gone, release its locks.
            if let Some(ls) = self.lockmanager()? {
                ls.purge_below(&path)?;
            }
        }

        let status = if existed {
            StatusCode::NO_CONTENT
        } else {
            StatusCode::CREATED
        };
        Ok(Response::builder()
            .status(status)
            .body(Body::empty())
            .unwrap())
    }
}
