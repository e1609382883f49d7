use bytes::Bytes;
use http::{Request, Response, StatusCode};
use log::debug;
use tokio::io::AsyncReadExt;

use crate::body::Body;
use crate::conditional::{self, Conditional};
use crate::davhandler::Access;
use crate::davpath::DavPath;
use crate::errors::DavResult;
use crate::etag;
use crate::util::systemtime_to_httpdate;

const READ_BUF_SIZE: usize = 65536;

impl crate::davhandler::DavInner {
    pub(crate) async fn handle_get(
        &self,
        req: &Request<()>,
        path: DavPath,
        cond: &Conditional,
    ) -> DavResult<Response<Body>> {
        let head = req.method() == http::Method::HEAD;
        let real = self.real_path(&path, Access::Read, cond)?;

        let meta = tokio::fs::metadata(&real).await?;
        if meta.is_dir() {
            return self.handle_dirindex(req, &path, head).await;
        }

        let tag = etag::make(&meta);
        conditional::check_ifmatch(req, Some(&tag))?;

        let mut builder = Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", path.mime_type_str())
            .header("Etag", &tag)
            .header("Content-Length", meta.len().to_string());
        if let Ok(modified) = meta.modified() {
            builder = builder.header("Last-Modified", systemtime_to_httpdate(modified));
        }

        if head {
            return Ok(builder.body(Body::empty()).unwrap());
        }

        let file = tokio::fs::File::open(&real).await?;
        let stream = futures_util::stream::try_unfold(file, |mut file| async move {
            let mut buffer = vec![0u8; READ_BUF_SIZE];
            let n = file.read(&mut buffer).await?;
            if n == 0 {
                return Ok(None);
            }
            buffer.truncate(n);
            Ok(Some((Bytes::from(buffer), file)))
        });

        debug!("sending file {}", path);
        Ok(builder.body(Body::stream(stream)).unwrap())
    }

    // GET on a collection. Only meant for WWW browsers, DAV clients
    // use PROPFIND.
    pub(crate) async fn handle_dirindex(
        &self,
        req: &Request<()>,
        path: &DavPath,
        head: bool,
    ) -> DavResult<Response<Body>> {
        let builder = Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", "text/html; charset=utf-8");

        if !self.html.read {
            let body = "<html><body><p>Mount this directory using WebDAV.</p>\
                        <p>HTML interface is currently disabled.</p></body></html>";
            return Ok(builder.body(Body::from(body)).unwrap());
        }
        if head {
            return Ok(builder.body(Body::empty()).unwrap());
        }

        let real = self.resolver.resolve(path)?;
        let root_url = self.root_url(req);

        struct Dirent {
            href: String,
            name: String,
            modified: String,
            size: String,
            is_dir: bool,
        }

        let mut dirents: Vec<Dirent> = Vec::new();
        let mut entries = tokio::fs::read_dir(&real).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            // forbidden files stay out of the listing.
            if self.resolver.check_read(&entry.path()).is_err() {
                continue;
            }
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            let npath = path.join(&name);
            let modified = match meta.modified() {
                Ok(t) => {
                    let dt: chrono::DateTime<chrono::Utc> = t.into();
                    dt.format("%Y-%m-%d %H:%M").to_string()
                }
                Err(_) => String::new(),
            };
            dirents.push(Dirent {
                href: self.href(&root_url, &npath, meta.is_dir()),
                name,
                modified,
                size: if meta.is_dir() {
                    "[DIR]".to_string()
                } else {
                    meta.len().to_string()
                },
                is_dir: meta.is_dir(),
            });
        }

        // directories first, then by name.
        dirents.sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then(a.name.cmp(&b.name)));

        let upath = htmlescape::encode_minimal(&format!("{}", path));
        let mut w = String::new();
        w.push_str("<html><head>");
        w.push_str(&format!("<title>Index of {}</title>", upath));
        w.push_str("<style>table { border-collapse: separate; border-spacing: 1.5em 0.25em; } .mono { font-family: monospace; }</style>");
        w.push_str("</head><body>");
        w.push_str(&format!("<h1>Index of {}</h1>", upath));
        w.push_str("<table>");
        w.push_str("<tr><th>Name</th><th>Last modified</th><th>Size</th></tr>");
        w.push_str("<tr><th colspan=\"3\"><hr></th></tr>");
        if !path.is_root() {
            w.push_str("<tr><td><a href=\"..\">Parent Directory</a></td><td>&nbsp;</td><td class=\"mono\" align=\"right\">[DIR]</td></tr>");
        }
        for d in &dirents {
            w.push_str(&format!(
                "<tr><td><a href=\"{}\">{}</a></td><td class=\"mono\">{}</td><td class=\"mono\" align=\"right\">{}</td></tr>",
                d.href,
                htmlescape::encode_minimal(&d.name),
                d.modified,
                d.size
            ));
        }
        w.push_str("<tr><th colspan=\"3\"><hr></th></tr>");
        w.push_str("</table>");
        if self.html.write {
            w.push_str("<p>Uploads are handled by the browser helper.</p>");
        }
        w.push_str("</body></html>");

        Ok(builder.body(Body::from(w)).unwrap())
    }
}
