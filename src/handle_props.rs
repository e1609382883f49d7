use std::collections::BTreeMap;
use std::path::Path;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};
use log::{debug, trace};
use xmltree::Element;

use crate::body::Body;
use crate::conditional::Conditional;
use crate::davhandler::{Access, DavInner, parse_xml_body};
use crate::davheaders::Depth;
use crate::davpath::DavPath;
use crate::errors::{DavError, DavResult};
use crate::multistatus::{DavResponse, MultiStatus, Prop, PropName, PropStat, PropValue};
use crate::xmltree_ext::ElementExt;

// What a propfind body asked for.
enum Requested {
    PropName,
    AllProp(Vec<PropName>),
    Props(Vec<PropName>),
}

fn parse_propfind_body(body_data: &[u8]) -> DavResult<Requested> {
    let Some(root) = parse_xml_body(body_data)? else {
        // an empty request body means allprop.
        return Ok(Requested::AllProp(Vec::new()));
    };
    if !root.is_dav("propfind") {
        return Err(DavError::XmlParseError);
    }

    for elem in root.child_elems() {
        if elem.is_dav("allprop") {
            let includes = root
                .child_elems()
                .into_iter()
                .filter(|e| e.is_dav("include"))
                .flat_map(|e| e.child_elems())
                .map(PropName::from_element)
                .collect();
            return Ok(Requested::AllProp(includes));
        }
        if elem.is_dav("propname") {
            return Ok(Requested::PropName);
        }
        if elem.is_dav("prop") {
            let props = elem
                .child_elems()
                .into_iter()
                .map(PropName::from_element)
                .collect();
            return Ok(Requested::Props(props));
        }
    }
    Err(DavError::XmlParseError)
}

fn depth_below(depth: Depth) -> Depth {
    match depth {
        Depth::Infinity => Depth::Infinity,
        _ => Depth::Zero,
    }
}

impl DavInner {
    fn read_resource_props(
        &self,
        real: &Path,
        requested: &Requested,
    ) -> BTreeMap<StatusCode, Vec<Prop>> {
        match requested {
            Requested::PropName => self.props.read_names(),
            Requested::AllProp(includes) => {
                let mut names = self.props.names();
                for inc in includes {
                    if !names.contains(inc) {
                        names.push(inc.clone());
                    }
                }
                self.props.read(real, &names)
            }
            Requested::Props(names) => self.props.read(real, names),
        }
    }

    // Visit one resource and, depth permitting, its members.
    fn propfind_walk<'a>(
        &'a self,
        root_url: &'a str,
        path: DavPath,
        depth: Depth,
        requested: &'a Requested,
        out: &'a mut MultiStatus,
    ) -> BoxFuture<'a, DavResult<()>> {
        async move {
            let real = self.resolver.resolve(&path)?;
            // forbidden resources are silently left out of the listing;
            // other failures propagate.
            match self.resolver.check_read(&real) {
                Err(e) if e.statuscode() == StatusCode::FORBIDDEN => return Ok(()),
                other => other?,
            }

            let meta = tokio::fs::metadata(&real).await?;
            let propstats = self.read_resource_props(&real, requested);
            out.push(DavResponse {
                href: self.href(root_url, &path, meta.is_dir()),
                propstats: propstats
                    .into_iter()
                    .map(|(status, props)| PropStat {
                        status,
                        error: None,
                        props,
                    })
                    .collect(),
            });

            if meta.is_dir() && depth != Depth::Zero {
                let mut entries = tokio::fs::read_dir(&real).await?;
                while let Some(entry) = entries.next_entry().await? {
                    let name = entry.file_name().to_string_lossy().into_owned();
                    self.propfind_walk(
                        root_url,
                        path.join(&name),
                        depth_below(depth),
                        requested,
                        out,
                    )
                    .await?;
                }
            }
            Ok(())
        }
        .boxed()
    }

    pub(crate) async fn handle_propfind(
        &self,
        req: &Request<()>,
        path: DavPath,
        cond: &Conditional,
        body_data: &[u8],
    ) -> DavResult<Response<Body>> {
        let depth = match req.headers().typed_try_get::<Depth>() {
            Ok(Some(d)) => d,
            Ok(None) => Depth::Infinity,
            Err(_) => return Err(DavError::Status(StatusCode::BAD_REQUEST)),
        };
        let requested = parse_propfind_body(body_data)?;

        // the target itself must be readable; errors on it propagate.
        self.real_path(&path, Access::Read, cond)?;

        trace!("propfind {} depth {:?}", path, depth);

        let root_url = self.root_url(req);
        let mut out = MultiStatus::new();
        self.propfind_walk(&root_url, path, depth, &requested, &mut out)
            .await?;
        out.into_response()
    }

    pub(crate) async fn handle_proppatch(
        &self,
        req: &Request<()>,
        path: DavPath,
        cond: &Conditional,
        body_data: &[u8],
    ) -> DavResult<Response<Body>> {
        let real = self.real_path(&path, Access::Write, cond)?;

        let root = parse_xml_body(body_data)?.ok_or(DavError::XmlParseError)?;
        if !root.is_dav("propertyupdate") {
            return Err(DavError::XmlParseError);
        }

        enum Instruction {
            Set(PropName, Element),
            Remove(PropName),
        }

        let mut instructions = Vec::new();
        for elem in root.child_elems() {
            let is_set = elem.is_dav("set");
            let is_remove = elem.is_dav("remove");
            if !is_set && !is_remove {
                continue;
            }
            for propelem in elem
                .child_elems()
                .into_iter()
                .filter(|e| e.is_dav("prop"))
                .flat_map(|e| e.child_elems())
            {
                let name = PropName::from_element(propelem);
                instructions.push(if is_set {
                    Instruction::Set(name, propelem.clone())
                } else {
                    Instruction::Remove(name)
                });
            }
        }

        // Instructions are processed in document order and either all
        // executed or none: verify everything before touching anything.
        let mut results: Vec<(PropName, StatusCode, Option<&'static str>)> = Vec::new();
        for ins in &instructions {
            let (name, verdict) = match ins {
                Instruction::Set(name, elem) => (name, self.props.verify_set(name, elem)),
                // property removal is not supported at all.
                Instruction::Remove(name) => (name, Err(DavError::Status(StatusCode::FORBIDDEN))),
            };
            match verdict {
                Ok(()) => results.push((name.clone(), StatusCode::OK, None)),
                Err(e) => results.push((name.clone(), e.statuscode(), e.precondition())),
            }
        }

        let all_ok = results.iter().all(|(_, s, _)| *s == StatusCode::OK);
        if all_ok {
            for ins in &instructions {
                if let Instruction::Set(name, elem) = ins {
                    let value = elem.get_text().unwrap_or_default();
                    self.props.apply_set(name, &real, &value)?;
                }
            }
            debug!("proppatch {}: {} properties set", path, instructions.len());
        } else {
            // verified siblings failed their dependency.
            for r in results.iter_mut() {
                if r.1 == StatusCode::OK {
                    r.1 = StatusCode::FAILED_DEPENDENCY;
                }
            }
        }

        // group the outcomes by status for the propstat blocks.
        let mut grouped: BTreeMap<(u16, Option<&'static str>), Vec<Prop>> = BTreeMap::new();
        for (name, status, error) in results {
            grouped
                .entry((status.as_u16(), error))
                .or_default()
                .push(Prop {
                    name,
                    value: PropValue::Empty,
                });
        }

        let root_url = self.root_url(req);
        let is_dir = real.is_dir();
        let mut out = MultiStatus::new();
        out.push(DavResponse {
            href: self.href(&root_url, &path, is_dir),
            propstats: grouped
                .into_iter()
                .map(|((status, error), props)| PropStat {
                    status: StatusCode::from_u16(status).unwrap_or(StatusCode::OK),
                    error,
                    props,
                })
                .collect(),
        });
        out.into_response()
    }
}
