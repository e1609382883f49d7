//! The live-property registry: DAV property names mapped to getters
//! (and the occasional setter) over the filesystem. Properties without
//! a setter are protected. Adding a property is a data change here,
//! the PROPFIND/PROPPATCH handlers stay untouched.

use std::collections::BTreeMap;
use std::fs::Metadata;
use std::path::Path;
use std::time::{Duration, UNIX_EPOCH};

use http::StatusCode;
use log::error;
use xmltree::Element;

use crate::errors::{DavError, DavResult};
use crate::etag;
use crate::multistatus::{NS_DAV_URI, Prop, PropName, PropValue};
use crate::util::{httpdate_to_systemtime, systemtime_to_httpdate, systemtime_to_rfc3339};
use crate::xmltree_ext::ElementExt;

// DAV precondition element name for writes to protected properties.
pub(crate) const CANNOT_MODIFY: &str = "cannot-modify-protected-property";

// A getter returns Ok(None) when the property does not apply to this
// resource (reported under 404), Err for a real failure (500).
type Getter = fn(&Path, &Metadata) -> DavResult<Option<PropValue>>;
type Setter = fn(&Path, &str) -> DavResult<()>;

struct PropertyHandler {
    name: &'static str,
    get: Getter,
    set: Option<Setter>,
}

pub(crate) struct PropertyRegistry {
    handlers: Vec<PropertyHandler>,
}

#[cfg(unix)]
fn creation_time(meta: &Metadata) -> std::time::SystemTime {
    use std::os::unix::fs::MetadataExt;
    UNIX_EPOCH + Duration::from_secs(meta.ctime().max(0) as u64)
}

#[cfg(not(unix))]
fn creation_time(meta: &Metadata) -> std::time::SystemTime {
    meta.created().unwrap_or(UNIX_EPOCH)
}

fn get_creationdate(_real: &Path, meta: &Metadata) -> DavResult<Option<PropValue>> {
    Ok(Some(PropValue::Text(systemtime_to_rfc3339(creation_time(
        meta,
    )))))
}

fn get_contentlength(_real: &Path, meta: &Metadata) -> DavResult<Option<PropValue>> {
    if meta.is_dir() {
        return Ok(None);
    }
    Ok(Some(PropValue::Text(meta.len().to_string())))
}

fn get_etag(_real: &Path, meta: &Metadata) -> DavResult<Option<PropValue>> {
    Ok(Some(PropValue::Text(etag::make(meta))))
}

fn get_lastmodified(_real: &Path, meta: &Metadata) -> DavResult<Option<PropValue>> {
    let t = meta.modified()?;
    Ok(Some(PropValue::Text(systemtime_to_httpdate(t))))
}

fn set_lastmodified(real: &Path, value: &str) -> DavResult<()> {
    let t = httpdate_to_systemtime(value)
        .ok_or(DavError::Status(StatusCode::CONFLICT))?;
    let file = std::fs::File::open(real)?;
    file.set_modified(t)?;
    Ok(())
}

fn get_contenttype(real: &Path, meta: &Metadata) -> DavResult<Option<PropValue>> {
    let t = if meta.is_dir() {
        "httpd/unix-directory".to_string()
    } else {
        mime_guess::from_path(real)
            .first_raw()
            .unwrap_or("application/octet-stream")
            .to_string()
    };
    Ok(Some(PropValue::Text(t)))
}

fn get_resourcetype(_real: &Path, meta: &Metadata) -> DavResult<Option<PropValue>> {
    if meta.is_dir() {
        Ok(Some(PropValue::Elements(vec![Element::new2("D:collection")])))
    } else {
        Ok(Some(PropValue::Empty))
    }
}

fn get_supportedlock(_real: &Path, _meta: &Metadata) -> DavResult<Option<PropValue>> {
    let mut entries = Vec::new();
    for scope in ["D:exclusive", "D:shared"] {
        let mut entry = Element::new2("D:lockentry");
        let mut lockscope = Element::new2("D:lockscope");
        lockscope.push(Element::new2(scope));
        entry.push(lockscope);
        let mut locktype = Element::new2("D:locktype");
        locktype.push(Element::new2("D:write"));
        entry.push(locktype);
        entries.push(entry);
    }
    Ok(Some(PropValue::Elements(entries)))
}

impl PropertyRegistry {
    /// The built-in DAV: properties; `supportedlock` is only present
    /// when the lock backend is enabled.
    pub fn new(locking: bool) -> PropertyRegistry {
        let mut handlers = vec![
            PropertyHandler {
                name: "creationdate",
                get: get_creationdate,
                set: None,
            },
            PropertyHandler {
                name: "getcontentlength",
                get: get_contentlength,
                set: None,
            },
            PropertyHandler {
                name: "getetag",
                get: get_etag,
                set: None,
            },
            PropertyHandler {
                name: "getlastmodified",
                get: get_lastmodified,
                set: Some(set_lastmodified),
            },
            PropertyHandler {
                name: "getcontenttype",
                get: get_contenttype,
                set: None,
            },
            PropertyHandler {
                name: "resourcetype",
                get: get_resourcetype,
                set: None,
            },
        ];
        if locking {
            handlers.push(PropertyHandler {
                name: "supportedlock",
                get: get_supportedlock,
                set: None,
            });
        }
        PropertyRegistry { handlers }
    }

    fn find(&self, name: &PropName) -> Option<&PropertyHandler> {
        if name.ns.as_deref() != Some(NS_DAV_URI) {
            return None;
        }
        self.handlers.iter().find(|h| h.name == name.local)
    }

    /// All registered property names.
    pub fn names(&self) -> Vec<PropName> {
        self.handlers.iter().map(|h| PropName::dav(h.name)).collect()
    }

    /// Read the requested properties of one resource, grouped by the
    /// status of each lookup: 200 for successes, 404 for unknown or
    /// inapplicable names, 500 for getter failures.
    pub fn read(&self, real: &Path, requested: &[PropName]) -> BTreeMap<StatusCode, Vec<Prop>> {
        let mut propstats: BTreeMap<StatusCode, Vec<Prop>> = BTreeMap::new();
        let meta = match std::fs::metadata(real) {
            Ok(m) => m,
            Err(_) => {
                for name in requested {
                    propstats
                        .entry(StatusCode::INTERNAL_SERVER_ERROR)
                        .or_default()
                        .push(Prop {
                            name: name.clone(),
                            value: PropValue::Empty,
                        });
                }
                return propstats;
            }
        };

        for name in requested {
            let (status, value) = match self.find(name) {
                None => (StatusCode::NOT_FOUND, PropValue::Empty),
                Some(handler) => match (handler.get)(real, &meta) {
                    Ok(Some(value)) => (StatusCode::OK, value),
                    Ok(None) => (StatusCode::NOT_FOUND, PropValue::Empty),
                    Err(e) => {
                        error!("property handler {} failed on {:?}: {}", name, real, e);
                        (StatusCode::INTERNAL_SERVER_ERROR, PropValue::Empty)
                    }
                },
            };
            propstats.entry(status).or_default().push(Prop {
                name: name.clone(),
                value,
            });
        }
        propstats
    }

    /// All property names with empty values (PROPFIND `propname`).
    pub fn read_names(&self) -> BTreeMap<StatusCode, Vec<Prop>> {
        let mut propstats = BTreeMap::new();
        propstats.insert(
            StatusCode::OK,
            self.names()
                .into_iter()
                .map(|name| Prop {
                    name,
                    value: PropValue::Empty,
                })
                .collect(),
        );
        propstats
    }

    /// Verify a PROPPATCH set instruction without applying it.
    /// Unknown property: 403. Protected property: 403 with
    /// `cannot-modify-protected-property`. Complex value: 409.
    pub fn verify_set(&self, name: &PropName, elem: &Element) -> DavResult<()> {
        if !elem.child_elems().is_empty() {
            return Err(DavError::Status(StatusCode::CONFLICT));
        }
        match self.find(name) {
            None => Err(DavError::Status(StatusCode::FORBIDDEN)),
            Some(handler) => {
                if handler.set.is_none() {
                    Err(DavError::Precondition(StatusCode::FORBIDDEN, CANNOT_MODIFY))
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Apply a verified set instruction.
    pub fn apply_set(&self, name: &PropName, real: &Path, value: &str) -> DavResult<()> {
        let handler = self
            .find(name)
            .ok_or(DavError::Status(StatusCode::FORBIDDEN))?;
        let set = handler
            .set
            .ok_or(DavError::Precondition(StatusCode::FORBIDDEN, CANNOT_MODIFY))?;
        set(real, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_known_and_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f.txt");
        std::fs::write(&file, b"hello").unwrap();

        let reg = PropertyRegistry::new(true);
        let req = vec![
            PropName::dav("getcontentlength"),
            PropName::dav("nosuchprop"),
        ];
        let stats = reg.read(&file, &req);
        let ok = &stats[&StatusCode::OK];
        assert_eq!(ok.len(), 1);
        match &ok[0].value {
            PropValue::Text(t) => assert_eq!(t, "5"),
            v => panic!("unexpected value {:?}", v),
        }
        assert_eq!(stats[&StatusCode::NOT_FOUND].len(), 1);
    }

    #[test]
    fn contentlength_absent_on_collections() {
        let dir = tempfile::tempdir().unwrap();
        let reg = PropertyRegistry::new(false);
        let stats = reg.read(dir.path(), &[PropName::dav("getcontentlength")]);
        assert!(stats.contains_key(&StatusCode::NOT_FOUND));
        // supportedlock is not registered when locking is off
        let stats = reg.read(dir.path(), &[PropName::dav("supportedlock")]);
        assert!(stats.contains_key(&StatusCode::NOT_FOUND));
    }

    #[test]
    fn lastmodified_is_writable() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        std::fs::write(&file, b"x").unwrap();

        let reg = PropertyRegistry::new(false);
        let name = PropName::dav("getlastmodified");
        let elem = Element::new("getlastmodified");
        reg.verify_set(&name, &elem).unwrap();
        reg.apply_set(&name, &file, "Wed, 21 Oct 2015 07:28:00 GMT")
            .unwrap();
        let stats = reg.read(&file, &[name]);
        match &stats[&StatusCode::OK][0].value {
            PropValue::Text(t) => assert_eq!(t, "Wed, 21 Oct 2015 07:28:00 GMT"),
            v => panic!("unexpected value {:?}", v),
        }
    }

    #[test]
    fn protected_props_reject_set() {
        let reg = PropertyRegistry::new(true);
        let elem = Element::new("resourcetype");
        let err = reg
            .verify_set(&PropName::dav("resourcetype"), &elem)
            .unwrap_err();
        assert_eq!(err.statuscode(), StatusCode::FORBIDDEN);
        assert_eq!(err.precondition(), Some(CANNOT_MODIFY));
    }
}
