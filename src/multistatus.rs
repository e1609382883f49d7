//! Response data model: multistatus and activelock documents.
//!
//! These types are what the method handlers produce; the XML emission
//! at the bottom turns them into response bodies.

use http::{Response, StatusCode};
use xml::writer::XmlEvent as XmlWEvent;
use xmltree::Element;

use crate::body::Body;
use crate::errors::DavResult;
use crate::xmltree_ext::{ElementExt, emitter};

pub(crate) const NS_DAV_URI: &str = "DAV:";

/// A namespaced property name, `{namespace}localname`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropName {
    pub ns: Option<String>,
    pub local: String,
}

impl PropName {
    pub fn dav(local: &str) -> PropName {
        PropName {
            ns: Some(NS_DAV_URI.to_string()),
            local: local.to_string(),
        }
    }

    pub fn from_element(elem: &Element) -> PropName {
        PropName {
            ns: elem.namespace.clone(),
            local: elem.name.clone(),
        }
    }

    fn to_element(&self) -> Element {
        match self.ns.as_deref() {
            Some(NS_DAV_URI) => Element::new2(format!("D:{}", self.local).as_str()),
            Some(ns) => {
                let mut e = Element::new(&self.local);
                let mut nsmap = xmltree::Namespace::empty();
                nsmap.put("", ns);
                e.namespaces = Some(nsmap);
                e
            }
            None => Element::new(&self.local),
        }
    }
}

impl std::fmt::Display for PropName {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self.ns {
            Some(ref ns) => write!(f, "{{{}}}{}", ns, self.local),
            None => write!(f, "{}", self.local),
        }
    }
}

#[derive(Debug, Clone)]
pub enum PropValue {
    Empty,
    Text(String),
    Elements(Vec<Element>),
}

#[derive(Debug, Clone)]
pub struct Prop {
    pub name: PropName,
    pub value: PropValue,
}

/// Properties of one resource grouped by their shared HTTP status.
#[derive(Debug, Clone)]
pub struct PropStat {
    pub status: StatusCode,
    pub error: Option<&'static str>,
    pub props: Vec<Prop>,
}

/// One `<D:response>` element: a resource and its propstat groups.
#[derive(Debug, Clone)]
pub struct DavResponse {
    pub href: String,
    pub propstats: Vec<PropStat>,
}

/// A `207 Multistatus` response body.
#[derive(Debug, Clone, Default)]
pub struct MultiStatus {
    pub responses: Vec<DavResponse>,
}

fn status_line(sc: StatusCode) -> String {
    match sc.canonical_reason() {
        Some(reason) => format!("HTTP/1.1 {} {}", sc.as_u16(), reason),
        None => format!("HTTP/1.1 {}", sc.as_u16()),
    }
}

impl MultiStatus {
    pub fn new() -> MultiStatus {
        MultiStatus::default()
    }

    pub fn push(&mut self, resp: DavResponse) {
        self.responses.push(resp);
    }

    /// Serialize into a complete 207 response.
    pub fn into_response(self) -> DavResult<Response<Body>> {
        let mut buf = Vec::new();
        let mut xw = emitter(&mut buf)?;
        xw.write(XmlWEvent::start_element("D:multistatus").ns("D", NS_DAV_URI))?;

        for resp in &self.responses {
            xw.write(XmlWEvent::start_element("D:response"))?;
            Element::new2("D:href").text(resp.href.clone()).write_ev(&mut xw)?;

            for ps in &resp.propstats {
                xw.write(XmlWEvent::start_element("D:propstat"))?;
                xw.write(XmlWEvent::start_element("D:prop"))?;
                for prop in &ps.props {
                    let mut elem = prop.name.to_element();
                    match &prop.value {
                        PropValue::Empty => {}
                        PropValue::Text(t) => {
                            if !t.is_empty() {
                                elem = elem.text(t.clone());
                            }
                        }
                        PropValue::Elements(children) => {
                            for c in children {
                                elem.push(c.clone());
                            }
                        }
                    }
                    elem.write_ev(&mut xw)?;
                }
                xw.write(XmlWEvent::end_element())?; // prop
                Element::new2("D:status")
                    .text(status_line(ps.status))
                    .write_ev(&mut xw)?;
                if let Some(precondition) = ps.error {
                    let mut wrapper = Element::new2("D:error");
                    wrapper.push(Element::new2(format!("D:{}", precondition).as_str()));
                    wrapper.write_ev(&mut xw)?;
                }
                xw.write(XmlWEvent::end_element())?; // propstat
            }
            xw.write(XmlWEvent::end_element())?; // response
        }
        xw.write(XmlWEvent::end_element())?; // multistatus

        let resp = Response::builder()
            .status(StatusCode::MULTI_STATUS)
            .header("content-type", "application/xml; charset=utf-8")
            .body(Body::from(bytes::Bytes::from(buf)))
            .unwrap();
        Ok(resp)
    }
}

/// The activelock data for a granted or refreshed lock.
#[derive(Debug, Clone)]
pub struct ActiveLock {
    pub shared: bool,
    pub infinite_depth: bool,
    pub timeout_secs: i64,
    pub urn: String,
    pub owner: String,
    pub lockroot: String,
}

impl ActiveLock {
    fn to_element(&self) -> Element {
        let mut actlock = Element::new2("D:activelock");

        let mut elem = Element::new2("D:lockscope");
        elem.push(match self.shared {
            false => Element::new2("D:exclusive"),
            true => Element::new2("D:shared"),
        });
        actlock.push(elem);

        let mut elem = Element::new2("D:locktype");
        elem.push(Element::new2("D:write"));
        actlock.push(elem);

        actlock.push(
            Element::new2("D:depth").text(if self.infinite_depth { "infinity" } else { "0" }),
        );
        actlock.push(Element::new2("D:timeout").text(format!("Second-{}", self.timeout_secs)));

        let mut tokenelem = Element::new2("D:locktoken");
        tokenelem.push(Element::new2("D:href").text(self.urn.clone()));
        actlock.push(tokenelem);

        let mut lockroot = Element::new2("D:lockroot");
        lockroot.push(Element::new2("D:href").text(self.lockroot.clone()));
        actlock.push(lockroot);

        if let Ok(owner) = Element::parse2(std::io::Cursor::new(self.owner.as_bytes())) {
            actlock.push(owner);
        }
        actlock
    }

    /// The `<D:prop><D:lockdiscovery>...` body of a LOCK response.
    pub fn into_body(self) -> DavResult<Body> {
        let mut buf = Vec::new();
        let mut xw = emitter(&mut buf)?;
        xw.write(XmlWEvent::start_element("D:prop").ns("D", NS_DAV_URI))?;
        xw.write(XmlWEvent::start_element("D:lockdiscovery"))?;
        self.to_element().write_ev(&mut xw)?;
        xw.write(XmlWEvent::end_element())?;
        xw.write(XmlWEvent::end_element())?;
        Ok(Body::from(bytes::Bytes::from(buf)))
    }
}
