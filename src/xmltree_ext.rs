use std::io::{Read, Write};

use xml::EmitterConfig;
use xml::common::XmlVersion;
use xml::writer::EventWriter;
use xml::writer::XmlEvent as XmlWEvent;
use xmltree::{Element, XMLNode};

use crate::errors::DavError;

pub(crate) trait ElementExt {
    fn new2<'a, E: Into<&'a str>>(e: E) -> Self;
    fn parse2<R: Read>(r: R) -> Result<Element, DavError>;
    fn text<T: Into<String>>(self, t: T) -> Self;
    fn push(&mut self, e: Element);
    fn child_elems(&self) -> Vec<&Element>;
    fn is_dav(&self, name: &str) -> bool;
    fn write_ev<W: Write>(&self, emitter: &mut EventWriter<W>) -> xml::writer::Result<()>;
}

impl ElementExt for Element {
    // "D:foo" style constructor.
    fn new2<'a, N: Into<&'a str>>(n: N) -> Element {
        let v: Vec<&str> = n.into().splitn(2, ':').collect();
        if v.len() == 1 {
            Element::new(v[0])
        } else {
            let mut e = Element::new(v[1]);
            e.prefix = Some(v[0].to_string());
            e
        }
    }

    fn text<S: Into<String>>(mut self, t: S) -> Element {
        self.children.push(XMLNode::Text(t.into()));
        self
    }

    fn push(&mut self, e: Element) {
        self.children.push(XMLNode::Element(e));
    }

    fn child_elems(&self) -> Vec<&Element> {
        self.children
            .iter()
            .filter_map(|n| match n {
                XMLNode::Element(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    // element in the DAV: namespace with this local name.
    fn is_dav(&self, name: &str) -> bool {
        self.name == name && self.namespace.as_deref() == Some("DAV:")
    }

    fn parse2<R: Read>(r: R) -> Result<Element, DavError> {
        match Element::parse(r) {
            Ok(elem) => Ok(elem),
            Err(xmltree::ParseError::MalformedXml(_)) => Err(DavError::XmlParseError),
            Err(_) => Err(DavError::XmlReadError),
        }
    }

    fn write_ev<W: Write>(&self, emitter: &mut EventWriter<W>) -> xml::writer::Result<()> {
        let name = match self.prefix {
            Some(ref p) => format!("{}:{}", p, self.name),
            None => self.name.clone(),
        };
        let mut ev = XmlWEvent::start_element(name.as_str());
        if let Some(ref ns) = self.namespaces {
            for (prefix, uri) in ns.0.iter() {
                if prefix.is_empty() {
                    ev = ev.default_ns(uri.as_str());
                } else {
                    ev = ev.ns(prefix.as_str(), uri.as_str());
                }
            }
        }
        for (k, v) in &self.attributes {
            ev = ev.attr(k.as_str(), v);
        }
        emitter.write(ev)?;
        for child in &self.children {
            match child {
                XMLNode::Element(e) => e.write_ev(emitter)?,
                XMLNode::Text(t) => emitter.write(XmlWEvent::characters(t))?,
                _ => {}
            }
        }
        emitter.write(XmlWEvent::end_element())?;
        Ok(())
    }
}

/// Serialize a single element (no XML declaration), e.g. to store a
/// client-provided `<owner>` in the lock table.
pub(crate) fn element_to_string(elem: &Element) -> String {
    let mut buf = Vec::new();
    let config = EmitterConfig {
        write_document_declaration: false,
        perform_indent: false,
        ..Default::default()
    };
    if elem.write_with_config(&mut buf, config).is_err() {
        return String::new();
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// An EventWriter set up the way all our XML responses want it,
/// with the document header already written.
pub(crate) fn emitter<W: Write>(w: W) -> Result<EventWriter<W>, DavError> {
    let mut emitter = EventWriter::new_with_config(
        w,
        EmitterConfig {
            normalize_empty_elements: false,
            perform_indent: false,
            ..Default::default()
        },
    );
    emitter.write(XmlWEvent::StartDocument {
        version: XmlVersion::Version10,
        encoding: Some("utf-8"),
        standalone: None,
    })?;
    Ok(emitter)
}
