use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};

use crate::body::Body;
use crate::errors::{DavError, DavResult};

/// HTTP methods handled by [`DavHandler`](crate::DavHandler).
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum DavMethod {
    Head,
    Get,
    Put,
    Options,
    PropFind,
    PropPatch,
    MkCol,
    Copy,
    Move,
    Delete,
    Lock,
    Unlock,
}

// translate method into our own enum that has webdav methods as well.
pub(crate) fn dav_method(m: &http::Method) -> DavResult<DavMethod> {
    let m = match *m {
        http::Method::HEAD => DavMethod::Head,
        http::Method::GET => DavMethod::Get,
        http::Method::PUT => DavMethod::Put,
        http::Method::DELETE => DavMethod::Delete,
        http::Method::OPTIONS => DavMethod::Options,
        _ => match m.as_str() {
            "PROPFIND" => DavMethod::PropFind,
            "PROPPATCH" => DavMethod::PropPatch,
            "MKCOL" => DavMethod::MkCol,
            "COPY" => DavMethod::Copy,
            "MOVE" => DavMethod::Move,
            "LOCK" => DavMethod::Lock,
            "UNLOCK" => DavMethod::Unlock,
            _ => return Err(DavError::UnknownMethod),
        },
    };
    Ok(m)
}

impl DavMethod {
    /// Does this method take a request body at all.
    pub(crate) fn takes_body(&self) -> bool {
        matches!(
            self,
            DavMethod::Put | DavMethod::PropFind | DavMethod::PropPatch | DavMethod::Lock
        )
    }
}

pub(crate) fn dav_xml_error(body: &str) -> Body {
    let xml = format!(
        "{}\n{}\n{}\n{}\n",
        r#"<?xml version="1.0" encoding="utf-8" ?>"#,
        r#"<D:error xmlns:D="DAV:">"#,
        body,
        r#"</D:error>"#
    );
    Body::from(xml)
}

fn systemtime_to_datetime(t: SystemTime) -> DateTime<Utc> {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => Utc
            .timestamp_opt(d.as_secs() as i64, d.subsec_nanos())
            .single()
            .unwrap_or_else(Utc::now),
        Err(_) => Utc.timestamp_opt(0, 0).single().unwrap(),
    }
}

/// RFC 1123 date, e.g. `Sat, 01 Aug 2026 10:52:37 GMT`.
pub(crate) fn systemtime_to_httpdate(t: SystemTime) -> String {
    systemtime_to_datetime(t)
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

/// ISO-8601 / RFC 3339 date, e.g. `1996-12-19T16:39:57Z`.
pub(crate) fn systemtime_to_rfc3339(t: SystemTime) -> String {
    systemtime_to_datetime(t).to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse an RFC 1123 date back into a SystemTime (getlastmodified setter).
pub(crate) fn httpdate_to_systemtime(s: &str) -> Option<SystemTime> {
    let dt = DateTime::parse_from_rfc2822(s).ok()?;
    let secs = dt.timestamp();
    if secs < 0 {
        return None;
    }
    Some(UNIX_EPOCH + std::time::Duration::from_secs(secs as u64))
}

// Translate a shell glob pattern (`*`, `?`, `[seq]`) into an anchored regex.
pub(crate) fn glob_to_regex(pattern: &str) -> Result<regex::Regex, regex::Error> {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push('^');
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            '[' => {
                re.push('[');
                if chars.peek() == Some(&'!') {
                    chars.next();
                    re.push('^');
                }
                for c in chars.by_ref() {
                    if c == ']' {
                        break;
                    }
                    if c == '\\' {
                        re.push('\\');
                    }
                    re.push(c);
                }
                re.push(']');
            }
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    regex::Regex::new(&re)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::UNIX_EPOCH;

    #[test]
    fn test_rfc3339() {
        assert!(systemtime_to_rfc3339(UNIX_EPOCH) == "1970-01-01T00:00:00Z");
    }

    #[test]
    fn test_httpdate_roundtrip() {
        let t = UNIX_EPOCH + std::time::Duration::from_secs(1_000_000_000);
        let s = systemtime_to_httpdate(t);
        assert_eq!(httpdate_to_systemtime(&s), Some(t));
    }

    #[test]
    fn test_glob() {
        let re = glob_to_regex("*.php").unwrap();
        assert!(re.is_match("hack.php"));
        assert!(re.is_match(".hack.php"));
        assert!(!re.is_match("hack.php.txt"));
        let re = glob_to_regex("*.php.*").unwrap();
        assert!(re.is_match("hack.php.txt"));
        let re = glob_to_regex(".svn").unwrap();
        assert!(re.is_match(".svn"));
        assert!(!re.is_match("x.svn"));
    }
}
