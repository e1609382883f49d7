use std::error::Error;
use std::io::ErrorKind;

use http::StatusCode;

/// Errors raised while processing a request. Every variant maps onto an
/// HTTP status; some carry a DAV precondition fragment that is sent as
/// an `<D:error>` XML body.
#[derive(Debug)]
pub(crate) enum DavError {
    XmlReadError,  // error reading/parsing xml
    XmlParseError, // error interpreting xml
    InvalidPath,   // error parsing path
    IllegalPath,   // path not under our root
    ForbiddenPath, // too many dotdots
    UnknownMethod,
    LockStoreBusy,
    LockStoreFail(String),
    Status(StatusCode),
    // status plus the local name of a DAV: precondition element
    Precondition(StatusCode, &'static str),
    IoError(std::io::Error),
    XmlWriterError(xml::writer::Error),
}

pub(crate) type DavResult<T> = Result<T, DavError>;

impl Error for DavError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DavError::IoError(e) => Some(e),
            DavError::XmlWriterError(e) => Some(e),
            _ => None,
        }
    }
}

impl std::fmt::Display for DavError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            DavError::XmlWriterError(_) => write!(f, "XML generate error"),
            DavError::IoError(_) => write!(f, "I/O error"),
            DavError::LockStoreFail(e) => write!(f, "lock store: {}", e),
            _ => write!(f, "{:?}", self),
        }
    }
}

impl From<std::io::Error> for DavError {
    fn from(e: std::io::Error) -> Self {
        DavError::IoError(e)
    }
}

impl From<xml::writer::Error> for DavError {
    fn from(e: xml::writer::Error) -> Self {
        DavError::XmlWriterError(e)
    }
}

impl From<StatusCode> for DavError {
    fn from(sc: StatusCode) -> Self {
        DavError::Status(sc)
    }
}

fn ioerror_to_status(ioerror: &std::io::Error) -> StatusCode {
    match ioerror.kind() {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
        ErrorKind::AlreadyExists => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl DavError {
    pub(crate) fn statuscode(&self) -> StatusCode {
        match self {
            DavError::XmlReadError => StatusCode::BAD_REQUEST,
            DavError::XmlParseError => StatusCode::BAD_REQUEST,
            DavError::InvalidPath => StatusCode::BAD_REQUEST,
            DavError::IllegalPath => StatusCode::BAD_GATEWAY,
            DavError::ForbiddenPath => StatusCode::FORBIDDEN,
            DavError::UnknownMethod => StatusCode::NOT_IMPLEMENTED,
            DavError::LockStoreBusy => StatusCode::SERVICE_UNAVAILABLE,
            DavError::LockStoreFail(_) => StatusCode::INTERNAL_SERVER_ERROR,
            DavError::Status(sc) => *sc,
            DavError::Precondition(sc, _) => *sc,
            DavError::IoError(e) => ioerror_to_status(e),
            DavError::XmlWriterError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The DAV precondition element name for the response body, if any.
    pub(crate) fn precondition(&self) -> Option<&'static str> {
        match self {
            DavError::Precondition(_, frag) => Some(frag),
            _ => None,
        }
    }
}
