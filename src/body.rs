//! Definitions for the Request and Response bodies.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::stream::Stream;
use http_body::{Body as HttpBody, Frame, SizeHint};

type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send + 'static>>;

/// Body is returned by the webdav handler, and implements both `Stream`
/// and `http_body::Body`.
pub struct Body {
    inner: BodyType,
}

enum BodyType {
    Bytes(Option<Bytes>),
    Stream(ByteStream),
    Empty,
}

impl Body {
    /// Return an empty body.
    pub fn empty() -> Body {
        Body {
            inner: BodyType::Empty,
        }
    }

    pub(crate) fn stream<S>(s: S) -> Body
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Body {
            inner: BodyType::Stream(Box::pin(s)),
        }
    }
}

impl From<Bytes> for Body {
    fn from(t: Bytes) -> Body {
        Body {
            inner: BodyType::Bytes(Some(t)),
        }
    }
}

impl From<String> for Body {
    fn from(t: String) -> Body {
        Body::from(Bytes::from(t))
    }
}

impl From<&str> for Body {
    fn from(t: &str) -> Body {
        Body::from(Bytes::from(t.to_string()))
    }
}

impl Stream for Body {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<Self::Item>> {
        match self.inner {
            BodyType::Bytes(ref mut strm) => Poll::Ready(strm.take().map(Ok)),
            BodyType::Stream(ref mut strm) => strm.as_mut().poll_next(cx),
            BodyType::Empty => Poll::Ready(None),
        }
    }
}

impl HttpBody for Body {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        self.poll_next(cx)
            .map(|opt| opt.map(|res| res.map(Frame::data)))
    }

    fn is_end_stream(&self) -> bool {
        match self.inner {
            BodyType::Bytes(ref b) => b.is_none(),
            BodyType::Stream(_) => false,
            BodyType::Empty => true,
        }
    }

    fn size_hint(&self) -> SizeHint {
        match self.inner {
            BodyType::Bytes(Some(ref b)) => SizeHint::with_exact(b.len() as u64),
            BodyType::Bytes(None) | BodyType::Empty => SizeHint::with_exact(0),
            BodyType::Stream(_) => SizeHint::default(),
        }
    }
}
