//! ## A WebDAV server library.
//!
//! Exposes a filesystem subtree over HTTP per RFC 4918: reading,
//! writing, collection management, property queries and class-2
//! locking. The HTTP transport is the caller's business; it hands
//! parsed [`http::Request`]s to a [`DavHandler`] and writes the
//! returned [`Response`](http::Response) back to the wire.
//!
//! Locks live in a SQLite table so several server processes can share
//! one tree; the store's immediate transactions serialize conflicting
//! LOCK requests across processes.
//!
//! ```no_run
//! use davshare::DavHandler;
//!
//! let handler = DavHandler::builder()
//!     .root_dir("/srv/files")
//!     .lock_db("/srv/files/.locks.db")
//!     .build_handler();
//! // hand requests to handler.handle(req).await
//! ```

pub mod body;

mod conditional;
mod davhandler;
mod davheaders;
mod davpath;
mod errors;
mod etag;
mod handle_copymove;
mod handle_delete;
mod handle_gethead;
mod handle_lock;
mod handle_mkcol;
mod handle_options;
mod handle_props;
mod handle_put;
mod locks;
mod multistatus;
mod props;
mod resolver;
mod util;
mod xmltree_ext;

pub use crate::davhandler::{DavConfig, DavHandler, HtmlInterface};
pub use crate::resolver::UnicodeForm;
pub use crate::util::DavMethod;
